use crate::db::models::CameraFilter;
use crate::db::CameraDirectory;
use crate::messaging::{JobQueue, HEALTH_TASK};
use crate::tasks::HealthRequest;
use anyhow::Result;
use log::{debug, error, info};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Periodically enqueues a health check for every enabled camera that wants one
pub struct HealthScheduler {
    cameras: Arc<dyn CameraDirectory>,
    queue: Arc<dyn JobQueue>,
    check_interval: Duration,
}

impl HealthScheduler {
    pub fn new(
        cameras: Arc<dyn CameraDirectory>,
        queue: Arc<dyn JobQueue>,
        check_interval: Duration,
    ) -> Self {
        Self {
            cameras,
            queue,
            check_interval,
        }
    }

    /// Start sweeping in the background
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        info!("Starting health scheduler, every {:?}", self.check_interval);

        tokio::spawn(async move {
            let mut interval = interval(self.check_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;

                if let Err(e) = self.sweep().await {
                    error!("Error scheduling health checks: {}", e);
                }
            }
        })
    }

    /// Enqueue one health job per eligible camera. Returns how many were queued.
    pub async fn sweep(&self) -> Result<usize> {
        let filter = CameraFilter {
            enabled: Some(true),
            health: Some(true),
            state: None,
        };
        let cameras = self.cameras.filter(&filter).await?;
        debug!("Scheduling health checks for {} camera(s)", cameras.len());

        let mut queued = 0;
        for camera in &cameras {
            let payload = serde_json::to_value(HealthRequest { camera_id: camera.id })?;
            match self.queue.enqueue(HEALTH_TASK, payload).await {
                Ok(()) => queued += 1,
                Err(e) => error!("Failed to schedule health check of {}: {}", camera, e),
            }
        }

        Ok(queued)
    }
}
