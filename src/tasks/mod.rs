//! Job handlers: what happens after a camera reports motion.

pub mod alert;
pub mod health;
pub mod locks;
pub mod motion;

use crate::config::TaskConfig;
use crate::db::models::{CameraFilter, CameraState};
use crate::db::{CameraDirectory, Stores};
use crate::drivers::DriverRegistry;
use crate::messaging::{JobQueue, ALERT_TASK, HEALTH_TASK, MOTION_TASK};
use crate::worker::Worker;
use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub use alert::AlertTask;
pub use health::{HealthRequest, HealthTask};
pub use locks::CameraLocks;
pub use motion::MotionTask;

#[derive(Debug, Clone, Copy)]
pub struct TaskSettings {
    pub recording_duration: Duration,
    pub alert_interval: Duration,
    pub poll_interval: Duration,
}

impl From<&TaskConfig> for TaskSettings {
    fn from(config: &TaskConfig) -> Self {
        Self {
            recording_duration: Duration::from_secs(config.recording_duration_secs),
            alert_interval: Duration::from_secs(config.alert_interval_secs),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
        }
    }
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self::from(&TaskConfig::default())
    }
}

/// Everything a handler may touch
#[derive(Clone)]
pub struct TaskContext {
    pub stores: Stores,
    pub queue: Arc<dyn JobQueue>,
    pub drivers: Arc<DriverRegistry>,
    pub settings: TaskSettings,
    pub locks: CameraLocks,
    /// Cancelled when the worker shuts down; running recordings stop early
    pub shutdown: CancellationToken,
}

/// Register the motion, alert and health handlers
pub fn register_all(worker: &mut Worker, context: TaskContext) {
    worker.register(ALERT_TASK, Arc::new(AlertTask::new(context.clone())));
    worker.register(HEALTH_TASK, Arc::new(HealthTask::new(context.clone())));
    worker.register(MOTION_TASK, Arc::new(MotionTask::new(context)));
}

/// Put cameras stuck in "recording" back to "ok". Meant for worker startup,
/// when no recording of this process can be running yet.
pub async fn reset_abandoned_recordings(cameras: &dyn CameraDirectory) -> Result<usize> {
    let recording = cameras
        .filter(&CameraFilter {
            state: Some(CameraState::Recording),
            ..CameraFilter::default()
        })
        .await?;

    let mut reset = 0;
    for camera in recording {
        if cameras
            .transition(&camera.id, &[CameraState::Recording], CameraState::Ok)
            .await?
        {
            warn!("{} was left recording, state reset", camera);
            reset += 1;
        }
    }
    if reset > 0 {
        info!("Reset {} abandoned recording(s)", reset);
    }
    Ok(reset)
}

/// Age of a record; negative ages (clock skew) count as zero
pub(crate) fn age(created_at: DateTime<Utc>) -> Duration {
    (Utc::now() - created_at).to_std().unwrap_or(Duration::ZERO)
}
