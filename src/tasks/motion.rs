//! Motion handling: alert debounce and recording while motion continues.

use super::{age, TaskContext};
use crate::db::models::{CameraState, Event, EventKind, NewEvent, Video};
use crate::db::CameraDirectory;
use crate::drivers::Driver;
use crate::error::Error;
use crate::messaging::ALERT_TASK;
use crate::worker::TaskHandler;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// What a motion job ended up doing
#[derive(Debug, Clone, PartialEq)]
pub enum MotionOutcome {
    /// Too old to act on
    Stale,
    /// Another job is already recording this camera
    AlreadyRecording,
    /// Recording is switched off for the camera
    RecordingDisabled,
    /// Recorded; `None` when the recorder could not be stopped cleanly
    Recorded(Option<Video>),
}

/// Motion older than `threshold` is stale; exactly `threshold` old counts as stale
pub fn is_stale(created_at: DateTime<Utc>, threshold: Duration) -> bool {
    age(created_at) >= threshold
}

pub struct MotionTask {
    context: TaskContext,
}

impl MotionTask {
    pub fn new(context: TaskContext) -> Self {
        Self { context }
    }

    pub async fn handle(&self, event: &Event) -> Result<MotionOutcome> {
        let settings = &self.context.settings;
        if is_stale(event.created_at, settings.recording_duration) {
            debug!("Discarding stale motion event {}", event.id);
            return Ok(MotionOutcome::Stale);
        }

        let camera = self
            .context
            .stores
            .cameras
            .get(&event.camera_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Camera {}", event.camera_id)))?;

        if camera.alerts {
            self.maybe_alert(event).await?;
        }

        if !camera.record {
            return Ok(MotionOutcome::RecordingDisabled);
        }

        // The in-process lock keeps concurrent jobs of this worker apart, the
        // conditional state write keeps other workers out.
        let Some(_guard) = self.context.locks.try_acquire(&camera.id) else {
            info!("Already recording for {}", camera);
            return Ok(MotionOutcome::AlreadyRecording);
        };
        let idle = [CameraState::Unknown, CameraState::Ok, CameraState::Unreachable];
        if !self
            .context
            .stores
            .cameras
            .transition(&camera.id, &idle, CameraState::Recording)
            .await?
        {
            info!("Already recording for {}", camera);
            return Ok(MotionOutcome::AlreadyRecording);
        }

        let reset = StateReset::new(self.context.stores.cameras.clone(), camera.id);
        info!("Recording for {}", camera);
        let recorded = self.record_while_active(event).await;

        reset.run().await;
        info!("Done recording for {}", camera);

        recorded.map(MotionOutcome::Recorded)
    }

    /// Enqueue an alert unless the camera had one within the alert interval
    async fn maybe_alert(&self, event: &Event) -> Result<()> {
        let recent = self
            .context
            .stores
            .events
            .count(&event.camera_id, EventKind::Alert, self.context.settings.alert_interval)
            .await?;
        if recent > 0 {
            debug!("Alert for camera {} suppressed", event.camera_id);
            return Ok(());
        }

        let payload = serde_json::to_value(event)
            .map_err(|e| Error::Serialization(format!("Failed to serialize event: {}", e)))?;
        if let Err(e) = self.context.queue.enqueue(ALERT_TASK, payload).await {
            warn!("Failed to enqueue alert for camera {}: {}", event.camera_id, e);
        }
        Ok(())
    }

    async fn record_while_active(&self, event: &Event) -> Result<Option<Video>> {
        let camera = self
            .context
            .stores
            .cameras
            .get(&event.camera_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Camera {}", event.camera_id)))?;
        let mut driver = self.context.drivers.find(&camera)?;
        driver.record().await?;

        if let Err(e) = self.watch(event).await {
            error!("Lost track of motion for {}: {}", camera, e);
        }

        self.finish(driver.as_mut()).await
    }

    /// Wait while the camera stays enabled and keeps reporting motion.
    /// Worker shutdown ends the wait early.
    async fn watch(&self, event: &Event) -> Result<()> {
        let settings = &self.context.settings;
        let shutdown = &self.context.shutdown;
        loop {
            if shutdown.is_cancelled() {
                info!("Worker shutting down, stopping recording of camera {}", event.camera_id);
                return Ok(());
            }

            let enabled = self
                .context
                .stores
                .cameras
                .get(&event.camera_id)
                .await?
                .map_or(false, |c| c.is_enabled());
            if !enabled {
                debug!("Camera {} disabled, stopping", event.camera_id);
                return Ok(());
            }

            let motion = self
                .context
                .stores
                .events
                .count(&event.camera_id, EventKind::Motion, settings.recording_duration)
                .await?;
            if motion == 0 {
                debug!("No recent motion for camera {}, stopping", event.camera_id);
                return Ok(());
            }

            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(settings.poll_interval) => {}
            }
        }
    }

    async fn finish(&self, driver: &mut dyn Driver) -> Result<Option<Video>> {
        let camera_id = driver.camera().id;
        let video = match driver.stop().await {
            Ok(video) => video,
            Err(e) => {
                error!("Failed to stop recording of camera {}: {}", camera_id, e);
                return Ok(None);
            }
        };

        self.context
            .stores
            .events
            .create(NewEvent::recording(camera_id, video.id))
            .await?;
        Ok(Some(video))
    }
}

/// Returns a camera to "ok" once its recording section is over. If the job is
/// dropped before [`StateReset::run`] completes, the reset is spawned from `drop`.
struct StateReset {
    cameras: Arc<dyn CameraDirectory>,
    camera_id: Uuid,
    done: bool,
}

impl StateReset {
    fn new(cameras: Arc<dyn CameraDirectory>, camera_id: Uuid) -> Self {
        Self {
            cameras,
            camera_id,
            done: false,
        }
    }

    async fn run(mut self) {
        reset_state(self.cameras.as_ref(), &self.camera_id).await;
        self.done = true;
    }
}

impl Drop for StateReset {
    fn drop(&mut self) {
        if self.done {
            return;
        }

        warn!("Recording of camera {} was interrupted", self.camera_id);
        let cameras = self.cameras.clone();
        let camera_id = self.camera_id;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { reset_state(cameras.as_ref(), &camera_id).await });
            }
            Err(_) => error!("No runtime left to reset state of camera {}", camera_id),
        }
    }
}

async fn reset_state(cameras: &dyn CameraDirectory, camera_id: &Uuid) {
    if let Err(e) = cameras.set_state(camera_id, CameraState::Ok).await {
        error!("Failed to reset state of camera {}: {}", camera_id, e);
    }
}

#[async_trait]
impl TaskHandler for MotionTask {
    async fn run(&self, payload: Value) -> Result<()> {
        let event: Event = serde_json::from_value(payload)
            .map_err(|e| Error::Serialization(format!("Invalid motion payload: {}", e)))?;
        let outcome = self.handle(&event).await?;
        debug!("Motion event {}: {:?}", event.id, outcome);
        Ok(())
    }
}
