use super::TaskContext;
use crate::db::models::{Camera, CameraState, EventKind, NewEvent};
use crate::drivers::HealthStatus;
use crate::error::Error;
use crate::worker::TaskHandler;
use anyhow::Result;
use async_trait::async_trait;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRequest {
    pub camera_id: Uuid,
}

/// Checks a camera and keeps its reachability state current
pub struct HealthTask {
    context: TaskContext,
}

impl HealthTask {
    pub fn new(context: TaskContext) -> Self {
        Self { context }
    }

    pub async fn check(&self, camera_id: &Uuid) -> Result<HealthStatus> {
        let camera = self
            .context
            .stores
            .cameras
            .get(camera_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Camera {}", camera_id)))?;

        let driver = self.context.drivers.find(&camera)?;
        let status = driver.health().await?;

        match status {
            HealthStatus::Ok => self.mark_ok(&camera).await?,
            HealthStatus::Unreachable => self.mark_unreachable(&camera).await?,
        }

        Ok(status)
    }

    async fn mark_ok(&self, camera: &Camera) -> Result<()> {
        let changed = self
            .context
            .stores
            .cameras
            .transition(
                &camera.id,
                &[CameraState::Unknown, CameraState::Unreachable],
                CameraState::Ok,
            )
            .await?;
        if changed {
            info!("{} is reachable", camera);
        }
        Ok(())
    }

    async fn mark_unreachable(&self, camera: &Camera) -> Result<()> {
        // A camera that was unreachable before continues its streak
        let streak = if camera.state == CameraState::Unreachable {
            self.context
                .stores
                .events
                .latest(&camera.id, EventKind::Unreachable)
                .await?
                .map_or(0, |e| e.count)
        } else {
            0
        };

        self.context
            .stores
            .cameras
            .transition(
                &camera.id,
                &[CameraState::Unknown, CameraState::Ok],
                CameraState::Unreachable,
            )
            .await?;

        let count = streak + 1;
        warn!("{} is unreachable ({} in a row)", camera, count);
        self.context
            .stores
            .events
            .create(NewEvent::unreachable(
                camera.id,
                count,
                Some(format!("Health check of {} failed", camera.url)),
            ))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TaskHandler for HealthTask {
    async fn run(&self, payload: Value) -> Result<()> {
        let request: HealthRequest = serde_json::from_value(payload)
            .map_err(|e| Error::Serialization(format!("Invalid health payload: {}", e)))?;
        self.check(&request.camera_id).await?;
        Ok(())
    }
}
