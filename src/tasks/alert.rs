use super::TaskContext;
use crate::db::models::{Event, NewEvent};
use crate::error::Error;
use crate::worker::TaskHandler;
use anyhow::Result;
use async_trait::async_trait;
use log::info;
use serde_json::Value;

/// Records an alert for the camera of a triggering event
pub struct AlertTask {
    context: TaskContext,
}

impl AlertTask {
    pub fn new(context: TaskContext) -> Self {
        Self { context }
    }

    pub async fn alert(&self, event: &Event) -> Result<Event> {
        let alert = self
            .context
            .stores
            .events
            .create(NewEvent::alert(event.camera_id, event.image_id))
            .await?;
        info!("Alert {} for camera {} raised by event {}", alert.id, event.camera_id, event.id);
        Ok(alert)
    }
}

#[async_trait]
impl TaskHandler for AlertTask {
    async fn run(&self, payload: Value) -> Result<()> {
        let event: Event = serde_json::from_value(payload)
            .map_err(|e| Error::Serialization(format!("Invalid alert payload: {}", e)))?;
        self.alert(&event).await?;
        Ok(())
    }
}
