use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Still image uploaded by or captured from a camera
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Image {
    pub id: Uuid,
    pub camera_id: Uuid,
    pub mime: String,
    pub created_at: DateTime<Utc>,
}

impl Image {
    pub fn new(camera_id: Uuid, mime: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            camera_id,
            mime: mime.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Video recorded from a camera
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Video {
    pub id: Uuid,
    pub camera_id: Uuid,
    pub mime: String,
    /// Length in seconds, 0 until the recording is finalized
    pub duration: i32,
    /// Time the recording started
    pub created_at: DateTime<Utc>,
    /// Set together with `duration`, exactly once
    pub finalized_at: Option<DateTime<Utc>>,
}

impl Video {
    pub fn is_finalized(&self) -> bool {
        self.finalized_at.is_some()
    }

    pub fn new(camera_id: Uuid, mime: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            camera_id,
            mime: mime.to_string(),
            duration: 0,
            created_at: Utc::now(),
            finalized_at: None,
        }
    }
}
