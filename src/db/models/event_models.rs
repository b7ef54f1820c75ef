use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kind of camera event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum EventKind {
    Unreachable = 1,
    Motion = 2,
    Recording = 3,
    Alert = 4,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Unreachable => write!(f, "unreachable"),
            EventKind::Motion => write!(f, "motion"),
            EventKind::Recording => write!(f, "recording"),
            EventKind::Alert => write!(f, "alert"),
        }
    }
}

/// Event model. Events are append-only.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Event {
    pub id: Uuid,
    pub camera_id: Uuid,
    pub kind: EventKind,
    pub image_id: Option<Uuid>,
    pub video_id: Option<Uuid>,
    pub details: Option<String>,
    /// Successive occurrences, e.g. failed health checks in a row
    pub count: i32,
    pub created_at: DateTime<Utc>,
}

/// Fields of an event about to be created
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub camera_id: Uuid,
    pub kind: EventKind,
    pub image_id: Option<Uuid>,
    pub video_id: Option<Uuid>,
    pub details: Option<String>,
    pub count: i32,
}

impl NewEvent {
    fn new(camera_id: Uuid, kind: EventKind) -> Self {
        Self {
            camera_id,
            kind,
            image_id: None,
            video_id: None,
            details: None,
            count: 0,
        }
    }

    pub fn motion(camera_id: Uuid, image_id: Uuid) -> Self {
        Self {
            image_id: Some(image_id),
            ..Self::new(camera_id, EventKind::Motion)
        }
    }

    pub fn alert(camera_id: Uuid, image_id: Option<Uuid>) -> Self {
        Self {
            image_id,
            ..Self::new(camera_id, EventKind::Alert)
        }
    }

    pub fn recording(camera_id: Uuid, video_id: Uuid) -> Self {
        Self {
            video_id: Some(video_id),
            ..Self::new(camera_id, EventKind::Recording)
        }
    }

    pub fn unreachable(camera_id: Uuid, count: i32, details: Option<String>) -> Self {
        Self {
            count,
            details,
            ..Self::new(camera_id, EventKind::Unreachable)
        }
    }

    /// Materialize the event with a new id and the current time
    pub fn into_event(self) -> Event {
        Event {
            id: Uuid::new_v4(),
            camera_id: self.camera_id,
            kind: self.kind,
            image_id: self.image_id,
            video_id: self.video_id,
            details: self.details,
            count: self.count,
            created_at: Utc::now(),
        }
    }
}
