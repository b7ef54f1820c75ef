use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Operational state of a camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[repr(i32)]
pub enum CameraState {
    Unknown = 0,
    Unreachable = 1,
    Recording = 3,
    Ok = 99,
}

impl fmt::Display for CameraState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraState::Unknown => write!(f, "unknown"),
            CameraState::Unreachable => write!(f, "unreachable"),
            CameraState::Recording => write!(f, "recording"),
            CameraState::Ok => write!(f, "ok"),
        }
    }
}

/// Camera model
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Camera {
    pub id: Uuid,
    pub name: String,
    pub make: String,
    pub model: String,
    /// Base URL of the device, e.g. `http://192.168.1.88:88/`
    pub url: String,
    /// Credentials used to reach the device
    pub username: String,
    pub password: String,
    /// Identity the camera presents when uploading (SMTP/FTP user name)
    pub auth: String,
    /// Key the camera presents when uploading (SMTP/FTP password)
    pub key: String,
    pub state: CameraState,
    /// Record video on motion
    pub record: bool,
    /// Perform health checks
    pub health: bool,
    /// Send alerts
    pub alerts: bool,
    pub disabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Camera {
    /// Build a camera with freshly generated upload credentials
    pub fn new(name: &str, make: &str, model: &str, url: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            make: make.to_string(),
            model: model.to_string(),
            url: url.to_string(),
            username: String::new(),
            password: String::new(),
            auth: Uuid::new_v4().to_string(),
            key: Uuid::new_v4().to_string(),
            state: CameraState::Unknown,
            record: true,
            health: true,
            alerts: true,
            disabled: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.disabled
    }
}

impl fmt::Display for Camera {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Camera {}: {}", self.id, self.model)
    }
}

/// Predicate for directory queries; `None` fields match everything
#[derive(Debug, Clone, Default)]
pub struct CameraFilter {
    pub enabled: Option<bool>,
    pub health: Option<bool>,
    pub state: Option<CameraState>,
}

impl CameraFilter {
    pub fn matches(&self, camera: &Camera) -> bool {
        self.enabled.map_or(true, |e| camera.is_enabled() == e)
            && self.health.map_or(true, |h| camera.health == h)
            && self.state.map_or(true, |s| camera.state == s)
    }
}
