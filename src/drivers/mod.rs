//! Hardware drivers and the registry that matches cameras to them.

pub mod foscam;
pub mod process;

use crate::config::DriverConfig;
use crate::db::models::{Camera, Image, Video};
use crate::db::MediaStore;
use crate::error::Error;
use crate::storage::MediaFiles;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Ok,
    Unreachable,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Ok => write!(f, "ok"),
            HealthStatus::Unreachable => write!(f, "unreachable"),
        }
    }
}

/// Control of one physical camera
#[async_trait]
pub trait Driver: Send + Sync {
    fn camera(&self) -> &Camera;

    /// Reachability check with a bounded timeout
    async fn health(&self) -> Result<HealthStatus>;

    /// Take a still picture, stored as a new image
    async fn capture(&self) -> Result<Image>;

    /// Start recording in the background. Fails if already recording.
    async fn record(&mut self) -> Result<()>;

    /// Stop recording, wait for the recorder to exit and return the finalized video.
    /// Fails if not recording.
    async fn stop(&mut self) -> Result<Video>;

    /// Push the settings the driver needs onto the device
    async fn configure(&self) -> Result<()> {
        Ok(())
    }
}

/// What a driver gets to work with
#[derive(Clone)]
pub struct DriverContext {
    pub media: Arc<dyn MediaStore>,
    pub files: MediaFiles,
    pub config: DriverConfig,
}

pub type SupportsFn = fn(make: &str, model: &str) -> bool;
pub type BuildFn = Arc<dyn Fn(Camera, DriverContext) -> Box<dyn Driver> + Send + Sync>;

struct Registration {
    supports: SupportsFn,
    build: BuildFn,
}

/// Drivers by id. Lookup walks ids in lexical order and the first match wins.
pub struct DriverRegistry {
    drivers: BTreeMap<String, Registration>,
    context: DriverContext,
}

impl DriverRegistry {
    /// Registry without any driver
    pub fn empty(context: DriverContext) -> Self {
        Self {
            drivers: BTreeMap::new(),
            context,
        }
    }

    /// Registry with the built-in drivers
    pub fn init(context: DriverContext) -> Self {
        let mut registry = Self::empty(context);
        registry.register(foscam::DRIVER_ID, foscam::supports, |camera, context| {
            Box::new(foscam::FoscamDriver::new(camera, context))
        });
        registry
    }

    pub fn register<F>(&mut self, id: &str, supports: SupportsFn, build: F)
    where
        F: Fn(Camera, DriverContext) -> Box<dyn Driver> + Send + Sync + 'static,
    {
        debug!("Registering driver {}", id);
        let build: BuildFn = Arc::new(build);
        self.drivers
            .insert(id.to_string(), Registration { supports, build });
    }

    /// Build the driver for a camera
    pub fn find(&self, camera: &Camera) -> Result<Box<dyn Driver>> {
        for (id, registration) in &self.drivers {
            if (registration.supports)(&camera.make, &camera.model) {
                info!("Using driver {} for {}", id, camera);
                return Ok((registration.build)(camera.clone(), self.context.clone()));
            }
        }

        Err(Error::UnsupportedDevice(format!("{} {}", camera.make, camera.model)).into())
    }
}

/// Persist the duration of a recording that just ended
pub async fn finalize_recording(media: &dyn MediaStore, video: &Video) -> Result<Video> {
    let elapsed = (Utc::now() - video.created_at).num_seconds().max(0);
    let duration = i32::try_from(elapsed).unwrap_or(i32::MAX);
    media.finalize_video(&video.id, duration).await
}
