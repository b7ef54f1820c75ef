//! Upload front-ends. Cameras push a still image when they detect motion;
//! every upload becomes a motion event and a motion job.

pub mod codec;
pub mod ftp;
pub mod listener;
pub mod smtp;

use crate::db::models::{Camera, Event, Image, NewEvent};
use crate::db::Stores;
use crate::error::Error;
use crate::messaging::{JobQueue, MOTION_TASK};
use crate::storage::MediaFiles;
use anyhow::Result;
use log::{debug, info, warn};
use std::path::Path;
use std::sync::Arc;
use tokio::fs::File;
use uuid::Uuid;

pub use ftp::FtpServer;
pub use smtp::SmtpServer;

/// The part of the core both front-ends talk to
#[derive(Clone)]
pub struct IngestService {
    stores: Stores,
    files: MediaFiles,
    queue: Arc<dyn JobQueue>,
}

impl IngestService {
    pub fn new(stores: Stores, files: MediaFiles, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            stores,
            files,
            queue,
        }
    }

    /// Check upload credentials. Unknown identities, wrong keys and disabled
    /// cameras all fail the same way.
    pub async fn authenticate(&self, identity: &str, key: &str) -> Result<Camera> {
        match self.stores.cameras.authenticate(identity, key).await? {
            Some(camera) => {
                debug!("Authenticated {}", camera);
                Ok(camera)
            }
            None => Err(Error::Authentication("invalid credentials".to_string()).into()),
        }
    }

    /// Current record of an authenticated identity, if it is still enabled
    pub async fn resolve(&self, identity: &str) -> Result<Camera> {
        match self.stores.cameras.get_by_auth(identity).await? {
            Some(camera) if camera.is_enabled() => Ok(camera),
            _ => Err(Error::Authentication("invalid credentials".to_string()).into()),
        }
    }

    /// Persist a complete image upload and raise motion for it
    pub async fn store_image(&self, camera: &Camera, mime: &str, data: &[u8]) -> Result<Event> {
        let image = self.stores.media.create_image(&camera.id, mime).await?;
        self.files.write_image(&image, data).await?;
        info!("Stored image {} ({} bytes) from {}", image.id, data.len(), camera);

        self.motion_detected(&image).await
    }

    /// Create the image record for a streamed upload and open its file
    pub async fn open_upload(&self, camera: &Camera, mime: &str) -> Result<(Image, File)> {
        let image = self.stores.media.create_image(&camera.id, mime).await?;
        let file = self.files.create_image_file(&image).await?;
        Ok((image, file))
    }

    /// Finish a streamed upload. The file stem is the image id; files that
    /// do not name a known image are ignored.
    pub async fn upload_complete(&self, path: &Path) -> Result<Option<Event>> {
        let Some(image_id) = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| Uuid::parse_str(stem).ok())
        else {
            debug!("Ignoring upload {}", path.display());
            return Ok(None);
        };

        match self.stores.media.get_image(&image_id).await? {
            Some(image) => Ok(Some(self.motion_detected(&image).await?)),
            None => {
                debug!("No image for upload {}", path.display());
                Ok(None)
            }
        }
    }

    /// Record motion for an image and hand it to the worker
    pub async fn motion_detected(&self, image: &Image) -> Result<Event> {
        let event = self
            .stores
            .events
            .create(NewEvent::motion(image.camera_id, image.id))
            .await?;

        let payload = serde_json::to_value(&event)
            .map_err(|e| Error::Serialization(format!("Failed to serialize event: {}", e)))?;
        if let Err(e) = self.queue.enqueue(MOTION_TASK, payload).await {
            warn!("Failed to enqueue motion job for event {}: {}", event.id, e);
        }

        Ok(event)
    }

    pub fn files(&self) -> &MediaFiles {
        &self.files
    }
}
