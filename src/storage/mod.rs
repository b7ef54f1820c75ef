//! Image and video bytes on the local filesystem.
//!
//! Files live at `<root>/<camera id>/<entity id>.<ext>`, where the extension
//! is derived from the entity's MIME type.

use crate::db::models::{Image, Video};
use crate::error::Error;
use anyhow::Result;
use log::debug;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct MediaFiles {
    root: PathBuf,
}

impl MediaFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn image_path(&self, image: &Image) -> PathBuf {
        self.path_for(&image.camera_id, &image.id, &image.mime)
    }

    pub fn video_path(&self, video: &Video) -> PathBuf {
        self.path_for(&video.camera_id, &video.id, &video.mime)
    }

    fn path_for(&self, camera_id: &Uuid, id: &Uuid, mime: &str) -> PathBuf {
        self.root
            .join(camera_id.to_string())
            .join(format!("{}.{}", id, extension_for(mime)))
    }

    /// Write the full image payload
    pub async fn write_image(&self, image: &Image, data: &[u8]) -> Result<PathBuf> {
        let mut file = self.create_image_file(image).await?;
        file.write_all(data)
            .await
            .map_err(|e| Error::Io(format!("Failed to write image {}: {}", image.id, e)))?;
        file.flush()
            .await
            .map_err(|e| Error::Io(format!("Failed to flush image {}: {}", image.id, e)))?;

        Ok(self.image_path(image))
    }

    /// Open the image file for streaming writes
    pub async fn create_image_file(&self, image: &Image) -> Result<File> {
        let path = self.image_path(image);
        ensure_parent(&path).await?;
        debug!("Creating image file {}", path.display());

        let file = File::create(&path)
            .await
            .map_err(|e| Error::Io(format!("Failed to create {}: {}", path.display(), e)))?;
        Ok(file)
    }

    pub async fn open_image(&self, image: &Image) -> Result<File> {
        open(&self.image_path(image)).await
    }

    pub async fn open_video(&self, video: &Video) -> Result<File> {
        open(&self.video_path(video)).await
    }

    /// Path an external recorder should write the video to; the directory is created
    pub async fn prepare_video_path(&self, video: &Video) -> Result<PathBuf> {
        let path = self.video_path(video);
        ensure_parent(&path).await?;
        Ok(path)
    }
}

/// Preferred file extension for a MIME type, `bin` when unknown
pub fn extension_for(mime: &str) -> &'static str {
    mime_guess::get_mime_extensions_str(mime)
        .and_then(|exts| preferred_extension(mime, exts))
        .unwrap_or("bin")
}

fn preferred_extension(mime: &str, exts: &'static [&'static str]) -> Option<&'static str> {
    // mime_guess lists jpeg extensions alphabetically
    match mime {
        "image/jpeg" => Some("jpg"),
        _ => exts.first().copied(),
    }
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::Io(format!("Failed to create {}: {}", parent.display(), e)))?;
    }
    Ok(())
}

async fn open(path: &Path) -> Result<File> {
    let file = File::open(path)
        .await
        .map_err(|e| Error::NotFound(format!("{}: {}", path.display(), e)))?;
    Ok(file)
}
