//! In-memory implementation of the store contracts.
//!
//! Holds everything behind a single lock, which keeps conditional state
//! transitions atomic the same way a single-row UPDATE does in PostgreSQL.

use crate::db::models::{
    Camera, CameraFilter, CameraState, Event, EventKind, Image, NewEvent, Video,
};
use crate::db::{window_start, CameraDirectory, EventStore, MediaStore};
use crate::error::Error;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    cameras: HashMap<Uuid, Camera>,
    events: Vec<Event>,
    images: HashMap<Uuid, Image>,
    videos: HashMap<Uuid, Video>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a camera record, as a directory edit would
    pub async fn put_camera(&self, camera: Camera) {
        self.tables.write().await.cameras.insert(camera.id, camera);
    }

    pub async fn set_disabled(&self, id: &Uuid, disabled: bool) -> Result<()> {
        let mut tables = self.tables.write().await;
        let camera = tables
            .cameras
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("Camera {}", id)))?;
        camera.disabled = disabled;
        camera.updated_at = Utc::now();
        Ok(())
    }

    /// Insert a fully formed event, keeping its timestamp
    pub async fn put_event(&self, event: Event) {
        self.tables.write().await.events.push(event);
    }

    /// Insert a fully formed video, keeping its timestamp
    pub async fn put_video(&self, video: Video) {
        self.tables.write().await.videos.insert(video.id, video);
    }

    pub async fn events(&self) -> Vec<Event> {
        self.tables.read().await.events.clone()
    }

    pub async fn images(&self) -> Vec<Image> {
        self.tables.read().await.images.values().cloned().collect()
    }

    pub async fn videos(&self) -> Vec<Video> {
        self.tables.read().await.videos.values().cloned().collect()
    }
}

#[async_trait]
impl CameraDirectory for MemoryStore {
    async fn authenticate(&self, identity: &str, key: &str) -> Result<Option<Camera>> {
        let tables = self.tables.read().await;
        Ok(tables
            .cameras
            .values()
            .find(|c| c.auth == identity && c.key == key && c.is_enabled())
            .cloned())
    }

    async fn get(&self, id: &Uuid) -> Result<Option<Camera>> {
        Ok(self.tables.read().await.cameras.get(id).cloned())
    }

    async fn get_by_auth(&self, identity: &str) -> Result<Option<Camera>> {
        let tables = self.tables.read().await;
        Ok(tables.cameras.values().find(|c| c.auth == identity).cloned())
    }

    async fn filter(&self, filter: &CameraFilter) -> Result<Vec<Camera>> {
        let tables = self.tables.read().await;
        let mut cameras: Vec<Camera> = tables
            .cameras
            .values()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();
        cameras.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(cameras)
    }

    async fn set_state(&self, id: &Uuid, state: CameraState) -> Result<()> {
        if let Some(camera) = self.tables.write().await.cameras.get_mut(id) {
            camera.state = state;
            camera.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn transition(&self, id: &Uuid, from: &[CameraState], to: CameraState) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.cameras.get_mut(id) {
            Some(camera) if from.contains(&camera.state) => {
                camera.state = to;
                camera.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn create(&self, event: NewEvent) -> Result<Event> {
        let mut tables = self.tables.write().await;
        if !tables.cameras.contains_key(&event.camera_id) {
            return Err(Error::NotFound(format!("Camera {}", event.camera_id)).into());
        }
        if let Some(image_id) = event.image_id {
            if !tables.images.contains_key(&image_id) {
                return Err(Error::NotFound(format!("Image {}", image_id)).into());
            }
        }
        if let Some(video_id) = event.video_id {
            if !tables.videos.contains_key(&video_id) {
                return Err(Error::NotFound(format!("Video {}", video_id)).into());
            }
        }

        let event = event.into_event();
        tables.events.push(event.clone());
        Ok(event)
    }

    async fn get(&self, id: &Uuid) -> Result<Option<Event>> {
        let tables = self.tables.read().await;
        Ok(tables.events.iter().find(|e| e.id == *id).cloned())
    }

    async fn filter(&self, camera_id: &Uuid, kind: EventKind, since: Duration) -> Result<Vec<Event>> {
        let start = window_start(since);
        let tables = self.tables.read().await;
        let mut events: Vec<Event> = tables
            .events
            .iter()
            .filter(|e| e.camera_id == *camera_id && e.kind == kind && e.created_at >= start)
            .cloned()
            .collect();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(events)
    }

    async fn count(&self, camera_id: &Uuid, kind: EventKind, since: Duration) -> Result<i64> {
        Ok(EventStore::filter(self, camera_id, kind, since).await?.len() as i64)
    }

    async fn latest(&self, camera_id: &Uuid, kind: EventKind) -> Result<Option<Event>> {
        let tables = self.tables.read().await;
        Ok(tables
            .events
            .iter()
            .filter(|e| e.camera_id == *camera_id && e.kind == kind)
            .max_by_key(|e| e.created_at)
            .cloned())
    }
}

#[async_trait]
impl MediaStore for MemoryStore {
    async fn create_image(&self, camera_id: &Uuid, mime: &str) -> Result<Image> {
        let image = Image::new(*camera_id, mime);
        self.tables.write().await.images.insert(image.id, image.clone());
        Ok(image)
    }

    async fn get_image(&self, id: &Uuid) -> Result<Option<Image>> {
        Ok(self.tables.read().await.images.get(id).cloned())
    }

    async fn create_video(&self, camera_id: &Uuid, mime: &str) -> Result<Video> {
        let video = Video::new(*camera_id, mime);
        self.tables.write().await.videos.insert(video.id, video.clone());
        Ok(video)
    }

    async fn finalize_video(&self, id: &Uuid, duration: i32) -> Result<Video> {
        let mut tables = self.tables.write().await;
        match tables.videos.get_mut(id) {
            Some(video) if !video.is_finalized() => {
                video.duration = duration;
                video.finalized_at = Some(Utc::now());
                Ok(video.clone())
            }
            _ => Err(Error::AlreadyExists(format!("Video {} missing or already finalized", id)).into()),
        }
    }

    async fn get_video(&self, id: &Uuid) -> Result<Option<Video>> {
        Ok(self.tables.read().await.videos.get(id).cloned())
    }
}
