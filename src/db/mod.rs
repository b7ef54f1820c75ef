use crate::config::DatabaseConfig;
use crate::error::Error;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub mod memory;
pub mod migrations;
pub mod models;
pub mod repositories;

use models::{Camera, CameraFilter, CameraState, Event, EventKind, Image, NewEvent, Video};
use repositories::{CamerasRepository, EventsRepository, MediaRepository};

/// Camera identity, credentials and operational state
#[async_trait]
pub trait CameraDirectory: Send + Sync {
    /// Find the enabled camera owning this identity/key pair
    async fn authenticate(&self, identity: &str, key: &str) -> Result<Option<Camera>>;

    async fn get(&self, id: &Uuid) -> Result<Option<Camera>>;

    /// Find a camera by its upload identity, enabled or not
    async fn get_by_auth(&self, identity: &str) -> Result<Option<Camera>>;

    async fn filter(&self, filter: &CameraFilter) -> Result<Vec<Camera>>;

    /// Overwrite the state column only
    async fn set_state(&self, id: &Uuid, state: CameraState) -> Result<()>;

    /// Set `to` if the current state is one of `from`. Returns whether the row changed.
    async fn transition(&self, id: &Uuid, from: &[CameraState], to: CameraState) -> Result<bool>;
}

/// Append-only camera events
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn create(&self, event: NewEvent) -> Result<Event>;

    async fn get(&self, id: &Uuid) -> Result<Option<Event>>;

    /// Events of a kind created within the last `since`, newest first.
    /// The window is inclusive: an event exactly `since` old matches.
    async fn filter(&self, camera_id: &Uuid, kind: EventKind, since: Duration) -> Result<Vec<Event>>;

    async fn count(&self, camera_id: &Uuid, kind: EventKind, since: Duration) -> Result<i64>;

    async fn latest(&self, camera_id: &Uuid, kind: EventKind) -> Result<Option<Event>>;
}

/// Image and video metadata; the bytes live in [`crate::storage::MediaFiles`]
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn create_image(&self, camera_id: &Uuid, mime: &str) -> Result<Image>;

    async fn get_image(&self, id: &Uuid) -> Result<Option<Image>>;

    async fn create_video(&self, camera_id: &Uuid, mime: &str) -> Result<Video>;

    /// Record the final duration. Fails if the video was already finalized.
    async fn finalize_video(&self, id: &Uuid, duration: i32) -> Result<Video>;

    async fn get_video(&self, id: &Uuid) -> Result<Option<Video>>;
}

/// Handles to every store the core talks to
#[derive(Clone)]
pub struct Stores {
    pub cameras: Arc<dyn CameraDirectory>,
    pub events: Arc<dyn EventStore>,
    pub media: Arc<dyn MediaStore>,
}

impl Stores {
    /// Stores backed by PostgreSQL
    pub fn postgres(pool: Arc<PgPool>) -> Self {
        Self {
            cameras: Arc::new(CamerasRepository::new(pool.clone())),
            events: Arc::new(EventsRepository::new(pool.clone())),
            media: Arc::new(MediaRepository::new(pool)),
        }
    }

    /// Stores backed by a single in-memory store
    pub fn memory(store: Arc<memory::MemoryStore>) -> Self {
        Self {
            cameras: store.clone(),
            events: store.clone(),
            media: store,
        }
    }
}

/// Lower bound of an inclusive look-back window ending now
pub(crate) fn window_start(since: Duration) -> DateTime<Utc> {
    window_start_at(Utc::now(), since)
}

/// Events created at or after this instant fall inside the window
fn window_start_at(now: DateTime<Utc>, since: Duration) -> DateTime<Utc> {
    let since = chrono::Duration::from_std(since).unwrap_or(chrono::Duration::MAX);
    now.checked_sub_signed(since).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Database service for handling connections and migrations
pub struct DatabaseService {
    pub pool: Arc<PgPool>,
}

impl DatabaseService {
    /// Create a new database service
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Initializing Database service");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&config.url)
            .await
            .map_err(|e| Error::Database(format!("Failed to connect to database: {}", e)))?;

        info!("Connected to PostgreSQL database");

        let service = Self {
            pool: Arc::new(pool),
        };

        if config.auto_migrate {
            service.run_migrations().await?;
        }

        Ok(service)
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        migrations::run_migrations(&self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to run migrations: {}", e)))?;

        info!("Database migrations completed successfully");

        Ok(())
    }

    pub fn stores(&self) -> Stores {
        Stores::postgres(self.pool.clone())
    }
}
