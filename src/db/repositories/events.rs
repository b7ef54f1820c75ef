use crate::db::models::{Event, EventKind, NewEvent};
use crate::db::{window_start, EventStore};
use crate::error::Error;
use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Events repository for handling event operations
#[derive(Clone)]
pub struct EventsRepository {
    pool: Arc<PgPool>,
}

impl EventsRepository {
    /// Create a new events repository
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventStore for EventsRepository {
    async fn create(&self, event: NewEvent) -> Result<Event> {
        let event = event.into_event();

        let result = sqlx::query_as::<_, Event>(
            r#"
            INSERT INTO events (
                id, camera_id, kind, image_id, video_id, details, count, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, camera_id, kind, image_id, video_id, details, count, created_at
            "#,
        )
        .bind(event.id)
        .bind(event.camera_id)
        .bind(event.kind)
        .bind(event.image_id)
        .bind(event.video_id)
        .bind(&event.details)
        .bind(event.count)
        .bind(event.created_at)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to create event: {}", e)))?;

        Ok(result)
    }

    async fn get(&self, id: &Uuid) -> Result<Option<Event>> {
        let result = sqlx::query_as::<_, Event>(
            r#"
            SELECT id, camera_id, kind, image_id, video_id, details, count, created_at
            FROM events
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get event by ID: {}", e)))?;

        Ok(result)
    }

    async fn filter(&self, camera_id: &Uuid, kind: EventKind, since: Duration) -> Result<Vec<Event>> {
        let result = sqlx::query_as::<_, Event>(
            r#"
            SELECT id, camera_id, kind, image_id, video_id, details, count, created_at
            FROM events
            WHERE camera_id = $1 AND kind = $2 AND created_at >= $3
            ORDER BY created_at DESC
            "#,
        )
        .bind(camera_id)
        .bind(kind)
        .bind(window_start(since))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to filter events: {}", e)))?;

        Ok(result)
    }

    async fn count(&self, camera_id: &Uuid, kind: EventKind, since: Duration) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM events
            WHERE camera_id = $1 AND kind = $2 AND created_at >= $3
            "#,
        )
        .bind(camera_id)
        .bind(kind)
        .bind(window_start(since))
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to count events: {}", e)))?;

        Ok(count)
    }

    async fn latest(&self, camera_id: &Uuid, kind: EventKind) -> Result<Option<Event>> {
        let result = sqlx::query_as::<_, Event>(
            r#"
            SELECT id, camera_id, kind, image_id, video_id, details, count, created_at
            FROM events
            WHERE camera_id = $1 AND kind = $2
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(camera_id)
        .bind(kind)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get latest event: {}", e)))?;

        Ok(result)
    }
}
