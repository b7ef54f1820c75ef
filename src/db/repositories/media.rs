use crate::db::models::{Image, Video};
use crate::db::MediaStore;
use crate::error::Error;
use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// Image and video metadata repository
#[derive(Clone)]
pub struct MediaRepository {
    pool: Arc<PgPool>,
}

impl MediaRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MediaStore for MediaRepository {
    async fn create_image(&self, camera_id: &Uuid, mime: &str) -> Result<Image> {
        let image = Image::new(*camera_id, mime);

        let result = sqlx::query_as::<_, Image>(
            r#"
            INSERT INTO images (id, camera_id, mime, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, camera_id, mime, created_at
            "#,
        )
        .bind(image.id)
        .bind(image.camera_id)
        .bind(&image.mime)
        .bind(image.created_at)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to create image: {}", e)))?;

        Ok(result)
    }

    async fn get_image(&self, id: &Uuid) -> Result<Option<Image>> {
        let result = sqlx::query_as::<_, Image>(
            r#"
            SELECT id, camera_id, mime, created_at
            FROM images
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get image by ID: {}", e)))?;

        Ok(result)
    }

    async fn create_video(&self, camera_id: &Uuid, mime: &str) -> Result<Video> {
        let video = Video::new(*camera_id, mime);

        let result = sqlx::query_as::<_, Video>(
            r#"
            INSERT INTO videos (id, camera_id, mime, duration, created_at)
            VALUES ($1, $2, $3, 0, $4)
            RETURNING id, camera_id, mime, duration, created_at, finalized_at
            "#,
        )
        .bind(video.id)
        .bind(video.camera_id)
        .bind(&video.mime)
        .bind(video.created_at)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to create video: {}", e)))?;

        Ok(result)
    }

    async fn finalize_video(&self, id: &Uuid, duration: i32) -> Result<Video> {
        let result = sqlx::query_as::<_, Video>(
            r#"
            UPDATE videos
            SET duration = $1, finalized_at = NOW()
            WHERE id = $2 AND finalized_at IS NULL
            RETURNING id, camera_id, mime, duration, created_at, finalized_at
            "#,
        )
        .bind(duration)
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to finalize video: {}", e)))?;

        result.ok_or_else(|| {
            Error::AlreadyExists(format!("Video {} missing or already finalized", id)).into()
        })
    }

    async fn get_video(&self, id: &Uuid) -> Result<Option<Video>> {
        let result = sqlx::query_as::<_, Video>(
            r#"
            SELECT id, camera_id, mime, duration, created_at, finalized_at
            FROM videos
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get video by ID: {}", e)))?;

        Ok(result)
    }
}
