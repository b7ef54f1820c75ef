use crate::{
    db::models::{Camera, CameraFilter, CameraState},
    db::CameraDirectory,
    error::Error,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

const CAMERA_COLUMNS: &str = r#"
    id, name, make, model, url, username, password, auth, key, state,
    record, health, alerts, disabled, created_at, updated_at
"#;

/// Cameras repository for handling camera operations
#[derive(Clone)]
pub struct CamerasRepository {
    pool: Arc<PgPool>,
}

impl CamerasRepository {
    /// Create a new cameras repository
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CameraDirectory for CamerasRepository {
    async fn authenticate(&self, identity: &str, key: &str) -> Result<Option<Camera>> {
        let result = sqlx::query_as::<_, Camera>(&format!(
            r#"
            SELECT {CAMERA_COLUMNS}
            FROM cameras
            WHERE auth = $1 AND key = $2 AND disabled = FALSE
            "#
        ))
        .bind(identity)
        .bind(key)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to authenticate camera: {}", e)))?;

        Ok(result)
    }

    async fn get(&self, id: &Uuid) -> Result<Option<Camera>> {
        let result = sqlx::query_as::<_, Camera>(&format!(
            r#"
            SELECT {CAMERA_COLUMNS}
            FROM cameras
            WHERE id = $1
            "#
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get camera by ID: {}", e)))?;

        Ok(result)
    }

    async fn get_by_auth(&self, identity: &str) -> Result<Option<Camera>> {
        let result = sqlx::query_as::<_, Camera>(&format!(
            r#"
            SELECT {CAMERA_COLUMNS}
            FROM cameras
            WHERE auth = $1
            "#
        ))
        .bind(identity)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get camera by auth: {}", e)))?;

        Ok(result)
    }

    async fn filter(&self, filter: &CameraFilter) -> Result<Vec<Camera>> {
        let result = sqlx::query_as::<_, Camera>(&format!(
            r#"
            SELECT {CAMERA_COLUMNS}
            FROM cameras
            WHERE ($1::BOOLEAN IS NULL OR disabled = NOT $1)
              AND ($2::BOOLEAN IS NULL OR health = $2)
              AND ($3::INTEGER IS NULL OR state = $3)
            ORDER BY name
            "#
        ))
        .bind(filter.enabled)
        .bind(filter.health)
        .bind(filter.state.map(|s| s as i32))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to filter cameras: {}", e)))?;

        Ok(result)
    }

    async fn set_state(&self, id: &Uuid, state: CameraState) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE cameras
            SET state = $1, updated_at = $2
            WHERE id = $3
            "#,
        )
        .bind(state)
        .bind(Utc::now())
        .bind(id)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to update camera state: {}", e)))?;

        Ok(())
    }

    async fn transition(&self, id: &Uuid, from: &[CameraState], to: CameraState) -> Result<bool> {
        let from: Vec<i32> = from.iter().map(|s| *s as i32).collect();

        let result = sqlx::query(
            r#"
            UPDATE cameras
            SET state = $1, updated_at = $2
            WHERE id = $3 AND state = ANY($4)
            "#,
        )
        .bind(to)
        .bind(Utc::now())
        .bind(id)
        .bind(&from)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to transition camera state: {}", e)))?;

        debug!(
            "State transition of camera {} to {}: {} row(s)",
            id,
            to,
            result.rows_affected()
        );

        Ok(result.rows_affected() > 0)
    }
}
