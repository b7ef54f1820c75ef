use anyhow::Result;
use log::info;
use sqlx::{Executor, PgPool};

/// Migrations compiled into the binary, applied in order
const MIGRATIONS: &[(&str, &str)] = &[
    ("0001_init.sql", include_str!("sql/0001_init.sql")),
    ("0002_video_finalized.sql", include_str!("sql/0002_video_finalized.sql")),
];

/// Apply every migration. Statements are idempotent, so reruns are harmless.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    for (name, sql) in MIGRATIONS {
        pool.execute(*sql).await?;
        info!("Applied migration: {}", name);
    }

    Ok(())
}
