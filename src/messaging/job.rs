use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future;
use futures_util::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;
use uuid::Uuid;

/// Task names known to the worker
pub const MOTION_TASK: &str = "motion";
pub const ALERT_TASK: &str = "alert";
pub const HEALTH_TASK: &str = "health";

/// A unit of work handed to the queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMessage {
    pub id: Uuid,
    pub task: String,
    pub payload: Value,
    pub submitted_at: DateTime<Utc>,
}

impl JobMessage {
    pub fn new(task: &str, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            task: task.to_string(),
            payload,
            submitted_at: Utc::now(),
        }
    }
}

/// Jobs as they arrive, already acknowledged
pub type JobStream = Pin<Box<dyn Stream<Item = Result<JobMessage>> + Send>>;

/// Fire-and-forget job distribution
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Hand a job over. Returns once the queue has accepted it.
    async fn enqueue(&self, task: &str, payload: Value) -> Result<()>;

    /// Receive jobs for the given tasks. The stream ends when the queue goes away.
    async fn consume(&self, tasks: &[String]) -> Result<JobStream>;
}

/// Merge per-task streams into one that ends as soon as any of them ends,
/// so a single lost consumer brings the whole session down for a reconnect.
pub fn merge_until_first_end(streams: Vec<JobStream>) -> JobStream {
    let marked = streams
        .into_iter()
        .map(|jobs| jobs.map(Some).chain(stream::once(future::ready(None))).boxed());

    Box::pin(
        stream::select_all(marked)
            .take_while(|job| future::ready(job.is_some()))
            .filter_map(future::ready),
    )
}
