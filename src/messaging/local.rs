use super::job::{JobMessage, JobQueue, JobStream};
use crate::error::Error;
use anyhow::Result;
use async_trait::async_trait;
use futures_util::stream;
use log::{debug, warn};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};

/// In-process queue for single-process deployments and tests.
///
/// There is one consumer: the receiving half is handed out by the first
/// `consume` call.
pub struct LocalQueue {
    sender: mpsc::UnboundedSender<JobMessage>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<JobMessage>>>,
}

impl LocalQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
        }
    }
}

impl Default for LocalQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for LocalQueue {
    async fn enqueue(&self, task: &str, payload: Value) -> Result<()> {
        let job = JobMessage::new(task, payload);
        debug!("Queued job {} ({})", job.id, job.task);

        self.sender
            .send(job)
            .map_err(|e| Error::Broker(format!("Local queue closed: {}", e)))?;
        Ok(())
    }

    async fn consume(&self, tasks: &[String]) -> Result<JobStream> {
        let receiver = self
            .receiver
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::Broker("Local queue already has a consumer".to_string()))?;
        let tasks = tasks.to_vec();

        let jobs = stream::unfold((receiver, tasks), |(mut receiver, tasks)| async move {
            loop {
                let job = receiver.recv().await?;
                if tasks.contains(&job.task) {
                    return Some((Ok(job), (receiver, tasks)));
                }
                warn!("Dropping job {} for unconsumed task {}", job.id, job.task);
            }
        });

        Ok(Box::pin(jobs))
    }
}
