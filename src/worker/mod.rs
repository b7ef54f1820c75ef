//! Worker runtime: pulls jobs off the queue and runs their handlers.

pub mod scheduler;

use crate::messaging::{JobMessage, JobQueue};
use anyhow::Result;
use async_trait::async_trait;
use futures_util::{FutureExt, StreamExt};
use log::{error, info, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub use scheduler::HealthScheduler;

#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, payload: Value) -> Result<()>;
}

pub struct Worker {
    queue: Arc<dyn JobQueue>,
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    concurrency: usize,
}

impl Worker {
    pub fn new(queue: Arc<dyn JobQueue>, concurrency: usize) -> Self {
        Self {
            queue,
            handlers: HashMap::new(),
            concurrency: concurrency.max(1),
        }
    }

    pub fn register(&mut self, task: &str, handler: Arc<dyn TaskHandler>) {
        info!("Registered task {}", task);
        self.handlers.insert(task.to_string(), handler);
    }

    pub fn tasks(&self) -> Vec<String> {
        let mut tasks: Vec<String> = self.handlers.keys().cloned().collect();
        tasks.sort();
        tasks
    }

    /// Run jobs until the queue's stream ends or `shutdown` is cancelled.
    ///
    /// On shutdown no further jobs are taken and the call returns once the
    /// running ones have finished. When the stream ends, running jobs are left
    /// to finish in the background.
    pub async fn work(&self, shutdown: CancellationToken) -> Result<()> {
        let mut jobs = self.queue.consume(&self.tasks()).await?;
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut running = JoinSet::new();
        info!("Worker started, {} job(s) at a time", self.concurrency);

        loop {
            let job = tokio::select! {
                _ = shutdown.cancelled() => break,
                job = jobs.next() => match job {
                    Some(Ok(job)) => job,
                    Some(Err(e)) => {
                        error!("Error receiving job: {}", e);
                        continue;
                    }
                    None => {
                        warn!("Job stream ended");
                        running.detach_all();
                        return Ok(());
                    }
                },
            };
            while running.try_join_next().is_some() {}

            let Some(handler) = self.handlers.get(&job.task).cloned() else {
                warn!("Dropping job {} for unknown task {}", job.id, job.task);
                continue;
            };

            let permit = tokio::select! {
                _ = shutdown.cancelled() => {
                    warn!("Dropping job {} ({}) received during shutdown", job.id, job.task);
                    break;
                }
                permit = permits.clone().acquire_owned() => permit?,
            };
            running.spawn(async move {
                execute(handler, job).await;
                drop(permit);
            });
        }

        info!("Worker stopping, waiting for {} running job(s)", running.len());
        while running.join_next().await.is_some() {}
        info!("Worker stopped");
        Ok(())
    }
}

async fn execute(handler: Arc<dyn TaskHandler>, job: JobMessage) {
    let JobMessage { id, task, payload, .. } = job;
    info!("Execution of {} ({}) starting", task, id);

    match AssertUnwindSafe(handler.run(payload)).catch_unwind().await {
        Ok(Ok(())) => info!("Execution of {} ({}) complete", task, id),
        Ok(Err(e)) => error!("Execution of {} ({}) failed: {:#}", task, id, e),
        Err(_) => error!("Execution of {} ({}) panicked", task, id),
    }
}

/// Run `session` again and again, `retry_delay` apart, until `shutdown` is cancelled.
///
/// Sessions are expected to watch `shutdown` themselves. Once it fires, the
/// running session gets `grace` to wind down before it is dropped.
pub async fn run_with_reconnect<S, F>(
    mut session: S,
    retry_delay: Duration,
    shutdown: CancellationToken,
    grace: Duration,
) -> Result<()>
where
    S: FnMut() -> F,
    F: Future<Output = Result<()>>,
{
    while !shutdown.is_cancelled() {
        let running = session();
        tokio::pin!(running);

        let finished = tokio::select! {
            result = &mut running => Some(result),
            _ = shutdown.cancelled() => None,
        };
        let Some(result) = finished else {
            info!("Shutting down worker, allowing {:?} for running jobs", grace);
            match tokio::time::timeout(grace, &mut running).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Worker session failed during shutdown: {:#}", e),
                Err(_) => warn!("Running jobs did not finish within {:?}", grace),
            }
            break;
        };

        match result {
            Ok(()) => warn!("Worker session ended, reconnecting in {:?}", retry_delay),
            Err(e) => error!("Worker session failed: {:#}, reconnecting in {:?}", e, retry_delay),
        }

        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = tokio::time::sleep(retry_delay) => {}
        }
    }

    info!("Worker shut down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::LocalQueue;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    struct Forward(mpsc::UnboundedSender<Value>);

    #[async_trait]
    impl TaskHandler for Forward {
        async fn run(&self, payload: Value) -> Result<()> {
            self.0.send(payload).ok();
            Ok(())
        }
    }

    struct Explode;

    #[async_trait]
    impl TaskHandler for Explode {
        async fn run(&self, payload: Value) -> Result<()> {
            if payload["panic"] == true {
                panic!("boom");
            }
            Err(anyhow::anyhow!("failed"))
        }
    }

    struct Slow {
        started: mpsc::UnboundedSender<()>,
        finished: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TaskHandler for Slow {
        async fn run(&self, _payload: Value) -> Result<()> {
            self.started.send(()).ok();
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn failures_do_not_stop_the_loop() {
        let queue = Arc::new(LocalQueue::new());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut worker = Worker::new(queue.clone(), 2);
        worker.register("explode", Arc::new(Explode));
        worker.register("forward", Arc::new(Forward(tx)));
        assert_eq!(worker.tasks(), vec!["explode", "forward"]);

        let shutdown = CancellationToken::new();
        let running = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { worker.work(shutdown).await }
        });

        queue.enqueue("explode", json!({"panic": true})).await.unwrap();
        queue.enqueue("explode", json!({"panic": false})).await.unwrap();
        queue.enqueue("unknown", json!({})).await.unwrap();
        queue.enqueue("forward", json!({"n": 7})).await.unwrap();

        let payload = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload["n"], 7);

        shutdown.cancel();
        running.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_waits_for_running_jobs() {
        let queue = Arc::new(LocalQueue::new());
        let (started, mut job_started) = mpsc::unbounded_channel();
        let finished = Arc::new(AtomicUsize::new(0));

        let mut worker = Worker::new(queue.clone(), 2);
        worker.register(
            "slow",
            Arc::new(Slow {
                started,
                finished: finished.clone(),
            }),
        );

        let shutdown = CancellationToken::new();
        let running = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { worker.work(shutdown).await }
        });

        queue.enqueue("slow", json!({})).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), job_started.recv())
            .await
            .unwrap()
            .unwrap();

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reconnects_until_shutdown() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();

        let shutdown = CancellationToken::new();
        let runner = tokio::spawn(run_with_reconnect(
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(anyhow::anyhow!("broker unreachable"))
                }
            },
            Duration::from_millis(10),
            shutdown.clone(),
            Duration::from_secs(1),
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();

        runner.await.unwrap().unwrap();
        assert!(attempts.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn shutdown_gives_up_on_a_stuck_session() {
        let shutdown = CancellationToken::new();
        let runner = tokio::spawn(run_with_reconnect(
            || futures_util::future::pending::<Result<()>>(),
            Duration::from_secs(30),
            shutdown.clone(),
            Duration::from_millis(50),
        ));

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), runner)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn shutdown_lets_the_session_wind_down() {
        let wound_down = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();

        let runner = tokio::spawn(run_with_reconnect(
            {
                let shutdown = shutdown.clone();
                let wound_down = wound_down.clone();
                move || {
                    let shutdown = shutdown.clone();
                    let wound_down = wound_down.clone();
                    async move {
                        shutdown.cancelled().await;
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        wound_down.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }
            },
            Duration::from_secs(30),
            shutdown.clone(),
            Duration::from_secs(5),
        ));

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.cancel();
        runner.await.unwrap().unwrap();
        assert_eq!(wound_down.load(Ordering::SeqCst), 1);
    }
}
