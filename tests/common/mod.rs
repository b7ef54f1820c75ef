#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use camwarden::config::DriverConfig;
use camwarden::db::memory::MemoryStore;
use camwarden::db::models::{Camera, Event, Image, NewEvent, Video};
use camwarden::db::{EventStore, MediaStore, Stores};
use camwarden::drivers::{finalize_recording, Driver, DriverContext, DriverRegistry, HealthStatus};
use camwarden::error::Error;
use camwarden::messaging::{JobQueue, JobStream};
use camwarden::storage::MediaFiles;
use camwarden::tasks::{CameraLocks, TaskContext, TaskSettings};
use camwarden::IngestService;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Queue that remembers what was enqueued
#[derive(Default)]
pub struct RecordingQueue {
    jobs: Mutex<Vec<(String, Value)>>,
    failing: AtomicBool,
}

impl RecordingQueue {
    pub fn jobs(&self) -> Vec<(String, Value)> {
        self.jobs.lock().unwrap().clone()
    }

    pub fn tasks(&self) -> Vec<String> {
        self.jobs().into_iter().map(|(task, _)| task).collect()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl JobQueue for RecordingQueue {
    async fn enqueue(&self, task: &str, payload: Value) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Broker("broker down".to_string()).into());
        }
        self.jobs.lock().unwrap().push((task.to_string(), payload));
        Ok(())
    }

    async fn consume(&self, _tasks: &[String]) -> Result<JobStream> {
        Err(Error::Broker("recording queue cannot be consumed".to_string()).into())
    }
}

/// Knobs and call log shared by every fake driver instance
#[derive(Default)]
pub struct FakeDevice {
    pub calls: Mutex<Vec<&'static str>>,
    pub unreachable: AtomicBool,
    pub fail_stop: AtomicBool,
}

impl FakeDevice {
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn log(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }
}

pub struct FakeDriver {
    camera: Camera,
    context: DriverContext,
    device: Arc<FakeDevice>,
    video: Option<Video>,
}

#[async_trait]
impl Driver for FakeDriver {
    fn camera(&self) -> &Camera {
        &self.camera
    }

    async fn health(&self) -> Result<HealthStatus> {
        self.device.log("health");
        if self.device.unreachable.load(Ordering::SeqCst) {
            Ok(HealthStatus::Unreachable)
        } else {
            Ok(HealthStatus::Ok)
        }
    }

    async fn capture(&self) -> Result<Image> {
        self.device.log("capture");
        let image = self.context.media.create_image(&self.camera.id, "image/jpeg").await?;
        self.context.files.write_image(&image, b"\xff\xd8fake").await?;
        Ok(image)
    }

    async fn record(&mut self) -> Result<()> {
        self.device.log("record");
        if self.video.is_some() {
            return Err(Error::Recording("already recording".to_string()).into());
        }
        self.video = Some(
            self.context
                .media
                .create_video(&self.camera.id, "video/x-msvideo")
                .await?,
        );
        Ok(())
    }

    async fn stop(&mut self) -> Result<Video> {
        self.device.log("stop");
        let video = self
            .video
            .take()
            .ok_or_else(|| Error::Recording("not recording".to_string()))?;
        if self.device.fail_stop.load(Ordering::SeqCst) {
            return Err(Error::RunawayProcess("recorder would not die".to_string()).into());
        }
        finalize_recording(self.context.media.as_ref(), &video).await
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub stores: Stores,
    pub queue: Arc<RecordingQueue>,
    pub files: MediaFiles,
    pub device: Arc<FakeDevice>,
    _dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let dir = tempfile::tempdir().unwrap();
        Self {
            stores: Stores::memory(store.clone()),
            store,
            queue: Arc::new(RecordingQueue::default()),
            files: MediaFiles::new(dir.path()),
            device: Arc::new(FakeDevice::default()),
            _dir: dir,
        }
    }

    /// Registry that drives cameras of make "Fake" with the shared fake device
    pub fn drivers(&self) -> DriverRegistry {
        let mut registry = DriverRegistry::empty(DriverContext {
            media: self.stores.media.clone(),
            files: self.files.clone(),
            config: DriverConfig::default(),
        });
        let device = self.device.clone();
        registry.register(
            "fake",
            |make, _| make == "Fake",
            move |camera, context| {
                Box::new(FakeDriver {
                    camera,
                    context,
                    device: device.clone(),
                    video: None,
                })
            },
        );
        registry
    }

    pub fn task_context(&self) -> TaskContext {
        TaskContext {
            stores: self.stores.clone(),
            queue: self.queue.clone(),
            drivers: Arc::new(self.drivers()),
            settings: TaskSettings {
                recording_duration: Duration::from_secs(60),
                alert_interval: Duration::from_secs(300),
                poll_interval: Duration::from_millis(10),
            },
            locks: CameraLocks::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn ingest(&self) -> IngestService {
        IngestService::new(self.stores.clone(), self.files.clone(), self.queue.clone())
    }

    pub async fn camera(&self, make: &str) -> Camera {
        let camera = Camera::new("porch", make, "F1", "http://127.0.0.1:9/");
        self.store.put_camera(camera.clone()).await;
        camera
    }

    /// Motion event with an image, created `age` ago
    pub async fn motion(&self, camera: &Camera, age: Duration) -> Event {
        let image = self.store.create_image(&camera.id, "image/jpeg").await.unwrap();
        let mut event = NewEvent::motion(camera.id, image.id).into_event();
        event.created_at = chrono::Utc::now() - chrono::Duration::from_std(age).unwrap();
        self.store.put_event(event.clone()).await;
        event
    }

    pub async fn backdated(&self, new_event: NewEvent, age: Duration) -> Event {
        let mut event = new_event.into_event();
        event.created_at = chrono::Utc::now() - chrono::Duration::from_std(age).unwrap();
        self.store.put_event(event.clone()).await;
        event
    }

    pub async fn events(&self) -> Vec<Event> {
        self.store.events().await
    }

    pub async fn latest(&self, camera: &Camera, kind: camwarden::db::models::EventKind) -> Option<Event> {
        self.store.latest(&camera.id, kind).await.unwrap()
    }
}

/// Line-oriented client for the SMTP and FTP front-ends
pub struct Client {
    reader: tokio::io::BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl Client {
    pub async fn connect(addr: std::net::SocketAddr) -> Self {
        let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (read, writer) = stream.into_split();
        Self {
            reader: tokio::io::BufReader::new(read),
            writer,
        }
    }

    pub async fn send(&mut self, line: &str) {
        use tokio::io::AsyncWriteExt;
        self.writer
            .write_all(format!("{}\r\n", line).as_bytes())
            .await
            .unwrap();
    }

    /// Full reply, multi-line replies joined with `\n`
    pub async fn reply(&mut self) -> String {
        use tokio::io::AsyncBufReadExt;
        let mut lines: Vec<String> = Vec::new();
        loop {
            let mut line = String::new();
            let read = tokio::time::timeout(Duration::from_secs(5), self.reader.read_line(&mut line))
                .await
                .expect("server did not reply in time")
                .unwrap();
            assert!(read > 0, "connection closed");
            let line = line.trim_end().to_string();
            let done = match lines.first() {
                None => line.as_bytes().get(3) != Some(&b'-'),
                Some(first) => line.starts_with(&format!("{} ", &first[..3])),
            };
            lines.push(line);
            if done {
                return lines.join("\n");
            }
        }
    }

    /// Reply code only
    pub async fn code(&mut self) -> String {
        self.reply().await[..3].to_string()
    }

    pub async fn command(&mut self, line: &str) -> String {
        self.send(line).await;
        self.reply().await
    }

    /// True once the server has closed the connection
    pub async fn closed(&mut self) -> bool {
        use tokio::io::AsyncBufReadExt;
        let mut line = String::new();
        matches!(
            tokio::time::timeout(Duration::from_secs(5), self.reader.read_line(&mut line)).await,
            Ok(Ok(0))
        )
    }
}

/// Wait until `check` holds, polling the store
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached in time");
}
