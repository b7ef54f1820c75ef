//! Foscam HD cameras (FI9805W, FI9821W V2).
//!
//! Everything goes through the camera's CGI interface. Recording pulls the
//! MJPEG stream through ffmpeg.

use super::process::TerminationLadder;
use super::{finalize_recording, Driver, DriverContext, HealthStatus};
use crate::db::models::{Camera, Image, Video};
use crate::error::Error;
use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::process::Stdio;
use tokio::process::{Child, Command};
use url::Url;

pub const DRIVER_ID: &str = "foscam";

const MODELS: [&str; 2] = ["FI9805W", "FI9821W V2"];
const VIDEO_MIME: &str = "video/x-msvideo";
const SNAPSHOT_MIME: &str = "image/jpeg";

pub fn supports(make: &str, model: &str) -> bool {
    make.eq_ignore_ascii_case("foscam") && MODELS.iter().any(|m| m.eq_ignore_ascii_case(model))
}

struct Recording {
    child: Child,
    video: Video,
}

pub struct FoscamDriver {
    camera: Camera,
    context: DriverContext,
    http: reqwest::Client,
    recording: Option<Recording>,
}

impl FoscamDriver {
    pub fn new(camera: Camera, context: DriverContext) -> Self {
        let http = reqwest::Client::builder()
            .timeout(context.config.health_timeout())
            .build()
            .unwrap_or_else(|e| {
                warn!("Falling back to default HTTP client: {}", e);
                reqwest::Client::new()
            });

        Self {
            camera,
            context,
            http,
            recording: None,
        }
    }

    fn cgi_url(&self, script: &str, cmd: &str) -> Result<Url> {
        let base = Url::parse(&self.camera.url)
            .map_err(|e| Error::Driver(format!("Invalid URL for {}: {}", self.camera, e)))?;
        let mut url = base
            .join(&format!("/cgi-bin/{}", script))
            .map_err(|e| Error::Driver(format!("Invalid URL for {}: {}", self.camera, e)))?;

        url.query_pairs_mut()
            .append_pair("cmd", cmd)
            .append_pair("usr", &self.camera.username)
            .append_pair("pwd", &self.camera.password);
        Ok(url)
    }

    pub fn stream_url(&self) -> Result<Url> {
        self.cgi_url("CGIStream.cgi", "GetMJStream")
    }

    pub fn setup_url(&self) -> Result<Url> {
        let mut url = self.cgi_url("CGIProxy.fcgi", "setSubStreamFormat")?;
        url.query_pairs_mut().append_pair("format", "1");
        Ok(url)
    }

    pub fn snapshot_url(&self) -> Result<Url> {
        self.cgi_url("CGIProxy.fcgi", "snapPicture2")
    }

    pub fn state_url(&self) -> Result<Url> {
        self.cgi_url("CGIProxy.fcgi", "getDevState")
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }
}

#[async_trait]
impl Driver for FoscamDriver {
    fn camera(&self) -> &Camera {
        &self.camera
    }

    async fn health(&self) -> Result<HealthStatus> {
        let url = self.state_url()?;

        match self.http.get(url).send().await {
            Ok(response) if response.status().is_success() => Ok(HealthStatus::Ok),
            Ok(response) => {
                debug!("{} answered {}", self.camera, response.status());
                Ok(HealthStatus::Unreachable)
            }
            Err(e) => {
                debug!("{} unreachable: {}", self.camera, e);
                Ok(HealthStatus::Unreachable)
            }
        }
    }

    async fn capture(&self) -> Result<Image> {
        let url = self.snapshot_url()?;

        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::Driver(format!("Snapshot of {} failed: {}", self.camera, e)))?;
        let data = response
            .bytes()
            .await
            .map_err(|e| Error::Driver(format!("Snapshot of {} failed: {}", self.camera, e)))?;

        let image = self
            .context
            .media
            .create_image(&self.camera.id, SNAPSHOT_MIME)
            .await?;
        self.context.files.write_image(&image, &data).await?;

        Ok(image)
    }

    async fn record(&mut self) -> Result<()> {
        if self.recording.is_some() {
            return Err(Error::Recording(format!("{} is already recording", self.camera)).into());
        }

        let stream_url = self.stream_url()?;
        let video = self
            .context
            .media
            .create_video(&self.camera.id, VIDEO_MIME)
            .await?;
        let path = self.context.files.prepare_video_path(&video).await?;

        let child = Command::new(&self.context.config.ffmpeg_path)
            .args(["-f", "mjpeg", "-i"])
            .arg(stream_url.as_str())
            .arg(&path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Recording(format!("Failed to start ffmpeg: {}", e)))?;

        info!(
            "Recording {} to {} (pid {:?})",
            self.camera,
            path.display(),
            child.id()
        );
        self.recording = Some(Recording { child, video });

        Ok(())
    }

    async fn stop(&mut self) -> Result<Video> {
        let Some(mut recording) = self.recording.take() else {
            return Err(Error::Recording(format!("{} is not recording", self.camera)).into());
        };

        let ladder = TerminationLadder::from(&self.context.config.ladder);
        ladder.run(&mut recording.child).await?;

        let video = finalize_recording(self.context.media.as_ref(), &recording.video).await?;
        info!(
            "Recording {} of {} finished after {}s",
            video.id, self.camera, video.duration
        );

        Ok(video)
    }

    async fn configure(&self) -> Result<()> {
        let url = self.setup_url()?;

        match self.http.get(url).send().await.and_then(|r| r.error_for_status()) {
            Ok(_) => debug!("Configured {}", self.camera),
            Err(e) => warn!("Failed to configure {}: {}", self.camera, e),
        }

        Ok(())
    }
}
