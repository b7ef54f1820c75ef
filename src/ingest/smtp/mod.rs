//! Mail-style upload front-end.

pub mod message;
pub mod session;

use super::codec::{is_line_too_long, LineCodec};
use super::listener::linger_close;
use super::IngestService;
use crate::config::SmtpConfig;
use crate::error::Error;
use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use session::{AuthResult, Session, State, Step};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

/// Longest command line, before DATA
const MAX_COMMAND_LINE: usize = 4096;

pub struct SmtpServer {
    service: IngestService,
    config: SmtpConfig,
}

impl SmtpServer {
    pub fn new(service: IngestService, config: SmtpConfig) -> Self {
        Self { service, config }
    }

    /// Accept connections until the listener fails
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!("SMTP server ready");

        loop {
            let (stream, peer) = listener
                .accept()
                .await
                .map_err(|e| Error::Io(format!("Failed to accept SMTP connection: {}", e)))?;

            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream, peer).await {
                    warn!("SMTP connection from {} failed: {}", peer, e);
                }
            });
        }
    }

    async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        debug!("SMTP connection from {}", peer);
        let data_line_limit = MAX_COMMAND_LINE.max(self.config.max_message_bytes);
        let mut framed = Framed::new(stream, LineCodec::new(MAX_COMMAND_LINE));
        let mut session = Session::new(&self.config.hostname, self.config.max_message_bytes);

        framed.send(session.greeting()).await?;

        loop {
            // Only message bodies may carry long lines
            let receiving_data = *session.state() == State::ReceivingData;
            framed.codec_mut().set_max_length(if receiving_data {
                data_line_limit
            } else {
                MAX_COMMAND_LINE
            });

            let line = match tokio::time::timeout(self.config.idle_timeout(), framed.next()).await {
                Err(_) => {
                    debug!("SMTP connection from {} idle, closing", peer);
                    framed.send(session.idle_timeout()).await.ok();
                    return Ok(());
                }
                Ok(None) => return Ok(()),
                Ok(Some(Err(e))) if is_line_too_long(&e) => {
                    info!("SMTP connection from {} sent an overlong line, closing", peer);
                    let reply = if receiving_data {
                        "552 5.3.4 Message size exceeds fixed maximum message size"
                    } else {
                        "500 5.5.2 Line too long"
                    };
                    framed.send(reply.to_string()).await.ok();
                    linger_close(framed.get_mut()).await;
                    return Ok(());
                }
                Ok(Some(line)) => line?,
            };

            let mut step = session.feed(&line);
            loop {
                match step {
                    Step::Wait => break,
                    Step::Reply(reply) => {
                        framed.send(reply).await?;
                        break;
                    }
                    Step::Quit(reply) => {
                        framed.send(reply).await?;
                        return Ok(());
                    }
                    Step::Authenticate { identity, key } => {
                        let result = self.authenticate(&identity, &key).await;
                        step = session.authenticated(result);
                    }
                    Step::Deliver { identity, message } => {
                        let reply = self.deliver(&identity, &message).await;
                        framed.send(reply).await?;
                        break;
                    }
                }
            }
        }
    }

    async fn authenticate(&self, identity: &str, key: &str) -> AuthResult {
        match self.service.authenticate(identity, key).await {
            Ok(_) => AuthResult::Accepted,
            Err(e) => match e.downcast_ref::<Error>() {
                Some(Error::Authentication(_)) => {
                    info!("SMTP authentication failed for {}", identity);
                    AuthResult::Rejected
                }
                _ => {
                    error!("SMTP authentication unavailable: {}", e);
                    AuthResult::Unavailable
                }
            },
        }
    }

    /// Store the message's first image and reply with the outcome
    async fn deliver(&self, identity: &str, raw: &[u8]) -> String {
        let camera = match self.service.resolve(identity).await {
            Ok(camera) => camera,
            Err(e) => {
                info!("Refusing message from {}: {}", identity, e);
                return "550 5.7.1 Camera not accepting uploads".to_string();
            }
        };

        let attachment = match message::first_image(raw) {
            Ok(Some(attachment)) => attachment,
            Ok(None) => {
                info!("Message from {} carries no image", camera);
                return "250 OK".to_string();
            }
            Err(e) => {
                warn!("Unreadable message from {}: {}", camera, e);
                return "554 5.6.0 Message could not be parsed".to_string();
            }
        };

        match self
            .service
            .store_image(&camera, &attachment.mime, &attachment.data)
            .await
        {
            Ok(event) => format!("250 OK queued as {}", event.id),
            Err(e) => {
                error!("Failed to store image from {}: {}", camera, e);
                "451 4.3.0 Local error in processing".to_string()
            }
        }
    }
}
