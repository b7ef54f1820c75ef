//! File-style upload front-end: a write-only FTP server with passive mode.

pub mod fs;
pub mod session;

use super::codec::{is_line_too_long, LineCodec};
use super::listener::linger_close;
use super::IngestService;
use crate::config::FtpConfig;
use crate::error::Error;
use anyhow::Result;
use fs::{upload_mime, Permissions, VirtualFs, CAMERA_PERMISSIONS};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use session::{Command, Login};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

const MAX_COMMAND_LINE: usize = 4096;

pub struct FtpServer {
    service: IngestService,
    config: FtpConfig,
}

/// Per-connection state
struct Connection {
    peer: SocketAddr,
    local: SocketAddr,
    login: Login,
    fs: VirtualFs,
    passive: Option<TcpListener>,
}

/// What to do with the control connection after a command
enum Next {
    Continue,
    Close,
}

impl FtpServer {
    pub fn new(service: IngestService, config: FtpConfig) -> Self {
        Self { service, config }
    }

    /// Accept connections until the listener fails
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!("FTP server ready");

        loop {
            let (stream, peer) = listener
                .accept()
                .await
                .map_err(|e| Error::Io(format!("Failed to accept FTP connection: {}", e)))?;

            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream, peer).await {
                    warn!("FTP connection from {} failed: {}", peer, e);
                }
            });
        }
    }

    async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        debug!("FTP connection from {}", peer);
        let local = stream.local_addr()?;
        let mut framed = Framed::new(stream, LineCodec::new(MAX_COMMAND_LINE));
        let mut conn = Connection {
            peer,
            local,
            login: Login::default(),
            fs: VirtualFs::default(),
            passive: None,
        };

        framed.send(format!("220 {}", self.config.banner)).await?;

        loop {
            let line = match tokio::time::timeout(self.config.idle_timeout(), framed.next()).await {
                Err(_) => {
                    framed
                        .send("421 Control connection timed out".to_string())
                        .await
                        .ok();
                    return Ok(());
                }
                Ok(None) => return Ok(()),
                Ok(Some(Err(e))) if is_line_too_long(&e) => {
                    info!("FTP connection from {} sent an overlong line, closing", peer);
                    framed.send("500 Line too long".to_string()).await.ok();
                    linger_close(framed.get_mut()).await;
                    return Ok(());
                }
                Ok(Some(line)) => line?,
            };

            let command = Command::parse(&line);
            match self.execute(&mut conn, &mut framed, command).await? {
                Next::Continue => {}
                Next::Close => return Ok(()),
            }
        }
    }

    async fn execute(
        &self,
        conn: &mut Connection,
        framed: &mut Framed<TcpStream, LineCodec>,
        command: Command,
    ) -> Result<Next> {
        if conn.login.identity().is_none() && !command.is_pre_login() {
            framed.send("530 Not logged in".to_string()).await?;
            return Ok(Next::Continue);
        }
        let permissions = Permissions::parse(CAMERA_PERMISSIONS);

        let reply = match command {
            Command::User(identity) => {
                conn.login = Login::Pending(identity);
                "331 User name okay, need password".to_string()
            }
            Command::Pass(key) => self.login(conn, &key).await,
            Command::Quit => {
                framed.send("221 Goodbye".to_string()).await?;
                return Ok(Next::Close);
            }
            Command::Noop => "200 NOOP ok".to_string(),
            Command::Syst => "215 UNIX Type: L8".to_string(),
            Command::Feat => "211-Features:\r\n EPSV\r\n PASV\r\n211 End".to_string(),
            Command::Type(kind) => match kind.as_str() {
                "A" | "A N" | "I" | "L 8" => format!("200 Type set to {}", kind),
                _ => format!("504 Type {} not supported", kind),
            },
            Command::Mode(mode) if mode == "S" => "200 Mode set to S".to_string(),
            Command::Mode(mode) => format!("504 Mode {} not supported", mode),
            Command::Stru(stru) if stru == "F" => "200 Structure set to F".to_string(),
            Command::Stru(stru) => format!("504 Structure {} not supported", stru),
            Command::Pwd => format!("257 \"{}\" is the current directory", conn.fs.pwd()),
            Command::Cwd(path) if permissions.enter => {
                format!("250 \"{}\" is the current directory", conn.fs.cwd(&path))
            }
            Command::Cdup if permissions.enter => {
                format!("250 \"{}\" is the current directory", conn.fs.cdup())
            }
            Command::Mkd(path) if permissions.make_dir => {
                format!("257 \"{}\" directory created", conn.fs.resolve(&path))
            }
            Command::Pasv => self.passive(conn, false).await,
            Command::Epsv => self.passive(conn, true).await,
            Command::Stor(filename) if permissions.write => {
                self.store(conn, framed, &filename).await?;
                return Ok(Next::Continue);
            }
            Command::Cwd(_) | Command::Cdup | Command::Mkd(_) | Command::Stor(_) => {
                "550 Permission denied".to_string()
            }
            Command::Denied(verb) => {
                debug!("Denied {} from {}", verb, conn.peer);
                "550 Permission denied".to_string()
            }
            Command::Unknown(verb) if verb.is_empty() => "500 Syntax error".to_string(),
            Command::Unknown(verb) => format!("502 Command {} not implemented", verb),
        };

        framed.send(reply).await?;
        Ok(Next::Continue)
    }

    async fn login(&self, conn: &mut Connection, key: &str) -> String {
        let identity = match &conn.login {
            Login::Pending(identity) => identity.clone(),
            Login::LoggedIn(_) => return "230 Already logged in".to_string(),
            Login::Anonymous => return "503 Login with USER first".to_string(),
        };
        conn.login = Login::Anonymous;

        match self.service.authenticate(&identity, key).await {
            Ok(camera) => {
                info!("{} logged in over FTP from {}", camera, conn.peer);
                conn.login = Login::LoggedIn(identity);
                "230 User logged in".to_string()
            }
            Err(e) => {
                if !matches!(e.downcast_ref::<Error>(), Some(Error::Authentication(_))) {
                    error!("FTP authentication unavailable: {}", e);
                }
                "530 Login incorrect".to_string()
            }
        }
    }

    /// Open a passive data listener on the control connection's local address
    async fn passive(&self, conn: &mut Connection, extended: bool) -> String {
        conn.passive = None;

        let listener = match TcpListener::bind(SocketAddr::new(conn.local.ip(), 0)).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to open passive listener: {}", e);
                return "425 Can't open passive connection".to_string();
            }
        };
        let port = match listener.local_addr() {
            Ok(addr) => addr.port(),
            Err(e) => {
                error!("Failed to open passive listener: {}", e);
                return "425 Can't open passive connection".to_string();
            }
        };

        let reply = if extended {
            format!("229 Entering Extended Passive Mode (|||{}|)", port)
        } else {
            match self.advertised_address(conn.local.ip()) {
                Some(ip) => {
                    let [a, b, c, d] = ip.octets();
                    format!(
                        "227 Entering Passive Mode ({},{},{},{},{},{})",
                        a,
                        b,
                        c,
                        d,
                        port >> 8,
                        port & 0xff
                    )
                }
                None => return "425 Use EPSV on IPv6 connections".to_string(),
            }
        };

        conn.passive = Some(listener);
        reply
    }

    fn advertised_address(&self, local: IpAddr) -> Option<Ipv4Addr> {
        if let Some(address) = &self.config.passive_address {
            match address.parse() {
                Ok(ip) => return Some(ip),
                Err(e) => warn!("Ignoring passive_address {}: {}", address, e),
            }
        }
        match local {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(ip) => ip.to_ipv4_mapped(),
        }
    }

    /// Receive one upload over the passive data connection
    async fn store(
        &self,
        conn: &mut Connection,
        framed: &mut Framed<TcpStream, LineCodec>,
        filename: &str,
    ) -> Result<()> {
        let Some(listener) = conn.passive.take() else {
            framed.send("425 Use PASV or EPSV first".to_string()).await?;
            return Ok(());
        };
        let Some(identity) = conn.login.identity() else {
            framed.send("530 Not logged in".to_string()).await?;
            return Ok(());
        };

        let camera = match self.service.resolve(identity).await {
            Ok(camera) => camera,
            Err(e) => {
                info!("Refusing upload from {}: {}", identity, e);
                framed.send("550 Permission denied".to_string()).await?;
                return Ok(());
            }
        };

        let mime = upload_mime(filename);
        let (image, mut file) = match self.service.open_upload(&camera, &mime).await {
            Ok(upload) => upload,
            Err(e) => {
                error!("Failed to open upload from {}: {}", camera, e);
                framed.send("451 Local error in processing".to_string()).await?;
                return Ok(());
            }
        };
        framed
            .send(format!("150 Opening data connection for {}", filename))
            .await?;

        let control_ip = conn.peer.ip();
        let accept = async {
            loop {
                let (data, from) = listener.accept().await?;
                if from.ip() == control_ip {
                    return Ok::<_, std::io::Error>(data);
                }
                warn!("Refusing data connection from {} for control connection {}", from, control_ip);
            }
        };
        let mut data = match tokio::time::timeout(self.config.data_timeout(), accept).await {
            Ok(Ok(data)) => data,
            Ok(Err(e)) => {
                warn!("Data connection from {} failed: {}", conn.peer, e);
                framed.send("425 Can't open data connection".to_string()).await?;
                return Ok(());
            }
            Err(_) => {
                warn!("Data connection from {} timed out", conn.peer);
                framed.send("425 Can't open data connection".to_string()).await?;
                return Ok(());
            }
        };

        let copied = receive(&mut data, &mut file, self.config.data_timeout()).await;
        drop(file);

        match copied {
            Ok(bytes) => {
                info!("Received {} ({} bytes) from {}", filename, bytes, camera);
                framed.send("226 Transfer complete".to_string()).await?;
            }
            Err(e) => {
                warn!("Upload {} from {} aborted: {}", filename, camera, e);
                framed
                    .send("426 Connection closed; transfer aborted".to_string())
                    .await?;
                return Ok(());
            }
        }

        let path = self.service.files().image_path(&image);
        if let Err(e) = self.service.upload_complete(&path).await {
            error!("Failed to process upload {}: {}", path.display(), e);
        }

        Ok(())
    }
}

/// Copy the data connection into `file`, giving up when no bytes arrive for `idle`
async fn receive<R, W>(data: &mut R, file: &mut W, idle: Duration) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let read = tokio::time::timeout(idle, data.read(&mut buf))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "data connection stalled"))??;
        if read == 0 {
            break;
        }
        file.write_all(&buf[..read]).await?;
        total += read as u64;
    }
    file.flush().await?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn receive_copies_until_eof() {
        let (mut client, mut server) = tokio::io::duplex(16);
        let sender = tokio::spawn(async move {
            client.write_all(b"snapshot bytes").await.unwrap();
        });

        let mut file = Vec::new();
        let copied = receive(&mut server, &mut file, Duration::from_secs(1)).await.unwrap();
        sender.await.unwrap();

        assert_eq!(copied, 14);
        assert_eq!(file, b"snapshot bytes");
    }

    #[tokio::test]
    async fn stalled_upload_times_out() {
        let (_client, mut server) = tokio::io::duplex(16);
        let mut file = Vec::new();

        let err = receive(&mut server, &mut file, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::TimedOut);
    }
}
