use crate::error::Error;
use anyhow::Result;
use log::info;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// How long [`linger_close`] keeps reading after the half-close
const LINGER: Duration = Duration::from_secs(2);

/// Where a front-end listens
#[derive(Debug, Clone)]
pub enum Bind {
    Address { address: String, port: u16 },
    /// Already-bound socket inherited from the parent process
    #[cfg(unix)]
    Fd(i32),
}

pub async fn bind(target: &Bind) -> Result<TcpListener> {
    let listener = match target {
        Bind::Address { address, port } => TcpListener::bind((address.as_str(), *port))
            .await
            .map_err(|e| Error::Io(format!("Failed to bind {}:{}: {}", address, port, e)))?,
        #[cfg(unix)]
        Bind::Fd(fd) => {
            use std::os::unix::io::FromRawFd;

            // SAFETY: the descriptor is handed to us by the parent and not used elsewhere
            let std_listener = unsafe { std::net::TcpListener::from_raw_fd(*fd) };
            std_listener
                .set_nonblocking(true)
                .map_err(|e| Error::Io(format!("Failed to use fd {}: {}", fd, e)))?;
            TcpListener::from_std(std_listener)
                .map_err(|e| Error::Io(format!("Failed to use fd {}: {}", fd, e)))?
        }
    };

    if let Ok(addr) = listener.local_addr() {
        info!("Listening on {}", addr);
    }

    Ok(listener)
}

/// Half-close, then discard whatever the peer still sends. Closing a socket
/// with unread input resets it, and the reset can destroy the final reply.
pub async fn linger_close(stream: &mut TcpStream) {
    if stream.shutdown().await.is_err() {
        return;
    }
    let mut discard = [0u8; 4096];
    let drain = async {
        while let Ok(read) = stream.read(&mut discard).await {
            if read == 0 {
                break;
            }
        }
    };
    tokio::time::timeout(LINGER, drain).await.ok();
}
