use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Unsupported device: {0}")]
    UnsupportedDevice(String),

    #[error("Runaway process: {0}")]
    RunawayProcess(String),

    #[error("Recording error: {0}")]
    Recording(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}
