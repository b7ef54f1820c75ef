pub mod config;
pub mod db;
pub mod drivers;
pub mod error;
pub mod ingest;
pub mod messaging;
pub mod storage;
pub mod tasks;
pub mod worker;

// Re-export main components for easier use
pub use error::Error;
pub use ingest::{FtpServer, IngestService, SmtpServer};
pub use messaging::{JobQueue, LocalQueue, MessageBroker};
pub use worker::Worker;
