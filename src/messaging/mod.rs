pub mod broker;
pub mod job;
pub mod local;

pub use broker::MessageBroker;
pub use job::{JobMessage, JobQueue, JobStream, ALERT_TASK, HEALTH_TASK, MOTION_TASK};
pub use local::LocalQueue;
