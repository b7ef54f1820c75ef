pub mod camera_models;
pub mod event_models;
pub mod media_models;

pub use camera_models::{Camera, CameraFilter, CameraState};
pub use event_models::{Event, EventKind, NewEvent};
pub use media_models::{Image, Video};
