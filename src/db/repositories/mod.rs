pub mod cameras;
pub mod events;
pub mod media;

pub use cameras::CamerasRepository;
pub use events::EventsRepository;
pub use media::MediaRepository;
