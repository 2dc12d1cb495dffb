pub mod errors;
pub mod events;
pub mod id;

pub use errors::{CelflicksError, ConfigError};
pub use events::EventBus;
pub use id::{new_id, PeerId};

pub type Result<T> = std::result::Result<T, CelflicksError>;
