pub mod error;
pub mod events;
pub mod id;

pub use error::{CoreError, ErrorCategory, Result};
pub use events::{EventBroadcaster, ResourceUpdateEvent, UpdateAction, resource_id_of, resource_type_of};
pub use id::generate_id;
