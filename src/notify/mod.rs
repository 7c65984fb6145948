//! Deduplicated, updating job notifications.

pub mod coordinator;
pub mod types;

pub use coordinator::NotificationCoordinator;
pub use types::*;
