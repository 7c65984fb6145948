//! API endpoint handlers, one module per resource.

pub mod flows;
pub mod health;
pub mod jobs;
pub mod notifications;
pub mod quiz;
pub mod sessions;
