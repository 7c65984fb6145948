//! HTTP + WebSocket API.
//!
//! Exposes the dialogue engine, distribution preview, job status and
//! notifications as REST endpoints under `/api/`, plus a push channel at
//! `/ws/notifications`.
//!
//! The router is composable: `api_router()` returns a `Router` that can be
//! mounted on any axum server instance.

pub mod endpoints;
pub mod error;
pub mod router;
pub mod server;
pub mod types;
pub mod websocket;

pub use router::api_router;
pub use server::{start_server, start_server_on, ApiServer, ServerError, ServerSession};
pub use types::ApiContext;
