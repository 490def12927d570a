//! HTTP server assembly.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (axum setup, primary + optional secondary listener)
//!     → api::dispatch (catch-all pipeline)
//!     → keepalive::status_page (directly-routed diagnostic page)
//! ```

pub mod server;

pub use server::{Server, ServerError};
