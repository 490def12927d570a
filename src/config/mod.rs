//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//!     → consumed by Server::new
//!
//! On reload signal (SIGUSR1):
//!     the user-supplied reload callback runs;
//!     dispatch tables and keepalive state are not reset
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::DispatchConfig;
pub use schema::KeepaliveConfig;
pub use schema::ObservabilityConfig;
pub use schema::ServerConfig;
pub use schema::ServiceConfig;
