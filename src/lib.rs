//! Girder service framework.
//!
//! Two entangled subsystems form the core:
//!
//! - an action-keyed HTTP dispatch pipeline with lenient parameter binding,
//!   access-control hooks and uniform response/audit logging (`api`, `bind`);
//! - a peer-to-peer keepalive mesh with primary/secondary failover and
//!   weighted round-robin address resolution (`keepalive`).
//!
//! Everything hangs off an explicit [`Server`] instance created at startup;
//! there are no process-wide singletons. Handlers receive a
//! [`RequestContext`] carrying the keepalive registry so they can resolve
//! and call peer services.

pub mod api;
pub mod bind;
pub mod client;
pub mod config;
pub mod http;
pub mod keepalive;
pub mod lifecycle;
pub mod observability;
pub mod util;

pub use api::registry::{AclResult, ActionParam, Api};
pub use api::RequestContext;
pub use bind::schema::{Bindable, FieldKind, FieldSchema, Schema};
pub use bind::BindError;
pub use config::schema::ServerConfig;
pub use http::server::{Server, ServerError};
pub use keepalive::registry::Keepalive;
pub use lifecycle::shutdown::Shutdown;
pub use lifecycle::CliArgs;
