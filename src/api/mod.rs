//! Request dispatch subsystem.
//!
//! # Data Flow
//! ```text
//! inbound request
//!     → dispatch.rs (trace capture, OPTIONS/CORS preflight)
//!     → registry.rs tables:
//!         exact URL entry, or
//!         "/" + Action stub → action entry, or
//!         router.rs restful match (static beats parameterized), or
//!         fallback handler / 404
//!     → bind (typed parameter object)
//!     → ACL hook (may short-circuit)
//!     → handler (response, request log string)
//!     → response.rs (status reflection, JSON/JSONP/no-escape encoding)
//!     → access log, audit hook, metric sample
//! ```
//!
//! # Design Decisions
//! - Endpoint entries are immutable after registration; the dispatcher
//!   holds them behind an Arc with no locks on the request path
//! - Handlers are registered generically and type-erased into invokers;
//!   a fresh parameter value is produced per request by the binder
//! - Restful entries keep registration order so overlapping patterns
//!   resolve deterministically

pub mod dispatch;
pub mod registry;
pub mod response;
pub mod router;

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use axum::http::{HeaderMap, Method};

use crate::keepalive::registry::Keepalive;

/// Boxed future used by type-erased handlers.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Per-request context passed to handlers.
#[derive(Clone)]
pub struct RequestContext {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    pub remote_addr: Option<SocketAddr>,
    /// Keepalive registry, for resolving and calling peer services.
    pub keepalive: Arc<Keepalive>,
}

impl RequestContext {
    /// First value of a query parameter, if present.
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// A header value decoded as UTF-8, if present.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}
