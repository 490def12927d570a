//! Keepalive mesh subsystem.
//!
//! # Data Flow
//! ```text
//! Configured peers (registry.rs):
//!     monitor callback polled on a ticker
//!     → snapshot diff → address lists extended (union, never shrunk)
//!
//! Outbound probes (probe.rs):
//!     ticker → one probe task per address, joined per round
//!     → primary probe, secondary failover probe
//!     → health / availability-set / secondary-substitution updates
//!
//! Inbound announcements (receiver.rs):
//!     /ServiceHealthCheck endpoint
//!     → reciprocal primary↔secondary maps
//!     → receive registry (register / shutdown removal)
//!     → first-seen callback, once per service
//!
//! Resolution (resolver.rs):
//!     configured round-robin → receive-path round-robin → trace fallback
//! ```
//!
//! # Design Decisions
//! - One record per service name shared by configured and announced peers;
//!   the address list is the union
//! - Availability is index membership, not a compacted list, so rotation
//!   stays stable across health changes
//! - All registries live on an explicit Keepalive instance owned by the
//!   server; writes are confined to this subsystem

pub mod probe;
pub mod receiver;
pub mod registry;
pub mod resolver;
pub mod status_page;

pub use receiver::{HealthCheckRequest, HealthCheckResponse};
pub use registry::{Keepalive, RegistrySnapshot, ServiceIdentity};
