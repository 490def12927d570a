//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for a girder
//! server. All types derive Serde traits for deserialization from config
//! files and carry defaults so a minimal config is valid.

use serde::{Deserialize, Serialize};

/// Root configuration for a girder server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Service identity and listen addresses.
    pub service: ServiceConfig,

    /// Dispatch pipeline settings (CORS, JSONP, response logging).
    pub dispatch: DispatchConfig,

    /// Keepalive mesh settings.
    pub keepalive: KeepaliveConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Graceful shutdown deadline in seconds.
    pub graceful_timeout_secs: u64,
}

/// Service identity configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Name this process announces to peers.
    pub name: String,

    /// Primary listen host (e.g., "0.0.0.0").
    pub host: String,

    /// Listen port shared by both addresses.
    pub port: u16,

    /// Optional secondary listen host for dual-homed deployments.
    pub secondary_host: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            host: "0.0.0.0".to_string(),
            port: 8080,
            secondary_host: None,
        }
    }
}

/// Dispatch pipeline configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Mirror the Origin header into CORS response headers.
    pub cors_enabled: bool,

    /// Enable JSONP wrapping when the callback query parameter is present.
    pub jsonp_enabled: bool,

    /// Query parameter naming the JSONP callback.
    pub jsonp_callback_param: String,

    /// Log full response bodies instead of a truncated summary.
    pub response_show_detail: bool,

    /// Rune budget before response log lines are truncated.
    pub response_show_size: usize,

    /// URLs whose POST bodies use the lenient JSON decoder.
    pub binding_complex_urls: Vec<String>,

    /// Actions whose POST bodies use the lenient JSON decoder.
    pub binding_complex_actions: Vec<String>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            cors_enabled: true,
            jsonp_enabled: true,
            jsonp_callback_param: "callback".to_string(),
            response_show_detail: false,
            response_show_size: 512,
            binding_complex_urls: Vec::new(),
            binding_complex_actions: Vec::new(),
        }
    }
}

/// Keepalive mesh configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct KeepaliveConfig {
    /// Serve the inbound announcement endpoint and diagnostic page.
    pub receiver_enabled: bool,

    /// Outbound probe period in seconds.
    pub check_period_secs: u64,

    /// Per-probe timeout in seconds.
    pub check_timeout_secs: u64,

    /// Poll period for the configured-peer callback in seconds.
    pub monitor_period_secs: u64,

    /// Window in seconds during which an inbound announcement keeps an
    /// address eligible for receive-based selection.
    pub receiver_keep_secs: i64,

    /// Stop recording caller addresses from identification headers.
    pub disable_trace: bool,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            receiver_enabled: true,
            check_period_secs: 5,
            check_timeout_secs: 3,
            monitor_period_secs: 15,
            receiver_keep_secs: 30,
            disable_trace: false,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
