//! Service-health records and registries.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use axum::http::HeaderMap;
use chrono::{Local, TimeZone, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::config::schema::KeepaliveConfig;

/// Header carrying the calling service's name.
pub const SERVICE_NAME_HEADER: &str = "Landau-Service";
/// Header carrying the calling service's address.
pub const SERVICE_ADDRESS_HEADER: &str = "Landau-Service-Addr";

/// Identity this process announces to peers.
#[derive(Debug, Clone, Default)]
pub struct ServiceIdentity {
    pub name: String,
    /// Primary `host:port` address.
    pub primary_address: String,
    /// Secondary `host:port` address, empty when single-homed.
    pub secondary_address: String,
}

/// Health and reachability state of one peer service.
#[derive(Debug, Default)]
pub(crate) struct ServiceHealth {
    /// Ordered canonical peer addresses.
    pub address: Vec<String>,
    /// Last probe result per primary address: 1 ok, 0 failed.
    pub health: HashMap<String, i32>,
    /// Primaries currently reachable only via their secondary.
    pub health_on_secondary: HashSet<String>,
    /// Monotonic usage counters.
    pub call_count: HashMap<String, u64>,
    /// Round-robin rotor, always within `[0, address.len())`.
    pub next_sequence: usize,
    /// Indices into `address` currently known healthy.
    pub available_seq: HashSet<usize>,
    /// Last inbound announcement per primary, unix seconds.
    pub receive_time: HashMap<String, i64>,
}

impl ServiceHealth {
    pub(crate) fn with_addresses(address: Vec<String>) -> Self {
        Self {
            address,
            ..Self::default()
        }
    }
}

/// Configured-peer callback: `(service → addresses, primary → secondary)`.
pub type MonitorFn =
    Arc<dyn Fn() -> (HashMap<String, Vec<String>>, HashMap<String, String>) + Send + Sync>;

/// Invoked once per service name on its first successful announcement.
pub type FirstSeenFn = Arc<dyn Fn(String, String) + Send + Sync>;

/// The keepalive registries: configured peers, inbound announcements,
/// reciprocal primary↔secondary maps and the trace fallback.
pub struct Keepalive {
    pub(crate) identity: ServiceIdentity,
    pub(crate) config: KeepaliveConfig,
    pub(crate) mesh: RwLock<HashMap<String, ServiceHealth>>,
    pub(crate) receive: RwLock<HashMap<String, ServiceHealth>>,
    primary_to_secondary: RwLock<HashMap<String, String>>,
    secondary_to_primary: RwLock<HashMap<String, String>>,
    trace: DashMap<String, String>,
    pub(crate) last_checker: RwLock<HashMap<String, String>>,
    pub(crate) seen_services: Mutex<HashSet<String>>,
    pub(crate) first_seen: RwLock<Option<FirstSeenFn>>,
    monitor: RwLock<Option<MonitorFn>>,
    last_snapshot: Mutex<Option<HashMap<String, Vec<String>>>>,
    ready: AtomicBool,
    /// Serializes probe rounds so the shutdown broadcast cannot interleave
    /// with a regular round.
    pub(crate) round_lock: tokio::sync::Mutex<()>,
    pub(crate) stopping: AtomicBool,
    pub(crate) client: reqwest::Client,
}

impl Keepalive {
    pub fn new(identity: ServiceIdentity, config: KeepaliveConfig) -> Self {
        Self {
            identity,
            config,
            mesh: RwLock::new(HashMap::new()),
            receive: RwLock::new(HashMap::new()),
            primary_to_secondary: RwLock::new(HashMap::new()),
            secondary_to_primary: RwLock::new(HashMap::new()),
            trace: DashMap::new(),
            last_checker: RwLock::new(HashMap::new()),
            seen_services: Mutex::new(HashSet::new()),
            first_seen: RwLock::new(None),
            monitor: RwLock::new(None),
            last_snapshot: Mutex::new(None),
            ready: AtomicBool::new(true),
            round_lock: tokio::sync::Mutex::new(()),
            stopping: AtomicBool::new(false),
            client: reqwest::Client::new(),
        }
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    /// Install the configured-peer callback and load the first snapshot.
    pub fn set_monitor(&self, monitor: MonitorFn) {
        *self.monitor.write().expect("monitor lock") = Some(monitor);
        self.poll_config();
    }

    /// Install the first-seen announcement callback.
    pub fn set_first_seen(&self, callback: FirstSeenFn) {
        *self.first_seen.write().expect("first-seen lock") = Some(callback);
    }

    /// Gate the health status the inbound receiver reports.
    pub fn set_service_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    /// Poll the configured-peer callback: refresh the reciprocal maps and
    /// extend the mesh when the snapshot changed.
    pub(crate) fn poll_config(&self) {
        let monitor = self.monitor.read().expect("monitor lock").clone();
        let Some(monitor) = monitor else { return };
        let (services, secondary) = monitor();

        {
            let mut p2s = self.primary_to_secondary.write().expect("pair lock");
            let mut s2p = self.secondary_to_primary.write().expect("pair lock");
            *p2s = secondary.clone();
            *s2p = secondary.iter().map(|(p, s)| (s.clone(), p.clone())).collect();
        }

        let mut last = self.last_snapshot.lock().expect("snapshot lock");
        if config_changed(last.as_ref(), &services) {
            self.extend_mesh(&services);
            *last = Some(services);
        }
    }

    /// Union-extend service records; address lists never shrink.
    fn extend_mesh(&self, services: &HashMap<String, Vec<String>>) {
        let mut mesh = self.mesh.write().expect("mesh lock");
        for (name, addresses) in services {
            match mesh.get_mut(name) {
                Some(record) => {
                    for addr in addresses {
                        if !record.address.iter().any(|a| a == addr) {
                            record.address.push(addr.clone());
                        }
                    }
                }
                None => {
                    mesh.insert(
                        name.clone(),
                        ServiceHealth::with_addresses(addresses.clone()),
                    );
                }
            }
        }
    }

    /// Record the reciprocal pair, raw and with the http scheme attached.
    pub(crate) fn update_pair_maps(&self, primary: &str, secondary: &str) {
        let mut p2s = self.primary_to_secondary.write().expect("pair lock");
        let mut s2p = self.secondary_to_primary.write().expect("pair lock");
        p2s.insert(primary.to_string(), secondary.to_string());
        s2p.insert(secondary.to_string(), primary.to_string());
        let http_primary = format!("http://{}", primary);
        let http_secondary = format!("http://{}", secondary);
        p2s.insert(http_primary.clone(), http_secondary.clone());
        s2p.insert(http_secondary, http_primary);
    }

    /// Map an address to its primary when it is a known secondary.
    pub(crate) fn canonical_primary(&self, addr: &str) -> String {
        self.secondary_to_primary
            .read()
            .expect("pair lock")
            .get(addr)
            .cloned()
            .unwrap_or_else(|| addr.to_string())
    }

    /// Secondary address of a primary, if one is known.
    pub(crate) fn secondary_of(&self, primary: &str) -> Option<String> {
        self.primary_to_secondary
            .read()
            .expect("pair lock")
            .get(primary)
            .cloned()
    }

    /// Record an inbound announcement.
    pub(crate) fn register_receive(&self, service: &str, addr: &str) {
        let now = now_unix();
        let primary = self.canonical_primary(addr);
        let via_secondary = primary != addr;
        let mut receive = self.receive.write().expect("receive lock");
        let record = receive
            .entry(service.to_string())
            .or_insert_with(|| ServiceHealth::with_addresses(vec![primary.clone()]));
        record.receive_time.insert(primary.clone(), now);
        if via_secondary {
            record.health_on_secondary.insert(primary.clone());
        } else {
            record.health_on_secondary.remove(&primary);
        }
        if !record.address.iter().any(|a| a == &primary) {
            record.address.push(primary);
        }
    }

    /// Drop an announced address after a shutdown notification.
    pub(crate) fn remove_receive(&self, service: &str, addr: &str) {
        let primary = self.canonical_primary(addr);
        let mut receive = self.receive.write().expect("receive lock");
        if let Some(record) = receive.get_mut(service) {
            record.receive_time.insert(primary.clone(), 0);
            if !record.address.iter().any(|a| a == &primary) {
                record.address.push(primary);
            }
        }
    }

    /// Remember the caller address pair from identification headers.
    pub(crate) fn trace_inbound(&self, headers: &HeaderMap) {
        if self.config.disable_trace {
            return;
        }
        let service = headers
            .get(SERVICE_NAME_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        let address = headers
            .get(SERVICE_ADDRESS_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !service.is_empty() && !address.is_empty() {
            self.record_trace(service, address);
        }
    }

    /// Remember a service's last known caller address.
    pub fn record_trace(&self, service: &str, address: &str) {
        self.trace.insert(service.to_string(), address.to_string());
    }

    pub(crate) fn trace_address(&self, service: &str) -> Option<String> {
        self.trace.get(service).map(|entry| entry.value().clone())
    }

    /// Serializable view of all registries, for the diagnostic page and
    /// tests. Sorted by `(service name asc, address count asc)`.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let mut configured = {
            let mesh = self.mesh.read().expect("mesh lock");
            mesh.iter()
                .map(|(name, record)| self.service_snapshot(name, record))
                .collect::<Vec<_>>()
        };
        let mut announced = {
            let receive = self.receive.read().expect("receive lock");
            receive
                .iter()
                .map(|(name, record)| self.service_snapshot(name, record))
                .collect::<Vec<_>>()
        };
        let mut traced: Vec<TraceSnapshot> = self
            .trace
            .iter()
            .map(|entry| TraceSnapshot {
                service_name: entry.key().clone(),
                address: entry.value().clone(),
            })
            .collect();
        let order = |a: &ServiceSnapshot, b: &ServiceSnapshot| {
            (a.service_name.as_str(), a.addresses.len())
                .cmp(&(b.service_name.as_str(), b.addresses.len()))
        };
        configured.sort_by(order);
        announced.sort_by(order);
        traced.sort_by(|a, b| a.service_name.cmp(&b.service_name));

        RegistrySnapshot {
            query_time: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            service_name: self.identity.name.clone(),
            service_address: self.identity.primary_address.clone(),
            secondary_service_address: self.identity.secondary_address.clone(),
            check_period_secs: self.config.check_period_secs,
            check_timeout_secs: self.config.check_timeout_secs,
            receiver_keep_secs: self.config.receiver_keep_secs,
            configured,
            announced,
            traced,
        }
    }

    fn service_snapshot(&self, name: &str, record: &ServiceHealth) -> ServiceSnapshot {
        let addresses = record
            .address
            .iter()
            .map(|addr| AddressSnapshot {
                address: addr.clone(),
                secondary: self.secondary_of(addr),
                health: record.health.get(addr).copied().unwrap_or(0),
                on_secondary: record.health_on_secondary.contains(addr),
                call_count: record.call_count.get(addr).copied().unwrap_or(0),
                receive_time: format_receive_time(
                    record.receive_time.get(addr).copied().unwrap_or(0),
                ),
            })
            .collect();
        ServiceSnapshot {
            service_name: name.to_string(),
            addresses,
        }
    }
}

/// True when the configured snapshot differs from the previous one.
fn config_changed(
    last: Option<&HashMap<String, Vec<String>>>,
    next: &HashMap<String, Vec<String>>,
) -> bool {
    let Some(last) = last else { return true };
    if last.len() != next.len() {
        return true;
    }
    for (name, addresses) in last {
        let Some(next_addresses) = next.get(name) else {
            return true;
        };
        if sorted_joined(addresses) != sorted_joined(next_addresses) {
            return true;
        }
    }
    false
}

fn sorted_joined(addresses: &[String]) -> String {
    let mut sorted: Vec<&str> = addresses.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.join(",")
}

pub(crate) fn now_unix() -> i64 {
    Utc::now().timestamp()
}

fn format_receive_time(unix: i64) -> String {
    if unix == 0 {
        return String::new();
    }
    match Local.timestamp_opt(unix, 0) {
        chrono::LocalResult::Single(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
        _ => String::new(),
    }
}

/// Registry state as served by the diagnostic page.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrySnapshot {
    pub query_time: String,
    pub service_name: String,
    pub service_address: String,
    pub secondary_service_address: String,
    pub check_period_secs: u64,
    pub check_timeout_secs: u64,
    pub receiver_keep_secs: i64,
    pub configured: Vec<ServiceSnapshot>,
    pub announced: Vec<ServiceSnapshot>,
    pub traced: Vec<TraceSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceSnapshot {
    pub service_name: String,
    pub addresses: Vec<AddressSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddressSnapshot {
    pub address: String,
    pub secondary: Option<String>,
    pub health: i32,
    pub on_secondary: bool,
    pub call_count: u64,
    pub receive_time: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceSnapshot {
    pub service_name: String,
    pub address: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keepalive() -> Keepalive {
        Keepalive::new(
            ServiceIdentity {
                name: "HostAgent".into(),
                primary_address: "127.0.0.1:7001".into(),
                secondary_address: String::new(),
            },
            KeepaliveConfig::default(),
        )
    }

    fn services(entries: &[(&str, &[&str])]) -> HashMap<String, Vec<String>> {
        entries
            .iter()
            .map(|(name, addrs)| {
                (
                    name.to_string(),
                    addrs.iter().map(|a| a.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_config_diff_detection() {
        let first = services(&[("S", &["a", "b"])]);
        assert!(config_changed(None, &first));
        // Same content, different order: no change.
        let reordered = services(&[("S", &["b", "a"])]);
        assert!(!config_changed(Some(&first), &reordered));
        let grown = services(&[("S", &["a", "b", "c"])]);
        assert!(config_changed(Some(&first), &grown));
        let renamed = services(&[("T", &["a", "b"])]);
        assert!(config_changed(Some(&first), &renamed));
    }

    #[test]
    fn test_mesh_union_extension() {
        let ka = keepalive();
        ka.extend_mesh(&services(&[("S", &["a", "b"])]));
        ka.extend_mesh(&services(&[("S", &["b", "c"])]));
        let mesh = ka.mesh.read().unwrap();
        assert_eq!(mesh["S"].address, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_pair_maps_with_http_variants() {
        let ka = keepalive();
        ka.update_pair_maps("1.1.1.1:80", "2.2.2.2:80");
        assert_eq!(ka.canonical_primary("2.2.2.2:80"), "1.1.1.1:80");
        assert_eq!(
            ka.canonical_primary("http://2.2.2.2:80"),
            "http://1.1.1.1:80"
        );
        assert_eq!(ka.secondary_of("1.1.1.1:80").as_deref(), Some("2.2.2.2:80"));
        // Unknown addresses map to themselves.
        assert_eq!(ka.canonical_primary("3.3.3.3:80"), "3.3.3.3:80");
    }

    #[test]
    fn test_receive_registration_canonicalizes() {
        let ka = keepalive();
        ka.update_pair_maps("1.1.1.1:80", "2.2.2.2:80");
        ka.register_receive("Peer", "2.2.2.2:80");
        {
            let receive = ka.receive.read().unwrap();
            let record = &receive["Peer"];
            assert_eq!(record.address, vec!["1.1.1.1:80"]);
            assert!(record.health_on_secondary.contains("1.1.1.1:80"));
            assert!(record.receive_time["1.1.1.1:80"] > 0);
        }
        // Announcing via the primary clears the secondary marker.
        ka.register_receive("Peer", "1.1.1.1:80");
        {
            let receive = ka.receive.read().unwrap();
            assert!(!receive["Peer"].health_on_secondary.contains("1.1.1.1:80"));
        }
        ka.remove_receive("Peer", "1.1.1.1:80");
        let receive = ka.receive.read().unwrap();
        assert_eq!(receive["Peer"].receive_time["1.1.1.1:80"], 0);
    }

    #[test]
    fn test_snapshot_sorted() {
        let ka = keepalive();
        ka.extend_mesh(&services(&[("B", &["a", "b"]), ("A", &["a"]), ("C", &["x"])]));
        let snapshot = ka.snapshot();
        let names: Vec<&str> = snapshot
            .configured
            .iter()
            .map(|s| s.service_name.as_str())
            .collect();
        assert_eq!(names, vec!["A", "B", "C"]);
    }
}
