//! Inbound keepalive announcements.
//!
//! Peers probing this process POST the health-check request here. The
//! receiver records the caller as reachable (or removes it on shutdown
//! notifications), keeps the reciprocal primary↔secondary maps current,
//! and answers with its readiness status.

use serde::{Deserialize, Serialize};

use crate::api::RequestContext;
use crate::bind::schema::{Bindable, FieldKind, FieldSchema, Schema};
use crate::keepalive::registry::Keepalive;

/// Wire shape of a health-check probe. Absent fields decode as empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckRequest {
    #[serde(rename = "Action")]
    pub action: String,
    /// Service the probe is checking.
    #[serde(rename = "Service")]
    pub service: String,
    /// Probe time, unix seconds.
    #[serde(rename = "CheckTime")]
    pub check_time: i64,
    /// Name of the probing service.
    #[serde(rename = "Checker")]
    pub checker: String,
    /// Address the prober used as its own for this probe.
    #[serde(rename = "CheckerAddress")]
    pub checker_address: String,
    #[serde(rename = "PrimaryAddress")]
    pub primary_address: String,
    #[serde(rename = "SecondaryAddress")]
    pub secondary_address: String,
    /// The prober is shutting down; forget its address.
    #[serde(rename = "NotifyShutdown")]
    pub notify_shutdown: bool,
}

impl Bindable for HealthCheckRequest {
    const SCHEMA: &'static Schema = &Schema::flat(&[
        FieldSchema::new("Action", FieldKind::Str),
        FieldSchema::new("Service", FieldKind::Str),
        FieldSchema::new("CheckTime", FieldKind::Int),
        FieldSchema::new("Checker", FieldKind::Str),
        FieldSchema::new("CheckerAddress", FieldKind::Str),
        FieldSchema::new("PrimaryAddress", FieldKind::Str),
        FieldSchema::new("SecondaryAddress", FieldKind::Str),
        FieldSchema::new("NotifyShutdown", FieldKind::Bool),
    ]);
}

impl HealthCheckRequest {
    pub fn log_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Wire shape of a health-check reply. Anything other than
/// `RetCode=0, HealthStatus=1` means unhealthy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckResponse {
    #[serde(rename = "RetCode")]
    pub ret_code: i32,
    #[serde(rename = "HealthStatus")]
    pub health_status: i32,
    #[serde(rename = "Message")]
    pub message: String,
}

/// Handler registered at `/ServiceHealthCheck` (URL and action).
pub async fn receive_health_check(
    ctx: RequestContext,
    request: HealthCheckRequest,
) -> (HealthCheckResponse, String) {
    let log = request.log_string();
    let response = ctx.keepalive.handle_announcement(&request);
    (response, log)
}

impl Keepalive {
    /// Apply one inbound announcement and build the reply.
    pub fn handle_announcement(&self, request: &HealthCheckRequest) -> HealthCheckResponse {
        if !request.checker.is_empty() && !request.checker_address.is_empty() {
            if !request.primary_address.is_empty()
                && !request.secondary_address.is_empty()
                && request.primary_address != request.secondary_address
            {
                self.update_pair_maps(&request.primary_address, &request.secondary_address);
            }

            self.log_checker_transition(request);

            if request.notify_shutdown {
                self.remove_receive(&request.checker, &request.checker_address);
            } else {
                self.register_receive(&request.checker, &request.checker_address);
                self.fire_first_seen(request);
            }
        }

        HealthCheckResponse {
            ret_code: 0,
            health_status: if self.is_ready() { 1 } else { 0 },
            message: "HealthCheckResponse".to_string(),
        }
    }

    /// Log when a checker flips between reaching us via primary and via
    /// secondary address.
    fn log_checker_transition(&self, request: &HealthCheckRequest) {
        let key = format!("{}_{}", request.checker, request.primary_address);
        let changed = {
            let last = self.last_checker.read().expect("checker lock");
            last.get(&key).map(String::as_str) != Some(request.checker_address.as_str())
        };
        if !changed {
            return;
        }
        if request.checker_address == request.primary_address {
            tracing::info!(
                checker = %request.checker,
                primary = %request.primary_address,
                secondary = %request.secondary_address,
                "peer using primary address now"
            );
        } else {
            tracing::info!(
                checker = %request.checker,
                primary = %request.primary_address,
                secondary = %request.secondary_address,
                "peer using secondary address now"
            );
        }
        self.last_checker
            .write()
            .expect("checker lock")
            .insert(key, request.checker_address.clone());
    }

    /// Invoke the first-seen callback at most once per service name.
    fn fire_first_seen(&self, request: &HealthCheckRequest) {
        let callback = self.first_seen.read().expect("first-seen lock").clone();
        let Some(callback) = callback else { return };
        let fresh = self
            .seen_services
            .lock()
            .expect("seen lock")
            .insert(request.checker.clone());
        if fresh {
            let checker = request.checker.clone();
            let primary = request.primary_address.clone();
            tokio::spawn(async move {
                callback(checker, primary);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::KeepaliveConfig;
    use crate::keepalive::registry::ServiceIdentity;

    fn keepalive() -> Keepalive {
        Keepalive::new(
            ServiceIdentity {
                name: "Receiver".into(),
                primary_address: "127.0.0.1:7001".into(),
                secondary_address: String::new(),
            },
            KeepaliveConfig::default(),
        )
    }

    fn announcement(checker_address: &str, notify_shutdown: bool) -> HealthCheckRequest {
        HealthCheckRequest {
            action: "ServiceHealthCheck".into(),
            service: "Receiver".into(),
            check_time: 1,
            checker: "Caller".into(),
            checker_address: checker_address.into(),
            primary_address: "10.0.0.1:80".into(),
            secondary_address: "10.0.0.2:80".into(),
            notify_shutdown,
        }
    }

    #[test]
    fn test_wire_roundtrip_identity() {
        let request = announcement("10.0.0.1:80", false);
        let encoded = serde_json::to_string(&request).unwrap();
        assert!(encoded.contains(r#""Action":"ServiceHealthCheck""#));
        assert!(encoded.contains(r#""NotifyShutdown":false"#));
        let decoded: HealthCheckRequest = serde_json::from_str(&encoded).unwrap();
        assert_eq!(serde_json::to_string(&decoded).unwrap(), encoded);
    }

    #[test]
    fn test_missing_fields_decode_as_absent() {
        let decoded: HealthCheckRequest =
            serde_json::from_str(r#"{"Action":"ServiceHealthCheck","Checker":"X"}"#).unwrap();
        assert_eq!(decoded.checker, "X");
        assert!(decoded.primary_address.is_empty());
        assert!(!decoded.notify_shutdown);
    }

    #[test]
    fn test_announcement_registers_and_pairs() {
        let ka = keepalive();
        let response = ka.handle_announcement(&announcement("10.0.0.2:80", false));
        assert_eq!(response.ret_code, 0);
        assert_eq!(response.health_status, 1);
        assert_eq!(response.message, "HealthCheckResponse");

        // CheckerAddress was the secondary; it canonicalizes to the primary.
        let receive = ka.receive.read().unwrap();
        let record = &receive["Caller"];
        assert_eq!(record.address, vec!["10.0.0.1:80"]);
        assert!(record.health_on_secondary.contains("10.0.0.1:80"));
    }

    #[test]
    fn test_shutdown_clears_receive_time() {
        let ka = keepalive();
        ka.handle_announcement(&announcement("10.0.0.1:80", false));
        ka.handle_announcement(&announcement("10.0.0.1:80", true));
        let receive = ka.receive.read().unwrap();
        assert_eq!(receive["Caller"].receive_time["10.0.0.1:80"], 0);
    }

    #[test]
    fn test_not_ready_reported() {
        let ka = keepalive();
        ka.set_service_ready(false);
        let response = ka.handle_announcement(&announcement("10.0.0.1:80", false));
        assert_eq!(response.ret_code, 0);
        assert_eq!(response.health_status, 0);
    }

    #[test]
    fn test_blank_checker_ignored() {
        let ka = keepalive();
        let mut request = announcement("10.0.0.1:80", false);
        request.checker = String::new();
        ka.handle_announcement(&request);
        assert!(ka.receive.read().unwrap().is_empty());
    }
}
