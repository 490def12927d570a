//! Outbound health probing.
//!
//! # Responsibilities
//! - Drive one probe round per ticker period, one task per address
//! - Fail over to the peer's secondary address when the primary fails
//! - Broadcast shutdown notifications on graceful stop
//!
//! # Design Decisions
//! - Probes run on their own tasks and join per round, so a slow peer
//!   delays the round but never the server
//! - A probe succeeds only on `RetCode=0` and `HealthStatus=1`
//! - Probe failures are recorded, never raised to callers

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinSet;

use crate::keepalive::receiver::{HealthCheckRequest, HealthCheckResponse};
use crate::keepalive::registry::{now_unix, Keepalive};
use crate::util;

impl Keepalive {
    /// Periodic probe driver; exits on shutdown.
    pub(crate) async fn run_probe_loop(
        self: Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let period = Duration::from_secs(self.config.check_period_secs);
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let has_targets = !self.mesh.read().expect("mesh lock").is_empty();
                    if has_targets {
                        self.clone().probe_round(false).await;
                    }
                }
                _ = shutdown.recv() => return,
            }
        }
    }

    /// Periodic configured-peer poll driver; exits on shutdown.
    pub(crate) async fn run_monitor_loop(
        self: Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let period = Duration::from_secs(self.config.monitor_period_secs);
        let mut ticker = tokio::time::interval(period);
        // The initial snapshot was loaded at registration time.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => self.poll_config(),
                _ = shutdown.recv() => return,
            }
        }
    }

    /// Fan out one probe per configured address and join the round.
    /// With `notify_shutdown` set this is the shutdown broadcast; regular
    /// rounds stop once it ran.
    pub async fn probe_round(self: Arc<Self>, notify_shutdown: bool) {
        let _round = self.round_lock.lock().await;
        if notify_shutdown {
            self.stopping.store(true, std::sync::atomic::Ordering::SeqCst);
        } else if self.stopping.load(std::sync::atomic::Ordering::SeqCst) {
            return;
        }
        let targets: Vec<(String, String)> = {
            let mesh = self.mesh.read().expect("mesh lock");
            mesh.iter()
                .flat_map(|(name, record)| {
                    record
                        .address
                        .iter()
                        .map(|addr| (addr.clone(), name.clone()))
                })
                .collect()
        };
        let check_time = now_unix();
        let mut round = JoinSet::new();
        for (addr, service) in targets {
            let keepalive = self.clone();
            round.spawn(async move {
                keepalive
                    .probe_one(service, addr, check_time, notify_shutdown)
                    .await;
            });
        }
        while let Some(result) = round.join_next().await {
            if let Err(err) = result {
                tracing::error!(error = %err, "probe task failed");
            }
        }
    }

    /// Probe one address; on failure, try the peer's secondary.
    async fn probe_one(
        self: Arc<Self>,
        service: String,
        addr: String,
        check_time: i64,
        notify_shutdown: bool,
    ) {
        let request = HealthCheckRequest {
            action: "ServiceHealthCheck".to_string(),
            service: service.clone(),
            check_time,
            checker: self.identity.name.clone(),
            checker_address: self.identity.primary_address.clone(),
            primary_address: self.identity.primary_address.clone(),
            secondary_address: self.identity.secondary_address.clone(),
            notify_shutdown,
        };
        let healthy = self.send_probe(&addr, &request).await;
        self.update_probe_status(&service, &addr, healthy, false);
        if healthy {
            return;
        }

        let Some(secondary) = self.secondary_of(&addr) else {
            return;
        };
        let secondary_request = HealthCheckRequest {
            checker_address: self.identity.secondary_address.clone(),
            ..request
        };
        if self.send_probe(&secondary, &secondary_request).await {
            self.update_probe_status(&service, &addr, true, true);
        }
    }

    /// One HTTP probe; success means `RetCode=0` and `HealthStatus=1`.
    async fn send_probe(&self, addr: &str, request: &HealthCheckRequest) -> bool {
        let url = format!("{}/ServiceHealthCheck", util::ensure_scheme(addr));
        let timeout = Duration::from_secs(self.config.check_timeout_secs);
        let result = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(request)
            .send()
            .await;
        match result {
            Ok(response) => match response.json::<HealthCheckResponse>().await {
                Ok(reply) => reply.ret_code == 0 && reply.health_status == 1,
                Err(err) => {
                    tracing::debug!(
                        channel = "health_checker",
                        url = %url,
                        error = %err,
                        "probe reply unreadable"
                    );
                    false
                }
            },
            Err(err) => {
                tracing::debug!(
                    channel = "health_checker",
                    url = %url,
                    error = %err,
                    "probe failed"
                );
                false
            }
        }
    }

    /// Record one probe outcome against the probed primary address.
    fn update_probe_status(
        &self,
        service: &str,
        addr: &str,
        healthy: bool,
        via_secondary: bool,
    ) {
        let primary = self.canonical_primary(addr);
        let now = now_unix();
        let mut mesh = self.mesh.write().expect("mesh lock");
        let Some(record) = mesh.get_mut(service) else {
            return;
        };
        record
            .health
            .insert(primary.clone(), if healthy { 1 } else { 0 });
        record.receive_time.insert(primary.clone(), now);
        if healthy && via_secondary {
            record.health_on_secondary.insert(primary.clone());
        } else {
            record.health_on_secondary.remove(&primary);
        }
        if let Some(index) = record.address.iter().position(|a| a == &primary) {
            if healthy {
                record.available_seq.insert(index);
            } else {
                record.available_seq.remove(&index);
            }
        }
    }
}
