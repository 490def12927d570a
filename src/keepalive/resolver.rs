//! Peer address selection.
//!
//! # Algorithm
//! Rotate through the configured addresses starting at the record's rotor,
//! returning the first index in the availability set; fall back to the
//! first address when nothing is known healthy. Primaries marked healthy
//! only via their secondary are substituted. When a service has no
//! configured addresses, the same rotation runs over fresh inbound
//! announcements, and finally the trace map is consulted.
//!
//! # Design Decisions
//! - Selection and rotor advance are serialized by the record lock, so
//!   call counts among healthy addresses differ by at most one
//! - The rotor is advanced modulo the address count and stays in range
//!   across availability changes

use crate::keepalive::registry::{now_unix, Keepalive, ServiceHealth};
use crate::util;

impl Keepalive {
    /// Select the next usable address for a service.
    ///
    /// Returns the address (scheme attached) and whether it is the peer's
    /// primary.
    pub fn resolve(&self, service: &str) -> Option<(String, bool)> {
        let mut is_primary = true;

        let mut chosen = {
            let mut mesh = self.mesh.write().expect("mesh lock");
            mesh.get_mut(service)
                .and_then(|record| self.pick_configured(record, &mut is_primary))
        };

        if chosen.is_none() {
            chosen = {
                let mut receive = self.receive.write().expect("receive lock");
                receive
                    .get_mut(service)
                    .and_then(|record| self.pick_received(record, &mut is_primary))
            };
        }

        if chosen.is_none() {
            chosen = self.trace_address(service);
        }

        chosen.map(|addr| (util::ensure_scheme(&addr), is_primary))
    }

    fn pick_configured(
        &self,
        record: &mut ServiceHealth,
        is_primary: &mut bool,
    ) -> Option<String> {
        if record.address.is_empty() {
            return None;
        }
        let index = if record.address.len() == 1 || record.available_seq.is_empty() {
            0
        } else {
            let count = record.address.len();
            let mut index = record.next_sequence % count;
            let mut found = None;
            for _ in 0..count {
                if record.available_seq.contains(&index) {
                    found = Some(index);
                    break;
                }
                index = (index + 1) % count;
            }
            found.unwrap_or(0)
        };
        let mut addr = record.address[index].clone();
        if record.health_on_secondary.contains(&addr) {
            if let Some(secondary) = self.secondary_of(&addr) {
                addr = secondary;
                *is_primary = false;
            }
        }
        *record.call_count.entry(addr.clone()).or_insert(0) += 1;
        record.next_sequence = (index + 1) % record.address.len();
        Some(addr)
    }

    fn pick_received(&self, record: &mut ServiceHealth, is_primary: &mut bool) -> Option<String> {
        let now = now_unix();
        let mut fresh: Vec<&String> = record
            .receive_time
            .iter()
            .filter(|(_, received)| now - **received <= self.config.receiver_keep_secs)
            .map(|(addr, _)| addr)
            .collect();
        if fresh.is_empty() {
            return None;
        }
        fresh.sort_unstable();
        let index = record.next_sequence % fresh.len();
        let mut addr = fresh[index].clone();
        if record.health_on_secondary.contains(&addr) {
            if let Some(secondary) = self.secondary_of(&addr) {
                addr = secondary;
                *is_primary = false;
            }
        }
        *record.call_count.entry(addr.clone()).or_insert(0) += 1;
        record.next_sequence = index + 1;
        Some(addr)
    }
}
