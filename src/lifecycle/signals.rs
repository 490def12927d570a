//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGHUP, SIGINT, SIGTERM, SIGQUIT, SIGUSR1)
//! - Translate termination signals into the shutdown broadcast
//! - Dispatch SIGUSR1 to the user reload callback
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Reload never interrupts serving; dispatch and keepalive state stay

use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};

use crate::lifecycle::shutdown::Shutdown;

/// User reload callback, run on SIGUSR1.
pub type ReloadFn = Arc<dyn Fn() + Send + Sync>;

/// Observe process signals until a termination signal arrives.
pub async fn watch(shutdown: Shutdown, reload: Option<ReloadFn>) {
    let mut hangup = signal(SignalKind::hangup()).expect("install SIGHUP handler");
    let mut interrupt = signal(SignalKind::interrupt()).expect("install SIGINT handler");
    let mut terminate = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    let mut quit = signal(SignalKind::quit()).expect("install SIGQUIT handler");
    let mut user1 = signal(SignalKind::user_defined1()).expect("install SIGUSR1 handler");

    loop {
        let name = tokio::select! {
            _ = hangup.recv() => "SIGHUP",
            _ = interrupt.recv() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
            _ = quit.recv() => "SIGQUIT",
            _ = user1.recv() => {
                tracing::info!("received SIGUSR1, dispatching reload");
                if let Some(reload) = &reload {
                    reload();
                }
                continue;
            }
        };
        tracing::info!(signal = %name, "received exit signal, shutting down");
        shutdown.trigger();
        return;
    }
}
