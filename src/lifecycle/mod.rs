//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     Load config → Validate → Register endpoints → Bind listeners
//!     → spawn monitor/probe tickers → serve
//!
//! Shutdown (shutdown.rs):
//!     Signal received → broadcast shutdown to peers → stop hooks
//!     → drain listeners within the deadline
//!
//! Signals (signals.rs):
//!     SIGHUP/SIGINT/SIGTERM/SIGQUIT → graceful shutdown
//!     SIGUSR1 → user reload callback
//!
//! Secondary invocation (reload.rs):
//!     --reload → find the running primary by process scan
//!     → deliver SIGUSR1 → exit
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: notify peers, run stop hooks, drain listeners
//! - Shutdown has a deadline; exceeding it is a fatal log
//! - Keepalive state survives reloads untouched

pub mod reload;
pub mod shutdown;
pub mod signals;

use std::path::PathBuf;

use clap::Parser;

/// Command-line flags shared by girder services.
#[derive(Debug, Parser)]
pub struct CliArgs {
    /// Configuration file path.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Signal the running instance to reload, then exit.
    #[arg(long)]
    pub reload: bool,
}
