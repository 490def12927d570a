//! Secondary `--reload` invocation.
//!
//! A second copy of the binary started with `--reload` locates the running
//! primary by scanning the process table, delivers SIGUSR1 to it, and
//! exits. The primary's signal observer then runs the reload callback.

use std::process::Command;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

/// Deliver SIGUSR1 to the first same-named process that is not us.
///
/// Returns whether a process was signalled.
pub fn send_reload_signal() -> std::io::Result<bool> {
    let own_pid = std::process::id() as i32;
    let own_name = current_process_name();

    let output = Command::new("ps").arg("-e").output()?;
    let listing = String::from_utf8_lossy(&output.stdout);
    for line in listing.lines() {
        let Some((pid, name)) = parse_process_line(line) else {
            continue;
        };
        if pid == own_pid || name != own_name {
            continue;
        }
        tracing::info!(pid = pid, process = %name, "signalling running instance to reload");
        kill(Pid::from_raw(pid), Signal::SIGUSR1)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        return Ok(true);
    }
    Ok(false)
}

fn current_process_name() -> String {
    std::env::args()
        .next()
        .as_deref()
        .and_then(|arg0| arg0.rsplit('/').next().map(str::to_string))
        .unwrap_or_default()
}

/// Parse one `ps -e` line into `(pid, command)`.
fn parse_process_line(line: &str) -> Option<(i32, String)> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 4 {
        return None;
    }
    let pid: i32 = fields[0].parse().ok()?;
    let name = fields[fields.len() - 1]
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string();
    Some((pid, name))
}
