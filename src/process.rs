use eyre::{Result, eyre};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

/// Send SIGTERM to a process
pub fn terminate(pid: i32) -> Result<()> {
    // pid 0 and negatives address process groups, never a single server
    if pid <= 1 {
        return Err(eyre!("Refusing to signal pid {}", pid));
    }
    log::info!("[process] terminate: pid={}", pid);
    signal::kill(Pid::from_raw(pid), Signal::SIGTERM)
        .map_err(|e| eyre!("Failed to terminate pid {}: {}", pid, e))
}
