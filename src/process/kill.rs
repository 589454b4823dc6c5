//! Best-effort signal delivery to processes and process trees.

use tracing::debug;

/// Request graceful termination of one process (SIGTERM on unix).
#[cfg(unix)]
pub fn terminate(pid: u32) {
    send(pid as i32, nix::sys::signal::Signal::SIGTERM);
}

/// Forcibly kill one process with the strongest non-ignorable signal
/// available (SIGKILL on unix).
#[cfg(unix)]
pub fn kill(pid: u32) {
    send(pid as i32, nix::sys::signal::Signal::SIGKILL);
}

#[cfg(unix)]
fn send(pid: i32, signal: nix::sys::signal::Signal) {
    use nix::sys::signal;
    use nix::unistd::Pid;

    debug!("sending {:?} to pid {}", signal, pid);
    if let Err(err) = signal::kill(Pid::from_raw(pid), signal) {
        // Typically ESRCH: the process already exited. Not an error.
        debug!("{:?} to pid {} not delivered: {}", signal, pid, err);
    }
}

/// On platforms without SIGTERM the softer terminate collapses into the
/// platform kill primitive.
#[cfg(not(unix))]
pub fn terminate(pid: u32) {
    kill(pid);
}

#[cfg(not(unix))]
pub fn kill(pid: u32) {
    use sysinfo::{Pid, ProcessesToUpdate, System};

    let target = Pid::from_u32(pid);
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
    if let Some(process) = sys.process(target) {
        debug!("killing pid {}", pid);
        process.kill();
    }
}

/// Kill every pid in the list individually, best-effort.
pub fn kill_pids(pids: &[u32]) {
    for &pid in pids {
        kill(pid);
    }
}

/// Kill a process tree rooted at `root`.
///
/// With `kill_group` on unix the root is assumed to lead its own process
/// group and the whole group is signalled in one call. Otherwise the
/// descendants are enumerated first (before the root is touched, so the
/// parent-pid walk still sees them) and killed individually, then the
/// root itself when `kill_group` is set.
pub fn kill_tree(root: u32, kill_group: bool) {
    #[cfg(unix)]
    if kill_group {
        send(-(root as i32), nix::sys::signal::Signal::SIGKILL);
        return;
    }

    let descendants = super::tree::find_descendants(root, true);
    kill_pids(&descendants);
    if kill_group {
        kill(root);
    }
}
