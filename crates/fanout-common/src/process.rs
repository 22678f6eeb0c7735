//! OS process inspection and signalling.

use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, Signal, System};

fn inspect(pid: u32) -> (System, Pid) {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    (system, pid)
}

/// PID of the calling process.
#[must_use]
pub fn current_pid() -> u32 {
    std::process::id()
}

/// Returns `true` if `pid` names a running process. Zombies count as dead.
#[must_use]
pub fn is_alive(pid: u32) -> bool {
    let (system, pid) = inspect(pid);
    system
        .process(pid)
        .is_some_and(|p| p.status() != ProcessStatus::Zombie)
}

/// Executable name of `pid`, if it is running.
#[must_use]
pub fn process_name(pid: u32) -> Option<String> {
    let (system, pid) = inspect(pid);
    system
        .process(pid)
        .map(|p| p.name().to_string_lossy().into_owned())
}

/// Ask `pid` to terminate gracefully (SIGTERM). Returns whether the signal was sent.
#[must_use]
pub fn terminate(pid: u32) -> bool {
    let (system, pid) = inspect(pid);
    system
        .process(pid)
        .and_then(|p| p.kill_with(Signal::Term))
        .unwrap_or(false)
}

/// Kill `pid` outright (SIGKILL). Returns whether the signal was sent.
#[must_use]
pub fn kill(pid: u32) -> bool {
    let (system, pid) = inspect(pid);
    system.process(pid).is_some_and(sysinfo::Process::kill)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Above the largest pid_max Linux allows.
    const NEVER_A_PID: u32 = 4_194_305;

    #[test]
    fn current_process_is_alive() {
        assert!(is_alive(current_pid()));
        assert!(process_name(current_pid()).is_some());
    }

    #[test]
    fn impossible_pid_is_dead() {
        assert!(!is_alive(NEVER_A_PID));
        assert!(process_name(NEVER_A_PID).is_none());
        assert!(!terminate(NEVER_A_PID));
        assert!(!kill(NEVER_A_PID));
    }

    #[cfg(unix)]
    #[test]
    fn reaped_child_is_dead() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert!(!is_alive(pid));
    }

    #[cfg(unix)]
    #[test]
    fn terminate_stops_a_child() {
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();
        assert!(is_alive(pid));
        assert!(terminate(pid));
        let status = child.wait().unwrap();
        assert!(!status.success());
    }
}
