use std::collections::BTreeSet;

/// Read-and-kill view of the OS process and socket tables.
///
/// Every method is best-effort: query failures read as "not alive" or "no
/// listeners", and kill failures are dropped.
pub trait ProcessProbe: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;

    fn listening_pids(&self, port: u16) -> BTreeSet<u32>;

    /// Hard-kill `pid` and every descendant. No grace period.
    fn kill_tree(&self, pid: u32);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

impl ProcessProbe for SystemProbe {
    fn is_alive(&self, pid: u32) -> bool {
        if pid == 0 {
            return false;
        }
        sys::is_alive(pid)
    }

    fn listening_pids(&self, port: u16) -> BTreeSet<u32> {
        let pids = match listeners::get_all() {
            Ok(all) => all
                .into_iter()
                .filter(|listener| listener.socket.port() == port)
                .map(|listener| listener.process.pid)
                .filter(|&pid| pid != 0)
                .collect(),
            Err(e) => {
                tracing::debug!(port, error = %e, "listener query failed");
                BTreeSet::new()
            }
        };
        tracing::debug!(port, ?pids, "port listeners");
        pids
    }

    fn kill_tree(&self, pid: u32) {
        if pid == 0 || pid == std::process::id() {
            return;
        }
        tracing::info!(pid, "killing process tree");
        sys::kill_tree(pid);
    }
}

#[cfg(target_os = "linux")]
fn signal_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    let rc = unsafe { libc::kill(raw, 0) };
    if rc == 0 {
        return true;
    }
    // EPERM: exists but owned by someone else.
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(unix)]
fn sigkill(pid: u32) {
    if let Ok(raw) = i32::try_from(pid) {
        unsafe {
            libc::kill(raw, libc::SIGKILL);
        }
    }
}

/// SIGKILL the whole group when `pid` leads one (spawned children do, via setsid).
#[cfg(unix)]
fn sigkill_group_if_leader(pid: u32) {
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    let pgid = unsafe { libc::getpgid(raw) };
    if pgid == raw {
        unsafe {
            libc::kill(-pgid, libc::SIGKILL);
        }
    }
}

#[cfg(target_os = "linux")]
mod sys {
    use std::{fs, path::Path};

    use crate::proc_table;

    pub(super) fn is_alive(pid: u32) -> bool {
        if !super::signal_alive(pid) {
            return false;
        }
        // A zombie still answers kill(0) until it is reaped.
        match fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => !matches!(proc_table::stat_state_and_ppid(&stat), Some(('Z' | 'X', _))),
            Err(_) => true,
        }
    }

    pub(super) fn kill_tree(pid: u32) {
        let table = process_table();
        let children = proc_table::descendants(pid, &table);
        super::sigkill_group_if_leader(pid);
        super::sigkill(pid);
        for child in children {
            super::sigkill(child);
        }
    }

    fn pids() -> Vec<u32> {
        let Ok(entries) = fs::read_dir("/proc") else {
            return Vec::new();
        };
        entries
            .flatten()
            .filter_map(|e| e.file_name().to_str()?.parse::<u32>().ok())
            .collect()
    }

    fn process_table() -> Vec<(u32, u32)> {
        pids()
            .into_iter()
            .filter_map(|pid| {
                let stat = fs::read_to_string(Path::new("/proc").join(pid.to_string()).join("stat")).ok()?;
                let (_, ppid) = proc_table::stat_state_and_ppid(&stat)?;
                Some((pid, ppid))
            })
            .collect()
    }
}

/// Snapshot of the process table, for platforms without `/proc`.
#[cfg(not(target_os = "linux"))]
fn process_system() -> sysinfo::System {
    let mut system = sysinfo::System::new();
    system.refresh_processes(sysinfo::ProcessesToUpdate::All, true);
    system
}

#[cfg(all(unix, not(target_os = "linux")))]
mod sys {
    use crate::proc_table;

    pub(super) fn is_alive(pid: u32) -> bool {
        super::process_system()
            .process(sysinfo::Pid::from_u32(pid))
            .is_some()
    }

    pub(super) fn kill_tree(pid: u32) {
        let system = super::process_system();
        let table: Vec<(u32, u32)> = system
            .processes()
            .iter()
            .filter_map(|(p, process)| Some((p.as_u32(), process.parent()?.as_u32())))
            .collect();
        let children = proc_table::descendants(pid, &table);
        super::sigkill_group_if_leader(pid);
        super::sigkill(pid);
        for child in children {
            super::sigkill(child);
        }
    }
}

#[cfg(windows)]
mod sys {
    use std::process::{Command, Stdio};

    pub(super) fn is_alive(pid: u32) -> bool {
        super::process_system()
            .process(sysinfo::Pid::from_u32(pid))
            .is_some()
    }

    // taskkill /T walks the tree itself.
    pub(super) fn kill_tree(pid: u32) {
        let _ = Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/F", "/T"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
}
