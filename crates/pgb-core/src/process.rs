//! Process probing
//!
//! A pid alone proves nothing: PgBouncer and Boundary exit, and the kernel
//! hands their pids to unrelated processes. Every liveness check here
//! therefore requires both that the pid exists and that its command line
//! names the expected program.

use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::traits::ProcessTable;
use crate::types::{ProcessKind, Signal};

/// [`ProcessTable`] backed by the running host (`kill(2)` and `/proc`)
#[derive(Debug, Clone, Copy, Default)]
pub struct HostProcessTable;

impl HostProcessTable {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessTable for HostProcessTable {
    #[cfg(unix)]
    fn exists(&self, pid: u32) -> bool {
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return false;
        };
        if pid <= 0 {
            return false;
        }
        // kill(pid, 0) succeeds if we may signal it; EPERM means it exists
        // but belongs to someone else.
        unsafe {
            if libc::kill(pid, 0) == 0 {
                return true;
            }
        }
        io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    #[cfg(not(unix))]
    fn exists(&self, _pid: u32) -> bool {
        false
    }

    fn command_line(&self, pid: u32) -> io::Result<Vec<String>> {
        let mut data = Vec::new();
        fs::File::open(format!("/proc/{}/cmdline", pid))?.read_to_end(&mut data)?;
        Ok(data
            .split(|b| *b == 0)
            .filter(|s| !s.is_empty())
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .collect())
    }

    #[cfg(unix)]
    fn signal(&self, pid: u32, signal: Signal) -> io::Result<()> {
        let raw_pid = libc::pid_t::try_from(pid)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        if raw_pid <= 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("refusing to signal pid {}", pid),
            ));
        }
        let signo = match signal {
            Signal::Reload => libc::SIGHUP,
            Signal::Terminate => libc::SIGTERM,
        };
        let result = unsafe { libc::kill(raw_pid, signo) };
        if result == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no process with pid {}", pid),
            ));
        }
        Err(err)
    }

    #[cfg(not(unix))]
    fn signal(&self, _pid: u32, _signal: Signal) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "signals are only supported on unix",
        ))
    }

    fn pids(&self) -> io::Result<Vec<u32>> {
        let mut pids = Vec::new();
        for entry in fs::read_dir("/proc")? {
            let entry = entry?;
            if let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) {
                pids.push(pid);
            }
        }
        Ok(pids)
    }
}

/// Liveness and identity checks for proxy and tunnel processes
#[derive(Clone)]
pub struct ProcessProber {
    table: Arc<dyn ProcessTable>,
    proxy_program: String,
    tunnel_program: String,
}

impl ProcessProber {
    /// Create a prober matching the given executable names
    pub fn new(
        table: Arc<dyn ProcessTable>,
        proxy_program: impl AsRef<str>,
        tunnel_program: impl AsRef<str>,
    ) -> Self {
        Self {
            table,
            proxy_program: program_name(proxy_program.as_ref()),
            tunnel_program: program_name(tunnel_program.as_ref()),
        }
    }

    /// Prober for the programs named in the configuration
    pub fn from_config(table: Arc<dyn ProcessTable>, config: &Config) -> Self {
        Self::new(table, &config.proxy.program, &config.broker.program)
    }

    /// Which kind of managed process `pid` is, if any
    ///
    /// Errors reading process metadata are treated as "unknown".
    pub fn identity(&self, pid: u32) -> Option<ProcessKind> {
        let argv = match self.table.command_line(pid) {
            Ok(argv) => argv,
            Err(e) => {
                tracing::debug!("Cannot read command line of pid {}: {}", pid, e);
                return None;
            }
        };
        let exe = program_name(argv.first()?);
        if exe == self.proxy_program {
            Some(ProcessKind::Proxy)
        } else if exe == self.tunnel_program {
            Some(ProcessKind::Tunnel)
        } else {
            None
        }
    }

    /// Whether `pid` exists and is a process of the expected kind
    pub fn is_alive(&self, pid: u32, kind: ProcessKind) -> bool {
        if pid == 0 || !self.table.exists(pid) {
            return false;
        }
        let alive = self.identity(pid) == Some(kind);
        if alive {
            tracing::debug!("Found {} process: {}", kind, pid);
        } else {
            tracing::debug!("Pid {} exists but is not {}", pid, kind);
        }
        alive
    }

    /// Every live process of `kind` on the host, excluding this process
    pub fn scan(&self, kind: ProcessKind) -> io::Result<Vec<u32>> {
        let own = std::process::id();
        let mut pids: Vec<u32> = self
            .table
            .pids()?
            .into_iter()
            .filter(|pid| *pid != own && self.is_alive(*pid, kind))
            .collect();
        pids.sort_unstable();
        Ok(pids)
    }

    /// Send a signal to `pid`
    pub fn signal(&self, pid: u32, signal: Signal) -> io::Result<()> {
        tracing::info!("Sending {} to pid {}", signal, pid);
        self.table.signal(pid, signal)
    }

    /// Terminate `pid`, treating an already-exited process as success
    pub fn terminate(&self, pid: u32) -> io::Result<()> {
        match self.signal(pid, Signal::Terminate) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("Pid {} already gone", pid);
                Ok(())
            }
            other => other,
        }
    }
}

impl std::fmt::Debug for ProcessProber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessProber")
            .field("proxy_program", &self.proxy_program)
            .field("tunnel_program", &self.tunnel_program)
            .finish()
    }
}

/// Executable name without its directory
fn program_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct StaticTable {
        procs: Mutex<HashMap<u32, Vec<String>>>,
        unreadable: Vec<u32>,
    }

    impl StaticTable {
        fn with(procs: &[(u32, &str)]) -> Self {
            let map = procs
                .iter()
                .map(|(pid, cmd)| (*pid, cmd.split_whitespace().map(String::from).collect()))
                .collect();
            Self {
                procs: Mutex::new(map),
                unreadable: Vec::new(),
            }
        }
    }

    impl ProcessTable for StaticTable {
        fn exists(&self, pid: u32) -> bool {
            self.procs.lock().unwrap().contains_key(&pid)
        }

        fn command_line(&self, pid: u32) -> io::Result<Vec<String>> {
            if self.unreadable.contains(&pid) {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
            }
            self.procs
                .lock()
                .unwrap()
                .get(&pid)
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "gone"))
        }

        fn signal(&self, pid: u32, _signal: Signal) -> io::Result<()> {
            match self.procs.lock().unwrap().remove(&pid) {
                Some(_) => Ok(()),
                None => Err(io::Error::new(io::ErrorKind::NotFound, "gone")),
            }
        }

        fn pids(&self) -> io::Result<Vec<u32>> {
            Ok(self.procs.lock().unwrap().keys().copied().collect())
        }
    }

    fn prober(table: StaticTable) -> ProcessProber {
        ProcessProber::new(Arc::new(table), "pgbouncer", "boundary")
    }

    #[test]
    fn test_identity_by_executable_name() {
        let p = prober(StaticTable::with(&[
            (10, "/usr/sbin/pgbouncer --daemon pgbouncer.ini"),
            (20, "boundary connect -target-name app1"),
            (30, "bash"),
        ]));
        assert_eq!(p.identity(10), Some(ProcessKind::Proxy));
        assert_eq!(p.identity(20), Some(ProcessKind::Tunnel));
        assert_eq!(p.identity(30), None);
        assert_eq!(p.identity(40), None);
    }

    #[test]
    fn test_recycled_pid_is_not_alive() {
        let p = prober(StaticTable::with(&[(10, "postgres")]));
        assert!(!p.is_alive(10, ProcessKind::Proxy));
    }

    #[test]
    fn test_wrong_kind_is_not_alive() {
        let p = prober(StaticTable::with(&[(10, "pgbouncer")]));
        assert!(p.is_alive(10, ProcessKind::Proxy));
        assert!(!p.is_alive(10, ProcessKind::Tunnel));
    }

    #[test]
    fn test_pid_zero_never_alive() {
        let p = prober(StaticTable::with(&[(0, "pgbouncer")]));
        assert!(!p.is_alive(0, ProcessKind::Proxy));
    }

    #[test]
    fn test_unreadable_metadata_degrades_to_not_alive() {
        let mut table = StaticTable::with(&[(10, "pgbouncer")]);
        table.unreadable.push(10);
        let p = prober(table);
        assert!(!p.is_alive(10, ProcessKind::Proxy));
    }

    #[test]
    fn test_program_path_in_config_matches_basename() {
        let p = ProcessProber::new(
            Arc::new(StaticTable::with(&[(10, "pgbouncer")])),
            "/opt/pgbouncer/bin/pgbouncer",
            "boundary",
        );
        assert!(p.is_alive(10, ProcessKind::Proxy));
    }

    #[test]
    fn test_scan_finds_only_matching_kind() {
        let p = prober(StaticTable::with(&[
            (10, "pgbouncer"),
            (21, "boundary connect"),
            (22, "boundary connect"),
            (30, "vim"),
        ]));
        assert_eq!(p.scan(ProcessKind::Tunnel).unwrap(), vec![21, 22]);
        assert_eq!(p.scan(ProcessKind::Proxy).unwrap(), vec![10]);
    }

    #[test]
    fn test_terminate_tolerates_missing_process() {
        let p = prober(StaticTable::default());
        p.terminate(99).unwrap();
        assert_eq!(
            p.signal(99, Signal::Reload).unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_host_table_sees_current_process() {
        let table = HostProcessTable::new();
        let pid = std::process::id();
        assert!(table.exists(pid));
        assert!(!table.command_line(pid).unwrap().is_empty());
        assert!(table.pids().unwrap().contains(&pid));
    }

    #[cfg(unix)]
    #[test]
    fn test_host_table_invalid_pid_not_alive() {
        assert!(!HostProcessTable::new().exists(999_999_999));
    }
}
