//! PgBouncer control
//!
//! PgBouncer's PID file is the only record of a running instance. It is
//! re-read and identity-checked on every call: a missing file, a garbled
//! file, or a pid that now belongs to some other program all mean the
//! proxy is absent.

use std::io;
use std::process::{Command, Stdio};

use crate::config::ProxySettings;
use crate::error::ProxyError;
use crate::pidfile::read_pid_file;
use crate::process::ProcessProber;
use crate::traits::ProxyLauncher;
use crate::types::{ProcessKind, Signal};

/// Attempts at reading a stable pid while PgBouncer is restarting
const PID_READ_ATTEMPTS: usize = 3;

/// What `ensure_running` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyAction {
    /// A fresh instance was launched
    Started,
    /// The running instance was told to re-read its config
    Reloaded { pid: u32 },
}

/// What `shutdown` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// The running instance was sent SIGTERM
    Stopped { pid: u32 },
    /// No verified instance was running
    NotRunning,
}

/// Proxy run state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyStatus {
    pub running: bool,
    pub pid: Option<u32>,
}

/// Launches `pgbouncer --daemon <conffile>` from the workdir
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandLauncher;

impl ProxyLauncher for CommandLauncher {
    fn launch(&self, settings: &ProxySettings) -> Result<(), ProxyError> {
        tracing::info!(
            "Starting {} with {:?} in {:?}",
            settings.program,
            settings.conf_file,
            settings.workdir
        );
        let output = Command::new(&settings.program)
            .arg("--daemon")
            .arg(&settings.conf_file)
            .current_dir(&settings.workdir)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| ProxyError::Launch {
                program: settings.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ProxyError::LaunchFailed {
                program: settings.program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Starts, reloads and stops PgBouncer
pub struct ProxyController {
    settings: ProxySettings,
    prober: ProcessProber,
    launcher: Box<dyn ProxyLauncher>,
}

impl ProxyController {
    pub fn new(
        settings: ProxySettings,
        prober: ProcessProber,
        launcher: Box<dyn ProxyLauncher>,
    ) -> Self {
        Self {
            settings,
            prober,
            launcher,
        }
    }

    /// Reload the running proxy, or start one if none is running
    pub fn ensure_running(&self) -> Result<ProxyAction, ProxyError> {
        let Some(pid) = self.verified_pid()? else {
            return self.start();
        };

        match self.prober.signal(pid, Signal::Reload) {
            Ok(()) => Ok(ProxyAction::Reloaded { pid }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!("pgbouncer pid {} exited before reload", pid);
                self.start()
            }
            Err(source) => Err(ProxyError::Signal {
                pid,
                signal: Signal::Reload,
                source,
            }),
        }
    }

    /// Gracefully stop the running proxy
    pub fn shutdown(&self) -> Result<ShutdownOutcome, ProxyError> {
        let Some(pid) = self.verified_pid()? else {
            tracing::info!("pgbouncer is not running");
            return Ok(ShutdownOutcome::NotRunning);
        };

        match self.prober.signal(pid, Signal::Terminate) {
            Ok(()) => Ok(ShutdownOutcome::Stopped { pid }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(ShutdownOutcome::NotRunning),
            Err(source) => Err(ProxyError::Signal {
                pid,
                signal: Signal::Terminate,
                source,
            }),
        }
    }

    /// Whether a verified proxy is running, and its pid
    pub fn status(&self) -> Result<ProxyStatus, ProxyError> {
        let pid = self.verified_pid()?;
        Ok(ProxyStatus {
            running: pid.is_some(),
            pid,
        })
    }

    fn start(&self) -> Result<ProxyAction, ProxyError> {
        self.launcher.launch(&self.settings)?;
        Ok(ProxyAction::Started)
    }

    /// Pid of a live, identity-checked proxy
    ///
    /// The PID file is read again after the check and must still name the
    /// same pid; a file rewritten in between is read afresh.
    fn verified_pid(&self) -> Result<Option<u32>, ProxyError> {
        for _ in 0..PID_READ_ATTEMPTS {
            let Some(pid) = self.read_pid()? else {
                return Ok(None);
            };
            if !self.prober.is_alive(pid, ProcessKind::Proxy) {
                tracing::debug!(
                    "Stale PID file {:?}: pid {} is not pgbouncer",
                    self.settings.pid_file,
                    pid
                );
                return Ok(None);
            }
            if self.read_pid()? == Some(pid) {
                return Ok(Some(pid));
            }
            tracing::debug!("PID file {:?} changed while probing", self.settings.pid_file);
        }
        Ok(None)
    }

    fn read_pid(&self) -> Result<Option<u32>, ProxyError> {
        match read_pid_file(&self.settings.pid_file) {
            Ok(pid) => Ok(pid),
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                tracing::warn!("Ignoring malformed PID file {:?}: {}", self.settings.pid_file, e);
                Ok(None)
            }
            Err(source) => Err(ProxyError::PidFile {
                path: self.settings.pid_file.clone(),
                source,
            }),
        }
    }
}

impl std::fmt::Debug for ProxyController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyController")
            .field("settings", &self.settings)
            .field("prober", &self.prober)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ProcessTable;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    #[derive(Default)]
    struct Table {
        procs: Mutex<HashMap<u32, String>>,
        signals: Mutex<Vec<(u32, Signal)>>,
    }

    impl ProcessTable for Table {
        fn exists(&self, pid: u32) -> bool {
            self.procs.lock().unwrap().contains_key(&pid)
        }

        fn command_line(&self, pid: u32) -> io::Result<Vec<String>> {
            self.procs
                .lock()
                .unwrap()
                .get(&pid)
                .map(|exe| vec![exe.clone()])
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "gone"))
        }

        fn signal(&self, pid: u32, signal: Signal) -> io::Result<()> {
            self.signals.lock().unwrap().push((pid, signal));
            if !self.exists(pid) {
                return Err(io::Error::new(io::ErrorKind::NotFound, "gone"));
            }
            if signal == Signal::Terminate {
                self.procs.lock().unwrap().remove(&pid);
            }
            Ok(())
        }

        fn pids(&self) -> io::Result<Vec<u32>> {
            Ok(self.procs.lock().unwrap().keys().copied().collect())
        }
    }

    struct Launcher {
        table: Arc<Table>,
        launches: Arc<Mutex<usize>>,
    }

    impl ProxyLauncher for Launcher {
        fn launch(&self, settings: &ProxySettings) -> Result<(), ProxyError> {
            *self.launches.lock().unwrap() += 1;
            self.table
                .procs
                .lock()
                .unwrap()
                .insert(500, "pgbouncer".to_string());
            std::fs::write(&settings.pid_file, "500\n").unwrap();
            Ok(())
        }
    }

    fn settings(dir: &Path) -> ProxySettings {
        ProxySettings {
            workdir: dir.to_path_buf(),
            conf_file: dir.join("pgbouncer.ini"),
            pid_file: dir.join("pgbouncer.pid"),
            auth_file: None,
            program: "pgbouncer".to_string(),
            fragment_dir: dir.join("pgboundary.d"),
        }
    }

    fn controller(dir: &TempDir, table: Arc<Table>) -> (ProxyController, Arc<Mutex<usize>>) {
        let launches = Arc::new(Mutex::new(0));
        let prober = ProcessProber::new(table.clone(), "pgbouncer", "boundary");
        let launcher = Launcher {
            table,
            launches: launches.clone(),
        };
        (
            ProxyController::new(settings(dir.path()), prober, Box::new(launcher)),
            launches,
        )
    }

    #[test]
    fn test_starts_when_no_pid_file() {
        let dir = TempDir::new().unwrap();
        let table = Arc::new(Table::default());
        let (proxy, launches) = controller(&dir, table);

        assert_eq!(proxy.status().unwrap(), ProxyStatus { running: false, pid: None });
        assert_eq!(proxy.ensure_running().unwrap(), ProxyAction::Started);
        assert_eq!(*launches.lock().unwrap(), 1);
        assert_eq!(proxy.status().unwrap(), ProxyStatus { running: true, pid: Some(500) });
    }

    #[test]
    fn test_reloads_running_proxy() {
        let dir = TempDir::new().unwrap();
        let table = Arc::new(Table::default());
        table.procs.lock().unwrap().insert(42, "pgbouncer".to_string());
        std::fs::write(dir.path().join("pgbouncer.pid"), "42\n").unwrap();
        let (proxy, launches) = controller(&dir, table.clone());

        assert_eq!(proxy.ensure_running().unwrap(), ProxyAction::Reloaded { pid: 42 });
        assert_eq!(*launches.lock().unwrap(), 0);
        assert_eq!(*table.signals.lock().unwrap(), vec![(42, Signal::Reload)]);
    }

    #[test]
    fn test_stale_pid_file_starts_fresh() {
        let dir = TempDir::new().unwrap();
        let table = Arc::new(Table::default());
        table.procs.lock().unwrap().insert(42, "postgres".to_string());
        std::fs::write(dir.path().join("pgbouncer.pid"), "42\n").unwrap();
        let (proxy, launches) = controller(&dir, table.clone());

        assert_eq!(proxy.ensure_running().unwrap(), ProxyAction::Started);
        assert_eq!(*launches.lock().unwrap(), 1);
        assert!(table.signals.lock().unwrap().is_empty());
    }

    #[test]
    fn test_garbled_pid_file_is_absent() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("pgbouncer.pid"), "garbage").unwrap();
        let (proxy, _) = controller(&dir, Arc::new(Table::default()));

        assert!(!proxy.status().unwrap().running);
        assert_eq!(proxy.shutdown().unwrap(), ShutdownOutcome::NotRunning);
    }

    #[test]
    fn test_shutdown_distinguishes_not_running() {
        let dir = TempDir::new().unwrap();
        let table = Arc::new(Table::default());
        table.procs.lock().unwrap().insert(42, "pgbouncer".to_string());
        std::fs::write(dir.path().join("pgbouncer.pid"), "42\n").unwrap();
        let (proxy, _) = controller(&dir, table.clone());

        assert_eq!(proxy.shutdown().unwrap(), ShutdownOutcome::Stopped { pid: 42 });
        assert_eq!(proxy.shutdown().unwrap(), ShutdownOutcome::NotRunning);
        assert_eq!(*table.signals.lock().unwrap(), vec![(42, Signal::Terminate)]);
    }

    #[test]
    fn test_command_launcher_missing_binary() {
        let dir = TempDir::new().unwrap();
        let mut settings = settings(dir.path());
        settings.program = "pgboundary-test-no-such-binary".to_string();

        let err = CommandLauncher.launch(&settings).unwrap_err();
        assert!(matches!(err, ProxyError::Launch { .. }));
    }
}
