//! Connection registry
//!
//! A read-only view of which targets are connected. There is no storage of
//! its own: every call re-reads the fragment store and asks the prober
//! whether each tagged tunnel is still alive.

use std::collections::BTreeMap;

use crate::error::FragmentError;
use crate::fragment::FragmentStore;
use crate::process::ProcessProber;
use crate::types::ProcessKind;

/// State of one connected target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionState {
    /// Tunnel pid from the fragment tag, 0 if untracked
    pub tunnel_pid: u32,
    /// Whether that pid is a live tunnel process
    pub tunnel_alive: bool,
}

/// Target name to connection state
pub type Snapshot = BTreeMap<String, ConnectionState>;

/// Derives connection state from fragments and the process table
#[derive(Debug, Clone, Copy)]
pub struct ConnectionRegistry<'a> {
    store: &'a FragmentStore,
    prober: &'a ProcessProber,
}

impl<'a> ConnectionRegistry<'a> {
    pub fn new(store: &'a FragmentStore, prober: &'a ProcessProber) -> Self {
        Self { store, prober }
    }

    /// Current view of all connections
    ///
    /// Targets whose tunnel died are still listed, with `tunnel_alive`
    /// false, so the inconsistency stays visible.
    pub fn snapshot(&self) -> Result<Snapshot, FragmentError> {
        let mut snapshot = Snapshot::new();
        for fragment in self.store.list()? {
            if snapshot.contains_key(&fragment.name) {
                tracing::warn!(
                    "Duplicate fragment for {} in {:?}, ignoring",
                    fragment.name,
                    fragment.path
                );
                continue;
            }
            let tunnel_alive = self.prober.is_alive(fragment.tunnel_pid, ProcessKind::Tunnel);
            if fragment.tunnel_pid != 0 && !tunnel_alive {
                tracing::warn!(
                    "Tunnel pid {} for {} is not running",
                    fragment.tunnel_pid,
                    fragment.name
                );
            }
            snapshot.insert(
                fragment.name,
                ConnectionState {
                    tunnel_pid: fragment.tunnel_pid,
                    tunnel_alive,
                },
            );
        }
        Ok(snapshot)
    }

    /// Whether a fragment for `target` exists
    pub fn is_connected(&self, target: &str) -> Result<bool, FragmentError> {
        Ok(self.store.list()?.iter().any(|f| f.name == target))
    }

    /// Whether any connection still has a tracked tunnel
    pub fn has_tracked_tunnels(&self) -> Result<bool, FragmentError> {
        Ok(self.store.list()?.iter().any(|f| f.tunnel_pid != 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ProcessTable;
    use crate::types::{Signal, TunnelHandle};
    use std::io;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct OnlyPid(u32);

    impl ProcessTable for OnlyPid {
        fn exists(&self, pid: u32) -> bool {
            pid == self.0
        }

        fn command_line(&self, _pid: u32) -> io::Result<Vec<String>> {
            Ok(vec!["boundary".to_string(), "connect".to_string()])
        }

        fn signal(&self, _pid: u32, _signal: Signal) -> io::Result<()> {
            Ok(())
        }

        fn pids(&self) -> io::Result<Vec<u32>> {
            Ok(vec![self.0])
        }
    }

    fn handle(pid: u32) -> TunnelHandle {
        TunnelHandle {
            pid,
            host: "127.0.0.1".to_string(),
            port: 40000,
            username: "u".to_string(),
            password: "p".to_string(),
        }
    }

    #[test]
    fn test_snapshot_reports_dead_tunnels() {
        let dir = TempDir::new().unwrap();
        let conf = dir.path().join("pgbouncer.ini");
        std::fs::write(&conf, "[pgbouncer]\n").unwrap();
        let store = FragmentStore::new(&conf, dir.path().join("d"));
        let prober = ProcessProber::new(Arc::new(OnlyPid(100)), "pgbouncer", "boundary");

        store.write("alive", &handle(100), "alive").unwrap();
        store.write("dead", &handle(200), "dead").unwrap();

        let registry = ConnectionRegistry::new(&store, &prober);
        let snapshot = registry.snapshot().unwrap();

        assert_eq!(snapshot.len(), 2);
        assert_eq!(
            snapshot["alive"],
            ConnectionState {
                tunnel_pid: 100,
                tunnel_alive: true
            }
        );
        assert_eq!(
            snapshot["dead"],
            ConnectionState {
                tunnel_pid: 200,
                tunnel_alive: false
            }
        );
        assert!(registry.is_connected("dead").unwrap());
        assert!(!registry.is_connected("other").unwrap());
        assert!(registry.has_tracked_tunnels().unwrap());
    }

    #[test]
    fn test_untracked_only_has_no_tracked_tunnels() {
        let dir = TempDir::new().unwrap();
        let manual = dir.path().join("manual.ini");
        std::fs::write(&manual, "[databases]\nlocal = host=127.0.0.1\n").unwrap();
        let conf = dir.path().join("pgbouncer.ini");
        std::fs::write(&conf, format!("%include {}\n", manual.display())).unwrap();
        let store = FragmentStore::new(&conf, dir.path().join("d"));
        let prober = ProcessProber::new(Arc::new(OnlyPid(1)), "pgbouncer", "boundary");

        let registry = ConnectionRegistry::new(&store, &prober);
        assert!(registry.is_connected("local").unwrap());
        assert!(!registry.has_tracked_tunnels().unwrap());
    }
}
