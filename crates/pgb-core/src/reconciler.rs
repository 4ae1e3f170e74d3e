//! Lifecycle reconciler
//!
//! Sequences the tunnel provisioner, the fragment store and the proxy
//! controller for connect, disconnect and shutdown. Nothing is kept between
//! calls: every operation starts from the files and the process table.
//!
//! Steps that already happened are never rolled back. A failure part-way
//! through is returned as an error naming what was left behind, and running
//! the operation again converges.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::error::ReconcileError;
use crate::fragment::FragmentStore;
use crate::process::ProcessProber;
use crate::proxy::{ProxyAction, ProxyController, ProxyStatus, ShutdownOutcome};
use crate::registry::ConnectionRegistry;
use crate::traits::{ProcessTable, ProxyLauncher, TunnelProvisioner};

/// Result of [`Reconciler::connect`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected {
        tunnel_pid: u32,
        fragment: PathBuf,
        proxy: ProxyAction,
    },
    /// The target already had a fragment; nothing was changed
    AlreadyConnected { tunnel_pid: u32 },
}

/// What happened to the proxy after a disconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyFollowUp {
    /// Other tunnels remain; the proxy was reloaded (or restarted)
    Applied(ProxyAction),
    /// No tracked tunnel remains; the proxy was stopped and fragments cleared
    Stopped {
        proxy: ShutdownOutcome,
        cleared: usize,
    },
}

/// Result of [`Reconciler::disconnect`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOutcome {
    Disconnected {
        /// Tunnel pid that was sent SIGTERM, if it was still running
        terminated: Option<u32>,
        proxy: ProxyFollowUp,
    },
    /// No fragment for the target; nothing was changed
    NotFound,
}

/// Tunnel sweep result during a full shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelSweep {
    Killed(usize),
    NothingFound,
}

/// Result of [`Reconciler::disconnect_all`]
///
/// Each step runs regardless of the others. A step that failed has `None`
/// here and its error in `failures`.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub proxy: Option<ShutdownOutcome>,
    pub tunnels: Option<TunnelSweep>,
    pub cleared: Option<usize>,
    pub failures: Vec<ReconcileError>,
}

impl ShutdownReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// One row of [`Status`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub name: String,
    pub tunnel_pid: u32,
    pub tunnel_alive: bool,
}

/// Proxy state plus every connection found in its config
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub proxy: ProxyStatus,
    pub connections: Vec<ConnectionStatus>,
}

/// Drives connect, disconnect and shutdown against the host
pub struct Reconciler {
    config: Config,
    store: FragmentStore,
    prober: ProcessProber,
    proxy: ProxyController,
    provisioner: Box<dyn TunnelProvisioner>,
}

impl Reconciler {
    pub fn new(
        config: Config,
        table: Arc<dyn ProcessTable>,
        launcher: Box<dyn ProxyLauncher>,
        provisioner: Box<dyn TunnelProvisioner>,
    ) -> Self {
        let prober = ProcessProber::from_config(table, &config);
        let store = FragmentStore::from_settings(&config.proxy);
        let proxy = ProxyController::new(config.proxy.clone(), prober.clone(), launcher);
        Self {
            config,
            store,
            prober,
            proxy,
            provisioner,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn registry(&self) -> ConnectionRegistry<'_> {
        ConnectionRegistry::new(&self.store, &self.prober)
    }

    /// Open a tunnel for `name` and route it through PgBouncer
    pub fn connect(&self, name: &str) -> Result<ConnectOutcome, ReconcileError> {
        let target = self.config.target(name)?;

        if let Some(state) = self.registry().snapshot()?.get(name) {
            tracing::info!("{} is already connected (tunnel pid {})", name, state.tunnel_pid);
            return Ok(ConnectOutcome::AlreadyConnected {
                tunnel_pid: state.tunnel_pid,
            });
        }

        let (auth_scope, target_scope) = self.config.scopes_for(target);
        tracing::info!(
            "Connecting {} via {} (auth scope {}, target scope {})",
            name,
            target.host,
            auth_scope,
            target_scope
        );
        let handle =
            self.provisioner
                .start(target, auth_scope, target_scope, &self.config.auth_method)?;

        let fragment = self
            .store
            .write(name, &handle, &target.database)
            .map_err(|source| ReconcileError::OrphanedTunnel {
                target: name.to_string(),
                pid: handle.pid,
                source,
            })?;

        let proxy = self.proxy.ensure_running()?;

        if !self.registry().is_connected(name)? {
            tracing::warn!("{} is not listed in {:?} after connect", name, self.store.conf_file());
        }

        Ok(ConnectOutcome::Connected {
            tunnel_pid: handle.pid,
            fragment,
            proxy,
        })
    }

    /// Tear down one connection
    ///
    /// The proxy is stopped once no connection with a tracked tunnel
    /// remains; otherwise it is reloaded.
    pub fn disconnect(&self, name: &str) -> Result<DisconnectOutcome, ReconcileError> {
        let registry = self.registry();
        let Some(state) = registry.snapshot()?.remove(name) else {
            tracing::info!("{} is not connected", name);
            return Ok(DisconnectOutcome::NotFound);
        };

        let terminated = if state.tunnel_alive {
            self.prober
                .terminate(state.tunnel_pid)
                .map_err(|source| ReconcileError::TerminateFailed {
                    target: name.to_string(),
                    pid: state.tunnel_pid,
                    source,
                })?;
            Some(state.tunnel_pid)
        } else {
            if state.tunnel_pid != 0 {
                tracing::info!("Tunnel pid {} for {} already gone", state.tunnel_pid, name);
            }
            None
        };

        self.store
            .remove(name)
            .map_err(|source| ReconcileError::FragmentRemoval {
                target: name.to_string(),
                source,
            })?;

        let proxy = if registry.has_tracked_tunnels()? {
            ProxyFollowUp::Applied(self.proxy.ensure_running()?)
        } else {
            tracing::info!("No tunnels left, stopping pgbouncer");
            let proxy = self.proxy.shutdown()?;
            let cleared = self.store.clear()?;
            ProxyFollowUp::Stopped { proxy, cleared }
        };

        if registry.is_connected(name)? {
            tracing::warn!("{} is still listed in {:?} after disconnect", name, self.store.conf_file());
        }

        Ok(DisconnectOutcome::Disconnected { terminated, proxy })
    }

    /// Stop the proxy, kill every tunnel on the host and clear all fragments
    pub fn disconnect_all(&self) -> ShutdownReport {
        let mut report = ShutdownReport::default();

        match self.proxy.shutdown() {
            Ok(outcome) => report.proxy = Some(outcome),
            Err(e) => report.failures.push(e.into()),
        }

        match self.provisioner.shutdown_all() {
            Ok(0) => report.tunnels = Some(TunnelSweep::NothingFound),
            Ok(n) => report.tunnels = Some(TunnelSweep::Killed(n)),
            Err(e) => report.failures.push(e.into()),
        }

        match self.store.clear() {
            Ok(n) => report.cleared = Some(n),
            Err(e) => report.failures.push(e.into()),
        }

        for failure in &report.failures {
            tracing::warn!("Shutdown step failed: {}", failure);
        }
        report
    }

    /// Proxy state and every known connection
    pub fn status(&self) -> Result<Status, ReconcileError> {
        let proxy = self.proxy.status()?;
        let connections = self
            .registry()
            .snapshot()?
            .into_iter()
            .map(|(name, state)| ConnectionStatus {
                name,
                tunnel_pid: state.tunnel_pid,
                tunnel_alive: state.tunnel_alive,
            })
            .collect();
        Ok(Status { proxy, connections })
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config.source)
            .field("store", &self.store)
            .field("proxy", &self.proxy)
            .finish()
    }
}
