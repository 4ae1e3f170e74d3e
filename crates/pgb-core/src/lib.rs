//! pgb-core: Reconciliation core for pgboundary
//!
//! This crate keeps PgBouncer's configuration in step with the Boundary
//! tunnels that are actually running. It owns the process prober, the
//! config fragment store, the connection registry, the proxy controller
//! and the lifecycle reconciler that sequences them.

pub mod config;
pub mod error;
pub mod fragment;
pub mod pidfile;
pub mod process;
pub mod proxy;
pub mod reconciler;
pub mod registry;
pub mod traits;
pub mod types;

pub use config::{Config, Target};
pub use error::{BrokerError, ConfigError, FragmentError, ProxyError, ReconcileError};
pub use fragment::{ConnectionFragment, FragmentStore};
pub use process::{HostProcessTable, ProcessProber};
pub use proxy::{CommandLauncher, ProxyAction, ProxyController, ProxyStatus, ShutdownOutcome};
pub use reconciler::{
    ConnectOutcome, ConnectionStatus, DisconnectOutcome, ProxyFollowUp, Reconciler, ShutdownReport,
    Status, TunnelSweep,
};
pub use registry::{ConnectionRegistry, Snapshot};
pub use traits::{ProcessTable, ProxyLauncher, TunnelProvisioner};
pub use types::{ProcessKind, Signal, TunnelHandle};
