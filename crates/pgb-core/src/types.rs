//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of process pgboundary cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessKind {
    /// The PgBouncer daemon
    Proxy,
    /// A `boundary connect` tunnel
    Tunnel,
}

impl fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessKind::Proxy => write!(f, "pgbouncer"),
            ProcessKind::Tunnel => write!(f, "boundary"),
        }
    }
}

/// Signals sent to managed processes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Re-read configuration (SIGHUP)
    Reload,
    /// Graceful shutdown (SIGTERM)
    Terminate,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Reload => write!(f, "SIGHUP"),
            Signal::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// A running tunnel returned by the provisioner
///
/// Owned by the reconciler until the connection is written to a fragment;
/// afterwards the fragment's pid tag is the only record of the tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelHandle {
    /// Pid of the tunnel process
    pub pid: u32,
    /// Local address the tunnel listens on
    pub host: String,
    /// Local port the tunnel listens on
    pub port: u16,
    /// Brokered database username
    pub username: String,
    /// Brokered database password
    pub password: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_display() {
        assert_eq!(Signal::Reload.to_string(), "SIGHUP");
        assert_eq!(Signal::Terminate.to_string(), "SIGTERM");
    }

    #[test]
    fn test_process_kind_display() {
        assert_eq!(format!("{}", ProcessKind::Proxy), "pgbouncer");
        assert_eq!(format!("{}", ProcessKind::Tunnel), "boundary");
    }
}
