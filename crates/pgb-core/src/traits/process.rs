//! Process traits

use std::io;

use crate::config::ProxySettings;
use crate::error::ProxyError;
use crate::types::Signal;

/// Read and signal access to the host's process table
pub trait ProcessTable: Send + Sync {
    /// Whether a process with this pid exists (may be owned by another user)
    fn exists(&self, pid: u32) -> bool;

    /// Command line of the process, one entry per argument
    fn command_line(&self, pid: u32) -> io::Result<Vec<String>>;

    /// Deliver a signal
    ///
    /// A process that no longer exists is reported with
    /// [`io::ErrorKind::NotFound`].
    fn signal(&self, pid: u32, signal: Signal) -> io::Result<()>;

    /// All pids currently in the table
    fn pids(&self) -> io::Result<Vec<u32>>;
}

/// Starts a fresh PgBouncer instance
pub trait ProxyLauncher: Send + Sync {
    /// Launch the proxy and return once it has been started
    ///
    /// Readiness is not awaited.
    fn launch(&self, settings: &ProxySettings) -> Result<(), ProxyError>;
}
