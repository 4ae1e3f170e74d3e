//! Core trait definitions
//!
//! These are the seams between the reconciliation logic and the host:
//! the process table, the PgBouncer launcher and the tunnel provisioner.

mod process;
mod provisioner;

pub use process::{ProcessTable, ProxyLauncher};
pub use provisioner::TunnelProvisioner;
