//! pgb-cli: Command-line interface for pgboundary
//!
//! Provides the `pgboundary` binary that connects Boundary targets,
//! shuts them down and reports what is running.

pub mod commands;
pub mod output;

use std::sync::Arc;

use pgb_boundary::BoundaryCli;
use pgb_core::{CommandLauncher, Config, HostProcessTable, ProcessProber, Reconciler};

/// Reconciler wired to the real host: `/proc`, `pgbouncer` and `boundary`
pub fn host_reconciler(config: Config) -> Reconciler {
    let table = Arc::new(HostProcessTable::new());
    let prober = ProcessProber::from_config(table.clone(), &config);
    let boundary = BoundaryCli::new(config.broker.clone(), prober);
    Reconciler::new(config, table, Box::new(CommandLauncher), Box::new(boundary))
}
