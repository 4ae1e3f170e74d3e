//! Status command implementation

use anyhow::Result;

use pgb_core::Reconciler;

use crate::output::{format_connections, format_proxy, print_error, print_warning};

/// Execute the status command
pub fn status_command(reconciler: &Reconciler) -> Result<()> {
    let status = match reconciler.status() {
        Ok(s) => s,
        Err(e) => {
            print_error("Failed to read PgBouncer state");
            return Err(e.into());
        }
    };

    println!("{}", format_proxy(&status.proxy));
    println!();
    println!("{}", format_connections(&status.connections, true));

    let dead = status
        .connections
        .iter()
        .filter(|c| c.tunnel_pid != 0 && !c.tunnel_alive)
        .count();
    if dead > 0 {
        print_warning(&format!(
            "{} connection(s) have no running tunnel; run 'pgboundary shutdown <connection>' to remove them",
            dead
        ));
    }
    if !status.proxy.running && !status.connections.is_empty() {
        print_warning("PgBouncer is not running but connections are configured");
    }

    Ok(())
}
