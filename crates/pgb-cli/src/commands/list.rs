//! List command implementation

use anyhow::Result;

use pgb_core::Reconciler;

use crate::output::{format_connections, format_proxy, format_targets, print_error};

/// Execute the list command
///
/// Active connections are shown only while PgBouncer is running.
pub fn list_command(reconciler: &Reconciler, detailed: bool) -> Result<()> {
    let status = match reconciler.status() {
        Ok(s) => s,
        Err(e) => {
            print_error(&format!("Failed to get connections: {}", e));
            return Err(e.into());
        }
    };

    if status.proxy.running {
        if detailed {
            println!("{}", format_proxy(&status.proxy));
        }
        println!("Active PgBouncer connections:");
        println!("{}", format_connections(&status.connections, detailed));
        println!();
    } else if detailed {
        println!("{}", format_proxy(&status.proxy));
        println!();
    }

    println!("Available boundary targets:");
    println!("{}", format_targets(reconciler.config()));

    Ok(())
}
