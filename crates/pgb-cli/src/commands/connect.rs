//! Connect command implementation

use anyhow::Result;

use pgb_core::{ConnectOutcome, ProxyAction, Reconciler};

use crate::output::{print_error, print_info, print_success, print_warning};

/// Execute the connect command
pub fn connect_command(reconciler: &Reconciler, target: &str) -> Result<()> {
    let outcome = match reconciler.connect(target) {
        Ok(outcome) => outcome,
        Err(e) => {
            print_error(&format!("Failed to connect {}", target));
            return Err(e.into());
        }
    };

    match outcome {
        ConnectOutcome::Connected {
            tunnel_pid,
            fragment,
            proxy,
        } => {
            print_success(&format!("Connected {} (boundary pid {})", target, tunnel_pid));
            tracing::debug!("Fragment written to {:?}", fragment);
            match proxy {
                ProxyAction::Started => print_info("Started PgBouncer"),
                ProxyAction::Reloaded { pid } => {
                    print_info(&format!("Reloaded PgBouncer (pid {})", pid))
                }
            }
        }
        ConnectOutcome::AlreadyConnected { tunnel_pid } => {
            print_warning(&format!(
                "{} is already connected (boundary pid {})",
                target, tunnel_pid
            ));
        }
    }

    Ok(())
}
