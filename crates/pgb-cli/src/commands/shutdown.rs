//! Shutdown command implementation

use anyhow::Result;

use pgb_core::{
    DisconnectOutcome, ProxyAction, ProxyFollowUp, Reconciler, ShutdownOutcome, TunnelSweep,
};

use crate::output::{print_error, print_info, print_success, print_warning};

/// Execute the shutdown command
///
/// Without a connection name everything is torn down.
pub fn shutdown_command(reconciler: &Reconciler, connection: Option<&str>) -> Result<()> {
    match connection {
        Some(name) => shutdown_one(reconciler, name),
        None => shutdown_all(reconciler),
    }
}

fn shutdown_one(reconciler: &Reconciler, name: &str) -> Result<()> {
    let outcome = match reconciler.disconnect(name) {
        Ok(outcome) => outcome,
        Err(e) => {
            print_error(&format!("Failed to shut down {}", name));
            return Err(e.into());
        }
    };

    match outcome {
        DisconnectOutcome::NotFound => {
            print_warning(&format!("{} is not connected", name));
        }
        DisconnectOutcome::Disconnected { terminated, proxy } => {
            match terminated {
                Some(pid) => print_success(&format!(
                    "Shut down {} (boundary pid {})",
                    name, pid
                )),
                None => print_success(&format!("Removed {}; its tunnel was not running", name)),
            }
            match proxy {
                ProxyFollowUp::Applied(ProxyAction::Reloaded { pid }) => {
                    print_info(&format!("Reloaded PgBouncer (pid {})", pid))
                }
                ProxyFollowUp::Applied(ProxyAction::Started) => print_info("Started PgBouncer"),
                ProxyFollowUp::Stopped { proxy, .. } => print_proxy_shutdown(proxy),
            }
        }
    }

    Ok(())
}

fn shutdown_all(reconciler: &Reconciler) -> Result<()> {
    let report = reconciler.disconnect_all();

    if let Some(proxy) = report.proxy {
        print_proxy_shutdown(proxy);
    }
    match report.tunnels {
        Some(TunnelSweep::Killed(n)) => {
            print_success(&format!("Terminated {} boundary process(es)", n))
        }
        Some(TunnelSweep::NothingFound) => print_warning("No boundary processes found"),
        None => {}
    }
    if let Some(n) = report.cleared {
        print_info(&format!("Removed {} connection(s) from PgBouncer config", n));
    }

    for failure in &report.failures {
        print_error(&failure.to_string());
    }
    if !report.is_success() {
        anyhow::bail!("{} shutdown step(s) failed", report.failures.len());
    }

    Ok(())
}

fn print_proxy_shutdown(outcome: ShutdownOutcome) {
    match outcome {
        ShutdownOutcome::Stopped { pid } => {
            print_success(&format!("Stopped PgBouncer (pid {})", pid))
        }
        ShutdownOutcome::NotRunning => print_warning("PgBouncer is not running"),
    }
}
