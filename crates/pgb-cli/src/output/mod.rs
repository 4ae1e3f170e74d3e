//! Output formatting utilities for the CLI
//!
//! Tables for connections and targets, the PgBouncer status line, and
//! colored status messages.

use tabled::{settings::Style, Table, Tabled};

use pgb_core::{Config, ConnectionStatus, ProxyStatus};

/// Format active connections as a table
///
/// With `detailed`, includes the tunnel pid and whether it is alive.
pub fn format_connections(connections: &[ConnectionStatus], detailed: bool) -> String {
    if connections.is_empty() {
        return "No active connections".to_string();
    }

    #[derive(Tabled)]
    struct ConnectionRow {
        #[tabled(rename = "CONNECTION")]
        name: String,
    }

    #[derive(Tabled)]
    struct ConnectionRowDetailed {
        #[tabled(rename = "CONNECTION")]
        name: String,
        #[tabled(rename = "BOUNDARY PID")]
        pid: String,
        #[tabled(rename = "TUNNEL")]
        tunnel: String,
    }

    if detailed {
        let rows: Vec<ConnectionRowDetailed> = connections
            .iter()
            .map(|c| ConnectionRowDetailed {
                name: c.name.clone(),
                pid: if c.tunnel_pid == 0 {
                    "-".to_string()
                } else {
                    c.tunnel_pid.to_string()
                },
                tunnel: tunnel_state(c).to_string(),
            })
            .collect();
        Table::new(rows).with(Style::rounded()).to_string()
    } else {
        let rows: Vec<ConnectionRow> = connections
            .iter()
            .map(|c| ConnectionRow {
                name: c.name.clone(),
            })
            .collect();
        Table::new(rows).with(Style::rounded()).to_string()
    }
}

fn tunnel_state(connection: &ConnectionStatus) -> &'static str {
    match (connection.tunnel_pid, connection.tunnel_alive) {
        (0, _) => "untracked",
        (_, true) => "running",
        (_, false) => "dead",
    }
}

/// Format the configured targets as a table, scopes resolved
pub fn format_targets(config: &Config) -> String {
    if config.targets.is_empty() {
        return "No targets configured".to_string();
    }

    #[derive(Tabled)]
    struct TargetRow {
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "HOST")]
        host: String,
        #[tabled(rename = "TARGET")]
        target: String,
        #[tabled(rename = "DATABASE")]
        database: String,
        #[tabled(rename = "AUTH SCOPE")]
        auth_scope: String,
        #[tabled(rename = "TARGET SCOPE")]
        target_scope: String,
    }

    let rows: Vec<TargetRow> = config
        .targets
        .values()
        .map(|t| {
            let (auth_scope, target_scope) = config.scopes_for(t);
            TargetRow {
                name: t.name.clone(),
                host: t.host.clone(),
                target: t.target.clone(),
                database: t.database.clone(),
                auth_scope: auth_scope.to_string(),
                target_scope: target_scope.to_string(),
            }
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// One-line PgBouncer state
pub fn format_proxy(status: &ProxyStatus) -> String {
    match status.pid {
        Some(pid) if status.running => format!("PgBouncer: running (pid {})", pid),
        _ => "PgBouncer: not running".to_string(),
    }
}

/// Print a success message in green with a checkmark prefix
///
/// Outputs to stdout with green coloring for positive feedback to the user.
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red with an X prefix
///
/// Outputs to stderr.
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow with a warning symbol prefix
///
/// Outputs to stderr.
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an informational message in cyan with an info symbol prefix
pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}
