//! Settings read from PgBouncer's own configuration file
//!
//! Only the `[pgbouncer]` section is inspected. Comments and `%include`
//! lines are skipped so generated fragments never influence these values.

use std::path::Path;

use crate::error::ConfigError;

/// Values pgboundary needs from `pgbouncer.ini`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PgBouncerIni {
    /// `pidfile`, as written
    pub pidfile: String,
    /// `auth_file`, as written
    pub auth_file: Option<String>,
}

/// Read `pidfile` and `auth_file` from a PgBouncer config file
pub fn read_pgbouncer_ini(path: &Path) -> Result<PgBouncerIni, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::Invalid(format!("Failed to read pgbouncer config {:?}: {}", path, e))
    })?;
    parse_pgbouncer_ini(&content)
}

fn parse_pgbouncer_ini(content: &str) -> Result<PgBouncerIni, ConfigError> {
    let mut pidfile = None;
    let mut auth_file = None;
    let mut in_pgbouncer = false;

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty()
            || trimmed.starts_with(';')
            || trimmed.starts_with('#')
            || trimmed.starts_with("%include")
        {
            continue;
        }

        if trimmed.starts_with('[') && trimmed.ends_with(']') {
            in_pgbouncer = trimmed[1..trimmed.len() - 1].trim() == "pgbouncer";
            continue;
        }

        if !in_pgbouncer {
            continue;
        }

        if let Some((key, value)) = trimmed.split_once('=') {
            let value = value.trim().to_string();
            match key.trim() {
                "pidfile" => pidfile = Some(value),
                "auth_file" => auth_file = Some(value),
                _ => {}
            }
        }
    }

    let pidfile = pidfile
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ConfigError::MissingField("pidfile in pgbouncer config".to_string()))?;

    Ok(PgBouncerIni {
        pidfile,
        auth_file: auth_file.filter(|a| !a.is_empty()),
    })
}
