//! Boundary target definitions

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A resolved target, immutable for the lifetime of an invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Logical name, also the PgBouncer database alias
    pub name: String,
    /// Boundary controller address (always `https://`)
    pub host: String,
    /// Boundary target name
    pub target: String,
    /// Database name on the remote server
    pub database: String,
    /// Auth scope override
    pub auth_scope: Option<String>,
    /// Target scope override
    pub target_scope: Option<String>,
}

impl Target {
    /// Auth scope for this target, falling back to the global default
    pub fn auth_scope_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.auth_scope.as_deref().unwrap_or(default)
    }

    /// Target scope for this target, falling back to the global default
    pub fn target_scope_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.target_scope.as_deref().unwrap_or(default)
    }
}

/// A target as written in the config file
///
/// Accepts both the compact form
/// `app1 = "host=https://boundary.example.com target=app1-ro"`
/// and a table with the same keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TargetEntry {
    Inline(String),
    Table(TargetFields),
}

/// Raw target fields before validation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetFields {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub auth: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl TargetEntry {
    /// Validate the entry and turn it into a [`Target`]
    pub fn resolve(&self, name: &str) -> Result<Target, ConfigError> {
        let fields = match self {
            TargetEntry::Inline(value) => parse_inline(value),
            TargetEntry::Table(fields) => fields.clone(),
        };
        fields.into_target(name)
    }
}

impl TargetFields {
    fn into_target(self, name: &str) -> Result<Target, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidTarget {
            name: name.to_string(),
            reason,
        };

        if let Some(reason) = name_problem(name) {
            return Err(invalid(reason));
        }

        let host = non_empty(self.host);
        let target = non_empty(self.target);
        let (host, target) = match (host, target) {
            (Some(host), Some(target)) => (host, target),
            _ => {
                return Err(invalid(
                    "target must have at least host and target fields".to_string(),
                ))
            }
        };

        if !host.starts_with("https://") {
            return Err(invalid(format!("host must start with https:// (got: {})", host)));
        }

        let database = non_empty(self.database).unwrap_or_else(|| derive_database(&target));

        Ok(Target {
            name: name.to_string(),
            host,
            target,
            database,
            auth_scope: non_empty(self.auth),
            target_scope: non_empty(self.scope),
        })
    }
}

/// Parse the compact `key=value key=value` form; unknown keys are ignored
fn parse_inline(value: &str) -> TargetFields {
    let mut fields = TargetFields::default();
    for part in value.split_whitespace() {
        let Some((key, val)) = part.split_once('=') else {
            continue;
        };
        let val = Some(val.to_string());
        match key {
            "host" => fields.host = val,
            "target" => fields.target = val,
            "database" => fields.database = val,
            "auth" => fields.auth = val,
            "scope" => fields.scope = val,
            _ => {}
        }
    }
    fields
}

/// Database name implied by a Boundary target name
///
/// Drops a trailing `-ro`/`-rw` access suffix, then the `-` separators:
/// `billing-api-ro` becomes `billingapi`.
pub fn derive_database(target: &str) -> String {
    let base = target
        .strip_suffix("-ro")
        .or_else(|| target.strip_suffix("-rw"))
        .unwrap_or(target);
    base.replace('-', "")
}

/// Why `name` cannot be used as a PgBouncer database alias, if it can't
fn name_problem(name: &str) -> Option<String> {
    if name.is_empty() {
        return Some("target name must not be empty".to_string());
    }
    name.chars()
        .find(|c| c.is_whitespace() || c.is_control() || "=[];#%'\"".contains(*c))
        .map(|c| format!("target name must not contain {:?}", c))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
