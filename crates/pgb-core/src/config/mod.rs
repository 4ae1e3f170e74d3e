//! Configuration management for pgboundary
//!
//! The tool reads a TOML file describing where PgBouncer lives, which
//! Boundary scopes and auth method to use, and the named targets that can
//! be connected. The file is resolved once into a [`Config`] whose paths are
//! all absolute.

mod pgbouncer;
pub mod serde_utils;
mod target;

pub use pgbouncer::{read_pgbouncer_ini, PgBouncerIni};
pub use target::{derive_database, Target, TargetEntry, TargetFields};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use serde_utils::duration_secs;

/// Config file name looked up in the default locations
pub const CONFIG_FILE_NAME: &str = "pgboundary.toml";

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pgboundary")
}

/// Candidate config paths, in lookup order
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".pgboundary").join(CONFIG_FILE_NAME));
    }
    paths.push(default_config_dir().join(CONFIG_FILE_NAME));
    paths
}

/// Config file to use: `explicit` if given, otherwise the first default that exists
pub fn find_config_file(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    let candidates = default_config_paths();
    for candidate in &candidates {
        tracing::debug!("Checking for config in {:?}", candidate);
        if candidate.exists() {
            return Ok(candidate.clone());
        }
    }
    Err(ConfigError::NoDefault(candidates))
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// The config file as written on disk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub pgbouncer: PgBouncerSection,
    pub scopes: ScopesSection,
    pub auth: AuthSection,
    pub boundary: BoundarySection,
    pub targets: BTreeMap<String, TargetEntry>,
}

/// `[pgbouncer]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PgBouncerSection {
    /// Working directory PgBouncer runs in, relative to the config file
    pub workdir: PathBuf,
    /// PgBouncer config file, relative to the workdir
    pub conffile: PathBuf,
    /// PgBouncer executable
    pub program: String,
    /// Directory for generated fragments, relative to the workdir
    pub fragment_dir: PathBuf,
}

impl Default for PgBouncerSection {
    fn default() -> Self {
        Self {
            workdir: PathBuf::from("."),
            conffile: PathBuf::from("pgbouncer.ini"),
            program: "pgbouncer".to_string(),
            fragment_dir: PathBuf::from("pgboundary.d"),
        }
    }
}

/// `[scopes]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopesSection {
    /// Scope holding the auth method
    pub auth: String,
    /// Scope holding the targets
    pub target: String,
}

impl Default for ScopesSection {
    fn default() -> Self {
        Self {
            auth: "global".to_string(),
            target: String::new(),
        }
    }
}

/// `[auth]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    /// Auth method type, e.g. `oidc` or `password`
    pub method: String,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            method: "oidc".to_string(),
        }
    }
}

/// `[boundary]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundarySection {
    /// Boundary CLI executable
    pub program: String,
    /// How long to wait for `boundary connect` to print its descriptor
    #[serde(with = "duration_secs")]
    pub settle_time: Duration,
}

impl Default for BoundarySection {
    fn default() -> Self {
        Self {
            program: "boundary".to_string(),
            settle_time: Duration::from_secs(3),
        }
    }
}

/// Everything the proxy controller and fragment store need, as absolute paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySettings {
    pub workdir: PathBuf,
    pub conf_file: PathBuf,
    pub pid_file: PathBuf,
    pub auth_file: Option<PathBuf>,
    pub program: String,
    pub fragment_dir: PathBuf,
}

/// Settings for the Boundary CLI provisioner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    pub program: String,
    pub settle_time: Duration,
}

/// Fully resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// File the configuration was loaded from
    pub source: PathBuf,
    pub proxy: ProxySettings,
    pub broker: BrokerSettings,
    /// Default auth scope
    pub auth_scope: String,
    /// Default target scope
    pub target_scope: String,
    /// Auth method type
    pub auth_method: String,
    pub targets: BTreeMap<String, Target>,
}

impl Config {
    /// Load and resolve a config file
    ///
    /// Relative paths are resolved against the config file's directory
    /// (workdir) and the workdir (everything else), then PgBouncer's own
    /// config is read for its pid file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file: ConfigFile = load_config(path)?;
        let source = absolute(path)?;
        let config_dir = source
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::resolve(file, source, &config_dir)
    }

    /// Load from `explicit` if given, otherwise from the first default location that exists
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load(&find_config_file(explicit)?)
    }

    fn resolve(file: ConfigFile, source: PathBuf, config_dir: &Path) -> Result<Self, ConfigError> {
        let workdir = normalize(&config_dir.join(&file.pgbouncer.workdir));
        let conf_file = workdir.join(&file.pgbouncer.conffile);
        let fragment_dir = normalize(&workdir.join(&file.pgbouncer.fragment_dir));

        if fragment_dir == workdir || conf_file.starts_with(&fragment_dir) {
            return Err(ConfigError::Invalid(format!(
                "pgbouncer.fragment_dir must be a subdirectory of the workdir that does not hold {} (got {})",
                conf_file.display(),
                fragment_dir.display()
            )));
        }

        if file.pgbouncer.program.trim().is_empty() {
            return Err(ConfigError::MissingField("pgbouncer.program".to_string()));
        }
        if file.boundary.program.trim().is_empty() {
            return Err(ConfigError::MissingField("boundary.program".to_string()));
        }

        let ini = read_pgbouncer_ini(&conf_file)?;

        let mut targets = BTreeMap::new();
        for (name, entry) in &file.targets {
            targets.insert(name.clone(), entry.resolve(name)?);
        }

        Ok(Self {
            source,
            proxy: ProxySettings {
                pid_file: workdir.join(&ini.pidfile),
                auth_file: ini.auth_file.map(|a| workdir.join(a)),
                workdir,
                conf_file,
                program: file.pgbouncer.program,
                fragment_dir,
            },
            broker: BrokerSettings {
                program: file.boundary.program,
                settle_time: file.boundary.settle_time,
            },
            auth_scope: file.scopes.auth,
            target_scope: file.scopes.target,
            auth_method: file.auth.method,
            targets,
        })
    }

    /// Look up a target by name
    pub fn target(&self, name: &str) -> Result<&Target, ConfigError> {
        self.targets
            .get(name)
            .ok_or_else(|| ConfigError::UnknownTarget(name.to_string()))
    }

    /// Auth and target scope for a target, with global fallbacks applied
    pub fn scopes_for<'a>(&'a self, target: &'a Target) -> (&'a str, &'a str) {
        (
            target.auth_scope_or(&self.auth_scope),
            target.target_scope_or(&self.target_scope),
        )
    }
}

fn absolute(path: &Path) -> Result<PathBuf, ConfigError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir()
        .map_err(|e| ConfigError::Invalid(format!("Failed to get current directory: {}", e)))?;
    Ok(normalize(&cwd.join(path)))
}

/// Lexically drop `.` and `..` components
fn normalize(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component.as_os_str());
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
[pgbouncer]
workdir = "./work"
conffile = "pgbouncer.ini"

[scopes]
auth = "auth"
target = "target"

[targets]
app1 = "host=https://boundary.example.com target=app1-ro"
app2 = "host=https://boundary.example-two.com target=app2-ro database=custom_db auth=auth1 scope=scope1"
app3 = "host=https://boundary.example.com target=app1-rw"

[targets.app4]
host = "https://boundary.example.com"
target = "app1"
"#;

    fn write_fixture(dir: &TempDir) -> PathBuf {
        let work = dir.path().join("work");
        std::fs::create_dir_all(&work).unwrap();
        std::fs::write(
            work.join("pgbouncer.ini"),
            "[pgbouncer]\npidfile = pgbouncer.pid\nauth_file = userlist.txt\n",
        )
        .unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, CONFIG).unwrap();
        path
    }

    #[test]
    fn test_load_resolves_paths() {
        let dir = TempDir::new().unwrap();
        let path = write_fixture(&dir);

        let config = Config::load(&path).unwrap();
        let work = dir.path().join("work");
        assert_eq!(config.proxy.workdir, work);
        assert_eq!(config.proxy.conf_file, work.join("pgbouncer.ini"));
        assert_eq!(config.proxy.pid_file, work.join("pgbouncer.pid"));
        assert_eq!(config.proxy.auth_file, Some(work.join("userlist.txt")));
        assert_eq!(config.proxy.fragment_dir, work.join("pgboundary.d"));
        assert_eq!(config.proxy.program, "pgbouncer");
        assert_eq!(config.broker.settle_time, Duration::from_secs(3));
        assert_eq!(config.auth_method, "oidc");
    }

    #[test]
    fn test_load_targets() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(&write_fixture(&dir)).unwrap();

        assert_eq!(config.targets.len(), 4);
        assert_eq!(config.target("app1").unwrap().database, "app1");
        assert_eq!(config.target("app2").unwrap().database, "custom_db");
        assert_eq!(config.target("app3").unwrap().database, "app1");
        assert_eq!(config.target("app4").unwrap().database, "app1");

        let app2 = config.target("app2").unwrap();
        assert_eq!(config.scopes_for(app2), ("auth1", "scope1"));
        let app1 = config.target("app1").unwrap();
        assert_eq!(config.scopes_for(app1), ("auth", "target"));
    }

    #[test]
    fn test_unknown_target() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(&write_fixture(&dir)).unwrap();
        assert!(matches!(
            config.target("nope"),
            Err(ConfigError::UnknownTarget(_))
        ));
    }

    #[test]
    fn test_nonexistent_file() {
        let err = Config::load(Path::new("/nonexistent/pgboundary.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_missing_pgbouncer_ini() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[pgbouncer]\nworkdir = \"missing\"\n").unwrap();
        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::NotFound(_))
        ));
    }

    #[test]
    fn test_invalid_target_fails_load() {
        let dir = TempDir::new().unwrap();
        let path = write_fixture(&dir);
        std::fs::write(&path, "[targets]\nbad = \"target=x\"\n[pgbouncer]\nworkdir = \"work\"\n")
            .unwrap();
        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::InvalidTarget { .. })
        ));
    }

    #[test]
    fn test_quoted_target_name_that_breaks_ini_fails_load() {
        let dir = TempDir::new().unwrap();
        let path = write_fixture(&dir);
        std::fs::write(
            &path,
            "[pgbouncer]\nworkdir = \"work\"\n[targets]\n\"a=b\" = \"host=https://b.example.com target=x\"\n",
        )
        .unwrap();
        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::InvalidTarget { ref name, .. }) if name == "a=b"
        ));
    }

    #[test]
    fn test_fragment_dir_must_not_hold_main_config() {
        let dir = TempDir::new().unwrap();
        let path = write_fixture(&dir);
        for fragment_dir in [".", "./", "..", "sub/.."] {
            std::fs::write(
                &path,
                format!("[pgbouncer]\nworkdir = \"work\"\nfragment_dir = \"{}\"\n", fragment_dir),
            )
            .unwrap();
            assert!(
                matches!(Config::load(&path), Err(ConfigError::Invalid(_))),
                "fragment_dir = {:?} was accepted",
                fragment_dir
            );
        }
    }

    #[test]
    fn test_explicit_config_file_wins() {
        let path = Path::new("/etc/pgboundary/custom.toml");
        assert_eq!(find_config_file(Some(path)).unwrap(), path);
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
    }
}
