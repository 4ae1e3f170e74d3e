//! Core error types for pgboundary

use std::path::PathBuf;
use thiserror::Error;

/// Error returned by a single reconciler operation
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Fragment store error
    #[error("Fragment store error: {0}")]
    Fragment(#[from] FragmentError),

    /// Proxy control error
    #[error("PgBouncer error: {0}")]
    Proxy(#[from] ProxyError),

    /// Tunnel provisioning error
    #[error("Boundary error: {0}")]
    Broker(#[from] BrokerError),

    /// Tunnel was started but its fragment could not be written
    #[error("tunnel for {target:?} is running as pid {pid} but its fragment could not be written: {source}")]
    OrphanedTunnel {
        target: String,
        pid: u32,
        #[source]
        source: FragmentError,
    },

    /// Tunnel could not be terminated; the fragment was kept
    #[error("failed to terminate tunnel pid {pid} for {target:?}, fragment kept: {source}")]
    TerminateFailed {
        target: String,
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    /// Tunnel is gone but its fragment could not be removed
    #[error("fragment for {target:?} could not be removed: {source}")]
    FragmentRemoval {
        target: String,
        #[source]
        source: FragmentError,
    },
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// No config file in any of the default locations
    #[error("no configuration file found in default locations: {}", display_paths(.0))]
    NoDefault(Vec<PathBuf>),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Target not present in the configuration
    #[error("target {0:?} not found in configuration")]
    UnknownTarget(String),

    /// Target definition is malformed
    #[error("invalid target {name:?}: {reason}")]
    InvalidTarget { name: String, reason: String },
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Fragment store errors
#[derive(Error, Debug)]
pub enum FragmentError {
    /// Filesystem error on a config or fragment file
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Fragment content could not be parsed
    #[error("{}:{line}: {reason}", .path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

impl FragmentError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// PgBouncer control errors
#[derive(Error, Debug)]
pub enum ProxyError {
    /// PID file exists but could not be read
    #[error("failed to read PID file {}: {source}", .path.display())]
    PidFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Proxy binary could not be executed
    #[error("failed to start {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Proxy binary ran but reported failure
    #[error("{program} exited with {status}: {stderr}")]
    LaunchFailed {
        program: String,
        status: String,
        stderr: String,
    },

    /// Signal delivery failed
    #[error("failed to send {signal} to pid {pid}: {source}")]
    Signal {
        pid: u32,
        signal: crate::types::Signal,
        #[source]
        source: std::io::Error,
    },
}

/// Tunnel provisioner errors
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Scope name not found on the controller
    #[error("scope {0:?} not found")]
    ScopeNotFound(String),

    /// No auth method of the requested type in scope
    #[error("no {method} auth method found in scope {scope}")]
    AuthMethodNotFound { method: String, scope: String },

    /// External command could not be run
    #[error("failed to run {program}: {source}")]
    Command {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// External command reported failure
    #[error("{step} failed: {message}")]
    CommandFailed { step: String, message: String },

    /// External command output could not be parsed
    #[error("failed to parse {step} response: {source}")]
    Parse {
        step: String,
        #[source]
        source: serde_json::Error,
    },

    /// Tunnel descriptor carried no credentials
    #[error("no credentials found in connection response")]
    NoCredentials,

    /// Scratch file handling failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Some tunnel processes could not be terminated
    #[error("failed to terminate tunnel processes: {}", display_pids(.0))]
    Terminate(Vec<(u32, std::io::Error)>),
}

fn display_pids(failures: &[(u32, std::io::Error)]) -> String {
    failures
        .iter()
        .map(|(pid, e)| format!("{} ({})", pid, e))
        .collect::<Vec<_>>()
        .join(", ")
}
