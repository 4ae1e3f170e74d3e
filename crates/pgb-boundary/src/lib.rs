//! pgb-boundary: HashiCorp Boundary tunnels via the `boundary` CLI
//!
//! Authenticates against a Boundary controller and starts a
//! `boundary connect` process in the background. The tunnel keeps running
//! after pgboundary exits; its pid is recorded in the PgBouncer fragment.

mod response;

use std::fs;
use std::io;
use std::process::{Child, Command, Output, Stdio};

use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;

use pgb_core::config::BrokerSettings;
use pgb_core::{BrokerError, ProcessKind, ProcessProber, Target, TunnelHandle, TunnelProvisioner};

use response::{AuthMethodList, AuthResponse, ConnectResponse, ScopeList};

/// Scope that needs no lookup
const GLOBAL_SCOPE: &str = "global";

/// Environment variable carrying the auth token to `boundary connect`
const TOKEN_ENV: &str = "BOUNDARY_TOKEN";

/// [`TunnelProvisioner`] driving the `boundary` executable
#[derive(Debug, Clone)]
pub struct BoundaryCli {
    settings: BrokerSettings,
    prober: ProcessProber,
}

impl BoundaryCli {
    pub fn new(settings: BrokerSettings, prober: ProcessProber) -> Self {
        Self { settings, prober }
    }

    fn scope_id(&self, host: &str, scope: &str) -> Result<String, BrokerError> {
        if scope == GLOBAL_SCOPE {
            return Ok(GLOBAL_SCOPE.to_string());
        }
        let scopes: ScopeList = self.run_json(
            "scopes list",
            &["scopes", "list", "-scope-id", GLOBAL_SCOPE, "-addr", host, "-format", "json"],
        )?;
        scopes.id_of(scope)
    }

    fn auth_method_id(&self, host: &str, scope_id: &str, method: &str) -> Result<String, BrokerError> {
        let methods: AuthMethodList = self.run_json(
            "auth-methods list",
            &["auth-methods", "list", "-scope-id", scope_id, "-addr", host, "-format", "json"],
        )?;
        let id = methods.pick(method, scope_id)?;
        tracing::debug!("Selected {} auth method {}", method, id);
        Ok(id)
    }

    fn authenticate(
        &self,
        host: &str,
        scope_id: &str,
        method: &str,
        method_id: &str,
    ) -> Result<String, BrokerError> {
        tracing::info!("Authenticating to {} with {}", host, method);
        let auth: AuthResponse = self.run_json(
            "authenticate",
            &[
                "authenticate",
                method,
                "-scope-id",
                scope_id,
                "-auth-method-id",
                method_id,
                "-addr",
                host,
                "-keyring-type",
                "none",
                "-format",
                "json",
            ],
        )?;
        Ok(auth.into_token())
    }

    /// Spawn `boundary connect` and read its descriptor after the settle time
    fn connect(
        &self,
        target: &Target,
        target_scope: &str,
        token: &str,
    ) -> Result<TunnelHandle, BrokerError> {
        let stdout = NamedTempFile::new()?;
        let stderr = NamedTempFile::new()?;
        let token_ref = format!("env://{}", TOKEN_ENV);

        let mut child = Command::new(&self.settings.program)
            .args([
                "connect",
                "-target-name",
                target.target.as_str(),
                "-target-scope-name",
                target_scope,
                "-addr",
                target.host.as_str(),
                "-token",
                token_ref.as_str(),
                "-format",
                "json",
            ])
            .env(TOKEN_ENV, token)
            .stdin(Stdio::null())
            .stdout(stdout.reopen()?)
            .stderr(stderr.reopen()?)
            .spawn()
            .map_err(|source| BrokerError::Command {
                program: self.settings.program.clone(),
                source,
            })?;

        let pid = child.id();
        tracing::info!("Started boundary connect for {} as pid {}", target.name, pid);

        std::thread::sleep(self.settings.settle_time);

        match read_descriptor(&mut child, &stdout, &stderr) {
            Ok(response) => response.into_handle(pid).map_err(|e| {
                kill_child(&mut child);
                e
            }),
            Err(e) => {
                kill_child(&mut child);
                Err(e)
            }
        }
    }

    fn run_json<T: DeserializeOwned>(&self, step: &str, args: &[&str]) -> Result<T, BrokerError> {
        tracing::debug!("Running {} {}", self.settings.program, args.join(" "));
        let output = Command::new(&self.settings.program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| BrokerError::Command {
                program: self.settings.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(BrokerError::CommandFailed {
                step: step.to_string(),
                message: failure_message(&output),
            });
        }

        serde_json::from_slice(&output.stdout).map_err(|source| BrokerError::Parse {
            step: step.to_string(),
            source,
        })
    }
}

impl TunnelProvisioner for BoundaryCli {
    fn start(
        &self,
        target: &Target,
        auth_scope: &str,
        target_scope: &str,
        auth_method: &str,
    ) -> Result<TunnelHandle, BrokerError> {
        let scope_id = self.scope_id(&target.host, auth_scope)?;
        let method_id = self.auth_method_id(&target.host, &scope_id, auth_method)?;
        let token = self.authenticate(&target.host, &scope_id, auth_method, &method_id)?;
        self.connect(target, target_scope, &token)
    }

    fn shutdown_all(&self) -> Result<usize, BrokerError> {
        let pids = self.prober.scan(ProcessKind::Tunnel)?;
        if pids.is_empty() {
            tracing::info!("No boundary processes found");
            return Ok(0);
        }

        let mut failures = Vec::new();
        for pid in &pids {
            if let Err(e) = self.prober.terminate(*pid) {
                failures.push((*pid, e));
            }
        }
        if !failures.is_empty() {
            return Err(BrokerError::Terminate(failures));
        }
        Ok(pids.len())
    }
}

/// Tunnel descriptor, provided the child is still running
fn read_descriptor(
    child: &mut Child,
    stdout: &NamedTempFile,
    stderr: &NamedTempFile,
) -> Result<ConnectResponse, BrokerError> {
    if let Some(status) = child.try_wait()? {
        let message = fs::read_to_string(stderr.path()).unwrap_or_default();
        return Err(BrokerError::CommandFailed {
            step: "connect".to_string(),
            message: if message.trim().is_empty() {
                format!("exited with {}", status)
            } else {
                format!("exited with {}: {}", status, message.trim())
            },
        });
    }

    let content = fs::read(stdout.path())?;
    serde_json::from_slice(&content).map_err(|source| BrokerError::Parse {
        step: "connect".to_string(),
        source,
    })
}

fn kill_child(child: &mut Child) {
    let pid = child.id();
    match child.kill() {
        Ok(()) => {
            let _ = child.wait();
            tracing::info!("Killed boundary connect pid {}", pid);
        }
        Err(e) if e.kind() == io::ErrorKind::InvalidInput => {}
        Err(e) => tracing::warn!("Failed to kill boundary connect pid {}: {}", pid, e),
    }
}

fn failure_message(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        return stderr.trim().to_string();
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.trim().is_empty() {
        return stdout.trim().to_string();
    }
    format!("exited with {}", output.status)
}
