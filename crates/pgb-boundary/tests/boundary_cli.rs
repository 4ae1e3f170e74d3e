//! Boundary CLI provisioner tests
//!
//! A shell script stands in for the `boundary` executable. Everything runs
//! in one test so no other thread forks while a script is still open for
//! writing.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use pgb_boundary::BoundaryCli;
use pgb_core::config::{BrokerSettings, Target};
use pgb_core::{BrokerError, HostProcessTable, ProcessProber, ProcessTable, Signal, TunnelProvisioner};
use tempfile::TempDir;

const FAKE_BOUNDARY: &str = r#"#!/bin/sh
case "$1" in
  scopes)
    echo '{"items":[{"id":"o_1234","name":"auth1","type":"org"}]}'
    ;;
  auth-methods)
    case "$*" in
      *"-scope-id o_1234"*|*"-scope-id global"*) ;;
      *) echo "unexpected scope: $*" >&2; exit 2 ;;
    esac
    echo '{"items":[{"id":"ampw_1","type":"password"},{"id":"amoidc_1","type":"oidc"}]}'
    ;;
  authenticate)
    case "$*" in
      *"-auth-method-id amoidc_1"*) ;;
      *) echo "wrong auth method: $*" >&2; exit 2 ;;
    esac
    echo '{"item":{"attributes":{"token":"at_secret"}}}'
    ;;
  connect)
    if [ "$BOUNDARY_TOKEN" != "at_secret" ]; then
      echo "missing token" >&2
      exit 3
    fi
    case "$*" in
      *"-target-name broken"*) echo "error: target not found" >&2; exit 1 ;;
    esac
    echo '{"address":"127.0.0.1","port":54321,"credentials":[{"credential":{"username":"v-app1","password":"pw"}}]}'
    exec sleep 30
    ;;
esac
exit 64
"#;

fn write_script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("boundary");
    fs::write(&path, body).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn provisioner(program: &Path) -> BoundaryCli {
    let settings = BrokerSettings {
        program: program.display().to_string(),
        settle_time: Duration::from_millis(300),
    };
    let prober = ProcessProber::new(Arc::new(HostProcessTable::new()), "pgbouncer", "boundary");
    BoundaryCli::new(settings, prober)
}

fn target(name: &str, remote: &str) -> Target {
    Target {
        name: name.to_string(),
        host: "https://boundary.example.com".to_string(),
        target: remote.to_string(),
        database: name.to_string(),
        auth_scope: None,
        target_scope: None,
    }
}

#[test]
fn test_boundary_cli_flow() {
    let dir = TempDir::new().unwrap();
    let cli = provisioner(&write_script(dir.path(), FAKE_BOUNDARY));

    // Global scope, no scope lookup
    let handle = cli
        .start(&target("app1", "app1-ro"), "global", "databases", "oidc")
        .unwrap();
    assert_eq!(handle.host, "127.0.0.1");
    assert_eq!(handle.port, 54321);
    assert_eq!(handle.username, "v-app1");
    assert_eq!(handle.password, "pw");
    assert!(HostProcessTable::new().exists(handle.pid));
    HostProcessTable::new()
        .signal(handle.pid, Signal::Terminate)
        .unwrap();

    // Named scope resolved through `scopes list`
    let handle = cli
        .start(&target("app2", "app2-ro"), "auth1", "scope1", "oidc")
        .unwrap();
    HostProcessTable::new()
        .signal(handle.pid, Signal::Terminate)
        .unwrap();

    let err = cli
        .start(&target("app2", "app2-ro"), "nowhere", "scope1", "oidc")
        .unwrap_err();
    assert!(matches!(err, BrokerError::ScopeNotFound(ref s) if s == "nowhere"));

    let err = cli
        .start(&target("app1", "app1-ro"), "global", "databases", "ldap")
        .unwrap_err();
    assert!(matches!(err, BrokerError::AuthMethodNotFound { .. }));

    // Tunnel exits before the settle time is over
    let err = cli
        .start(&target("broken", "broken"), "global", "databases", "oidc")
        .unwrap_err();
    match err {
        BrokerError::CommandFailed { step, message } => {
            assert_eq!(step, "connect");
            assert!(message.contains("target not found"), "{}", message);
        }
        other => panic!("expected CommandFailed, got {:?}", other),
    }

    let missing = provisioner(Path::new("/nonexistent/boundary"));
    let err = missing
        .start(&target("app1", "app1-ro"), "global", "databases", "oidc")
        .unwrap_err();
    assert!(matches!(err, BrokerError::Command { .. }));
}
