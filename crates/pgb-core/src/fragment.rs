//! PgBouncer config fragments
//!
//! Each active connection lives in its own small INI file that the main
//! `pgbouncer.ini` pulls in with a `%include` line:
//!
//! ```text
//! ; boundary_pid=4242
//! [databases]
//! app1 = host=127.0.0.1 port=52311 dbname=app1 user=u password=p
//! ```
//!
//! Adding a connection appends one line to the main file. Removing one
//! rewrites the main file into a sibling temp file and renames it into
//! place, so PgBouncer never reads a half-written config.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::config::ProxySettings;
use crate::error::FragmentError;
use crate::types::TunnelHandle;

/// Comment prefix carrying the owning tunnel's pid
pub const PID_TAG: &str = "; boundary_pid=";

const INCLUDE: &str = "%include";

/// One connection found in the PgBouncer config
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionFragment {
    /// Database alias, i.e. the target name
    pub name: String,
    /// Tunnel pid from the tag comment, 0 if untracked
    pub tunnel_pid: u32,
    /// File the connection was read from
    pub path: PathBuf,
}

/// Reads and mutates the fragments included by the main PgBouncer config
#[derive(Debug, Clone)]
pub struct FragmentStore {
    conf_file: PathBuf,
    fragment_dir: PathBuf,
}

impl FragmentStore {
    pub fn new(conf_file: impl Into<PathBuf>, fragment_dir: impl Into<PathBuf>) -> Self {
        Self {
            conf_file: conf_file.into(),
            fragment_dir: fragment_dir.into(),
        }
    }

    pub fn from_settings(settings: &ProxySettings) -> Self {
        Self::new(&settings.conf_file, &settings.fragment_dir)
    }

    /// The main PgBouncer config file
    pub fn conf_file(&self) -> &Path {
        &self.conf_file
    }

    /// Persist a fragment for `target` and include it from the main config
    ///
    /// Returns the fragment's path.
    pub fn write(
        &self,
        target: &str,
        handle: &TunnelHandle,
        database: &str,
    ) -> Result<PathBuf, FragmentError> {
        fs::create_dir_all(&self.fragment_dir)
            .map_err(|e| FragmentError::io(&self.fragment_dir, e))?;

        let path = self
            .fragment_dir
            .join(format!("{}-{}.ini", file_stem(target), handle.pid));
        write_private(&path, render_fragment(target, handle, database).as_bytes())
            .map_err(|e| FragmentError::io(&path, e))?;

        if let Err(e) = self.append_include(&path) {
            if let Err(cleanup) = fs::remove_file(&path) {
                tracing::warn!("Failed to remove unreferenced fragment {:?}: {}", path, cleanup);
            }
            return Err(e);
        }

        tracing::info!("Added {} to {:?} via {:?}", target, self.conf_file, path);
        Ok(path)
    }

    /// Every connection declared by an included file
    ///
    /// Unreadable or malformed includes are logged and skipped.
    pub fn list(&self) -> Result<Vec<ConnectionFragment>, FragmentError> {
        let content = self.read_conf()?;
        let mut connections = Vec::new();

        for line in content.lines() {
            let Some(include) = self.include_path(line) else {
                continue;
            };
            match parse_fragment(&include) {
                Ok(parsed) => connections.extend(parsed.names.into_iter().map(|name| {
                    ConnectionFragment {
                        name,
                        tunnel_pid: parsed.tunnel_pid,
                        path: include.clone(),
                    }
                })),
                Err(e) => tracing::warn!("Skipping include {:?}: {}", include, e),
            }
        }

        Ok(connections)
    }

    /// Remove the fragment declaring `target`
    ///
    /// Returns `false` and leaves the config untouched when nothing matches.
    pub fn remove(&self, target: &str) -> Result<bool, FragmentError> {
        let content = self.read_conf()?;
        let mut kept = String::with_capacity(content.len());
        let mut removed = Vec::new();

        for line in content.split_inclusive('\n') {
            if let Some(include) = self.include_path(line) {
                let declares_target = parse_fragment(&include)
                    .map(|f| f.names.iter().any(|n| n == target))
                    .unwrap_or(false);
                if declares_target {
                    removed.push(include);
                    continue;
                }
            }
            kept.push_str(line);
        }

        if removed.is_empty() {
            tracing::debug!("No fragment for {} in {:?}", target, self.conf_file);
            return Ok(false);
        }

        // Drop the include before the file so the config never points at a
        // missing fragment.
        replace_contents(&self.conf_file, &kept)?;
        for path in &removed {
            remove_if_exists(path)?;
        }

        tracing::info!("Removed {} from {:?}", target, self.conf_file);
        Ok(true)
    }

    /// Strip every generated include and delete the generated files
    ///
    /// An include counts as generated when its file carries the pid tag, or
    /// when it points into the fragment directory at a file that no longer
    /// exists. Everything else in the main config is left as is. Returns
    /// the number of includes removed.
    pub fn clear(&self) -> Result<usize, FragmentError> {
        let content = self.read_conf()?;
        let mut kept = String::with_capacity(content.len());
        let mut removed = Vec::new();

        for line in content.split_inclusive('\n') {
            if let Some(include) = self.include_path(line) {
                if self.is_generated(&include) {
                    removed.push(include);
                    continue;
                }
            }
            kept.push_str(line);
        }

        if !removed.is_empty() {
            replace_contents(&self.conf_file, &kept)?;
            for path in &removed {
                remove_if_exists(path)?;
            }
        }
        self.sweep_fragment_dir()?;

        tracing::info!("Cleared {} fragment(s) from {:?}", removed.len(), self.conf_file);
        Ok(removed.len())
    }

    fn read_conf(&self) -> Result<String, FragmentError> {
        fs::read_to_string(&self.conf_file).map_err(|e| FragmentError::io(&self.conf_file, e))
    }

    fn append_include(&self, fragment: &Path) -> Result<(), FragmentError> {
        let existing = self.read_conf()?;
        let mut line = String::new();
        if !existing.is_empty() && !existing.ends_with('\n') {
            line.push('\n');
        }
        line.push_str(&format!("{} {}\n", INCLUDE, fragment.display()));

        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(&self.conf_file)
            .map_err(|e| FragmentError::io(&self.conf_file, e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| FragmentError::io(&self.conf_file, e))
    }

    /// Path named by an `%include` line, resolved against the config's directory
    fn include_path(&self, line: &str) -> Option<PathBuf> {
        let rest = line.trim().strip_prefix(INCLUDE)?;
        if !rest.starts_with(char::is_whitespace) {
            return None;
        }
        let rest = rest.trim();
        if rest.is_empty() {
            return None;
        }
        let path = Path::new(rest);
        Some(match self.conf_file.parent() {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        })
    }

    fn is_generated(&self, include: &Path) -> bool {
        if include == self.conf_file {
            return false;
        }
        match fs::read_to_string(include) {
            Ok(content) => is_tagged(&content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => include.starts_with(&self.fragment_dir),
            Err(_) => false,
        }
    }

    /// Delete leftover tagged fragments no include refers to any more
    fn sweep_fragment_dir(&self) -> Result<(), FragmentError> {
        let entries = match fs::read_dir(&self.fragment_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(FragmentError::io(&self.fragment_dir, e)),
        };
        for entry in entries {
            let path = entry
                .map_err(|e| FragmentError::io(&self.fragment_dir, e))?
                .path();
            if path == self.conf_file || path.extension().map_or(true, |ext| ext != "ini") {
                continue;
            }
            let tagged = fs::read_to_string(&path)
                .map(|content| is_tagged(&content))
                .unwrap_or(false);
            if tagged {
                tracing::debug!("Removing stale fragment {:?}", path);
                remove_if_exists(&path)?;
            }
        }
        Ok(())
    }
}

fn is_tagged(content: &str) -> bool {
    content.lines().any(|l| l.starts_with(PID_TAG))
}

/// Parsed contents of one fragment file
#[derive(Debug, Default, PartialEq, Eq)]
struct ParsedFragment {
    names: Vec<String>,
    tunnel_pid: u32,
}

fn parse_fragment(path: &Path) -> Result<ParsedFragment, FragmentError> {
    let content = fs::read_to_string(path).map_err(|e| FragmentError::io(path, e))?;
    parse_fragment_str(&content).map_err(|(line, reason)| FragmentError::Parse {
        path: path.to_path_buf(),
        line,
        reason,
    })
}

fn parse_fragment_str(content: &str) -> Result<ParsedFragment, (usize, String)> {
    let mut parsed = ParsedFragment::default();
    let mut tagged = false;
    let mut in_databases = false;

    for (index, line) in content.lines().enumerate() {
        if !tagged {
            if let Some(pid) = line.strip_prefix(PID_TAG) {
                if let Ok(pid) = pid.trim().parse::<u32>() {
                    parsed.tunnel_pid = pid;
                    tagged = true;
                }
                continue;
            }
        }

        let trimmed = line.trim();
        if trimmed.is_empty()
            || trimmed.starts_with(';')
            || trimmed.starts_with('#')
            || trimmed.starts_with(INCLUDE)
        {
            continue;
        }

        if trimmed.starts_with('[') {
            let section = trimmed
                .strip_suffix(']')
                .ok_or_else(|| (index + 1, format!("unterminated section header {:?}", trimmed)))?;
            in_databases = section[1..].trim() == "databases";
            continue;
        }

        match trimmed.split_once('=') {
            Some((key, _)) if !key.trim().is_empty() => {
                if in_databases {
                    parsed.names.push(key.trim().to_string());
                }
            }
            _ => return Err((index + 1, format!("expected key = value, got {:?}", trimmed))),
        }
    }

    Ok(parsed)
}

fn render_fragment(target: &str, handle: &TunnelHandle, database: &str) -> String {
    format!(
        "{}{}\n[databases]\n{} = host={} port={} dbname={} user={} password={}\n",
        PID_TAG,
        handle.pid,
        target,
        quote_value(&handle.host),
        handle.port,
        quote_value(database),
        quote_value(&handle.username),
        quote_value(&handle.password),
    )
}

/// Single-quote a connection-string value when PgBouncer would split it
fn quote_value(value: &str) -> String {
    if !value.is_empty() && !value.contains(|c: char| c.is_whitespace() || c == '\'') {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', "''"))
}

fn file_stem(target: &str) -> String {
    target
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Create or truncate `path` readable by the owner only
fn write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

/// Atomically replace `path` with `contents`, keeping its permissions
fn replace_contents(path: &Path, contents: &str) -> Result<(), FragmentError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::Builder::new()
        .prefix(".pgboundary-")
        .tempfile_in(dir)
        .map_err(|e| FragmentError::io(dir, e))?;

    tmp.write_all(contents.as_bytes())
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| FragmentError::io(tmp.path(), e))?;

    if let Ok(meta) = fs::metadata(path) {
        fs::set_permissions(tmp.path(), meta.permissions())
            .map_err(|e| FragmentError::io(tmp.path(), e))?;
    }

    tmp.persist(path)
        .map_err(|e| FragmentError::io(path, e.error))?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<(), FragmentError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(FragmentError::io(path, e)),
    }
}
