//! PID file utilities
//!
//! PgBouncer writes its own PID file; pgboundary only ever reads it. The
//! file can disappear or be rewritten at any moment (PgBouncer exiting or
//! restarting), so callers re-read instead of caching the value.

use std::fs;
use std::io::{self, Read};
use std::path::Path;

/// Read the PID from the PID file
///
/// Returns `Ok(Some(pid))` if the file exists and contains a valid PID,
/// `Ok(None)` if the file doesn't exist, or an error if the file is malformed.
pub fn read_pid_file(path: &Path) -> io::Result<Option<u32>> {
    match fs::File::open(path) {
        Ok(mut file) => {
            let mut contents = String::new();
            file.read_to_string(&mut contents)?;
            let pid = contents
                .trim()
                .parse::<u32>()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            if pid == 0 {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "pid 0"));
            }
            Ok(Some(pid))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
