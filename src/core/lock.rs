use anyhow::{Context, Result};
use log::{debug, warn};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use uuid::Uuid;

use crate::core::error::PilotError;

const MAX_ATTEMPTS: usize = 10;
const BREAK_BACKOFF: Duration = Duration::from_millis(20);

/// Advisory lock file holding the PID of the running invocation.
///
/// The lock is published with a hard link from a fully written staging file,
/// so the lock path never exists without a PID in it. Dropping the guard
/// removes the file if it still names this process.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    pid: u32,
}

impl RunLock {
    /// Acquire the lock, clearing a stale lock left by a dead process
    pub fn acquire<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let pid = std::process::id();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create lock directory: {:?}", parent))?;
        }

        let staging = sibling(&path, "new");
        fs::write(&staging, format!("{}\n", pid))
            .with_context(|| format!("Failed to write lock file: {:?}", staging))?;

        let result = Self::publish(&path, &staging, pid);
        if let Err(e) = fs::remove_file(&staging) {
            debug!("Could not remove staging lock {:?}: {}", staging, e);
        }
        result
    }

    fn publish(path: &Path, staging: &Path, pid: u32) -> Result<Self> {
        for _ in 0..MAX_ATTEMPTS {
            match fs::hard_link(staging, path) {
                Ok(()) => {
                    debug!("Acquired lock {:?}", path);
                    return Ok(Self {
                        path: path.to_path_buf(),
                        pid,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to create lock file: {:?}", path))
                }
            }

            let Some(seen) = read_lock(path)? else {
                continue;
            };
            if let Some(owner) = parse_owner(&seen) {
                if process_alive(owner) {
                    return Err(anyhow::anyhow!(PilotError::AlreadyRunning {
                        pid: owner,
                        path: path.to_path_buf(),
                    }));
                }
            }

            warn!("Removing stale lock {:?} (owner {:?})", path, seen.trim());
            break_stale(path, staging, &seen)?;
        }

        Err(anyhow::anyhow!(PilotError::ValidationError(format!(
            "could not acquire lock {:?} after {} attempts",
            path, MAX_ATTEMPTS
        ))))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let owned = fs::read_to_string(&self.path)
            .map(|text| parse_owner(&text) == Some(self.pid))
            .unwrap_or(false);
        if owned {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Delete a stale lock while holding the `.break` lock next to it, and only
/// if it still holds what was judged stale. Only breakers remove a lock they
/// do not own, so the check and the removal cannot interleave with another.
fn break_stale(path: &Path, staging: &Path, seen: &str) -> Result<()> {
    let breaker = breaker_path(path);
    match fs::hard_link(staging, &breaker) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            if let Some(text) = read_lock(&breaker)? {
                if parse_owner(&text).map_or(true, |pid| !process_alive(pid)) {
                    warn!("Removing abandoned lock {:?}", breaker);
                    let _ = fs::remove_file(&breaker);
                }
            }
            thread::sleep(BREAK_BACKOFF);
            return Ok(());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to create lock file: {:?}", breaker))
        }
    }

    let result = match read_lock(path) {
        Ok(Some(current)) if current == seen => match fs::remove_file(path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => {
                Err(e).with_context(|| format!("Failed to remove stale lock: {:?}", path))
            }
            _ => Ok(()),
        },
        Ok(_) => Ok(()),
        Err(e) => Err(e),
    };

    if let Err(e) = fs::remove_file(&breaker) {
        warn!("Could not release {:?}: {}", breaker, e);
    }
    result
}

fn breaker_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".break");
    PathBuf::from(name)
}

/// Contents of the lock file, `None` when it vanished
fn read_lock(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read lock file: {:?}", path)),
    }
}

fn parse_owner(text: &str) -> Option<u32> {
    text.trim().parse().ok()
}

/// Unique file next to the lock, on the same filesystem for link and rename
fn sibling(path: &Path, tag: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "lock".to_string());
    path.with_file_name(format!(".{}.{}.{}", name, tag, Uuid::new_v4().simple()))
}

fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}
