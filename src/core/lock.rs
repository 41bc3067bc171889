//! Cross-process exclusive locks backed by `<target>.lock` files.
//!
//! A lock is taken by creating the lock file with `create_new`, which gives
//! single-winner semantics per path on every platform we support. The file
//! records the owner pid and acquisition time so that a lock abandoned by a
//! crashed process can be recognised and broken.

use crate::core::error::{Result, TaskhiveError};
use crate::core::time;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};

/// A lock file younger than this whose payload cannot be parsed is assumed to
/// still be in the middle of being written by its creator.
const PAYLOAD_WRITE_GRACE: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockOptions {
    pub timeout_ms: u64,
    pub retry_interval_ms: u64,
    pub stale_ttl_ms: u64,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            retry_interval_ms: 50,
            stale_ttl_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockPayload {
    pid: u32,
    timestamp: String,
    file_path: String,
}

/// Path of the lock guarding `target`: the full file name with `.lock` appended.
pub fn lock_path_for(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    target.with_file_name(name)
}

/// Held lock. Dropping it (or calling [`FileLock::release`]) removes the lock file.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    released: bool,
}

impl FileLock {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(lock = %self.path.display(), "released lock"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!(lock = %self.path.display(), error = %err, "failed to remove lock file"),
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        self.remove();
    }
}

/// Acquires the lock guarding `target`, waiting up to `opts.timeout_ms`.
pub fn acquire(target: &Path, opts: &LockOptions) -> Result<FileLock> {
    let lock_path = lock_path_for(target);
    if let Some(parent) = lock_path.parent() {
        fs::create_dir_all(parent).map_err(TaskhiveError::IoError)?;
    }

    let started = Instant::now();
    let timeout = Duration::from_millis(opts.timeout_ms);
    let retry = Duration::from_millis(opts.retry_interval_ms.max(1));

    loop {
        if let Some(lock) = try_create(&lock_path, target)? {
            debug!(lock = %lock_path.display(), "acquired lock");
            return Ok(lock);
        }

        if is_stale(&lock_path, opts) && break_stale(&lock_path, opts)? {
            continue;
        }

        let elapsed = started.elapsed();
        if elapsed >= timeout {
            return Err(TaskhiveError::LockTimeout {
                lock_path,
                waited_ms: elapsed.as_millis() as u64,
            });
        }
        std::thread::sleep(retry.min(timeout - elapsed));
    }
}

/// Runs `f` while holding the lock for `target`.
pub fn with_lock<T>(target: &Path, opts: &LockOptions, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let lock = acquire(target, opts)?;
    let out = f();
    lock.release();
    out
}

fn try_create(lock_path: &Path, target: &Path) -> Result<Option<FileLock>> {
    let mut file = match OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(lock_path)
    {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::AlreadyExists => return Ok(None),
        Err(err) => return Err(TaskhiveError::IoError(err)),
    };

    // From here on the lock is ours; the guard removes it if writing the payload fails.
    let lock = FileLock {
        path: lock_path.to_path_buf(),
        released: false,
    };
    let payload = LockPayload {
        pid: std::process::id(),
        timestamp: time::now_iso(),
        file_path: target.to_string_lossy().to_string(),
    };
    let bytes = serde_json::to_vec(&payload)?;
    file.write_all(&bytes).map_err(TaskhiveError::IoError)?;
    file.flush().map_err(TaskhiveError::IoError)?;
    Ok(Some(lock))
}

fn break_guard_path(lock_path: &Path) -> PathBuf {
    let mut name = lock_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".break");
    lock_path.with_file_name(name)
}

/// Removes `lock_path` if it is still stale. Breakers serialize on a
/// `<lock>.break` guard and re-check under it, so a lock created by whoever
/// broke it first is never removed by a second breaker. Returns whether the
/// stale lock is gone.
fn break_stale(lock_path: &Path, opts: &LockOptions) -> Result<bool> {
    let guard_path = break_guard_path(lock_path);
    match OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&guard_path)
    {
        Ok(_) => {}
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
            // A breaker that died mid-break leaves its guard behind.
            if !modified_within(&guard_path, Duration::from_millis(opts.stale_ttl_ms)) {
                warn!(guard = %guard_path.display(), "removing abandoned lock break guard");
                remove_if_exists(&guard_path)?;
            }
            return Ok(false);
        }
        Err(err) => return Err(TaskhiveError::IoError(err)),
    }
    let _guard = FileLock {
        path: guard_path,
        released: false,
    };

    if !is_stale(lock_path, opts) {
        return Ok(false);
    }
    warn!(lock = %lock_path.display(), "breaking stale lock");
    remove_if_exists(lock_path)?;
    Ok(true)
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(TaskhiveError::IoError(err)),
    }
}

fn is_stale(lock_path: &Path, opts: &LockOptions) -> bool {
    let content = match fs::read_to_string(lock_path) {
        Ok(content) => content,
        // Released between our create attempt and this read; just retry.
        Err(err) if err.kind() == ErrorKind::NotFound => return false,
        Err(_) => return true,
    };

    let Ok(payload) = serde_json::from_str::<LockPayload>(&content) else {
        return !modified_within(lock_path, PAYLOAD_WRITE_GRACE);
    };
    let Some(age_ms) = time::age_millis(&payload.timestamp) else {
        return true;
    };

    age_ms > opts.stale_ttl_ms && !is_process_alive(payload.pid)
}

fn modified_within(path: &Path, window: Duration) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|mtime| SystemTime::now().duration_since(mtime).ok())
        .map(|age| age < window)
        .unwrap_or(false)
}

/// Liveness probe for a lock owner.
#[cfg(target_os = "linux")]
pub fn is_process_alive(pid: u32) -> bool {
    if pid == std::process::id() {
        return true;
    }
    Path::new(&format!("/proc/{}/stat", pid)).exists()
}

#[cfg(all(unix, not(target_os = "linux")))]
pub fn is_process_alive(pid: u32) -> bool {
    if pid == std::process::id() {
        return true;
    }
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(true)
}

/// Without a cheap probe we never declare an owner dead; such locks only clear by release.
#[cfg(not(unix))]
pub fn is_process_alive(_pid: u32) -> bool {
    true
}
