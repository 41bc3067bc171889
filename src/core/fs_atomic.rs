//! Atomic file replacement and lock-protected JSON patching.

use crate::core::error::{Result, TaskhiveError};
use crate::core::lock::{self, LockOptions};
use crate::core::patch::{self, Patch};
use crate::core::time;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Sibling temp path `<target>.tmp.<pid>.<millis>.<seq>`; the sequence keeps
/// threads of one process apart within the same millisecond.
fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(
        ".tmp.{}.{}.{}",
        std::process::id(),
        time::now_millis(),
        TEMP_SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    path.with_file_name(name)
}

/// Writes `bytes` to a temp file in the destination directory and renames it into place.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(TaskhiveError::IoError)?;
    }
    let tmp = temp_path_for(path);
    let result = (|| -> std::io::Result<()> {
        let mut file = OpenOptions::new().create_new(true).write(true).open(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, path)
    })();
    if let Err(err) = result {
        let _ = fs::remove_file(&tmp);
        return Err(TaskhiveError::IoError(err));
    }
    Ok(())
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    atomic_write(path, &bytes)
}

/// Reads and decodes a JSON file; `None` when it does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(TaskhiveError::IoError(err)),
    }
}

pub fn read_text(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(s) => Ok(Some(s)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(TaskhiveError::IoError(err)),
    }
}

/// Lock → read current (or `{}`) → update → atomic write → release.
pub fn locked_update<F>(path: &Path, opts: &LockOptions, update: F) -> Result<Value>
where
    F: FnOnce(&mut Value) -> Result<()>,
{
    lock::with_lock(path, opts, || {
        let mut current = read_json::<Value>(path)?.unwrap_or_else(|| Value::Object(Default::default()));
        update(&mut current)?;
        write_json(path, &current)?;
        Ok(current)
    })
}

/// Deep-merges `patch` into the JSON document at `path` under its lock and returns the result.
pub fn locked_patch(path: &Path, patch: &Patch, opts: &LockOptions) -> Result<Value> {
    locked_update(path, opts, |current| {
        patch::merge(current, patch);
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_atomic_write_replaces_and_leaves_no_temp() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("nested/dir/file.json");
        atomic_write(&path, b"one").unwrap();
        atomic_write(&path, b"two").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "two");
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_atomic_write_failure_cleans_temp() {
        let tmp = tempdir().unwrap();
        // A directory at the destination makes the rename fail.
        let path = tmp.path().join("occupied");
        fs::create_dir_all(path.join("child")).unwrap();
        assert!(atomic_write(&path, b"data").is_err());
        let names: Vec<String> = fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["occupied".to_string()]);
    }

    #[test]
    fn test_read_json_missing_is_none() {
        let tmp = tempdir().unwrap();
        let v: Option<Value> = read_json(&tmp.path().join("nope.json")).unwrap();
        assert!(v.is_none());
    }

    #[test]
    fn test_locked_patch_merges_into_existing() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("status.json");
        write_json(&path, &json!({"status": "done", "workerSession": {"attempt": 1}})).unwrap();
        let patch = json!({"workerSession": {"messageCount": 4}})
            .as_object()
            .cloned()
            .unwrap();
        let out = locked_patch(&path, &patch, &LockOptions::default()).unwrap();
        assert_eq!(
            out,
            json!({"status": "done", "workerSession": {"attempt": 1, "messageCount": 4}})
        );
        assert!(!lock::lock_path_for(&path).exists());
    }
}
