//! Crash-safe JSON persistence shared by the settings store and the status snapshot,
//! plus the advisory lock files that serialize writers across processes.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Temp path used while writing `path`: `settings.json` → `settings.json.tmp`.
pub fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Write `value` as pretty JSON: write `.tmp`, fsync, then `rename()` over `path`.
///
/// Readers observe either the old file or the complete new one. The temp file
/// is removed when any step fails.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    let tmp_path = tmp_path_for(path);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(value).map_err(std::io::Error::other)?;

    let result = (|| {
        {
            let mut opts = OpenOptions::new();
            opts.write(true).create(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt as _;
                opts.mode(0o644);
            }
            let mut file = opts.open(&tmp_path)?;
            file.write_all(json.as_bytes())?;
            file.write_all(b"\n")?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

// ──────────────────── lock files ────────────────────

/// Exclusive advisory lock, released when dropped.
#[cfg(unix)]
pub type FileLock = nix::fcntl::Flock<File>;

#[cfg(not(unix))]
pub type FileLock = File;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockWait {
    /// Block until the holder releases the lock.
    Block,
    /// Return `Ok(None)` when another holder has it.
    Try,
}

/// Take an exclusive `flock` on `path`, creating the file (and its parent) if needed.
///
/// Locks taken through separate `open()` calls conflict with each other, in
/// the same process as well as across processes.
pub fn lock_exclusive(path: &Path, wait: LockWait) -> std::io::Result<Option<FileLock>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut opts = OpenOptions::new();
    opts.read(true).write(true).create(true).truncate(false);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt as _;
        opts.mode(0o600);
    }
    let file = opts.open(path)?;
    flock(file, wait)
}

#[cfg(unix)]
#[allow(deprecated)]
fn flock(file: File, wait: LockWait) -> std::io::Result<Option<FileLock>> {
    use nix::errno::Errno;
    use nix::fcntl::{Flock, FlockArg};

    let arg = match wait {
        LockWait::Block => FlockArg::LockExclusive,
        LockWait::Try => FlockArg::LockExclusiveNonblock,
    };
    match Flock::lock(file, arg) {
        Ok(lock) => Ok(Some(lock)),
        Err((_file, errno)) if errno == Errno::EWOULDBLOCK => Ok(None),
        Err((_file, errno)) => Err(std::io::Error::from(errno)),
    }
}

#[cfg(not(unix))]
fn flock(file: File, _wait: LockWait) -> std::io::Result<Option<FileLock>> {
    Ok(Some(file))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_and_leaves_no_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        write_json_atomic(&path, &serde_json::json!({"a": 1})).unwrap();

        let back: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back["a"], 1);
        assert!(!tmp_path_for(&path).exists());
    }

    #[test]
    fn failure_keeps_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        write_json_atomic(&path, &serde_json::json!({"v": "old"})).unwrap();

        // A directory squatting on the temp path makes the open fail.
        fs::create_dir(tmp_path_for(&path)).unwrap();
        assert!(write_json_atomic(&path, &serde_json::json!({"v": "new"})).is_err());

        let back: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back["v"], "old");
    }

    #[cfg(unix)]
    #[test]
    fn try_lock_fails_while_held_and_succeeds_after_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locks").join("clean.lock");

        let held = lock_exclusive(&path, LockWait::Try).unwrap();
        assert!(held.is_some());
        assert!(lock_exclusive(&path, LockWait::Try).unwrap().is_none());

        drop(held);
        assert!(lock_exclusive(&path, LockWait::Try).unwrap().is_some());
    }

    #[test]
    fn lock_reports_unusable_parent() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"x").unwrap();
        assert!(lock_exclusive(&blocker.join("x.lock"), LockWait::Block).is_err());
    }
}
