//! Advisory lock serializing writers of one database file across processes.
//!
//! The daemon and every administrative command open their own store. Each
//! change takes an exclusive lock on `<database>.lock`, re-reads the file
//! and only then applies and saves the change. The lock file is never
//! removed; deleting it would let a waiter lock an orphaned inode.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use tracing::{trace, warn};

use crate::error::StorageResult;

/// Exclusive lock held until dropped.
#[derive(Debug)]
pub(crate) struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Block until the lock next to `database` is held.
    pub(crate) fn acquire(database: &Path) -> StorageResult<Self> {
        let path = lock_path(database);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        file.lock()?;

        trace!(path = %path.display(), "Database lock acquired");
        Ok(Self { file, path })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(err) = self.file.unlock() {
            warn!(path = %self.path.display(), error = %err, "Failed to release database lock");
        }
    }
}

/// `keykeeper.json` is locked through `keykeeper.json.lock`.
pub(crate) fn lock_path(database: &Path) -> PathBuf {
    let mut name = database.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_lock_path_appends_suffix() {
        assert_eq!(
            lock_path(Path::new("/var/lib/keykeeper.json")),
            PathBuf::from("/var/lib/keykeeper.json.lock")
        );
        assert_eq!(lock_path(Path::new("db")), PathBuf::from("db.lock"));
    }

    #[test]
    fn test_second_holder_waits_for_release() {
        let dir = TempDir::new().unwrap();
        let database = dir.path().join("keykeeper.json");

        let first = FileLock::acquire(&database).unwrap();
        let (tx, rx) = mpsc::channel();
        let waiter = {
            let database = database.clone();
            std::thread::spawn(move || {
                let _second = FileLock::acquire(&database).unwrap();
                tx.send(()).unwrap();
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        drop(first);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();
    }
}
