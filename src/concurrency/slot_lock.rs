//! Cross-process lock for the file-backed relay slot (fs2 `flock`).
//!
//! Every `put` and `take` on the slot file runs under this lock, so two
//! relays sharing one state directory never hand out the same command.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct SlotLock {
    path: PathBuf,
}

/// Held for the duration of one slot operation; unlocks on drop.
pub struct SlotLockGuard {
    file: File,
}

impl Drop for SlotLockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl SlotLock {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        Ok(Self { path })
    }

    /// Wait for exclusive access to the slot.
    pub fn acquire(&self) -> Result<SlotLockGuard> {
        // The lock file only carries the flock; its contents are never read
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open relay lock {}", self.path.display()))?;

        file.lock_exclusive()
            .with_context(|| format!("Failed to lock {}", self.path.display()))?;

        Ok(SlotLockGuard { file })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Barrier};
    use std::time::Duration;

    #[test]
    fn lock_file_lives_beside_the_slot() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("relay").join("slot.lock");
        let lock = SlotLock::new(&path).unwrap();

        drop(lock.acquire().unwrap());
        let _again = lock.acquire().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn slot_operations_never_overlap() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("slot.lock");
        let holders = Arc::new(AtomicU32::new(0));
        let overlaps = Arc::new(AtomicU32::new(0));
        let barrier = Arc::new(Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                // Separate handles, as separate relay processes would have
                let lock = SlotLock::new(&path).unwrap();
                let holders = holders.clone();
                let overlaps = overlaps.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    let _guard = lock.acquire().unwrap();
                    if holders.fetch_add(1, Ordering::SeqCst) != 0 {
                        overlaps.fetch_add(1, Ordering::SeqCst);
                    }
                    std::thread::sleep(Duration::from_millis(5));
                    holders.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }
}
