use anyhow::{Context, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::warn;

use super::{PendingCommand, SlotStore};
use crate::concurrency::SlotLock;
use crate::config::RelayStore;

/// Slot persisted as a JSON file. Every access holds the advisory lock, so
/// processes sharing the file still see each command at most once.
#[derive(Debug)]
pub struct FileSlot {
    path: PathBuf,
    lock: SlotLock,
}

impl FileSlot {
    pub fn new(path: impl Into<PathBuf>, lock_path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let lock_path: PathBuf = lock_path.into();
        Ok(Self {
            path,
            lock: SlotLock::new(lock_path)?,
        })
    }
}

impl SlotStore for FileSlot {
    fn put(&self, command: PendingCommand) -> Result<bool> {
        let _guard = self.lock.acquire()?;

        let replaced = self.path.exists();
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(&command)?)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        Ok(replaced)
    }

    fn take(&self) -> Result<Option<PendingCommand>> {
        let _guard = self.lock.acquire()?;

        let content = match fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", self.path.display()));
            }
        };

        // Clear before decoding: a corrupt slot is dropped, never handed out twice
        fs::remove_file(&self.path)
            .with_context(|| format!("Failed to clear {}", self.path.display()))?;

        match serde_json::from_slice(&content) {
            Ok(command) => Ok(Some(command)),
            Err(e) => {
                warn!("Discarding unreadable relay slot {}: {}", self.path.display(), e);
                Err(e).context("Relay slot file was corrupt")
            }
        }
    }

    fn kind(&self) -> RelayStore {
        RelayStore::File
    }
}

#[cfg(test)]
mod tests {
    use super::super::CommandRelay;
    use super::*;
    use chrono::Utc;
    use std::sync::{Arc, Barrier};

    fn slot(dir: &std::path::Path) -> FileSlot {
        FileSlot::new(dir.join("relay/slot.json"), dir.join("relay/slot.lock")).unwrap()
    }

    #[test]
    fn empty_file_slot_reads_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let slot = slot(tmp.path());
        assert!(slot.take().unwrap().is_none());
        assert!(slot.take().unwrap().is_none());
    }

    #[test]
    fn put_reports_overwrite() {
        let tmp = tempfile::tempdir().unwrap();
        let slot = slot(tmp.path());
        let command = |code: &str| PendingCommand {
            code: code.to_string(),
            enqueued_at: Utc::now(),
        };

        assert!(!slot.put(command("one();")).unwrap());
        assert!(slot.put(command("two();")).unwrap());
        assert_eq!(slot.take().unwrap().unwrap().code, "two();");
        assert!(slot.take().unwrap().is_none());
    }

    #[test]
    fn pending_command_survives_restart() {
        let tmp = tempfile::tempdir().unwrap();

        let before = CommandRelay::new(Box::new(slot(tmp.path())), 5);
        before.write("persist();").unwrap();
        drop(before);

        let after = CommandRelay::new(Box::new(slot(tmp.path())), 5);
        assert_eq!(after.read().unwrap().unwrap().code, "persist();");
        assert!(after.read().unwrap().is_none());
    }

    #[test]
    fn corrupt_slot_is_cleared_and_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let slot = slot(tmp.path());
        fs::write(tmp.path().join("relay/slot.json"), b"{not json").unwrap();

        assert!(slot.take().is_err());
        assert!(slot.take().unwrap().is_none());
    }

    #[test]
    fn relays_sharing_a_file_deliver_once() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = CommandRelay::new(Box::new(slot(tmp.path())), 5);
        writer.write("shared();").unwrap();

        let barrier = Arc::new(Barrier::new(6));
        let handles: Vec<_> = (0..6)
            .map(|_| {
                let relay = CommandRelay::new(Box::new(slot(tmp.path())), 5);
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    relay.read().unwrap()
                })
            })
            .collect();

        let delivered = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .count();
        assert_eq!(delivered, 1);
    }
}
