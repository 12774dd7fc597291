//! Single-slot command relay.
//!
//! Holds at most one pending command and hands it to at most one reader:
//! `Empty -> write -> Pending -> read -> Empty`. A write while pending replaces
//! the previous command; only the newest one matters to a live stream.
//!
//! Durability is a store choice. [`MemorySlot`] lives and dies with the
//! process and assumes one hot instance. [`FileSlot`] survives restarts on the
//! same host. Neither replicates across hosts.

mod file_slot;

pub use file_slot::FileSlot;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{Config, RelayStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCommand {
    pub code: String,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Command must be at least {min} characters")]
    TooShort { min: usize },

    #[error("Relay storage error: {0}")]
    Storage(String),
}

impl From<anyhow::Error> for RelayError {
    fn from(e: anyhow::Error) -> Self {
        RelayError::Storage(format!("{:#}", e))
    }
}

/// Backing storage for the slot. Both operations must be atomic with
/// respect to each other for every caller that shares the store.
pub trait SlotStore: Send + Sync {
    /// Replace the slot contents. Returns whether a pending command was overwritten.
    fn put(&self, command: PendingCommand) -> Result<bool>;

    /// Remove and return the pending command, if any.
    fn take(&self) -> Result<Option<PendingCommand>>;

    fn kind(&self) -> RelayStore;
}

/// Process-local slot. The mutex covers the whole check-and-clear.
#[derive(Debug, Default)]
pub struct MemorySlot {
    slot: Mutex<Option<PendingCommand>>,
}

impl MemorySlot {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SlotStore for MemorySlot {
    fn put(&self, command: PendingCommand) -> Result<bool> {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        Ok(slot.replace(command).is_some())
    }

    fn take(&self) -> Result<Option<PendingCommand>> {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        Ok(slot.take())
    }

    fn kind(&self) -> RelayStore {
        RelayStore::Memory
    }
}

pub struct CommandRelay {
    store: Box<dyn SlotStore>,
    min_code_length: usize,
}

impl CommandRelay {
    pub fn new(store: Box<dyn SlotStore>, min_code_length: usize) -> Self {
        Self {
            store,
            min_code_length,
        }
    }

    pub fn in_memory(min_code_length: usize) -> Self {
        Self::new(Box::new(MemorySlot::new()), min_code_length)
    }

    /// Build the relay with the store selected by `relay.store`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let store: Box<dyn SlotStore> = match config.relay.store {
            RelayStore::Memory => Box::new(MemorySlot::new()),
            RelayStore::File => {
                config.paths.ensure_state_dir()?;
                Box::new(FileSlot::new(
                    config.paths.relay_slot_file(),
                    config.paths.relay_lock_file(),
                )?)
            }
        };

        info!(
            "Command relay using {} store (min length {})",
            store.kind(),
            config.relay.min_code_length
        );

        Ok(Self::new(store, config.relay.min_code_length))
    }

    pub fn store_kind(&self) -> RelayStore {
        self.store.kind()
    }

    pub fn min_code_length(&self) -> usize {
        self.min_code_length
    }

    /// Queue `code`, replacing any pending command.
    pub fn write(&self, code: &str) -> Result<(), RelayError> {
        let length = code.trim().chars().count();
        if length == 0 || length < self.min_code_length {
            debug!("Rejected command of {} characters", length);
            return Err(RelayError::TooShort {
                min: self.min_code_length.max(1),
            });
        }

        let replaced = self.store.put(PendingCommand {
            code: code.to_string(),
            enqueued_at: Utc::now(),
        })?;

        if replaced {
            info!("Command queued ({} chars), replaced an unread command", length);
        } else {
            info!("Command queued ({} chars)", length);
        }

        Ok(())
    }

    /// Hand out the pending command and clear the slot in the same step.
    pub fn read(&self) -> Result<Option<PendingCommand>, RelayError> {
        let command = self.store.take()?;
        if let Some(ref command) = command {
            info!(
                "Command dequeued (queued at {})",
                command.enqueued_at.to_rfc3339()
            );
        }
        Ok(command)
    }
}
