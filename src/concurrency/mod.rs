mod slot_lock;

pub use slot_lock::{SlotLock, SlotLockGuard};
