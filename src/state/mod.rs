//! State management module.
//!
//! This module persists what a stack run realized: one record per resource,
//! with provider ids, outputs, input hashes and dependencies, plus a short
//! operation history and a lock against concurrent runs.

mod local;
mod lock;
mod store;
mod types;

pub use local::{LocalStateStore, STATE_DIR};
pub use lock::{generate_holder_id, LockInfo, LOCK_EXPIRY_SECS};
pub use store::StateStore;
pub use types::{HistoryEntry, ResourceRecord, StackOperation, StackState, STATE_VERSION};
