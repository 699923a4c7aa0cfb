//! State store trait definition.

use async_trait::async_trait;

use crate::error::Result;

use super::lock::LockInfo;
use super::types::StackState;

/// Storage backend for stack state.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the state. Returns `None` if the stack was never applied.
    async fn load(&self) -> Result<Option<StackState>>;

    /// Saves the state.
    async fn save(&self, state: &StackState) -> Result<()>;

    /// Deletes the state and any lock.
    async fn delete(&self) -> Result<()>;

    /// Acquires the lock for `operation`. An empty `holder` uses a generated
    /// process identifier.
    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo>;

    /// Releases the lock if it is still held under `lock_id`.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Removes the lock whoever holds it.
    async fn force_unlock(&self) -> Result<Option<LockInfo>>;

    /// Current lock, if any (expired locks included).
    async fn lock_info(&self) -> Result<Option<LockInfo>>;

    /// Backend name used in logs.
    fn backend_type(&self) -> &'static str;
}
