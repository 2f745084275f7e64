//! Persistence for captured job records.
//!
//! The pipeline writes through the [`JobStore`] trait and never cares which
//! backend holds the records. Production uses Redis with a per-record TTL;
//! tests use the in-memory backend.

mod memory;
mod redis;

pub use memory::MemoryStore;
pub use self::redis::RedisStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::JobRecord;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Connection(String),
    #[error("store command failed: {0}")]
    Command(String),
    #[error("record {job_id} failed to serialize: {source}")]
    Serialize {
        job_id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A backend that holds captured records keyed by job id.
///
/// Writes never overwrite: the first capture of a job id wins and keeps its
/// expiry clock, so a record re-discovered before its TTL lapses is a no-op.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// True when a record for this job id is already stored.
    async fn exists(&self, job_id: &str) -> Result<bool, StoreError>;

    /// Writes one record with the given TTL. Returns `false` when a record
    /// for this id already exists; the existing record is left untouched.
    async fn set_with_ttl(
        &self,
        job_id: &str,
        record: &JobRecord,
        ttl_secs: u64,
    ) -> Result<bool, StoreError>;

    /// Writes every record whose id is not already stored, using the
    /// backend's configured TTL. Returns how many were newly written.
    async fn write_batch(&self, records: &[JobRecord]) -> Result<usize, StoreError>;

    /// All stored keys under this store's namespace.
    async fn list_keys(&self) -> Result<Vec<String>, StoreError>;

    /// Releases the backend connection.
    async fn disconnect(&self);
}
