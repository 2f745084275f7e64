//! In-memory store backend.
//!
//! Single process, no TTL enforcement. Keys are bare job ids. Used by the
//! pipeline tests; `failing()` exercises the flush error path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::models::JobRecord;

use super::{JobStore, StoreError};

#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, String>>,
    write_calls: AtomicUsize,
    fail_writes: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose writes always fail.
    pub fn failing() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }

    /// How many times `write_batch` has been invoked.
    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn get(&self, job_id: &str) -> Option<String> {
        self.records.lock().await.get(job_id).cloned()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn exists(&self, job_id: &str) -> Result<bool, StoreError> {
        Ok(self.records.lock().await.contains_key(job_id))
    }

    async fn set_with_ttl(
        &self,
        job_id: &str,
        record: &JobRecord,
        _ttl_secs: u64,
    ) -> Result<bool, StoreError> {
        if self.fail_writes {
            return Err(StoreError::Command("writes disabled".into()));
        }
        let payload = serde_json::to_string(record).map_err(|source| StoreError::Serialize {
            job_id: job_id.to_string(),
            source,
        })?;
        let mut records = self.records.lock().await;
        if records.contains_key(job_id) {
            return Ok(false);
        }
        records.insert(job_id.to_string(), payload);
        Ok(true)
    }

    async fn write_batch(&self, records: &[JobRecord]) -> Result<usize, StoreError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes {
            return Err(StoreError::Command("writes disabled".into()));
        }
        let mut written = 0;
        for record in records {
            if self.set_with_ttl(&record.job_id, record, 0).await? {
                written += 1;
            }
        }
        Ok(written)
    }

    async fn list_keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.records.lock().await.keys().cloned().collect())
    }

    async fn disconnect(&self) {}
}
