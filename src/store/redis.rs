//! Redis-backed record store.
//!
//! Records live as JSON strings under `{prefix}{job_id}` with a TTL, so the
//! store self-prunes and a job re-listed after expiry is captured fresh.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::models::JobRecord;

use super::{JobStore, StoreError};

pub struct RedisStore {
    conn: ConnectionManager,
    key_prefix: String,
    ttl_secs: u64,
}

impl RedisStore {
    /// Connects and verifies the URL up front; the manager reconnects on its
    /// own after transient drops.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| StoreError::Connection(format!("invalid Redis URL: {}", e)))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Connection(format!("Redis connection failed: {}", e)))?;
        info!(prefix = %config.key_prefix, "connected to Redis");
        Ok(Self {
            conn,
            key_prefix: config.key_prefix.clone(),
            ttl_secs: config.record_ttl_secs,
        })
    }

    fn key(&self, job_id: &str) -> String {
        format!("{}{}", self.key_prefix, job_id)
    }

    fn encode(record: &JobRecord) -> Result<String, StoreError> {
        serde_json::to_string(record).map_err(|source| StoreError::Serialize {
            job_id: record.job_id.clone(),
            source,
        })
    }
}

#[async_trait]
impl JobStore for RedisStore {
    async fn exists(&self, job_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let found: bool = conn
            .exists(self.key(job_id))
            .await
            .map_err(|e| StoreError::Command(e.to_string()))?;
        Ok(found)
    }

    async fn set_with_ttl(
        &self,
        job_id: &str,
        record: &JobRecord,
        ttl_secs: u64,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let payload = Self::encode(record)?;
        // SET NX EX: the first capture wins and keeps its expiry clock.
        let written: Option<String> = redis::cmd("SET")
            .arg(self.key(job_id))
            .arg(payload)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Command(e.to_string()))?;
        Ok(written.is_some())
    }

    async fn write_batch(&self, records: &[JobRecord]) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for record in records {
            let payload = Self::encode(record)?;
            pipe.cmd("SET")
                .arg(self.key(&record.job_id))
                .arg(payload)
                .arg("NX")
                .arg("EX")
                .arg(self.ttl_secs);
        }
        let results: Vec<Option<String>> = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Command(e.to_string()))?;
        let written = results.iter().filter(|r| r.is_some()).count();
        debug!(
            written,
            skipped = records.len() - written,
            "batch written to Redis"
        );
        Ok(written)
    }

    async fn list_keys(&self) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn
            .keys(format!("{}*", self.key_prefix))
            .await
            .map_err(|e| StoreError::Command(e.to_string()))?;
        Ok(keys)
    }

    async fn disconnect(&self) {
        // ConnectionManager has no explicit quit; the multiplexed connection
        // closes once the last clone is dropped.
        debug!("Redis store released");
    }
}
