//! Dedup and batch accumulation for processed jobs.
//!
//! The [`Tracker`] owns the per-process set of attempted job ids and the
//! batch of records awaiting a store write. The set grows monotonically and
//! is never persisted; cross-run dedup belongs to the store's TTL keys. The
//! batch flushes at a size threshold and at cycle end, and is discarded
//! outright when a cycle aborts, trading durability for forward progress.

use std::collections::HashSet;

use tracing::{error, info, warn};

use crate::models::{JobRecord, ProcessingOutcome};
use crate::store::JobStore;

/// Per-cycle counters for the summary line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    /// References the listing yielded this cycle.
    pub found: usize,
    pub captured: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl CycleStats {
    pub fn attempted(&self) -> usize {
        self.captured + self.skipped + self.failed
    }
}

pub struct Tracker {
    processed: HashSet<String>,
    batch: Vec<JobRecord>,
    threshold: usize,
    cycle: CycleStats,
}

impl Tracker {
    pub fn new(threshold: usize) -> Self {
        Self {
            processed: HashSet::new(),
            batch: Vec::new(),
            threshold,
            cycle: CycleStats::default(),
        }
    }

    /// Ids attempted during this process lifetime, every outcome included.
    pub fn processed(&self) -> &HashSet<String> {
        &self.processed
    }

    pub fn is_processed(&self, job_id: &str) -> bool {
        self.processed.contains(job_id)
    }

    pub fn processed_len(&self) -> usize {
        self.processed.len()
    }

    pub fn batch_len(&self) -> usize {
        self.batch.len()
    }

    /// Resets the cycle counters for a fresh traversal.
    pub fn begin_cycle(&mut self, found: usize) {
        self.cycle = CycleStats {
            found,
            ..CycleStats::default()
        };
    }

    pub fn cycle(&self) -> CycleStats {
        self.cycle
    }

    /// Folds one outcome into the tracker. Every outcome marks its id
    /// processed; only a valid Success record enters the batch. A Success
    /// carrying an invalid record is downgraded to a failure so it can never
    /// be persisted or counted as captured.
    pub fn record(&mut self, outcome: ProcessingOutcome) {
        self.processed.insert(outcome.job_id().to_string());
        match outcome {
            ProcessingOutcome::Success(record) => {
                if record.is_valid() {
                    self.cycle.captured += 1;
                    self.batch.push(record);
                } else {
                    warn!(
                        job = %record.job_id,
                        missing = ?record.missing_fields(),
                        "capture produced an incomplete record, not batching"
                    );
                    self.cycle.failed += 1;
                }
            }
            ProcessingOutcome::Skipped { .. } => self.cycle.skipped += 1,
            ProcessingOutcome::Failed { .. } => self.cycle.failed += 1,
        }
    }

    /// Flushes when the batch has reached the threshold. Returns whether a
    /// flush happened.
    pub async fn flush_if_full(&mut self, store: &dyn JobStore) -> bool {
        if self.batch.len() < self.threshold {
            return false;
        }
        self.flush(store).await;
        true
    }

    /// Writes the pending batch and clears it. A store failure is logged and
    /// the batch cleared anyway; records lost here will be re-listed by the
    /// site once their absence from the store makes them look new again.
    pub async fn flush(&mut self, store: &dyn JobStore) {
        if self.batch.is_empty() {
            return;
        }
        let records = std::mem::take(&mut self.batch);
        match store.write_batch(&records).await {
            Ok(written) => {
                info!(
                    written,
                    skipped = records.len() - written,
                    "batch flushed to store"
                );
            }
            Err(err) => {
                error!(error = %err, dropped = records.len(), "batch flush failed, dropping batch");
            }
        }
    }

    /// Drops the pending batch without a store write. Called when a cycle
    /// aborts and the records' extraction context is suspect.
    pub fn discard(&mut self) {
        if !self.batch.is_empty() {
            warn!(dropped = self.batch.len(), "discarding unflushed batch");
            self.batch.clear();
        }
    }
}
