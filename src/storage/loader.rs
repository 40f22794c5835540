//! Batched persistence of mapped records
//!
//! The loader is the single owner of the write path. Records are buffered into
//! batches of `batch_size` and each batch is committed in one transaction on the
//! blocking pool. A rejected batch is rolled back and, with failure isolation
//! on, retried record by record so only the offending records are lost.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::metrics::{IngestEvent, SharedReporter};
use crate::parser::MappedRecord;
use crate::storage::repository::SharedRecordStore;
use crate::utils::error::StoreError;

/// Write-side tallies of one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub written: u64,
    pub failed: u64,
    /// Buffered records dropped on cancellation
    pub discarded: u64,
    pub batches_committed: u64,
    pub batches_failed: u64,
}

/// Fixed-size batch writer
pub struct BatchLoader {
    store: SharedRecordStore,
    reporter: SharedReporter,
    batch_size: usize,
    isolate_failures: bool,
    buffer: Vec<MappedRecord>,
    next_batch: u64,
    stats: LoadStats,
}

impl BatchLoader {
    pub fn new(store: SharedRecordStore, batch_size: usize, reporter: SharedReporter) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            store,
            reporter,
            batch_size,
            isolate_failures: true,
            buffer: Vec::with_capacity(batch_size),
            next_batch: 0,
            stats: LoadStats::default(),
        }
    }

    /// Retry records of a rejected batch one at a time
    pub fn with_isolation(mut self, isolate_failures: bool) -> Self {
        self.isolate_failures = isolate_failures;
        self
    }

    pub fn stats(&self) -> LoadStats {
        self.stats
    }

    /// Records buffered but not yet written
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Buffer a record, writing the batch once it is full
    ///
    /// # Errors
    ///
    /// Only a store-unavailable error is returned; batch-level failures are
    /// tallied and reported.
    pub async fn push(&mut self, record: MappedRecord) -> Result<(), StoreError> {
        self.buffer.push(record);
        if self.buffer.len() >= self.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    /// Write whatever is buffered
    pub async fn flush(&mut self) -> Result<(), StoreError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let records = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.batch_size));
        let batch = self.next_batch;
        self.next_batch += 1;

        let store = self.store.clone();
        let (records, result) = tokio::task::spawn_blocking(move || {
            let result = store.write_batch(&records);
            (records, result)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("write task failed: {e}")))?;

        match result {
            Ok(()) => {
                self.stats.written += records.len() as u64;
                self.stats.batches_committed += 1;
                self.reporter.report(IngestEvent::BatchCommitted {
                    batch,
                    records: records.len(),
                    written_total: self.stats.written,
                });
                Ok(())
            }
            Err(e) if e.is_unavailable() => Err(e),
            Err(e) => {
                self.stats.batches_failed += 1;
                let error = e.to_string();
                self.reporter.report(IngestEvent::BatchFailed {
                    batch,
                    records: records.len(),
                    error: &error,
                });

                if self.isolate_failures {
                    self.write_individually(records).await
                } else {
                    for record in &records {
                        self.reporter.report(IngestEvent::RecordWriteFailed {
                            id: record.id(),
                            error: &error,
                        });
                    }
                    self.stats.failed += records.len() as u64;
                    Ok(())
                }
            }
        }
    }

    async fn write_individually(&mut self, records: Vec<MappedRecord>) -> Result<(), StoreError> {
        let store = self.store.clone();
        let (records, results) = tokio::task::spawn_blocking(move || {
            let results: Vec<Result<(), StoreError>> = records
                .iter()
                .map(|record| store.write_batch(std::slice::from_ref(record)))
                .collect();
            (records, results)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("write task failed: {e}")))?;

        for (record, result) in records.iter().zip(results) {
            match result {
                Ok(()) => self.stats.written += 1,
                Err(e) if e.is_unavailable() => return Err(e),
                Err(e) => {
                    self.stats.failed += 1;
                    self.reporter.report(IngestEvent::RecordWriteFailed {
                        id: record.id(),
                        error: &e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Drop the buffered records without writing them
    pub fn discard(&mut self) -> usize {
        let dropped = self.buffer.len();
        self.buffer.clear();
        self.stats.discarded += dropped as u64;
        if dropped > 0 {
            tracing::warn!(records = dropped, "Discarded partial batch");
        }
        dropped
    }

    /// Consume records until the channel closes
    ///
    /// After `cancel` fires nothing further is written; records still arriving
    /// from in-flight fetches are buffered and discarded with the partial batch.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<MappedRecord>,
        cancel: CancellationToken,
    ) -> Result<LoadStats, StoreError> {
        while let Some(record) = rx.recv().await {
            if cancel.is_cancelled() {
                self.buffer.push(record);
                continue;
            }
            self.push(record).await?;
        }

        if cancel.is_cancelled() {
            self.discard();
        } else {
            self.flush().await?;
        }

        tracing::debug!(
            written = self.stats.written,
            failed = self.stats.failed,
            batches = self.stats.batches_committed,
            "Loader finished"
        );
        Ok(self.stats)
    }
}
