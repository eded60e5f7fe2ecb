//! Batch Persistence Engine.
//!
//! Writes rows of one entity type in chunks of at most
//! [`MAX_BATCH_SIZE`](crate::config::MAX_BATCH_SIZE), one chunk at a time.
//! The first failing chunk stops the run; chunks already written stay written.

use std::time::Instant;

use serde::Serialize;
use tracing::{debug, error, info};

use crate::config::MAX_BATCH_SIZE;
use crate::error::AppError;
use crate::models::{Entity, Record, Table};
use crate::traits::RecordStore;

/// Timing of one chunk write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchTiming {
    pub size: usize,
    pub elapsed_ms: u64,
}

/// Result of persisting one entity type.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub table: Table,
    /// Records handed to the engine.
    pub attempted: usize,
    /// Records committed before the first failure (or all of them).
    pub succeeded: usize,
    pub failed: bool,
    pub message: String,
    /// One entry per chunk that was written successfully.
    pub batches: Vec<BatchTiming>,
}

impl BatchOutcome {
    fn empty(table: Table) -> Self {
        Self {
            table,
            attempted: 0,
            succeeded: 0,
            failed: false,
            message: "no records".to_string(),
            batches: Vec::new(),
        }
    }

    /// Converts a failed outcome into `AppError::Persistence`.
    pub fn into_result(self) -> Result<Self, AppError> {
        if self.failed {
            Err(AppError::Persistence {
                table: self.table,
                written: self.succeeded,
                message: self.message,
            })
        } else {
            Ok(self)
        }
    }
}

/// Number of chunk writes needed for `len` records.
pub fn batch_count(len: usize, batch_size: usize) -> usize {
    len.div_ceil(batch_size.clamp(1, MAX_BATCH_SIZE))
}

/// Persists `rows` into their entity table.
///
/// `batch_size` is clamped to `1..=25`. Never returns `Err`: failures are
/// reported through [`BatchOutcome::failed`] so callers decide whether they
/// are fatal.
pub async fn batch_persist<S, T>(store: &S, rows: &[T], batch_size: usize) -> BatchOutcome
where
    S: RecordStore + ?Sized,
    T: Entity,
{
    let table = T::TABLE;
    if rows.is_empty() {
        debug!("{}: nothing to write", table);
        return BatchOutcome::empty(table);
    }

    let size = batch_size.clamp(1, MAX_BATCH_SIZE);
    let total_batches = batch_count(rows.len(), size);
    let mut outcome = BatchOutcome {
        table,
        attempted: rows.len(),
        succeeded: 0,
        failed: false,
        message: String::new(),
        batches: Vec::with_capacity(total_batches),
    };

    for (index, chunk) in rows.chunks(size).enumerate() {
        let encoded: Result<Vec<Record>, AppError> = chunk.iter().map(T::to_record).collect();
        let records = match encoded {
            Ok(records) => records,
            Err(e) => {
                error!(
                    "{}: batch {}/{} could not be encoded: {}",
                    table,
                    index + 1,
                    total_batches,
                    e
                );
                outcome.failed = true;
                outcome.message = e.to_string();
                return outcome;
            }
        };

        let started = Instant::now();
        if let Err(e) = store.put_batch(table, &records).await {
            error!(
                "error saving to {}: batch {}/{} failed after {} records: {}",
                table,
                index + 1,
                total_batches,
                outcome.succeeded,
                e
            );
            outcome.failed = true;
            outcome.message = e.to_string();
            return outcome;
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        debug!(
            "{}: batch {}/{} wrote {} records in {} ms",
            table,
            index + 1,
            total_batches,
            records.len(),
            elapsed_ms
        );
        outcome.succeeded += records.len();
        outcome.batches.push(BatchTiming {
            size: records.len(),
            elapsed_ms,
        });
    }

    outcome.message = format!("{} records saved", outcome.succeeded);
    info!(
        "{}: {} records saved in {} batches",
        table, outcome.succeeded, total_batches
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use crate::models::ClassroomStudentRow;

    fn rows(n: usize) -> Vec<ClassroomStudentRow> {
        (0..n)
            .map(|i| ClassroomStudentRow {
                id: format!("cs-{:03}", i),
                classroom_id: "c-1".to_string(),
                student_id: format!("s-{}", i),
            })
            .collect()
    }

    #[test]
    fn test_batch_count() {
        assert_eq!(batch_count(0, 25), 0);
        assert_eq!(batch_count(1, 25), 1);
        assert_eq!(batch_count(25, 25), 1);
        assert_eq!(batch_count(26, 25), 2);
        assert_eq!(batch_count(26, 100), 2);
    }

    #[tokio::test]
    async fn test_empty_input_writes_nothing() {
        let store = InMemoryStore::new();
        let outcome = batch_persist(&store, &rows(0), 25).await;
        assert!(!outcome.failed);
        assert_eq!(outcome.succeeded, 0);
        assert!(store.batch_sizes(Table::ClassroomStudent).is_empty());
    }

    #[tokio::test]
    async fn test_chunk_sizes() {
        for (n, expected) in [
            (1, vec![1]),
            (25, vec![25]),
            (50, vec![25, 25]),
            (60, vec![25, 25, 10]),
        ] {
            let store = InMemoryStore::new();
            let outcome = batch_persist(&store, &rows(n), 25).await;
            assert!(!outcome.failed);
            assert_eq!(outcome.succeeded, n);
            assert_eq!(outcome.batches.len(), expected.len());
            assert_eq!(store.batch_sizes(Table::ClassroomStudent), expected);
            assert_eq!(store.count(Table::ClassroomStudent), n);
        }
    }

    #[tokio::test]
    async fn test_oversized_batch_size_is_clamped() {
        let store = InMemoryStore::new();
        let outcome = batch_persist(&store, &rows(30), 500).await;
        assert!(!outcome.failed);
        assert_eq!(store.batch_sizes(Table::ClassroomStudent), vec![25, 5]);
    }

    #[tokio::test]
    async fn test_failure_stops_remaining_chunks() {
        let store = InMemoryStore::new();
        store.fail_after(Table::ClassroomStudent, 1);

        let outcome = batch_persist(&store, &rows(70), 25).await;
        assert!(outcome.failed);
        assert_eq!(outcome.attempted, 70);
        assert_eq!(outcome.succeeded, 25);
        assert!(outcome.message.contains("injected"));
        assert_eq!(store.batch_sizes(Table::ClassroomStudent), vec![25]);
        assert_eq!(store.count(Table::ClassroomStudent), 25);

        let err = outcome.into_result().unwrap_err();
        assert!(matches!(
            err,
            AppError::Persistence {
                table: Table::ClassroomStudent,
                written: 25,
                ..
            }
        ));
    }
}
