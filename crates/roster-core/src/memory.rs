//! In-memory [`RecordStore`] used for dry runs and tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::config::MAX_BATCH_SIZE;
use crate::error::AppError;
use crate::models::{Record, Table};
use crate::traits::RecordStore;

#[derive(Default)]
struct Inner {
    tables: HashMap<Table, BTreeMap<String, Record>>,
    /// Size of every accepted batch, per table, in write order.
    batches: HashMap<Table, Vec<usize>>,
    /// Number of further batches a table accepts before failing.
    fail_after: HashMap<Table, usize>,
    fail_scans: Vec<Table>,
}

/// Record store backed by ordered maps behind a mutex.
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, AppError> {
        self.inner
            .lock()
            .map_err(|_| AppError::Store("in-memory store lock poisoned".to_string()))
    }

    /// Makes `table` accept `batches` more batch writes, then fail every subsequent one.
    pub fn fail_after(&self, table: Table, batches: usize) {
        if let Ok(mut inner) = self.lock() {
            inner.fail_after.insert(table, batches);
        }
    }

    /// Makes every scan of `table` fail.
    pub fn fail_scans_of(&self, table: Table) {
        if let Ok(mut inner) = self.lock() {
            inner.fail_scans.push(table);
        }
    }

    /// Number of records currently held in `table`.
    pub fn count(&self, table: Table) -> usize {
        self.lock()
            .map(|inner| inner.tables.get(&table).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }

    /// Records in `table`, ordered by id.
    pub fn records(&self, table: Table) -> Vec<Record> {
        self.lock()
            .map(|inner| {
                inner
                    .tables
                    .get(&table)
                    .map(|rows| rows.values().cloned().collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Sizes of the batches accepted for `table`, in write order.
    pub fn batch_sizes(&self, table: Table) -> Vec<usize> {
        self.lock()
            .map(|inner| inner.batches.get(&table).cloned().unwrap_or_default())
            .unwrap_or_default()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn put_batch(&self, table: Table, records: &[Record]) -> Result<(), AppError> {
        if records.len() > MAX_BATCH_SIZE {
            return Err(AppError::Store(format!(
                "batch of {} exceeds the limit of {}",
                records.len(),
                MAX_BATCH_SIZE
            )));
        }

        let mut inner = self.lock()?;
        if let Some(remaining) = inner.fail_after.get_mut(&table) {
            if *remaining == 0 {
                return Err(AppError::Store(format!(
                    "injected write failure on {}",
                    table
                )));
            }
            *remaining -= 1;
        }

        let rows = inner.tables.entry(table).or_default();
        for record in records {
            rows.insert(record.id.clone(), record.clone());
        }
        inner.batches.entry(table).or_default().push(records.len());
        Ok(())
    }

    async fn scan(&self, table: Table) -> Result<Vec<Record>, AppError> {
        {
            let inner = self.lock()?;
            if inner.fail_scans.contains(&table) {
                return Err(AppError::Store(format!("injected scan failure on {}", table)));
            }
        }
        Ok(self.records(table))
    }

    async fn query_by_upstream_id(
        &self,
        table: Table,
        upstream_id: &str,
    ) -> Result<Vec<Record>, AppError> {
        let inner = self.lock()?;
        Ok(inner
            .tables
            .get(&table)
            .map(|rows| {
                rows.values()
                    .filter(|r| r.upstream_id.as_deref() == Some(upstream_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, upstream: Option<&str>) -> Record {
        Record {
            id: id.to_string(),
            upstream_id: upstream.map(str::to_string),
            item: json!({ "id": id }),
        }
    }

    #[tokio::test]
    async fn test_new_store_is_empty() {
        let store = InMemoryStore::new();
        assert_eq!(store.count(Table::School), 0);
        assert!(store.scan(Table::School).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_put_and_query_by_upstream_id() {
        let store = InMemoryStore::new();
        store
            .put_batch(
                Table::Student,
                &[record("a", Some("W1")), record("b", Some("W2"))],
            )
            .await
            .unwrap();

        let found = store.query_by_upstream_id(Table::Student, "W2").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "b");
        assert!(store
            .query_by_upstream_id(Table::User, "W2")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_put_overwrites_same_id() {
        let store = InMemoryStore::new();
        store.put(Table::School, &record("a", None)).await.unwrap();
        store.put(Table::School, &record("a", Some("W"))).await.unwrap();
        assert_eq!(store.count(Table::School), 1);
        assert_eq!(store.batch_sizes(Table::School), vec![1, 1]);
    }

    #[tokio::test]
    async fn test_oversized_batch_rejected() {
        let store = InMemoryStore::new();
        let records: Vec<_> = (0..26).map(|i| record(&i.to_string(), None)).collect();
        assert!(store.put_batch(Table::Student, &records).await.is_err());
        assert_eq!(store.count(Table::Student), 0);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let store = InMemoryStore::new();
        store.fail_after(Table::User, 1);
        assert!(store.put(Table::User, &record("a", None)).await.is_ok());
        assert!(store.put(Table::User, &record("b", None)).await.is_err());
        assert_eq!(store.count(Table::User), 1);

        store.fail_scans_of(Table::Country);
        assert!(store.scan(Table::Country).await.is_err());
    }
}
