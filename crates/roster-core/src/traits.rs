//! Seams between the pipeline and its collaborators.
//!
//! - [`RecordStore`] - key-value tables with an upstream-id secondary index
//! - [`RosterSource`] - the upstream roster API
//!
//! The sync pipeline is generic over these so it can run against PostgreSQL,
//! the in-memory store, or test doubles.

use async_trait::async_trait;

use crate::error::AppError;
use crate::models::{Record, SchoolRoster, Table, UpstreamSchool};

/// A set of flat tables keyed by `id`.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Writes up to [`crate::config::MAX_BATCH_SIZE`] records atomically.
    ///
    /// Existing records with the same `id` are overwritten.
    async fn put_batch(&self, table: Table, records: &[Record]) -> Result<(), AppError>;

    /// Writes a single record.
    async fn put(&self, table: Table, record: &Record) -> Result<(), AppError> {
        self.put_batch(table, std::slice::from_ref(record)).await
    }

    /// Returns every record in `table`.
    async fn scan(&self, table: Table) -> Result<Vec<Record>, AppError>;

    /// Returns the records of `table` whose upstream id equals `upstream_id`.
    async fn query_by_upstream_id(
        &self,
        table: Table,
        upstream_id: &str,
    ) -> Result<Vec<Record>, AppError>;
}

/// The upstream roster API.
#[async_trait]
pub trait RosterSource: Send + Sync {
    /// Lists every school visible to the configured token.
    async fn list_schools(&self) -> Result<Vec<UpstreamSchool>, AppError>;

    /// Fetches a single school by upstream id.
    async fn fetch_school(&self, upstream_id: &str) -> Result<UpstreamSchool, AppError>;

    /// Fetches and filters the roster of a school.
    ///
    /// Page failures end pagination early and are reported in
    /// [`SchoolRoster::fetch_errors`] rather than as an `Err`.
    async fn fetch_school_roster(&self, upstream_id: &str) -> SchoolRoster;
}
