//! Roster DB - PostgreSQL persistence for roster records
//!
//! [`PgRecordStore`] implements [`roster_core::RecordStore`] over one JSONB
//! table per record kind.

pub mod repository;

pub use repository::{table_name, PgRecordStore, SCHEMA_SQL};
