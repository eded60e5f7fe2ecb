//! Record store for PostgreSQL.
//!
//! Each [`Table`] maps to one PostgreSQL table holding `(id, upstream_id, item)`
//! rows, with a secondary index on `upstream_id`.

use async_trait::async_trait;
use roster_core::config::MAX_BATCH_SIZE;
use roster_core::error::AppError;
use roster_core::models::{Record, Table};
use roster_core::traits::RecordStore;
use sqlx::types::Json;
use sqlx::{PgPool, Pool, Postgres, QueryBuilder};
use tracing::debug;

/// Schema for every record table. Idempotent.
pub const SCHEMA_SQL: &str = include_str!("../migrations/0001_roster_tables.sql");

/// Column list for SELECT queries. Must remain a const literal to ensure SQL safety
/// since format!() bypasses sqlx compile-time validation.
const RECORD_COLUMNS: &str = "id, upstream_id, item";

/// PostgreSQL table backing `table`.
pub fn table_name(table: Table) -> &'static str {
    match table {
        Table::School => "schools",
        Table::Classroom => "classrooms",
        Table::ClassroomYearLevel => "classroom_year_levels",
        Table::ClassroomLearningArea => "classroom_learning_areas",
        Table::User => "users",
        Table::ClassroomTeacher => "classroom_teachers",
        Table::Student => "students",
        Table::SchoolStudent => "school_students",
        Table::ClassroomStudent => "classroom_students",
        Table::Country => "countries",
        Table::State => "states",
        Table::LearningArea => "learning_areas",
        Table::YearLevel => "year_levels",
    }
}

/// [`RecordStore`] backed by a PostgreSQL pool.
///
/// # Examples
///
/// ```no_run
/// use sqlx::postgres::PgPoolOptions;
/// use roster_db::PgRecordStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = PgPoolOptions::new()
///     .max_connections(5)
///     .connect("postgresql://localhost/roster")
///     .await?;
///
/// let store = PgRecordStore::new(pool);
/// store.ensure_schema().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PgRecordStore {
    pool: Pool<Postgres>,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates any missing record tables and indexes.
    pub async fn ensure_schema(&self) -> Result<(), AppError> {
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;
        Ok(())
    }

    /// Number of records per table.
    pub async fn table_counts(&self) -> Result<Vec<(Table, i64)>, AppError> {
        let mut counts = Vec::with_capacity(Table::ALL.len());
        for table in Table::ALL {
            let query = format!("SELECT COUNT(*) FROM {}", table_name(table));
            let (count,): (i64,) = sqlx::query_as(&query)
                .fetch_one(&self.pool)
                .await
                .map_err(AppError::DatabaseError)?;
            counts.push((table, count));
        }
        Ok(counts)
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    /// Upserts up to [`MAX_BATCH_SIZE`] records in one statement.
    async fn put_batch(&self, table: Table, records: &[Record]) -> Result<(), AppError> {
        if records.is_empty() {
            return Ok(());
        }
        if records.len() > MAX_BATCH_SIZE {
            return Err(AppError::Store(format!(
                "batch of {} exceeds the limit of {}",
                records.len(),
                MAX_BATCH_SIZE
            )));
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "INSERT INTO {} (id, upstream_id, item) ",
            table_name(table)
        ));
        builder.push_values(records, |mut row, record| {
            row.push_bind(&record.id)
                .push_bind(&record.upstream_id)
                .push_bind(Json(&record.item));
        });
        builder.push(
            " ON CONFLICT (id) DO UPDATE SET \
             upstream_id = EXCLUDED.upstream_id, \
             item = EXCLUDED.item, \
             updated_at = NOW()",
        );

        builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;

        debug!("Upserted {} records into {}", records.len(), table_name(table));
        Ok(())
    }

    async fn scan(&self, table: Table) -> Result<Vec<Record>, AppError> {
        let query = format!(
            "SELECT {} FROM {} ORDER BY created_at, id",
            RECORD_COLUMNS,
            table_name(table)
        );
        let rows = sqlx::query_as::<_, RecordRow>(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;

        Ok(rows.into_iter().map(Record::from).collect())
    }

    async fn query_by_upstream_id(
        &self,
        table: Table,
        upstream_id: &str,
    ) -> Result<Vec<Record>, AppError> {
        let query = format!(
            "SELECT {} FROM {} WHERE upstream_id = $1 ORDER BY created_at, id",
            RECORD_COLUMNS,
            table_name(table)
        );
        let rows = sqlx::query_as::<_, RecordRow>(&query)
            .bind(upstream_id)
            .fetch_all(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;

        Ok(rows.into_iter().map(Record::from).collect())
    }
}

/// Helper struct for deserializing record rows
#[derive(sqlx::FromRow)]
struct RecordRow {
    id: String,
    upstream_id: Option<String>,
    item: Json<serde_json::Value>,
}

impl From<RecordRow> for Record {
    fn from(row: RecordRow) -> Self {
        Record {
            id: row.id,
            upstream_id: row.upstream_id,
            item: row.item.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_table_names_are_unique() {
        let names: HashSet<_> = Table::ALL.iter().map(|t| table_name(*t)).collect();
        assert_eq!(names.len(), Table::ALL.len());
    }

    #[test]
    fn test_schema_covers_every_table() {
        for table in Table::ALL {
            let name = table_name(table);
            assert!(
                SCHEMA_SQL.contains(&format!("CREATE TABLE IF NOT EXISTS {} (", name)),
                "missing table {}",
                name
            );
            assert!(
                SCHEMA_SQL.contains(&format!("ON {} (upstream_id)", name)),
                "missing upstream_id index on {}",
                name
            );
        }
    }

    #[test]
    fn test_record_row_conversion() {
        let row = RecordRow {
            id: "local-1".to_string(),
            upstream_id: Some("A5960542".to_string()),
            item: Json(serde_json::json!({ "schoolName": "Wonde ANZ Testing School" })),
        };
        let record = Record::from(row);
        assert_eq!(record.id, "local-1");
        assert_eq!(record.upstream_id.as_deref(), Some("A5960542"));
        assert_eq!(record.item["schoolName"], "Wonde ANZ Testing School");
    }
}
