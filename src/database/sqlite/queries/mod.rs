
use super::models::*;
use anyhow::{Context, Result};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::debug;

/// SQLite caps bound parameters per statement; stay well below the limit
const MAX_IDS_PER_QUERY: usize = 500;

const SELECT_COLUMNS: &str = "SELECT id, url, title, description, visit_time FROM browsing_history";

pub struct HistoryQueries;

impl HistoryQueries {
    #[inline]
    pub async fn create(pool: &SqlitePool, record: NewHistoryRecord) -> Result<HistoryRecord> {
        let id = sqlx::query(
            "INSERT INTO browsing_history (url, title, description, visit_time) VALUES (?, ?, ?, ?)",
        )
        .bind(&record.url)
        .bind(&record.title)
        .bind(&record.description)
        .bind(record.visit_time)
        .execute(pool)
        .await
        .context("Failed to insert history record")?
        .last_insert_rowid();

        Self::get_by_id(pool, id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve inserted history record"))
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<HistoryRecord>> {
        let result = sqlx::query_as::<_, HistoryRecord>(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(id)
            .fetch_optional(pool)
            .await
            .context("Failed to get history record by id")?;

        Ok(result)
    }

    /// Fetch the records for `ids`; ids without a row are absent from the result
    #[inline]
    pub async fn get_by_ids(pool: &SqlitePool, ids: &[i64]) -> Result<Vec<HistoryRecord>> {
        let mut records = Vec::with_capacity(ids.len());

        for chunk in ids.chunks(MAX_IDS_PER_QUERY) {
            let mut builder: QueryBuilder<'_, Sqlite> =
                QueryBuilder::new(format!("{SELECT_COLUMNS} WHERE id IN ("));
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");

            let batch = builder
                .build_query_as::<HistoryRecord>()
                .fetch_all(pool)
                .await
                .context("Failed to get history records by id")?;
            records.extend(batch);
        }

        debug!(
            "Fetched {} of {} requested history records",
            records.len(),
            ids.len()
        );
        Ok(records)
    }

    /// All records in ascending id order
    #[inline]
    pub async fn list_all(pool: &SqlitePool) -> Result<Vec<HistoryRecord>> {
        let records =
            sqlx::query_as::<_, HistoryRecord>(&format!("{SELECT_COLUMNS} ORDER BY id ASC"))
                .fetch_all(pool)
                .await
                .context("Failed to list history records")?;

        Ok(records)
    }

    #[inline]
    pub async fn count(pool: &SqlitePool) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM browsing_history")
            .fetch_one(pool)
            .await
            .context("Failed to count history records")?;

        Ok(count)
    }

    #[inline]
    pub async fn delete(pool: &SqlitePool, id: i64) -> Result<bool> {
        let rows = sqlx::query("DELETE FROM browsing_history WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to delete history record")?
            .rows_affected();

        Ok(rows > 0)
    }
}
