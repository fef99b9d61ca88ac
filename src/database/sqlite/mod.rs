use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use tracing::{debug, info};


pub mod models;
pub mod queries;

pub use models::*;
pub use queries::*;

pub type DbPool = Pool<Sqlite>;

const CREATE_HISTORY_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS browsing_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        url TEXT NOT NULL,
        title TEXT,
        description TEXT,
        visit_time TEXT
    )
";

/// The enriched browsing history store produced by the extraction and enrichment stages
#[derive(Debug, Clone)]
pub struct HistoryDatabase {
    pool: DbPool,
}

impl HistoryDatabase {
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .context("Failed to create database connection pool")?;

        let database = Self { pool };
        database.ensure_schema().await?;

        Ok(database)
    }

    /// In-memory database, private to this handle
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new().in_memory(true);

        // One connection: every in-memory connection would otherwise be its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("Failed to create in-memory database")?;

        let database = Self { pool };
        database.ensure_schema().await?;

        Ok(database)
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Create the history table if missing and add the `description` column to
    /// databases written before enrichment ran
    pub async fn ensure_schema(&self) -> Result<()> {
        info!("Ensuring browsing history schema");

        sqlx::query(CREATE_HISTORY_TABLE)
            .execute(&self.pool)
            .await
            .context("Failed to create browsing_history table")?;

        let has_description: Option<String> = sqlx::query_scalar(
            "SELECT name FROM pragma_table_info('browsing_history') WHERE name = 'description'",
        )
        .fetch_optional(&self.pool)
        .await
        .context("Failed to inspect browsing_history columns")?;

        if has_description.is_none() {
            info!("Adding description column to browsing_history");
            sqlx::query("ALTER TABLE browsing_history ADD COLUMN description TEXT")
                .execute(&self.pool)
                .await
                .context("Failed to add description column")?;
        }

        debug!("Browsing history schema ready");
        Ok(())
    }

    pub async fn insert_record(&self, record: &NewHistoryRecord) -> Result<HistoryRecord> {
        HistoryQueries::create(&self.pool, record.clone()).await
    }

    pub async fn get_record(&self, id: i64) -> Result<Option<HistoryRecord>> {
        HistoryQueries::get_by_id(&self.pool, id).await
    }

    pub async fn get_records(&self, ids: &[i64]) -> Result<Vec<HistoryRecord>> {
        HistoryQueries::get_by_ids(&self.pool, ids).await
    }

    pub async fn list_records(&self) -> Result<Vec<HistoryRecord>> {
        HistoryQueries::list_all(&self.pool).await
    }

    pub async fn count_records(&self) -> Result<i64> {
        HistoryQueries::count(&self.pool).await
    }

    pub async fn delete_record(&self, id: i64) -> Result<bool> {
        HistoryQueries::delete(&self.pool, id).await
    }
}
