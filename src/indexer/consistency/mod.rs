// Consistency validation module
// Checks that the persisted index and the history database agree

#[cfg(test)]
mod tests;

use std::collections::HashSet;

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::Result;
use crate::database::sqlite::HistoryDatabase;
use crate::database::vector_store::VectorIndex;

/// Comparison of the vector index against the history database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyReport {
    /// Records in the vector index
    pub indexed: usize,
    /// Rows in the history database
    pub history_records: usize,
    /// Indexed ids with no history row; queries hitting them fail until a rebuild
    pub missing_metadata: Vec<i64>,
    /// History records with usable text that are not yet indexed
    pub unindexed: usize,
    pub is_consistent: bool,
}

impl ConsistencyReport {
    #[inline]
    pub fn summary(&self) -> String {
        if self.is_consistent {
            format!(
                "Index is consistent: {} of {} history records indexed, {} awaiting embedding",
                self.indexed, self.history_records, self.unindexed
            )
        } else {
            format!(
                "Index inconsistencies found: {} indexed ids missing from the history database, rebuild required",
                self.missing_metadata.len()
            )
        }
    }

    /// Whether a build would embed anything
    #[inline]
    pub fn needs_build(&self) -> bool {
        self.unindexed > 0
    }
}

pub struct ConsistencyValidator<'a> {
    database: &'a HistoryDatabase,
}

impl<'a> ConsistencyValidator<'a> {
    #[inline]
    pub fn new(database: &'a HistoryDatabase) -> Self {
        Self { database }
    }

    /// Compare `index` (absent when nothing has been built yet) against the database
    #[inline]
    pub async fn validate(&self, index: Option<&VectorIndex>) -> Result<ConsistencyReport> {
        info!("Validating index against history database");

        let records = self
            .database
            .list_records()
            .await
            .context("Failed to read browsing history")?;
        let history_ids: HashSet<i64> = records.iter().map(|record| record.id).collect();
        debug!("Found {} history records", history_ids.len());

        let (indexed, missing_metadata) = match index {
            Some(index) => {
                let missing: Vec<i64> = index
                    .ids()
                    .iter()
                    .copied()
                    .filter(|id| !history_ids.contains(id))
                    .collect();
                (index.len(), missing)
            }
            None => (0, Vec::new()),
        };

        let unindexed = records
            .iter()
            .filter(|record| !index.is_some_and(|index| index.contains(record.id)))
            .filter(|record| record.embedding_text().is_some())
            .count();

        if !missing_metadata.is_empty() {
            warn!(
                "{} indexed ids have no history record: {:?}",
                missing_metadata.len(),
                missing_metadata
            );
        }

        let report = ConsistencyReport {
            indexed,
            history_records: history_ids.len(),
            is_consistent: missing_metadata.is_empty(),
            missing_metadata,
            unindexed,
        };
        info!("{}", report.summary());
        Ok(report)
    }
}
