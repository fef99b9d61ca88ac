
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// An enriched browsing history entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct HistoryRecord {
    pub id: i64,
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub visit_time: NaiveDateTime,
}

impl HistoryRecord {
    /// Text sent for embedding: the non-blank title and description joined by a space.
    ///
    /// Returns `None` when neither part has content.
    #[inline]
    pub fn embedding_text(&self) -> Option<String> {
        let parts: Vec<&str> = [self.title.as_deref(), self.description.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }

    /// Title to show for this record, falling back to its URL
    #[inline]
    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .map(str::trim)
            .filter(|title| !title.is_empty())
            .unwrap_or(&self.url)
    }
}

/// A history entry to insert; the database assigns the id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewHistoryRecord {
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub visit_time: NaiveDateTime,
}
