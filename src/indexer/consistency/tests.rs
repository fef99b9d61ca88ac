use super::*;
use anyhow::Result;
use chrono::NaiveDate;

use crate::database::sqlite::NewHistoryRecord;
use crate::database::vector_store::EmbeddingRecord;

async fn insert(database: &HistoryDatabase, title: Option<&str>) -> Result<i64> {
    let record = database
        .insert_record(&NewHistoryRecord {
            url: format!("https://example.com/{}", title.unwrap_or("untitled")),
            title: title.map(str::to_string),
            description: None,
            visit_time: NaiveDate::from_ymd_opt(2024, 7, 4)
                .and_then(|d| d.and_hms_opt(18, 0, 0))
                .expect("valid timestamp"),
        })
        .await?;
    Ok(record.id)
}

fn index_of(ids: &[i64]) -> VectorIndex {
    VectorIndex::build(
        ids.iter()
            .map(|&id| EmbeddingRecord {
                id,
                vector: vec![1.0, id as f32],
            })
            .collect(),
    )
    .expect("index should build")
}

#[test]
fn consistent_report_summary() {
    let report = ConsistencyReport {
        indexed: 10,
        history_records: 12,
        missing_metadata: vec![],
        unindexed: 2,
        is_consistent: true,
    };

    assert!(report.summary().contains("Index is consistent"));
    assert!(report.summary().contains("2 awaiting embedding"));
    assert!(report.needs_build());
}

#[test]
fn inconsistent_report_summary() {
    let report = ConsistencyReport {
        indexed: 10,
        history_records: 8,
        missing_metadata: vec![4, 9],
        unindexed: 0,
        is_consistent: false,
    };

    assert!(report.summary().contains("2 indexed ids missing"));
    assert!(!report.needs_build());
}

#[tokio::test]
async fn no_index_counts_every_embeddable_record() -> Result<()> {
    let database = HistoryDatabase::in_memory().await?;
    insert(&database, Some("Rust book")).await?;
    insert(&database, Some("Pizza recipe")).await?;
    insert(&database, None).await?;

    let report = ConsistencyValidator::new(&database).validate(None).await?;

    assert_eq!(report.indexed, 0);
    assert_eq!(report.history_records, 3);
    assert_eq!(report.unindexed, 2);
    assert!(report.is_consistent);
    Ok(())
}

#[tokio::test]
async fn detects_indexed_ids_without_history() -> Result<()> {
    let database = HistoryDatabase::in_memory().await?;
    let kept = insert(&database, Some("Rust book")).await?;
    let removed = insert(&database, Some("Pizza recipe")).await?;
    let index = index_of(&[kept, removed]);
    database.delete_record(removed).await?;

    let report = ConsistencyValidator::new(&database)
        .validate(Some(&index))
        .await?;

    assert!(!report.is_consistent);
    assert_eq!(report.missing_metadata, vec![removed]);
    assert_eq!(report.unindexed, 0);
    Ok(())
}

#[tokio::test]
async fn reports_records_awaiting_embedding() -> Result<()> {
    let database = HistoryDatabase::in_memory().await?;
    let first = insert(&database, Some("Rust book")).await?;
    insert(&database, Some("Python tutorial")).await?;
    let index = index_of(&[first]);

    let report = ConsistencyValidator::new(&database)
        .validate(Some(&index))
        .await?;

    assert!(report.is_consistent);
    assert_eq!(report.indexed, 1);
    assert_eq!(report.unindexed, 1);
    Ok(())
}
