// Vector store module
// Exact nearest-neighbor search over the embedding corpus


pub mod persistence;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::database::sqlite::{HistoryDatabase, HistoryRecord};
use crate::{RagError, Result};

/// Vector for one history record; `id` references [`HistoryRecord::id`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub id: i64,
    pub vector: Vec<f32>,
}

/// One nearest-neighbor match
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    pub id: i64,
    /// Squared Euclidean distance between the normalized vectors, in `[0, 4]`
    pub distance: f32,
    /// Insertion position within the index
    pub position: usize,
}

impl SearchHit {
    /// Cosine similarity recovered from the distance between unit vectors
    #[inline]
    pub fn similarity(&self) -> f32 {
        1.0 - self.distance / 2.0
    }
}

/// Immutable set of embeddings sharing one dimension.
///
/// Never empty and free of duplicate ids; rebuilt wholesale rather than patched.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    dimension: usize,
    ids: Vec<i64>,
    /// Vectors as supplied, row-major, `ids.len() * dimension` values
    vectors: Vec<f32>,
    /// L2-normalized copies of `vectors`, same layout
    unit_vectors: Vec<f32>,
    positions: HashMap<i64, usize>,
}

impl VectorIndex {
    #[inline]
    pub fn build(records: Vec<EmbeddingRecord>) -> Result<Self> {
        let Some(first) = records.first() else {
            return Err(RagError::EmptyCorpus);
        };
        let dimension = first.vector.len();
        if dimension == 0 {
            return Err(RagError::InvalidVector {
                id: first.id,
                reason: "vector has zero length".to_string(),
            });
        }

        let mut ids = Vec::with_capacity(records.len());
        let mut vectors = Vec::with_capacity(records.len() * dimension);
        let mut positions = HashMap::with_capacity(records.len());

        for record in records {
            if record.vector.len() != dimension {
                return Err(RagError::DimensionMismatch {
                    expected: dimension,
                    found: record.vector.len(),
                });
            }
            if record.vector.iter().any(|v| !v.is_finite()) {
                return Err(RagError::InvalidVector {
                    id: record.id,
                    reason: "vector contains non-finite values".to_string(),
                });
            }
            if positions.insert(record.id, ids.len()).is_some() {
                return Err(RagError::DuplicateId(record.id));
            }
            ids.push(record.id);
            vectors.extend_from_slice(&record.vector);
        }

        let unit_vectors = vectors
            .chunks_exact(dimension)
            .flat_map(normalized)
            .collect();

        debug!(
            "Built vector index with {} records of dimension {}",
            ids.len(),
            dimension
        );

        Ok(Self {
            dimension,
            ids,
            vectors,
            unit_vectors,
            positions,
        })
    }

    /// The `k` nearest records to `query`, nearest first.
    ///
    /// Equal distances keep insertion order.
    #[inline]
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if k < 1 || k > self.len() {
            return Err(RagError::InvalidK { k, size: self.len() });
        }
        if query.len() != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                found: query.len(),
            });
        }

        let query = normalized(query);
        let mut hits: Vec<SearchHit> = self
            .unit_vectors
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(position, vector)| SearchHit {
                id: self.ids[position],
                distance: squared_distance(&query, vector),
                position,
            })
            .collect();

        // Stable sort, so ties stay in insertion order
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(k);

        Ok(hits)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Ids in insertion order
    #[inline]
    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    #[inline]
    pub fn contains(&self, id: i64) -> bool {
        self.positions.contains_key(&id)
    }

    /// The vector stored for `id`, as originally supplied
    #[inline]
    pub fn vector(&self, id: i64) -> Option<&[f32]> {
        self.positions
            .get(&id)
            .map(|&position| self.vector_at(position))
    }

    /// Records in insertion order
    #[inline]
    pub fn records(&self) -> impl Iterator<Item = EmbeddingRecord> + '_ {
        self.ids
            .iter()
            .enumerate()
            .map(|(position, &id)| EmbeddingRecord {
                id,
                vector: self.vector_at(position).to_vec(),
            })
    }

    /// A new index with only the records whose id satisfies `keep`; `None` if none do
    #[inline]
    pub fn retain(&self, keep: impl Fn(i64) -> bool) -> Result<Option<Self>> {
        let records: Vec<EmbeddingRecord> =
            self.records().filter(|record| keep(record.id)).collect();
        if records.is_empty() {
            return Ok(None);
        }
        Self::build(records).map(Some)
    }

    pub(crate) fn raw_vectors(&self) -> &[f32] {
        &self.vectors
    }

    fn vector_at(&self, position: usize) -> &[f32] {
        let start = position * self.dimension;
        &self.vectors[start..start + self.dimension]
    }
}

/// `vector / |vector|`, or all zeros for a zero vector
fn normalized(vector: &[f32]) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return vec![0.0; vector.len()];
    }
    vector.iter().map(|v| v / norm).collect()
}

fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// A loaded index together with the history records it was built from
#[derive(Debug, Clone)]
pub struct VectorStore {
    index: VectorIndex,
    metadata: HashMap<i64, HistoryRecord>,
}

impl VectorStore {
    /// Pair `index` with metadata; records whose id is not indexed are dropped
    #[inline]
    pub fn new(index: VectorIndex, records: impl IntoIterator<Item = HistoryRecord>) -> Self {
        let metadata: HashMap<i64, HistoryRecord> = records
            .into_iter()
            .filter(|record| index.contains(record.id))
            .map(|record| (record.id, record))
            .collect();

        if metadata.len() != index.len() {
            warn!(
                "Vector index has {} records but metadata was found for only {}",
                index.len(),
                metadata.len()
            );
        }

        Self { index, metadata }
    }

    /// Load the persisted index at `index_path` and join its metadata from `database`
    #[inline]
    pub async fn open(index_path: &Path, database: &HistoryDatabase) -> Result<Self> {
        let index = persistence::load(index_path).await?;
        let records = database.get_records(index.ids()).await?;

        info!(
            "Opened vector store with {} records (dimension {})",
            index.len(),
            index.dimension()
        );
        Ok(Self::new(index, records))
    }

    #[inline]
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        self.index.search(query, k)
    }

    #[inline]
    pub fn lookup(&self, id: i64) -> Option<&HistoryRecord> {
        self.metadata.get(&id)
    }

    #[inline]
    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

/// Holds the current store snapshot; rebuilds swap in a new snapshot whole
#[derive(Debug, Clone)]
pub struct SharedStore {
    current: Arc<RwLock<Arc<VectorStore>>>,
}

impl SharedStore {
    #[inline]
    pub fn new(store: VectorStore) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(store))),
        }
    }

    /// The snapshot to run one query against
    #[inline]
    pub async fn snapshot(&self) -> Arc<VectorStore> {
        Arc::clone(&*self.current.read().await)
    }

    /// Publish `store`; queries holding the previous snapshot are unaffected
    #[inline]
    pub async fn replace(&self, store: VectorStore) {
        let store = Arc::new(store);
        info!("Publishing vector store snapshot with {} records", store.len());
        *self.current.write().await = store;
    }
}
