// Index persistence
// Binary layout, all integers little-endian:
//   magic "HRIX" | version u32 | dimension u32 | count u64
//   count * dimension f32 vector values, row-major
//   count i64 record ids


use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{EmbeddingRecord, VectorIndex};
use crate::{RagError, Result};

pub const MAGIC: [u8; 4] = *b"HRIX";
pub const FORMAT_VERSION: u32 = 1;
pub const HEADER_LEN: usize = 4 + 4 + 4 + 8;

/// Write `index` to `path`, replacing any previous file atomically.
///
/// The bytes go to a temporary sibling first and are renamed into place once
/// synced, so readers see either the old index or the new one.
#[inline]
pub async fn persist(index: &VectorIndex, path: &Path) -> Result<()> {
    let bytes = encode(index)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }

    let tmp_path = temporary_path(path);
    debug!("Writing index to temporary file {}", tmp_path.display());

    if let Err(e) = write_synced(&tmp_path, &bytes).await {
        discard(&tmp_path).await;
        return Err(e.into());
    }
    if let Err(e) = fs::rename(&tmp_path, path).await {
        discard(&tmp_path).await;
        return Err(e.into());
    }

    info!(
        "Persisted index with {} records ({} bytes) to {}",
        index.len(),
        bytes.len(),
        path.display()
    );
    Ok(())
}

/// Read the index at `path`; inconsistent or truncated files are rejected
#[inline]
pub async fn load(path: &Path) -> Result<VectorIndex> {
    let bytes = fs::read(path).await?;
    let index = decode(&bytes)?;
    info!(
        "Loaded index with {} records of dimension {} from {}",
        index.len(),
        index.dimension(),
        path.display()
    );
    Ok(index)
}

/// Like [`load`], but a missing file is `None` rather than an error
#[inline]
pub async fn load_optional(path: &Path) -> Result<Option<VectorIndex>> {
    if fs::try_exists(path).await? {
        load(path).await.map(Some)
    } else {
        debug!("No index file at {}", path.display());
        Ok(None)
    }
}

pub(crate) fn encode(index: &VectorIndex) -> Result<Vec<u8>> {
    let dimension = u32::try_from(index.dimension())
        .map_err(|_| RagError::InvalidRequest("vector dimension too large to persist".into()))?;
    let count = index.len() as u64;

    let mut bytes =
        Vec::with_capacity(HEADER_LEN + index.raw_vectors().len() * 4 + index.len() * 8);
    bytes.extend_from_slice(&MAGIC);
    bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&dimension.to_le_bytes());
    bytes.extend_from_slice(&count.to_le_bytes());
    for value in index.raw_vectors() {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    for id in index.ids() {
        bytes.extend_from_slice(&id.to_le_bytes());
    }
    Ok(bytes)
}

pub(crate) fn decode(bytes: &[u8]) -> Result<VectorIndex> {
    if bytes.len() < HEADER_LEN {
        return Err(corrupt(format!(
            "file is {} bytes, shorter than the {HEADER_LEN} byte header",
            bytes.len()
        )));
    }

    let (header, payload) = bytes.split_at(HEADER_LEN);
    if header[0..4] != MAGIC {
        return Err(corrupt("bad magic bytes"));
    }
    let version = read_u32(&header[4..8]);
    if version != FORMAT_VERSION {
        return Err(corrupt(format!("unsupported format version {version}")));
    }
    let dimension = read_u32(&header[8..12]) as usize;
    let count = read_u64(&header[12..20]);

    if dimension == 0 {
        return Err(corrupt("dimension is zero"));
    }
    if count == 0 {
        return Err(corrupt("record count is zero"));
    }

    let expected = usize::try_from(count)
        .ok()
        .and_then(|count| {
            let vectors = count.checked_mul(dimension)?.checked_mul(4)?;
            let ids = count.checked_mul(8)?;
            vectors.checked_add(ids)
        })
        .ok_or_else(|| corrupt(format!("header declares an impossible size ({count} x {dimension})")))?;
    if payload.len() != expected {
        return Err(corrupt(format!(
            "payload is {} bytes, header declares {expected}",
            payload.len()
        )));
    }

    let count = count as usize;
    let (vector_bytes, id_bytes) = payload.split_at(count * dimension * 4);
    let values: Vec<f32> = vector_bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    let records = id_bytes
        .chunks_exact(8)
        .map(read_i64)
        .zip(values.chunks_exact(dimension))
        .map(|(id, vector)| EmbeddingRecord {
            id,
            vector: vector.to_vec(),
        })
        .collect();

    VectorIndex::build(records).map_err(|e| corrupt(e.to_string()))
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    Ok(())
}

async fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        warn!("Failed to remove temporary index file {}: {}", path.display(), e);
    }
}

fn temporary_path(path: &Path) -> PathBuf {
    let name = path.file_name().map_or_else(
        || "index".to_string(),
        |name| name.to_string_lossy().into_owned(),
    );
    path.with_file_name(format!(".{name}.{}.tmp", Uuid::new_v4()))
}

fn corrupt(message: impl Into<String>) -> RagError {
    RagError::CorruptIndex(message.into())
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

fn read_i64(bytes: &[u8]) -> i64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    i64::from_le_bytes(buf)
}
