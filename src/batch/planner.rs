use crate::storage::{Metadata, NewExtraction};
use crate::url::{parse_target_url, url_hash};
use crate::HarvestError;
use std::collections::HashSet;

/// Placement of one URL within a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSlot {
    /// 1-based chunk number
    pub chunk_number: u32,
    /// 0-based position inside the chunk
    pub position_in_chunk: u32,
}

/// Computes the chunk slot of the URL at flat index `index`
///
/// # Examples
///
/// ```
/// use batch_harvest::batch::{chunk_slot, ChunkSlot};
///
/// assert_eq!(chunk_slot(2, 2), ChunkSlot { chunk_number: 2, position_in_chunk: 0 });
/// ```
pub fn chunk_slot(index: usize, chunk_size: u32) -> ChunkSlot {
    let size = chunk_size.max(1) as usize;
    ChunkSlot {
        chunk_number: (index / size + 1) as u32,
        position_in_chunk: (index % size) as u32,
    }
}

/// Assigns a chunk slot to every index of a list of `len` items
pub fn plan_chunks(len: usize, chunk_size: u32) -> Vec<ChunkSlot> {
    (0..len).map(|i| chunk_slot(i, chunk_size)).collect()
}

/// Extraction rows produced from a submitted URL list
#[derive(Debug, Clone)]
pub struct BatchPlan {
    pub extractions: Vec<NewExtraction>,
    /// Submitted URLs dropped because an earlier entry had the same identity
    pub duplicates: Vec<String>,
}

/// Validates, deduplicates and chunk-plans a submitted URL list
///
/// Every URL must parse as an absolute http(s) URL. Entries whose canonical
/// form matches an earlier entry are dropped; the surviving URLs keep their
/// submission order and are numbered contiguously.
pub fn plan_batch(
    urls: &[String],
    chunk_size: u32,
    max_retries: u32,
) -> Result<BatchPlan, HarvestError> {
    if chunk_size == 0 {
        return Err(HarvestError::Validation(
            "chunk size must be greater than 0".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(urls.len());
    let mut duplicates = Vec::new();

    for raw in urls {
        let parsed = parse_target_url(raw)
            .map_err(|e| HarvestError::Validation(format!("invalid URL '{}': {}", raw, e)))?;
        let hash = url_hash(&parsed)?;

        if seen.insert(hash.clone()) {
            unique.push((parsed.to_string(), hash));
        } else {
            duplicates.push(raw.clone());
        }
    }

    let slots = plan_chunks(unique.len(), chunk_size);
    let extractions = unique
        .into_iter()
        .zip(slots)
        .map(|((url, url_hash), slot)| NewExtraction {
            url,
            url_hash,
            chunk_number: slot.chunk_number,
            position_in_chunk: slot.position_in_chunk,
            chunk_size,
            max_retries,
            metadata: Metadata::new(),
        })
        .collect();

    Ok(BatchPlan {
        extractions,
        duplicates,
    })
}
