//! Rarity selection over a corpus of path records
//!
//! Records from one or more searches are deduplicated greedily in file
//! order (near-duplicates collapse onto the longest seen), then sorted by
//! ascending probability so the rarest paths come first.

use crate::paths::{is_near_duplicate, PathRecord, DEFAULT_SIMILARITY_THRESHOLD};
use crate::storage::{collect_chunk_files, read_chunks};
use anyhow::Result;
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;

/// Default number of paths to select
pub const DEFAULT_TOP: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectorConfig {
    pub top: usize,
    pub similarity_threshold: u8,
    /// Deduplicate within each chunk file only, then merge
    pub per_chunk: bool,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            top: DEFAULT_TOP,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            per_chunk: false,
        }
    }
}

impl SelectorConfig {
    pub fn with_top(mut self, top: usize) -> Self {
        self.top = top;
        self
    }

    pub fn with_similarity_threshold(mut self, threshold: u8) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn with_per_chunk(mut self, per_chunk: bool) -> Self {
        self.per_chunk = per_chunk;
        self
    }
}

/// Outcome of a selection run
#[derive(Debug, Clone, Serialize)]
pub struct Selection {
    pub files: usize,
    pub records_read: usize,
    pub after_dedup: usize,
    pub selected: Vec<PathRecord>,
}

/// Greedy near-duplicate removal in input order
///
/// Each record is compared against every kept record. The first similar
/// kept record is replaced if the new node string is strictly longer; otherwise
/// the new record is dropped. Dissimilar records are kept.
pub fn dedup_records(records: impl IntoIterator<Item = PathRecord>, threshold: u8) -> Vec<PathRecord> {
    let mut kept: Vec<(String, PathRecord)> = Vec::new();

    for record in records {
        let key = record.node_key();
        let similar = kept
            .iter()
            .position(|(kept_key, _)| is_near_duplicate(kept_key, &key, threshold));

        match similar {
            Some(idx) => {
                if key.len() > kept[idx].0.len() {
                    kept[idx] = (key, record);
                }
            }
            None => kept.push((key, record)),
        }
    }

    kept.into_iter().map(|(_, record)| record).collect()
}

/// The `top` least probable records, rarest first
///
/// Records with an identical node sequence count once (the first seen).
/// Ties keep input order.
pub fn select_rarest(records: Vec<PathRecord>, top: usize) -> Vec<PathRecord> {
    let mut seen = HashSet::new();
    let mut unique: Vec<PathRecord> = records
        .into_iter()
        .filter(|record| seen.insert(record.path_id()))
        .collect();

    unique.sort_by(|a, b| a.probability.total_cmp(&b.probability));
    unique.truncate(top);
    unique
}

/// Run the selector over records grouped by chunk file
pub fn select(chunks: Vec<Vec<PathRecord>>, config: &SelectorConfig) -> Selection {
    let files = chunks.len();
    let records_read = chunks.iter().map(Vec::len).sum();

    let deduped: Vec<PathRecord> = if config.per_chunk {
        chunks
            .into_iter()
            .flat_map(|chunk| dedup_records(chunk, config.similarity_threshold))
            .collect()
    } else {
        dedup_records(chunks.into_iter().flatten(), config.similarity_threshold)
    };

    let after_dedup = deduped.len();
    let selected = select_rarest(deduped, config.top);
    tracing::info!(files, records_read, after_dedup, selected = selected.len(), "selection done");

    Selection {
        files,
        records_read,
        after_dedup,
        selected,
    }
}

/// Read chunk files and directories, then select
pub fn select_from_inputs(inputs: &[PathBuf], config: &SelectorConfig) -> Result<Selection> {
    let files = collect_chunk_files(inputs)?;
    if files.is_empty() {
        tracing::warn!("no chunk files found in inputs");
    }
    let chunks = read_chunks(&files)?;
    Ok(select(chunks, config))
}
