//! Vector index generations and the active-index handle.
//!
//! A [`Generation`] is one immutable, complete build of the index: every
//! (chunk, embedding) pair plus the metadata needed to map a hit back to
//! `{source filename, chunk text}`. Building a new generation never touches
//! the one being served; [`IndexHandle::activate`] swaps the active pointer
//! atomically, so readers in flight finish against the old generation and
//! no reader ever observes a half-built index.
//!
//! Generations persist to disk as a metadata file plus a packed vector
//! blob, which the explicit reload operation re-points to without a
//! rebuild.

use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::{Error, Result};
use crate::models::Chunk;

const META_FILE: &str = "generation.json";
const VECTORS_FILE: &str = "generation.vec";

/// One indexed chunk with its embedding.
#[derive(Debug, Clone)]
struct IndexEntry {
    chunk: Chunk,
    vector: Vec<f32>,
}

/// A search hit: the chunk and its similarity to the query.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// An immutable snapshot of the vector index.
#[derive(Debug)]
pub struct Generation {
    model: String,
    dims: usize,
    built_at: DateTime<Utc>,
    entries: Vec<IndexEntry>,
}

impl Generation {
    /// A valid generation over zero chunks. An empty knowledge base must
    /// answer "no relevant documents", not crash.
    pub fn empty(model: &str, dims: usize) -> Self {
        Self {
            model: model.to_string(),
            dims,
            built_at: Utc::now(),
            entries: Vec::new(),
        }
    }

    /// Pure construction from (chunk, embedding) pairs.
    ///
    /// Rejects mixed dimensions: an index whose vectors disagree on length
    /// is invalid. Entries are ordered by `(source, index)` so equal-score
    /// search results come out in a deterministic order.
    pub fn build(model: &str, dims: usize, pairs: Vec<(Chunk, Vec<f32>)>) -> Result<Self> {
        let mut entries = Vec::with_capacity(pairs.len());
        for (chunk, vector) in pairs {
            if vector.len() != dims {
                return Err(Error::validation(format!(
                    "index generation has mixed dimensions: expected {}, chunk {}#{} has {}",
                    dims,
                    chunk.source,
                    chunk.index,
                    vector.len()
                )));
            }
            entries.push(IndexEntry { chunk, vector });
        }
        entries.sort_by(|a, b| a.chunk.id().cmp(&b.chunk.id()));

        Ok(Self {
            model: model.to_string(),
            dims,
            built_at: Utc::now(),
            entries,
        })
    }

    /// Nearest-neighbor search: top `k` chunks by descending cosine
    /// similarity, ties broken by ascending chunk id.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        if self.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dims {
            return Err(Error::validation(format!(
                "query vector has {} dimensions, index has {}",
                query.len(),
                self.dims
            )));
        }

        let mut scored: Vec<ScoredChunk> = self
            .entries
            .iter()
            .map(|entry| ScoredChunk {
                chunk: entry.chunk.clone(),
                score: cosine_similarity(query, &entry.vector),
            })
            .collect();

        // Stable sort keeps the (source, index) ordering for equal scores.
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        Ok(scored)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    /// True when any chunk is attributed to `filename`.
    pub fn contains_source(&self, filename: &str) -> bool {
        self.entries.iter().any(|e| e.chunk.source == filename)
    }

    /// Persist this generation to `dir` (metadata + packed vectors).
    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;

        let meta = GenerationMeta {
            model: self.model.clone(),
            dims: self.dims,
            built_at: self.built_at,
            chunks: self.entries.iter().map(|e| e.chunk.clone()).collect(),
        };
        let meta_json = serde_json::to_vec_pretty(&meta)
            .map_err(|e| Error::internal(format!("failed to encode index metadata: {}", e)))?;
        std::fs::write(dir.join(META_FILE), meta_json)?;

        let mut blob = Vec::with_capacity(self.entries.len() * self.dims * 4);
        for entry in &self.entries {
            blob.extend_from_slice(&vec_to_blob(&entry.vector));
        }
        std::fs::write(dir.join(VECTORS_FILE), blob)?;
        Ok(())
    }

    /// Load a persisted generation from `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        let meta_path = dir.join(META_FILE);
        if !meta_path.is_file() {
            return Err(Error::not_found(format!(
                "no persisted index generation at {}",
                dir.display()
            )));
        }

        let meta_json = std::fs::read(&meta_path)?;
        let meta: GenerationMeta = serde_json::from_slice(&meta_json)
            .map_err(|e| Error::internal(format!("corrupt index metadata: {}", e)))?;

        let blob = std::fs::read(dir.join(VECTORS_FILE))?;
        let floats = blob_to_vec(&blob);
        let expected = meta.chunks.len() * meta.dims;
        if floats.len() != expected {
            return Err(Error::internal(format!(
                "corrupt index vectors: expected {} floats, found {}",
                expected,
                floats.len()
            )));
        }

        let mut entries = Vec::with_capacity(meta.chunks.len());
        for (i, chunk) in meta.chunks.into_iter().enumerate() {
            let vector = floats[i * meta.dims..(i + 1) * meta.dims].to_vec();
            entries.push(IndexEntry { chunk, vector });
        }

        Ok(Self {
            model: meta.model,
            dims: meta.dims,
            built_at: meta.built_at,
            entries,
        })
    }
}

#[derive(Serialize, Deserialize)]
struct GenerationMeta {
    model: String,
    dims: usize,
    built_at: DateTime<Utc>,
    chunks: Vec<Chunk>,
}

/// The single point of shared mutable state between the rebuild worker and
/// concurrent query readers.
///
/// One worker owns writes through [`activate`](IndexHandle::activate);
/// readers take a snapshot reference via [`current`](IndexHandle::current)
/// and keep using it even if a swap happens mid-query.
pub struct IndexHandle {
    active: ArcSwap<Generation>,
}

impl IndexHandle {
    pub fn new(generation: Generation) -> Self {
        Self {
            active: ArcSwap::from_pointee(generation),
        }
    }

    /// Atomically make `generation` the served index.
    pub fn activate(&self, generation: Generation) {
        self.active.store(Arc::new(generation));
    }

    /// Snapshot of the currently active generation.
    pub fn current(&self) -> Arc<Generation> {
        self.active.load_full()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(source: &str, index: u32, text: &str) -> Chunk {
        Chunk {
            source: source.to_string(),
            index,
            text: text.to_string(),
        }
    }

    #[test]
    fn empty_generation_searches_to_nothing() {
        let generation = Generation::empty("token-hash", 4);
        assert!(generation.is_empty());
        let hits = generation.search(&[1.0, 0.0, 0.0, 0.0], 5).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn build_rejects_mixed_dimensions() {
        let pairs = vec![
            (chunk("a.txt", 0, "alpha"), vec![1.0, 0.0]),
            (chunk("a.txt", 1, "beta"), vec![1.0, 0.0, 0.0]),
        ];
        let err = Generation::build("token-hash", 2, pairs).unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn search_orders_by_score_then_chunk_id() {
        let pairs = vec![
            (chunk("b.txt", 0, "tie two"), vec![1.0, 0.0]),
            (chunk("a.txt", 1, "tie one"), vec![1.0, 0.0]),
            (chunk("a.txt", 0, "far"), vec![0.0, 1.0]),
        ];
        let generation = Generation::build("token-hash", 2, pairs).unwrap();
        let hits = generation.search(&[1.0, 0.0], 3).unwrap();
        assert_eq!(hits.len(), 3);
        // Two perfect matches tie; ascending chunk id breaks the tie.
        assert_eq!(hits[0].chunk.id(), ("a.txt", 1));
        assert_eq!(hits[1].chunk.id(), ("b.txt", 0));
        assert_eq!(hits[2].chunk.id(), ("a.txt", 0));
    }

    #[test]
    fn search_rejects_dimension_mismatch() {
        let pairs = vec![(chunk("a.txt", 0, "alpha"), vec![1.0, 0.0])];
        let generation = Generation::build("token-hash", 2, pairs).unwrap();
        let err = generation.search(&[1.0, 0.0, 0.0], 1).unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn save_load_roundtrip_preserves_search() {
        let tmp = tempfile::TempDir::new().unwrap();
        let pairs = vec![
            (chunk("a.txt", 0, "alpha body"), vec![1.0, 0.0, 0.0]),
            (chunk("b.txt", 0, "beta body"), vec![0.0, 1.0, 0.0]),
        ];
        let generation = Generation::build("token-hash", 3, pairs).unwrap();
        generation.save(tmp.path()).unwrap();

        let loaded = Generation::load(tmp.path()).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.dims(), 3);
        assert_eq!(loaded.model_name(), "token-hash");

        let hits = loaded.search(&[0.0, 1.0, 0.0], 1).unwrap();
        assert_eq!(hits[0].chunk.source, "b.txt");
        assert_eq!(hits[0].chunk.text, "beta body");
    }

    #[test]
    fn load_missing_generation_is_not_found() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = Generation::load(tmp.path()).unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn handle_swaps_atomically_for_readers() {
        let handle = IndexHandle::new(Generation::empty("token-hash", 2));
        let before = handle.current();
        assert!(before.is_empty());

        let pairs = vec![(chunk("a.txt", 0, "alpha"), vec![1.0, 0.0])];
        handle.activate(Generation::build("token-hash", 2, pairs).unwrap());

        // The old snapshot is still complete and usable; new readers see
        // the new generation.
        assert!(before.is_empty());
        assert_eq!(handle.current().len(), 1);
    }
}
