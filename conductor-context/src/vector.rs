//! VectorStore - embedding index over orchestrations/observations (§4.2).
//!
//! Storage mirrors the teacher's JSONL-per-collection layout (append-only
//! log, rewritten compactly on `delete_by_id`/`compact`) rather than a
//! database, since a vector index is small enough to load entirely into
//! memory and the spec only requires it to degrade gracefully, not to
//! scale past what fits in RAM for one project.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::circuit::CircuitBreaker;
use crate::embed::cosine_similarity;
use crate::error::{Result, VectorError};

/// One embedded item: an orchestration or an observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    /// Mirrors the source fields needed for filtering (pattern, agent ids,
    /// ...) without round-tripping through the Memory Store.
    pub metadata: serde_json::Value,
}

/// A similarity search hit.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub record: VectorRecord,
    pub similarity: f32,
}

struct Collection {
    dimension: usize,
    records: Vec<VectorRecord>,
}

/// In-process semantic index, optionally persisted to a directory of
/// `{collection}.jsonl` files.
pub struct VectorStore {
    path: Option<PathBuf>,
    collections: RwLock<HashMap<String, Collection>>,
    breaker: CircuitBreaker,
}

impl VectorStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            collections: RwLock::new(HashMap::new()),
            breaker: CircuitBreaker::default_breaker(),
        }
    }

    /// Open (loading any existing `*.jsonl` files) a persisted vector
    /// store rooted at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;
        let mut collections = HashMap::new();
        for entry in fs::read_dir(&path)? {
            let entry = entry?;
            let file_path = entry.path();
            if file_path.extension().map(|e| e == "jsonl").unwrap_or(false) {
                let name = file_path.file_stem().and_then(|s| s.to_str()).unwrap_or("").to_string();
                let records = load_jsonl(&file_path)?;
                let dimension = records.first().map(|r: &VectorRecord| r.embedding.len()).unwrap_or(0);
                collections.insert(name, Collection { dimension, records });
            }
        }
        info!(collections = collections.len(), path = %path.display(), "VectorStore::open");
        Ok(Self {
            path: Some(path),
            collections: RwLock::new(collections),
            breaker: CircuitBreaker::default_breaker(),
        })
    }

    fn collection_path(&self, collection: &str) -> Option<PathBuf> {
        self.path.as_ref().map(|p| p.join(format!("{collection}.jsonl")))
    }

    fn flush(&self, collection: &str, records: &[VectorRecord]) -> Result<()> {
        let Some(path) = self.collection_path(collection) else { return Ok(()) };
        let mut out = String::new();
        for record in records {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }
        fs::write(path, out)?;
        Ok(())
    }

    /// Add or replace an embedding in `collection`. All vectors within one
    /// collection must share a dimension (§3 invariant).
    pub fn add_embedding(&self, collection: &str, record: VectorRecord) -> Result<()> {
        self.breaker.call(|| {
            let mut collections = self.collections.write().expect("vector store lock poisoned");
            let entry = collections.entry(collection.to_string()).or_insert_with(|| Collection {
                dimension: record.embedding.len(),
                records: Vec::new(),
            });
            if entry.records.is_empty() {
                entry.dimension = record.embedding.len();
            } else if entry.dimension != record.embedding.len() {
                return Err(VectorError::DimensionMismatch {
                    collection: collection.to_string(),
                    expected: entry.dimension,
                    actual: record.embedding.len(),
                });
            }
            entry.records.retain(|r| r.id != record.id);
            entry.records.push(record);
            self.flush(collection, &entry.records)?;
            debug!(collection, count = entry.records.len(), "add_embedding");
            Ok(())
        })
    }

    /// Remove an embedding by id from `collection`.
    pub fn delete_by_id(&self, collection: &str, id: &str) -> Result<()> {
        self.breaker.call(|| {
            let mut collections = self.collections.write().expect("vector store lock poisoned");
            if let Some(entry) = collections.get_mut(collection) {
                entry.records.retain(|r| r.id != id);
                self.flush(collection, &entry.records)?;
            }
            Ok(())
        })
    }

    /// Top-`limit` records in `collection` by cosine similarity to
    /// `query_embedding`, filtered to `>= min_similarity`.
    pub fn search_similar(
        &self,
        collection: &str,
        query_embedding: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<VectorHit>> {
        self.breaker.call(|| {
            let collections = self.collections.read().expect("vector store lock poisoned");
            let Some(entry) = collections.get(collection) else {
                return Ok(Vec::new());
            };
            let mut hits: Vec<VectorHit> = entry
                .records
                .iter()
                .map(|record| VectorHit {
                    record: record.clone(),
                    similarity: cosine_similarity(&record.embedding, query_embedding),
                })
                .filter(|hit| hit.similarity >= min_similarity)
                .collect();
            hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
            hits.truncate(limit);
            Ok(hits)
        })
    }

    pub fn is_degraded(&self) -> bool {
        self.breaker.is_open()
    }

    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .expect("vector store lock poisoned")
            .get(collection)
            .map(|c| c.records.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }
}

fn load_jsonl(path: &Path) -> Result<Vec<VectorRecord>> {
    let content = fs::read_to_string(path)?;
    let mut out = Vec::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        out.push(serde_json::from_str(line)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::{EmbeddingProvider, HashEmbedder};

    fn rec(id: &str, embedding: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            embedding,
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn search_orders_by_similarity_and_respects_min_similarity() {
        let store = VectorStore::in_memory();
        let embedder = HashEmbedder::default();
        store.add_embedding("orchestrations", rec("a", embedder.embed("token bucket rate limiter"))).unwrap();
        store.add_embedding("orchestrations", rec("b", embedder.embed("sourdough bread recipe"))).unwrap();

        let query = embedder.embed("token bucket algorithm");
        let hits = store.search_similar("orchestrations", &query, 10, 0.05).unwrap();
        assert_eq!(hits[0].record.id, "a");
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let store = VectorStore::in_memory();
        store.add_embedding("obs", rec("a", vec![1.0, 0.0, 0.0])).unwrap();
        let result = store.add_embedding("obs", rec("b", vec![1.0, 0.0]));
        assert!(matches!(result, Err(VectorError::DimensionMismatch { .. })));
    }

    #[test]
    fn delete_by_id_removes_record() {
        let store = VectorStore::in_memory();
        store.add_embedding("obs", rec("a", vec![1.0, 0.0])).unwrap();
        store.delete_by_id("obs", "a").unwrap();
        assert!(store.is_empty("obs"));
    }

    #[test]
    fn persists_and_reloads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = VectorStore::open(dir.path()).unwrap();
            store.add_embedding("obs", rec("a", vec![1.0, 0.0])).unwrap();
        }
        let reopened = VectorStore::open(dir.path()).unwrap();
        assert_eq!(reopened.len("obs"), 1);
    }

    #[test]
    fn empty_query_embedding_on_unknown_collection_returns_empty() {
        let store = VectorStore::in_memory();
        let hits = store.search_similar("nonexistent", &[1.0, 0.0], 10, 0.0).unwrap();
        assert!(hits.is_empty());
    }
}
