//! Embedding provider abstraction.
//!
//! The embedding model itself is an external collaborator (spec.md §1:
//! LLM providers are invoked through an abstract interface). This module
//! provides that trait plus a dependency-free deterministic fallback
//! embedder used by tests and by any deployment that has not wired in a
//! real embedding provider -- it hashes terms into a fixed-width bag of
//! buckets so cosine similarity still rewards shared vocabulary.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Produces a fixed-dimension embedding for a piece of text.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> Vec<f32>;
    fn dimension(&self) -> usize;
}

/// Hashing-trick embedder: deterministic, dependency-free, good enough for
/// exercising hybrid search and its invariants without a network call.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EmbeddingProvider for HashEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        let mut buckets = vec![0f32; self.dimension];
        let mut terms = 0usize;
        for token in text.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
            if token.is_empty() {
                continue;
            }
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let idx = (hasher.finish() as usize) % self.dimension;
            buckets[idx] += 1.0;
            terms += 1;
        }
        if terms > 0 {
            let norm: f32 = buckets.iter().map(|v| v * v).sum::<f32>().sqrt();
            if norm > 0.0 {
                for v in &mut buckets {
                    *v /= norm;
                }
            }
        }
        buckets
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Cosine similarity between two equal-length vectors; `0.0` if either is
/// zero-length or the dimensions differ (treated as "no similarity"
/// rather than a panic, since callers may mix collections mid-migration).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_text_has_similarity_near_one() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed("Research token bucket algorithms");
        let b = embedder.embed("Research token bucket algorithms");
        assert!(cosine_similarity(&a, &b) > 0.99);
    }

    #[test]
    fn unrelated_text_has_lower_similarity() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed("Research token bucket algorithms");
        let b = embedder.embed("Bake a sourdough loaf this weekend");
        let c = embedder.embed("Research token bucket rate limiting algorithms");
        assert!(cosine_similarity(&a, &c) > cosine_similarity(&a, &b));
    }

    #[test]
    fn dimension_is_stable() {
        let embedder = HashEmbedder::new(64);
        assert_eq!(embedder.embed("anything").len(), 64);
        assert_eq!(embedder.dimension(), 64);
    }
}
