//! Context Retriever (CR, §4.3): hybrid vector+keyword recall over the
//! Memory Store, cached and budget-aware.
//!
//! Two layers: layer 1 ranks candidate orchestrations by a blend of vector
//! similarity and keyword relevance; layer 2 loads the detail (linked
//! observations) for the top candidates, truncating or skipping once the
//! token budget runs out.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use conductor_context::{EmbeddingProvider, VectorError, VectorStore};
use lru::LruCache;

use crate::domain::Observation;
use crate::error::Result;
use crate::memory::MemoryStore;

#[derive(Debug, Clone, Copy)]
pub struct RetrievalConfig {
    pub cache_capacity: usize,
    pub cache_ttl: chrono::Duration,
    pub token_budget: usize,
    pub vector_weight: f64,
    pub keyword_weight: f64,
    pub layer1_k: usize,
    /// Rough per-candidate cost of the layer 1 ranking pass itself, §4.3.
    pub layer1_cost_tokens_per_candidate: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 100,
            cache_ttl: chrono::Duration::minutes(5),
            token_budget: 2000,
            vector_weight: 0.7,
            keyword_weight: 0.3,
            layer1_k: 10,
            layer1_cost_tokens_per_candidate: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextItemKind {
    Orchestration,
    Observation,
}

#[derive(Debug, Clone)]
pub struct ContextItem {
    pub id: String,
    pub kind: ContextItemKind,
    pub score: f64,
    pub summary: String,
    /// `None` when layer 2 skipped this item for lack of budget.
    pub detail: Option<String>,
    pub importance: u8,
}

#[derive(Debug, Clone, Default)]
pub struct RetrievedContext {
    pub items: Vec<ContextItem>,
    pub estimated_tokens: usize,
    /// Set when the vector store's circuit breaker was open and results
    /// came from keyword search alone.
    pub degraded: bool,
    /// Set when at least one layer-1 candidate was dropped entirely for
    /// lack of remaining budget.
    pub items_skipped: usize,
}

#[derive(Clone)]
struct CacheEntry {
    retrieved_at: DateTime<Utc>,
    context: RetrievedContext,
}

/// Estimates token count from character length; a tokenizer-free stand-in
/// used both as the primary measure here and as the fallback a real
/// tokenizer would drop back to on failure (§4.3 edge case).
fn estimate_tokens(text: &str) -> usize {
    (text.len() / 4).max(1)
}

fn cache_key(task_fingerprint: &str, agent_ids: &[String], pattern: &str) -> String {
    let mut agents = agent_ids.to_vec();
    agents.sort();
    format!("{task_fingerprint}|{}|{pattern}", agents.join(","))
}

pub struct ContextRetriever {
    memory: Arc<MemoryStore>,
    vectors: Arc<VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    cache: Mutex<LruCache<String, CacheEntry>>,
    config: RetrievalConfig,
}

impl ContextRetriever {
    pub fn new(memory: Arc<MemoryStore>, vectors: Arc<VectorStore>, embedder: Arc<dyn EmbeddingProvider>, config: RetrievalConfig) -> Self {
        let capacity = NonZeroUsize::new(config.cache_capacity.max(1)).expect("cache capacity must be nonzero");
        Self {
            memory,
            vectors,
            embedder,
            cache: Mutex::new(LruCache::new(capacity)),
            config,
        }
    }

    /// Retrieves context for a task about to be orchestrated. `query_text`
    /// seeds both the embedding and the keyword search; empty history
    /// (no orchestrations recorded yet) returns an empty, non-degraded
    /// result rather than an error (§4.3 edge case).
    pub fn retrieve(&self, task_fingerprint: &str, agent_ids: &[String], pattern: &str, query_text: &str) -> Result<RetrievedContext> {
        let key = cache_key(task_fingerprint, agent_ids, pattern);
        if let Some(entry) = self.cache_lookup(&key) {
            return Ok(entry);
        }

        let context = self.retrieve_uncached(query_text)?;
        self.cache.lock().expect("context retriever cache lock poisoned").put(
            key,
            CacheEntry {
                retrieved_at: Utc::now(),
                context: context.clone(),
            },
        );
        Ok(context)
    }

    fn cache_lookup(&self, key: &str) -> Option<RetrievedContext> {
        let mut cache = self.cache.lock().expect("context retriever cache lock poisoned");
        let entry = cache.get(key)?;
        if Utc::now() - entry.retrieved_at > self.config.cache_ttl {
            cache.pop(key);
            return None;
        }
        Some(entry.context.clone())
    }

    fn retrieve_uncached(&self, query_text: &str) -> Result<RetrievedContext> {
        let (ranked, degraded) = self.layer1_rank(query_text)?;
        let (items, items_skipped, estimated_tokens) = self.layer2_load(ranked)?;
        Ok(RetrievedContext {
            items,
            estimated_tokens,
            degraded,
            items_skipped,
        })
    }

    /// Blends vector similarity (weight `vector_weight`) with normalized
    /// keyword relevance (weight `keyword_weight`) over orchestrations,
    /// returning the top `layer1_k` by blended score.
    fn layer1_rank(&self, query_text: &str) -> Result<(Vec<(String, f64, String)>, bool)> {
        let mut degraded = false;
        let query_embedding = self.embedder.embed(query_text);

        let vector_hits = match self.vectors.search_similar("orchestrations", &query_embedding, self.config.layer1_k * 2, 0.0) {
            Ok(hits) => hits,
            Err(VectorError::CircuitOpen) => {
                degraded = true;
                Vec::new()
            }
            Err(other) => return Err(other.into()),
        };

        let keyword_hits = self.memory.search_orchestrations_by_keywords(query_text, self.config.layer1_k * 2)?;
        let max_keyword_score = keyword_hits.iter().map(|(_, score)| *score).fold(0.0_f64, f64::max);

        let mut scores: std::collections::HashMap<String, (f64, String)> = std::collections::HashMap::new();
        for hit in &vector_hits {
            let summary = hit.record.metadata.get("summary").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            scores.insert(hit.record.id.clone(), (self.config.vector_weight * hit.similarity as f64, summary));
        }
        for (orchestration, raw_score) in keyword_hits {
            let normalized = if max_keyword_score > 0.0 { raw_score / max_keyword_score } else { 0.0 };
            let entry = scores.entry(orchestration.id.clone()).or_insert((0.0, orchestration.result_summary.clone()));
            entry.0 += self.config.keyword_weight * normalized;
            if entry.1.is_empty() {
                entry.1 = orchestration.result_summary;
            }
        }

        let mut ranked: Vec<(String, f64, String)> = scores.into_iter().map(|(id, (score, summary))| (id, score, summary)).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(self.config.layer1_k);
        Ok((ranked, degraded))
    }

    /// Loads observation detail for each layer-1 candidate within the
    /// token budget: drops the lowest-importance observations first, then
    /// truncates remaining text to sentence boundaries, then skips the
    /// candidate entirely once nothing more fits (§4.3).
    fn layer2_load(&self, ranked: Vec<(String, f64, String)>) -> Result<(Vec<ContextItem>, usize, usize)> {
        let mut items = Vec::new();
        let mut used_tokens = ranked.len() * self.config.layer1_cost_tokens_per_candidate;
        let mut skipped = 0;

        for (orchestration_id, score, summary) in ranked {
            let mut observations = match self.memory.observations_for_orchestration(&orchestration_id) {
                Ok(obs) => obs,
                Err(_) => {
                    // M read failure on one candidate does not abort the others.
                    tracing::warn!(orchestration_id = %orchestration_id, "failed to load observations for context candidate, skipping detail");
                    Vec::new()
                }
            };
            observations.sort_by(|a, b| b.importance.cmp(&a.importance));

            let remaining_budget = self.config.token_budget.saturating_sub(used_tokens);
            if remaining_budget == 0 {
                skipped += 1;
                items.push(ContextItem {
                    id: orchestration_id,
                    kind: ContextItemKind::Orchestration,
                    score,
                    summary,
                    detail: None,
                    importance: 0,
                });
                continue;
            }

            let (detail, detail_tokens) = assemble_detail(&observations, remaining_budget);
            used_tokens += detail_tokens;
            let importance = observations.iter().map(|o| o.importance).max().unwrap_or(0);
            items.push(ContextItem {
                id: orchestration_id,
                kind: ContextItemKind::Orchestration,
                score,
                summary,
                detail,
                importance,
            });
        }

        Ok((items, skipped, used_tokens))
    }
}

/// Greedily appends observation content (highest importance first) until
/// the budget is exhausted, truncating the observation that would overflow
/// it to the nearest preceding sentence boundary instead of dropping it.
fn assemble_detail(observations: &[Observation], budget: usize) -> (Option<String>, usize) {
    let mut used = 0;
    let mut parts = Vec::new();

    for observation in observations {
        let cost = estimate_tokens(&observation.content);
        if used + cost <= budget {
            used += cost;
            parts.push(observation.content.clone());
            continue;
        }

        let remaining_chars = (budget.saturating_sub(used)) * 4;
        if remaining_chars < 20 {
            break;
        }
        let truncated = truncate_to_sentence_boundary(&observation.content, remaining_chars);
        if !truncated.is_empty() {
            used += estimate_tokens(&truncated);
            parts.push(truncated);
        }
        break;
    }

    if parts.is_empty() {
        (None, 0)
    } else {
        (Some(parts.join("\n")), used)
    }
}

fn truncate_to_sentence_boundary(text: &str, max_chars: usize) -> String {
    if text.len() <= max_chars {
        return text.to_string();
    }
    let window = &text[..max_chars];
    match window.rfind(['.', '!', '?']) {
        Some(boundary) => window[..=boundary].to_string(),
        None => window.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ObservationType, Orchestration, Pattern};
    use conductor_context::HashEmbedder;

    fn retriever() -> (ContextRetriever, Arc<MemoryStore>) {
        let memory = Arc::new(MemoryStore::open_in_memory().unwrap());
        let vectors = Arc::new(VectorStore::in_memory());
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbedder::default());
        let retriever = ContextRetriever::new(Arc::clone(&memory), vectors, embedder, RetrievalConfig::default());
        (retriever, memory)
    }

    #[test]
    fn empty_history_returns_empty_context() {
        let (retriever, _memory) = retriever();
        let context = retriever.retrieve("fp1", &["agent-a".to_string()], "parallel", "rate limiting").unwrap();
        assert!(context.items.is_empty());
        assert!(!context.degraded);
    }

    #[test]
    fn finds_orchestration_by_keyword_and_loads_observations() {
        let (retriever, memory) = retriever();
        let mut orchestration = Orchestration::new("o1", Pattern::Parallel, "t1", "s1");
        orchestration.result_summary = "implemented a token bucket rate limiter".to_string();
        memory.record_orchestration(&orchestration).unwrap();

        let mut observation = Observation::new("obs1", "o1", ObservationType::Decision, "chose a sliding window over a fixed bucket", 8);
        observation.set_concept_tags(["rate-limiting".to_string()]);
        memory.record_observation(&observation).unwrap();

        let context = retriever.retrieve("fp1", &["agent-a".to_string()], "parallel", "token bucket rate limiter").unwrap();
        assert_eq!(context.items.len(), 1);
        assert_eq!(context.items[0].id, "o1");
        assert!(context.items[0].detail.as_deref().unwrap().contains("sliding window"));
    }

    #[test]
    fn cache_hit_skips_recomputation_within_ttl() {
        let (retriever, memory) = retriever();
        let mut orchestration = Orchestration::new("o1", Pattern::Parallel, "t1", "s1");
        orchestration.result_summary = "implemented caching".to_string();
        memory.record_orchestration(&orchestration).unwrap();

        let first = retriever.retrieve("fp1", &[], "parallel", "caching").unwrap();
        let second = retriever.retrieve("fp1", &[], "parallel", "caching").unwrap();
        assert_eq!(first.items.len(), second.items.len());
    }

    #[test]
    fn low_budget_skips_detail_but_keeps_the_candidate() {
        let (retriever, memory) = retriever();
        let mut orchestration = Orchestration::new("o1", Pattern::Parallel, "t1", "s1");
        orchestration.result_summary = "implemented caching".to_string();
        memory.record_orchestration(&orchestration).unwrap();
        let observation = Observation::new("obs1", "o1", ObservationType::Decision, &"x".repeat(10_000), 5);
        memory.record_observation(&observation).unwrap();

        let tight = ContextRetriever::new(
            Arc::clone(&memory),
            Arc::new(VectorStore::in_memory()),
            Arc::new(HashEmbedder::default()),
            RetrievalConfig {
                token_budget: 1,
                ..RetrievalConfig::default()
            },
        );
        let context = tight.retrieve("fp1", &[], "parallel", "caching").unwrap();
        assert_eq!(context.items.len(), 1);
        assert!(context.items[0].detail.is_none());
        assert_eq!(context.items_skipped, 1);
    }

    #[test]
    fn truncate_to_sentence_boundary_prefers_full_sentences() {
        let text = "First sentence. Second sentence. Third.";
        let truncated = truncate_to_sentence_boundary(text, 20);
        assert_eq!(truncated, "First sentence.");
    }
}
