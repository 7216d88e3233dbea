//! Exact and semantic result caching.
//!
//! Two tiers: an exact lookup keyed on a normalized query hash, and a
//! semantic lookup keyed on cosine distance against cached query
//! embeddings.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::context::Embedder;
use crate::types::{CostTier, ErrorKind};

#[derive(Debug, Error, Clone)]
pub enum CacheError {
    #[error("embedding failed: {0}")]
    Embedding(String),
}

impl CacheError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Internal
    }
}

#[derive(Clone)]
struct Entry {
    value: serde_json::Value,
    tier: CostTier,
    embedding: Option<Vec<f32>>,
    inserted_at: Instant,
    ttl: Duration,
}

impl Entry {
    fn expired(&self) -> bool {
        self.inserted_at.elapsed() > self.ttl
    }
}

/// Two-tier cache: an exact hash lookup backed the [`CacheConfig::exact_ttl`],
/// and a semantic lookup over cached query embeddings within
/// `semantic_similarity_threshold` cosine distance.
///
/// Cache entries record the [`CostTier`] of the model that produced them; a
/// cached answer produced by a cheaper tier than the tier the caller
/// currently requires is treated as a miss ("tier-downgrade refusal").
pub struct Cache {
    exact: DashMap<String, Entry>,
    semantic: DashMap<String, Entry>,
    embedder: Arc<dyn Embedder>,
    exact_ttl: Duration,
    semantic_ttl: Duration,
    similarity_threshold: f32,
    max_keys: usize,
}

impl Cache {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        exact_ttl: Duration,
        semantic_ttl: Duration,
        similarity_threshold: f32,
        max_keys: usize,
    ) -> Self {
        Self {
            exact: DashMap::new(),
            semantic: DashMap::new(),
            embedder,
            exact_ttl,
            semantic_ttl,
            similarity_threshold,
            max_keys,
        }
    }

    fn normalize(query: &str) -> String {
        query.trim().to_lowercase()
    }

    fn exact_key(query: &str, params: &serde_json::Value) -> String {
        format!("{}|{}", Self::normalize(query), params)
    }

    /// Looks up an exact match first, falling back to semantic similarity.
    /// Returns `None` if nothing within tier and TTL constraints is cached.
    pub async fn get(
        &self,
        query: &str,
        params: &serde_json::Value,
        required_tier: CostTier,
    ) -> Result<Option<serde_json::Value>, CacheError> {
        let key = Self::exact_key(query, params);
        if let Some(entry) = self.exact.get(&key) {
            if !entry.expired() && entry.tier >= required_tier {
                return Ok(Some(entry.value.clone()));
            }
        }
        self.exact.remove_if(&key, |_, e| e.expired());

        let query_vec = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| CacheError::Embedding(e.to_string()))?;

        let mut best: Option<(f32, serde_json::Value)> = None;
        for entry in self.semantic.iter() {
            if entry.expired() || entry.tier < required_tier {
                continue;
            }
            let Some(cached_vec) = &entry.embedding else {
                continue;
            };
            let dist = crate::store::cosine_distance(&query_vec, cached_vec);
            if dist <= (1.0 - self.similarity_threshold) {
                if best.as_ref().map(|(d, _)| dist < *d).unwrap_or(true) {
                    best = Some((dist, entry.value.clone()));
                }
            }
        }
        Ok(best.map(|(_, v)| v))
    }

    pub async fn put(
        &self,
        query: &str,
        params: &serde_json::Value,
        tier: CostTier,
        value: serde_json::Value,
    ) -> Result<(), CacheError> {
        let key = Self::exact_key(query, params);
        self.evict_if_full(&self.exact);
        self.exact.insert(
            key,
            Entry {
                value: value.clone(),
                tier,
                embedding: None,
                inserted_at: Instant::now(),
                ttl: self.exact_ttl,
            },
        );

        let embedding = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| CacheError::Embedding(e.to_string()))?;
        self.evict_if_full(&self.semantic);
        self.semantic.insert(
            Self::normalize(query),
            Entry {
                value,
                tier,
                embedding: Some(embedding),
                inserted_at: Instant::now(),
                ttl: self.semantic_ttl,
            },
        );
        Ok(())
    }

    fn evict_if_full(&self, map: &DashMap<String, Entry>) {
        if map.len() < self.max_keys {
            return;
        }
        // Evict the oldest entry; a full LRU would need an auxiliary queue,
        // but the scan is cheap at single-digit-thousand-entry scale.
        if let Some(oldest_key) = map
            .iter()
            .min_by_key(|e| e.inserted_at)
            .map(|e| e.key().clone())
        {
            map.remove(&oldest_key);
        }
    }

    pub fn len(&self) -> usize {
        self.exact.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::embedding::MockEmbedder;

    #[tokio::test]
    async fn exact_hit_returns_cached_value() {
        let cache = Cache::new(
            Arc::new(MockEmbedder::new(8)),
            Duration::from_secs(60),
            Duration::from_secs(60),
            0.85,
            100,
        );
        let params = serde_json::json!({});
        cache
            .put("what is rust", &params, CostTier::Low, serde_json::json!({"a": 1}))
            .await
            .unwrap();
        let hit = cache.get("what is rust", &params, CostTier::Low).await.unwrap();
        assert!(hit.is_some());
    }

    #[tokio::test]
    async fn tier_downgrade_is_refused() {
        let cache = Cache::new(
            Arc::new(MockEmbedder::new(8)),
            Duration::from_secs(60),
            Duration::from_secs(60),
            0.85,
            100,
        );
        let params = serde_json::json!({});
        cache
            .put("what is rust", &params, CostTier::VeryLow, serde_json::json!({"a": 1}))
            .await
            .unwrap();
        let hit = cache.get("what is rust", &params, CostTier::High).await.unwrap();
        assert!(hit.is_none());
    }
}
