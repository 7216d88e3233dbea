//! Living Memory.
//!
//! A node store of entities and relations with Bayesian confidence updates,
//! confidence decay, conflict detection, and resonance-weighted recall.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

use crate::context::Embedder;
use crate::store::rows::MemoryNodeRow;
use crate::store::{cosine_distance, Store};
use crate::types::{ErrorKind, MemoryNodeId};

#[derive(Debug, Error, Clone)]
pub enum MemoryError {
    #[error("store error: {0}")]
    Store(String),
    #[error("embedding error: {0}")]
    Embedding(String),
    #[error("memory node not found: {0}")]
    NotFound(String),
}

impl MemoryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            _ => ErrorKind::Internal,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MemoryNode {
    pub id: MemoryNodeId,
    pub embedding: Vec<f32>,
    pub entities: Vec<String>,
    pub relations: Vec<(String, String, String)>,
    pub sources: Vec<String>,
    pub user_signature: Option<String>,
    pub resonance: f32,
    pub access_count: u32,
    pub last_access_at: DateTime<Utc>,
    pub confidence: f32,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct Conflict {
    pub node_a: MemoryNodeId,
    pub node_b: MemoryNodeId,
    pub reason: String,
}

/// Stores and recalls durable knowledge distilled from completed research,
/// decaying confidence over time and boosting it on confirmed recall.
#[async_trait]
pub trait Memory: Send + Sync {
    async fn learn(
        &self,
        entities: Vec<String>,
        relations: Vec<(String, String, String)>,
        sources: Vec<String>,
        text: &str,
        user_signature: Option<String>,
    ) -> Result<MemoryNode, MemoryError>;

    async fn query(&self, text: &str, k: usize) -> Result<Vec<MemoryNode>, MemoryError>;

    async fn detect_conflicts(&self, node: &MemoryNode) -> Result<Vec<Conflict>, MemoryError>;

    async fn update_confidence(&self, id: MemoryNodeId, confirmed: bool) -> Result<f32, MemoryError>;
}

/// Confidence decays toward 0.5 (maximal uncertainty) as time since last
/// access grows, and moves toward 0 or 1 on confirm/refute.
fn bayesian_update(prior: f32, confirmed: bool) -> f32 {
    const LEARNING_RATE: f32 = 0.2;
    let target = if confirmed { 1.0 } else { 0.0 };
    (prior + LEARNING_RATE * (target - prior)).clamp(0.0, 1.0)
}

fn decay_confidence(confidence: f32, last_access: DateTime<Utc>, now: DateTime<Utc>) -> f32 {
    const HALF_LIFE_DAYS: f32 = 30.0;
    let days = (now - last_access).num_seconds() as f32 / 86_400.0;
    let decay = 0.5f32.powf(days.max(0.0) / HALF_LIFE_DAYS);
    0.5 + (confidence - 0.5) * decay
}

pub struct LivingMemory {
    store: Arc<dyn Store>,
    embedder: Arc<dyn Embedder>,
    nodes: parking_lot::RwLock<std::collections::HashMap<MemoryNodeId, MemoryNode>>,
}

impl LivingMemory {
    pub fn new(store: Arc<dyn Store>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            store,
            embedder,
            nodes: parking_lot::RwLock::new(std::collections::HashMap::new()),
        }
    }

    /// Loads every durable node into the process-local cache. Call once at
    /// startup so recall survives a restart.
    pub async fn hydrate(&self) -> Result<(), MemoryError> {
        let rows = self
            .store
            .list_memory_nodes()
            .await
            .map_err(|e| MemoryError::Store(e.to_string()))?;
        let mut nodes = self.nodes.write();
        for row in rows {
            if let Some(node) = Self::row_to_node(row) {
                nodes.insert(node.id, node);
            }
        }
        Ok(())
    }

    fn row_to_node(row: MemoryNodeRow) -> Option<MemoryNode> {
        Some(MemoryNode {
            id: MemoryNodeId(row.id.parse::<uuid::Uuid>().ok()?),
            embedding: serde_json::from_str(&row.embedding_json).ok()?,
            entities: serde_json::from_str(&row.entities_json).ok()?,
            relations: serde_json::from_str(&row.relations_json).ok()?,
            sources: serde_json::from_str(&row.sources_json).ok()?,
            user_signature: row.user_signature,
            resonance: row.resonance,
            access_count: row.access_count,
            last_access_at: row.last_access_at,
            confidence: row.confidence,
        })
    }

    fn node_to_row(node: &MemoryNode) -> MemoryNodeRow {
        MemoryNodeRow {
            id: node.id.to_string(),
            embedding_json: serde_json::to_string(&node.embedding).unwrap_or_default(),
            entities_json: serde_json::to_string(&node.entities).unwrap_or_default(),
            relations_json: serde_json::to_string(&node.relations).unwrap_or_default(),
            sources_json: serde_json::to_string(&node.sources).unwrap_or_default(),
            user_signature: node.user_signature.clone(),
            resonance: node.resonance,
            access_count: node.access_count,
            last_access_at: node.last_access_at,
            confidence: node.confidence,
        }
    }

    async fn persist(&self, node: &MemoryNode) -> Result<(), MemoryError> {
        self.store
            .upsert_memory_node(Self::node_to_row(node))
            .await
            .map_err(|e| MemoryError::Store(e.to_string()))
    }
}

#[async_trait]
impl Memory for LivingMemory {
    async fn learn(
        &self,
        entities: Vec<String>,
        relations: Vec<(String, String, String)>,
        sources: Vec<String>,
        text: &str,
        user_signature: Option<String>,
    ) -> Result<MemoryNode, MemoryError> {
        let embedding = self
            .embedder
            .embed(text)
            .await
            .map_err(|e| MemoryError::Embedding(e.to_string()))?;
        let now = Utc::now();
        let node = MemoryNode {
            id: MemoryNodeId::new(),
            embedding,
            entities,
            relations,
            sources,
            user_signature,
            resonance: 0.0,
            access_count: 0,
            last_access_at: now,
            confidence: 0.5,
        };
        self.nodes.write().insert(node.id, node.clone());
        self.persist(&node).await?;
        Ok(node)
    }

    async fn query(&self, text: &str, k: usize) -> Result<Vec<MemoryNode>, MemoryError> {
        let query_vec = self
            .embedder
            .embed(text)
            .await
            .map_err(|e| MemoryError::Embedding(e.to_string()))?;
        let now = Utc::now();

        let mut scored: Vec<(f32, MemoryNode)> = {
            let mut nodes = self.nodes.write();
            nodes
                .values_mut()
                .map(|n| {
                    n.confidence = decay_confidence(n.confidence, n.last_access_at, now);
                    let distance = cosine_distance(&query_vec, &n.embedding);
                    let similarity = 1.0 - distance;
                    let relevance = similarity * (0.5 + 0.5 * n.resonance) * n.confidence;
                    n.access_count += 1;
                    n.last_access_at = now;
                    n.resonance = (n.resonance + 0.05).min(1.0);
                    (relevance, n.clone())
                })
                .collect()
        };
        for (_, node) in &scored {
            self.persist(node).await?;
        }
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored.into_iter().map(|(_, n)| n).collect())
    }

    async fn detect_conflicts(&self, node: &MemoryNode) -> Result<Vec<Conflict>, MemoryError> {
        let nodes = self.nodes.read();
        let mut conflicts = Vec::new();
        for other in nodes.values() {
            if other.id == node.id {
                continue;
            }
            let shares_entity = node.entities.iter().any(|e| other.entities.contains(e));
            if !shares_entity {
                continue;
            }
            let contradicts = node.relations.iter().any(|(s, p, o)| {
                other
                    .relations
                    .iter()
                    .any(|(os, op, oo)| os == s && op == p && oo != o)
            });
            if contradicts {
                conflicts.push(Conflict {
                    node_a: node.id,
                    node_b: other.id,
                    reason: "contradictory relation for shared entity".to_string(),
                });
            }
        }
        Ok(conflicts)
    }

    async fn update_confidence(&self, id: MemoryNodeId, confirmed: bool) -> Result<f32, MemoryError> {
        let updated = {
            let mut nodes = self.nodes.write();
            let node = nodes
                .get_mut(&id)
                .ok_or_else(|| MemoryError::NotFound(id.to_string()))?;
            node.confidence = bayesian_update(node.confidence, confirmed);
            node.clone()
        };
        self.persist(&updated).await?;
        Ok(updated.confidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::embedding::MockEmbedder;
    use crate::store::memory::InMemoryStore;

    #[tokio::test]
    async fn confirming_raises_confidence_toward_one() {
        let memory = LivingMemory::new(Arc::new(InMemoryStore::new()), Arc::new(MockEmbedder::new(8)));
        let node = memory
            .learn(vec!["rust".into()], vec![], vec!["src1".into()], "rust is memory safe", None)
            .await
            .unwrap();
        let mut confidence = node.confidence;
        for _ in 0..10 {
            confidence = memory.update_confidence(node.id, true).await.unwrap();
        }
        assert!(confidence > 0.9);
    }

    #[tokio::test]
    async fn conflicting_relations_are_detected() {
        let memory = LivingMemory::new(Arc::new(InMemoryStore::new()), Arc::new(MockEmbedder::new(8)));
        let a = memory
            .learn(
                vec!["rust".into()],
                vec![("rust".into(), "released_in".into(), "2010".into())],
                vec!["src1".into()],
                "rust released 2010",
                None,
            )
            .await
            .unwrap();
        let b = memory
            .learn(
                vec!["rust".into()],
                vec![("rust".into(), "released_in".into(), "2015".into())],
                vec!["src2".into()],
                "rust released 2015",
                None,
            )
            .await
            .unwrap();
        let conflicts = memory.detect_conflicts(&b).await.unwrap();
        assert!(conflicts.iter().any(|c| c.node_a == b.id && c.node_b == a.id));
    }
}
