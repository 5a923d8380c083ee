//! Vector index gateway.
//!
//! The production vector database is external; the core depends on this
//! trait for embed-and-upsert and semantic search. The in-memory
//! implementation pairs any [`Embedder`] with brute-force cosine
//! similarity, which is plenty at test and single-node scale.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::providers::Embedder;

/// A search result: record id plus cosine similarity in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredId {
    pub id: String,
    pub score: f64,
}

/// Semantic index over record titles and descriptions.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Embed `text` and store it under `id`, replacing any prior vector.
    async fn upsert(&self, id: &str, text: &str) -> Result<()>;

    /// Top-`limit` nearest entries to `text`, best first.
    async fn search(&self, text: &str, limit: usize) -> Result<Vec<ScoredId>>;

    async fn entry_count(&self) -> usize;
}

/// Deterministic local embedder: hashed bag-of-words into a fixed-size
/// vector. No network, stable across runs; shared titles produce highly
/// similar vectors, which is exactly what fuzzy-title dedup needs.
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub fn new() -> Self {
        Self { dims: 256 }
    }

    pub fn with_dims(dims: usize) -> Self {
        Self { dims: dims.max(8) }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut vector = vec![0.0f32; self.dims];
                for token in text
                    .to_lowercase()
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|t| !t.is_empty())
                {
                    let mut hash: u64 = 0xcbf29ce484222325;
                    for byte in token.bytes() {
                        hash ^= byte as u64;
                        hash = hash.wrapping_mul(0x100000001b3);
                    }
                    vector[(hash % self.dims as u64) as usize] += 1.0;
                }
                vector
            })
            .collect())
    }
}

/// In-memory vector index with brute-force cosine search.
pub struct MemoryVectorIndex {
    embedder: Arc<dyn Embedder>,
    vectors: RwLock<HashMap<String, Vec<f32>>>,
}

impl MemoryVectorIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            vectors: RwLock::new(HashMap::new()),
        }
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embedder.embed(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| Error::Internal("embedder returned no vector".to_string()))
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert(&self, id: &str, text: &str) -> Result<()> {
        let vector = self.embed_one(text).await?;
        let mut vectors = self.vectors.write().await;
        vectors.insert(id.to_string(), vector);
        Ok(())
    }

    async fn search(&self, text: &str, limit: usize) -> Result<Vec<ScoredId>> {
        let query = self.embed_one(text).await?;
        let vectors = self.vectors.read().await;
        let mut scored: Vec<ScoredId> = vectors
            .iter()
            .map(|(id, vector)| ScoredId {
                id: id.clone(),
                score: cosine_similarity(&query, vector),
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn entry_count(&self) -> usize {
        self.vectors.read().await.len()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> MemoryVectorIndex {
        MemoryVectorIndex::new(Arc::new(HashingEmbedder::new()))
    }

    #[tokio::test]
    async fn test_identical_text_scores_one() {
        let index = index();
        index.upsert("a", "AI diagnostics for rural clinics").await.unwrap();

        let results = index.search("AI diagnostics for rural clinics", 5).await.unwrap();
        assert_eq!(results[0].id, "a");
        assert!(results[0].score > 0.999);
    }

    #[tokio::test]
    async fn test_similar_titles_rank_above_unrelated() {
        let index = index();
        index
            .upsert("near", "Machine learning for maize disease detection in Kenya")
            .await
            .unwrap();
        index
            .upsert("far", "Central bank monetary policy review 2023")
            .await
            .unwrap();

        let results = index
            .search("Maize disease detection in Kenya with machine learning", 2)
            .await
            .unwrap();
        assert_eq!(results[0].id, "near");
        assert!(results[0].score > results[1].score + 0.3);
    }

    #[tokio::test]
    async fn test_upsert_replaces_vector() {
        let index = index();
        index.upsert("x", "original text").await.unwrap();
        index.upsert("x", "completely different content now").await.unwrap();
        assert_eq!(index.entry_count().await, 1);

        let results = index.search("original text", 1).await.unwrap();
        assert!(results[0].score < 0.999);
    }

    #[tokio::test]
    async fn test_search_limit() {
        let index = index();
        for i in 0..10 {
            index.upsert(&format!("id-{}", i), &format!("document number {}", i)).await.unwrap();
        }
        let results = index.search("document", 3).await.unwrap();
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn test_cosine_edge_cases() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 2.0], &[1.0, 2.0]) - 1.0).abs() < 1e-9);
    }
}
