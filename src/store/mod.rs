//! Persistence gateway.
//!
//! The relational store is an external collaborator; the core only
//! depends on this trait and issues idempotent, fingerprint-keyed
//! upserts. [`MemoryPersistence`] backs tests and mock-data mode.

pub mod vector;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::records::{Innovation, IntelligenceReport, Publication};

/// Result of an idempotent upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No record with this fingerprint existed; a row was created.
    Inserted,
    /// A record with this fingerprint existed and was replaced.
    Updated,
}

/// A directed link between two records, recorded by the deduplicator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordLink {
    pub from_id: String,
    pub to_id: String,
    pub kind: String,
}

/// Row counts, for cycle accounting and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub innovations: usize,
    pub publications: usize,
    pub reports: usize,
    pub links: usize,
}

/// Opaque gateway to the relational store.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn upsert_innovation(&self, innovation: Innovation) -> Result<UpsertOutcome>;
    async fn upsert_publication(&self, publication: Publication) -> Result<UpsertOutcome>;
    async fn insert_report(&self, report: IntelligenceReport) -> Result<()>;

    async fn find_innovation_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Innovation>>;
    async fn find_publication_by_fingerprint(&self, fingerprint: &str)
        -> Result<Option<Publication>>;
    /// Exact-identity probe by DOI or upstream source id.
    async fn find_publication_by_identity(&self, key: &str) -> Result<Option<Publication>>;

    async fn get_innovation(&self, id: &str) -> Result<Option<Innovation>>;
    async fn update_innovation(&self, innovation: Innovation) -> Result<()>;

    async fn recent_innovations(&self, limit: usize) -> Result<Vec<Innovation>>;
    async fn recent_publications(&self, limit: usize) -> Result<Vec<Publication>>;
    async fn recent_reports(&self, limit: usize) -> Result<Vec<IntelligenceReport>>;

    async fn record_link(&self, link: RecordLink) -> Result<()>;
    async fn counts(&self) -> Result<StoreCounts>;
}

#[derive(Default)]
struct MemoryState {
    innovations: HashMap<String, Innovation>,
    innovation_fingerprints: HashMap<String, String>,
    publications: HashMap<String, Publication>,
    publication_fingerprints: HashMap<String, String>,
    publication_identities: HashMap<String, String>,
    reports: Vec<IntelligenceReport>,
    links: Vec<RecordLink>,
    insertion_order: Vec<String>,
}

/// In-memory persistence gateway.
#[derive(Default)]
pub struct MemoryPersistence {
    state: RwLock<MemoryState>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    fn identity_keys(publication: &Publication) -> Vec<String> {
        let mut keys = Vec::new();
        if let Some(doi) = &publication.doi {
            keys.push(crate::dedup::exact_identity_key("doi", doi));
        }
        if let Some(source_id) = &publication.source_id {
            keys.push(crate::dedup::exact_identity_key(
                "source_id",
                source_id,
            ));
        }
        keys
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn upsert_innovation(&self, innovation: Innovation) -> Result<UpsertOutcome> {
        let mut state = self.state.write().await;
        let outcome = match state
            .innovation_fingerprints
            .get(&innovation.fingerprint)
            .cloned()
        {
            Some(existing_id) => {
                // Same fingerprint: replace in place, keep the stored id.
                let mut replacement = innovation;
                replacement.id = existing_id.clone();
                state.innovations.insert(existing_id, replacement);
                UpsertOutcome::Updated
            }
            None => {
                state
                    .innovation_fingerprints
                    .insert(innovation.fingerprint.clone(), innovation.id.clone());
                state.insertion_order.push(innovation.id.clone());
                state.innovations.insert(innovation.id.clone(), innovation);
                UpsertOutcome::Inserted
            }
        };
        Ok(outcome)
    }

    async fn upsert_publication(&self, publication: Publication) -> Result<UpsertOutcome> {
        let mut state = self.state.write().await;
        let outcome = match state
            .publication_fingerprints
            .get(&publication.fingerprint)
            .cloned()
        {
            Some(existing_id) => {
                let mut replacement = publication;
                replacement.id = existing_id.clone();
                for key in Self::identity_keys(&replacement) {
                    state.publication_identities.insert(key, existing_id.clone());
                }
                state.publications.insert(existing_id, replacement);
                UpsertOutcome::Updated
            }
            None => {
                state
                    .publication_fingerprints
                    .insert(publication.fingerprint.clone(), publication.id.clone());
                for key in Self::identity_keys(&publication) {
                    state
                        .publication_identities
                        .insert(key, publication.id.clone());
                }
                state
                    .publications
                    .insert(publication.id.clone(), publication);
                UpsertOutcome::Inserted
            }
        };
        Ok(outcome)
    }

    async fn insert_report(&self, report: IntelligenceReport) -> Result<()> {
        let mut state = self.state.write().await;
        state.reports.push(report);
        Ok(())
    }

    async fn find_innovation_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Innovation>> {
        let state = self.state.read().await;
        Ok(state
            .innovation_fingerprints
            .get(fingerprint)
            .and_then(|id| state.innovations.get(id))
            .cloned())
    }

    async fn find_publication_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<Publication>> {
        let state = self.state.read().await;
        Ok(state
            .publication_fingerprints
            .get(fingerprint)
            .and_then(|id| state.publications.get(id))
            .cloned())
    }

    async fn find_publication_by_identity(&self, key: &str) -> Result<Option<Publication>> {
        let state = self.state.read().await;
        Ok(state
            .publication_identities
            .get(key)
            .and_then(|id| state.publications.get(id))
            .cloned())
    }

    async fn get_innovation(&self, id: &str) -> Result<Option<Innovation>> {
        let state = self.state.read().await;
        Ok(state.innovations.get(id).cloned())
    }

    async fn update_innovation(&self, innovation: Innovation) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .innovations
            .insert(innovation.id.clone(), innovation);
        Ok(())
    }

    async fn recent_innovations(&self, limit: usize) -> Result<Vec<Innovation>> {
        let state = self.state.read().await;
        Ok(state
            .insertion_order
            .iter()
            .rev()
            .filter_map(|id| state.innovations.get(id))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn recent_publications(&self, limit: usize) -> Result<Vec<Publication>> {
        let state = self.state.read().await;
        let mut publications: Vec<Publication> = state.publications.values().cloned().collect();
        publications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        publications.truncate(limit);
        Ok(publications)
    }

    async fn recent_reports(&self, limit: usize) -> Result<Vec<IntelligenceReport>> {
        let state = self.state.read().await;
        Ok(state.reports.iter().rev().take(limit).cloned().collect())
    }

    async fn record_link(&self, link: RecordLink) -> Result<()> {
        let mut state = self.state.write().await;
        state.links.push(link);
        Ok(())
    }

    async fn counts(&self) -> Result<StoreCounts> {
        let state = self.state.read().await;
        Ok(StoreCounts {
            innovations: state.innovations.len(),
            publications: state.publications.len(),
            reports: state.reports.len(),
            links: state.links.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{InnovationType, PublicationSource, RecordProvenance};
    use crate::sources::DataSource;
    use chrono::Utc;

    fn innovation(title: &str) -> Innovation {
        Innovation::new(
            title,
            "description",
            InnovationType::Startup,
            RecordProvenance {
                source: DataSource::Intelligence,
                source_id: None,
                collected_at: Utc::now(),
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_upsert_same_fingerprint_yields_one_row() {
        let store = MemoryPersistence::new();

        let first = store.upsert_innovation(innovation("Ilara Health")).await.unwrap();
        let second = store.upsert_innovation(innovation("Ilara Health")).await.unwrap();

        assert_eq!(first, UpsertOutcome::Inserted);
        assert_eq!(second, UpsertOutcome::Updated);
        assert_eq!(store.counts().await.unwrap().innovations, 1);
    }

    #[tokio::test]
    async fn test_publication_identity_lookup() {
        let store = MemoryPersistence::new();
        let publication = Publication::new(
            "NLP for Amharic",
            "",
            vec!["Bekele A".into()],
            Some(2024),
            PublicationSource::Arxiv,
            Some("2402.0001".into()),
            0.8,
            0.9,
            Utc::now(),
        )
        .with_doi("10.1000/amh");

        store.upsert_publication(publication).await.unwrap();

        let by_doi = store
            .find_publication_by_identity(&crate::dedup::exact_identity_key("doi", "10.1000/amh"))
            .await
            .unwrap();
        assert!(by_doi.is_some());

        let by_source_id = store
            .find_publication_by_identity(&crate::dedup::exact_identity_key(
                "source_id",
                "2402.0001",
            ))
            .await
            .unwrap();
        assert_eq!(by_doi.unwrap().id, by_source_id.unwrap().id);
    }

    #[tokio::test]
    async fn test_recent_innovations_newest_first() {
        let store = MemoryPersistence::new();
        store.upsert_innovation(innovation("First")).await.unwrap();
        store.upsert_innovation(innovation("Second")).await.unwrap();
        store.upsert_innovation(innovation("Third")).await.unwrap();

        let recent = store.recent_innovations(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].title, "Third");
        assert_eq!(recent[1].title, "Second");
    }

    #[tokio::test]
    async fn test_links_are_recorded() {
        let store = MemoryPersistence::new();
        store
            .record_link(RecordLink {
                from_id: "a".into(),
                to_id: "b".into(),
                kind: "same_event".into(),
            })
            .await
            .unwrap();
        assert_eq!(store.counts().await.unwrap().links, 1);
    }
}
