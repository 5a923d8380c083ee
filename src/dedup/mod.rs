//! Deduplication engine.
//!
//! Layered identity testing, short-circuiting on the first match:
//! exact upstream identity, canonical fingerprint, then fuzzy-title
//! similarity against the vector index. What happens on a match is
//! policy-driven per ingestion path.

mod fingerprint;
pub mod relationships;

pub use fingerprint::{
    article_fingerprint, exact_identity_key, innovation_fingerprint, normalize_title,
    publication_fingerprint,
};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::records::{Innovation, Publication};
use crate::store::vector::VectorIndex;
use crate::store::{Persistence, RecordLink};

/// What to do when a candidate matches an existing canonical record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Discard the candidate, return a pointer to the canonical record.
    Reject,
    /// Union attribute sets into the canonical record.
    Merge,
    /// Overwrite canonical scalars when the candidate is more reliable.
    Update,
    /// Keep both records with a directed link candidate → canonical.
    Link,
}

/// Decision for one candidate record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupOutcome {
    /// No duplicate found; the candidate was stored.
    Unique { id: String },
    Rejected { canonical_id: String },
    Merged { canonical_id: String },
    Updated { canonical_id: String },
    Linked { id: String, canonical_id: String },
}

impl DedupOutcome {
    pub fn is_duplicate(&self) -> bool {
        !matches!(self, Self::Unique { .. })
    }
}

/// The engine. Holds gateways by `Arc`; it is shared across pipelines.
pub struct Deduplicator {
    store: Arc<dyn Persistence>,
    index: Arc<dyn VectorIndex>,
    /// Similarity at or above which a title is the same record.
    fuzzy_high: f64,
    /// Similarity at or above which a title is a merge candidate.
    fuzzy_low: f64,
}

impl Deduplicator {
    pub fn new(
        store: Arc<dyn Persistence>,
        index: Arc<dyn VectorIndex>,
        fuzzy_high: f64,
        fuzzy_low: f64,
    ) -> Self {
        Self {
            store,
            index,
            fuzzy_high,
            fuzzy_low,
        }
    }

    /// Deduplicate an innovation candidate against the store.
    pub async fn dedup_innovation(
        &self,
        candidate: Innovation,
        policy: DedupPolicy,
    ) -> Result<DedupOutcome> {
        let existing = match self
            .store
            .find_innovation_by_fingerprint(&candidate.fingerprint)
            .await?
        {
            Some(found) => Some(found),
            None => self.fuzzy_match_innovation(&candidate, policy).await?,
        };

        let Some(existing) = existing else {
            let id = candidate.id.clone();
            let title = candidate.title.clone();
            self.store.upsert_innovation(candidate).await?;
            self.index.upsert(&id, &title).await?;
            return Ok(DedupOutcome::Unique { id });
        };

        debug!(candidate = %candidate.title, canonical = %existing.id, "duplicate innovation");
        match policy {
            DedupPolicy::Reject => Ok(DedupOutcome::Rejected {
                canonical_id: existing.id,
            }),
            DedupPolicy::Merge => {
                let canonical_id = existing.id.clone();
                let merged = merge_innovations(existing, candidate);
                self.store.update_innovation(merged).await?;
                Ok(DedupOutcome::Merged { canonical_id })
            }
            DedupPolicy::Update => {
                let canonical_id = existing.id.clone();
                if candidate.provenance.reliability() > existing.provenance.reliability() {
                    let mut updated = candidate;
                    updated.id = canonical_id.clone();
                    // Lifecycle state survives the overwrite.
                    updated.verification_status = existing
                        .verification_status
                        .strongest(updated.verification_status);
                    updated.visibility = existing.visibility;
                    self.store.update_innovation(updated).await?;
                }
                Ok(DedupOutcome::Updated { canonical_id })
            }
            DedupPolicy::Link => {
                let id = candidate.id.clone();
                self.store.upsert_innovation(candidate).await?;
                self.store
                    .record_link(RecordLink {
                        from_id: id.clone(),
                        to_id: existing.id.clone(),
                        kind: "duplicate_of".to_string(),
                    })
                    .await?;
                Ok(DedupOutcome::Linked {
                    id,
                    canonical_id: existing.id,
                })
            }
        }
    }

    /// Deduplicate a publication candidate. The exact-identity layer
    /// (DOI, upstream id) runs before the fingerprint layer.
    pub async fn dedup_publication(
        &self,
        candidate: Publication,
        policy: DedupPolicy,
    ) -> Result<DedupOutcome> {
        let mut existing = None;
        for key in identity_keys(&candidate) {
            if let Some(found) = self.store.find_publication_by_identity(&key).await? {
                existing = Some(found);
                break;
            }
        }
        if existing.is_none() {
            existing = self
                .store
                .find_publication_by_fingerprint(&candidate.fingerprint)
                .await?;
        }
        if existing.is_none() {
            existing = self.fuzzy_match_publication(&candidate, policy).await?;
        }

        let Some(existing) = existing else {
            let id = candidate.id.clone();
            let title = candidate.title.clone();
            self.store.upsert_publication(candidate).await?;
            self.index.upsert(&id, &title).await?;
            return Ok(DedupOutcome::Unique { id });
        };

        match policy {
            DedupPolicy::Reject => Ok(DedupOutcome::Rejected {
                canonical_id: existing.id,
            }),
            DedupPolicy::Merge | DedupPolicy::Update => {
                let canonical_id = existing.id.clone();
                let merged = merge_publications(existing, candidate);
                self.store.upsert_publication(merged).await?;
                Ok(DedupOutcome::Merged { canonical_id })
            }
            DedupPolicy::Link => {
                let id = candidate.id.clone();
                self.store.upsert_publication(candidate).await?;
                self.store
                    .record_link(RecordLink {
                        from_id: id.clone(),
                        to_id: existing.id.clone(),
                        kind: "duplicate_of".to_string(),
                    })
                    .await?;
                Ok(DedupOutcome::Linked {
                    id,
                    canonical_id: existing.id,
                })
            }
        }
    }

    async fn fuzzy_match_innovation(
        &self,
        candidate: &Innovation,
        policy: DedupPolicy,
    ) -> Result<Option<Innovation>> {
        let Some(top) = self.index.search(&candidate.title, 1).await?.into_iter().next() else {
            return Ok(None);
        };
        if !self.similarity_is_duplicate(top.score, policy) {
            return Ok(None);
        }
        self.store.get_innovation(&top.id).await
    }

    async fn fuzzy_match_publication(
        &self,
        candidate: &Publication,
        policy: DedupPolicy,
    ) -> Result<Option<Publication>> {
        let Some(top) = self.index.search(&candidate.title, 1).await?.into_iter().next() else {
            return Ok(None);
        };
        if !self.similarity_is_duplicate(top.score, policy) {
            return Ok(None);
        }
        // The index holds both record families; only a publication id
        // resolves here.
        let state = self.store.recent_publications(usize::MAX).await?;
        Ok(state.into_iter().find(|p| p.id == top.id))
    }

    /// Above `fuzzy_high` is always a duplicate. The band between the
    /// thresholds is a merge candidate: honored under merge-like
    /// policies, ignored under reject/update so borderline records are
    /// not silently dropped.
    fn similarity_is_duplicate(&self, score: f64, policy: DedupPolicy) -> bool {
        if score >= self.fuzzy_high {
            return true;
        }
        score >= self.fuzzy_low && matches!(policy, DedupPolicy::Merge | DedupPolicy::Link)
    }
}

fn identity_keys(publication: &Publication) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(doi) = &publication.doi {
        keys.push(exact_identity_key("doi", doi));
    }
    if let Some(source_id) = &publication.source_id {
        keys.push(exact_identity_key("source_id", source_id));
    }
    keys
}

/// Union of attribute sets; scalar conflicts resolve toward the more
/// reliable source, ties toward the more recent record. Verification
/// status is never downgraded.
pub fn merge_innovations(existing: Innovation, candidate: Innovation) -> Innovation {
    let candidate_wins = candidate.provenance.reliability() > existing.provenance.reliability()
        || (candidate.provenance.reliability() == existing.provenance.reliability()
            && candidate.provenance.collected_at > existing.provenance.collected_at);

    let mut merged = existing.clone();

    if candidate_wins {
        if !candidate.description.is_empty() {
            merged.description = candidate.description.clone();
        }
        if candidate.country.is_some() {
            merged.country = candidate.country.clone();
        }
        if candidate.creation_date.is_some() {
            merged.creation_date = candidate.creation_date;
        }
    } else {
        if merged.description.is_empty() {
            merged.description = candidate.description.clone();
        }
        merged.country = merged.country.or(candidate.country);
        merged.creation_date = merged.creation_date.or(candidate.creation_date);
    }

    merged.website_url = merged.website_url.or(candidate.website_url);
    merged.source_url = merged.source_url.or(candidate.source_url);
    merged.github_url = merged.github_url.or(candidate.github_url);
    merged.demo_url = merged.demo_url.or(candidate.demo_url);

    for funding in candidate.fundings {
        if !merged.fundings.contains(&funding) {
            merged.fundings.push(funding);
        }
    }
    for org in candidate.organizations {
        if !merged.organizations.contains(&org) {
            merged.organizations.push(org);
        }
    }
    for person in candidate.individuals {
        if !merged.individuals.contains(&person) {
            merged.individuals.push(person);
        }
    }
    for tag in candidate.tags {
        if !merged.tags.contains(&tag) {
            merged.tags.push(tag);
        }
    }
    for (key, value) in candidate.impact_metrics {
        merged.impact_metrics.entry(key).or_insert(value);
    }

    merged.verification_status = existing
        .verification_status
        .strongest(candidate.verification_status);
    merged.updated_at = existing.updated_at.max(candidate.updated_at);
    merged
}

fn merge_publications(existing: Publication, candidate: Publication) -> Publication {
    let mut merged = existing;
    if merged.abstract_text.is_empty() {
        merged.abstract_text = candidate.abstract_text;
    }
    merged.doi = merged.doi.or(candidate.doi);
    merged.venue = merged.venue.or(candidate.venue);
    merged.publication_date = merged.publication_date.or(candidate.publication_date);
    merged.year = merged.year.or(candidate.year);
    merged.citation_count = merged.citation_count.max(candidate.citation_count);
    for keyword in candidate.keywords {
        if !merged.keywords.contains(&keyword) {
            merged.keywords.push(keyword);
        }
    }
    for entity in candidate.african_entities {
        if !merged.african_entities.contains(&entity) {
            merged.african_entities.push(entity);
        }
    }
    merged.african_relevance_score = merged
        .african_relevance_score
        .max(candidate.african_relevance_score);
    merged.ai_relevance_score = merged.ai_relevance_score.max(candidate.ai_relevance_score);
    merged
}
