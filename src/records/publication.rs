//! Publication records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Map;

/// Upstream family a publication came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicationSource {
    Arxiv,
    Pubmed,
    Scholar,
    SystematicReview,
    Other,
}

/// Academic artifact admitted into the canonical store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Publication {
    pub id: String,
    /// Hash of normalized title + year + first-author surname.
    pub fingerprint: String,
    pub title: String,
    /// May be empty: some upstream paths never load an abstract.
    pub abstract_text: String,
    pub authors: Vec<String>,
    pub publication_date: Option<DateTime<Utc>>,
    pub year: Option<i32>,
    pub venue: Option<String>,
    pub doi: Option<String>,
    pub source: PublicationSource,
    pub source_id: Option<String>,
    pub keywords: Vec<String>,
    pub african_entities: Vec<String>,
    pub african_relevance_score: f64,
    pub ai_relevance_score: f64,
    pub development_stage: Option<String>,
    pub business_model: Option<String>,
    pub extracted_technologies: Vec<String>,
    pub impact_metrics: Map<String, serde_json::Value>,
    pub citation_count: Option<u32>,
    pub created_at: DateTime<Utc>,
}

impl Publication {
    /// Build a publication with scores clamped to `[0, 1]` and the
    /// fingerprint derived from its identity fields.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        title: impl Into<String>,
        abstract_text: impl Into<String>,
        authors: Vec<String>,
        year: Option<i32>,
        source: PublicationSource,
        source_id: Option<String>,
        african_relevance_score: f64,
        ai_relevance_score: f64,
        now: DateTime<Utc>,
    ) -> Self {
        let title = title.into();
        let first_author = authors.first().map(String::as_str);
        let fingerprint = crate::dedup::publication_fingerprint(&title, year, first_author);
        Self {
            id: crate::clock::new_prefixed_id("pub"),
            fingerprint,
            title,
            abstract_text: abstract_text.into(),
            authors,
            publication_date: None,
            year,
            venue: None,
            doi: None,
            source,
            source_id,
            keywords: Vec::new(),
            african_entities: Vec::new(),
            african_relevance_score: african_relevance_score.clamp(0.0, 1.0),
            ai_relevance_score: ai_relevance_score.clamp(0.0, 1.0),
            development_stage: None,
            business_model: None,
            extracted_technologies: Vec::new(),
            impact_metrics: Map::new(),
            citation_count: None,
            created_at: now,
        }
    }

    pub fn with_doi(mut self, doi: impl Into<String>) -> Self {
        self.doi = Some(doi.into());
        self
    }

    pub fn with_venue(mut self, venue: impl Into<String>) -> Self {
        self.venue = Some(venue.into());
        self
    }

    pub fn with_publication_date(mut self, date: DateTime<Utc>) -> Self {
        self.year = Some(chrono::Datelike::year(&date));
        self.publication_date = Some(date);
        self
    }

    pub fn with_keywords(mut self, keywords: Vec<String>) -> Self {
        self.keywords = keywords;
        self
    }

    pub fn with_african_entities(mut self, entities: Vec<String>) -> Self {
        self.african_entities = entities;
        self
    }

    /// Whether the publication clears both admission thresholds.
    pub fn passes_thresholds(&self, african_min: f64, ai_min: f64) -> bool {
        self.african_relevance_score >= african_min && self.ai_relevance_score >= ai_min
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scores_are_clamped() {
        let publication = Publication::new(
            "Deep learning for malaria diagnosis in Uganda",
            "abstract",
            vec!["Okello J".into()],
            Some(2024),
            PublicationSource::Pubmed,
            None,
            1.7,
            -0.2,
            Utc::now(),
        );
        assert_eq!(publication.african_relevance_score, 1.0);
        assert_eq!(publication.ai_relevance_score, 0.0);
    }

    #[test]
    fn test_threshold_admission() {
        let publication = Publication::new(
            "ML crop yields",
            "",
            vec![],
            None,
            PublicationSource::Arxiv,
            None,
            0.4,
            0.5,
            Utc::now(),
        );
        assert!(publication.passes_thresholds(0.3, 0.3));
        assert!(!publication.passes_thresholds(0.5, 0.3));
        assert!(!publication.passes_thresholds(0.3, 0.6));
    }

    #[test]
    fn test_same_identity_same_fingerprint() {
        let now = Utc::now();
        let a = Publication::new(
            "A Survey of NLP for African Languages",
            "one abstract",
            vec!["Adebayo T".into(), "Mensah K".into()],
            Some(2023),
            PublicationSource::Arxiv,
            Some("2301.00001".into()),
            0.8,
            0.9,
            now,
        );
        let b = Publication::new(
            "a survey of NLP for african languages!",
            "another abstract entirely",
            vec!["Adebayo T".into()],
            Some(2023),
            PublicationSource::Scholar,
            None,
            0.5,
            0.5,
            now,
        );
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_publication_date_sets_year() {
        let date = "2024-06-15T00:00:00Z".parse().unwrap();
        let publication = Publication::new(
            "t",
            "",
            vec![],
            None,
            PublicationSource::Other,
            None,
            0.5,
            0.5,
            Utc::now(),
        )
        .with_publication_date(date);
        assert_eq!(publication.year, Some(2024));
    }
}
