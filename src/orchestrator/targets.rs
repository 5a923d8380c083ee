//! Target extraction.
//!
//! Discovered URLs are classified by host, paired with whatever the
//! intelligence layer already knows about them, and turned into
//! candidate innovation records with completeness and confidence
//! scores. Wire-level page scraping belongs to the external extractor;
//! this module only works with data the pipelines already hold.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::records::{
    Innovation, InnovationMention, InnovationType, RecordProvenance,
};
use crate::sources::DataSource;

/// Content family behind a URL, decided by host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    StartupProfile,
    Repository,
    Paper,
    NewsArticle,
}

/// Priority of a collection target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetPriority {
    Urgent = 0,
    High = 1,
    Medium = 2,
    Low = 3,
}

/// A discovered URL awaiting extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionTarget {
    pub id: String,
    pub url: String,
    pub content_type: ContentType,
    pub priority: TargetPriority,
    pub company_name: Option<String>,
    pub description: String,
    pub location: Option<String>,
    pub confidence: f64,
    pub discovered_at: DateTime<Utc>,
}

const NEWS_HOSTS: &[&str] = &[
    "techcabal.com",
    "disrupt-africa.com",
    "techcrunch.com",
    "techpoint.africa",
    "ventureburn.com",
];

const PAPER_HOSTS: &[&str] = &["arxiv.org", "pubmed.ncbi.nlm.nih.gov", "doi.org", "ncbi.nlm.nih.gov"];

const REPO_HOSTS: &[&str] = &["github.com", "gitlab.com", "huggingface.co"];

/// Classify a URL by its host.
pub fn classify_url(url: &str) -> ContentType {
    let host = url
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_start_matches("www.")
        .split('/')
        .next()
        .unwrap_or("");

    if REPO_HOSTS.iter().any(|h| host.ends_with(h)) {
        ContentType::Repository
    } else if PAPER_HOSTS.iter().any(|h| host.ends_with(h)) {
        ContentType::Paper
    } else if NEWS_HOSTS.iter().any(|h| host.ends_with(h)) {
        ContentType::NewsArticle
    } else {
        ContentType::StartupProfile
    }
}

/// Build a target from an innovation mention plus its discovered URL.
pub fn target_from_mention(
    mention: &InnovationMention,
    url: String,
    now: DateTime<Utc>,
) -> CollectionTarget {
    let content_type = classify_url(&url);
    let priority = match content_type {
        ContentType::StartupProfile => TargetPriority::High,
        ContentType::NewsArticle => TargetPriority::Medium,
        ContentType::Repository => TargetPriority::Medium,
        ContentType::Paper => TargetPriority::Low,
    };
    CollectionTarget {
        id: crate::clock::new_prefixed_id("tgt"),
        url,
        content_type,
        priority,
        company_name: Some(mention.company_name.clone()),
        description: mention.description.clone(),
        location: mention.location.clone(),
        confidence: mention.confidence,
        discovered_at: now,
    }
}

/// Candidate record plus its admission scores.
#[derive(Debug, Clone)]
pub struct ExtractedCandidate {
    pub innovation: Innovation,
    pub completeness: f64,
    pub confidence: f64,
}

/// Apply the content-type-specific extraction schema to a target.
pub fn extract_candidate(target: &CollectionTarget, now: DateTime<Utc>) -> Option<ExtractedCandidate> {
    let company_name = target.company_name.as_deref()?.trim();
    if company_name.is_empty() {
        return None;
    }

    let innovation_type = match target.content_type {
        ContentType::Repository => InnovationType::Platform,
        ContentType::Paper => InnovationType::Research,
        _ => InnovationType::Startup,
    };

    let mut innovation = Innovation::new(
        company_name,
        target.description.clone(),
        innovation_type,
        RecordProvenance {
            source: DataSource::Intelligence,
            source_id: None,
            collected_at: target.discovered_at,
        },
        now,
    );
    innovation.source_url = Some(target.url.clone());
    match target.content_type {
        ContentType::Repository => innovation.github_url = Some(target.url.clone()),
        ContentType::StartupProfile => innovation.website_url = Some(target.url.clone()),
        _ => {}
    }
    if let Some(location) = &target.location {
        innovation.country = Some(location.clone());
    }

    let completeness = innovation.completeness();
    // URL provenance raises trust in the mention's own confidence.
    let confidence = (target.confidence + 0.1).min(1.0);

    Some(ExtractedCandidate {
        innovation,
        completeness,
        confidence,
    })
}

/// Deduplicate targets by URL and order them by priority.
pub fn prioritize_targets(mut targets: Vec<CollectionTarget>) -> Vec<CollectionTarget> {
    let mut seen = std::collections::HashSet::new();
    targets.retain(|t| seen.insert(t.url.clone()));
    targets.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then(b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal))
    });
    targets
}
