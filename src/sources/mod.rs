//! Source adapters for the upstream providers.
//!
//! Each adapter turns a provider into two operations: `fetch`, a
//! restartable paged pull of raw records, and `parse`, which converts a
//! raw record into a typed record or a discard. Adapters never talk to
//! the network directly; every outbound call goes through the mediator
//! so caching, rate limiting, and cost accounting apply uniformly.

mod arxiv;
mod intelligence;
mod pubmed;
pub mod relevance;
mod rss;
mod scholar;
mod websearch;

pub use arxiv::ArxivAdapter;
pub use intelligence::{IntelligenceAdapter, RawIntelligence};
pub use pubmed::PubmedAdapter;
pub use rss::{NewsArticle, RssAdapter};
pub use scholar::{ScholarAdapter, ScholarHit};
pub use websearch::{SearchHit, WebSearchAdapter};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::records::{Publication, ReportType};

/// Upstream source family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Arxiv,
    Pubmed,
    NewsRss,
    WebSearch,
    Scholar,
    Intelligence,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Arxiv => "arxiv",
            Self::Pubmed => "pubmed",
            Self::NewsRss => "news_rss",
            Self::WebSearch => "websearch",
            Self::Scholar => "scholar",
            Self::Intelligence => "intelligence",
        }
    }
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What to pull from a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FetchSpec {
    /// Keyword-driven query, optionally date-bounded.
    Keyword {
        query: String,
        max_results: usize,
        days_back: Option<i64>,
    },
    /// Time-window pull (news feeds).
    Window { hours: i64, max_results: usize },
    /// Intelligence synthesis request.
    Report {
        report_type: ReportType,
        time_period: String,
        geographic_focus: Vec<String>,
    },
}

/// Opaque pagination cursor; adapters interpret it as an offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageToken(pub usize);

impl PageToken {
    pub fn first() -> Self {
        Self(0)
    }
}

/// One raw record as delivered by a provider, before parsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    pub source: DataSource,
    pub payload: serde_json::Value,
    pub fetched_at: DateTime<Utc>,
}

/// A bounded page of raw records plus the cursor for the next page.
#[derive(Debug, Clone, Default)]
pub struct FetchPage {
    pub records: Vec<RawRecord>,
    pub next: Option<PageToken>,
}

impl FetchPage {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Why a raw record was not turned into a typed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    BelowRelevanceThreshold,
    MissingRequiredField,
    MalformedPayload,
    OutsideWindow,
}

/// A parsed record, typed per source family.
#[derive(Debug, Clone)]
pub enum TypedRecord {
    Publication(Box<Publication>),
    News(Box<NewsArticle>),
    Search(SearchHit),
    ScholarHit(ScholarHit),
    Intelligence(RawIntelligence),
}

/// Result of parsing one raw record.
#[derive(Debug, Clone)]
pub enum ParseOutcome {
    Record(TypedRecord),
    Discard(DiscardReason),
}

/// A source adapter: paged fetch plus per-record parse.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Which upstream this adapter fronts.
    fn source(&self) -> DataSource;

    /// Fetch one page of raw records. Finite: a `None` next token ends
    /// the sequence. Restartable: fetching the same page twice is safe
    /// (and usually served from cache).
    async fn fetch(&self, spec: &FetchSpec, page: PageToken) -> Result<FetchPage>;

    /// Parse a raw record into a typed record or a discard.
    fn parse(&self, raw: &RawRecord) -> ParseOutcome;
}

/// Drain an adapter into typed records, bounded by `max_records`.
///
/// Records are processed in fetch order so that first-seen wins dedup
/// ties. Discards are returned alongside for run accounting.
pub async fn collect_records(
    adapter: &dyn SourceAdapter,
    spec: &FetchSpec,
    max_records: usize,
) -> Result<(Vec<TypedRecord>, Vec<DiscardReason>)> {
    let mut records = Vec::new();
    let mut discards = Vec::new();
    let mut page = Some(PageToken::first());

    while let Some(token) = page {
        if records.len() >= max_records {
            break;
        }
        let fetched = adapter.fetch(spec, token).await?;
        for raw in &fetched.records {
            if records.len() >= max_records {
                break;
            }
            match adapter.parse(raw) {
                ParseOutcome::Record(record) => records.push(record),
                ParseOutcome::Discard(reason) => discards.push(reason),
            }
        }
        if fetched.records.is_empty() {
            break;
        }
        page = fetched.next;
    }

    Ok((records, discards))
}
