//! Configuration registry: feature flags, thresholds, TTLs, cost limits.
//!
//! Components receive the parts of [`Settings`] they need at
//! construction; nothing reads configuration from global state.

use std::collections::HashMap;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::sources::DataSource;

/// Feature flags controlling which pipelines and providers are active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub disable_ai_enrichment: bool,
    pub disable_external_search: bool,
    pub disable_rss_monitoring: bool,
    pub disable_academic_scraping: bool,
    pub enable_mock_data: bool,
    pub debug: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            disable_ai_enrichment: false,
            disable_external_search: false,
            disable_rss_monitoring: false,
            disable_academic_scraping: false,
            enable_mock_data: false,
            debug: false,
        }
    }
}

/// Admission and dedup thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thresholds {
    /// Minimum african_relevance_score for publication admission.
    pub african_relevance: f64,
    /// Minimum ai_relevance_score for publication admission.
    pub ai_relevance: f64,
    /// Per-source overrides for the two admission thresholds.
    pub per_source: HashMap<DataSource, (f64, f64)>,
    /// Vector similarity at or above which two titles are the same record.
    pub fuzzy_title_high: f64,
    /// Vector similarity at or above which two titles are merge candidates.
    pub fuzzy_title_low: f64,
    /// Minimum completeness for an extracted innovation candidate.
    pub min_completeness: f64,
    /// Minimum confidence for an extracted innovation candidate.
    pub min_confidence: f64,
    /// Backfill result confidence at or above which a value is written.
    pub backfill_write: f64,
    /// Backfill result confidence at or above which a value is flagged
    /// for review instead of discarded.
    pub backfill_review: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            african_relevance: 0.3,
            ai_relevance: 0.3,
            per_source: HashMap::new(),
            fuzzy_title_high: 0.92,
            fuzzy_title_low: 0.80,
            min_completeness: 0.3,
            min_confidence: 0.5,
            backfill_write: 0.8,
            backfill_review: 0.6,
        }
    }
}

impl Thresholds {
    /// Admission thresholds (african, ai) for a source.
    pub fn admission_for(&self, source: DataSource) -> (f64, f64) {
        self.per_source
            .get(&source)
            .copied()
            .unwrap_or((self.african_relevance, self.ai_relevance))
    }
}

/// Cost accounting limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostLimits {
    /// Daily spend ceiling across all costed sources, USD.
    pub daily_limit_usd: f64,
    /// Estimated cost of one intelligence call, USD.
    pub intelligence_call_usd: f64,
    /// Estimated cost of one web-search call, USD.
    pub websearch_call_usd: f64,
    /// Estimated cost of one scholarly-search call, USD.
    pub scholar_call_usd: f64,
}

impl Default for CostLimits {
    fn default() -> Self {
        Self {
            daily_limit_usd: 50.0,
            intelligence_call_usd: 0.10,
            websearch_call_usd: 0.02,
            scholar_call_usd: 0.005,
        }
    }
}

impl CostLimits {
    /// Estimated per-call cost for a source; free sources report 0.
    pub fn call_cost(&self, source: DataSource) -> f64 {
        match source {
            DataSource::Intelligence => self.intelligence_call_usd,
            DataSource::WebSearch => self.websearch_call_usd,
            DataSource::Scholar => self.scholar_call_usd,
            DataSource::Arxiv | DataSource::Pubmed | DataSource::NewsRss => 0.0,
        }
    }
}

/// Per-source rate limiting and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcePolicy {
    /// Sustained requests per minute granted by the token bucket.
    pub requests_per_minute: u32,
    /// Maximum in-flight calls.
    pub max_concurrency: usize,
    /// Maximum attempts per call (1 = no retry).
    pub max_attempts: u32,
    /// Base delay for exponential backoff, milliseconds.
    pub backoff_base_ms: u64,
    /// Deadline for a single attempt, milliseconds.
    pub attempt_timeout_ms: u64,
    /// How long a caller may block waiting for a rate token, milliseconds.
    pub token_wait_ms: u64,
}

impl Default for SourcePolicy {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            max_concurrency: 4,
            max_attempts: 3,
            backoff_base_ms: 200,
            attempt_timeout_ms: 30_000,
            token_wait_ms: 10_000,
        }
    }
}

/// Cache TTL tables.
#[derive(Debug, Clone)]
pub struct CacheTtls {
    positive: HashMap<DataSource, Duration>,
}

impl Default for CacheTtls {
    fn default() -> Self {
        let mut positive = HashMap::new();
        positive.insert(DataSource::Intelligence, Duration::hours(24));
        positive.insert(DataSource::WebSearch, Duration::hours(6));
        positive.insert(DataSource::Scholar, Duration::hours(12));
        positive.insert(DataSource::Arxiv, Duration::hours(24));
        positive.insert(DataSource::Pubmed, Duration::hours(24));
        positive.insert(DataSource::NewsRss, Duration::hours(1));
        Self { positive }
    }
}

impl CacheTtls {
    /// Positive-entry TTL for a source.
    pub fn positive(&self, source: DataSource) -> Duration {
        self.positive
            .get(&source)
            .copied()
            .unwrap_or_else(|| Duration::hours(6))
    }

    /// Negative TTL for a `no_results` entry: half the positive TTL,
    /// capped at six hours.
    pub fn no_results(&self, source: DataSource) -> Duration {
        let half = self.positive(source) / 2;
        half.min(Duration::hours(6))
    }
}

/// Root settings aggregate.
#[derive(Debug, Clone)]
pub struct Settings {
    pub flags: FeatureFlags,
    pub thresholds: Thresholds,
    pub cost: CostLimits,
    pub ttls: CacheTtls,
    /// Per-source policies; sources absent from the map use the default.
    pub policies: HashMap<DataSource, SourcePolicy>,
    /// Maximum records pulled per adapter invocation.
    pub max_batch_size: usize,
    /// Intelligence calls allowed per minute (overrides the policy table).
    pub max_ai_calls_per_minute: u32,
    /// Per-phase concurrency cap inside a collection cycle.
    pub phase_concurrency: usize,
    /// Snowball resolution bounds.
    pub snowball_max_depth: u32,
    pub snowball_max_citations: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self::new()
    }
}

impl Settings {
    pub fn new() -> Self {
        Self {
            flags: FeatureFlags::default(),
            thresholds: Thresholds::default(),
            cost: CostLimits::default(),
            ttls: CacheTtls::default(),
            policies: HashMap::new(),
            max_batch_size: 100,
            max_ai_calls_per_minute: 10,
            phase_concurrency: 4,
            snowball_max_depth: 2,
            snowball_max_citations: 15,
        }
    }

    pub fn with_flags(mut self, flags: FeatureFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_daily_cost_limit(mut self, usd: f64) -> Self {
        self.cost.daily_limit_usd = usd;
        self
    }

    pub fn with_policy(mut self, source: DataSource, policy: SourcePolicy) -> Self {
        self.policies.insert(source, policy);
        self
    }

    /// Effective policy for a source.
    pub fn policy(&self, source: DataSource) -> SourcePolicy {
        let mut policy = self.policies.get(&source).cloned().unwrap_or_default();
        if source == DataSource::Intelligence {
            policy.requests_per_minute = policy.requests_per_minute.min(self.max_ai_calls_per_minute);
        }
        policy
    }
}
