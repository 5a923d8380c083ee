//! # taifa-core
//!
//! Collection orchestration core for tracking African AI innovations.
//!
//! The crate ingests records from heterogeneous upstreams (academic
//! preprint feeds, a biomedical citation index, news RSS, web and
//! scholarly search APIs, and an LLM intelligence API), deduplicates
//! them against prior state, enriches them, and emits canonical records
//! to a relational store and a vector index.
//!
//! ## Core Components
//!
//! - **Cache**: two-tier (LRU + durable SQLite) response cache with
//!   negative caching and single-flight collapse
//! - **Mediator**: per-provider rate limits, retries, cost accounting
//! - **Sources**: one adapter per upstream, all calls mediated
//! - **Dedup**: layered fingerprint / exact-identity / fuzzy-title
//!   matching with per-path policies
//! - **Orchestrator**: sequential phases over concurrent pipelines,
//!   each pipeline under a single-flight supervisor
//! - **Backfill**: cost-bounded enrichment of incomplete records
//!
//! ## Example
//!
//! ```rust,ignore
//! use taifa_core::{CollectionService, EnrichmentParams, Settings};
//!
//! let service = CollectionService::builder(Settings::new())
//!     .with_perplexity_key("pplx-...")
//!     .with_websearch_key("serper-...")
//!     .with_cache_path("cache.db")
//!     .init()?;
//!
//! let result = service.run_cycle(&EnrichmentParams::default()).await;
//! println!("processed {} items", result.total_items_processed);
//! ```

pub mod backfill;
pub mod cache;
pub mod clock;
pub mod config;
pub mod dedup;
pub mod error;
pub mod extract;
pub mod mediator;
pub mod orchestrator;
pub mod pipeline;
pub mod providers;
pub mod records;
pub mod scheduler;
pub mod service;
pub mod sources;
pub mod store;

// Re-exports for convenience
pub use backfill::{
    BackfillEngine, BackfillJob, BackfillPriority, BackfillStats, BackfillStatus,
    BackfillStrategy, FieldResult, MissingField,
};
pub use cache::{
    CacheKey, CacheStats, Flight, FlightOutcome, Lookup, NegativeReason, SingleFlight,
    TieredCache,
};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{CacheTtls, CostLimits, FeatureFlags, Settings, SourcePolicy, Thresholds};
pub use dedup::{
    article_fingerprint, exact_identity_key, innovation_fingerprint, publication_fingerprint,
    DedupOutcome, DedupPolicy, Deduplicator,
};
pub use error::{Error, Result};
pub use extract::{extract_report, StructuredFinding};
pub use mediator::{CostSnapshot, Mediated, Mediator};
pub use orchestrator::{
    AcademicParams, Adapters, CollectionCycleResult, CollectionOrchestrator, EnrichmentParams,
};
pub use pipeline::{
    PipelineName, PipelineRun, RunCounters, RunMetrics, RunOutcome, RunStatus, StartOutcome,
    Supervisor, SupervisorRegistry, SupervisorStatus,
};
pub use providers::{
    Embedder, IntelligenceProvider, OpenAiProvider, PerplexityProvider, ProviderConfig,
    ProviderName, ProviderRegistry, ReportPayload, SynthesisRequest,
};
pub use records::{
    ExtractedCitation, FundingEvent, Innovation, InnovationType, IntelligenceReport, Publication,
    PublicationSource, ReportType, ResolutionState, VerificationStatus, Visibility,
};
pub use scheduler::{ScheduleConfig, Scheduler, SchedulerStatus};
pub use service::{CollectionService, PipelineResults, ServiceBuilder, TriggerOutcome, WarmTask};
pub use sources::{
    ArxivAdapter, DataSource, FetchPage, FetchSpec, IntelligenceAdapter, NewsArticle, PageToken,
    ParseOutcome, PubmedAdapter, RawIntelligence, RawRecord, RssAdapter, ScholarAdapter,
    ScholarHit, SearchHit, SourceAdapter, TypedRecord, WebSearchAdapter,
};
pub use store::vector::{HashingEmbedder, MemoryVectorIndex, ScoredId, VectorIndex};
pub use store::{MemoryPersistence, Persistence, RecordLink, StoreCounts, UpsertOutcome};
