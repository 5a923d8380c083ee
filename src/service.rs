//! Process-level service facade.
//!
//! Owns the wired component graph with an explicit `init`/`shutdown`
//! lifecycle and exposes the control-surface operations the surrounding
//! HTTP router calls: pipeline triggers and status, scheduler control,
//! cache administration, and backfill. Components are injected through
//! the builder; nothing is looked up from global state.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::backfill::{BackfillEngine, BackfillJob, BackfillStats};
use crate::cache::{CacheStats, TieredCache};
use crate::clock::{SharedClock, SystemClock};
use crate::config::Settings;
use crate::dedup::Deduplicator;
use crate::error::{Error, Result};
use crate::mediator::Mediator;
use crate::orchestrator::{
    Adapters, CollectionCycleResult, CollectionOrchestrator, EnrichmentParams,
};
use crate::pipeline::{PipelineName, StartOutcome, SupervisorStatus};
use crate::providers::{
    IntelligenceProvider, OpenAiProvider, PerplexityProvider, ProviderConfig, ProviderName,
    ProviderRegistry, ReportPayload, SynthesisRequest,
};
use crate::records::{Innovation, IntelligenceReport, Publication};
use crate::scheduler::{ScheduleConfig, Scheduler, SchedulerStatus};
use crate::sources::{
    ArxivAdapter, DataSource, FetchSpec, IntelligenceAdapter, PageToken, PubmedAdapter,
    RssAdapter, ScholarAdapter, SourceAdapter, WebSearchAdapter,
};
use crate::store::vector::{HashingEmbedder, MemoryVectorIndex, VectorIndex};
use crate::store::{MemoryPersistence, Persistence};

/// Result of a trigger request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOutcome {
    Accepted,
    AlreadyRunning,
    Disabled,
}

/// A cache warm-up task: pre-run one fetch so later triggers hit cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmTask {
    pub source: DataSource,
    pub spec: FetchSpec,
}

/// Recent-output view returned by `results`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineResults {
    Innovations(Vec<Innovation>),
    Publications(Vec<Publication>),
    Reports(Vec<IntelligenceReport>),
}

/// Canned provider for mock-data mode: deterministic prose, no network.
struct MockIntelligenceProvider;

#[async_trait]
impl IntelligenceProvider for MockIntelligenceProvider {
    async fn synthesize(&self, request: SynthesisRequest) -> Result<ReportPayload> {
        Ok(ReportPayload {
            content: format!(
                "1. Mock startup AfriMock launched an AI analytics product in Kenya \
                 (https://afrimock.example/launch).\n\
                 2. The startup AfriMock raised $1.5 million seed funding.\n\
                 Sources: https://afrimock.example/launch\n\n[prompt: {}]",
                request.prompt.chars().take(40).collect::<String>()
            ),
            response_id: "mock-response".to_string(),
        })
    }

    fn name(&self) -> ProviderName {
        ProviderName::Perplexity
    }
}

/// Builder for [`CollectionService`].
pub struct ServiceBuilder {
    settings: Settings,
    cache_path: Option<PathBuf>,
    rss_feeds: Vec<String>,
    websearch_api_key: Option<String>,
    scholar_api_key: Option<String>,
    perplexity_api_key: Option<String>,
    openai_api_key: Option<String>,
    store: Option<Arc<dyn Persistence>>,
    index: Option<Arc<dyn VectorIndex>>,
    provider_override: Option<Arc<dyn IntelligenceProvider>>,
    clock: Option<SharedClock>,
}

impl ServiceBuilder {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            cache_path: None,
            rss_feeds: Vec::new(),
            websearch_api_key: None,
            scholar_api_key: None,
            perplexity_api_key: None,
            openai_api_key: None,
            store: None,
            index: None,
            provider_override: None,
            clock: None,
        }
    }

    /// Durable cache location; omitted means fully in-memory.
    pub fn with_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    pub fn with_rss_feeds(mut self, feeds: Vec<String>) -> Self {
        self.rss_feeds = feeds;
        self
    }

    pub fn with_websearch_key(mut self, key: impl Into<String>) -> Self {
        self.websearch_api_key = Some(key.into());
        self
    }

    pub fn with_scholar_key(mut self, key: impl Into<String>) -> Self {
        self.scholar_api_key = Some(key.into());
        self
    }

    pub fn with_perplexity_key(mut self, key: impl Into<String>) -> Self {
        self.perplexity_api_key = Some(key.into());
        self
    }

    pub fn with_openai_key(mut self, key: impl Into<String>) -> Self {
        self.openai_api_key = Some(key.into());
        self
    }

    /// Inject a persistence gateway (production deployments do).
    pub fn with_store(mut self, store: Arc<dyn Persistence>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_vector_index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn IntelligenceProvider>) -> Self {
        self.provider_override = Some(provider);
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Wire the component graph and start supervision bookkeeping.
    pub fn init(self) -> Result<CollectionService> {
        let settings = self.settings;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));

        let cache = Arc::new(match &self.cache_path {
            Some(path) => TieredCache::open(path, settings.ttls.clone(), clock.clone())?,
            None => TieredCache::in_memory(settings.ttls.clone(), clock.clone())?,
        });

        let policies = policy_table(&settings);
        let mediator = Arc::new(Mediator::new(
            cache,
            clock.clone(),
            settings.cost.clone(),
            policies,
        ));

        let store: Arc<dyn Persistence> = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryPersistence::new()));
        let index: Arc<dyn VectorIndex> = self
            .index
            .unwrap_or_else(|| Arc::new(MemoryVectorIndex::new(Arc::new(HashingEmbedder::new()))));

        let provider: Arc<dyn IntelligenceProvider> = match self.provider_override {
            Some(provider) => provider,
            None if settings.flags.enable_mock_data => Arc::new(MockIntelligenceProvider),
            None => {
                let key = self
                    .perplexity_api_key
                    .clone()
                    .ok_or_else(|| Error::Config("missing intelligence provider key".into()))?;
                Arc::new(PerplexityProvider::new(ProviderConfig::new(key))?)
            }
        };

        let mut registry = ProviderRegistry::new().with_provider(Arc::clone(&provider));
        if let Some(openai_key) = &self.openai_api_key {
            registry = registry.with_provider(Arc::new(OpenAiProvider::new(ProviderConfig::new(
                openai_key.clone(),
            ))?));
        }
        let providers = Arc::new(registry);

        let http = Client::new();
        let thresholds_arxiv = settings.thresholds.admission_for(DataSource::Arxiv);
        let thresholds_pubmed = settings.thresholds.admission_for(DataSource::Pubmed);

        let websearch: Arc<dyn SourceAdapter> = Arc::new(WebSearchAdapter::new(
            Arc::clone(&mediator),
            http.clone(),
            self.websearch_api_key.unwrap_or_default(),
        ));
        let adapters = Adapters {
            arxiv: Arc::new(ArxivAdapter::new(
                Arc::clone(&mediator),
                http.clone(),
                thresholds_arxiv,
            )),
            pubmed: Arc::new(PubmedAdapter::new(
                Arc::clone(&mediator),
                http.clone(),
                thresholds_pubmed,
            )),
            rss: Arc::new(RssAdapter::new(
                Arc::clone(&mediator),
                http.clone(),
                self.rss_feeds,
            )),
            websearch: Arc::clone(&websearch),
            scholar: Arc::new(ScholarAdapter::new(
                Arc::clone(&mediator),
                http,
                self.scholar_api_key.unwrap_or_default(),
            )),
            intelligence: Arc::new(IntelligenceAdapter::new(
                Arc::clone(&mediator),
                provider,
            )),
        };

        let dedup = Arc::new(Deduplicator::new(
            Arc::clone(&store),
            Arc::clone(&index),
            settings.thresholds.fuzzy_title_high,
            settings.thresholds.fuzzy_title_low,
        ));
        let supervisors = Arc::new(crate::pipeline::SupervisorRegistry::new(clock.clone()));
        let backfill = Arc::new(
            BackfillEngine::new(
                Arc::clone(&store),
                Arc::clone(&mediator),
                providers,
                websearch,
                clock.clone(),
                settings.cost.clone(),
                settings.thresholds.backfill_write,
                settings.thresholds.backfill_review,
            )
            .with_search_enabled(!settings.flags.disable_external_search),
        );

        let orchestrator = Arc::new(CollectionOrchestrator::new(
            settings,
            clock,
            mediator,
            store,
            dedup,
            Arc::clone(&supervisors),
            backfill,
            adapters,
        ));

        // Restart recovery: runs left open by a crash become failed.
        let recovered = supervisors.recover_stale_runs(chrono::Duration::hours(2));
        if recovered > 0 {
            info!(recovered, "recovered stale pipeline runs");
        }

        let scheduler = Scheduler::new(Arc::clone(&orchestrator), ScheduleConfig::default());

        Ok(CollectionService {
            orchestrator,
            scheduler,
        })
    }
}

fn policy_table(
    settings: &Settings,
) -> std::collections::HashMap<DataSource, crate::config::SourcePolicy> {
    [
        DataSource::Arxiv,
        DataSource::Pubmed,
        DataSource::NewsRss,
        DataSource::WebSearch,
        DataSource::Scholar,
        DataSource::Intelligence,
    ]
    .into_iter()
    .map(|source| (source, settings.policy(source)))
    .collect()
}

/// The wired service.
pub struct CollectionService {
    orchestrator: Arc<CollectionOrchestrator>,
    scheduler: Scheduler,
}

impl CollectionService {
    pub fn builder(settings: Settings) -> ServiceBuilder {
        ServiceBuilder::new(settings)
    }

    pub fn orchestrator(&self) -> &Arc<CollectionOrchestrator> {
        &self.orchestrator
    }

    /// Per-pipeline status for the router's status endpoint.
    pub fn status(&self) -> Vec<SupervisorStatus> {
        self.orchestrator.supervisors().status_all()
    }

    /// Fire-and-forget pipeline trigger. The supervisor's compare-and-
    /// set remains the single admission point; this check only shapes
    /// the immediate reply.
    pub fn trigger(&self, pipeline: PipelineName, params: EnrichmentParams) -> TriggerOutcome {
        let flags = &self.orchestrator.settings().flags;
        let disabled = match pipeline {
            PipelineName::News => flags.disable_rss_monitoring,
            PipelineName::Academic | PipelineName::AcademicArxiv | PipelineName::AcademicPubmed => {
                flags.disable_academic_scraping
            }
            PipelineName::Discovery => flags.disable_external_search,
            PipelineName::Enrichment => flags.disable_ai_enrichment,
        };
        if disabled {
            return TriggerOutcome::Disabled;
        }
        if self.orchestrator.supervisors().get(pipeline).is_running() {
            return TriggerOutcome::AlreadyRunning;
        }

        let orchestrator = Arc::clone(&self.orchestrator);
        tokio::spawn(async move {
            let outcome: Result<StartOutcome> = match pipeline {
                PipelineName::News => orchestrator.run_news_pipeline(24).await,
                PipelineName::Academic
                | PipelineName::AcademicArxiv
                | PipelineName::AcademicPubmed => {
                    orchestrator
                        .run_academic_pipeline(crate::orchestrator::AcademicParams::default())
                        .await
                }
                PipelineName::Discovery => {
                    orchestrator
                        .run_discovery_pipeline("African AI innovation")
                        .await
                }
                PipelineName::Enrichment => orchestrator.run_enrichment_pipeline(&params).await,
            };
            if let Err(err) = outcome {
                tracing::error!(pipeline = pipeline.as_str(), error = %err, "triggered pipeline failed");
            }
        });
        TriggerOutcome::Accepted
    }

    /// Run one collection cycle inline (manual trigger path).
    pub async fn run_cycle(&self, params: &EnrichmentParams) -> CollectionCycleResult {
        self.orchestrator.run_collection_cycle(params).await
    }

    /// Recent output records for a pipeline.
    pub async fn results(&self, pipeline: PipelineName, limit: usize) -> Result<PipelineResults> {
        let store = self.orchestrator.store();
        Ok(match pipeline {
            PipelineName::Academic | PipelineName::AcademicArxiv | PipelineName::AcademicPubmed => {
                PipelineResults::Publications(store.recent_publications(limit).await?)
            }
            PipelineName::Enrichment => PipelineResults::Reports(store.recent_reports(limit).await?),
            _ => PipelineResults::Innovations(store.recent_innovations(limit).await?),
        })
    }

    // Scheduler surface.

    pub fn scheduler_start(&self) {
        self.scheduler.start();
    }

    pub fn scheduler_stop(&self) {
        self.scheduler.stop();
    }

    pub fn scheduler_configure(&self, config: ScheduleConfig) {
        self.scheduler.update_schedule(config);
    }

    pub fn scheduler_status(&self) -> SchedulerStatus {
        self.scheduler.status()
    }

    // Cache surface.

    pub fn cache_stats(&self) -> CacheStats {
        self.orchestrator.mediator().cache().stats()
    }

    pub fn cache_invalidate(&self, pattern: &str) -> Result<usize> {
        self.orchestrator.mediator().cache().invalidate(pattern)
    }

    pub fn cache_clear_negative(&self, source: Option<DataSource>) -> Result<usize> {
        self.orchestrator.mediator().cache().clear_negative(source)
    }

    /// Pre-run the given fetches so later triggers hit warm cache.
    /// Returns how many tasks completed without error.
    pub async fn cache_warm(&self, tasks: Vec<WarmTask>) -> usize {
        let mut warmed = 0;
        for task in tasks {
            let adapter = self.adapter_for(task.source);
            if adapter.fetch(&task.spec, PageToken::first()).await.is_ok() {
                warmed += 1;
            }
        }
        warmed
    }

    // Backfill surface.

    pub async fn backfill_trigger(
        &self,
        ids: Option<Vec<String>>,
        max_jobs: usize,
    ) -> Result<Vec<BackfillJob>> {
        let engine = self.orchestrator.backfill_engine();
        match ids {
            Some(ids) => engine.run_for(&ids, max_jobs).await,
            None => engine.run_batch(max_jobs).await,
        }
    }

    pub fn backfill_status(&self) -> Vec<BackfillJob> {
        self.orchestrator.backfill_engine().job_status()
    }

    pub fn backfill_stats(&self) -> BackfillStats {
        self.orchestrator.backfill_engine().stats()
    }

    /// Orderly shutdown: stop the cadence, cancel running pipelines.
    pub fn shutdown(&self) {
        self.scheduler.stop();
        self.orchestrator.supervisors().cancel_all();
        info!("collection service shut down");
    }

    fn adapter_for(&self, source: DataSource) -> Arc<dyn SourceAdapter> {
        let adapters = self.orchestrator.adapters();
        match source {
            DataSource::Arxiv => Arc::clone(&adapters.arxiv),
            DataSource::Pubmed => Arc::clone(&adapters.pubmed),
            DataSource::NewsRss => Arc::clone(&adapters.rss),
            DataSource::WebSearch => Arc::clone(&adapters.websearch),
            DataSource::Scholar => Arc::clone(&adapters.scholar),
            DataSource::Intelligence => Arc::clone(&adapters.intelligence),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeatureFlags;
    use crate::records::ReportType;

    fn service(flags: FeatureFlags) -> CollectionService {
        let settings = Settings::new().with_flags(flags);
        CollectionService::builder(settings)
            .with_provider(Arc::new(MockIntelligenceProvider))
            .init()
            .unwrap()
    }

    fn mock_flags() -> FeatureFlags {
        FeatureFlags {
            enable_mock_data: true,
            disable_academic_scraping: true,
            disable_rss_monitoring: true,
            disable_external_search: true,
            ..FeatureFlags::default()
        }
    }

    #[tokio::test]
    async fn test_init_wires_all_pipelines_idle() {
        let service = service(mock_flags());
        let statuses = service.status();
        assert_eq!(statuses.len(), PipelineName::all().len());
        assert!(statuses.iter().all(|s| s.state == "idle"));
        service.shutdown();
    }

    #[tokio::test]
    async fn test_disabled_pipeline_trigger() {
        let service = service(mock_flags());
        assert_eq!(
            service.trigger(PipelineName::News, EnrichmentParams::default()),
            TriggerOutcome::Disabled
        );
        assert_eq!(
            service.trigger(PipelineName::Academic, EnrichmentParams::default()),
            TriggerOutcome::Disabled
        );
        service.shutdown();
    }

    #[tokio::test]
    async fn test_mock_mode_cycle_produces_reports() {
        let service = service(mock_flags());
        let params = EnrichmentParams {
            intelligence_types: vec![ReportType::InnovationDiscovery],
            enable_snowball: false,
            ..EnrichmentParams::default()
        };

        let result = service.run_cycle(&params).await;
        assert_eq!(result.reports_generated, 1);
        assert!(result.errors_encountered.is_empty());

        match service.results(PipelineName::Enrichment, 10).await.unwrap() {
            PipelineResults::Reports(reports) => {
                assert_eq!(reports.len(), 1);
                assert!(!reports[0].sources.is_empty());
            }
            other => panic!("expected reports, got {:?}", other),
        }
        service.shutdown();
    }

    #[tokio::test]
    async fn test_missing_provider_key_fails_init() {
        let settings = Settings::new();
        let result = CollectionService::builder(settings).init();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_cache_surface_round_trip() {
        let service = service(mock_flags());
        let stats = service.cache_stats();
        assert_eq!(stats.sets, 0);

        // Warm one mock intelligence fetch, then confirm the set landed.
        let warmed = service
            .cache_warm(vec![WarmTask {
                source: DataSource::Intelligence,
                spec: FetchSpec::Report {
                    report_type: ReportType::MarketAnalysis,
                    time_period: "last_7_days".into(),
                    geographic_focus: vec![],
                },
            }])
            .await;
        assert_eq!(warmed, 1);
        assert_eq!(service.cache_stats().sets, 1);

        assert_eq!(service.cache_invalidate("intelligence:").unwrap(), 1);
        service.shutdown();
    }

    #[tokio::test]
    async fn test_scheduler_surface() {
        let service = service(mock_flags());
        assert!(!service.scheduler_status().running);
        service.scheduler_start();
        assert!(service.scheduler_status().running);
        service.scheduler_stop();
        assert!(!service.scheduler_status().running);
        service.shutdown();
    }
}
