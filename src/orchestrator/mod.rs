//! Collection orchestrator.
//!
//! Composes the pipelines into a collection cycle: intelligence
//! synthesis, target extraction, validation and dedup, persistence and
//! indexing, the source-specific academic and news passes, backfill,
//! and bounded citation snowballing. Phases run sequentially; work
//! inside a phase fans out under a concurrency cap. Rate limiting is
//! the mediator's job, never the orchestrator's.
//!
//! The orchestrator never raises past its entry point: pipeline
//! failures become entries in the returned [`CollectionCycleResult`].

pub mod targets;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::backfill::{BackfillEngine, BackfillStatus};
use crate::clock::SharedClock;
use crate::config::Settings;
use crate::dedup::relationships::{cluster_events, identify_relationships, EventInfo};
use crate::dedup::{DedupOutcome, DedupPolicy, Deduplicator};
use crate::error::{Error, Result};
use crate::extract::extract_report;
use crate::mediator::Mediator;
use crate::pipeline::{
    PipelineName, RunCounters, RunOutcome, StartOutcome, Supervisor, SupervisorRegistry,
};
use crate::providers::ProviderName;
use crate::records::{
    Innovation, InnovationType, IntelligenceReport, RecordProvenance, ReportType, ResolutionState,
};
use crate::sources::{
    collect_records, DataSource, FetchSpec, SourceAdapter, TypedRecord,
};
use crate::store::{Persistence, RecordLink};

use targets::{extract_candidate, prioritize_targets, target_from_mention};

/// Enumerated options for an enrichment trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentParams {
    pub intelligence_types: Vec<ReportType>,
    pub time_period: String,
    pub geographic_focus: Vec<String>,
    pub provider: Option<ProviderName>,
    pub enable_snowball: bool,
}

impl Default for EnrichmentParams {
    fn default() -> Self {
        Self {
            intelligence_types: vec![
                ReportType::InnovationDiscovery,
                ReportType::FundingLandscape,
            ],
            time_period: "last_30_days".to_string(),
            geographic_focus: Vec::new(),
            provider: None,
            enable_snowball: true,
        }
    }
}

/// Enumerated options for an academic trigger.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AcademicParams {
    pub days_back: i64,
    pub max_results: usize,
}

impl Default for AcademicParams {
    fn default() -> Self {
        Self {
            days_back: 7,
            max_results: 50,
        }
    }
}

/// Source adapters handed to the orchestrator at construction.
pub struct Adapters {
    pub arxiv: Arc<dyn SourceAdapter>,
    pub pubmed: Arc<dyn SourceAdapter>,
    pub rss: Arc<dyn SourceAdapter>,
    pub websearch: Arc<dyn SourceAdapter>,
    pub scholar: Arc<dyn SourceAdapter>,
    pub intelligence: Arc<dyn SourceAdapter>,
}

/// Per-cycle counters. A single construction path guarantees every
/// field of the result is populated on success and failure alike.
#[derive(Debug, Clone, Default)]
struct CycleCounters {
    reports_generated: usize,
    targets_discovered: usize,
    targets_processed: usize,
    innovations_extracted: usize,
    innovations_admitted: usize,
    publications_admitted: usize,
    news_admitted: usize,
    duplicates_removed: usize,
    records_backfilled: usize,
    backfill_jobs_skipped: usize,
    snowball_discoveries: usize,
    errors: Vec<String>,
}

/// Aggregated result of one collection cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionCycleResult {
    pub cycle_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub reports_generated: usize,
    pub targets_discovered: usize,
    pub targets_processed: usize,
    pub innovations_extracted: usize,
    pub innovations_admitted: usize,
    pub publications_admitted: usize,
    pub news_admitted: usize,
    pub duplicates_removed: usize,
    pub records_backfilled: usize,
    pub backfill_jobs_skipped: usize,
    pub snowball_discoveries: usize,
    pub total_items_processed: usize,
    pub errors_encountered: Vec<String>,
    pub recommendations: Vec<String>,
}

impl CycleCounters {
    fn finish(
        self,
        cycle_id: String,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> CollectionCycleResult {
        let total_items_processed =
            self.innovations_admitted + self.publications_admitted + self.news_admitted;
        let recommendations = recommendations_for(&self);
        CollectionCycleResult {
            cycle_id,
            started_at,
            ended_at,
            reports_generated: self.reports_generated,
            targets_discovered: self.targets_discovered,
            targets_processed: self.targets_processed,
            innovations_extracted: self.innovations_extracted,
            innovations_admitted: self.innovations_admitted,
            publications_admitted: self.publications_admitted,
            news_admitted: self.news_admitted,
            duplicates_removed: self.duplicates_removed,
            records_backfilled: self.records_backfilled,
            backfill_jobs_skipped: self.backfill_jobs_skipped,
            snowball_discoveries: self.snowball_discoveries,
            total_items_processed,
            errors_encountered: self.errors,
            recommendations,
        }
    }
}

/// Textual guidance derived from cycle statistics.
fn recommendations_for(counters: &CycleCounters) -> Vec<String> {
    let mut recommendations = Vec::new();

    if counters.targets_processed > 0 {
        let success_rate = counters.innovations_extracted as f64 / counters.targets_processed as f64;
        if success_rate < 0.7 {
            recommendations
                .push("Extraction success rate below 70%: improve URL discovery".to_string());
        }
    }
    if counters.reports_generated > 0 && counters.targets_discovered == 0 {
        recommendations
            .push("Intelligence reports yielded no targets: broaden report types".to_string());
    }
    if counters.innovations_extracted > 0
        && counters.duplicates_removed * 2 > counters.innovations_extracted
    {
        recommendations
            .push("More than half of extractions were duplicates: tighten upstream queries".to_string());
    }
    if counters.backfill_jobs_skipped > 0 {
        recommendations.push(
            "Backfill jobs skipped for budget: raise the daily cost limit or reduce cadence"
                .to_string(),
        );
    }
    recommendations
}

/// The orchestrator. All collaborators arrive injected; there is no
/// global lookup anywhere below this point.
pub struct CollectionOrchestrator {
    settings: Settings,
    clock: SharedClock,
    mediator: Arc<Mediator>,
    store: Arc<dyn Persistence>,
    dedup: Arc<Deduplicator>,
    supervisors: Arc<SupervisorRegistry>,
    backfill: Arc<BackfillEngine>,
    adapters: Adapters,
    cycle_running: AtomicBool,
}

impl CollectionOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: Settings,
        clock: SharedClock,
        mediator: Arc<Mediator>,
        store: Arc<dyn Persistence>,
        dedup: Arc<Deduplicator>,
        supervisors: Arc<SupervisorRegistry>,
        backfill: Arc<BackfillEngine>,
        adapters: Adapters,
    ) -> Self {
        Self {
            settings,
            clock,
            mediator,
            store,
            dedup,
            supervisors,
            backfill,
            adapters,
            cycle_running: AtomicBool::new(false),
        }
    }

    pub fn supervisors(&self) -> &Arc<SupervisorRegistry> {
        &self.supervisors
    }

    pub fn mediator(&self) -> &Arc<Mediator> {
        &self.mediator
    }

    pub fn store(&self) -> &Arc<dyn Persistence> {
        &self.store
    }

    pub fn backfill_engine(&self) -> &Arc<BackfillEngine> {
        &self.backfill
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn adapters(&self) -> &Adapters {
        &self.adapters
    }

    pub fn cycle_in_progress(&self) -> bool {
        self.cycle_running.load(Ordering::Acquire)
    }

    /// Run one full collection cycle. Never returns `Err`: every
    /// failure lands in `errors_encountered`.
    pub async fn run_collection_cycle(&self, params: &EnrichmentParams) -> CollectionCycleResult {
        let started_at = self.clock.now();
        let cycle_id = crate::clock::new_prefixed_id("cycle");
        let mut counters = CycleCounters::default();

        if self
            .cycle_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            counters.errors.push("cycle already in progress".to_string());
            return counters.finish(cycle_id, started_at, self.clock.now());
        }
        info!(cycle = %cycle_id, "collection cycle started");

        // Phases 1-4 + 7: intelligence synthesis through snowball.
        if !self.settings.flags.disable_ai_enrichment {
            if let Err(err) = self.enrichment_phase(params, &mut counters).await {
                counters.errors.push(format!("enrichment: {}", err));
            }
        }

        // Phase 5: source-specific academic and news passes.
        if !self.settings.flags.disable_academic_scraping {
            if let Err(err) = self
                .academic_phase(AcademicParams::default(), &mut counters)
                .await
            {
                counters.errors.push(format!("academic: {}", err));
            }
        }
        if !self.settings.flags.disable_rss_monitoring {
            if let Err(err) = self.news_phase(24, &mut counters).await {
                counters.errors.push(format!("news: {}", err));
            }
        }

        // Phase 6: enrichment backfill.
        if !self.settings.flags.disable_ai_enrichment {
            match self.backfill.run_batch(10).await {
                Ok(jobs) => {
                    for job in jobs {
                        match job.status {
                            BackfillStatus::Completed => counters.records_backfilled += 1,
                            BackfillStatus::Skipped => counters.backfill_jobs_skipped += 1,
                            _ => {}
                        }
                    }
                }
                Err(err) => counters.errors.push(format!("backfill: {}", err)),
            }
        }

        self.cycle_running.store(false, Ordering::Release);
        let result = counters.finish(cycle_id, started_at, self.clock.now());
        info!(
            cycle = %result.cycle_id,
            items = result.total_items_processed,
            errors = result.errors_encountered.len(),
            "collection cycle finished"
        );
        result
    }

    /// Supervised enrichment pipeline: synthesis, target extraction,
    /// validation, dedup, persistence, snowball.
    pub async fn run_enrichment_pipeline(
        &self,
        params: &EnrichmentParams,
    ) -> Result<StartOutcome> {
        let supervisor = self.supervisors.get(PipelineName::Enrichment);
        let outcome = supervisor.start();
        if outcome == StartOutcome::AlreadyRunning {
            return Ok(outcome);
        }

        let mut counters = CycleCounters::default();
        let phase_result = self.enrichment_phase(params, &mut counters).await;
        Self::complete_supervised(&supervisor, phase_result, &counters, {
            RunCounters {
                items_processed: counters.innovations_admitted + counters.reports_generated,
                items_failed: 0,
                duplicates_removed: counters.duplicates_removed,
                batch_size: counters.targets_discovered,
            }
        });
        Ok(outcome)
    }

    async fn enrichment_phase(
        &self,
        params: &EnrichmentParams,
        counters: &mut CycleCounters,
    ) -> Result<()> {
        // Phase 1: synthesis fans out under the per-phase concurrency
        // cap; the mediator enforces the actual provider rate limits.
        let semaphore = Arc::new(tokio::sync::Semaphore::new(
            self.settings.phase_concurrency.max(1),
        ));
        let synthesis_tasks: Vec<_> = params
            .intelligence_types
            .iter()
            .map(|report_type| {
                let semaphore = Arc::clone(&semaphore);
                let adapter = Arc::clone(&self.adapters.intelligence);
                let spec = FetchSpec::Report {
                    report_type: *report_type,
                    time_period: params.time_period.clone(),
                    geographic_focus: params.geographic_focus.clone(),
                };
                let report_type = *report_type;
                async move {
                    let _permit = semaphore.acquire().await;
                    (report_type, collect_records(adapter.as_ref(), &spec, 1).await)
                }
            })
            .collect();

        let mut reports = Vec::new();
        for (report_type, outcome) in futures::future::join_all(synthesis_tasks).await {
            match outcome {
                Ok((records, _)) => {
                    for record in records {
                        if let TypedRecord::Intelligence(raw) = record {
                            let report = extract_report(&raw, self.clock.now());
                            self.store.insert_report(report.clone()).await?;
                            counters.reports_generated += 1;
                            reports.push(report);
                        }
                    }
                }
                Err(err) if err.is_terminal() => return Err(err),
                Err(err) => {
                    warn!(report_type = %report_type, error = %err, "intelligence synthesis failed");
                    counters.errors.push(format!("{}: {}", report_type, err));
                }
            }
        }

        // Phase 2: targets from report mentions, resolved against the
        // report's own sources first, web-search as a fallback.
        let mut targets = Vec::new();
        for report in &reports {
            for mention in &report.innovations_mentioned {
                let url = self.discover_url(report, &mention.company_name).await;
                if let Some(url) = url {
                    targets.push(target_from_mention(mention, url, self.clock.now()));
                }
            }
        }
        let targets = prioritize_targets(targets);
        counters.targets_discovered = targets.len();

        // Phases 3-4: extraction schema, admission, dedup + persistence.
        for target in &targets {
            counters.targets_processed += 1;
            let Some(candidate) = extract_candidate(target, self.clock.now()) else {
                continue;
            };
            counters.innovations_extracted += 1;
            if candidate.completeness < self.settings.thresholds.min_completeness
                || candidate.confidence < self.settings.thresholds.min_confidence
            {
                continue;
            }
            match self
                .dedup
                .dedup_innovation(candidate.innovation, DedupPolicy::Reject)
                .await?
            {
                DedupOutcome::Unique { .. } => counters.innovations_admitted += 1,
                _ => counters.duplicates_removed += 1,
            }
        }

        // Phase 7: bounded snowball resolution.
        if params.enable_snowball {
            let discovered = self.snowball_citations(&mut reports).await?;
            counters.snowball_discoveries += discovered;
        }

        Ok(())
    }

    /// URL discovery for a mentioned company: prefer a source URL from
    /// the report itself; otherwise one targeted web-search, unless
    /// external search is disabled.
    async fn discover_url(&self, report: &IntelligenceReport, company: &str) -> Option<String> {
        let token = company.split_whitespace().next()?.to_lowercase();
        if let Some(url) = report
            .sources
            .iter()
            .find(|url| url.to_lowercase().contains(&token))
        {
            return Some(url.clone());
        }
        if self.settings.flags.disable_external_search {
            return None;
        }

        let spec = FetchSpec::Keyword {
            query: format!("{} African AI startup official site", company),
            max_results: 3,
            days_back: None,
        };
        let (records, _) = collect_records(self.adapters.websearch.as_ref(), &spec, 3)
            .await
            .ok()?;
        records.into_iter().find_map(|record| match record {
            TypedRecord::Search(hit) => Some(hit.link),
            _ => None,
        })
    }

    /// Resolve extracted citations against the store; unresolved
    /// high-confidence citations trigger bounded discovery searches.
    async fn snowball_citations(&self, reports: &mut [IntelligenceReport]) -> Result<usize> {
        let max_calls = self.settings.snowball_max_citations;
        let max_depth = self.settings.snowball_max_depth.max(1);
        let mut outbound_calls = 0usize;
        let mut discoveries = 0usize;

        for report in reports.iter_mut() {
            for _depth in 0..max_depth {
                let mut progressed = false;
                for citation in report.extracted_citations.iter_mut() {
                    if !matches!(citation.resolution_state, ResolutionState::Unresolved) {
                        continue;
                    }

                    if let Some(publication_id) =
                        self.resolve_citation_reference(&citation.reference).await?
                    {
                        citation.resolution_state = ResolutionState::ResolvedTo(publication_id);
                        progressed = true;
                        continue;
                    }

                    if citation.confidence < 0.6 || outbound_calls >= max_calls {
                        citation.resolution_state = ResolutionState::Unresolvable;
                        continue;
                    }

                    outbound_calls += 1;
                    match self.snowball_search(&citation.reference).await? {
                        Some(publication_id) => {
                            discoveries += 1;
                            progressed = true;
                            citation.resolution_state =
                                ResolutionState::ResolvedTo(publication_id);
                        }
                        None => citation.resolution_state = ResolutionState::Unresolvable,
                    }
                }
                if !progressed || outbound_calls >= max_calls {
                    break;
                }
            }
        }

        Ok(discoveries)
    }

    /// Exact-identity resolution: arXiv ids and DOIs embedded in URLs.
    async fn resolve_citation_reference(&self, reference: &str) -> Result<Option<String>> {
        if let Some(id) = reference
            .split("arxiv.org/abs/")
            .nth(1)
            .map(|rest| rest.trim_end_matches('/').to_string())
        {
            let key = crate::dedup::exact_identity_key("source_id", &id);
            if let Some(publication) = self.store.find_publication_by_identity(&key).await? {
                return Ok(Some(publication.id));
            }
        }
        if let Some(doi) = reference
            .split("doi.org/")
            .nth(1)
            .map(|rest| rest.trim_end_matches('/').to_string())
        {
            let key = crate::dedup::exact_identity_key("doi", &doi);
            if let Some(publication) = self.store.find_publication_by_identity(&key).await? {
                return Ok(Some(publication.id));
            }
        }
        Ok(None)
    }

    /// One scholarly lookup for an unresolved citation. Returns the id
    /// of a newly admitted publication, which counts as a snowball
    /// discovery and resolves the citation.
    async fn snowball_search(&self, reference: &str) -> Result<Option<String>> {
        if self.settings.flags.disable_external_search {
            return Ok(None);
        }
        let spec = FetchSpec::Keyword {
            query: reference.to_string(),
            max_results: 3,
            days_back: None,
        };
        let (records, _) = collect_records(self.adapters.scholar.as_ref(), &spec, 3).await?;
        for record in records {
            if let TypedRecord::ScholarHit(hit) = record {
                let publication = crate::records::Publication::new(
                    hit.title,
                    hit.snippet,
                    hit.authors,
                    hit.year,
                    crate::records::PublicationSource::Scholar,
                    None,
                    0.5,
                    0.5,
                    self.clock.now(),
                );
                if let DedupOutcome::Unique { id } = self
                    .dedup
                    .dedup_publication(publication, DedupPolicy::Reject)
                    .await?
                {
                    return Ok(Some(id));
                }
            }
        }
        Ok(None)
    }

    /// Supervised academic pipeline over both academic sources.
    pub async fn run_academic_pipeline(&self, params: AcademicParams) -> Result<StartOutcome> {
        let supervisor = self.supervisors.get(PipelineName::Academic);
        let outcome = supervisor.start();
        if outcome == StartOutcome::AlreadyRunning {
            return Ok(outcome);
        }

        let mut counters = CycleCounters::default();
        let result = self.academic_phase(params, &mut counters).await;
        Self::complete_supervised(&supervisor, result, &counters, RunCounters {
            items_processed: counters.publications_admitted,
            items_failed: 0,
            duplicates_removed: counters.duplicates_removed,
            batch_size: counters.targets_processed,
        });
        Ok(outcome)
    }

    async fn academic_phase(
        &self,
        params: AcademicParams,
        counters: &mut CycleCounters,
    ) -> Result<()> {
        self.academic_source_pass(
            &self.adapters.arxiv,
            PipelineName::AcademicArxiv,
            params,
            counters,
        )
        .await?;
        self.academic_source_pass(
            &self.adapters.pubmed,
            PipelineName::AcademicPubmed,
            params,
            counters,
        )
        .await?;
        Ok(())
    }

    /// One source adapter pass under its own supervisor. Records are
    /// processed in fetch order so first-seen wins dedup ties.
    async fn academic_source_pass(
        &self,
        adapter: &Arc<dyn SourceAdapter>,
        name: PipelineName,
        params: AcademicParams,
        counters: &mut CycleCounters,
    ) -> Result<()> {
        let supervisor = self.supervisors.get(name);
        if supervisor.start() == StartOutcome::AlreadyRunning {
            return Ok(());
        }

        let spec = FetchSpec::Keyword {
            query: "artificial intelligence Africa".to_string(),
            max_results: params.max_results,
            days_back: Some(params.days_back),
        };

        let mut local = RunCounters::default();
        let result = async {
            let (records, discards) =
                collect_records(adapter.as_ref(), &spec, params.max_results).await?;
            local.batch_size = records.len() + discards.len();

            for record in records {
                if supervisor.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                let TypedRecord::Publication(publication) = record else {
                    continue;
                };
                match self
                    .dedup
                    .dedup_publication(*publication, DedupPolicy::Reject)
                    .await
                {
                    Ok(DedupOutcome::Unique { .. }) => local.items_processed += 1,
                    Ok(_) => local.duplicates_removed += 1,
                    Err(err) => {
                        // Record-level storage errors never fail the run.
                        warn!(pipeline = name.as_str(), error = %err, "record persist failed");
                        local.items_failed += 1;
                    }
                }
            }
            Ok(())
        }
        .await;

        counters.publications_admitted += local.items_processed;
        counters.duplicates_removed += local.duplicates_removed;
        counters.targets_processed += local.batch_size;

        match result {
            Ok(()) => {
                supervisor.complete(RunOutcome::Succeeded, local);
                Ok(())
            }
            Err(err) => {
                supervisor.complete(RunOutcome::Failed(err.to_string()), local);
                counters.errors.push(format!("{}: {}", name, err));
                Ok(())
            }
        }
    }

    /// Supervised news pipeline with relationship clustering.
    pub async fn run_news_pipeline(&self, window_hours: i64) -> Result<StartOutcome> {
        let supervisor = self.supervisors.get(PipelineName::News);
        let outcome = supervisor.start();
        if outcome == StartOutcome::AlreadyRunning {
            return Ok(outcome);
        }

        let mut counters = CycleCounters::default();
        let result = self.news_pass(window_hours, &supervisor, &mut counters).await;
        Self::complete_supervised(&supervisor, result, &counters, RunCounters {
            items_processed: counters.news_admitted,
            items_failed: 0,
            duplicates_removed: counters.duplicates_removed,
            batch_size: counters.targets_processed,
        });
        Ok(outcome)
    }

    async fn news_phase(&self, window_hours: i64, counters: &mut CycleCounters) -> Result<()> {
        let supervisor = self.supervisors.get(PipelineName::News);
        if supervisor.start() == StartOutcome::AlreadyRunning {
            return Ok(());
        }
        let result = self.news_pass(window_hours, &supervisor, counters).await;
        Self::complete_supervised(&supervisor, result, counters, RunCounters {
            items_processed: counters.news_admitted,
            items_failed: 0,
            duplicates_removed: counters.duplicates_removed,
            batch_size: counters.targets_processed,
        });
        Ok(())
    }

    async fn news_pass(
        &self,
        window_hours: i64,
        supervisor: &Arc<Supervisor>,
        counters: &mut CycleCounters,
    ) -> Result<()> {
        let spec = FetchSpec::Window {
            hours: window_hours,
            max_results: self.settings.max_batch_size,
        };
        let (records, discards) =
            collect_records(self.adapters.rss.as_ref(), &spec, self.settings.max_batch_size)
                .await?;
        counters.targets_processed += records.len() + discards.len();

        let articles: Vec<_> = records
            .into_iter()
            .filter_map(|record| match record {
                TypedRecord::News(article) => Some(*article),
                _ => None,
            })
            .collect();

        // Complex-relationship analysis: cluster same-event coverage so
        // only one article per cluster proceeds to dedup.
        let events: Vec<EventInfo> = articles
            .iter()
            .enumerate()
            .map(|(i, article)| EventInfo::from_text(i.to_string(), &article.title, &article.summary))
            .collect();
        let relationships = identify_relationships(&events);
        let clusters = cluster_events(&events, &relationships);

        for cluster in clusters {
            if supervisor.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let canonical_idx: usize = cluster.canonical_id.parse().unwrap_or(0);
            let Some(article) = articles.get(canonical_idx) else {
                continue;
            };

            let mut candidate = Innovation::new(
                article.title.clone(),
                article.summary.clone(),
                InnovationType::Other,
                RecordProvenance {
                    source: DataSource::NewsRss,
                    source_id: None,
                    collected_at: article.published.unwrap_or_else(|| self.clock.now()),
                },
                self.clock.now(),
            );
            candidate.source_url = Some(article.link.clone());

            match self
                .dedup
                .dedup_innovation(candidate, DedupPolicy::Reject)
                .await?
            {
                DedupOutcome::Unique { id } => {
                    counters.news_admitted += 1;
                    // Cluster members point at the admitted canonical.
                    for member in cluster.member_ids.iter().filter(|m| {
                        m.parse::<usize>().map(|i| i != canonical_idx).unwrap_or(false)
                    }) {
                        counters.duplicates_removed += 1;
                        if let Some(duplicate) = member
                            .parse::<usize>()
                            .ok()
                            .and_then(|i| articles.get(i))
                        {
                            self.store
                                .record_link(RecordLink {
                                    from_id: duplicate.fingerprint.clone(),
                                    to_id: id.clone(),
                                    kind: cluster.kind.as_str().to_string(),
                                })
                                .await?;
                        }
                    }
                }
                _ => counters.duplicates_removed += 1,
            }
        }
        Ok(())
    }

    /// Supervised discovery pipeline: one web-search query producing
    /// innovation candidates.
    pub async fn run_discovery_pipeline(&self, query: &str) -> Result<StartOutcome> {
        let supervisor = self.supervisors.get(PipelineName::Discovery);
        let outcome = supervisor.start();
        if outcome == StartOutcome::AlreadyRunning {
            return Ok(outcome);
        }

        let mut counters = CycleCounters::default();
        let result = self.discovery_pass(query, &mut counters).await;
        Self::complete_supervised(&supervisor, result, &counters, RunCounters {
            items_processed: counters.innovations_admitted,
            items_failed: 0,
            duplicates_removed: counters.duplicates_removed,
            batch_size: counters.targets_processed,
        });
        Ok(outcome)
    }

    async fn discovery_pass(&self, query: &str, counters: &mut CycleCounters) -> Result<()> {
        let spec = FetchSpec::Keyword {
            query: query.to_string(),
            max_results: 10,
            days_back: None,
        };
        let (records, _) = collect_records(self.adapters.websearch.as_ref(), &spec, 10).await?;

        for record in records {
            let TypedRecord::Search(hit) = record else {
                continue;
            };
            counters.targets_processed += 1;

            let location = crate::extract::patterns::find_location(&hit.snippet);
            let mut candidate = Innovation::new(
                hit.title.clone(),
                hit.snippet.clone(),
                InnovationType::Startup,
                RecordProvenance {
                    source: DataSource::WebSearch,
                    source_id: None,
                    collected_at: self.clock.now(),
                },
                self.clock.now(),
            );
            candidate.website_url = Some(hit.link.clone());
            candidate.country = location;
            counters.innovations_extracted += 1;

            // Position decays trust; the admission gate does the rest.
            let confidence = (0.7 - 0.02 * hit.position as f64).max(0.3);
            if candidate.completeness() < self.settings.thresholds.min_completeness
                || confidence < self.settings.thresholds.min_confidence
            {
                continue;
            }

            match self
                .dedup
                .dedup_innovation(candidate, DedupPolicy::Reject)
                .await?
            {
                DedupOutcome::Unique { .. } => counters.innovations_admitted += 1,
                _ => counters.duplicates_removed += 1,
            }
        }
        Ok(())
    }

    fn complete_supervised(
        supervisor: &Arc<Supervisor>,
        result: Result<()>,
        _counters: &CycleCounters,
        run: RunCounters,
    ) {
        match result {
            // Record-level trouble never fails a finished pipeline.
            Ok(()) => supervisor.complete(RunOutcome::Succeeded, run),
            Err(err) => supervisor.complete(RunOutcome::Failed(err.to_string()), run),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TieredCache;
    use crate::clock::SystemClock;
    use crate::config::{CacheTtls, FeatureFlags};
    use crate::providers::{IntelligenceProvider, ProviderRegistry, ReportPayload, SynthesisRequest};
    use crate::sources::{
        DiscardReason, FetchPage, NewsArticle, PageToken, ParseOutcome, RawIntelligence, RawRecord,
        SearchHit,
    };
    use crate::store::vector::{HashingEmbedder, MemoryVectorIndex};
    use crate::store::MemoryPersistence;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    /// Adapter yielding a scripted set of parse outcomes.
    struct ScriptedAdapter {
        source: DataSource,
        outcomes: Vec<ParseOutcome>,
        fetches: Arc<AtomicUsize>,
    }

    impl ScriptedAdapter {
        fn new(source: DataSource, outcomes: Vec<ParseOutcome>) -> Self {
            Self {
                source,
                outcomes,
                fetches: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl SourceAdapter for ScriptedAdapter {
        fn source(&self) -> DataSource {
            self.source
        }

        async fn fetch(&self, _spec: &FetchSpec, page: PageToken) -> Result<FetchPage> {
            if page.0 > 0 {
                return Ok(FetchPage::empty());
            }
            self.fetches.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(FetchPage {
                records: (0..self.outcomes.len())
                    .map(|i| RawRecord {
                        source: self.source,
                        payload: json!({ "index": i }),
                        fetched_at: Utc::now(),
                    })
                    .collect(),
                next: None,
            })
        }

        fn parse(&self, raw: &RawRecord) -> ParseOutcome {
            let index = raw.payload["index"].as_u64().unwrap_or(0) as usize;
            self.outcomes[index].clone()
        }
    }

    fn empty_adapter(source: DataSource) -> Arc<dyn SourceAdapter> {
        Arc::new(ScriptedAdapter::new(source, vec![]))
    }

    fn publication_outcome(title: &str, source_id: &str) -> ParseOutcome {
        ParseOutcome::Record(TypedRecord::Publication(Box::new(
            crate::records::Publication::new(
                title,
                "abstract",
                vec!["Okello J".into()],
                Some(2024),
                crate::records::PublicationSource::Arxiv,
                Some(source_id.into()),
                0.8,
                0.8,
                Utc::now(),
            ),
        )))
    }

    struct Fixture {
        orchestrator: CollectionOrchestrator,
        store: Arc<MemoryPersistence>,
    }

    fn fixture_with(settings: Settings, adapters: Adapters) -> Fixture {
        let clock: SharedClock = Arc::new(SystemClock::new());
        let cache = Arc::new(TieredCache::in_memory(CacheTtls::default(), clock.clone()).unwrap());
        let mediator = Arc::new(Mediator::new(
            cache,
            clock.clone(),
            settings.cost.clone(),
            HashMap::new(),
        ));
        let store = Arc::new(MemoryPersistence::new());
        let index = Arc::new(MemoryVectorIndex::new(Arc::new(HashingEmbedder::new())));
        let dedup = Arc::new(Deduplicator::new(
            store.clone(),
            index,
            settings.thresholds.fuzzy_title_high,
            settings.thresholds.fuzzy_title_low,
        ));
        let supervisors = Arc::new(SupervisorRegistry::new(clock.clone()));

        struct NoopProvider;
        #[async_trait]
        impl IntelligenceProvider for NoopProvider {
            async fn synthesize(&self, _request: SynthesisRequest) -> Result<ReportPayload> {
                Ok(ReportPayload {
                    content: String::new(),
                    response_id: "noop".into(),
                })
            }
            fn name(&self) -> ProviderName {
                ProviderName::Perplexity
            }
        }
        let providers = Arc::new(ProviderRegistry::new().with_provider(Arc::new(NoopProvider)));
        let backfill = Arc::new(BackfillEngine::new(
            store.clone(),
            mediator.clone(),
            providers,
            empty_adapter(DataSource::WebSearch),
            clock.clone(),
            settings.cost.clone(),
            settings.thresholds.backfill_write,
            settings.thresholds.backfill_review,
        ));

        Fixture {
            orchestrator: CollectionOrchestrator::new(
                settings,
                clock,
                mediator,
                store.clone(),
                dedup,
                supervisors,
                backfill,
                adapters,
            ),
            store,
        }
    }

    fn adapters_with(
        arxiv: Arc<dyn SourceAdapter>,
        rss: Arc<dyn SourceAdapter>,
        websearch: Arc<dyn SourceAdapter>,
        intelligence: Arc<dyn SourceAdapter>,
    ) -> Adapters {
        Adapters {
            arxiv,
            pubmed: empty_adapter(DataSource::Pubmed),
            rss,
            websearch,
            scholar: empty_adapter(DataSource::Scholar),
            intelligence,
        }
    }

    /// Academic-only cycle against a scripted adapter: four raw records,
    /// two below thresholds, one duplicate of a stored publication.
    #[tokio::test]
    async fn test_academic_cycle_counts_match_contract() {
        let arxiv: Arc<dyn SourceAdapter> = Arc::new(ScriptedAdapter::new(
            DataSource::Arxiv,
            vec![
                publication_outcome("NLP for Swahili health records", "2401.1"),
                ParseOutcome::Discard(DiscardReason::BelowRelevanceThreshold),
                ParseOutcome::Discard(DiscardReason::BelowRelevanceThreshold),
                publication_outcome("Already stored survey", "2401.2"),
            ],
        ));

        let settings = Settings::new().with_flags(FeatureFlags {
            disable_rss_monitoring: true,
            disable_external_search: true,
            disable_ai_enrichment: true,
            ..FeatureFlags::default()
        });
        let fixture = fixture_with(
            settings,
            adapters_with(
                arxiv,
                empty_adapter(DataSource::NewsRss),
                empty_adapter(DataSource::WebSearch),
                empty_adapter(DataSource::Intelligence),
            ),
        );

        // Seed the duplicate.
        fixture
            .store
            .upsert_publication(match publication_outcome("Already stored survey", "2401.2") {
                ParseOutcome::Record(TypedRecord::Publication(p)) => *p,
                _ => unreachable!(),
            })
            .await
            .unwrap();

        let before = fixture.store.counts().await.unwrap().publications;
        let result = fixture
            .orchestrator
            .run_collection_cycle(&EnrichmentParams::default())
            .await;

        assert_eq!(result.publications_admitted, 1);
        assert_eq!(result.duplicates_removed, 1);
        assert_eq!(result.total_items_processed, 1);
        assert!(result.errors_encountered.is_empty());

        let after = fixture.store.counts().await.unwrap().publications;
        assert_eq!(after, before + 1);

        let run = fixture
            .orchestrator
            .supervisors()
            .get(PipelineName::AcademicArxiv)
            .status()
            .last_run
            .unwrap();
        assert_eq!(run.items_processed, 1);
        assert_eq!(run.items_failed, 0);
        assert_eq!(run.duplicates_removed, 1);
        assert_eq!(run.metrics.batch_size, 4);
    }

    /// All pipelines disabled: no items, no upstream calls.
    #[tokio::test]
    async fn test_fully_disabled_cycle_is_inert() {
        let settings = Settings::new().with_flags(FeatureFlags {
            disable_rss_monitoring: true,
            disable_external_search: true,
            disable_ai_enrichment: true,
            disable_academic_scraping: true,
            ..FeatureFlags::default()
        });
        let arxiv = Arc::new(ScriptedAdapter::new(DataSource::Arxiv, vec![]));
        let fetches = Arc::clone(&arxiv.fetches);
        let fixture = fixture_with(
            settings,
            adapters_with(
                arxiv,
                empty_adapter(DataSource::NewsRss),
                empty_adapter(DataSource::WebSearch),
                empty_adapter(DataSource::Intelligence),
            ),
        );

        let result = fixture
            .orchestrator
            .run_collection_cycle(&EnrichmentParams::default())
            .await;

        assert_eq!(result.total_items_processed, 0);
        assert_eq!(fetches.load(AtomicOrdering::SeqCst), 0);
        let stats = fixture.orchestrator.mediator().cache().stats();
        assert_eq!(stats.sets + stats.hits + stats.misses, 0);
    }

    /// Duplicate news ingestion: the store already holds fingerprint(T).
    #[tokio::test]
    async fn test_duplicate_news_article_is_rejected() {
        let title = "Kenyan AI startup expands to Uganda";
        let rss: Arc<dyn SourceAdapter> = Arc::new(ScriptedAdapter::new(
            DataSource::NewsRss,
            vec![ParseOutcome::Record(TypedRecord::News(Box::new(NewsArticle {
                fingerprint: crate::dedup::article_fingerprint(title),
                title: title.into(),
                link: "https://news.example/item".into(),
                summary: "Machine learning products for agriculture".into(),
                published: Some(Utc::now()),
                source_feed: "https://news.example/rss".into(),
                african_relevance_score: 0.6,
                ai_relevance_score: 0.5,
            })))],
        ));

        let settings = Settings::new().with_flags(FeatureFlags {
            disable_ai_enrichment: true,
            disable_academic_scraping: true,
            disable_external_search: true,
            ..FeatureFlags::default()
        });
        let fixture = fixture_with(
            settings,
            adapters_with(
                empty_adapter(DataSource::Arxiv),
                rss,
                empty_adapter(DataSource::WebSearch),
                empty_adapter(DataSource::Intelligence),
            ),
        );

        // Seed the canonical record under the same title fingerprint.
        let canonical = Innovation::new(
            title,
            "Seeded earlier",
            InnovationType::Other,
            RecordProvenance {
                source: DataSource::NewsRss,
                source_id: None,
                collected_at: Utc::now(),
            },
            Utc::now(),
        );
        fixture.store.upsert_innovation(canonical).await.unwrap();

        let result = fixture
            .orchestrator
            .run_collection_cycle(&EnrichmentParams::default())
            .await;

        assert_eq!(result.duplicates_removed, 1);
        assert_eq!(result.news_admitted, 0);
        assert_eq!(result.total_items_processed, 0);
    }

    /// Empty adapter output completes the pipeline as succeeded with
    /// zero items.
    #[tokio::test]
    async fn test_empty_adapter_output_succeeds_with_zero_items() {
        let fixture = fixture_with(
            Settings::new(),
            adapters_with(
                empty_adapter(DataSource::Arxiv),
                empty_adapter(DataSource::NewsRss),
                empty_adapter(DataSource::WebSearch),
                empty_adapter(DataSource::Intelligence),
            ),
        );

        let outcome = fixture.orchestrator.run_news_pipeline(24).await.unwrap();
        assert!(matches!(outcome, StartOutcome::Accepted { .. }));

        let run = fixture
            .orchestrator
            .supervisors()
            .get(PipelineName::News)
            .status()
            .last_run
            .unwrap();
        assert_eq!(run.status, crate::pipeline::RunStatus::Succeeded);
        assert_eq!(run.items_processed, 0);
        assert_eq!(run.items_failed, 0);
    }

    /// Second enrichment trigger while one is running reports
    /// already_running and makes no further provider calls.
    #[tokio::test]
    async fn test_enrichment_single_flight() {
        let fixture = fixture_with(
            Settings::new(),
            adapters_with(
                empty_adapter(DataSource::Arxiv),
                empty_adapter(DataSource::NewsRss),
                empty_adapter(DataSource::WebSearch),
                empty_adapter(DataSource::Intelligence),
            ),
        );

        let supervisor = fixture.orchestrator.supervisors().get(PipelineName::Enrichment);
        assert!(matches!(supervisor.start(), StartOutcome::Accepted { .. }));

        let outcome = fixture
            .orchestrator
            .run_enrichment_pipeline(&EnrichmentParams::default())
            .await
            .unwrap();
        assert_eq!(outcome, StartOutcome::AlreadyRunning);
    }

    /// Enrichment over a scripted intelligence report produces stored
    /// reports, targets, and admitted innovations.
    #[tokio::test]
    async fn test_enrichment_pipeline_end_to_end() {
        let content = "1. Nigerian startup Lidya launched an AI credit scoring product \
                       (https://lidya.co/launch). The company raised $8.3 million Series A.";
        let intelligence: Arc<dyn SourceAdapter> = Arc::new(ScriptedAdapter::new(
            DataSource::Intelligence,
            vec![ParseOutcome::Record(TypedRecord::Intelligence(
                RawIntelligence {
                    report_type: ReportType::InnovationDiscovery,
                    content: content.into(),
                    response_id: "resp".into(),
                    time_period: "last_30_days".into(),
                    geographic_focus: vec!["Nigeria".into()],
                },
            ))],
        ));
        let websearch: Arc<dyn SourceAdapter> = Arc::new(ScriptedAdapter::new(
            DataSource::WebSearch,
            vec![ParseOutcome::Record(TypedRecord::Search(SearchHit {
                title: "Lidya".into(),
                link: "https://lidya.co".into(),
                snippet: "AI lending for small businesses in Nigeria".into(),
                position: 1,
            }))],
        ));

        let settings = Settings::new().with_flags(FeatureFlags {
            disable_academic_scraping: true,
            disable_rss_monitoring: true,
            ..FeatureFlags::default()
        });
        let fixture = fixture_with(
            settings,
            adapters_with(
                empty_adapter(DataSource::Arxiv),
                empty_adapter(DataSource::NewsRss),
                websearch,
                intelligence,
            ),
        );

        let params = EnrichmentParams {
            intelligence_types: vec![ReportType::InnovationDiscovery],
            enable_snowball: false,
            ..EnrichmentParams::default()
        };
        let result = fixture.orchestrator.run_collection_cycle(&params).await;

        assert_eq!(result.reports_generated, 1);
        assert!(result.targets_discovered >= 1);
        assert!(result.innovations_admitted >= 1);

        let counts = fixture.store.counts().await.unwrap();
        assert_eq!(counts.reports, 1);
        assert!(counts.innovations >= 1);
    }

    /// Citation snowball: a citation resolving against the store costs
    /// no outbound call; an unresolved high-confidence citation triggers
    /// one bounded scholarly lookup whose admitted record counts as a
    /// discovery.
    #[tokio::test]
    async fn test_citation_snowball_resolution_and_discovery() {
        let content = "1. Researchers published new benchmark results for Swahili \
                       models (https://arxiv.org/abs/2401.5). \
                       2. A continental funding overview is available at \
                       https://reports.example/african-ai/2024 for reference.";
        let intelligence: Arc<dyn SourceAdapter> = Arc::new(ScriptedAdapter::new(
            DataSource::Intelligence,
            vec![ParseOutcome::Record(TypedRecord::Intelligence(
                RawIntelligence {
                    report_type: ReportType::ResearchBreakthrough,
                    content: content.into(),
                    response_id: "resp".into(),
                    time_period: "last_30_days".into(),
                    geographic_focus: vec![],
                },
            ))],
        ));
        let scholar = Arc::new(ScriptedAdapter::new(
            DataSource::Scholar,
            vec![ParseOutcome::Record(TypedRecord::ScholarHit(
                crate::sources::ScholarHit {
                    title: "African AI funding overview 2024".into(),
                    link: "https://reports.example/african-ai/2024".into(),
                    snippet: "Annual analysis of AI funding flows".into(),
                    authors: vec!["Diallo M".into()],
                    year: Some(2024),
                    cited_by: Some(3),
                    publication: None,
                },
            ))],
        ));
        let scholar_fetches = Arc::clone(&scholar.fetches);

        let settings = Settings::new().with_flags(FeatureFlags {
            disable_academic_scraping: true,
            disable_rss_monitoring: true,
            ..FeatureFlags::default()
        });
        let mut adapters = adapters_with(
            empty_adapter(DataSource::Arxiv),
            empty_adapter(DataSource::NewsRss),
            empty_adapter(DataSource::WebSearch),
            intelligence,
        );
        adapters.scholar = scholar;
        let fixture = fixture_with(settings, adapters);

        // The first citation resolves against this stored publication.
        fixture
            .store
            .upsert_publication(match publication_outcome("Swahili benchmark results", "2401.5") {
                ParseOutcome::Record(TypedRecord::Publication(p)) => *p,
                _ => unreachable!(),
            })
            .await
            .unwrap();

        let params = EnrichmentParams {
            intelligence_types: vec![ReportType::ResearchBreakthrough],
            enable_snowball: true,
            ..EnrichmentParams::default()
        };
        let result = fixture.orchestrator.run_collection_cycle(&params).await;

        assert_eq!(result.snowball_discoveries, 1);
        // Exactly one outbound lookup: the stored citation cost none.
        assert_eq!(scholar_fetches.load(AtomicOrdering::SeqCst), 1);

        let counts = fixture.store.counts().await.unwrap();
        assert_eq!(counts.publications, 2);
    }

    #[tokio::test]
    async fn test_recommendations_surface_budget_pressure() {
        let counters = CycleCounters {
            backfill_jobs_skipped: 2,
            ..CycleCounters::default()
        };
        let recommendations = recommendations_for(&counters);
        assert!(recommendations.iter().any(|r| r.contains("daily cost limit")));
    }

    #[tokio::test]
    async fn test_cycle_reports_overlap_instead_of_queueing() {
        let fixture = fixture_with(
            Settings::new().with_flags(FeatureFlags {
                disable_ai_enrichment: true,
                disable_academic_scraping: true,
                disable_rss_monitoring: true,
                ..FeatureFlags::default()
            }),
            adapters_with(
                empty_adapter(DataSource::Arxiv),
                empty_adapter(DataSource::NewsRss),
                empty_adapter(DataSource::WebSearch),
                empty_adapter(DataSource::Intelligence),
            ),
        );

        fixture.orchestrator.cycle_running.store(true, Ordering::Release);
        let result = fixture
            .orchestrator
            .run_collection_cycle(&EnrichmentParams::default())
            .await;
        assert!(result
            .errors_encountered
            .iter()
            .any(|e| e.contains("already in progress")));
        fixture.orchestrator.cycle_running.store(false, Ordering::Release);
    }
}
