//! Backfill engine.
//!
//! Enriches stored innovations by filling fields that arrived unknown.
//! Each candidate is inspected against a required-field schema; missing
//! fields become a prioritized job. Per field, a strategy issues
//! intelligence calls, targeted searches, or both, and a confidence
//! threshold decides whether the recovered value is written, flagged
//! for review, or discarded. A daily budget gates every job.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::clock::SharedClock;
use crate::config::CostLimits;
use crate::error::Result;
use crate::extract::patterns;
use crate::mediator::Mediator;
use crate::providers::{ProviderRegistry, SynthesisRequest};
use crate::records::Innovation;
use crate::sources::{collect_records, DataSource, FetchSpec, SourceAdapter, TypedRecord};
use crate::store::Persistence;

/// Priority of a missing field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackfillPriority {
    Critical = 0,
    High = 1,
    Medium = 2,
    Low = 3,
}

/// Lifecycle of a backfill job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackfillStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

/// Strategy used to recover a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackfillStrategy {
    IntelligenceOnly,
    SearchOnly,
    Combined,
}

/// One field absent from a record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissingField {
    pub field_name: String,
    pub priority: BackfillPriority,
    pub strategy: BackfillStrategy,
    pub estimated_cost: f64,
}

/// Outcome for one field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldResult {
    pub new_value: serde_json::Value,
    pub confidence: f64,
    /// Which channel produced the value.
    pub provenance: String,
    /// validated | needs_review | discarded
    pub validation_status: String,
}

/// A backfill job covering all missing fields of one innovation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillJob {
    pub job_id: String,
    pub innovation_id: String,
    pub innovation_title: String,
    pub missing_fields: Vec<MissingField>,
    pub status: BackfillStatus,
    pub priority: BackfillPriority,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub results: HashMap<String, FieldResult>,
    pub total_cost: f64,
    pub error: Option<String>,
}

impl BackfillJob {
    pub fn estimated_cost(&self) -> f64 {
        self.missing_fields.iter().map(|f| f.estimated_cost).sum()
    }
}

/// Aggregate counters across processed jobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackfillStats {
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_skipped: u64,
    pub fields_filled: u64,
    pub fields_flagged: u64,
    pub total_cost_usd: f64,
}

/// The engine. Holds its collaborators by `Arc` and mutates nothing
/// globally; daily spend lives in the mediator's ledger.
pub struct BackfillEngine {
    store: Arc<dyn Persistence>,
    mediator: Arc<Mediator>,
    providers: Arc<ProviderRegistry>,
    websearch: Arc<dyn SourceAdapter>,
    clock: SharedClock,
    cost: CostLimits,
    /// Confidence at or above which a value is written directly.
    write_threshold: f64,
    /// Confidence at or above which a value is kept for review.
    review_threshold: f64,
    /// Search strategies degrade to intelligence-only when false.
    search_enabled: bool,
    stats: std::sync::Mutex<BackfillStats>,
    /// Jobs from the most recent batch, for the status surface.
    last_jobs: std::sync::Mutex<Vec<BackfillJob>>,
}

impl BackfillEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn Persistence>,
        mediator: Arc<Mediator>,
        providers: Arc<ProviderRegistry>,
        websearch: Arc<dyn SourceAdapter>,
        clock: SharedClock,
        cost: CostLimits,
        write_threshold: f64,
        review_threshold: f64,
    ) -> Self {
        Self {
            store,
            mediator,
            providers,
            websearch,
            clock,
            cost,
            write_threshold,
            review_threshold,
            search_enabled: true,
            stats: std::sync::Mutex::new(BackfillStats::default()),
            last_jobs: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn with_search_enabled(mut self, enabled: bool) -> Self {
        self.search_enabled = enabled;
        self
    }

    /// Inspect a record against the required-field schema.
    pub fn analyze_missing_fields(&self, innovation: &Innovation) -> Vec<MissingField> {
        let mut missing = Vec::new();
        let mut add = |name: &str, priority, strategy| {
            let estimated_cost = match strategy {
                BackfillStrategy::IntelligenceOnly => self.cost.intelligence_call_usd,
                BackfillStrategy::SearchOnly => self.cost.websearch_call_usd,
                BackfillStrategy::Combined => {
                    self.cost.intelligence_call_usd + self.cost.websearch_call_usd
                }
            };
            missing.push(MissingField {
                field_name: name.to_string(),
                priority,
                strategy,
                estimated_cost,
            });
        };

        if innovation.description.is_empty() {
            add(
                "description",
                BackfillPriority::Critical,
                BackfillStrategy::Combined,
            );
        }
        if innovation.country.is_none() {
            add(
                "country",
                BackfillPriority::Critical,
                BackfillStrategy::SearchOnly,
            );
        }
        if innovation.website_url.is_none() {
            add(
                "website_url",
                BackfillPriority::Critical,
                BackfillStrategy::SearchOnly,
            );
        }
        if innovation.fundings.is_empty() {
            add(
                "fundings",
                BackfillPriority::High,
                BackfillStrategy::Combined,
            );
        }
        if innovation.organizations.is_empty() {
            add(
                "organizations",
                BackfillPriority::High,
                BackfillStrategy::IntelligenceOnly,
            );
        }
        if innovation.github_url.is_none() {
            add(
                "github_url",
                BackfillPriority::Medium,
                BackfillStrategy::SearchOnly,
            );
        }
        if innovation.tags.is_empty() {
            add(
                "tags",
                BackfillPriority::Medium,
                BackfillStrategy::IntelligenceOnly,
            );
        }
        if innovation.impact_metrics.is_empty() {
            add(
                "impact_metrics",
                BackfillPriority::Low,
                BackfillStrategy::IntelligenceOnly,
            );
        }

        missing
    }

    /// Build a job for a record, or `None` when nothing is missing.
    pub fn create_job(&self, innovation: &Innovation) -> Option<BackfillJob> {
        let missing_fields = self.analyze_missing_fields(innovation);
        let priority = missing_fields.iter().map(|f| f.priority).min()?;
        Some(BackfillJob {
            job_id: crate::clock::new_prefixed_id("bf"),
            innovation_id: innovation.id.clone(),
            innovation_title: innovation.title.clone(),
            missing_fields,
            status: BackfillStatus::Pending,
            priority,
            created_at: self.clock.now(),
            completed_at: None,
            results: HashMap::new(),
            total_cost: 0.0,
            error: None,
        })
    }

    /// Process one job. The budget is checked before any call: a job
    /// whose estimate exceeds the remaining budget is skipped whole.
    pub async fn process_job(&self, mut job: BackfillJob) -> BackfillJob {
        let snapshot = self.mediator.cost_snapshot().await;
        if job.estimated_cost() > snapshot.remaining_usd() {
            debug!(
                job = %job.job_id,
                estimated = job.estimated_cost(),
                remaining = snapshot.remaining_usd(),
                "backfill job skipped: over budget"
            );
            job.status = BackfillStatus::Skipped;
            job.completed_at = Some(self.clock.now());
            self.stats.lock().expect("stats poisoned").jobs_skipped += 1;
            return job;
        }

        job.status = BackfillStatus::InProgress;
        let mut any_failed = false;

        let fields = job.missing_fields.clone();
        for field in &fields {
            match self.backfill_field(&job, field).await {
                Ok(Some(result)) => {
                    let mut stats = self.stats.lock().expect("stats poisoned");
                    match result.validation_status.as_str() {
                        "validated" => stats.fields_filled += 1,
                        "needs_review" => stats.fields_flagged += 1,
                        _ => {}
                    }
                    drop(stats);
                    job.results.insert(field.field_name.clone(), result);
                }
                Ok(None) => {}
                Err(err) => {
                    debug!(job = %job.job_id, field = %field.field_name, error = %err, "field backfill failed");
                    any_failed = true;
                }
            }
        }

        let spent_after = self.mediator.cost_snapshot().await;
        job.total_cost = (spent_after.total_usd - snapshot.total_usd).max(0.0);
        job.completed_at = Some(self.clock.now());
        if job.results.is_empty() && any_failed {
            job.status = BackfillStatus::Failed;
            job.error = Some("every field strategy failed".to_string());
        } else {
            job.status = BackfillStatus::Completed;
        }

        let mut stats = self.stats.lock().expect("stats poisoned");
        match job.status {
            BackfillStatus::Completed => stats.jobs_completed += 1,
            BackfillStatus::Failed => stats.jobs_failed += 1,
            _ => {}
        }
        stats.total_cost_usd += job.total_cost;
        drop(stats);

        job
    }

    /// Run up to `max_jobs` jobs over records known to be missing
    /// fields, applying validated results back to the store.
    pub async fn run_batch(&self, max_jobs: usize) -> Result<Vec<BackfillJob>> {
        let candidates = self.store.recent_innovations(100).await?;
        self.run_over(&candidates, max_jobs).await
    }

    /// Run jobs for specific record ids (the targeted trigger path).
    pub async fn run_for(&self, ids: &[String], max_jobs: usize) -> Result<Vec<BackfillJob>> {
        let mut candidates = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(innovation) = self.store.get_innovation(id).await? {
                candidates.push(innovation);
            }
        }
        self.run_over(&candidates, max_jobs).await
    }

    async fn run_over(
        &self,
        candidates: &[Innovation],
        max_jobs: usize,
    ) -> Result<Vec<BackfillJob>> {
        let mut jobs: Vec<BackfillJob> = candidates
            .iter()
            .filter_map(|innovation| self.create_job(innovation))
            .collect();
        // Priority first, older records first within a priority.
        jobs.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        jobs.truncate(max_jobs);

        let mut processed = Vec::with_capacity(jobs.len());
        for job in jobs {
            let done = self.process_job(job).await;
            if done.status == BackfillStatus::Completed {
                self.apply_results(&done).await?;
            }
            processed.push(done);
        }
        info!(jobs = processed.len(), "backfill batch finished");
        *self.last_jobs.lock().expect("jobs poisoned") = processed.clone();
        Ok(processed)
    }

    /// Jobs from the most recent batch.
    pub fn job_status(&self) -> Vec<BackfillJob> {
        self.last_jobs.lock().expect("jobs poisoned").clone()
    }

    /// Write validated field values back to the record.
    async fn apply_results(&self, job: &BackfillJob) -> Result<()> {
        let Some(mut innovation) = self.store.get_innovation(&job.innovation_id).await? else {
            return Ok(());
        };

        for (field_name, result) in &job.results {
            if result.validation_status != "validated" {
                continue;
            }
            let value = &result.new_value;
            match field_name.as_str() {
                "description" => {
                    if let Some(text) = value.as_str() {
                        innovation.description = text.to_string();
                    }
                }
                "country" => {
                    innovation.country = value.as_str().map(String::from);
                }
                "website_url" => {
                    innovation.website_url = value.as_str().map(String::from);
                }
                "github_url" => {
                    innovation.github_url = value.as_str().map(String::from);
                }
                "tags" => {
                    if let Some(tags) = value.as_array() {
                        innovation.tags = tags
                            .iter()
                            .filter_map(|t| t.as_str().map(String::from))
                            .collect();
                    }
                }
                _ => {
                    innovation
                        .impact_metrics
                        .insert(format!("backfill_{}", field_name), value.clone());
                }
            }
        }

        innovation.last_backfilled_at = Some(self.clock.now());
        innovation.backfill_attempts += 1;
        self.store.update_innovation(innovation).await
    }

    async fn backfill_field(
        &self,
        job: &BackfillJob,
        field: &MissingField,
    ) -> Result<Option<FieldResult>> {
        match field.strategy {
            BackfillStrategy::IntelligenceOnly => self.intelligence_pass(job, field).await,
            BackfillStrategy::SearchOnly => self.search_pass(job, field).await,
            BackfillStrategy::Combined => {
                let intelligence = self.intelligence_pass(job, field).await.unwrap_or(None);
                let search = self.search_pass(job, field).await.unwrap_or(None);
                Ok(self.combine(intelligence, search))
            }
        }
    }

    /// Dual-source combination: both agree → averaged confidence;
    /// otherwise whichever clears the review threshold alone.
    fn combine(
        &self,
        intelligence: Option<FieldResult>,
        search: Option<FieldResult>,
    ) -> Option<FieldResult> {
        match (intelligence, search) {
            (Some(a), Some(b)) => {
                let confidence = (a.confidence + b.confidence) / 2.0;
                let preferred = if a.confidence >= b.confidence { a } else { b };
                Some(FieldResult {
                    confidence,
                    provenance: "dual_source".to_string(),
                    validation_status: self.validation_status(confidence),
                    ..preferred
                })
            }
            (Some(single), None) | (None, Some(single)) => {
                (single.confidence >= self.review_threshold).then_some(single)
            }
            (None, None) => None,
        }
    }

    async fn intelligence_pass(
        &self,
        job: &BackfillJob,
        field: &MissingField,
    ) -> Result<Option<FieldResult>> {
        let provider = Arc::clone(self.providers.resolve(None)?);
        let prompt = format!(
            "For the African AI innovation \"{}\", report only its {}. \
             Answer with the value and one sentence of evidence.",
            job.innovation_title,
            field.field_name.replace('_', " "),
        );
        let params = json!({
            "op": "backfill",
            "innovation": job.innovation_title,
            "field": field.field_name,
        });

        let mediated = self
            .mediator
            .call(DataSource::Intelligence, &params, move || {
                let provider = Arc::clone(&provider);
                let prompt = prompt.clone();
                async move {
                    let payload = provider
                        .synthesize(SynthesisRequest::new(prompt).with_max_tokens(512))
                        .await?;
                    Ok(json!({ "content": payload.content }))
                }
            })
            .await?;

        let Some(content) = mediated.payload().and_then(|p| p["content"].as_str()) else {
            return Ok(None);
        };
        Ok(self.parse_field_value(content, &field.field_name, "intelligence"))
    }

    async fn search_pass(
        &self,
        job: &BackfillJob,
        field: &MissingField,
    ) -> Result<Option<FieldResult>> {
        if !self.search_enabled {
            return Ok(None);
        }
        let query = match field.field_name.as_str() {
            "website_url" => format!("{} official website", job.innovation_title),
            "github_url" => format!("{} github repository", job.innovation_title),
            "country" => format!("{} headquarters country", job.innovation_title),
            "fundings" => format!("{} funding round raised", job.innovation_title),
            other => format!("{} {}", job.innovation_title, other.replace('_', " ")),
        };
        let spec = FetchSpec::Keyword {
            query,
            max_results: 5,
            days_back: None,
        };

        let (records, _discards) = collect_records(self.websearch.as_ref(), &spec, 5).await?;
        let mut corpus = String::new();
        for record in &records {
            if let TypedRecord::Search(hit) = record {
                corpus.push_str(&hit.title);
                corpus.push(' ');
                corpus.push_str(&hit.snippet);
                corpus.push(' ');
                corpus.push_str(&hit.link);
                corpus.push('\n');
            }
        }
        if corpus.is_empty() {
            return Ok(None);
        }
        Ok(self.parse_field_value(&corpus, &field.field_name, "search"))
    }

    /// Structured-extraction pass over free text for one field.
    fn parse_field_value(
        &self,
        content: &str,
        field_name: &str,
        provenance: &str,
    ) -> Option<FieldResult> {
        let (value, confidence) = match field_name {
            "fundings" => {
                let amount = patterns::find_funding_amount(content)?;
                let round = patterns::find_round_type(content);
                (json!({ "amount": amount, "round_type": round }), 0.85)
            }
            "country" => {
                let country = patterns::find_location(content)?;
                (json!(country), 0.8)
            }
            "website_url" | "github_url" => {
                let urls = patterns::find_urls(content);
                let url = if field_name == "github_url" {
                    urls.into_iter().find(|u| u.contains("github.com"))?
                } else {
                    urls.into_iter().next()?
                };
                (json!(url), 0.75)
            }
            "tags" => {
                let keywords =
                    crate::sources::relevance::extract_ai_keywords(content, "");
                if keywords.is_empty() {
                    return None;
                }
                (json!(keywords), 0.7)
            }
            "organizations" => {
                let institution = patterns::find_institution(content)
                    .or_else(|| patterns::find_company(content))?;
                (json!([institution]), 0.65)
            }
            _ => {
                let sentence = patterns::split_sentences(content).into_iter().next()?;
                if sentence.len() < 20 {
                    return None;
                }
                (json!(sentence), 0.55)
            }
        };

        Some(FieldResult {
            new_value: value,
            confidence,
            provenance: provenance.to_string(),
            validation_status: self.validation_status(confidence),
        })
    }

    fn validation_status(&self, confidence: f64) -> String {
        if confidence >= self.write_threshold {
            "validated"
        } else if confidence >= self.review_threshold {
            "needs_review"
        } else {
            "discarded"
        }
        .to_string()
    }

    pub fn stats(&self) -> BackfillStats {
        self.stats.lock().expect("stats poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TieredCache;
    use crate::clock::SystemClock;
    use crate::config::CacheTtls;
    use crate::providers::{IntelligenceProvider, ProviderName, ReportPayload};
    use crate::records::{InnovationType, RecordProvenance};
    use crate::sources::{FetchPage, PageToken, ParseOutcome, RawRecord, SearchHit};
    use crate::store::MemoryPersistence;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubProvider {
        calls: AtomicUsize,
        response: String,
    }

    #[async_trait]
    impl IntelligenceProvider for StubProvider {
        async fn synthesize(&self, _request: SynthesisRequest) -> Result<ReportPayload> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ReportPayload {
                content: self.response.clone(),
                response_id: "stub".into(),
            })
        }

        fn name(&self) -> ProviderName {
            ProviderName::Perplexity
        }
    }

    struct StubSearch {
        calls: Arc<AtomicUsize>,
        hits: Vec<SearchHit>,
    }

    #[async_trait]
    impl SourceAdapter for StubSearch {
        fn source(&self) -> DataSource {
            DataSource::WebSearch
        }

        async fn fetch(&self, _spec: &FetchSpec, page: PageToken) -> Result<FetchPage> {
            if page.0 > 0 {
                return Ok(FetchPage::empty());
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(FetchPage {
                records: self
                    .hits
                    .iter()
                    .map(|hit| RawRecord {
                        source: DataSource::WebSearch,
                        payload: serde_json::to_value(hit).unwrap(),
                        fetched_at: Utc::now(),
                    })
                    .collect(),
                next: None,
            })
        }

        fn parse(&self, raw: &RawRecord) -> ParseOutcome {
            ParseOutcome::Record(TypedRecord::Search(
                serde_json::from_value(raw.payload.clone()).unwrap(),
            ))
        }
    }

    struct Fixture {
        engine: BackfillEngine,
        store: Arc<MemoryPersistence>,
        search_calls: Arc<AtomicUsize>,
    }

    fn fixture(daily_limit: f64, provider_response: &str) -> Fixture {
        let clock: SharedClock = Arc::new(SystemClock::new());
        let cache = Arc::new(TieredCache::in_memory(CacheTtls::default(), clock.clone()).unwrap());
        let cost = CostLimits {
            daily_limit_usd: daily_limit,
            ..CostLimits::default()
        };
        let mediator = Arc::new(Mediator::new(
            cache,
            clock.clone(),
            cost.clone(),
            HashMap::new(),
        ));
        let store = Arc::new(MemoryPersistence::new());
        let providers = Arc::new(ProviderRegistry::new().with_provider(Arc::new(StubProvider {
            calls: AtomicUsize::new(0),
            response: provider_response.to_string(),
        })));
        let search_calls = Arc::new(AtomicUsize::new(0));
        let websearch = Arc::new(StubSearch {
            calls: Arc::clone(&search_calls),
            hits: vec![SearchHit {
                title: "M-Shule - official site".into(),
                link: "https://m-shule.com".into(),
                snippet: "M-Shule is an SMS learning platform in Kenya that raised $2 million seed funding."
                    .into(),
                position: 1,
            }],
        });

        Fixture {
            engine: BackfillEngine::new(
                store.clone(),
                mediator,
                providers,
                websearch,
                clock,
                cost,
                0.8,
                0.6,
            ),
            store,
            search_calls,
        }
    }

    fn sparse_innovation() -> Innovation {
        let mut innovation = Innovation::new(
            "M-Shule",
            "",
            InnovationType::Startup,
            RecordProvenance {
                source: DataSource::Intelligence,
                source_id: None,
                collected_at: Utc::now(),
            },
            Utc::now(),
        );
        innovation.country = None;
        innovation
    }

    #[test]
    fn test_missing_field_analysis_orders_by_schema() {
        let fixture = fixture(50.0, "");
        let missing = fixture.engine.analyze_missing_fields(&sparse_innovation());

        let names: Vec<&str> = missing.iter().map(|f| f.field_name.as_str()).collect();
        assert!(names.contains(&"description"));
        assert!(names.contains(&"country"));
        assert!(names.contains(&"website_url"));
        assert!(names.contains(&"fundings"));

        let critical = missing
            .iter()
            .filter(|f| f.priority == BackfillPriority::Critical)
            .count();
        assert_eq!(critical, 3);
    }

    #[test]
    fn test_complete_record_needs_no_job() {
        let fixture = fixture(50.0, "");
        let mut innovation = sparse_innovation();
        innovation.description = "Adaptive SMS learning".into();
        innovation.country = Some("Kenya".into());
        innovation.website_url = Some("https://m-shule.com".into());
        innovation.fundings.push(crate::records::FundingEvent {
            amount: Some("$2M".into()),
            round_type: Some("seed".into()),
            investors: vec![],
            announced_at: None,
        });
        innovation.organizations = vec!["org-1".into()];
        innovation.github_url = Some("https://github.com/mshule".into());
        innovation.tags = vec!["edtech".into()];
        innovation
            .impact_metrics
            .insert("learners".into(), json!(120_000));

        assert!(fixture.engine.create_job(&innovation).is_none());
    }

    #[tokio::test]
    async fn test_over_budget_job_is_skipped_without_calls() {
        let fixture = fixture(0.05, "irrelevant");
        let job = fixture.engine.create_job(&sparse_innovation()).unwrap();
        assert!(job.estimated_cost() > 0.05);

        let done = fixture.engine.process_job(job).await;
        assert_eq!(done.status, BackfillStatus::Skipped);
        assert!(done.results.is_empty());
        assert_eq!(fixture.search_calls.load(Ordering::SeqCst), 0);
        assert_eq!(fixture.engine.stats().jobs_skipped, 1);
    }

    #[tokio::test]
    async fn test_search_pass_recovers_website_and_country() {
        let fixture = fixture(
            50.0,
            "M-Shule is a Nairobi based startup founded in Kenya. It delivers adaptive \
             lessons over SMS to primary school learners across the country. Evidence: \
             https://m-shule.com/about describes the platform in detail.",
        );
        let mut innovation = sparse_innovation();
        fixture
            .store
            .upsert_innovation(innovation.clone())
            .await
            .unwrap();
        innovation = fixture
            .store
            .recent_innovations(1)
            .await
            .unwrap()
            .pop()
            .unwrap();

        let job = fixture.engine.create_job(&innovation).unwrap();
        let done = fixture.engine.process_job(job).await;

        assert_eq!(done.status, BackfillStatus::Completed);
        let country = done.results.get("country").expect("country recovered");
        assert_eq!(country.new_value, json!("Kenya"));
        assert_eq!(country.validation_status, "validated");

        let website = done.results.get("website_url").expect("website recovered");
        assert_eq!(website.new_value, json!("https://m-shule.com"));
        // 0.75 sits in the review band, not the write band.
        assert_eq!(website.validation_status, "needs_review");
    }

    #[tokio::test]
    async fn test_batch_applies_validated_results() {
        let fixture = fixture(
            50.0,
            "M-Shule operates in Kenya. The startup M-Shule raised $2 million seed funding. \
             See https://m-shule.com for details of the SMS learning platform.",
        );
        fixture
            .store
            .upsert_innovation(sparse_innovation())
            .await
            .unwrap();

        let jobs = fixture.engine.run_batch(10).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, BackfillStatus::Completed);

        let updated = fixture
            .store
            .recent_innovations(1)
            .await
            .unwrap()
            .pop()
            .unwrap();
        assert_eq!(updated.country.as_deref(), Some("Kenya"));
        assert_eq!(updated.backfill_attempts, 1);
        assert!(updated.last_backfilled_at.is_some());
    }

    #[tokio::test]
    async fn test_dual_source_combination_averages_confidence() {
        let fixture = fixture(50.0, "");
        let a = FieldResult {
            new_value: json!("Kenya"),
            confidence: 0.9,
            provenance: "intelligence".into(),
            validation_status: "validated".into(),
        };
        let b = FieldResult {
            new_value: json!("Kenya"),
            confidence: 0.7,
            provenance: "search".into(),
            validation_status: "needs_review".into(),
        };
        let combined = fixture.engine.combine(Some(a), Some(b)).unwrap();
        assert_eq!(combined.provenance, "dual_source");
        assert!((combined.confidence - 0.8).abs() < 1e-9);
        assert_eq!(combined.validation_status, "validated");

        // A single low-confidence result below the review threshold is dropped.
        let weak = FieldResult {
            new_value: json!("?"),
            confidence: 0.4,
            provenance: "search".into(),
            validation_status: "discarded".into(),
        };
        assert!(fixture.engine.combine(None, Some(weak)).is_none());
    }
}
