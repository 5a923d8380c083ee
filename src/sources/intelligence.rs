//! LLM-intelligence adapter.
//!
//! Templates a prompt from `(report_type, time_period, geographic_focus)`
//! and returns the provider's raw prose plus its response id. No schema
//! is imposed here; the citation extractor structures the text later.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use super::{
    DataSource, DiscardReason, FetchPage, FetchSpec, PageToken, ParseOutcome, RawRecord,
    SourceAdapter, TypedRecord,
};
use crate::error::Result;
use crate::mediator::Mediator;
use crate::providers::{IntelligenceProvider, SynthesisRequest};
use crate::records::ReportType;

const SYSTEM_PROMPT: &str = "You are an analyst tracking artificial intelligence innovation \
across Africa. Ground every claim in a verifiable source and cite source URLs inline.";

/// Raw synthesis output carried to the extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawIntelligence {
    pub report_type: ReportType,
    pub content: String,
    pub response_id: String,
    pub time_period: String,
    pub geographic_focus: Vec<String>,
}

/// Adapter fronting an intelligence provider.
pub struct IntelligenceAdapter {
    mediator: Arc<Mediator>,
    provider: Arc<dyn IntelligenceProvider>,
}

impl IntelligenceAdapter {
    pub fn new(mediator: Arc<Mediator>, provider: Arc<dyn IntelligenceProvider>) -> Self {
        Self { mediator, provider }
    }

    /// Build the synthesis prompt for a report request.
    pub fn build_prompt(
        report_type: ReportType,
        time_period: &str,
        geographic_focus: &[String],
    ) -> String {
        let focus = if geographic_focus.is_empty() {
            "the entire African continent".to_string()
        } else {
            geographic_focus.join(", ")
        };

        let task = match report_type {
            ReportType::InnovationDiscovery => {
                "Identify newly launched AI products, startups, and deployed systems. \
                 For each: the company or team, what the system does, where it operates, \
                 and its launch or announcement date."
            }
            ReportType::FundingLandscape => {
                "Summarize AI-related funding events: rounds, amounts, investors, \
                 accelerator cohorts, and grant programs. Name each company, the round \
                 type, and the amount raised."
            }
            ReportType::ResearchBreakthrough => {
                "Summarize notable AI research results from universities and labs, with \
                 paper titles, author institutions, and publication venues."
            }
            ReportType::PolicyDevelopment => {
                "Summarize AI policy and regulatory developments: national strategies, \
                 data-protection rules, and government AI programs, naming the country \
                 and the responsible body."
            }
            ReportType::TalentEcosystem => {
                "Describe AI talent developments: training programs, notable hires, \
                 research group formations, and diaspora returns."
            }
            ReportType::MarketAnalysis => {
                "Analyze AI market dynamics: sector adoption, revenue signals, \
                 partnerships, and competitive moves."
            }
        };

        format!(
            "{}\n\nScope: {} over {}.\n\nStructure the answer as numbered findings. \
             End with a Sources section listing every URL you relied on.",
            task, focus, time_period
        )
    }
}

#[async_trait]
impl SourceAdapter for IntelligenceAdapter {
    fn source(&self) -> DataSource {
        DataSource::Intelligence
    }

    async fn fetch(&self, spec: &FetchSpec, page: PageToken) -> Result<FetchPage> {
        let FetchSpec::Report {
            report_type,
            time_period,
            geographic_focus,
        } = spec
        else {
            return Ok(FetchPage::empty());
        };
        // One synthesis per request; there is no second page of prose.
        if page.0 > 0 {
            return Ok(FetchPage::empty());
        }

        let params = json!({
            "report_type": report_type,
            "time_period": time_period,
            "geographic_focus": geographic_focus,
            "provider": self.provider.name().to_string(),
        });

        let prompt = Self::build_prompt(*report_type, time_period, geographic_focus);
        let provider = Arc::clone(&self.provider);

        let mediated = self
            .mediator
            .call(DataSource::Intelligence, &params, move || {
                let provider = Arc::clone(&provider);
                let prompt = prompt.clone();
                async move {
                    let payload = provider
                        .synthesize(
                            SynthesisRequest::new(prompt)
                                .with_system(SYSTEM_PROMPT)
                                .with_max_tokens(2048)
                                .with_temperature(0.2),
                        )
                        .await?;
                    Ok(json!({
                        "content": payload.content,
                        "id": payload.response_id,
                    }))
                }
            })
            .await?;

        let Some(payload) = mediated.payload() else {
            return Ok(FetchPage::empty());
        };

        let record = RawRecord {
            source: DataSource::Intelligence,
            payload: json!({
                "report_type": report_type,
                "content": payload["content"],
                "id": payload["id"],
                "time_period": time_period,
                "geographic_focus": geographic_focus,
            }),
            fetched_at: Utc::now(),
        };

        Ok(FetchPage {
            records: vec![record],
            next: None,
        })
    }

    fn parse(&self, raw: &RawRecord) -> ParseOutcome {
        let content = raw.payload["content"].as_str().unwrap_or("");
        if content.trim().is_empty() {
            return ParseOutcome::Discard(DiscardReason::MissingRequiredField);
        }
        let report_type: ReportType =
            match serde_json::from_value(raw.payload["report_type"].clone()) {
                Ok(t) => t,
                Err(_) => return ParseOutcome::Discard(DiscardReason::MalformedPayload),
            };

        ParseOutcome::Record(TypedRecord::Intelligence(RawIntelligence {
            report_type,
            content: content.to_string(),
            response_id: raw.payload["id"].as_str().unwrap_or("").to_string(),
            time_period: raw.payload["time_period"].as_str().unwrap_or("").to_string(),
            geographic_focus: raw.payload["geographic_focus"]
                .as_array()
                .map(|a| {
                    a.iter()
                        .filter_map(|v| v.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default(),
        }))
    }
}
