//! Intelligence reports and extracted citations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of intelligence synthesis requested from the LLM provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    InnovationDiscovery,
    FundingLandscape,
    ResearchBreakthrough,
    PolicyDevelopment,
    TalentEcosystem,
    MarketAnalysis,
}

impl ReportType {
    /// All report types, in prompt-template order.
    pub fn all() -> [ReportType; 6] {
        [
            Self::InnovationDiscovery,
            Self::FundingLandscape,
            Self::ResearchBreakthrough,
            Self::PolicyDevelopment,
            Self::TalentEcosystem,
            Self::MarketAnalysis,
        ]
    }
}

impl std::fmt::Display for ReportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::InnovationDiscovery => "innovation_discovery",
            Self::FundingLandscape => "funding_landscape",
            Self::ResearchBreakthrough => "research_breakthrough",
            Self::PolicyDevelopment => "policy_development",
            Self::TalentEcosystem => "talent_ecosystem",
            Self::MarketAnalysis => "market_analysis",
        };
        write!(f, "{}", name)
    }
}

/// Resolution state of an extracted citation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "publication_id")]
pub enum ResolutionState {
    Unresolved,
    ResolvedTo(String),
    Unresolvable,
}

/// A single reference mined from LLM prose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedCitation {
    /// URL or bibliographic pointer.
    pub reference: String,
    /// Sentence window around the reference.
    pub citation_context: String,
    pub resolution_state: ResolutionState,
    pub confidence: f64,
}

impl ExtractedCitation {
    pub fn new(reference: impl Into<String>, context: impl Into<String>, confidence: f64) -> Self {
        Self {
            reference: reference.into(),
            citation_context: context.into(),
            resolution_state: ResolutionState::Unresolved,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    pub fn is_url(&self) -> bool {
        self.reference.starts_with("http://") || self.reference.starts_with("https://")
    }
}

/// An innovation mentioned inside a report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InnovationMention {
    pub company_name: String,
    pub description: String,
    pub location: Option<String>,
    pub confidence: f64,
}

/// A funding event mentioned inside a report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingUpdate {
    pub company: String,
    pub amount: Option<String>,
    pub round_type: Option<String>,
    pub investors: Vec<String>,
    pub description: String,
}

/// A policy development mentioned inside a report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDevelopment {
    pub title: String,
    pub description: String,
    pub country: Option<String>,
    pub policy_type: String,
}

/// Structured product of one LLM intelligence call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntelligenceReport {
    pub report_id: String,
    pub report_type: ReportType,
    pub title: String,
    pub summary: String,
    pub key_findings: Vec<String>,
    pub innovations_mentioned: Vec<InnovationMention>,
    pub funding_updates: Vec<FundingUpdate>,
    pub policy_developments: Vec<PolicyDevelopment>,
    /// Deduplicated source URLs.
    pub sources: Vec<String>,
    pub extracted_citations: Vec<ExtractedCitation>,
    pub geographic_focus: Vec<String>,
    pub confidence_score: f64,
    pub generation_timestamp: DateTime<Utc>,
    pub time_period_analyzed: String,
    pub validation_flags: Vec<String>,
    pub follow_up_actions: Vec<String>,
}

impl IntelligenceReport {
    /// Raise confidence after a successful cross-validation pass.
    /// Confidence never decreases through validation.
    pub fn record_validation(&mut self, boost: f64, flags: Vec<String>) {
        self.confidence_score = (self.confidence_score + boost.max(0.0)).min(1.0);
        self.validation_flags.extend(flags);
    }

    /// Add a source URL, preserving the deduplicated invariant.
    pub fn add_source(&mut self, url: impl Into<String>) {
        let url = url.into();
        if !self.sources.contains(&url) {
            self.sources.push(url);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> IntelligenceReport {
        IntelligenceReport {
            report_id: crate::clock::new_prefixed_id("rpt"),
            report_type: ReportType::FundingLandscape,
            title: "Funding landscape".into(),
            summary: String::new(),
            key_findings: vec![],
            innovations_mentioned: vec![],
            funding_updates: vec![],
            policy_developments: vec![],
            sources: vec![],
            extracted_citations: vec![],
            geographic_focus: vec!["Nigeria".into()],
            confidence_score: 0.6,
            generation_timestamp: Utc::now(),
            time_period_analyzed: "last_30_days".into(),
            validation_flags: vec![],
            follow_up_actions: vec![],
        }
    }

    #[test]
    fn test_validation_never_lowers_confidence() {
        let mut r = report();
        r.record_validation(-0.5, vec![]);
        assert_eq!(r.confidence_score, 0.6);

        r.record_validation(0.2, vec!["company_verified".into()]);
        assert!((r.confidence_score - 0.8).abs() < 1e-9);

        r.record_validation(0.9, vec![]);
        assert_eq!(r.confidence_score, 1.0);
    }

    #[test]
    fn test_sources_stay_deduplicated() {
        let mut r = report();
        r.add_source("https://techcabal.com/a");
        r.add_source("https://techcabal.com/a");
        r.add_source("https://techcabal.com/b");
        assert_eq!(r.sources.len(), 2);
    }

    #[test]
    fn test_citation_url_detection() {
        let url = ExtractedCitation::new("https://arxiv.org/abs/2401.1", "ctx", 0.9);
        let biblio = ExtractedCitation::new("Okello et al., 2023", "ctx", 0.5);
        assert!(url.is_url());
        assert!(!biblio.is_url());
    }

    #[test]
    fn test_report_type_serde_names() {
        let json = serde_json::to_string(&ReportType::InnovationDiscovery).unwrap();
        assert_eq!(json, "\"innovation_discovery\"");
        assert_eq!(ReportType::MarketAnalysis.to_string(), "market_analysis");
    }
}
