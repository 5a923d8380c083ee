//! Intelligence-report extraction.
//!
//! Turns the raw prose of an intelligence call into a structured
//! [`IntelligenceReport`]: summary, key findings, per-paragraph
//! structured findings with tagged entities, deduplicated sources, and
//! citations with context windows for later resolution.

pub mod patterns;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::records::{
    ExtractedCitation, FundingUpdate, InnovationMention, IntelligenceReport, PolicyDevelopment,
    ReportType,
};
use crate::sources::RawIntelligence;

const MAX_KEY_FINDINGS: usize = 10;
const MAX_SOURCES: usize = 20;
const SUMMARY_SENTENCES: usize = 3;

/// Keywords that rescue a sentence into key findings when no enumerated
/// list is present.
const FINDING_KEYWORDS: &[&str] = &["ai", "innovation", "startup", "funding", "research"];

/// One paragraph of the report with its tagged entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredFinding {
    pub content: String,
    pub company_name: Option<String>,
    pub location: Option<String>,
    pub funding_amount: Option<String>,
    pub round_type: Option<String>,
    pub institution: Option<String>,
    pub confidence: f64,
}

impl StructuredFinding {
    fn from_paragraph(paragraph: &str) -> Self {
        let company_name = patterns::find_company(paragraph);
        let location = patterns::find_location(paragraph);
        let funding_amount = patterns::find_funding_amount(paragraph);
        let round_type = patterns::find_round_type(paragraph);
        let institution = patterns::find_institution(paragraph);

        let tagged = [
            company_name.is_some(),
            location.is_some(),
            funding_amount.is_some(),
            round_type.is_some(),
            institution.is_some(),
        ]
        .iter()
        .filter(|t| **t)
        .count();
        let confidence = (0.4 + 0.12 * tagged as f64).min(0.95);

        Self {
            content: paragraph.trim().to_string(),
            company_name,
            location,
            funding_amount,
            round_type,
            institution,
            confidence,
        }
    }

    fn entity_kinds(&self) -> usize {
        [
            self.company_name.is_some(),
            self.location.is_some(),
            self.funding_amount.is_some() || self.round_type.is_some(),
            self.institution.is_some(),
        ]
        .iter()
        .filter(|t| **t)
        .count()
    }
}

/// Build a structured report from raw synthesis output.
pub fn extract_report(raw: &RawIntelligence, now: DateTime<Utc>) -> IntelligenceReport {
    let content = raw.content.as_str();

    let summary = extract_summary(content);
    let key_findings = extract_key_findings(content);
    let findings = extract_structured_findings(content);
    let sources = extract_sources(content);
    let citations = extract_citations(content, &sources);
    let confidence_score = confidence_score(content, &findings);

    let innovations_mentioned = findings
        .iter()
        .filter(|f| f.company_name.is_some())
        .map(|f| InnovationMention {
            company_name: f.company_name.clone().unwrap_or_default(),
            description: truncate(&f.content, 200),
            location: f.location.clone(),
            confidence: f.confidence,
        })
        .collect();

    let funding_updates = findings
        .iter()
        .filter(|f| f.funding_amount.is_some() || f.round_type.is_some())
        .map(|f| FundingUpdate {
            company: f.company_name.clone().unwrap_or_default(),
            amount: f.funding_amount.clone(),
            round_type: f.round_type.clone(),
            investors: Vec::new(),
            description: truncate(&f.content, 200),
        })
        .collect();

    let policy_developments = findings
        .iter()
        .filter(|f| {
            let lower = f.content.to_lowercase();
            ["policy", "regulation", "government", "law"]
                .iter()
                .any(|w| lower.contains(w))
        })
        .map(|f| PolicyDevelopment {
            title: truncate(&f.content, 80),
            description: truncate(&f.content, 200),
            country: f.location.clone(),
            policy_type: "regulation".to_string(),
        })
        .collect();

    let follow_up_actions = follow_up_actions(raw.report_type, &findings);

    IntelligenceReport {
        report_id: crate::clock::new_prefixed_id("rpt"),
        report_type: raw.report_type,
        title: report_title(raw.report_type, &raw.time_period),
        summary,
        key_findings,
        innovations_mentioned,
        funding_updates,
        policy_developments,
        sources,
        extracted_citations: citations,
        geographic_focus: raw.geographic_focus.clone(),
        confidence_score,
        generation_timestamp: now,
        time_period_analyzed: raw.time_period.clone(),
        validation_flags: Vec::new(),
        follow_up_actions,
    }
}

/// Extractive summary: first few sentences, or a bounded prefix.
pub fn extract_summary(content: &str) -> String {
    let sentences = patterns::split_sentences(content);
    if sentences.len() > SUMMARY_SENTENCES {
        sentences[..SUMMARY_SENTENCES].join(" ")
    } else if content.len() > 200 {
        format!("{}...", truncate(content, 200))
    } else {
        content.trim().to_string()
    }
}

/// Enumerated or bulleted lines of plausible length; falls back to
/// keyword-bearing sentences when the prose has no list structure.
pub fn extract_key_findings(content: &str) -> Vec<String> {
    let mut findings: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| patterns::is_enumerated(line) && line.len() > 10 && line.len() < 200)
        .map(patterns::strip_enumeration)
        .filter(|f| !f.is_empty())
        .collect();

    if findings.is_empty() {
        findings = patterns::split_sentences(content)
            .into_iter()
            .take(5)
            .filter(|s| s.len() > 20 && s.len() < 200)
            .filter(|s| {
                let lower = s.to_lowercase();
                FINDING_KEYWORDS.iter().any(|k| lower.contains(k))
            })
            .map(String::from)
            .collect();
    }

    findings.truncate(MAX_KEY_FINDINGS);
    findings
}

/// Tag each non-trivial paragraph with detected entities.
pub fn extract_structured_findings(content: &str) -> Vec<StructuredFinding> {
    content
        .split("\n\n")
        .flat_map(|block| block.lines())
        .map(str::trim)
        .filter(|p| p.len() > 40)
        .map(StructuredFinding::from_paragraph)
        .filter(|f| f.entity_kinds() > 0)
        .collect()
}

/// Deduplicated source URLs, bounded.
pub fn extract_sources(content: &str) -> Vec<String> {
    let mut urls = patterns::find_urls(content);
    urls.truncate(MAX_SOURCES);
    urls
}

/// Citations with a character window around each reference as context.
/// Sentence boundaries are useless here: URLs contain periods.
pub fn extract_citations(content: &str, sources: &[String]) -> Vec<ExtractedCitation> {
    const CONTEXT_WINDOW: usize = 140;
    sources
        .iter()
        .map(|url| {
            let context = content
                .find(url.as_str())
                .map(|pos| {
                    let mut start = pos.saturating_sub(CONTEXT_WINDOW);
                    while !content.is_char_boundary(start) {
                        start -= 1;
                    }
                    let mut end = (pos + url.len() + CONTEXT_WINDOW).min(content.len());
                    while !content.is_char_boundary(end) {
                        end += 1;
                    }
                    content[start..end].trim().to_string()
                })
                .unwrap_or_default();
            // URLs with a path component are more specific than bare hosts.
            let specificity = if url.splitn(4, '/').nth(3).is_some_and(|p| !p.is_empty()) {
                0.8
            } else {
                0.5
            };
            ExtractedCitation::new(url.clone(), context, specificity)
        })
        .collect()
}

/// Weighted confidence: content length, finding count, entity variety,
/// and URL presence; clamped to `[0, 1]`.
pub fn confidence_score(content: &str, findings: &[StructuredFinding]) -> f64 {
    let mut score = 0.5;

    if content.len() > 1000 {
        score += 0.1;
    } else if content.len() > 500 {
        score += 0.05;
    }

    if findings.len() > 3 {
        score += 0.15;
    } else if findings.len() > 1 {
        score += 0.1;
    }

    let mut entity_kinds = std::collections::HashSet::new();
    for finding in findings {
        if finding.company_name.is_some() {
            entity_kinds.insert("company");
        }
        if finding.funding_amount.is_some() {
            entity_kinds.insert("funding");
        }
        if finding.location.is_some() {
            entity_kinds.insert("location");
        }
        if finding.institution.is_some() {
            entity_kinds.insert("institution");
        }
    }
    score += entity_kinds.len() as f64 * 0.05;

    let url_count = content.matches("http").count();
    if url_count > 0 {
        score += (url_count as f64 * 0.02).min(0.1);
    }

    score.min(1.0)
}

fn follow_up_actions(report_type: ReportType, findings: &[StructuredFinding]) -> Vec<String> {
    let mut actions = Vec::new();
    match report_type {
        ReportType::InnovationDiscovery => {
            for finding in findings.iter().filter(|f| f.company_name.is_some()) {
                actions.push(format!(
                    "Verify and profile {}",
                    finding.company_name.as_deref().unwrap_or_default()
                ));
            }
        }
        ReportType::FundingLandscape => {
            for finding in findings.iter().filter(|f| f.funding_amount.is_some()) {
                actions.push(format!(
                    "Confirm funding event: {} {}",
                    finding.company_name.as_deref().unwrap_or("unknown company"),
                    finding.funding_amount.as_deref().unwrap_or_default()
                ));
            }
        }
        ReportType::ResearchBreakthrough => {
            for finding in findings.iter().filter(|f| f.institution.is_some()) {
                actions.push(format!(
                    "Locate publication from {}",
                    finding.institution.as_deref().unwrap_or_default()
                ));
            }
        }
        _ => {}
    }
    actions.truncate(5);
    actions
}

fn report_title(report_type: ReportType, time_period: &str) -> String {
    format!("{} ({})", report_type, time_period)
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_string()
    } else {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text[..end].to_string()
    }
}
