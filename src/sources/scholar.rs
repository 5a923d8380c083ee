//! Scholarly-search adapter.
//!
//! The cheap counterpart to web-search: same request shape, but results
//! carry author lists, citation counts, and venue.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use super::{
    DataSource, DiscardReason, FetchPage, FetchSpec, PageToken, ParseOutcome, RawRecord,
    SourceAdapter, TypedRecord,
};
use crate::error::{Error, Result};
use crate::mediator::Mediator;

const DEFAULT_ENDPOINT: &str = "https://google.serper.dev/scholar";

/// One scholarly search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScholarHit {
    pub title: String,
    pub link: String,
    pub snippet: String,
    pub authors: Vec<String>,
    pub year: Option<i32>,
    pub cited_by: Option<u32>,
    pub publication: Option<String>,
}

/// Adapter for the scholarly-search provider.
pub struct ScholarAdapter {
    mediator: Arc<Mediator>,
    http: Client,
    endpoint: String,
    api_key: String,
}

impl ScholarAdapter {
    pub fn new(mediator: Arc<Mediator>, http: Client, api_key: impl Into<String>) -> Self {
        Self {
            mediator,
            http,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: api_key.into(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl SourceAdapter for ScholarAdapter {
    fn source(&self) -> DataSource {
        DataSource::Scholar
    }

    async fn fetch(&self, spec: &FetchSpec, page: PageToken) -> Result<FetchPage> {
        let FetchSpec::Keyword {
            query, max_results, ..
        } = spec
        else {
            return Ok(FetchPage::empty());
        };
        if page.0 > 0 {
            return Ok(FetchPage::empty());
        }

        let num = (*max_results).clamp(1, 20);
        let params = json!({ "q": query, "num": num });

        let http = self.http.clone();
        let endpoint = self.endpoint.clone();
        let api_key = self.api_key.clone();
        let body = params.clone();

        let mediated = self
            .mediator
            .call(DataSource::Scholar, &params, move || {
                let http = http.clone();
                let endpoint = endpoint.clone();
                let api_key = api_key.clone();
                let body = body.clone();
                async move {
                    let response = http
                        .post(&endpoint)
                        .header("X-API-KEY", &api_key)
                        .json(&body)
                        .send()
                        .await
                        .map_err(|e| Error::network(format!("scholar: {}", e)))?;
                    let status = response.status();
                    if status.as_u16() == 429 {
                        return Err(Error::rate_limited("scholar"));
                    }
                    if !status.is_success() {
                        return Err(Error::api("scholar", format!("{}", status)));
                    }
                    response
                        .json::<Value>()
                        .await
                        .map_err(|e| Error::api("scholar", format!("bad payload: {}", e)))
                }
            })
            .await?;

        let now = Utc::now();
        let records = mediated
            .payload()
            .and_then(|p| p["results"].as_array().cloned())
            .unwrap_or_default()
            .into_iter()
            .map(|result| RawRecord {
                source: DataSource::Scholar,
                payload: result,
                fetched_at: now,
            })
            .collect();

        Ok(FetchPage {
            records,
            next: None,
        })
    }

    fn parse(&self, raw: &RawRecord) -> ParseOutcome {
        let title = raw.payload["title"].as_str().unwrap_or("").trim();
        if title.is_empty() {
            return ParseOutcome::Discard(DiscardReason::MissingRequiredField);
        }

        let authors = raw.payload["authors"]
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        ParseOutcome::Record(TypedRecord::ScholarHit(ScholarHit {
            title: title.to_string(),
            link: raw.payload["link"].as_str().unwrap_or("").to_string(),
            snippet: raw.payload["snippet"].as_str().unwrap_or("").to_string(),
            authors,
            year: raw.payload["year"].as_i64().map(|y| y as i32),
            cited_by: raw.payload["cited_by"].as_u64().map(|c| c as u32),
            publication: raw.payload["publication"].as_str().map(String::from),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TieredCache;
    use crate::clock::SystemClock;
    use crate::config::{CacheTtls, CostLimits};
    use std::collections::HashMap;

    fn adapter() -> ScholarAdapter {
        let clock: crate::clock::SharedClock = Arc::new(SystemClock::new());
        let cache = Arc::new(TieredCache::in_memory(CacheTtls::default(), clock.clone()).unwrap());
        let mediator = Arc::new(Mediator::new(
            cache,
            clock,
            CostLimits::default(),
            HashMap::new(),
        ));
        ScholarAdapter::new(mediator, Client::new(), "test-key")
    }

    #[test]
    fn test_parse_scholarly_fields() {
        let adapter = adapter();
        let raw = RawRecord {
            source: DataSource::Scholar,
            payload: json!({
                "title": "Low-resource NLP for Yoruba",
                "link": "https://scholar.example/yoruba",
                "snippet": "Transformer models for a low-resource language.",
                "authors": ["A. Adebayo", "T. Balogun"],
                "year": 2023,
                "cited_by": 41,
                "publication": "ACL Findings",
            }),
            fetched_at: Utc::now(),
        };
        match adapter.parse(&raw) {
            ParseOutcome::Record(TypedRecord::ScholarHit(hit)) => {
                assert_eq!(hit.authors.len(), 2);
                assert_eq!(hit.year, Some(2023));
                assert_eq!(hit.cited_by, Some(41));
                assert_eq!(hit.publication.as_deref(), Some("ACL Findings"));
            }
            other => panic!("expected scholar hit, got {:?}", other),
        }
    }

    #[test]
    fn test_untitled_result_is_discarded() {
        let adapter = adapter();
        let raw = RawRecord {
            source: DataSource::Scholar,
            payload: json!({"link": "https://x"}),
            fetched_at: Utc::now(),
        };
        assert!(matches!(
            adapter.parse(&raw),
            ParseOutcome::Discard(DiscardReason::MissingRequiredField)
        ));
    }
}
