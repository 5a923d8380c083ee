//! Web-search adapter.
//!
//! Costly, last-resort discovery channel: one keyword query per
//! invocation, ranked link+snippet results, cost-bucketed separately
//! from the scholarly channel.

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

const DEFAULT_ENDPOINT: &str = "https://google.serper.dev/search";

/// One ranked search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub link: String,
    pub snippet: String,
    pub position: u32,
}

/// Adapter for the web-search provider.
pub struct WebSearchAdapter {
    mediator: Arc<Mediator>,
    http: Client,
    endpoint: String,
    api_key: String,
}

impl WebSearchAdapter {
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
impl SourceAdapter for WebSearchAdapter {
    fn source(&self) -> DataSource {
        DataSource::WebSearch
    }

    async fn fetch(&self, spec: &FetchSpec, page: PageToken) -> Result<FetchPage> {
        let FetchSpec::Keyword {
            query, max_results, ..
        } = spec
        else {
            return Ok(FetchPage::empty());
        };
        // One query per invocation: the provider charges per request,
        // not per result, so there is no second page worth paying for.
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
            .call(DataSource::WebSearch, &params, move || {
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
                        .map_err(|e| Error::network(format!("websearch: {}", e)))?;
                    let status = response.status();
                    if status.as_u16() == 429 {
                        return Err(Error::rate_limited("websearch"));
                    }
                    if status.as_u16() == 401 || status.as_u16() == 403 {
                        return Err(Error::auth("websearch", format!("{}", status)));
                    }
                    if !status.is_success() {
                        return Err(Error::api("websearch", format!("{}", status)));
                    }
                    response
                        .json::<Value>()
                        .await
                        .map_err(|e| Error::api("websearch", format!("bad payload: {}", e)))
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
                source: DataSource::WebSearch,
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
        let link = raw.payload["link"].as_str().unwrap_or("").trim();
        if title.is_empty() || link.is_empty() {
            return ParseOutcome::Discard(DiscardReason::MissingRequiredField);
        }

        ParseOutcome::Record(TypedRecord::Search(SearchHit {
            title: title.to_string(),
            link: link.to_string(),
            snippet: raw.payload["snippet"].as_str().unwrap_or("").to_string(),
            position: raw.payload["position"].as_u64().unwrap_or(0) as u32,
        }))
    }
}
