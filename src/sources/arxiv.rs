//! Academic preprint feed adapter (arXiv-style Atom API).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;

use super::relevance::{
    african_relevance, ai_relevance, extract_ai_keywords, AFRICAN_COUNTRIES, AFRICAN_INSTITUTIONS,
};
use super::{
    DataSource, DiscardReason, FetchPage, FetchSpec, PageToken, ParseOutcome, RawRecord,
    SourceAdapter, TypedRecord,
};
use crate::error::{Error, Result};
use crate::mediator::Mediator;
use crate::records::{Publication, PublicationSource};

const DEFAULT_BASE_URL: &str = "https://export.arxiv.org/api/query";
const PAGE_SIZE: usize = 50;

/// Adapter for the arXiv Atom API.
pub struct ArxivAdapter {
    mediator: Arc<Mediator>,
    http: Client,
    base_url: String,
    /// (african, ai) admission thresholds.
    thresholds: (f64, f64),
}

impl ArxivAdapter {
    pub fn new(mediator: Arc<Mediator>, http: Client, thresholds: (f64, f64)) -> Self {
        Self {
            mediator,
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            thresholds,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Boolean query: (AI term OR …) AND (African country or institution OR …).
    /// Both sides are truncated to keep the query URL within limits.
    fn build_search_query(keywords: &[&str]) -> String {
        let ai_clause = keywords
            .iter()
            .take(3)
            .map(|k| format!("all:\"{}\"", k))
            .collect::<Vec<_>>()
            .join(" OR ");

        let african_clause = AFRICAN_COUNTRIES
            .iter()
            .take(10)
            .map(|c| format!("all:\"{}\"", c))
            .chain(
                AFRICAN_INSTITUTIONS
                    .iter()
                    .take(5)
                    .map(|i| format!("all:\"{}\"", i)),
            )
            .collect::<Vec<_>>()
            .join(" OR ");

        format!("({}) AND ({})", ai_clause, african_clause)
    }
}

#[async_trait]
impl SourceAdapter for ArxivAdapter {
    fn source(&self) -> DataSource {
        DataSource::Arxiv
    }

    async fn fetch(&self, spec: &FetchSpec, page: PageToken) -> Result<FetchPage> {
        let FetchSpec::Keyword {
            query,
            max_results,
            days_back,
        } = spec
        else {
            return Ok(FetchPage::empty());
        };

        let mut search_query = Self::build_search_query(&[
            query.as_str(),
            "artificial intelligence",
            "machine learning",
        ]);
        if let Some(days) = days_back {
            let to = Utc::now();
            let from = crate::clock::days_back(to, *days);
            search_query.push_str(&format!(
                " AND submittedDate:[{} TO {}]",
                from.format("%Y%m%d%H%M"),
                to.format("%Y%m%d%H%M"),
            ));
        }
        let start = page.0 * PAGE_SIZE;
        let page_size = PAGE_SIZE.min(*max_results);

        // The date bound is intentionally excluded from the cache key:
        // a query re-issued minutes later must still collide.
        let params = json!({
            "query": query,
            "start": start,
            "max_results": page_size,
            "days_back": days_back,
        });

        let url = format!(
            "{}?search_query={}&start={}&max_results={}&sortBy=submittedDate&sortOrder=descending",
            self.base_url,
            urlencode(&search_query),
            start,
            page_size,
        );

        let http = self.http.clone();
        let mediated = self
            .mediator
            .call(DataSource::Arxiv, &params, move || {
                let http = http.clone();
                let url = url.clone();
                async move {
                    let response = http
                        .get(&url)
                        .send()
                        .await
                        .map_err(|e| Error::network(format!("arxiv: {}", e)))?;
                    let status = response.status();
                    let body = response
                        .text()
                        .await
                        .map_err(|e| Error::network(format!("arxiv: {}", e)))?;
                    if !status.is_success() {
                        return Err(Error::api("arxiv", format!("{}", status)));
                    }
                    let entries = parse_atom_entries(&body)?;
                    Ok(json!({ "entries": entries }))
                }
            })
            .await?;

        let Some(payload) = mediated.payload() else {
            return Ok(FetchPage::empty());
        };

        let now = Utc::now();
        let entries = payload["entries"].as_array().cloned().unwrap_or_default();
        let full_page = entries.len() == page_size;
        let records = entries
            .into_iter()
            .map(|entry| RawRecord {
                source: DataSource::Arxiv,
                payload: entry,
                fetched_at: now,
            })
            .collect();

        Ok(FetchPage {
            records,
            next: full_page.then(|| PageToken(page.0 + 1)),
        })
    }

    fn parse(&self, raw: &RawRecord) -> ParseOutcome {
        let title = raw.payload["title"].as_str().unwrap_or("").trim();
        if title.is_empty() {
            return ParseOutcome::Discard(DiscardReason::MissingRequiredField);
        }
        let abstract_text = raw.payload["summary"].as_str().unwrap_or("").trim();
        let authors: Vec<String> = raw.payload["authors"]
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();
        let categories: Vec<String> = raw.payload["categories"]
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        let african = african_relevance(title, abstract_text, &authors);
        let ai = ai_relevance(title, abstract_text, &categories);
        let (african_min, ai_min) = self.thresholds;
        if african.score < african_min || ai < ai_min {
            return ParseOutcome::Discard(DiscardReason::BelowRelevanceThreshold);
        }

        let published = raw.payload["published"]
            .as_str()
            .and_then(|s| s.parse::<DateTime<Utc>>().ok());
        let year = published.map(|d| chrono::Datelike::year(&d));
        let source_id = raw.payload["id"]
            .as_str()
            .map(|s| s.rsplit('/').next().unwrap_or(s).to_string());

        let mut publication = Publication::new(
            title,
            abstract_text,
            authors,
            year,
            PublicationSource::Arxiv,
            source_id,
            african.score,
            ai,
            raw.fetched_at,
        )
        .with_keywords(extract_ai_keywords(title, abstract_text))
        .with_african_entities(african.entities);
        if let Some(date) = published {
            publication = publication.with_publication_date(date);
        }

        ParseOutcome::Record(TypedRecord::Publication(Box::new(publication)))
    }
}

/// Parse Atom XML into per-entry JSON objects.
pub(crate) fn parse_atom_entries(xml: &str) -> Result<Vec<Value>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut current: Option<Value> = None;
    let mut in_author = false;
    let mut text_buffer = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match name.as_str() {
                    "entry" => {
                        current = Some(json!({
                            "id": "",
                            "title": "",
                            "summary": "",
                            "published": "",
                            "authors": [],
                            "categories": [],
                        }));
                    }
                    "author" if current.is_some() => in_author = true,
                    "category" => {
                        if let Some(entry) = current.as_mut() {
                            for attr in e.attributes().flatten() {
                                if attr.key.as_ref() == b"term" {
                                    let term = String::from_utf8_lossy(&attr.value).to_string();
                                    entry["categories"]
                                        .as_array_mut()
                                        .expect("categories array")
                                        .push(Value::String(term));
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(e)) => {
                text_buffer = e.unescape().unwrap_or_default().to_string();
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match name.as_str() {
                    "entry" => {
                        if let Some(entry) = current.take() {
                            entries.push(entry);
                        }
                    }
                    "author" => in_author = false,
                    "id" | "title" | "summary" | "published" => {
                        if let Some(entry) = current.as_mut() {
                            entry[name] = Value::String(text_buffer.clone());
                        }
                    }
                    "name" if in_author => {
                        if let Some(entry) = current.as_mut() {
                            entry["authors"]
                                .as_array_mut()
                                .expect("authors array")
                                .push(Value::String(text_buffer.clone()));
                        }
                    }
                    _ => {}
                }
                text_buffer.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::api("arxiv", format!("XML parsing error: {}", e))),
            _ => {}
        }
    }

    Ok(entries)
}

fn urlencode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
