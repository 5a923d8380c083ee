//! News RSS monitor adapter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use super::relevance::{african_relevance, ai_relevance};
use super::{
    DataSource, DiscardReason, FetchPage, FetchSpec, PageToken, ParseOutcome, RawRecord,
    SourceAdapter, TypedRecord,
};
use crate::error::{Error, Result};
use crate::mediator::Mediator;

/// A news item admitted from a monitored feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsArticle {
    pub fingerprint: String,
    pub title: String,
    pub link: String,
    pub summary: String,
    pub published: Option<DateTime<Utc>>,
    pub source_feed: String,
    pub african_relevance_score: f64,
    pub ai_relevance_score: f64,
}

/// Adapter over a configured set of feed URLs. Each fetch page covers
/// one feed; the window filter discards items older than the requested
/// number of hours.
pub struct RssAdapter {
    mediator: Arc<Mediator>,
    http: Client,
    feeds: Vec<String>,
}

impl RssAdapter {
    pub fn new(mediator: Arc<Mediator>, http: Client, feeds: Vec<String>) -> Self {
        Self {
            mediator,
            http,
            feeds,
        }
    }
}

#[async_trait]
impl SourceAdapter for RssAdapter {
    fn source(&self) -> DataSource {
        DataSource::NewsRss
    }

    async fn fetch(&self, spec: &FetchSpec, page: PageToken) -> Result<FetchPage> {
        let FetchSpec::Window { hours, .. } = spec else {
            return Ok(FetchPage::empty());
        };
        let Some(feed_url) = self.feeds.get(page.0) else {
            return Ok(FetchPage::empty());
        };

        let params = json!({ "feed": feed_url, "window_hours": hours });
        let http = self.http.clone();
        let url = feed_url.clone();

        let mediated = self
            .mediator
            .call(DataSource::NewsRss, &params, move || {
                let http = http.clone();
                let url = url.clone();
                async move {
                    let response = http
                        .get(&url)
                        .send()
                        .await
                        .map_err(|e| Error::network(format!("rss: {}", e)))?;
                    let status = response.status();
                    let body = response
                        .text()
                        .await
                        .map_err(|e| Error::network(format!("rss: {}", e)))?;
                    if !status.is_success() {
                        return Err(Error::api("news_rss", format!("{}", status)));
                    }
                    let items = parse_feed_items(&body)?;
                    Ok(json!({ "items": items }))
                }
            })
            .await?;

        let now = Utc::now();
        let records = mediated
            .payload()
            .and_then(|p| p["items"].as_array().cloned())
            .unwrap_or_default()
            .into_iter()
            .map(|mut item| {
                item["source_feed"] = Value::String(feed_url.clone());
                item["window_hours"] = json!(hours);
                RawRecord {
                    source: DataSource::NewsRss,
                    payload: item,
                    fetched_at: now,
                }
            })
            .collect();

        let next = (page.0 + 1 < self.feeds.len()).then(|| PageToken(page.0 + 1));
        Ok(FetchPage { records, next })
    }

    fn parse(&self, raw: &RawRecord) -> ParseOutcome {
        let title = raw.payload["title"].as_str().unwrap_or("").trim();
        let link = raw.payload["link"].as_str().unwrap_or("").trim();
        if title.is_empty() || link.is_empty() {
            return ParseOutcome::Discard(DiscardReason::MissingRequiredField);
        }
        let summary = raw.payload["description"].as_str().unwrap_or("").trim();

        let published = raw.payload["pub_date"]
            .as_str()
            .and_then(parse_feed_datetime);
        if let Some(hours) = raw.payload["window_hours"].as_i64() {
            match published {
                Some(published) if published < crate::clock::hours_back(raw.fetched_at, hours) => {
                    return ParseOutcome::Discard(DiscardReason::OutsideWindow);
                }
                _ => {}
            }
        }

        let african = african_relevance(title, summary, &[]);
        let ai = ai_relevance(title, summary, &[]);

        ParseOutcome::Record(TypedRecord::News(Box::new(NewsArticle {
            fingerprint: crate::dedup::article_fingerprint(title),
            title: title.to_string(),
            link: link.to_string(),
            summary: summary.to_string(),
            published,
            source_feed: raw.payload["source_feed"].as_str().unwrap_or("").to_string(),
            african_relevance_score: african.score,
            ai_relevance_score: ai,
        })))
    }
}

/// Parse RSS 2.0 `<item>` or Atom `<entry>` elements into JSON objects.
pub(crate) fn parse_feed_items(xml: &str) -> Result<Vec<Value>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut items = Vec::new();
    let mut current: Option<Value> = None;
    let mut text_buffer = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match name.as_str() {
                    "item" | "entry" => {
                        current = Some(json!({
                            "title": "",
                            "link": "",
                            "description": "",
                            "pub_date": "",
                        }));
                    }
                    // Atom links carry the URL in an attribute.
                    "link" => {
                        if let Some(item) = current.as_mut() {
                            for attr in e.attributes().flatten() {
                                if attr.key.as_ref() == b"href" {
                                    item["link"] = Value::String(
                                        String::from_utf8_lossy(&attr.value).to_string(),
                                    );
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
            Ok(Event::CData(e)) => {
                text_buffer = String::from_utf8_lossy(e.as_ref()).to_string();
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if let Some(item) = current.as_mut() {
                    match name.as_str() {
                        "title" => item["title"] = Value::String(text_buffer.trim().to_string()),
                        "link" => {
                            if item["link"] == "" {
                                item["link"] = Value::String(text_buffer.trim().to_string());
                            }
                        }
                        "description" | "summary" => {
                            item["description"] = Value::String(text_buffer.trim().to_string())
                        }
                        "pubDate" | "published" | "updated" => {
                            if item["pub_date"] == "" {
                                item["pub_date"] = Value::String(text_buffer.trim().to_string());
                            }
                        }
                        _ => {}
                    }
                }
                if name == "item" || name == "entry" {
                    if let Some(item) = current.take() {
                        items.push(item);
                    }
                }
                text_buffer.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::api("news_rss", format!("XML parsing error: {}", e))),
            _ => {}
        }
    }

    Ok(items)
}

/// Feeds emit either RFC 2822 (`pubDate`) or RFC 3339 (Atom) timestamps.
fn parse_feed_datetime(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|d| d.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TieredCache;
    use crate::clock::SystemClock;
    use crate::config::{CacheTtls, CostLimits};
    use std::collections::HashMap;

    const SAMPLE_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Tech News Africa</title>
    <item>
      <title>Nigerian AI startup raises $5M seed round</title>
      <link>https://technews.example/ai-seed</link>
      <description>The machine learning company will expand across West Africa.</description>
      <pubDate>Mon, 01 Jan 2024 10:00:00 +0000</pubDate>
    </item>
    <item>
      <title>Celebrity gossip roundup</title>
      <link>https://technews.example/gossip</link>
      <description>Nothing technical here.</description>
      <pubDate>Mon, 01 Jan 2024 09:00:00 +0000</pubDate>
    </item>
  </channel>
</rss>"#;

    fn adapter(feeds: Vec<String>) -> RssAdapter {
        let clock: crate::clock::SharedClock = Arc::new(SystemClock::new());
        let cache = Arc::new(TieredCache::in_memory(CacheTtls::default(), clock.clone()).unwrap());
        let mediator = Arc::new(Mediator::new(
            cache,
            clock,
            CostLimits::default(),
            HashMap::new(),
        ));
        RssAdapter::new(mediator, Client::new(), feeds)
    }

    #[test]
    fn test_rss_item_parsing() {
        let items = parse_feed_items(SAMPLE_RSS).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["title"], "Nigerian AI startup raises $5M seed round");
        assert_eq!(items[0]["link"], "https://technews.example/ai-seed");
        assert!(items[0]["pub_date"].as_str().unwrap().starts_with("Mon"));
    }

    #[test]
    fn test_parse_scores_and_fingerprints() {
        let adapter = adapter(vec![]);
        let items = parse_feed_items(SAMPLE_RSS).unwrap();
        let mut payload = items[0].clone();
        payload["source_feed"] = json!("https://technews.example/rss");

        let raw = RawRecord {
            source: DataSource::NewsRss,
            payload,
            fetched_at: Utc::now(),
        };
        match adapter.parse(&raw) {
            ParseOutcome::Record(TypedRecord::News(article)) => {
                assert!(article.african_relevance_score > 0.0);
                assert!(article.ai_relevance_score > 0.0);
                assert!(!article.fingerprint.is_empty());
                assert!(article.published.is_some());
            }
            other => panic!("expected news article, got {:?}", other),
        }
    }

    #[test]
    fn test_window_filter_discards_stale_items() {
        let adapter = adapter(vec![]);
        let mut payload = parse_feed_items(SAMPLE_RSS).unwrap()[0].clone();
        payload["window_hours"] = json!(24);
        // The sample item is dated 2024-01-01, far outside any recent window.
        let raw = RawRecord {
            source: DataSource::NewsRss,
            payload,
            fetched_at: Utc::now(),
        };
        assert!(matches!(
            adapter.parse(&raw),
            ParseOutcome::Discard(DiscardReason::OutsideWindow)
        ));
    }

    #[test]
    fn test_datetime_formats() {
        assert!(parse_feed_datetime("Mon, 01 Jan 2024 10:00:00 +0000").is_some());
        assert!(parse_feed_datetime("2024-01-01T10:00:00Z").is_some());
        assert!(parse_feed_datetime("yesterday").is_none());
    }

    #[test]
    fn test_atom_entries_also_parse() {
        let atom = r#"<feed xmlns="http://www.w3.org/2005/Atom">
          <entry>
            <title>Rwanda launches drone AI program</title>
            <link href="https://atom.example/drones"/>
            <summary>Computer vision for medical deliveries.</summary>
            <published>2024-02-01T08:00:00Z</published>
          </entry>
        </feed>"#;
        let items = parse_feed_items(atom).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["link"], "https://atom.example/drones");
        assert_eq!(items[0]["description"], "Computer vision for medical deliveries.");
    }
}
