//! Biomedical citation index adapter (PubMed-style E-utilities).
//!
//! Two-phase fetch: `esearch` returns a JSON id list, then details are
//! pulled with batched `efetch` calls of at most [`EFETCH_BATCH`] ids.

use async_trait::async_trait;
use chrono::Utc;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;

use super::relevance::{african_relevance, ai_relevance, extract_ai_keywords};
use super::{
    DataSource, DiscardReason, FetchPage, FetchSpec, PageToken, ParseOutcome, RawRecord,
    SourceAdapter, TypedRecord,
};
use crate::error::{Error, Result};
use crate::mediator::Mediator;
use crate::records::{Publication, PublicationSource};

const DEFAULT_ESEARCH_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi";
const DEFAULT_EFETCH_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/efetch.fcgi";

/// Detail-fetch batch size.
pub const EFETCH_BATCH: usize = 20;

/// Adapter for the PubMed E-utilities API.
pub struct PubmedAdapter {
    mediator: Arc<Mediator>,
    http: Client,
    esearch_url: String,
    efetch_url: String,
    thresholds: (f64, f64),
}

impl PubmedAdapter {
    pub fn new(mediator: Arc<Mediator>, http: Client, thresholds: (f64, f64)) -> Self {
        Self {
            mediator,
            http,
            esearch_url: DEFAULT_ESEARCH_URL.to_string(),
            efetch_url: DEFAULT_EFETCH_URL.to_string(),
            thresholds,
        }
    }

    pub fn with_urls(mut self, esearch: impl Into<String>, efetch: impl Into<String>) -> Self {
        self.esearch_url = esearch.into();
        self.efetch_url = efetch.into();
        self
    }

    async fn esearch_ids(&self, query: &str, max_results: usize, offset: usize) -> Result<Vec<String>> {
        let params = json!({
            "op": "esearch",
            "term": query,
            "retmax": max_results,
            "retstart": offset,
        });

        let http = self.http.clone();
        let url = format!(
            "{}?db=pubmed&retmode=json&term={}&retmax={}&retstart={}",
            self.esearch_url,
            query.replace(' ', "+"),
            max_results,
            offset,
        );

        let mediated = self
            .mediator
            .call(DataSource::Pubmed, &params, move || {
                let http = http.clone();
                let url = url.clone();
                async move {
                    let response = http
                        .get(&url)
                        .send()
                        .await
                        .map_err(|e| Error::network(format!("pubmed esearch: {}", e)))?;
                    let status = response.status();
                    let body: Value = response
                        .json()
                        .await
                        .map_err(|e| Error::api("pubmed", format!("esearch parse: {}", e)))?;
                    if !status.is_success() {
                        return Err(Error::api("pubmed", format!("esearch {}", status)));
                    }
                    Ok(body)
                }
            })
            .await?;

        let Some(payload) = mediated.payload() else {
            return Ok(Vec::new());
        };
        Ok(payload["esearchresult"]["idlist"]
            .as_array()
            .map(|ids| {
                ids.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn efetch_batch(&self, ids: &[String]) -> Result<Vec<Value>> {
        let id_list = ids.join(",");
        let params = json!({ "op": "efetch", "ids": id_list });

        let http = self.http.clone();
        let url = format!(
            "{}?db=pubmed&retmode=xml&id={}",
            self.efetch_url, id_list
        );

        let mediated = self
            .mediator
            .call(DataSource::Pubmed, &params, move || {
                let http = http.clone();
                let url = url.clone();
                async move {
                    let response = http
                        .get(&url)
                        .send()
                        .await
                        .map_err(|e| Error::network(format!("pubmed efetch: {}", e)))?;
                    let status = response.status();
                    let body = response
                        .text()
                        .await
                        .map_err(|e| Error::network(format!("pubmed efetch: {}", e)))?;
                    if !status.is_success() {
                        return Err(Error::api("pubmed", format!("efetch {}", status)));
                    }
                    let articles = parse_pubmed_articles(&body)?;
                    Ok(json!({ "articles": articles }))
                }
            })
            .await?;

        Ok(mediated
            .payload()
            .and_then(|p| p["articles"].as_array().cloned())
            .unwrap_or_default())
    }
}

#[async_trait]
impl SourceAdapter for PubmedAdapter {
    fn source(&self) -> DataSource {
        DataSource::Pubmed
    }

    async fn fetch(&self, spec: &FetchSpec, page: PageToken) -> Result<FetchPage> {
        let FetchSpec::Keyword {
            query, max_results, ..
        } = spec
        else {
            return Ok(FetchPage::empty());
        };

        let page_size = (*max_results).min(100);
        let ids = self
            .esearch_ids(query, page_size, page.0 * page_size)
            .await?;
        if ids.is_empty() {
            return Ok(FetchPage::empty());
        }

        let now = Utc::now();
        let mut records = Vec::with_capacity(ids.len());
        for batch in ids.chunks(EFETCH_BATCH) {
            let articles = self.efetch_batch(batch).await?;
            records.extend(articles.into_iter().map(|payload| RawRecord {
                source: DataSource::Pubmed,
                payload,
                fetched_at: now,
            }));
        }

        let full_page = ids.len() == page_size;
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
        let abstract_text = raw.payload["abstract"].as_str().unwrap_or("").trim();
        let authors: Vec<String> = raw.payload["authors"]
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();
        let mesh_terms: Vec<String> = raw.payload["mesh_terms"]
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        let african = african_relevance(title, abstract_text, &authors);
        let ai = ai_relevance(title, abstract_text, &[]);
        let (african_min, ai_min) = self.thresholds;
        if african.score < african_min || ai < ai_min {
            return ParseOutcome::Discard(DiscardReason::BelowRelevanceThreshold);
        }

        let year = raw.payload["year"]
            .as_str()
            .and_then(|y| y.parse::<i32>().ok())
            .or_else(|| raw.payload["year"].as_i64().map(|y| y as i32));
        let pmid = raw.payload["pmid"].as_str().map(String::from);

        let mut keywords = extract_ai_keywords(title, abstract_text);
        keywords.extend(mesh_terms);

        let mut publication = Publication::new(
            title,
            abstract_text,
            authors,
            year,
            PublicationSource::Pubmed,
            pmid,
            african.score,
            ai,
            raw.fetched_at,
        )
        .with_keywords(keywords)
        .with_african_entities(african.entities);

        if let Some(doi) = raw.payload["doi"].as_str() {
            publication = publication.with_doi(doi);
        }
        if let Some(journal) = raw.payload["journal"].as_str() {
            publication = publication.with_venue(journal);
        }

        ParseOutcome::Record(TypedRecord::Publication(Box::new(publication)))
    }
}

/// Parse an EFetch XML document into per-article JSON objects.
pub(crate) fn parse_pubmed_articles(xml: &str) -> Result<Vec<Value>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut articles = Vec::new();
    let mut current: Option<Value> = None;
    let mut path: Vec<String> = Vec::new();
    let mut id_type: Option<String> = None;
    let mut last_name = String::new();
    let mut text_buffer = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if name == "PubmedArticle" {
                    current = Some(json!({
                        "pmid": "",
                        "title": "",
                        "abstract": "",
                        "journal": "",
                        "year": "",
                        "authors": [],
                        "mesh_terms": [],
                        "doi": Value::Null,
                    }));
                }
                if name == "ArticleId" {
                    id_type = e
                        .attributes()
                        .flatten()
                        .find(|a| a.key.as_ref() == b"IdType")
                        .map(|a| String::from_utf8_lossy(&a.value).to_string());
                }
                path.push(name);
            }
            Ok(Event::Text(e)) => {
                text_buffer = e.unescape().unwrap_or_default().to_string();
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if let Some(article) = current.as_mut() {
                    match name.as_str() {
                        "PMID" if path.iter().any(|p| p == "MedlineCitation") => {
                            // Nested PMIDs appear in reference lists; keep the first.
                            if article["pmid"] == "" {
                                article["pmid"] = Value::String(text_buffer.clone());
                            }
                        }
                        "ArticleTitle" => article["title"] = Value::String(text_buffer.clone()),
                        "AbstractText" => {
                            let existing = article["abstract"].as_str().unwrap_or("");
                            let combined = if existing.is_empty() {
                                text_buffer.clone()
                            } else {
                                format!("{} {}", existing, text_buffer)
                            };
                            article["abstract"] = Value::String(combined);
                        }
                        "Title" if path.iter().any(|p| p == "Journal") => {
                            article["journal"] = Value::String(text_buffer.clone());
                        }
                        "Year" if path.iter().any(|p| p == "PubDate") => {
                            article["year"] = Value::String(text_buffer.clone());
                        }
                        "LastName" => last_name = text_buffer.clone(),
                        "ForeName" => {
                            if !last_name.is_empty() {
                                let full = format!("{} {}", text_buffer, last_name);
                                article["authors"]
                                    .as_array_mut()
                                    .expect("authors array")
                                    .push(Value::String(full));
                                last_name.clear();
                            }
                        }
                        "DescriptorName" => {
                            article["mesh_terms"]
                                .as_array_mut()
                                .expect("mesh array")
                                .push(Value::String(text_buffer.clone()));
                        }
                        "ArticleId" => {
                            if id_type.as_deref() == Some("doi") {
                                article["doi"] = Value::String(text_buffer.clone());
                            }
                            id_type = None;
                        }
                        "PubmedArticle" => {}
                        _ => {}
                    }
                }
                if name == "PubmedArticle" {
                    if let Some(article) = current.take() {
                        articles.push(article);
                    }
                }
                path.pop();
                text_buffer.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::api("pubmed", format!("XML parsing error: {}", e))),
            _ => {}
        }
    }

    Ok(articles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TieredCache;
    use crate::clock::SystemClock;
    use crate::config::{CacheTtls, CostLimits};
    use std::collections::HashMap;

    const SAMPLE_EFETCH: &str = r#"<?xml version="1.0"?>
<PubmedArticleSet>
  <PubmedArticle>
    <MedlineCitation>
      <PMID Version="1">38012345</PMID>
      <Article>
        <Journal><Title>The Lancet Digital Health</Title>
          <JournalIssue><PubDate><Year>2024</Year></PubDate></JournalIssue>
        </Journal>
        <ArticleTitle>Deep learning for tuberculosis screening in Nigeria</ArticleTitle>
        <Abstract>
          <AbstractText>We evaluate a neural network across clinics in Lagos.</AbstractText>
          <AbstractText>Sensitivity matched radiologist review.</AbstractText>
        </Abstract>
        <AuthorList>
          <Author><LastName>Adeyemi</LastName><ForeName>Bola</ForeName></Author>
          <Author><LastName>Eze</LastName><ForeName>Chidi</ForeName></Author>
        </AuthorList>
      </Article>
      <MeshHeadingList>
        <MeshHeading><DescriptorName>Tuberculosis</DescriptorName></MeshHeading>
        <MeshHeading><DescriptorName>Deep Learning</DescriptorName></MeshHeading>
      </MeshHeadingList>
    </MedlineCitation>
    <PubmedData>
      <ArticleIdList>
        <ArticleId IdType="pubmed">38012345</ArticleId>
        <ArticleId IdType="doi">10.1016/j.landig.2024.01.001</ArticleId>
      </ArticleIdList>
    </PubmedData>
  </PubmedArticle>
</PubmedArticleSet>"#;

    fn adapter() -> PubmedAdapter {
        let clock: crate::clock::SharedClock = Arc::new(SystemClock::new());
        let cache = Arc::new(TieredCache::in_memory(CacheTtls::default(), clock.clone()).unwrap());
        let mediator = Arc::new(Mediator::new(
            cache,
            clock,
            CostLimits::default(),
            HashMap::new(),
        ));
        PubmedAdapter::new(mediator, Client::new(), (0.3, 0.3))
    }

    #[test]
    fn test_efetch_xml_parsing() {
        let articles = parse_pubmed_articles(SAMPLE_EFETCH).unwrap();
        assert_eq!(articles.len(), 1);
        let article = &articles[0];
        assert_eq!(article["pmid"], "38012345");
        assert_eq!(
            article["title"],
            "Deep learning for tuberculosis screening in Nigeria"
        );
        assert!(article["abstract"]
            .as_str()
            .unwrap()
            .contains("Sensitivity matched"));
        assert_eq!(article["journal"], "The Lancet Digital Health");
        assert_eq!(article["year"], "2024");
        assert_eq!(article["authors"], json!(["Bola Adeyemi", "Chidi Eze"]));
        assert_eq!(article["doi"], "10.1016/j.landig.2024.01.001");
        assert_eq!(
            article["mesh_terms"],
            json!(["Tuberculosis", "Deep Learning"])
        );
    }

    #[test]
    fn test_parse_builds_publication_with_doi() {
        let adapter = adapter();
        let articles = parse_pubmed_articles(SAMPLE_EFETCH).unwrap();
        let raw = RawRecord {
            source: DataSource::Pubmed,
            payload: articles[0].clone(),
            fetched_at: Utc::now(),
        };

        match adapter.parse(&raw) {
            ParseOutcome::Record(TypedRecord::Publication(publication)) => {
                assert_eq!(publication.source, PublicationSource::Pubmed);
                assert_eq!(publication.doi.as_deref(), Some("10.1016/j.landig.2024.01.001"));
                assert_eq!(publication.venue.as_deref(), Some("The Lancet Digital Health"));
                assert_eq!(publication.year, Some(2024));
                assert!(publication.keywords.contains(&"Tuberculosis".to_string()));
            }
            other => panic!("expected publication, got {:?}", other),
        }
    }

    #[test]
    fn test_below_threshold_is_discarded() {
        let adapter = adapter();
        let raw = RawRecord {
            source: DataSource::Pubmed,
            payload: json!({
                "title": "Statin adherence in a European cohort",
                "abstract": "No computational methods involved.",
                "authors": [],
            }),
            fetched_at: Utc::now(),
        };
        assert!(matches!(
            adapter.parse(&raw),
            ParseOutcome::Discard(DiscardReason::BelowRelevanceThreshold)
        ));
    }

    #[test]
    fn test_batching_constant_matches_contract() {
        assert_eq!(EFETCH_BATCH, 20);
    }
}
