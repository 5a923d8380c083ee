//! Regex pattern library for entity extraction.
//!
//! All free-text mining lives here as data-driven, individually testable
//! matchers returning typed values.

use regex::Regex;
use std::sync::LazyLock;

use crate::sources::relevance::AFRICAN_COUNTRIES;

/// URL-like substrings.
static URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://[^\s<>"{}|\\^`\[\]]+"#).expect("invalid URL regex")
});

/// Currency amounts with a scale word: `$5M`, `$2.5 million`, `$300k`.
static FUNDING_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\$\s?([\d,]+(?:\.\d+)?)\s*(million|billion|thousand|[MBk])\b")
        .expect("invalid funding regex")
});

/// Funding round types: `seed round`, `Series B funding`, `pre-seed round`.
static ROUND_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(pre-seed|seed|series\s+[A-E]|bridge|debt)\s+(?:funding|round)")
        .expect("invalid round regex")
});

/// Capitalized word sequences, up to three words.
static COMPANY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Z][A-Za-z0-9]+(?:\s+[A-Z][A-Za-z0-9]+){0,2})\b")
        .expect("invalid company regex")
});

/// Institution names: `University of X`, `X University`, `X Institute`.
static INSTITUTION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(University of [A-Z][A-Za-z]+(?:\s+[A-Z][A-Za-z]+)?|[A-Z][A-Za-z]+\s+(?:University|Institute|Polytechnic))\b",
    )
    .expect("invalid institution regex")
});

/// Enumeration markers opening a line: digits, bullets, dashes.
static ENUMERATION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:\d+[.)]|[-*•])\s+").expect("invalid enumeration regex"));

/// Context words that make a capitalized sequence read as a company.
const COMPANY_CONTEXT: &[&str] = &["startup", "company", "founded", "launched", "raised"];

/// Leading tokens too generic to be company names on their own.
const COMPANY_STOPLIST: &[&str] = &[
    "The", "This", "These", "Those", "A", "An", "In", "On", "At", "It", "Its", "Their",
    "Sources", "Source", "Series",
];

/// Extract URL-like substrings: deduplicated, trailing punctuation
/// stripped, order of first appearance preserved.
pub fn find_urls(text: &str) -> Vec<String> {
    let mut urls = Vec::new();
    for m in URL_PATTERN.find_iter(text) {
        let url = m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?', ')', '"']);
        if url.len() > 10 && !urls.iter().any(|u| u == url) {
            urls.push(url.to_string());
        }
    }
    urls
}

/// First funding amount in the text, verbatim (`$5 million`).
pub fn find_funding_amount(text: &str) -> Option<String> {
    FUNDING_PATTERN.find(text).map(|m| m.as_str().to_string())
}

/// First round type in the text, lowercased (`seed`, `series a`).
pub fn find_round_type(text: &str) -> Option<String> {
    ROUND_PATTERN
        .captures(text)
        .map(|c| c[1].to_lowercase().split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Candidate company name: a capitalized sequence in text that also
/// contains startup/founded/launched context.
pub fn find_company(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    if !COMPANY_CONTEXT.iter().any(|w| lower.contains(w)) {
        return None;
    }
    COMPANY_PATTERN
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .find(|candidate| {
            let first = candidate.split_whitespace().next().unwrap_or("");
            // Country names and their demonyms ("Nigerian", "Kenyan")
            // are capitalized but never companies.
            let country_like = AFRICAN_COUNTRIES
                .iter()
                .any(|country| candidate.starts_with(country));
            !COMPANY_STOPLIST.contains(&first) && !country_like
        })
}

/// First African country named in the text.
pub fn find_location(text: &str) -> Option<String> {
    AFRICAN_COUNTRIES
        .iter()
        .find(|country| text.contains(*country))
        .map(|c| (*c).to_string())
}

/// First institution name in the text.
pub fn find_institution(text: &str) -> Option<String> {
    INSTITUTION_PATTERN.find(text).map(|m| m.as_str().to_string())
}

/// Whether the line opens with an enumeration marker.
pub fn is_enumerated(line: &str) -> bool {
    ENUMERATION_PATTERN.is_match(line)
}

/// Strip the enumeration marker from a line.
pub fn strip_enumeration(line: &str) -> String {
    ENUMERATION_PATTERN.replace(line, "").trim().to_string()
}

/// Split text into sentences on terminal punctuation.
pub fn split_sentences(text: &str) -> Vec<&str> {
    text.split_inclusive(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_extraction_strips_trailing_punctuation() {
        let text = "See https://techcabal.com/story, and (https://disrupt-africa.com/item).";
        let urls = find_urls(text);
        assert_eq!(
            urls,
            vec![
                "https://techcabal.com/story",
                "https://disrupt-africa.com/item"
            ]
        );
    }

    #[test]
    fn test_url_deduplication_preserves_order() {
        let text = "https://a.example/one then https://b.example/two then https://a.example/one";
        assert_eq!(find_urls(text).len(), 2);
    }

    #[test]
    fn test_funding_amounts() {
        assert_eq!(
            find_funding_amount("raised $5 million in new capital"),
            Some("$5 million".to_string())
        );
        assert_eq!(
            find_funding_amount("a $2.5M extension"),
            Some("$2.5M".to_string())
        );
        assert_eq!(find_funding_amount("raised significant capital"), None);
    }

    #[test]
    fn test_round_types() {
        assert_eq!(
            find_round_type("closed a Series B round"),
            Some("series b".to_string())
        );
        assert_eq!(
            find_round_type("announced seed funding of $1M"),
            Some("seed".to_string())
        );
        assert_eq!(find_round_type("no round here"), None);
    }

    #[test]
    fn test_company_requires_context() {
        assert_eq!(
            find_company("Moniepoint raised a new round for its startup banking product"),
            Some("Moniepoint".to_string())
        );
        // Capitalized words without startup context are not companies.
        assert_eq!(find_company("Kampala Is Beautiful This Season"), None);
    }

    #[test]
    fn test_company_skips_country_names() {
        let text = "Nigeria startup Lidya launched a credit product";
        assert_eq!(find_company(text), Some("Lidya".to_string()));
    }

    #[test]
    fn test_locations_and_institutions() {
        assert_eq!(
            find_location("expanding from Kenya into Tanzania"),
            Some("Kenya".to_string())
        );
        assert_eq!(
            find_institution("researchers at the University of Cape Town published"),
            Some("University of Cape Town".to_string())
        );
        assert_eq!(
            find_institution("a team from Ashesi University in Ghana"),
            Some("Ashesi University".to_string())
        );
    }

    #[test]
    fn test_enumeration_markers() {
        assert!(is_enumerated("1. First finding"));
        assert!(is_enumerated("- bullet"));
        assert!(is_enumerated("• unicode bullet"));
        assert!(!is_enumerated("Plain sentence."));
        assert_eq!(strip_enumeration("2) Second finding"), "Second finding");
    }

    #[test]
    fn test_sentence_splitting() {
        let sentences = split_sentences("First. Second! Third? ");
        assert_eq!(sentences.len(), 3);
        assert_eq!(sentences[1], "Second!");
    }
}
