//! African and AI relevance scoring.
//!
//! Weighted-occurrence scoring shared by the academic and news adapters.
//! Institution mentions outweigh country mentions, which outweigh
//! regional terms; author affiliations score highest of all. Scores are
//! capped at 1.0.

/// African countries recognized in text matching.
pub const AFRICAN_COUNTRIES: &[&str] = &[
    "Algeria", "Angola", "Benin", "Botswana", "Burkina Faso", "Burundi", "Cameroon",
    "Cape Verde", "Chad", "Comoros", "Congo", "Djibouti", "Egypt", "Eritrea", "Eswatini",
    "Ethiopia", "Gabon", "Gambia", "Ghana", "Guinea", "Ivory Coast", "Kenya", "Lesotho",
    "Liberia", "Libya", "Madagascar", "Malawi", "Mali", "Mauritania", "Mauritius", "Morocco",
    "Mozambique", "Namibia", "Niger", "Nigeria", "Rwanda", "Senegal", "Seychelles",
    "Sierra Leone", "Somalia", "South Africa", "South Sudan", "Sudan", "Tanzania", "Togo",
    "Tunisia", "Uganda", "Zambia", "Zimbabwe",
];

/// African research institutions recognized in text matching.
pub const AFRICAN_INSTITUTIONS: &[&str] = &[
    "University of Cape Town",
    "University of the Witwatersrand",
    "Stellenbosch University",
    "Makerere University",
    "University of Nairobi",
    "University of Ghana",
    "University of Lagos",
    "University of Ibadan",
    "Cairo University",
    "Addis Ababa University",
    "Mohammed VI Polytechnic University",
    "African Institute for Mathematical Sciences",
    "Ashesi University",
    "Strathmore University",
    "Covenant University",
];

/// Region-level terms that indicate African scope without naming a country.
const REGIONAL_TERMS: &[&str] = &[
    "africa",
    "african",
    "sub-saharan",
    "sahel",
    "maghreb",
    "east africa",
    "west africa",
    "north africa",
    "southern africa",
];

/// Flagship AI terms carrying the highest weight.
const AI_TERMS_HIGH: &[&str] = &["artificial intelligence", "machine learning", "deep learning"];

/// Common abbreviations, weighted below the flagship terms.
const AI_TERMS_ABBREV: &[&str] = &["ai", "ml", "dl"];

/// Remaining AI vocabulary, lowest weight.
const AI_TERMS_OTHER: &[&str] = &[
    "neural network",
    "computer vision",
    "natural language processing",
    "nlp",
    "cnn",
    "rnn",
    "lstm",
    "transformer",
    "reinforcement learning",
    "supervised learning",
    "unsupervised learning",
    "classification",
    "regression",
    "clustering",
    "recommendation system",
    "data mining",
    "big data",
    "predictive analytics",
    "automation",
    "robotics",
    "expert system",
    "knowledge representation",
];

/// arXiv-style category codes treated as AI venues.
const AI_CATEGORIES: &[&str] = &["cs.AI", "cs.LG", "cs.CV", "cs.CL", "cs.RO", "stat.ML"];

const WEIGHT_COUNTRY: f64 = 0.3;
const WEIGHT_INSTITUTION: f64 = 0.4;
const WEIGHT_REGION: f64 = 0.2;
const WEIGHT_AUTHOR_AFFILIATION: f64 = 0.5;

const WEIGHT_AI_HIGH: f64 = 0.3;
const WEIGHT_AI_ABBREV: f64 = 0.2;
const WEIGHT_AI_OTHER: f64 = 0.1;
const WEIGHT_AI_CATEGORY: f64 = 0.4;

/// Result of African-relevance scoring: the capped score plus the
/// entities that produced it.
#[derive(Debug, Clone, Default)]
pub struct AfricanRelevance {
    pub score: f64,
    pub entities: Vec<String>,
}

/// Score African relevance over title, abstract, and author list.
pub fn african_relevance(title: &str, abstract_text: &str, authors: &[String]) -> AfricanRelevance {
    let text = format!("{} {} {}", title, abstract_text, authors.join(" ")).to_lowercase();

    let mut score = 0.0;
    let mut entities = Vec::new();

    for country in AFRICAN_COUNTRIES {
        if text.contains(&country.to_lowercase()) {
            score += WEIGHT_COUNTRY;
            entities.push((*country).to_string());
        }
    }

    for institution in AFRICAN_INSTITUTIONS {
        if text.contains(&institution.to_lowercase()) {
            score += WEIGHT_INSTITUTION;
            entities.push((*institution).to_string());
        }
    }

    for term in REGIONAL_TERMS {
        let matched = if term.contains(' ') {
            text.contains(term)
        } else {
            contains_word(&text, term)
        };
        if matched {
            score += WEIGHT_REGION;
            entities.push(title_case(term));
        }
    }

    // Author affiliations carry the strongest signal: a country name in
    // the author string is almost always an affiliation.
    for author in authors {
        let author_lower = author.to_lowercase();
        for country in AFRICAN_COUNTRIES {
            if author_lower.contains(&country.to_lowercase()) {
                score += WEIGHT_AUTHOR_AFFILIATION;
                entities.push(format!("Author from {}", country));
            }
        }
    }

    entities.sort();
    entities.dedup();

    AfricanRelevance {
        score: score.min(1.0),
        entities,
    }
}

/// Score AI relevance over title + abstract, with category membership.
pub fn ai_relevance(title: &str, abstract_text: &str, categories: &[String]) -> f64 {
    let text = format!("{} {}", title, abstract_text).to_lowercase();

    let mut score = 0.0;
    for term in AI_TERMS_HIGH {
        if text.contains(term) {
            score += WEIGHT_AI_HIGH;
        }
    }
    for term in AI_TERMS_ABBREV {
        if contains_word(&text, term) {
            score += WEIGHT_AI_ABBREV;
        }
    }
    for term in AI_TERMS_OTHER {
        if text.contains(term) {
            score += WEIGHT_AI_OTHER;
        }
    }

    for category in categories {
        if AI_CATEGORIES.contains(&category.as_str()) {
            score += WEIGHT_AI_CATEGORY;
        }
    }

    score.min(1.0)
}

/// Keyword extraction: the AI vocabulary terms present in the text.
pub fn extract_ai_keywords(title: &str, abstract_text: &str) -> Vec<String> {
    let text = format!("{} {}", title, abstract_text).to_lowercase();
    AI_TERMS_HIGH
        .iter()
        .chain(AI_TERMS_OTHER.iter())
        .filter(|term| text.contains(**term))
        .map(|term| (*term).to_string())
        .collect()
}

/// Whole-word containment; avoids "ai" matching inside "maintain".
fn contains_word(text: &str, word: &str) -> bool {
    text.split(|c: char| !c.is_alphanumeric() && c != '-')
        .any(|token| token == word)
}

fn title_case(term: &str) -> String {
    term.split_whitespace()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_institution_outweighs_country() {
        let with_institution = african_relevance(
            "Crop disease detection at the University of Nairobi",
            "",
            &[],
        );
        let with_country = african_relevance("Crop disease detection pilots", "in Niger", &[]);
        assert!(with_institution.score > with_country.score);
        assert!(with_institution
            .entities
            .iter()
            .any(|e| e == "University of Nairobi"));
    }

    #[test]
    fn test_author_affiliation_scores_highest() {
        let scored = african_relevance(
            "Benchmarking vision models",
            "",
            &["J. Mwangi (University, Kenya)".to_string()],
        );
        assert!(scored.score >= WEIGHT_AUTHOR_AFFILIATION);
        assert!(scored.entities.iter().any(|e| e.starts_with("Author from")));
    }

    #[test]
    fn test_score_caps_at_one() {
        let text = AFRICAN_COUNTRIES.join(" ");
        let scored = african_relevance(&text, &text, &[]);
        assert_eq!(scored.score, 1.0);
    }

    #[test]
    fn test_no_african_signal_scores_zero() {
        let scored = african_relevance("Quantum error correction", "on superconducting qubits", &[]);
        assert_eq!(scored.score, 0.0);
        assert!(scored.entities.is_empty());
    }

    #[test]
    fn test_ai_relevance_weights() {
        let high = ai_relevance("Deep learning for X", "", &[]);
        let other = ai_relevance("Clustering approaches", "", &[]);
        assert!(high > other);

        let with_category = ai_relevance("Some paper", "", &["cs.LG".to_string()]);
        assert_eq!(with_category, WEIGHT_AI_CATEGORY);
    }

    #[test]
    fn test_abbreviation_requires_word_boundary() {
        // "maintain" must not count as an "ai" mention.
        let score = ai_relevance("How to maintain dairy equipment", "", &[]);
        assert_eq!(score, 0.0);

        let score = ai_relevance("AI for dairy farming", "", &[]);
        assert!(score >= WEIGHT_AI_ABBREV);
    }

    #[test]
    fn test_keyword_extraction() {
        let keywords = extract_ai_keywords(
            "Machine learning and computer vision",
            "applied to robotics",
        );
        assert!(keywords.contains(&"machine learning".to_string()));
        assert!(keywords.contains(&"computer vision".to_string()));
        assert!(keywords.contains(&"robotics".to_string()));
    }
}
