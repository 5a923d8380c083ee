//! Complex-relationship analysis for news-like streams.
//!
//! Structured event comparison catches what fingerprints cannot: the
//! same funding round reported by two outlets, sequential rounds of one
//! company, or many beneficiaries of one program. Pairwise
//! classification builds an edge set; connected components over
//! non-`None` edges become event clusters with one canonical member.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::extract::patterns;

/// Kind of relationship detected between two events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    SameEvent,
    RelatedFunding,
    SequentialFunding,
    ProgramBeneficiaries,
    RelatedPartnership,
    EcosystemRelated,
    None,
}

impl RelationshipKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SameEvent => "same_event",
            Self::RelatedFunding => "related_funding",
            Self::SequentialFunding => "sequential_funding",
            Self::ProgramBeneficiaries => "program_beneficiaries",
            Self::RelatedPartnership => "related_partnership",
            Self::EcosystemRelated => "ecosystem_related",
            Self::None => "none",
        }
    }
}

/// Structured description of one news event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventInfo {
    pub event_id: String,
    /// funding, product_launch, partnership, acquisition, other.
    pub event_type: String,
    pub primary_entity: String,
    pub secondary_entities: Vec<String>,
    pub funding_amount: Option<String>,
    pub round_type: Option<String>,
    pub program: Option<String>,
    pub location: Option<String>,
    pub confidence: f64,
    /// How many of the structured fields are populated.
    pub completeness: f64,
}

impl EventInfo {
    /// Build event info from an article title + body text.
    pub fn from_text(event_id: impl Into<String>, title: &str, body: &str) -> Self {
        let text = format!("{}. {}", title, body);
        let funding_amount = patterns::find_funding_amount(&text);
        let round_type = patterns::find_round_type(&text);
        let location = patterns::find_location(&text);
        let primary_entity = patterns::find_company(&text).unwrap_or_else(|| {
            title
                .split_whitespace()
                .take(2)
                .collect::<Vec<_>>()
                .join(" ")
        });

        let lower = text.to_lowercase();
        let event_type = if funding_amount.is_some() || round_type.is_some() {
            "funding"
        } else if lower.contains("partner") {
            "partnership"
        } else if lower.contains("acqui") {
            "acquisition"
        } else if lower.contains("launch") {
            "product_launch"
        } else {
            "other"
        }
        .to_string();

        let program = lower
            .contains("accelerator")
            .then(|| "accelerator".to_string())
            .or_else(|| lower.contains("incubator").then(|| "incubator".to_string()));

        let populated = [
            funding_amount.is_some(),
            round_type.is_some(),
            location.is_some(),
            program.is_some(),
        ]
        .iter()
        .filter(|p| **p)
        .count();
        let completeness = 0.2 + 0.2 * populated as f64;

        Self {
            event_id: event_id.into(),
            event_type,
            primary_entity,
            secondary_entities: Vec::new(),
            funding_amount,
            round_type,
            program,
            location,
            confidence: 0.5 + 0.1 * populated as f64,
            completeness,
        }
    }

    fn same_entity(&self, other: &EventInfo) -> bool {
        !self.primary_entity.is_empty()
            && self.primary_entity.to_lowercase() == other.primary_entity.to_lowercase()
    }

    fn shares_secondary(&self, other: &EventInfo) -> bool {
        self.secondary_entities.iter().any(|e| {
            other
                .secondary_entities
                .iter()
                .any(|o| o.eq_ignore_ascii_case(e))
        })
    }
}

/// Classify the relationship between two events.
pub fn classify_pair(a: &EventInfo, b: &EventInfo) -> RelationshipKind {
    if a.same_entity(b) {
        if a.event_type == "funding" && b.event_type == "funding" {
            let same_amount = a.funding_amount.is_some() && a.funding_amount == b.funding_amount;
            let same_round = a.round_type.is_some() && a.round_type == b.round_type;
            if same_amount || same_round {
                return RelationshipKind::SameEvent;
            }
            return RelationshipKind::SequentialFunding;
        }
        if a.event_type == b.event_type {
            return RelationshipKind::SameEvent;
        }
        return RelationshipKind::EcosystemRelated;
    }

    if a.program.is_some() && a.program == b.program {
        return RelationshipKind::ProgramBeneficiaries;
    }

    if a.shares_secondary(b) {
        if a.event_type == "funding" && b.event_type == "funding" {
            return RelationshipKind::RelatedFunding;
        }
        if a.event_type == "partnership" || b.event_type == "partnership" {
            return RelationshipKind::RelatedPartnership;
        }
        return RelationshipKind::EcosystemRelated;
    }

    if a.location.is_some() && a.location == b.location && a.event_type == b.event_type {
        return RelationshipKind::EcosystemRelated;
    }

    RelationshipKind::None
}

/// An edge in the relationship graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRelationship {
    pub source_event_id: String,
    pub target_event_id: String,
    pub kind: RelationshipKind,
}

/// A cluster of related events with its elected canonical member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventCluster {
    pub canonical_id: String,
    pub member_ids: Vec<String>,
    /// The dominant relationship kind inside the cluster.
    pub kind: RelationshipKind,
}

/// Pairwise classification over all events; `None` edges are omitted.
pub fn identify_relationships(events: &[EventInfo]) -> Vec<EventRelationship> {
    let mut relationships = Vec::new();
    for (i, a) in events.iter().enumerate() {
        for b in events.iter().skip(i + 1) {
            let kind = classify_pair(a, b);
            if kind != RelationshipKind::None {
                relationships.push(EventRelationship {
                    source_event_id: a.event_id.clone(),
                    target_event_id: b.event_id.clone(),
                    kind,
                });
            }
        }
    }
    relationships
}

/// Connected-component grouping over non-`None` edges. Every event
/// appears in exactly one cluster; isolated events form singletons.
pub fn cluster_events(events: &[EventInfo], relationships: &[EventRelationship]) -> Vec<EventCluster> {
    let mut adjacency: HashMap<&str, Vec<(&str, RelationshipKind)>> = HashMap::new();
    for rel in relationships {
        adjacency
            .entry(rel.source_event_id.as_str())
            .or_default()
            .push((rel.target_event_id.as_str(), rel.kind));
        adjacency
            .entry(rel.target_event_id.as_str())
            .or_default()
            .push((rel.source_event_id.as_str(), rel.kind));
    }

    let by_id: HashMap<&str, &EventInfo> =
        events.iter().map(|e| (e.event_id.as_str(), e)).collect();

    let mut visited: HashSet<&str> = HashSet::new();
    let mut clusters = Vec::new();

    for event in events {
        let id = event.event_id.as_str();
        if visited.contains(id) {
            continue;
        }

        // DFS over the component.
        let mut member_ids = Vec::new();
        let mut kinds: HashMap<RelationshipKind, usize> = HashMap::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            member_ids.push(current.to_string());
            if let Some(neighbors) = adjacency.get(current) {
                for (neighbor, kind) in neighbors {
                    *kinds.entry(*kind).or_insert(0) += 1;
                    if !visited.contains(neighbor) {
                        stack.push(neighbor);
                    }
                }
            }
        }

        let canonical_id = elect_canonical(&member_ids, &by_id);
        let kind = kinds
            .into_iter()
            .max_by_key(|(_, count)| *count)
            .map(|(kind, _)| kind)
            .unwrap_or(RelationshipKind::None);

        clusters.push(EventCluster {
            canonical_id,
            member_ids,
            kind,
        });
    }

    clusters
}

/// Highest confidence wins; completeness breaks ties.
fn elect_canonical(member_ids: &[String], by_id: &HashMap<&str, &EventInfo>) -> String {
    member_ids
        .iter()
        .max_by(|a, b| {
            let ea = by_id.get(a.as_str());
            let eb = by_id.get(b.as_str());
            let key = |e: Option<&&EventInfo>| {
                e.map(|e| (e.confidence, e.completeness)).unwrap_or((0.0, 0.0))
            };
            key(ea)
                .partial_cmp(&key(eb))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .cloned()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn funding_event(id: &str, entity: &str, amount: Option<&str>, round: Option<&str>) -> EventInfo {
        EventInfo {
            event_id: id.into(),
            event_type: "funding".into(),
            primary_entity: entity.into(),
            secondary_entities: Vec::new(),
            funding_amount: amount.map(String::from),
            round_type: round.map(String::from),
            program: None,
            location: None,
            confidence: 0.6,
            completeness: 0.5,
        }
    }

    #[test]
    fn test_same_round_reported_twice_is_same_event() {
        let a = funding_event("a", "Moniepoint", Some("$110 million"), Some("series c"));
        let b = funding_event("b", "moniepoint", Some("$110 million"), None);
        assert_eq!(classify_pair(&a, &b), RelationshipKind::SameEvent);
    }

    #[test]
    fn test_different_rounds_are_sequential() {
        let a = funding_event("a", "Kasha", Some("$1M"), Some("seed"));
        let b = funding_event("b", "Kasha", Some("$10M"), Some("series a"));
        assert_eq!(classify_pair(&a, &b), RelationshipKind::SequentialFunding);
    }

    #[test]
    fn test_shared_investor_is_related_funding() {
        let mut a = funding_event("a", "CompanyA", Some("$2M"), None);
        let mut b = funding_event("b", "CompanyB", Some("$3M"), None);
        a.secondary_entities = vec!["Future Africa".into()];
        b.secondary_entities = vec!["future africa".into()];
        assert_eq!(classify_pair(&a, &b), RelationshipKind::RelatedFunding);
    }

    #[test]
    fn test_shared_program_is_beneficiaries() {
        let mut a = funding_event("a", "CompanyA", None, None);
        let mut b = funding_event("b", "CompanyB", None, None);
        a.program = Some("accelerator".into());
        b.program = Some("accelerator".into());
        assert_eq!(classify_pair(&a, &b), RelationshipKind::ProgramBeneficiaries);
    }

    #[test]
    fn test_unrelated_events_have_no_edge() {
        let a = funding_event("a", "CompanyA", Some("$2M"), None);
        let b = funding_event("b", "CompanyB", Some("$3M"), None);
        assert_eq!(classify_pair(&a, &b), RelationshipKind::None);
    }

    #[test]
    fn test_clustering_produces_one_canonical_per_component() {
        let mut high = funding_event("high", "Moniepoint", Some("$110 million"), Some("series c"));
        high.confidence = 0.9;
        let low = funding_event("low", "Moniepoint", Some("$110 million"), Some("series c"));
        let isolated = funding_event("solo", "Unrelated Co", None, None);

        let events = vec![high, low, isolated];
        let relationships = identify_relationships(&events);
        assert_eq!(relationships.len(), 1);

        let clusters = cluster_events(&events, &relationships);
        assert_eq!(clusters.len(), 2);

        let pair_cluster = clusters.iter().find(|c| c.member_ids.len() == 2).unwrap();
        assert_eq!(pair_cluster.canonical_id, "high");
        assert_eq!(pair_cluster.kind, RelationshipKind::SameEvent);

        let singleton = clusters.iter().find(|c| c.member_ids.len() == 1).unwrap();
        assert_eq!(singleton.canonical_id, "solo");
    }

    #[test]
    fn test_event_info_extraction_from_text() {
        let event = EventInfo::from_text(
            "e1",
            "Nigerian startup Lidya raises $8.3 million Series A round",
            "The lending company will expand in Nigeria.",
        );
        assert_eq!(event.event_type, "funding");
        assert_eq!(event.funding_amount.as_deref(), Some("$8.3 million"));
        assert_eq!(event.round_type.as_deref(), Some("series a"));
        assert_eq!(event.location.as_deref(), Some("Nigeria"));
        assert_eq!(event.primary_entity, "Lidya");
    }
}
