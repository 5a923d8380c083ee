//! Innovation records and their lifecycle invariants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Map;

use crate::sources::DataSource;

/// Category of an African AI effort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InnovationType {
    Startup,
    Research,
    Platform,
    Service,
    Other,
}

/// Verification lifecycle.
///
/// Transitions are monotonic: pending → community → verified, with
/// rejected reachable from any state. A merge never moves a record
/// backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Community,
    Verified,
    Rejected,
}

impl VerificationStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Community => 1,
            Self::Verified => 2,
            Self::Rejected => 3,
        }
    }

    /// Whether moving to `next` respects the monotonic lifecycle.
    pub fn may_transition_to(self, next: VerificationStatus) -> bool {
        if next == Self::Rejected {
            return true;
        }
        if self == Self::Rejected {
            return false;
        }
        next.rank() >= self.rank()
    }

    /// The more advanced of two statuses, used when merging duplicates.
    pub fn strongest(self, other: VerificationStatus) -> VerificationStatus {
        if self.rank() >= other.rank() {
            self
        } else {
            other
        }
    }
}

/// Public visibility of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Hidden,
}

/// A single funding event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingEvent {
    pub amount: Option<String>,
    pub round_type: Option<String>,
    pub investors: Vec<String>,
    pub announced_at: Option<DateTime<Utc>>,
}

/// Where a record came from and when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordProvenance {
    pub source: DataSource,
    pub source_id: Option<String>,
    pub collected_at: DateTime<Utc>,
}

impl RecordProvenance {
    /// Relative trust in the source when resolving scalar conflicts.
    pub fn reliability(&self) -> f64 {
        match self.source {
            DataSource::Pubmed => 0.9,
            DataSource::Arxiv => 0.85,
            DataSource::Scholar => 0.8,
            DataSource::NewsRss => 0.6,
            DataSource::WebSearch => 0.5,
            DataSource::Intelligence => 0.45,
        }
    }
}

/// Canonical record of an African AI effort.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Innovation {
    pub id: String,
    /// Hash of normalized title + primary entity; unique in the store.
    pub fingerprint: String,
    pub title: String,
    pub description: String,
    pub innovation_type: InnovationType,
    pub country: Option<String>,
    pub creation_date: Option<DateTime<Utc>>,
    pub verification_status: VerificationStatus,
    pub visibility: Visibility,
    pub fundings: Vec<FundingEvent>,
    /// Organization record IDs.
    pub organizations: Vec<String>,
    /// Person record IDs.
    pub individuals: Vec<String>,
    pub website_url: Option<String>,
    pub source_url: Option<String>,
    pub github_url: Option<String>,
    pub demo_url: Option<String>,
    pub tags: Vec<String>,
    pub impact_metrics: Map<String, serde_json::Value>,
    pub provenance: RecordProvenance,
    pub last_backfilled_at: Option<DateTime<Utc>>,
    pub backfill_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Innovation {
    /// Create a pending, hidden record with a computed fingerprint.
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        innovation_type: InnovationType,
        provenance: RecordProvenance,
        now: DateTime<Utc>,
    ) -> Self {
        let title = title.into();
        let fingerprint = crate::dedup::innovation_fingerprint(&title, None);
        Self {
            id: crate::clock::new_prefixed_id("inn"),
            fingerprint,
            title,
            description: description.into(),
            innovation_type,
            country: None,
            creation_date: None,
            verification_status: VerificationStatus::Pending,
            visibility: Visibility::Hidden,
            fundings: Vec::new(),
            organizations: Vec::new(),
            individuals: Vec::new(),
            website_url: None,
            source_url: None,
            github_url: None,
            demo_url: None,
            tags: Vec::new(),
            impact_metrics: Map::new(),
            provenance,
            last_backfilled_at: None,
            backfill_attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn with_website(mut self, url: impl Into<String>) -> Self {
        self.website_url = Some(url.into());
        self
    }

    /// Apply a verification transition, ignoring illegal downgrades.
    pub fn transition_verification(&mut self, next: VerificationStatus, now: DateTime<Utc>) -> bool {
        if !self.verification_status.may_transition_to(next) {
            return false;
        }
        self.verification_status = next;
        // Public visibility requires community or verified status.
        if !matches!(
            self.verification_status,
            VerificationStatus::Community | VerificationStatus::Verified
        ) {
            self.visibility = Visibility::Hidden;
        }
        self.updated_at = now;
        true
    }

    /// Request public visibility; only honored for community/verified records.
    pub fn publish(&mut self, now: DateTime<Utc>) -> bool {
        match self.verification_status {
            VerificationStatus::Community | VerificationStatus::Verified => {
                self.visibility = Visibility::Public;
                self.updated_at = now;
                true
            }
            _ => false,
        }
    }

    /// Fraction of the required-field schema that is populated.
    pub fn completeness(&self) -> f64 {
        let checks: [bool; 8] = [
            !self.description.is_empty(),
            self.country.is_some(),
            self.website_url.is_some(),
            !self.fundings.is_empty(),
            !self.organizations.is_empty(),
            self.github_url.is_some() || self.demo_url.is_some(),
            !self.tags.is_empty(),
            !self.impact_metrics.is_empty(),
        ];
        let filled = checks.iter().filter(|c| **c).count();
        filled as f64 / checks.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provenance() -> RecordProvenance {
        RecordProvenance {
            source: DataSource::Intelligence,
            source_id: None,
            collected_at: Utc::now(),
        }
    }

    #[test]
    fn test_verification_is_monotonic() {
        use VerificationStatus::*;
        assert!(Pending.may_transition_to(Community));
        assert!(Community.may_transition_to(Verified));
        assert!(Pending.may_transition_to(Verified));
        assert!(Verified.may_transition_to(Rejected));

        assert!(!Verified.may_transition_to(Community));
        assert!(!Community.may_transition_to(Pending));
        assert!(!Rejected.may_transition_to(Pending));
    }

    #[test]
    fn test_publish_requires_verification() {
        let now = Utc::now();
        let mut innovation = Innovation::new(
            "M-Shule",
            "Adaptive SMS learning platform",
            InnovationType::Startup,
            provenance(),
            now,
        );

        assert!(!innovation.publish(now));
        assert_eq!(innovation.visibility, Visibility::Hidden);

        assert!(innovation.transition_verification(VerificationStatus::Community, now));
        assert!(innovation.publish(now));
        assert_eq!(innovation.visibility, Visibility::Public);
    }

    #[test]
    fn test_rejection_hides_record() {
        let now = Utc::now();
        let mut innovation = Innovation::new(
            "Test",
            "desc",
            InnovationType::Platform,
            provenance(),
            now,
        );
        innovation.transition_verification(VerificationStatus::Verified, now);
        innovation.publish(now);

        assert!(innovation.transition_verification(VerificationStatus::Rejected, now));
        assert_eq!(innovation.visibility, Visibility::Hidden);
    }

    #[test]
    fn test_completeness_scoring() {
        let now = Utc::now();
        let bare = Innovation::new("A", "", InnovationType::Other, provenance(), now);
        assert_eq!(bare.completeness(), 0.0);

        let fuller = Innovation::new("B", "desc", InnovationType::Startup, provenance(), now)
            .with_country("Kenya")
            .with_website("https://example.ke");
        assert!(fuller.completeness() > bare.completeness());
    }

    #[test]
    fn test_source_reliability_ordering() {
        let pubmed = RecordProvenance {
            source: DataSource::Pubmed,
            source_id: None,
            collected_at: Utc::now(),
        };
        let llm = provenance();
        assert!(pubmed.reliability() > llm.reliability());
    }
}
