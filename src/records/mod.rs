//! Canonical domain records.
//!
//! Cross-entity references are opaque string IDs; nothing in the model
//! holds object pointers, so cyclic relationships (innovation ↔
//! organization ↔ individual) stay representable and serializable.

mod innovation;
mod publication;
mod report;

pub use innovation::{
    FundingEvent, Innovation, InnovationType, RecordProvenance, VerificationStatus, Visibility,
};
pub use publication::{Publication, PublicationSource};
pub use report::{
    ExtractedCitation, FundingUpdate, InnovationMention, IntelligenceReport, PolicyDevelopment,
    ReportType, ResolutionState,
};
