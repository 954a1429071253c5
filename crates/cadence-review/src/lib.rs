//! # cadence-review
//!
//! Multi-domain review for Cadence.
//!
//! This crate provides:
//! - The `Reviewer` interface and a canned-report test double
//! - Unbounded fan-out of one review per domain with a fan-in barrier
//! - Consolidation into severity buckets and a go/no-go recommendation

mod aggregator;
mod consolidation;
mod reviewer;

pub use aggregator::{incomplete_report, ReviewAggregator};
pub use consolidation::{ConsolidatedReview, DomainIssue, Recommendation};
pub use reviewer::{Reviewer, StaticReviewer};
