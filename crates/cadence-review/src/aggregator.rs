//! Review fan-out / fan-in
//!
//! Every domain is reviewed concurrently with no bound; the aggregator waits
//! for all of them before consolidating. There is no retry here: a failed
//! review is turned into a critical "review incomplete" issue for its domain.

use crate::consolidation::ConsolidatedReview;
use crate::reviewer::Reviewer;
use cadence_core::{
    ArtifactSet, ReviewDomain, ReviewIssue, ReviewReport, ReviewStatus, Score, Severity, Tier,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Runs one review per domain and consolidates the results
pub struct ReviewAggregator {
    reviewer: Arc<dyn Reviewer>,
}

impl ReviewAggregator {
    pub fn new(reviewer: Arc<dyn Reviewer>) -> Self {
        Self { reviewer }
    }

    /// Review `artifacts` in every domain of `assignments` (domain -> tier)
    pub async fn review(
        &self,
        assignments: &BTreeMap<ReviewDomain, Tier>,
        artifacts: &ArtifactSet,
    ) -> ConsolidatedReview {
        info!(
            domains = assignments.len(),
            artifacts = artifacts.len(),
            "Dispatching reviews"
        );

        let handles: Vec<(ReviewDomain, tokio::task::JoinHandle<_>)> = assignments
            .iter()
            .map(|(domain, tier)| {
                let reviewer = Arc::clone(&self.reviewer);
                let artifacts = artifacts.clone();
                let task_domain = domain.clone();
                let tier = *tier;
                let handle = tokio::spawn(async move {
                    reviewer.review(&task_domain, tier, &artifacts).await
                });
                (domain.clone(), handle)
            })
            .collect();

        let (domains, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        let results = futures::future::join_all(handles).await;

        let reports = domains
            .into_iter()
            .zip(results)
            .map(|(domain, joined)| match joined {
                Ok(Ok(mut report)) => {
                    report.domain = domain;
                    report
                }
                Ok(Err(e)) => {
                    warn!(domain = %domain, error = %e, "Review failed");
                    incomplete_report(domain, &e.to_string())
                }
                Err(e) => {
                    warn!(domain = %domain, error = %e, "Review task did not complete");
                    incomplete_report(domain, &e.to_string())
                }
            })
            .collect();

        let consolidated = ConsolidatedReview::from_reports(reports);
        info!(
            score = %consolidated.total_score,
            critical = consolidated.critical_count(),
            recommendation = %consolidated.recommendation,
            "Reviews consolidated"
        );
        consolidated
    }
}

/// Report standing in for a domain whose review could not be completed
pub fn incomplete_report(domain: ReviewDomain, reason: &str) -> ReviewReport {
    let id = format!("{}-review-incomplete", domain);
    ReviewReport::new(domain, Score::default(), ReviewStatus::NeedsWork).with_issue(
        ReviewIssue::new(id, format!("review incomplete: {}", reason), Severity::Critical),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consolidation::Recommendation;
    use crate::reviewer::StaticReviewer;
    use async_trait::async_trait;
    use cadence_core::Result;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn assignments(domains: &[(&str, Tier)]) -> BTreeMap<ReviewDomain, Tier> {
        domains.iter().map(|(d, t)| (d.to_string(), *t)).collect()
    }

    #[tokio::test]
    async fn test_critical_security_issue_blocks() {
        let reviewer = StaticReviewer::new()
            .with_report(
                ReviewReport::new("security", Score::new(6, 10), ReviewStatus::NeedsWork)
                    .with_issue(ReviewIssue::new("SEC-1", "SQL injection", Severity::Critical)),
            )
            .with_report(ReviewReport::new(
                "performance",
                Score::new(9, 10),
                ReviewStatus::Approved,
            ));
        let aggregator = ReviewAggregator::new(Arc::new(reviewer));

        let review = aggregator
            .review(
                &assignments(&[("security", Tier::Advanced), ("performance", Tier::Standard)]),
                &ArtifactSet::new(),
            )
            .await;

        assert_eq!(review.recommendation, Recommendation::FixMandatory);
        let critical = review.issues_with(Severity::Critical);
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].domain, "security");
        assert_eq!(critical[0].issue.id, "SEC-1");
        assert_eq!(review.total_score, Score::new(15, 20));
    }

    #[tokio::test]
    async fn test_failed_review_becomes_critical_issue() {
        // No canned report for operability -> reviewer error
        let reviewer = StaticReviewer::new().with_report(ReviewReport::new(
            "security",
            Score::new(10, 10),
            ReviewStatus::Approved,
        ));
        let aggregator = ReviewAggregator::new(Arc::new(reviewer));

        let review = aggregator
            .review(
                &assignments(&[("security", Tier::Basic), ("operability", Tier::Basic)]),
                &ArtifactSet::new(),
            )
            .await;

        assert_eq!(review.recommendation, Recommendation::FixMandatory);
        assert_eq!(review.domain_status("operability"), Some(ReviewStatus::NeedsWork));
        let critical = review.issues_with(Severity::Critical);
        assert_eq!(critical[0].issue.id, "operability-review-incomplete");
    }

    #[tokio::test]
    async fn test_reviewer_receives_assigned_tier() {
        let reviewer = Arc::new(
            StaticReviewer::new()
                .with_report(ReviewReport::new("security", Score::new(1, 1), ReviewStatus::Approved))
                .with_report(ReviewReport::new("correctness", Score::new(1, 1), ReviewStatus::Approved)),
        );
        let aggregator = ReviewAggregator::new(reviewer.clone());

        aggregator
            .review(
                &assignments(&[("security", Tier::Advanced), ("correctness", Tier::Basic)]),
                &ArtifactSet::new(),
            )
            .await;

        let mut calls = reviewer.calls();
        calls.sort();
        assert_eq!(
            calls,
            vec![
                ("correctness".to_string(), Tier::Basic),
                ("security".to_string(), Tier::Advanced)
            ]
        );
    }

    /// Tracks how many reviews are in flight at once
    struct SlowReviewer {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Reviewer for SlowReviewer {
        async fn review(
            &self,
            domain: &str,
            _tier: Tier,
            _artifacts: &ArtifactSet,
        ) -> Result<ReviewReport> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(ReviewReport::new(domain, Score::new(1, 1), ReviewStatus::Approved))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_all_domains_run_concurrently() {
        let reviewer = Arc::new(SlowReviewer {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let aggregator = ReviewAggregator::new(reviewer.clone());
        let domains = assignments(&[
            ("security", Tier::Basic),
            ("performance", Tier::Basic),
            ("correctness", Tier::Basic),
            ("operability", Tier::Basic),
        ]);

        let review = aggregator.review(&domains, &ArtifactSet::new()).await;

        assert_eq!(review.reports.len(), 4);
        assert_eq!(reviewer.peak.load(Ordering::SeqCst), 4);
        assert_eq!(review.recommendation, Recommendation::Proceed);
    }
}
