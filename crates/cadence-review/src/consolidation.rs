//! Consolidation of per-domain review reports

use cadence_core::{
    ReviewDomain, ReviewIssue, ReviewReport, ReviewStatus, Score, Severity,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Go/no-go outcome of a consolidated review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    /// No issues at all
    Proceed,
    /// Only medium/low issues: may proceed with justification
    FixOptional,
    /// At least one critical issue
    FixMandatory,
}

impl Recommendation {
    /// Whether the pipeline may move past review
    pub fn allows_proceed(self) -> bool {
        self != Self::FixMandatory
    }
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Proceed => write!(f, "proceed"),
            Self::FixOptional => write!(f, "fix optional, may proceed with justification"),
            Self::FixMandatory => write!(f, "fix mandatory"),
        }
    }
}

/// An issue tagged with the domain that reported it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainIssue {
    pub domain: ReviewDomain,
    pub issue: ReviewIssue,
}

/// Result of fan-in over every review domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedReview {
    /// Reports sorted by domain
    pub reports: Vec<ReviewReport>,
    pub total_score: Score,
    /// Every reported issue, bucketed by severity
    pub issues: BTreeMap<Severity, Vec<DomainIssue>>,
    pub domain_status: BTreeMap<ReviewDomain, ReviewStatus>,
    pub recommendation: Recommendation,
}

impl ConsolidatedReview {
    /// Consolidate reports: sum scores, bucket issues, roll up statuses
    pub fn from_reports(mut reports: Vec<ReviewReport>) -> Self {
        reports.sort_by(|a, b| a.domain.cmp(&b.domain));

        let mut total_score = Score::default();
        let mut issues: BTreeMap<Severity, Vec<DomainIssue>> = BTreeMap::new();
        let mut domain_status = BTreeMap::new();

        for report in &reports {
            total_score = total_score + report.score;
            domain_status.insert(report.domain.clone(), report.status);
            for issue in &report.issues {
                issues.entry(issue.severity).or_default().push(DomainIssue {
                    domain: report.domain.clone(),
                    issue: issue.clone(),
                });
            }
        }

        let recommendation = if issues.contains_key(&Severity::Critical) {
            Recommendation::FixMandatory
        } else if issues.is_empty() {
            Recommendation::Proceed
        } else {
            Recommendation::FixOptional
        };

        Self {
            reports,
            total_score,
            issues,
            domain_status,
            recommendation,
        }
    }

    /// Issues of one severity (empty slice if none)
    pub fn issues_with(&self, severity: Severity) -> &[DomainIssue] {
        self.issues.get(&severity).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn critical_count(&self) -> usize {
        self.issues_with(Severity::Critical).len()
    }

    pub fn domain_status(&self, domain: &str) -> Option<ReviewStatus> {
        self.domain_status.get(domain).copied()
    }
}

impl std::fmt::Display for ConsolidatedReview {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{:<14} {:>8} {:<11} {:>4} {:>4} {:>4}",
            "domain", "score", "status", "crit", "med", "low"
        )?;
        for report in &self.reports {
            let count = |s: Severity| report.issues.iter().filter(|i| i.severity == s).count();
            writeln!(
                f,
                "{:<14} {:>8} {:<11} {:>4} {:>4} {:>4}",
                report.domain,
                report.score.to_string(),
                report.status.to_string(),
                count(Severity::Critical),
                count(Severity::Medium),
                count(Severity::Low)
            )?;
        }
        writeln!(f, "total score: {}", self.total_score)?;
        write!(f, "recommendation: {}", self.recommendation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(domain: &str, issues: &[Severity]) -> ReviewReport {
        let status = if issues.is_empty() {
            ReviewStatus::Approved
        } else {
            ReviewStatus::NeedsWork
        };
        let mut r = ReviewReport::new(domain, Score::new(8, 10), status);
        for (i, severity) in issues.iter().enumerate() {
            r = r.with_issue(ReviewIssue::new(
                format!("{}-{}", domain, i),
                "finding",
                *severity,
            ));
        }
        r
    }

    #[test]
    fn test_critical_makes_fix_mandatory() {
        let review = ConsolidatedReview::from_reports(vec![
            report("security", &[Severity::Critical]),
            report("performance", &[]),
        ]);

        assert_eq!(review.recommendation, Recommendation::FixMandatory);
        assert!(!review.recommendation.allows_proceed());
        let critical = review.issues_with(Severity::Critical);
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].domain, "security");
        assert_eq!(review.domain_status("performance"), Some(ReviewStatus::Approved));
    }

    #[test]
    fn test_medium_and_low_are_optional() {
        let review = ConsolidatedReview::from_reports(vec![
            report("security", &[Severity::Low]),
            report("correctness", &[Severity::Medium, Severity::Low]),
        ]);

        assert_eq!(review.recommendation, Recommendation::FixOptional);
        assert!(review.recommendation.allows_proceed());
        assert_eq!(review.issues_with(Severity::Low).len(), 2);
        assert_eq!(review.critical_count(), 0);
    }

    #[test]
    fn test_clean_reviews_proceed() {
        let review = ConsolidatedReview::from_reports(vec![
            report("security", &[]),
            report("operability", &[]),
        ]);
        assert_eq!(review.recommendation, Recommendation::Proceed);
        assert_eq!(review.total_score, Score::new(16, 20));
        assert_eq!(review.reports[0].domain, "operability");
    }

    #[test]
    fn test_table_lists_every_domain() {
        let review = ConsolidatedReview::from_reports(vec![
            report("security", &[Severity::Critical]),
            report("performance", &[]),
        ]);
        let table = review.to_string();
        assert!(table.contains("security"));
        assert!(table.contains("performance"));
        assert!(table.ends_with("recommendation: fix mandatory"));
    }

    #[test]
    fn test_oversized_scores_saturate() {
        let review = ConsolidatedReview::from_reports(vec![
            ReviewReport::new("security", Score::new(u32::MAX, u32::MAX), ReviewStatus::Approved),
            ReviewReport::new("performance", Score::new(1, 1), ReviewStatus::Approved),
        ]);
        assert_eq!(review.total_score, Score::new(u32::MAX, u32::MAX));
        assert_eq!(review.recommendation, Recommendation::Proceed);
    }
}
