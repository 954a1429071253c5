//! Reviewer abstraction

use async_trait::async_trait;
use cadence_core::{ArtifactSet, CadenceError, Result, ReviewReport, Tier};
use std::collections::HashMap;
use std::sync::Mutex;

/// Evaluates the final artifact set along one review domain
#[async_trait]
pub trait Reviewer: Send + Sync {
    /// Review `artifacts` for `domain`, running at capability `tier`
    async fn review(&self, domain: &str, tier: Tier, artifacts: &ArtifactSet)
        -> Result<ReviewReport>;
}

/// Reviewer returning canned reports, for tests
///
/// Domains without a canned report produce an error. Reports queued with
/// [`StaticReviewer::then`] are served once each before falling back to the
/// base report, which lets a test model a fix cycle.
#[derive(Default)]
pub struct StaticReviewer {
    reports: HashMap<String, ReviewReport>,
    queued: Mutex<HashMap<String, Vec<ReviewReport>>>,
    calls: Mutex<Vec<(String, Tier)>>,
}

impl StaticReviewer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_report(mut self, report: ReviewReport) -> Self {
        self.reports.insert(report.domain.clone(), report);
        self
    }

    /// Serve `report` once, before the base report for its domain
    pub fn then(self, report: ReviewReport) -> Self {
        if let Ok(mut queued) = self.queued.lock() {
            queued.entry(report.domain.clone()).or_default().push(report);
        }
        self
    }

    /// Every (domain, tier) this reviewer was asked for
    pub fn calls(&self) -> Vec<(String, Tier)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Reviewer for StaticReviewer {
    async fn review(
        &self,
        domain: &str,
        tier: Tier,
        _artifacts: &ArtifactSet,
    ) -> Result<ReviewReport> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((domain.to_string(), tier));
        }

        let queued = self.queued.lock().ok().and_then(|mut q| {
            q.get_mut(domain)
                .filter(|reports| !reports.is_empty())
                .map(|reports| reports.remove(0))
        });
        if let Some(report) = queued {
            return Ok(report);
        }

        self.reports
            .get(domain)
            .cloned()
            .ok_or_else(|| CadenceError::Review(format!("No canned report for: {}", domain)))
    }
}
