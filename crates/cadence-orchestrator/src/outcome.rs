//! Run outcome, halt reports and the completion checklist

use cadence_core::Phase;
use serde::{Deserialize, Serialize};

/// Component that stopped a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Decomposer,
    Scheduler,
    Verifier,
    Escalation,
    Checkpoint,
    Review,
    Controller,
    VersionControl,
    Persistence,
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Decomposer => "decomposer",
            Self::Scheduler => "scheduler",
            Self::Verifier => "verifier",
            Self::Escalation => "escalation",
            Self::Checkpoint => "checkpoint",
            Self::Review => "review",
            Self::Controller => "controller",
            Self::VersionControl => "version_control",
            Self::Persistence => "persistence",
        };
        write!(f, "{}", name)
    }
}

/// Why a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltClass {
    /// Invalid input or plan; retrying cannot help
    Structural,
    MissingDependency,
    /// A load-bearing task ran out of tiers
    ManualEscalation,
    CommitFailed,
    /// Review still demands fixes after every corrective cycle
    ReviewNoGo,
    PushFailed,
    PersistFailed,
    Cancelled,
}

impl std::fmt::Display for HaltClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Structural => "structural",
            Self::MissingDependency => "missing_dependency",
            Self::ManualEscalation => "manual_escalation",
            Self::CommitFailed => "commit_failed",
            Self::ReviewNoGo => "review_no_go",
            Self::PushFailed => "push_failed",
            Self::PersistFailed => "persist_failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

/// Operator-facing record of a halt or pause
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HaltReport {
    pub component: Component,
    pub class: HaltClass,
    pub reason: String,
    /// Highest committed group when the run stopped
    pub last_checkpoint: Option<u32>,
}

impl HaltReport {
    pub fn new(
        component: Component,
        class: HaltClass,
        reason: impl Into<String>,
        last_checkpoint: Option<u32>,
    ) -> Self {
        Self {
            component,
            class,
            reason: reason.into(),
            last_checkpoint,
        }
    }
}

impl std::fmt::Display for HaltReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.component, self.class, self.reason)?;
        match self.last_checkpoint {
            Some(group) => write!(f, " (last checkpoint: G{}, resume from G{})", group, group + 1),
            None => write!(f, " (no checkpoint committed)"),
        }
    }
}

/// Final status of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Complete,
    Incomplete { reasons: Vec<String> },
}

impl RunStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete => write!(f, "complete"),
            Self::Incomplete { reasons } => write!(f, "incomplete: {}", reasons.join("; ")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecklistCategory {
    Phase,
    QualityGate,
    Persistence,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub name: String,
    pub category: ChecklistCategory,
    pub passed: bool,
}

/// Named pass/fail checks a caller can inspect after a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checklist {
    pub items: Vec<ChecklistItem>,
}

impl Checklist {
    pub const NO_CRITICAL_ISSUES: &'static str = "no-critical-issues";
    pub const ESCALATION_RATIO: &'static str = "escalation-ratio-within-threshold";
    pub const NO_MANUAL_TASKS: &'static str = "no-manual-tasks-pending";
    pub const ALL_GROUPS_COMMITTED: &'static str = "all-groups-committed";
    pub const RUN_STATE_PERSISTED: &'static str = "run-state-persisted";
    pub const PUSHED: &'static str = "pushed";

    /// Name of the completion check for a phase
    pub fn phase_item(phase: Phase) -> String {
        format!("phase-{}-complete", phase)
    }

    pub fn record(&mut self, name: impl Into<String>, category: ChecklistCategory, passed: bool) {
        let name = name.into();
        match self.items.iter_mut().find(|i| i.name == name) {
            Some(item) => item.passed = passed,
            None => self.items.push(ChecklistItem {
                name,
                category,
                passed,
            }),
        }
    }

    pub fn get(&self, name: &str) -> Option<bool> {
        self.items.iter().find(|i| i.name == name).map(|i| i.passed)
    }

    pub fn all_passed(&self) -> bool {
        self.items.iter().all(|i| i.passed)
    }

    pub fn failed(&self) -> Vec<&ChecklistItem> {
        self.items.iter().filter(|i| !i.passed).collect()
    }
}

impl std::fmt::Display for Checklist {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut items: Vec<&ChecklistItem> = self.items.iter().collect();
        items.sort_by_key(|i| i.category);
        for item in items {
            let mark = if item.passed { "x" } else { " " };
            writeln!(f, "[{}] {}", mark, item.name)?;
        }
        Ok(())
    }
}

/// What the controller hands back to its caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: String,
    pub status: RunStatus,
    pub checklist: Checklist,
    pub halt: Option<HaltReport>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_halt_report_names_resume_point() {
        let report = HaltReport::new(
            Component::Verifier,
            HaltClass::MissingDependency,
            "G3 could not resolve order-model",
            Some(2),
        );
        assert_eq!(
            report.to_string(),
            "[verifier] missing_dependency: G3 could not resolve order-model \
             (last checkpoint: G2, resume from G3)"
        );

        let fresh = HaltReport::new(Component::Decomposer, HaltClass::Structural, "cycle", None);
        assert!(fresh.to_string().ends_with("(no checkpoint committed)"));
    }

    #[test]
    fn test_checklist_record_overwrites() {
        let mut checklist = Checklist::default();
        checklist.record(Checklist::PUSHED, ChecklistCategory::Persistence, false);
        checklist.record(Checklist::PUSHED, ChecklistCategory::Persistence, true);
        checklist.record(Checklist::phase_item(Phase::Plan), ChecklistCategory::Phase, true);

        assert_eq!(checklist.items.len(), 2);
        assert_eq!(checklist.get("pushed"), Some(true));
        assert_eq!(checklist.get("phase-plan-complete"), Some(true));
        assert!(checklist.all_passed());
    }

    #[test]
    fn test_incomplete_status_lists_reasons() {
        let status = RunStatus::Incomplete {
            reasons: vec!["a".to_string(), "b".to_string()],
        };
        assert!(!status.is_complete());
        assert_eq!(status.to_string(), "incomplete: a; b");
    }
}
