//! Phase bookkeeping and exit criteria

use crate::run_state::RunState;
use cadence_core::{CadenceError, Phase, Result};
use serde::{Deserialize, Serialize};

/// Status of a phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    InProgress,
    Completed,
}

/// Ordered record of completed phases
///
/// Phases can only be completed in lifecycle order, so the list is always a
/// prefix of [`Phase::ALL`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseLedger {
    completed: Vec<Phase>,
}

impl PhaseLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// The phase that must complete next, if any
    pub fn current(&self) -> Option<Phase> {
        match self.completed.last() {
            Some(last) => last.next(),
            None => Some(Phase::first()),
        }
    }

    pub fn status(&self, phase: Phase) -> PhaseStatus {
        if self.completed.contains(&phase) {
            PhaseStatus::Completed
        } else if self.current() == Some(phase) {
            PhaseStatus::InProgress
        } else {
            PhaseStatus::Pending
        }
    }

    /// Mark `phase` complete; it must be the current phase
    pub fn complete(&mut self, phase: Phase) -> Result<()> {
        match self.current() {
            Some(current) if current == phase => {
                self.completed.push(phase);
                Ok(())
            }
            Some(current) => Err(CadenceError::Phase(format!(
                "cannot complete {} while {} is in progress",
                phase, current
            ))),
            None => Err(CadenceError::Phase(format!(
                "cannot complete {}: every phase is already complete",
                phase
            ))),
        }
    }

    pub fn completed(&self) -> &[Phase] {
        &self.completed
    }

    pub fn is_completed(&self, phase: Phase) -> bool {
        self.completed.contains(&phase)
    }

    pub fn all_completed(&self) -> bool {
        self.completed.len() == Phase::ALL.len()
    }
}

/// Human-readable exit criterion
pub fn describe(phase: Phase) -> &'static str {
    match phase {
        Phase::Plan => "work item has a name and at least one unit",
        Phase::Decompose => "decomposition produced a non-empty plan",
        Phase::Implement => "every group has a committed checkpoint",
        Phase::Review => "consolidated review recorded",
        Phase::Fix => "no critical review issues remain",
        Phase::Finalize => "push acknowledged and run state persisted",
    }
}

/// Check whether `phase`'s exit criterion holds for `run`
///
/// Returns the unmet condition as the error message.
pub fn check_exit(phase: Phase, run: &RunState, push_required: bool) -> std::result::Result<(), String> {
    match phase {
        Phase::Plan => run.work_item.validate().map_err(|e| e.to_string()),
        Phase::Decompose => match &run.plan {
            Some(plan) if !plan.tasks.is_empty() => Ok(()),
            Some(_) => Err("plan has no tasks".to_string()),
            None => Err("no plan recorded".to_string()),
        },
        Phase::Implement => {
            let plan = run.plan.as_ref().ok_or("no plan recorded")?;
            let missing: Vec<String> = plan
                .groups
                .iter()
                .filter(|g| !run.checkpoints.iter().any(|c| c.group == g.index))
                .map(|g| format!("G{}", g.index))
                .collect();
            if missing.is_empty() {
                Ok(())
            } else {
                Err(format!("uncommitted groups: {}", missing.join(", ")))
            }
        }
        Phase::Review => run
            .review
            .as_ref()
            .map(|_| ())
            .ok_or_else(|| "no review recorded".to_string()),
        Phase::Fix => match &run.review {
            Some(review) if review.recommendation.allows_proceed() => Ok(()),
            Some(review) => Err(format!(
                "{} critical issue(s) unresolved",
                review.critical_count()
            )),
            None => Err("no review recorded".to_string()),
        },
        Phase::Finalize => {
            if push_required && run.push.is_none() {
                Err("push not acknowledged".to_string())
            } else if run.persisted_at.is_none() {
                Err("run state never persisted".to_string())
            } else {
                Ok(())
            }
        }
    }
}
