//! Retry and escalation ladder
//!
//! A failing task is retried at its current tier until it has failed
//! `max_attempts_per_tier` times there, then moves one rung up with a fresh
//! counter. Failing out of Advanced lands on Manual, which is terminal.

use cadence_core::config::EscalationConfig;
use cadence_core::{Task, TaskId, TaskStatus, Tier};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Escalation bookkeeping for one task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationState {
    pub tier: Tier,
    pub same_tier_failures: u32,
    /// Every tier the task has been assigned, oldest first
    pub tier_history: Vec<Tier>,
}

impl EscalationState {
    pub fn new(tier: Tier) -> Self {
        Self {
            tier,
            same_tier_failures: 0,
            tier_history: vec![tier],
        }
    }

    /// Whether the task ever left its starting tier
    pub fn escalated(&self) -> bool {
        self.tier_history.len() > 1
    }
}

/// What to do with a task after a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationDecision {
    /// Re-dispatch at the same tier
    Retry { tier: Tier },
    /// Re-dispatch one rung up
    Escalate { from: Tier, to: Tier },
    /// Stop dispatching; wait for a human
    Manual,
}

impl EscalationDecision {
    pub fn redispatch(self) -> bool {
        !matches!(self, Self::Manual)
    }
}

/// Per-run escalation tracker
#[derive(Debug, Clone)]
pub struct EscalationManager {
    max_attempts_per_tier: u32,
    ratio_threshold: f64,
    states: BTreeMap<TaskId, EscalationState>,
}

impl EscalationManager {
    pub fn new(config: &EscalationConfig) -> Self {
        Self {
            max_attempts_per_tier: config.max_attempts_per_tier.max(1),
            ratio_threshold: config.ratio_threshold,
            states: BTreeMap::new(),
        }
    }

    /// Rebuild a manager from persisted states
    pub fn restore(config: &EscalationConfig, states: BTreeMap<TaskId, EscalationState>) -> Self {
        let mut manager = Self::new(config);
        manager.states = states;
        manager
    }

    /// Start tracking a task at its assigned tier (no-op if already tracked)
    pub fn register(&mut self, task: &Task) {
        self.states
            .entry(task.id.clone())
            .or_insert_with(|| EscalationState::new(task.tier));
    }

    pub fn state(&self, task_id: &str) -> Option<&EscalationState> {
        self.states.get(task_id)
    }

    pub fn states(&self) -> &BTreeMap<TaskId, EscalationState> {
        &self.states
    }

    /// Record a failure of `task` and move it along the ladder.
    ///
    /// Updates the task's tier and status to match the decision.
    pub fn record_failure(&mut self, task: &mut Task) -> EscalationDecision {
        let max = self.max_attempts_per_tier;
        let state = self
            .states
            .entry(task.id.clone())
            .or_insert_with(|| EscalationState::new(task.tier));

        state.same_tier_failures += 1;
        if state.same_tier_failures < max && state.tier.is_executable() {
            task.status = TaskStatus::Failed;
            task.tier = state.tier;
            return EscalationDecision::Retry { tier: state.tier };
        }

        let from = state.tier;
        let to = from.next();
        state.same_tier_failures = 0;
        if to != from {
            state.tier = to;
            state.tier_history.push(to);
        }
        task.tier = to;

        if to.is_executable() {
            task.status = TaskStatus::Escalated;
            info!(task = %task.id, from = %from, to = %to, "Escalating task");
            EscalationDecision::Escalate { from, to }
        } else {
            task.status = TaskStatus::Blocked;
            warn!(task = %task.id, from = %from, "Task escalated to manual resolution");
            EscalationDecision::Manual
        }
    }

    /// Fraction of tracked tasks escalated at least once
    pub fn escalation_ratio(&self) -> f64 {
        if self.states.is_empty() {
            return 0.0;
        }
        let escalated = self.states.values().filter(|s| s.escalated()).count();
        escalated as f64 / self.states.len() as f64
    }

    /// Whether the catalog's tier assignments look too optimistic
    pub fn needs_catalog_review(&self) -> bool {
        self.escalation_ratio() > self.ratio_threshold
    }

    /// Tasks waiting for manual resolution
    pub fn manual_tasks(&self) -> Vec<TaskId> {
        self.states
            .iter()
            .filter(|(_, s)| s.tier == Tier::Manual)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::kinds;

    fn manager() -> EscalationManager {
        EscalationManager::new(&EscalationConfig::default())
    }

    #[test]
    fn test_two_failures_per_tier_then_escalate() {
        let mut mgr = manager();
        let mut task = Task::new("t1", kinds::CONTRACT, Tier::Basic, 2);
        mgr.register(&task);

        assert_eq!(
            mgr.record_failure(&mut task),
            EscalationDecision::Retry { tier: Tier::Basic }
        );
        assert_eq!(task.tier, Tier::Basic);
        assert_eq!(
            mgr.record_failure(&mut task),
            EscalationDecision::Escalate {
                from: Tier::Basic,
                to: Tier::Standard
            }
        );
        assert_eq!(task.tier, Tier::Standard);
        assert_eq!(task.status, TaskStatus::Escalated);
        assert_eq!(mgr.state("t1").unwrap().same_tier_failures, 0);
    }

    #[test]
    fn test_ladder_ends_at_manual() {
        let mut mgr = manager();
        let mut task = Task::new("t1", kinds::ADAPTER, Tier::Basic, 3);
        mgr.register(&task);

        let mut decisions = Vec::new();
        loop {
            let decision = mgr.record_failure(&mut task);
            decisions.push(decision);
            if decision == EscalationDecision::Manual {
                break;
            }
            assert!(decisions.len() < 10, "ladder did not terminate");
        }

        // Two dispatches at each executable tier
        assert_eq!(decisions.len(), 6);
        assert_eq!(task.tier, Tier::Manual);
        assert_eq!(task.status, TaskStatus::Blocked);
        assert_eq!(
            mgr.state("t1").unwrap().tier_history,
            vec![Tier::Basic, Tier::Standard, Tier::Advanced, Tier::Manual]
        );
        assert_eq!(mgr.manual_tasks(), vec!["t1".to_string()]);
    }

    #[test]
    fn test_tier_never_regresses() {
        let mut mgr = manager();
        let mut task = Task::new("t1", kinds::ADAPTER, Tier::Advanced, 3);
        mgr.register(&task);

        let mut last = task.tier;
        for _ in 0..5 {
            mgr.record_failure(&mut task);
            assert!(task.tier >= last);
            last = task.tier;
        }
        assert_eq!(task.tier, Tier::Manual);
        // Manual is sticky
        assert_eq!(mgr.record_failure(&mut task), EscalationDecision::Manual);
        assert_eq!(mgr.state("t1").unwrap().tier_history.len(), 2);
    }

    #[test]
    fn test_escalation_ratio_and_catalog_review() {
        let mut mgr = manager();
        let mut tasks: Vec<Task> = (0..5)
            .map(|i| Task::new(format!("t{}", i), kinds::CONTRACT, Tier::Basic, 1))
            .collect();
        for task in &tasks {
            mgr.register(task);
        }
        assert_eq!(mgr.escalation_ratio(), 0.0);
        assert!(!mgr.needs_catalog_review());

        mgr.record_failure(&mut tasks[0]);
        mgr.record_failure(&mut tasks[0]);
        assert!((mgr.escalation_ratio() - 0.2).abs() < f64::EPSILON);
        assert!(mgr.needs_catalog_review());
    }

    #[test]
    fn test_restore_keeps_counters() {
        let mut mgr = manager();
        let mut task = Task::new("t1", kinds::CONTRACT, Tier::Basic, 1);
        mgr.register(&task);
        mgr.record_failure(&mut task);

        let restored =
            EscalationManager::restore(&EscalationConfig::default(), mgr.states().clone());
        assert_eq!(restored.state("t1").unwrap().same_tier_failures, 1);
    }
}
