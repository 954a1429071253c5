//! Group scheduler
//!
//! Runs groups strictly in index order. Within a group, tasks are dispatched
//! (bounded in parallel or one at a time), every task is awaited, and the
//! group is verified once as a whole. Only a passing group is committed; only
//! failing tasks are re-dispatched.
//!
//! A group that halts keeps every tier and escalation counter it reached;
//! only its dispatchable tasks go back to pending, so a resume re-runs them
//! from where they stood. A Manual task whose status is `Verified` was
//! resolved by hand: it is never dispatched and its targets join the commit.

use crate::checkpoint::CheckpointManager;
use crate::collaborators::{Verification, Verifier, Worker, WorkerOutcome};
use crate::escalation::{EscalationDecision, EscalationManager};
use crate::outcome::{Component, HaltClass, HaltReport};
use cadence_core::config::SchedulerConfig;
use cadence_core::{
    ArtifactSet, CadenceError, CommitRef, ErrorClass, Group, GroupMode, GroupStatus, Result,
    Task, TaskId, TaskStatus, Tier,
};
use cadence_planning::Plan;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Progress notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    GroupDispatched { group: u32, tasks: usize },
    TaskStarted { task: TaskId, tier: Tier, attempt: u32 },
    TaskFinished { task: TaskId, succeeded: bool },
    TaskEscalated { task: TaskId, from: Tier, to: Tier },
    /// Non-load-bearing task handed to a human
    TaskParked { task: TaskId },
    GroupVerified { group: u32, passed: bool, class: Option<ErrorClass> },
    GroupCommitted { group: u32, commit_ref: CommitRef },
    GroupFailed { group: u32, reason: String },
}

/// Result of running one group to its barrier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupOutcome {
    Committed {
        group: u32,
        commit_ref: CommitRef,
        /// Tasks parked for manual resolution and left out of the commit
        parked: Vec<TaskId>,
    },
    Halted(HaltReport),
}

/// Result of running every remaining group
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleOutcome {
    pub committed: Vec<u32>,
    pub parked: Vec<TaskId>,
    pub halt: Option<HaltReport>,
}

impl ScheduleOutcome {
    pub fn is_complete(&self) -> bool {
        self.halt.is_none()
    }
}

pub struct GroupScheduler {
    worker: Arc<dyn Worker>,
    verifier: Arc<dyn Verifier>,
    max_in_flight: usize,
    cancel: CancellationToken,
    events: Option<mpsc::UnboundedSender<SchedulerEvent>>,
}

impl GroupScheduler {
    pub fn new(worker: Arc<dyn Worker>, verifier: Arc<dyn Verifier>, config: &SchedulerConfig) -> Self {
        Self {
            worker,
            verifier,
            max_in_flight: config.max_in_flight.max(1),
            cancel: CancellationToken::new(),
            events: None,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_events(mut self, tx: mpsc::UnboundedSender<SchedulerEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run every group after the last checkpoint, stopping at the first halt
    pub async fn run(
        &self,
        plan: &mut Plan,
        checkpoints: &mut CheckpointManager,
        escalation: &mut EscalationManager,
    ) -> Result<ScheduleOutcome> {
        let mut outcome = ScheduleOutcome::default();
        for index in checkpoints.next_group()..=plan.last_group_index() {
            match self.run_group(index, plan, checkpoints, escalation).await? {
                GroupOutcome::Committed { group, parked, .. } => {
                    outcome.committed.push(group);
                    outcome.parked.extend(parked);
                }
                GroupOutcome::Halted(report) => {
                    outcome.halt = Some(report);
                    break;
                }
            }
        }
        Ok(outcome)
    }

    /// Dispatch, await, verify and commit one group.
    ///
    /// `index` must be the next committable group.
    #[instrument(skip_all, fields(group = index))]
    pub async fn run_group(
        &self,
        index: u32,
        plan: &mut Plan,
        checkpoints: &mut CheckpointManager,
        escalation: &mut EscalationManager,
    ) -> Result<GroupOutcome> {
        if index != checkpoints.next_group() {
            return Err(CadenceError::GroupOrdering(format!(
                "group {} cannot start before group {} is committed",
                index,
                checkpoints.next_group()
            )));
        }
        let group = plan
            .group(index)
            .cloned()
            .ok_or_else(|| CadenceError::GroupOrdering(format!("plan has no group {}", index)))?;

        let members = plan.tasks_in(index);
        if members.len() != group.tasks.len() {
            return Err(CadenceError::GroupOrdering(format!(
                "group {} lists tasks missing from the plan",
                index
            )));
        }
        for task in members {
            escalation.register(task);
        }

        let outcome = self
            .drive_group(&group, plan, checkpoints, escalation)
            .await?;

        if let GroupOutcome::Halted(report) = &outcome {
            for id in &group.tasks {
                if let Some(task) = plan.task_mut(id) {
                    if task.tier.is_executable() {
                        task.status = TaskStatus::Pending;
                    }
                }
            }
            let status = if report.class == HaltClass::Cancelled {
                GroupStatus::Pending
            } else {
                GroupStatus::Failed
            };
            set_group_status(plan, index, status);
            self.emit(SchedulerEvent::GroupFailed {
                group: index,
                reason: report.reason.clone(),
            });
        }
        Ok(outcome)
    }

    async fn drive_group(
        &self,
        group: &Group,
        plan: &mut Plan,
        checkpoints: &mut CheckpointManager,
        escalation: &mut EscalationManager,
    ) -> Result<GroupOutcome> {
        let index = group.index;
        let dependency_artifacts = checkpoints.extract(index.saturating_sub(1));

        let mut parked: Vec<TaskId> = Vec::new();
        let mut round: Vec<TaskId> = Vec::new();
        let mut produced: BTreeMap<TaskId, ArtifactSet> = BTreeMap::new();
        for task in plan.tasks_in(index) {
            if task.tier.is_executable() {
                round.push(task.id.clone());
            } else if task.status == TaskStatus::Verified {
                debug!(task = %task.id, "Resolved by hand, not dispatching");
                produced.insert(task.id.clone(), task.targets.clone());
            } else if task.load_bearing {
                return Ok(GroupOutcome::Halted(HaltReport::new(
                    Component::Escalation,
                    HaltClass::ManualEscalation,
                    format!("task {} in G{} is awaiting manual resolution", task.id, index),
                    checkpoints.last(),
                )));
            } else {
                parked.push(task.id.clone());
            }
        }

        set_group_status(plan, index, GroupStatus::Dispatched);
        info!(group = %group, mode = ?group.mode, tasks = round.len(), "Dispatching group");
        self.emit(SchedulerEvent::GroupDispatched {
            group: index,
            tasks: round.len(),
        });

        loop {
            if self.cancel.is_cancelled() {
                return Ok(GroupOutcome::Halted(self.cancelled(index, checkpoints)));
            }

            let results = self
                .dispatch(group, &round, plan, &dependency_artifacts)
                .await;
            if self.cancel.is_cancelled() {
                return Ok(GroupOutcome::Halted(self.cancelled(index, checkpoints)));
            }

            let mut failed = Vec::new();
            for (id, result) in results {
                let succeeded = match result {
                    Ok(outcome) if outcome.is_success() => {
                        produced.insert(id.clone(), outcome.artifacts);
                        true
                    }
                    Ok(outcome) => {
                        warn!(task = %id, diagnostics = ?outcome.diagnostics, "Worker reported failure");
                        false
                    }
                    Err(e) => {
                        warn!(task = %id, error = %e, "Worker error");
                        false
                    }
                };
                if !succeeded {
                    produced.remove(&id);
                    failed.push(id.clone());
                }
                self.emit(SchedulerEvent::TaskFinished {
                    task: id,
                    succeeded,
                });
            }

            let failing = if failed.is_empty() {
                set_group_status(plan, index, GroupStatus::Verifying);
                let artifacts: ArtifactSet = produced.values().flatten().cloned().collect();
                let verification = match self.verifier.check(group, &artifacts).await {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(group = index, error = %e, "Verifier error, treating as build infrastructure failure");
                        Verification::fail(ErrorClass::BuildInfra).with_diagnostic(e.to_string())
                    }
                };
                self.emit(SchedulerEvent::GroupVerified {
                    group: index,
                    passed: verification.passed,
                    class: verification.error_class,
                });

                if verification.passed {
                    return self
                        .commit_group(index, artifacts, parked, plan, checkpoints)
                        .await;
                }

                let class = verification.class();
                if !class.is_retryable() {
                    warn!(group = index, diagnostics = ?verification.diagnostics, "Missing dependency, halting");
                    let detail = if verification.diagnostics.is_empty() {
                        "verifier reported a missing dependency".to_string()
                    } else {
                        verification.diagnostics.join("; ")
                    };
                    return Ok(GroupOutcome::Halted(HaltReport::new(
                        Component::Verifier,
                        HaltClass::MissingDependency,
                        format!("G{}: {}", index, detail),
                        checkpoints.last(),
                    )));
                }

                info!(group = index, class = %class, "Verification failed");
                let active: BTreeSet<TaskId> = produced.keys().cloned().collect();
                attribute(&verification, &round, &active)
            } else {
                debug!(group = index, failed = failed.len(), "Skipping verification after worker failures");
                failed
            };

            if failing.is_empty() {
                return Ok(GroupOutcome::Halted(HaltReport::new(
                    Component::Verifier,
                    HaltClass::Structural,
                    format!("G{} failed verification with no task left to retry", index),
                    checkpoints.last(),
                )));
            }

            let mut next_round = Vec::new();
            let mut needs_manual = Vec::new();
            for id in failing {
                let task = plan
                    .task_mut(&id)
                    .ok_or_else(|| CadenceError::Other(format!("unknown task {}", id)))?;
                match escalation.record_failure(task) {
                    EscalationDecision::Retry { .. } => next_round.push(id),
                    EscalationDecision::Escalate { from, to } => {
                        self.emit(SchedulerEvent::TaskEscalated {
                            task: id.clone(),
                            from,
                            to,
                        });
                        next_round.push(id);
                    }
                    EscalationDecision::Manual if task.load_bearing => needs_manual.push(id),
                    EscalationDecision::Manual => {
                        warn!(task = %id, "Parking non-load-bearing task for manual resolution");
                        produced.remove(&id);
                        self.emit(SchedulerEvent::TaskParked { task: id.clone() });
                        parked.push(id);
                    }
                }
            }

            if !needs_manual.is_empty() {
                return Ok(GroupOutcome::Halted(HaltReport::new(
                    Component::Escalation,
                    HaltClass::ManualEscalation,
                    format!(
                        "G{}: {} exhausted every tier and need manual resolution",
                        index,
                        needs_manual.join(", ")
                    ),
                    checkpoints.last(),
                )));
            }

            set_group_status(plan, index, GroupStatus::Dispatched);
            round = next_round;
        }
    }

    async fn commit_group(
        &self,
        index: u32,
        artifacts: ArtifactSet,
        parked: Vec<TaskId>,
        plan: &mut Plan,
        checkpoints: &mut CheckpointManager,
    ) -> Result<GroupOutcome> {
        let commit_ref = match checkpoints.commit(index, artifacts).await {
            Ok(checkpoint) => checkpoint.commit_ref.clone(),
            Err(e) => {
                warn!(group = index, error = %e, "Commit failed");
                return Ok(GroupOutcome::Halted(HaltReport::new(
                    Component::Checkpoint,
                    HaltClass::CommitFailed,
                    format!("G{}: {}", index, e),
                    checkpoints.last(),
                )));
            }
        };

        let ids: Vec<TaskId> = plan
            .group(index)
            .map(|g| g.tasks.clone())
            .unwrap_or_default();
        for id in ids.iter().filter(|id| !parked.contains(id)) {
            if let Some(task) = plan.task_mut(id) {
                task.status = TaskStatus::Verified;
            }
        }
        set_group_status(plan, index, GroupStatus::Committed);
        self.emit(SchedulerEvent::GroupCommitted {
            group: index,
            commit_ref: commit_ref.clone(),
        });

        Ok(GroupOutcome::Committed {
            group: index,
            commit_ref,
            parked,
        })
    }

    /// Run one round of tasks and collect every result
    async fn dispatch(
        &self,
        group: &Group,
        round: &[TaskId],
        plan: &mut Plan,
        dependency_artifacts: &ArtifactSet,
    ) -> Vec<(TaskId, Result<WorkerOutcome>)> {
        let mut tasks = Vec::with_capacity(round.len());
        for id in round {
            if let Some(task) = plan.task_mut(id) {
                task.status = TaskStatus::Running;
                task.record_attempt();
                let attempt = task.attempts.get(&task.tier).copied().unwrap_or(1);
                self.emit(SchedulerEvent::TaskStarted {
                    task: id.clone(),
                    tier: task.tier,
                    attempt,
                });
                tasks.push(task.clone());
            }
        }

        let mut results = match group.mode {
            GroupMode::Sequential => self.dispatch_sequential(tasks, dependency_artifacts).await,
            GroupMode::Parallel => self.dispatch_parallel(tasks, dependency_artifacts).await,
        };

        // A worker that panicked never reports back
        for id in round {
            if !results.iter().any(|(done, _)| done == id) {
                results.push((
                    id.clone(),
                    Err(CadenceError::Worker(format!("{} did not complete", id))),
                ));
            }
        }
        results
    }

    async fn dispatch_sequential(
        &self,
        tasks: Vec<Task>,
        dependency_artifacts: &ArtifactSet,
    ) -> Vec<(TaskId, Result<WorkerOutcome>)> {
        let mut results = Vec::with_capacity(tasks.len());
        for task in tasks {
            if self.cancel.is_cancelled() {
                break;
            }
            debug!(task = %task.id, tier = %task.tier, "Dispatching task");
            let result = tokio::select! {
                _ = self.cancel.cancelled() => Err(CadenceError::Aborted(format!("{} cancelled", task.id))),
                result = self.worker.execute(&task, dependency_artifacts) => result,
            };
            results.push((task.id, result));
        }
        results
    }

    async fn dispatch_parallel(
        &self,
        tasks: Vec<Task>,
        dependency_artifacts: &ArtifactSet,
    ) -> Vec<(TaskId, Result<WorkerOutcome>)> {
        let permits = tasks.len().min(self.max_in_flight).max(1);
        let semaphore = Arc::new(Semaphore::new(permits));
        let mut set = JoinSet::new();

        for task in tasks {
            let worker = Arc::clone(&self.worker);
            let semaphore = Arc::clone(&semaphore);
            let cancel = self.cancel.clone();
            let deps = dependency_artifacts.clone();
            set.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => {
                        debug!(task = %task.id, tier = %task.tier, "Dispatching task");
                        tokio::select! {
                            _ = cancel.cancelled() => Err(CadenceError::Aborted(format!("{} cancelled", task.id))),
                            result = worker.execute(&task, &deps) => result,
                        }
                    }
                    Err(e) => Err(CadenceError::Worker(e.to_string())),
                };
                (task.id, result)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(pair) => results.push(pair),
                Err(e) => warn!(error = %e, "Worker task did not complete"),
            }
        }
        results
    }

    fn cancelled(&self, index: u32, checkpoints: &CheckpointManager) -> HaltReport {
        info!(group = index, "Group cancelled, nothing recorded");
        HaltReport::new(
            Component::Scheduler,
            HaltClass::Cancelled,
            format!("G{} cancelled before commit", index),
            checkpoints.last(),
        )
    }

    fn emit(&self, event: SchedulerEvent) {
        if let Some(tx) = &self.events {
            if tx.send(event).is_err() {
                debug!("Scheduler event receiver dropped");
            }
        }
    }
}

/// Tasks a failed verification counts against
///
/// The verifier's attribution wins when it names tasks of this group;
/// otherwise every task dispatched in the round, or every active task if the
/// round was empty.
fn attribute(
    verification: &Verification,
    round: &[TaskId],
    active: &BTreeSet<TaskId>,
) -> Vec<TaskId> {
    let named: Vec<TaskId> = verification
        .failing_tasks
        .iter()
        .filter(|id| active.contains(*id))
        .cloned()
        .collect();
    if !named.is_empty() {
        named
    } else if !round.is_empty() {
        round.to_vec()
    } else {
        active.iter().cloned().collect()
    }
}

fn set_group_status(plan: &mut Plan, index: u32, status: GroupStatus) {
    if let Some(group) = plan.group_mut(index) {
        group.status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{EventLog, RecordingVcs, ScriptedVerifier, ScriptedWorker};
    use cadence_core::config::EscalationConfig;
    use cadence_core::kinds;
    use std::time::Duration;

    fn plan(groups: &[(GroupMode, &[(&str, Tier)])]) -> Plan {
        let mut plan = Plan {
            work_item: "test".to_string(),
            catalog_version: "1".to_string(),
            groups: Vec::new(),
            tasks: Vec::new(),
            tier_distribution: BTreeMap::new(),
            review_tiers: BTreeMap::new(),
        };
        for (i, (mode, tasks)) in groups.iter().enumerate() {
            let index = i as u32 + 1;
            let tasks = tasks
                .iter()
                .map(|(id, tier)| {
                    Task::new(*id, kinds::ADAPTER, *tier, index).with_targets([format!("{}.rs", id)])
                })
                .collect();
            plan.append_group(Group::new(index, format!("g{}", index), *mode), tasks)
                .unwrap();
        }
        plan
    }

    struct Harness {
        log: EventLog,
        worker: Arc<ScriptedWorker>,
        verifier: Arc<ScriptedVerifier>,
        vcs: Arc<RecordingVcs>,
    }

    impl Harness {
        fn new(
            worker: impl FnOnce(EventLog) -> ScriptedWorker,
            verifier: impl FnOnce(EventLog) -> ScriptedVerifier,
        ) -> Self {
            let log = EventLog::new();
            Self {
                worker: Arc::new(worker(log.clone())),
                verifier: Arc::new(verifier(log.clone())),
                vcs: Arc::new(RecordingVcs::new(log.clone())),
                log,
            }
        }

        fn scheduler(&self, max_in_flight: usize) -> GroupScheduler {
            GroupScheduler::new(
                self.worker.clone(),
                self.verifier.clone(),
                &SchedulerConfig { max_in_flight },
            )
        }

        async fn run(&self, plan: &mut Plan) -> (ScheduleOutcome, CheckpointManager, EscalationManager) {
            let mut checkpoints = CheckpointManager::new(self.vcs.clone());
            let mut escalation = EscalationManager::new(&EscalationConfig::default());
            let outcome = self
                .scheduler(4)
                .run(plan, &mut checkpoints, &mut escalation)
                .await
                .unwrap();
            (outcome, checkpoints, escalation)
        }
    }

    #[tokio::test]
    async fn test_groups_commit_in_order() {
        let h = Harness::new(ScriptedWorker::new, ScriptedVerifier::new);
        let mut plan = plan(&[
            (GroupMode::Parallel, &[("a", Tier::Basic), ("b", Tier::Basic)]),
            (GroupMode::Parallel, &[("c", Tier::Standard)]),
        ]);

        let (outcome, checkpoints, _) = h.run(&mut plan).await;

        assert!(outcome.is_complete());
        assert_eq!(outcome.committed, vec![1, 2]);
        assert_eq!(h.vcs.committed_groups(), vec![1, 2]);
        // Every G1 dispatch happens before G1's commit, which precedes G2
        let commit1 = h.log.position("commit:1").unwrap();
        assert!(h.log.position("dispatch:a@basic").unwrap() < commit1);
        assert!(h.log.position("dispatch:c@standard").unwrap() > commit1);
        assert_eq!(h.worker.inputs_of("c"), vec![checkpoints.extract(1)]);
        assert!(plan.tasks.iter().all(|t| t.status == TaskStatus::Verified));
        assert!(plan.groups.iter().all(|g| g.status == GroupStatus::Committed));
    }

    #[tokio::test]
    async fn test_only_failing_tasks_are_redispatched() {
        let h = Harness::new(
            |log| ScriptedWorker::new(log).fail_times("b", 1),
            ScriptedVerifier::new,
        );
        let mut plan = plan(&[(GroupMode::Parallel, &[("a", Tier::Basic), ("b", Tier::Basic)])]);

        let (outcome, checkpoints, _) = h.run(&mut plan).await;

        assert!(outcome.is_complete());
        assert_eq!(h.worker.dispatches_of("a"), vec![Tier::Basic]);
        assert_eq!(h.worker.dispatches_of("b"), vec![Tier::Basic, Tier::Basic]);
        // Verification skipped for the round with a worker failure
        assert_eq!(h.verifier.checks().len(), 1);
        assert_eq!(
            checkpoints.extract(1),
            ["a.rs", "b.rs"].iter().map(|s| s.to_string()).collect()
        );
    }

    #[tokio::test]
    async fn test_attributed_verification_failure() {
        let h = Harness::new(ScriptedWorker::new, |log| {
            ScriptedVerifier::new(log)
                .script(1, vec![Verification::fail(ErrorClass::Compile).blaming(["b"])])
        });
        let mut plan = plan(&[(GroupMode::Parallel, &[("a", Tier::Basic), ("b", Tier::Basic)])]);

        h.run(&mut plan).await;

        assert_eq!(h.worker.dispatches_of("a").len(), 1);
        assert_eq!(h.worker.dispatches_of("b").len(), 2);
    }

    #[tokio::test]
    async fn test_unattributed_failure_counts_against_round() {
        let h = Harness::new(ScriptedWorker::new, |log| {
            ScriptedVerifier::new(log).script(1, vec![Verification::fail(ErrorClass::TestFailure)])
        });
        let mut plan = plan(&[(GroupMode::Parallel, &[("a", Tier::Basic), ("b", Tier::Basic)])]);

        let (_, _, escalation) = h.run(&mut plan).await;

        assert_eq!(h.worker.dispatches_of("a").len(), 2);
        assert_eq!(h.worker.dispatches_of("b").len(), 2);
        assert_eq!(escalation.state("a").unwrap().same_tier_failures, 1);
    }

    #[tokio::test]
    async fn test_verifier_error_is_retried_as_build_infra() {
        let h = Harness::new(ScriptedWorker::new, |log| {
            ScriptedVerifier::new(log).error_once(1, "runner offline")
        });
        let mut plan = plan(&[(GroupMode::Sequential, &[("a", Tier::Basic)])]);

        let (outcome, _, _) = h.run(&mut plan).await;

        assert!(outcome.is_complete());
        assert_eq!(h.verifier.checks().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_dependency_halts_without_commit() {
        let h = Harness::new(ScriptedWorker::new, |log| {
            ScriptedVerifier::new(log).script(
                2,
                vec![Verification::fail(ErrorClass::MissingDependency)
                    .with_diagnostic("unresolved import order::Order")],
            )
        });
        let mut plan = plan(&[
            (GroupMode::Parallel, &[("a", Tier::Basic)]),
            (GroupMode::Parallel, &[("b", Tier::Basic)]),
            (GroupMode::Parallel, &[("c", Tier::Basic)]),
        ]);

        let (outcome, checkpoints, _) = h.run(&mut plan).await;

        let halt = outcome.halt.unwrap();
        assert_eq!(halt.class, HaltClass::MissingDependency);
        assert_eq!(halt.last_checkpoint, Some(1));
        assert!(halt.reason.contains("unresolved import"));
        assert_eq!(checkpoints.last(), Some(1));
        assert!(h.worker.dispatches_of("c").is_empty());
        assert_eq!(plan.group(2).unwrap().status, GroupStatus::Failed);
        // Back to pending, attempt history kept
        let b = plan.task("b").unwrap();
        assert_eq!(b.status, TaskStatus::Pending);
        assert_eq!(b.attempts.get(&Tier::Basic), Some(&1));
    }

    #[tokio::test]
    async fn test_load_bearing_manual_fails_group() {
        let h = Harness::new(
            |log| ScriptedWorker::new(log).fail_times("a", 10),
            ScriptedVerifier::new,
        );
        let mut plan = plan(&[
            (GroupMode::Parallel, &[("a", Tier::Advanced)]),
            (GroupMode::Parallel, &[("b", Tier::Basic)]),
        ]);

        let (outcome, checkpoints, _) = h.run(&mut plan).await;

        let halt = outcome.halt.unwrap();
        assert_eq!(halt.class, HaltClass::ManualEscalation);
        assert!(halt.reason.contains('a'));
        assert_eq!(h.worker.dispatches_of("a"), vec![Tier::Advanced, Tier::Advanced]);
        assert!(h.worker.dispatches_of("b").is_empty());
        assert_eq!(checkpoints.last(), None);
    }

    #[tokio::test]
    async fn test_manual_halt_keeps_escalation_history() {
        let h = Harness::new(
            |log| ScriptedWorker::new(log).fail_times("a", 10),
            ScriptedVerifier::new,
        );
        let mut plan = plan(&[(GroupMode::Parallel, &[("a", Tier::Advanced), ("b", Tier::Basic)])]);
        let scheduler = h.scheduler(4);
        let mut checkpoints = CheckpointManager::new(h.vcs.clone());
        let mut escalation = EscalationManager::new(&EscalationConfig::default());

        let first = scheduler
            .run(&mut plan, &mut checkpoints, &mut escalation)
            .await
            .unwrap();
        assert_eq!(first.halt.unwrap().class, HaltClass::ManualEscalation);

        let a = plan.task("a").unwrap();
        assert_eq!(a.tier, Tier::Manual);
        assert_eq!(a.status, TaskStatus::Blocked);
        assert_eq!(plan.task("b").unwrap().status, TaskStatus::Pending);
        let state = escalation.state("a").unwrap();
        assert_eq!(state.tier, Tier::Manual);
        assert_eq!(state.tier_history, vec![Tier::Advanced, Tier::Manual]);

        // Still unresolved: the group halts again before dispatching anything
        let calls = h.worker.calls().len();
        let second = scheduler
            .run(&mut plan, &mut checkpoints, &mut escalation)
            .await
            .unwrap();
        assert_eq!(second.halt.unwrap().class, HaltClass::ManualEscalation);
        assert_eq!(h.worker.calls().len(), calls);
        assert_eq!(escalation.state("a").unwrap().tier, Tier::Manual);
        assert_eq!(checkpoints.last(), None);
    }

    #[tokio::test]
    async fn test_hand_resolved_task_commits_without_dispatch() {
        let h = Harness::new(ScriptedWorker::new, ScriptedVerifier::new);
        let mut plan = plan(&[(GroupMode::Parallel, &[("a", Tier::Advanced), ("b", Tier::Basic)])]);
        let a = plan.task_mut("a").unwrap();
        a.tier = Tier::Manual;
        a.status = TaskStatus::Verified;

        let (outcome, checkpoints, _) = h.run(&mut plan).await;

        assert!(outcome.is_complete());
        assert!(h.worker.dispatches_of("a").is_empty());
        assert_eq!(h.worker.dispatches_of("b"), vec![Tier::Basic]);
        assert_eq!(
            checkpoints.extract(1),
            ["a.rs", "b.rs"].iter().map(|s| s.to_string()).collect()
        );
        assert_eq!(plan.task("a").unwrap().tier, Tier::Manual);
    }

    #[tokio::test]
    async fn test_non_load_bearing_manual_is_parked() {
        let h = Harness::new(
            |log| ScriptedWorker::new(log).erroring("metrics"),
            ScriptedVerifier::new,
        );
        let mut plan = plan(&[(
            GroupMode::Parallel,
            &[("core", Tier::Basic), ("metrics", Tier::Advanced)],
        )]);
        plan.task_mut("metrics").unwrap().load_bearing = false;

        let (outcome, checkpoints, _) = h.run(&mut plan).await;

        assert!(outcome.is_complete());
        assert_eq!(outcome.parked, vec!["metrics".to_string()]);
        assert_eq!(
            checkpoints.extract(1),
            ["core.rs".to_string()].into_iter().collect()
        );
        assert_eq!(plan.task("metrics").unwrap().status, TaskStatus::Blocked);
        assert_eq!(plan.task("core").unwrap().status, TaskStatus::Verified);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_dispatch_is_bounded() {
        let h = Harness::new(
            |log| ScriptedWorker::new(log).with_delay(Duration::from_millis(30)),
            ScriptedVerifier::new,
        );
        let tasks: Vec<(String, Tier)> = (0..6).map(|i| (format!("t{}", i), Tier::Basic)).collect();
        let refs: Vec<(&str, Tier)> = tasks.iter().map(|(id, t)| (id.as_str(), *t)).collect();
        let mut plan = plan(&[(GroupMode::Parallel, refs.as_slice())]);

        let mut checkpoints = CheckpointManager::new(h.vcs.clone());
        let mut escalation = EscalationManager::new(&EscalationConfig::default());
        h.scheduler(2)
            .run(&mut plan, &mut checkpoints, &mut escalation)
            .await
            .unwrap();

        assert_eq!(h.worker.calls().len(), 6);
        assert!(h.worker.peak_in_flight() <= 2);
        assert!(h.worker.peak_in_flight() >= 1);
    }

    #[tokio::test]
    async fn test_sequential_group_keeps_declaration_order() {
        let h = Harness::new(ScriptedWorker::new, ScriptedVerifier::new);
        let mut plan = plan(&[(
            GroupMode::Sequential,
            &[("first", Tier::Basic), ("second", Tier::Basic), ("third", Tier::Basic)],
        )]);

        h.run(&mut plan).await;

        assert_eq!(
            h.log.matching("dispatch:"),
            vec![
                "dispatch:first@basic",
                "dispatch:second@basic",
                "dispatch:third@basic"
            ]
        );
        assert_eq!(h.worker.peak_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_run_records_nothing() {
        let h = Harness::new(ScriptedWorker::new, ScriptedVerifier::new);
        let mut plan = plan(&[(GroupMode::Parallel, &[("a", Tier::Basic)])]);
        let scheduler = h.scheduler(4);
        scheduler.cancellation_token().cancel();

        let mut checkpoints = CheckpointManager::new(h.vcs.clone());
        let mut escalation = EscalationManager::new(&EscalationConfig::default());
        let outcome = scheduler
            .run(&mut plan, &mut checkpoints, &mut escalation)
            .await
            .unwrap();

        assert_eq!(outcome.halt.unwrap().class, HaltClass::Cancelled);
        assert!(h.worker.calls().is_empty());
        assert!(h.vcs.commits().is_empty());
        assert_eq!(plan.group(1).unwrap().status, GroupStatus::Pending);
    }

    #[tokio::test]
    async fn test_events_are_streamed() {
        let h = Harness::new(ScriptedWorker::new, ScriptedVerifier::new);
        let mut plan = plan(&[(GroupMode::Parallel, &[("a", Tier::Basic)])]);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut checkpoints = CheckpointManager::new(h.vcs.clone());
        let mut escalation = EscalationManager::new(&EscalationConfig::default());
        h.scheduler(4)
            .with_events(tx)
            .run(&mut plan, &mut checkpoints, &mut escalation)
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.first(), Some(&SchedulerEvent::GroupDispatched { group: 1, tasks: 1 }));
        assert!(matches!(events.last(), Some(SchedulerEvent::GroupCommitted { group: 1, .. })));
    }

    #[tokio::test]
    async fn test_group_must_be_next() {
        let h = Harness::new(ScriptedWorker::new, ScriptedVerifier::new);
        let mut plan = plan(&[
            (GroupMode::Parallel, &[("a", Tier::Basic)]),
            (GroupMode::Parallel, &[("b", Tier::Basic)]),
        ]);
        let mut checkpoints = CheckpointManager::new(h.vcs.clone());
        let mut escalation = EscalationManager::new(&EscalationConfig::default());

        let err = h
            .scheduler(4)
            .run_group(2, &mut plan, &mut checkpoints, &mut escalation)
            .await
            .unwrap_err();
        assert!(matches!(err, CadenceError::GroupOrdering(_)));
    }
}
