//! Phase controller
//!
//! Owns a run's [`RunState`] and drives it through
//! plan -> decompose -> implement -> review -> fix -> finalize. Control flow
//! is decided by the pure [`transition`] function; this module performs the
//! actions it returns and turns phase results back into events.

use crate::activity_log::ActivityLog;
use crate::checkpoint::CheckpointManager;
use crate::collaborators::{Verifier, VersionControl, Worker};
use crate::escalation::EscalationManager;
use crate::outcome::{
    Checklist, ChecklistCategory, Component, HaltClass, HaltReport, RunOutcome, RunStatus,
};
use crate::phases::{check_exit, describe};
use crate::run_state::{RunState, RunStore};
use crate::scheduler::{GroupOutcome, GroupScheduler, SchedulerEvent};
use crate::state_machine::{transition, Action, Event, Limits, State};
use cadence_core::{
    kinds, CadenceConfig, CadenceError, Group, GroupMode, Phase, Result, Severity, Task,
    TaskId, TaskStatus, Tier,
};
use cadence_planning::{Catalog, Decomposer, WorkItem};
use cadence_review::{ReviewAggregator, Reviewer};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// External collaborators a run talks to
#[derive(Clone)]
pub struct Collaborators {
    pub worker: Arc<dyn Worker>,
    pub verifier: Arc<dyn Verifier>,
    pub vcs: Arc<dyn VersionControl>,
    pub reviewer: Arc<dyn Reviewer>,
}

/// Live pieces of a run between barriers
struct Session {
    run: RunState,
    checkpoints: CheckpointManager,
    escalation: EscalationManager,
    log: ActivityLog,
    /// Actions returned by the state machine, performed in order
    queue: VecDeque<Action>,
    persisted: bool,
    /// Re-review before judging the fix phase (set when resuming into it)
    refresh_review: bool,
}

pub struct PhaseController {
    config: CadenceConfig,
    catalog: Catalog,
    collaborators: Collaborators,
    store: RunStore,
    cancel: CancellationToken,
    events: Option<mpsc::UnboundedSender<SchedulerEvent>>,
}

impl PhaseController {
    pub fn new(
        config: CadenceConfig,
        catalog: Catalog,
        collaborators: Collaborators,
        store: RunStore,
    ) -> Self {
        Self {
            config,
            catalog,
            collaborators,
            store,
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

    pub fn store(&self) -> &RunStore {
        &self.store
    }

    /// Start a new run for `work_item`
    #[instrument(skip_all, fields(work_item = %work_item.name))]
    pub async fn run(&self, work_item: WorkItem) -> Result<RunOutcome> {
        let run_id = new_run_id();
        info!(run = %run_id, "Starting run");

        let run = RunState::new(&run_id, work_item, &self.catalog.version);
        let mut session = Session {
            checkpoints: CheckpointManager::new(Arc::clone(&self.collaborators.vcs)),
            escalation: EscalationManager::new(&self.config.escalation),
            log: ActivityLog::new(self.store.dir(), &run_id),
            run,
            queue: VecDeque::new(),
            persisted: false,
            refresh_review: false,
        };
        session
            .log
            .log_run_start(&run_id, &session.run.work_item.name, false)
            .await;

        self.step(&mut session, Event::Start);
        self.drive(&mut session).await;
        Ok(self.finish(&mut session).await)
    }

    /// Continue a stored run from its last barrier
    #[instrument(skip(self))]
    pub async fn resume(&self, run_id: &str) -> Result<RunOutcome> {
        let mut run = self.store.load(run_id).await?;
        if run.catalog_version != self.catalog.version {
            warn!(
                run = run_id,
                stored = %run.catalog_version,
                current = %self.catalog.version,
                "Catalog changed since the run started; continuing with the stored plan"
            );
        }

        let checkpoints = CheckpointManager::restore(
            Arc::clone(&self.collaborators.vcs),
            run.checkpoints.clone(),
        )?;
        let escalation = EscalationManager::restore(&self.config.escalation, run.escalations.clone());

        let resume_phase = match &run.lifecycle {
            State::Complete => None,
            State::Idle | State::Halted { phase: None, .. } => Some(None),
            State::Active { phase, .. }
            | State::Paused { phase, .. }
            | State::Halted {
                phase: Some(phase), ..
            } => Some(Some(*phase)),
        };
        let Some(resume_phase) = resume_phase else {
            info!(run = run_id, "Run already complete");
            let log = ActivityLog::new(self.store.dir(), run_id);
            let session = Session {
                run,
                checkpoints,
                escalation,
                log,
                queue: VecDeque::new(),
                persisted: true,
                refresh_review: false,
            };
            return Ok(self.outcome(&session));
        };

        info!(
            run = run_id,
            phase = ?resume_phase,
            next_group = checkpoints.next_group(),
            "Resuming run"
        );
        let manual_pause = run
            .halt
            .as_ref()
            .is_some_and(|h| h.class == HaltClass::ManualEscalation);
        let resolved = if manual_pause {
            accept_manual_resolution(&mut run, checkpoints.next_group())
        } else {
            Vec::new()
        };
        run.halt = None;
        let mut session = Session {
            log: ActivityLog::new(self.store.dir(), run_id),
            run,
            checkpoints,
            escalation,
            queue: VecDeque::new(),
            persisted: false,
            refresh_review: resume_phase == Some(Phase::Fix),
        };
        session
            .log
            .log_run_start(run_id, &session.run.work_item.name, true)
            .await;
        if !resolved.is_empty() {
            info!(tasks = ?resolved, "Accepting manual resolution");
            session
                .log
                .log_message(&format!("Resolved by hand: {}", resolved.join(", ")))
                .await;
        }

        match resume_phase {
            Some(phase) => {
                session.run.lifecycle = State::Active {
                    phase,
                    cycle: session.run.corrective_cycles,
                };
                session.queue.push_back(Action::EnterPhase { phase });
            }
            None => {
                session.run.lifecycle = State::Idle;
                self.step(&mut session, Event::Start);
            }
        }
        self.drive(&mut session).await;
        Ok(self.finish(&mut session).await)
    }

    /// Perform queued actions until the state machine stops producing them
    async fn drive(&self, session: &mut Session) {
        while let Some(action) = session.queue.pop_front() {
            self.perform(session, action).await;
        }
    }

    /// Feed one event to the state machine and queue the resulting actions
    fn step(&self, session: &mut Session, event: Event) {
        let limits = Limits {
            max_corrective_cycles: self.config.lifecycle.max_corrective_cycles,
        };
        let completed = match &event {
            Event::ExitCriterionMet { phase } => Some(*phase),
            _ => None,
        };

        let (next, actions) = transition(session.run.lifecycle.clone(), event, &limits);
        if let (Some(phase), false) = (completed, matches!(next, State::Halted { .. })) {
            if let Err(e) = session.run.phases.complete(phase) {
                error!(error = %e, "Phase ledger rejected completion");
            }
        }
        if let State::Halted { reason, .. } = &next {
            if session.run.halt.is_none() {
                session.run.halt = Some(HaltReport::new(
                    Component::Controller,
                    HaltClass::Structural,
                    reason.clone(),
                    session.checkpoints.last(),
                ));
            }
        }
        session.run.lifecycle = next;
        session.queue.extend(actions);
    }

    async fn perform(&self, session: &mut Session, action: Action) {
        match action {
            Action::EnterPhase { phase } => {
                info!(phase = %phase, criterion = describe(phase), "Entering phase");
                session.log.log_phase(phase).await;
                let event = self.execute_phase(session, phase).await;
                self.step(session, event);
            }
            Action::BeginCorrectiveCycle { cycle } => {
                let event = self.corrective_cycle(session, cycle).await;
                self.step(session, event);
            }
            Action::EscalateToManual { reason } => {
                warn!(reason = %reason, "Manual resolution required");
                if session.run.halt.is_none() {
                    let (component, class) = match session.run.current_phase() {
                        Some(Phase::Fix) => (Component::Review, HaltClass::ReviewNoGo),
                        _ => (Component::Escalation, HaltClass::ManualEscalation),
                    };
                    session.run.halt = Some(HaltReport::new(
                        component,
                        class,
                        reason,
                        session.checkpoints.last(),
                    ));
                }
            }
            Action::PersistRunState => {
                self.persist(session).await;
            }
            Action::LogActivity { message } => {
                session.log.log_message(&message).await;
            }
        }
    }

    async fn execute_phase(&self, session: &mut Session, phase: Phase) -> Event {
        let result = match phase {
            Phase::Plan => Ok(None),
            Phase::Decompose => self.decompose(session),
            Phase::Implement => self.implement(session).await,
            Phase::Review => {
                self.review(session).await;
                Ok(None)
            }
            Phase::Fix => {
                let mut pending = Ok(None);
                if std::mem::take(&mut session.refresh_review) {
                    // A corrective group that stopped before its commit runs first
                    pending = self.run_pending_groups(session).await;
                    if matches!(pending, Ok(None)) {
                        self.review(session).await;
                    }
                }
                if matches!(pending, Ok(None)) {
                    let critical = session
                        .run
                        .review
                        .as_ref()
                        .map(|r| r.critical_count())
                        .unwrap_or(0);
                    if critical > 0 {
                        return Event::ReviewNoGo { critical };
                    }
                }
                pending
            }
            Phase::Finalize => self.finalize(session).await,
        };

        match result {
            Ok(Some(report)) => self.stop(session, phase, report).await,
            Ok(None) => {
                match check_exit(phase, &session.run, self.config.lifecycle.push_on_finalize) {
                    Ok(()) => Event::ExitCriterionMet { phase },
                    Err(unmet) => {
                        let report = HaltReport::new(
                            Component::Controller,
                            HaltClass::Structural,
                            format!("{} exit criterion unmet: {}", phase, unmet),
                            session.checkpoints.last(),
                        );
                        self.stop(session, phase, report).await
                    }
                }
            }
            Err(e) => {
                let component = match phase {
                    Phase::Plan | Phase::Decompose => Component::Decomposer,
                    Phase::Implement => Component::Scheduler,
                    Phase::Review | Phase::Fix => Component::Review,
                    Phase::Finalize => Component::VersionControl,
                };
                let report = HaltReport::new(
                    component,
                    HaltClass::Structural,
                    e.to_string(),
                    session.checkpoints.last(),
                );
                self.stop(session, phase, report).await
            }
        }
    }

    /// Record a halt report and pick the matching event
    async fn stop(&self, session: &mut Session, phase: Phase, report: HaltReport) -> Event {
        error!(report = %report, "Run stopped");
        session.log.log_halt(&report).await;
        let reason = report.to_string();
        let pause = matches!(
            report.class,
            HaltClass::ManualEscalation | HaltClass::ReviewNoGo
        );
        session.run.halt = Some(report);
        if pause {
            Event::ExitCriterionUnmet { phase, reason }
        } else {
            Event::Halt { reason }
        }
    }

    fn decompose(&self, session: &mut Session) -> Result<Option<HaltReport>> {
        if session.run.plan.is_some() {
            return Ok(None);
        }
        let decomposer =
            Decomposer::new(&self.catalog).with_review_domains(self.config.review.domains.clone());
        let plan = decomposer.decompose(&session.run.work_item)?;
        info!(
            groups = plan.groups.len(),
            tasks = plan.tasks.len(),
            "Decomposed work item"
        );
        info!("\n{}", decomposer.summarize(&plan));
        for task in &plan.tasks {
            session.escalation.register(task);
        }
        session.run.plan = Some(plan);
        Ok(None)
    }

    async fn implement(&self, session: &mut Session) -> Result<Option<HaltReport>> {
        if let Some(report) = self.run_pending_groups(session).await? {
            return Ok(Some(report));
        }

        if session.escalation.needs_catalog_review() {
            warn!(
                ratio = session.escalation.escalation_ratio(),
                threshold = self.config.escalation.ratio_threshold,
                "Escalation ratio above threshold; catalog tiers may need review"
            );
        }
        Ok(None)
    }

    /// Run every group after the last checkpoint, stopping at the first halt
    async fn run_pending_groups(&self, session: &mut Session) -> Result<Option<HaltReport>> {
        let last = session
            .run
            .plan
            .as_ref()
            .map(|p| p.last_group_index())
            .unwrap_or(0);

        for index in session.checkpoints.next_group()..=last {
            match self.run_group(session, index).await? {
                GroupOutcome::Committed { .. } => {}
                GroupOutcome::Halted(report) => return Ok(Some(report)),
            }
        }
        Ok(None)
    }

    /// Run one group and persist at its barrier
    async fn run_group(&self, session: &mut Session, index: u32) -> Result<GroupOutcome> {
        let scheduler = self.scheduler();
        let plan = session
            .run
            .plan
            .as_mut()
            .ok_or_else(|| CadenceError::Phase("no plan to schedule".to_string()))?;
        let before = session.escalation.states().clone();
        let outcome = scheduler
            .run_group(index, plan, &mut session.checkpoints, &mut session.escalation)
            .await?;

        if let GroupOutcome::Committed {
            group,
            commit_ref,
            parked,
        } = &outcome
        {
            for (task, state) in session.escalation.states() {
                let from = before.get(task).map(|s| s.tier).unwrap_or(state.tier);
                if state.tier != from {
                    session.log.log_escalation(task, from, state.tier).await;
                }
            }
            session
                .log
                .log_group_committed(*group, commit_ref, parked)
                .await;
            self.persist(session).await;
        }
        Ok(outcome)
    }

    async fn review(&self, session: &mut Session) {
        let Some(plan) = session.run.plan.as_ref() else {
            return;
        };
        let artifacts = session.checkpoints.extract(plan.last_group_index());
        let aggregator = ReviewAggregator::new(Arc::clone(&self.collaborators.reviewer));
        let review = aggregator.review(&plan.review_tiers, &artifacts).await;
        session.log.log_review(&review).await;
        session.run.review = Some(review);
    }

    /// Schedule one corrective group for the current critical issues, then
    /// review again
    async fn corrective_cycle(&self, session: &mut Session, cycle: u32) -> Event {
        info!(cycle, "Starting corrective cycle");
        session.run.corrective_cycles = cycle;

        let index = match self.append_corrective_group(session, cycle) {
            Ok(index) => index,
            Err(e) => {
                let report = HaltReport::new(
                    Component::Controller,
                    HaltClass::Structural,
                    e.to_string(),
                    session.checkpoints.last(),
                );
                return self.stop(session, Phase::Fix, report).await;
            }
        };

        match self.run_group(session, index).await {
            Ok(GroupOutcome::Committed { .. }) => {}
            Ok(GroupOutcome::Halted(report)) => return self.stop(session, Phase::Fix, report).await,
            Err(e) => {
                let report = HaltReport::new(
                    Component::Scheduler,
                    HaltClass::Structural,
                    e.to_string(),
                    session.checkpoints.last(),
                );
                return self.stop(session, Phase::Fix, report).await;
            }
        }

        self.review(session).await;
        self.execute_phase(session, Phase::Fix).await
    }

    /// One sequential `fix` task per critical issue, at that domain's review tier
    fn append_corrective_group(&self, session: &mut Session, cycle: u32) -> Result<u32> {
        let review = session
            .run
            .review
            .as_ref()
            .ok_or_else(|| CadenceError::Phase("no review to correct".to_string()))?;
        let plan = session
            .run
            .plan
            .as_mut()
            .ok_or_else(|| CadenceError::Phase("no plan to extend".to_string()))?;

        let index = plan.last_group_index() + 1;
        let verification = plan
            .groups
            .last()
            .map(|g| g.verification.clone())
            .unwrap_or_default();
        let tasks: Vec<Task> = review
            .issues_with(Severity::Critical)
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let tier = plan
                    .review_tiers
                    .get(&entry.domain)
                    .copied()
                    .filter(|t| t.is_executable())
                    .unwrap_or(Tier::Standard);
                Task::new(format!("fix-{}-{}", cycle, i + 1), kinds::FIX, tier, index)
                    .with_title(format!("Fix {}", entry.issue.id))
                    .with_description(format!(
                        "[{}] {}: {}",
                        entry.domain, entry.issue.id, entry.issue.description
                    ))
            })
            .collect();
        if tasks.is_empty() {
            return Err(CadenceError::Phase(
                "corrective cycle requested without critical issues".to_string(),
            ));
        }

        let group = Group::new(index, format!("fix-{}", cycle), GroupMode::Sequential)
            .with_verification(verification);
        plan.append_group(group, tasks)?;
        for task in plan.tasks_in(index) {
            session.escalation.register(task);
        }
        Ok(index)
    }

    async fn finalize(&self, session: &mut Session) -> Result<Option<HaltReport>> {
        if self.config.lifecycle.push_on_finalize && session.run.push.is_none() {
            match self.collaborators.vcs.push().await {
                Ok(ack) => {
                    info!(remote = %ack.remote, head = %ack.head, "Pushed");
                    session.run.push = Some(ack);
                }
                Err(e) => {
                    return Ok(Some(HaltReport::new(
                        Component::VersionControl,
                        HaltClass::PushFailed,
                        e.to_string(),
                        session.checkpoints.last(),
                    )))
                }
            }
        }
        if !self.persist(session).await {
            return Ok(Some(HaltReport::new(
                Component::Persistence,
                HaltClass::PersistFailed,
                format!("could not write {}", self.store.path(&session.run.run_id).display()),
                session.checkpoints.last(),
            )));
        }
        Ok(None)
    }

    /// Write the run state; returns whether it reached disk
    async fn persist(&self, session: &mut Session) -> bool {
        session.run.checkpoints = session.checkpoints.checkpoints().to_vec();
        session.run.escalations = session.escalation.states().clone();
        match self.store.save(&mut session.run).await {
            Ok(_) => {
                session.persisted = true;
                true
            }
            Err(e) => {
                error!(run = %session.run.run_id, error = %e, "Failed to persist run state");
                session.persisted = false;
                false
            }
        }
    }

    async fn finish(&self, session: &mut Session) -> RunOutcome {
        if !matches!(session.run.lifecycle, State::Complete) {
            self.persist(session).await;
        }
        let outcome = self.outcome(session);
        info!(run = %outcome.run_id, status = %outcome.status, "Run finished");
        session.log.log_outcome(&outcome).await;
        outcome
    }

    fn outcome(&self, session: &Session) -> RunOutcome {
        let run = &session.run;
        let mut checklist = Checklist::default();

        for phase in Phase::ALL {
            checklist.record(
                Checklist::phase_item(phase),
                ChecklistCategory::Phase,
                run.phases.is_completed(phase),
            );
        }

        let parked: Vec<String> = run
            .plan
            .iter()
            .flat_map(|p| p.tasks.iter())
            .filter(|t| t.status == TaskStatus::Blocked)
            .map(|t| t.id.clone())
            .collect();
        let manual_halt = run
            .halt
            .as_ref()
            .is_some_and(|h| h.class == HaltClass::ManualEscalation);

        checklist.record(
            Checklist::NO_CRITICAL_ISSUES,
            ChecklistCategory::QualityGate,
            run.review.as_ref().is_some_and(|r| r.critical_count() == 0),
        );
        checklist.record(
            Checklist::ESCALATION_RATIO,
            ChecklistCategory::QualityGate,
            !session.escalation.needs_catalog_review(),
        );
        checklist.record(
            Checklist::NO_MANUAL_TASKS,
            ChecklistCategory::QualityGate,
            parked.is_empty() && !manual_halt,
        );
        checklist.record(
            Checklist::ALL_GROUPS_COMMITTED,
            ChecklistCategory::Persistence,
            check_exit(Phase::Implement, run, false).is_ok(),
        );
        checklist.record(
            Checklist::RUN_STATE_PERSISTED,
            ChecklistCategory::Persistence,
            session.persisted,
        );
        checklist.record(
            Checklist::PUSHED,
            ChecklistCategory::Persistence,
            run.push.is_some() || !self.config.lifecycle.push_on_finalize,
        );

        let mut reasons = Vec::new();
        if let Some(halt) = &run.halt {
            reasons.push(halt.to_string());
        } else if !matches!(run.lifecycle, State::Complete) {
            reasons.push(format!("run stopped in state {:?}", run.lifecycle));
        }
        if !parked.is_empty() {
            reasons.push(format!(
                "manual intervention pending for: {}",
                parked.join(", ")
            ));
        }
        let status = if reasons.is_empty() {
            RunStatus::Complete
        } else {
            RunStatus::Incomplete { reasons }
        };

        RunOutcome {
            run_id: run.run_id.clone(),
            status,
            checklist,
            halt: run.halt.clone(),
        }
    }

    fn scheduler(&self) -> GroupScheduler {
        let scheduler = GroupScheduler::new(
            Arc::clone(&self.collaborators.worker),
            Arc::clone(&self.collaborators.verifier),
            &self.config.scheduler,
        )
        .with_cancellation(self.cancel.clone());
        match &self.events {
            Some(tx) => scheduler.with_events(tx.clone()),
            None => scheduler,
        }
    }
}

/// Mark load-bearing Manual tasks of uncommitted groups as resolved by hand.
///
/// Their tier and escalation history stay at Manual.
fn accept_manual_resolution(run: &mut RunState, from_group: u32) -> Vec<TaskId> {
    let Some(plan) = run.plan.as_mut() else {
        return Vec::new();
    };
    plan.tasks
        .iter_mut()
        .filter(|t| t.group >= from_group && t.load_bearing)
        .filter(|t| t.tier == Tier::Manual && t.status == TaskStatus::Blocked)
        .map(|t| {
            t.status = TaskStatus::Verified;
            t.id.clone()
        })
        .collect()
}

fn new_run_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("run-{}", &id[..12])
}
