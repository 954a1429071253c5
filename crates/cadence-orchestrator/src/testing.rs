//! Scripted collaborators for tests
//!
//! All doubles share an [`EventLog`] so a test can assert on the global order
//! of dispatches, verifications, commits and pushes.

use crate::collaborators::{
    PushAck, Verification, Verifier, VersionControl, Worker, WorkerOutcome, WorkerStatus,
};
use async_trait::async_trait;
use cadence_core::{ArtifactSet, CadenceError, CommitRef, Group, Result, Task, TaskId, Tier};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Ordered record of collaborator calls
///
/// Entries look like `dispatch:<task>@<tier>`, `verify:<group>`,
/// `commit:<group>` and `push`.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: impl Into<String>) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.into());
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Index of the first event equal to `event`
    pub fn position(&self, event: &str) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }

    /// Events starting with `prefix`
    pub fn matching(&self, prefix: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.starts_with(prefix))
            .collect()
    }
}

/// Worker that succeeds unless told otherwise
///
/// Produced artifacts default to the task's targets, or `<id>.out` when the
/// task has none.
#[derive(Default)]
pub struct ScriptedWorker {
    log: EventLog,
    failures: Mutex<HashMap<TaskId, u32>>,
    erroring: BTreeSet<TaskId>,
    artifacts: HashMap<TaskId, ArtifactSet>,
    delay: Option<Duration>,
    calls: Mutex<Vec<(TaskId, Tier)>>,
    inputs: Mutex<HashMap<TaskId, Vec<ArtifactSet>>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedWorker {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    /// Report failure for the first `times` dispatches of `task`
    pub fn fail_times(self, task: &str, times: u32) -> Self {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(task.to_string(), times);
        }
        self
    }

    /// Return an error for every dispatch of `task`
    pub fn erroring(mut self, task: &str) -> Self {
        self.erroring.insert(task.to_string());
        self
    }

    pub fn with_artifacts<I, S>(mut self, task: &str, artifacts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.artifacts
            .insert(task.to_string(), artifacts.into_iter().map(Into::into).collect());
        self
    }

    /// Sleep this long inside every dispatch
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every (task, tier) dispatched, in dispatch order
    pub fn calls(&self) -> Vec<(TaskId, Tier)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn dispatches_of(&self, task: &str) -> Vec<Tier> {
        self.calls()
            .into_iter()
            .filter(|(id, _)| id == task)
            .map(|(_, tier)| tier)
            .collect()
    }

    /// Dependency inputs received by `task`, one per dispatch
    pub fn inputs_of(&self, task: &str) -> Vec<ArtifactSet> {
        self.inputs
            .lock()
            .ok()
            .and_then(|i| i.get(task).cloned())
            .unwrap_or_default()
    }

    /// Highest number of concurrent dispatches observed
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn take_failure(&self, task: &str) -> bool {
        let Ok(mut failures) = self.failures.lock() else {
            return false;
        };
        match failures.get_mut(task) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    async fn execute(&self, task: &Task, dependency_artifacts: &ArtifactSet) -> Result<WorkerOutcome> {
        self.log.record(format!("dispatch:{}@{}", task.id, task.tier));
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((task.id.clone(), task.tier));
        }
        if let Ok(mut inputs) = self.inputs.lock() {
            inputs
                .entry(task.id.clone())
                .or_default()
                .push(dependency_artifacts.clone());
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.erroring.contains(&task.id) {
            return Err(CadenceError::Worker(format!("worker crashed on {}", task.id)));
        }
        if self.take_failure(&task.id) {
            return Ok(WorkerOutcome::failed(format!("{} did not build", task.id)));
        }

        let artifacts = self.artifacts.get(&task.id).cloned().unwrap_or_else(|| {
            if task.targets.is_empty() {
                [format!("{}.out", task.id)].into_iter().collect()
            } else {
                task.targets.clone()
            }
        });
        Ok(WorkerOutcome {
            status: WorkerStatus::Succeeded,
            artifacts,
            diagnostics: Vec::new(),
        })
    }
}

/// Verifier serving queued results per group, then passing
#[derive(Default)]
pub struct ScriptedVerifier {
    log: EventLog,
    scripts: Mutex<HashMap<u32, VecDeque<Result<Verification>>>>,
    checks: Mutex<Vec<(u32, ArtifactSet)>>,
}

impl ScriptedVerifier {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    /// Queue `results` for `group`; once exhausted the group passes
    pub fn script(self, group: u32, results: Vec<Verification>) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts
                .entry(group)
                .or_default()
                .extend(results.into_iter().map(Ok));
        }
        self
    }

    /// Queue a verifier error for `group`
    pub fn error_once(self, group: u32, message: &str) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts
                .entry(group)
                .or_default()
                .push_back(Err(CadenceError::Verifier(message.to_string())));
        }
        self
    }

    /// Every (group, artifacts) checked, in order
    pub fn checks(&self) -> Vec<(u32, ArtifactSet)> {
        self.checks.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Verifier for ScriptedVerifier {
    async fn check(&self, group: &Group, artifacts: &ArtifactSet) -> Result<Verification> {
        self.log.record(format!("verify:{}", group.index));
        if let Ok(mut checks) = self.checks.lock() {
            checks.push((group.index, artifacts.clone()));
        }
        let next = self
            .scripts
            .lock()
            .ok()
            .and_then(|mut s| s.get_mut(&group.index).and_then(VecDeque::pop_front));
        next.unwrap_or_else(|| Ok(Verification::pass()))
    }
}

/// Version-control sink that records commits in memory
#[derive(Default)]
pub struct RecordingVcs {
    log: EventLog,
    failing_commits: BTreeSet<u32>,
    failing_push: bool,
    commits: Mutex<Vec<(u32, ArtifactSet, CommitRef)>>,
    pushes: AtomicUsize,
}

impl RecordingVcs {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub fn failing_commit_for(mut self, group: u32) -> Self {
        self.failing_commits.insert(group);
        self
    }

    pub fn failing_push(mut self) -> Self {
        self.failing_push = true;
        self
    }

    pub fn commits(&self) -> Vec<(u32, ArtifactSet, CommitRef)> {
        self.commits.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn committed_groups(&self) -> Vec<u32> {
        self.commits().into_iter().map(|(g, _, _)| g).collect()
    }

    pub fn push_count(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VersionControl for RecordingVcs {
    async fn commit(&self, group: u32, artifacts: &ArtifactSet, _message: &str) -> Result<CommitRef> {
        if self.failing_commits.contains(&group) {
            return Err(CadenceError::VersionControl(format!(
                "commit rejected for group {}",
                group
            )));
        }
        self.log.record(format!("commit:{}", group));
        let mut commits = self
            .commits
            .lock()
            .map_err(|e| CadenceError::VersionControl(e.to_string()))?;
        let commit_ref = format!("commit-{}", commits.len() + 1);
        commits.push((group, artifacts.clone(), commit_ref.clone()));
        Ok(commit_ref)
    }

    async fn push(&self) -> Result<PushAck> {
        if self.failing_push {
            return Err(CadenceError::VersionControl("remote rejected push".to_string()));
        }
        self.log.record("push");
        let n = self.pushes.fetch_add(1, Ordering::SeqCst) + 1;
        let head = self
            .commits()
            .last()
            .map(|(_, _, r)| r.clone())
            .unwrap_or_default();
        Ok(PushAck {
            remote: format!("memory://push-{}", n),
            head,
        })
    }
}
