//! Boundary collaborators: workers, verifiers, and the version-control sink
//!
//! The orchestrator only depends on these traits. Implementations must be
//! stateless across invocations as far as the orchestrator is concerned, and
//! workers must tolerate being re-invoked for the same task on retry.

use async_trait::async_trait;
use cadence_core::{ArtifactSet, CommitRef, ErrorClass, Group, Result, Task, TaskId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Whether a worker believes its task succeeded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Succeeded,
    Failed,
}

/// Result of executing one task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerOutcome {
    pub status: WorkerStatus,
    pub artifacts: ArtifactSet,
    #[serde(default)]
    pub diagnostics: Vec<String>,
}

impl WorkerOutcome {
    pub fn succeeded<I, S>(artifacts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            status: WorkerStatus::Succeeded,
            artifacts: artifacts.into_iter().map(Into::into).collect(),
            diagnostics: Vec::new(),
        }
    }

    pub fn failed(diagnostic: impl Into<String>) -> Self {
        Self {
            status: WorkerStatus::Failed,
            artifacts: ArtifactSet::new(),
            diagnostics: vec![diagnostic.into()],
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == WorkerStatus::Succeeded
    }
}

/// Result of checking a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    pub passed: bool,
    pub error_class: Option<ErrorClass>,
    /// Tasks the verifier blames; empty means "not attributed"
    #[serde(default)]
    pub failing_tasks: BTreeSet<TaskId>,
    #[serde(default)]
    pub diagnostics: Vec<String>,
}

impl Verification {
    pub fn pass() -> Self {
        Self {
            passed: true,
            error_class: None,
            failing_tasks: BTreeSet::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn fail(class: ErrorClass) -> Self {
        Self {
            passed: false,
            error_class: Some(class),
            failing_tasks: BTreeSet::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn blaming<I, S>(mut self, tasks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failing_tasks = tasks.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_diagnostic(mut self, diagnostic: impl Into<String>) -> Self {
        self.diagnostics.push(diagnostic.into());
        self
    }

    /// Error class of a failure; an unclassified failure counts as compile
    pub fn class(&self) -> ErrorClass {
        self.error_class.unwrap_or(ErrorClass::Compile)
    }
}

/// Acknowledgement that a push is durable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushAck {
    pub remote: String,
    pub head: CommitRef,
}

/// Executes one task
#[async_trait]
pub trait Worker: Send + Sync {
    /// Run `task` with read-only artifacts of every committed earlier group
    async fn execute(&self, task: &Task, dependency_artifacts: &ArtifactSet)
        -> Result<WorkerOutcome>;
}

/// Runs a group's project-defined check
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn check(&self, group: &Group, artifacts: &ArtifactSet) -> Result<Verification>;
}

/// Durable sink for checkpoints
#[async_trait]
pub trait VersionControl: Send + Sync {
    async fn commit(&self, group: u32, artifacts: &ArtifactSet, message: &str)
        -> Result<CommitRef>;

    async fn push(&self) -> Result<PushAck>;
}
