//! Core type definitions for Cadence orchestration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Task identifier (unique within a run)
pub type TaskId = String;

/// Catalog key describing the kind of work a task performs
pub type TaskKind = String;

/// Opaque file identifier produced or touched by a task
pub type Artifact = String;

/// Ordered, de-duplicated set of artifacts
pub type ArtifactSet = BTreeSet<Artifact>;

/// Reference returned by the version-control sink for a commit
pub type CommitRef = String;

/// Independent review dimension (security, performance, ...)
pub type ReviewDomain = String;

/// Well-known task kinds used by the builtin catalog
pub mod kinds {
    pub const FOUNDATION_MODEL: &str = "foundation-model";
    pub const CONTRACT: &str = "contract";
    pub const ADAPTER: &str = "adapter";
    pub const ORCHESTRATION_LOGIC: &str = "orchestration-logic";
    pub const INBOUND_ADAPTER: &str = "inbound-adapter";
    pub const OBSERVABILITY: &str = "observability";
    pub const TEST: &str = "test";
    /// Corrective work created from critical review issues
    pub const FIX: &str = "fix";
}

/// Capability tier, ordered along the escalation ladder.
///
/// `Manual` is the top of the ladder and is never assigned by decomposition;
/// a task reaching it waits for human intervention.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Basic,
    #[default]
    Standard,
    Advanced,
    Manual,
}

impl Tier {
    /// The full ladder in ascending order
    pub const LADDER: [Tier; 4] = [Tier::Basic, Tier::Standard, Tier::Advanced, Tier::Manual];

    /// Next rung on the ladder; `Manual` is its own successor
    pub fn next(self) -> Tier {
        match self {
            Self::Basic => Self::Standard,
            Self::Standard => Self::Advanced,
            Self::Advanced | Self::Manual => Self::Manual,
        }
    }

    /// Whether a worker can be dispatched at this tier
    pub fn is_executable(self) -> bool {
        self != Self::Manual
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Basic => write!(f, "basic"),
            Self::Standard => write!(f, "standard"),
            Self::Advanced => write!(f, "advanced"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "basic" => Ok(Self::Basic),
            "standard" => Ok(Self::Standard),
            "advanced" => Ok(Self::Advanced),
            "manual" => Ok(Self::Manual),
            _ => Err(format!("Invalid tier: {}", s)),
        }
    }
}

/// Task status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Verified,
    Failed,
    Escalated,
    /// Waiting for human intervention
    Blocked,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Verified => write!(f, "verified"),
            Self::Failed => write!(f, "failed"),
            Self::Escalated => write!(f, "escalated"),
            Self::Blocked => write!(f, "blocked"),
        }
    }
}

/// A typed unit of work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Tier the next dispatch will run at
    pub tier: Tier,
    /// 1-based group index
    pub group: u32,
    #[serde(default)]
    pub dependencies: BTreeSet<TaskId>,
    #[serde(default)]
    pub targets: BTreeSet<Artifact>,
    #[serde(default)]
    pub status: TaskStatus,
    /// Dispatch count per tier
    #[serde(default)]
    pub attempts: BTreeMap<Tier, u32>,
    /// Whether the owning group's verification depends on this task
    #[serde(default = "default_load_bearing")]
    pub load_bearing: bool,
}

fn default_load_bearing() -> bool {
    true
}

impl Task {
    pub fn new(id: impl Into<String>, kind: impl Into<String>, tier: Tier, group: u32) -> Self {
        let id = id.into();
        Self {
            title: id.clone(),
            id,
            kind: kind.into(),
            description: String::new(),
            tier,
            group,
            dependencies: BTreeSet::new(),
            targets: BTreeSet::new(),
            status: TaskStatus::Pending,
            attempts: BTreeMap::new(),
            load_bearing: true,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.targets = targets.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_load_bearing(mut self, load_bearing: bool) -> Self {
        self.load_bearing = load_bearing;
        self
    }

    /// Record a dispatch at the current tier
    pub fn record_attempt(&mut self) {
        *self.attempts.entry(self.tier).or_insert(0) += 1;
    }

    /// Total dispatches across all tiers
    pub fn total_attempts(&self) -> u32 {
        self.attempts.values().sum()
    }
}

/// How a group dispatches its tasks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupMode {
    /// Tasks run concurrently with no ordering guarantee
    #[default]
    Parallel,
    /// Tasks run one at a time in declaration order
    Sequential,
}

/// Group status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    #[default]
    Pending,
    Dispatched,
    Verifying,
    Committed,
    Failed,
}

impl std::fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Dispatched => write!(f, "dispatched"),
            Self::Verifying => write!(f, "verifying"),
            Self::Committed => write!(f, "committed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// An ordered bucket of tasks sharing a verification boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// 1-based index defining the total order across a run
    pub index: u32,
    pub name: String,
    pub mode: GroupMode,
    /// Check reference handed to the verifier
    pub verification: String,
    #[serde(default)]
    pub status: GroupStatus,
    /// Task ids in dispatch order
    #[serde(default)]
    pub tasks: Vec<TaskId>,
}

impl Group {
    pub fn new(index: u32, name: impl Into<String>, mode: GroupMode) -> Self {
        Self {
            index,
            name: name.into(),
            mode,
            verification: String::new(),
            status: GroupStatus::Pending,
            tasks: Vec::new(),
        }
    }

    pub fn with_verification(mut self, verification: impl Into<String>) -> Self {
        self.verification = verification.into();
        self
    }

    pub fn with_tasks<I, S>(mut self, tasks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tasks = tasks.into_iter().map(Into::into).collect();
        self
    }
}

impl std::fmt::Display for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "G{} ({})", self.index, self.name)
    }
}

/// Immutable record that a group completed and was committed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub group: u32,
    pub artifacts: ArtifactSet,
    pub commit_ref: CommitRef,
    pub committed_at: DateTime<Utc>,
}

/// Classified reason a verification failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Compile,
    /// A dependency that a committed group should have satisfied is absent
    MissingDependency,
    BuildInfra,
    TestFailure,
}

impl ErrorClass {
    /// `MissingDependency` is a halt signal; everything else is retried
    pub fn is_retryable(self) -> bool {
        self != Self::MissingDependency
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Compile => write!(f, "compile"),
            Self::MissingDependency => write!(f, "missing_dependency"),
            Self::BuildInfra => write!(f, "build_infra"),
            Self::TestFailure => write!(f, "test_failure"),
        }
    }
}

/// Issue severity (ordered most severe first)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Medium,
    Low,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Critical => write!(f, "critical"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

/// Verdict of a single review domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Approved,
    Adequate,
    NeedsWork,
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Approved => write!(f, "approved"),
            Self::Adequate => write!(f, "adequate"),
            Self::NeedsWork => write!(f, "needs_work"),
        }
    }
}

/// Review score as numerator/denominator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub earned: u32,
    pub possible: u32,
}

impl Score {
    pub fn new(earned: u32, possible: u32) -> Self {
        Self { earned, possible }
    }

    /// Ratio in 0.0..=1.0 (0.0 when nothing was possible)
    pub fn ratio(&self) -> f32 {
        if self.possible == 0 {
            0.0
        } else {
            self.earned as f32 / self.possible as f32
        }
    }
}

impl std::ops::Add for Score {
    type Output = Score;

    /// Saturates at `u32::MAX`
    fn add(self, rhs: Score) -> Score {
        Score::new(
            self.earned.saturating_add(rhs.earned),
            self.possible.saturating_add(rhs.possible),
        )
    }
}

impl std::fmt::Display for Score {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.earned, self.possible)
    }
}

/// A single finding from a reviewer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewIssue {
    pub id: String,
    pub description: String,
    pub severity: Severity,
}

impl ReviewIssue {
    pub fn new(id: impl Into<String>, description: impl Into<String>, severity: Severity) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            severity,
        }
    }
}

/// Output of one review domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewReport {
    pub domain: ReviewDomain,
    pub score: Score,
    pub status: ReviewStatus,
    #[serde(default)]
    pub issues: Vec<ReviewIssue>,
}

impl ReviewReport {
    pub fn new(domain: impl Into<String>, score: Score, status: ReviewStatus) -> Self {
        Self {
            domain: domain.into(),
            score,
            status,
            issues: Vec::new(),
        }
    }

    pub fn with_issue(mut self, issue: ReviewIssue) -> Self {
        self.issues.push(issue);
        self
    }

    pub fn has_critical(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Critical)
    }
}

/// Lifecycle phases, in their mandatory order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Plan,
    Decompose,
    Implement,
    Review,
    Fix,
    Finalize,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::Plan,
        Phase::Decompose,
        Phase::Implement,
        Phase::Review,
        Phase::Fix,
        Phase::Finalize,
    ];

    /// The phase that follows this one, if any
    pub fn next(self) -> Option<Phase> {
        let idx = Self::ALL.iter().position(|p| *p == self)?;
        Self::ALL.get(idx + 1).copied()
    }

    pub fn first() -> Phase {
        Phase::Plan
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plan => write!(f, "plan"),
            Self::Decompose => write!(f, "decompose"),
            Self::Implement => write!(f, "implement"),
            Self::Review => write!(f, "review"),
            Self::Fix => write!(f, "fix"),
            Self::Finalize => write!(f, "finalize"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_ladder_order() {
        assert!(Tier::Basic < Tier::Standard);
        assert!(Tier::Standard < Tier::Advanced);
        assert!(Tier::Advanced < Tier::Manual);
        assert_eq!(Tier::Basic.next(), Tier::Standard);
        assert_eq!(Tier::Advanced.next(), Tier::Manual);
        assert_eq!(Tier::Manual.next(), Tier::Manual);
        assert!(!Tier::Manual.is_executable());
    }

    #[test]
    fn test_tier_parsing() {
        assert_eq!("Advanced".parse::<Tier>().unwrap(), Tier::Advanced);
        assert!("expert".parse::<Tier>().is_err());
    }

    #[test]
    fn test_phase_sequence() {
        assert_eq!(Phase::first(), Phase::Plan);
        assert_eq!(Phase::Review.next(), Some(Phase::Fix));
        assert_eq!(Phase::Finalize.next(), None);
        let mut walked = vec![Phase::first()];
        while let Some(next) = walked.last().and_then(|p| p.next()) {
            walked.push(next);
        }
        assert_eq!(walked, Phase::ALL.to_vec());
    }

    #[test]
    fn test_task_attempts_per_tier() {
        let mut task = Task::new("t1", kinds::ADAPTER, Tier::Basic, 2);
        task.record_attempt();
        task.record_attempt();
        task.tier = Tier::Standard;
        task.record_attempt();
        assert_eq!(task.attempts[&Tier::Basic], 2);
        assert_eq!(task.attempts[&Tier::Standard], 1);
        assert_eq!(task.total_attempts(), 3);
    }

    #[test]
    fn test_score_sum_and_ratio() {
        let total = Score::new(8, 10) + Score::new(3, 5);
        assert_eq!(total, Score::new(11, 15));
        assert_eq!(total.to_string(), "11/15");
        assert_eq!(Score::default().ratio(), 0.0);
    }

    #[test]
    fn test_error_class_retryable() {
        assert!(ErrorClass::Compile.is_retryable());
        assert!(ErrorClass::TestFailure.is_retryable());
        assert!(ErrorClass::BuildInfra.is_retryable());
        assert!(!ErrorClass::MissingDependency.is_retryable());
    }

    #[test]
    fn test_task_deserializes_with_defaults() {
        let json = r#"{"id":"t1","kind":"contract","title":"API","tier":"standard","group":2}"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.load_bearing);
        assert!(task.dependencies.is_empty());
    }
}
