//! Process-backed collaborators
//!
//! `sh -c` workers, verifiers and reviewers plus a git checkpoint sink. These
//! are what the CLI wires into a [`crate::PhaseController`]; tests use the
//! scripted doubles in [`crate::testing`] instead.

use crate::collaborators::{PushAck, Verification, Verifier, VersionControl, Worker, WorkerOutcome};
use async_trait::async_trait;
use cadence_core::config::{CommandConfig, VerificationConfig};
use cadence_core::{
    ArtifactSet, CadenceError, CommitRef, ErrorClass, Group, Result, ReviewReport, Task, Tier,
};
use cadence_review::Reviewer;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

/// Longest stdout/stderr excerpt kept in diagnostics
const MAX_OUTPUT_CHARS: usize = 4000;

/// Worker stdout lines with this prefix name produced artifacts
const ARTIFACT_PREFIX: &str = "artifact:";

/// Output of one shell invocation
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Truncated stdout and stderr for logs and diagnostics
    pub fn excerpt(&self) -> String {
        format!(
            "STDOUT:\n{}\n\nSTDERR:\n{}",
            truncate(self.stdout.trim(), MAX_OUTPUT_CHARS),
            truncate(self.stderr.trim(), MAX_OUTPUT_CHARS)
        )
    }
}

/// Run `command` through `sh -c` in `cwd`
///
/// A command that outlives `timeout` is killed and reported with
/// `timed_out` set; failing to spawn at all is an error.
async fn run_shell(
    command: &str,
    cwd: &Path,
    env: &[(&str, String)],
    timeout: Option<Duration>,
) -> std::io::Result<CommandOutput> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .kill_on_drop(true);
    for (key, value) in env {
        cmd.env(key, value);
    }

    let output = cmd.output();
    let output = match timeout {
        Some(limit) => match tokio::time::timeout(limit, output).await {
            Ok(output) => output?,
            Err(_) => {
                return Ok(CommandOutput {
                    stdout: String::new(),
                    stderr: format!("timed out after {}s", limit.as_secs()),
                    success: false,
                    timed_out: true,
                })
            }
        },
        None => output.await?,
    };

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        success: output.status.success(),
        timed_out: false,
    })
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let cut: String = s.chars().take(max).collect();
        format!("{}...[truncated]", cut)
    } else {
        s.to_string()
    }
}

fn join_artifacts(artifacts: &ArtifactSet) -> String {
    artifacts.iter().cloned().collect::<Vec<_>>().join("\n")
}

fn required_command(config: &CommandConfig, what: &str) -> Result<String> {
    config
        .command
        .clone()
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| CadenceError::Config(format!("{}.command is not set", what)))
}

/// Runs each task through a configured shell command
///
/// The task is described in `CADENCE_*` environment variables. Lines of the
/// form `artifact: <path>` on stdout name the produced artifacts; without
/// any, the task's declared targets are assumed.
#[derive(Debug, Clone)]
pub struct ShellWorker {
    command: String,
    repo_root: PathBuf,
    timeout: Option<Duration>,
}

impl ShellWorker {
    pub fn new(command: impl Into<String>, repo_root: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            repo_root: repo_root.into(),
            timeout: None,
        }
    }

    pub fn from_config(config: &CommandConfig, repo_root: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self::new(required_command(config, "worker")?, repo_root)
            .with_timeout(config.timeout_secs.map(Duration::from_secs)))
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn env(task: &Task, dependency_artifacts: &ArtifactSet) -> Vec<(&'static str, String)> {
        vec![
            ("CADENCE_TASK_ID", task.id.clone()),
            ("CADENCE_TASK_KIND", task.kind.clone()),
            ("CADENCE_TASK_TIER", task.tier.to_string()),
            ("CADENCE_TASK_GROUP", task.group.to_string()),
            ("CADENCE_TASK_TITLE", task.title.clone()),
            ("CADENCE_TASK_DESCRIPTION", task.description.clone()),
            ("CADENCE_TASK_TARGETS", join_artifacts(&task.targets)),
            ("CADENCE_DEPENDENCY_ARTIFACTS", join_artifacts(dependency_artifacts)),
        ]
    }
}

#[async_trait]
impl Worker for ShellWorker {
    #[instrument(skip_all, fields(task = %task.id, tier = %task.tier))]
    async fn execute(
        &self,
        task: &Task,
        dependency_artifacts: &ArtifactSet,
    ) -> Result<WorkerOutcome> {
        let env = Self::env(task, dependency_artifacts);
        let output = run_shell(&self.command, &self.repo_root, &env, self.timeout)
            .await
            .map_err(|e| CadenceError::Worker(format!("Failed to run worker command: {}", e)))?;

        if !output.success {
            debug!(task = %task.id, timed_out = output.timed_out, "Worker command failed");
            return Ok(WorkerOutcome::failed(output.excerpt()));
        }

        let produced: ArtifactSet = output
            .stdout
            .lines()
            .filter_map(|line| line.trim().strip_prefix(ARTIFACT_PREFIX))
            .map(|path| path.trim().to_string())
            .filter(|path| !path.is_empty())
            .collect();
        let artifacts = if produced.is_empty() {
            task.targets.clone()
        } else {
            produced
        };
        Ok(WorkerOutcome::succeeded(artifacts))
    }
}

/// Compiled classification patterns
#[derive(Debug, Clone)]
struct Classifier {
    missing_dependency: Vec<Regex>,
    build_infra: Vec<Regex>,
    test_failure: Vec<Regex>,
}

impl Classifier {
    fn compile(config: &VerificationConfig) -> Result<Self> {
        let compile_all = |patterns: &[String]| -> Result<Vec<Regex>> {
            patterns
                .iter()
                .map(|p| {
                    Regex::new(p).map_err(|e| {
                        CadenceError::Config(format!("Invalid verification pattern '{}': {}", p, e))
                    })
                })
                .collect()
        };
        Ok(Self {
            missing_dependency: compile_all(&config.missing_dependency)?,
            build_infra: compile_all(&config.build_infra)?,
            test_failure: compile_all(&config.test_failure)?,
        })
    }

    fn classify(&self, text: &str) -> ErrorClass {
        let hit = |patterns: &[Regex]| patterns.iter().any(|re| re.is_match(text));
        if hit(&self.missing_dependency) {
            ErrorClass::MissingDependency
        } else if hit(&self.build_infra) {
            ErrorClass::BuildInfra
        } else if hit(&self.test_failure) {
            ErrorClass::TestFailure
        } else {
            ErrorClass::Compile
        }
    }
}

/// Runs a group's `verification` command through `sh -c`
///
/// A group with no verification command passes. Failures are classified by
/// matching the combined output against [`VerificationConfig`] patterns, and
/// blame the group's tasks whose ids appear in that output.
#[derive(Debug, Clone)]
pub struct ShellVerifier {
    repo_root: PathBuf,
    classifier: Classifier,
    timeout: Option<Duration>,
}

impl ShellVerifier {
    pub fn new(repo_root: impl Into<PathBuf>, config: &VerificationConfig) -> Result<Self> {
        Ok(Self {
            repo_root: repo_root.into(),
            classifier: Classifier::compile(config)?,
            timeout: None,
        })
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Verifier for ShellVerifier {
    #[instrument(skip_all, fields(group = group.index))]
    async fn check(&self, group: &Group, artifacts: &ArtifactSet) -> Result<Verification> {
        if group.verification.trim().is_empty() {
            debug!(group = group.index, "No verification command; passing");
            return Ok(Verification::pass());
        }

        let env = [
            ("CADENCE_GROUP", group.index.to_string()),
            ("CADENCE_GROUP_NAME", group.name.clone()),
            ("CADENCE_ARTIFACTS", join_artifacts(artifacts)),
        ];
        let output = run_shell(&group.verification, &self.repo_root, &env, self.timeout)
            .await
            .map_err(|e| {
                CadenceError::Verifier(format!("Failed to run '{}': {}", group.verification, e))
            })?;

        if output.success {
            return Ok(Verification::pass());
        }

        let combined = format!("{}\n{}", output.stdout, output.stderr);
        let class = if output.timed_out {
            ErrorClass::BuildInfra
        } else {
            self.classifier.classify(&combined)
        };
        let blamed: Vec<String> = group
            .tasks
            .iter()
            .filter(|id| mentions(&combined, id))
            .cloned()
            .collect();
        debug!(group = group.index, class = %class, blamed = ?blamed, "Verification failed");

        Ok(Verification::fail(class)
            .blaming(blamed)
            .with_diagnostic(output.excerpt()))
    }
}

/// Whether `text` names task `id` as a whole token
///
/// Task ids are kebab-case, so `-` counts as part of a token: `api` is not
/// mentioned by `rapid` or `api-client`.
fn mentions(text: &str, id: &str) -> bool {
    let pattern = format!(r"(?:^|[^\w-]){}(?:$|[^\w-])", regex::escape(id));
    match Regex::new(&pattern) {
        Ok(re) => re.is_match(text),
        Err(e) => {
            warn!(task = id, error = %e, "Could not build blame pattern");
            false
        }
    }
}

/// Checkpoints as git commits
#[derive(Debug, Clone)]
pub struct GitVersionControl {
    repo_root: PathBuf,
    remote: String,
}

impl GitVersionControl {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            remote: "origin".to_string(),
        }
    }

    pub fn with_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = remote.into();
        self
    }

    #[instrument(skip(self), fields(repo = %self.repo_root.display()))]
    async fn git(&self, args: &[&str]) -> Result<String> {
        debug!("Executing git {:?}", args);
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_root)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| CadenceError::VersionControl(format!("Failed to execute git: {}", e)))?;

        if !output.status.success() {
            return Err(CadenceError::VersionControl(format!(
                "git {} failed: {}",
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn head(&self) -> Result<CommitRef> {
        self.git(&["rev-parse", "HEAD"]).await
    }

    /// Artifacts git can stage: present in the working tree, or tracked
    /// (a deletion). Declared targets a worker never created are dropped.
    async fn stageable<'a>(&self, artifacts: &'a ArtifactSet) -> Result<Vec<&'a str>> {
        let mut present = Vec::new();
        let mut absent = Vec::new();
        for artifact in artifacts {
            let exists = tokio::fs::try_exists(self.repo_root.join(artifact))
                .await
                .unwrap_or(false);
            if exists {
                present.push(artifact.as_str());
            } else {
                absent.push(artifact.as_str());
            }
        }
        if absent.is_empty() {
            return Ok(present);
        }

        let mut args = vec!["ls-files", "--"];
        args.extend(absent.iter().copied());
        let listed = self.git(&args).await?;
        let tracked: Vec<&str> = listed.lines().map(str::trim).collect();
        for artifact in absent {
            if tracked.contains(&artifact) {
                present.push(artifact);
            } else {
                warn!(artifact, "Artifact not found in the working tree, not staging it");
            }
        }
        Ok(present)
    }
}

#[async_trait]
impl VersionControl for GitVersionControl {
    async fn commit(&self, group: u32, artifacts: &ArtifactSet, message: &str) -> Result<CommitRef> {
        if artifacts.is_empty() {
            self.git(&["add", "-A"]).await?;
        } else {
            let paths = self.stageable(artifacts).await?;
            if !paths.is_empty() {
                let mut args = vec!["add", "-A", "--"];
                args.extend(paths);
                self.git(&args).await?;
            }
        }
        // A group that changed nothing still gets its own checkpoint commit
        self.git(&["commit", "--allow-empty", "-m", message]).await?;
        let head = self.head().await?;
        debug!(group, head = %head, "Checkpoint committed");
        Ok(head)
    }

    async fn push(&self) -> Result<PushAck> {
        self.git(&["push", &self.remote, "HEAD"]).await?;
        Ok(PushAck {
            remote: self.remote.clone(),
            head: self.head().await?,
        })
    }
}

/// Reviewer running a shell command that prints a JSON [`ReviewReport`]
#[derive(Debug, Clone)]
pub struct ShellReviewer {
    command: String,
    repo_root: PathBuf,
    timeout: Option<Duration>,
}

impl ShellReviewer {
    pub fn new(command: impl Into<String>, repo_root: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            repo_root: repo_root.into(),
            timeout: None,
        }
    }

    pub fn from_config(config: &CommandConfig, repo_root: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self::new(required_command(config, "reviewer")?, repo_root)
            .with_timeout(config.timeout_secs.map(Duration::from_secs)))
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Reviewer for ShellReviewer {
    #[instrument(skip(self, artifacts))]
    async fn review(
        &self,
        domain: &str,
        tier: Tier,
        artifacts: &ArtifactSet,
    ) -> Result<ReviewReport> {
        let env = [
            ("CADENCE_REVIEW_DOMAIN", domain.to_string()),
            ("CADENCE_REVIEW_TIER", tier.to_string()),
            ("CADENCE_ARTIFACTS", join_artifacts(artifacts)),
        ];
        let output = run_shell(&self.command, &self.repo_root, &env, self.timeout)
            .await
            .map_err(|e| CadenceError::Review(format!("Failed to run reviewer: {}", e)))?;
        if !output.success {
            return Err(CadenceError::Review(format!(
                "reviewer for {} failed:\n{}",
                domain,
                output.excerpt()
            )));
        }

        let mut report: ReviewReport = serde_json::from_str(output.stdout.trim()).map_err(|e| {
            CadenceError::Review(format!("reviewer for {} printed an invalid report: {}", domain, e))
        })?;
        if report.domain != domain {
            warn!(expected = domain, got = %report.domain, "Reviewer reported a different domain");
            report.domain = domain.to_string();
        }
        Ok(report)
    }
}
