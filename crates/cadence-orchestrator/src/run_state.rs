//! Persisted run state
//!
//! Everything a resume needs lives in [`RunState`]: the work item, the plan,
//! committed checkpoints, escalation counters and the latest review. It is
//! written as pretty JSON to `.cadence/runs/<run_id>.json` via a temp file and
//! rename, so a reader never sees a half-written record.

use crate::collaborators::PushAck;
use crate::escalation::EscalationState;
use crate::outcome::HaltReport;
use crate::phases::PhaseLedger;
use crate::state_machine::State;
use cadence_core::config::CADENCE_DIR;
use cadence_core::{CadenceError, Checkpoint, Phase, Result, TaskId};
use cadence_planning::{Plan, WorkItem};
use cadence_review::ConsolidatedReview;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Durable record of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    pub work_item: WorkItem,
    pub catalog_version: String,
    /// Lifecycle state machine position
    pub lifecycle: State,
    pub phases: PhaseLedger,
    #[serde(default)]
    pub plan: Option<Plan>,
    #[serde(default)]
    pub checkpoints: Vec<Checkpoint>,
    #[serde(default)]
    pub escalations: BTreeMap<TaskId, EscalationState>,
    #[serde(default)]
    pub review: Option<ConsolidatedReview>,
    #[serde(default)]
    pub corrective_cycles: u32,
    #[serde(default)]
    pub push: Option<PushAck>,
    #[serde(default)]
    pub halt: Option<HaltReport>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub persisted_at: Option<DateTime<Utc>>,
}

impl RunState {
    pub fn new(run_id: impl Into<String>, work_item: WorkItem, catalog_version: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            work_item,
            catalog_version: catalog_version.into(),
            lifecycle: State::Idle,
            phases: PhaseLedger::new(),
            plan: None,
            checkpoints: Vec::new(),
            escalations: BTreeMap::new(),
            review: None,
            corrective_cycles: 0,
            push: None,
            halt: None,
            started_at: now,
            updated_at: now,
            persisted_at: None,
        }
    }

    /// Phase the run is in (or stopped at)
    pub fn current_phase(&self) -> Option<Phase> {
        self.lifecycle.phase().or_else(|| self.phases.current())
    }

    pub fn last_checkpoint(&self) -> Option<u32> {
        self.checkpoints.last().map(|c| c.group)
    }
}

/// Short listing entry for `status`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: String,
    pub work_item: String,
    pub phase: Option<Phase>,
    pub last_checkpoint: Option<u32>,
    pub updated_at: DateTime<Utc>,
}

impl From<&RunState> for RunSummary {
    fn from(state: &RunState) -> Self {
        Self {
            run_id: state.run_id.clone(),
            work_item: state.work_item.name.clone(),
            phase: state.current_phase(),
            last_checkpoint: state.last_checkpoint(),
            updated_at: state.updated_at,
        }
    }
}

/// File-backed store for run state
#[derive(Debug, Clone)]
pub struct RunStore {
    dir: PathBuf,
}

impl RunStore {
    /// Store under `<repo_root>/.cadence/runs`
    pub fn new(repo_root: &Path) -> Self {
        Self::at(repo_root.join(CADENCE_DIR).join("runs"))
    }

    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", run_id))
    }

    /// Write `state` atomically, stamping its update times
    pub async fn save(&self, state: &mut RunState) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let now = Utc::now();
        state.updated_at = now;
        let previous = state.persisted_at.replace(now);

        let json = match serde_json::to_string_pretty(state) {
            Ok(json) => json,
            Err(e) => {
                state.persisted_at = previous;
                return Err(e.into());
            }
        };

        let path = self.path(&state.run_id);
        let tmp = self.dir.join(format!(".{}.json.tmp", state.run_id));
        let written = async {
            tokio::fs::write(&tmp, json).await?;
            tokio::fs::rename(&tmp, &path).await
        }
        .await;
        if let Err(e) = written {
            state.persisted_at = previous;
            return Err(CadenceError::Io(e));
        }

        debug!(run = %state.run_id, path = %path.display(), "Run state saved");
        Ok(path)
    }

    pub async fn load(&self, run_id: &str) -> Result<RunState> {
        let path = self.path(run_id);
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            CadenceError::Other(format!("Failed to read run state {}: {}", path.display(), e))
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Every stored run, most recently updated first
    pub async fn list(&self) -> Result<Vec<RunSummary>> {
        let mut summaries = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(summaries),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_state = path.extension().and_then(|e| e.to_str()) == Some("json")
                && !path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with('.'));
            if !is_state {
                continue;
            }
            let content = tokio::fs::read_to_string(&path).await?;
            match serde_json::from_str::<RunState>(&content) {
                Ok(state) => summaries.push(RunSummary::from(&state)),
                Err(e) => debug!(path = %path.display(), error = %e, "Skipping unreadable run state"),
            }
        }

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    /// Most recently updated run, if any
    pub async fn latest(&self) -> Result<Option<RunState>> {
        match self.list().await?.first() {
            Some(summary) => Ok(Some(self.load(&summary.run_id).await?)),
            None => Ok(None),
        }
    }
}
