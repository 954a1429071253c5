//! Checkpoint manager
//!
//! The only writer of cross-group shared state. A checkpoint is appended only
//! after the version-control sink has returned a commit ref, so a failed
//! commit leaves the list exactly as it was.

use crate::collaborators::VersionControl;
use cadence_core::{ArtifactSet, CadenceError, Checkpoint, Result};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

pub struct CheckpointManager {
    vcs: Arc<dyn VersionControl>,
    checkpoints: Vec<Checkpoint>,
}

impl CheckpointManager {
    pub fn new(vcs: Arc<dyn VersionControl>) -> Self {
        Self {
            vcs,
            checkpoints: Vec::new(),
        }
    }

    /// Rebuild from persisted checkpoints, which must be gap-free from 1
    pub fn restore(vcs: Arc<dyn VersionControl>, checkpoints: Vec<Checkpoint>) -> Result<Self> {
        for (i, checkpoint) in checkpoints.iter().enumerate() {
            let expected = i as u32 + 1;
            if checkpoint.group != expected {
                return Err(CadenceError::Checkpoint(format!(
                    "persisted checkpoints have a gap: found group {} where {} was expected",
                    checkpoint.group, expected
                )));
            }
        }
        debug!(count = checkpoints.len(), "Restored checkpoints");
        Ok(Self { vcs, checkpoints })
    }

    /// Commit a group's artifacts and record the checkpoint
    pub async fn commit(&mut self, group: u32, artifacts: ArtifactSet) -> Result<&Checkpoint> {
        let expected = self.next_group();
        if group != expected {
            return Err(CadenceError::Checkpoint(format!(
                "cannot commit group {}: next committable group is {}",
                group, expected
            )));
        }

        let message = format!("cadence: checkpoint group {}", group);
        let commit_ref = self.vcs.commit(group, &artifacts, &message).await?;

        info!(group, commit = %commit_ref, artifacts = artifacts.len(), "Checkpoint committed");
        self.checkpoints.push(Checkpoint {
            group,
            artifacts,
            commit_ref,
            committed_at: Utc::now(),
        });
        self.checkpoints
            .last()
            .ok_or_else(|| CadenceError::Checkpoint("checkpoint list is empty".to_string()))
    }

    /// Union of artifacts from checkpoints `1..=upto`
    pub fn extract(&self, upto: u32) -> ArtifactSet {
        self.checkpoints
            .iter()
            .take_while(|c| c.group <= upto)
            .flat_map(|c| c.artifacts.iter().cloned())
            .collect()
    }

    /// Highest committed group, if any
    pub fn last(&self) -> Option<u32> {
        self.checkpoints.last().map(|c| c.group)
    }

    /// Group a (resumed) scheduler starts from
    pub fn next_group(&self) -> u32 {
        self.last().unwrap_or(0) + 1
    }

    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    pub fn is_committed(&self, group: u32) -> bool {
        self.checkpoints.iter().any(|c| c.group == group)
    }

    pub fn vcs(&self) -> &Arc<dyn VersionControl> {
        &self.vcs
    }
}
