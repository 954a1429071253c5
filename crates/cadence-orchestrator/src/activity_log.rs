//! Activity log - human-readable run history in `.cadence/runs/<id>.activity.md`
//!
//! Records phase transitions, group commits, escalations, the consolidated
//! review, halts and the final outcome. Every write is fail-open: a log that
//! cannot be written never stops a run.

use crate::outcome::{HaltReport, RunOutcome};
use cadence_core::fail_open::fail_open;
use cadence_core::{CommitRef, Phase, Tier};
use cadence_review::ConsolidatedReview;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

/// Longest diagnostic excerpt written to the log
const DIAGNOSTIC_PREVIEW_CHARS: usize = 300;

/// Activity log for one run
pub struct ActivityLog {
    output_path: PathBuf,
}

impl ActivityLog {
    /// Log for `run_id` inside the run store directory
    pub fn new(runs_dir: &Path, run_id: &str) -> Self {
        Self {
            output_path: runs_dir.join(format!("{}.activity.md", run_id)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.output_path
    }

    /// Start a fresh log, or mark a resume in an existing one
    pub async fn log_run_start(&self, run_id: &str, work_item: &str, resumed: bool) {
        fail_open("activity_log::log_run_start", || async {
            let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
            if resumed {
                let content = format!("---\n\n## Resumed\n**Time**: {}\n\n", timestamp);
                return self.append(&content).await;
            }

            if let Some(parent) = self.output_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let content = format!(
                "# Cadence Activity Log\n\n## Run: {}\n**Work item**: {}\n**Started**: {}\n\n---\n\n",
                run_id, work_item, timestamp
            );
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.output_path)
                .await?;
            file.write_all(content.as_bytes()).await?;
            file.flush().await?;
            Ok(())
        })
        .await;
    }

    pub async fn log_phase(&self, phase: Phase) {
        fail_open("activity_log::log_phase", || async {
            let timestamp = Utc::now().format("%H:%M:%S");
            self.append(&format!("### Phase: {}\n**Time**: {}\n\n", phase, timestamp))
                .await
        })
        .await;
    }

    /// Free-form line from the lifecycle state machine
    pub async fn log_message(&self, message: &str) {
        fail_open("activity_log::log_message", || async {
            self.append(&format!("- {}\n", message)).await
        })
        .await;
    }

    pub async fn log_group_committed(&self, group: u32, commit_ref: &CommitRef, parked: &[String]) {
        fail_open("activity_log::log_group_committed", || async {
            let mut content = format!("- G{} committed as `{}`\n", group, commit_ref);
            if !parked.is_empty() {
                content.push_str(&format!("  - parked for manual resolution: {}\n", parked.join(", ")));
            }
            self.append(&content).await
        })
        .await;
    }

    pub async fn log_escalation(&self, task: &str, from: Tier, to: Tier) {
        fail_open("activity_log::log_escalation", || async {
            self.append(&format!("- {} escalated {} -> {}\n", task, from, to))
                .await
        })
        .await;
    }

    pub async fn log_review(&self, review: &ConsolidatedReview) {
        fail_open("activity_log::log_review", || async {
            let mut content = format!("\n```\n{}\n```\n", review);
            for bucket in review.issues.values() {
                for entry in bucket {
                    content.push_str(&format!(
                        "- **{}** [{}] {}: {}\n",
                        entry.issue.severity,
                        entry.domain,
                        entry.issue.id,
                        preview(&entry.issue.description)
                    ));
                }
            }
            content.push('\n');
            self.append(&content).await
        })
        .await;
    }

    pub async fn log_halt(&self, report: &HaltReport) {
        fail_open("activity_log::log_halt", || async {
            self.append(&format!("\n**Stopped**: {}\n\n", preview(&report.to_string())))
                .await
        })
        .await;
    }

    pub async fn log_outcome(&self, outcome: &RunOutcome) {
        fail_open("activity_log::log_outcome", || async {
            let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
            let icon = if outcome.status.is_complete() { "✓" } else { "✗" };
            let content = format!(
                "## Run Summary\n\n**Completed**: {}\n**Status**: {} {}\n\n{}\n",
                timestamp, icon, outcome.status, outcome.checklist
            );
            self.append(&content).await
        })
        .await;
    }

    async fn append(&self, content: &str) -> cadence_core::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.output_path)
            .await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() > DIAGNOSTIC_PREVIEW_CHARS {
        let cut: String = text.chars().take(DIAGNOSTIC_PREVIEW_CHARS).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}
