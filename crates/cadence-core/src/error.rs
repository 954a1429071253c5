//! Unified error types for Cadence

use thiserror::Error;

/// Unified error type for all Cadence operations
#[derive(Error, Debug)]
pub enum CadenceError {
    // Decomposition errors
    #[error("Invalid work item: {0}")]
    InvalidWorkItem(String),

    #[error("No catalog entry for kind '{kind}' (catalog version {version})")]
    UnknownKind { kind: String, version: String },

    #[error("Task {task} depends on unknown task {dependency}")]
    DanglingDependency { task: String, dependency: String },

    #[error("Dependency cycle detected among tasks: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),

    #[error("Group ordering violation: {0}")]
    GroupOrdering(String),

    #[error("Tasks {first} and {second} in parallel group {group} both target {target}")]
    TargetConflict {
        group: u32,
        first: String,
        second: String,
        target: String,
    },

    // Scheduling errors
    #[error("Missing dependency in group {group}: {detail}")]
    MissingDependency { group: u32, detail: String },

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Phase error: {0}")]
    Phase(String),

    #[error("Run aborted: {0}")]
    Aborted(String),

    // Collaborator errors
    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Verifier error: {0}")]
    Verifier(String),

    #[error("Version control error: {0}")]
    VersionControl(String),

    #[error("Review error: {0}")]
    Review(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

impl CadenceError {
    /// Structural errors are scheduling or logic defects; retrying cannot fix
    /// them, so they halt the run.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::InvalidWorkItem(_)
                | Self::UnknownKind { .. }
                | Self::DanglingDependency { .. }
                | Self::DependencyCycle(_)
                | Self::GroupOrdering(_)
                | Self::TargetConflict { .. }
                | Self::MissingDependency { .. }
        )
    }
}

/// Result type alias using CadenceError
pub type Result<T> = std::result::Result<T, CadenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_classification() {
        assert!(CadenceError::DependencyCycle(vec!["a".into(), "b".into()]).is_structural());
        assert!(CadenceError::UnknownKind {
            kind: "widget".into(),
            version: "1".into()
        }
        .is_structural());
        assert!(!CadenceError::Worker("timeout".into()).is_structural());
        assert!(!CadenceError::Checkpoint("commit failed".into()).is_structural());
    }

    #[test]
    fn test_cycle_message_lists_tasks() {
        let err = CadenceError::DependencyCycle(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "Dependency cycle detected among tasks: a, b");
    }
}
