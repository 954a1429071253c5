//! Configuration management for Cadence
//!
//! Repository-level settings for scheduling bounds, the escalation ladder,
//! review domains, the lifecycle corrective loop, and the shell backends used
//! by the CLI.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{CadenceError, Result};

/// Directory (relative to the repo root) holding Cadence state
pub const CADENCE_DIR: &str = ".cadence";

/// Repository-level Cadence configuration
///
/// Loaded from `.cadence/config.toml` in the repo root.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CadenceConfig {
    /// Optional catalog file overriding the builtin catalog
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,

    /// Intra-group dispatch bounds
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Retry/escalation bounds
    #[serde(default)]
    pub escalation: EscalationConfig,

    /// Review fan-out settings
    #[serde(default)]
    pub review: ReviewConfig,

    /// Phase controller settings
    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    /// Shell worker used by the CLI
    #[serde(default)]
    pub worker: CommandConfig,

    /// Shell reviewer used by the CLI
    #[serde(default)]
    pub reviewer: CommandConfig,

    /// Verification output classification
    #[serde(default)]
    pub verification: VerificationConfig,
}

/// Intra-group dispatch bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum concurrently running tasks within a parallel group
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

/// Retry/escalation bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// Attempts allowed at one tier before moving up the ladder
    #[serde(default = "default_max_attempts_per_tier")]
    pub max_attempts_per_tier: u32,

    /// Escalated/total ratio above which the catalog should be reviewed
    #[serde(default = "default_ratio_threshold")]
    pub ratio_threshold: f64,
}

/// Review fan-out settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewConfig {
    /// Review domains; empty means "use the catalog's domains"
    #[serde(default)]
    pub domains: Vec<String>,
}

/// Phase controller settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Corrective cycles after a no-go review before manual resolution
    #[serde(default = "default_max_corrective_cycles")]
    pub max_corrective_cycles: u32,

    /// Push after the final checkpoint
    #[serde(default = "default_true")]
    pub push_on_finalize: bool,
}

/// An external command run through `sh -c`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandConfig {
    #[serde(default)]
    pub command: Option<String>,

    /// Per-invocation timeout in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Regex patterns used to classify failed verification output
///
/// Checked in order missing_dependency, build_infra, test_failure; output
/// matching none of them is classified as a compile error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationConfig {
    #[serde(default = "default_missing_dependency_patterns")]
    pub missing_dependency: Vec<String>,

    #[serde(default = "default_build_infra_patterns")]
    pub build_infra: Vec<String>,

    #[serde(default = "default_test_failure_patterns")]
    pub test_failure: Vec<String>,
}

// Default value providers
fn default_max_in_flight() -> usize {
    4
}

fn default_max_attempts_per_tier() -> u32 {
    2
}

fn default_ratio_threshold() -> f64 {
    0.15
}

fn default_max_corrective_cycles() -> u32 {
    2
}

fn default_true() -> bool {
    true
}

fn default_missing_dependency_patterns() -> Vec<String> {
    vec![
        r"unresolved import".to_string(),
        r"cannot find (crate|module)".to_string(),
        r"ModuleNotFoundError".to_string(),
        r"Cannot find module".to_string(),
    ]
}

fn default_build_infra_patterns() -> Vec<String> {
    vec![
        r"(?i)connection (refused|reset)".to_string(),
        r"(?i)no space left on device".to_string(),
        r"(?i)command not found".to_string(),
        r"(?i)timed out".to_string(),
    ]
}

fn default_test_failure_patterns() -> Vec<String> {
    vec![
        r"test result: FAILED".to_string(),
        r"(?m)^FAILED ".to_string(),
        r"(?i)\d+ failing".to_string(),
    ]
}

impl CadenceConfig {
    /// Path of the config file under a repository root
    pub fn path(repo_root: &Path) -> PathBuf {
        repo_root.join(CADENCE_DIR).join("config.toml")
    }

    /// Load configuration from `.cadence/config.toml` or use defaults
    pub fn load_or_default(repo_root: &Path) -> Result<Self> {
        let config_path = Self::path(repo_root);

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Self = toml::from_str(&content).map_err(|e| {
                CadenceError::Config(format!("Failed to parse {}: {}", config_path.display(), e))
            })?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Write default configuration to `.cadence/config.toml`
    pub fn write_default(repo_root: &Path) -> Result<PathBuf> {
        let config_dir = repo_root.join(CADENCE_DIR);
        std::fs::create_dir_all(&config_dir)?;

        let config_path = Self::path(repo_root);
        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| CadenceError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(&config_path, content)?;
        Ok(config_path)
    }

    /// Reject settings that would make the pipeline unable to progress
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.max_in_flight == 0 {
            return Err(CadenceError::Config(
                "scheduler.max_in_flight must be at least 1".to_string(),
            ));
        }
        if self.escalation.max_attempts_per_tier == 0 {
            return Err(CadenceError::Config(
                "escalation.max_attempts_per_tier must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.escalation.ratio_threshold) {
            return Err(CadenceError::Config(
                "escalation.ratio_threshold must be within 0.0..=1.0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
        }
    }
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            max_attempts_per_tier: default_max_attempts_per_tier(),
            ratio_threshold: default_ratio_threshold(),
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_corrective_cycles: default_max_corrective_cycles(),
            push_on_finalize: true,
        }
    }
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            missing_dependency: default_missing_dependency_patterns(),
            build_infra: default_build_infra_patterns(),
            test_failure: default_test_failure_patterns(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = CadenceConfig::default();
        assert_eq!(config.scheduler.max_in_flight, 4);
        assert_eq!(config.escalation.max_attempts_per_tier, 2);
        assert_eq!(config.lifecycle.max_corrective_cycles, 2);
        assert!(config.lifecycle.push_on_finalize);
        assert!(config.worker.command.is_none());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = CadenceConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config, CadenceConfig::default());
    }

    #[test]
    fn test_write_default_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = CadenceConfig::write_default(dir.path()).unwrap();
        assert!(path.ends_with(".cadence/config.toml"));
        let loaded = CadenceConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded, CadenceConfig::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(CADENCE_DIR)).unwrap();
        std::fs::write(
            CadenceConfig::path(dir.path()),
            "[scheduler]\nmax_in_flight = 2\n\n[worker]\ncommand = \"make task\"\n",
        )
        .unwrap();

        let config = CadenceConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.scheduler.max_in_flight, 2);
        assert_eq!(config.worker.command.as_deref(), Some("make task"));
        assert_eq!(config.escalation.max_attempts_per_tier, 2);
    }

    #[test]
    fn test_rejects_zero_in_flight() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(CADENCE_DIR)).unwrap();
        std::fs::write(
            CadenceConfig::path(dir.path()),
            "[scheduler]\nmax_in_flight = 0\n",
        )
        .unwrap();

        let err = CadenceConfig::load_or_default(dir.path()).unwrap_err();
        assert!(matches!(err, CadenceError::Config(_)));
    }
}
