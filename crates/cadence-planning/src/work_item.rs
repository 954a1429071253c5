//! Work-item description consumed by the decomposer

use cadence_core::{CadenceError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// A unit of work to be decomposed into tasks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub units: Vec<WorkUnit>,
}

/// One typed piece of a work item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkUnit {
    pub id: String,
    /// Catalog kind (e.g. "adapter")
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub targets: Vec<String>,
    /// Estimated number of files touched; defaults to the target count
    #[serde(default)]
    pub size: Option<usize>,
}

impl WorkItem {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            units: Vec::new(),
        }
    }

    pub fn with_unit(mut self, unit: WorkUnit) -> Self {
        self.units.push(unit);
        self
    }

    /// Load a work item from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Shape checks that do not need the catalog
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CadenceError::InvalidWorkItem(
                "work item has no name".to_string(),
            ));
        }
        if self.units.is_empty() {
            return Err(CadenceError::InvalidWorkItem(format!(
                "work item '{}' has no units",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for unit in &self.units {
            if unit.id.trim().is_empty() {
                return Err(CadenceError::InvalidWorkItem(format!(
                    "unit of kind '{}' has an empty id",
                    unit.kind
                )));
            }
            if !seen.insert(unit.id.as_str()) {
                return Err(CadenceError::InvalidWorkItem(format!(
                    "duplicate unit id '{}'",
                    unit.id
                )));
            }
        }
        Ok(())
    }
}

impl WorkUnit {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            title: String::new(),
            description: String::new(),
            depends_on: Vec::new(),
            targets: Vec::new(),
            size: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
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

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    /// Size used by the tier-upgrade heuristic
    pub fn estimated_size(&self) -> usize {
        self.size.unwrap_or(self.targets.len())
    }
}
