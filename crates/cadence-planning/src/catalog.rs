//! Versioned catalog mapping kinds of work to tier, group, and size
//!
//! The catalog is configuration: it can be loaded from TOML so that changing
//! where a kind of work lands does not require a code change.

use cadence_core::{kinds, CadenceError, GroupMode, Result, Tier};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Builtin review domains
pub const SECURITY: &str = "security";
pub const PERFORMANCE: &str = "performance";
pub const CORRECTNESS: &str = "correctness";
pub const OPERABILITY: &str = "operability";

/// A group definition in the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSpec {
    pub index: u32,
    pub name: String,
    #[serde(default)]
    pub mode: GroupMode,
    /// Check reference handed to the verifier for this group
    pub verification: String,
}

/// Where one kind of work lands and who reviews it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub tier: Tier,
    pub group: u32,
    /// Typical number of files touched by this kind of work
    pub typical_size: usize,
    /// Complexity varies: oversized units upgrade Standard -> Advanced
    #[serde(default)]
    pub upgradable: bool,
    #[serde(default = "default_load_bearing")]
    pub load_bearing: bool,
    /// Review domains responsible for this kind of work
    #[serde(default)]
    pub review_domains: Vec<String>,
}

fn default_load_bearing() -> bool {
    true
}

/// Kind -> (tier, group, size) lookup structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    pub version: String,
    pub review_domains: Vec<String>,
    pub groups: Vec<GroupSpec>,
    pub entries: BTreeMap<String, CatalogEntry>,
}

impl Catalog {
    /// The builtin catalog (version 1): seven groups, seven kinds
    pub fn builtin() -> Self {
        let groups = vec![
            group(1, "foundation", GroupMode::Parallel, "cargo check --workspace"),
            group(2, "contracts", GroupMode::Parallel, "cargo check --workspace"),
            group(3, "adapters", GroupMode::Parallel, "cargo check --workspace"),
            group(4, "orchestration", GroupMode::Sequential, "cargo check --workspace"),
            group(5, "inbound", GroupMode::Parallel, "cargo check --workspace"),
            group(6, "observability", GroupMode::Parallel, "cargo check --workspace"),
            group(7, "tests", GroupMode::Parallel, "cargo test --workspace"),
        ];

        let mut entries = BTreeMap::new();
        entries.insert(
            kinds::FOUNDATION_MODEL.to_string(),
            entry(Tier::Basic, 1, 2, false, &[CORRECTNESS, PERFORMANCE]),
        );
        entries.insert(
            kinds::CONTRACT.to_string(),
            entry(Tier::Standard, 2, 1, false, &[CORRECTNESS, SECURITY]),
        );
        entries.insert(
            kinds::ADAPTER.to_string(),
            entry(Tier::Standard, 3, 3, true, &[SECURITY, PERFORMANCE, CORRECTNESS]),
        );
        entries.insert(
            kinds::ORCHESTRATION_LOGIC.to_string(),
            entry(Tier::Standard, 4, 3, true, &[CORRECTNESS, PERFORMANCE]),
        );
        entries.insert(
            kinds::INBOUND_ADAPTER.to_string(),
            entry(Tier::Standard, 5, 2, true, &[SECURITY, OPERABILITY, CORRECTNESS]),
        );
        entries.insert(kinds::OBSERVABILITY.to_string(), {
            let mut e = entry(Tier::Basic, 6, 1, false, &[OPERABILITY]);
            e.load_bearing = false;
            e
        });
        entries.insert(
            kinds::TEST.to_string(),
            entry(Tier::Standard, 7, 3, false, &[CORRECTNESS]),
        );

        Self {
            version: "1".to_string(),
            review_domains: [SECURITY, PERFORMANCE, CORRECTNESS, OPERABILITY]
                .iter()
                .map(|d| d.to_string())
                .collect(),
            groups,
            entries,
        }
    }

    /// Load a catalog from a TOML file and validate it
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML catalog
    pub fn from_toml(content: &str) -> Result<Self> {
        let catalog: Self = toml::from_str(content)
            .map_err(|e| CadenceError::Config(format!("Failed to parse catalog: {}", e)))?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Serialize to TOML (used by `cadence catalog`)
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| CadenceError::Config(format!("Failed to serialize catalog: {}", e)))
    }

    /// Check internal consistency
    pub fn validate(&self) -> Result<()> {
        if self.version.trim().is_empty() {
            return Err(CadenceError::Config("catalog version is empty".to_string()));
        }
        if self.groups.is_empty() {
            return Err(CadenceError::Config("catalog defines no groups".to_string()));
        }
        for (pos, spec) in self.groups.iter().enumerate() {
            let expected = pos as u32 + 1;
            if spec.index != expected {
                return Err(CadenceError::Config(format!(
                    "catalog group '{}' has index {} but position {}",
                    spec.name, spec.index, expected
                )));
            }
        }

        let domains: BTreeSet<&str> = self.review_domains.iter().map(String::as_str).collect();
        for (kind, entry) in &self.entries {
            if !entry.tier.is_executable() {
                return Err(CadenceError::Config(format!(
                    "catalog entry '{}' cannot start at the manual tier",
                    kind
                )));
            }
            if self.group(entry.group).is_none() {
                return Err(CadenceError::Config(format!(
                    "catalog entry '{}' references undefined group {}",
                    kind, entry.group
                )));
            }
            if let Some(unknown) = entry
                .review_domains
                .iter()
                .find(|d| !domains.contains(d.as_str()))
            {
                return Err(CadenceError::Config(format!(
                    "catalog entry '{}' references unknown review domain '{}'",
                    kind, unknown
                )));
            }
        }
        Ok(())
    }

    /// Look up a kind, failing fast on a catalog miss
    pub fn entry(&self, kind: &str) -> Result<&CatalogEntry> {
        self.entries.get(kind).ok_or_else(|| CadenceError::UnknownKind {
            kind: kind.to_string(),
            version: self.version.clone(),
        })
    }

    pub fn group(&self, index: u32) -> Option<&GroupSpec> {
        self.groups.iter().find(|g| g.index == index)
    }

    pub fn last_group_index(&self) -> u32 {
        self.groups.last().map(|g| g.index).unwrap_or(0)
    }

    /// Whether any entry names this review domain
    pub fn domain_is_assigned(&self, domain: &str) -> bool {
        self.entries
            .values()
            .any(|e| e.review_domains.iter().any(|d| d == domain))
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::builtin()
    }
}

fn group(index: u32, name: &str, mode: GroupMode, verification: &str) -> GroupSpec {
    GroupSpec {
        index,
        name: name.to_string(),
        mode,
        verification: verification.to_string(),
    }
}

fn entry(
    tier: Tier,
    group: u32,
    typical_size: usize,
    upgradable: bool,
    review_domains: &[&str],
) -> CatalogEntry {
    CatalogEntry {
        tier,
        group,
        typical_size,
        upgradable,
        load_bearing: true,
        review_domains: review_domains.iter().map(|d| d.to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_is_valid() {
        let catalog = Catalog::builtin();
        catalog.validate().unwrap();
        assert_eq!(catalog.version, "1");
        assert_eq!(catalog.groups.len(), 7);
        assert_eq!(catalog.last_group_index(), 7);
        assert_eq!(catalog.entry(kinds::ADAPTER).unwrap().group, 3);
        assert!(!catalog.entry(kinds::OBSERVABILITY).unwrap().load_bearing);
    }

    #[test]
    fn test_unknown_kind_is_descriptive() {
        let catalog = Catalog::builtin();
        let err = catalog.entry("widget").unwrap_err();
        assert_eq!(
            err.to_string(),
            "No catalog entry for kind 'widget' (catalog version 1)"
        );
    }

    #[test]
    fn test_toml_round_trip() {
        let catalog = Catalog::builtin();
        let text = catalog.to_toml().unwrap();
        let parsed = Catalog::from_toml(&text).unwrap();
        assert_eq!(parsed, catalog);
    }

    #[test]
    fn test_rejects_gap_in_group_indices() {
        let text = r#"
version = "2"
review_domains = ["correctness"]

[[groups]]
index = 1
name = "core"
verification = "make check"

[[groups]]
index = 3
name = "edge"
verification = "make check"

[entries]
"#;
        let err = Catalog::from_toml(text).unwrap_err();
        assert!(err.to_string().contains("index 3"));
    }

    #[test]
    fn test_rejects_entry_with_unknown_domain() {
        let mut catalog = Catalog::builtin();
        catalog
            .entries
            .get_mut(kinds::TEST)
            .unwrap()
            .review_domains
            .push("style".to_string());
        assert!(catalog.validate().is_err());
    }
}
