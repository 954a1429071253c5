//! Work-item decomposition into a grouped task DAG

use crate::catalog::Catalog;
use crate::work_item::{WorkItem, WorkUnit};
use cadence_core::{
    CadenceError, Group, GroupMode, ReviewDomain, Result, Task, TaskId, Tier,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Decomposition output: grouped tasks plus derived summaries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub work_item: String,
    pub catalog_version: String,
    /// Groups in ascending index order, indices contiguous from 1
    pub groups: Vec<Group>,
    /// Tasks in topological order
    pub tasks: Vec<Task>,
    /// Number of tasks per starting tier
    pub tier_distribution: BTreeMap<Tier, usize>,
    /// Maximum tier among the tasks each review domain is responsible for
    pub review_tiers: BTreeMap<ReviewDomain, Tier>,
}

impl Plan {
    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    pub fn group(&self, index: u32) -> Option<&Group> {
        self.groups.iter().find(|g| g.index == index)
    }

    pub fn group_mut(&mut self, index: u32) -> Option<&mut Group> {
        self.groups.iter_mut().find(|g| g.index == index)
    }

    /// Tasks of a group in dispatch order
    pub fn tasks_in(&self, index: u32) -> Vec<&Task> {
        self.group(index)
            .map(|g| g.tasks.iter().filter_map(|id| self.task(id)).collect())
            .unwrap_or_default()
    }

    pub fn last_group_index(&self) -> u32 {
        self.groups.last().map(|g| g.index).unwrap_or(0)
    }

    /// Append a group after the last one (used for corrective work).
    ///
    /// The group index must be `last + 1`, task ids must be new, and
    /// dependencies must point at existing tasks.
    pub fn append_group(&mut self, mut group: Group, tasks: Vec<Task>) -> Result<()> {
        let expected = self.last_group_index() + 1;
        if group.index != expected {
            return Err(CadenceError::GroupOrdering(format!(
                "appended group has index {} but next index is {}",
                group.index, expected
            )));
        }

        let mut known: BTreeSet<TaskId> = self.tasks.iter().map(|t| t.id.clone()).collect();
        for task in &tasks {
            if task.group != group.index {
                return Err(CadenceError::GroupOrdering(format!(
                    "task {} is assigned to group {} but appended to group {}",
                    task.id, task.group, group.index
                )));
            }
            if let Some(dep) = task.dependencies.iter().find(|d| !known.contains(*d)) {
                return Err(CadenceError::DanglingDependency {
                    task: task.id.clone(),
                    dependency: dep.clone(),
                });
            }
            if !known.insert(task.id.clone()) {
                return Err(CadenceError::InvalidWorkItem(format!(
                    "duplicate task id '{}'",
                    task.id
                )));
            }
        }

        group.tasks = tasks.iter().map(|t| t.id.clone()).collect();
        self.groups.push(group);
        self.tasks.extend(tasks);
        Ok(())
    }
}

/// Decomposes work items using a catalog
pub struct Decomposer<'a> {
    catalog: &'a Catalog,
    review_domains: Vec<ReviewDomain>,
}

impl<'a> Decomposer<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self {
            catalog,
            review_domains: catalog.review_domains.clone(),
        }
    }

    /// Override the catalog's review domains (empty keeps the catalog's)
    pub fn with_review_domains(mut self, domains: Vec<ReviewDomain>) -> Self {
        if !domains.is_empty() {
            self.review_domains = domains;
        }
        self
    }

    /// Turn a work item into a validated plan.
    ///
    /// Fails fast on the first structural problem: invalid work item, catalog
    /// miss, dangling dependency, cycle, no group left for a task, or two
    /// tasks of one parallel group touching the same target.
    pub fn decompose(&self, item: &WorkItem) -> Result<Plan> {
        item.validate()?;

        let mut entries = HashMap::new();
        for unit in &item.units {
            entries.insert(unit.id.as_str(), self.catalog.entry(&unit.kind)?);
        }

        let positions: HashMap<&str, usize> = item
            .units
            .iter()
            .enumerate()
            .map(|(i, u)| (u.id.as_str(), i))
            .collect();
        for unit in &item.units {
            if let Some(dep) = unit
                .depends_on
                .iter()
                .find(|d| !positions.contains_key(d.as_str()))
            {
                return Err(CadenceError::DanglingDependency {
                    task: unit.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }

        let order = topological_order(&item.units, &positions)?;

        // Placement in catalog group indices
        let mut placed: HashMap<&str, u32> = HashMap::new();
        let mut tasks = Vec::with_capacity(order.len());
        for idx in order {
            let unit = &item.units[idx];
            let entry = entries[unit.id.as_str()];

            let mut group = entry.group;
            for dep in &unit.depends_on {
                let dep_group = placed[dep.as_str()];
                let shares_group = self
                    .catalog
                    .group(dep_group)
                    .map(|g| g.mode == GroupMode::Sequential)
                    .unwrap_or(false);
                let required = if shares_group { dep_group } else { dep_group + 1 };
                group = group.max(required);
            }
            if self.catalog.group(group).is_none() {
                return Err(CadenceError::GroupOrdering(format!(
                    "task {} must follow its dependencies but no group exists after group {}",
                    unit.id,
                    group - 1
                )));
            }
            placed.insert(unit.id.as_str(), group);

            let mut tier = entry.tier;
            if entry.upgradable && tier == Tier::Standard && unit.estimated_size() > entry.typical_size
            {
                tracing::debug!(
                    task = %unit.id,
                    size = unit.estimated_size(),
                    typical = entry.typical_size,
                    "Upgrading oversized task to advanced tier"
                );
                tier = Tier::Advanced;
            }

            let title = if unit.title.is_empty() {
                unit.id.clone()
            } else {
                unit.title.clone()
            };
            tasks.push(
                Task::new(unit.id.clone(), unit.kind.clone(), tier, group)
                    .with_title(title)
                    .with_description(unit.description.clone())
                    .with_dependencies(unit.depends_on.iter().cloned())
                    .with_targets(unit.targets.iter().cloned())
                    .with_load_bearing(entry.load_bearing),
            );
        }

        // Renumber occupied catalog groups contiguously from 1
        let occupied: BTreeSet<u32> = tasks.iter().map(|t| t.group).collect();
        let renumber: HashMap<u32, u32> = occupied
            .iter()
            .enumerate()
            .map(|(i, g)| (*g, i as u32 + 1))
            .collect();

        let mut groups = Vec::with_capacity(occupied.len());
        for catalog_index in &occupied {
            let spec = self.catalog.group(*catalog_index).ok_or_else(|| {
                CadenceError::GroupOrdering(format!("undefined group {}", catalog_index))
            })?;
            groups.push(
                Group::new(renumber[catalog_index], spec.name.clone(), spec.mode)
                    .with_verification(spec.verification.clone()),
            );
        }
        for task in &mut tasks {
            task.group = renumber[&task.group];
            groups[(task.group - 1) as usize].tasks.push(task.id.clone());
        }

        check_parallel_targets(&groups, &tasks)?;

        let mut tier_distribution = BTreeMap::new();
        for task in &tasks {
            *tier_distribution.entry(task.tier).or_insert(0) += 1;
        }

        let review_tiers = self.review_tiers(item, &tasks);

        tracing::info!(
            work_item = %item.name,
            catalog_version = %self.catalog.version,
            tasks = tasks.len(),
            groups = groups.len(),
            "Decomposed work item"
        );

        Ok(Plan {
            work_item: item.name.clone(),
            catalog_version: self.catalog.version.clone(),
            groups,
            tasks,
            tier_distribution,
            review_tiers,
        })
    }

    /// Per-domain review tier: the highest tier among reviewed tasks.
    ///
    /// A domain no catalog entry names reviews every task. A domain that
    /// reviews nothing gets the basic tier.
    fn review_tiers(&self, item: &WorkItem, tasks: &[Task]) -> BTreeMap<ReviewDomain, Tier> {
        let kinds: HashMap<&str, &str> = item
            .units
            .iter()
            .map(|u| (u.id.as_str(), u.kind.as_str()))
            .collect();

        self.review_domains
            .iter()
            .map(|domain| {
                let reviews_all = !self.catalog.domain_is_assigned(domain);
                let tier = tasks
                    .iter()
                    .filter(|t| {
                        reviews_all
                            || kinds
                                .get(t.id.as_str())
                                .and_then(|k| self.catalog.entries.get(*k))
                                .map(|e| e.review_domains.iter().any(|d| d == domain))
                                .unwrap_or(false)
                    })
                    .map(|t| t.tier)
                    .max()
                    .unwrap_or(Tier::Basic);
                (domain.clone(), tier)
            })
            .collect()
    }

    /// Human-readable summary of a decomposition
    pub fn summarize(&self, plan: &Plan) -> DecompositionSummary {
        DecompositionSummary {
            work_item: plan.work_item.clone(),
            catalog_version: plan.catalog_version.clone(),
            total_tasks: plan.tasks.len(),
            tier_distribution: plan.tier_distribution.clone(),
            review_tiers: plan.review_tiers.clone(),
            groups: plan
                .groups
                .iter()
                .map(|g| GroupInfo {
                    index: g.index,
                    name: g.name.clone(),
                    mode: g.mode,
                    tasks: g.tasks.clone(),
                })
                .collect(),
        }
    }
}

/// Kahn's algorithm, breaking ties by declaration order
fn topological_order(units: &[WorkUnit], positions: &HashMap<&str, usize>) -> Result<Vec<usize>> {
    let mut indegree: Vec<usize> = units.iter().map(|u| u.depends_on.len()).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); units.len()];
    for (i, unit) in units.iter().enumerate() {
        for dep in &unit.depends_on {
            dependents[positions[dep.as_str()]].push(i);
        }
    }

    let mut ready: BTreeSet<usize> = (0..units.len()).filter(|i| indegree[*i] == 0).collect();
    let mut order = Vec::with_capacity(units.len());
    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &dependent in &dependents[next] {
            indegree[dependent] -= 1;
            if indegree[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() < units.len() {
        let stuck = units
            .iter()
            .enumerate()
            .filter(|(i, _)| indegree[*i] > 0)
            .map(|(_, u)| u.id.clone())
            .collect();
        return Err(CadenceError::DependencyCycle(stuck));
    }
    Ok(order)
}

/// Tasks sharing a parallel group must touch disjoint targets
fn check_parallel_targets(groups: &[Group], tasks: &[Task]) -> Result<()> {
    for group in groups.iter().filter(|g| g.mode == GroupMode::Parallel) {
        let mut owners: HashMap<&str, &str> = HashMap::new();
        for task in tasks.iter().filter(|t| t.group == group.index) {
            for target in &task.targets {
                if let Some(first) = owners.insert(target.as_str(), task.id.as_str()) {
                    return Err(CadenceError::TargetConflict {
                        group: group.index,
                        first: first.to_string(),
                        second: task.id.clone(),
                        target: target.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

/// Summary of decomposition results
#[derive(Debug, Clone)]
pub struct DecompositionSummary {
    pub work_item: String,
    pub catalog_version: String,
    pub total_tasks: usize,
    pub tier_distribution: BTreeMap<Tier, usize>,
    pub review_tiers: BTreeMap<ReviewDomain, Tier>,
    pub groups: Vec<GroupInfo>,
}

/// Group information for summary
#[derive(Debug, Clone)]
pub struct GroupInfo {
    pub index: u32,
    pub name: String,
    pub mode: GroupMode,
    pub tasks: Vec<TaskId>,
}

impl std::fmt::Display for DecompositionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Work item: {}", self.work_item)?;
        writeln!(f, "  Catalog version: {}", self.catalog_version)?;
        writeln!(f, "  Tasks: {}", self.total_tasks)?;
        writeln!(f, "  Groups: {}", self.groups.len())?;
        writeln!(f)?;
        writeln!(f, "Tier distribution:")?;
        for (tier, count) in &self.tier_distribution {
            writeln!(f, "  {}: {}", tier, count)?;
        }
        writeln!(f)?;
        writeln!(f, "Group breakdown:")?;
        for group in &self.groups {
            writeln!(
                f,
                "  G{} {} ({:?}): {}",
                group.index,
                group.name,
                group.mode,
                group.tasks.join(", ")
            )?;
        }
        writeln!(f)?;
        writeln!(f, "Review tiers:")?;
        for (domain, tier) in &self.review_tiers {
            writeln!(f, "  {}: {}", domain, tier)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::example_work_item;
    use cadence_core::kinds;

    fn decompose(item: &WorkItem) -> Result<Plan> {
        let catalog = Catalog::builtin();
        Decomposer::new(&catalog).decompose(item)
    }

    #[test]
    fn test_decompose_example_work_item() {
        let item = example_work_item();
        let plan = decompose(&item).unwrap();

        assert_eq!(plan.catalog_version, "1");
        assert_eq!(plan.tasks.len(), item.units.len());
        for (pos, group) in plan.groups.iter().enumerate() {
            assert_eq!(group.index, pos as u32 + 1);
            assert!(!group.tasks.is_empty());
        }

        // Every dependency lands in the same or an earlier group
        for task in &plan.tasks {
            for dep in &task.dependencies {
                assert!(plan.task(dep).unwrap().group <= task.group);
            }
        }
    }

    #[test]
    fn test_unknown_kind_fails_fast() {
        let item = WorkItem::new("billing")
            .with_unit(WorkUnit::new("model", kinds::FOUNDATION_MODEL))
            .with_unit(WorkUnit::new("widget", "ui-widget"));
        let err = decompose(&item).unwrap_err();
        assert!(matches!(err, CadenceError::UnknownKind { ref kind, .. } if kind == "ui-widget"));
    }

    #[test]
    fn test_dangling_dependency() {
        let item = WorkItem::new("billing")
            .with_unit(WorkUnit::new("api", kinds::CONTRACT).depends_on(["ghost"]));
        let err = decompose(&item).unwrap_err();
        assert!(matches!(err, CadenceError::DanglingDependency { .. }));
    }

    #[test]
    fn test_cycle_detected() {
        let item = WorkItem::new("billing")
            .with_unit(WorkUnit::new("a", kinds::ADAPTER).depends_on(["b"]))
            .with_unit(WorkUnit::new("b", kinds::ADAPTER).depends_on(["a"]))
            .with_unit(WorkUnit::new("c", kinds::FOUNDATION_MODEL));
        let err = decompose(&item).unwrap_err();
        match err {
            CadenceError::DependencyCycle(ids) => assert_eq!(ids, vec!["a", "b"]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_dependency_in_parallel_group_pushes_to_next_group() {
        // contract (catalog G2) depends on an adapter (catalog G3, parallel)
        let item = WorkItem::new("billing")
            .with_unit(WorkUnit::new("repo", kinds::ADAPTER))
            .with_unit(WorkUnit::new("api", kinds::CONTRACT).depends_on(["repo"]));
        let plan = decompose(&item).unwrap();

        let repo = plan.task("repo").unwrap();
        let api = plan.task("api").unwrap();
        assert!(api.group > repo.group);
        assert_eq!(plan.group(api.group).unwrap().name, "orchestration");
    }

    #[test]
    fn test_dependency_in_sequential_group_shares_group() {
        let item = WorkItem::new("billing")
            .with_unit(WorkUnit::new("flow-b", kinds::ORCHESTRATION_LOGIC).depends_on(["flow-a"]))
            .with_unit(WorkUnit::new("flow-a", kinds::ORCHESTRATION_LOGIC));
        let plan = decompose(&item).unwrap();

        assert_eq!(plan.groups.len(), 1);
        assert_eq!(plan.groups[0].mode, GroupMode::Sequential);
        // Topological order inside the sequential group
        assert_eq!(plan.groups[0].tasks, vec!["flow-a", "flow-b"]);
    }

    #[test]
    fn test_no_group_after_last() {
        let item = WorkItem::new("billing")
            .with_unit(WorkUnit::new("suite", kinds::TEST))
            .with_unit(WorkUnit::new("more", kinds::TEST).depends_on(["suite"]));
        let err = decompose(&item).unwrap_err();
        assert!(matches!(err, CadenceError::GroupOrdering(_)));
    }

    #[test]
    fn test_parallel_target_conflict() {
        let item = WorkItem::new("billing")
            .with_unit(WorkUnit::new("a", kinds::ADAPTER).with_targets(["src/db.rs"]))
            .with_unit(WorkUnit::new("b", kinds::ADAPTER).with_targets(["src/db.rs"]));
        let err = decompose(&item).unwrap_err();
        assert!(matches!(err, CadenceError::TargetConflict { group: 1, .. }));
    }

    #[test]
    fn test_sequential_targets_may_overlap() {
        let item = WorkItem::new("billing")
            .with_unit(WorkUnit::new("a", kinds::ORCHESTRATION_LOGIC).with_targets(["src/flow.rs"]))
            .with_unit(WorkUnit::new("b", kinds::ORCHESTRATION_LOGIC).with_targets(["src/flow.rs"]));
        assert!(decompose(&item).is_ok());
    }

    #[test]
    fn test_oversized_upgradable_task_upgrades_tier() {
        let item = WorkItem::new("billing")
            .with_unit(WorkUnit::new("small", kinds::ADAPTER).with_targets(["a.rs"]))
            .with_unit(WorkUnit::new("large", kinds::ADAPTER).with_size(8))
            .with_unit(WorkUnit::new("tests", kinds::TEST).with_size(20));
        let plan = decompose(&item).unwrap();

        assert_eq!(plan.task("small").unwrap().tier, Tier::Standard);
        assert_eq!(plan.task("large").unwrap().tier, Tier::Advanced);
        // Not upgradable in the catalog
        assert_eq!(plan.task("tests").unwrap().tier, Tier::Standard);
        assert_eq!(plan.tier_distribution[&Tier::Standard], 2);
        assert_eq!(plan.tier_distribution[&Tier::Advanced], 1);
    }

    #[test]
    fn test_review_tiers_take_max_of_reviewed_tasks() {
        let item = WorkItem::new("billing")
            .with_unit(WorkUnit::new("model", kinds::FOUNDATION_MODEL))
            .with_unit(WorkUnit::new("repo", kinds::ADAPTER).with_size(10))
            .with_unit(WorkUnit::new("metrics", kinds::OBSERVABILITY));
        let plan = decompose(&item).unwrap();

        assert_eq!(plan.review_tiers["security"], Tier::Advanced);
        assert_eq!(plan.review_tiers["performance"], Tier::Advanced);
        assert_eq!(plan.review_tiers["operability"], Tier::Basic);
        assert_eq!(plan.review_tiers["correctness"], Tier::Advanced);
    }

    #[test]
    fn test_unassigned_review_domain_reviews_everything() {
        let catalog = Catalog::builtin();
        let item = WorkItem::new("billing")
            .with_unit(WorkUnit::new("api", kinds::CONTRACT))
            .with_unit(WorkUnit::new("model", kinds::FOUNDATION_MODEL));
        let plan = Decomposer::new(&catalog)
            .with_review_domains(vec!["accessibility".to_string()])
            .decompose(&item)
            .unwrap();

        assert_eq!(plan.review_tiers.len(), 1);
        assert_eq!(plan.review_tiers["accessibility"], Tier::Standard);
    }

    #[test]
    fn test_append_group_requires_next_index() {
        let item = WorkItem::new("billing").with_unit(WorkUnit::new("model", kinds::FOUNDATION_MODEL));
        let mut plan = decompose(&item).unwrap();

        let fix = Task::new("fix-1", kinds::FIX, Tier::Standard, 3);
        let err = plan
            .append_group(Group::new(3, "corrective-1", GroupMode::Sequential), vec![fix])
            .unwrap_err();
        assert!(matches!(err, CadenceError::GroupOrdering(_)));

        let fix = Task::new("fix-1", kinds::FIX, Tier::Standard, 2).with_dependencies(["model"]);
        plan.append_group(Group::new(2, "corrective-1", GroupMode::Sequential), vec![fix])
            .unwrap();
        assert_eq!(plan.last_group_index(), 2);
        assert_eq!(plan.tasks_in(2).len(), 1);
    }

    #[test]
    fn test_summary_display() {
        let catalog = Catalog::builtin();
        let decomposer = Decomposer::new(&catalog);
        let plan = decomposer.decompose(&example_work_item()).unwrap();
        let text = decomposer.summarize(&plan).to_string();
        assert!(text.contains("Tier distribution:"));
        assert!(text.contains("Review tiers:"));
        assert!(text.contains("G1 foundation"));
    }
}
