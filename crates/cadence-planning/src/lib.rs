//! # cadence-planning
//!
//! Turns work items into grouped task DAGs using a versioned catalog that
//! maps each kind of work to a capability tier, a verification group, and a
//! typical size.

pub mod catalog;
pub mod decomposer;
pub mod templates;
pub mod work_item;

pub use catalog::{Catalog, CatalogEntry, GroupSpec};
pub use decomposer::{DecompositionSummary, Decomposer, GroupInfo, Plan};
pub use templates::example_work_item;
pub use work_item::{WorkItem, WorkUnit};
