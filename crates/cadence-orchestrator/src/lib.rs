//! # cadence-orchestrator
//!
//! Lifecycle pipeline engine for Cadence.
//!
//! This crate provides:
//! - Group scheduling with bounded intra-group parallelism and barriers
//! - Per-group verification gates and the tier escalation ladder
//! - Append-only checkpoints backed by a version-control sink
//! - The phase controller and its pure lifecycle state machine
//! - Durable run state for resume after a halt
//! - Shell and git backends for the collaborator traits

mod activity_log;
pub mod backends;
mod checkpoint;
mod collaborators;
mod controller;
mod escalation;
mod outcome;
mod phases;
mod run_state;
mod scheduler;
mod state_machine;
pub mod testing;

pub use activity_log::ActivityLog;
pub use backends::{GitVersionControl, ShellReviewer, ShellVerifier, ShellWorker};
pub use checkpoint::CheckpointManager;
pub use collaborators::{
    PushAck, Verification, Verifier, VersionControl, Worker, WorkerOutcome, WorkerStatus,
};
pub use controller::{Collaborators, PhaseController};
pub use escalation::{EscalationDecision, EscalationManager, EscalationState};
pub use outcome::{
    Checklist, ChecklistCategory, ChecklistItem, Component, HaltClass, HaltReport, RunOutcome,
    RunStatus,
};
pub use phases::{check_exit, describe, PhaseLedger, PhaseStatus};
pub use run_state::{RunState, RunStore, RunSummary};
pub use scheduler::{GroupOutcome, GroupScheduler, ScheduleOutcome, SchedulerEvent};
pub use state_machine::{transition, Action, Event, Limits, State};
