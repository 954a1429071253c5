//! # cadence-core
//!
//! Core types for the Cadence lifecycle pipeline orchestrator.
//!
//! ## Core Paradigm
//!
//! - Work is decomposed into typed Tasks placed in ordered Groups
//! - A Group is the unit of verification and commit
//! - Checkpoints are append-only and form the only cross-group shared state
//! - Failing tasks climb a fixed capability ladder, never down it

pub mod config;
mod error;
pub mod fail_open;
mod types;

pub use config::CadenceConfig;
pub use error::{CadenceError, Result};
pub use types::*;
