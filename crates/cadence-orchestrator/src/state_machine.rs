//! Pure state machine for lifecycle control flow
//!
//! This module implements a pure functional state machine with NO I/O.
//! All state transitions are deterministic and testable.
//!
//! - Pure function: transition(state, event, limits) -> (state, actions)
//! - Phases advance one at a time; completing any phase other than the
//!   current one is a halt, never a skip
//! - Invalid transitions go to Halted (never panic)

use cadence_core::Phase;
use serde::{Deserialize, Serialize};

/// Lifecycle state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum State {
    /// No run in progress
    Idle,
    /// Working on `phase`; `cycle` counts corrective cycles started so far
    Active { phase: Phase, cycle: u32 },
    /// Stopped at `phase` waiting for a human; resumable
    Paused { phase: Phase, reason: String },
    /// Stopped by an error
    Halted { phase: Option<Phase>, reason: String },
    /// Every phase finished
    Complete,
}

impl State {
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::Active { phase, .. } | Self::Paused { phase, .. } => Some(*phase),
            Self::Halted { phase, .. } => *phase,
            Self::Idle | Self::Complete => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Paused { .. } | Self::Halted { .. } | Self::Complete
        )
    }
}

/// Events that trigger state transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Start a new run
    Start,
    /// `phase` met its exit criterion
    ExitCriterionMet { phase: Phase },
    /// `phase` cannot meet its exit criterion without a human
    ExitCriterionUnmet { phase: Phase, reason: String },
    /// The latest review still has critical issues
    ReviewNoGo { critical: usize },
    /// Unrecoverable error
    Halt { reason: String },
}

/// Actions to execute as side effects of transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    EnterPhase { phase: Phase },
    /// Schedule a corrective group and re-review
    BeginCorrectiveCycle { cycle: u32 },
    EscalateToManual { reason: String },
    PersistRunState,
    LogActivity { message: String },
}

/// Bounds the transition function needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_corrective_cycles: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_corrective_cycles: 2,
        }
    }
}

/// Pure state transition function
///
/// Takes current state and event, returns new state and actions to execute.
/// This function is completely deterministic and has no side effects.
///
/// # Invalid Transitions
/// Any invalid transition results in a Halted state with descriptive error.
/// This function never panics.
pub fn transition(state: State, event: Event, limits: &Limits) -> (State, Vec<Action>) {
    match (state, event) {
        (State::Idle, Event::Start) => {
            let phase = Phase::first();
            (
                State::Active { phase, cycle: 0 },
                vec![
                    Action::LogActivity {
                        message: "Starting run".to_string(),
                    },
                    Action::EnterPhase { phase },
                ],
            )
        }

        (State::Active { phase, cycle }, Event::ExitCriterionMet { phase: done }) => {
            if done != phase {
                return halted(
                    Some(phase),
                    format!(
                        "phase {} reported complete while {} is in progress",
                        done, phase
                    ),
                );
            }
            match phase.next() {
                Some(next) => (
                    State::Active { phase: next, cycle },
                    vec![
                        Action::LogActivity {
                            message: format!("Phase {} complete", phase),
                        },
                        Action::PersistRunState,
                        Action::EnterPhase { phase: next },
                    ],
                ),
                None => (
                    State::Complete,
                    vec![
                        Action::LogActivity {
                            message: "Run complete".to_string(),
                        },
                        Action::PersistRunState,
                    ],
                ),
            }
        }

        (State::Active { phase, .. }, Event::ExitCriterionUnmet { phase: at, reason }) => {
            if at != phase {
                return halted(
                    Some(phase),
                    format!("phase {} reported unmet while {} is in progress", at, phase),
                );
            }
            (
                State::Paused {
                    phase,
                    reason: reason.clone(),
                },
                vec![
                    Action::LogActivity {
                        message: format!("Phase {} paused: {}", phase, reason),
                    },
                    Action::EscalateToManual { reason },
                    Action::PersistRunState,
                ],
            )
        }

        (State::Active { phase: Phase::Fix, cycle }, Event::ReviewNoGo { critical }) => {
            if cycle < limits.max_corrective_cycles {
                let next = cycle + 1;
                (
                    State::Active {
                        phase: Phase::Fix,
                        cycle: next,
                    },
                    vec![
                        Action::LogActivity {
                            message: format!(
                                "Review no-go with {} critical issue(s), corrective cycle {}/{}",
                                critical, next, limits.max_corrective_cycles
                            ),
                        },
                        Action::BeginCorrectiveCycle { cycle: next },
                    ],
                )
            } else {
                let reason = format!(
                    "{} critical issue(s) remain after {} corrective cycle(s)",
                    critical, cycle
                );
                (
                    State::Paused {
                        phase: Phase::Fix,
                        reason: reason.clone(),
                    },
                    vec![
                        Action::LogActivity {
                            message: format!("Pausing for manual resolution: {}", reason),
                        },
                        Action::EscalateToManual { reason },
                        Action::PersistRunState,
                    ],
                )
            }
        }

        (State::Active { phase, .. }, Event::Halt { reason }) => (
            State::Halted {
                phase: Some(phase),
                reason: reason.clone(),
            },
            vec![
                Action::LogActivity {
                    message: format!("Halted in {}: {}", phase, reason),
                },
                Action::PersistRunState,
            ],
        ),

        (State::Idle, Event::Halt { reason }) => (
            State::Halted {
                phase: None,
                reason: reason.clone(),
            },
            vec![Action::LogActivity {
                message: format!("Halted before start: {}", reason),
            }],
        ),

        // Terminal states - no valid transitions
        (state, event) if state.is_terminal() => halted(
            state.phase(),
            format!("Invalid transition from terminal state {:?} on event {:?}", state, event),
        ),

        // All other invalid transitions
        (state, event) => halted(
            state.phase(),
            format!(
                "Invalid state transition: {:?} cannot handle event {:?}",
                state, event
            ),
        ),
    }
}

fn halted(phase: Option<Phase>, reason: String) -> (State, Vec<Action>) {
    (
        State::Halted {
            phase,
            reason: reason.clone(),
        },
        vec![Action::LogActivity {
            message: format!("Error: {}", reason),
        }],
    )
}
