use crate::core::models::assignment::Assignment;
use crate::core::models::ids::PositionId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A complete conformation as it leaves the search: its lower-bound score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredConf {
    pub assignment: Assignment,
    pub score: f64,
}

/// A complete conformation with both its search score and its evaluated energy.
///
/// With rigid evaluation the two are equal; with minimized evaluation `score` is
/// the matrix lower bound and `energy` the minimized total energy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergiedConf {
    pub assignment: Assignment,
    pub score: f64,
    pub energy: f64,
    pub converged: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfeasibleReason {
    /// Dead-end elimination emptied a position's candidate set.
    PruningExhausted { position: PositionId },
    /// The search space was exhausted without producing a finite conformation.
    FrontierExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Requested,
    ExpansionBudget,
    TimeBudget,
}

/// Terminal outcome of a design run. Infeasibility and early stops are results,
/// not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesignStatus {
    Solved,
    Infeasible(InfeasibleReason),
    Stopped(StopReason),
}

impl DesignStatus {
    pub fn is_solved(&self) -> bool {
        matches!(self, Self::Solved)
    }
}

impl fmt::Display for DesignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Solved => write!(f, "solved"),
            Self::Infeasible(InfeasibleReason::PruningExhausted { position }) => {
                write!(f, "infeasible: no candidates left at {position}")
            }
            Self::Infeasible(InfeasibleReason::FrontierExhausted) => {
                write!(f, "infeasible: search space exhausted")
            }
            Self::Stopped(reason) => write!(f, "stopped: {reason:?}"),
        }
    }
}

/// Cooperative cancellation flag shared between a running search and its owner.
///
/// The search only observes it between node expansions, so the frontier is always
/// consistent when a stop takes effect.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_signal_is_shared_between_clones() {
        let signal = StopSignal::new();
        let handle = signal.clone();
        assert!(!signal.is_stopped());
        handle.request_stop();
        assert!(signal.is_stopped());
    }

    #[test]
    fn status_display_names_the_empty_position() {
        let status = DesignStatus::Infeasible(InfeasibleReason::PruningExhausted {
            position: PositionId(3),
        });
        assert_eq!(status.to_string(), "infeasible: no candidates left at pos3");
        assert!(!status.is_solved());
    }
}
