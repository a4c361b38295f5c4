use crate::core::models::assignment::Assignment;
use crate::core::models::ids::{PositionId, RotamerId};
use crate::engine::cache::CacheKey;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A self-contained unit of evaluation work.
///
/// A task names the terms to evaluate by identity only, so it can be executed on
/// any worker holding the same conformation space and force field, including one
/// in another process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Task {
    Single {
        position: PositionId,
        rotamer: RotamerId,
    },
    Pair {
        pos1: PositionId,
        rot1: RotamerId,
        pos2: PositionId,
        rot2: RotamerId,
    },
    /// Total energy of an assignment, every term evaluated together.
    Conformation { assignment: Assignment },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// One matrix term.
    Term,
    /// A whole conformation.
    Conformation,
}

impl Task {
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::Single { .. } | Self::Pair { .. } => TaskKind::Term,
            Self::Conformation { .. } => TaskKind::Conformation,
        }
    }

    /// Content address of the matrix term this task produces.
    pub fn cache_key(&self) -> Option<CacheKey> {
        match *self {
            Self::Single { position, rotamer } => Some(CacheKey::single(position, rotamer)),
            Self::Pair {
                pos1,
                rot1,
                pos2,
                rot2,
            } => Some(CacheKey::pair(pos1, rot1, pos2, rot2)),
            Self::Conformation { .. } => None,
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single { position, rotamer } => write!(f, "single({position}:{rotamer})"),
            Self::Pair {
                pos1,
                rot1,
                pos2,
                rot2,
            } => write!(f, "pair({pos1}:{rot1}, {pos2}:{rot2})"),
            Self::Conformation { assignment } => write!(f, "conformation{assignment}"),
        }
    }
}

/// Result of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    /// `+inf` marks an infeasible combination.
    pub energy: f64,
    pub converged: bool,
    /// Final degrees of freedom of every placed rotamer, concatenated in position order.
    pub dofs: Vec<f64>,
}

impl TaskOutput {
    pub fn infeasible(dofs: Vec<f64>) -> Self {
        Self {
            energy: f64::INFINITY,
            converged: true,
            dofs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_tasks_share_a_cache_key_in_either_order() {
        let forward = Task::Pair {
            pos1: PositionId(0),
            rot1: RotamerId(2),
            pos2: PositionId(1),
            rot2: RotamerId(0),
        };
        let backward = Task::Pair {
            pos1: PositionId(1),
            rot1: RotamerId(0),
            pos2: PositionId(0),
            rot2: RotamerId(2),
        };
        assert_eq!(forward.cache_key(), backward.cache_key());
        assert_eq!(forward.kind(), TaskKind::Term);
        assert_eq!(forward.to_string(), "pair(pos0:rot2, pos1:rot0)");
    }

    #[test]
    fn conformation_tasks_have_no_cache_key() {
        let task = Task::Conformation {
            assignment: Assignment::from_indices(&[1, 0]),
        };
        assert_eq!(task.cache_key(), None);
        assert_eq!(task.kind(), TaskKind::Conformation);
        assert_eq!(task.to_string(), "conformation[1 0]");
    }
}
