use crate::core::models::assignment::Assignment;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A partial assignment with the exact energy of its fixed terms and a lower bound
/// on every completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchNode {
    pub assignment: Assignment,
    /// Constant, singles, and pairs among assigned positions.
    pub gscore: f64,
    pub bound: f64,
}

impl SearchNode {
    pub fn is_complete(&self) -> bool {
        self.assignment.is_complete()
    }
}

/// A node tagged with its insertion sequence, which breaks bound ties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedNode {
    pub sequence: u64,
    pub node: SearchNode,
}

impl Ord for QueuedNode {
    fn cmp(&self, other: &Self) -> Ordering {
        self.node
            .bound
            .total_cmp(&other.node.bound)
            .then(self.sequence.cmp(&other.sequence))
    }
}

impl PartialOrd for QueuedNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueuedNode {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedNode {}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued(bound: f64, sequence: u64) -> QueuedNode {
        QueuedNode {
            sequence,
            node: SearchNode {
                assignment: Assignment::empty(2),
                gscore: 0.0,
                bound,
            },
        }
    }

    #[test]
    fn ordering_is_by_bound_then_sequence() {
        let mut nodes = vec![queued(1.0, 3), queued(-2.0, 4), queued(1.0, 1), queued(0.5, 0)];
        nodes.sort();
        let order: Vec<u64> = nodes.iter().map(|n| n.sequence).collect();
        assert_eq!(order, vec![4, 0, 1, 3]);
    }

    #[test]
    fn infinite_bounds_sort_last() {
        assert!(queued(f64::INFINITY, 0) > queued(1e300, 9));
    }
}
