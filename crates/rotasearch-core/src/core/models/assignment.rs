use super::ids::{PositionId, RotamerId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A mapping from positions to at most one rotamer each.
///
/// An assignment is *complete* when every position has a rotamer and *partial*
/// otherwise. Search nodes carry partial assignments; emitted conformations are
/// always complete.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Assignment {
    slots: Vec<Option<RotamerId>>,
}

impl Assignment {
    /// An assignment over `num_positions` positions with nothing assigned.
    pub fn empty(num_positions: usize) -> Self {
        Self {
            slots: vec![None; num_positions],
        }
    }

    /// A complete assignment, one rotamer per position in position order.
    pub fn complete(rotamers: impl IntoIterator<Item = RotamerId>) -> Self {
        Self {
            slots: rotamers.into_iter().map(Some).collect(),
        }
    }

    pub fn from_indices(indices: &[usize]) -> Self {
        Self::complete(indices.iter().map(|&i| RotamerId::from_index(i)))
    }

    #[inline]
    pub fn get(&self, position: PositionId) -> Option<RotamerId> {
        self.slots.get(position.index()).copied().flatten()
    }

    #[inline]
    pub fn is_assigned(&self, position: PositionId) -> bool {
        self.get(position).is_some()
    }

    pub fn assign(&mut self, position: PositionId, rotamer: RotamerId) {
        if let Some(slot) = self.slots.get_mut(position.index()) {
            *slot = Some(rotamer);
        }
    }

    /// A copy of this assignment with one more position fixed.
    pub fn with(&self, position: PositionId, rotamer: RotamerId) -> Self {
        let mut child = self.clone();
        child.assign(position, rotamer);
        child
    }

    pub fn num_positions(&self) -> usize {
        self.slots.len()
    }

    pub fn num_assigned(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    pub fn assigned(&self) -> impl Iterator<Item = (PositionId, RotamerId)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.map(|r| (PositionId::from_index(i), r)))
    }

    pub fn unassigned(&self) -> impl Iterator<Item = PositionId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_none())
            .map(|(i, _)| PositionId::from_index(i))
    }

    /// Rotamer indices in position order, or `None` for a partial assignment.
    pub fn to_indices(&self) -> Option<Vec<usize>> {
        self.slots.iter().map(|s| s.map(RotamerId::index)).collect()
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, slot) in self.slots.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            match slot {
                Some(r) => write!(f, "{}", r.0)?,
                None => write!(f, "-")?,
            }
        }
        write!(f, "]")
    }
}
