use crate::core::models::assignment::Assignment;
use crate::core::models::ids::{PositionId, RotamerId};

/// Singleton and pairwise energies of a conformation space.
///
/// Entries start out absent and are written at most once; a second write of the
/// same entry is ignored. Absent means "not computed yet", never zero. Pair
/// lookups are symmetric by construction: one block is stored per unordered
/// position pair.
#[derive(Debug, Clone)]
pub struct EnergyMatrix {
    constant: f64,
    sizes: Vec<usize>,
    singles: Vec<Vec<Option<f64>>>,
    pairs: Vec<Vec<Option<f64>>>,
}

#[inline]
fn pair_block(low: usize, high: usize) -> usize {
    high * (high - 1) / 2 + low
}

impl EnergyMatrix {
    /// An empty matrix shaped after the per-position rotamer counts.
    pub fn new(sizes: &[usize]) -> Self {
        let singles = sizes.iter().map(|&n| vec![None; n]).collect();
        let mut pairs = Vec::with_capacity(sizes.len() * sizes.len().saturating_sub(1) / 2);
        for high in 0..sizes.len() {
            for low in 0..high {
                pairs.push(vec![None; sizes[low] * sizes[high]]);
            }
        }
        Self {
            constant: 0.0,
            sizes: sizes.to_vec(),
            singles,
            pairs,
        }
    }

    pub fn num_positions(&self) -> usize {
        self.sizes.len()
    }

    pub fn num_rotamers(&self, position: PositionId) -> usize {
        self.sizes.get(position.index()).copied().unwrap_or(0)
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    pub fn constant(&self) -> f64 {
        self.constant
    }

    pub fn set_constant(&mut self, constant: f64) {
        self.constant = constant;
    }

    pub fn single(&self, position: PositionId, rotamer: RotamerId) -> Option<f64> {
        self.singles
            .get(position.index())?
            .get(rotamer.index())
            .copied()
            .flatten()
    }

    pub fn pair(
        &self,
        pos1: PositionId,
        rot1: RotamerId,
        pos2: PositionId,
        rot2: RotamerId,
    ) -> Option<f64> {
        let index = self.pair_index(pos1, rot1, pos2, rot2)?;
        self.pairs[index.0][index.1]
    }

    /// Records a singleton energy unless one is already present.
    pub fn insert_single(&mut self, position: PositionId, rotamer: RotamerId, energy: f64) -> bool {
        let Some(slot) = self
            .singles
            .get_mut(position.index())
            .and_then(|row| row.get_mut(rotamer.index()))
        else {
            return false;
        };
        if slot.is_some() {
            return false;
        }
        *slot = Some(energy);
        true
    }

    /// Records a pair energy unless one is already present.
    pub fn insert_pair(
        &mut self,
        pos1: PositionId,
        rot1: RotamerId,
        pos2: PositionId,
        rot2: RotamerId,
        energy: f64,
    ) -> bool {
        let Some((block, offset)) = self.pair_index(pos1, rot1, pos2, rot2) else {
            return false;
        };
        let slot = &mut self.pairs[block][offset];
        if slot.is_some() {
            return false;
        }
        *slot = Some(energy);
        true
    }

    /// Sum of the constant and every term between assigned positions, or `None`
    /// when a needed term has not been computed.
    pub fn assignment_energy(&self, assignment: &Assignment) -> Option<f64> {
        let assigned: Vec<_> = assignment.assigned().collect();
        let mut total = self.constant;
        for (i, &(p1, r1)) in assigned.iter().enumerate() {
            total += self.single(p1, r1)?;
            for &(p2, r2) in &assigned[..i] {
                total += self.pair(p1, r1, p2, r2)?;
            }
        }
        Some(total)
    }

    fn pair_index(
        &self,
        pos1: PositionId,
        rot1: RotamerId,
        pos2: PositionId,
        rot2: RotamerId,
    ) -> Option<(usize, usize)> {
        let (p1, r1, p2, r2) = (pos1.index(), rot1.index(), pos2.index(), rot2.index());
        if p1 == p2 || p1.max(p2) >= self.sizes.len() {
            return None;
        }
        let ((low, r_low), (high, r_high)) = if p1 < p2 {
            ((p1, r1), (p2, r2))
        } else {
            ((p2, r2), (p1, r1))
        };
        if r_low >= self.sizes[low] || r_high >= self.sizes[high] {
            return None;
        }
        Some((pair_block(low, high), r_low * self.sizes[high] + r_high))
    }
}
