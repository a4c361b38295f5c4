//! Synthetic problems shared by the engine and workflow tests.

use super::cache::CacheKey;
use super::dispatch::task::Task;
use super::energy_matrix::EnergyMatrix;
use super::evaluation::{EnergyKernel, EvaluationStrategy, Evaluator, KernelError};
use crate::core::forcefield::fingerprint::Fingerprint;
use crate::core::forcefield::scoring::{EvalError, ForceField, PlacedRotamer};
use crate::core::models::assignment::Assignment;
use crate::core::models::conf_space::{ConfSpace, DofBound};
use crate::core::models::ids::{PositionId, RotamerId};
use itertools::Itertools;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Three positions with a mix of flexible and rigid rotamers.
pub(crate) fn flexible_space() -> ConfSpace {
    let mut space = ConfSpace::new();
    let p0 = space.add_position("A1");
    let p1 = space.add_position("A2");
    let p2 = space.add_position("A3");
    space.add_rotamer(p0, "m", vec![DofBound::around("chi1", -60.0, 9.0)]).unwrap();
    space.add_rotamer(p0, "p", vec![DofBound::around("chi1", 60.0, 9.0)]).unwrap();
    space.add_rotamer(p1, "t", vec![DofBound::around("chi1", 180.0, 9.0)]).unwrap();
    space.add_rotamer(p1, "ala", vec![]).unwrap();
    space.add_rotamer(p1, "p", vec![DofBound::around("chi1", 60.0, 9.0)]).unwrap();
    space.add_rotamer(p2, "gly", vec![]).unwrap();
    space.add_rotamer(p2, "m", vec![DofBound::around("chi1", -60.0, 9.0)]).unwrap();
    space
}

/// A rigid space with the given rotamer count per position.
pub(crate) fn rigid_space(sizes: &[usize]) -> ConfSpace {
    let mut space = ConfSpace::new();
    for (i, &n) in sizes.iter().enumerate() {
        let position = space.add_position(format!("P{i}"));
        for r in 0..n {
            space.add_rotamer(position, format!("r{r}"), vec![]).unwrap();
        }
    }
    space
}

/// Force field backed by random lookup tables, optionally with a quadratic penalty
/// pulling every degree of freedom towards `initial + shift`.
pub(crate) struct TableForceField {
    constant: f64,
    singles: Vec<Vec<f64>>,
    pairs: HashMap<CacheKey, f64>,
    stiffness: f64,
    shift: f64,
    infeasible_singles: HashSet<(PositionId, RotamerId)>,
    infeasible_pairs: HashSet<CacheKey>,
    evaluations: AtomicUsize,
}

impl TableForceField {
    pub(crate) fn for_space(space: &ConfSpace, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let sizes = space.sizes();
        let singles = sizes
            .iter()
            .map(|&n| (0..n).map(|_| rng.gen_range(-5.0..5.0)).collect())
            .collect();
        let mut pairs = HashMap::new();
        for (p1, p2) in (0..sizes.len()).tuple_combinations() {
            for (r1, r2) in (0..sizes[p1]).cartesian_product(0..sizes[p2]) {
                pairs.insert(
                    CacheKey::pair(
                        PositionId::from_index(p1),
                        RotamerId::from_index(r1),
                        PositionId::from_index(p2),
                        RotamerId::from_index(r2),
                    ),
                    rng.gen_range(-2.0..2.0),
                );
            }
        }
        Self {
            constant: 1.5,
            singles,
            pairs,
            stiffness: 0.0,
            shift: 0.0,
            infeasible_singles: HashSet::new(),
            infeasible_pairs: HashSet::new(),
            evaluations: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_dof_penalty(mut self, stiffness: f64, shift: f64) -> Self {
        self.stiffness = stiffness;
        self.shift = shift;
        self
    }

    pub(crate) fn with_infeasible_single(
        mut self,
        position: PositionId,
        rotamer: RotamerId,
    ) -> Self {
        self.infeasible_singles.insert((position, rotamer));
        self
    }

    pub(crate) fn with_infeasible_pair(
        mut self,
        pos1: PositionId,
        rot1: RotamerId,
        pos2: PositionId,
        rot2: RotamerId,
    ) -> Self {
        self.infeasible_pairs.insert(CacheKey::pair(pos1, rot1, pos2, rot2));
        self
    }

    pub(crate) fn set_single(&mut self, position: PositionId, rotamer: RotamerId, energy: f64) {
        self.singles[position.index()][rotamer.index()] = energy;
    }

    pub(crate) fn set_pair(
        &mut self,
        pos1: PositionId,
        rot1: RotamerId,
        pos2: PositionId,
        rot2: RotamerId,
        energy: f64,
    ) {
        self.pairs.insert(CacheKey::pair(pos1, rot1, pos2, rot2), energy);
    }

    pub(crate) fn table_single(&self, position: PositionId, rotamer: RotamerId) -> f64 {
        self.singles[position.index()][rotamer.index()]
    }

    pub(crate) fn table_pair(
        &self,
        pos1: PositionId,
        rot1: RotamerId,
        pos2: PositionId,
        rot2: RotamerId,
    ) -> f64 {
        self.pairs[&CacheKey::pair(pos1, rot1, pos2, rot2)]
    }

    pub(crate) fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::SeqCst)
    }

    fn penalty(&self, placed: &PlacedRotamer<'_>) -> f64 {
        placed
            .rotamer
            .dofs
            .iter()
            .zip(placed.dofs)
            .map(|(bound, &value)| self.stiffness * (value - bound.initial - self.shift).powi(2))
            .sum()
    }

    /// Energy of a conformation with every rotamer at its initial degrees of freedom.
    pub(crate) fn rigid_total(&self, space: &ConfSpace, assignment: &Assignment) -> f64 {
        let placed: Vec<_> = assignment.assigned().collect();
        let initial_penalty = |p: PositionId, r: RotamerId| {
            let rotamer = space.rotamer(p, r).unwrap();
            let dofs = rotamer.initial_dofs();
            self.penalty(&PlacedRotamer {
                position: p,
                rotamer,
                dofs: &dofs,
            })
        };
        let mut total = self.constant;
        for (i, &(p1, r1)) in placed.iter().enumerate() {
            total += self.table_single(p1, r1) + initial_penalty(p1, r1);
            for &(p2, r2) in &placed[..i] {
                total += self.table_pair(p1, r1, p2, r2)
                    + initial_penalty(p1, r1)
                    + initial_penalty(p2, r2);
            }
        }
        total
    }
}

impl ForceField for TableForceField {
    fn constant_energy(&self) -> f64 {
        self.constant
    }

    fn fingerprint(&self) -> String {
        let mut fp = Fingerprint::new("table-forcefield");
        fp.f64(self.constant).f64(self.stiffness).f64(self.shift);
        for row in &self.singles {
            fp.f64s(row);
        }
        let pairs: BTreeMap<_, _> = self.pairs.iter().collect();
        for (key, energy) in pairs {
            fp.str(&format!("{key:?}")).f64(*energy);
        }
        let infeasible_singles: BTreeSet<_> = self.infeasible_singles.iter().collect();
        let infeasible_pairs: BTreeSet<_> = self.infeasible_pairs.iter().collect();
        fp.str(&format!("{infeasible_singles:?}{infeasible_pairs:?}"));
        fp.finish()
    }

    fn single_energy(&self, placed: PlacedRotamer<'_>) -> Result<f64, EvalError> {
        self.evaluations.fetch_add(1, Ordering::SeqCst);
        if self
            .infeasible_singles
            .contains(&(placed.position, placed.rotamer.id))
        {
            return Err(EvalError::InvalidGeometry {
                position: placed.position,
                message: "steric overlap".to_string(),
            });
        }
        Ok(self.table_single(placed.position, placed.rotamer.id) + self.penalty(&placed))
    }

    fn pair_energy(
        &self,
        first: PlacedRotamer<'_>,
        second: PlacedRotamer<'_>,
    ) -> Result<f64, EvalError> {
        self.evaluations.fetch_add(1, Ordering::SeqCst);
        let key = CacheKey::pair(
            first.position,
            first.rotamer.id,
            second.position,
            second.rotamer.id,
        );
        if self.infeasible_pairs.contains(&key) {
            return Err(EvalError::Numerical("overflow".to_string()));
        }
        Ok(self.pairs[&key] + self.penalty(&first) + self.penalty(&second))
    }
}

/// A kernel whose device is never present.
pub(crate) struct FailingKernel;

impl EnergyKernel for FailingKernel {
    fn name(&self) -> &str {
        "missing-device"
    }

    fn evaluate(&self, _conf_space: &ConfSpace, _task: &Task) -> Result<f64, KernelError> {
        Err(KernelError::Unavailable("no device".to_string()))
    }
}

/// Every singleton and pair term of `space`, evaluated rigidly.
pub(crate) fn rigid_matrix(
    space: &Arc<ConfSpace>,
    forcefield: Arc<dyn ForceField>,
) -> EnergyMatrix {
    let evaluator = Evaluator::new(space.clone(), forcefield.clone(), EvaluationStrategy::Rigid);
    let sizes = space.sizes();
    let mut matrix = EnergyMatrix::new(&sizes);
    matrix.set_constant(forcefield.constant_energy());
    for (p, &n) in sizes.iter().enumerate() {
        for r in 0..n {
            let (position, rotamer) = (PositionId::from_index(p), RotamerId::from_index(r));
            let output = evaluator.evaluate(&Task::Single { position, rotamer }).unwrap();
            matrix.insert_single(position, rotamer, output.energy);
        }
    }
    for (p1, p2) in (0..sizes.len()).tuple_combinations() {
        for (r1, r2) in (0..sizes[p1]).cartesian_product(0..sizes[p2]) {
            let task = Task::Pair {
                pos1: PositionId::from_index(p1),
                rot1: RotamerId::from_index(r1),
                pos2: PositionId::from_index(p2),
                rot2: RotamerId::from_index(r2),
            };
            let output = evaluator.evaluate(&task).unwrap();
            matrix.insert_pair(
                PositionId::from_index(p1),
                RotamerId::from_index(r1),
                PositionId::from_index(p2),
                RotamerId::from_index(r2),
                output.energy,
            );
        }
    }
    matrix
}

/// Every complete conformation with its matrix energy, lowest first.
pub(crate) fn brute_force(matrix: &EnergyMatrix) -> Vec<(Assignment, f64)> {
    let mut all: Vec<_> = matrix
        .sizes()
        .iter()
        .map(|&n| 0..n)
        .multi_cartesian_product()
        .map(|indices| {
            let assignment = Assignment::from_indices(&indices);
            let energy = matrix.assignment_energy(&assignment).unwrap();
            (assignment, energy)
        })
        .collect();
    all.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    all
}
