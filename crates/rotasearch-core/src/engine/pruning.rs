use super::config::{DeeSchedule, PruningConfig};
use super::energy_matrix::EnergyMatrix;
use crate::core::models::ids::{PositionId, RotamerId};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};

type PairKey = (PositionId, RotamerId, PositionId, RotamerId);

#[inline]
fn pair_key(pos1: PositionId, rot1: RotamerId, pos2: PositionId, rot2: RotamerId) -> PairKey {
    if pos1 <= pos2 {
        (pos1, rot1, pos2, rot2)
    } else {
        (pos2, rot2, pos1, rot1)
    }
}

/// The rotamers and rotamer pairs still eligible for search.
///
/// The set only ever shrinks: there is no operation that restores a pruned rotamer
/// or pair.
#[derive(Debug, Clone, PartialEq)]
pub struct PrunedSet {
    alive: Vec<Vec<bool>>,
    pruned_pairs: HashSet<PairKey>,
}

impl PrunedSet {
    /// Every rotamer and pair eligible.
    pub fn full(sizes: &[usize]) -> Self {
        Self {
            alive: sizes.iter().map(|&n| vec![true; n]).collect(),
            pruned_pairs: HashSet::new(),
        }
    }

    pub fn num_positions(&self) -> usize {
        self.alive.len()
    }

    pub fn is_alive(&self, position: PositionId, rotamer: RotamerId) -> bool {
        self.alive
            .get(position.index())
            .and_then(|row| row.get(rotamer.index()))
            .copied()
            .unwrap_or(false)
    }

    /// Whether both rotamers are alive and the pair itself has not been pruned.
    pub fn is_pair_alive(
        &self,
        pos1: PositionId,
        rot1: RotamerId,
        pos2: PositionId,
        rot2: RotamerId,
    ) -> bool {
        self.is_alive(pos1, rot1)
            && self.is_alive(pos2, rot2)
            && !self.pruned_pairs.contains(&pair_key(pos1, rot1, pos2, rot2))
    }

    pub fn alive_rotamers(&self, position: PositionId) -> Vec<RotamerId> {
        self.alive
            .get(position.index())
            .map(|row| {
                row.iter()
                    .enumerate()
                    .filter(|(_, alive)| **alive)
                    .map(|(r, _)| RotamerId::from_index(r))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn num_alive(&self, position: PositionId) -> usize {
        self.alive
            .get(position.index())
            .map_or(0, |row| row.iter().filter(|a| **a).count())
    }

    pub fn num_pruned_pairs(&self) -> usize {
        self.pruned_pairs.len()
    }

    pub fn prune_rotamer(&mut self, position: PositionId, rotamer: RotamerId) -> bool {
        match self
            .alive
            .get_mut(position.index())
            .and_then(|row| row.get_mut(rotamer.index()))
        {
            Some(alive) if *alive => {
                *alive = false;
                true
            }
            _ => false,
        }
    }

    pub fn prune_pair(
        &mut self,
        pos1: PositionId,
        rot1: RotamerId,
        pos2: PositionId,
        rot2: RotamerId,
    ) -> bool {
        self.pruned_pairs.insert(pair_key(pos1, rot1, pos2, rot2))
    }

    /// First position without any eligible rotamer.
    pub fn empty_position(&self) -> Option<PositionId> {
        self.alive
            .iter()
            .position(|row| !row.iter().any(|a| *a))
            .map(PositionId::from_index)
    }

    /// Number of conformations built from alive rotamers (pruned pairs not subtracted).
    pub fn num_conformations(&self) -> f64 {
        (0..self.alive.len())
            .map(|p| self.num_alive(PositionId::from_index(p)) as f64)
            .product()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruningOutcome {
    Feasible,
    /// Every candidate at this position was eliminated.
    Exhausted { position: PositionId },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PruningReport {
    pub rounds: usize,
    pub rotamers_pruned: usize,
    pub pairs_pruned: usize,
    pub outcome: PruningOutcome,
}

/// Dead-end elimination over a complete energy matrix.
///
/// `interval` is the dominance margin: a candidate is eliminated only when some
/// competitor beats it by more than `interval` in every context, so every
/// conformation within `interval` of the optimum survives. `None` disables the
/// dominance criteria and keeps only the infeasibility and steric checks.
pub struct DeePruner<'a> {
    matrix: &'a EnergyMatrix,
    schedule: DeeSchedule,
    interval: Option<f64>,
    max_rounds: usize,
    steric_threshold: Option<f64>,
}

impl<'a> DeePruner<'a> {
    pub fn new(matrix: &'a EnergyMatrix, config: &PruningConfig, interval: Option<f64>) -> Self {
        Self {
            matrix,
            schedule: config.schedule,
            interval,
            max_rounds: config.max_rounds,
            steric_threshold: config.steric_threshold,
        }
    }

    #[instrument(skip_all, name = "dead_end_elimination")]
    pub fn run(&self, set: &mut PrunedSet) -> PruningReport {
        let mut report = PruningReport {
            rounds: 0,
            rotamers_pruned: 0,
            pairs_pruned: 0,
            outcome: PruningOutcome::Feasible,
        };

        let (rotamers, pairs) = self.prune_infeasible(set);
        report.rotamers_pruned += rotamers;
        report.pairs_pruned += pairs;
        debug!(rotamers, pairs, "Removed infeasible and clashing candidates");

        if let Some(interval) = self.interval {
            while report.rounds < self.max_rounds && set.empty_position().is_none() {
                report.rounds += 1;
                let mut changed = self.singles_pass(set, interval);
                report.rotamers_pruned += changed;
                if self.schedule == DeeSchedule::SinglesThenPairs
                    && set.empty_position().is_none()
                {
                    let pairs = self.pairs_pass(set, interval);
                    report.pairs_pruned += pairs;
                    changed += pairs;
                }
                debug!(round = report.rounds, changed, "DEE round complete");
                if changed == 0 {
                    break;
                }
            }
        }

        if let Some(position) = set.empty_position() {
            warn!(%position, "Pruning eliminated every candidate at a position");
            report.outcome = PruningOutcome::Exhausted { position };
        }
        info!(
            rounds = report.rounds,
            rotamers = report.rotamers_pruned,
            pairs = report.pairs_pruned,
            "Pruning finished"
        );
        report
    }

    fn over_limit(&self, energy: f64) -> bool {
        energy.is_infinite() || self.steric_threshold.is_some_and(|t| energy > t)
    }

    fn single(&self, p: PositionId, r: RotamerId) -> f64 {
        self.matrix.single(p, r).unwrap_or(f64::INFINITY)
    }

    fn pair(&self, p1: PositionId, r1: RotamerId, p2: PositionId, r2: RotamerId) -> f64 {
        self.matrix.pair(p1, r1, p2, r2).unwrap_or(f64::INFINITY)
    }

    fn positions(&self) -> Vec<PositionId> {
        (0..self.matrix.num_positions())
            .map(PositionId::from_index)
            .collect()
    }

    fn prune_infeasible(&self, set: &mut PrunedSet) -> (usize, usize) {
        let positions = self.positions();
        let mut rotamers = 0;
        let mut pairs = 0;
        for &p in &positions {
            for r in set.alive_rotamers(p) {
                if self.over_limit(self.single(p, r)) && set.prune_rotamer(p, r) {
                    rotamers += 1;
                }
            }
        }
        for (i, &p1) in positions.iter().enumerate() {
            for &p2 in &positions[i + 1..] {
                for r1 in set.alive_rotamers(p1) {
                    for r2 in set.alive_rotamers(p2) {
                        if self.over_limit(self.pair(p1, r1, p2, r2))
                            && set.prune_pair(p1, r1, p2, r2)
                        {
                            pairs += 1;
                        }
                    }
                }
            }
        }
        (rotamers, pairs)
    }

    /// Goldstein singles criterion evaluated against a snapshot of `set`; all
    /// eliminations found in the pass are applied together.
    fn singles_pass(&self, set: &mut PrunedSet, interval: f64) -> usize {
        let positions = self.positions();
        let snapshot: &PrunedSet = set;

        #[cfg(not(feature = "parallel"))]
        let iterator = positions.iter();
        #[cfg(feature = "parallel")]
        let iterator = positions.par_iter();

        let doomed: Vec<Vec<(PositionId, RotamerId)>> = iterator
            .map(|&p| {
                let candidates = snapshot.alive_rotamers(p);
                candidates
                    .iter()
                    .copied()
                    .filter(|&r| {
                        let dominated = candidates.iter().any(|&rc| {
                            rc != r && self.dominates_single(snapshot, p, r, rc, interval)
                        });
                        dominated || !self.has_partners(snapshot, p, r)
                    })
                    .map(|r| (p, r))
                    .collect()
            })
            .collect();

        doomed
            .into_iter()
            .flatten()
            .filter(|&(p, r)| set.prune_rotamer(p, r))
            .count()
    }

    /// Whether `r` has at least one compatible partner at every other position.
    fn has_partners(&self, set: &PrunedSet, p: PositionId, r: RotamerId) -> bool {
        self.positions()
            .into_iter()
            .filter(|&q| q != p)
            .all(|q| {
                set.alive_rotamers(q)
                    .into_iter()
                    .any(|s| set.is_pair_alive(p, r, q, s))
            })
    }

    /// Whether swapping `r` for `rc` at `p` lowers the energy by more than `interval`
    /// in every context built from eligible rotamers.
    fn dominates_single(
        &self,
        set: &PrunedSet,
        p: PositionId,
        r: RotamerId,
        rc: RotamerId,
        interval: f64,
    ) -> bool {
        let mut diff = self.single(p, r) - self.single(p, rc);
        for q in self.positions() {
            if q == p {
                continue;
            }
            let worst = set
                .alive_rotamers(q)
                .into_iter()
                .filter(|&s| set.is_pair_alive(p, r, q, s))
                .map(|s| {
                    let competitor = if set.is_pair_alive(p, rc, q, s) {
                        self.pair(p, rc, q, s)
                    } else {
                        f64::INFINITY
                    };
                    self.pair(p, r, q, s) - competitor
                })
                .fold(f64::INFINITY, f64::min);
            if worst == f64::INFINITY {
                // No compatible partner at q; handled by the partner check.
                return false;
            }
            diff += worst;
            if diff.is_nan() || diff == f64::NEG_INFINITY {
                return false;
            }
        }
        diff > interval
    }

    /// Goldstein pairs criterion over every alive pair of every position pair.
    fn pairs_pass(&self, set: &mut PrunedSet, interval: f64) -> usize {
        let positions = self.positions();
        let position_pairs: Vec<(PositionId, PositionId)> = positions
            .iter()
            .enumerate()
            .flat_map(|(i, &p1)| positions[i + 1..].iter().map(move |&p2| (p1, p2)))
            .collect();
        let snapshot: &PrunedSet = set;

        #[cfg(not(feature = "parallel"))]
        let iterator = position_pairs.iter();
        #[cfg(feature = "parallel")]
        let iterator = position_pairs.par_iter();

        let doomed: Vec<Vec<PairKey>> = iterator
            .map(|&(p1, p2)| {
                let alive_pairs: Vec<(RotamerId, RotamerId)> = snapshot
                    .alive_rotamers(p1)
                    .into_iter()
                    .flat_map(|r1| snapshot.alive_rotamers(p2).into_iter().map(move |r2| (r1, r2)))
                    .filter(|&(r1, r2)| snapshot.is_pair_alive(p1, r1, p2, r2))
                    .collect();
                alive_pairs
                    .iter()
                    .copied()
                    .filter(|&target| {
                        alive_pairs.iter().any(|&competitor| {
                            competitor != target
                                && self.dominates_pair(
                                    snapshot,
                                    (p1, p2),
                                    target,
                                    competitor,
                                    interval,
                                )
                        })
                    })
                    .map(|(r1, r2)| (p1, r1, p2, r2))
                    .collect()
            })
            .collect();

        doomed
            .into_iter()
            .flatten()
            .filter(|&(p1, r1, p2, r2)| set.prune_pair(p1, r1, p2, r2))
            .count()
    }

    fn dominates_pair(
        &self,
        set: &PrunedSet,
        (p1, p2): (PositionId, PositionId),
        (r1, r2): (RotamerId, RotamerId),
        (c1, c2): (RotamerId, RotamerId),
        interval: f64,
    ) -> bool {
        let internal = |a: RotamerId, b: RotamerId| {
            self.single(p1, a) + self.single(p2, b) + self.pair(p1, a, p2, b)
        };
        let mut diff = internal(r1, r2) - internal(c1, c2);
        for q in self.positions() {
            if q == p1 || q == p2 {
                continue;
            }
            let worst = set
                .alive_rotamers(q)
                .into_iter()
                .filter(|&s| set.is_pair_alive(p1, r1, q, s) && set.is_pair_alive(p2, r2, q, s))
                .map(|s| {
                    let competitor_alive =
                        set.is_pair_alive(p1, c1, q, s) && set.is_pair_alive(p2, c2, q, s);
                    let competitor = if competitor_alive {
                        self.pair(p1, c1, q, s) + self.pair(p2, c2, q, s)
                    } else {
                        f64::INFINITY
                    };
                    self.pair(p1, r1, q, s) + self.pair(p2, r2, q, s) - competitor
                })
                .fold(f64::INFINITY, f64::min);
            if worst == f64::INFINITY {
                return false;
            }
            diff += worst;
            if diff.is_nan() || diff == f64::NEG_INFINITY {
                return false;
            }
        }
        diff > interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::forcefield::scoring::ForceField;
    use crate::engine::fixtures::{TableForceField, brute_force, rigid_matrix, rigid_space};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::Arc;

    fn config(schedule: DeeSchedule) -> PruningConfig {
        PruningConfig {
            schedule,
            ..PruningConfig::default()
        }
    }

    fn p(i: u32) -> PositionId {
        PositionId(i)
    }

    fn r(i: u32) -> RotamerId {
        RotamerId(i)
    }

    #[test]
    fn pruned_set_only_shrinks() {
        let mut set = PrunedSet::full(&[2, 3]);
        assert_eq!(set.num_conformations(), 6.0);
        assert!(set.prune_rotamer(p(1), r(2)));
        assert!(!set.prune_rotamer(p(1), r(2)));
        assert!(set.prune_pair(p(1), r(0), p(0), r(1)));
        assert!(!set.is_pair_alive(p(0), r(1), p(1), r(0)));
        assert!(set.is_pair_alive(p(0), r(0), p(1), r(0)));
        assert_eq!(set.alive_rotamers(p(1)), vec![r(0), r(1)]);
        assert_eq!(set.num_conformations(), 4.0);
        assert_eq!(set.empty_position(), None);
    }

    #[test]
    fn clearly_dominated_rotamer_is_eliminated() {
        let space = Arc::new(rigid_space(&[2, 2]));
        let mut ff = TableForceField::for_space(&space, 0);
        ff.set_single(p(0), r(0), 10.0);
        ff.set_single(p(0), r(1), -10.0);
        let matrix = rigid_matrix(&space, Arc::new(ff));

        let mut set = PrunedSet::full(matrix.sizes());
        let report =
            DeePruner::new(&matrix, &config(DeeSchedule::SinglesOnly), Some(0.0)).run(&mut set);

        assert!(!set.is_alive(p(0), r(0)));
        assert!(set.is_alive(p(0), r(1)));
        assert!(report.rotamers_pruned >= 1);
        assert_eq!(report.outcome, PruningOutcome::Feasible);
    }

    #[test]
    fn infeasible_entries_are_removed_without_dominance_pruning() {
        let space = Arc::new(rigid_space(&[2, 2]));
        let ff = TableForceField::for_space(&space, 4)
            .with_infeasible_single(p(1), r(0))
            .with_infeasible_pair(p(0), r(0), p(1), r(1));
        let matrix = rigid_matrix(&space, Arc::new(ff));

        let mut set = PrunedSet::full(matrix.sizes());
        let report = DeePruner::new(&matrix, &PruningConfig::default(), None).run(&mut set);

        assert!(!set.is_alive(p(1), r(0)));
        assert!(!set.is_pair_alive(p(0), r(0), p(1), r(1)));
        assert_eq!(report.rounds, 0);
        assert!(set.is_alive(p(0), r(0)));
    }

    #[test]
    fn rotamer_without_compatible_partner_is_eliminated() {
        let space = Arc::new(rigid_space(&[2, 1]));
        let ff = TableForceField::for_space(&space, 8).with_infeasible_pair(p(0), r(1), p(1), r(0));
        let matrix = rigid_matrix(&space, Arc::new(ff));

        let mut set = PrunedSet::full(matrix.sizes());
        DeePruner::new(&matrix, &PruningConfig::default(), Some(f64::MAX)).run(&mut set);
        assert!(!set.is_alive(p(0), r(1)));
        assert!(set.is_alive(p(0), r(0)));
    }

    #[test]
    fn emptied_position_is_reported_as_exhausted() {
        let space = Arc::new(rigid_space(&[2, 1]));
        let ff = TableForceField::for_space(&space, 2).with_infeasible_single(p(1), r(0));
        let matrix = rigid_matrix(&space, Arc::new(ff));

        let mut set = PrunedSet::full(matrix.sizes());
        let report = DeePruner::new(&matrix, &PruningConfig::default(), Some(0.0)).run(&mut set);
        assert_eq!(report.outcome, PruningOutcome::Exhausted { position: p(1) });
    }

    #[test]
    fn steric_threshold_removes_high_energy_terms() {
        let space = Arc::new(rigid_space(&[2, 2]));
        let mut ff = TableForceField::for_space(&space, 6);
        ff.set_single(p(0), r(1), 500.0);
        ff.set_pair(p(0), r(0), p(1), r(1), 250.0);
        let matrix = rigid_matrix(&space, Arc::new(ff));
        let config = PruningConfig {
            steric_threshold: Some(100.0),
            ..PruningConfig::default()
        };

        let mut set = PrunedSet::full(matrix.sizes());
        let report = DeePruner::new(&matrix, &config, None).run(&mut set);
        assert!(!set.is_alive(p(0), r(1)));
        assert!(!set.is_pair_alive(p(0), r(0), p(1), r(1)));
        assert_eq!(report.pairs_pruned, 1);
        assert_eq!(set.num_pruned_pairs(), 1);
    }

    #[test]
    fn pruning_never_removes_the_global_optimum() {
        let mut rng = StdRng::seed_from_u64(2024);
        for instance in 0..60 {
            let positions = rng.gen_range(2..=5);
            let sizes: Vec<usize> = (0..positions).map(|_| rng.gen_range(1..=4)).collect();
            let space = Arc::new(rigid_space(&sizes));
            let ff = Arc::new(TableForceField::for_space(&space, instance));
            let matrix = rigid_matrix(&space, ff.clone() as Arc<dyn ForceField>);
            let optimum = brute_force(&matrix)[0].0.clone();

            for schedule in [DeeSchedule::SinglesOnly, DeeSchedule::SinglesThenPairs] {
                let mut set = PrunedSet::full(&sizes);
                let report = DeePruner::new(&matrix, &config(schedule), Some(0.0)).run(&mut set);
                assert_eq!(report.outcome, PruningOutcome::Feasible);
                let placed: Vec<_> = optimum.assigned().collect();
                for (i, &(p1, r1)) in placed.iter().enumerate() {
                    assert!(set.is_alive(p1, r1), "instance {instance}: pruned {p1}:{r1}");
                    for &(p2, r2) in &placed[..i] {
                        assert!(set.is_pair_alive(p1, r1, p2, r2), "instance {instance}");
                    }
                }
            }
        }
    }

    #[test]
    fn interval_pruning_keeps_every_conformation_inside_the_window() {
        let mut rng = StdRng::seed_from_u64(77);
        for instance in 0..30 {
            let sizes: Vec<usize> = (0..4).map(|_| rng.gen_range(2..=3)).collect();
            let space = Arc::new(rigid_space(&sizes));
            let ff = TableForceField::for_space(&space, 500 + instance);
            let matrix = rigid_matrix(&space, Arc::new(ff));
            let all = brute_force(&matrix);
            let window = 1.5;

            let mut set = PrunedSet::full(&sizes);
            DeePruner::new(&matrix, &PruningConfig::default(), Some(window)).run(&mut set);

            for (assignment, energy) in all.iter().take_while(|(_, e)| *e <= all[0].1 + window) {
                let placed: Vec<_> = assignment.assigned().collect();
                for (i, &(p1, r1)) in placed.iter().enumerate() {
                    assert!(set.is_alive(p1, r1), "instance {instance}: {assignment} at {energy}");
                    for &(p2, r2) in &placed[..i] {
                        assert!(set.is_pair_alive(p1, r1, p2, r2));
                    }
                }
            }
        }
    }
}
