use super::node::SearchNode;
use crate::core::models::assignment::Assignment;
use crate::core::models::ids::{PositionId, RotamerId};
use crate::engine::config::LevelOrdering;
use crate::engine::energy_matrix::EnergyMatrix;
use crate::engine::pruning::PrunedSet;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Computes node scores from an energy matrix restricted to a pruned set.
///
/// For a partial assignment the bound is the exact energy of the fixed terms plus,
/// for each unassigned position `u`, the cheapest surviving rotamer's single energy,
/// its pairs with every assigned position, and the per-partner floor of its pairs
/// with unassigned positions of lower index. Each unassigned pair is therefore
/// counted exactly once, which keeps the bound admissible.
pub(crate) struct BoundScorer<'a> {
    matrix: &'a EnergyMatrix,
    pruned: &'a PrunedSet,
    alive: Vec<Vec<RotamerId>>,
    /// `pair_floor[u][r][v]`: minimum pair energy of `(u, r)` over surviving rotamers at `v`.
    pair_floor: Vec<Vec<Vec<f64>>>,
}

impl<'a> BoundScorer<'a> {
    pub(crate) fn new(matrix: &'a EnergyMatrix, pruned: &'a PrunedSet) -> Self {
        let n = matrix.num_positions();
        let alive: Vec<Vec<RotamerId>> = (0..n)
            .map(|p| pruned.alive_rotamers(PositionId::from_index(p)))
            .collect();

        let mut scorer = Self {
            matrix,
            pruned,
            alive,
            pair_floor: Vec::new(),
        };
        scorer.pair_floor = (0..n)
            .map(|u| {
                let pu = PositionId::from_index(u);
                (0..matrix.num_rotamers(pu))
                    .map(|r| {
                        let r = RotamerId::from_index(r);
                        (0..n)
                            .map(|v| {
                                if v == u {
                                    return 0.0;
                                }
                                let pv = PositionId::from_index(v);
                                scorer.alive[v]
                                    .iter()
                                    .map(|&s| scorer.pair(pu, r, pv, s))
                                    .fold(f64::INFINITY, f64::min)
                            })
                            .collect()
                    })
                    .collect()
            })
            .collect();
        scorer
    }

    #[inline]
    fn single(&self, position: PositionId, rotamer: RotamerId) -> f64 {
        self.matrix
            .single(position, rotamer)
            .filter(|e| !e.is_nan())
            .unwrap_or(f64::INFINITY)
    }

    /// Pair energy, `+inf` for pruned or missing pairs.
    #[inline]
    fn pair(&self, p: PositionId, r: RotamerId, q: PositionId, s: RotamerId) -> f64 {
        if !self.pruned.is_pair_alive(p, r, q, s) {
            return f64::INFINITY;
        }
        self.matrix
            .pair(p, r, q, s)
            .filter(|e| !e.is_nan())
            .unwrap_or(f64::INFINITY)
    }

    pub(crate) fn num_positions(&self) -> usize {
        self.alive.len()
    }

    /// The empty assignment, or `None` if no completion has a finite bound.
    pub(crate) fn root(&self) -> Option<SearchNode> {
        self.node(Assignment::empty(self.num_positions()))
    }

    /// Scores an assignment, returning `None` when its bound is infinite.
    pub(crate) fn node(&self, assignment: Assignment) -> Option<SearchNode> {
        let gscore = self.gscore(&assignment);
        if !gscore.is_finite() {
            return None;
        }
        let bound = gscore + self.hscore(&assignment);
        bound.is_finite().then_some(SearchNode {
            assignment,
            gscore,
            bound,
        })
    }

    fn gscore(&self, assignment: &Assignment) -> f64 {
        let fixed: Vec<(PositionId, RotamerId)> = assignment.assigned().collect();
        let mut total = self.matrix.constant();
        for (i, &(p, r)) in fixed.iter().enumerate() {
            total += self.single(p, r);
            for &(q, s) in &fixed[..i] {
                total += self.pair(p, r, q, s);
            }
        }
        total
    }

    fn hscore(&self, assignment: &Assignment) -> f64 {
        let fixed: Vec<(PositionId, RotamerId)> = assignment.assigned().collect();
        let open: Vec<PositionId> = assignment.unassigned().collect();
        open.iter()
            .map(|&u| {
                self.alive[u.index()]
                    .iter()
                    .map(|&r| {
                        let with_fixed: f64 =
                            fixed.iter().map(|&(a, ra)| self.pair(u, r, a, ra)).sum();
                        let floors = &self.pair_floor[u.index()][r.index()];
                        let with_open: f64 = open
                            .iter()
                            .filter(|v| v.index() < u.index())
                            .map(|v| floors[v.index()])
                            .sum();
                        self.single(u, r) + with_fixed + with_open
                    })
                    .fold(f64::INFINITY, f64::min)
            })
            .sum()
    }

    /// Children of `parent` at `position`, one per surviving compatible rotamer, in
    /// rotamer order. Children whose bound is infinite are dropped.
    ///
    /// A child's bound never falls below its parent's; complete children carry their
    /// exact energy.
    pub(crate) fn children(&self, parent: &SearchNode, position: PositionId) -> Vec<SearchNode> {
        let candidates = &self.alive[position.index()];

        #[cfg(not(feature = "parallel"))]
        let iterator = candidates.iter();
        #[cfg(feature = "parallel")]
        let iterator = candidates.par_iter();

        let scored: Vec<Option<SearchNode>> = iterator
            .map(|&rotamer| {
                let mut child = self.node(parent.assignment.with(position, rotamer))?;
                if child.is_complete() {
                    child.bound = child.gscore;
                } else {
                    child.bound = child.bound.max(parent.bound);
                }
                Some(child)
            })
            .collect();
        scored.into_iter().flatten().collect()
    }

    /// Picks the position to branch on and returns its children.
    pub(crate) fn expand(&self, parent: &SearchNode, ordering: LevelOrdering) -> Vec<SearchNode> {
        let open: Vec<PositionId> = parent.assignment.unassigned().collect();
        if open.is_empty() {
            return Vec::new();
        }
        match ordering {
            LevelOrdering::Static => self.children(parent, open[0]),
            LevelOrdering::MostConstrained => {
                let position = open
                    .iter()
                    .copied()
                    .min_by_key(|&p| (self.compatible_count(&parent.assignment, p), p))
                    .unwrap_or(open[0]);
                self.children(parent, position)
            }
            LevelOrdering::Dynamic => {
                let mut best: Option<(f64, Vec<SearchNode>)> = None;
                for position in open {
                    let children = self.children(parent, position);
                    let score = branching_score(parent.bound, &children);
                    if best.as_ref().is_none_or(|(s, _)| score > *s) {
                        best = Some((score, children));
                    }
                }
                best.map(|(_, children)| children).unwrap_or_default()
            }
        }
    }

    fn compatible_count(&self, assignment: &Assignment, position: PositionId) -> usize {
        self.alive[position.index()]
            .iter()
            .filter(|&&r| {
                self.single(position, r).is_finite()
                    && assignment
                        .assigned()
                        .all(|(a, ra)| self.pair(position, r, a, ra).is_finite())
            })
            .count()
    }
}

/// `1 / Σ 1/(child - parent)`. Large when every child raises the bound a lot; a
/// position with no feasible children scores `+inf` and closes the branch at once.
fn branching_score(parent_bound: f64, children: &[SearchNode]) -> f64 {
    let inverse_sum: f64 = children
        .iter()
        .map(|c| 1.0 / (c.bound - parent_bound).max(0.0))
        .sum();
    1.0 / inverse_sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fixtures::{TableForceField, brute_force, rigid_matrix, rigid_space};
    use std::sync::Arc;

    fn problem(sizes: &[usize], seed: u64) -> EnergyMatrix {
        let space = Arc::new(rigid_space(sizes));
        rigid_matrix(&space, Arc::new(TableForceField::for_space(&space, seed)))
    }

    fn all_partials(sizes: &[usize]) -> Vec<Assignment> {
        // Assign a prefix of positions in every combination.
        let mut partials = vec![Assignment::empty(sizes.len())];
        let mut frontier = partials.clone();
        for (p, &n) in sizes.iter().enumerate() {
            let next: Vec<Assignment> = frontier
                .iter()
                .flat_map(|a| {
                    (0..n).map(move |r| {
                        a.with(PositionId::from_index(p), RotamerId::from_index(r))
                    })
                })
                .collect();
            partials.extend(next.iter().cloned());
            frontier = next;
        }
        partials
    }

    #[test]
    fn bound_never_exceeds_best_completion() {
        let sizes = [3, 2, 3, 2];
        for seed in 0..10 {
            let matrix = problem(&sizes, seed);
            let pruned = PrunedSet::full(&sizes);
            let scorer = BoundScorer::new(&matrix, &pruned);
            let ranked = brute_force(&matrix);

            for partial in all_partials(&sizes) {
                let best = ranked
                    .iter()
                    .filter(|(full, _)| partial.assigned().all(|(p, r)| full.get(p) == Some(r)))
                    .map(|(_, e)| *e)
                    .fold(f64::INFINITY, f64::min);
                let node = scorer.node(partial.clone()).unwrap();
                assert!(
                    node.bound <= best + 1e-9,
                    "seed {seed}: {partial} bound {} > {best}",
                    node.bound
                );
            }
        }
    }

    #[test]
    fn complete_node_bound_is_exact_energy() {
        let sizes = [2, 3, 2];
        let matrix = problem(&sizes, 4);
        let pruned = PrunedSet::full(&sizes);
        let scorer = BoundScorer::new(&matrix, &pruned);
        let full = Assignment::from_indices(&[1, 2, 0]);
        let node = scorer.node(full.clone()).unwrap();
        assert!((node.bound - matrix.assignment_energy(&full).unwrap()).abs() < 1e-9);
    }

    #[test]
    fn children_skip_pruned_pairs_and_never_undercut_parent() {
        let sizes = [2, 3];
        let matrix = problem(&sizes, 8);
        let mut pruned = PrunedSet::full(&sizes);
        pruned.prune_pair(PositionId(0), RotamerId(0), PositionId(1), RotamerId(1));
        let scorer = BoundScorer::new(&matrix, &pruned);

        let parent = scorer.node(Assignment::empty(2).with(PositionId(0), RotamerId(0))).unwrap();
        let children = scorer.children(&parent, PositionId(1));
        let picked: Vec<_> = children.iter().map(|c| c.assignment.get(PositionId(1))).collect();
        assert_eq!(picked, vec![Some(RotamerId(0)), Some(RotamerId(2))]);
        assert!(children.iter().all(|c| c.bound >= parent.bound - 1e-12));
    }

    #[test]
    fn most_constrained_ordering_branches_on_fewest_candidates() {
        let sizes = [3, 1, 2];
        let matrix = problem(&sizes, 2);
        let pruned = PrunedSet::full(&sizes);
        let scorer = BoundScorer::new(&matrix, &pruned);
        let root = scorer.root().unwrap();

        let children = scorer.expand(&root, LevelOrdering::MostConstrained);
        assert_eq!(children.len(), 1);
        assert!(children[0].assignment.is_assigned(PositionId(1)));

        let children = scorer.expand(&root, LevelOrdering::Static);
        assert_eq!(children.len(), 3);
        assert!(children[0].assignment.is_assigned(PositionId(0)));
    }

    #[test]
    fn dynamic_ordering_prefers_position_without_feasible_children() {
        let sizes = [2, 2, 2];
        let space = Arc::new(rigid_space(&sizes));
        let ff = TableForceField::for_space(&space, 5)
            .with_infeasible_single(PositionId(2), RotamerId(0))
            .with_infeasible_single(PositionId(2), RotamerId(1));
        let matrix = rigid_matrix(&space, Arc::new(ff));
        let pruned = PrunedSet::full(&sizes);
        let scorer = BoundScorer::new(&matrix, &pruned);

        assert!(scorer.root().is_none());
        let parent = SearchNode {
            assignment: Assignment::empty(3),
            gscore: 0.0,
            bound: f64::MIN,
        };
        assert!(scorer.expand(&parent, LevelOrdering::Dynamic).is_empty());
    }
}
