use super::frontier::{Frontier, FrontierError};
use super::node::SearchNode;
use super::scorer::BoundScorer;
use crate::core::models::assignment::Assignment;
use crate::engine::builder::missing_tasks;
use crate::engine::config::{LevelOrdering, SearchConfig};
use crate::engine::energy_matrix::EnergyMatrix;
use crate::engine::error::EngineError;
use crate::engine::pruning::PrunedSet;
use crate::engine::state::{ScoredConf, StopReason, StopSignal};
use std::time::Instant;
use tracing::{debug, info, instrument, trace};

/// Result of asking the search for its next conformation.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchStep {
    Conf(ScoredConf),
    /// No complete conformation with a finite energy remains.
    Exhausted,
    Stopped(StopReason),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchStats {
    pub expansions: u64,
    pub nodes_created: u64,
    pub conformations: usize,
    pub peak_frontier: usize,
    pub spilled: u64,
}

/// Best-first enumeration of conformations in ascending energy order.
pub struct ConfSearch<'a> {
    scorer: BoundScorer<'a>,
    frontier: Frontier,
    ordering: LevelOrdering,
    stop: StopSignal,
    max_expansions: Option<u64>,
    deadline: Option<Instant>,
    stats: SearchStats,
    trace: Option<Vec<Assignment>>,
}

impl<'a> ConfSearch<'a> {
    /// Prepares a search over the rotamers surviving in `pruned`.
    ///
    /// Every single and pair among surviving rotamers must already be in `matrix`.
    pub fn new(
        matrix: &'a EnergyMatrix,
        pruned: &'a PrunedSet,
        config: &SearchConfig,
        frontier: Frontier,
        stop: StopSignal,
    ) -> Result<Self, EngineError> {
        let missing = missing_tasks(matrix, pruned).len();
        if missing > 0 {
            return Err(EngineError::IncompleteMatrix { missing });
        }

        let scorer = BoundScorer::new(matrix, pruned);
        let mut search = Self {
            scorer,
            frontier,
            ordering: config.ordering,
            stop,
            max_expansions: config.max_expansions,
            deadline: config.time_budget().map(|budget| Instant::now() + budget),
            stats: SearchStats::default(),
            trace: None,
        };
        match search.scorer.root() {
            Some(root) => {
                debug!(bound = root.bound, "Seeding search with root node");
                search.push(root)?;
            }
            None => debug!("Root bound is infinite; search space is empty"),
        }
        Ok(search)
    }

    /// Records the assignment of every expanded node.
    pub fn with_trace(mut self) -> Self {
        self.trace = Some(Vec::new());
        self
    }

    fn push(&mut self, node: SearchNode) -> Result<(), FrontierError> {
        self.frontier.push(node)?;
        self.stats.nodes_created += 1;
        self.stats.peak_frontier = self.stats.peak_frontier.max(self.frontier.len());
        Ok(())
    }

    fn check_budgets(&self) -> Option<StopReason> {
        if self.stop.is_stopped() {
            return Some(StopReason::Requested);
        }
        if self.max_expansions.is_some_and(|max| self.stats.expansions >= max) {
            return Some(StopReason::ExpansionBudget);
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Some(StopReason::TimeBudget);
        }
        None
    }

    /// Expands nodes until the next complete conformation reaches the top of the
    /// frontier, the frontier empties, or a stop condition holds.
    #[instrument(level = "trace", skip_all)]
    pub fn next_conf(&mut self) -> Result<SearchStep, EngineError> {
        loop {
            if let Some(reason) = self.check_budgets() {
                info!(?reason, expansions = self.stats.expansions, "Search stopped");
                return Ok(SearchStep::Stopped(reason));
            }
            let Some(node) = self.frontier.pop()? else {
                return Ok(SearchStep::Exhausted);
            };
            if node.is_complete() {
                self.stats.conformations += 1;
                trace!(score = node.bound, assignment = %node.assignment, "Conformation found");
                return Ok(SearchStep::Conf(ScoredConf {
                    assignment: node.assignment,
                    score: node.bound,
                }));
            }

            self.stats.expansions += 1;
            if let Some(trace) = self.trace.as_mut() {
                trace.push(node.assignment.clone());
            }
            for child in self.scorer.expand(&node, self.ordering) {
                self.push(child)?;
            }
        }
    }

    /// Lower bound on every conformation not yet returned, `None` once exhausted.
    pub fn peek_bound(&self) -> Option<f64> {
        self.frontier.peek_bound()
    }

    pub fn stats(&self) -> SearchStats {
        SearchStats {
            spilled: self.frontier.spilled(),
            ..self.stats.clone()
        }
    }

    pub fn expansion_trace(&self) -> &[Assignment] {
        self.trace.as_deref().unwrap_or_default()
    }

    /// Releases the frontier and its spill storage.
    pub fn close(self) -> Result<SearchStats, EngineError> {
        let stats = self.stats();
        self.frontier.close()?;
        Ok(stats)
    }
}
