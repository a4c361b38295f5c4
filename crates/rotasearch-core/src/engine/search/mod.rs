//! Best-first branch-and-bound search over partial conformations.
//!
//! The search walks an implicit tree whose nodes are partial assignments. Each node
//! carries an admissible lower bound on the energy of every completion, derived from
//! the energy matrix restricted to the surviving rotamers. Nodes wait in a
//! [`frontier::Frontier`], a priority structure ordered by `(bound, insertion
//! sequence)` that transparently spills its worst entries to disk when a memory limit
//! is configured.
//!
//! Popping a complete assignment yields the next-best conformation. The first one is
//! the global minimum, and repeated pops enumerate conformations in ascending energy
//! order. Because ties are broken by insertion sequence, expansion order is fully
//! deterministic for a given matrix, pruned set, and level ordering.
//!
//! Cancellation, expansion budgets, and time budgets are only observed between
//! expansions, so the frontier is consistent whenever [`astar::ConfSearch::next_conf`]
//! returns.

pub mod astar;
pub mod frontier;
pub mod node;
pub(crate) mod scorer;

pub use astar::{ConfSearch, SearchStats, SearchStep};
pub use frontier::{Frontier, FrontierError, SpillStore};
pub use node::SearchNode;
