//! # Engine Module
//!
//! This module implements the stateful machinery of a design run: computing and
//! caching energies, refining them by local minimization, eliminating dead-end
//! rotamers, and searching the remaining conformation space.
//!
//! ## Overview
//!
//! A run flows through the engine in one direction. The [`builder`] turns the
//! conformation space into an [`energy_matrix::EnergyMatrix`], delegating each missing
//! entry to the [`dispatch`] layer as an independent task and committing results to
//! the persistent [`cache`] before the matrix. The [`pruning`] engine then shrinks the
//! candidate set with dead-end elimination, and the [`search`] engine enumerates
//! conformations best-first over what survives.
//!
//! ## Architecture
//!
//! - **Configuration** ([`config`]) - Named, enumerated options for every phase
//! - **Evaluation** ([`evaluation`], [`minimizer`]) - Rigid and minimized evaluation
//!   strategies on CPU or accelerated backends
//! - **Energy Storage** ([`cache`], [`energy_matrix`]) - Append-only, content-addressed
//!   energy entries
//! - **Task Distribution** ([`dispatch`]) - Local and remote workers with retry
//! - **Pruning** ([`pruning`]) - Iterative singles and pairs dead-end elimination
//! - **Search** ([`search`]) - Best-first branch-and-bound with an out-of-core frontier
//! - **State Tracking** ([`state`]) - Scored conformations, run status, and stop signals
//! - **Progress Monitoring** ([`progress`]) - Callback-based progress reporting
//! - **Error Handling** ([`error`]) - Run-fatal errors with task and position context
//!
//! ## Key Capabilities
//!
//! - **Crash-safe resumption** through the on-disk energy cache
//! - **Parallel computation** of independent energy terms and node bounds
//! - **Graceful degradation** when workers fail or accelerated kernels are missing
//! - **Deterministic enumeration** independent of frontier spilling

pub mod builder;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod energy_matrix;
pub mod error;
pub mod evaluation;
pub mod minimizer;
pub mod progress;
pub mod pruning;
pub mod search;
pub mod state;
pub mod utils;

#[cfg(test)]
pub(crate) mod fixtures;
