//! # Rotasearch Core Library
//!
//! A protein design engine that searches a discrete rotamer space, optionally
//! refined by continuous torsion minimization, for the global minimum energy
//! conformation (GMEC), ranked lists of low-energy conformations, and
//! Boltzmann-weighted partition function estimates used for K* binding scores.
//!
//! ## Architectural Philosophy
//!
//! The library follows a strict three-layer architecture so that each concern can be
//! tested in isolation and swapped without touching the others.
//!
//! - **[`core`]: The Foundation.** Stateless data models (`ConfSpace`, `Assignment`),
//!   the force-field collaborator trait and a reference site-based force field built
//!   on classical nonbonded potentials.
//!
//! - **[`engine`]: The Logic Core.** The stateful machinery of a design run: the
//!   persistent energy cache, the energy matrix and its builder, the local minimizer,
//!   dead-end elimination, the best-first search with an out-of-core frontier, and
//!   the task dispatcher that spreads evaluations across local, accelerated and
//!   remote workers.
//!
//! - **[`workflows`]: The Public API.** End-to-end procedures that tie `engine` and
//!   `core` together: GMEC / top-K / energy-window searches, partition function
//!   estimation and K* scoring.

pub mod core;
pub mod engine;
pub mod workflows;
