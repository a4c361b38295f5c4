//! Numerical helpers shared by the engine's workflows.
//!
//! The partition-function and binding-constant workflows accumulate Boltzmann
//! weights of energies spanning many orders of magnitude; everything here works in
//! log space so that no intermediate weight overflows or underflows.

pub mod boltzmann;
