//! # Core Module
//!
//! Stateless building blocks shared by every other layer of the library.
//!
//! ## Overview
//!
//! The core module describes *what* is being designed and *how* energies are
//! obtained, without holding any run state:
//!
//! - **Conformation Space** ([`models`]) - Positions, their ordered rotamer lists,
//!   continuous degree-of-freedom bounds, and (partial) conformation assignments.
//! - **Energy Evaluation** ([`forcefield`]) - The force-field collaborator trait
//!   consumed as an opaque leaf computation, classical nonbonded potentials, and a
//!   site-based reference force field.
//!
//! ## Key Invariants
//!
//! - Position and rotamer identities are dense indices that stay stable for the
//!   lifetime of a design run, so they can be used as content addresses for cached
//!   energies.
//! - Total conformation energy is pairwise decomposable: a constant term, plus one
//!   singleton term per assigned position, plus one pair term per pair of assigned
//!   positions.

pub mod forcefield;
pub mod models;
