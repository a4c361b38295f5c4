//! # Force Field Module
//!
//! Energy evaluation is the leaf computation of every design run. This module defines
//! the boundary between the search machinery and whatever physical model supplies
//! the energies.
//!
//! ## Overview
//!
//! The engine never inspects structures itself. It asks a [`scoring::ForceField`] for
//! three kinds of terms:
//!
//! - **Constant** - an offset shared by every conformation (fixed backbone, ligand).
//! - **Singleton** - one rotamer, with given continuous degrees of freedom, against
//!   the fixed environment (including its own internal torsional strain).
//! - **Pair** - two rotamers at different positions against each other.
//!
//! A complete conformation energy is the sum of the constant, all singletons and all
//! pairs, which is what makes branch-and-bound bounding possible.
//!
//! ## Key Components
//!
//! - [`scoring`] - The collaborator trait and the error taxonomy for evaluations
//! - [`sites`] - A reference point-site force field with torsional rotation
//! - [`potentials`] - Lennard-Jones, Coulomb and torsional potentials
//! - [`fingerprint`] - Digests identifying the inputs an energy depends on, used to
//!   keep cached energies of different models apart
//!
//! Evaluations that fail for physical reasons (overlapping geometry, numerical
//! blow-up) are reported as errors here and converted to an infeasible (+infinity)
//! energy by the engine; they never abort a run.

pub mod fingerprint;
pub(crate) mod potentials;
pub mod scoring;
pub mod sites;
