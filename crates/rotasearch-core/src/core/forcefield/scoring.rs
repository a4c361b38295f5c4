use crate::core::models::conf_space::Rotamer;
use crate::core::models::ids::{PositionId, RotamerId};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    #[error("Invalid geometry at {position}: {message}")]
    InvalidGeometry {
        position: PositionId,
        message: String,
    },
    #[error("Numerical failure: {0}")]
    Numerical(String),
    #[error("No parameters for rotamer {rotamer} at {position}")]
    MissingParameters {
        position: PositionId,
        rotamer: RotamerId,
    },
    #[error("Rotamer {rotamer} does not exist at {position}")]
    UnknownRotamer {
        position: PositionId,
        rotamer: RotamerId,
    },
}

impl EvalError {
    /// Whether this failure describes a physically impossible combination that
    /// should be scored as +infinity, as opposed to a broken input.
    pub fn is_infeasible(&self) -> bool {
        matches!(self, Self::InvalidGeometry { .. } | Self::Numerical(_))
    }
}

/// A rotamer placed at a position with concrete values for its degrees of freedom.
#[derive(Debug, Clone, Copy)]
pub struct PlacedRotamer<'a> {
    pub position: PositionId,
    pub rotamer: &'a Rotamer,
    pub dofs: &'a [f64],
}

/// The energy function supplied by the structural collaborator.
///
/// Implementations must be deterministic: identical inputs yield identical energies,
/// which is what makes content-addressed caching of terms valid. They are shared by
/// every worker thread and must therefore be `Send + Sync`.
pub trait ForceField: Send + Sync {
    /// Energy shared by every conformation of the space.
    fn constant_energy(&self) -> f64 {
        0.0
    }

    /// Interaction of one rotamer with the fixed environment, including its
    /// internal strain.
    fn single_energy(&self, placed: PlacedRotamer<'_>) -> Result<f64, EvalError>;

    /// Interaction between two rotamers at distinct positions.
    fn pair_energy(
        &self,
        first: PlacedRotamer<'_>,
        second: PlacedRotamer<'_>,
    ) -> Result<f64, EvalError>;

    /// Identity of the model's parameters. Two force fields with equal fingerprints
    /// must return identical energies for identical inputs.
    fn fingerprint(&self) -> String;
}
