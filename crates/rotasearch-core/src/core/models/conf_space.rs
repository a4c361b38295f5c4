use super::ids::{PositionId, RotamerId};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfSpaceError {
    #[error("Position {0} does not exist in the conformation space")]
    UnknownPosition(PositionId),
    #[error("Rotamer {rotamer} does not exist at position {position}")]
    UnknownRotamer {
        position: PositionId,
        rotamer: RotamerId,
    },
    #[error("Degree of freedom '{name}' has invalid bounds [{min}, {max}] (initial {initial})")]
    InvalidBounds {
        name: String,
        initial: f64,
        min: f64,
        max: f64,
    },
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("TOML parsing error for '{path}': {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },
}

/// A continuous internal degree of freedom (typically a torsion angle, in degrees)
/// together with the closed interval the minimizer may move it within.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DofBound {
    pub name: String,
    pub initial: f64,
    pub min: f64,
    pub max: f64,
}

impl DofBound {
    pub fn new(name: impl Into<String>, initial: f64, min: f64, max: f64) -> Self {
        Self {
            name: name.into(),
            initial,
            min,
            max,
        }
    }

    /// A degree of freedom that cannot move.
    pub fn fixed(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, value, value, value)
    }

    /// Symmetric interval of `half_width` around `initial`.
    pub fn around(name: impl Into<String>, initial: f64, half_width: f64) -> Self {
        Self::new(name, initial, initial - half_width, initial + half_width)
    }

    #[inline]
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    #[inline]
    pub fn is_fixed(&self) -> bool {
        self.max <= self.min
    }

    fn validate(&self) -> Result<(), ConfSpaceError> {
        let ordered = self.min <= self.max && self.min <= self.initial && self.initial <= self.max;
        if ordered && self.min.is_finite() && self.max.is_finite() {
            Ok(())
        } else {
            Err(ConfSpaceError::InvalidBounds {
                name: self.name.clone(),
                initial: self.initial,
                min: self.min,
                max: self.max,
            })
        }
    }
}

/// A discrete conformational state at a position.
///
/// The rotamer's identity never changes during a run; its energies are computed
/// by the force field and are not stored here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rotamer {
    pub id: RotamerId,
    pub label: String,
    pub dofs: Vec<DofBound>,
}

impl Rotamer {
    pub fn initial_dofs(&self) -> Vec<f64> {
        self.dofs.iter().map(|d| d.initial).collect()
    }

    /// Whether at least one degree of freedom can move.
    pub fn is_flexible(&self) -> bool {
        self.dofs.iter().any(|d| !d.is_fixed())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub name: String,
    pub rotamers: Vec<Rotamer>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfSpace {
    #[serde(default)]
    positions: Vec<RawPosition>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPosition {
    name: String,
    #[serde(default)]
    rotamers: Vec<RawRotamer>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRotamer {
    label: String,
    #[serde(default)]
    dofs: Vec<DofBound>,
}

/// The static description of a design problem: every flexible position and its
/// ordered candidate rotamers.
///
/// Identifiers are dense: `positions()[i].id == PositionId(i)` and
/// `rotamers[j].id == RotamerId(j)`. This makes them usable as cache content
/// addresses across repeated runs over the same space.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfSpace {
    positions: Vec<Position>,
}

impl ConfSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a conformation space from a TOML description of positions, rotamer
    /// labels and degree-of-freedom bounds.
    pub fn load(path: &Path) -> Result<Self, ConfSpaceError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfSpaceError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        let raw: RawConfSpace = toml::from_str(&content).map_err(|e| ConfSpaceError::Toml {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;

        let mut space = Self::new();
        for raw_position in raw.positions {
            let position = space.add_position(raw_position.name);
            for raw_rotamer in raw_position.rotamers {
                space.add_rotamer(position, raw_rotamer.label, raw_rotamer.dofs)?;
            }
        }
        Ok(space)
    }

    pub fn add_position(&mut self, name: impl Into<String>) -> PositionId {
        let id = PositionId::from_index(self.positions.len());
        self.positions.push(Position {
            id,
            name: name.into(),
            rotamers: Vec::new(),
        });
        id
    }

    pub fn add_rotamer(
        &mut self,
        position: PositionId,
        label: impl Into<String>,
        dofs: Vec<DofBound>,
    ) -> Result<RotamerId, ConfSpaceError> {
        for dof in &dofs {
            dof.validate()?;
        }
        let slot = self
            .positions
            .get_mut(position.index())
            .ok_or(ConfSpaceError::UnknownPosition(position))?;
        let id = RotamerId::from_index(slot.rotamers.len());
        slot.rotamers.push(Rotamer {
            id,
            label: label.into(),
            dofs,
        });
        Ok(id)
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn position(&self, id: PositionId) -> Option<&Position> {
        self.positions.get(id.index())
    }

    pub fn rotamer(&self, position: PositionId, rotamer: RotamerId) -> Option<&Rotamer> {
        self.position(position)?.rotamers.get(rotamer.index())
    }

    pub fn try_rotamer(
        &self,
        position: PositionId,
        rotamer: RotamerId,
    ) -> Result<&Rotamer, ConfSpaceError> {
        self.rotamer(position, rotamer)
            .ok_or(ConfSpaceError::UnknownRotamer { position, rotamer })
    }

    pub fn num_positions(&self) -> usize {
        self.positions.len()
    }

    pub fn num_rotamers(&self, position: PositionId) -> usize {
        self.position(position).map_or(0, |p| p.rotamers.len())
    }

    /// Rotamer counts per position, in position order.
    pub fn sizes(&self) -> Vec<usize> {
        self.positions.iter().map(|p| p.rotamers.len()).collect()
    }

    pub fn position_ids(&self) -> impl Iterator<Item = PositionId> + '_ {
        self.positions.iter().map(|p| p.id)
    }

    /// First position that has no candidate rotamer at all, if any.
    pub fn first_empty_position(&self) -> Option<PositionId> {
        self.positions
            .iter()
            .find(|p| p.rotamers.is_empty())
            .map(|p| p.id)
    }

    /// Whether any rotamer in the space carries a movable degree of freedom.
    pub fn is_continuous(&self) -> bool {
        self.positions
            .iter()
            .flat_map(|p| p.rotamers.iter())
            .any(Rotamer::is_flexible)
    }

    /// Size of the full discrete conformation space, as a float since it overflows
    /// integers quickly.
    pub fn num_conformations(&self) -> f64 {
        self.positions
            .iter()
            .map(|p| p.rotamers.len() as f64)
            .product()
    }
}
