use super::fingerprint::Fingerprint;
use super::potentials;
use super::scoring::{EvalError, ForceField, PlacedRotamer};
use crate::core::models::ids::{PositionId, RotamerId};
use nalgebra::{Point3, Rotation3, Unit, Vector3};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SiteLoadError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("CSV parsing error for '{path}': {source}")]
    Csv { path: String, source: csv::Error },
    #[error("TOML parsing error for '{path}': {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },
    #[error("Torsion axis of {0} has a zero-length direction")]
    DegenerateAxis(PositionId),
    #[error("Site row names a rotamer without a position")]
    OrphanRotamer,
}

/// A point interaction centre: Lennard-Jones sphere plus partial charge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Site {
    pub position: Point3<f64>,
    pub charge: f64,
    pub radius: f64,
    pub well_depth: f64,
}

impl Site {
    pub fn new(position: [f64; 3], charge: f64, radius: f64, well_depth: f64) -> Self {
        Self {
            position: Point3::from(position),
            charge,
            radius,
            well_depth,
        }
    }

    fn digest(&self, fp: &mut Fingerprint) {
        fp.f64s(self.position.coords.as_slice())
            .f64(self.charge)
            .f64(self.radius)
            .f64(self.well_depth);
    }

    fn interaction(&self, other: &Site, dielectric: f64) -> f64 {
        let dist = (self.position - other.position).norm();
        let (r_min, well_depth) =
            potentials::combine_lj(self.radius, self.well_depth, other.radius, other.well_depth);
        potentials::lennard_jones_12_6(dist, r_min, well_depth)
            + potentials::coulomb(dist, self.charge, other.charge, dielectric)
    }
}

/// The bond a position's side chain rotates about. Sites are stored in the frame of
/// each rotamer's initial first torsion and are rotated by the offset from it.
#[derive(Debug, Clone, PartialEq)]
pub struct TorsionAxis {
    pub origin: Point3<f64>,
    pub direction: Unit<Vector3<f64>>,
    pub barrier: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct SiteParams {
    dielectric: f64,
    #[serde(default)]
    constant: f64,
    #[serde(default)]
    axes: Vec<AxisParams>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct AxisParams {
    position: u32,
    origin: [f64; 3],
    direction: [f64; 3],
    #[serde(default)]
    torsion_barrier: f64,
}

#[derive(Debug, Deserialize)]
struct SiteRow {
    position: Option<u32>,
    rotamer: Option<u32>,
    x: f64,
    y: f64,
    z: f64,
    charge: f64,
    radius: f64,
    well_depth: f64,
}

/// Reference force field over point sites.
///
/// Each rotamer owns a rigid cloud of sites. A rotamer's first degree of freedom
/// rotates its cloud about the position's [`TorsionAxis`]; every degree of freedom
/// also pays the position's threefold torsional barrier. Singletons score the cloud
/// against the fixed environment, pairs score two clouds against each other.
#[derive(Debug, Clone)]
pub struct SiteForceField {
    dielectric: f64,
    constant: f64,
    environment: Vec<Site>,
    axes: HashMap<PositionId, TorsionAxis>,
    rotamer_sites: HashMap<(PositionId, RotamerId), Vec<Site>>,
}

impl SiteForceField {
    pub fn new(dielectric: f64) -> Self {
        Self {
            dielectric,
            constant: 0.0,
            environment: Vec::new(),
            axes: HashMap::new(),
            rotamer_sites: HashMap::new(),
        }
    }

    /// Loads global parameters and torsion axes from TOML and sites from CSV.
    ///
    /// Site rows with empty `position` / `rotamer` columns belong to the fixed
    /// environment.
    pub fn load(params_path: &Path, sites_path: &Path) -> Result<Self, SiteLoadError> {
        let content = std::fs::read_to_string(params_path).map_err(|e| SiteLoadError::Io {
            path: params_path.to_string_lossy().to_string(),
            source: e,
        })?;
        let params: SiteParams = toml::from_str(&content).map_err(|e| SiteLoadError::Toml {
            path: params_path.to_string_lossy().to_string(),
            source: e,
        })?;

        let mut forcefield = Self::new(params.dielectric).with_constant(params.constant);
        for axis in params.axes {
            forcefield.set_axis(
                PositionId(axis.position),
                axis.origin,
                axis.direction,
                axis.torsion_barrier,
            )?;
        }

        let csv_err = |e| SiteLoadError::Csv {
            path: sites_path.to_string_lossy().to_string(),
            source: e,
        };
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(sites_path)
            .map_err(csv_err)?;
        for result in reader.deserialize() {
            let row: SiteRow = result.map_err(csv_err)?;
            let site = Site::new([row.x, row.y, row.z], row.charge, row.radius, row.well_depth);
            match (row.position, row.rotamer) {
                (Some(p), Some(r)) => {
                    forcefield.add_rotamer_site(PositionId(p), RotamerId(r), site)
                }
                (None, None) => forcefield.environment.push(site),
                _ => return Err(SiteLoadError::OrphanRotamer),
            }
        }
        Ok(forcefield)
    }

    pub fn with_constant(mut self, constant: f64) -> Self {
        self.constant = constant;
        self
    }

    pub fn with_environment(mut self, sites: Vec<Site>) -> Self {
        self.environment = sites;
        self
    }

    pub fn set_axis(
        &mut self,
        position: PositionId,
        origin: [f64; 3],
        direction: [f64; 3],
        barrier: f64,
    ) -> Result<(), SiteLoadError> {
        let direction = Unit::try_new(Vector3::from(direction), 1e-9)
            .ok_or(SiteLoadError::DegenerateAxis(position))?;
        self.axes.insert(
            position,
            TorsionAxis {
                origin: Point3::from(origin),
                direction,
                barrier,
            },
        );
        Ok(())
    }

    pub fn add_rotamer_site(&mut self, position: PositionId, rotamer: RotamerId, site: Site) {
        self.rotamer_sites
            .entry((position, rotamer))
            .or_default()
            .push(site);
    }

    fn placed_sites(&self, placed: &PlacedRotamer<'_>) -> Result<Vec<Site>, EvalError> {
        let sites = self
            .rotamer_sites
            .get(&(placed.position, placed.rotamer.id))
            .ok_or(EvalError::MissingParameters {
                position: placed.position,
                rotamer: placed.rotamer.id,
            })?;

        let offset = match (placed.dofs.first(), placed.rotamer.dofs.first()) {
            (Some(value), Some(bound)) => value - bound.initial,
            _ => 0.0,
        };
        let Some(axis) = self.axes.get(&placed.position).filter(|_| offset != 0.0) else {
            return Ok(sites.clone());
        };

        let rotation = Rotation3::from_axis_angle(&axis.direction, offset.to_radians());
        Ok(sites
            .iter()
            .map(|site| Site {
                position: axis.origin + rotation * (site.position - axis.origin),
                ..*site
            })
            .collect())
    }

    fn torsional_strain(&self, placed: &PlacedRotamer<'_>) -> f64 {
        let barrier = self.axes.get(&placed.position).map_or(0.0, |a| a.barrier);
        if barrier == 0.0 {
            return 0.0;
        }
        placed
            .dofs
            .iter()
            .map(|&angle| potentials::threefold_torsion(angle, barrier))
            .sum()
    }

    fn cross_energy(&self, a: &[Site], b: &[Site]) -> f64 {
        a.iter()
            .flat_map(|s1| b.iter().map(move |s2| (s1, s2)))
            .map(|(s1, s2)| s1.interaction(s2, self.dielectric))
            .sum()
    }
}

fn finite(energy: f64) -> Result<f64, EvalError> {
    if energy.is_finite() {
        Ok(energy)
    } else {
        Err(EvalError::Numerical(format!("non-finite energy {energy}")))
    }
}

impl ForceField for SiteForceField {
    fn constant_energy(&self) -> f64 {
        self.constant
    }

    fn single_energy(&self, placed: PlacedRotamer<'_>) -> Result<f64, EvalError> {
        let sites = self.placed_sites(&placed)?;
        finite(self.cross_energy(&sites, &self.environment) + self.torsional_strain(&placed))
    }

    fn pair_energy(
        &self,
        first: PlacedRotamer<'_>,
        second: PlacedRotamer<'_>,
    ) -> Result<f64, EvalError> {
        if first.position == second.position {
            return Err(EvalError::InvalidGeometry {
                position: first.position,
                message: "pair energy requested within a single position".to_string(),
            });
        }
        let a = self.placed_sites(&first)?;
        let b = self.placed_sites(&second)?;
        finite(self.cross_energy(&a, &b))
    }

    fn fingerprint(&self) -> String {
        let mut fp = Fingerprint::new("site-forcefield");
        fp.f64(self.dielectric).f64(self.constant);
        fp.u64(self.environment.len() as u64);
        self.environment.iter().for_each(|site| site.digest(&mut fp));

        let mut axes: Vec<_> = self.axes.iter().collect();
        axes.sort_by_key(|(position, _)| **position);
        fp.u64(axes.len() as u64);
        for (position, axis) in axes {
            fp.u64(u64::from(position.0))
                .f64s(axis.origin.coords.as_slice())
                .f64s(axis.direction.as_slice())
                .f64(axis.barrier);
        }

        let mut clouds: Vec<_> = self.rotamer_sites.iter().collect();
        clouds.sort_by_key(|(key, _)| **key);
        fp.u64(clouds.len() as u64);
        for ((position, rotamer), sites) in clouds {
            fp.u64(u64::from(position.0))
                .u64(u64::from(rotamer.0))
                .u64(sites.len() as u64);
            sites.iter().for_each(|site| site.digest(&mut fp));
        }
        fp.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::conf_space::{DofBound, Rotamer};
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    const TOL: f64 = 1e-9;

    fn write_file(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        write!(file, "{}", content).unwrap();
        path
    }

    fn rotamer(id: u32, dofs: Vec<DofBound>) -> Rotamer {
        Rotamer {
            id: RotamerId(id),
            label: format!("r{id}"),
            dofs,
        }
    }

    #[test]
    fn single_energy_scores_sites_against_environment() {
        let mut ff = SiteForceField::new(1.0)
            .with_environment(vec![Site::new([0.0, 0.0, 0.0], 0.0, 3.0, 0.25)]);
        let site = Site::new([3.0, 0.0, 0.0], 0.0, 3.0, 0.25);
        ff.add_rotamer_site(PositionId(0), RotamerId(0), site);
        let rot = rotamer(0, vec![]);

        let e = ff
            .single_energy(PlacedRotamer {
                position: PositionId(0),
                rotamer: &rot,
                dofs: &[],
            })
            .unwrap();
        assert!((e + 0.25).abs() < TOL);
    }

    #[test]
    fn first_dof_rotates_sites_about_the_position_axis() {
        let mut ff = SiteForceField::new(1.0);
        ff.set_axis(PositionId(0), [0.0, 0.0, 0.0], [0.0, 0.0, 1.0], 0.0)
            .unwrap();
        ff.add_rotamer_site(PositionId(0), RotamerId(0), Site::new([1.0, 0.0, 0.0], 1.0, 1.0, 0.0));
        ff.add_rotamer_site(PositionId(1), RotamerId(0), Site::new([0.0, 1.0, 0.0], 1.0, 1.0, 0.0));
        let flexible = rotamer(0, vec![DofBound::around("chi1", 0.0, 90.0)]);
        let rigid = rotamer(0, vec![]);

        let at = |angle: f64| {
            let dofs = [angle];
            ff.pair_energy(
                PlacedRotamer {
                    position: PositionId(0),
                    rotamer: &flexible,
                    dofs: &dofs,
                },
                PlacedRotamer {
                    position: PositionId(1),
                    rotamer: &rigid,
                    dofs: &[],
                },
            )
            .unwrap()
        };

        // Rotating by 90 degrees brings the site onto the partner's location.
        assert!(at(90.0) > at(0.0));
        assert!((at(0.0) - 332.0637 / 2f64.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn missing_sites_and_same_position_pairs_are_errors() {
        let ff = SiteForceField::new(1.0);
        let rot = rotamer(0, vec![]);
        let placed = PlacedRotamer {
            position: PositionId(0),
            rotamer: &rot,
            dofs: &[],
        };
        assert!(matches!(
            ff.single_energy(placed),
            Err(EvalError::MissingParameters { .. })
        ));
        let err = ff.pair_energy(placed, placed).unwrap_err();
        assert!(err.is_infeasible());
    }

    #[test]
    fn fingerprint_ignores_insertion_order_but_tracks_parameters() {
        let a_site = Site::new([1.0, 0.0, 0.0], 0.2, 1.5, 0.1);
        let b_site = Site::new([0.0, 2.0, 0.0], -0.2, 1.5, 0.1);
        let mut forward = SiteForceField::new(4.0);
        forward.add_rotamer_site(PositionId(0), RotamerId(0), a_site);
        forward.add_rotamer_site(PositionId(1), RotamerId(0), b_site);
        let mut backward = SiteForceField::new(4.0);
        backward.add_rotamer_site(PositionId(1), RotamerId(0), b_site);
        backward.add_rotamer_site(PositionId(0), RotamerId(0), a_site);
        assert_eq!(forward.fingerprint(), backward.fingerprint());

        let shifted = forward.clone().with_constant(1.0);
        assert_ne!(forward.fingerprint(), shifted.fingerprint());
        backward.add_rotamer_site(PositionId(1), RotamerId(0), a_site);
        assert_ne!(forward.fingerprint(), backward.fingerprint());
    }

    #[test]
    fn torsional_strain_is_added_to_singletons() {
        let mut ff = SiteForceField::new(1.0);
        ff.set_axis(PositionId(0), [0.0; 3], [1.0, 0.0, 0.0], 2.0)
            .unwrap();
        ff.add_rotamer_site(PositionId(0), RotamerId(0), Site::new([0.0, 1.0, 0.0], 0.0, 1.0, 0.0));
        let rot = rotamer(0, vec![DofBound::around("chi1", 60.0, 30.0)]);

        let eclipsed = ff
            .single_energy(PlacedRotamer {
                position: PositionId(0),
                rotamer: &rot,
                dofs: &[0.0],
            })
            .unwrap();
        let staggered = ff
            .single_energy(PlacedRotamer {
                position: PositionId(0),
                rotamer: &rot,
                dofs: &[60.0],
            })
            .unwrap();
        assert!((eclipsed - 2.0).abs() < TOL);
        assert!(staggered.abs() < TOL);
    }

    #[test]
    fn load_reads_axes_from_toml_and_sites_from_csv() {
        let dir = tempdir().unwrap();
        let params = write_file(
            dir.path(),
            "params.toml",
            "dielectric = 4.0
constant = -3.5

[[axes]]
position = 0
origin = [0.0, 0.0, 0.0]
direction = [0.0, 0.0, 2.0]
torsion-barrier = 1.5
",
        );
        let sites = write_file(
            dir.path(),
            "sites.csv",
            "position,rotamer,x,y,z,charge,radius,well_depth
,,0.0,0.0,0.0,0.0,3.0,0.2
0,0,3.0,0.0,0.0,0.0,3.0,0.2
0,1,5.0,0.0,0.0,0.1,3.0,0.2
",
        );

        let ff = SiteForceField::load(&params, &sites).unwrap();
        assert_eq!(ff.constant_energy(), -3.5);
        assert_eq!(ff.environment.len(), 1);
        assert_eq!(ff.rotamer_sites.len(), 2);
        let axis = &ff.axes[&PositionId(0)];
        assert!((axis.direction.z - 1.0).abs() < TOL);
        assert_eq!(axis.barrier, 1.5);
    }

    #[test]
    fn set_axis_rejects_zero_direction() {
        let mut ff = SiteForceField::new(1.0);
        let result = ff.set_axis(PositionId(3), [0.0; 3], [0.0; 3], 0.0);
        assert!(matches!(result, Err(SiteLoadError::DegenerateAxis(PositionId(3)))));
    }
}
