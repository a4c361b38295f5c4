const COULOMB_CONSTANT: f64 = 332.0637; // In kcal·Å/(mol·e²)

const OVERLAP_DISTANCE: f64 = 1e-6;
const OVERLAP_ENERGY: f64 = 1e10;

#[inline]
pub fn lennard_jones_12_6(dist: f64, r_min: f64, well_depth: f64) -> f64 {
    if dist < OVERLAP_DISTANCE {
        return OVERLAP_ENERGY;
    }
    let rho = r_min / dist;
    let rho6 = rho.powi(6);
    let rho12 = rho6 * rho6;
    well_depth * (rho12 - 2.0 * rho6)
}

#[inline]
pub fn coulomb(dist: f64, q1: f64, q2: f64, dielectric: f64) -> f64 {
    if dist < OVERLAP_DISTANCE {
        return q1.signum() * q2.signum() * OVERLAP_ENERGY;
    }
    COULOMB_CONSTANT * q1 * q2 / (dielectric * dist)
}

/// Threefold torsional barrier, zero at staggered angles (60°, 180°, 300°).
#[inline]
pub fn threefold_torsion(angle_deg: f64, barrier: f64) -> f64 {
    0.5 * barrier * (1.0 + (3.0 * angle_deg.to_radians()).cos())
}

#[inline]
pub fn combine_lj(r_min1: f64, well_depth1: f64, r_min2: f64, well_depth2: f64) -> (f64, f64) {
    ((r_min1 + r_min2) / 2.0, (well_depth1 * well_depth2).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-9;

    #[test]
    fn lennard_jones_reaches_minus_well_depth_at_r_min() {
        assert!((lennard_jones_12_6(3.5, 3.5, 0.2) + 0.2).abs() < TOL);
        assert!(lennard_jones_12_6(2.0, 3.5, 0.2) > 0.0);
        assert!(lennard_jones_12_6(8.0, 3.5, 0.2) < 0.0);
        assert_eq!(lennard_jones_12_6(0.0, 3.5, 0.2), OVERLAP_ENERGY);
    }

    #[test]
    fn coulomb_sign_follows_charges() {
        let repulsive = coulomb(4.0, 0.5, 0.5, 4.0);
        let attractive = coulomb(4.0, 0.5, -0.5, 4.0);
        assert!((repulsive - 332.0637 * 0.25 / 16.0).abs() < TOL);
        assert!((repulsive + attractive).abs() < TOL);
        assert_eq!(coulomb(0.0, 1.0, -1.0, 1.0), -OVERLAP_ENERGY);
    }

    #[test]
    fn threefold_torsion_is_zero_when_staggered_and_maximal_when_eclipsed() {
        assert!(threefold_torsion(60.0, 2.0).abs() < TOL);
        assert!(threefold_torsion(180.0, 2.0).abs() < TOL);
        assert!((threefold_torsion(0.0, 2.0) - 2.0).abs() < TOL);
        assert!((threefold_torsion(120.0, 2.0) - 2.0).abs() < TOL);
    }

    #[test]
    fn combine_lj_uses_arithmetic_radius_and_geometric_depth() {
        let (r, e) = combine_lj(3.0, 0.1, 4.0, 0.4);
        assert!((r - 3.5).abs() < TOL);
        assert!((e - 0.2).abs() < TOL);
    }
}
