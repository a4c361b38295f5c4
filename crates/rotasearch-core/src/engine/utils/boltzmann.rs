use thiserror::Error;

/// Gas constant in kcal/(mol·K).
pub const GAS_CONSTANT_KCAL: f64 = 1.987_203_6e-3;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BoltzmannError {
    #[error("Invalid temperature: {0} K. Temperature must be positive and finite")]
    InvalidTemperature(f64),
}

/// `RT` at the given temperature, in kcal/mol.
pub fn thermal_energy(temperature: f64) -> Result<f64, BoltzmannError> {
    if !(temperature.is_finite() && temperature > 0.0) {
        return Err(BoltzmannError::InvalidTemperature(temperature));
    }
    Ok(GAS_CONSTANT_KCAL * temperature)
}

/// Natural log of the Boltzmann weight `exp(-energy / rt)`.
#[inline]
pub fn log_weight(energy: f64, rt: f64) -> f64 {
    -energy / rt
}

/// `ln(exp(a) + exp(b))` without overflow. `-inf` is the additive identity.
pub fn log_add_exp(a: f64, b: f64) -> f64 {
    let (hi, lo) = if a >= b { (a, b) } else { (b, a) };
    if hi == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    if hi == f64::INFINITY {
        return f64::INFINITY;
    }
    hi + (lo - hi).exp().ln_1p()
}

/// `ln(Σ exp(x))` over `values`, `-inf` when empty.
pub fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY || max == f64::INFINITY {
        return max;
    }
    let sum: f64 = values.iter().map(|v| (v - max).exp()).sum();
    max + sum.ln()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-12;

    #[test]
    fn thermal_energy_rejects_non_positive_temperature() {
        assert!((thermal_energy(298.15).unwrap() - 0.592_484).abs() < 1e-5);
        assert_eq!(
            thermal_energy(0.0),
            Err(BoltzmannError::InvalidTemperature(0.0))
        );
        assert!(thermal_energy(f64::NAN).is_err());
    }

    #[test]
    fn log_add_exp_matches_direct_sum_for_small_values() {
        let expected = (2.0f64.exp() + 3.0f64.exp()).ln();
        assert!((log_add_exp(2.0, 3.0) - expected).abs() < TOLERANCE);
        assert!((log_add_exp(3.0, 2.0) - expected).abs() < TOLERANCE);
    }

    #[test]
    fn log_add_exp_handles_identity_and_large_magnitudes() {
        assert_eq!(log_add_exp(f64::NEG_INFINITY, 4.0), 4.0);
        assert_eq!(log_add_exp(f64::NEG_INFINITY, f64::NEG_INFINITY), f64::NEG_INFINITY);
        let big = log_add_exp(1000.0, 1000.0);
        assert!((big - (1000.0 + std::f64::consts::LN_2)).abs() < 1e-9);
    }

    #[test]
    fn log_sum_exp_agrees_with_pairwise_accumulation() {
        let values = [-1.0, 0.5, 2.0, -700.0];
        let folded = values.iter().copied().fold(f64::NEG_INFINITY, log_add_exp);
        assert!((log_sum_exp(&values) - folded).abs() < 1e-12);
        assert_eq!(log_sum_exp(&[]), f64::NEG_INFINITY);
    }
}
