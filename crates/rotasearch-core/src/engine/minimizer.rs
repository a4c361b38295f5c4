use super::config::MinimizerConfig;
use crate::core::models::conf_space::DofBound;
use tracing::trace;

const MAX_BACKTRACKS: usize = 30;
const GRADIENT_FLOOR: f64 = 1e-12;
const SUFFICIENT_DECREASE: f64 = 0.25;

/// Outcome of a local minimization.
#[derive(Debug, Clone, PartialEq)]
pub struct Minimization {
    pub energy: f64,
    pub dofs: Vec<f64>,
    pub iterations: usize,
    /// False when the iteration cap was reached first. The energy is still a valid
    /// (if less tight) value for the returned degrees of freedom.
    pub converged: bool,
}

/// Deterministic projected steepest descent with a backtracking line search.
///
/// Every trial point is clamped into `bounds`. Each iteration estimates the gradient
/// by central differences, walks along the normalised descent direction and halves
/// the step until the energy decreases by a fixed fraction of the first-order
/// prediction (Armijo condition). Descent stops when the improvement falls to
/// `tolerance * max(|E|, 1)`, when no decreasing step exists, or at the iteration
/// cap. The objective may return `+inf` for infeasible points; those are never
/// accepted.
pub fn minimize<F>(
    objective: F,
    bounds: &[DofBound],
    start: &[f64],
    config: &MinimizerConfig,
) -> Minimization
where
    F: Fn(&[f64]) -> f64,
{
    let mut x: Vec<f64> = bounds
        .iter()
        .zip(start)
        .map(|(bound, &value)| bound.clamp(value))
        .collect();
    let mut energy = objective(&x);

    if bounds.iter().all(DofBound::is_fixed) || !energy.is_finite() {
        return Minimization {
            energy,
            dofs: x,
            iterations: 0,
            converged: true,
        };
    }

    let mut step = config.initial_step;
    for iteration in 1..=config.max_iterations {
        let gradient = projected_gradient(&objective, &x, energy, bounds, config.gradient_step);
        let norm = gradient.iter().map(|g| g * g).sum::<f64>().sqrt();
        if norm < GRADIENT_FLOOR {
            return Minimization {
                energy,
                dofs: x,
                iterations: iteration,
                converged: true,
            };
        }

        let mut trial_step = step;
        let mut accepted = None;
        for _ in 0..MAX_BACKTRACKS {
            let candidate: Vec<f64> = x
                .iter()
                .zip(&gradient)
                .zip(bounds)
                .map(|((&xi, &gi), bound)| bound.clamp(xi - trial_step * gi / norm))
                .collect();
            let predicted: f64 = x
                .iter()
                .zip(&candidate)
                .zip(&gradient)
                .map(|((&xi, &ci), &gi)| gi * (xi - ci))
                .sum();
            let candidate_energy = objective(&candidate);
            if candidate_energy < energy
                && candidate_energy <= energy - SUFFICIENT_DECREASE * predicted
            {
                accepted = Some((candidate, candidate_energy));
                break;
            }
            trial_step *= 0.5;
        }

        let Some((candidate, candidate_energy)) = accepted else {
            trace!(iteration, energy, "No descending step left; local minimum reached");
            return Minimization {
                energy,
                dofs: x,
                iterations: iteration,
                converged: true,
            };
        };

        let improvement = energy - candidate_energy;
        x = candidate;
        energy = candidate_energy;
        step = trial_step * 2.0;

        if improvement <= config.tolerance * energy.abs().max(1.0) {
            return Minimization {
                energy,
                dofs: x,
                iterations: iteration,
                converged: true,
            };
        }
    }

    Minimization {
        energy,
        dofs: x,
        iterations: config.max_iterations,
        converged: false,
    }
}

/// Central-difference gradient, falling back to one-sided differences near bounds
/// or infeasible neighbours, with components that would push past an active bound
/// zeroed.
fn projected_gradient<F>(objective: &F, x: &[f64], fx: f64, bounds: &[DofBound], h: f64) -> Vec<f64>
where
    F: Fn(&[f64]) -> f64,
{
    let mut shifted = x.to_vec();
    let mut gradient = vec![0.0; x.len()];

    for (i, bound) in bounds.iter().enumerate() {
        if bound.is_fixed() {
            continue;
        }
        let up = bound.clamp(x[i] + h);
        let down = bound.clamp(x[i] - h);

        shifted[i] = up;
        let f_up = objective(&shifted);
        shifted[i] = down;
        let f_down = objective(&shifted);
        shifted[i] = x[i];

        let derivative = match (f_up.is_finite(), f_down.is_finite()) {
            (true, true) if up > down => (f_up - f_down) / (up - down),
            (true, _) if up > x[i] => (f_up - fx) / (up - x[i]),
            (_, true) if x[i] > down => (fx - f_down) / (x[i] - down),
            _ => 0.0,
        };

        let at_lower = x[i] <= bound.min && derivative > 0.0;
        let at_upper = x[i] >= bound.max && derivative < 0.0;
        gradient[i] = if at_lower || at_upper || !derivative.is_finite() {
            0.0
        } else {
            derivative
        };
    }
    gradient
}
