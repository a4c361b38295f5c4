use super::pfunc::{self, PartitionFunctionResult};
use super::session::DesignSession;
use crate::engine::error::EngineError;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::state::StopSignal;
use std::f64::consts::LN_10;
use tracing::{info, instrument};

/// Partition functions of the three binding states and the resulting K* score.
#[derive(Debug, Clone)]
pub struct KStarResult {
    pub complex: PartitionFunctionResult,
    pub protein: PartitionFunctionResult,
    pub ligand: PartitionFunctionResult,
    /// `log10(Z_complex / (Z_protein * Z_ligand))` from the lower bounds, when every
    /// state was solved with a non-zero partition function.
    pub log10_kstar: Option<f64>,
    /// Bounds on the score implied by the bounds on each partition function.
    pub log10_lower: f64,
    pub log10_upper: f64,
}

impl KStarResult {
    fn new(
        complex: PartitionFunctionResult,
        protein: PartitionFunctionResult,
        ligand: PartitionFunctionResult,
    ) -> Self {
        let score = |c: f64, p: f64, l: f64| (c - p - l) / LN_10;
        let log10_lower = score(complex.log_lower, protein.log_upper, ligand.log_upper);
        let log10_upper = score(complex.log_upper, protein.log_lower, ligand.log_lower);

        let states = [&complex, &protein, &ligand];
        let usable = states
            .iter()
            .all(|s| s.status.is_solved() && s.log_lower.is_finite());
        let log10_kstar =
            usable.then(|| score(complex.log_lower, protein.log_lower, ligand.log_lower));

        Self {
            complex,
            protein,
            ligand,
            log10_kstar,
            log10_lower: nan_to(log10_lower, f64::NEG_INFINITY),
            log10_upper: nan_to(log10_upper, f64::INFINITY),
        }
    }
}

fn nan_to(value: f64, fallback: f64) -> f64 {
    if value.is_nan() { fallback } else { value }
}

/// Scores binding by running the partition function workflow on the complex, the
/// unbound protein, and the unbound ligand.
#[instrument(skip_all, name = "kstar_workflow")]
pub fn run(
    complex: &DesignSession,
    protein: &DesignSession,
    ligand: &DesignSession,
    reporter: &ProgressReporter,
    stop: &StopSignal,
) -> Result<KStarResult, EngineError> {
    let mut states = Vec::with_capacity(3);
    for (name, session) in [("complex", complex), ("protein", protein), ("ligand", ligand)] {
        reporter.report(Progress::Message(format!("Estimating {name} partition function")));
        let result = pfunc::run(session, reporter, stop)?;
        info!(
            state = name,
            status = %result.status,
            log_lower = result.log_lower,
            "State finished"
        );
        states.push(result);
    }
    let [complex, protein, ligand]: [PartitionFunctionResult; 3] = states
        .try_into()
        .map_err(|_| EngineError::Internal("expected three binding states".to_string()))?;

    let result = KStarResult::new(complex, protein, ligand);
    info!(
        log10_kstar = ?result.log10_kstar,
        lower = result.log10_lower,
        upper = result.log10_upper,
        "K* score computed"
    );
    Ok(result)
}
