use super::session::DesignSession;
use super::{energize, prepare, report_conformation};
use crate::engine::builder::BuildReport;
use crate::engine::config::{EnergyStrategyKind, SearchMode};
use crate::engine::error::EngineError;
use crate::engine::progress::ProgressReporter;
use crate::engine::pruning::{PruningOutcome, PruningReport};
use crate::engine::search::{ConfSearch, Frontier, SearchStats, SearchStep};
use crate::engine::state::{DesignStatus, EnergiedConf, InfeasibleReason, StopSignal};
use crate::engine::utils::boltzmann::{log_add_exp, log_weight, thermal_energy};
use tracing::{debug, info, instrument};

#[derive(Debug, Clone)]
pub struct PartitionFunctionResult {
    pub status: DesignStatus,
    /// `ln` of the Boltzmann-weighted sum over evaluated conformations.
    pub log_lower: f64,
    /// `ln` of the lower bound plus the largest possible contribution of the rest.
    pub log_upper: f64,
    /// Fraction of the upper bound not yet accounted for.
    pub epsilon: f64,
    pub evaluated: usize,
    /// Evaluated conformations in enumeration order.
    pub conformations: Vec<EnergiedConf>,
    pub build: BuildReport,
    pub pruning: Option<PruningReport>,
    pub search: SearchStats,
}

impl PartitionFunctionResult {
    fn empty(status: DesignStatus, build: BuildReport, pruning: Option<PruningReport>) -> Self {
        Self {
            status,
            log_lower: f64::NEG_INFINITY,
            log_upper: f64::NEG_INFINITY,
            epsilon: 0.0,
            evaluated: 0,
            conformations: Vec::new(),
            build,
            pruning,
            search: SearchStats::default(),
        }
    }
}

/// Running bounds on `ln Z`.
#[derive(Debug, Clone, Copy)]
struct Bounds {
    rt: f64,
    /// Conformations that remain unevaluated.
    remaining: f64,
    log_evaluated: f64,
}

impl Bounds {
    fn add(&mut self, energy: f64) {
        self.remaining = (self.remaining - 1.0).max(0.0);
        self.log_evaluated = log_add_exp(self.log_evaluated, log_weight(energy, self.rt));
    }

    /// Upper bound on the log weight of everything not yet evaluated.
    fn log_remaining(&self, next_bound: Option<f64>) -> f64 {
        match next_bound {
            Some(bound) if self.remaining > 0.0 => self.remaining.ln() + log_weight(bound, self.rt),
            _ => f64::NEG_INFINITY,
        }
    }

    fn log_upper(&self, next_bound: Option<f64>) -> f64 {
        log_add_exp(self.log_evaluated, self.log_remaining(next_bound))
    }

    /// `rem / (q + rem)`, zero once nothing remains and one before anything is known.
    fn epsilon(&self, next_bound: Option<f64>) -> f64 {
        let upper = self.log_upper(next_bound);
        if upper == f64::NEG_INFINITY {
            return 0.0;
        }
        (self.log_remaining(next_bound) - upper).exp()
    }
}

/// Estimates the partition function to the configured relative accuracy.
///
/// Conformations are enumerated in bound order and their Boltzmann weights summed.
/// Everything not yet enumerated weighs at most `exp(-next_bound / RT)` each, which
/// bounds the missing mass; the run stops once that mass is at most `epsilon` of the
/// upper bound.
#[instrument(skip_all, name = "partition_function_workflow")]
pub fn run(
    session: &DesignSession,
    reporter: &ProgressReporter,
    stop: &StopSignal,
) -> Result<PartitionFunctionResult, EngineError> {
    let config = session.config();
    let SearchMode::PartitionFunction { epsilon: target } = config.search.mode else {
        return Err(EngineError::UnsupportedMode {
            mode: format!("{:?}", config.search.mode),
            workflow: "partition function",
        });
    };
    let rt = thermal_energy(config.temperature).map_err(|e| EngineError::Internal(e.to_string()))?;
    let prepared = prepare(session, reporter)?;

    if let Some(PruningReport {
        outcome: PruningOutcome::Exhausted { position },
        ..
    }) = prepared.pruning
    {
        return Ok(PartitionFunctionResult::empty(
            DesignStatus::Infeasible(InfeasibleReason::PruningExhausted { position }),
            prepared.build,
            prepared.pruning,
        ));
    }

    let frontier = Frontier::from_config(&config.search)?;
    let mut search = ConfSearch::new(
        &prepared.matrix,
        &prepared.pruned,
        &config.search,
        frontier,
        stop.clone(),
    )?;
    let batch_size = match config.energy.strategy {
        EnergyStrategyKind::Rigid => 1,
        EnergyStrategyKind::Minimized => session.dispatcher().num_workers().max(1),
    };
    let mut bounds = Bounds {
        rt,
        remaining: prepared.pruned.num_conformations(),
        log_evaluated: f64::NEG_INFINITY,
    };

    let sample = || -> Result<_, EngineError> {
        let mut conformations = Vec::new();
        loop {
            let achieved = bounds.epsilon(search.peek_bound());
            if !conformations.is_empty() && achieved <= target {
                return Ok((conformations, DesignStatus::Solved));
            }

            let mut batch = Vec::new();
            let mut terminal = None;
            while batch.len() < batch_size {
                match search.next_conf()? {
                    SearchStep::Conf(conf) => batch.push(conf),
                    SearchStep::Exhausted => {
                        terminal = Some(DesignStatus::Solved);
                        break;
                    }
                    SearchStep::Stopped(reason) => {
                        terminal = Some(DesignStatus::Stopped(reason));
                        break;
                    }
                }
            }

            for conf in energize(session, batch)? {
                bounds.add(conf.energy);
                report_conformation(reporter, conformations.len(), &conf);
                conformations.push(conf);
            }
            debug!(
                evaluated = conformations.len(),
                log_lower = bounds.log_evaluated,
                epsilon = bounds.epsilon(search.peek_bound()),
                "Partition function progress"
            );

            if let Some(status) = terminal {
                return Ok((conformations, status));
            }
        }
    };
    let (conformations, status) = reporter.phase("Partition Function", sample)?;

    let next_bound = search.peek_bound();
    let status = match status {
        DesignStatus::Solved if bounds.log_evaluated == f64::NEG_INFINITY => {
            DesignStatus::Infeasible(InfeasibleReason::FrontierExhausted)
        }
        other => other,
    };
    let result = PartitionFunctionResult {
        status,
        log_lower: bounds.log_evaluated,
        log_upper: bounds.log_upper(next_bound),
        epsilon: bounds.epsilon(next_bound),
        evaluated: conformations.len(),
        conformations,
        build: prepared.build,
        pruning: prepared.pruning,
        search: search.close()?,
    };
    info!(
        status = %result.status,
        log_lower = result.log_lower,
        log_upper = result.log_upper,
        epsilon = result.epsilon,
        evaluated = result.evaluated,
        "Partition function estimate complete"
    );
    Ok(result)
}
