//! # Workflows Module
//!
//! End-to-end design procedures built on the engine.
//!
//! ## Overview
//!
//! A workflow takes an open [`session::DesignSession`] and runs every phase of a
//! design: building the energy matrix, dead-end elimination, and the best-first
//! search, then post-processes what the search yields into the requested result.
//! Progress is reported through a [`ProgressReporter`] and a run can be stopped
//! cooperatively through a [`StopSignal`].
//!
//! ## Architecture
//!
//! - **Conformation Search** ([`gmec`]) - The global minimum, the `K` best
//!   conformations, or every conformation within an energy window of the minimum
//! - **Partition Function** ([`pfunc`]) - A Boltzmann-weighted sum over
//!   conformations with guaranteed lower and upper bounds
//! - **Binding Score** ([`kstar`]) - The K* ratio of complex, protein, and ligand
//!   partition functions
//!
//! ## Outcomes
//!
//! Infeasible designs and early stops are reported through
//! [`DesignStatus`](crate::engine::state::DesignStatus) on the result, not as
//! errors. Only configuration problems, unrecoverable task failures, and storage
//! failures surface as [`EngineError`].

pub mod gmec;
pub mod kstar;
pub mod pfunc;
pub mod session;

use crate::engine::builder::{BuildReport, EnergyMatrixBuilder};
use crate::engine::config::{DesignConfig, EnergyStrategyKind, FailurePolicy, SearchMode};
use crate::engine::dispatch::TaskOutcome;
use crate::engine::dispatch::task::Task;
use crate::engine::energy_matrix::EnergyMatrix;
use crate::engine::error::EngineError;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::pruning::{DeePruner, PrunedSet, PruningReport};
use crate::engine::state::{EnergiedConf, ScoredConf, StopSignal};
use session::DesignSession;
use tracing::{info, instrument, warn};

/// What [`run`] produced, depending on the configured search mode.
#[derive(Debug, Clone)]
pub enum DesignOutcome {
    Conformations(gmec::GmecResult),
    PartitionFunction(pfunc::PartitionFunctionResult),
}

/// Runs the workflow matching the session's search mode.
pub fn run(
    session: &DesignSession,
    reporter: &ProgressReporter,
    stop: &StopSignal,
) -> Result<DesignOutcome, EngineError> {
    match session.config().search.mode {
        SearchMode::PartitionFunction { .. } => {
            pfunc::run(session, reporter, stop).map(DesignOutcome::PartitionFunction)
        }
        _ => gmec::run(session, reporter, stop).map(DesignOutcome::Conformations),
    }
}

/// The matrix and surviving candidates a search starts from.
pub(crate) struct Prepared {
    pub matrix: EnergyMatrix,
    pub pruned: PrunedSet,
    pub build: BuildReport,
    pub pruning: Option<PruningReport>,
}

/// Dominance margin for dead-end elimination, or `None` when only infeasible and
/// clashing candidates may be removed.
///
/// Rigid matrices hold exact terms, so the margin only has to cover the requested
/// energy window. Minimized matrices hold lower bounds; dominance among them is
/// trusted only when the configured interval is positive, and is then widened by the
/// window. Top-K and partition function runs need every feasible conformation, so
/// they never use dominance.
pub(crate) fn pruning_interval(config: &DesignConfig) -> Option<f64> {
    let interval = config.pruning.interval;
    let window = match config.search.mode {
        SearchMode::Gmec => 0.0,
        SearchMode::EnergyWindow { window } => window,
        SearchMode::TopK { .. } | SearchMode::PartitionFunction { .. } => return None,
    };
    match config.energy.strategy {
        EnergyStrategyKind::Rigid => Some(interval.max(window)),
        EnergyStrategyKind::Minimized if interval > 0.0 => Some(interval + window),
        EnergyStrategyKind::Minimized => None,
    }
}

#[instrument(skip_all, name = "prepare")]
pub(crate) fn prepare(
    session: &DesignSession,
    reporter: &ProgressReporter,
) -> Result<Prepared, EngineError> {
    let config = session.config();
    let sizes = session.conf_space().sizes();
    let mut matrix = EnergyMatrix::new(&sizes);
    let mut pruned = PrunedSet::full(&sizes);

    let build = reporter.phase("Energy Matrix", || {
        EnergyMatrixBuilder::new(
            session.cache(),
            session.dispatcher(),
            session.evaluator(),
            config.energy.failure_policy,
            reporter,
        )
        .build(&mut matrix, &pruned)
    })?;

    let pruning = if config.pruning.enabled {
        let interval = pruning_interval(config);
        let pruner = DeePruner::new(&matrix, &config.pruning, interval);
        let report = reporter.phase("Pruning", || pruner.run(&mut pruned));
        info!(
            rotamers = report.rotamers_pruned,
            pairs = pruned.num_pruned_pairs(),
            rounds = report.rounds,
            remaining = pruned.num_conformations(),
            "Dead-end elimination finished"
        );
        Some(report)
    } else {
        None
    };

    Ok(Prepared {
        matrix,
        pruned,
        build,
        pruning,
    })
}

/// Attaches an energy to each scored conformation.
///
/// Rigid scores are already exact. Minimized conformations are re-evaluated as whole
/// conformations on the worker pool; non-finite results are kept as `+inf`.
pub(crate) fn energize(
    session: &DesignSession,
    confs: Vec<ScoredConf>,
) -> Result<Vec<EnergiedConf>, EngineError> {
    if session.config().energy.strategy == EnergyStrategyKind::Rigid || confs.is_empty() {
        return Ok(confs
            .into_iter()
            .map(|conf| EnergiedConf {
                energy: conf.score,
                converged: true,
                assignment: conf.assignment,
                score: conf.score,
            })
            .collect());
    }

    let tasks: Vec<Task> = confs
        .iter()
        .map(|conf| Task::Conformation {
            assignment: conf.assignment.clone(),
        })
        .collect();
    let outcomes = session.dispatcher().run_batch(&tasks)?;

    let mut energied = Vec::with_capacity(confs.len());
    for ((conf, task), outcome) in confs.into_iter().zip(&tasks).zip(outcomes) {
        let output = match outcome {
            TaskOutcome::Completed(output) => output,
            TaskOutcome::Failed(failure) => match session.config().energy.failure_policy {
                FailurePolicy::Abort => {
                    return Err(EngineError::TaskFailed {
                        task: task.to_string(),
                        attempts: failure.attempts,
                        reason: failure.error.to_string(),
                    });
                }
                FailurePolicy::Degrade => {
                    warn!(
                        %task,
                        error = %failure.error,
                        "Conformation task failed on all workers; minimizing locally"
                    );
                    session.evaluator().cpu_only().evaluate(task)?
                }
            },
        };
        energied.push(EnergiedConf {
            assignment: conf.assignment,
            score: conf.score,
            energy: output.energy,
            converged: output.converged,
        });
    }
    Ok(energied)
}

pub(crate) fn report_conformation(reporter: &ProgressReporter, rank: usize, conf: &EnergiedConf) {
    reporter.report(Progress::ConformationFound {
        rank,
        score: conf.energy,
    });
}
