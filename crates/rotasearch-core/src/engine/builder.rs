use super::cache::{CacheError, CachedEnergy, EnergyCache};
use super::config::FailurePolicy;
use super::dispatch::task::{Task, TaskOutput};
use super::dispatch::{Dispatcher, TaskOutcome};
use super::energy_matrix::EnergyMatrix;
use super::error::EngineError;
use super::evaluation::Evaluator;
use super::progress::{Progress, ProgressReporter};
use super::pruning::PrunedSet;
use crate::core::models::ids::PositionId;
use itertools::Itertools;
use tracing::{debug, info, instrument, warn};

/// Counters describing one matrix build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub cache_hits: usize,
    pub computed: usize,
    pub infeasible: usize,
    pub non_converged: usize,
    /// Tasks that failed on every worker and were re-run on the local CPU path.
    pub degraded: usize,
}

/// Fills every missing matrix entry needed by the eligible rotamers.
///
/// Entries already in the persistent cache are copied without evaluation. The rest
/// become tasks for the dispatcher. Each result is written to the cache as soon as
/// its task completes, while the rest of the batch is still running, and reaches
/// the matrix once the batch is over. A build that is interrupted or aborted keeps
/// every evaluation that finished before it stopped.
pub struct EnergyMatrixBuilder<'a> {
    cache: &'a EnergyCache,
    dispatcher: &'a Dispatcher,
    fallback: &'a Evaluator,
    policy: FailurePolicy,
    reporter: &'a ProgressReporter<'a>,
}

impl<'a> EnergyMatrixBuilder<'a> {
    pub fn new(
        cache: &'a EnergyCache,
        dispatcher: &'a Dispatcher,
        fallback: &'a Evaluator,
        policy: FailurePolicy,
        reporter: &'a ProgressReporter<'a>,
    ) -> Self {
        Self {
            cache,
            dispatcher,
            fallback,
            policy,
            reporter,
        }
    }

    #[instrument(skip_all, name = "energy_matrix_build")]
    pub fn build(
        &self,
        matrix: &mut EnergyMatrix,
        pruned: &PrunedSet,
    ) -> Result<BuildReport, EngineError> {
        let mut report = BuildReport::default();
        matrix.set_constant(self.fallback.forcefield().constant_energy());

        let mut pending = Vec::new();
        for task in missing_tasks(matrix, pruned) {
            let Some(key) = task.cache_key() else { continue };
            match self.cache.get(&key) {
                Some(cached) => {
                    commit_to_matrix(matrix, &task, cached.energy);
                    report.cache_hits += 1;
                }
                None => pending.push(task),
            }
        }
        info!(
            cached = report.cache_hits,
            to_compute = pending.len(),
            "Energy matrix entries resolved against cache"
        );

        self.reporter.report(Progress::TaskStart {
            total_steps: pending.len() as u64,
        });
        let mut stored: Vec<Option<CachedEnergy>> = vec![None; pending.len()];
        let mut cache_error: Option<CacheError> = None;
        let outcomes = self.dispatcher.run_batch_with(&pending, |index, outcome| {
            let TaskOutcome::Completed(output) = outcome else {
                return;
            };
            if cache_error.is_some() {
                return;
            }
            match self.persist(&pending[index], output) {
                Ok(value) => {
                    stored[index] = Some(value);
                    self.reporter.report(Progress::TaskIncrement);
                }
                Err(error) => cache_error = Some(error),
            }
        })?;
        if let Some(error) = cache_error {
            return Err(error.into());
        }

        for ((task, outcome), stored) in pending.iter().zip(outcomes).zip(stored) {
            let value = match (stored, outcome) {
                (Some(value), _) => value,
                (None, TaskOutcome::Completed(output)) => self.persist(task, &output)?,
                (None, TaskOutcome::Failed(failure)) => match self.policy {
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
                            "Task failed on all workers; evaluating locally"
                        );
                        report.degraded += 1;
                        let output = self.fallback.cpu_only().evaluate(task)?;
                        let value = self.persist(task, &output)?;
                        self.reporter.report(Progress::TaskIncrement);
                        value
                    }
                },
            };
            record(matrix, task, value, &mut report);
        }
        self.reporter.report(Progress::TaskFinish);

        info!(
            computed = report.computed,
            infeasible = report.infeasible,
            non_converged = report.non_converged,
            degraded = report.degraded,
            "Energy matrix build complete"
        );
        Ok(report)
    }

    /// Writes an evaluation to the cache and returns the value that is now stored.
    fn persist(&self, task: &Task, output: &TaskOutput) -> Result<CachedEnergy, CacheError> {
        let value = CachedEnergy {
            energy: output.energy,
            converged: output.converged,
        };
        let Some(key) = task.cache_key() else {
            return Ok(value);
        };
        // A concurrent run may have stored the entry first; its value wins.
        if self.cache.insert_if_absent(key, value)? {
            Ok(value)
        } else {
            Ok(self.cache.get(&key).unwrap_or(value))
        }
    }
}

fn record(matrix: &mut EnergyMatrix, task: &Task, value: CachedEnergy, report: &mut BuildReport) {
    commit_to_matrix(matrix, task, value.energy);

    report.computed += 1;
    if value.energy.is_infinite() {
        debug!(%task, "Recorded infeasible energy");
        report.infeasible += 1;
    }
    if !value.converged {
        report.non_converged += 1;
    }
}

fn commit_to_matrix(matrix: &mut EnergyMatrix, task: &Task, energy: f64) {
    match *task {
        Task::Single { position, rotamer } => {
            matrix.insert_single(position, rotamer, energy);
        }
        Task::Pair {
            pos1,
            rot1,
            pos2,
            rot2,
        } => {
            matrix.insert_pair(pos1, rot1, pos2, rot2, energy);
        }
        Task::Conformation { .. } => {}
    }
}

/// One task per absent entry among eligible rotamers and pairs, in a fixed order.
pub fn missing_tasks(matrix: &EnergyMatrix, pruned: &PrunedSet) -> Vec<Task> {
    let positions: Vec<PositionId> = (0..matrix.num_positions())
        .map(PositionId::from_index)
        .collect();
    let mut tasks = Vec::new();

    for &position in &positions {
        for rotamer in pruned.alive_rotamers(position) {
            if matrix.single(position, rotamer).is_none() {
                tasks.push(Task::Single { position, rotamer });
            }
        }
    }
    for (pos1, pos2) in positions.iter().copied().tuple_combinations() {
        let pairs = pruned
            .alive_rotamers(pos1)
            .into_iter()
            .cartesian_product(pruned.alive_rotamers(pos2));
        for (rot1, rot2) in pairs {
            if pruned.is_pair_alive(pos1, rot1, pos2, rot2)
                && matrix.pair(pos1, rot1, pos2, rot2).is_none()
            {
                tasks.push(Task::Pair {
                    pos1,
                    rot1,
                    pos2,
                    rot2,
                });
            }
        }
    }
    tasks
}
