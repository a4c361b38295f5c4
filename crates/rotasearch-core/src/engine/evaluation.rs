use super::config::{DesignConfig, EnergyStrategyKind, MinimizerConfig};
use super::dispatch::task::{Task, TaskOutput};
use super::minimizer::minimize;
use crate::core::forcefield::fingerprint::Fingerprint;
use crate::core::forcefield::scoring::{EvalError, ForceField, PlacedRotamer};
use crate::core::models::conf_space::{ConfSpace, DofBound, Rotamer};
use crate::core::models::ids::PositionId;
use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{trace, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KernelError {
    #[error("Accelerated kernel unavailable: {0}")]
    Unavailable(String),
    #[error("Accelerated kernel failed: {0}")]
    Failed(String),
}

/// A hardware-accelerated evaluator of rigid energy terms.
///
/// Kernels sit behind the same task interface as the CPU path. Any error makes the
/// evaluator fall back to the CPU for that task, so results never depend on whether
/// acceleration is present.
pub trait EnergyKernel: Send + Sync {
    fn name(&self) -> &str;
    fn evaluate(&self, conf_space: &ConfSpace, task: &Task) -> Result<f64, KernelError>;
}

#[derive(Clone, Default)]
pub enum ComputeBackend {
    #[default]
    Cpu,
    Accelerated(Arc<dyn EnergyKernel>),
}

impl ComputeBackend {
    pub fn is_accelerated(&self) -> bool {
        matches!(self, Self::Accelerated(_))
    }
}

impl fmt::Debug for ComputeBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "Cpu"),
            Self::Accelerated(kernel) => write!(f, "Accelerated({})", kernel.name()),
        }
    }
}

/// How a set of placed rotamers is turned into one energy.
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationStrategy {
    /// Energy at the rotamers' initial degrees of freedom.
    Rigid,
    /// Energy minimized over the rotamers' continuous degrees of freedom.
    Minimized(MinimizerConfig),
}

impl EvaluationStrategy {
    pub fn from_config(config: &DesignConfig) -> Self {
        match config.energy.strategy {
            EnergyStrategyKind::Rigid => Self::Rigid,
            EnergyStrategyKind::Minimized => Self::Minimized(config.minimizer.clone()),
        }
    }

    fn evaluate(
        &self,
        placement: &Placement<'_>,
        forcefield: &dyn ForceField,
    ) -> Result<TaskOutput, EvalError> {
        let fatal = RefCell::new(None);
        let objective = |dofs: &[f64]| match placement.energy(forcefield, dofs) {
            Ok(energy) if energy.is_finite() => energy,
            Ok(_) => f64::INFINITY,
            Err(e) if e.is_infeasible() => f64::INFINITY,
            Err(e) => {
                fatal.borrow_mut().get_or_insert(e);
                f64::INFINITY
            }
        };

        let initial = placement.initial_dofs();
        let output = match self {
            Self::Rigid => TaskOutput {
                energy: objective(initial.as_slice()),
                converged: true,
                dofs: initial,
            },
            Self::Minimized(config) => {
                let result = minimize(&objective, &placement.bounds, &initial, config);
                if !result.converged {
                    warn!(
                        iterations = result.iterations,
                        energy = result.energy,
                        "Minimization hit its iteration cap; keeping degraded energy"
                    );
                }
                TaskOutput {
                    energy: result.energy,
                    converged: result.converged,
                    dofs: result.dofs,
                }
            }
        };

        match fatal.into_inner() {
            Some(e) => Err(e),
            None => Ok(output),
        }
    }
}

/// What a task asks to be scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Terms {
    Single,
    Pair,
    Total,
}

struct Placement<'a> {
    rotamers: Vec<(PositionId, &'a Rotamer)>,
    offsets: Vec<usize>,
    bounds: Vec<DofBound>,
    terms: Terms,
}

impl<'a> Placement<'a> {
    fn new(rotamers: Vec<(PositionId, &'a Rotamer)>, terms: Terms) -> Self {
        let mut offsets = Vec::with_capacity(rotamers.len() + 1);
        let mut bounds = Vec::new();
        offsets.push(0);
        for (_, rotamer) in &rotamers {
            bounds.extend(rotamer.dofs.iter().cloned());
            offsets.push(bounds.len());
        }
        Self {
            rotamers,
            offsets,
            bounds,
            terms,
        }
    }

    fn initial_dofs(&self) -> Vec<f64> {
        self.bounds.iter().map(|b| b.initial).collect()
    }

    fn is_rigid(&self) -> bool {
        self.bounds.iter().all(DofBound::is_fixed)
    }

    fn placed<'b>(&'b self, index: usize, dofs: &'b [f64]) -> PlacedRotamer<'b> {
        let (position, rotamer) = self.rotamers[index];
        PlacedRotamer {
            position,
            rotamer,
            dofs: &dofs[self.offsets[index]..self.offsets[index + 1]],
        }
    }

    fn energy(&self, forcefield: &dyn ForceField, dofs: &[f64]) -> Result<f64, EvalError> {
        match self.terms {
            Terms::Single => forcefield.single_energy(self.placed(0, dofs)),
            Terms::Pair => forcefield.pair_energy(self.placed(0, dofs), self.placed(1, dofs)),
            Terms::Total => {
                let mut total = forcefield.constant_energy();
                for i in 0..self.rotamers.len() {
                    total += forcefield.single_energy(self.placed(i, dofs))?;
                    for j in 0..i {
                        total +=
                            forcefield.pair_energy(self.placed(j, dofs), self.placed(i, dofs))?;
                    }
                }
                Ok(total)
            }
        }
    }
}

/// Executes tasks against a conformation space and force field with one
/// evaluation strategy on one compute backend.
#[derive(Clone)]
pub struct Evaluator {
    conf_space: Arc<ConfSpace>,
    forcefield: Arc<dyn ForceField>,
    strategy: EvaluationStrategy,
    backend: ComputeBackend,
}

impl Evaluator {
    pub fn new(
        conf_space: Arc<ConfSpace>,
        forcefield: Arc<dyn ForceField>,
        strategy: EvaluationStrategy,
    ) -> Self {
        Self {
            conf_space,
            forcefield,
            strategy,
            backend: ComputeBackend::Cpu,
        }
    }

    pub fn with_backend(mut self, backend: ComputeBackend) -> Self {
        self.backend = backend;
        self
    }

    /// The same evaluator restricted to the CPU path.
    pub fn cpu_only(&self) -> Self {
        self.clone().with_backend(ComputeBackend::Cpu)
    }

    pub fn conf_space(&self) -> &ConfSpace {
        &self.conf_space
    }

    pub fn forcefield(&self) -> &dyn ForceField {
        self.forcefield.as_ref()
    }

    pub fn strategy(&self) -> &EvaluationStrategy {
        &self.strategy
    }

    pub fn backend(&self) -> &ComputeBackend {
        &self.backend
    }

    /// Identity of everything a term's energy depends on: force field, conformation
    /// space and strategy. The backend is left out because kernels must agree with
    /// the CPU path.
    pub fn fingerprint(&self) -> String {
        let mut fp = Fingerprint::new("evaluation");
        fp.str(&self.forcefield.fingerprint());
        let positions = self.conf_space.positions();
        fp.u64(positions.len() as u64);
        for position in positions {
            fp.str(&position.name).u64(position.rotamers.len() as u64);
            for rotamer in &position.rotamers {
                fp.str(&rotamer.label).u64(rotamer.dofs.len() as u64);
                for dof in &rotamer.dofs {
                    fp.str(&dof.name).f64(dof.initial).f64(dof.min).f64(dof.max);
                }
            }
        }
        match &self.strategy {
            EvaluationStrategy::Rigid => {
                fp.str("rigid");
            }
            EvaluationStrategy::Minimized(config) => {
                fp.str("minimized")
                    .u64(config.max_iterations as u64)
                    .f64(config.tolerance)
                    .f64(config.initial_step)
                    .f64(config.gradient_step);
            }
        }
        fp.finish()
    }

    /// Evaluates one task.
    ///
    /// Infeasible geometry and numerical failures yield `+inf` rather than an error.
    /// Only tasks referring to rotamers outside the space, or force-field failures
    /// that indicate broken input, are returned as errors.
    pub fn evaluate(&self, task: &Task) -> Result<TaskOutput, EvalError> {
        let placement = self.placement(task)?;

        if let ComputeBackend::Accelerated(kernel) = &self.backend {
            if self.strategy == EvaluationStrategy::Rigid || placement.is_rigid() {
                match kernel.evaluate(&self.conf_space, task) {
                    Ok(energy) => {
                        trace!(%task, kernel = kernel.name(), "Evaluated on accelerated kernel");
                        return Ok(TaskOutput {
                            energy: if energy.is_finite() { energy } else { f64::INFINITY },
                            converged: true,
                            dofs: placement.initial_dofs(),
                        });
                    }
                    Err(e) => {
                        warn!(
                            %task,
                            kernel = kernel.name(),
                            error = %e,
                            "Falling back to CPU evaluation"
                        );
                    }
                }
            }
        }

        self.strategy.evaluate(&placement, self.forcefield.as_ref())
    }

    fn placement(&self, task: &Task) -> Result<Placement<'_>, EvalError> {
        let lookup = |position, rotamer| {
            self.conf_space
                .rotamer(position, rotamer)
                .map(|r| (position, r))
                .ok_or(EvalError::UnknownRotamer { position, rotamer })
        };
        Ok(match task {
            Task::Single { position, rotamer } => {
                Placement::new(vec![lookup(*position, *rotamer)?], Terms::Single)
            }
            Task::Pair {
                pos1,
                rot1,
                pos2,
                rot2,
            } => Placement::new(
                vec![lookup(*pos1, *rot1)?, lookup(*pos2, *rot2)?],
                Terms::Pair,
            ),
            Task::Conformation { assignment } => Placement::new(
                assignment
                    .assigned()
                    .map(|(p, r)| lookup(p, r))
                    .collect::<Result<_, _>>()?,
                Terms::Total,
            ),
        })
    }
}

impl fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Evaluator")
            .field("positions", &self.conf_space.num_positions())
            .field("strategy", &self.strategy)
            .field("backend", &self.backend)
            .finish()
    }
}
