use super::session::DesignSession;
use super::{energize, prepare, report_conformation};
use crate::engine::builder::BuildReport;
use crate::engine::config::{EnergyStrategyKind, SearchMode};
use crate::engine::error::EngineError;
use crate::engine::progress::ProgressReporter;
use crate::engine::pruning::{PruningOutcome, PruningReport};
use crate::engine::search::{ConfSearch, Frontier, SearchStats, SearchStep};
use crate::engine::state::{DesignStatus, EnergiedConf, InfeasibleReason, StopSignal};
use tracing::{info, instrument};

#[derive(Debug, Clone)]
pub struct GmecResult {
    pub status: DesignStatus,
    /// Ascending by energy.
    pub conformations: Vec<EnergiedConf>,
    pub build: BuildReport,
    pub pruning: Option<PruningReport>,
    pub search: SearchStats,
}

impl GmecResult {
    pub fn best(&self) -> Option<&EnergiedConf> {
        self.conformations.first()
    }
}

/// How many conformations a mode wants and how far above the `count`-th best energy
/// the search must keep looking.
struct Target {
    count: usize,
    window: f64,
    gap: f64,
}

impl Target {
    fn new(mode: SearchMode, gap: f64) -> Option<Self> {
        let (count, window) = match mode {
            SearchMode::Gmec => (1, 0.0),
            SearchMode::TopK { count } => (count, 0.0),
            SearchMode::EnergyWindow { window } => (1, window),
            SearchMode::PartitionFunction { .. } => return None,
        };
        Some(Self { count, window, gap })
    }

    /// Energy above which no further conformation can enter the result, once
    /// `count` conformations are known.
    fn cutoff(&self, sorted_energies: &[f64]) -> Option<f64> {
        sorted_energies
            .get(self.count.saturating_sub(1))
            .map(|kth| kth + self.window - self.gap)
    }

    fn satisfied(&self, sorted_energies: &[f64], next_bound: Option<f64>) -> bool {
        match (self.cutoff(sorted_energies), next_bound) {
            (Some(_), None) => true,
            (Some(cutoff), Some(bound)) => bound > cutoff,
            (None, _) => false,
        }
    }

    fn finish(&self, mut confs: Vec<EnergiedConf>) -> Vec<EnergiedConf> {
        confs.sort_by(|a, b| a.energy.total_cmp(&b.energy).then(a.score.total_cmp(&b.score)));
        if self.window > 0.0 {
            if let Some(best) = confs.first().map(|c| c.energy) {
                confs.retain(|c| c.energy <= best + self.window);
            }
        } else {
            confs.truncate(self.count);
        }
        confs
    }
}

/// Finds the global minimum, the top `K`, or an energy window of conformations.
#[instrument(skip_all, name = "gmec_workflow")]
pub fn run(
    session: &DesignSession,
    reporter: &ProgressReporter,
    stop: &StopSignal,
) -> Result<GmecResult, EngineError> {
    let config = session.config();
    let Some(target) = Target::new(config.search.mode, config.search.optimality_gap) else {
        return Err(EngineError::UnsupportedMode {
            mode: format!("{:?}", config.search.mode),
            workflow: "conformation search",
        });
    };
    let prepared = prepare(session, reporter)?;

    if let Some(PruningReport {
        outcome: PruningOutcome::Exhausted { position },
        ..
    }) = prepared.pruning
    {
        info!(%position, "Design is infeasible after pruning");
        return Ok(GmecResult {
            status: DesignStatus::Infeasible(InfeasibleReason::PruningExhausted { position }),
            conformations: Vec::new(),
            build: prepared.build,
            pruning: prepared.pruning,
            search: SearchStats::default(),
        });
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

    let (found, status) = reporter.phase("Search", || -> Result<_, EngineError> {
        let mut found: Vec<EnergiedConf> = Vec::new();
        let mut energies: Vec<f64> = Vec::new();
        loop {
            if target.satisfied(&energies, search.peek_bound()) {
                return Ok((found, DesignStatus::Solved));
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
                if target.satisfied(&energies, search.peek_bound()) {
                    break;
                }
            }

            for conf in energize(session, batch)? {
                if conf.energy.is_finite() {
                    report_conformation(reporter, found.len(), &conf);
                    let at = energies.partition_point(|&e| e <= conf.energy);
                    energies.insert(at, conf.energy);
                    found.push(conf);
                }
            }

            if let Some(status) = terminal {
                return Ok((found, status));
            }
        }
    })?;

    let status = match status {
        DesignStatus::Solved if found.is_empty() => {
            DesignStatus::Infeasible(InfeasibleReason::FrontierExhausted)
        }
        other => other,
    };
    let conformations = target.finish(found);
    let search = search.close()?;
    info!(
        %status,
        conformations = conformations.len(),
        best = conformations.first().map(|c| c.energy),
        expansions = search.expansions,
        "Conformation search complete"
    );

    Ok(GmecResult {
        status,
        conformations,
        build: prepared.build,
        pruning: prepared.pruning,
        search,
    })
}
