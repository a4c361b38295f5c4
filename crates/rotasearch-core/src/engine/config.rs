use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),
    #[error("Invalid value for '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

/// What a design run produces.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SearchMode {
    /// The single global minimum energy conformation.
    Gmec,
    /// The `count` lowest-energy conformations in ascending order.
    TopK { count: usize },
    /// Every conformation within `window` of the GMEC energy.
    EnergyWindow { window: f64 },
    /// A partition function estimate accurate to relative error `epsilon`.
    PartitionFunction { epsilon: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnergyStrategyKind {
    /// Terms evaluated at the rotamers' initial degrees of freedom.
    #[default]
    Rigid,
    /// Terms minimized over the rotamers' continuous degrees of freedom.
    Minimized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LevelOrdering {
    /// Lowest-index unassigned position first.
    #[default]
    Static,
    /// Unassigned position with the fewest remaining candidates first.
    MostConstrained,
    /// Position whose children raise the bound the most (harmonic mean of the
    /// bound increases), recomputed at every expansion.
    Dynamic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeeSchedule {
    SinglesOnly,
    #[default]
    SinglesThenPairs,
}

/// How the matrix builder treats a task that failed on every worker it was tried on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Surface the failure to the caller and stop the run.
    Abort,
    /// Re-evaluate the task on the local CPU path.
    #[default]
    Degrade,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct EnergyConfig {
    pub strategy: EnergyStrategyKind,
    pub cache_path: Option<PathBuf>,
    pub failure_policy: FailurePolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct MinimizerConfig {
    pub max_iterations: usize,
    /// Relative energy improvement below which descent stops.
    pub tolerance: f64,
    pub initial_step: f64,
    /// Finite-difference step for gradient estimation.
    pub gradient_step: f64,
}

impl Default for MinimizerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            tolerance: 1e-6,
            initial_step: 1.0,
            gradient_step: 1e-4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct PruningConfig {
    pub enabled: bool,
    pub schedule: DeeSchedule,
    /// A candidate is eliminated only when dominated by more than this margin.
    pub interval: f64,
    pub max_rounds: usize,
    /// Rotamers and pairs whose energy exceeds this value are removed outright.
    pub steric_threshold: Option<f64>,
}

impl Default for PruningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: DeeSchedule::default(),
            interval: 0.0,
            max_rounds: 10,
            steric_threshold: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SearchConfig {
    pub mode: SearchMode,
    /// Frontier nodes kept in memory before spilling to disk. `None` never spills.
    #[serde(default)]
    pub memory_limit: Option<usize>,
    #[serde(default)]
    pub spill_directory: Option<PathBuf>,
    #[serde(default)]
    pub ordering: LevelOrdering,
    #[serde(default)]
    pub max_expansions: Option<u64>,
    #[serde(default)]
    pub time_budget_secs: Option<f64>,
    /// Accept a conformation once no remaining bound can beat it by more than this.
    #[serde(default)]
    pub optimality_gap: f64,
}

impl SearchConfig {
    pub fn new(mode: SearchMode) -> Self {
        Self {
            mode,
            memory_limit: None,
            spill_directory: None,
            ordering: LevelOrdering::default(),
            max_expansions: None,
            time_budget_secs: None,
            optimality_gap: 0.0,
        }
    }

    pub fn time_budget(&self) -> Option<Duration> {
        self.time_budget_secs.map(Duration::from_secs_f64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct DispatchConfig {
    pub local_workers: usize,
    /// Extra attempts a failed task gets on other workers.
    pub max_retries: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            local_workers: std::thread::available_parallelism().map_or(1, |n| n.get()),
            max_retries: 2,
        }
    }
}

pub const DEFAULT_TEMPERATURE: f64 = 298.15;

fn default_temperature() -> f64 {
    DEFAULT_TEMPERATURE
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct DesignConfig {
    #[serde(default)]
    pub energy: EnergyConfig,
    #[serde(default)]
    pub minimizer: MinimizerConfig,
    #[serde(default)]
    pub pruning: PruningConfig,
    pub search: SearchConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// Kelvin, used for Boltzmann weighting.
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

impl DesignConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |name: &'static str, reason: &str| {
            Err(ConfigError::InvalidParameter {
                name,
                reason: reason.to_string(),
            })
        };

        match self.search.mode {
            SearchMode::TopK { count: 0 } => {
                return invalid("search.mode.count", "must be at least 1");
            }
            SearchMode::EnergyWindow { window } if !(window >= 0.0 && window.is_finite()) => {
                return invalid("search.mode.window", "must be a finite non-negative energy");
            }
            SearchMode::PartitionFunction { epsilon } if !(epsilon > 0.0 && epsilon < 1.0) => {
                return invalid("search.mode.epsilon", "must lie strictly between 0 and 1");
            }
            _ => {}
        }
        if matches!(self.search.memory_limit, Some(limit) if limit < 2) {
            return invalid("search.memory-limit", "must hold at least 2 nodes");
        }
        if !(self.search.optimality_gap >= 0.0) {
            return invalid("search.optimality-gap", "must be non-negative");
        }
        if matches!(
            self.search.time_budget_secs,
            Some(secs) if !(secs >= 0.0 && secs.is_finite())
        ) {
            return invalid("search.time-budget-secs", "must be a finite non-negative duration");
        }
        if self.minimizer.max_iterations == 0 {
            return invalid("minimizer.max-iterations", "must be at least 1");
        }
        if !(self.minimizer.tolerance >= 0.0) {
            return invalid("minimizer.tolerance", "must be non-negative");
        }
        if !(self.minimizer.initial_step > 0.0 && self.minimizer.gradient_step > 0.0) {
            return invalid("minimizer.initial-step", "steps must be positive");
        }
        if !(self.pruning.interval >= 0.0) {
            return invalid("pruning.interval", "must be non-negative");
        }
        if self.dispatch.local_workers == 0 {
            return invalid("dispatch.local-workers", "must be at least 1");
        }
        if !(self.temperature > 0.0 && self.temperature.is_finite()) {
            return invalid("temperature", "must be a positive number of kelvin");
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct DesignConfigBuilder {
    mode: Option<SearchMode>,
    strategy: Option<EnergyStrategyKind>,
    cache_path: Option<PathBuf>,
    failure_policy: Option<FailurePolicy>,
    minimizer: Option<MinimizerConfig>,
    pruning: Option<PruningConfig>,
    memory_limit: Option<usize>,
    spill_directory: Option<PathBuf>,
    ordering: Option<LevelOrdering>,
    max_expansions: Option<u64>,
    time_budget: Option<Duration>,
    optimality_gap: Option<f64>,
    local_workers: Option<usize>,
    max_retries: Option<usize>,
    temperature: Option<f64>,
}

impl DesignConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(mut self, mode: SearchMode) -> Self {
        self.mode = Some(mode);
        self
    }
    pub fn strategy(mut self, strategy: EnergyStrategyKind) -> Self {
        self.strategy = Some(strategy);
        self
    }
    pub fn cache_path(mut self, path: PathBuf) -> Self {
        self.cache_path = Some(path);
        self
    }
    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = Some(policy);
        self
    }
    pub fn minimizer(mut self, minimizer: MinimizerConfig) -> Self {
        self.minimizer = Some(minimizer);
        self
    }
    pub fn pruning(mut self, pruning: PruningConfig) -> Self {
        self.pruning = Some(pruning);
        self
    }
    pub fn memory_limit(mut self, nodes: usize) -> Self {
        self.memory_limit = Some(nodes);
        self
    }
    pub fn spill_directory(mut self, path: PathBuf) -> Self {
        self.spill_directory = Some(path);
        self
    }
    pub fn ordering(mut self, ordering: LevelOrdering) -> Self {
        self.ordering = Some(ordering);
        self
    }
    pub fn max_expansions(mut self, expansions: u64) -> Self {
        self.max_expansions = Some(expansions);
        self
    }
    pub fn time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = Some(budget);
        self
    }
    pub fn optimality_gap(mut self, gap: f64) -> Self {
        self.optimality_gap = Some(gap);
        self
    }
    pub fn local_workers(mut self, workers: usize) -> Self {
        self.local_workers = Some(workers);
        self
    }
    pub fn max_retries(mut self, retries: usize) -> Self {
        self.max_retries = Some(retries);
        self
    }
    pub fn temperature(mut self, kelvin: f64) -> Self {
        self.temperature = Some(kelvin);
        self
    }

    pub fn build(self) -> Result<DesignConfig, ConfigError> {
        let mode = self.mode.ok_or(ConfigError::MissingParameter("mode"))?;
        let dispatch_defaults = DispatchConfig::default();
        let config = DesignConfig {
            energy: EnergyConfig {
                strategy: self.strategy.unwrap_or_default(),
                cache_path: self.cache_path,
                failure_policy: self.failure_policy.unwrap_or_default(),
            },
            minimizer: self.minimizer.unwrap_or_default(),
            pruning: self.pruning.unwrap_or_default(),
            search: SearchConfig {
                mode,
                memory_limit: self.memory_limit,
                spill_directory: self.spill_directory,
                ordering: self.ordering.unwrap_or_default(),
                max_expansions: self.max_expansions,
                time_budget_secs: self.time_budget.map(|d| d.as_secs_f64()),
                optimality_gap: self.optimality_gap.unwrap_or(0.0),
            },
            dispatch: DispatchConfig {
                local_workers: self.local_workers.unwrap_or(dispatch_defaults.local_workers),
                max_retries: self.max_retries.unwrap_or(dispatch_defaults.max_retries),
            },
            temperature: self.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_without_mode_reports_missing_parameter() {
        let result = DesignConfigBuilder::new().local_workers(2).build();
        assert_eq!(result, Err(ConfigError::MissingParameter("mode")));
    }

    #[test]
    fn build_fills_defaults_for_unset_sections() {
        let config = DesignConfigBuilder::new()
            .mode(SearchMode::TopK { count: 3 })
            .strategy(EnergyStrategyKind::Minimized)
            .memory_limit(64)
            .time_budget(Duration::from_millis(1500))
            .build()
            .unwrap();

        assert_eq!(config.search.mode, SearchMode::TopK { count: 3 });
        assert_eq!(config.energy.strategy, EnergyStrategyKind::Minimized);
        assert_eq!(config.energy.failure_policy, FailurePolicy::Degrade);
        assert_eq!(config.minimizer, MinimizerConfig::default());
        assert_eq!(config.search.time_budget(), Some(Duration::from_millis(1500)));
        assert_eq!(config.temperature, DEFAULT_TEMPERATURE);
        assert!(config.dispatch.local_workers >= 1);
    }

    #[test]
    fn build_rejects_out_of_range_values() {
        let zero_count = DesignConfigBuilder::new()
            .mode(SearchMode::TopK { count: 0 })
            .build();
        assert!(matches!(
            zero_count,
            Err(ConfigError::InvalidParameter { name: "search.mode.count", .. })
        ));

        let bad_epsilon = DesignConfigBuilder::new()
            .mode(SearchMode::PartitionFunction { epsilon: 1.5 })
            .build();
        assert!(matches!(bad_epsilon, Err(ConfigError::InvalidParameter { .. })));

        let tiny_frontier = DesignConfigBuilder::new()
            .mode(SearchMode::Gmec)
            .memory_limit(1)
            .build();
        assert!(matches!(
            tiny_frontier,
            Err(ConfigError::InvalidParameter { name: "search.memory-limit", .. })
        ));
    }

    #[test]
    fn from_toml_str_reads_kebab_case_sections() {
        let content = r#"
temperature = 300.0

[energy]
strategy = "minimized"
cache-path = "/tmp/energies.csv"
failure-policy = "abort"

[minimizer]
max-iterations = 50

[pruning]
schedule = "singles-only"
interval = 0.5

[search]
mode = { kind = "energy-window", window = 2.0 }
memory-limit = 1000
ordering = "dynamic"

[dispatch]
local-workers = 3
max-retries = 1
"#;
        let config = DesignConfig::from_toml_str(content).unwrap();
        assert_eq!(config.energy.strategy, EnergyStrategyKind::Minimized);
        assert_eq!(config.energy.failure_policy, FailurePolicy::Abort);
        assert_eq!(config.energy.cache_path, Some(PathBuf::from("/tmp/energies.csv")));
        assert_eq!(config.minimizer.max_iterations, 50);
        assert_eq!(config.minimizer.tolerance, MinimizerConfig::default().tolerance);
        assert_eq!(config.pruning.schedule, DeeSchedule::SinglesOnly);
        assert_eq!(config.search.mode, SearchMode::EnergyWindow { window: 2.0 });
        assert_eq!(config.search.ordering, LevelOrdering::Dynamic);
        assert_eq!(config.dispatch.local_workers, 3);
        assert_eq!(config.temperature, 300.0);
    }

    #[test]
    fn from_toml_str_rejects_unknown_keys_and_missing_search() {
        let unknown = DesignConfig::from_toml_str(
            "[search]\nmode = { kind = \"gmec\" }\nbogus = 1\n",
        );
        assert!(matches!(unknown, Err(ConfigError::Parse(_))));

        let missing = DesignConfig::from_toml_str("temperature = 310.0\n");
        assert!(matches!(missing, Err(ConfigError::Parse(_))));
    }
}
