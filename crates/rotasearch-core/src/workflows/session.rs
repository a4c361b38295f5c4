use crate::core::forcefield::scoring::ForceField;
use crate::core::models::conf_space::ConfSpace;
use crate::engine::cache::EnergyCache;
use crate::engine::config::DesignConfig;
use crate::engine::dispatch::Dispatcher;
use crate::engine::dispatch::worker::{LocalWorker, Worker};
use crate::engine::error::EngineError;
use crate::engine::evaluation::{ComputeBackend, EnergyKernel, EvaluationStrategy, Evaluator};
use std::sync::Arc;
use tracing::info;

/// The resources of one design problem, opened at run start and closed at run end.
///
/// A session owns the persistent energy cache and the worker pool, and hands both to
/// every phase that needs them.
pub struct DesignSession {
    config: DesignConfig,
    evaluator: Evaluator,
    cache: EnergyCache,
    dispatcher: Dispatcher,
}

impl DesignSession {
    /// Validates the inputs, opens the energy cache, and starts `local_workers` CPU
    /// workers.
    pub fn open(
        conf_space: Arc<ConfSpace>,
        forcefield: Arc<dyn ForceField>,
        config: DesignConfig,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        if let Some(position) = conf_space.first_empty_position() {
            return Err(EngineError::NoCandidates { position });
        }

        let strategy = EvaluationStrategy::from_config(&config);
        let evaluator = Evaluator::new(conf_space, forcefield, strategy);
        let cache = match &config.energy.cache_path {
            Some(path) => EnergyCache::open(path, &evaluator.fingerprint())?,
            None => EnergyCache::in_memory(),
        };
        let dispatcher = (0..config.dispatch.local_workers).fold(
            Dispatcher::new(config.dispatch.max_retries),
            |dispatcher, i| {
                let worker = LocalWorker::new(format!("local-{i}"), evaluator.clone());
                dispatcher.with_worker(Arc::new(worker))
            },
        );
        info!(
            positions = evaluator.conf_space().num_positions(),
            conformations = evaluator.conf_space().num_conformations(),
            cached_entries = cache.len(),
            workers = dispatcher.num_workers(),
            "Design session opened"
        );

        Ok(Self {
            config,
            evaluator,
            cache,
            dispatcher,
        })
    }

    /// Adds a worker that evaluates on an accelerated kernel, falling back to the CPU
    /// path whenever the kernel fails.
    pub fn with_accelerator(self, name: impl Into<String>, kernel: Arc<dyn EnergyKernel>) -> Self {
        let evaluator = self.evaluator.clone().with_backend(ComputeBackend::Accelerated(kernel));
        self.with_worker(Arc::new(LocalWorker::new(name, evaluator)))
    }

    /// Adds an arbitrary worker, such as a remote node.
    pub fn with_worker(mut self, worker: Arc<dyn Worker>) -> Self {
        self.dispatcher.add_worker(worker);
        self
    }

    pub fn config(&self) -> &DesignConfig {
        &self.config
    }

    pub fn conf_space(&self) -> &ConfSpace {
        self.evaluator.conf_space()
    }

    /// CPU-only evaluator used when dispatched tasks fail under the degrade policy.
    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    pub fn cache(&self) -> &EnergyCache {
        &self.cache
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Flushes and closes the energy cache.
    pub fn close(self) -> Result<(), EngineError> {
        self.cache.close()?;
        Ok(())
    }
}
