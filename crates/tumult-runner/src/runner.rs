//! Phase sequencing of one run.
//!
//! ```text
//! build ─► initialize ─► start ─► entry activity + dispatched work ─► finalize ─► teardown
//!              │            │                 (or duration elapsed)
//!              └────────────┴─► finalize_initialized ─► teardown
//! ```

use std::{sync::Arc, time::Duration};

use tracing::{error, info, warn};
use tumult_core::{
    ActivityError, Element, Environment, Model, ModelConfig, NodeRegistry, NodeTree, WorkerPool,
};
use tumult_stats::StatsSnapshot;

use crate::{RunnerConfig, RunnerError, loader::load_definition, system_env::SystemEnv};

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// Buckets and counters at the end of the run.
    pub snapshot: StatsSnapshot,
    /// Time from model creation to teardown.
    pub elapsed: Duration,
    /// True if the run was cut short by its duration limit.
    pub timed_out: bool,
    /// Activities dispatched on the worker pool.
    pub dispatched: u64,
    /// Dispatched activities that failed.
    pub failed: u64,
}

/// Drives definitions through the node lifecycle.
pub struct Runner {
    config: RunnerConfig,
    registry: NodeRegistry,
    env: Arc<dyn Environment>,
}

impl Runner {
    /// Runner with the core node types and the system environment.
    pub fn new(config: RunnerConfig) -> Self {
        Self { config, registry: NodeRegistry::with_core(), env: Arc::new(SystemEnv::new()) }
    }

    /// Replace the environment.
    #[must_use]
    pub fn with_env(mut self, env: Arc<dyn Environment>) -> Self {
        self.env = env;
        self
    }

    /// Registry for protocol modules to add their node types to.
    pub fn registry_mut(&mut self) -> &mut NodeRegistry {
        &mut self.registry
    }

    /// Run configuration.
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Load the configured definition file and run it.
    pub async fn run_file(&self) -> Result<RunReport, RunnerError> {
        let root = load_definition(&self.config.definition).await?;
        self.run(&root).await
    }

    /// Run a definition to completion.
    ///
    /// Teardown is best effort: whatever fails, every node that was
    /// initialized is finalized and the worker pool is drained before this
    /// returns.
    pub async fn run(&self, root: &Element) -> Result<RunReport, RunnerError> {
        let traversal = self.config.traversal;
        let mut tree = NodeTree::build(root, &self.registry)?;
        let workers = WorkerPool::new(self.config.max_workers)?;
        let model = Model::new(self.model_config(root)?, Arc::clone(&self.env), workers);
        info!(nodes = tree.len(), "simulation built");

        if let Err(e) = tree.initialize(&model, traversal).await {
            error!(error = %e, "initialize failed");
            Self::abort(&mut tree, &model).await;
            return Err(e.into());
        }
        if let Err(e) = tree.start(&model, traversal).await {
            error!(error = %e, "start failed");
            Self::abort(&mut tree, &model).await;
            return Err(e.into());
        }
        info!("simulation running");

        let (entry, timed_out) = Self::drive(&model).await;

        model.terminate();
        model.workers().shutdown().await;
        let finalized = tree.finalize(&model, traversal).await;
        model.teardown();

        let report = RunReport {
            snapshot: model.snapshot(),
            elapsed: model.elapsed(),
            timed_out,
            dispatched: model.workers().spawned(),
            failed: model.workers().failed(),
        };
        info!(
            elapsed_ms = report.elapsed.as_millis(),
            dispatched = report.dispatched,
            failed = report.failed,
            timed_out,
            "simulation finished"
        );

        entry.map_err(RunnerError::Main)?;
        finalized?;

        if let Some(path) = &self.config.report {
            tokio::fs::write(path, report.snapshot.to_cbor()?).await?;
            info!(path = %path.display(), "report written");
        }
        Ok(report)
    }

    fn model_config(&self, root: &Element) -> Result<ModelConfig, RunnerError> {
        let mut config = ModelConfig::from_element(root)?;
        if let Some(duration) = self.config.duration {
            config.duration = Some(duration);
        }
        if let (Some(mode), None) = (self.config.fork_mode, root.attr("forkMode")) {
            config.fork_mode = mode;
        }
        Ok(config)
    }

    /// Run the entry activity, then wait for dispatched work to drain. Returns
    /// the entry activity's result and whether the duration limit elapsed.
    ///
    /// When the limit elapses the model is told to terminate and the work in
    /// flight is still awaited, so nodes get to finish what they were doing.
    async fn drive(model: &Arc<Model>) -> (Result<(), ActivityError>, bool) {
        let work = async {
            let entry = match &model.config().main {
                Some(id) => match model.activities().require(id) {
                    Ok(activity) => activity.run(Arc::clone(model), model.fresh_scope()).await.map(drop),
                    Err(e) => Err(e.into()),
                },
                None => Ok(()),
            };
            model.workers().wait_idle().await;
            entry
        };

        let Some(limit) = model.config().duration else {
            return (work.await, false);
        };
        tokio::pin!(work);
        tokio::select! {
            entry = &mut work => return (entry, false),
            () = model.env().sleep(limit) => {
                info!(limit_ms = limit.as_millis(), "duration elapsed");
            },
        }

        model.terminate();
        let entry = match work.await {
            Err(ActivityError::Terminated) => Ok(()),
            other => other,
        };
        (entry, true)
    }

    async fn abort(tree: &mut NodeTree, model: &Arc<Model>) {
        model.terminate();
        model.workers().shutdown().await;
        let errors = tree.finalize_initialized(model).await;
        if !errors.is_empty() {
            warn!(count = errors.len(), "cleanup finalize reported errors");
        }
        model.teardown();
    }
}
