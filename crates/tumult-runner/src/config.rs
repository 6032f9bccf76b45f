//! Run driver configuration.

use std::{path::PathBuf, time::Duration};

use tumult_core::{ForkMode, Traversal};

/// Settings of one run. Model-level settings in the definition's root element
/// apply unless overridden here.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Definition file.
    pub definition: PathBuf,
    /// Log filter used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Bound on concurrently running activities.
    pub max_workers: usize,
    /// Overrides the definition's `durationMs`.
    pub duration: Option<Duration>,
    /// Fork mode used when the definition does not set `forkMode`.
    pub fork_mode: Option<ForkMode>,
    /// Where to write the CBOR-encoded statistics snapshot.
    pub report: Option<PathBuf>,
    /// Order in which the three phases visit the tree.
    pub traversal: Traversal,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            definition: PathBuf::from("simulation.xml"),
            log_level: "info".to_string(),
            max_workers: 1024,
            duration: None,
            fork_mode: None,
            report: None,
            traversal: Traversal::default(),
        }
    }
}
