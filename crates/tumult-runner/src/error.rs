//! Runner error types.

use std::fmt;

use tumult_core::{ActivityError, ConfigError, CoreError, LifecycleError};
use tumult_stats::StatsError;

use crate::loader::LoadError;

/// Errors that end a run.
#[derive(Debug)]
pub enum RunnerError {
    /// The definition could not be loaded.
    Load(LoadError),

    /// Building, initializing, starting or finalizing the tree failed.
    Core(CoreError),

    /// The entry activity failed.
    Main(ActivityError),

    /// The statistics report could not be encoded.
    Report(StatsError),

    /// The statistics report could not be written.
    Io(std::io::Error),
}

impl RunnerError {
    /// Errors the definition author has to fix.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Load(_) | Self::Core(CoreError::Config(_)) | Self::Main(ActivityError::Config(_)))
    }
}

impl fmt::Display for RunnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load(err) => write!(f, "definition error: {err}"),
            Self::Core(err) => write!(f, "simulation error: {err}"),
            Self::Main(err) => write!(f, "entry activity failed: {err}"),
            Self::Report(err) => write!(f, "report error: {err}"),
            Self::Io(err) => write!(f, "report write failed: {err}"),
        }
    }
}

impl std::error::Error for RunnerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Load(err) => Some(err),
            Self::Core(err) => Some(err),
            Self::Main(err) => Some(err),
            Self::Report(err) => Some(err),
            Self::Io(err) => Some(err),
        }
    }
}

impl From<LoadError> for RunnerError {
    fn from(err: LoadError) -> Self {
        Self::Load(err)
    }
}

impl From<CoreError> for RunnerError {
    fn from(err: CoreError) -> Self {
        Self::Core(err)
    }
}

impl From<ConfigError> for RunnerError {
    fn from(err: ConfigError) -> Self {
        Self::Core(err.into())
    }
}

impl From<LifecycleError> for RunnerError {
    fn from(err: LifecycleError) -> Self {
        Self::Core(err.into())
    }
}

impl From<StatsError> for RunnerError {
    fn from(err: StatsError) -> Self {
        Self::Report(err)
    }
}

impl From<std::io::Error> for RunnerError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}
