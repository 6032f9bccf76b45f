//! Tumult run driver.
//!
//! Loads a declarative definition, builds the node tree and drives it through
//! initialize, start and finalize with best-effort teardown.
//!
//! ## Architecture
//!
//! ```text
//! tumult-runner
//!   ├─ loader      (XML → Element)
//!   ├─ Runner      (phase sequencing, duration limit, report)
//!   ├─ SystemEnv   (production Environment impl)
//!   └─ tumult      (CLI binary)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod loader;
mod runner;
mod system_env;

pub use config::RunnerConfig;
pub use error::RunnerError;
pub use loader::{LoadError, load_definition, parse_definition};
pub use runner::{RunReport, Runner};
pub use system_env::SystemEnv;
