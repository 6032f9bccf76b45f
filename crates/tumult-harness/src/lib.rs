//! Deterministic test harness for Tumult.
//!
//! - [`SimEnv`]: seeded randomness on tokio's clock, so runs under a paused
//!   runtime replay exactly.
//! - [`loopback`]: an in-process protocol module. Instances deliver payloads
//!   to each other and raise events, which exercises actor bindings and event
//!   sources without a network.
//!
//! # Model-Based Testing
//!
//! The `model` module holds a reference implementation of the instance free
//! pool. Operations are applied to both the model and a real
//! [`tumult_core::Population`], and their observable states are compared.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod loopback;
pub mod model;
mod sim_env;

pub use loopback::{LOOPBACK_NAMESPACE, LoopbackClient};
pub use model::{ModelPool, OperationError, OperationResult, PoolOperation};
pub use sim_env::SimEnv;
