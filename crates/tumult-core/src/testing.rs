//! Shared fixtures for unit tests.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use crate::{
    env::{Environment, Sleep},
    model::{Model, ModelConfig},
    worker::WorkerPool,
};

/// Environment on tokio's clock, so `start_paused` tests control time.
pub(crate) struct TokioEnv {
    state: AtomicU64,
}

impl TokioEnv {
    pub(crate) fn new(seed: u64) -> Self {
        Self { state: AtomicU64::new(seed) }
    }
}

impl Environment for TokioEnv {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn sleep(&self, duration: Duration) -> Sleep {
        Box::pin(tokio::time::sleep(duration))
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        // xorshift; tests only need a reproducible stream
        for byte in buffer {
            let mut x = self.state.load(Ordering::Relaxed);
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            self.state.store(x, Ordering::Relaxed);
            *byte = x.to_le_bytes()[0];
        }
    }
}

pub(crate) fn model() -> Arc<Model> {
    model_with(ModelConfig::default())
}

pub(crate) fn model_with(config: ModelConfig) -> Arc<Model> {
    let workers = WorkerPool::new(16).unwrap();
    Model::new(config, Arc::new(TokioEnv::new(0x9e37_79b9_7f4a_7c15)), workers)
}
