use std::future::Future;
use tokio::runtime::Runtime;

use crate::errors::{EngineError, EngineResult};

// ==================================================
// BLOCKING ADAPTER
// ==================================================
//
// One logic path, two suspension models: async callers use the engine
// types directly, synchronous callers drive the same futures through a
// dedicated runtime here. No business logic lives in this file.

pub struct BlockingEngine {
    runtime: Runtime,
}

impl BlockingEngine {
    pub fn new() -> EngineResult<Self> {
        Runtime::new()
            .map(|runtime| Self { runtime })
            .map_err(|e| EngineError::Configuration(format!("cannot start runtime: {e}")))
    }

    /// Drive any engine future to completion on the dedicated runtime.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}
