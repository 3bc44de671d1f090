use std::sync::Arc;

use offload_core::{
    init_memory, stop_firmware, CharDevice, DeviceTransport, LocalJobDispatcher, MatrixView,
    OffloadConfig,
};

use crate::algorithms::{offload::offload_solve, LocalContext, SolveAlgorithm, SolveResult};
use crate::error::Result;

/// Entry point that sends a solve to the accelerator when offloading is
/// enabled and to the local worker pool otherwise.
#[derive(Debug)]
pub struct OffloadSolver {
    config: OffloadConfig,
    dispatcher: LocalJobDispatcher,
    transport: Box<dyn DeviceTransport>,
}

impl OffloadSolver {
    /// Uses the character device named in `config`.
    pub fn new(config: OffloadConfig) -> Result<Self> {
        let transport = Box::new(CharDevice::from_config(&config));
        Self::with_transport(config, transport)
    }

    pub fn from_env() -> Result<Self> {
        Self::new(OffloadConfig::from_env()?)
    }

    pub fn with_transport(config: OffloadConfig, transport: Box<dyn DeviceTransport>) -> Result<Self> {
        config.validate()?;
        let dispatcher = LocalJobDispatcher::new(&config.dispatch)?;
        log::info!(
            "solver ready (offload: {}, {} local workers)",
            config.offload,
            dispatcher.workers()
        );
        Ok(Self {
            config,
            dispatcher,
            transport,
        })
    }

    pub fn config(&self) -> &OffloadConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &LocalJobDispatcher {
        &self.dispatcher
    }

    pub fn solve(
        &self,
        algorithm: &dyn SolveAlgorithm,
        a: &Arc<MatrixView>,
        b: &[f64],
    ) -> Result<SolveResult> {
        if self.config.offload {
            log::info!("solving {:?} on the accelerator", algorithm.kind());
            offload_solve(algorithm, self.transport.as_ref(), &self.config, a, b)
        } else {
            log::info!("solving {:?} locally", algorithm.kind());
            let ctx = LocalContext::new(&self.dispatcher, self.config.dispatch.chunk_rows);
            let result = algorithm.solve_local(&ctx, a, b);
            // Jobs send their result before the worker retires them.
            self.dispatcher.wait_idle();
            result
        }
    }

    /// Asks the accelerator to abandon whatever firmware is running.
    pub fn stop(&self) -> Result<()> {
        Ok(stop_firmware(self.transport.as_ref())?)
    }

    /// Preloads `data` into accelerator memory at `destination`.
    pub fn init_memory(&self, destination: u64, data: &[u8], chunks: u64) -> Result<()> {
        Ok(init_memory(self.transport.as_ref(), destination, data, chunks)?)
    }

    /// Stops the worker pool; later local solves fail.
    pub fn shutdown(&mut self) -> Result<()> {
        Ok(self.dispatcher.shutdown()?)
    }
}

/// Iteration count of a successful solve, or the negative status of a failed one.
pub fn status_of(result: &Result<SolveResult>) -> i64 {
    match result {
        Ok(solved) => solved.iterations as i64,
        Err(err) => err.status() as i64,
    }
}
