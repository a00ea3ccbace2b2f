use std::sync::Arc;

use crate::diagnostics::{DiagnosticSink, TracingSink};
use crate::driver::GreedyConfig;

/// Default round cap for `FixedPoint` pipeline steps.
pub const DEFAULT_FIXED_POINT_MAX_ITERS: usize = 4;

#[derive(Debug, Clone)]
pub struct OptimizeConfig {
    pub fixed_point_max_iters: usize,
    /// Driver settings for passes that do not carry their own.
    pub greedy: GreedyConfig,
}

impl Default for OptimizeConfig {
    fn default() -> Self {
        Self {
            fixed_point_max_iters: DEFAULT_FIXED_POINT_MAX_ITERS,
            greedy: GreedyConfig::default(),
        }
    }
}

impl OptimizeConfig {
    pub fn from_env() -> Self {
        Self {
            fixed_point_max_iters: crate::env::fixed_point_iters()
                .unwrap_or(DEFAULT_FIXED_POINT_MAX_ITERS),
            greedy: GreedyConfig::from_env(),
        }
    }
}

pub struct OptimizeContext {
    sink: Arc<dyn DiagnosticSink>,
    cfg: OptimizeConfig,
}

impl OptimizeContext {
    pub fn new(cfg: OptimizeConfig, sink: Arc<dyn DiagnosticSink>) -> Self {
        Self { sink, cfg }
    }

    pub fn config(&self) -> &OptimizeConfig {
        &self.cfg
    }

    pub fn sink(&self) -> &dyn DiagnosticSink {
        &*self.sink
    }
}

impl Default for OptimizeContext {
    fn default() -> Self {
        Self::new(OptimizeConfig::default(), Arc::new(TracingSink))
    }
}
