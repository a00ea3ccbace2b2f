//! Function-pass infrastructure.
//!
//! - a single context-aware pass trait,
//! - an implicit pipeline builder with bounded fixed points (see [`crate::pipeline`]),
//! - a shared diagnostic sink carried by [`OptimizeContext`].

mod context;

use std::sync::Arc;

use crate::driver::{DriverError, GreedyRewriteStats};
use crate::pipeline::PipelineOptimizer;
use crate::spec::Function;

pub use context::{OptimizeConfig, OptimizeContext};

/// Result returned by a [`FunctionPass`] after it runs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassResult {
    /// Whether the pass changed the IR.
    pub changed: bool,
    /// Number of rewrite iterations executed while applying the pass.
    pub iterations: usize,
    /// Total number of patterns applied by the pass.
    pub rewrites_applied: usize,
    /// Instructions removed by the pass (typically via DCE).
    pub erased_insts: usize,
    /// Whether every greedy run inside the pass reached a fixed point.
    pub converged: bool,
}

impl PassResult {
    /// Result of a pass that did nothing.
    pub fn unchanged() -> Self {
        Self {
            converged: true,
            ..Self::default()
        }
    }

    /// Merges two run results, accumulating statistics.
    pub fn merge(self, other: PassResult) -> PassResult {
        PassResult {
            changed: self.changed || other.changed,
            iterations: self.iterations + other.iterations,
            rewrites_applied: self.rewrites_applied + other.rewrites_applied,
            erased_insts: self.erased_insts + other.erased_insts,
            converged: self.converged && other.converged,
        }
    }
}

impl From<GreedyRewriteStats> for PassResult {
    fn from(stats: GreedyRewriteStats) -> Self {
        PassResult {
            changed: stats.changed(),
            iterations: stats.iterations,
            rewrites_applied: stats.applied,
            erased_insts: stats.dce_removed,
            converged: stats.converged,
        }
    }
}

/// Canonical interface implemented by optimization passes that operate on a single function.
pub trait FunctionPass: Send + Sync {
    fn name(&self) -> &'static str;
    fn run(
        &self,
        function: &mut Function,
        cx: &mut OptimizeContext,
    ) -> Result<PassResult, DriverError>;
}

/// Whole-function optimizer, typically a pipeline of passes.
pub trait Optimizer: Send + Sync {
    fn optimize(
        &self,
        function: &mut Function,
        cx: &mut OptimizeContext,
    ) -> Result<PassResult, DriverError>;
}

/// Builds the default canonicalization pipeline.
pub fn default_optimizer(cfg: &OptimizeConfig) -> Arc<dyn Optimizer> {
    Arc::new(PipelineOptimizer::new(cfg))
}
