use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::driver::DriverError;
use crate::optimizer::{FunctionPass, OptimizeConfig, OptimizeContext, Optimizer, PassResult};
use crate::passes::{CanonicalizerPass, DeadCodeEliminationPass};
use crate::spec::Function;

pub enum Step {
    Pass(Arc<dyn FunctionPass>),
    FixedPoint { max_iters: usize, steps: Vec<Step> },
}

pub struct PipelineBuilder {
    steps: Vec<Step>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn pass(&mut self, pass: Arc<dyn FunctionPass>) {
        self.steps.push(Step::Pass(pass));
    }

    /// Repeats the steps built by `build` until none of them changes the function,
    /// or `max_iters` rounds have run.
    pub fn fixed_point<F>(&mut self, max_iters: usize, build: F)
    where
        F: FnOnce(&mut PipelineBuilder),
    {
        let mut inner = PipelineBuilder::new();
        build(&mut inner);
        self.steps.push(Step::FixedPoint {
            max_iters: max_iters.max(1),
            steps: inner.steps,
        });
    }

    pub fn finish(self) -> Vec<Step> {
        self.steps
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct PipelineOptimizer {
    steps: Vec<Step>,
    log_stats: bool,
    run_counter: AtomicUsize,
}

impl PipelineOptimizer {
    /// Canonicalize to a fixed point, then sweep anything left dead.
    pub fn new(cfg: &OptimizeConfig) -> Self {
        let mut builder = PipelineBuilder::new();
        builder.fixed_point(cfg.fixed_point_max_iters, |p| {
            p.pass(Arc::new(CanonicalizerPass::default()));
        });
        builder.pass(Arc::new(DeadCodeEliminationPass));
        Self::from_steps(builder.finish())
    }

    pub fn from_steps(steps: Vec<Step>) -> Self {
        Self {
            steps,
            log_stats: crate::env::pass_stats_enabled(),
            run_counter: AtomicUsize::new(0),
        }
    }
}

impl Optimizer for PipelineOptimizer {
    fn optimize(
        &self,
        function: &mut Function,
        cx: &mut OptimizeContext,
    ) -> Result<PassResult, DriverError> {
        let run_id = self.run_counter.fetch_add(1, Ordering::Relaxed);
        let mut result = PassResult::unchanged();
        run_steps(&self.steps, function, cx, run_id, &mut result, self.log_stats)?;
        Ok(result)
    }
}

fn run_steps(
    steps: &[Step],
    function: &mut Function,
    cx: &mut OptimizeContext,
    run_id: usize,
    totals: &mut PassResult,
    log_stats: bool,
) -> Result<bool, DriverError> {
    let mut changed_any = false;
    for step in steps {
        match step {
            Step::Pass(pass) => {
                let span = tracing::debug_span!("pass", name = pass.name(), run_id);
                let _enter = span.enter();
                let stats = pass.run(function, cx)?;
                changed_any |= stats.changed;
                *totals = totals.merge(stats);
                if log_stats {
                    tracing::debug!(
                        function = %function.name,
                        changed = stats.changed,
                        iterations = stats.iterations,
                        rewrites_applied = stats.rewrites_applied,
                        erased_insts = stats.erased_insts,
                        body_len = function.body.len(),
                        "pass stats"
                    );
                }
            }
            Step::FixedPoint { max_iters, steps } => {
                let mut iter = 0usize;
                loop {
                    if iter >= *max_iters {
                        tracing::debug!(max_iters, "fixed point round cap reached");
                        cx.sink().emit(Diagnostic::warning(
                            DiagnosticKind::NonConvergence,
                            function.name.clone(),
                            format!("fixed point still changing after {max_iters} rounds"),
                        ));
                        break;
                    }
                    iter += 1;
                    let mut local = PassResult::unchanged();
                    let changed = run_steps(steps, function, cx, run_id, &mut local, log_stats)?;
                    *totals = totals.merge(local);
                    changed_any |= changed;
                    if !changed {
                        break;
                    }
                }
            }
        }
    }
    Ok(changed_any)
}

/// Runs the default pipeline on `function` with a fresh context.
pub fn optimize_function(
    function: &mut Function,
    cfg: OptimizeConfig,
    sink: Arc<dyn crate::diagnostics::DiagnosticSink>,
) -> Result<PassResult, DriverError> {
    let optimizer = PipelineOptimizer::new(&cfg);
    let mut cx = OptimizeContext::new(cfg, sink);
    optimizer.optimize(function, &mut cx)
}
