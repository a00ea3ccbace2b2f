use std::collections::{HashMap, VecDeque};

use smallvec::SmallVec;
use thiserror::Error;

use crate::{
    diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink, TracingSink},
    index::{FunctionIndexError, InstId},
    pattern::FrozenPatternSet,
    rewriter::{ProgramRewriter, RewriteError},
    spec::{Function, Location, OpKind},
};

/// Default bound on worklist entries processed by one driver run.
pub const DEFAULT_MAX_ITERATIONS: usize = 100_000;

#[derive(Debug, Clone)]
pub struct GreedyConfig {
    /// Upper bound on worklist pops before the run is reported as non-converged.
    pub max_iterations: usize,
    /// Erase popped operations that are unused, unreturned and free of side effects.
    pub enable_dce: bool,
    /// Turn non-convergence into a `DriverError` instead of a warning.
    pub fatal_non_convergence: bool,
}

impl Default for GreedyConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            enable_dce: true,
            fatal_non_convergence: false,
        }
    }
}

impl GreedyConfig {
    /// Default configuration with `TOYIR_*` environment overrides applied.
    pub fn from_env() -> Self {
        Self::default().with_overrides(
            crate::env::max_iterations(),
            crate::env::fatal_non_convergence(),
        )
    }

    fn with_overrides(mut self, max_iterations: Option<usize>, fatal: bool) -> Self {
        if let Some(max_iterations) = max_iterations {
            self.max_iterations = max_iterations;
        }
        self.fatal_non_convergence |= fatal;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_dce(mut self, enable_dce: bool) -> Self {
        self.enable_dce = enable_dce;
        self
    }

    pub fn with_fatal_non_convergence(mut self, fatal: bool) -> Self {
        self.fatal_non_convergence = fatal;
        self
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GreedyRewriteStats {
    /// Worklist entries processed.
    pub iterations: usize,
    pub applied: usize,
    pub dce_removed: usize,
    pub converged: bool,
}

impl GreedyRewriteStats {
    pub fn changed(&self) -> bool {
        self.applied > 0 || self.dce_removed > 0
    }
}

/// Lifecycle of an operation inside one driver run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpState {
    Unvisited,
    Queued,
    Matching,
    Rewritten,
    Erased,
    Stable,
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("failed to index @{function}: {source}")]
    Index {
        function: String,
        #[source]
        source: FunctionIndexError,
    },
    #[error("pattern `{pattern}` rewrote `{op}` {inst} {location} invalidly: {source}")]
    InvariantViolation {
        pattern: String,
        op: OpKind,
        inst: InstId,
        location: Location,
        #[source]
        source: RewriteError,
    },
    #[error("rewriting @{function} did not converge within {max_iterations} iterations")]
    NonConvergence {
        function: String,
        max_iterations: usize,
    },
}

/// Patterns that already failed on one instruction at the recorded version.
struct FailedPatterns {
    version: u32,
    patterns: SmallVec<[usize; 4]>,
}

impl FailedPatterns {
    fn contains(&self, version: u32, idx: usize) -> bool {
        self.version == version && self.patterns.contains(&idx)
    }

    fn record(&mut self, version: u32, idx: usize) {
        if self.version != version {
            self.version = version;
            self.patterns.clear();
        }
        self.patterns.push(idx);
    }
}

/// Name reported when the driver's own dead-code cleanup is rejected.
const DCE_PATTERN_NAME: &str = "dead-code-cleanup";

/// Worklist-driven fixed-point rewriter.
///
/// Operations are seeded in program order and processed FIFO. After a successful rewrite only
/// the operations the rewriter touched are queued again; the body is never rescanned.
pub struct GreedyRewriteDriver<'p> {
    patterns: &'p FrozenPatternSet,
    cfg: GreedyConfig,
    sink: &'p dyn DiagnosticSink,
    states: HashMap<InstId, OpState>,
}

impl<'p> GreedyRewriteDriver<'p> {
    pub fn new(
        patterns: &'p FrozenPatternSet,
        cfg: GreedyConfig,
        sink: &'p dyn DiagnosticSink,
    ) -> Self {
        Self {
            patterns,
            cfg,
            sink,
            states: HashMap::new(),
        }
    }

    /// State of `inst` as left by the last run. Ids refer to the indexing of that run.
    pub fn state_of(&self, inst: InstId) -> Option<OpState> {
        self.states.get(&inst).copied()
    }

    pub fn run(&mut self, func: &mut Function) -> Result<GreedyRewriteStats, DriverError> {
        self.states.clear();
        let function_name = func.name.clone();
        let mut stats = GreedyRewriteStats::default();
        if self.patterns.is_empty() && !self.cfg.enable_dce {
            stats.converged = true;
            return Ok(stats);
        }

        let mut rewriter = ProgramRewriter::new(func).map_err(|source| DriverError::Index {
            function: function_name.clone(),
            source,
        })?;
        let mut worklist = VecDeque::new();
        for inst in rewriter.insts_in_order() {
            self.states.insert(inst, OpState::Unvisited);
            self.enqueue(inst, &mut worklist);
        }

        let patterns = self.patterns;
        let mut failure_cache: HashMap<InstId, FailedPatterns> = HashMap::new();
        stats.converged = true;

        while let Some(inst) = worklist.pop_front() {
            if stats.iterations >= self.cfg.max_iterations {
                stats.converged = false;
                worklist.push_front(inst);
                break;
            }
            stats.iterations += 1;

            let Some((op, location)) = describe(&rewriter, inst) else {
                self.set_state(inst, OpState::Erased);
                continue;
            };

            if self.cfg.enable_dce && is_trivially_dead(&rewriter, inst) {
                if let Err(source) = rewriter.erase_inst(inst) {
                    return Err(self.violation(
                        &function_name,
                        DCE_PATTERN_NAME,
                        op,
                        inst,
                        location,
                        source,
                    ));
                }
                self.set_state(inst, OpState::Erased);
                failure_cache.remove(&inst);
                stats.dce_removed += 1;
                self.requeue_touched(&mut rewriter, &mut worklist);
                continue;
            }

            self.set_state(inst, OpState::Matching);
            let version = rewriter.version(inst).unwrap_or(0);
            let mut applied = false;

            for (idx, pattern) in patterns.matching(op) {
                if failure_cache
                    .get(&inst)
                    .is_some_and(|failed| failed.contains(version, idx))
                {
                    continue;
                }
                match pattern.match_and_rewrite(inst, &mut rewriter) {
                    Ok(true) => {
                        tracing::trace!(pattern = pattern.name(), %inst, "pattern applied");
                        applied = true;
                        stats.applied += 1;
                        break;
                    }
                    Ok(false) => {
                        failure_cache
                            .entry(inst)
                            .or_insert_with(|| FailedPatterns {
                                version,
                                patterns: SmallVec::new(),
                            })
                            .record(version, idx);
                    }
                    Err(source) => {
                        return Err(self.violation(
                            &function_name,
                            pattern.name(),
                            op,
                            inst,
                            location,
                            source,
                        ));
                    }
                }
            }

            if applied {
                failure_cache.remove(&inst);
                if rewriter.contains(inst) {
                    self.set_state(inst, OpState::Rewritten);
                    self.enqueue(inst, &mut worklist);
                } else {
                    self.set_state(inst, OpState::Erased);
                }
            } else {
                self.set_state(inst, OpState::Stable);
            }
            self.requeue_touched(&mut rewriter, &mut worklist);
        }

        for (inst, state) in self.states.iter_mut() {
            if !rewriter.contains(*inst) {
                *state = OpState::Erased;
            }
        }

        if !stats.converged {
            self.sink.emit(Diagnostic::warning(
                DiagnosticKind::NonConvergence,
                function_name.clone(),
                format!(
                    "greedy rewriting stopped after {} iterations with {} operations still queued",
                    stats.iterations,
                    worklist.len()
                ),
            ));
            if self.cfg.fatal_non_convergence {
                return Err(DriverError::NonConvergence {
                    function: function_name,
                    max_iterations: self.cfg.max_iterations,
                });
            }
        }

        Ok(stats)
    }

    fn enqueue(&mut self, inst: InstId, worklist: &mut VecDeque<InstId>) {
        if self.states.get(&inst) == Some(&OpState::Queued) {
            return;
        }
        self.set_state(inst, OpState::Queued);
        worklist.push_back(inst);
    }

    fn requeue_touched(&mut self, rewriter: &mut ProgramRewriter, worklist: &mut VecDeque<InstId>) {
        for touched in rewriter.take_touched() {
            if rewriter.contains(touched) {
                self.enqueue(touched, worklist);
            }
        }
    }

    fn set_state(&mut self, inst: InstId, state: OpState) {
        let previous = self.states.insert(inst, state);
        tracing::trace!(%inst, ?previous, ?state, "op state");
    }

    fn violation(
        &self,
        function: &str,
        pattern: &str,
        op: OpKind,
        inst: InstId,
        location: Location,
        source: RewriteError,
    ) -> DriverError {
        self.sink.emit(
            Diagnostic::error(
                DiagnosticKind::InvariantViolation,
                function,
                format!("pattern `{pattern}` rejected on `{op}` {inst}: {source}"),
            )
            .at(location.clone()),
        );
        DriverError::InvariantViolation {
            pattern: pattern.to_string(),
            op,
            inst,
            location,
            source,
        }
    }
}

/// Runs `patterns` to a fixed point, reporting diagnostics through `tracing`.
pub fn apply_patterns_and_fold_greedily(
    func: &mut Function,
    patterns: &FrozenPatternSet,
    cfg: &GreedyConfig,
) -> Result<GreedyRewriteStats, DriverError> {
    apply_patterns_and_fold_greedily_with_sink(func, patterns, cfg, &TracingSink)
}

pub fn apply_patterns_and_fold_greedily_with_sink(
    func: &mut Function,
    patterns: &FrozenPatternSet,
    cfg: &GreedyConfig,
    sink: &dyn DiagnosticSink,
) -> Result<GreedyRewriteStats, DriverError> {
    GreedyRewriteDriver::new(patterns, cfg.clone(), sink).run(func)
}

fn describe(rewriter: &ProgramRewriter, inst: InstId) -> Option<(OpKind, Location)> {
    let instruction = rewriter.instruction(inst)?;
    Some((instruction.op.kind(), instruction.loc.clone()))
}

fn is_trivially_dead(rewriter: &ProgramRewriter, inst: InstId) -> bool {
    let Some(instruction) = rewriter.instruction(inst) else {
        return false;
    };
    if instruction.op.kind().is_side_effecting() {
        return false;
    }
    rewriter.users_of(instruction.id).is_empty() && !rewriter.is_result(instruction.id)
}

#[cfg(test)]
mod tests {
    use super::{GreedyConfig, DEFAULT_MAX_ITERATIONS};

    #[test]
    fn overrides_map_onto_config_fields() {
        let cfg = GreedyConfig::default().with_overrides(Some(12), true);
        assert_eq!(cfg.max_iterations, 12);
        assert!(cfg.fatal_non_convergence);
        assert!(cfg.enable_dce);

        let cfg = GreedyConfig::default().with_overrides(None, false);
        assert_eq!(cfg.max_iterations, DEFAULT_MAX_ITERATIONS);
        assert!(!cfg.fatal_non_convergence);
    }

    #[test]
    fn unset_overrides_keep_builder_choices() {
        let cfg = GreedyConfig::default()
            .with_max_iterations(9)
            .with_fatal_non_convergence(true)
            .with_overrides(None, false);
        assert_eq!(cfg.max_iterations, 9);
        assert!(cfg.fatal_non_convergence);
    }
}
