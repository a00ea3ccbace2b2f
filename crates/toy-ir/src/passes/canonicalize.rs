use crate::{
    driver::{apply_patterns_and_fold_greedily_with_sink, DriverError, GreedyConfig},
    optimizer::OptimizeContext,
    pattern::{populate_canonicalization_patterns, FrozenPatternSet, PatternSet, ReshapeOpView},
    spec::Function,
};

use super::{EliminateIdentityReshape, FunctionPass, FunctionPassResult};

#[derive(Debug, Clone, Default)]
pub struct CanonicalizeConfig {
    /// Driver settings; `None` inherits them from the optimize context.
    pub greedy: Option<GreedyConfig>,
    /// Also drop reshapes whose result type equals their operand's type.
    pub fold_identity_reshape: bool,
}

/// Builds the pattern set used by [`CanonicalizerPass`].
pub fn canonicalization_patterns(config: &CanonicalizeConfig) -> FrozenPatternSet {
    let mut patterns = PatternSet::new();
    populate_canonicalization_patterns(&mut patterns);
    if config.fold_identity_reshape {
        patterns.insert_view::<ReshapeOpView, _>(EliminateIdentityReshape);
    }
    patterns.freeze()
}

/// Applies every registered canonicalization pattern in one greedy run.
pub struct CanonicalizerPass {
    config: CanonicalizeConfig,
    patterns: FrozenPatternSet,
}

impl CanonicalizerPass {
    const NAME: &'static str = "canonicalize";

    pub fn new(config: CanonicalizeConfig) -> Self {
        let patterns = canonicalization_patterns(&config);
        Self { config, patterns }
    }
}

impl Default for CanonicalizerPass {
    fn default() -> Self {
        Self::new(CanonicalizeConfig::default())
    }
}

impl FunctionPass for CanonicalizerPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(
        &self,
        function: &mut Function,
        cx: &mut OptimizeContext,
    ) -> Result<FunctionPassResult, DriverError> {
        let config = self.config.greedy.as_ref().unwrap_or(&cx.config().greedy);
        let stats = apply_patterns_and_fold_greedily_with_sink(
            function,
            &self.patterns,
            config,
            cx.sink(),
        )?;
        Ok(stats.into())
    }
}
