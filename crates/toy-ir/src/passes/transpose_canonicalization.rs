use crate::{
    driver::{apply_patterns_and_fold_greedily_with_sink, DriverError, GreedyConfig},
    optimizer::OptimizeContext,
    pattern::{CanonicalizationHook, OpRewritePattern, PatternSet, TransposeOpView},
    rewriter::{ProgramRewriter, RewriteError},
    spec::{Function, OpKind, Operation},
};

use super::{FunctionPass, FunctionPassResult};

/// Fold transpose(transpose(x)) -> x.
///
/// Transpose reverses every axis, so two of them cancel exactly. Longer chains shrink two at a
/// time as the driver revisits the rewired users.
pub struct SimplifyRedundantTranspose;

impl OpRewritePattern<TransposeOpView> for SimplifyRedundantTranspose {
    fn name(&self) -> &str {
        "simplify-redundant-transpose"
    }

    fn match_and_rewrite(
        &self,
        view: TransposeOpView,
        rewriter: &mut ProgramRewriter,
    ) -> Result<bool, RewriteError> {
        let Some(inner_value) = view.input() else {
            return Ok(false);
        };
        let Some(inner_inst) = rewriter.inst_of(inner_value) else {
            return Ok(false);
        };
        let Some(Operation::Transpose) = rewriter.op(inner_inst) else {
            return Ok(false);
        };
        let Some(&[base_value]) = rewriter.operands(inner_inst) else {
            return Ok(false);
        };

        rewriter.replace_op(view.root, &[base_value])?;
        Ok(true)
    }
}

fn register_transpose_patterns(set: &mut PatternSet) {
    crate::register_patterns_for_view!(set, TransposeOpView, SimplifyRedundantTranspose);
}

#[linkme::distributed_slice(crate::pattern::CANONICALIZATION_HOOKS)]
static TRANSPOSE_CANONICALIZATION: CanonicalizationHook = CanonicalizationHook {
    kind: OpKind::Transpose,
    register: register_transpose_patterns,
};

/// Runs the transpose canonicalization patterns on their own.
#[derive(Default)]
pub struct TransposeCanonicalizationPass {
    config: Option<GreedyConfig>,
}

impl TransposeCanonicalizationPass {
    const NAME: &'static str = "transpose-canonicalize";

    pub fn new(config: GreedyConfig) -> Self {
        Self {
            config: Some(config),
        }
    }
}

impl FunctionPass for TransposeCanonicalizationPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(
        &self,
        function: &mut Function,
        cx: &mut OptimizeContext,
    ) -> Result<FunctionPassResult, DriverError> {
        let mut patterns = PatternSet::new();
        OpKind::Transpose.canonicalization_patterns(&mut patterns);
        let frozen = patterns.freeze();
        let config = self.config.as_ref().unwrap_or(&cx.config().greedy);
        let stats =
            apply_patterns_and_fold_greedily_with_sink(function, &frozen, config, cx.sink())?;
        Ok(stats.into())
    }
}
