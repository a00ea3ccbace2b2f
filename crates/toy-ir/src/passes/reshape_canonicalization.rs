use crate::{
    driver::{apply_patterns_and_fold_greedily_with_sink, DriverError, GreedyConfig},
    optimizer::OptimizeContext,
    pattern::{CanonicalizationHook, OpRewritePattern, PatternSet, ReshapeOpView},
    rewriter::{NewOp, ProgramRewriter, RewriteError},
    spec::{Function, OpKind, Operation},
};

use super::{FunctionPass, FunctionPassResult};

/// Remove reshapes whose result type equals their operand's type.
pub struct EliminateIdentityReshape;

impl OpRewritePattern<ReshapeOpView> for EliminateIdentityReshape {
    fn name(&self) -> &str {
        "eliminate-identity-reshape"
    }

    fn benefit(&self) -> u16 {
        2
    }

    fn match_and_rewrite(
        &self,
        view: ReshapeOpView,
        rewriter: &mut ProgramRewriter,
    ) -> Result<bool, RewriteError> {
        let Some(source) = view.input() else {
            return Ok(false);
        };
        if rewriter.type_of(source) != Some(&view.result_type) {
            return Ok(false);
        }
        rewriter.replace_op(view.root, &[source])?;
        Ok(true)
    }
}

/// Fold reshape(reshape(x)) -> reshape(x), keeping the outer result type.
pub struct ReshapeReshapeOptPattern;

impl OpRewritePattern<ReshapeOpView> for ReshapeReshapeOptPattern {
    fn name(&self) -> &str {
        "reshape-reshape-opt"
    }

    fn match_and_rewrite(
        &self,
        view: ReshapeOpView,
        rewriter: &mut ProgramRewriter,
    ) -> Result<bool, RewriteError> {
        let Some(inner_value) = view.input() else {
            return Ok(false);
        };
        let Some(inner_inst) = rewriter.inst_of(inner_value) else {
            return Ok(false);
        };
        let Some(Operation::Reshape) = rewriter.op(inner_inst) else {
            return Ok(false);
        };
        let Some(&[base_value]) = rewriter.operands(inner_inst) else {
            return Ok(false);
        };

        // Element counts must agree for the folded reshape to be legal on its own.
        let base_elems = rewriter
            .type_of(base_value)
            .and_then(|ty| ty.as_tensor())
            .and_then(|spec| spec.element_count());
        let result_elems = view
            .result_type
            .as_tensor()
            .and_then(|spec| spec.element_count());
        if base_elems.is_none() || base_elems != result_elems {
            return Ok(false);
        }

        rewriter.replace_op_with_new(
            view.root,
            NewOp::new(Operation::Reshape, vec![base_value], view.result_type.clone()),
        )?;
        Ok(true)
    }
}

fn register_reshape_patterns(set: &mut PatternSet) {
    crate::register_patterns_for_view!(set, ReshapeOpView, ReshapeReshapeOptPattern);
}

#[linkme::distributed_slice(crate::pattern::CANONICALIZATION_HOOKS)]
static RESHAPE_CANONICALIZATION: CanonicalizationHook = CanonicalizationHook {
    kind: OpKind::Reshape,
    register: register_reshape_patterns,
};

/// Runs the reshape canonicalization patterns on their own.
#[derive(Default)]
pub struct ReshapeCanonicalizationPass {
    config: Option<GreedyConfig>,
    fold_identity: bool,
}

impl ReshapeCanonicalizationPass {
    const NAME: &'static str = "reshape-canonicalize";

    pub fn new(config: GreedyConfig) -> Self {
        Self {
            config: Some(config),
            fold_identity: false,
        }
    }

    pub fn with_identity_folding(mut self, enabled: bool) -> Self {
        self.fold_identity = enabled;
        self
    }
}

impl FunctionPass for ReshapeCanonicalizationPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(
        &self,
        function: &mut Function,
        cx: &mut OptimizeContext,
    ) -> Result<FunctionPassResult, DriverError> {
        let mut patterns = PatternSet::new();
        OpKind::Reshape.canonicalization_patterns(&mut patterns);
        if self.fold_identity {
            patterns.insert_view::<ReshapeOpView, _>(EliminateIdentityReshape);
        }
        let frozen = patterns.freeze();
        let config = self.config.as_ref().unwrap_or(&cx.config().greedy);
        let stats =
            apply_patterns_and_fold_greedily_with_sink(function, &frozen, config, cx.sink())?;
        Ok(stats.into())
    }
}
