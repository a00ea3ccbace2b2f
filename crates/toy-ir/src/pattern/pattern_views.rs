use super::OperationView;
use crate::{
    index::InstId,
    rewriter::ProgramRewriter,
    spec::{Location, OpKind, Operation, TensorLiteral, ValueId, ValueType},
};

#[derive(Clone)]
pub struct ConstantOpView {
    pub root: InstId,
    pub result: ValueId,
    pub result_type: ValueType,
    pub literal: TensorLiteral,
}

impl ConstantOpView {
    pub fn new(root: InstId, rewriter: &ProgramRewriter) -> Option<Self> {
        let result = rewriter.value_of(root)?;
        let result_type = rewriter.type_of(result)?.clone();
        match rewriter.op(root)? {
            Operation::Constant(literal) => Some(Self {
                root,
                result,
                result_type,
                literal: literal.clone(),
            }),
            _ => None,
        }
    }
}

impl OperationView for ConstantOpView {
    const KIND: OpKind = OpKind::Constant;

    fn extract(root: InstId, rewriter: &ProgramRewriter) -> Option<Self> {
        Self::new(root, rewriter)
    }
}

macro_rules! define_unit_op_view {
    ($name:ident, $variant:ident) => {
        #[derive(Clone)]
        pub struct $name {
            pub root: InstId,
            pub operands: Vec<ValueId>,
            pub result: ValueId,
            pub result_type: ValueType,
            pub loc: Location,
        }

        impl $name {
            pub fn new(root: InstId, rewriter: &ProgramRewriter) -> Option<Self> {
                let instruction = rewriter.instruction(root)?;
                if !matches!(instruction.op, Operation::$variant) {
                    return None;
                }
                Some(Self {
                    root,
                    operands: instruction.operands.clone(),
                    result: instruction.id,
                    result_type: instruction.output.clone(),
                    loc: instruction.loc.clone(),
                })
            }

            /// Sole operand of a unary operation.
            pub fn input(&self) -> Option<ValueId> {
                match self.operands.as_slice() {
                    [input] => Some(*input),
                    _ => None,
                }
            }
        }

        impl OperationView for $name {
            const KIND: OpKind = OpKind::$variant;

            fn extract(root: InstId, rewriter: &ProgramRewriter) -> Option<Self> {
                Self::new(root, rewriter)
            }
        }
    };
}

define_unit_op_view!(TransposeOpView, Transpose);
define_unit_op_view!(ReshapeOpView, Reshape);
define_unit_op_view!(AddOpView, Add);
define_unit_op_view!(MulOpView, Mul);
define_unit_op_view!(PrintOpView, Print);
