use thiserror::Error;

use crate::{
    index::{DefId, FunctionIndexError, FunctionIndices, InstId},
    spec::{Function, Instruction, Location, OpKind, Operation, TensorLiteral, ValueId, ValueType},
};

/// Operation to materialise in place of a replaced root.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOp {
    pub op: Operation,
    pub operands: Vec<ValueId>,
    pub output: ValueType,
}

impl NewOp {
    pub fn new(op: Operation, operands: Vec<ValueId>, output: ValueType) -> Self {
        Self {
            op,
            operands,
            output,
        }
    }
}

/// Rejections raised by the rewriter before any mutation takes place.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RewriteError {
    #[error("instruction {inst} is not part of the function")]
    UnknownInst { inst: InstId },
    #[error("value {value} is not defined in the function")]
    UnknownValue { value: ValueId },
    #[error("expected {expected} replacement values, got {found}")]
    ResultCountMismatch { expected: usize, found: usize },
    #[error("cannot replace {value} of type {expected} with a value of type {found}")]
    TypeMismatch {
        value: ValueId,
        expected: ValueType,
        found: ValueType,
    },
    #[error("value {value} is not defined before its use at {at}")]
    NotDominating { value: ValueId, at: InstId },
    #[error("`{kind}` takes {expected} operands, got {found}")]
    ArityMismatch {
        kind: OpKind,
        expected: usize,
        found: usize,
    },
    #[error("value {value} cannot replace itself")]
    SelfReplacement { value: ValueId },
    #[error("cannot erase {inst}: its value still has {users} users")]
    LiveUses { inst: InstId, users: usize },
    #[error("cannot erase {inst}: its value is returned by the function")]
    ReturnedValue { inst: InstId },
    #[error(transparent)]
    Index(#[from] FunctionIndexError),
}

/// Mutable IR editor with stable instruction identifiers and SSA accounting.
///
/// Every mutation validates its inputs first and only then edits the body, so a rejected
/// rewrite leaves the function exactly as it was.
pub struct ProgramRewriter<'a> {
    func: &'a mut Function,
    indices: FunctionIndices,
    touched: Vec<InstId>,
}

impl<'a> ProgramRewriter<'a> {
    /// Creates a rewriter for the provided function, indexing its body.
    pub fn new(func: &'a mut Function) -> Result<Self, FunctionIndexError> {
        let indices = FunctionIndices::build(func)?;
        Ok(Self {
            func,
            indices,
            touched: Vec::new(),
        })
    }

    pub fn function(&self) -> &Function {
        self.func
    }

    pub fn instruction(&self, inst: InstId) -> Option<&Instruction> {
        let pos = self.indices.position(inst)?;
        self.func.body.get(pos)
    }

    /// Returns the operation referenced by `inst`.
    pub fn op(&self, inst: InstId) -> Option<&Operation> {
        self.instruction(inst).map(|instruction| &instruction.op)
    }

    /// Returns the operands for the given instruction.
    pub fn operands(&self, inst: InstId) -> Option<&[ValueId]> {
        self.instruction(inst)
            .map(|instruction| instruction.operands.as_slice())
    }

    pub fn location(&self, inst: InstId) -> Option<&Location> {
        self.instruction(inst).map(|instruction| &instruction.loc)
    }

    /// Returns the SSA value produced by the instruction.
    pub fn value_of(&self, inst: InstId) -> Option<ValueId> {
        self.indices.value_of(inst)
    }

    /// Returns the type recorded for the value.
    pub fn type_of(&self, value: ValueId) -> Option<&ValueType> {
        self.indices.type_of(value)
    }

    /// Returns the instruction defining the provided value.
    pub fn inst_of(&self, value: ValueId) -> Option<InstId> {
        self.indices.inst_of(value)
    }

    /// Returns the total "definition" for the provided value.
    pub fn def_of(&self, value: ValueId) -> Option<DefId> {
        self.indices.def_of(value)
    }

    pub fn op_of_def(&self, def: DefId) -> Option<&Operation> {
        match def {
            DefId::Param { .. } => None,
            DefId::Inst(inst) => self.op(inst),
        }
    }

    /// Returns the recorded users for the value.
    pub fn users_of(&self, value: ValueId) -> &[InstId] {
        self.indices.users_of(value)
    }

    /// Whether `value` is returned by the function.
    pub fn is_result(&self, value: ValueId) -> bool {
        self.func.result_ids.contains(&value)
    }

    pub fn contains(&self, inst: InstId) -> bool {
        self.indices.contains(inst)
    }

    /// Returns the current version counter for an instruction.
    pub fn version(&self, inst: InstId) -> Option<u32> {
        self.indices.version(inst)
    }

    pub fn insts_in_order(&self) -> Vec<InstId> {
        self.indices.ordered_inst_ids()
    }

    /// Replaces the result of `inst` with `replacements` and erases `inst`.
    ///
    /// Operations produce a single result, so exactly one replacement is expected.
    pub fn replace_op(
        &mut self,
        inst: InstId,
        replacements: &[ValueId],
    ) -> Result<(), RewriteError> {
        let value = self
            .indices
            .value_of(inst)
            .ok_or(RewriteError::UnknownInst { inst })?;
        let [replacement] = replacements else {
            return Err(RewriteError::ResultCountMismatch {
                expected: 1,
                found: replacements.len(),
            });
        };
        if *replacement == value {
            return Err(RewriteError::SelfReplacement { value });
        }
        self.check_replaceable(value, *replacement)?;

        self.replace_all_uses(value, *replacement)?;
        self.erase_inst(inst)
    }

    /// Builds `new_op` immediately before `inst`, forwards every use of `inst` to it, and
    /// erases `inst`. The new instruction inherits the location of `inst`.
    pub fn replace_op_with_new(
        &mut self,
        inst: InstId,
        new_op: NewOp,
    ) -> Result<ValueId, RewriteError> {
        let value = self
            .indices
            .value_of(inst)
            .ok_or(RewriteError::UnknownInst { inst })?;
        let expected = self
            .indices
            .type_of(value)
            .ok_or(RewriteError::UnknownValue { value })?;
        if *expected != new_op.output {
            return Err(RewriteError::TypeMismatch {
                value,
                expected: expected.clone(),
                found: new_op.output,
            });
        }
        self.check_new_operands(inst, &new_op)?;

        let (_, new_value) = self.insert_before(inst, new_op.op, new_op.operands, new_op.output)?;
        self.replace_all_uses(value, new_value)?;
        self.erase_inst(inst)?;
        Ok(new_value)
    }

    /// Replaces all uses of `from` with `to`, including function results.
    pub fn replace_all_uses(&mut self, from: ValueId, to: ValueId) -> Result<(), RewriteError> {
        if from == to {
            return Ok(());
        }
        self.check_replaceable(from, to)?;

        let consumers = self.indices.users_of(from).to_vec();
        for inst in consumers {
            let pos = self
                .indices
                .position(inst)
                .ok_or(RewriteError::UnknownInst { inst })?;
            for operand in &mut self.func.body[pos].operands {
                if *operand == from {
                    *operand = to;
                }
            }
            self.indices.update_operand_use(inst, from, to)?;
            self.indices.bump_version(inst);
            self.touched.push(inst);
        }
        for result_id in &mut self.func.result_ids {
            if *result_id == from {
                *result_id = to;
            }
        }
        Ok(())
    }

    /// Erases the instruction identified by `inst`. Its value must be dead.
    pub fn erase_inst(&mut self, inst: InstId) -> Result<(), RewriteError> {
        let value = self
            .indices
            .value_of(inst)
            .ok_or(RewriteError::UnknownInst { inst })?;
        let users = self.indices.users_of(value).len();
        if users > 0 {
            return Err(RewriteError::LiveUses { inst, users });
        }
        if self.is_result(value) {
            return Err(RewriteError::ReturnedValue { inst });
        }
        let pos = self
            .indices
            .position(inst)
            .ok_or(RewriteError::UnknownInst { inst })?;
        let instruction = self.func.body.remove(pos);
        self.indices.remove_instruction(inst, &instruction);
        for operand in &instruction.operands {
            if let Some(producer) = self.indices.inst_of(*operand) {
                self.touched.push(producer);
            }
        }
        Ok(())
    }

    /// Inserts a new instruction before `at`, returning its identifiers.
    ///
    /// The new instruction carries the location of `at`.
    pub fn insert_before(
        &mut self,
        at: InstId,
        op: Operation,
        operands: Vec<ValueId>,
        output: ValueType,
    ) -> Result<(InstId, ValueId), RewriteError> {
        let pos = self
            .indices
            .position(at)
            .ok_or(RewriteError::UnknownInst { inst: at })?;
        for operand in &operands {
            if !self.defined_before(*operand, pos)? {
                return Err(RewriteError::NotDominating {
                    value: *operand,
                    at,
                });
            }
        }
        let loc = self.func.body[pos].loc.clone();

        let inst_id = self.indices.allocate_inst();
        let value_id = self.indices.allocate_value();
        let instruction = Instruction {
            id: value_id,
            op,
            operands,
            output,
            loc,
        };
        self.indices.insert_instruction(inst_id, pos, &instruction)?;
        for operand in &instruction.operands {
            if let Some(producer) = self.indices.inst_of(*operand) {
                self.touched.push(producer);
            }
        }
        self.func.body.insert(pos, instruction);
        self.touched.push(inst_id);
        Ok((inst_id, value_id))
    }

    /// Materialises a constant literal by inserting a `Constant` operation before `at`.
    pub fn materialize_constant(
        &mut self,
        at: InstId,
        literal: TensorLiteral,
    ) -> Result<(InstId, ValueId), RewriteError> {
        let output = ValueType::Tensor(literal.spec.clone());
        self.insert_before(at, Operation::Constant(literal), Vec::new(), output)
    }

    /// Verifies basic SSA invariants after mutations.
    pub fn verify(&self) -> bool {
        FunctionIndices::build(self.func).is_ok()
    }

    /// Drains the instructions affected by mutations since the last call.
    pub(crate) fn take_touched(&mut self) -> Vec<InstId> {
        std::mem::take(&mut self.touched)
    }

    fn check_replaceable(&self, from: ValueId, to: ValueId) -> Result<(), RewriteError> {
        let expected = self
            .indices
            .type_of(from)
            .ok_or(RewriteError::UnknownValue { value: from })?;
        let found = self
            .indices
            .type_of(to)
            .ok_or(RewriteError::UnknownValue { value: to })?;
        if expected != found {
            return Err(RewriteError::TypeMismatch {
                value: from,
                expected: expected.clone(),
                found: found.clone(),
            });
        }
        for user in self.indices.users_of(from) {
            let pos = self
                .indices
                .position(*user)
                .ok_or(RewriteError::UnknownInst { inst: *user })?;
            if !self.defined_before(to, pos)? {
                return Err(RewriteError::NotDominating {
                    value: to,
                    at: *user,
                });
            }
        }
        Ok(())
    }

    fn check_new_operands(&self, at: InstId, new_op: &NewOp) -> Result<(), RewriteError> {
        let kind = new_op.op.kind();
        if new_op.operands.len() != kind.arity() {
            return Err(RewriteError::ArityMismatch {
                kind,
                expected: kind.arity(),
                found: new_op.operands.len(),
            });
        }
        let pos = self
            .indices
            .position(at)
            .ok_or(RewriteError::UnknownInst { inst: at })?;
        for operand in &new_op.operands {
            if !self.defined_before(*operand, pos)? {
                return Err(RewriteError::NotDominating {
                    value: *operand,
                    at,
                });
            }
        }
        Ok(())
    }

    fn defined_before(&self, value: ValueId, pos: usize) -> Result<bool, RewriteError> {
        match self.indices.def_of(value) {
            Some(DefId::Param { .. }) => Ok(true),
            Some(DefId::Inst(inst)) => Ok(self
                .indices
                .position(inst)
                .is_some_and(|def_pos| def_pos < pos)),
            None => Err(RewriteError::UnknownValue { value }),
        }
    }
}
