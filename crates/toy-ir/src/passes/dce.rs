use std::collections::{HashMap, HashSet};

use crate::driver::DriverError;
use crate::optimizer::{FunctionPass, OptimizeContext, PassResult};
use crate::spec::{Function, ValueId};

/// Liveness-based sweep: keeps returned values, side-effecting operations and their inputs.
#[derive(Default)]
pub struct DeadCodeEliminationPass;

impl DeadCodeEliminationPass {
    const NAME: &'static str = "dce";
}

impl FunctionPass for DeadCodeEliminationPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(
        &self,
        function: &mut Function,
        _cx: &mut OptimizeContext,
    ) -> Result<PassResult, DriverError> {
        let mut def_map: HashMap<ValueId, usize> = HashMap::with_capacity(function.body.len());
        for (idx, inst) in function.body.iter().enumerate() {
            def_map.insert(inst.id, idx);
        }

        let mut worklist: Vec<ValueId> = function.result_ids.clone();
        for inst in &function.body {
            if inst.op.kind().is_side_effecting() {
                worklist.push(inst.id);
            }
        }

        let mut live: HashSet<ValueId> = HashSet::new();
        while let Some(value) = worklist.pop() {
            if !live.insert(value) {
                continue;
            }
            let Some(&idx) = def_map.get(&value) else {
                continue;
            };
            worklist.extend(function.body[idx].operands.iter().copied());
        }

        let before = function.body.len();
        function.body.retain(|inst| live.contains(&inst.id));
        let removed = before.saturating_sub(function.body.len());

        Ok(PassResult {
            changed: removed > 0,
            iterations: 0,
            rewrites_applied: 0,
            erased_insts: removed,
            converged: true,
        })
    }
}
