use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use toy_ir::spec::{
    DType, Function, Instruction, Operation, Program, Shape, TensorLiteral, TensorSpec, ValueId,
    ValueType,
};

/// Dense row-major tensor evaluated in `f64` regardless of its declared dtype.
#[derive(Debug, Clone, PartialEq)]
pub struct CpuTensor {
    pub spec: TensorSpec,
    pub data: Arc<[f64]>,
}

impl CpuTensor {
    pub fn new(spec: TensorSpec, data: Vec<f64>) -> Result<Self, EvalError> {
        let expected = element_count(&spec.shape)?;
        if expected != data.len() {
            return Err(EvalError::ElementCount {
                op: "tensor",
                expected,
                found: data.len(),
            });
        }
        Ok(Self {
            spec,
            data: Arc::from(data),
        })
    }

    /// `f64` tensor with the given dimensions.
    pub fn f64(dims: &[usize], data: Vec<f64>) -> Result<Self, EvalError> {
        Self::new(TensorSpec::new(DType::F64, Shape::new(dims.to_vec())), data)
    }

    pub fn from_literal(literal: &TensorLiteral) -> Result<Self, EvalError> {
        Self::new(literal.spec.clone(), literal.values.to_vec())
    }

    pub fn values(&self) -> &[f64] {
        &self.data
    }
}

/// Values returned by the function plus every tensor passed to `print`, in execution order.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub results: Vec<CpuTensor>,
    pub printed: Vec<CpuTensor>,
}

#[derive(Debug, Error, PartialEq)]
pub enum EvalError {
    #[error("entry function `{name}` not found")]
    EntryNotFound { name: String },
    #[error("expected {expected} inputs, got {found}")]
    InputArity { expected: usize, found: usize },
    #[error("input {index} has type {found}, expected {expected}")]
    InputType {
        index: usize,
        expected: ValueType,
        found: TensorSpec,
    },
    #[error("value {value} is not available")]
    MissingValue { value: ValueId },
    #[error("value {value} has no tensor payload")]
    NotATensor { value: ValueId },
    #[error("{op}: expected {expected} operands, got {found}")]
    Arity {
        op: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("{op}: expected {expected} elements, got {found}")]
    ElementCount {
        op: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("{op}: operand shapes {lhs} and {rhs} differ")]
    ShapeMismatch {
        op: &'static str,
        lhs: Shape,
        rhs: Shape,
    },
    #[error("{op}: result type {found} does not match computed {expected}")]
    ResultType {
        op: &'static str,
        expected: TensorSpec,
        found: ValueType,
    },
    #[error("shape {shape} overflows")]
    Overflow { shape: Shape },
    #[error("@{function} instruction {index} (`{op}`): {source}")]
    Instruction {
        function: String,
        index: usize,
        op: &'static str,
        #[source]
        source: Box<EvalError>,
    },
}

/// Evaluates the program's entry function.
pub fn run_program(program: &Program, inputs: &[CpuTensor]) -> Result<Evaluation, EvalError> {
    let function = program
        .entry_function()
        .ok_or_else(|| EvalError::EntryNotFound {
            name: program.entry.clone(),
        })?;
    run_function(function, inputs)
}

pub fn run_function(function: &Function, inputs: &[CpuTensor]) -> Result<Evaluation, EvalError> {
    if function.parameter_ids.len() != inputs.len() {
        return Err(EvalError::InputArity {
            expected: function.parameter_ids.len(),
            found: inputs.len(),
        });
    }

    let mut values: HashMap<ValueId, Option<CpuTensor>> = HashMap::new();
    for (index, ((param_id, param_ty), input)) in function
        .parameter_ids
        .iter()
        .zip(function.parameters.iter())
        .zip(inputs.iter())
        .enumerate()
    {
        if param_ty.as_tensor() != Some(&input.spec) {
            return Err(EvalError::InputType {
                index,
                expected: param_ty.clone(),
                found: input.spec.clone(),
            });
        }
        values.insert(*param_id, Some(input.clone()));
    }

    let mut printed = Vec::new();
    for (index, instruction) in function.body.iter().enumerate() {
        tracing::trace!(function = %function.name, index, op = instruction.op.name(), "eval");
        let output = execute_instruction(instruction, &values, &mut printed).map_err(|err| {
            EvalError::Instruction {
                function: function.name.clone(),
                index,
                op: instruction.op.name(),
                source: Box::new(err),
            }
        })?;
        values.insert(instruction.id, output);
    }

    let mut results = Vec::with_capacity(function.result_ids.len());
    for id in &function.result_ids {
        results.push(tensor_value(&values, *id)?.clone());
    }
    Ok(Evaluation { results, printed })
}

fn execute_instruction(
    instruction: &Instruction,
    values: &HashMap<ValueId, Option<CpuTensor>>,
    printed: &mut Vec<CpuTensor>,
) -> Result<Option<CpuTensor>, EvalError> {
    let op = instruction.op.name();
    let expected = instruction.op.kind().arity();
    if instruction.operands.len() != expected {
        return Err(EvalError::Arity {
            op,
            expected,
            found: instruction.operands.len(),
        });
    }
    let inputs = instruction
        .operands
        .iter()
        .map(|id| tensor_value(values, *id))
        .collect::<Result<Vec<_>, _>>()?;

    let result = match &instruction.op {
        Operation::Constant(literal) => CpuTensor::from_literal(literal)?,
        Operation::Transpose => op_transpose(inputs[0])?,
        Operation::Reshape => op_reshape(inputs[0], &instruction.output)?,
        Operation::Add => op_elementwise(op, inputs[0], inputs[1], |a, b| a + b)?,
        Operation::Mul => op_elementwise(op, inputs[0], inputs[1], |a, b| a * b)?,
        Operation::Print => {
            printed.push(inputs[0].clone());
            return Ok(None);
        }
    };

    if instruction.output.as_tensor() != Some(&result.spec) {
        return Err(EvalError::ResultType {
            op,
            expected: result.spec,
            found: instruction.output.clone(),
        });
    }
    Ok(Some(result))
}

fn tensor_value(
    values: &HashMap<ValueId, Option<CpuTensor>>,
    id: ValueId,
) -> Result<&CpuTensor, EvalError> {
    values
        .get(&id)
        .ok_or(EvalError::MissingValue { value: id })?
        .as_ref()
        .ok_or(EvalError::NotATensor { value: id })
}

fn op_transpose(input: &CpuTensor) -> Result<CpuTensor, EvalError> {
    let input_dims = input.spec.shape.dims();
    let out_shape = input.spec.shape.reversed();
    let out_dims = out_shape.dims();
    let rank = input_dims.len();
    let input_strides = compute_strides(input_dims);
    let mut result = vec![0.0f64; element_count(&out_shape)?];
    for (idx, slot) in result.iter_mut().enumerate() {
        let out_coord = unravel_index(idx, out_dims);
        let in_index = out_coord
            .iter()
            .enumerate()
            .map(|(out_axis, &c)| c * input_strides[rank - 1 - out_axis])
            .sum::<usize>();
        *slot = input.data[in_index];
    }
    CpuTensor::new(TensorSpec::new(input.spec.dtype, out_shape), result)
}

fn op_reshape(input: &CpuTensor, output: &ValueType) -> Result<CpuTensor, EvalError> {
    let Some(spec) = output.as_tensor() else {
        return Err(EvalError::ResultType {
            op: "reshape",
            expected: input.spec.clone(),
            found: output.clone(),
        });
    };
    let expected = element_count(&spec.shape)?;
    if expected != input.data.len() {
        return Err(EvalError::ElementCount {
            op: "reshape",
            expected,
            found: input.data.len(),
        });
    }
    Ok(CpuTensor {
        spec: spec.clone(),
        data: input.data.clone(),
    })
}

fn op_elementwise(
    op: &'static str,
    lhs: &CpuTensor,
    rhs: &CpuTensor,
    f: impl Fn(f64, f64) -> f64,
) -> Result<CpuTensor, EvalError> {
    if lhs.spec.shape != rhs.spec.shape {
        return Err(EvalError::ShapeMismatch {
            op,
            lhs: lhs.spec.shape.clone(),
            rhs: rhs.spec.shape.clone(),
        });
    }
    let data = lhs
        .data
        .iter()
        .zip(rhs.data.iter())
        .map(|(a, b)| f(*a, *b))
        .collect::<Vec<_>>();
    CpuTensor::new(lhs.spec.clone(), data)
}

fn element_count(shape: &Shape) -> Result<usize, EvalError> {
    shape.element_count().ok_or_else(|| EvalError::Overflow {
        shape: shape.clone(),
    })
}

fn compute_strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![0; dims.len()];
    let mut acc = 1usize;
    for (i, dim) in dims.iter().enumerate().rev() {
        strides[i] = acc;
        acc *= *dim;
    }
    strides
}

fn unravel_index(mut index: usize, dims: &[usize]) -> Vec<usize> {
    let mut coords = vec![0; dims.len()];
    for (i, dim) in dims.iter().enumerate().rev() {
        coords[i] = index % *dim;
        index /= *dim;
    }
    coords
}
