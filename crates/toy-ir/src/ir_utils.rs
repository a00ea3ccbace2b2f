use std::sync::Arc;

use crate::spec::{DType, Shape, TensorLiteral, TensorSpec, ValueType};

/// Builds a shape descriptor from explicit dimensions.
pub fn shape(dims: &[usize]) -> Shape {
    Shape::new(dims.to_vec())
}

/// Builds a tensor spec with the given dimensions.
pub fn tensor_spec(dtype: DType, dims: &[usize]) -> TensorSpec {
    TensorSpec::new(dtype, shape(dims))
}

/// Wraps a tensor spec as a value type.
pub fn value_type_tensor(spec: TensorSpec) -> ValueType {
    ValueType::Tensor(spec)
}

/// `f64` tensor value type for the provided dimensions.
pub fn f64_tensor(dims: &[usize]) -> ValueType {
    value_type_tensor(tensor_spec(DType::F64, dims))
}

/// Creates a literal from row-major values.
///
/// Returns `None` when the value count does not match the shape.
pub fn tensor_literal(spec: TensorSpec, values: Vec<f64>) -> Option<TensorLiteral> {
    if spec.element_count()? != values.len() {
        return None;
    }
    Some(TensorLiteral::new(spec, Arc::<[f64]>::from(values)))
}
