//! Peephole canonicalization engine for a small tensor IR.
//!
//! Functions are rewritten in place by a worklist driver ([`driver`]) applying patterns
//! ([`pattern`]) through a validating editor ([`rewriter`]).

pub mod diagnostics;
pub mod driver;
mod env;
pub mod index;
pub mod ir_utils;
pub mod optimizer;
pub mod passes;
pub mod pattern;
pub mod pipeline;
pub mod rewriter;
pub mod spec;
pub mod text_ir;

pub use spec::{DType, Function, Program, Shape, TensorSpec, ValueId, ValueType};
