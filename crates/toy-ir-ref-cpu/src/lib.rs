pub mod cpu;

pub use cpu::{run_function, run_program, CpuTensor, EvalError, Evaluation};
