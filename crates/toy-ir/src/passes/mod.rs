//! Function passes built on the greedy pattern driver.

mod canonicalize;
mod dce;
mod reshape_canonicalization;
mod transpose_canonicalization;

pub use canonicalize::{canonicalization_patterns, CanonicalizeConfig, CanonicalizerPass};
pub use dce::DeadCodeEliminationPass;
pub use reshape_canonicalization::{
    EliminateIdentityReshape, ReshapeCanonicalizationPass, ReshapeReshapeOptPattern,
};
pub use transpose_canonicalization::{SimplifyRedundantTranspose, TransposeCanonicalizationPass};

pub use crate::optimizer::{FunctionPass, PassResult as FunctionPassResult};
