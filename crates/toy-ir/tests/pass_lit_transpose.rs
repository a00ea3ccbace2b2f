
use lit_support::{load_cases, run_case_with_passes};
use toy_ir::passes::TransposeCanonicalizationPass;

#[test]
fn transpose_canonicalization_lit_cases() {
    let pass = TransposeCanonicalizationPass::default();
    for case in load_cases("transpose.lit") {
        run_case_with_passes(&[&pass], &case);
    }
}
