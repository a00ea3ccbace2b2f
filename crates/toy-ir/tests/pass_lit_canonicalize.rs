
use lit_support::{load_cases, run_case_with_passes};
use toy_ir::passes::{CanonicalizerPass, DeadCodeEliminationPass};

#[test]
fn canonicalizer_lit_cases() {
    let pass = CanonicalizerPass::default();
    for case in load_cases("canonicalize.lit") {
        run_case_with_passes(&[&pass], &case);
    }
}

#[test]
fn canonicalizer_followed_by_dce_matches_fixtures() {
    let canonicalize = CanonicalizerPass::default();
    let dce = DeadCodeEliminationPass;
    for case in load_cases("canonicalize.lit") {
        run_case_with_passes(&[&canonicalize, &dce], &case);
    }
}
