use super::PatternSet;
use crate::spec::OpKind;

/// Per-kind hook contributing canonicalization patterns.
///
/// Hooks are collected at link time. Populating a set walks them in `OpKind` order; a kind
/// should own a single hook so that the order of its patterns is fixed.
#[derive(Debug, Clone, Copy)]
pub struct CanonicalizationHook {
    pub kind: OpKind,
    pub register: fn(&mut PatternSet),
}

#[linkme::distributed_slice]
pub static CANONICALIZATION_HOOKS: [CanonicalizationHook] = [..];

pub fn all_canonicalization_hooks() -> &'static [CanonicalizationHook] {
    &CANONICALIZATION_HOOKS
}

impl OpKind {
    /// Adds the canonicalization patterns registered for this kind.
    pub fn canonicalization_patterns(self, set: &mut PatternSet) {
        for hook in CANONICALIZATION_HOOKS.iter().filter(|hook| hook.kind == self) {
            (hook.register)(set);
        }
    }
}

/// Adds the canonicalization patterns of every operation kind.
pub fn populate_canonicalization_patterns(set: &mut PatternSet) {
    for kind in OpKind::ALL {
        kind.canonicalization_patterns(set);
    }
}
