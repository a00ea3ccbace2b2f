use std::collections::HashMap;

use crate::{
    index::InstId,
    rewriter::{ProgramRewriter, RewriteError},
    spec::OpKind,
};

pub trait OperationView: Clone {
    /// Root operation kind the view extracts.
    const KIND: OpKind;
    fn extract(root: InstId, rewriter: &ProgramRewriter) -> Option<Self>;
}

mod pattern_views;
pub use pattern_views::*;

mod registry;
pub use registry::*;

/// Base trait for rewrite patterns.
///
/// `match_and_rewrite` returns `Ok(false)` when the pattern does not apply; that case must leave
/// the function untouched. `Err` means the pattern attempted a rewrite the rewriter refused.
pub trait Pattern: Send + Sync {
    fn name(&self) -> &str;
    /// Kind the pattern is rooted at; `None` matches every operation.
    fn root_kind(&self) -> Option<OpKind> {
        None
    }
    fn benefit(&self) -> u16 {
        1
    }
    fn match_and_rewrite(
        &self,
        root: InstId,
        rewriter: &mut ProgramRewriter,
    ) -> Result<bool, RewriteError>;
}

/// Typed convenience trait mirroring MLIR's `OpRewritePattern`.
pub trait OpRewritePattern<T> {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
            .rsplit("::")
            .next()
            .unwrap_or("pattern")
    }
    fn benefit(&self) -> u16 {
        1
    }
    fn may_match(&self, _op: &T, _rewriter: &ProgramRewriter) -> bool {
        true
    }
    fn match_and_rewrite(
        &self,
        op: T,
        rewriter: &mut ProgramRewriter,
    ) -> Result<bool, RewriteError>;
}

/// Adapter converting a typed pattern into a `Pattern`.
pub struct TypedPattern<P, T> {
    pattern: P,
    root_kind: Option<OpKind>,
    extractor: fn(InstId, &ProgramRewriter) -> Option<T>,
}

impl<P, T> TypedPattern<P, T> {
    pub fn rooted_at(
        pattern: P,
        kind: OpKind,
        extractor: fn(InstId, &ProgramRewriter) -> Option<T>,
    ) -> Self {
        Self {
            pattern,
            root_kind: Some(kind),
            extractor,
        }
    }

    pub fn match_any(pattern: P, extractor: fn(InstId, &ProgramRewriter) -> Option<T>) -> Self {
        Self {
            pattern,
            root_kind: None,
            extractor,
        }
    }
}

impl<P, V> TypedPattern<P, V>
where
    V: OperationView,
{
    pub fn from_view(pattern: P) -> Self {
        Self::rooted_at(pattern, V::KIND, V::extract)
    }
}

impl<P, T> Pattern for TypedPattern<P, T>
where
    P: OpRewritePattern<T> + Send + Sync,
    T: Send,
{
    fn name(&self) -> &str {
        self.pattern.name()
    }

    fn root_kind(&self) -> Option<OpKind> {
        self.root_kind
    }

    fn benefit(&self) -> u16 {
        self.pattern.benefit()
    }

    fn match_and_rewrite(
        &self,
        root: InstId,
        rewriter: &mut ProgramRewriter,
    ) -> Result<bool, RewriteError> {
        let Some(view) = (self.extractor)(root, rewriter) else {
            return Ok(false);
        };
        if !self.pattern.may_match(&view, rewriter) {
            return Ok(false);
        }
        self.pattern.match_and_rewrite(view, rewriter)
    }
}

/// Mutable set that collects rewrite patterns prior to freezing.
pub struct PatternSet {
    patterns: Vec<Box<dyn Pattern>>,
}

impl PatternSet {
    pub fn new() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn add<P>(&mut self, pattern: P) -> &mut Self
    where
        P: Pattern + 'static,
    {
        self.patterns.push(Box::new(pattern));
        self
    }

    pub fn add_typed<P, T>(&mut self, pattern: TypedPattern<P, T>) -> &mut Self
    where
        P: OpRewritePattern<T> + Send + Sync + 'static,
        T: Send + 'static,
    {
        self.patterns.push(Box::new(pattern));
        self
    }

    pub fn insert_view<V, P>(&mut self, pattern: P) -> &mut Self
    where
        V: OperationView + Send + 'static,
        P: OpRewritePattern<V> + Send + Sync + 'static,
    {
        self.add_typed(TypedPattern::<P, V>::from_view(pattern))
    }

    pub fn insert_match_any<P, T>(
        &mut self,
        pattern: P,
        extractor: fn(InstId, &ProgramRewriter) -> Option<T>,
    ) -> &mut Self
    where
        P: OpRewritePattern<T> + Send + Sync + 'static,
        T: Send + 'static,
    {
        self.add_typed(TypedPattern::match_any(pattern, extractor))
    }

    /// Orders patterns by descending benefit and indexes them by root kind.
    ///
    /// The sort is stable, so patterns with equal benefit keep registration order.
    pub fn freeze(mut self) -> FrozenPatternSet {
        self.patterns
            .sort_by_key(|pattern| std::cmp::Reverse(pattern.benefit()));
        let mut by_kind: HashMap<OpKind, Vec<usize>> = HashMap::new();
        let mut any_kind = Vec::new();
        for (idx, pattern) in self.patterns.iter().enumerate() {
            match pattern.root_kind() {
                Some(kind) => by_kind.entry(kind).or_default().push(idx),
                None => any_kind.push(idx),
            }
        }
        FrozenPatternSet {
            patterns: self.patterns,
            by_kind,
            any_kind,
        }
    }
}

impl Default for PatternSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable collection of rewrite patterns ready for use by the driver.
pub struct FrozenPatternSet {
    patterns: Vec<Box<dyn Pattern>>,
    by_kind: HashMap<OpKind, Vec<usize>>,
    any_kind: Vec<usize>,
}

impl FrozenPatternSet {
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &dyn Pattern)> {
        self.patterns.iter().enumerate().map(|(idx, p)| (idx, &**p))
    }

    pub fn get(&self, idx: usize) -> Option<&dyn Pattern> {
        self.patterns.get(idx).map(|p| &**p)
    }

    /// Patterns applicable to `kind`, highest benefit first.
    pub fn matching(&self, kind: OpKind) -> impl Iterator<Item = (usize, &dyn Pattern)> + '_ {
        let rooted = self.by_kind.get(&kind).map(Vec::as_slice).unwrap_or(&[]);
        MergeAscending {
            left: rooted,
            right: &self.any_kind,
        }
        .map(move |idx| (idx, &*self.patterns[idx]))
    }
}

/// Merges two ascending index lists; both index into the benefit-sorted pattern vector.
struct MergeAscending<'a> {
    left: &'a [usize],
    right: &'a [usize],
}

impl Iterator for MergeAscending<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let take_left = match (self.left.first(), self.right.first()) {
            (Some(l), Some(r)) => l < r,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => return None,
        };
        let (head, rest) = if take_left {
            self.left.split_first()?
        } else {
            self.right.split_first()?
        };
        if take_left {
            self.left = rest;
        } else {
            self.right = rest;
        }
        Some(*head)
    }
}

#[macro_export]
macro_rules! register_patterns_for_view {
    ($set:expr, $view:ty, $($pattern:expr),+ $(,)?) => {{
        $( $set.insert_view::<$view, _>($pattern); )+
    }};
}
