use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use toy_ir::driver::{apply_patterns_and_fold_greedily, GreedyConfig};
use toy_ir::index::InstId;
use toy_ir::pattern::{
    AddOpView, ConstantOpView, MulOpView, OpRewritePattern, OperationView, PatternSet,
    PrintOpView, TransposeOpView,
};
use toy_ir::register_patterns_for_view;
use toy_ir::rewriter::{ProgramRewriter, RewriteError};
use toy_ir::spec::{Function, Location, OpKind};
use toy_ir::text_ir::parse_program_with_symbols;
use toy_ir::ValueId;

const SRC: &str = r#"
func @main(%x: tensor<f64, 2>) -> tensor<f64, 2> {
  %z = constant value[0, 0] -> tensor<f64, 2> loc("views.toy":1:1)
  %a = add %x, %z -> tensor<f64, 2> loc("views.toy":2:1)
  %m = mul %a, %a -> tensor<f64, 2>
  %p = print %m -> none loc("views.toy":4:1)
  return %m
}
"#;

/// add(x, constant 0) -> x
struct FoldAddOfZeros;

impl OpRewritePattern<AddOpView> for FoldAddOfZeros {
    fn may_match(&self, op: &AddOpView, rewriter: &ProgramRewriter) -> bool {
        op.operands
            .get(1)
            .and_then(|rhs| rewriter.inst_of(*rhs))
            .is_some_and(|inst| rewriter.op(inst).map(|op| op.kind()) == Some(OpKind::Constant))
    }

    fn match_and_rewrite(
        &self,
        op: AddOpView,
        rewriter: &mut ProgramRewriter,
    ) -> Result<bool, RewriteError> {
        let &[lhs, rhs] = op.operands.as_slice() else {
            return Ok(false);
        };
        let Some(constant) = rewriter
            .inst_of(rhs)
            .and_then(|inst| ConstantOpView::extract(inst, rewriter))
        else {
            return Ok(false);
        };
        if constant.literal.values.iter().any(|v| *v != 0.0) {
            return Ok(false);
        }
        rewriter.replace_op(op.root, &[lhs])?;
        Ok(true)
    }
}

struct CountLocated {
    seen: Arc<AtomicUsize>,
}

impl OpRewritePattern<Location> for CountLocated {
    fn match_and_rewrite(
        &self,
        _loc: Location,
        _rewriter: &mut ProgramRewriter,
    ) -> Result<bool, RewriteError> {
        self.seen.fetch_add(1, Ordering::SeqCst);
        Ok(false)
    }
}

fn known_location(root: InstId, rewriter: &ProgramRewriter) -> Option<Location> {
    rewriter.location(root).filter(|loc| loc.is_known()).cloned()
}

fn parse() -> (Function, HashMap<String, ValueId>) {
    let parsed = parse_program_with_symbols(SRC).expect("parse");
    let mut program = parsed.program;
    (program.functions.remove(0), parsed.value_names)
}

#[test]
fn views_extract_only_their_kind() {
    let (mut func, names) = parse();
    let rewriter = ProgramRewriter::new(&mut func).expect("index");
    let z = rewriter.inst_of(names["z"]).expect("z");
    let a = rewriter.inst_of(names["a"]).expect("a");
    let m = rewriter.inst_of(names["m"]).expect("m");
    let p = rewriter.inst_of(names["p"]).expect("p");

    let constant = ConstantOpView::extract(z, &rewriter).expect("constant view");
    assert_eq!(constant.literal.len(), 2);
    assert_eq!(constant.result, names["z"]);
    assert!(ConstantOpView::extract(a, &rewriter).is_none());

    let add = AddOpView::extract(a, &rewriter).expect("add view");
    assert_eq!(add.operands, vec![names["x"], names["z"]]);
    assert_eq!(add.input(), None);
    assert_eq!(add.loc, Location::new("views.toy", 2, 1));

    let mul = MulOpView::extract(m, &rewriter).expect("mul view");
    assert_eq!(mul.result_type, *rewriter.type_of(names["a"]).expect("type"));
    assert!(TransposeOpView::extract(m, &rewriter).is_none());

    let print = PrintOpView::extract(p, &rewriter).expect("print view");
    assert_eq!(print.input(), Some(names["m"]));
    assert_eq!(<PrintOpView as OperationView>::KIND, OpKind::Print);
}

#[test]
fn user_patterns_plug_into_the_driver() {
    let (mut func, names) = parse();
    let mut set = PatternSet::new();
    register_patterns_for_view!(set, AddOpView, FoldAddOfZeros);
    let patterns = set.freeze();
    assert_eq!(patterns.get(0).map(|p| p.name().to_string()).as_deref(), Some("FoldAddOfZeros"));

    let stats = apply_patterns_and_fold_greedily(&mut func, &patterns, &GreedyConfig::default())
        .expect("driver run");
    assert_eq!(stats.applied, 1);
    assert_eq!(func.count_of(OpKind::Add), 0);
    assert_eq!(func.count_of(OpKind::Constant), 0);
    let mul = func
        .body
        .iter()
        .find(|inst| inst.op.kind() == OpKind::Mul)
        .expect("mul survives");
    assert_eq!(mul.operands, vec![names["x"], names["x"]]);
}

#[test]
fn match_any_patterns_see_every_operation() {
    let (mut func, _) = parse();
    let seen = Arc::new(AtomicUsize::new(0));
    let mut set = PatternSet::new();
    set.insert_match_any::<_, Location>(CountLocated { seen: seen.clone() }, known_location);
    let patterns = set.freeze();
    for kind in OpKind::ALL {
        assert_eq!(patterns.matching(kind).count(), 1, "{kind}");
    }

    let stats = apply_patterns_and_fold_greedily(&mut func, &patterns, &GreedyConfig::default())
        .expect("driver run");
    assert!(!stats.changed());
    // Three operations carry a location; the extractor turns the others away.
    assert_eq!(seen.load(Ordering::SeqCst), 3);
    assert_eq!(patterns.get(0).map(|p| p.name().to_string()).as_deref(), Some("CountLocated"));
}
