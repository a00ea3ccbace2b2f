use std::collections::HashMap;

use toy_ir::index::{DefId, InstId};
use toy_ir::ir_utils::f64_tensor;
use toy_ir::rewriter::{NewOp, ProgramRewriter, RewriteError};
use toy_ir::spec::{Function, Location, OpKind, Operation, ValueId};
use toy_ir::text_ir::parse_program_with_symbols;

fn parse(src: &str) -> (Function, HashMap<String, ValueId>) {
    let parsed = parse_program_with_symbols(src).expect("parse program");
    let mut program = parsed.program;
    (program.functions.remove(0), parsed.value_names)
}

const CHAIN: &str = r#"
func @main(%x: tensor<f64, 2x3>, %y: tensor<f64, 2x3>) -> tensor<f64, 2x3> {
  %t0 = transpose %x -> tensor<f64, 3x2> loc("chain.toy":1:1)
  %t1 = transpose %t0 -> tensor<f64, 2x3> loc("chain.toy":2:1)
  %s = add %t1, %t1 -> tensor<f64, 2x3> loc("chain.toy":3:1)
  %m = mul %s, %y -> tensor<f64, 2x3> loc("chain.toy":4:1)
  return %m
}
"#;

#[test]
fn replace_op_forwards_uses_and_erases_root() {
    let (mut func, names) = parse(CHAIN);
    {
        let mut rewriter = ProgramRewriter::new(&mut func).expect("index");
        let t1 = rewriter.inst_of(names["t1"]).expect("t1 inst");
        let s = rewriter.inst_of(names["s"]).expect("s inst");
        let version = rewriter.version(s);

        rewriter.replace_op(t1, &[names["x"]]).expect("replace");

        assert!(!rewriter.contains(t1));
        assert_eq!(rewriter.operands(s), Some(&[names["x"], names["x"]][..]));
        assert_eq!(rewriter.users_of(names["x"]).len(), 2);
        assert!(rewriter.users_of(names["t0"]).is_empty());
        assert_ne!(rewriter.version(s), version);
        assert!(rewriter.verify());
    }
    assert_eq!(func.body.len(), 3);
    assert_eq!(func.count_of(OpKind::Transpose), 1);
}

#[test]
fn replace_op_rejects_invalid_replacements_without_mutation() {
    let (mut func, names) = parse(CHAIN);
    let before = func.clone();
    {
        let mut rewriter = ProgramRewriter::new(&mut func).expect("index");
        let t0 = rewriter.inst_of(names["t0"]).expect("t0 inst");
        let t1 = rewriter.inst_of(names["t1"]).expect("t1 inst");
        let s = rewriter.inst_of(names["s"]).expect("s inst");

        assert!(matches!(
            rewriter.replace_op(t0, &[names["x"]]),
            Err(RewriteError::TypeMismatch { .. })
        ));
        assert_eq!(
            rewriter.replace_op(t1, &[]),
            Err(RewriteError::ResultCountMismatch {
                expected: 1,
                found: 0
            })
        );
        assert_eq!(
            rewriter.replace_op(t1, &[names["x"], names["y"]]),
            Err(RewriteError::ResultCountMismatch {
                expected: 1,
                found: 2
            })
        );
        assert_eq!(
            rewriter.replace_op(t1, &[names["t1"]]),
            Err(RewriteError::SelfReplacement { value: names["t1"] })
        );
        // `%m` is defined after `%s`'s users, so it cannot stand in for `%s`.
        assert_eq!(
            rewriter.replace_op(s, &[names["m"]]),
            Err(RewriteError::NotDominating {
                value: names["m"],
                at: rewriter.inst_of(names["m"]).expect("m inst"),
            })
        );
        assert_eq!(
            rewriter.replace_op(InstId(99), &[names["x"]]),
            Err(RewriteError::UnknownInst { inst: InstId(99) })
        );
        assert_eq!(
            rewriter.replace_op(t1, &[ValueId(1000)]),
            Err(RewriteError::UnknownValue { value: ValueId(1000) })
        );
    }
    assert_eq!(func, before);
}

#[test]
fn replace_op_with_new_inherits_location_and_position() {
    let (mut func, names) = parse(CHAIN);
    let new_value;
    {
        let mut rewriter = ProgramRewriter::new(&mut func).expect("index");
        let s = rewriter.inst_of(names["s"]).expect("s inst");
        new_value = rewriter
            .replace_op_with_new(
                s,
                NewOp::new(Operation::Mul, vec![names["x"], names["y"]], f64_tensor(&[2, 3])),
            )
            .expect("replace with new");

        let new_inst = rewriter.inst_of(new_value).expect("new inst");
        assert_eq!(
            rewriter.location(new_inst),
            Some(&Location::new("chain.toy", 3, 1))
        );
        assert_eq!(rewriter.def_of(new_value), Some(DefId::Inst(new_inst)));
        assert!(!rewriter.contains(s));
        let m = rewriter.inst_of(names["m"]).expect("m inst");
        assert_eq!(rewriter.operands(m), Some(&[new_value, names["y"]][..]));
        assert!(rewriter.verify());
    }
    let kinds: Vec<_> = func.body.iter().map(|inst| inst.op.kind()).collect();
    assert_eq!(
        kinds,
        vec![OpKind::Transpose, OpKind::Transpose, OpKind::Mul, OpKind::Mul]
    );
    assert_eq!(func.body[2].id, new_value);
    assert!(new_value.0 > names.values().map(|id| id.0).max().unwrap_or(0));
}

#[test]
fn replace_op_with_new_validates_before_inserting() {
    let (mut func, names) = parse(CHAIN);
    let before = func.clone();
    {
        let mut rewriter = ProgramRewriter::new(&mut func).expect("index");
        let s = rewriter.inst_of(names["s"]).expect("s inst");

        assert!(matches!(
            rewriter.replace_op_with_new(
                s,
                NewOp::new(Operation::Transpose, vec![names["x"]], f64_tensor(&[3, 2])),
            ),
            Err(RewriteError::TypeMismatch { .. })
        ));
        assert_eq!(
            rewriter.replace_op_with_new(
                s,
                NewOp::new(Operation::Add, vec![names["x"]], f64_tensor(&[2, 3])),
            ),
            Err(RewriteError::ArityMismatch {
                kind: OpKind::Add,
                expected: 2,
                found: 1
            })
        );
        assert_eq!(
            rewriter.replace_op_with_new(
                s,
                NewOp::new(Operation::Add, vec![names["m"], names["y"]], f64_tensor(&[2, 3])),
            ),
            Err(RewriteError::NotDominating {
                value: names["m"],
                at: s
            })
        );
    }
    assert_eq!(func, before);
}

#[test]
fn replace_all_uses_rewires_results() {
    let (mut func, names) = parse(
        r#"
func @main(%x: tensor<f64, 4>) -> (tensor<f64, 4>, tensor<f64, 4>) {
  %a = add %x, %x -> tensor<f64, 4>
  %b = mul %a, %x -> tensor<f64, 4>
  return %a, %b
}
"#,
    );
    {
        let mut rewriter = ProgramRewriter::new(&mut func).expect("index");
        rewriter
            .replace_all_uses(names["a"], names["x"])
            .expect("replace uses");
        assert!(rewriter.is_result(names["x"]));
        assert!(!rewriter.is_result(names["a"]));
        assert!(rewriter.users_of(names["a"]).is_empty());

        let a = rewriter.inst_of(names["a"]).expect("a inst");
        rewriter.erase_inst(a).expect("erase dead add");
        assert!(rewriter.verify());
    }
    assert_eq!(func.result_ids, vec![names["x"], names["b"]]);
    assert_eq!(func.body.len(), 1);
    assert_eq!(func.body[0].operands, vec![names["x"], names["x"]]);
}

#[test]
fn erase_refuses_live_values() {
    let (mut func, names) = parse(CHAIN);
    let mut rewriter = ProgramRewriter::new(&mut func).expect("index");
    let t1 = rewriter.inst_of(names["t1"]).expect("t1 inst");
    let m = rewriter.inst_of(names["m"]).expect("m inst");

    assert_eq!(
        rewriter.erase_inst(t1),
        Err(RewriteError::LiveUses { inst: t1, users: 1 })
    );
    assert_eq!(
        rewriter.erase_inst(m),
        Err(RewriteError::ReturnedValue { inst: m })
    );
    assert!(rewriter.contains(t1));
    assert!(rewriter.contains(m));
}

#[test]
fn insert_before_checks_dominance_and_keeps_ids_stable() {
    let (mut func, names) = parse(CHAIN);
    let mut rewriter = ProgramRewriter::new(&mut func).expect("index");
    let t0 = rewriter.inst_of(names["t0"]).expect("t0 inst");
    let m = rewriter.inst_of(names["m"]).expect("m inst");

    assert_eq!(
        rewriter.insert_before(t0, Operation::Print, vec![names["s"]], toy_ir::ValueType::None),
        Err(RewriteError::NotDominating {
            value: names["s"],
            at: t0
        })
    );

    let (print, value) = rewriter
        .insert_before(m, Operation::Print, vec![names["s"]], toy_ir::ValueType::None)
        .expect("insert print");
    assert_eq!(rewriter.value_of(print), Some(value));
    assert_eq!(rewriter.location(print), Some(&Location::new("chain.toy", 4, 1)));
    assert_eq!(rewriter.insts_in_order().last(), Some(&m));
    assert_eq!(rewriter.insts_in_order().len(), 5);
    assert_eq!(rewriter.inst_of(names["t0"]), Some(t0));
    assert!(rewriter.users_of(names["s"]).contains(&print));
}

#[test]
fn materialize_constant_defines_literal() {
    let (mut func, names) = parse(CHAIN);
    let mut rewriter = ProgramRewriter::new(&mut func).expect("index");
    let t0 = rewriter.inst_of(names["t0"]).expect("t0 inst");
    let literal = toy_ir::ir_utils::tensor_literal(
        toy_ir::ir_utils::tensor_spec(toy_ir::DType::F64, &[2]),
        vec![1.0, 2.0],
    )
    .expect("literal");

    let (inst, value) = rewriter
        .materialize_constant(t0, literal.clone())
        .expect("materialize");
    assert_eq!(rewriter.op(inst), Some(&Operation::Constant(literal)));
    assert_eq!(rewriter.type_of(value), Some(&f64_tensor(&[2])));
    assert_eq!(rewriter.insts_in_order().first(), Some(&inst));
    assert_eq!(rewriter.op_of_def(DefId::Inst(inst)).map(Operation::kind), Some(OpKind::Constant));
    assert_eq!(rewriter.op_of_def(DefId::Param { index: 0 }), None);
}
