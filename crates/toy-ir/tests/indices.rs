use toy_ir::index::{DefId, FunctionIndexError, FunctionIndices, InstId};
use toy_ir::ir_utils::f64_tensor;
use toy_ir::spec::{Instruction, Location, Operation, ValueId};
use toy_ir::toy_program;
use toy_ir::Function;

fn sample() -> Function {
    toy_program!(
        r#"
func @main(%x: tensor<f64, 2x2>, %y: tensor<f64, 2x2>) -> tensor<f64, 2x2> {
  %a = add %x, %x -> tensor<f64, 2x2>
  %b = mul %a, %y -> tensor<f64, 2x2>
  %c = add %a, %b -> tensor<f64, 2x2>
  return %c
}
"#
    )
    .functions
    .remove(0)
}

#[test]
fn indexes_definitions_and_distinct_users() {
    let func = sample();
    let indices = FunctionIndices::build(&func).expect("valid function");
    let [x, y] = [func.parameter_ids[0], func.parameter_ids[1]];
    let [a, b, c] = [func.body[0].id, func.body[1].id, func.body[2].id];

    assert_eq!(indices.len(), 3);
    assert_eq!(indices.ordered_inst_ids(), vec![InstId(0), InstId(1), InstId(2)]);
    assert_eq!(indices.def_of(x), Some(DefId::Param { index: 0 }));
    assert_eq!(indices.def_of(y), Some(DefId::Param { index: 1 }));
    assert_eq!(indices.def_of(b), Some(DefId::Inst(InstId(1))));
    assert_eq!(indices.value_of_def(DefId::Param { index: 1 }), Some(y));
    assert_eq!(indices.value_of_def(DefId::Inst(InstId(2))), Some(c));
    assert_eq!(indices.def_of(ValueId(77)), None);

    // `add %x, %x` counts once as a user of `%x`.
    assert_eq!(indices.users_of(x), &[InstId(0)]);
    assert_eq!(indices.users_of(a), &[InstId(1), InstId(2)]);
    assert!(indices.users_of(c).is_empty());
    assert_eq!(indices.type_of(a), Some(&f64_tensor(&[2, 2])));
    assert_eq!(indices.position(InstId(2)), Some(2));
    assert_eq!(indices.version(InstId(0)), Some(0));
}

#[test]
fn rejects_use_before_definition() {
    let mut func = sample();
    func.body.swap(0, 1);
    assert_eq!(
        FunctionIndices::build(&func).expect_err("use before def"),
        FunctionIndexError::MissingValueDefinition { value: func.body[1].id }
    );
}

#[test]
fn rejects_duplicate_values() {
    let mut func = sample();
    let duplicate = func.parameter_ids[0];
    func.body.push(Instruction {
        id: duplicate,
        op: Operation::Add,
        operands: vec![duplicate, duplicate],
        output: f64_tensor(&[2, 2]),
        loc: Location::Unknown,
    });
    assert_eq!(
        FunctionIndices::build(&func).expect_err("duplicate value"),
        FunctionIndexError::DuplicateValue { value: duplicate }
    );
}

#[test]
fn rejects_inconsistent_signatures() {
    let mut func = sample();
    func.results.push(f64_tensor(&[2, 2]));
    assert!(matches!(
        FunctionIndices::build(&func),
        Err(FunctionIndexError::SignatureMismatch {
            what: "results",
            ids: 1,
            types: 2
        })
    ));

    let mut func = sample();
    func.results[0] = f64_tensor(&[4]);
    assert!(matches!(
        FunctionIndices::build(&func),
        Err(FunctionIndexError::ResultTypeMismatch { .. })
    ));

    let mut func = sample();
    func.result_ids[0] = ValueId(42);
    assert_eq!(
        FunctionIndices::build(&func).expect_err("unknown result"),
        FunctionIndexError::MissingValueDefinition { value: ValueId(42) }
    );
}
