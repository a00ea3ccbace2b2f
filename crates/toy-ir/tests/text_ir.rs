use toy_ir::spec::{Location, OpKind, Operation, Program, ProgramSerdeError, IR_VERSION};
use toy_ir::text_ir::{parse_function, parse_program, parse_program_with_symbols, TextIrError};

const SAMPLE: &str = r#"
// Two functions; the first is the entry.
func @main(%x: tensor<f64, 2x3>) -> (tensor<f64, 3x2>, tensor<f64, 6>) {
  %c = constant value[1, 2, 3, 4, 5, 6] -> tensor<f64, 2x3>
  %s = add %x, %c -> tensor<f64, 2x3> loc("main.toy":3:5)
  %t = transpose %s -> tensor<f64, 3x2>
  %r = reshape %s -> tensor<f64, 6> // flatten
  %p = print %t -> none
  return %t, %r
}

func @helper(%a: tensor<f32>) -> tensor<f32> {
  %m = mul %a, %a -> tensor<f32>
  return %m
}
"#;

#[test]
fn parses_functions_and_symbols() {
    let parsed = parse_program_with_symbols(SAMPLE).expect("parse");
    let program = &parsed.program;
    assert_eq!(program.entry, "main");
    assert_eq!(program.functions.len(), 2);

    let main = program.entry_function().expect("entry");
    assert_eq!(main.parameters.len(), 1);
    assert_eq!(main.results.len(), 2);
    assert_eq!(main.body.len(), 5);
    assert_eq!(main.count_of(OpKind::Transpose), 1);
    assert_eq!(main.result_ids, vec![parsed.value_names["t"], parsed.value_names["r"]]);
    assert_eq!(main.body[1].loc, Location::new("main.toy", 3, 5));
    assert_eq!(main.body[2].loc, Location::Unknown);
    match &main.body[0].op {
        Operation::Constant(literal) => {
            assert_eq!(literal.len(), 6);
            assert_eq!(literal.values[5], 6.0);
        }
        other => panic!("expected constant, got {other:?}"),
    }

    let helper = &program.functions[1];
    assert_eq!(helper.name, "helper");
    assert_eq!(helper.parameters[0].to_string(), "tensor<f32>");
}

#[test]
fn printed_text_parses_back_to_the_same_function() {
    let program = parse_program(SAMPLE).expect("parse");
    let reparsed = parse_program(&program.to_text()).expect("reparse printed text");
    assert_eq!(reparsed.functions.len(), program.functions.len());
    for (original, again) in program.functions.iter().zip(&reparsed.functions) {
        assert_eq!(original.to_canonical_text(), again.to_canonical_text());
        assert_eq!(original.to_text(), again.to_text());
    }
}

#[test]
fn canonical_text_ignores_value_numbering() {
    let mut func = parse_function(
        r#"
func @f(%x: tensor<f64, 2>) -> tensor<f64, 2> {
  %a = add %x, %x -> tensor<f64, 2>
  return %a
}
"#,
    )
    .expect("parse");
    let canonical = func.to_canonical_text();
    let x = func.parameter_ids[0];
    let renamed = toy_ir::ValueId(40);
    func.body[0].id = renamed;
    func.result_ids = vec![renamed];
    func.parameter_ids = vec![toy_ir::ValueId(7)];
    func.body[0].operands = vec![toy_ir::ValueId(7); 2];
    assert_ne!(x, toy_ir::ValueId(7));
    assert_eq!(func.to_canonical_text(), canonical);
    assert!(canonical.contains("%1 = add %0, %0 -> tensor<f64, 2>"));
}

#[test]
fn empty_results_print_as_bare_return() {
    let func = parse_function(
        r#"
func @show(%x: tensor<f64, 2>) -> () {
  %p = print %x -> none
  return
}
"#,
    )
    .expect("parse");
    let text = func.to_text();
    assert!(text.contains("-> () {"), "{text}");
    assert!(text.contains("  return\n"), "{text}");
    assert_eq!(parse_function(&text).expect("reparse"), func);
}

#[test]
fn reports_malformed_statements() {
    let cases = [
        (
            "func @f(%x: tensor<f64, 2>) -> tensor<f64, 2> {\n  %y = frobnicate %x -> tensor<f64, 2>\n  return %y\n}",
            "unknown operation",
        ),
        (
            "func @f(%x: tensor<f64, 2>) -> tensor<f64, 2> {\n  %y = add %x -> tensor<f64, 2>\n  return %y\n}",
            "expects 2 operands",
        ),
        (
            "func @f(%x: tensor<f64, 2>) -> tensor<f64, 2> {\n  %y = constant value[1] -> tensor<f64, 2>\n  return %y\n}",
            "needs 2 values",
        ),
        (
            "func @f(%x: tensor<f64, 2>) -> tensor<f64, 2> {\n  %y = transpose %z -> tensor<f64, 2>\n  return %y\n}",
            "unknown operand",
        ),
        (
            "func @f(%x: tensor<f64, 2>) -> tensor<f64, 2> {\n  return %x\n  %y = transpose %x -> tensor<f64, 2>\n}",
            "must be the last statement",
        ),
        (
            "func @f(%x: tensor<f64, 2>) -> tensor<f64, 3> {\n  return %x\n}",
            "declared result types",
        ),
        (
            "func @f(%x: tensor<i8, 2>) -> tensor<i8, 2> {\n  return %x\n}",
            "unsupported dtype",
        ),
    ];
    for (src, needle) in cases {
        let err = parse_program(src).expect_err(needle);
        assert!(err.to_string().contains(needle), "`{err}` lacks `{needle}`");
    }
}

#[test]
fn errors_carry_line_numbers() {
    let src = "func @f(%x: tensor<f64, 2>) -> tensor<f64, 2> {\n  %a = add %x, %x -> tensor<f64, 2>\n  %b = add %a -> tensor<f64, 2>\n  return %b\n}";
    match parse_program(src) {
        Err(TextIrError::AtLine { line, .. }) => assert_eq!(line, 3),
        other => panic!("expected a line-tagged error, got {other:?}"),
    }
}

#[test]
fn json_round_trip_preserves_program() -> anyhow::Result<()> {
    let program = parse_program(SAMPLE)?;
    let json = program.to_json_string()?;
    let restored = Program::from_json_str(&json)?;
    assert_eq!(restored, program);
    assert_eq!(restored.ir_version, IR_VERSION);

    let path = std::env::temp_dir().join(format!("toy-ir-{}.json", std::process::id()));
    program.save_json(&path)?;
    let loaded = Program::load_json(&path)?;
    std::fs::remove_file(&path)?;
    assert_eq!(loaded, program);
    Ok(())
}

#[test]
fn json_rejects_foreign_ir_version() -> anyhow::Result<()> {
    let program = parse_program(SAMPLE)?;
    let json = program
        .to_json_string()?
        .replace(IR_VERSION, "toy.v0");
    match Program::from_json_str(&json) {
        Err(ProgramSerdeError::VersionMismatch { found, .. }) => assert_eq!(found, "toy.v0"),
        other => panic!("expected a version mismatch, got {other:?}"),
    }
    Ok(())
}
