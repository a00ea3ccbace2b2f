use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::ir_utils;
use crate::spec::{
    DType, Function, Location, OpKind, Operation, Program, ProgramBuilder, TensorLiteral, ValueId,
    ValueType,
};

/// Errors raised while parsing the text format.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TextIrError {
    #[error("{0}")]
    Message(String),
    #[error("line {line}: {message}")]
    AtLine { line: usize, message: String },
}

impl TextIrError {
    fn new(msg: impl Into<String>) -> Self {
        TextIrError::Message(msg.into())
    }

    fn at_line(self, line: usize) -> Self {
        match self {
            TextIrError::Message(message) => TextIrError::AtLine { line, message },
            other => other,
        }
    }
}

/// Parses one or more functions written in a compact MLIR-inspired syntax.
///
/// The first function becomes the program entry.
///
/// # Example
/// ```
/// use toy_ir::text_ir::parse_program;
///
/// let program = parse_program(r#"
/// func @main(%x: tensor<f64, 2x3>) -> tensor<f64, 2x3> {
///   %t0 = transpose %x -> tensor<f64, 3x2>
///   %t1 = transpose %t0 -> tensor<f64, 2x3>
///   return %t1
/// }
/// "#).expect("valid program");
/// assert_eq!(program.entry, "main");
/// assert_eq!(program.functions[0].body.len(), 2);
/// ```
pub fn parse_program(src: &str) -> Result<Program, TextIrError> {
    parse_program_with_symbols(src).map(|parsed| parsed.program)
}

/// Parses a program and keeps the mapping from textual value names of the entry function to
/// SSA identifiers.
pub fn parse_program_with_symbols(src: &str) -> Result<ParsedProgram, TextIrError> {
    let chunks = split_functions(src)?;
    let mut functions = Vec::with_capacity(chunks.len());
    let mut entry_names = None;
    for chunk in chunks {
        let (function, names) = FunctionParser::new(chunk).parse()?;
        if entry_names.is_none() {
            entry_names = Some(names);
        }
        functions.push(function);
    }
    let entry = functions
        .first()
        .map(|f| f.name.clone())
        .ok_or_else(|| TextIrError::new("input is empty"))?;
    Ok(ParsedProgram {
        program: Program::new(entry).with_functions(functions),
        value_names: entry_names.unwrap_or_default(),
    })
}

/// Parses source containing exactly one function.
pub fn parse_function(src: &str) -> Result<Function, TextIrError> {
    let mut program = parse_program(src)?;
    if program.functions.len() != 1 {
        return Err(TextIrError::new(format!(
            "expected a single function, found {}",
            program.functions.len()
        )));
    }
    program
        .functions
        .pop()
        .ok_or_else(|| TextIrError::new("input is empty"))
}

/// Program paired with the mapping from textual value names to SSA identifiers.
#[derive(Debug, Clone)]
pub struct ParsedProgram {
    pub program: Program,
    pub value_names: HashMap<String, ValueId>,
}

/// A function's source slice together with the line it starts on.
struct FunctionChunk<'a> {
    header: &'a str,
    body: &'a str,
    body_line: usize,
}

fn split_functions(src: &str) -> Result<Vec<FunctionChunk<'_>>, TextIrError> {
    let mut chunks = Vec::new();
    let mut rest = src;
    let mut consumed = 0usize;
    loop {
        let trimmed = rest.trim_start();
        if trimmed.is_empty() {
            break;
        }
        consumed += rest.len() - trimmed.len();
        let open = trimmed
            .find('{')
            .ok_or_else(|| TextIrError::new("missing `{` to start function body"))?;
        let close = trimmed[open..]
            .find('}')
            .map(|offset| open + offset)
            .ok_or_else(|| TextIrError::new("missing `}` to end function body"))?;
        let body_line = src[..consumed + open].matches('\n').count() + 1;
        chunks.push(FunctionChunk {
            header: trimmed[..open].trim(),
            body: &trimmed[open + 1..close],
            body_line,
        });
        consumed += close + 1;
        rest = &trimmed[close + 1..];
    }
    if chunks.is_empty() {
        return Err(TextIrError::new("input is empty"));
    }
    Ok(chunks)
}

struct FunctionParser<'a> {
    chunk: FunctionChunk<'a>,
}

impl<'a> FunctionParser<'a> {
    fn new(chunk: FunctionChunk<'a>) -> Self {
        Self { chunk }
    }

    fn parse(&self) -> Result<(Function, HashMap<String, ValueId>), TextIrError> {
        let (name, params, result_ty) = parse_function_header(self.chunk.header)?;
        let mut builder = ProgramBuilder::new();
        let mut value_map: HashMap<String, ValueId> = HashMap::new();

        for Parameter { name, ty } in params {
            let parsed_ty = parse_type(&ty)?;
            let id = builder.add_parameter(parsed_ty);
            if value_map.insert(name.clone(), id).is_some() {
                return Err(TextIrError::new(format!("duplicate parameter `%{name}`")));
            }
        }

        let results = self.parse_body(&mut builder, &mut value_map)?;
        let expected_results = parse_result_types(&result_ty)?;
        let result_ids = results
            .into_iter()
            .map(|name| {
                value_map
                    .get(&name)
                    .copied()
                    .ok_or_else(|| TextIrError::new(format!("unknown return value `%{name}`")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let function = builder
            .finish(name, result_ids)
            .map_err(|err| TextIrError::new(err.to_string()))?;
        if function.results != expected_results {
            return Err(TextIrError::new(
                "declared result types do not match returned value types",
            ));
        }
        Ok((function, value_map))
    }

    fn parse_body(
        &self,
        builder: &mut ProgramBuilder,
        value_map: &mut HashMap<String, ValueId>,
    ) -> Result<Vec<String>, TextIrError> {
        let mut return_values: Option<Vec<String>> = None;

        for (offset, line) in self.chunk.body.lines().enumerate() {
            let line_no = self.chunk.body_line + offset;
            let statement = strip_comment(line).trim();
            if statement.is_empty() {
                continue;
            }
            if return_values.is_some() {
                return Err(
                    TextIrError::new("`return` must be the last statement").at_line(line_no)
                );
            }
            if let Some(values) = statement.strip_prefix("return") {
                let values = values.trim().trim_end_matches(';');
                return_values = Some(
                    split_top_level(values, ',')
                        .into_iter()
                        .map(normalize_value_name)
                        .collect(),
                );
                continue;
            }
            parse_statement(statement, builder, value_map).map_err(|err| err.at_line(line_no))?;
        }

        return_values.ok_or_else(|| {
            TextIrError::new("function body must end with a `return` statement")
        })
    }
}

fn parse_statement(
    statement: &str,
    builder: &mut ProgramBuilder,
    value_map: &mut HashMap<String, ValueId>,
) -> Result<(), TextIrError> {
    let (result_name_raw, rest) = statement
        .split_once('=')
        .ok_or_else(|| TextIrError::new("statements must be of the form `%result = ...`"))?;
    let result_name = normalize_value_name(result_name_raw);
    if result_name.is_empty() {
        return Err(TextIrError::new("result identifier cannot be empty"));
    }
    if value_map.contains_key(&result_name) {
        return Err(TextIrError::new(format!("value `%{result_name}` is redefined")));
    }

    let (op_name, remainder) = parse_op_name(rest.trim())?;
    let kind = OpKind::from_name(op_name)
        .ok_or_else(|| TextIrError::new(format!("unknown operation `{op_name}`")))?;
    let (operands_section, type_section) = remainder
        .split_once("->")
        .ok_or_else(|| TextIrError::new("operations must specify result type with `->`"))?;
    let (type_section, loc) = split_location(type_section)?;
    let result_type = parse_type(type_section)?;
    let (operand_names, value_attr) = parse_operands_and_value(operands_section)?;

    let operands = operand_names
        .iter()
        .map(|name| {
            value_map
                .get(name)
                .copied()
                .ok_or_else(|| TextIrError::new(format!("unknown operand `%{name}`")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if operands.len() != kind.arity() {
        return Err(TextIrError::new(format!(
            "`{kind}` expects {} operands, got {}",
            kind.arity(),
            operands.len()
        )));
    }

    let operation = match kind {
        OpKind::Constant => {
            let raw = value_attr
                .ok_or_else(|| TextIrError::new("`constant` requires a `value[...]` attribute"))?;
            Operation::Constant(parse_literal(raw, &result_type)?)
        }
        _ if value_attr.is_some() => {
            return Err(TextIrError::new(format!(
                "`{kind}` does not take a `value[...]` attribute"
            )));
        }
        OpKind::Transpose => Operation::Transpose,
        OpKind::Reshape => Operation::Reshape,
        OpKind::Add => Operation::Add,
        OpKind::Mul => Operation::Mul,
        OpKind::Print => Operation::Print,
    };

    let id = builder.emit_at(operation, operands, result_type, loc);
    value_map.insert(result_name, id);
    Ok(())
}

fn strip_comment(line: &str) -> &str {
    match line.find("//") {
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn normalize_value_name(name: &str) -> String {
    name.trim().trim_start_matches('%').to_string()
}

struct Parameter {
    name: String,
    ty: String,
}

fn parse_function_header(header: &str) -> Result<(String, Vec<Parameter>, String), TextIrError> {
    // Comments between functions end up in front of the next header.
    let header = header
        .lines()
        .map(strip_comment)
        .collect::<Vec<_>>()
        .join(" ");
    let header = header
        .trim()
        .strip_prefix("func")
        .ok_or_else(|| TextIrError::new("function header must start with `func`"))?
        .trim_start();
    let open_paren = header
        .find('(')
        .ok_or_else(|| TextIrError::new("missing `(` in function header"))?;
    let close_paren = find_matching(header, open_paren, '(', ')')
        .ok_or_else(|| TextIrError::new("missing `)` to close parameter list"))?;

    let name_section = header[..open_paren].trim();
    let name = name_section
        .strip_prefix('@')
        .unwrap_or(name_section)
        .trim();
    if name.is_empty() {
        return Err(TextIrError::new("function name cannot be empty"));
    }
    let params = parse_parameters(&header[open_paren + 1..close_paren])?;

    let result_ty = header[close_paren + 1..]
        .trim()
        .strip_prefix("->")
        .ok_or_else(|| TextIrError::new("missing `->` and return type in header"))?
        .trim()
        .to_string();

    Ok((name.to_string(), params, result_ty))
}

fn parse_parameters(params: &str) -> Result<Vec<Parameter>, TextIrError> {
    split_top_level(params, ',')
        .into_iter()
        .map(|decl| {
            let (name, ty) = decl
                .split_once(':')
                .ok_or_else(|| TextIrError::new("parameter must be `name: type`"))?;
            let name = normalize_value_name(name);
            if name.is_empty() {
                return Err(TextIrError::new("parameter name cannot be empty"));
            }
            let ty = ty.trim();
            if ty.is_empty() {
                return Err(TextIrError::new("parameter type cannot be empty"));
            }
            Ok(Parameter {
                name,
                ty: ty.to_string(),
            })
        })
        .collect()
}

fn parse_result_types(src: &str) -> Result<Vec<ValueType>, TextIrError> {
    let trimmed = src.trim();
    match trimmed
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
    {
        Some(inner) => split_top_level(inner, ',')
            .into_iter()
            .map(parse_type)
            .collect(),
        None => Ok(vec![parse_type(trimmed)?]),
    }
}

fn parse_type(src: &str) -> Result<ValueType, TextIrError> {
    let trimmed = src.trim();
    if trimmed == "none" {
        return Ok(ValueType::None);
    }
    if let Some(body) = trimmed
        .strip_prefix("tensor<")
        .and_then(|s| s.strip_suffix('>'))
    {
        return parse_tensor_type(body);
    }
    Err(TextIrError::new(format!(
        "unsupported type `{trimmed}`; expected `tensor<...>` or `none`"
    )))
}

fn parse_tensor_type(body: &str) -> Result<ValueType, TextIrError> {
    let mut parts = body.split(',');
    let dtype_str = parts
        .next()
        .ok_or_else(|| TextIrError::new("tensor type must specify a dtype"))?;
    let dtype = parse_dtype(dtype_str)?;
    let dims_str = parts.next().unwrap_or("").trim();
    let dims = if dims_str.is_empty() {
        Vec::new()
    } else {
        parse_dimensions(dims_str)?
    };
    if parts.next().is_some() {
        return Err(TextIrError::new(
            "tensor type accepts only `tensor<dtype, dims>` form",
        ));
    }
    Ok(ir_utils::value_type_tensor(ir_utils::tensor_spec(
        dtype, &dims,
    )))
}

fn parse_dtype(src: &str) -> Result<DType, TextIrError> {
    match src.trim().to_ascii_lowercase().as_str() {
        "f32" => Ok(DType::F32),
        "f64" => Ok(DType::F64),
        other => Err(TextIrError::new(format!("unsupported dtype `{other}`"))),
    }
}

fn parse_dimensions(src: &str) -> Result<Vec<usize>, TextIrError> {
    src.split('x')
        .map(|dim| {
            let dim = dim.trim();
            if dim.is_empty() {
                return Err(TextIrError::new("dimension sizes cannot be empty"));
            }
            dim.parse::<usize>()
                .map_err(|_| TextIrError::new(format!("invalid dimension `{dim}`")))
        })
        .collect()
}

fn split_location(type_section: &str) -> Result<(&str, Location), TextIrError> {
    let Some(idx) = type_section.find("loc(") else {
        return Ok((type_section.trim(), Location::Unknown));
    };
    let close = find_matching(type_section, idx + 3, '(', ')')
        .ok_or_else(|| TextIrError::new("unmatched `(` in location"))?;
    if !type_section[close + 1..].trim().is_empty() {
        return Err(TextIrError::new("unexpected tokens after location"));
    }
    let loc = parse_location(&type_section[idx + 4..close])?;
    Ok((type_section[..idx].trim(), loc))
}

fn parse_location(inner: &str) -> Result<Location, TextIrError> {
    let inner = inner.trim();
    if inner == "unknown" {
        return Ok(Location::Unknown);
    }
    let mut parts = inner.rsplitn(3, ':');
    let (Some(column), Some(line), Some(file)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(TextIrError::new(format!(
            "location must be `\"file\":line:col`, got `{inner}`"
        )));
    };
    let file = file
        .trim()
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .ok_or_else(|| TextIrError::new("location file must be quoted"))?;
    let line = line
        .trim()
        .parse::<u32>()
        .map_err(|_| TextIrError::new(format!("invalid location line `{line}`")))?;
    let column = column
        .trim()
        .parse::<u32>()
        .map_err(|_| TextIrError::new(format!("invalid location column `{column}`")))?;
    Ok(Location::new(file, line, column))
}

fn split_top_level(input: &str, delimiter: char) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (idx, ch) in input.char_indices() {
        match ch {
            '<' | '(' | '[' => depth += 1,
            '>' | ')' | ']' => {
                depth = depth.saturating_sub(1);
            }
            c if c == delimiter && depth == 0 => {
                let piece = input[start..idx].trim();
                if !piece.is_empty() {
                    pieces.push(piece);
                }
                start = idx + c.len_utf8();
            }
            _ => {}
        }
    }
    let tail = input[start..].trim();
    if !tail.is_empty() {
        pieces.push(tail);
    }
    pieces
}

fn parse_op_name(src: &str) -> Result<(&str, &str), TextIrError> {
    let end = src
        .char_indices()
        .find(|(_, ch)| ch.is_whitespace() || *ch == '%')
        .map(|(idx, _)| idx)
        .unwrap_or(src.len());
    let name = src[..end].trim();
    if name.is_empty() {
        return Err(TextIrError::new("operation name is missing"));
    }
    Ok((name, src[end..].trim_start()))
}

/// Splits `%a, %b` operand lists and an optional `value[...]` attribute.
fn parse_operands_and_value(section: &str) -> Result<(Vec<String>, Option<&str>), TextIrError> {
    let mut section = section.trim();
    let mut value = None;
    if let Some(start) = section.find("value[") {
        let open = start + "value".len();
        let close = find_matching(section, open, '[', ']')
            .ok_or_else(|| TextIrError::new("unmatched `[` in `value` attribute"))?;
        value = Some(&section[open + 1..close]);
        if !section[..start].trim().is_empty() || !section[close + 1..].trim().is_empty() {
            return Err(TextIrError::new("`value[...]` cannot be mixed with operands"));
        }
        section = "";
    }
    let operands = split_top_level(section, ',')
        .into_iter()
        .map(|token| {
            if !token.starts_with('%') {
                return Err(TextIrError::new(format!(
                    "unexpected token `{token}`; operands start with `%`"
                )));
            }
            Ok(normalize_value_name(token))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok((operands, value))
}

fn parse_literal(raw: &str, result_type: &ValueType) -> Result<TensorLiteral, TextIrError> {
    let spec = result_type
        .as_tensor()
        .ok_or_else(|| TextIrError::new("`constant` must produce a tensor"))?
        .clone();
    let values = split_top_level(raw, ',')
        .into_iter()
        .map(|v| {
            v.parse::<f64>()
                .map_err(|_| TextIrError::new(format!("invalid literal element `{v}`")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let expected = spec
        .element_count()
        .ok_or_else(|| TextIrError::new("constant shape overflows"))?;
    if values.len() != expected {
        return Err(TextIrError::new(format!(
            "constant of type {spec} needs {expected} values, got {}",
            values.len()
        )));
    }
    Ok(TensorLiteral::new(spec, Arc::<[f64]>::from(values)))
}

fn find_matching(src: &str, start: usize, open: char, close: char) -> Option<usize> {
    let mut depth = 0isize;
    for (offset, ch) in src[start..].char_indices() {
        if ch == open {
            depth += 1;
        } else if ch == close {
            depth -= 1;
            if depth == 0 {
                return Some(start + offset);
            }
        }
    }
    None
}

/// Builds a `Program` from the text syntax, panicking on malformed input.
#[macro_export]
macro_rules! toy_program {
    ($src:expr) => {{
        $crate::text_ir::parse_program($src).expect("failed to parse toy IR text program")
    }};
}
