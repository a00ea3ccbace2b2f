use std::{
    collections::HashMap,
    fmt, fs, io,
    path::Path,
    sync::Arc,
};

use serde::{ser::SerializeStruct, Deserialize, Serialize};
use thiserror::Error;

/// IR version stamped into serialized programs.
pub const IR_VERSION: &str = "toy.v1";

fn default_ir_version() -> String {
    IR_VERSION.to_string()
}

/// Scalar element types understood by the IR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    F32,
    F64,
}

impl DType {
    pub fn name(self) -> &'static str {
        match self {
            DType::F32 => "f32",
            DType::F64 => "f64",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Logical tensor shape as an ordered list of static extents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    pub fn new(dims: impl Into<Vec<usize>>) -> Self {
        Self { dims: dims.into() }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Returns the total element count, or `None` on overflow.
    pub fn element_count(&self) -> Option<usize> {
        let mut count = 1usize;
        for dim in &self.dims {
            count = count.checked_mul(*dim)?;
        }
        Some(count)
    }

    /// Shape with the axis order reversed, i.e. the result shape of `transpose`.
    pub fn reversed(&self) -> Shape {
        Shape::new(self.dims.iter().rev().copied().collect::<Vec<_>>())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims = self
            .dims
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>();
        f.write_str(&dims.join("x"))
    }
}

/// Tensor metadata coupling dtype and shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorSpec {
    pub dtype: DType,
    pub shape: Shape,
}

impl TensorSpec {
    pub fn new(dtype: DType, shape: Shape) -> Self {
        Self { dtype, shape }
    }

    pub fn element_count(&self) -> Option<usize> {
        self.shape.element_count()
    }
}

impl fmt::Display for TensorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.shape.rank() == 0 {
            write!(f, "tensor<{}>", self.dtype)
        } else {
            write!(f, "tensor<{}, {}>", self.dtype, self.shape)
        }
    }
}

/// Typing information for SSA values.
///
/// `None` is the type of values produced purely for their side effect (e.g. `print`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueType {
    Tensor(TensorSpec),
    None,
}

impl ValueType {
    pub fn as_tensor(&self) -> Option<&TensorSpec> {
        match self {
            ValueType::Tensor(spec) => Some(spec),
            ValueType::None => None,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Tensor(spec) => spec.fmt(f),
            ValueType::None => f.write_str("none"),
        }
    }
}

/// Dense literal tensor payload. Values are stored as `f64` regardless of dtype.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorLiteral {
    pub spec: TensorSpec,
    pub values: Arc<[f64]>,
}

impl TensorLiteral {
    pub fn new(spec: TensorSpec, values: Arc<[f64]>) -> Self {
        Self { spec, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Serialize for TensorLiteral {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("TensorLiteral", 2)?;
        state.serialize_field("spec", &self.spec)?;
        state.serialize_field("values", self.values.as_ref())?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for TensorLiteral {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct TensorLiteralHelper {
            spec: TensorSpec,
            values: Vec<f64>,
        }

        let helper = TensorLiteralHelper::deserialize(deserializer)?;
        Ok(TensorLiteral {
            spec: helper.spec,
            values: Arc::<[f64]>::from(helper.values),
        })
    }
}

/// Source provenance attached to every instruction for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Location {
    #[default]
    Unknown,
    FileLineCol {
        file: String,
        line: u32,
        column: u32,
    },
}

impl Location {
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Location::FileLineCol {
            file: file.into(),
            line,
            column,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Location::Unknown)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Unknown => f.write_str("loc(unknown)"),
            Location::FileLineCol { file, line, column } => {
                write!(f, "loc({file:?}:{line}:{column})")
            }
        }
    }
}

/// Closed set of operation kinds; the key the pattern registry dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OpKind {
    Constant,
    Transpose,
    Reshape,
    Add,
    Mul,
    Print,
}

impl OpKind {
    pub const ALL: [OpKind; 6] = [
        OpKind::Constant,
        OpKind::Transpose,
        OpKind::Reshape,
        OpKind::Add,
        OpKind::Mul,
        OpKind::Print,
    ];

    /// Mnemonic used by the text format.
    pub fn name(self) -> &'static str {
        match self {
            OpKind::Constant => "constant",
            OpKind::Transpose => "transpose",
            OpKind::Reshape => "reshape",
            OpKind::Add => "add",
            OpKind::Mul => "mul",
            OpKind::Print => "print",
        }
    }

    pub fn from_name(name: &str) -> Option<OpKind> {
        OpKind::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Side-effecting operations are never erased as dead code.
    pub fn is_side_effecting(self) -> bool {
        matches!(self, OpKind::Print)
    }

    /// Number of operands the operation takes.
    pub fn arity(self) -> usize {
        match self {
            OpKind::Constant => 0,
            OpKind::Transpose | OpKind::Reshape | OpKind::Print => 1,
            OpKind::Add | OpKind::Mul => 2,
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Declarative form of IR operations.
///
/// `Transpose` reverses the order of all axes, which makes it an involution.
/// `Reshape` takes its target shape from the instruction's result type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    Constant(TensorLiteral),
    Transpose,
    Reshape,
    Add,
    Mul,
    Print,
}

impl Operation {
    pub fn kind(&self) -> OpKind {
        match self {
            Operation::Constant(_) => OpKind::Constant,
            Operation::Transpose => OpKind::Transpose,
            Operation::Reshape => OpKind::Reshape,
            Operation::Add => OpKind::Add,
            Operation::Mul => OpKind::Mul,
            Operation::Print => OpKind::Print,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }
}

/// Unique identifier for SSA values in a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueId(pub u32);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Single SSA instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub id: ValueId,
    pub op: Operation,
    pub operands: Vec<ValueId>,
    pub output: ValueType,
    #[serde(default)]
    pub loc: Location,
}

/// Straight-line function: parameters, a body in program order, and returned values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub parameters: Vec<ValueType>,
    pub parameter_ids: Vec<ValueId>,
    pub results: Vec<ValueType>,
    pub body: Vec<Instruction>,
    pub result_ids: Vec<ValueId>,
}

impl Function {
    /// Renders the function in the text format using its raw value ids.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = write_function(&mut out, self, &|id: ValueId| id.0.to_string());
        out
    }

    /// Renders the function with values renumbered in definition order.
    ///
    /// Two functions with the same structure print identically regardless of
    /// which ids the rewriter allocated along the way.
    pub fn to_canonical_text(&self) -> String {
        let mut names: HashMap<ValueId, String> = HashMap::new();
        for id in self
            .parameter_ids
            .iter()
            .chain(self.body.iter().map(|inst| &inst.id))
        {
            let next = names.len();
            names.entry(*id).or_insert_with(|| next.to_string());
        }
        let mut out = String::new();
        let _ = write_function(&mut out, self, &|id: ValueId| {
            names
                .get(&id)
                .cloned()
                .unwrap_or_else(|| format!("?{}", id.0))
        });
        out
    }

    /// Number of instructions of the given kind.
    pub fn count_of(&self, kind: OpKind) -> usize {
        self.body.iter().filter(|inst| inst.op.kind() == kind).count()
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

/// Complete module of functions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    #[serde(default = "default_ir_version")]
    pub ir_version: String,
    pub entry: String,
    pub functions: Vec<Function>,
}

#[derive(Debug, Error)]
pub enum ProgramSerdeError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("program ir version '{found}' does not match expected '{expected}'")]
    VersionMismatch {
        found: String,
        expected: &'static str,
    },
}

#[derive(Debug, Error)]
pub enum ProgramIoError {
    #[error(transparent)]
    Serialization(#[from] ProgramSerdeError),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl Program {
    pub fn new(entry: impl Into<String>) -> Self {
        Self {
            ir_version: IR_VERSION.to_string(),
            entry: entry.into(),
            functions: Vec::new(),
        }
    }

    pub fn with_functions(mut self, functions: Vec<Function>) -> Self {
        self.functions = functions;
        self
    }

    pub fn entry_function(&self) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == self.entry)
    }

    pub fn entry_function_mut(&mut self) -> Option<&mut Function> {
        let entry = self.entry.clone();
        self.functions.iter_mut().find(|f| f.name == entry)
    }

    pub fn to_json_string(&self) -> Result<String, ProgramSerdeError> {
        serde_json::to_string_pretty(self).map_err(ProgramSerdeError::from)
    }

    pub fn from_json_str(src: &str) -> Result<Self, ProgramSerdeError> {
        let mut program: Program = serde_json::from_str(src).map_err(ProgramSerdeError::from)?;
        program.ir_version = normalize_ir_version(program.ir_version)?;
        Ok(program)
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<(), ProgramIoError> {
        let contents = self.to_json_string()?;
        fs::write(path, contents).map_err(ProgramIoError::from)
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self, ProgramIoError> {
        let contents = fs::read_to_string(path).map_err(ProgramIoError::from)?;
        Program::from_json_str(&contents).map_err(ProgramIoError::from)
    }

    pub fn to_text(&self) -> String {
        format!("{self}")
    }
}

fn normalize_ir_version(version: String) -> Result<String, ProgramSerdeError> {
    if version.is_empty() {
        return Ok(IR_VERSION.to_string());
    }
    if version == IR_VERSION {
        Ok(version)
    } else {
        Err(ProgramSerdeError::VersionMismatch {
            found: version,
            expected: IR_VERSION,
        })
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, function) in self.functions.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            f.write_str(&function.to_text())?;
        }
        Ok(())
    }
}

fn write_function(
    out: &mut String,
    function: &Function,
    name_of: &dyn Fn(ValueId) -> String,
) -> fmt::Result {
    use std::fmt::Write;

    let params = function
        .parameter_ids
        .iter()
        .zip(function.parameters.iter())
        .map(|(id, ty)| format!("%{}: {}", name_of(*id), ty))
        .collect::<Vec<_>>()
        .join(", ");
    let results = match function.results.as_slice() {
        [single] => single.to_string(),
        many => format!(
            "({})",
            many.iter()
                .map(|ty| ty.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    };
    writeln!(out, "func @{}({}) -> {} {{", function.name, params, results)?;
    for instruction in &function.body {
        write_line(out, 1, &format_instruction(instruction, name_of))?;
    }
    let returned = function
        .result_ids
        .iter()
        .map(|id| format!("%{}", name_of(*id)))
        .collect::<Vec<_>>()
        .join(", ");
    if returned.is_empty() {
        write_line(out, 1, "return")?;
    } else {
        write_line(out, 1, &format!("return {returned}"))?;
    }
    writeln!(out, "}}")
}

fn format_instruction(instruction: &Instruction, name_of: &dyn Fn(ValueId) -> String) -> String {
    let mut line = format!("%{} = {}", name_of(instruction.id), instruction.op.name());
    if let Operation::Constant(literal) = &instruction.op {
        let values = literal
            .values
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        line.push_str(&format!(" value[{values}]"));
    }
    if !instruction.operands.is_empty() {
        let operands = instruction
            .operands
            .iter()
            .map(|id| format!("%{}", name_of(*id)))
            .collect::<Vec<_>>()
            .join(", ");
        line.push(' ');
        line.push_str(&operands);
    }
    line.push_str(&format!(" -> {}", instruction.output));
    if instruction.loc.is_known() {
        line.push_str(&format!(" {}", instruction.loc));
    }
    line
}

fn write_line(out: &mut String, indent: usize, line: &str) -> fmt::Result {
    use std::fmt::Write;

    for _ in 0..indent {
        out.push_str("  ");
    }
    writeln!(out, "{line}")
}

/// Errors raised when finishing a [`ProgramBuilder`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProgramBuildError {
    #[error("result value {value} was never defined")]
    UnknownResult { value: ValueId },
}

/// Lightweight builder for constructing functions programmatically.
#[derive(Default)]
pub struct ProgramBuilder {
    next_value_id: u32,
    parameters: Vec<(ValueId, ValueType)>,
    instructions: Vec<Instruction>,
    value_types: HashMap<ValueId, ValueType>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_parameter(&mut self, ty: ValueType) -> ValueId {
        let id = ValueId(self.next_value_id);
        self.next_value_id += 1;
        self.value_types.insert(id, ty.clone());
        self.parameters.push((id, ty));
        id
    }

    pub fn emit_single(
        &mut self,
        op: Operation,
        operands: Vec<ValueId>,
        output: ValueType,
    ) -> ValueId {
        self.emit_at(op, operands, output, Location::Unknown)
    }

    pub fn emit_at(
        &mut self,
        op: Operation,
        operands: Vec<ValueId>,
        output: ValueType,
        loc: Location,
    ) -> ValueId {
        let id = ValueId(self.next_value_id);
        self.next_value_id += 1;
        self.value_types.insert(id, output.clone());
        self.instructions.push(Instruction {
            id,
            op,
            operands,
            output,
            loc,
        });
        id
    }

    pub fn finish(
        self,
        name: impl Into<String>,
        result_ids: Vec<ValueId>,
    ) -> Result<Function, ProgramBuildError> {
        let mut results = Vec::with_capacity(result_ids.len());
        for id in &result_ids {
            let ty = self
                .value_types
                .get(id)
                .ok_or(ProgramBuildError::UnknownResult { value: *id })?;
            results.push(ty.clone());
        }
        let (parameter_ids, parameters): (Vec<_>, Vec<_>) = self.parameters.into_iter().unzip();
        Ok(Function {
            name: name.into(),
            parameters,
            parameter_ids,
            results,
            body: self.instructions,
            result_ids,
        })
    }
}
