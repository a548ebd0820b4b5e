//! Path descriptors.
//!
//! A [`PathDescriptor`] is the linearized source-to-sink path handed over by
//! the tracer. Steps are stored in an arena: an operand can name any earlier
//! step by index, which is how multi-input expressions such as
//! `Math.min(count, limit)` refer to values computed elsewhere on the path.
//!
//! Branches are identified explicitly. The branch table records, for every
//! guard the path passes through, its parent branch, its condition and which
//! way the path took it. Each step carries the innermost branch it executes
//! in, so leaving a validated region is visible without reconstructing
//! control flow.
//!
//! # Persisted Form
//!
//! ```json
//! {
//!   "version": 1,
//!   "branches": [
//!     { "condition": { "matches": { "pattern": "^[0-9]+$" } }, "outcome": "passed" }
//!   ],
//!   "steps": [
//!     { "op": { "source": { "name": "request.getParameter", "kind": "text" } } },
//!     { "op": { "guard": 0 }, "branch": 0 },
//!     { "op": { "sink_tag": "html_body" }, "branch": 0 }
//!   ]
//! }
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ClassifierError, Result};
use crate::interval::{IntType, Interval};
use crate::sink::SinkContext;

/// Version of the persisted descriptor format.
pub const PATH_FORMAT_VERSION: u32 = 1;

/// Index into the branch table.
pub type BranchId = usize;

// =============================================================================
// Operations
// =============================================================================

/// Built-in numeric operators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericOpKind {
    /// Text to integer conversion into the given type.
    ParseInt(IntType),
    Add,
    Sub,
    Mul,
    /// Truncating division.
    Div,
    /// Remainder (also floor-mod for positive moduli).
    Rem,
    BitAnd,
    /// Arithmetic shift right.
    Shr,
    Abs,
    Neg,
    Min,
    Max,
    /// `clamp(x, lo, hi)`.
    Clamp,
    /// Conditional expression: the join of every alternative.
    Ternary,
    /// `ordinal()` of an enum with `arity` constants.
    EnumOrdinal { arity: usize },
    /// A value chosen from the integer fields of an enum.
    EnumValue { values: Vec<i64> },
    /// Length of a text value.
    Length,
    /// Named helper resolved through the transform registry.
    Call(String),
}

impl NumericOpKind {
    /// Number of operands the operator takes, `None` for variadic operators.
    #[must_use]
    pub fn arity(&self) -> Option<usize> {
        match self {
            Self::ParseInt(_) | Self::Abs | Self::Neg | Self::Length => Some(1),
            Self::Add
            | Self::Sub
            | Self::Mul
            | Self::Div
            | Self::Rem
            | Self::BitAnd
            | Self::Shr => Some(2),
            Self::Clamp => Some(3),
            Self::EnumOrdinal { .. } | Self::EnumValue { .. } => Some(0),
            Self::Min | Self::Max | Self::Ternary | Self::Call(_) => None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::ParseInt(_) => "parse_int",
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Rem => "rem",
            Self::BitAnd => "bitand",
            Self::Shr => "shr",
            Self::Abs => "abs",
            Self::Neg => "neg",
            Self::Min => "min",
            Self::Max => "max",
            Self::Clamp => "clamp",
            Self::Ternary => "ternary",
            Self::EnumOrdinal { .. } => "enum_ordinal",
            Self::EnumValue { .. } => "enum_value",
            Self::Length => "length",
            Self::Call(name) => name,
        }
    }
}

/// Input of a numeric operator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    /// The value flowing along the path.
    Current,
    /// A literal.
    Const(i64),
    /// An untainted value known only by its range.
    Range(Interval),
    /// The result of an earlier step.
    Step(usize),
}

/// Argument of a string transform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StringArg {
    /// Position of the value flowing along the path, for concatenations.
    Current,
    /// Developer-written text.
    Literal(String),
    /// Integer argument (`substring(0, 20)`, `mask(ssn, 4)`).
    Int(i64),
    /// The result of an earlier step.
    Step(usize),
}

/// Kind of value a source produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Text,
    Integer(IntType),
}

/// Where the tainted value enters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Source API, e.g. `request.getParameter`.
    pub name: String,
    pub kind: SourceKind,
    /// Whether the value is personal data (SSN, card number, password).
    #[serde(default)]
    pub sensitive: bool,
}

impl SourceSpec {
    #[must_use]
    pub fn text(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: SourceKind::Text,
            sensitive: false,
        }
    }

    #[must_use]
    pub fn integer(name: impl Into<String>, int_type: IntType) -> Self {
        Self {
            name: name.into(),
            kind: SourceKind::Integer(int_type),
            sensitive: false,
        }
    }

    #[must_use]
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }
}

/// One operation on the path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Source(SourceSpec),
    NumericOp {
        kind: NumericOpKind,
        #[serde(default)]
        operands: Vec<Operand>,
    },
    StringOp {
        name: String,
        #[serde(default)]
        args: Vec<StringArg>,
    },
    /// Enter a branch of the branch table.
    Guard(BranchId),
    SinkTag(SinkContext),
}

// =============================================================================
// Branches
// =============================================================================

/// Integer comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CompareOp {
    /// Comparison that holds exactly when `self` does not.
    #[must_use]
    pub const fn negate(self) -> Self {
        match self {
            CompareOp::Lt => CompareOp::Ge,
            CompareOp::Le => CompareOp::Gt,
            CompareOp::Gt => CompareOp::Le,
            CompareOp::Ge => CompareOp::Lt,
            CompareOp::Eq => CompareOp::Ne,
            CompareOp::Ne => CompareOp::Eq,
        }
    }

    /// Values `v` satisfying `v <op> bound`, or `None` if no interval
    /// describes them.
    #[must_use]
    pub fn admitted(self, bound: i64) -> Option<Interval> {
        match self {
            CompareOp::Lt => Some(match bound.checked_sub(1) {
                Some(b) => Interval::at_most(b),
                None => Interval::empty(),
            }),
            CompareOp::Le => Some(Interval::at_most(bound)),
            CompareOp::Gt => Some(match bound.checked_add(1) {
                Some(b) => Interval::at_least(b),
                None => Interval::empty(),
            }),
            CompareOp::Ge => Some(Interval::at_least(bound)),
            CompareOp::Eq => Some(Interval::constant(bound)),
            CompareOp::Ne => None,
        }
    }

    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
        }
    }
}

fn default_full_match() -> bool {
    true
}

/// Condition tested by a guard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardCondition {
    /// `value <op> bound` on an integer.
    Compare { op: CompareOp, bound: i64 },
    /// Regex validation of a text value. `full_match` models
    /// `String.matches`, which anchors implicitly.
    Matches {
        pattern: String,
        #[serde(default = "default_full_match")]
        full_match: bool,
    },
    /// Membership in a developer-written set.
    InAllowList { values: BTreeSet<String> },
}

/// Which way the path took a guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardOutcome {
    Passed,
    Failed,
}

/// Entry of the branch table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BranchGuard {
    /// Enclosing branch. Parents always have a smaller id.
    #[serde(default)]
    pub parent: Option<BranchId>,
    pub condition: GuardCondition,
    pub outcome: GuardOutcome,
}

// =============================================================================
// Descriptor
// =============================================================================

/// One step of a path and the innermost branch it executes in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Step {
    pub op: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<BranchId>,
}

/// Linearized source-to-sink path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathDescriptor {
    pub version: u32,
    #[serde(default)]
    pub branches: Vec<BranchGuard>,
    pub steps: Vec<Step>,
}

impl PathDescriptor {
    /// Parse a descriptor from JSON and check its structure.
    ///
    /// # Errors
    ///
    /// `Serde` for invalid JSON, `MalformedPath` for structural errors.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let path: PathDescriptor = serde_json::from_str(json)?;
        path.validate()?;
        Ok(path)
    }

    /// Load a descriptor from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text =
            std::fs::read_to_string(path).map_err(|e| ClassifierError::io_with_path(e, path))?;
        Self::from_json_str(&text)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Sink the path ends in, if tagged.
    #[must_use]
    pub fn sink(&self) -> Option<SinkContext> {
        match self.steps.last().map(|s| &s.op) {
            Some(Operation::SinkTag(sink)) => Some(*sink),
            _ => None,
        }
    }

    /// Whether code in branch `inner` also runs inside branch `outer`.
    ///
    /// `None` is the unconditioned top level, which encloses everything.
    #[must_use]
    pub fn encloses(&self, outer: Option<BranchId>, inner: Option<BranchId>) -> bool {
        let Some(outer) = outer else {
            return true;
        };
        let mut cursor = inner;
        while let Some(id) = cursor {
            if id == outer {
                return true;
            }
            cursor = self.branches.get(id).and_then(|b| b.parent);
        }
        false
    }

    /// Check everything that can be checked without evaluating the path.
    ///
    /// # Errors
    ///
    /// `MalformedPath` naming the first offending step.
    pub fn validate(&self) -> Result<()> {
        if self.version != PATH_FORMAT_VERSION {
            return Err(ClassifierError::malformed(
                0,
                format!(
                    "unsupported path format version {} (expected {})",
                    self.version, PATH_FORMAT_VERSION
                ),
            ));
        }

        for (id, branch) in self.branches.iter().enumerate() {
            if let Some(parent) = branch.parent {
                if parent >= id {
                    return Err(ClassifierError::malformed(
                        0,
                        format!("branch {} has parent {} which is not an earlier branch", id, parent),
                    ));
                }
            }
        }

        match self.steps.first().map(|s| &s.op) {
            Some(Operation::Source(_)) => {}
            Some(_) => return Err(ClassifierError::malformed(0, "path does not start with a source")),
            None => return Err(ClassifierError::malformed(0, "path has no steps")),
        }

        let last = self.steps.len() - 1;
        for (index, step) in self.steps.iter().enumerate() {
            if let Some(branch) = step.branch {
                if branch >= self.branches.len() {
                    return Err(ClassifierError::malformed(
                        index,
                        format!("unknown branch id {}", branch),
                    ));
                }
            }
            self.validate_operation(index, step, last)?;
        }
        Ok(())
    }

    fn validate_operation(&self, index: usize, step: &Step, last: usize) -> Result<()> {
        let check_ref = |target: usize| {
            if target >= index {
                Err(ClassifierError::malformed(
                    index,
                    format!("step reference {} does not point to an earlier step", target),
                ))
            } else {
                Ok(())
            }
        };

        match &step.op {
            Operation::Source(_) if index != 0 => Err(ClassifierError::malformed(
                index,
                "source must be the first step",
            )),
            Operation::Source(_) => Ok(()),
            Operation::NumericOp { kind, operands } => {
                for operand in operands {
                    if let Operand::Step(target) = operand {
                        check_ref(*target)?;
                    }
                }
                match kind {
                    NumericOpKind::EnumOrdinal { arity: 0 } => Err(ClassifierError::malformed(
                        index,
                        "enum ordinal of an enum with no constants",
                    )),
                    NumericOpKind::EnumValue { values } if values.is_empty() => Err(
                        ClassifierError::malformed(index, "enum value with no candidate values"),
                    ),
                    _ => Ok(()),
                }
            }
            Operation::StringOp { args, .. } => {
                for arg in args {
                    if let StringArg::Step(target) = arg {
                        check_ref(*target)?;
                    }
                }
                Ok(())
            }
            Operation::Guard(id) => {
                let Some(branch) = self.branches.get(*id) else {
                    return Err(ClassifierError::malformed(
                        index,
                        format!("guard enters unknown branch {}", id),
                    ));
                };
                if step.branch != Some(*id) {
                    return Err(ClassifierError::malformed(
                        index,
                        format!("guard step must be tagged with the branch it enters ({})", id),
                    ));
                }
                if let GuardCondition::Matches { pattern, .. } = &branch.condition {
                    regex::Regex::new(pattern).map_err(|e| {
                        ClassifierError::malformed(index, format!("invalid guard pattern: {}", e))
                    })?;
                }
                Ok(())
            }
            Operation::SinkTag(_) if index != last => Err(ClassifierError::malformed(
                index,
                "sink tag must be the last step",
            )),
            Operation::SinkTag(_) => Ok(()),
        }
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Fluent construction of descriptors, mainly for tests and embedding.
///
/// Guards open a branch nested in the current one; every later step is
/// tagged with the innermost open branch until `leave_branch()`.
#[derive(Debug, Clone)]
pub struct PathBuilder {
    branches: Vec<BranchGuard>,
    steps: Vec<Step>,
    current: Option<BranchId>,
}

impl PathBuilder {
    #[must_use]
    pub fn new(source: SourceSpec) -> Self {
        Self {
            branches: Vec::new(),
            steps: vec![Step {
                op: Operation::Source(source),
                branch: None,
            }],
            current: None,
        }
    }

    /// Index of the most recently added step.
    #[must_use]
    pub fn last_step(&self) -> usize {
        self.steps.len() - 1
    }

    #[must_use]
    pub fn op(mut self, op: Operation) -> Self {
        self.steps.push(Step {
            op,
            branch: self.current,
        });
        self
    }

    #[must_use]
    pub fn numeric(self, kind: NumericOpKind, operands: Vec<Operand>) -> Self {
        self.op(Operation::NumericOp { kind, operands })
    }

    /// Numeric helper resolved through the registry.
    #[must_use]
    pub fn call(self, name: &str, operands: Vec<Operand>) -> Self {
        self.numeric(NumericOpKind::Call(name.to_string()), operands)
    }

    #[must_use]
    pub fn string_op(self, name: &str, args: Vec<StringArg>) -> Self {
        self.op(Operation::StringOp {
            name: name.to_string(),
            args,
        })
    }

    #[must_use]
    pub fn guard(self, condition: GuardCondition) -> Self {
        self.enter(condition, GuardOutcome::Passed)
    }

    #[must_use]
    pub fn guard_failed(self, condition: GuardCondition) -> Self {
        self.enter(condition, GuardOutcome::Failed)
    }

    fn enter(mut self, condition: GuardCondition, outcome: GuardOutcome) -> Self {
        let id = self.branches.len();
        self.branches.push(BranchGuard {
            parent: self.current,
            condition,
            outcome,
        });
        self.current = Some(id);
        self.op(Operation::Guard(id))
    }

    /// Close the innermost open branch.
    #[must_use]
    pub fn leave_branch(mut self) -> Self {
        self.current = self
            .current
            .and_then(|id| self.branches.get(id).and_then(|b| b.parent));
        self
    }

    /// Tag the sink and finish.
    #[must_use]
    pub fn sink(self, sink: SinkContext) -> PathDescriptor {
        self.op(Operation::SinkTag(sink)).build()
    }

    #[must_use]
    pub fn build(self) -> PathDescriptor {
        PathDescriptor {
            version: PATH_FORMAT_VERSION,
            branches: self.branches,
            steps: self.steps,
        }
    }
}

// =============================================================================
// Display
// =============================================================================

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Current => write!(f, "value"),
            Operand::Const(v) => write!(f, "{}", v),
            Operand::Range(iv) => write!(f, "{}", iv),
            Operand::Step(i) => write!(f, "#{}", i),
        }
    }
}

impl fmt::Display for StringArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StringArg::Current => write!(f, "value"),
            StringArg::Literal(s) => write!(f, "{:?}", s),
            StringArg::Int(v) => write!(f, "{}", v),
            StringArg::Step(i) => write!(f, "#{}", i),
        }
    }
}

impl fmt::Display for GuardCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardCondition::Compare { op, bound } => write!(f, "value {} {}", op.symbol(), bound),
            GuardCondition::Matches { pattern, full_match } => {
                let verb = if *full_match { "matches" } else { "finds" };
                write!(f, "value {} /{}/", verb, pattern)
            }
            GuardCondition::InAllowList { values } => write!(f, "value in allow-list ({} values)", values.len()),
        }
    }
}

fn join_display<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Source(spec) => {
                write!(f, "source {}", spec.name)?;
                if spec.sensitive {
                    write!(f, " (sensitive)")?;
                }
                Ok(())
            }
            Operation::NumericOp { kind, operands } => match kind {
                NumericOpKind::ParseInt(ty) => {
                    write!(f, "parse_int<{:?}>({})", ty, join_display(operands))
                }
                NumericOpKind::EnumOrdinal { arity } => write!(f, "enum ordinal of {} constants", arity),
                NumericOpKind::EnumValue { values } => write!(f, "enum value of {:?}", values),
                _ => write!(f, "{}({})", kind.name(), join_display(operands)),
            },
            Operation::StringOp { name, args } => write!(f, "{}({})", name, join_display(args)),
            Operation::Guard(id) => write!(f, "enter branch {}", id),
            Operation::SinkTag(sink) => write!(f, "sink {}", sink),
        }
    }
}
