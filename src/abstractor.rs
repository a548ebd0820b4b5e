//! Expression value abstractor.
//!
//! Folds a [`PathDescriptor`] into a final [`AbstractValue`] in one forward
//! pass. There is no backtracking and no fixpoint: each step is evaluated
//! once, in order, and its result is stored in an arena so later operands can
//! name it.
//!
//! # Branch Conditioning
//!
//! Entering a branch pushes a refined copy of the current value. Every later
//! operation is applied to each level of the stack, so the unconditioned
//! value keeps up with the transforms. When a step executes outside a branch
//! the refined level is dropped and the value underneath takes over:
//!
//! ```text
//! step   branch   stack (bottom .. top)
//! src    -        [T]
//! guard  0        [T, digits]
//! trim   0        [T', digits']
//! sink   -        [T']           refinement dropped
//! ```
//!
//! # Unknown Operators
//!
//! A name the registry does not know degrades the value to "nothing known"
//! and leaves the path pending-unknown. A later recognized sanitizer, a
//! passed validation guard, or a numeric operator that yields a finite upper
//! bound settles it. The pending state lives on each stack level, so a
//! settlement made inside a branch is undone with the branch.

use std::collections::BTreeSet;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::error::{ClassifierError, Result};
use crate::guarantee::{
    pattern, CharClass, CharsetConstraint, FormatClass, RetainedSuffix, StringGuarantee,
};
use crate::interval::{Bound, IntType, Interval};
use crate::path::{
    BranchGuard, BranchId, GuardCondition, GuardOutcome, NumericOpKind, Operand, Operation,
    PathDescriptor, SourceKind, Step, StringArg,
};
use crate::registry::{
    DigestEncoding, NumericEffect, NumericFn, StringEffect, TransformEffect, TransformRegistry,
};
use crate::sink::SinkContext;

// =============================================================================
// Abstract Values
// =============================================================================

/// Abstract value of an expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbstractValue {
    Integer(Interval),
    Text(StringGuarantee),
}

impl AbstractValue {
    #[must_use]
    pub fn as_interval(&self) -> Option<&Interval> {
        match self {
            AbstractValue::Integer(iv) => Some(iv),
            AbstractValue::Text(_) => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&StringGuarantee> {
        match self {
            AbstractValue::Text(g) => Some(g),
            AbstractValue::Integer(_) => None,
        }
    }

    /// Upper bound of an integer value.
    fn high(&self) -> Option<Bound> {
        self.as_interval().map(|iv| iv.high)
    }
}

impl fmt::Display for AbstractValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbstractValue::Integer(iv) => write!(f, "{}", iv),
            AbstractValue::Text(g) => write!(f, "{}", g),
        }
    }
}

/// Abstract value after one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepTrace {
    pub step: usize,
    pub operation: String,
    pub value: AbstractValue,
    pub explanation: String,
}

/// Result of abstracting a whole path.
#[derive(Debug, Clone)]
pub struct Abstraction {
    /// Value reaching the end of the path.
    pub value: AbstractValue,
    /// Sink the path ends in.
    pub sink: Option<SinkContext>,
    pub trace: Vec<StepTrace>,
    pub notes: Vec<String>,
    /// Unrecognized operator whose effect was never superseded.
    pub pending_unknown: Option<String>,
    /// Source name, for explanations.
    pub source: String,
    /// Source is personal data.
    pub source_sensitive: bool,
    /// Value still discloses the sensitive source.
    pub sensitive: bool,
    /// Step that redacted the sensitive value.
    pub redacted_at: Option<usize>,
    /// Last step that narrowed the upper bound of the final value.
    pub bounding_step: Option<usize>,
    /// Step that established the final string guarantee.
    pub guarantee_step: Option<usize>,
}

impl Abstraction {
    /// Operation text of a traced step.
    #[must_use]
    pub fn operation_at(&self, step: usize) -> Option<&str> {
        self.trace
            .iter()
            .find(|t| t.step == step)
            .map(|t| t.operation.as_str())
    }
}

// =============================================================================
// Abstractor
// =============================================================================

/// One-pass evaluator over the abstract domain.
#[derive(Debug, Clone, Copy)]
pub struct Abstractor<'r> {
    registry: &'r TransformRegistry,
    max_steps: Option<usize>,
}

impl<'r> Abstractor<'r> {
    #[must_use]
    pub fn new(registry: &'r TransformRegistry) -> Self {
        Self {
            registry,
            max_steps: None,
        }
    }

    /// Abandon paths longer than `max_steps`.
    #[must_use]
    pub fn with_max_steps(mut self, max_steps: Option<usize>) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Abstract a path.
    ///
    /// # Errors
    ///
    /// `MalformedPath` for structural and type errors. Unknown operators are
    /// not errors; they are recorded in `notes` and `pending_unknown`.
    pub fn abstract_path(&self, path: &PathDescriptor) -> Result<Abstraction> {
        path.validate()?;
        if let Some(limit) = self.max_steps {
            if path.steps.len() > limit {
                return Err(ClassifierError::malformed(
                    limit,
                    format!(
                        "path has {} steps, more than the configured limit of {}",
                        path.steps.len(),
                        limit
                    ),
                ));
            }
        }

        let mut walk = Walk::new(path, self.registry);
        for (index, step) in path.steps.iter().enumerate() {
            walk.step(index, step)?;
        }
        walk.finish()
    }
}

/// One level of the branch stack.
#[derive(Debug, Clone)]
struct Frame {
    branch: Option<BranchId>,
    value: AbstractValue,
    bounding_step: Option<usize>,
    guarantee_step: Option<usize>,
    /// Unrecognized operator whose effect this level has not superseded.
    pending_unknown: Option<String>,
}

impl Frame {
    /// Replace the value, tracking which step last narrowed the upper bound.
    fn update(&mut self, index: usize, value: AbstractValue) {
        match (self.value.high(), value.high()) {
            (_, Some(Bound::PosInf)) => self.bounding_step = None,
            (Some(old), Some(new)) if new < old => self.bounding_step = Some(index),
            (None, Some(_)) => self.bounding_step = Some(index),
            _ => {}
        }
        self.value = value;
    }

    /// Clear the pending operator, returning it.
    fn settle(&mut self) -> Option<String> {
        self.pending_unknown.take()
    }
}

/// Resolved effect of a numeric operation.
enum NumericTarget {
    Builtin(NumericOpKind),
    Custom(NumericFn),
    Unknown(String),
}

/// State of one pass.
struct Walk<'p, 'r> {
    path: &'p PathDescriptor,
    registry: &'r TransformRegistry,
    frames: Vec<Frame>,
    results: Vec<AbstractValue>,
    trace: Vec<StepTrace>,
    notes: Vec<String>,
    source: String,
    source_sensitive: bool,
    sensitive: bool,
    redacted_at: Option<usize>,
    sink: Option<SinkContext>,
}

impl<'p, 'r> Walk<'p, 'r> {
    fn new(path: &'p PathDescriptor, registry: &'r TransformRegistry) -> Self {
        Self {
            path,
            registry,
            frames: Vec::new(),
            results: Vec::with_capacity(path.steps.len()),
            trace: Vec::with_capacity(path.steps.len()),
            notes: Vec::new(),
            source: String::new(),
            source_sensitive: false,
            sensitive: false,
            redacted_at: None,
            sink: None,
        }
    }

    fn top(&self, index: usize) -> Result<&Frame> {
        self.frames
            .last()
            .ok_or_else(|| ClassifierError::malformed(index, "no value before this step"))
    }

    fn step(&mut self, index: usize, step: &Step) -> Result<()> {
        // Drop refinements of branches this step is not part of.
        while self.frames.len() > 1 {
            let inside = self
                .frames
                .last()
                .map_or(true, |top| self.path.encloses(top.branch, step.branch));
            if inside {
                break;
            }
            if let Some(frame) = self.frames.pop() {
                trace!(step = index, branch = ?frame.branch, "left branch");
            }
        }

        let explanation = match &step.op {
            Operation::Source(spec) => {
                let value = match spec.kind {
                    SourceKind::Text => AbstractValue::Text(StringGuarantee::unconstrained()),
                    SourceKind::Integer(int_type) => AbstractValue::Integer(int_type.range()),
                };
                let explanation = match &value {
                    AbstractValue::Integer(_) => "tainted integer spans its type's full range",
                    AbstractValue::Text(_) => "tainted text, nothing is known",
                };
                self.frames = vec![Frame {
                    branch: None,
                    bounding_step: None,
                    guarantee_step: None,
                    pending_unknown: None,
                    value,
                }];
                self.source = spec.name.clone();
                self.source_sensitive = spec.sensitive;
                self.sensitive = spec.sensitive;
                explanation.to_string()
            }
            Operation::Guard(id) => self.enter_branch(index, *id)?,
            Operation::NumericOp { kind, operands } => self.apply_numeric(index, kind, operands)?,
            Operation::StringOp { name, args } => self.apply_string(index, name, args)?,
            Operation::SinkTag(sink) => {
                self.sink = Some(*sink);
                format!("value reaches {}", sink)
            }
        };

        let value = self.top(index)?.value.clone();
        trace!(step = index, value = %value, "abstracted step");
        self.trace.push(StepTrace {
            step: index,
            operation: step.op.to_string(),
            value: value.clone(),
            explanation,
        });
        self.results.push(value);
        Ok(())
    }

    fn finish(self) -> Result<Abstraction> {
        let last = self.path.steps.len().saturating_sub(1);
        let top = self
            .frames
            .last()
            .ok_or_else(|| ClassifierError::malformed(last, "path produced no value"))?;

        debug!(
            source = %self.source,
            value = %top.value,
            pending_unknown = ?top.pending_unknown,
            "abstracted path"
        );

        Ok(Abstraction {
            value: top.value.clone(),
            sink: self.sink,
            bounding_step: top.bounding_step,
            guarantee_step: top.guarantee_step,
            trace: self.trace,
            notes: self.notes,
            pending_unknown: top.pending_unknown.clone(),
            source: self.source,
            source_sensitive: self.source_sensitive,
            sensitive: self.sensitive,
            redacted_at: self.redacted_at,
        })
    }

    fn mark_unknown(&mut self, index: usize, name: &str) {
        warn!(step = index, operator = %name, "unrecognized operator");
        self.notes.push(
            ClassifierError::UnrecognizedOperator(format!("'{}' at step {}", name, index))
                .to_string(),
        );
        for frame in &mut self.frames {
            frame.pending_unknown = Some(name.to_string());
        }
    }

    /// Settle the pending operator on every level `settles` accepts.
    fn settle_unknown(&mut self, index: usize, how: &str, settles: impl Fn(&Frame) -> bool) {
        let mut settled: Option<String> = None;
        for frame in &mut self.frames {
            if settles(frame) {
                settled = frame.settle().or(settled);
            }
        }
        if let Some(name) = settled {
            self.notes.push(format!(
                "effect of unrecognized '{}' superseded at step {} ({})",
                name, index, how
            ));
        }
    }

    // -------------------------------------------------------------------------
    // Branches
    // -------------------------------------------------------------------------

    fn enter_branch(&mut self, index: usize, id: BranchId) -> Result<String> {
        let branch = self
            .path
            .branches
            .get(id)
            .ok_or_else(|| ClassifierError::malformed(index, format!("unknown branch id {}", id)))?;
        let mut frame = self.top(index)?.clone();
        let (value, explanation) = refine(index, &frame.value, branch)?;

        let narrowed_text = frame.value.as_text() != value.as_text()
            && value.as_text().is_some_and(|g| !g.charset.is_unconstrained());
        if narrowed_text {
            frame.guarantee_step = Some(index);
        }
        let finite = matches!(value.high(), Some(Bound::Finite(_)));
        frame.update(index, value);
        frame.branch = Some(id);
        self.frames.push(frame);

        let passed = branch.outcome == GuardOutcome::Passed;
        if narrowed_text && passed {
            self.settle_unknown(index, "validation guard", |f| f.branch == Some(id));
        } else if finite {
            self.settle_unknown(index, "finite upper bound", |f| f.branch == Some(id));
        }
        Ok(explanation)
    }

    // -------------------------------------------------------------------------
    // Numeric operators
    // -------------------------------------------------------------------------

    fn resolve_numeric(&self, index: usize, kind: &NumericOpKind) -> Result<NumericTarget> {
        let NumericOpKind::Call(name) = kind else {
            return Ok(NumericTarget::Builtin(kind.clone()));
        };
        match self.registry.get(name).map(|t| &t.effect) {
            None => Ok(NumericTarget::Unknown(name.clone())),
            Some(TransformEffect::Numeric(NumericEffect::Builtin(kind))) => {
                Ok(NumericTarget::Builtin(kind.clone()))
            }
            Some(TransformEffect::Numeric(NumericEffect::Custom(f))) => {
                Ok(NumericTarget::Custom(f.clone()))
            }
            Some(TransformEffect::String(_)) => Err(ClassifierError::malformed(
                index,
                format!("string transform '{}' used as a numeric operator", name),
            )),
        }
    }

    fn apply_numeric(
        &mut self,
        index: usize,
        kind: &NumericOpKind,
        operands: &[Operand],
    ) -> Result<String> {
        let target = self.resolve_numeric(index, kind)?;

        if let NumericTarget::Unknown(name) = &target {
            for frame in &mut self.frames {
                frame.update(index, AbstractValue::Integer(Interval::top()));
            }
            self.mark_unknown(index, name);
            return Ok(format!("'{}' is not a known operator, value is unconstrained", name));
        }

        let operands: Vec<Operand> = if operands.is_empty() {
            vec![Operand::Current]
        } else {
            operands.to_vec()
        };

        let mut frames = std::mem::take(&mut self.frames);
        let mut outcome = Ok(());
        for frame in &mut frames {
            let inputs = match self.resolve_operands(index, &operands, &frame.value) {
                Ok(inputs) => inputs,
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            };
            match evaluate_numeric(index, &target, inputs, &frame.value) {
                Ok(iv) => frame.update(index, AbstractValue::Integer(iv)),
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }
        self.frames = frames;
        outcome?;

        self.settle_unknown(index, "finite upper bound", |f| {
            matches!(f.value.high(), Some(Bound::Finite(_)))
        });
        let top = self.top(index)?;
        let high = top.value.high();
        let narrowed = top.bounding_step == Some(index);

        Ok(match (narrowed, high) {
            (true, Some(h)) => format!("upper bound narrowed to {}", h),
            (_, Some(Bound::PosInf)) => "upper bound is unbounded".to_string(),
            _ => "upper bound unchanged".to_string(),
        })
    }

    fn resolve_operands(
        &self,
        index: usize,
        operands: &[Operand],
        current: &AbstractValue,
    ) -> Result<Vec<AbstractValue>> {
        operands
            .iter()
            .map(|operand| match operand {
                Operand::Current => Ok(current.clone()),
                Operand::Const(v) => Ok(AbstractValue::Integer(Interval::constant(*v))),
                Operand::Range(iv) => Ok(AbstractValue::Integer(*iv)),
                Operand::Step(target) => self.result_of(index, *target),
            })
            .collect()
    }

    fn result_of(&self, index: usize, target: usize) -> Result<AbstractValue> {
        self.results.get(target).cloned().ok_or_else(|| {
            ClassifierError::malformed(
                index,
                format!("step reference {} does not point to an earlier step", target),
            )
        })
    }

    // -------------------------------------------------------------------------
    // String transforms
    // -------------------------------------------------------------------------

    fn apply_string(&mut self, index: usize, name: &str, args: &[StringArg]) -> Result<String> {
        let effect = match self.registry.get(name).map(|t| &t.effect) {
            None => {
                for frame in &mut self.frames {
                    frame.update(index, AbstractValue::Text(StringGuarantee::unconstrained()));
                    frame.guarantee_step = None;
                }
                self.mark_unknown(index, name);
                return Ok(format!("'{}' is not a known transform, value is unconstrained", name));
            }
            Some(TransformEffect::Numeric(_)) => {
                return Err(ClassifierError::malformed(
                    index,
                    format!("numeric transform '{}' used as a string operation", name),
                ));
            }
            Some(TransformEffect::String(effect)) => effect.clone(),
        };

        let pieces = args
            .iter()
            .map(|arg| match arg {
                StringArg::Step(target) => self.result_of(index, *target).map(Piece::Value),
                StringArg::Current => Ok(Piece::Current),
                StringArg::Literal(text) => Ok(Piece::Literal(text.clone())),
                StringArg::Int(v) => Ok(Piece::Int(*v)),
            })
            .collect::<Result<Vec<_>>>()?;

        let mut frames = std::mem::take(&mut self.frames);
        let mut outcome = Ok(());
        for frame in &mut frames {
            match evaluate_string(index, name, &effect, &pieces, &frame.value) {
                Ok(g) => {
                    frame.update(index, AbstractValue::Text(g));
                    if effect.is_sanitizing() {
                        frame.guarantee_step = Some(index);
                    }
                }
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }
        self.frames = frames;
        outcome?;

        if effect.is_sanitizing() {
            self.settle_unknown(index, name, |_| true);
        }
        if effect.is_redacting() && self.sensitive {
            self.sensitive = false;
            self.redacted_at = Some(index);
        }

        Ok(describe_effect(name, &effect))
    }
}

// =============================================================================
// Numeric evaluation
// =============================================================================

fn integer_inputs(index: usize, name: &str, inputs: &[AbstractValue]) -> Result<Vec<Interval>> {
    inputs
        .iter()
        .map(|v| {
            v.as_interval().copied().ok_or_else(|| {
                ClassifierError::malformed(
                    index,
                    format!("numeric operator '{}' applied to text", name),
                )
            })
        })
        .collect()
}

fn text_input<'a>(index: usize, name: &str, inputs: &'a [AbstractValue]) -> Result<&'a StringGuarantee> {
    match inputs {
        [AbstractValue::Text(g)] => Ok(g),
        [AbstractValue::Integer(_)] => Err(ClassifierError::malformed(
            index,
            format!("'{}' expects text but the value is an integer", name),
        )),
        _ => Err(ClassifierError::malformed(
            index,
            format!("'{}' takes 1 operand, got {}", name, inputs.len()),
        )),
    }
}

fn evaluate_numeric(
    index: usize,
    target: &NumericTarget,
    mut inputs: Vec<AbstractValue>,
    current: &AbstractValue,
) -> Result<Interval> {
    let kind = match target {
        NumericTarget::Builtin(kind) => kind,
        NumericTarget::Custom(f) => {
            let ivs = integer_inputs(index, "custom operator", &inputs)?;
            return Ok(f(&ivs));
        }
        NumericTarget::Unknown(_) => return Ok(Interval::top()),
    };
    let name = kind.name().to_string();

    // One operand short means the flowing value is the first operand.
    match kind.arity() {
        Some(0) => {}
        Some(n) if inputs.len() + 1 == n => inputs.insert(0, current.clone()),
        None if inputs.len() == 1 => inputs.insert(0, current.clone()),
        _ => {}
    }
    if let Some(n) = kind.arity().filter(|n| *n > 0) {
        if inputs.len() != n {
            return Err(ClassifierError::malformed(
                index,
                format!("'{}' takes {} operands, got {}", name, n, inputs.len()),
            ));
        }
    }

    match kind {
        NumericOpKind::ParseInt(int_type) => Ok(parse_refinement(text_input(index, &name, &inputs)?, *int_type)),
        NumericOpKind::Length => {
            let g = text_input(index, &name, &inputs)?;
            Ok(match g.max_length {
                Some(max) => Interval::range(0, i64::try_from(max).unwrap_or(i64::MAX)),
                None => Interval::at_least(0),
            })
        }
        NumericOpKind::EnumOrdinal { arity } => {
            let last = i64::try_from(*arity).unwrap_or(i64::MAX).saturating_sub(1);
            Ok(Interval::range(0, last))
        }
        NumericOpKind::EnumValue { values } => {
            match (values.iter().min(), values.iter().max()) {
                (Some(lo), Some(hi)) => Ok(Interval::range(*lo, *hi)),
                _ => Err(ClassifierError::malformed(index, "enum value with no candidate values")),
            }
        }
        NumericOpKind::Call(callee) => Err(ClassifierError::malformed(
            index,
            format!("unresolved call '{}'", callee),
        )),
        _ => {
            let ivs = integer_inputs(index, &name, &inputs)?;
            fold_intervals(index, kind, &ivs)
        }
    }
}

fn fold_intervals(index: usize, kind: &NumericOpKind, ivs: &[Interval]) -> Result<Interval> {
    let binary = |f: fn(&Interval, &Interval) -> Interval| -> Result<Interval> {
        Ok(f(&ivs[0], &ivs[1]))
    };
    match kind {
        NumericOpKind::Add => binary(Interval::add),
        NumericOpKind::Sub => binary(Interval::sub),
        NumericOpKind::Mul => binary(Interval::mul),
        NumericOpKind::Div => binary(Interval::div),
        NumericOpKind::Rem => binary(Interval::rem),
        NumericOpKind::BitAnd => binary(Interval::bitand),
        NumericOpKind::Shr => binary(Interval::shr),
        NumericOpKind::Abs => Ok(ivs[0].abs()),
        NumericOpKind::Neg => Ok(ivs[0].neg()),
        NumericOpKind::Clamp => Ok(ivs[0].clamp(&ivs[1], &ivs[2])),
        NumericOpKind::Min | NumericOpKind::Max | NumericOpKind::Ternary => {
            let (first, rest) = ivs.split_first().ok_or_else(|| {
                ClassifierError::malformed(index, format!("'{}' needs operands", kind.name()))
            })?;
            if rest.is_empty() {
                return Err(ClassifierError::malformed(
                    index,
                    format!("'{}' takes at least 2 operands", kind.name()),
                ));
            }
            Ok(rest.iter().fold(*first, |acc, iv| match kind {
                NumericOpKind::Min => acc.min(iv),
                NumericOpKind::Max => acc.max(iv),
                _ => acc.join(iv),
            }))
        }
        other => Err(ClassifierError::malformed(
            index,
            format!("'{}' is not an interval operator", other.name()),
        )),
    }
}

/// Interval of `parse(text)` into `int_type`.
///
/// Known digits-only text of bounded length parses to `[0, 10^L - 1]`; a
/// finite set of integer literals parses to its hull.
fn parse_refinement(text: &StringGuarantee, int_type: IntType) -> Interval {
    let range = int_type.range();

    if let Some(values) = &text.value_set {
        let parsed: Vec<i64> = values.iter().filter_map(|v| v.parse::<i64>().ok()).collect();
        if let (Some(lo), Some(hi)) = (parsed.iter().min(), parsed.iter().max()) {
            return Interval::range(*lo, *hi).meet(&range);
        }
    }

    if text.charset == CharsetConstraint::DigitsOnly {
        let high = match text.max_length {
            Some(len) if len < 19 => {
                // len < 19 keeps 10^len within i64
                Bound::Finite(10i64.pow(len as u32) - 1)
            }
            _ => Bound::PosInf,
        };
        return Interval::new(Bound::Finite(0), high).meet(&range);
    }

    range
}

// =============================================================================
// String evaluation
// =============================================================================

/// Resolved string argument.
enum Piece {
    Current,
    Literal(String),
    Int(i64),
    Value(AbstractValue),
}

fn evaluate_string(
    index: usize,
    name: &str,
    effect: &StringEffect,
    pieces: &[Piece],
    current: &AbstractValue,
) -> Result<StringGuarantee> {
    let input = match current {
        AbstractValue::Text(g) => g,
        AbstractValue::Integer(iv) => {
            return match effect {
                StringEffect::NumericFormat { radix } => Ok(StringGuarantee::from_integer(iv, *radix)),
                _ => Err(ClassifierError::malformed(
                    index,
                    format!("string transform '{}' applied to an integer", name),
                )),
            };
        }
    };
    let ints: Vec<i64> = pieces
        .iter()
        .filter_map(|p| match p {
            Piece::Int(v) => Some(*v),
            _ => None,
        })
        .collect();

    let output = match effect {
        StringEffect::Escape(ctx) => StringGuarantee::new(CharsetConstraint::ExcludesMarkupControls(*ctx))
            .with_max_length(input.max_length.and_then(|m| m.checked_mul(ctx.max_expansion()))),
        StringEffect::AllowList(values) => StringGuarantee::enum_member(values.clone()),
        StringEffect::DigitFilter => {
            StringGuarantee::new(CharsetConstraint::DigitsOnly).with_max_length(input.max_length)
        }
        StringEffect::Mask { suffix, filler } => {
            let suffix = ints
                .first()
                .and_then(|v| usize::try_from(*v).ok())
                .unwrap_or(*suffix);
            mask(input, suffix, *filler)
        }
        StringEffect::Digest {
            encoding,
            output_len,
        } => {
            let charset = match encoding {
                DigestEncoding::Hex => CharsetConstraint::HexDigitsOnly,
                DigestEncoding::Base64 => CharsetConstraint::Base64Alphabet,
            };
            StringGuarantee::new(charset).with_max_length(Some(*output_len))
        }
        StringEffect::PassThrough { truncate } => pass_through(input, *truncate, &ints, pieces),
        StringEffect::CaseMap { lower } => input.case_mapped(*lower),
        StringEffect::Custom(f) => f(input),
        StringEffect::NumericFormat { .. } => {
            return Err(ClassifierError::malformed(
                index,
                format!("'{}' formats a number but the value is text", name),
            ));
        }
    };
    Ok(output)
}

fn mask(input: &StringGuarantee, suffix: usize, filler: char) -> StringGuarantee {
    let mut filler_class = CharClass::EMPTY;
    filler_class.insert(filler);
    let retained = (suffix > 0).then(|| {
        Box::new(RetainedSuffix {
            max_chars: suffix,
            charset: input.charset.clone(),
        })
    });
    StringGuarantee::new(CharsetConstraint::FixedFormat(FormatClass {
        chars: filler_class,
        pattern: None,
        retained,
    }))
    .with_max_length(input.max_length)
}

/// Substring, truncation and concatenation.
///
/// Literals are developer text and only add length. Every other piece joins
/// its charset into the result.
fn pass_through(
    input: &StringGuarantee,
    truncate: Option<usize>,
    ints: &[i64],
    pieces: &[Piece],
) -> StringGuarantee {
    let mut value = input.clone();
    match (truncate, ints) {
        (Some(len), _) => value = value.truncate(len),
        (None, [begin, end, ..]) if 0 <= *begin && begin <= end => {
            value = value.truncate(usize::try_from(end - begin).unwrap_or(usize::MAX));
        }
        _ => {}
    }

    let has_concat = pieces
        .iter()
        .any(|p| matches!(p, Piece::Literal(_) | Piece::Value(_)));
    if !has_concat {
        return value;
    }

    // Without an explicit position the receiver comes first.
    let receiver = Piece::Current;
    let mut ordered: Vec<&Piece> = Vec::with_capacity(pieces.len() + 1);
    if !pieces.iter().any(|p| matches!(p, Piece::Current)) {
        ordered.push(&receiver);
    }
    ordered.extend(pieces.iter().filter(|p| !matches!(p, Piece::Int(_))));

    let mut tainted: Option<StringGuarantee> = None;
    let mut prefix: Vec<&str> = Vec::new();
    let mut suffix: Vec<&str> = Vec::new();
    for piece in ordered {
        let part = match piece {
            Piece::Current => value.clone(),
            Piece::Value(AbstractValue::Text(g)) => g.clone(),
            Piece::Value(AbstractValue::Integer(iv)) => StringGuarantee::from_integer(iv, 10),
            Piece::Literal(text) => {
                if tainted.is_none() {
                    prefix.push(text);
                } else {
                    suffix.push(text);
                }
                continue;
            }
            Piece::Int(_) => continue,
        };
        tainted = Some(match tainted {
            None => part,
            Some(acc) => acc.concat(&part),
        });
    }

    let mut result = tainted.unwrap_or(value);
    for text in prefix.iter().rev() {
        result = result.concat_literal(text, true);
    }
    for text in suffix {
        result = result.concat_literal(text, false);
    }
    result
}

fn describe_effect(name: &str, effect: &StringEffect) -> String {
    match effect {
        StringEffect::Escape(ctx) => format!("{} escapes the whole value for {}", name, ctx),
        StringEffect::AllowList(values) => {
            format!("{} maps the value onto {} allowed strings", name, values.len())
        }
        StringEffect::NumericFormat { radix } => format!("{} renders a number in radix {}", name, radix),
        StringEffect::DigitFilter => format!("{} keeps only digits", name),
        StringEffect::Mask { filler, .. } => format!(
            "{} replaces all but a suffix with '{}'; the suffix keeps its original characters",
            name, filler
        ),
        StringEffect::Digest { encoding, output_len } => {
            format!("{} outputs a {:?} digest of {} characters", name, encoding, output_len)
        }
        StringEffect::PassThrough { .. } => format!("{} passes characters through unchanged", name),
        StringEffect::CaseMap { lower: true } => format!("{} lower-cases every letter", name),
        StringEffect::CaseMap { lower: false } => format!("{} upper-cases every letter", name),
        StringEffect::Custom(_) => format!("{} applies a registered guarantee", name),
    }
}

// =============================================================================
// Guard refinement
// =============================================================================

fn refine(index: usize, value: &AbstractValue, branch: &BranchGuard) -> Result<(AbstractValue, String)> {
    let passed = branch.outcome == GuardOutcome::Passed;
    match (&branch.condition, value) {
        (GuardCondition::Compare { op, bound }, AbstractValue::Integer(iv)) => {
            let op = if passed { *op } else { op.negate() };
            match op.admitted(*bound) {
                Some(admitted) => {
                    let refined = iv.meet(&admitted);
                    Ok((
                        AbstractValue::Integer(refined),
                        format!("guard value {} {} holds here", op.symbol(), bound),
                    ))
                }
                None => Ok((value.clone(), "guard does not bound the value".to_string())),
            }
        }
        (GuardCondition::Compare { .. }, AbstractValue::Text(_)) => Err(ClassifierError::malformed(
            index,
            "integer comparison guard on a text value",
        )),
        (GuardCondition::Matches { pattern, full_match }, AbstractValue::Text(g)) => {
            if !passed {
                return Ok((value.clone(), "validation failed on this branch, nothing learned".to_string()));
            }
            let (refined, explanation) = refine_match(index, g, pattern, *full_match)?;
            Ok((AbstractValue::Text(refined), explanation))
        }
        (GuardCondition::Matches { .. }, AbstractValue::Integer(_)) => Err(ClassifierError::malformed(
            index,
            "pattern guard on an integer value",
        )),
        (GuardCondition::InAllowList { values }, AbstractValue::Text(g)) => {
            if !passed {
                return Ok((value.clone(), "value is outside the allow-list on this branch".to_string()));
            }
            let allowed: BTreeSet<String> = match &g.value_set {
                Some(known) => known.intersection(values).cloned().collect(),
                None => values.clone(),
            };
            Ok((
                AbstractValue::Text(StringGuarantee::enum_member(allowed)),
                "value is a member of the allow-list".to_string(),
            ))
        }
        (GuardCondition::InAllowList { values }, AbstractValue::Integer(iv)) => {
            if !passed {
                return Ok((value.clone(), "value is outside the allow-list on this branch".to_string()));
            }
            let parsed: Vec<i64> = values.iter().filter_map(|v| v.parse::<i64>().ok()).collect();
            let refined = match (parsed.iter().min(), parsed.iter().max()) {
                (Some(lo), Some(hi)) => iv.meet(&Interval::range(*lo, *hi)),
                _ => Interval::empty(),
            };
            Ok((AbstractValue::Integer(refined), "value is a member of the allow-list".to_string()))
        }
    }
}

fn refine_match(
    index: usize,
    g: &StringGuarantee,
    pattern_text: &str,
    full_match: bool,
) -> Result<(StringGuarantee, String)> {
    if let Some(values) = &g.value_set {
        let anchored = if full_match {
            format!("^(?:{})$", pattern_text)
        } else {
            pattern_text.to_string()
        };
        let re = Regex::new(&anchored)
            .map_err(|e| ClassifierError::malformed(index, format!("invalid guard pattern: {}", e)))?;
        let kept: BTreeSet<String> = values.iter().filter(|v| re.is_match(v)).cloned().collect();
        return Ok((
            StringGuarantee::enum_member(kept),
            format!("known values filtered by /{}/", pattern_text),
        ));
    }

    let Some(shape) = pattern::analyze(pattern_text, full_match) else {
        return Ok((
            g.clone(),
            format!("pattern /{}/ does not confine the character set", pattern_text),
        ));
    };

    let charset = match &g.charset {
        // Escaped text may legitimately contain the escape introducer, so
        // the pattern only replaces the escape when it is at least as strict.
        CharsetConstraint::ExcludesMarkupControls(ctx) if ctx.output_class().is_none() => {
            if shape.class.intersects(&ctx.neutralized()) {
                g.charset.clone()
            } else {
                with_pattern(CharsetConstraint::from_class(shape.class), pattern_text)
            }
        }
        other => with_pattern(
            CharsetConstraint::from_class(other.possible_chars().intersect(&shape.class)),
            pattern_text,
        ),
    };
    let max_length = match (g.max_length, shape.max_length) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    };

    Ok((
        StringGuarantee {
            charset,
            max_length,
            value_set: None,
        },
        format!("validated against /{}/", pattern_text),
    ))
}

fn with_pattern(charset: CharsetConstraint, pattern_text: &str) -> CharsetConstraint {
    match charset {
        CharsetConstraint::FixedFormat(mut format) => {
            format.pattern = Some(pattern_text.to_string());
            CharsetConstraint::FixedFormat(format)
        }
        other => other,
    }
}
