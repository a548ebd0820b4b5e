//! Taint-flow safety classifier for SAST rule engines.
//!
//! Given a value that starts at an untrusted source and flows through a chain
//! of transforms into a sensitive operation, decide whether the path is safe
//! and explain why. Two analyses share one abstract domain:
//!
//! - **Loop bounds**: an interval analysis proves (or fails to prove) that a
//!   tainted loop bound stays under a configured ceiling.
//! - **Output sinks**: a sanitizer-chain model proves that a tainted string
//!   cannot carry characters the sink context forbids, and that sensitive
//!   data is redacted before it is shown or logged.
//!
//! The classifier consumes an already linearized [`PathDescriptor`] and
//! never inspects program text.
//!
//! # Usage
//!
//! ```ignore
//! use taint_verdict::{Classifier, ClassifierConfig, Operand, PathBuilder, SinkContext, SourceSpec};
//!
//! let classifier = Classifier::new(ClassifierConfig::with_ceiling(1_000))?;
//!
//! let path = PathBuilder::new(SourceSpec::text("request.getParameter"))
//!     .call("Integer.parseInt", vec![])
//!     .call("Math.min", vec![Operand::Current, Operand::Const(100)])
//!     .sink(SinkContext::LoopBound);
//!
//! let verdict = classifier.classify(&path);
//! println!("{}", verdict.report());
//! ```
//!
//! # Modules
//!
//! - [`interval`]: integer interval domain
//! - [`guarantee`]: string guarantees, character classes, pattern reader
//! - [`registry`]: transform catalogue (built-ins and startup registration)
//! - [`path`]: path descriptors and their JSON form
//! - [`abstractor`]: one-pass evaluation of a path
//! - [`loop_bound`], [`sink`]: the two checkers
//! - [`verdict`]: verdicts and the per-path state machine
//! - [`classifier`]: single, loop-nest and batch entry points

pub mod abstractor;
pub mod classifier;
pub mod config;
pub mod error;
pub mod guarantee;
pub mod interval;
pub mod loop_bound;
pub mod path;
pub mod registry;
pub mod sink;
pub mod verdict;

pub use abstractor::{AbstractValue, Abstraction, Abstractor, StepTrace};
pub use classifier::Classifier;
pub use config::ClassifierConfig;
pub use error::{ClassifierError, Result};
pub use guarantee::{
    CharClass, CharsetConstraint, EscapeContext, FormatClass, RetainedSuffix, StringGuarantee,
};
pub use interval::{Bound, IntType, Interval};
pub use path::{
    BranchGuard, BranchId, CompareOp, GuardCondition, GuardOutcome, NumericOpKind, Operand,
    Operation, PathBuilder, PathDescriptor, SourceKind, SourceSpec, Step, StringArg,
    PATH_FORMAT_VERSION,
};
pub use registry::{
    DigestEncoding, NumericEffect, RegistryBuilder, StringEffect, Transform, TransformDomain,
    TransformEffect, TransformRegistry,
};
pub use sink::{SinkContext, SinkRequirement};
pub use verdict::{Outcome, RationaleStep, Verdict};
