//! Verdicts and the per-path decision aggregator.
//!
//! Every path moves through a fixed sequence of states:
//!
//! ```text
//! Pending ──abstract──> Abstracted ──classify──> Classified ──finish──> Verdicted
//!    │                               │                                     ^
//!    └── abstraction error ──────────┴── classification error (Unknown) ──┘
//! ```
//!
//! The only shortcuts are an abstraction or classification failure, which go
//! straight to an `Unknown` verdict explaining the malformed step. Any other
//! out-of-order transition is a caller bug and is reported as `MalformedPath`.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::abstractor::Abstraction;
use crate::error::{ClassifierError, Result};
use crate::sink::SinkContext;

// =============================================================================
// Outcome
// =============================================================================

/// Final classification of a path.
///
/// Ordered from best to worst so that `max` combines independent axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Safe,
    Unknown,
    Unsafe,
}

impl Outcome {
    /// The worse of two outcomes.
    #[inline]
    #[must_use]
    pub fn worst(self, other: Outcome) -> Outcome {
        self.max(other)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Outcome::Safe => "SAFE",
            Outcome::Unknown => "UNKNOWN",
            Outcome::Unsafe => "UNSAFE",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One line of the "why" behind a verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RationaleStep {
    /// Path step this entry is about, if any.
    pub step: Option<usize>,
    /// Human-readable operation.
    pub operation: String,
    /// Abstract value after the operation.
    pub guarantee: String,
    pub explanation: String,
}

/// Decision produced by a checker for one axis or the whole path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assessment {
    pub outcome: Outcome,
    pub rationale: Vec<RationaleStep>,
    pub notes: Vec<String>,
}

impl Assessment {
    #[must_use]
    pub fn new(outcome: Outcome) -> Self {
        Self {
            outcome,
            rationale: Vec::new(),
            notes: Vec::new(),
        }
    }

    /// Fold another axis in: the outcome is the worse of the two.
    pub fn merge(&mut self, other: Assessment) {
        self.outcome = self.outcome.worst(other.outcome);
        self.rationale.extend(other.rationale);
        self.notes.extend(other.notes);
    }
}

/// Classification of one path, with its rationale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub outcome: Outcome,
    pub sink: Option<SinkContext>,
    pub rationale: Vec<RationaleStep>,
    #[serde(default)]
    pub notes: Vec<String>,
}

impl Verdict {
    /// `Unknown` verdict for a path that could not be analyzed.
    #[must_use]
    pub fn unknown(sink: Option<SinkContext>, error: &ClassifierError) -> Self {
        let step = match error {
            ClassifierError::MalformedPath { step, .. } => Some(*step),
            _ => None,
        };
        Self {
            outcome: Outcome::Unknown,
            sink,
            rationale: vec![RationaleStep {
                step,
                operation: "analysis".to_string(),
                guarantee: "none".to_string(),
                explanation: error.to_string(),
            }],
            notes: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_safe(&self) -> bool {
        self.outcome == Outcome::Safe
    }

    /// Multi-line "WHY SAFE / WHY UNSAFE" report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut out = format!("WHY {}", self.outcome);
        if let Some(sink) = self.sink {
            out.push_str(&format!(" at {}", sink));
        }
        out.push('\n');
        for entry in &self.rationale {
            match entry.step {
                Some(step) => out.push_str(&format!("  #{} {}", step, entry.operation)),
                None => out.push_str(&format!("  {}", entry.operation)),
            }
            out.push_str(&format!(" => {}: {}\n", entry.guarantee, entry.explanation));
        }
        for note in &self.notes {
            out.push_str(&format!("  note: {}\n", note));
        }
        out
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.report())
    }
}

// =============================================================================
// Aggregator
// =============================================================================

/// Aggregator state.
#[derive(Debug)]
pub enum PathState {
    Pending,
    Abstracted(Abstraction),
    Classified {
        abstraction: Abstraction,
        assessment: Assessment,
    },
    Verdicted(Verdict),
}

impl PathState {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            PathState::Pending => "pending",
            PathState::Abstracted(_) => "abstracted",
            PathState::Classified { .. } => "classified",
            PathState::Verdicted(_) => "verdicted",
        }
    }
}

/// Drives one path through `Pending -> Abstracted -> Classified -> Verdicted`.
#[derive(Debug)]
pub struct DecisionAggregator {
    sink: Option<SinkContext>,
    state: PathState,
}

impl DecisionAggregator {
    #[must_use]
    pub fn new(sink: Option<SinkContext>) -> Self {
        Self {
            sink,
            state: PathState::Pending,
        }
    }

    #[must_use]
    pub fn state(&self) -> &PathState {
        &self.state
    }

    fn transition_error(&self, action: &str) -> ClassifierError {
        ClassifierError::malformed(
            0,
            format!("cannot {} a path in state '{}'", action, self.state.name()),
        )
    }

    /// Record the abstractor's result. A failed abstraction ends the path
    /// with an `Unknown` verdict.
    pub fn record_abstraction(&mut self, result: Result<Abstraction>) -> Result<()> {
        if !matches!(self.state, PathState::Pending) {
            return Err(self.transition_error("abstract"));
        }
        self.state = match result {
            Ok(abstraction) => PathState::Abstracted(abstraction),
            Err(error) => {
                debug!(error = %error, "path abstraction failed");
                PathState::Verdicted(Verdict::unknown(self.sink, &error))
            }
        };
        Ok(())
    }

    /// Abstraction produced so far, for the checkers.
    #[must_use]
    pub fn abstraction(&self) -> Option<&Abstraction> {
        match &self.state {
            PathState::Abstracted(abstraction) => Some(abstraction),
            _ => None,
        }
    }

    /// Record the checker's decision. A checker that cannot decide the path
    /// ends it with an `Unknown` verdict.
    pub fn record_assessment(&mut self, result: Result<Assessment>) -> Result<()> {
        match std::mem::replace(&mut self.state, PathState::Pending) {
            PathState::Abstracted(abstraction) => {
                self.state = match result {
                    Ok(assessment) => PathState::Classified {
                        abstraction,
                        assessment,
                    },
                    Err(error) => {
                        debug!(error = %error, "path classification failed");
                        PathState::Verdicted(Verdict::unknown(self.sink, &error))
                    }
                };
                Ok(())
            }
            other => {
                self.state = other;
                Err(self.transition_error("classify"))
            }
        }
    }

    /// Produce the verdict.
    ///
    /// The rationale lists the abstracted steps in path order followed by
    /// the checker's decision entries.
    pub fn finish(&mut self) -> Result<Verdict> {
        match std::mem::replace(&mut self.state, PathState::Pending) {
            PathState::Classified {
                abstraction,
                assessment,
            } => {
                let mut rationale: Vec<RationaleStep> = abstraction
                    .trace
                    .iter()
                    .map(|entry| RationaleStep {
                        step: Some(entry.step),
                        operation: entry.operation.clone(),
                        guarantee: entry.value.to_string(),
                        explanation: entry.explanation.clone(),
                    })
                    .collect();
                rationale.extend(assessment.rationale);

                let mut notes = abstraction.notes;
                notes.extend(assessment.notes);

                let verdict = Verdict {
                    outcome: assessment.outcome,
                    sink: self.sink,
                    rationale,
                    notes,
                };
                debug!(outcome = %verdict.outcome, sink = ?self.sink, "path verdicted");
                self.state = PathState::Verdicted(verdict.clone());
                Ok(verdict)
            }
            PathState::Verdicted(verdict) => {
                self.state = PathState::Verdicted(verdict.clone());
                Ok(verdict)
            }
            other => {
                self.state = other;
                Err(self.transition_error("finish"))
            }
        }
    }
}
