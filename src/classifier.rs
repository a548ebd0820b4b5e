//! Classifier facade.
//!
//! Wires configuration, registry, abstractor, checkers and aggregator
//! together. Analysis is stateless per path: a batch runs on the rayon pool
//! and shares nothing but the immutable registry and configuration.
//!
//! Per-path failures never escape. A malformed path, or one that exceeds the
//! step limit, produces an `Unknown` verdict explaining why; the rest of the
//! batch is unaffected.

use rayon::prelude::*;
use tracing::{debug, info};

use crate::abstractor::{Abstraction, Abstractor};
use crate::config::ClassifierConfig;
use crate::error::{ClassifierError, Result};
use crate::interval::Interval;
use crate::loop_bound;
use crate::path::PathDescriptor;
use crate::registry::TransformRegistry;
use crate::sink::{self, SinkContext};
use crate::verdict::{Assessment, DecisionAggregator, Outcome, RationaleStep, Verdict};

/// Taint-flow safety classifier.
#[derive(Debug, Clone)]
pub struct Classifier<'r> {
    config: ClassifierConfig,
    ceiling: u64,
    registry: &'r TransformRegistry,
}

impl Classifier<'static> {
    /// Classifier over the process-wide registry.
    ///
    /// # Errors
    ///
    /// `Configuration` if the configuration is invalid.
    pub fn new(config: ClassifierConfig) -> Result<Self> {
        Self::with_registry(config, TransformRegistry::global())
    }
}

impl<'r> Classifier<'r> {
    /// Classifier over a caller-owned registry.
    ///
    /// # Errors
    ///
    /// `Configuration` if the configuration is invalid or the registry is
    /// empty.
    pub fn with_registry(config: ClassifierConfig, registry: &'r TransformRegistry) -> Result<Self> {
        config.validate()?;
        if registry.is_empty() {
            return Err(ClassifierError::config("transform registry is empty"));
        }
        let ceiling = config.ceiling()?;
        info!(
            ceiling,
            transforms = registry.len(),
            max_path_steps = ?config.max_path_steps,
            "classifier ready"
        );
        Ok(Self {
            config,
            ceiling,
            registry,
        })
    }

    #[must_use]
    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    fn abstractor(&self) -> Abstractor<'r> {
        Abstractor::new(self.registry).with_max_steps(self.config.max_path_steps)
    }

    /// Classify one path.
    #[must_use]
    pub fn classify(&self, path: &PathDescriptor) -> Verdict {
        let sink = path.sink();
        let mut aggregator = DecisionAggregator::new(sink);
        match self.run(path, &mut aggregator) {
            Ok(verdict) => verdict,
            Err(error) => {
                debug!(error = %error, "path classification failed");
                Verdict::unknown(sink, &error)
            }
        }
    }

    fn run(&self, path: &PathDescriptor, aggregator: &mut DecisionAggregator) -> Result<Verdict> {
        aggregator.record_abstraction(self.abstractor().abstract_path(path))?;
        if let Some(abstraction) = aggregator.abstraction() {
            let assessment = self.assess(abstraction);
            aggregator.record_assessment(assessment)?;
        }
        aggregator.finish()
    }

    fn assess(&self, abstraction: &Abstraction) -> Result<Assessment> {
        let last = abstraction.trace.len().saturating_sub(1);
        let sink = abstraction
            .sink
            .ok_or_else(|| ClassifierError::malformed(last, "path does not end in a sink tag"))?;

        if !sink.is_string_sink() {
            return loop_bound::check_abstraction(abstraction, self.ceiling).ok_or_else(|| {
                ClassifierError::malformed(last, "loop bound sink reached by a text value")
            });
        }
        Ok(sink::classify_sink(
            sink,
            abstraction,
            self.config.disclosure_sinks(),
        ))
    }

    /// Classify a loop nest, one path per loop bound from outermost to
    /// innermost.
    #[must_use]
    pub fn classify_loop_nest(&self, paths: &[PathDescriptor]) -> Verdict {
        let mut bounds: Vec<Interval> = Vec::with_capacity(paths.len());
        let mut rationale = Vec::new();
        let mut notes = Vec::new();

        for (depth, path) in paths.iter().enumerate() {
            let abstraction = match self.abstractor().abstract_path(path) {
                Ok(abstraction) => abstraction,
                Err(error) => {
                    let mut verdict = Verdict::unknown(Some(SinkContext::LoopBound), &error);
                    verdict.notes.push(format!("loop at depth {} could not be analyzed", depth));
                    return verdict;
                }
            };
            if abstraction.pending_unknown.is_some() && abstraction.bounding_step.is_none() {
                notes.push(format!("loop at depth {} depends on an unrecognized operator", depth));
            }
            match (abstraction.sink, abstraction.value.as_interval()) {
                (Some(SinkContext::LoopBound), Some(iv)) => {
                    rationale.push(RationaleStep {
                        step: abstraction.bounding_step,
                        operation: format!("loop bound at depth {}", depth),
                        guarantee: iv.to_string(),
                        explanation: abstraction
                            .bounding_step
                            .and_then(|s| abstraction.operation_at(s))
                            .map_or_else(
                                || "no step narrows the bound".to_string(),
                                |op| format!("bounded by {}", op),
                            ),
                    });
                    bounds.push(*iv);
                    notes.extend(abstraction.notes);
                }
                _ => {
                    let error = ClassifierError::malformed(
                        abstraction.trace.len().saturating_sub(1),
                        format!("loop at depth {} does not end in an integer loop bound", depth),
                    );
                    return Verdict::unknown(Some(SinkContext::LoopBound), &error);
                }
            }
        }

        let nest = loop_bound::check_loop_nest(&bounds, self.ceiling);
        rationale.extend(nest.rationale);
        notes.extend(nest.notes);
        let verdict = Verdict {
            outcome: nest.outcome,
            sink: Some(SinkContext::LoopBound),
            rationale,
            notes,
        };
        debug!(depth = paths.len(), outcome = %verdict.outcome, "loop nest verdicted");
        verdict
    }

    /// Classify a batch of paths in parallel. Verdicts are returned in input
    /// order.
    #[must_use]
    pub fn classify_batch(&self, paths: &[PathDescriptor]) -> Vec<Verdict> {
        let verdicts: Vec<Verdict> = paths.par_iter().map(|path| self.classify(path)).collect();
        let unsafe_count = verdicts
            .iter()
            .filter(|v| v.outcome == Outcome::Unsafe)
            .count();
        debug!(paths = paths.len(), unsafe_count, "batch classified");
        verdicts
    }

    /// Classify a persisted descriptor. Parse failures become `Unknown`.
    #[must_use]
    pub fn classify_json(&self, json: &str) -> Verdict {
        match PathDescriptor::from_json_str(json) {
            Ok(path) => self.classify(&path),
            Err(error) => Verdict::unknown(None, &error),
        }
    }
}
