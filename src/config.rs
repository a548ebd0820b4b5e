//! Classifier configuration.
//!
//! Loaded from JSON, typically `taint-verdict.json`:
//!
//! ```json
//! {
//!   "loop_ceiling": 10000,
//!   "max_path_steps": 512,
//!   "disclosure_sinks": ["html_body", "log_record"]
//! }
//! ```
//!
//! `loop_ceiling` has no default: the acceptable iteration count is a policy
//! decision and a missing value is a configuration error.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ClassifierError, Result};
use crate::sink::SinkContext;

/// Classifier settings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Maximum acceptable loop iteration count `K`.
    #[serde(default)]
    pub loop_ceiling: Option<u64>,

    /// Paths with more steps are abandoned with an `Unknown` verdict.
    #[serde(default)]
    pub max_path_steps: Option<usize>,

    /// Sinks where sensitive data counts as disclosed. Defaults to the
    /// output sinks (HTML body and attribute, log record, raw file write).
    #[serde(default)]
    pub disclosure_sinks: Option<Vec<SinkContext>>,
}

impl ClassifierConfig {
    /// Configuration with only a loop ceiling.
    #[must_use]
    pub fn with_ceiling(loop_ceiling: u64) -> Self {
        Self {
            loop_ceiling: Some(loop_ceiling),
            ..Self::default()
        }
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: ClassifierConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text =
            std::fs::read_to_string(path).map_err(|e| ClassifierError::io_with_path(e, path))?;
        let config = Self::from_json_str(&text)?;
        debug!(path = %path.display(), ceiling = ?config.loop_ceiling, "loaded classifier config");
        Ok(config)
    }

    /// Check the configuration before any path is processed.
    ///
    /// # Errors
    ///
    /// `Configuration` if the loop ceiling is missing or zero, or if the
    /// step limit is zero.
    pub fn validate(&self) -> Result<()> {
        match self.loop_ceiling {
            None => return Err(ClassifierError::config("loop ceiling is not set")),
            Some(0) => return Err(ClassifierError::config("loop ceiling must be positive")),
            Some(_) => {}
        }
        if self.max_path_steps == Some(0) {
            return Err(ClassifierError::config("max_path_steps must be positive"));
        }
        if let Some(sinks) = &self.disclosure_sinks {
            if sinks.contains(&SinkContext::LoopBound) {
                warn!("loop_bound listed as a disclosure sink; it carries no string value");
            }
        }
        Ok(())
    }

    /// Validated loop ceiling.
    ///
    /// # Errors
    ///
    /// `Configuration` if the ceiling is missing or zero.
    pub fn ceiling(&self) -> Result<u64> {
        match self.loop_ceiling {
            Some(k) if k > 0 => Ok(k),
            _ => Err(ClassifierError::config("loop ceiling is not set")),
        }
    }

    /// Sinks where sensitive data counts as disclosed.
    #[must_use]
    pub fn disclosure_sinks(&self) -> &[SinkContext] {
        self.disclosure_sinks
            .as_deref()
            .unwrap_or(SinkContext::default_disclosure_sinks())
    }
}
