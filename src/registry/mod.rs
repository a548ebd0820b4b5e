//! Transform registry.
//!
//! Catalogue of named numeric and string transforms together with the
//! machine-checkable effect each one has on an abstract value. The
//! abstractor never interprets a transform by name: it looks the name up
//! here and applies the declared effect.
//!
//! # Lifecycle
//!
//! Registration happens once, at startup, through [`RegistryBuilder`]. After
//! `build()` (owned registry) or `install()` (process-wide registry) the
//! catalogue is immutable and can be shared freely between threads.
//!
//! ```ignore
//! let mut builder = RegistryBuilder::with_builtins();
//! builder.register_transform(
//!     "Sanitizers.cleanTag",
//!     TransformDomain::String,
//!     StringEffect::Escape(EscapeContext::Html),
//! )?;
//! let registry = builder.build()?;
//! ```

pub mod builtins;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, OnceLock};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ClassifierError, Result};
use crate::guarantee::{EscapeContext, StringGuarantee};
use crate::interval::Interval;
use crate::path::NumericOpKind;

static REGISTRY: OnceLock<TransformRegistry> = OnceLock::new();

// =============================================================================
// Effects
// =============================================================================

/// Kind of value a transform consumes and produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformDomain {
    Numeric,
    String,
}

impl fmt::Display for TransformDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformDomain::Numeric => write!(f, "numeric"),
            TransformDomain::String => write!(f, "string"),
        }
    }
}

/// Output alphabet of a digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DigestEncoding {
    Hex,
    Base64,
}

/// Custom numeric effect over the resolved operand intervals.
pub type NumericFn = Arc<dyn Fn(&[Interval]) -> Interval + Send + Sync>;

/// Custom string effect over the input guarantee.
pub type StringFn = Arc<dyn Fn(&StringGuarantee) -> StringGuarantee + Send + Sync>;

/// Effect of a numeric transform.
#[derive(Clone)]
pub enum NumericEffect {
    /// Alias for a built-in operator (`Math.min` is `Min`).
    Builtin(NumericOpKind),
    /// Caller-supplied interval function.
    Custom(NumericFn),
}

/// Effect of a string transform.
#[derive(Clone)]
pub enum StringEffect {
    /// Escapes or encodes the whole value for a context.
    Escape(EscapeContext),
    /// Maps the value onto one of a fixed set of strings.
    AllowList(BTreeSet<String>),
    /// Renders a number in the given radix (10 or 16).
    NumericFormat { radix: u32 },
    /// Keeps only the digits of the input.
    DigitFilter,
    /// Replaces all but the last `suffix` characters with `filler`.
    Mask { suffix: usize, filler: char },
    /// Fixed-length digest of the input.
    Digest {
        encoding: DigestEncoding,
        output_len: usize,
    },
    /// Substring, truncation and concatenation. The charset is untouched.
    PassThrough { truncate: Option<usize> },
    /// Upper- or lower-case mapping of every character.
    CaseMap { lower: bool },
    /// Caller-supplied guarantee function.
    Custom(StringFn),
}

impl StringEffect {
    /// Whether applying this effect establishes a new guarantee.
    #[must_use]
    pub fn is_sanitizing(&self) -> bool {
        !matches!(
            self,
            StringEffect::PassThrough { .. } | StringEffect::CaseMap { .. }
        )
    }

    /// Whether the output no longer discloses the input.
    #[must_use]
    pub fn is_redacting(&self) -> bool {
        matches!(self, StringEffect::Mask { .. } | StringEffect::Digest { .. })
    }
}

impl fmt::Debug for NumericEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumericEffect::Builtin(kind) => f.debug_tuple("Builtin").field(kind).finish(),
            NumericEffect::Custom(_) => write!(f, "Custom(<fn>)"),
        }
    }
}

impl fmt::Debug for StringEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StringEffect::Escape(ctx) => f.debug_tuple("Escape").field(ctx).finish(),
            StringEffect::AllowList(values) => f.debug_tuple("AllowList").field(values).finish(),
            StringEffect::NumericFormat { radix } => {
                f.debug_struct("NumericFormat").field("radix", radix).finish()
            }
            StringEffect::DigitFilter => write!(f, "DigitFilter"),
            StringEffect::Mask { suffix, filler } => f
                .debug_struct("Mask")
                .field("suffix", suffix)
                .field("filler", filler)
                .finish(),
            StringEffect::Digest {
                encoding,
                output_len,
            } => f
                .debug_struct("Digest")
                .field("encoding", encoding)
                .field("output_len", output_len)
                .finish(),
            StringEffect::PassThrough { truncate } => f
                .debug_struct("PassThrough")
                .field("truncate", truncate)
                .finish(),
            StringEffect::CaseMap { lower } => f.debug_struct("CaseMap").field("lower", lower).finish(),
            StringEffect::Custom(_) => write!(f, "Custom(<fn>)"),
        }
    }
}

/// Declared effect of a registered transform.
#[derive(Debug, Clone)]
pub enum TransformEffect {
    Numeric(NumericEffect),
    String(StringEffect),
}

impl TransformEffect {
    #[must_use]
    pub fn domain(&self) -> TransformDomain {
        match self {
            TransformEffect::Numeric(_) => TransformDomain::Numeric,
            TransformEffect::String(_) => TransformDomain::String,
        }
    }
}

impl From<NumericEffect> for TransformEffect {
    fn from(effect: NumericEffect) -> Self {
        TransformEffect::Numeric(effect)
    }
}

impl From<NumericOpKind> for TransformEffect {
    fn from(kind: NumericOpKind) -> Self {
        TransformEffect::Numeric(NumericEffect::Builtin(kind))
    }
}

impl From<StringEffect> for TransformEffect {
    fn from(effect: StringEffect) -> Self {
        TransformEffect::String(effect)
    }
}

/// A named transform and its effect.
#[derive(Debug, Clone)]
pub struct Transform {
    pub name: String,
    pub effect: TransformEffect,
}

impl Transform {
    #[inline]
    #[must_use]
    pub fn domain(&self) -> TransformDomain {
        self.effect.domain()
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Immutable transform catalogue.
#[derive(Debug, Clone, Default)]
pub struct TransformRegistry {
    transforms: FxHashMap<String, Transform>,
}

impl TransformRegistry {
    /// Get the process-wide registry.
    ///
    /// Returns the registry set by [`RegistryBuilder::install`], or the
    /// built-in catalogue if nothing was installed.
    pub fn global() -> &'static Self {
        REGISTRY.get_or_init(builtins::builtin_transforms)
    }

    /// Look up a transform by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Transform> {
        self.transforms.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.transforms.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Registered names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.transforms.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Insert a built-in transform. Later entries replace earlier ones.
    pub(crate) fn add(&mut self, name: &str, effect: impl Into<TransformEffect>) {
        self.transforms.insert(
            name.to_string(),
            Transform {
                name: name.to_string(),
                effect: effect.into(),
            },
        );
    }
}

/// Single-phase registry construction.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    registry: TransformRegistry,
}

impl RegistryBuilder {
    /// Start from an empty catalogue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from the built-in catalogue.
    #[must_use]
    pub fn with_builtins() -> Self {
        Self {
            registry: builtins::builtin_transforms(),
        }
    }

    /// Register a transform.
    ///
    /// # Errors
    ///
    /// `Configuration` if the name is already registered, if the effect does
    /// not belong to `domain`, or if a numeric alias points at `Call`.
    pub fn register_transform(
        &mut self,
        name: impl Into<String>,
        domain: TransformDomain,
        effect: impl Into<TransformEffect>,
    ) -> Result<&mut Self> {
        let name = name.into();
        let effect = effect.into();

        if name.is_empty() {
            return Err(ClassifierError::config("transform name is empty"));
        }
        if self.registry.contains(&name) {
            return Err(ClassifierError::config(format!(
                "transform '{}' is already registered",
                name
            )));
        }
        if effect.domain() != domain {
            return Err(ClassifierError::config(format!(
                "transform '{}' is declared {} but its effect is {}",
                name,
                domain,
                effect.domain()
            )));
        }
        if let TransformEffect::Numeric(NumericEffect::Builtin(NumericOpKind::Call(target))) = &effect
        {
            return Err(ClassifierError::config(format!(
                "transform '{}' aliases call '{}'; register the target's effect instead",
                name, target
            )));
        }
        if let TransformEffect::String(StringEffect::NumericFormat { radix }) = &effect {
            if *radix != 10 && *radix != 16 {
                return Err(ClassifierError::config(format!(
                    "transform '{}' formats in unsupported radix {}",
                    name, radix
                )));
            }
        }

        debug!(transform = %name, domain = %domain, "registered transform");
        self.registry.transforms.insert(
            name.clone(),
            Transform { name, effect },
        );
        Ok(self)
    }

    /// Finish registration and return an owned registry.
    ///
    /// # Errors
    ///
    /// `Configuration` if no transform is registered.
    pub fn build(self) -> Result<TransformRegistry> {
        if self.registry.is_empty() {
            return Err(ClassifierError::config("transform registry is empty"));
        }
        Ok(self.registry)
    }

    /// Finish registration and install the result as the process-wide
    /// registry.
    ///
    /// # Errors
    ///
    /// `Configuration` if the registry is empty or one is already installed.
    pub fn install(self) -> Result<&'static TransformRegistry> {
        let registry = self.build()?;
        let count = registry.len();
        REGISTRY
            .set(registry)
            .map_err(|_| ClassifierError::config("transform registry is already installed"))?;
        info!(transforms = count, "installed transform registry");
        Ok(TransformRegistry::global())
    }
}
