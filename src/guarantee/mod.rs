//! String guarantees.
//!
//! A [`StringGuarantee`] is the string half of the abstract value domain. It
//! records what a transform chain has proven about a tainted string:
//!
//! - `charset`: which characters may appear, as a [`CharsetConstraint`]
//! - `max_length`: an upper bound on the length, if any
//! - `value_set`: the finite set of possible values, if known
//!
//! # Charset Constraints
//!
//! ```text
//! Unconstrained                       nothing proven (raw source)
//! ExcludesMarkupControls(context)     escaped/encoded for a context
//! DigitsOnly / HexDigitsOnly          numeric reformatting, digests
//! Base64Alphabet                      base64-encoded digests
//! FixedFormat(class)                  regex validation, masking
//! EnumMember(values)                  allow-list membership
//! ```
//!
//! Escaping contexts are not interchangeable: HTML entity encoding leaves
//! backslashes and newlines alone, so it does not protect a script string.
//! Each [`EscapeContext`] declares which raw characters it neutralizes.

pub mod charset;
pub mod pattern;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub use charset::CharClass;

use crate::interval::{Bound, Interval};

// =============================================================================
// Escape Contexts
// =============================================================================

/// Output context an escaping transform encodes for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscapeContext {
    /// HTML entity encoding (`&lt; &gt; &amp; &quot; &#x27;`)
    Html,
    /// HTML attribute encoding (entity-encodes every non-alphanumeric)
    HtmlAttribute,
    /// JavaScript / JSON string escaping (`\"`, `\\`, `\n`, `\x3C`, ...)
    Script,
    /// URL percent-encoding
    Url,
    /// CSS escaping (`\3C `)
    Css,
}

impl EscapeContext {
    /// Raw characters guaranteed absent from the escaped output.
    #[must_use]
    pub fn neutralized(self) -> CharClass {
        match self {
            Self::Html => CharClass::from_chars("<>&\"'"),
            Self::HtmlAttribute => CharClass::from_chars("<>&\"'`="),
            Self::Script => CharClass::from_chars("<>&\"'\\\n\r"),
            Self::Url | Self::Css => self
                .output_class()
                .map(|c| c.complement())
                .unwrap_or(CharClass::EMPTY),
        }
    }

    /// Exact output alphabet, for encodings whose output is a fixed alphabet.
    ///
    /// Entity and backslash encodings emit the escape introducer itself
    /// (`&`, `\`), so they have no alphabet that a character check could use.
    #[must_use]
    pub fn output_class(self) -> Option<CharClass> {
        match self {
            Self::Url => Some(CharClass::url_unreserved().union(&CharClass::from_chars("%+"))),
            Self::Css => Some(CharClass::alphanumeric().union(&CharClass::from_chars("\\ "))),
            Self::Html | Self::HtmlAttribute | Self::Script => None,
        }
    }

    /// Most output characters a single input character can expand to.
    #[must_use]
    pub const fn max_expansion(self) -> usize {
        match self {
            // &quot; &#x27; &#x60;
            Self::Html | Self::HtmlAttribute => 6,
            // \u003C
            Self::Script => 6,
            // four UTF-8 bytes, each %XX
            Self::Url => 12,
            // \10FFFF plus the terminating space
            Self::Css => 8,
        }
    }

    /// Whether a value escaped for `self` is also escaped for `other`.
    #[must_use]
    pub fn covers(self, other: EscapeContext) -> bool {
        self == other || matches!((self, other), (Self::HtmlAttribute, Self::Html))
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::HtmlAttribute => "html_attribute",
            Self::Script => "script",
            Self::Url => "url",
            Self::Css => "css",
        }
    }
}

impl fmt::Display for EscapeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Fixed Formats
// =============================================================================

/// Characters kept verbatim from the input by a masking transform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RetainedSuffix {
    /// At most this many original characters survive.
    pub max_chars: usize,
    /// What was known about those characters before masking.
    pub charset: CharsetConstraint,
}

/// A validated or constructed format.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FormatClass {
    /// Characters the format itself may produce.
    pub chars: CharClass,
    /// Validation pattern this class was derived from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Original characters carried through a mask.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retained: Option<Box<RetainedSuffix>>,
}

impl FormatClass {
    #[must_use]
    pub fn of(chars: CharClass) -> Self {
        Self {
            chars,
            pattern: None,
            retained: None,
        }
    }
}

// =============================================================================
// Charset Constraint
// =============================================================================

/// What is known about the characters of a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CharsetConstraint {
    /// Nothing is known.
    Unconstrained,
    /// Escaped or encoded for the given context over the entire value.
    ExcludesMarkupControls(EscapeContext),
    /// `[0-9]` only.
    DigitsOnly,
    /// `[0-9a-fA-F]` only.
    HexDigitsOnly,
    /// Base64 alphabet (standard or URL-safe) only.
    Base64Alphabet,
    /// A specific character class, optionally with a masked suffix.
    FixedFormat(FormatClass),
    /// One of a finite set of developer-chosen values.
    EnumMember(BTreeSet<String>),
}

impl CharsetConstraint {
    /// Constraint after an upper- or lower-case mapping. Case mappings only
    /// ever produce letters, so escaping and the named alphabets survive.
    #[must_use]
    pub fn case_mapped(&self, to_lower: bool) -> CharsetConstraint {
        match self {
            Self::FixedFormat(format) => Self::FixedFormat(FormatClass {
                chars: format.chars.case_mapped(to_lower),
                pattern: None,
                retained: format.retained.as_ref().map(|retained| {
                    let grows = retained.charset.possible_chars().has_non_ascii();
                    Box::new(RetainedSuffix {
                        max_chars: if grows {
                            retained.max_chars.saturating_mul(3)
                        } else {
                            retained.max_chars
                        },
                        charset: retained.charset.case_mapped(to_lower),
                    })
                }),
            }),
            Self::EnumMember(values) => {
                Self::EnumMember(values.iter().map(|v| map_case(v, to_lower)).collect())
            }
            other => other.clone(),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_unconstrained(&self) -> bool {
        matches!(self, Self::Unconstrained)
    }

    /// Characters that may appear raw (unencoded) in the value.
    #[must_use]
    pub fn possible_chars(&self) -> CharClass {
        match self {
            Self::Unconstrained => CharClass::ANY,
            Self::ExcludesMarkupControls(ctx) => ctx
                .output_class()
                .unwrap_or_else(|| CharClass::ANY.difference(&ctx.neutralized())),
            Self::DigitsOnly => CharClass::digits(),
            Self::HexDigitsOnly => CharClass::hex_digits(),
            Self::Base64Alphabet => CharClass::base64(),
            Self::FixedFormat(format) => {
                let retained = format
                    .retained
                    .as_ref()
                    .map_or(CharClass::EMPTY, |r| r.charset.possible_chars());
                format.chars.union(&retained)
            }
            Self::EnumMember(values) => values
                .iter()
                .fold(CharClass::EMPTY, |acc, v| acc.union(&CharClass::from_chars(v))),
        }
    }

    /// Tightest named constraint for a character class.
    #[must_use]
    pub fn from_class(class: CharClass) -> Self {
        if class == CharClass::ANY {
            Self::Unconstrained
        } else if class.is_subset_of(&CharClass::digits()) {
            Self::DigitsOnly
        } else if class.is_subset_of(&CharClass::hex_digits()) {
            Self::HexDigitsOnly
        } else {
            Self::FixedFormat(FormatClass::of(class))
        }
    }

    /// Constraint on the concatenation of two constrained strings.
    ///
    /// Concatenation is a pass-through for both sides: the result can contain
    /// any character either side can contain. An escaped side stays escaped
    /// only if the other side cannot introduce a character the escaping
    /// neutralizes.
    #[must_use]
    pub fn concat(&self, other: &CharsetConstraint) -> CharsetConstraint {
        use CharsetConstraint::{ExcludesMarkupControls, Unconstrained};

        match (self, other) {
            (Unconstrained, _) | (_, Unconstrained) => Unconstrained,
            (ExcludesMarkupControls(a), ExcludesMarkupControls(b)) => {
                if a.covers(*b) {
                    ExcludesMarkupControls(*b)
                } else if b.covers(*a) {
                    ExcludesMarkupControls(*a)
                } else {
                    Unconstrained
                }
            }
            (ExcludesMarkupControls(ctx), plain) | (plain, ExcludesMarkupControls(ctx)) => {
                if plain.possible_chars().intersects(&ctx.neutralized()) {
                    Unconstrained
                } else {
                    ExcludesMarkupControls(*ctx)
                }
            }
            (a, b) => Self::from_class(a.possible_chars().union(&b.possible_chars())),
        }
    }
}

impl fmt::Display for CharsetConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unconstrained => write!(f, "Unconstrained"),
            Self::ExcludesMarkupControls(ctx) => write!(f, "ExcludesMarkupControls({})", ctx),
            Self::DigitsOnly => write!(f, "DigitsOnly"),
            Self::HexDigitsOnly => write!(f, "HexDigitsOnly"),
            Self::Base64Alphabet => write!(f, "Base64Alphabet"),
            Self::FixedFormat(format) => {
                write!(f, "FixedFormat({}", format.chars)?;
                if let Some(retained) = &format.retained {
                    write!(
                        f,
                        " + <= {} retained chars of {}",
                        retained.max_chars, retained.charset
                    )?;
                }
                write!(f, ")")
            }
            Self::EnumMember(values) => {
                let shown: Vec<&str> = values.iter().take(5).map(String::as_str).collect();
                let more = if values.len() > 5 { ", ..." } else { "" };
                write!(f, "EnumMember{{{}{}}}", shown.join(", "), more)
            }
        }
    }
}

// =============================================================================
// String Guarantee
// =============================================================================

/// Everything proven about a string value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StringGuarantee {
    pub charset: CharsetConstraint,
    #[serde(default)]
    pub max_length: Option<usize>,
    #[serde(default)]
    pub value_set: Option<BTreeSet<String>>,
}

impl StringGuarantee {
    /// Guarantee of a raw, untrusted string.
    #[must_use]
    pub fn unconstrained() -> Self {
        Self::new(CharsetConstraint::Unconstrained)
    }

    #[must_use]
    pub fn new(charset: CharsetConstraint) -> Self {
        Self {
            charset,
            max_length: None,
            value_set: None,
        }
    }

    #[must_use]
    pub fn with_max_length(mut self, max_length: Option<usize>) -> Self {
        self.max_length = max_length;
        self
    }

    /// Membership in a finite set of values.
    #[must_use]
    pub fn enum_member(values: BTreeSet<String>) -> Self {
        let max_length = values.iter().map(|v| v.chars().count()).max();
        Self {
            charset: CharsetConstraint::EnumMember(values.clone()),
            max_length: max_length.or(Some(0)),
            value_set: Some(values),
        }
    }

    /// Rendering of an integer in radix 10 or 16.
    ///
    /// Decimal output carries a `-` only when the interval admits negative
    /// values. Hex output follows `toHexString`: negative values print as
    /// two's complement, so there is never a sign.
    #[must_use]
    pub fn from_integer(value: &Interval, radix: u32) -> Self {
        if value.is_empty() {
            return Self::new(CharsetConstraint::DigitsOnly).with_max_length(Some(0));
        }
        let negative = value.low < Bound::Finite(0);
        let magnitude = |b: Bound| match b {
            Bound::Finite(v) => u128::from(v.unsigned_abs()),
            _ => u128::from(u64::MAX),
        };
        let widest = magnitude(value.low).max(magnitude(value.high));

        if radix == 16 {
            let len = if negative { 16 } else { digit_count(widest, 16) };
            return Self::new(CharsetConstraint::HexDigitsOnly).with_max_length(Some(len));
        }

        let len = digit_count(widest, 10) + usize::from(negative);
        let charset = if negative {
            CharsetConstraint::FixedFormat(FormatClass::of(
                CharClass::digits().union(&CharClass::from_chars("-")),
            ))
        } else {
            CharsetConstraint::DigitsOnly
        };
        Self::new(charset).with_max_length(Some(len))
    }

    #[inline]
    #[must_use]
    pub fn is_unconstrained(&self) -> bool {
        self.charset.is_unconstrained()
    }

    /// Truncation: the charset is untouched, only the length shrinks.
    #[must_use]
    pub fn truncate(&self, len: usize) -> Self {
        Self {
            charset: self.charset.clone(),
            max_length: Some(self.max_length.map_or(len, |m| m.min(len))),
            value_set: self.value_set.as_ref().map(|values| {
                values
                    .iter()
                    .map(|v| v.chars().take(len).collect::<String>())
                    .collect()
            }),
        }
    }

    /// Upper- or lower-case mapping. Known values are mapped exactly; a
    /// non-ASCII character may map to as many as three (`ﬃ` to `FFI`).
    #[must_use]
    pub fn case_mapped(&self, to_lower: bool) -> Self {
        if let Some(values) = &self.value_set {
            return Self::enum_member(values.iter().map(|v| map_case(v, to_lower)).collect());
        }
        let grows = self.charset.possible_chars().has_non_ascii();
        Self {
            charset: self.charset.case_mapped(to_lower),
            max_length: if grows {
                self.max_length.and_then(|m| m.checked_mul(3))
            } else {
                self.max_length
            },
            value_set: None,
        }
    }

    /// Concatenation with another tracked string.
    #[must_use]
    pub fn concat(&self, other: &StringGuarantee) -> Self {
        Self {
            charset: self.charset.concat(&other.charset),
            max_length: match (self.max_length, other.max_length) {
                (Some(a), Some(b)) => a.checked_add(b),
                _ => None,
            },
            value_set: None,
        }
    }

    /// Concatenation with constant text. Constant text is not tainted, so
    /// the charset is kept as-is.
    #[must_use]
    pub fn concat_literal(&self, literal: &str, prepend: bool) -> Self {
        let extra = literal.chars().count();
        Self {
            charset: self.charset.clone(),
            max_length: self.max_length.and_then(|m| m.checked_add(extra)),
            value_set: self.value_set.as_ref().map(|values| {
                values
                    .iter()
                    .map(|v| {
                        if prepend {
                            format!("{}{}", literal, v)
                        } else {
                            format!("{}{}", v, literal)
                        }
                    })
                    .collect()
            }),
        }
    }
}

fn map_case(value: &str, to_lower: bool) -> String {
    if to_lower {
        value.to_lowercase()
    } else {
        value.to_uppercase()
    }
}

fn digit_count(mut v: u128, radix: u128) -> usize {
    let mut count = 1;
    while v >= radix {
        v /= radix;
        count += 1;
    }
    count
}

impl Default for StringGuarantee {
    fn default() -> Self {
        Self::unconstrained()
    }
}

impl fmt::Display for StringGuarantee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.charset)?;
        if let Some(max) = self.max_length {
            write!(f, ", max_length={}", max)?;
        }
        Ok(())
    }
}
