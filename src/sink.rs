//! Sink contexts and the sink context classifier.
//!
//! Each string sink forbids a set of raw characters. A path is safe for the
//! sink when the guarantee reaching it proves none of those characters can
//! appear, either because an escaping transform neutralized them or because
//! the value was confined to a smaller alphabet.
//!
//! # Sink Categories
//!
//! | Sink            | Forbidden raw characters          |
//! |-----------------|-----------------------------------|
//! | `HtmlBody`      | `< > & " '`                       |
//! | `HtmlAttribute` | `< > & " '`                       |
//! | `ScriptString`  | `< > & " ' \ \n \r`               |
//! | `UrlComponent`  | all but `A-Za-z0-9-._~%+`         |
//! | `CssValue`      | `< > & " ' ( ) { } ; / \n \r`     |
//! | `LogRecord`     | none                              |
//! | `RawFileWrite`  | none                              |
//!
//! Injection is one axis. Disclosure of sensitive data is a second one,
//! evaluated separately: a sensitive source that reaches an output sink
//! without a redacting transform is unsafe no matter how well it is escaped.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::abstractor::{AbstractValue, Abstraction};
use crate::guarantee::{CharClass, CharsetConstraint, StringGuarantee};
use crate::verdict::{Assessment, Outcome, RationaleStep};

/// Kind of sensitive operation a path ends in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkContext {
    /// Loop upper bound, checked against the configured ceiling.
    LoopBound,
    HtmlBody,
    HtmlAttribute,
    ScriptString,
    UrlComponent,
    CssValue,
    LogRecord,
    RawFileWrite,
}

impl SinkContext {
    /// All sinks, in declaration order.
    pub const ALL: [SinkContext; 8] = [
        SinkContext::LoopBound,
        SinkContext::HtmlBody,
        SinkContext::HtmlAttribute,
        SinkContext::ScriptString,
        SinkContext::UrlComponent,
        SinkContext::CssValue,
        SinkContext::LogRecord,
        SinkContext::RawFileWrite,
    ];

    #[inline]
    #[must_use]
    pub const fn is_string_sink(self) -> bool {
        !matches!(self, SinkContext::LoopBound)
    }

    /// Sinks where a sensitive value becomes visible to someone.
    #[must_use]
    pub const fn default_disclosure_sinks() -> &'static [SinkContext] {
        &[
            SinkContext::HtmlBody,
            SinkContext::HtmlAttribute,
            SinkContext::LogRecord,
            SinkContext::RawFileWrite,
        ]
    }

    /// Forbidden-character predicate, `None` for sinks without one.
    #[must_use]
    pub fn requirement(self) -> Option<SinkRequirement> {
        let forbid = |chars: &str| {
            Some(SinkRequirement {
                forbidden: CharClass::from_chars(chars),
            })
        };
        match self {
            SinkContext::HtmlBody | SinkContext::HtmlAttribute => forbid("<>&\"'"),
            SinkContext::ScriptString => forbid("<>&\"'\\\n\r"),
            SinkContext::UrlComponent => Some(SinkRequirement {
                forbidden: CharClass::url_unreserved()
                    .union(&CharClass::from_chars("%+"))
                    .complement(),
            }),
            SinkContext::CssValue => forbid("<>&\"'(){};/\n\r"),
            SinkContext::LoopBound | SinkContext::LogRecord | SinkContext::RawFileWrite => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            SinkContext::LoopBound => "loop_bound",
            SinkContext::HtmlBody => "html_body",
            SinkContext::HtmlAttribute => "html_attribute",
            SinkContext::ScriptString => "script_string",
            SinkContext::UrlComponent => "url_component",
            SinkContext::CssValue => "css_value",
            SinkContext::LogRecord => "log_record",
            SinkContext::RawFileWrite => "raw_file_write",
        }
    }
}

impl fmt::Display for SinkContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Requirements
// =============================================================================

/// Raw characters a sink must never receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkRequirement {
    pub forbidden: CharClass,
}

impl SinkRequirement {
    /// Check a charset against the predicate.
    ///
    /// Returns the explanation either way: `Ok` when the charset proves the
    /// forbidden characters absent, `Err` when it does not.
    pub fn check(&self, charset: &CharsetConstraint) -> std::result::Result<String, String> {
        match charset {
            CharsetConstraint::Unconstrained => {
                Err("no guarantee was established for the value".to_string())
            }
            CharsetConstraint::FixedFormat(format) => {
                let leaked = format.chars.intersect(&self.forbidden);
                if !leaked.is_empty() {
                    return Err(format!("format may produce {}", leaked));
                }
                match &format.retained {
                    Some(retained) => self.check(&retained.charset).map_err(|why| {
                        format!(
                            "masked value keeps up to {} original characters and {}",
                            retained.max_chars, why
                        )
                    }),
                    None => Ok(format!("format {} avoids every forbidden character", format.chars)),
                }
            }
            CharsetConstraint::ExcludesMarkupControls(ctx) => {
                let leaked = charset.possible_chars().intersect(&self.forbidden);
                if leaked.is_empty() {
                    Ok(format!("{} escaping neutralizes every forbidden character", ctx))
                } else {
                    Err(format!("{} escaping leaves {} unneutralized", ctx, leaked))
                }
            }
            other => {
                let leaked = other.possible_chars().intersect(&self.forbidden);
                if leaked.is_empty() {
                    Ok(format!("{} contains only permitted characters", other))
                } else {
                    Err(format!("{} may contain {}", other, leaked))
                }
            }
        }
    }
}

// =============================================================================
// Classification
// =============================================================================

/// Decide a string sink on both the injection and the disclosure axis.
///
/// An integer reaching a string sink is judged by its decimal rendering.
#[must_use]
pub fn classify_sink(
    sink: SinkContext,
    abstraction: &Abstraction,
    disclosure_sinks: &[SinkContext],
) -> Assessment {
    let mut assessment = injection_axis(sink, abstraction);
    if let Some(disclosure) = disclosure_axis(sink, abstraction, disclosure_sinks) {
        assessment.merge(disclosure);
    }
    assessment
}

fn injection_axis(sink: SinkContext, abstraction: &Abstraction) -> Assessment {
    let mut notes = Vec::new();
    let guarantee = match &abstraction.value {
        AbstractValue::Text(g) => g.clone(),
        AbstractValue::Integer(iv) => {
            notes.push(format!("integer {} judged by its decimal rendering", iv));
            StringGuarantee::from_integer(iv, 10)
        }
    };
    let step = abstraction.guarantee_step;
    let operation = step
        .and_then(|s| abstraction.operation_at(s))
        .unwrap_or("path")
        .to_string();

    let (outcome, explanation) = match (sink.requirement(), &abstraction.pending_unknown) {
        (None, _) => (
            Outcome::Safe,
            format!("{} has no injection predicate", sink),
        ),
        (Some(_), Some(unknown)) => (
            Outcome::Unknown,
            format!(
                "unrecognized transform '{}' was never superseded by a known guarantee",
                unknown
            ),
        ),
        (Some(requirement), None) => match requirement.check(&guarantee.charset) {
            Ok(why) => (Outcome::Safe, why),
            Err(why) => (Outcome::Unsafe, why),
        },
    };

    Assessment {
        outcome,
        rationale: vec![RationaleStep {
            step,
            operation: format!("injection check at {} (via {})", sink, operation),
            guarantee: guarantee.to_string(),
            explanation,
        }],
        notes,
    }
}

fn disclosure_axis(
    sink: SinkContext,
    abstraction: &Abstraction,
    disclosure_sinks: &[SinkContext],
) -> Option<Assessment> {
    if !abstraction.source_sensitive || !disclosure_sinks.contains(&sink) {
        return None;
    }

    // An integer always renders to a constrained form.
    let unconstrained = matches!(&abstraction.value, AbstractValue::Text(g) if g.charset.is_unconstrained());
    let source = &abstraction.source;
    let (outcome, step, guarantee, explanation) = if !abstraction.sensitive {
        (
            Outcome::Safe,
            abstraction.redacted_at,
            "redacted",
            format!("sensitive value from {} was redacted", source),
        )
    } else if !unconstrained {
        (
            Outcome::Safe,
            abstraction.guarantee_step,
            "constrained",
            format!("sensitive value from {} only reaches {} in a constrained form", source, sink),
        )
    } else if let Some(unknown) = &abstraction.pending_unknown {
        (
            Outcome::Unknown,
            None,
            "sensitive",
            format!(
                "sensitive value from {} passes through unrecognized '{}' before {}",
                source, unknown, sink
            ),
        )
    } else {
        (
            Outcome::Unsafe,
            None,
            "sensitive",
            format!(
                "sensitive value from {} reaches {} unconstrained and without redaction",
                source, sink
            ),
        )
    };

    Some(Assessment {
        outcome,
        rationale: vec![RationaleStep {
            step,
            operation: format!("disclosure check at {}", sink),
            guarantee: guarantee.to_string(),
            explanation,
        }],
        notes: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guarantee::{EscapeContext, FormatClass, RetainedSuffix};

    fn html() -> CharsetConstraint {
        CharsetConstraint::ExcludesMarkupControls(EscapeContext::Html)
    }

    fn check(sink: SinkContext, charset: &CharsetConstraint) -> bool {
        sink.requirement()
            .map_or(true, |req| req.check(charset).is_ok())
    }

    #[test]
    fn test_html_escape_per_context() {
        assert!(check(SinkContext::HtmlBody, &html()));
        assert!(check(SinkContext::HtmlAttribute, &html()));
        assert!(!check(SinkContext::ScriptString, &html()));
        assert!(!check(SinkContext::UrlComponent, &html()));
        assert!(!check(SinkContext::CssValue, &html()));
    }

    #[test]
    fn test_encoders_for_their_context() {
        let url = CharsetConstraint::ExcludesMarkupControls(EscapeContext::Url);
        let script = CharsetConstraint::ExcludesMarkupControls(EscapeContext::Script);
        let css = CharsetConstraint::ExcludesMarkupControls(EscapeContext::Css);

        assert!(check(SinkContext::UrlComponent, &url));
        assert!(check(SinkContext::HtmlBody, &url));
        assert!(check(SinkContext::ScriptString, &script));
        assert!(check(SinkContext::CssValue, &css));
        assert!(!check(SinkContext::UrlComponent, &css));
    }

    #[test]
    fn test_format_classes() {
        assert!(check(SinkContext::ScriptString, &CharsetConstraint::DigitsOnly));
        assert!(check(SinkContext::UrlComponent, &CharsetConstraint::HexDigitsOnly));
        assert!(!check(SinkContext::UrlComponent, &CharsetConstraint::Base64Alphabet));
        assert!(!check(SinkContext::HtmlBody, &CharsetConstraint::Unconstrained));
        assert!(check(SinkContext::LogRecord, &CharsetConstraint::Unconstrained));
    }

    #[test]
    fn test_enum_member_with_markup_fails_closed() {
        let values = ["<b>", "plain"].iter().map(|s| s.to_string()).collect();
        assert!(!check(SinkContext::HtmlBody, &CharsetConstraint::EnumMember(values)));
    }

    #[test]
    fn test_masked_suffix() {
        let masked = |inner: CharsetConstraint| {
            CharsetConstraint::FixedFormat(FormatClass {
                chars: CharClass::from_chars("*"),
                pattern: None,
                retained: Some(Box::new(RetainedSuffix {
                    max_chars: 4,
                    charset: inner,
                })),
            })
        };
        let req = SinkContext::HtmlBody.requirement().unwrap();
        let err = req.check(&masked(CharsetConstraint::Unconstrained)).unwrap_err();
        assert!(err.contains("keeps up to 4"));
        assert!(req.check(&masked(CharsetConstraint::DigitsOnly)).is_ok());
    }

    #[test]
    fn test_sink_serde_names() {
        let json = serde_json::to_string(&SinkContext::ScriptString).unwrap();
        assert_eq!(json, "\"script_string\"");
        assert_eq!(SinkContext::ALL.len(), 8);
    }
}
