//! Sink context integration tests.
//!
//! String paths into output sinks: sanitizer chains, validation guards,
//! masking and the sensitive-data disclosure axis.

use std::collections::BTreeSet;

use taint_verdict::{
    Classifier, ClassifierConfig, GuardCondition, IntType, Outcome, PathBuilder, SinkContext,
    SourceSpec, StringArg,
};

const PREDICATE_SINKS: [SinkContext; 5] = [
    SinkContext::HtmlBody,
    SinkContext::HtmlAttribute,
    SinkContext::ScriptString,
    SinkContext::UrlComponent,
    SinkContext::CssValue,
];

fn classifier() -> Classifier<'static> {
    Classifier::new(ClassifierConfig::with_ceiling(1_000)).unwrap()
}

fn param() -> PathBuilder {
    PathBuilder::new(SourceSpec::text("request.getParameter"))
}

fn digits_only() -> GuardCondition {
    GuardCondition::Matches {
        pattern: "^[0-9]+$".to_string(),
        full_match: true,
    }
}

// =============================================================================
// Raw and escaped values
// =============================================================================

#[test]
fn test_raw_value_is_unsafe_at_every_predicate_sink() {
    for sink in PREDICATE_SINKS {
        let verdict = classifier().classify(&param().sink(sink));
        assert_eq!(verdict.outcome, Outcome::Unsafe, "{}", sink);
    }
}

#[test]
fn test_raw_value_at_log_without_sensitivity_is_safe() {
    let verdict = classifier().classify(&param().sink(SinkContext::LogRecord));
    assert_eq!(verdict.outcome, Outcome::Safe);
    assert!(verdict.report().contains("no injection predicate"));
}

#[test]
fn test_escape_then_truncate_is_safe_for_html() {
    let path = param()
        .string_op("escapeHtml", vec![])
        .string_op("StringUtils.abbreviate", vec![])
        .sink(SinkContext::HtmlBody);
    let verdict = classifier().classify(&path);
    assert_eq!(verdict.outcome, Outcome::Safe);

    let decision = verdict.rationale.last().unwrap();
    assert_eq!(decision.step, Some(1));
    assert!(decision.guarantee.contains("max_length=20"));
}

#[test]
fn test_escape_is_context_specific() {
    let escaped = |sink| {
        classifier()
            .classify(&param().string_op("escapeHtml", vec![]).sink(sink))
            .outcome
    };
    assert_eq!(escaped(SinkContext::HtmlBody), Outcome::Safe);
    assert_eq!(escaped(SinkContext::HtmlAttribute), Outcome::Safe);
    assert_eq!(escaped(SinkContext::ScriptString), Outcome::Unsafe);
    assert_eq!(escaped(SinkContext::UrlComponent), Outcome::Unsafe);
}

#[test]
fn test_context_encoders() {
    let cases = [
        ("URLEncoder.encode", SinkContext::UrlComponent),
        ("Encode.forJavaScript", SinkContext::ScriptString),
        ("Encode.forCssString", SinkContext::CssValue),
        ("Encode.forHtmlAttribute", SinkContext::HtmlAttribute),
    ];
    for (encoder, sink) in cases {
        let path = param().string_op(encoder, vec![]).sink(sink);
        assert_eq!(classifier().classify(&path).outcome, Outcome::Safe, "{}", encoder);
    }
}

#[test]
fn test_concat_with_raw_value_breaks_escape() {
    let path = param()
        .string_op("escapeHtml", vec![])
        .string_op("concat", vec![StringArg::Current, StringArg::Step(0)])
        .sink(SinkContext::HtmlBody);
    assert_eq!(classifier().classify(&path).outcome, Outcome::Unsafe);
}

#[test]
fn test_literal_markup_around_escaped_value() {
    let path = param()
        .string_op("escapeHtml", vec![])
        .string_op(
            "concat",
            vec![
                StringArg::Literal("<b>".into()),
                StringArg::Current,
                StringArg::Literal("</b>".into()),
            ],
        )
        .sink(SinkContext::HtmlBody);
    assert_eq!(classifier().classify(&path).outcome, Outcome::Safe);
}

// =============================================================================
// Validation and format classes
// =============================================================================

#[test]
fn test_digit_validation_is_safe_everywhere() {
    for sink in PREDICATE_SINKS {
        let path = param().guard(digits_only()).sink(sink);
        assert_eq!(classifier().classify(&path).outcome, Outcome::Safe, "{}", sink);
    }
}

#[test]
fn test_alternatives_anchored_on_one_side_do_not_validate() {
    // "<script>b" passes /^a|b$/ under find()
    let path = param()
        .guard(GuardCondition::Matches {
            pattern: "^a|b$".to_string(),
            full_match: false,
        })
        .sink(SinkContext::HtmlBody);
    assert_eq!(classifier().classify(&path).outcome, Outcome::Unsafe);

    let grouped = param()
        .guard(GuardCondition::Matches {
            pattern: "^(?:a|b)$".to_string(),
            full_match: false,
        })
        .sink(SinkContext::HtmlBody);
    assert_eq!(classifier().classify(&grouped).outcome, Outcome::Safe);
}

#[test]
fn test_failed_validation_branch_learns_nothing() {
    let path = param().guard_failed(digits_only()).sink(SinkContext::HtmlBody);
    assert_eq!(classifier().classify(&path).outcome, Outcome::Unsafe);
}

#[test]
fn test_integer_rendering() {
    let path = PathBuilder::new(SourceSpec::integer("id", IntType::I64))
        .string_op("Integer.toString", vec![])
        .sink(SinkContext::ScriptString);
    assert_eq!(classifier().classify(&path).outcome, Outcome::Safe);

    let hex = PathBuilder::new(SourceSpec::integer("id", IntType::I32))
        .string_op("Integer.toHexString", vec![])
        .sink(SinkContext::UrlComponent);
    assert_eq!(classifier().classify(&hex).outcome, Outcome::Safe);
}

#[test]
fn test_allow_list_with_markup_fails_closed() {
    let values: BTreeSet<String> = ["<i>", "<b>"].iter().map(|s| s.to_string()).collect();
    let path = param()
        .guard(GuardCondition::InAllowList { values })
        .sink(SinkContext::HtmlBody);
    assert_eq!(classifier().classify(&path).outcome, Outcome::Unsafe);

    let plain: BTreeSet<String> = ["asc", "desc"].iter().map(|s| s.to_string()).collect();
    let path = param()
        .guard(GuardCondition::InAllowList { values: plain })
        .sink(SinkContext::ScriptString);
    assert_eq!(classifier().classify(&path).outcome, Outcome::Safe);
}

// =============================================================================
// Masking
// =============================================================================

#[test]
fn test_mask_of_unconstrained_input_is_unsafe() {
    let path = param().string_op("mask", vec![]).sink(SinkContext::HtmlBody);
    let verdict = classifier().classify(&path);
    assert_eq!(verdict.outcome, Outcome::Unsafe);
    assert!(verdict.rationale.last().unwrap().explanation.contains("keeps up to 4"));
}

#[test]
fn test_mask_after_digit_validation_is_safe() {
    let path = param()
        .guard(digits_only())
        .string_op("mask", vec![])
        .sink(SinkContext::HtmlBody);
    assert_eq!(classifier().classify(&path).outcome, Outcome::Safe);
}

// =============================================================================
// Unknown transforms
// =============================================================================

#[test]
fn test_unknown_transform_is_unknown() {
    let path = param()
        .string_op("LegacyFilter.clean", vec![])
        .sink(SinkContext::HtmlBody);
    let verdict = classifier().classify(&path);
    assert_eq!(verdict.outcome, Outcome::Unknown);
    assert!(verdict.notes.iter().any(|n| n.contains("LegacyFilter.clean")));
}

#[test]
fn test_unknown_transform_superseded_by_validation() {
    let validated = param()
        .string_op("customClean", vec![])
        .guard(GuardCondition::Matches {
            pattern: "[0-9]{1,4}".to_string(),
            full_match: true,
        })
        .sink(SinkContext::HtmlBody);
    let verdict = classifier().classify(&validated);
    assert_eq!(verdict.outcome, Outcome::Safe);
    assert!(verdict.notes.iter().any(|n| n.contains("superseded")));

    let after_branch = param()
        .string_op("customClean", vec![])
        .guard(GuardCondition::Matches {
            pattern: "[0-9]{1,4}".to_string(),
            full_match: true,
        })
        .leave_branch()
        .sink(SinkContext::HtmlBody);
    assert_eq!(classifier().classify(&after_branch).outcome, Outcome::Unknown);
}

#[test]
fn test_case_mapping_keeps_markup() {
    let path = param().string_op("toUpperCase", vec![]).sink(SinkContext::HtmlBody);
    assert_eq!(classifier().classify(&path).outcome, Outcome::Unsafe);

    let escaped = param()
        .string_op("escapeHtml", vec![])
        .string_op("toLowerCase", vec![])
        .sink(SinkContext::HtmlBody);
    assert_eq!(classifier().classify(&escaped).outcome, Outcome::Safe);
}

#[test]
fn test_unknown_transform_superseded_by_escape() {
    let path = param()
        .string_op("LegacyFilter.clean", vec![])
        .string_op("escapeHtml", vec![])
        .sink(SinkContext::HtmlBody);
    assert_eq!(classifier().classify(&path).outcome, Outcome::Safe);
}

// =============================================================================
// Disclosure
// =============================================================================

fn ssn() -> PathBuilder {
    PathBuilder::new(SourceSpec::text("customer.getSsn").sensitive())
}

#[test]
fn test_sensitive_value_logged_raw_is_unsafe() {
    let verdict = classifier().classify(&ssn().sink(SinkContext::LogRecord));
    assert_eq!(verdict.outcome, Outcome::Unsafe);
    assert!(verdict
        .rationale
        .iter()
        .any(|r| r.explanation.contains("without redaction")));
}

#[test]
fn test_constrained_sensitive_values_are_not_disclosure_findings() {
    // Long.parseLong(args[0]) printed
    let parsed = ssn().call("Long.parseLong", vec![]).sink(SinkContext::LogRecord);
    let verdict = classifier().classify(&parsed);
    assert_eq!(verdict.outcome, Outcome::Safe);
    assert!(verdict
        .rationale
        .iter()
        .any(|r| r.explanation.contains("constrained form")));

    let validated = ssn()
        .guard(GuardCondition::Matches {
            pattern: "[0-9]{9}".to_string(),
            full_match: true,
        })
        .sink(SinkContext::LogRecord);
    assert_eq!(classifier().classify(&validated).outcome, Outcome::Safe);

    let escaped = ssn().string_op("escapeHtml", vec![]).sink(SinkContext::HtmlBody);
    assert_eq!(classifier().classify(&escaped).outcome, Outcome::Safe);
}

#[test]
fn test_sensitive_value_through_unknown_transform_is_unknown() {
    let path = ssn().string_op("Vault.wrap", vec![]).sink(SinkContext::LogRecord);
    assert_eq!(classifier().classify(&path).outcome, Outcome::Unknown);
}

#[test]
fn test_masked_and_digested_values() {
    let masked = ssn().string_op("mask", vec![]).sink(SinkContext::LogRecord);
    assert_eq!(classifier().classify(&masked).outcome, Outcome::Safe);

    let digested = ssn()
        .string_op("DigestUtils.sha256Hex", vec![])
        .sink(SinkContext::HtmlBody);
    assert_eq!(classifier().classify(&digested).outcome, Outcome::Safe);
}

#[test]
fn test_disclosure_sinks_are_configurable() {
    let config = ClassifierConfig {
        disclosure_sinks: Some(vec![SinkContext::HtmlBody]),
        ..ClassifierConfig::with_ceiling(10)
    };
    let classifier = Classifier::new(config).unwrap();
    assert_eq!(classifier.classify(&ssn().sink(SinkContext::LogRecord)).outcome, Outcome::Safe);
}
