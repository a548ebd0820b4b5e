//! Persistence integration tests.
//!
//! Path descriptors and configuration loaded from JSON files.

use std::io::Write;
use std::path::PathBuf;

use tempfile::{NamedTempFile, TempDir};

use taint_verdict::{
    Classifier, ClassifierConfig, ClassifierError, Operand, Outcome, PathBuilder, PathDescriptor,
    SinkContext, SourceSpec, Verdict,
};

/// Get the path to the descriptor fixtures.
fn fixtures_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("paths")
}

fn load(name: &str) -> PathDescriptor {
    PathDescriptor::load(fixtures_path().join(name))
        .unwrap_or_else(|e| panic!("fixture {} should load: {}", name, e))
}

fn classifier() -> Classifier<'static> {
    Classifier::new(ClassifierConfig::with_ceiling(1_000)).unwrap()
}

// =============================================================================
// Fixtures
// =============================================================================

#[test]
fn test_fixture_verdicts() {
    let cases = [
        ("page_size_capped.json", Outcome::Safe),
        ("page_size_raw.json", Outcome::Unsafe),
        ("escaped_comment.json", Outcome::Safe),
        ("ssn_logged.json", Outcome::Unsafe),
    ];
    for (name, expected) in cases {
        let verdict = classifier().classify(&load(name));
        assert_eq!(verdict.outcome, expected, "{}\n{}", name, verdict.report());
    }
}

#[test]
fn test_validated_count_fixture() {
    let path = load("validated_count.json");
    assert_eq!(path.branches.len(), 1);

    let strict = Classifier::new(ClassifierConfig::with_ceiling(9_999)).unwrap();
    assert_eq!(strict.classify(&path).outcome, Outcome::Safe);
    let stricter = Classifier::new(ClassifierConfig::with_ceiling(9_998)).unwrap();
    assert_eq!(stricter.classify(&path).outcome, Outcome::Unsafe);
}

#[test]
fn test_malformed_fixture_is_rejected() {
    let err = PathDescriptor::load(fixtures_path().join("no_source.json")).unwrap_err();
    assert!(matches!(err, ClassifierError::MalformedPath { step: 0, .. }));

    let json = std::fs::read_to_string(fixtures_path().join("no_source.json")).unwrap();
    let verdict = classifier().classify_json(&json);
    assert_eq!(verdict.outcome, Outcome::Unknown);
    assert_eq!(verdict.rationale[0].step, Some(0));
}

#[test]
fn test_missing_fixture() {
    let err = PathDescriptor::load(fixtures_path().join("absent.json")).unwrap_err();
    assert!(matches!(err, ClassifierError::IoWithPath { .. }));
}

#[test]
fn test_garbage_json_is_unknown() {
    let verdict = classifier().classify_json("{ \"version\": 1, \"steps\": [");
    assert_eq!(verdict.outcome, Outcome::Unknown);
    assert_eq!(verdict.sink, None);
}

// =============================================================================
// Round trips
// =============================================================================

#[test]
fn test_saved_descriptor_classifies_identically() {
    let path = PathBuilder::new(SourceSpec::text("request.getParameter"))
        .call("Integer.parseInt", vec![])
        .call("Math.abs", vec![])
        .call("Math.floorMod", vec![Operand::Const(100)])
        .sink(SinkContext::LoopBound);

    let dir = TempDir::new().unwrap();
    let file = dir.path().join("path.json");
    std::fs::write(&file, path.to_json().unwrap()).unwrap();

    let reloaded = PathDescriptor::load(&file).unwrap();
    assert_eq!(reloaded, path);
    assert_eq!(classifier().classify(&reloaded), classifier().classify(&path));
}

#[test]
fn test_verdict_serializes() {
    let verdict = classifier().classify(&load("page_size_capped.json"));
    let json = serde_json::to_string(&verdict).unwrap();
    assert!(json.contains("\"outcome\":\"safe\""));

    let back: Verdict = serde_json::from_str(&json).unwrap();
    assert_eq!(back, verdict);
}

// =============================================================================
// Configuration
// =============================================================================

#[test]
fn test_config_file_drives_classifier() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"{{"loop_ceiling": 100, "max_path_steps": 3, "disclosure_sinks": ["html_body"]}}"#
    )
    .unwrap();
    let config = ClassifierConfig::load(file.path()).unwrap();
    let classifier = Classifier::new(config).unwrap();

    // four steps, over the limit
    let verdict = classifier.classify(&load("page_size_capped.json"));
    assert_eq!(verdict.outcome, Outcome::Unknown);

    // log_record is no longer a disclosure sink
    assert_eq!(classifier.classify(&load("ssn_logged.json")).outcome, Outcome::Safe);
}

#[test]
fn test_config_without_ceiling_is_rejected() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, r#"{{"max_path_steps": 10}}"#).unwrap();
    let err = ClassifierConfig::load(file.path()).unwrap_err();
    assert!(matches!(err, ClassifierError::Configuration(_)));
}
