//! Batch and registry integration tests.

use std::sync::Arc;

use taint_verdict::{
    CharsetConstraint, Classifier, ClassifierConfig, IntType, Interval, NumericEffect, Operand, Outcome,
    PathBuilder, PathDescriptor, RegistryBuilder, SinkContext, SourceSpec, StringEffect,
    StringGuarantee, TransformDomain,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn mixed_paths() -> Vec<PathDescriptor> {
    let capped = PathBuilder::new(SourceSpec::text("request.getParameter"))
        .call("Integer.parseInt", vec![])
        .call("Math.min", vec![Operand::Const(50)])
        .sink(SinkContext::LoopBound);
    let raw_html = PathBuilder::new(SourceSpec::text("request.getParameter")).sink(SinkContext::HtmlBody);
    let mut broken = capped.clone();
    broken.version = 99;
    let escaped = PathBuilder::new(SourceSpec::text("request.getHeader"))
        .string_op("escapeHtml", vec![])
        .sink(SinkContext::HtmlBody);
    vec![capped, raw_html, broken, escaped]
}

#[test]
fn test_batch_isolates_malformed_path() {
    init_tracing();
    let classifier = Classifier::new(ClassifierConfig::with_ceiling(100)).unwrap();
    let verdicts = classifier.classify_batch(&mixed_paths());

    let outcomes: Vec<Outcome> = verdicts.iter().map(|v| v.outcome).collect();
    assert_eq!(
        outcomes,
        vec![Outcome::Safe, Outcome::Unsafe, Outcome::Unknown, Outcome::Safe]
    );
    assert!(verdicts[2].rationale[0].explanation.contains("version"));
}

#[test]
fn test_batch_matches_sequential() {
    let classifier = Classifier::new(ClassifierConfig::with_ceiling(100)).unwrap();
    let paths: Vec<PathDescriptor> = mixed_paths().into_iter().cycle().take(64).collect();

    let parallel = classifier.classify_batch(&paths);
    let sequential: Vec<_> = paths.iter().map(|p| classifier.classify(p)).collect();
    assert_eq!(parallel, sequential);
}

#[test]
fn test_classification_is_idempotent() {
    let classifier = Classifier::new(ClassifierConfig::with_ceiling(100)).unwrap();
    for path in mixed_paths() {
        assert_eq!(classifier.classify(&path), classifier.classify(&path));
    }
}

// =============================================================================
// Custom registries
// =============================================================================

#[test]
fn test_registered_transforms() {
    let mut builder = RegistryBuilder::with_builtins();
    builder
        .register_transform(
            "Pager.pageSize",
            TransformDomain::Numeric,
            NumericEffect::Custom(Arc::new(|_: &[Interval]| Interval::range(1, 50))),
        )
        .unwrap()
        .register_transform(
            "Ids.normalize",
            TransformDomain::String,
            StringEffect::Custom(Arc::new(|input: &StringGuarantee| {
                StringGuarantee::new(CharsetConstraint::HexDigitsOnly).with_max_length(input.max_length)
            })),
        )
        .unwrap();
    let registry = builder.build().unwrap();
    let classifier =
        Classifier::with_registry(ClassifierConfig::with_ceiling(50), &registry).unwrap();

    let page = PathBuilder::new(SourceSpec::integer("size", IntType::I32))
        .call("Pager.pageSize", vec![])
        .sink(SinkContext::LoopBound);
    assert_eq!(classifier.classify(&page).outcome, Outcome::Safe);

    let id = PathBuilder::new(SourceSpec::text("request.getParameter"))
        .string_op("Ids.normalize", vec![])
        .sink(SinkContext::ScriptString);
    assert_eq!(classifier.classify(&id).outcome, Outcome::Safe);

    // the process-wide registry does not know either name
    let global = Classifier::new(ClassifierConfig::with_ceiling(50)).unwrap();
    assert_eq!(global.classify(&id).outcome, Outcome::Unknown);
}

#[test]
fn test_registration_errors() {
    let mut builder = RegistryBuilder::with_builtins();
    assert!(builder
        .register_transform("escapeHtml", TransformDomain::String, StringEffect::DigitFilter)
        .is_err());
    assert!(builder
        .register_transform("Util.digits", TransformDomain::Numeric, StringEffect::DigitFilter)
        .is_err());
    assert!(RegistryBuilder::new().build().is_err());
}
