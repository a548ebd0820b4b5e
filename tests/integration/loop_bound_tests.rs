//! Loop bound integration tests.
//!
//! Paths from an untrusted source into a loop upper bound, classified
//! against the configured ceiling.

use taint_verdict::{
    AbstractValue, Abstractor, Bound, Classifier, ClassifierConfig, CompareOp, GuardCondition,
    IntType, Interval, NumericOpKind, Operand, Outcome, PathBuilder, PathDescriptor, SinkContext,
    SourceSpec, TransformRegistry,
};

fn classifier(ceiling: u64) -> Classifier<'static> {
    Classifier::new(ClassifierConfig::with_ceiling(ceiling)).unwrap()
}

fn parsed() -> PathBuilder {
    PathBuilder::new(SourceSpec::text("request.getParameter")).call("Integer.parseInt", vec![])
}

fn final_interval(path: &PathDescriptor) -> Interval {
    let abstraction = Abstractor::new(TransformRegistry::global())
        .abstract_path(path)
        .unwrap();
    match abstraction.value {
        AbstractValue::Integer(iv) => iv,
        AbstractValue::Text(g) => panic!("expected an integer, got {}", g),
    }
}

// =============================================================================
// Capping operators
// =============================================================================

#[test]
fn test_min_with_ceiling_is_safe_for_every_k() {
    for k in [1i64, 10, 999, 1_000_000] {
        let path = parsed()
            .call("Math.min", vec![Operand::Current, Operand::Const(k)])
            .sink(SinkContext::LoopBound);
        let verdict = classifier(k as u64).classify(&path);
        assert_eq!(verdict.outcome, Outcome::Safe, "ceiling {}", k);
    }
}

#[test]
fn test_min_cites_the_bounding_step() {
    let path = parsed()
        .call("Math.min", vec![Operand::Current, Operand::Const(100)])
        .sink(SinkContext::LoopBound);
    let verdict = classifier(1_000).classify(&path);
    assert_eq!(verdict.outcome, Outcome::Safe);

    let decision = verdict.rationale.last().unwrap();
    assert_eq!(decision.step, Some(2));
    assert!(decision.explanation.contains("provably bounded"));
    assert!(verdict.report().starts_with("WHY SAFE at loop_bound"));
}

#[test]
fn test_modulo_yields_residue_range() {
    let path = PathBuilder::new(SourceSpec::integer("offset", IntType::I32))
        .call("Math.abs", vec![])
        .numeric(NumericOpKind::Rem, vec![Operand::Current, Operand::Const(16)])
        .sink(SinkContext::LoopBound);
    assert_eq!(final_interval(&path), Interval::range(0, 15));
}

#[test]
fn test_abs_mod_100_against_ceiling() {
    let path = parsed()
        .call("Math.abs", vec![])
        .call("Math.floorMod", vec![Operand::Const(100)])
        .sink(SinkContext::LoopBound);
    assert_eq!(classifier(99).classify(&path).outcome, Outcome::Safe);
    assert_eq!(classifier(1_000).classify(&path).outcome, Outcome::Safe);

    let verdict = classifier(98).classify(&path);
    assert_eq!(verdict.outcome, Outcome::Unsafe);
    assert!(verdict.rationale.last().unwrap().explanation.contains("exceeds ceiling"));
}

#[test]
fn test_clamp_via_max_min() {
    let path = parsed()
        .call("Math.min", vec![Operand::Current, Operand::Const(25)])
        .call("Math.max", vec![Operand::Const(0), Operand::Current])
        .sink(SinkContext::LoopBound);
    assert_eq!(final_interval(&path), Interval::range(0, 25));
    assert_eq!(classifier(25).classify(&path).outcome, Outcome::Safe);
}

#[test]
fn test_explicit_clamp() {
    let path = parsed()
        .numeric(NumericOpKind::Clamp, vec![Operand::Current, Operand::Const(1), Operand::Const(50)])
        .sink(SinkContext::LoopBound);
    assert_eq!(final_interval(&path), Interval::range(1, 50));
}

// =============================================================================
// Ternaries, division and bit operations
// =============================================================================

#[test]
fn test_ternary_with_one_operand_joins_the_flowing_value() {
    // n = min(n, 100); n = flag ? n : 500
    let path = parsed()
        .call("Math.min", vec![Operand::Const(100)])
        .numeric(NumericOpKind::Ternary, vec![Operand::Const(500)])
        .sink(SinkContext::LoopBound);
    assert_eq!(
        final_interval(&path),
        Interval::new(Bound::Finite(i64::from(i32::MIN)), Bound::Finite(500))
    );
    assert_eq!(classifier(500).classify(&path).outcome, Outcome::Safe);
    assert_eq!(classifier(499).classify(&path).outcome, Outcome::Unsafe);
}

#[test]
fn test_nested_ternary_joins_left_to_right() {
    // a ? 10 : (b ? 20 : capped)
    let path = parsed()
        .call("Math.min", vec![Operand::Const(30)])
        .call("Math.max", vec![Operand::Const(0)])
        .numeric(
            NumericOpKind::Ternary,
            vec![Operand::Const(20), Operand::Step(3)],
        )
        .numeric(NumericOpKind::Ternary, vec![Operand::Const(10), Operand::Current])
        .sink(SinkContext::LoopBound);
    assert_eq!(final_interval(&path), Interval::range(0, 30));

    // an arm that reads the raw value keeps the whole range
    let raw_arm = parsed()
        .call("Math.min", vec![Operand::Const(30)])
        .numeric(NumericOpKind::Ternary, vec![Operand::Current, Operand::Step(1)])
        .sink(SinkContext::LoopBound);
    assert_eq!(classifier(1_000).classify(&raw_arm).outcome, Outcome::Unsafe);
}

#[test]
fn test_bitand_with_mask() {
    let path = parsed()
        .numeric(NumericOpKind::BitAnd, vec![Operand::Const(0xFF)])
        .sink(SinkContext::LoopBound);
    assert_eq!(final_interval(&path), Interval::range(0, 255));
    assert_eq!(classifier(255).classify(&path).outcome, Outcome::Safe);
    assert_eq!(classifier(254).classify(&path).outcome, Outcome::Unsafe);
}

#[test]
fn test_shift_then_mask() {
    // (n >> 4) & 0xF
    let path = parsed()
        .numeric(NumericOpKind::Shr, vec![Operand::Const(4)])
        .numeric(NumericOpKind::BitAnd, vec![Operand::Current, Operand::Const(0xF)])
        .sink(SinkContext::LoopBound);
    assert_eq!(final_interval(&path), Interval::range(0, 15));

    let shift_only = parsed()
        .numeric(NumericOpKind::Shr, vec![Operand::Const(4)])
        .sink(SinkContext::LoopBound);
    assert_eq!(
        final_interval(&shift_only).high,
        Bound::Finite(i64::from(i32::MAX >> 4))
    );
}

#[test]
fn test_division_by_a_range_containing_zero() {
    let capped = || {
        parsed()
            .call("Math.min", vec![Operand::Const(100)])
            .call("Math.max", vec![Operand::Const(0)])
    };

    let by_zero_range = capped()
        .numeric(NumericOpKind::Div, vec![Operand::Range(Interval::range(-1, 1))])
        .sink(SinkContext::LoopBound);
    assert_eq!(final_interval(&by_zero_range), Interval::top());
    assert_eq!(classifier(1_000).classify(&by_zero_range).outcome, Outcome::Unsafe);

    let by_positive_range = capped()
        .numeric(NumericOpKind::Div, vec![Operand::Range(Interval::range(2, 4))])
        .sink(SinkContext::LoopBound);
    assert_eq!(final_interval(&by_positive_range), Interval::range(0, 50));

    // 1000 / n with n untrusted
    let by_input = parsed()
        .numeric(NumericOpKind::Div, vec![Operand::Const(1_000), Operand::Step(1)])
        .sink(SinkContext::LoopBound);
    assert_eq!(classifier(1_000).classify(&by_input).outcome, Outcome::Unsafe);
}

#[test]
fn test_enum_value_feeds_later_arithmetic() {
    let path = PathBuilder::new(SourceSpec::text("request.getParameter"))
        .numeric(NumericOpKind::EnumValue { values: vec![8, 16, 64] }, vec![])
        .numeric(NumericOpKind::Mul, vec![Operand::Const(4)])
        .sink(SinkContext::LoopBound);
    assert_eq!(final_interval(&path), Interval::range(32, 256));
    assert_eq!(classifier(256).classify(&path).outcome, Outcome::Safe);
}

// =============================================================================
// Unbounded paths
// =============================================================================

#[test]
fn test_raw_parse_exceeds_ceiling() {
    let verdict = classifier(10_000).classify(&parsed().sink(SinkContext::LoopBound));
    assert_eq!(verdict.outcome, Outcome::Unsafe);
    assert!(verdict.report().starts_with("WHY UNSAFE"));
}

#[test]
fn test_growth_without_cap_is_unbounded() {
    let path = PathBuilder::new(SourceSpec::integer("n", IntType::I64))
        .call("Math.abs", vec![])
        .numeric(NumericOpKind::Mul, vec![Operand::Current, Operand::Const(2)])
        .sink(SinkContext::LoopBound);
    let iv = final_interval(&path);
    assert_eq!(iv.high, Bound::PosInf);
    assert_eq!(classifier(u64::MAX).classify(&path).outcome, Outcome::Unsafe);
}

#[test]
fn test_cap_then_widen() {
    let path = parsed()
        .call("Math.min", vec![Operand::Const(10)])
        .numeric(NumericOpKind::Add, vec![Operand::Current, Operand::Const(5)])
        .sink(SinkContext::LoopBound);
    assert_eq!(final_interval(&path).high, Bound::Finite(15));
    assert_eq!(classifier(14).classify(&path).outcome, Outcome::Unsafe);
    assert_eq!(classifier(15).classify(&path).outcome, Outcome::Safe);
}

// =============================================================================
// Guards and enums
// =============================================================================

#[test]
fn test_guarded_bound_only_inside_branch() {
    let guard = GuardCondition::Compare {
        op: CompareOp::Le,
        bound: 200,
    };
    let inside = parsed().guard(guard.clone()).sink(SinkContext::LoopBound);
    assert_eq!(classifier(200).classify(&inside).outcome, Outcome::Safe);

    let after = parsed()
        .guard(guard)
        .leave_branch()
        .sink(SinkContext::LoopBound);
    assert_eq!(classifier(200).classify(&after).outcome, Outcome::Unsafe);
}

#[test]
fn test_early_return_guard() {
    // if (n > 500) return; ... loop runs on the failed branch
    let path = parsed()
        .guard_failed(GuardCondition::Compare {
            op: CompareOp::Gt,
            bound: 500,
        })
        .sink(SinkContext::LoopBound);
    assert_eq!(classifier(500).classify(&path).outcome, Outcome::Safe);
}

#[test]
fn test_digit_validation_bounds_parse() {
    let path = PathBuilder::new(SourceSpec::text("request.getParameter"))
        .guard(GuardCondition::Matches {
            pattern: r"\d{1,3}".to_string(),
            full_match: true,
        })
        .call("Integer.parseInt", vec![])
        .sink(SinkContext::LoopBound);
    assert_eq!(final_interval(&path), Interval::range(0, 999));
    assert_eq!(classifier(999).classify(&path).outcome, Outcome::Safe);
}

#[test]
fn test_enum_ordinal_and_values() {
    let ordinal = PathBuilder::new(SourceSpec::text("request.getParameter"))
        .numeric(NumericOpKind::EnumOrdinal { arity: 7 }, vec![])
        .sink(SinkContext::LoopBound);
    assert_eq!(final_interval(&ordinal), Interval::range(0, 6));

    let values = PathBuilder::new(SourceSpec::text("request.getParameter"))
        .numeric(NumericOpKind::EnumValue { values: vec![10, 50, 250] }, vec![])
        .sink(SinkContext::LoopBound);
    assert_eq!(classifier(250).classify(&values).outcome, Outcome::Safe);
    assert_eq!(classifier(249).classify(&values).outcome, Outcome::Unsafe);
}

#[test]
fn test_negative_bound_notes_dead_loop() {
    let path = PathBuilder::new(SourceSpec::integer("n", IntType::I32))
        .call("Math.abs", vec![])
        .numeric(NumericOpKind::Neg, vec![])
        .call("Math.min", vec![Operand::Const(-1)])
        .sink(SinkContext::LoopBound);
    let verdict = classifier(10).classify(&path);
    assert_eq!(verdict.outcome, Outcome::Safe);
    assert!(verdict.notes.iter().any(|n| n.contains("never executes")));
}

// =============================================================================
// Loop nests
// =============================================================================

#[test]
fn test_loop_nest_multiplies_iterations() {
    let outer = parsed()
        .call("Math.min", vec![Operand::Const(30)])
        .sink(SinkContext::LoopBound);
    let inner = parsed()
        .call("Math.min", vec![Operand::Const(40)])
        .sink(SinkContext::LoopBound);

    let nest = [outer, inner];
    assert_eq!(classifier(1_200).classify_loop_nest(&nest).outcome, Outcome::Safe);

    // each loop alone is under the ceiling, the nest is not
    let verdict = classifier(1_000).classify_loop_nest(&nest);
    assert_eq!(verdict.outcome, Outcome::Unsafe);
    assert!(verdict.rationale.last().unwrap().explanation.contains("exceeds ceiling"));
}

#[test]
fn test_loop_nest_with_text_bound_is_unknown() {
    let outer = parsed()
        .call("Math.min", vec![Operand::Const(30)])
        .sink(SinkContext::LoopBound);
    let text = PathBuilder::new(SourceSpec::text("p")).sink(SinkContext::LoopBound);
    let verdict = classifier(1_000).classify_loop_nest(&[outer, text]);
    assert_eq!(verdict.outcome, Outcome::Unknown);
}
