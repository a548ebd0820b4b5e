//! Loop bound safety checker.
//!
//! Decides whether a tainted loop bound can drive the iteration count above
//! the configured ceiling `K`:
//!
//! 1. empty interval: the loop is unreachable, **safe**
//! 2. `high < 0`: the loop never executes, **safe** (noted, it may be a bug)
//! 3. `high <= K`: provably bounded, **safe**
//! 4. `high = +inf` or `high > K`: **unsafe**
//!
//! Compound guards (`i < a && i < b`) are abstracted as `min(a, b)` upstream,
//! so only one side needs a bound. Nested loops multiply their iteration
//! counts.

use crate::abstractor::Abstraction;
use crate::interval::{Bound, Interval};
use crate::verdict::{Assessment, Outcome, RationaleStep};

/// Ceiling as a bound. Ceilings beyond `i64::MAX` saturate.
fn ceiling_bound(ceiling: u64) -> Bound {
    Bound::Finite(i64::try_from(ceiling).unwrap_or(i64::MAX))
}

/// Check a single loop bound interval.
///
/// `bounding_step` is the step that last narrowed the upper bound, cited in
/// the rationale of a safe verdict.
#[must_use]
pub fn check_loop_bound(interval: &Interval, ceiling: u64, bounding_step: Option<usize>) -> Assessment {
    let mut assessment = Assessment::new(Outcome::Safe);
    let k = ceiling_bound(ceiling);

    let (outcome, step, explanation) = if interval.is_empty() {
        assessment
            .notes
            .push("loop bound is unreachable on this path".to_string());
        (Outcome::Safe, None, "unreachable: no value reaches the loop".to_string())
    } else if interval.high < Bound::Finite(0) {
        assessment.notes.push(format!(
            "loop bound {} is always negative; the loop never executes (possible logic defect)",
            interval
        ));
        (Outcome::Safe, bounding_step, "loop never executes".to_string())
    } else if interval.high <= k {
        (
            Outcome::Safe,
            bounding_step,
            format!("provably bounded: at most {} iterations, ceiling {}", interval.high, ceiling),
        )
    } else if interval.high == Bound::PosInf {
        (
            Outcome::Unsafe,
            None,
            "unbounded: no step establishes a finite upper bound".to_string(),
        )
    } else {
        (
            Outcome::Unsafe,
            bounding_step,
            format!("exceeds ceiling: up to {} iterations, ceiling {}", interval.high, ceiling),
        )
    };

    assessment.outcome = outcome;
    assessment.rationale.push(RationaleStep {
        step,
        operation: "loop bound check".to_string(),
        guarantee: interval.to_string(),
        explanation,
    });
    assessment
}

/// Check the loop bound reached by an abstracted path.
#[must_use]
pub fn check_abstraction(abstraction: &Abstraction, ceiling: u64) -> Option<Assessment> {
    abstraction
        .value
        .as_interval()
        .map(|iv| check_loop_bound(iv, ceiling, abstraction.bounding_step))
}

/// Check a loop nest: total work is the product of the loops' iteration
/// counts. Any unsafe loop keeps the nest unsafe.
#[must_use]
pub fn check_loop_nest(bounds: &[Interval], ceiling: u64) -> Assessment {
    let mut assessment = Assessment::new(Outcome::Safe);
    let mut total = Interval::constant(1);

    for (depth, bound) in bounds.iter().enumerate() {
        let single = check_loop_bound(bound, ceiling, None);
        assessment.outcome = assessment.outcome.worst(single.outcome);
        assessment.notes.extend(single.notes);
        assessment
            .rationale
            .extend(single.rationale.into_iter().map(|mut entry| {
                entry.operation = format!("loop at depth {}", depth);
                entry
            }));
        total = total.mul(&bound.iteration_count());
    }

    let k = ceiling_bound(ceiling);
    let explanation = if total.is_empty() {
        "nest is unreachable".to_string()
    } else if total.high <= k {
        format!("total work at most {}, ceiling {}", total.high, ceiling)
    } else {
        assessment.outcome = Outcome::Unsafe;
        format!("total work up to {} exceeds ceiling {}", total.high, ceiling)
    };
    assessment.rationale.push(RationaleStep {
        step: None,
        operation: format!("loop nest of depth {}", bounds.len()),
        guarantee: total.to_string(),
        explanation,
    });
    assessment
}
