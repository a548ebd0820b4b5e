//! Conservative reader for validation regexes.
//!
//! Format validation (`if (PATTERN.matcher(v).matches()) { ... }`) only
//! narrows a value if we can say which characters a matching string may
//! contain. The pattern is parsed with `regex-syntax` and its HIR gives an
//! over-approximation:
//!
//! - the union of every character any class or literal can match, and
//! - the maximum match length, when every repetition is bounded.
//!
//! Patterns are read with ASCII semantics for `\d`, `\w`, `\s` and `(?i)`,
//! as Java does by default. Anything the parser rejects in that mode
//! (lookaround, backreferences, `\p{..}`, non-ASCII class members) yields
//! `None`, which callers treat as "no guarantee".
//!
//! # Anchoring
//!
//! A pattern constrains the whole value only when every match is anchored at
//! both ends. Full-match APIs (Java `matches()`, Python `fullmatch`) anchor
//! implicitly. Otherwise the HIR must carry a start-of-text assertion in its
//! prefix and an end-of-text assertion in its suffix, so `^a|b$` (each
//! alternative anchored on one side only) is rejected. A Java `$` or `\Z`
//! also matches before a final line terminator, so the terminators are added
//! to the class and two (`\r\n`) to the length.

use regex_syntax::ast::{self, Assertion, AssertionKind, Ast};
use regex_syntax::hir::translate::TranslatorBuilder;
use regex_syntax::hir::{Class, Hir, HirKind, Literal, Look};

use super::charset::CharClass;

/// What a matching string is known to look like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternShape {
    /// Every character a matching string may contain.
    pub class: CharClass,
    /// Longest possible match, `None` if unbounded.
    pub max_length: Option<usize>,
}

/// Java line terminators a trailing `$` may match before.
const LINE_TERMINATORS: &str = "\n\r\u{85}\u{2028}\u{2029}";

/// Analyze `pattern`. `full_match` is true when the validating API matches
/// the entire input regardless of anchors.
#[must_use]
pub fn analyze(pattern: &str, full_match: bool) -> Option<PatternShape> {
    let pattern = rewrite_trailing_big_z(pattern);
    let ast = ast::parse::Parser::new().parse(&pattern).ok()?;
    let hir = TranslatorBuilder::new()
        .unicode(false)
        .utf8(false)
        .build()
        .translate(&pattern, &ast)
        .ok()?;

    let props = hir.properties();
    let mut line_end = false;
    if !full_match {
        let starts = props.look_set_prefix().contains(Look::Start);
        let ends = props.look_set_suffix().contains(Look::End);
        if !starts || !ends {
            return None;
        }
        line_end = ast::visit(&ast, LineEndFinder::default()).unwrap_or(true);
    }

    let mut class = CharClass::EMPTY;
    collect_chars(&hir, &mut class);
    let mut max_length = props.maximum_len();
    if line_end {
        for c in LINE_TERMINATORS.chars() {
            class.insert(c);
        }
        max_length = max_length.and_then(|n| n.checked_add(2));
    }
    Some(PatternShape { class, max_length })
}

/// Java `\Z` has no `regex-syntax` spelling; at the very end it means the
/// same as a non-multiline `$`.
fn rewrite_trailing_big_z(pattern: &str) -> String {
    match pattern.strip_suffix("\\Z") {
        Some(head) if !ends_in_escape(head) => format!("{}$", head),
        _ => pattern.to_string(),
    }
}

/// Whether `text` ends in an odd run of backslashes.
fn ends_in_escape(text: &str) -> bool {
    text.chars().rev().take_while(|c| *c == '\\').count() % 2 == 1
}

/// Finds a `$` assertion anywhere in the pattern.
#[derive(Default)]
struct LineEndFinder {
    found: bool,
}

impl ast::Visitor for LineEndFinder {
    type Output = bool;
    type Err = ();

    fn finish(self) -> Result<bool, ()> {
        Ok(self.found)
    }

    fn visit_pre(&mut self, ast: &Ast) -> Result<(), ()> {
        if let Ast::Assertion(assertion) = ast {
            let Assertion { kind, .. } = assertion.as_ref();
            self.found |= *kind == AssertionKind::EndLine;
        }
        Ok(())
    }
}

fn collect_chars(hir: &Hir, class: &mut CharClass) {
    match hir.kind() {
        HirKind::Empty | HirKind::Look(_) => {}
        HirKind::Literal(Literal(bytes)) => {
            for c in String::from_utf8_lossy(bytes).chars() {
                class.insert(c);
            }
        }
        HirKind::Class(Class::Unicode(unicode)) => {
            let ranges = unicode.ranges().iter().map(|r| (r.start(), r.end()));
            *class = class.union(&CharClass::from_ranges(ranges));
        }
        HirKind::Class(Class::Bytes(bytes)) => {
            for range in bytes.ranges() {
                *class = class.union(&byte_range(range.start(), range.end()));
            }
        }
        HirKind::Repetition(repetition) => collect_chars(&repetition.sub, class),
        HirKind::Capture(capture) => collect_chars(&capture.sub, class),
        HirKind::Concat(subs) | HirKind::Alternation(subs) => {
            for sub in subs {
                collect_chars(sub, class);
            }
        }
    }
}

/// Characters reachable from a byte range. Bytes above ASCII are pieces of
/// UTF-8 sequences: covering all of them admits every non-ASCII character,
/// covering some admits some.
fn byte_range(lo: u8, hi: u8) -> CharClass {
    let mut class = CharClass::EMPTY;
    if lo <= 0x7F {
        class = CharClass::from_range(char::from(lo), char::from(hi.min(0x7F)));
    }
    if hi >= 0x80 {
        let wide = if lo <= 0x80 && hi == 0xFF {
            CharClass::from_range('\u{80}', char::MAX)
        } else {
            CharClass::from_chars("\u{80}")
        };
        class = class.union(&wide);
    }
    class
}
