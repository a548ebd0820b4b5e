//! Built-in transform catalogue.
//!
//! Covers the sanitizers and numeric helpers most often seen between a
//! source and a sink in Java, C#, Python and JavaScript code:
//!
//! - **Escaping**: Apache Commons Text, OWASP Java Encoder, ESAPI, .NET, Python `html`
//! - **Encoding**: URL encoders, digests
//! - **Formatting**: integer to string conversions
//! - **Masking**: partial redaction of PII
//! - **Numeric**: `Math.*`, parsing helpers

use std::collections::BTreeSet;

use super::{DigestEncoding, StringEffect, TransformRegistry};
use crate::guarantee::EscapeContext;
use crate::interval::IntType;
use crate::path::NumericOpKind;

/// Build the complete built-in registry.
pub fn builtin_transforms() -> TransformRegistry {
    let mut registry = TransformRegistry::default();

    add_html_escapes(&mut registry);
    add_script_escapes(&mut registry);
    add_url_encoders(&mut registry);
    add_css_escapes(&mut registry);
    add_numeric_formatters(&mut registry);
    add_redaction(&mut registry);
    add_pass_through(&mut registry);
    add_numeric_helpers(&mut registry);

    registry
}

// =============================================================================
// HTML
// =============================================================================

fn add_html_escapes(registry: &mut TransformRegistry) {
    let html = StringEffect::Escape(EscapeContext::Html);
    let attribute = StringEffect::Escape(EscapeContext::HtmlAttribute);

    // Project-local helpers (Sanitizer.escapeHtml)
    registry.add("escapeHtml", html.clone());
    registry.add("Sanitizer.escapeHtml", html.clone());

    // Apache Commons Text / Lang
    registry.add("StringEscapeUtils.escapeHtml4", html.clone());
    registry.add("StringEscapeUtils.escapeHtml3", html.clone());
    registry.add("StringEscapeUtils.escapeXml11", html.clone());

    // Spring
    registry.add("HtmlUtils.htmlEscape", html.clone());

    // OWASP Java Encoder
    registry.add("Encode.forHtml", html.clone());
    registry.add("Encode.forHtmlContent", html.clone());
    registry.add("Encode.forXml", html.clone());
    registry.add("Encode.forHtmlAttribute", attribute.clone());
    registry.add("Encode.forXmlAttribute", attribute.clone());

    // ESAPI
    registry.add("ESAPI.encoder().encodeForHTML", html.clone());
    registry.add("ESAPI.encoder().encodeForHTMLAttribute", attribute.clone());

    // .NET
    registry.add("HttpUtility.HtmlEncode", html.clone());
    registry.add("WebUtility.HtmlEncode", html.clone());
    registry.add("AntiXssEncoder.HtmlEncode", html.clone());
    registry.add("HttpUtility.HtmlAttributeEncode", attribute);

    // Python / JavaScript
    registry.add("html.escape", html.clone());
    registry.add("markupsafe.escape", html.clone());
    registry.add("escape-html", html);
}

// =============================================================================
// JavaScript / JSON
// =============================================================================

fn add_script_escapes(registry: &mut TransformRegistry) {
    let script = StringEffect::Escape(EscapeContext::Script);

    registry.add("Encode.forJavaScript", script.clone());
    registry.add("Encode.forJavaScriptBlock", script.clone());
    registry.add("StringEscapeUtils.escapeEcmaScript", script.clone());
    registry.add("ESAPI.encoder().encodeForJavaScript", script.clone());
    registry.add("HttpUtility.JavaScriptStringEncode", script.clone());
    registry.add("JavaScriptEncoder.Default.Encode", script);
}

// =============================================================================
// URL
// =============================================================================

fn add_url_encoders(registry: &mut TransformRegistry) {
    let url = StringEffect::Escape(EscapeContext::Url);

    registry.add("URLEncoder.encode", url.clone());
    registry.add("Encode.forUriComponent", url.clone());
    registry.add("ESAPI.encoder().encodeForURL", url.clone());
    registry.add("HttpUtility.UrlEncode", url.clone());
    registry.add("Uri.EscapeDataString", url.clone());
    registry.add("urllib.parse.quote", url.clone());
    registry.add("encodeURIComponent", url);
}

// =============================================================================
// CSS
// =============================================================================

fn add_css_escapes(registry: &mut TransformRegistry) {
    let css = StringEffect::Escape(EscapeContext::Css);

    registry.add("Encode.forCssString", css.clone());
    registry.add("Encode.forCssUrl", css.clone());
    registry.add("ESAPI.encoder().encodeForCSS", css.clone());
    registry.add("CSS.escape", css);
}

// =============================================================================
// Number Formatting
// =============================================================================

fn add_numeric_formatters(registry: &mut TransformRegistry) {
    let decimal = StringEffect::NumericFormat { radix: 10 };
    let hex = StringEffect::NumericFormat { radix: 16 };

    registry.add("Integer.toString", decimal.clone());
    registry.add("String.valueOf", decimal.clone());
    registry.add("Long.toString", decimal.clone());
    registry.add("Int32.ToString", decimal.clone());
    registry.add("str", decimal);
    registry.add("Integer.toHexString", hex.clone());
    registry.add("Long.toHexString", hex);

    // Sanitizer.extractNumeric, CharMatcher.digit().retainFrom
    registry.add("extractNumeric", StringEffect::DigitFilter);
    registry.add("Sanitizer.extractNumeric", StringEffect::DigitFilter);
    registry.add("CharMatcher.digit().retainFrom", StringEffect::DigitFilter);
    registry.add("StringUtils.getDigits", StringEffect::DigitFilter);

    let booleans: BTreeSet<String> = ["true", "false"].iter().map(|s| s.to_string()).collect();
    registry.add("Boolean.toString", StringEffect::AllowList(booleans.clone()));
    registry.add("Boolean.parseBoolean", StringEffect::AllowList(booleans));
}

// =============================================================================
// Redaction
// =============================================================================

fn add_redaction(registry: &mut TransformRegistry) {
    let last_four = StringEffect::Mask {
        suffix: 4,
        filler: '*',
    };

    registry.add("mask", last_four.clone());
    registry.add("Sanitizer.mask", last_four.clone());
    registry.add("maskLast4", last_four.clone());
    // "XXX-XX-" + ssn.substring(len - 4)
    registry.add("StringUtils.right", last_four);
    registry.add(
        "StringUtils.overlay",
        StringEffect::Mask {
            suffix: 0,
            filler: '*',
        },
    );

    registry.add(
        "DigestUtils.sha256Hex",
        StringEffect::Digest {
            encoding: DigestEncoding::Hex,
            output_len: 64,
        },
    );
    registry.add(
        "DigestUtils.sha1Hex",
        StringEffect::Digest {
            encoding: DigestEncoding::Hex,
            output_len: 40,
        },
    );
    registry.add(
        "DigestUtils.md5Hex",
        StringEffect::Digest {
            encoding: DigestEncoding::Hex,
            output_len: 32,
        },
    );
    registry.add(
        "hashlib.sha256().hexdigest",
        StringEffect::Digest {
            encoding: DigestEncoding::Hex,
            output_len: 64,
        },
    );
    registry.add(
        "Convert.ToBase64String(SHA256.HashData)",
        StringEffect::Digest {
            encoding: DigestEncoding::Base64,
            output_len: 44,
        },
    );
}

// =============================================================================
// Pass-through and Case
// =============================================================================

fn add_pass_through(registry: &mut TransformRegistry) {
    let pass = StringEffect::PassThrough { truncate: None };

    registry.add("substring", pass.clone());
    registry.add("String.substring", pass.clone());
    registry.add("Substring", pass.clone());
    registry.add("concat", pass.clone());
    registry.add("String.concat", pass.clone());
    registry.add("String.format", pass.clone());
    registry.add("trim", pass);
    registry.add(
        "StringUtils.abbreviate",
        StringEffect::PassThrough { truncate: Some(20) },
    );

    let lower = StringEffect::CaseMap { lower: true };
    let upper = StringEffect::CaseMap { lower: false };
    registry.add("toLowerCase", lower.clone());
    registry.add("String.toLowerCase", lower.clone());
    registry.add("ToLowerInvariant", lower.clone());
    registry.add("str.lower", lower);
    registry.add("toUpperCase", upper.clone());
    registry.add("String.toUpperCase", upper.clone());
    registry.add("ToUpperInvariant", upper.clone());
    registry.add("str.upper", upper);
}

// =============================================================================
// Numeric Helpers
// =============================================================================

fn add_numeric_helpers(registry: &mut TransformRegistry) {
    registry.add("Math.min", NumericOpKind::Min);
    registry.add("Math.max", NumericOpKind::Max);
    registry.add("Math.abs", NumericOpKind::Abs);
    registry.add("Math.floorMod", NumericOpKind::Rem);
    registry.add("Math.negateExact", NumericOpKind::Neg);
    registry.add("Math.Min", NumericOpKind::Min);
    registry.add("Math.Max", NumericOpKind::Max);
    registry.add("Math.Abs", NumericOpKind::Abs);
    registry.add("Math.Clamp", NumericOpKind::Clamp);
    registry.add("Sanitizer.bound", NumericOpKind::Clamp);
    registry.add("min", NumericOpKind::Min);
    registry.add("max", NumericOpKind::Max);
    registry.add("abs", NumericOpKind::Abs);

    registry.add("Integer.parseInt", NumericOpKind::ParseInt(IntType::I32));
    registry.add("Integer.valueOf", NumericOpKind::ParseInt(IntType::I32));
    registry.add("Sanitizer.toInt", NumericOpKind::ParseInt(IntType::I32));
    registry.add("Long.parseLong", NumericOpKind::ParseInt(IntType::I64));
    registry.add("Sanitizer.toLong", NumericOpKind::ParseInt(IntType::I64));
    registry.add("Short.parseShort", NumericOpKind::ParseInt(IntType::I16));
    registry.add("Byte.parseByte", NumericOpKind::ParseInt(IntType::I8));
    registry.add("int.Parse", NumericOpKind::ParseInt(IntType::I32));
    registry.add("int", NumericOpKind::ParseInt(IntType::I64));
    registry.add("parseInt", NumericOpKind::ParseInt(IntType::I32));
    registry.add("String.length", NumericOpKind::Length);
}
