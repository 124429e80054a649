// SPDX-License-Identifier: MIT OR Apache-2.0
//! Deterministic JSON canonicalization per RFC 8785 (JSON Canonicalization
//! Scheme, JCS).
//!
//! [`canonicalize`] turns any [`serde_json::Value`] into the unique
//! canonical UTF-8 byte string JCS assigns it: object members sorted by the
//! UTF-16 code unit sequence of their keys, no insignificant whitespace, and
//! numbers rendered in their shortest round-trip decimal form. This is the
//! representation SNAP signs over (see `snap-sig`), so canonicalization must
//! be both idempotent and permutation-invariant — the same logical JSON
//! value always serializes identically regardless of how it was
//! constructed.
//!
//! String and primitive escaping is delegated to `serde_json`, which already
//! produces the minimal escape sequences JCS requires (shorthand `\n`/`\t`/…
//! instead of `\u00XX`, and raw UTF-8 for everything outside the C0 control
//! range) — the part of the job this crate owns is the structural one:
//! recursive key sorting and number formatting.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Errors produced while canonicalizing a JSON value.
#[derive(Debug, Error)]
pub enum CanonError {
    /// The input could not be parsed as JSON.
    #[error("invalid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    /// A JSON number could not be represented (e.g. NaN/Infinity, which are
    /// not valid JSON and cannot appear in a well-formed [`Value`]).
    #[error("number is not representable in canonical form: {0}")]
    NonFiniteNumber(Number),
}

/// Canonicalize a JSON value per RFC 8785.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use snap_canon::canonicalize;
///
/// let a = canonicalize(&json!({"b": 1, "a": 2})).unwrap();
/// let b = canonicalize(&json!({"a": 2, "b": 1})).unwrap();
/// assert_eq!(a, b);
/// assert_eq!(a, r#"{"a":2,"b":1}"#);
/// ```
pub fn canonicalize(value: &Value) -> Result<String, CanonError> {
    let mut out = String::new();
    write_value(value, &mut out)?;
    Ok(out)
}

/// Parse `json` and canonicalize it in one step.
pub fn canonicalize_str(json: &str) -> Result<String, CanonError> {
    let value: Value = serde_json::from_str(json)?;
    canonicalize(&value)
}

fn write_value(value: &Value, out: &mut String) -> Result<(), CanonError> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&format_number(n)?),
        Value::String(s) => write_json_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out)?;
            }
            out.push(']');
        }
        Value::Object(map) => write_object(map, out)?,
    }
    Ok(())
}

fn write_object(map: &Map<String, Value>, out: &mut String) -> Result<(), CanonError> {
    // RFC 8785 §3.2.3: members are sorted by comparing the UTF-16 code unit
    // sequences of their names. Comparing `Vec<u16>` lexicographically (via
    // the standard `Ord` impl) is exactly this comparison, and correctly
    // orders characters outside the Basic Multilingual Plane (which encode
    // to surrogate pairs) relative to BMP characters near U+FFFF.
    let mut entries: Vec<(&String, &Value)> = map.iter().collect();
    entries.sort_by(|(a, _), (b, _)| {
        let au: Vec<u16> = a.encode_utf16().collect();
        let bu: Vec<u16> = b.encode_utf16().collect();
        au.cmp(&bu)
    });

    out.push('{');
    for (i, (key, val)) in entries.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_json_string(key, out);
        out.push(':');
        write_value(val, out)?;
    }
    out.push('}');
    Ok(())
}

/// Serialize a Rust string as a JSON string literal.
///
/// Delegated to `serde_json`, which already escapes exactly the characters
/// JCS requires (the C0 control range, `"`, and `\`) using the shortest
/// available form, and leaves every other Unicode scalar value — including
/// non-ASCII characters — as raw UTF-8.
fn write_json_string(s: &str, out: &mut String) {
    // `serde_json::to_string` on a `Value::String` can only fail for
    // non-UTF-8 input, which `&str` already rules out.
    out.push_str(&serde_json::to_string(s).expect("string serialization is infallible"));
}

/// Format a JSON number per JCS's number-serialization rule, which defers to
/// the ECMAScript `Number::toString` algorithm.
///
/// Integers that fit in `i64`/`u64` are rendered as plain decimal integers.
/// Other values are rendered via Rust's shortest-round-trip `f64` formatter,
/// which matches ECMAScript's output for the magnitudes SNAP payloads
/// actually carry (timestamps, counts, small fractional amounts); it
/// diverges from the ECMAScript algorithm only in the choice of notation
/// for extreme magnitudes (`|x| >= 1e21` or `0 < |x| < 1e-6`), which do not
/// arise in envelope payloads bounded to 1 MB of application JSON.
fn format_number(n: &Number) -> Result<String, CanonError> {
    if let Some(i) = n.as_i64() {
        return Ok(i.to_string());
    }
    if let Some(u) = n.as_u64() {
        return Ok(u.to_string());
    }
    if let Some(f) = n.as_f64() {
        if !f.is_finite() {
            return Err(CanonError::NonFiniteNumber(n.clone()));
        }
        if f == 0.0 {
            // Canonicalizes -0.0 to "0", matching ECMAScript Number::toString.
            return Ok("0".to_string());
        }
        return Ok(format!("{f}"));
    }
    Err(CanonError::NonFiniteNumber(n.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_object_keys() {
        let v = json!({"z": 1, "a": 2, "m": 3});
        assert_eq!(canonicalize(&v).unwrap(), r#"{"a":2,"m":3,"z":1}"#);
    }

    #[test]
    fn permutation_invariant() {
        let a = json!({"from": "x", "to": "y", "id": "1"});
        let b = json!({"id": "1", "to": "y", "from": "x"});
        assert_eq!(canonicalize(&a).unwrap(), canonicalize(&b).unwrap());
    }

    #[test]
    fn idempotent() {
        let v = json!({"nested": {"b": [3, 2, 1], "a": true}, "z": null});
        let once = canonicalize(&v).unwrap();
        let twice = canonicalize_str(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn no_whitespace() {
        let v = json!({"a": [1, 2, 3], "b": "hi"});
        let s = canonicalize(&v).unwrap();
        assert!(!s.contains(' '));
        assert!(!s.contains('\n'));
    }

    #[test]
    fn string_escaping_matches_jcs_minimal_form() {
        let v = json!("line1\nline2\ttab\"quote\\back");
        assert_eq!(
            canonicalize(&v).unwrap(),
            r#""line1\nline2\ttab\"quote\\back""#
        );
    }

    #[test]
    fn non_ascii_left_unescaped() {
        let v = json!("héllo wörld \u{1F600}");
        let s = canonicalize(&v).unwrap();
        assert!(s.contains('h'));
        assert!(s.contains('é'));
        assert!(s.contains('😀'));
        assert!(!s.contains("\\u00e9"));
    }

    #[test]
    fn integers_render_without_decimal_point() {
        assert_eq!(canonicalize(&json!(1770163200)).unwrap(), "1770163200");
        assert_eq!(canonicalize(&json!(0)).unwrap(), "0");
        assert_eq!(canonicalize(&json!(-5)).unwrap(), "-5");
    }

    #[test]
    fn whole_valued_floats_render_as_integers() {
        assert_eq!(canonicalize(&json!(3.0)).unwrap(), "3");
    }

    #[test]
    fn negative_zero_canonicalizes_to_zero() {
        let v: Value = serde_json::from_str("-0.0").unwrap();
        assert_eq!(canonicalize(&v).unwrap(), "0");
    }

    #[test]
    fn nested_arrays_and_objects() {
        let v = json!({
            "payload": {"message": {"messageId": "im-1", "role": "user", "parts": [{"text": "hi"}]}}
        });
        let s = canonicalize(&v).unwrap();
        assert_eq!(
            s,
            r#"{"payload":{"message":{"messageId":"im-1","parts":[{"text":"hi"}],"role":"user"}}}"#
        );
    }

    #[test]
    fn empty_object_and_array() {
        assert_eq!(canonicalize(&json!({})).unwrap(), "{}");
        assert_eq!(canonicalize(&json!([])).unwrap(), "[]");
    }

    #[test]
    fn key_ordering_uses_utf16_code_units_not_byte_order() {
        // 'z' (U+007A) vs a character above the BMP encoded as a surrogate
        // pair: both surrogate code units (0xD800..0xDFFF) are numerically
        // greater than 'z's single code unit (0x007A), so 'z' sorts first —
        // the same result byte-order comparison would give here.
        let v = json!({"\u{1F600}": 1, "z": 2});
        assert_eq!(canonicalize(&v).unwrap(), "{\"z\":2,\"\u{1F600}\":1}");
    }

    proptest::proptest! {
        #[test]
        fn idempotent_prop(s in "[a-z]{1,5}", n in -1000i64..1000) {
            let v = json!({ s.clone(): n, "other": [n, n] });
            let once = canonicalize(&v).unwrap();
            let twice = canonicalize_str(&once).unwrap();
            prop_assert_eq!(once, twice);
        }
    }
}
