//! RFC 8785 JSON Canonicalization Scheme (JCS) + SHA-256 fingerprinting.
//!
//! This is the only part of the crate with zero I/O: given a
//! [`serde_json::Value`], [`canonicalize`] always produces the same bytes
//! regardless of how the value's object keys were ordered when it was
//! built, and [`fingerprint`] reduces those bytes to a hex-encoded SHA-256
//! digest. Two upstreams advertising the same logical capability surface
//! with different key orders or incidental whitespace must fingerprint
//! identically; that property is what the snapshotter and scheduler rely on
//! to distinguish real drift from noise.

use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Failure to reduce a value to canonical form.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CanonicalizationError {
    /// A number was NaN or infinite. JCS numbers are IEEE-754 doubles
    /// serialized the way ECMAScript's `Number.prototype.toString` would;
    /// neither has a textual form.
    #[error("number is not finite and cannot be canonicalized")]
    NonFiniteNumber,

    /// An object had a non-string key. `serde_json::Value` cannot actually
    /// construct this (JSON object keys are always strings), but the error
    /// exists because the spec calls it out explicitly as a failure mode of
    /// the canonicalizer contract, not just of this implementation.
    #[error("object key is not a string")]
    NonStringKey,
}

/// Encode `value` as RFC 8785 canonical JSON bytes.
pub fn canonicalize(value: &Value) -> Result<Vec<u8>, CanonicalizationError> {
    let mut out = String::new();
    write_value(value, &mut out)?;
    Ok(out.into_bytes())
}

/// SHA-256 of the canonical encoding of `value`, as lowercase hex.
pub fn fingerprint(value: &Value) -> Result<String, CanonicalizationError> {
    let bytes = canonicalize(value)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

fn write_value(value: &Value, out: &mut String) -> Result<(), CanonicalizationError> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => write_number(n, out)?,
        Value::String(s) => write_string(s, out),
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
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            // Sorting Rust `String`s compares UTF-8 bytes, which orders
            // valid UTF-8 the same as comparing by Unicode code point.
            keys.sort_unstable();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_value(&map[key.as_str()], out)?;
            }
            out.push('}');
        }
    }
    Ok(())
}

fn write_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0C}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}

fn write_number(n: &serde_json::Number, out: &mut String) -> Result<(), CanonicalizationError> {
    let f = n.as_f64().ok_or(CanonicalizationError::NonFiniteNumber)?;
    out.push_str(&format_ecma_number(f)?);
    Ok(())
}

/// Format `f` the way ECMAScript's `Number.prototype.toString` (radix 10)
/// would, per RFC 8785 §3.2.2.3. Uses `ryu` only to get the shortest
/// round-tripping decimal digit string for `f`; the placement of the
/// decimal point / switch to exponential notation is reimplemented here
/// to match ECMA-262's `Number::toString` algorithm exactly, since ryu's
/// own textual layout follows Rust conventions, not ECMAScript's.
fn format_ecma_number(f: f64) -> Result<String, CanonicalizationError> {
    if !f.is_finite() {
        return Err(CanonicalizationError::NonFiniteNumber);
    }
    if f == 0.0 {
        // ECMAScript: both +0 and -0 stringify to "0".
        return Ok("0".to_string());
    }

    let neg = f.is_sign_negative();
    let abs = f.abs();
    let mut buf = ryu::Buffer::new();
    let shortest = buf.format_finite(abs);
    let (digits, point_pos) = decompose_decimal(shortest);
    let k = digits.len() as i64;
    let n = point_pos;

    let mut result = String::new();
    if neg {
        result.push('-');
    }

    if n >= 1 && n <= 21 {
        if k <= n {
            result.push_str(&digits);
            result.push_str(&"0".repeat((n - k) as usize));
        } else {
            result.push_str(&digits[..n as usize]);
            result.push('.');
            result.push_str(&digits[n as usize..]);
        }
    } else if n <= 0 && n > -6 {
        result.push_str("0.");
        result.push_str(&"0".repeat((-n) as usize));
        result.push_str(&digits);
    } else {
        let exp = n - 1;
        if k == 1 {
            result.push_str(&digits);
        } else {
            result.push_str(&digits[..1]);
            result.push('.');
            result.push_str(&digits[1..]);
        }
        result.push('e');
        result.push(if exp >= 0 { '+' } else { '-' });
        result.push_str(&exp.abs().to_string());
    }

    Ok(result)
}

/// Parse any decimal or exponential textual float representation (as
/// produced by `ryu`) into its significant digit string (no leading or
/// trailing zeroes) and the position of the decimal point relative to the
/// start of that digit string. E.g. "123.45" -> ("12345", 3),
/// "1.5e10" -> ("15", 11), "0.0012" -> ("12", -2).
fn decompose_decimal(s: &str) -> (String, i64) {
    let (mantissa, exp) = match s.split_once(['e', 'E']) {
        Some((m, e)) => (m, e.parse::<i64>().unwrap_or(0)),
        None => (s, 0),
    };
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));

    let mut digits = String::with_capacity(int_part.len() + frac_part.len());
    digits.push_str(int_part);
    digits.push_str(frac_part);
    let mut point_pos = int_part.len() as i64 + exp;

    let leading_zeros = digits.len() - digits.trim_start_matches('0').len();
    digits = digits.trim_start_matches('0').to_string();
    point_pos -= leading_zeros as i64;

    if digits.is_empty() {
        return ("0".to_string(), 1);
    }

    digits = digits.trim_end_matches('0').to_string();
    if digits.is_empty() {
        digits.push('0');
    }

    (digits, point_pos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonicalize_sorts_object_keys() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(canonicalize(&a).unwrap(), canonicalize(&b).unwrap());
        assert_eq!(
            String::from_utf8(canonicalize(&a).unwrap()).unwrap(),
            r#"{"a":2,"b":1}"#
        );
    }

    #[test]
    fn canonicalize_nested_objects_and_arrays() {
        let v = json!({"z": [1, 2, {"y": true, "x": null}], "a": "hi"});
        let out = String::from_utf8(canonicalize(&v).unwrap()).unwrap();
        assert_eq!(out, r#"{"a":"hi","z":[1,2,{"x":null,"y":true}]}"#);
    }

    #[test]
    fn canonicalize_escapes_strings() {
        let v = json!("line1\nline2\t\"quoted\"\\");
        let out = String::from_utf8(canonicalize(&v).unwrap()).unwrap();
        assert_eq!(out, r#""line1\nline2\t\"quoted\"\\""#);
    }

    #[test]
    fn canonicalize_retains_non_bmp_literally() {
        let v = json!("hi \u{1F600}");
        let out = String::from_utf8(canonicalize(&v).unwrap()).unwrap();
        assert!(out.contains('\u{1F600}'));
    }

    #[test]
    fn integers_have_no_decimal_point() {
        assert_eq!(format_ecma_number(5.0).unwrap(), "5");
        assert_eq!(format_ecma_number(-5.0).unwrap(), "-5");
        assert_eq!(format_ecma_number(100.0).unwrap(), "100");
    }

    #[test]
    fn fractions_format_shortest() {
        assert_eq!(format_ecma_number(1.5).unwrap(), "1.5");
        assert_eq!(format_ecma_number(0.1).unwrap(), "0.1");
    }

    #[test]
    fn small_magnitudes_use_leading_zero_form() {
        assert_eq!(format_ecma_number(0.0001).unwrap(), "0.0001");
        assert_eq!(format_ecma_number(0.000001).unwrap(), "0.000001");
    }

    #[test]
    fn very_small_magnitudes_use_exponential_form() {
        let s = format_ecma_number(0.0000001).unwrap();
        assert_eq!(s, "1e-7");
    }

    #[test]
    fn very_large_magnitudes_use_exponential_form() {
        let s = format_ecma_number(1e21).unwrap();
        assert_eq!(s, "1e+21");
        let s = format_ecma_number(1e20).unwrap();
        assert_eq!(s, "100000000000000000000");
    }

    #[test]
    fn rejects_non_finite() {
        assert_eq!(
            format_ecma_number(f64::NAN).unwrap_err(),
            CanonicalizationError::NonFiniteNumber
        );
        assert_eq!(
            format_ecma_number(f64::INFINITY).unwrap_err(),
            CanonicalizationError::NonFiniteNumber
        );
    }

    #[test]
    fn fingerprint_is_deterministic_under_key_permutation() {
        let a = json!({"tools": [{"name": "echo"}], "meta": {"x": 1, "y": 2}});
        let b = json!({"meta": {"y": 2, "x": 1}, "tools": [{"name": "echo"}]});
        assert_eq!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
    }

    #[test]
    fn fingerprint_changes_when_content_changes() {
        let a = json!({"tools": ["echo"]});
        let b = json!({"tools": ["echo", "ping"]});
        assert_ne!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
    }

    proptest::proptest! {
        #[test]
        fn canonicalize_is_idempotent_under_reparse(
            a in 0i64..1_000_000, b in 0i64..1_000_000, s in "[a-zA-Z0-9]{0,12}"
        ) {
            let v = json!({"b": b, "a": a, "s": s});
            let first = canonicalize(&v).unwrap();
            let reparsed: Value = serde_json::from_slice(&first).unwrap();
            let second = canonicalize(&reparsed).unwrap();
            prop_assert_eq!(first, second);
        }
    }
}
