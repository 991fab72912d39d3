//! kora-canonical
//!
//! Deterministic serializer for structured values. Two structurally equivalent
//! values (same keys and values, any insertion order) serialize to the same
//! byte string, so independent observers of the same ledger compute the same
//! digests. Every byte that is hashed or signed anywhere in the workspace goes
//! through [`to_canonical_bytes`].
//!
//! Rules:
//!   - mapping keys sorted by lexicographic byte order of their UTF-8 encoding
//!   - array element order preserved
//!   - integers with magnitude above 2^53 emitted as decimal-digit strings
//!     (lamport totals can exceed the double-precision safe range)
//!   - no insignificant whitespace, minimal JSON escaping, UTF-8 output
//!   - floats rejected: the value model is null/bool/int/string/array/map

use serde_json::Value;
use thiserror::Error;

/// Largest integer magnitude representable exactly in an IEEE-754 double.
/// Values strictly beyond this are emitted as quoted decimal strings.
const MAX_SAFE_INTEGER: u64 = 9_007_199_254_740_992;

#[derive(Debug, Error)]
pub enum CanonicalError {
    #[error("non-integer number {0} has no canonical form")]
    NonIntegerNumber(String),
}

/// Serialize `value` to its canonical byte string.
pub fn to_canonical_bytes(value: &Value) -> Result<Vec<u8>, CanonicalError> {
    Ok(to_canonical_string(value)?.into_bytes())
}

/// Serialize `value` to its canonical string form.
pub fn to_canonical_string(value: &Value) -> Result<String, CanonicalError> {
    let mut out = String::new();
    write_value(value, &mut out)?;
    Ok(out)
}

fn write_value(value: &Value, out: &mut String) -> Result<(), CanonicalError> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
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
            // serde_json's default map is already ordered, but the sort is
            // what the format guarantees, so do it explicitly.
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable_by(|a, b| a.as_bytes().cmp(b.as_bytes()));
            out.push('{');
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

fn write_number(n: &serde_json::Number, out: &mut String) -> Result<(), CanonicalError> {
    if let Some(u) = n.as_u64() {
        if u > MAX_SAFE_INTEGER {
            write_string(&u.to_string(), out);
        } else {
            out.push_str(&u.to_string());
        }
        return Ok(());
    }
    if let Some(i) = n.as_i64() {
        if i < -(MAX_SAFE_INTEGER as i64) {
            write_string(&i.to_string(), out);
        } else {
            out.push_str(&i.to_string());
        }
        return Ok(());
    }
    Err(CanonicalError::NonIntegerNumber(n.to_string()))
}

/// Minimal JSON string escaping: quote, backslash, and control codes only.
fn write_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{08}' => out.push_str("\\b"),
            '\u{09}' => out.push_str("\\t"),
            '\u{0a}' => out.push_str("\\n"),
            '\u{0c}' => out.push_str("\\f"),
            '\u{0d}' => out.push_str("\\r"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalars() {
        assert_eq!(to_canonical_string(&json!(null)).unwrap(), "null");
        assert_eq!(to_canonical_string(&json!(true)).unwrap(), "true");
        assert_eq!(to_canonical_string(&json!(42)).unwrap(), "42");
        assert_eq!(to_canonical_string(&json!(-7)).unwrap(), "-7");
        assert_eq!(to_canonical_string(&json!("hi")).unwrap(), "\"hi\"");
    }

    #[test]
    fn keys_sorted_regardless_of_insertion_order() {
        let mut a = serde_json::Map::new();
        a.insert("zeta".into(), json!(1));
        a.insert("alpha".into(), json!(2));
        let mut b = serde_json::Map::new();
        b.insert("alpha".into(), json!(2));
        b.insert("zeta".into(), json!(1));
        let ca = to_canonical_string(&Value::Object(a)).unwrap();
        let cb = to_canonical_string(&Value::Object(b)).unwrap();
        assert_eq!(ca, cb);
        assert_eq!(ca, r#"{"alpha":2,"zeta":1}"#);
    }

    #[test]
    fn nested_structures_have_no_whitespace() {
        let v = json!({"outer": {"inner": [1, 2, {"k": null}]}, "b": false});
        assert_eq!(
            to_canonical_string(&v).unwrap(),
            r#"{"b":false,"outer":{"inner":[1,2,{"k":null}]}}"#
        );
    }

    #[test]
    fn idempotent_over_reparse() {
        let v = json!({"b": [3, 2, 1], "a": {"y": "x", "x": "y"}});
        let once = to_canonical_string(&v).unwrap();
        let reparsed: Value = serde_json::from_str(&once).unwrap();
        let twice = to_canonical_string(&reparsed).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn large_integers_become_decimal_strings() {
        // 2^53 itself is exact; one past it is not.
        assert_eq!(
            to_canonical_string(&json!(9_007_199_254_740_992u64)).unwrap(),
            "9007199254740992"
        );
        assert_eq!(
            to_canonical_string(&json!(9_007_199_254_740_993u64)).unwrap(),
            "\"9007199254740993\""
        );
        assert_eq!(
            to_canonical_string(&json!(u64::MAX)).unwrap(),
            format!("\"{}\"", u64::MAX)
        );
        assert_eq!(
            to_canonical_string(&json!(-9_007_199_254_740_993i64)).unwrap(),
            "\"-9007199254740993\""
        );
    }

    #[test]
    fn floats_are_rejected() {
        assert!(to_canonical_string(&json!(1.5)).is_err());
    }

    #[test]
    fn string_escaping_is_minimal() {
        assert_eq!(
            to_canonical_string(&json!("a\"b\\c\nd\te\u{01}")).unwrap(),
            "\"a\\\"b\\\\c\\nd\\te\\u0001\""
        );
        // Non-ASCII passes through as raw UTF-8, not \u escapes.
        assert_eq!(to_canonical_string(&json!("é")).unwrap(), "\"é\"");
    }

    #[test]
    fn array_order_is_preserved() {
        assert_eq!(
            to_canonical_string(&json!([3, 1, 2])).unwrap(),
            "[3,1,2]"
        );
    }
}
