//! Deterministic canonical-JSON serialization.
//!
//! Everything that is hashed or signed in this crate goes through this
//! module, so that two independent observers serializing structurally
//! equivalent values obtain byte-identical output:
//!
//! - object keys are sorted by lexicographic byte order of their UTF-8
//!   encoding;
//! - array element order is preserved;
//! - no insignificant whitespace is emitted;
//! - strings use minimal JSON escaping (quote, backslash, and the C0
//!   control range);
//! - integers whose magnitude exceeds 2⁵³ are emitted as decimal-digit
//!   **strings**, so that consumers with 53-bit number precision parse
//!   them losslessly (lamport totals can exceed that bound).
//!
//! Floating-point numbers are rejected outright: every quantity in this
//! system is an integer, and floats have no deterministic cross-platform
//! representation.

use std::fmt::Write as _;

use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Largest integer magnitude emitted as a bare JSON number.
///
/// Values above this bound are serialized as decimal strings.
pub const MAX_NUMERIC_MAGNITUDE: u64 = 1 << 53;

/// Errors that can occur during canonicalization.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CanonicalError {
    /// A floating-point number was encountered.
    #[error("float not allowed: canonical form requires integer-only numbers")]
    FloatNotAllowed,
}

/// Serializes a value to its canonical byte-exact form.
///
/// # Errors
///
/// Returns [`CanonicalError::FloatNotAllowed`] if the value contains a
/// floating-point number anywhere in its structure.
pub fn canonicalize_value(value: &Value) -> Result<String, CanonicalError> {
    let mut output = String::new();
    emit_value(value, &mut output)?;
    Ok(output)
}

/// Serializes a value to canonical form and returns the UTF-8 bytes.
///
/// This is the form fed into hashers and signers.
///
/// # Errors
///
/// Returns [`CanonicalError::FloatNotAllowed`] if the value contains a
/// floating-point number anywhere in its structure.
pub fn canonical_bytes(value: &Value) -> Result<Vec<u8>, CanonicalError> {
    canonicalize_value(value).map(String::into_bytes)
}

fn emit_value(value: &Value, output: &mut String) -> Result<(), CanonicalError> {
    match value {
        Value::Null => output.push_str("null"),
        Value::Bool(b) => output.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => emit_number(n, output)?,
        Value::String(s) => emit_string(s, output),
        Value::Array(arr) => emit_array(arr, output)?,
        Value::Object(obj) => emit_object(obj, output)?,
    }
    Ok(())
}

/// Emits an integer, demoting it to a decimal string above the 53-bit bound.
fn emit_number(n: &Number, output: &mut String) -> Result<(), CanonicalError> {
    if let Some(i) = n.as_i64() {
        if i.unsigned_abs() > MAX_NUMERIC_MAGNITUDE {
            let _ = write!(output, "\"{i}\"");
        } else {
            let _ = write!(output, "{i}");
        }
        return Ok(());
    }
    if let Some(u) = n.as_u64() {
        if u > MAX_NUMERIC_MAGNITUDE {
            let _ = write!(output, "\"{u}\"");
        } else {
            let _ = write!(output, "{u}");
        }
        return Ok(());
    }
    Err(CanonicalError::FloatNotAllowed)
}

/// Emits a string with minimal escaping.
///
/// Only the quotation mark, reverse solidus, and control characters
/// U+0000 through U+001F are escaped; short escapes are used where JSON
/// defines them and `\uXXXX` otherwise.
fn emit_string(s: &str, output: &mut String) {
    output.push('"');
    for c in s.chars() {
        match c {
            '"' => output.push_str("\\\""),
            '\\' => output.push_str("\\\\"),
            '\u{0008}' => output.push_str("\\b"),
            '\u{000C}' => output.push_str("\\f"),
            '\n' => output.push_str("\\n"),
            '\r' => output.push_str("\\r"),
            '\t' => output.push_str("\\t"),
            c if ('\u{0000}'..='\u{001F}').contains(&c) => {
                let _ = write!(output, "\\u{:04x}", c as u32);
            },
            c => output.push(c),
        }
    }
    output.push('"');
}

fn emit_array(arr: &[Value], output: &mut String) -> Result<(), CanonicalError> {
    output.push('[');
    for (i, item) in arr.iter().enumerate() {
        if i > 0 {
            output.push(',');
        }
        emit_value(item, output)?;
    }
    output.push(']');
    Ok(())
}

fn emit_object(obj: &Map<String, Value>, output: &mut String) -> Result<(), CanonicalError> {
    let mut sorted_keys: Vec<&String> = obj.keys().collect();
    sorted_keys.sort();

    output.push('{');
    for (i, key) in sorted_keys.iter().enumerate() {
        if i > 0 {
            output.push(',');
        }
        emit_string(key, output);
        output.push(':');
        emit_value(&obj[*key], output)?;
    }
    output.push('}');
    Ok(())
}
