//! Submitted index validation.
//!
//! Inputs arrive as a JSON number or string and are classified in a fixed
//! order; the first failing rule decides the error:
//!
//! 1. absent, `null`, or `""` is [`ErrorCode::MissingIndex`]
//! 2. no leading integer (optional whitespace, optional sign, digits) is
//!    [`ErrorCode::MalformedIndex`]
//! 3. a negative leading integer is [`ErrorCode::IndexTooSmall`]
//! 4. a leading integer above the policy maximum is [`ErrorCode::IndexTooLarge`]
//! 5. a leading integer that differs from the numeric value of the whole
//!    input (`"3.5"`, `"12abc"`, `"0x10"`) is [`ErrorCode::NotAnInteger`]
//!
//! Range comes before integrality, so `"41.5"` is reported as too large.

use fibwork_core::{Index, IndexPolicy};
use serde_json::{json, Number, Value};

use crate::error::{ApiError, ApiResult, ErrorCode};

/// Validate the `index` field of a submission.
pub fn validate_index(raw: Option<&Value>, policy: &IndexPolicy) -> ApiResult<Index> {
    let echo = echo_value(raw);
    let (prefix, integral) = match raw {
        None | Some(Value::Null) => return Err(reject(ErrorCode::MissingIndex, Value::Null)),
        Some(Value::String(s)) if s.is_empty() => {
            return Err(reject(ErrorCode::MissingIndex, json!("")))
        }
        Some(Value::String(s)) => {
            let Some(prefix) = leading_integer(s) else {
                return Err(reject(ErrorCode::MalformedIndex, echo));
            };
            (prefix, numeric_value(s) == Some(prefix as f64))
        }
        Some(Value::Number(n)) => number_parts(n),
        Some(other) => return Err(reject(ErrorCode::MalformedIndex, other.clone())),
    };

    if prefix < 0 {
        return Err(reject(ErrorCode::IndexTooSmall, echo));
    }
    if prefix > i64::from(policy.max_index()) {
        return Err(reject(ErrorCode::IndexTooLarge, echo.clone())
            .with_details(json!({ "index": echo, "max": policy.max_index() })));
    }
    if !integral {
        return Err(reject(ErrorCode::NotAnInteger, echo));
    }

    policy.check(prefix).map_err(|e| {
        tracing::error!(error = %e, "Validated index rejected by policy");
        ApiError::internal_error("Index validation failed")
    })
}

/// Leading integer and integrality of a JSON number.
///
/// Floats are truncated toward zero, saturating at the `i64` bounds, so
/// `1e16` and `41.5` are judged by range before integrality.
fn number_parts(n: &Number) -> (i64, bool) {
    if let Some(i) = n.as_i64() {
        return (i, true);
    }
    if n.as_u64().is_some() {
        return (i64::MAX, true);
    }
    let f = n.as_f64().unwrap_or_default();
    (f.trunc() as i64, f.fract() == 0.0)
}

fn echo_value(raw: Option<&Value>) -> Value {
    raw.cloned().unwrap_or(Value::Null)
}

fn reject(code: ErrorCode, value: Value) -> ApiError {
    tracing::debug!(code = %code, index = %value, "Rejected submission");
    ApiError::from_code(code).with_details(json!({ "index": value }))
}

/// The integer spelled by the start of `text`: optional leading whitespace,
/// an optional sign, then one or more ASCII digits. Anything after the
/// digits is ignored. Saturates at the `i64` bounds.
pub fn leading_integer(text: &str) -> Option<i64> {
    let rest = text.trim_start();
    let (negative, rest) = match rest.as_bytes().first() {
        Some(b'-') => (true, &rest[1..]),
        Some(b'+') => (false, &rest[1..]),
        _ => (false, rest),
    };

    let digits = rest.bytes().take_while(u8::is_ascii_digit);
    let mut value: i64 = 0;
    let mut seen = false;
    for d in digits {
        seen = true;
        let d = i64::from(d - b'0');
        value = if negative {
            value.saturating_mul(10).saturating_sub(d)
        } else {
            value.saturating_mul(10).saturating_add(d)
        };
    }
    seen.then_some(value)
}

/// Numeric value of the whole input, surrounding whitespace ignored.
/// `None` when the text is not a plain decimal number.
fn numeric_value(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    // Rust accepts spellings like "inf" and "NaN" that are not numbers here.
    if !trimmed
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.' | b'e' | b'E'))
    {
        return None;
    }
    trimmed.parse::<f64>().ok()
}
