// Value coercions shared by conditions, arithmetic, loops and option objects
// Numbers go through rust_decimal so comparisons and math are exact

use std::borrow::Cow;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::datetime;
use crate::value::Value;

/// Whether a string is a plain decimal literal (`12`, `-1.5`, `.5`, `2e3`).
///
/// Accepts `[-+]?(digits(.digits?)?|.digits)([eE][-+]?digits)?` and nothing else.
pub fn is_decimal_str(s: &str) -> bool {
    let bytes = s.as_bytes();
    let mut i = 0;
    if matches!(bytes.first(), Some(b'-' | b'+')) {
        i += 1;
    }
    let int_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let int_digits = i - int_start;
    let mut frac_digits = 0;
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        let frac_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        frac_digits = i - frac_start;
    }
    if int_digits == 0 && frac_digits == 0 {
        return false;
    }
    if i < bytes.len() && matches!(bytes[i], b'e' | b'E') {
        i += 1;
        if matches!(bytes.get(i), Some(b'-' | b'+')) {
            i += 1;
        }
        let exp_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == exp_start {
            return false;
        }
    }
    i == bytes.len()
}

/// Only real numbers count as numeric; numeric-looking strings do not.
#[inline]
pub fn is_numeric(value: Option<&Value>) -> bool {
    matches!(value, Some(Value::Number(_) | Value::Decimal(_)))
}

/// Parse a decimal out of a value.
///
/// An absent operand reads as zero, numbers convert exactly through their shortest
/// representation, and strings must be decimal literals. Everything else is `None`.
pub fn try_decimal(value: Option<&Value>) -> Option<Decimal> {
    match value {
        None => Some(Decimal::ZERO),
        Some(Value::Number(n)) => decimal_from_f64(*n),
        Some(Value::Decimal(d)) => Some(*d),
        Some(Value::String(s)) if is_decimal_str(s) => parse_decimal(s),
        Some(_) => None,
    }
}

/// `try_decimal` with the arithmetic fallback: anything unparsable is zero.
#[inline]
pub fn decimal_or_zero(value: Option<&Value>) -> Decimal {
    try_decimal(value).unwrap_or(Decimal::ZERO)
}

pub fn decimal_from_f64(n: f64) -> Option<Decimal> {
    if !n.is_finite() {
        return None;
    }
    Decimal::from_str(&n.to_string())
        .ok()
        .or_else(|| Decimal::from_scientific(&format!("{:e}", n)).ok())
}

fn parse_decimal(s: &str) -> Option<Decimal> {
    let s = s.strip_prefix('+').unwrap_or(s);
    if s.contains(['e', 'E']) {
        Decimal::from_scientific(s).ok()
    } else {
        Decimal::from_str(s).ok()
    }
}

/// Instants are only ever real date values; strings are not sniffed.
#[inline]
pub fn try_instant(value: Option<&Value>) -> Option<&DateTime<Utc>> {
    value.and_then(Value::as_date)
}

/// Text form of a value: strings verbatim, numbers without a trailing `.0`,
/// instants in ISO form, containers as JSON. Absence has no text.
pub fn try_string(value: Option<&Value>) -> Option<Cow<'_, str>> {
    match value? {
        Value::Null | Value::Missing => None,
        Value::String(s) => Some(Cow::Borrowed(s)),
        Value::Date(d) => Some(Cow::Owned(datetime::format_iso8601(d))),
        other => Some(Cow::Owned(other.to_string())),
    }
}

/// Integer view of a value: numbers truncate, strings must parse.
pub fn try_int(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) if n.is_finite() => Some(n.trunc() as i64),
        Value::Decimal(d) => d.trunc().to_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimal_pattern() {
        for ok in ["1", "-1.5", "+2", ".5", "5.", "1e3", "2.5E-2"] {
            assert!(is_decimal_str(ok), "{ok}");
        }
        for bad in ["", "abc", "1.2.3", "0x10", " 1"] {
            assert!(!is_decimal_str(bad), "{bad}");
        }
    }

    #[test]
    fn test_try_decimal() {
        assert_eq!(try_decimal(None), Some(Decimal::ZERO));
        assert_eq!(
            try_decimal(Some(&Value::from(0.1))),
            Some(Decimal::from_str("0.1").unwrap())
        );
        assert_eq!(
            try_decimal(Some(&Value::string("1e3"))),
            Some(Decimal::from(1000))
        );
        assert_eq!(try_decimal(Some(&Value::string("abc"))), None);
        assert_eq!(try_decimal(Some(&Value::Bool(true))), None);
        assert_eq!(decimal_or_zero(Some(&Value::string("abc"))), Decimal::ZERO);
    }

    #[test]
    fn test_try_string() {
        assert_eq!(try_string(Some(&Value::from(10i64))).as_deref(), Some("10"));
        assert_eq!(try_string(Some(&Value::from(1.5))).as_deref(), Some("1.5"));
        assert_eq!(try_string(Some(&Value::Bool(true))).as_deref(), Some("true"));
        assert_eq!(try_string(Some(&Value::Null)), None);
        assert_eq!(try_string(None), None);
        let arr = Value::array(vec![Value::from(1i64), Value::string("a")]);
        assert_eq!(try_string(Some(&arr)).as_deref(), Some(r#"[1,"a"]"#));
    }

    #[test]
    fn test_try_int() {
        assert_eq!(try_int(Some(&Value::from(7.9))), Some(7));
        assert_eq!(try_int(Some(&Value::string("42"))), Some(42));
        assert_eq!(try_int(Some(&Value::string("4.2"))), None);
        assert_eq!(try_int(None), None);
    }
}
