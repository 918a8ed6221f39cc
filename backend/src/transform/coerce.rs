//! Value coercion from raw cube text to configured field types.
//!
//! | Type      | Accepted input                                                  |
//! |-----------|-----------------------------------------------------------------|
//! | `string`  | anything, unchanged                                             |
//! | `date`    | `2025-01-15`, `2025-01-15T00:00:00[.fff][offset]`, `20250115`   |
//! | `int`     | base-10 integer, optionally with an all-zero fraction (`12.0`)  |
//! | `decimal` | locale-invariant decimal, exponent allowed (`1.5E3`)            |
//!
//! Anything else is rejected. Callers decide how to report it.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;

use crate::models::{CellDatum, FieldType, TypedValue};

/// Coerce raw text to `field_type`, or `None` if it does not parse.
pub fn coerce(raw: &str, field_type: FieldType) -> Option<TypedValue> {
    match field_type {
        FieldType::String => Some(TypedValue::String(raw.to_string())),
        FieldType::Date => parse_date(raw).map(TypedValue::Date),
        FieldType::Int => parse_int(raw).map(TypedValue::Int),
        FieldType::Decimal => parse_decimal(raw).map(TypedValue::Decimal),
    }
}

/// Coerce a configured default (a YAML scalar) to `field_type`.
///
/// `null` stays null; numbers and strings go through [`coerce`].
pub fn coerce_default(value: &Value, field_type: FieldType) -> Option<TypedValue> {
    match value {
        Value::Null => Some(TypedValue::Null),
        Value::String(s) => coerce(s, field_type),
        Value::Number(n) => coerce(&n.to_string(), field_type),
        Value::Bool(b) if field_type == FieldType::String => {
            Some(TypedValue::String(b.to_string()))
        }
        _ => None,
    }
}

/// Type a cell for a measure that has no mapping entry.
///
/// Numeric XSD types that parse become decimals; everything else stays text.
pub fn infer(cell: Option<&CellDatum>) -> TypedValue {
    let Some(cell) = cell.filter(|c| !c.is_empty()) else {
        return TypedValue::Null;
    };
    let raw = cell.value.as_deref().unwrap_or_default();
    if cell.is_numeric() {
        if let Some(v) = parse_decimal(raw) {
            return TypedValue::Decimal(v);
        }
    }
    TypedValue::String(raw.to_string())
}

/// Parse an ISO 8601 calendar date, discarding any time component.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt.date());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    if s.len() == 8 && s.bytes().all(|b| b.is_ascii_digit()) {
        return NaiveDate::parse_from_str(s, "%Y%m%d").ok();
    }
    None
}

/// Parse a base-10 integer. A fractional part is allowed only if it is all zeros.
pub fn parse_int(raw: &str) -> Option<i64> {
    let s = raw.trim();
    let (whole, fraction) = match s.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (s, None),
    };

    if let Some(fraction) = fraction {
        if fraction.is_empty() || !fraction.bytes().all(|b| b == b'0') {
            return None;
        }
    }

    let digits = whole.strip_prefix(['-', '+']).unwrap_or(whole);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    whole.parse::<i64>().ok()
}

/// Parse a locale-invariant decimal. Non-finite values are rejected.
pub fn parse_decimal(raw: &str) -> Option<f64> {
    let s = raw.trim();
    if s.is_empty() || s.contains(',') {
        return None;
    }
    // `f64::from_str` also accepts "inf" and "NaN"
    if !s
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'-' | b'+' | b'e' | b'E'))
    {
        return None;
    }
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_string_is_identity() {
        assert_eq!(
            coerce(" 4280 ", FieldType::String),
            Some(TypedValue::String(" 4280 ".into()))
        );
    }

    #[test]
    fn test_iso_dates() {
        assert_eq!(parse_date("2025-01-15"), Some(ymd(2025, 1, 15)));
        assert_eq!(parse_date("2025-01-15T00:00:00"), Some(ymd(2025, 1, 15)));
        assert_eq!(parse_date("2025-01-15T23:59:59.997"), Some(ymd(2025, 1, 15)));
        assert_eq!(parse_date("2025-01-15T08:00:00-05:00"), Some(ymd(2025, 1, 15)));
        assert_eq!(parse_date("20250115"), Some(ymd(2025, 1, 15)));
    }

    #[test]
    fn test_non_iso_dates_fail() {
        assert_eq!(parse_date("1/15/25"), None);
        assert_eq!(parse_date("15.01.2025"), None);
        assert_eq!(parse_date("2025-02-30"), None);
        assert_eq!(parse_date("Jan 15, 2025"), None);
        assert_eq!(parse_date(""), None);
    }

    #[test]
    fn test_int() {
        assert_eq!(parse_int("42"), Some(42));
        assert_eq!(parse_int("-7"), Some(-7));
        assert_eq!(parse_int("12.0"), Some(12));
        assert_eq!(parse_int("12.5"), None);
        assert_eq!(parse_int("12."), None);
        assert_eq!(parse_int("1,200"), None);
        assert_eq!(parse_int("abc"), None);
    }

    #[test]
    fn test_decimal() {
        assert_eq!(parse_decimal("12.50"), Some(12.5));
        assert_eq!(parse_decimal("1.5E3"), Some(1500.0));
        assert_eq!(parse_decimal("-0.25"), Some(-0.25));
        assert_eq!(parse_decimal("1,500.00"), None);
        assert_eq!(parse_decimal("NaN"), None);
        assert_eq!(parse_decimal("inf"), None);
        assert_eq!(parse_decimal("n/a"), None);
    }

    #[test]
    fn test_decimal_keeps_two_places() {
        let value = coerce("12.50", FieldType::Decimal).unwrap();
        let json = value.to_json();
        let back = json.as_f64().unwrap();
        assert!((back - 12.50).abs() < 0.005);
        assert_eq!(format!("{:.2}", back), "12.50");
    }

    #[test]
    fn test_defaults() {
        assert_eq!(coerce_default(&json!(0), FieldType::Decimal), Some(TypedValue::Decimal(0.0)));
        assert_eq!(coerce_default(&json!(0), FieldType::Int), Some(TypedValue::Int(0)));
        assert_eq!(coerce_default(&json!(null), FieldType::Int), Some(TypedValue::Null));
        assert_eq!(coerce_default(&json!("x"), FieldType::Int), None);
        assert_eq!(coerce_default(&json!([1]), FieldType::String), None);
    }

    #[test]
    fn test_infer() {
        let numeric = CellDatum::new(0, Some("3.25")).with_data_type("double");
        assert_eq!(infer(Some(&numeric)), TypedValue::Decimal(3.25));

        let text = CellDatum::new(0, Some("3.25")).with_data_type("string");
        assert_eq!(infer(Some(&text)), TypedValue::String("3.25".into()));

        assert_eq!(infer(None), TypedValue::Null);
        assert_eq!(infer(Some(&CellDatum::new(0, Some("")))), TypedValue::Null);
    }
}
