//! Numeric value parser
//!
//! Normalizes raw cell values (currency, accounting negatives, percent signs,
//! thousands separators) into a finite `f64`, or `None` when the cell does not
//! hold a usable number.

use std::sync::OnceLock;

use regex::Regex;

use super::limits::MAX_NUMERIC_MAGNITUDE;
use crate::types::{CellValue, Row};

const STRIPPED_CHARS: &[char] = &['$', '€', '£', '¥', '₹', ',', '%', ' ', '\u{a0}'];

fn decimal_literal() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[+-]?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?$").expect("static regex is valid")
    })
}

/// Parse a cell into a finite number.
///
/// Numbers pass through unless NaN or infinite. Text is trimmed, `"(12.5)"`
/// becomes `-12.5`, and currency symbols, commas, spaces and `%` are
/// stripped before parsing. Text magnitudes above 1e15 are rejected.
pub fn parse_numeric_value(value: &CellValue) -> Option<f64> {
    match value {
        CellValue::Number(n) if n.is_finite() => Some(*n),
        CellValue::Number(_) => None,
        CellValue::Text(s) => parse_numeric_str(s),
        CellValue::Bool(_) | CellValue::Null => None,
    }
}

/// Text half of [`parse_numeric_value`].
pub fn parse_numeric_str(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let (negative, body) = match trimmed
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
    {
        Some(inner) => (true, inner),
        None => (false, trimmed),
    };

    let cleaned: String = body.chars().filter(|c| !STRIPPED_CHARS.contains(c)).collect();
    if !decimal_literal().is_match(&cleaned) {
        return None;
    }

    let parsed: f64 = cleaned.parse().ok()?;
    if !parsed.is_finite() || parsed.abs() > MAX_NUMERIC_MAGNITUDE {
        return None;
    }

    Some(if negative { -parsed } else { parsed })
}

/// Parsed value of `column` in `row`; missing keys count as null.
pub fn numeric_cell(row: &Row, column: &str) -> Option<f64> {
    row.get(column).and_then(parse_numeric_value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    #[test]
    fn test_numbers_pass_through() {
        assert_eq!(parse_numeric_value(&CellValue::Number(42.5)), Some(42.5));
        assert_eq!(parse_numeric_value(&CellValue::Number(-3.0)), Some(-3.0));
    }

    #[test]
    fn test_non_finite_numbers_rejected() {
        assert_eq!(parse_numeric_value(&CellValue::Number(f64::NAN)), None);
        assert_eq!(parse_numeric_value(&CellValue::Number(f64::INFINITY)), None);
    }

    #[test]
    fn test_accounting_negative_with_separators() {
        assert_eq!(parse_numeric_value(&text("(1,234.50)")), Some(-1234.5));
    }

    #[test]
    fn test_percent_keeps_magnitude() {
        assert_eq!(parse_numeric_value(&text("45%")), Some(45.0));
    }

    #[test]
    fn test_currency_symbols() {
        assert_eq!(parse_numeric_value(&text("$1,000")), Some(1000.0));
        assert_eq!(parse_numeric_value(&text(" €12.5 ")), Some(12.5));
        assert_eq!(parse_numeric_value(&text("-£7")), Some(-7.0));
    }

    #[test]
    fn test_garbage_is_null() {
        assert_eq!(parse_numeric_value(&text("abc")), None);
        assert_eq!(parse_numeric_value(&text("")), None);
        assert_eq!(parse_numeric_value(&text("   ")), None);
        assert_eq!(parse_numeric_value(&text("12abc")), None);
        assert_eq!(parse_numeric_value(&text("1.2.3")), None);
    }

    #[test]
    fn test_float_keywords_rejected() {
        assert_eq!(parse_numeric_value(&text("inf")), None);
        assert_eq!(parse_numeric_value(&text("NaN")), None);
        assert_eq!(parse_numeric_value(&text("infinity")), None);
    }

    #[test]
    fn test_magnitude_ceiling() {
        assert_eq!(parse_numeric_value(&text("1e15")), Some(1e15));
        assert_eq!(parse_numeric_value(&text("2e15")), None);
        assert_eq!(parse_numeric_value(&text("1e400")), None);
    }

    #[test]
    fn test_bool_and_null() {
        assert_eq!(parse_numeric_value(&CellValue::Bool(true)), None);
        assert_eq!(parse_numeric_value(&CellValue::Null), None);
    }

    #[test]
    fn test_numeric_cell_missing_key() {
        let row = crate::row! { "a" => 1 };
        assert_eq!(numeric_cell(&row, "a"), Some(1.0));
        assert_eq!(numeric_cell(&row, "b"), None);
    }
}
