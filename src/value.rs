// 💰 Value Normalizer - locale-ambiguous monetary strings -> f64
//
// "1.234,56", "1,234.56", "1234,56" and "R$ -1.234,56" all come out of the
// same exports depending on year and tool; the rightmost separator decides.

use crate::error::ValueParseFallback;

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedValue {
    pub value: f64,
    /// Set when the cell had content but could not be parsed
    pub fallback: Option<ValueParseFallback>,
}

impl NormalizedValue {
    fn parsed(value: f64) -> Self {
        NormalizedValue {
            value,
            fallback: None,
        }
    }
}

/// Parse a raw cell into a signed number. Never fails: unparseable content
/// yields 0.0 plus a fallback event the caller records.
pub fn normalize_value(raw: &str, line: usize, column: &str) -> NormalizedValue {
    if raw.trim().is_empty() {
        return NormalizedValue::parsed(0.0);
    }

    match parse_amount(raw) {
        Some(value) => NormalizedValue::parsed(value),
        None => NormalizedValue {
            value: 0.0,
            fallback: Some(ValueParseFallback {
                line,
                column: column.to_string(),
                raw: raw.to_string(),
            }),
        },
    }
}

/// Rightmost-separator-is-decimal parsing; None if nothing numeric remains
pub fn parse_amount(raw: &str) -> Option<f64> {
    let mut cleaned = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '0'..='9' | ',' | '.' => cleaned.push(ch),
            '-' if cleaned.is_empty() => cleaned.push(ch),
            _ => {}
        }
    }

    let (negative, body) = match cleaned.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, cleaned.as_str()),
    };

    let canonical = match (body.rfind(','), body.rfind('.')) {
        (Some(comma), Some(dot)) => {
            let (decimal, group) = if comma > dot { (',', '.') } else { ('.', ',') };
            body.replace(group, "").replace(decimal, ".")
        }
        (Some(_), None) => single_separator(body, ','),
        (None, Some(_)) => single_separator(body, '.'),
        (None, None) => body.to_string(),
    };

    let value: f64 = canonical.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(if negative { -value } else { value })
}

/// Only one separator kind present: once means decimal, repeated means grouping
fn single_separator(body: &str, sep: char) -> String {
    if body.matches(sep).count() > 1 {
        body.replace(sep, "")
    } else {
        body.replace(sep, ".")
    }
}

/// Human-facing Brazilian format: "R$ 1.234.567,89"
pub fn format_brl(value: f64) -> String {
    let cents = (value.abs() * 100.0).round() as u64;
    let integer = cents / 100;
    let fraction = cents % 100;
    let sign = if value < 0.0 && cents > 0 { "-" } else { "" };

    let digits = integer.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }

    format!("R$ {}{},{:02}", sign, grouped, fraction)
}
