//! String-coercion helpers shared by validation, transformation and kind
//! inference.
//!
//! The numeric parsers deliberately accept a valid prefix and ignore
//! trailing garbage (`"42px"` parses to 42), matching how loosely typed
//! form input reaches the document builder.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles"));

/// Whether a string looks like an email address.
#[must_use]
pub fn is_email(s: &str) -> bool {
    EMAIL_RE.is_match(s)
}

/// Whether a string parses as an absolute URL.
#[must_use]
pub fn is_url(s: &str) -> bool {
    url::Url::parse(s).is_ok()
}

/// Parses a date from the formats the builder encounters in practice:
/// RFC 3339, `Y-m-d H:M:S`, `Y-m-dTH:M:S` and plain `Y-m-d` / `Y/m/d`.
#[must_use]
pub fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(naive.and_utc());
        }
    }
    for fmt in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
            return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
        }
    }
    None
}

/// Whether a string should be *inferred* as a date.
///
/// Requires more than 8 characters so short numeric strings ("12345678")
/// never infer as dates; explicit date attributes still parse them via
/// [`parse_date`].
#[must_use]
pub fn is_date_like(s: &str) -> bool {
    s.len() > 8 && parse_date(s).is_some()
}

/// Truncating integer parse: optional sign followed by decimal digits,
/// trailing input ignored (`"3.9"` parses to 3, `"42abc"` to 42).
///
/// Returns `None` when no leading digits exist.
#[must_use]
pub fn parse_integer_prefix(s: &str) -> Option<i64> {
    let t = s.trim_start();
    let (negative, rest) = match t.as_bytes().first()? {
        b'-' => (true, &t[1..]),
        b'+' => (false, &t[1..]),
        _ => (false, t),
    };
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    let magnitude: i64 = digits.parse().ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

/// Float parse over the longest valid numeric prefix (`"3.5em"` parses to
/// 3.5). Returns `None` when no numeric prefix exists.
#[must_use]
pub fn parse_float_prefix(s: &str) -> Option<f64> {
    let t = s.trim_start();
    if t.is_empty() {
        return None;
    }
    let mut best = None;
    // Prefixes of a float literal are cheap to re-parse; input here is
    // short user text, never bulk data.
    for end in (1..=t.len()).rev() {
        if !t.is_char_boundary(end) {
            continue;
        }
        if let Ok(v) = t[..end].parse::<f64>() {
            best = Some(v);
            break;
        }
    }
    best
}
