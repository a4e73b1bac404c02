use docspace_types::{infer_kind, parse, AttributeValue, ValueKind};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::json;

// ── Kind inference ───────────────────────────────────────────────

#[test]
fn inference_table_from_the_builder() {
    let cases: Vec<(serde_json::Value, ValueKind)> = vec![
        (json!("a@b.com"), ValueKind::Email),
        (json!("https://x.com"), ValueKind::Url),
        (json!("2024-01-01"), ValueKind::Date),
        (json!("hello"), ValueKind::Text),
        (json!(true), ValueKind::Boolean),
        (json!(3), ValueKind::Integer),
        (json!(3.5), ValueKind::Number),
        (json!([1, 2]), ValueKind::Array),
        (json!({"k": "v"}), ValueKind::Object),
        (serde_json::Value::Null, ValueKind::Text),
    ];
    for (value, expected) in cases {
        assert_eq!(infer_kind(&value), expected, "for {value}");
    }
}

#[test]
fn email_wins_over_date_and_text() {
    // contains digits and dashes but the @ pattern takes precedence
    assert_eq!(infer_kind(&json!("2024@x.com")), ValueKind::Email);
}

#[test]
fn short_numeric_strings_stay_text() {
    assert_eq!(infer_kind(&json!("20240101")), ValueKind::Text);
}

// ── Kind serde ───────────────────────────────────────────────────

#[test]
fn kinds_serialize_as_plain_names() {
    let s = serde_json::to_string(&ValueKind::Email).unwrap();
    assert_eq!(s, "\"email\"");
    let k: ValueKind = serde_json::from_str("\"badge\"").unwrap();
    assert_eq!(k, ValueKind::Custom("badge".to_string()));
}

// ── Value mapping ────────────────────────────────────────────────

#[test]
fn from_json_respects_the_declared_kind() {
    let v = AttributeValue::from_json(&ValueKind::Email, json!("team@docspace.io"));
    assert_eq!(v, AttributeValue::Email("team@docspace.io".to_string()));

    let v = AttributeValue::from_json(&ValueKind::Integer, json!(7));
    assert_eq!(v, AttributeValue::Integer(7));

    // mismatched payloads fall back to the loose mapping
    let v = AttributeValue::from_json(&ValueKind::Integer, json!("seven"));
    assert_eq!(v, AttributeValue::Text("seven".to_string()));
}

#[test]
fn json_projection_round_trips_scalars() {
    for (kind, raw) in [
        (ValueKind::Text, json!("hi")),
        (ValueKind::Integer, json!(42)),
        (ValueKind::Number, json!(1.25)),
        (ValueKind::Boolean, json!(true)),
        (ValueKind::Array, json!([1, "two"])),
        (ValueKind::Object, json!({"a": 1})),
    ] {
        let value = AttributeValue::from_json(&kind, raw.clone());
        assert_eq!(value.to_json(), raw, "for kind {kind}");
    }
}

// ── Parse helpers ────────────────────────────────────────────────

#[test]
fn integer_prefix_matches_form_input() {
    assert_eq!(parse::parse_integer_prefix("  42 "), Some(42));
    assert_eq!(parse::parse_integer_prefix("3.9"), Some(3));
    assert_eq!(parse::parse_integer_prefix("+5"), Some(5));
    assert_eq!(parse::parse_integer_prefix("-"), None);
}

#[test]
fn float_prefix_matches_form_input() {
    assert_eq!(parse::parse_float_prefix("1e3"), Some(1000.0));
    assert_eq!(parse::parse_float_prefix("2.5rem"), Some(2.5));
    assert_eq!(parse::parse_float_prefix("rem"), None);
}

// ── Properties ───────────────────────────────────────────────────

proptest! {
    #[test]
    fn loose_mapping_round_trips_any_integer(n in any::<i64>()) {
        let v = AttributeValue::from_json_loose(json!(n));
        prop_assert_eq!(v.to_json(), json!(n));
    }

    #[test]
    fn integer_prefix_agrees_with_plain_parse(n in any::<i32>()) {
        let s = n.to_string();
        prop_assert_eq!(parse::parse_integer_prefix(&s), Some(i64::from(n)));
    }
}
