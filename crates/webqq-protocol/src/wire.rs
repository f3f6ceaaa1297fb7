//! Field access helpers for the loosely typed wire JSON.
//!
//! The server is inconsistent about scalar types: uins and ids show up as
//! numbers in one event and as strings in the next. These helpers accept both.

use serde_json::Value;

/// Returns the value of `name` if `value` is an object containing it.
pub fn find_field<'a>(value: &'a Value, name: &str) -> Option<&'a Value> {
    value.as_object()?.get(name)
}

/// Returns `name` rendered as a string, for string and number fields.
pub fn simple_value(value: &Value, name: &str) -> Option<String> {
    find_field(value, name).and_then(scalar_string)
}

/// Returns `name` as an integer, parsing strings if needed.
pub fn int_value(value: &Value, name: &str) -> Option<i64> {
    find_field(value, name).and_then(scalar_int)
}

/// Renders a string or number value as a string.
pub fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Reads a string or number value as an integer.
pub fn scalar_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn simple_value_accepts_strings_and_numbers() {
        let value = json!({"a": "x", "b": 570454553u64, "c": [1], "d": null});
        assert_eq!(simple_value(&value, "a").as_deref(), Some("x"));
        assert_eq!(simple_value(&value, "b").as_deref(), Some("570454553"));
        assert_eq!(simple_value(&value, "c"), None);
        assert_eq!(simple_value(&value, "d"), None);
        assert_eq!(simple_value(&value, "missing"), None);
    }

    #[test]
    fn int_value_parses_strings() {
        let value = json!({"n": 12, "s": "13", "bad": "abc", "f": 1.5});
        assert_eq!(int_value(&value, "n"), Some(12));
        assert_eq!(int_value(&value, "s"), Some(13));
        assert_eq!(int_value(&value, "bad"), None);
        assert_eq!(int_value(&value, "f"), None);
    }

    #[test]
    fn find_field_on_non_object() {
        assert!(find_field(&json!([1, 2]), "a").is_none());
        assert!(find_field(&json!("str"), "a").is_none());
    }
}
