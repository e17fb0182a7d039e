//! Canonical value representation shared by the interpolator, step results, and
//! the audit/checkpoint payloads. `serde_json::Value` already is the closed
//! tagged union the redesign notes ask for (string/number/bool/null/array/object),
//! so step handlers produce one of these directly instead of an opaque byte string.

pub type Value = serde_json::Value;

/// Stringify a value the way the interpolator substitutes it into a template:
/// scalars render as their natural text form, lists/maps render as compact JSON.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => {
            serde_json::to_string(value).unwrap_or_default()
        }
    }
}

/// Truthiness used when a bare interpolated expression stands in for a condition.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Parse a raw token from a condition's RHS/LHS following the documented
/// precedence: quoted string, boolean, null, integer, float, JSON list/map,
/// else an unquoted string.
pub fn parse_literal(token: &str) -> Value {
    let trimmed = token.trim();
    if (trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2)
        || (trimmed.starts_with('\'') && trimmed.ends_with('\'') && trimmed.len() >= 2)
    {
        return Value::String(trimmed[1..trimmed.len() - 1].to_string());
    }
    match trimmed {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" => return Value::Null,
        _ => {}
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Value::Number(i.into());
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        if let Some(num) = serde_json::Number::from_f64(f) {
            return Value::Number(num);
        }
    }
    if (trimmed.starts_with('[') && trimmed.ends_with(']'))
        || (trimmed.starts_with('{') && trimmed.ends_with('}'))
    {
        if let Ok(parsed) = serde_json::from_str::<Value>(trimmed) {
            return parsed;
        }
    }
    Value::String(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stringify_scalars() {
        assert_eq!(stringify(&Value::String("hi".into())), "hi");
        assert_eq!(stringify(&Value::Bool(true)), "true");
        assert_eq!(stringify(&Value::Null), "");
    }

    #[test]
    fn stringify_collections_as_compact_json() {
        let list = serde_json::json!([1, 2, 3]);
        assert_eq!(stringify(&list), "[1,2,3]");
    }

    #[test]
    fn parse_literal_precedence() {
        assert_eq!(parse_literal("\"abc\""), Value::String("abc".into()));
        assert_eq!(parse_literal("true"), Value::Bool(true));
        assert_eq!(parse_literal("null"), Value::Null);
        assert_eq!(parse_literal("42"), serde_json::json!(42));
        assert_eq!(parse_literal("3.5"), serde_json::json!(3.5));
        assert_eq!(parse_literal("bare"), Value::String("bare".into()));
    }

    #[test]
    fn truthiness_matches_emptiness() {
        assert!(!is_truthy(&Value::Null));
        assert!(!is_truthy(&Value::String(String::new())));
        assert!(is_truthy(&Value::String("x".into())));
        assert!(!is_truthy(&serde_json::json!([])));
    }
}
