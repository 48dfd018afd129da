use indexmap::IndexMap;
use serde_json::Value;

/// Field holding the logical identifier of a resume.
pub const ID_FIELD: &str = "resume_id";

/// One extracted resume: field name → value, in extraction order.
pub type Record = IndexMap<String, Value>;

/// Flatten a record so every value fits in a single table cell.
///
/// Arrays and objects become their compact JSON text; scalars (including
/// strings that already hold JSON) pass through untouched, so applying this
/// twice gives the same result as applying it once.
pub fn normalize(record: &Record) -> Record {
    record
        .iter()
        .map(|(key, value)| (key.clone(), normalize_value(value)))
        .collect()
}

fn normalize_value(value: &Value) -> Value {
    match value {
        Value::Array(_) | Value::Object(_) => {
            // Serializing a Value cannot fail: keys are always strings.
            Value::String(serde_json::to_string(value).unwrap_or_default())
        }
        other => other.clone(),
    }
}

/// Render a normalized value as CSV cell text. Null is the empty cell.
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        composite => serde_json::to_string(composite).unwrap_or_default(),
    }
}

/// Trimmed identifier of a record, or `None` when absent, null or blank.
pub fn identifier(record: &Record) -> Option<String> {
    let id = match record.get(ID_FIELD)? {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        other => cell_text(other).trim().to_string(),
    };
    (!id.is_empty()).then_some(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn composites_become_json_text() {
        let r = record(json!({
            "resume_id": "abc",
            "languages": [{"name": "Русский", "level": "Родной"}],
            "details": {"b": 2, "a": 1},
            "age": 31,
        }));
        let n = normalize(&r);
        assert_eq!(n["resume_id"], json!("abc"));
        assert_eq!(n["languages"], json!(r#"[{"level":"Родной","name":"Русский"}]"#));
        assert_eq!(n["details"], json!(r#"{"a":1,"b":2}"#));
        assert_eq!(n["age"], json!(31));
    }

    #[test]
    fn normalize_is_idempotent() {
        let r = record(json!({"skills": ["Rust", "SQL"], "raw": "[\"x\"]"}));
        let once = normalize(&r);
        assert_eq!(normalize(&once), once);
        assert_eq!(once["raw"], json!("[\"x\"]"));
    }

    #[test]
    fn normalize_keeps_field_order() {
        let mut r = Record::new();
        r.insert("z".into(), json!(1));
        r.insert("a".into(), json!([1]));
        r.insert("m".into(), json!("x"));
        let n = normalize(&r);
        let keys: Vec<&str> = n.keys().map(String::as_str).collect();
        assert_eq!(keys, ["z", "a", "m"]);
    }

    #[test]
    fn cell_text_renders_scalars() {
        assert_eq!(cell_text(&Value::Null), "");
        assert_eq!(cell_text(&json!(true)), "true");
        assert_eq!(cell_text(&json!(4)), "4");
        assert_eq!(cell_text(&json!("hi")), "hi");
    }

    #[test]
    fn identifier_variants() {
        assert_eq!(identifier(&record(json!({"resume_id": " abc "}))).as_deref(), Some("abc"));
        assert_eq!(identifier(&record(json!({"resume_id": 42}))).as_deref(), Some("42"));
        assert_eq!(identifier(&record(json!({"resume_id": "  "}))), None);
        assert_eq!(identifier(&record(json!({"resume_id": null}))), None);
        assert_eq!(identifier(&record(json!({"url": "x"}))), None);
    }
}
