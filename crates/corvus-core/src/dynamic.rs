//! Typed discriminated value used wherever tool arguments or workflow-step
//! values cross a JSON-schema boundary and need coercion to a declared type.
//!
//! Replaces ad-hoc `Value::as_str()`/`as_i64()` probing at coercion sites
//! with a single typed conversion.

use serde_json::Value;
use std::collections::HashMap;

/// A JSON-schema-typed value, produced by coercing a raw [`serde_json::Value`]
/// against a declared property type (`"string"`, `"number"`, `"integer"`,
/// `"boolean"`, `"array"`, `"object"`).
#[derive(Clone, Debug, PartialEq)]
pub enum DynamicValue {
    Number(f64),
    Integer(i64),
    Bool(bool),
    String(String),
    Array(Vec<DynamicValue>),
    Object(HashMap<String, DynamicValue>),
}

impl DynamicValue {
    /// Coerce a raw value against a JSON-schema type name.
    ///
    /// Unknown or missing schema types pass the value through untouched
    /// (converted structurally, not coerced). String-encoded numbers/bools
    /// are parsed when the schema calls for a number/integer/boolean but the
    /// raw value arrived as a string — this is the common case for workflow
    /// step args after `{{var}}` interpolation, which always produces strings.
    pub fn coerce(raw: &Value, schema_type: Option<&str>) -> DynamicValue {
        match schema_type {
            Some("number") => match raw {
                Value::Number(n) => DynamicValue::Number(n.as_f64().unwrap_or(0.0)),
                Value::String(s) => s
                    .parse::<f64>()
                    .map(DynamicValue::Number)
                    .unwrap_or_else(|_| DynamicValue::String(s.clone())),
                other => DynamicValue::from_json(other),
            },
            Some("integer") => match raw {
                Value::Number(n) => DynamicValue::Integer(n.as_i64().unwrap_or(0)),
                Value::String(s) => s
                    .parse::<i64>()
                    .map(DynamicValue::Integer)
                    .unwrap_or_else(|_| DynamicValue::String(s.clone())),
                other => DynamicValue::from_json(other),
            },
            Some("boolean") => match raw {
                Value::Bool(b) => DynamicValue::Bool(*b),
                Value::String(s) => s
                    .parse::<bool>()
                    .map(DynamicValue::Bool)
                    .unwrap_or_else(|_| DynamicValue::String(s.clone())),
                other => DynamicValue::from_json(other),
            },
            Some("string") => match raw {
                Value::String(s) => DynamicValue::String(s.clone()),
                other => DynamicValue::String(other.to_string()),
            },
            _ => DynamicValue::from_json(raw),
        }
    }

    /// Structural conversion from JSON with no type coercion.
    pub fn from_json(raw: &Value) -> DynamicValue {
        match raw {
            Value::Null => DynamicValue::String(String::new()),
            Value::Bool(b) => DynamicValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    DynamicValue::Integer(i)
                } else {
                    DynamicValue::Number(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => DynamicValue::String(s.clone()),
            Value::Array(arr) => {
                DynamicValue::Array(arr.iter().map(DynamicValue::from_json).collect())
            }
            Value::Object(obj) => DynamicValue::Object(
                obj.iter()
                    .map(|(k, v)| (k.clone(), DynamicValue::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert back into a `serde_json::Value` for dispatch to a tool.
    pub fn into_json(self) -> Value {
        match self {
            DynamicValue::Number(n) => {
                serde_json::Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
            }
            DynamicValue::Integer(i) => Value::Number(i.into()),
            DynamicValue::Bool(b) => Value::Bool(b),
            DynamicValue::String(s) => Value::String(s),
            DynamicValue::Array(arr) => {
                Value::Array(arr.into_iter().map(DynamicValue::into_json).collect())
            }
            DynamicValue::Object(obj) => Value::Object(
                obj.into_iter()
                    .map(|(k, v)| (k, v.into_json()))
                    .collect(),
            ),
        }
    }
}

/// Look up the JSON-schema `type` declared for a property name within a tool
/// parameter schema (`{"type":"object","properties":{"x":{"type":"number"}}}`).
pub fn schema_property_type<'a>(schema: &'a Value, property: &str) -> Option<&'a str> {
    schema
        .get("properties")
        .and_then(|p| p.get(property))
        .and_then(|p| p.get("type"))
        .and_then(|t| t.as_str())
}

/// Coerce every entry of `args` against the schema's declared property types.
pub fn coerce_args(args: &HashMap<String, Value>, schema: &Value) -> HashMap<String, Value> {
    args.iter()
        .map(|(k, v)| {
            let ty = schema_property_type(schema, k);
            (k.clone(), DynamicValue::coerce(v, ty).into_json())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_coerce_string_to_number() {
        let v = DynamicValue::coerce(&json!("540"), Some("number"));
        assert_eq!(v, DynamicValue::Number(540.0));
    }

    #[test]
    fn test_coerce_string_to_integer() {
        let v = DynamicValue::coerce(&json!("42"), Some("integer"));
        assert_eq!(v, DynamicValue::Integer(42));
    }

    #[test]
    fn test_coerce_string_to_bool() {
        let v = DynamicValue::coerce(&json!("true"), Some("boolean"));
        assert_eq!(v, DynamicValue::Bool(true));
    }

    #[test]
    fn test_coerce_non_string_passes_through() {
        let v = DynamicValue::coerce(&json!("hello"), Some("string"));
        assert_eq!(v, DynamicValue::String("hello".into()));
    }

    #[test]
    fn test_coerce_unparseable_number_falls_back_to_string() {
        let v = DynamicValue::coerce(&json!("not-a-number"), Some("number"));
        assert_eq!(v, DynamicValue::String("not-a-number".into()));
    }

    #[test]
    fn test_coerce_args_full_map() {
        let schema = json!({
            "type": "object",
            "properties": {
                "x": {"type": "number"},
                "y": {"type": "number"},
                "label": {"type": "string"}
            }
        });
        let mut args = HashMap::new();
        args.insert("x".to_string(), json!("540"));
        args.insert("y".to_string(), json!("960"));
        args.insert("label".to_string(), json!("tap"));

        let coerced = coerce_args(&args, &schema);
        assert_eq!(coerced["x"], json!(540.0));
        assert_eq!(coerced["y"], json!(960.0));
        assert_eq!(coerced["label"], json!("tap"));
    }

    #[test]
    fn test_into_json_round_trip() {
        let v = DynamicValue::Integer(7);
        assert_eq!(v.into_json(), json!(7));
    }
}
