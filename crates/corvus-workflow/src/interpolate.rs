//! `{{variable}}` substitution over strings and JSON argument values.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([a-zA-Z0-9_]+)\s*\}\}").unwrap())
}

/// Replace every `{{key}}` in `input` with `vars[key]`. Unknown keys are left
/// as the literal `{{key}}` text rather than treated as an error.
pub fn interpolate(input: &str, vars: &HashMap<String, String>) -> String {
    placeholder_re()
        .replace_all(input, |caps: &regex::Captures| {
            let key = &caps[1];
            match vars.get(key) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Interpolate every string-valued leaf of a JSON argument object in place;
/// non-string values pass through untouched.
pub fn interpolate_args(
    args: &HashMap<String, Value>,
    vars: &HashMap<String, String>,
) -> HashMap<String, Value> {
    args.iter()
        .map(|(k, v)| (k.clone(), interpolate_value(v, vars)))
        .collect()
}

fn interpolate_value(value: &Value, vars: &HashMap<String, String>) -> Value {
    match value {
        Value::String(s) => Value::String(interpolate(s, vars)),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| interpolate_value(v, vars)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), interpolate_value(v, vars)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Does `value` contain at least one `{{...}}` placeholder (used by
/// validation to allow a required arg to be satisfied by a late-bound
/// variable instead of a literal)?
pub fn has_placeholder(value: &Value) -> bool {
    match value {
        Value::String(s) => placeholder_re().is_match(s),
        Value::Array(items) => items.iter().any(has_placeholder),
        Value::Object(map) => map.values().any(has_placeholder),
        _ => false,
    }
}
