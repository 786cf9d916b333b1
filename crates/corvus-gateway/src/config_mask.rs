//! Secret masking for `GET`/`PUT /v1/config`.
//!
//! Any object key whose name contains `key`, `token`, or `secret`
//! (case-insensitive) and whose value is a non-empty string is treated as
//! secret. Masking replaces the value with the literal `xxxx****xxxx`;
//! merging on `PUT` restores the on-disk value wherever the submitted
//! value still contains `****` (i.e. the client echoed the masked
//! placeholder back unchanged).

const MASK: &str = "xxxx****xxxx";

fn is_secret_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    lower.contains("key") || lower.contains("token") || lower.contains("secret")
}

/// Recursively mask every secret-looking string leaf in `value`.
pub fn mask(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let masked = map
                .iter()
                .map(|(k, v)| {
                    let masked_v = if is_secret_key(k) {
                        match v {
                            serde_json::Value::String(s) if !s.is_empty() => {
                                serde_json::Value::String(MASK.to_string())
                            }
                            other => mask(other),
                        }
                    } else {
                        mask(v)
                    };
                    (k.clone(), masked_v)
                })
                .collect();
            serde_json::Value::Object(masked)
        }
        serde_json::Value::Array(items) => serde_json::Value::Array(items.iter().map(mask).collect()),
        other => other.clone(),
    }
}

/// Merge a client-submitted config tree `incoming` over the `current`
/// on-disk tree: any secret-looking leaf in `incoming` whose string value
/// contains `****` is replaced with the value at the same path in
/// `current`, preserving every other submitted field (including
/// legitimately-changed secrets).
pub fn merge_masked(current: &serde_json::Value, incoming: &serde_json::Value) -> serde_json::Value {
    match (current, incoming) {
        (serde_json::Value::Object(cur_map), serde_json::Value::Object(in_map)) => {
            let merged = in_map
                .iter()
                .map(|(k, in_v)| {
                    let cur_v = cur_map.get(k);
                    let merged_v = match (cur_v, in_v) {
                        (Some(cur_v), serde_json::Value::String(s))
                            if is_secret_key(k) && s.contains("****") =>
                        {
                            cur_v.clone()
                        }
                        (Some(cur_v), _) => merge_masked(cur_v, in_v),
                        (None, _) => in_v.clone(),
                    };
                    (k.clone(), merged_v)
                })
                .collect();
            serde_json::Value::Object(merged)
        }
        (_, incoming) => incoming.clone(),
    }
}
