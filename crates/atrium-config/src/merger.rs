//! Configuration file merging
//!
//! Layers are parsed documents, merged before deserialization so that a
//! later file only needs the keys it overrides:
//! - base.yaml (defaults)
//! - environment.yaml (env-specific)
//! - local.toml (developer overrides)

use serde_json::{Map, Value};

/// Merge layers in order, later layers winning
///
/// Objects merge key by key; every other value (arrays included) is
/// replaced wholesale.
pub fn merge_layers(layers: impl IntoIterator<Item = Value>) -> Value {
    layers
        .into_iter()
        .fold(Value::Object(Map::new()), merge_values)
}

/// Merge `overlay` into `base`
pub fn merge_values(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                let merged = match base.remove(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            Value::Object(base)
        }
        // null layers (empty files) leave the base alone
        (base, Value::Null) => base,
        (_, overlay) => overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_objects_merge() {
        let base = json!({ "server": { "listen": "127.0.0.1:8080", "shutdown_timeout_secs": 30 } });
        let overlay = json!({ "server": { "listen": "0.0.0.0:80" } });

        assert_eq!(
            merge_values(base, overlay),
            json!({ "server": { "listen": "0.0.0.0:80", "shutdown_timeout_secs": 30 } })
        );
    }

    #[test]
    fn test_scalars_and_arrays_replaced() {
        let merged = merge_layers(vec![
            json!({ "a": [1, 2], "b": 1 }),
            json!({ "a": [3] }),
            json!({ "b": 2 }),
        ]);
        assert_eq!(merged, json!({ "a": [3], "b": 2 }));
    }

    #[test]
    fn test_null_layer_ignored() {
        let merged = merge_layers(vec![json!({ "a": 1 }), Value::Null]);
        assert_eq!(merged, json!({ "a": 1 }));
    }
}
