//! JSON layer merging.
//!
//! Objects merge key by key; arrays and scalars from the update replace the
//! target. `null` in an update is an explicit value, not a hole.

use serde_json::Value;

/// Merges `update` into `target`, with `update` taking precedence.
pub fn merge_values(target: &mut Value, update: &Value) {
    match (target, update) {
        (Value::Object(target_map), Value::Object(update_map)) => {
            for (key, value) in update_map {
                merge_values(target_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
        (target_slot, Value::Object(update_map)) => {
            let mut new_obj = serde_json::Map::with_capacity(update_map.len());
            for (key, value) in update_map {
                new_obj.insert(key.clone(), value.clone());
            }
            *target_slot = Value::Object(new_obj);
        }
        (target_slot, _) => {
            *target_slot = update.clone();
        }
    }
}

/// Fills keys missing from `target` with values from `defaults`.
///
/// Existing values always win; nested objects are filled recursively.
pub fn fill_defaults(target: &mut Value, defaults: &Value) {
    match (target, defaults) {
        (Value::Object(target_map), Value::Object(default_map)) => {
            for (key, value) in default_map {
                match target_map.get_mut(key) {
                    Some(existing) if !existing.is_null() => fill_defaults(existing, value),
                    _ => {
                        target_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target_slot @ Value::Null, _) => *target_slot = defaults.clone(),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn objects_merge_recursively() {
        let mut base = json!({"output": {"dir": "a", "serverDir": "b"}, "node": true});
        merge_values(&mut base, &json!({"output": {"dir": "c"}}));
        assert_eq!(base, json!({"output": {"dir": "c", "serverDir": "b"}, "node": true}));
    }

    #[test]
    fn arrays_are_replaced() {
        let mut base = json!({"scanDirs": ["a", "b"]});
        merge_values(&mut base, &json!({"scanDirs": ["c"]}));
        assert_eq!(base["scanDirs"], json!(["c"]));
    }

    #[test]
    fn fill_defaults_keeps_existing() {
        let mut target = json!({"app": {"baseURL": "/x/"}});
        fill_defaults(
            &mut target,
            &json!({"app": {"baseURL": "/", "cdn": false}, "stratus": {"routes": {}}}),
        );
        assert_eq!(
            target,
            json!({"app": {"baseURL": "/x/", "cdn": false}, "stratus": {"routes": {}}})
        );
    }
}
