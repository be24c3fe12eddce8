//! JSON merge helpers shared by trait patching and compare-and-patch apply

use serde_json::Value;

/// Deep-merge `patch` into `target`.
///
/// Objects merge key by key, `null` in the patch removes the key, anything else
/// replaces the target value.
pub fn merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target_map), Value::Object(patch_map)) => {
            for (key, patch_value) in patch_map {
                if patch_value.is_null() {
                    target_map.remove(key);
                    continue;
                }
                match target_map.get_mut(key) {
                    Some(existing) => merge(existing, patch_value),
                    None => {
                        let mut fresh = Value::Null;
                        merge(&mut fresh, patch_value);
                        target_map.insert(key.clone(), fresh);
                    }
                }
            }
        }
        (target, Value::Object(patch_map)) => {
            let mut fresh = Value::Object(serde_json::Map::new());
            merge(&mut fresh, &Value::Object(patch_map.clone()));
            *target = fresh;
        }
        (target, patch) => *target = patch.clone(),
    }
}

/// Remove fields that were present in `previous` but are gone from `desired`.
/// This is the "deletion" half of a three-way merge: only fields we applied
/// before are ever removed, fields owned by other writers are left alone.
pub fn remove_dropped(live: &mut Value, previous: &Value, desired: &Value) {
    let (Value::Object(live_map), Value::Object(prev_map)) = (live, previous) else {
        return;
    };
    let empty = serde_json::Map::new();
    let desired_map = desired.as_object().unwrap_or(&empty);

    for (key, prev_value) in prev_map {
        match desired_map.get(key) {
            None => {
                live_map.remove(key);
            }
            Some(desired_value) => {
                if let Some(live_value) = live_map.get_mut(key) {
                    remove_dropped(live_value, prev_value, desired_value);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_nested() {
        let mut target = json!({"replicas": 1, "template": {"image": "nginx", "port": 80}});
        merge(&mut target, &json!({"replicas": 3, "template": {"port": 8080}}));
        assert_eq!(
            target,
            json!({"replicas": 3, "template": {"image": "nginx", "port": 8080}})
        );
    }

    #[test]
    fn test_merge_null_removes() {
        let mut target = json!({"a": 1, "b": 2});
        merge(&mut target, &json!({"b": null}));
        assert_eq!(target, json!({"a": 1}));
    }

    #[test]
    fn test_merge_into_non_object() {
        let mut target = Value::Null;
        merge(&mut target, &json!({"a": {"b": null, "c": 1}}));
        assert_eq!(target, json!({"a": {"c": 1}}));
    }

    #[test]
    fn test_remove_dropped_only_touches_previously_applied_fields() {
        let mut live = json!({"replicas": 2, "image": "nginx", "foreign": "keep"});
        let previous = json!({"replicas": 2, "image": "nginx"});
        let desired = json!({"image": "nginx"});
        remove_dropped(&mut live, &previous, &desired);
        assert_eq!(live, json!({"image": "nginx", "foreign": "keep"}));
    }
}
