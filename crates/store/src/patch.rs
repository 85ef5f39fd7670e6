/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
//! RFC 7386 JSON merge patch.

use serde_json::Value;

/// Applies `patch` to `target` in place. Objects merge recursively, `null`
/// deletes the key, everything else replaces wholesale (arrays included).
pub fn merge_patch(target: &mut Value, patch: &Value) {
    match patch {
        Value::Object(patch_map) => {
            if !target.is_object() {
                *target = Value::Object(serde_json::Map::new());
            }
            let target_map = target.as_object_mut().expect("target coerced to object");
            for (key, patch_value) in patch_map {
                if patch_value.is_null() {
                    target_map.remove(key);
                } else {
                    merge_patch(
                        target_map.entry(key.clone()).or_insert(Value::Null),
                        patch_value,
                    );
                }
            }
        }
        _ => {
            *target = patch.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn objects_merge_recursively() {
        let mut target = json!({"a": {"b": 1, "c": 2}, "keep": true});
        merge_patch(&mut target, &json!({"a": {"b": 7}}));
        assert_eq!(target, json!({"a": {"b": 7, "c": 2}, "keep": true}));
    }

    #[test]
    fn null_deletes_keys() {
        let mut target = json!({"a": 1, "b": 2});
        merge_patch(&mut target, &json!({"a": null}));
        assert_eq!(target, json!({"b": 2}));
    }

    #[test]
    fn arrays_replace_wholesale() {
        let mut target = json!({"list": [1, 2, 3]});
        merge_patch(&mut target, &json!({"list": [9]}));
        assert_eq!(target, json!({"list": [9]}));
    }

    #[test]
    fn scalars_replace() {
        let mut target = json!({"a": {"deep": true}});
        merge_patch(&mut target, &json!({"a": 5}));
        assert_eq!(target, json!({"a": 5}));
    }
}
