//! Nested-path accessor over JSON-shaped object data.
//!
//! Ported from gostore's `Walk`: a string key path is descended one
//! segment at a time. A segment that parses as an unsigned integer
//! selects an array index; otherwise it selects a map entry. `create`
//! controls whether missing intermediate containers (and out-of-range
//! array slots) are materialized along the way.
//!
//! Negative indices are not implemented (same as the source this is
//! ported from): a key segment that fails to parse as `usize` is only
//! ever treated as a map key, never as "from the end".

use serde_json::{Map, Value};

/// Walk `key` through `container`, reading or writing `data` at the end
/// of the path.
///
/// - To **read** a nested value: pass `data = &mut None`, `create =
///   false`. On return, `*data` holds the value found (or `None` if the
///   path doesn't resolve).
/// - To **write** a nested value: pass `data = &mut Some(value)`,
///   `create = true`. `*container` is mutated in place to hold the new
///   nested structure.
pub fn walk(create: bool, data: &mut Option<Value>, container: &mut Option<Value>, key: &[String]) {
    if key.is_empty() {
        if let Some(d) = data.take() {
            *container = Some(d);
        }
        *data = container.clone();
        return;
    }

    if container.is_none() {
        if !create {
            *data = None;
            return;
        }

        if let Ok(index) = key[0].parse::<usize>() {
            let mut sub = None;
            walk(create, data, &mut sub, &key[1..]);
            let mut arr = vec![Value::Null; index + 1];
            arr[index] = sub.unwrap_or(Value::Null);
            *container = Some(Value::Array(arr));
        } else {
            let mut sub = None;
            walk(create, data, &mut sub, &key[1..]);
            let mut map = Map::new();
            map.insert(key[0].clone(), sub.unwrap_or(Value::Null));
            *container = Some(Value::Object(map));
        }
        return;
    }

    match container.as_mut().unwrap() {
        Value::Array(arr) => {
            let index = match key[0].parse::<usize>() {
                Ok(i) => i,
                Err(_) => return,
            };
            if index < arr.len() {
                let mut sub = Some(arr[index].clone());
                walk(create, data, &mut sub, &key[1..]);
                arr[index] = sub.unwrap_or(Value::Null);
            } else if create {
                arr.resize(index + 1, Value::Null);
                let mut sub = None;
                walk(create, data, &mut sub, &key[1..]);
                arr[index] = sub.unwrap_or(Value::Null);
            }
            // else: out-of-range, non-creating read. `data` is left as
            // whatever the caller initialized it to (`None`), which is
            // the documented "null" result.
        }
        Value::Object(map) => {
            let mut sub = map.get(&key[0]).cloned();
            walk(create, data, &mut sub, &key[1..]);
            map.insert(key[0].clone(), sub.unwrap_or(Value::Null));
        }
        _ => {
            // Existing value is a scalar; neither an array nor a map
            // index applies to it. Mirrors the source, which falls
            // through every type switch arm and does nothing.
        }
    }
}

/// Convenience wrapper for reading a path out of an existing value
/// without mutating it.
pub fn get(container: &Value, key: &[String]) -> Option<Value> {
    let mut data = None;
    let mut container = Some(container.clone());
    walk(false, &mut data, &mut container, key);
    data
}

/// Convenience wrapper for setting a path into a value, creating
/// intermediate containers as needed.
pub fn set(container: &mut Option<Value>, key: &[String], value: Value) {
    let mut data = Some(value);
    walk(true, &mut data, container, key);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn keys(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn set_creates_nested_map_path() {
        let mut container: Option<Value> = None;
        set(&mut container, &keys(&["a", "b"]), json!("v"));
        assert_eq!(container.unwrap(), json!({"a": {"b": "v"}}));
    }

    #[test]
    fn set_creates_array_when_key_is_numeric() {
        let mut container: Option<Value> = None;
        set(&mut container, &keys(&["2"]), json!("x"));
        assert_eq!(container.unwrap(), json!([null, null, "x"]));
    }

    #[test]
    fn get_reads_back_nested_value() {
        let container = json!({"a": {"b": 42}});
        let got = get(&container, &keys(&["a", "b"]));
        assert_eq!(got, Some(json!(42)));
    }

    #[test]
    fn get_missing_intermediate_returns_null() {
        let container = json!({"a": {}});
        let got = get(&container, &keys(&["a", "b", "c"]));
        assert_eq!(got, None);
    }

    #[test]
    fn get_out_of_range_array_index_returns_null() {
        let container = json!([1, 2]);
        let got = get(&container, &keys(&["5"]));
        assert_eq!(got, None);
    }

    #[test]
    fn whole_object_round_trip_when_path_is_empty() {
        let container = json!({"x": 1});
        let got = get(&container, &[]);
        assert_eq!(got, Some(container));
    }

    #[test]
    fn set_extends_existing_array() {
        let mut container = Some(json!([1, 2]));
        set(&mut container, &keys(&["3"]), json!(9));
        assert_eq!(container.unwrap(), json!([1, 2, null, 9]));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<i64>().prop_map(Value::from),
            any::<bool>().prop_map(Value::from),
            "[a-zA-Z0-9]{0,12}".prop_map(Value::from),
        ]
    }

    // Map-key-only segments, so every level of the generated path is
    // built as an object, never an array -- keeps the round trip
    // independent of array-resizing behavior.
    fn path() -> impl Strategy<Value = Vec<String>> {
        proptest::collection::vec("[a-zA-Z]{1,8}", 1..5)
    }

    proptest! {
        // Spec testable property 1: walk(create=true) followed by
        // walk(create=false) returns what was written, for any
        // well-formed (data, path) pair.
        #[test]
        fn set_then_get_round_trips(path in path(), value in scalar()) {
            let mut container: Option<Value> = None;
            set(&mut container, &path, value.clone());
            let got = get(container.as_ref().unwrap(), &path);
            prop_assert_eq!(got, Some(value));
        }
    }
}
