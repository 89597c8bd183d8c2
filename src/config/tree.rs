//! Merging and addressing of nested configuration trees.
//!
//! Trees are plain [`Value`]s. Objects are mappings, arrays are the
//! integer-indexed branches that merge by appending.

use serde_json::{Map, Value};

/// Deep-merges `overlay` into `base`.
///
/// Objects merge key by key, arrays are concatenated, and any other overlay
/// value replaces what was there. Keys already present keep their position;
/// new keys are appended in overlay order.
pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => merge_maps(base, overlay),
        (Value::Array(base), Value::Array(overlay)) => base.extend(overlay),
        (base, overlay) => *base = overlay,
    }
}

pub fn merge_maps(base: &mut Map<String, Value>, overlay: Map<String, Value>) {
    for (key, value) in overlay {
        match base.get_mut(&key) {
            Some(existing) => merge(existing, value),
            None => {
                base.insert(key, value);
            }
        }
    }
}

/// Folds every tree into an initially empty object.
pub fn merge_all(trees: impl IntoIterator<Item = Value>) -> Value {
    trees
        .into_iter()
        .fold(Value::Object(Map::new()), |mut merged, tree| {
            merge(&mut merged, tree);
            merged
        })
}

/// Expands separator-delimited keys into nested objects.
///
/// `{"a.b.c": 1, "a.b.d": 2}` becomes `{"a": {"b": {"c": 1, "d": 2}}}`.
/// Nested objects are normalized too, and leading or trailing separators are
/// ignored.
pub fn normalize_tree_keys(input: Map<String, Value>, separator: &str) -> Map<String, Value> {
    let mut result = Map::new();

    for (key, value) in input {
        let value = match value {
            Value::Object(nested) => Value::Object(normalize_tree_keys(nested, separator)),
            other => other,
        };

        let trimmed = if separator.is_empty() {
            key.as_str()
        } else {
            key.trim_start_matches(separator).trim_end_matches(separator)
        };
        insert_at_path(&mut result, &segments(trimmed, separator), value);
    }

    result
}

fn insert_at_path(table: &mut Map<String, Value>, path: &[&str], value: Value) {
    match path {
        [] => {}
        [leaf] => match table.get_mut(*leaf) {
            Some(existing) => merge(existing, value),
            None => {
                table.insert((*leaf).to_string(), value);
            }
        },
        [first, rest @ ..] => {
            let entry = table
                .entry(*first)
                .or_insert_with(|| Value::Object(Map::new()));

            match entry {
                Value::Object(nested) => insert_at_path(nested, rest, value),
                other => {
                    let mut nested = Map::new();
                    insert_at_path(&mut nested, rest, value);
                    *other = Value::Object(nested);
                }
            }
        }
    }
}

/// Looks up a separator path, descending into objects by key and arrays by index.
pub fn find<'a>(tree: &'a Value, key: &str, separator: &str) -> Option<&'a Value> {
    if key.is_empty() {
        return None;
    }

    segments(key, separator)
        .into_iter()
        .try_fold(tree, |node, segment| match node {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

fn segments<'a>(key: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        vec![key]
    } else {
        key.split(separator).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_merge_scalars_and_lists() {
        let mut base = json!({"a": 1, "list": [1, 2]});
        merge(&mut base, json!({"a": 2, "list": [3]}));
        assert_eq!(base, json!({"a": 2, "list": [1, 2, 3]}));
    }

    #[test]
    fn test_merge_nested_maps() {
        let mut base = json!({"db": {"host": "localhost", "port": 5432}, "debug": false});
        merge(&mut base, json!({"db": {"host": "10.0.0.1", "user": "app"}}));
        assert_eq!(
            base,
            json!({"db": {"host": "10.0.0.1", "port": 5432, "user": "app"}, "debug": false})
        );
    }

    #[test]
    fn test_merge_keeps_existing_key_positions() {
        let mut base = json!({"first": 1, "second": 2});
        merge(&mut base, json!({"third": 3, "first": 10}));
        let keys: Vec<&String> = base.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["first", "second", "third"]);
        assert_eq!(base["first"], 10);
    }

    #[test]
    fn test_merge_type_change_replaces() {
        let mut base = json!({"a": {"nested": true}});
        merge(&mut base, json!({"a": "flat"}));
        assert_eq!(base, json!({"a": "flat"}));
    }

    #[test]
    fn test_merge_all() {
        let merged = merge_all(vec![
            json!({"a": 1}),
            json!({"b": [1]}),
            json!({"a": 3, "b": [2]}),
        ]);
        assert_eq!(merged, json!({"a": 3, "b": [1, 2]}));
    }

    #[test]
    fn test_normalize_tree_keys() {
        let flat = object(json!({"a.b.c": 1, "a.b.d": 2}));
        let tree = normalize_tree_keys(flat, ".");
        assert_eq!(Value::Object(tree), json!({"a": {"b": {"c": 1, "d": 2}}}));
    }

    #[test]
    fn test_normalize_nested_and_trimmed_keys() {
        let partial = object(json!({
            ".database.": {"connection.host": "db", "connection.port": 5432},
            "database.name": "app"
        }));
        let tree = normalize_tree_keys(partial, ".");
        assert_eq!(
            Value::Object(tree),
            json!({"database": {"connection": {"host": "db", "port": 5432}, "name": "app"}})
        );
    }

    #[test]
    fn test_normalize_custom_separator() {
        let flat = object(json!({"server::port": 80, "server::host": "h"}));
        let tree = normalize_tree_keys(flat, "::");
        assert_eq!(Value::Object(tree), json!({"server": {"port": 80, "host": "h"}}));
    }

    #[test]
    fn test_normalize_replaces_scalar_with_branch() {
        let flat = object(json!({"a": 1, "a.b": 2}));
        let tree = normalize_tree_keys(flat, ".");
        assert_eq!(Value::Object(tree), json!({"a": {"b": 2}}));
    }

    #[test]
    fn test_find() {
        let tree = json!({"db": {"hosts": ["a", "b"], "port": 1}, "empty": null});
        assert_eq!(find(&tree, "db.port", "."), Some(&json!(1)));
        assert_eq!(find(&tree, "db.hosts.1", "."), Some(&json!("b")));
        assert_eq!(find(&tree, "empty", "."), Some(&Value::Null));
        assert_eq!(find(&tree, "db.missing", "."), None);
        assert_eq!(find(&tree, "db.port.deeper", "."), None);
        assert_eq!(find(&tree, "db.", "."), None);
        assert_eq!(find(&tree, "", "."), None);
    }

    fn scalar_map() -> impl Strategy<Value = Map<String, Value>> {
        prop::collection::btree_map("[a-z]{1,4}", any::<i64>(), 0..8).prop_map(|entries| {
            entries
                .into_iter()
                .map(|(key, value)| (key, Value::from(value)))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_overlay_scalars_win(base in scalar_map(), overlay in scalar_map()) {
            let mut merged = Value::Object(base.clone());
            merge(&mut merged, Value::Object(overlay.clone()));
            let merged = object(merged);

            for (key, value) in &overlay {
                prop_assert_eq!(merged.get(key), Some(value));
            }
            for (key, value) in &base {
                if !overlay.contains_key(key) {
                    prop_assert_eq!(merged.get(key), Some(value));
                }
            }
            prop_assert_eq!(merged.len(), base.len() + overlay.keys().filter(|k| !base.contains_key(*k)).count());
        }

        #[test]
        fn prop_lists_append(left in prop::collection::vec(any::<i64>(), 0..6),
                             right in prop::collection::vec(any::<i64>(), 0..6)) {
            let mut merged = json!({"list": left.clone()});
            merge(&mut merged, json!({"list": right.clone()}));
            let expected: Vec<i64> = left.into_iter().chain(right).collect();
            prop_assert_eq!(merged, json!({"list": expected}));
        }
    }
}
