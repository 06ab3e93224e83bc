//! Structural merge on a generic tree value.
//!
//! Documents of every structured format are parsed into `serde_json::Value`
//! and merged here. Each leaf a package contributes is named by a key:
//!
//! - `/a/b` for a scalar (JSON-pointer style, `~` `/` `[` escaped as
//!   `~0` `~1` `~2`)
//! - `/a/list[]"x"` for one member of an array, the member written as JSON
//!
//! Ownership is tracked with these keys so one package's contribution can
//! later be stripped from a shared document without touching anyone else's.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

/// A set of leaf keys.
pub type KeySet = BTreeSet<String>;

const MEMBER_MARK: &str = "[]";

fn escape(token: &str) -> String {
    token
        .replace('~', "~0")
        .replace('/', "~1")
        .replace('[', "~2")
}

fn unescape(token: &str) -> String {
    token
        .replace("~2", "[")
        .replace("~1", "/")
        .replace("~0", "~")
}

fn child_pointer(pointer: &str, key: &str) -> String {
    format!("{}/{}", pointer, escape(key))
}

/// Split a key into its pointer tokens and optional array member.
fn parse_key(key: &str) -> (Vec<String>, Option<Value>) {
    let (pointer, member) = match key.split_once(MEMBER_MARK) {
        Some((pointer, json)) => (pointer, serde_json::from_str(json).ok()),
        None => (key, None),
    };
    let tokens = pointer
        .split('/')
        .skip(1)
        .map(unescape)
        .collect();
    (tokens, member)
}

/// Every leaf key of a document.
pub fn leaf_keys(value: &Value) -> KeySet {
    let mut keys = KeySet::new();
    collect_keys(value, "", &mut keys);
    keys
}

fn collect_keys(value: &Value, pointer: &str, out: &mut KeySet) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                collect_keys(child, &child_pointer(pointer, key), out);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for item in items {
                out.insert(format!("{}{}{}", pointer, MEMBER_MARK, item));
            }
        }
        _ if pointer.is_empty() => {}
        _ => {
            out.insert(pointer.to_string());
        }
    }
}

/// Whether `key` is present in `doc`.
pub fn contains_key(doc: &Value, key: &str) -> bool {
    let (tokens, member) = parse_key(key);
    let mut current = doc;
    for token in &tokens {
        match current.get(token.as_str()) {
            Some(next) => current = next,
            None => return false,
        }
    }
    match member {
        Some(member) => current
            .as_array()
            .is_some_and(|items| items.contains(&member)),
        None => true,
    }
}

/// Remove keys from a document.
///
/// Objects and arrays emptied by the removal are pruned; containers that
/// were already empty are left alone. The root is never removed.
pub fn remove_keys(doc: &mut Value, keys: &KeySet) {
    for key in keys {
        let (tokens, member) = parse_key(key);
        remove_at(doc, &tokens, member.as_ref());
    }
}

/// Returns true when `value` was emptied by this removal.
fn remove_at(value: &mut Value, tokens: &[String], member: Option<&Value>) -> bool {
    let Some((first, rest)) = tokens.split_first() else {
        return match (value, member) {
            (Value::Array(items), Some(member)) => {
                let before = items.len();
                items.retain(|item| item != member);
                before != items.len() && items.is_empty()
            }
            _ => false,
        };
    };

    let Value::Object(map) = value else {
        return false;
    };

    if rest.is_empty() && member.is_none() {
        return map.remove(first).is_some() && map.is_empty();
    }

    let emptied = match map.get_mut(first) {
        Some(child) => remove_at(child, rest, member),
        None => false,
    };
    if emptied {
        map.remove(first);
        return map.is_empty();
    }
    false
}

/// Deep-merge `source` into `target`.
///
/// Objects merge recursively, arrays are unioned (members already present
/// are not repeated), and anything else is overridden by `source` unless its
/// pointer is listed in `protected`.
pub fn merge(target: &mut Value, source: &Value, protected: &KeySet) {
    merge_at(target, source, "", protected);
}

fn merge_at(target: &mut Value, source: &Value, pointer: &str, protected: &KeySet) {
    match (target, source) {
        (Value::Object(t), Value::Object(s)) => {
            for (key, value) in s {
                let child = child_pointer(pointer, key);
                match t.get_mut(key) {
                    Some(existing) => merge_at(existing, value, &child, protected),
                    None => {
                        t.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (Value::Array(t), Value::Array(s)) => {
            for item in s {
                if !t.contains(item) {
                    t.push(item.clone());
                }
            }
        }
        (target, source) => {
            if target == source {
                return;
            }
            if is_protected(pointer, protected) {
                tracing::debug!("keeping higher-priority value at `{}`", pointer);
                return;
            }
            tracing::debug!("overriding value at `{}`", pointer);
            *target = source.clone();
        }
    }
}

fn is_protected(pointer: &str, protected: &KeySet) -> bool {
    protected.iter().any(|key| {
        key == pointer
            || key
                .strip_prefix(pointer)
                .is_some_and(|rest| rest.starts_with('/') || rest.starts_with(MEMBER_MARK))
    })
}

/// An empty document.
pub fn empty() -> Value {
    Value::Object(Map::new())
}

/// Whether a document has nothing left in it.
pub fn is_empty(doc: &Value) -> bool {
    match doc {
        Value::Object(map) => map.is_empty(),
        Value::Null => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_leaf_keys() {
        let doc = json!({
            "mcpServers": { "fs": { "command": "npx", "args": ["-y", "fs"] } },
            "a/b": 1
        });
        let keys: Vec<_> = leaf_keys(&doc).into_iter().collect();
        assert_eq!(
            keys,
            vec![
                "/a~1b",
                "/mcpServers/fs/args[]\"-y\"",
                "/mcpServers/fs/args[]\"fs\"",
                "/mcpServers/fs/command",
            ]
        );
    }

    #[test]
    fn test_merge_disjoint_is_order_independent() {
        let x = json!({ "servers": { "x": { "cmd": "x" } }, "list": ["x"] });
        let y = json!({ "servers": { "y": { "cmd": "y" } }, "list": ["y"] });

        let mut xy = empty();
        merge(&mut xy, &x, &KeySet::new());
        merge(&mut xy, &y, &KeySet::new());

        let mut yx = empty();
        merge(&mut yx, &y, &KeySet::new());
        merge(&mut yx, &x, &KeySet::new());

        assert_eq!(xy["servers"], yx["servers"]);
        assert_eq!(xy["servers"], json!({ "x": { "cmd": "x" }, "y": { "cmd": "y" } }));
    }

    #[test]
    fn test_merge_later_overrides_unless_protected() {
        let mut doc = json!({ "setting1": "from-a", "keep": true });
        merge(&mut doc, &json!({ "setting1": "from-b" }), &KeySet::new());
        assert_eq!(doc["setting1"], "from-b");

        let protected: KeySet = ["/setting1".to_string()].into();
        merge(&mut doc, &json!({ "setting1": "from-c" }), &protected);
        assert_eq!(doc["setting1"], "from-b");
    }

    #[test]
    fn test_array_union_no_duplicates() {
        let mut doc = json!({ "list": ["a", "b"] });
        merge(&mut doc, &json!({ "list": ["b", "c"] }), &KeySet::new());
        assert_eq!(doc["list"], json!(["a", "b", "c"]));
    }

    #[test]
    fn test_remove_keys_prunes_emptied_containers() {
        let mut doc = json!({
            "mcpServers": { "fs": { "command": "npx" }, "git": { "command": "git" } },
            "list": ["a", "b"],
            "userEmpty": {}
        });
        let keys: KeySet = [
            "/mcpServers/fs/command".to_string(),
            "/list[]\"a\"".to_string(),
            "/list[]\"b\"".to_string(),
        ]
        .into();

        remove_keys(&mut doc, &keys);
        assert_eq!(
            doc,
            json!({ "mcpServers": { "git": { "command": "git" } }, "userEmpty": {} })
        );
    }

    #[test]
    fn test_contains_key() {
        let doc = json!({ "a": { "list": [1, 2] }, "s": "x" });
        assert!(contains_key(&doc, "/a/list[]1"));
        assert!(!contains_key(&doc, "/a/list[]3"));
        assert!(contains_key(&doc, "/s"));
        assert!(!contains_key(&doc, "/t"));
    }

    #[test]
    fn test_strip_then_merge_is_idempotent() {
        let user = json!({ "theme": "dark", "list": ["u"] });
        let contribution = json!({ "font": "mono", "list": ["p"] });

        let mut first = user.clone();
        merge(&mut first, &contribution, &KeySet::new());

        let mut second = first.clone();
        remove_keys(&mut second, &leaf_keys(&contribution));
        merge(&mut second, &contribution, &KeySet::new());

        assert_eq!(first, second);
    }
}
