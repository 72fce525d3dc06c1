//! Structural JSON diff for the admin review surface.
//!
//! Pure, not used for drift detection (hashes are authoritative there per
//! spec §4.D) — only to render a human-readable explanation of what changed
//! between two snapshots.

use serde_json::Value;

/// The kind of change at a given path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Removed,
    Changed,
}

/// One structural difference between two JSON values.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Change {
    pub path: String,
    pub kind: ChangeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new: Option<Value>,
}

/// Compute the structural diff between `old` and `new`.
pub fn diff(old: &Value, new: &Value) -> Vec<Change> {
    let mut changes = Vec::new();
    walk("$", old, new, &mut changes);
    changes
}

fn walk(path: &str, old: &Value, new: &Value, out: &mut Vec<Change>) {
    if old == new {
        return;
    }
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            let mut keys: Vec<&String> = old_map.keys().chain(new_map.keys()).collect();
            keys.sort_unstable();
            keys.dedup();
            for key in keys {
                let child_path = format!("{path}.{key}");
                match (old_map.get(key), new_map.get(key)) {
                    (Some(o), Some(n)) => walk(&child_path, o, n, out),
                    (Some(o), None) => out.push(Change {
                        path: child_path,
                        kind: ChangeKind::Removed,
                        old: Some(o.clone()),
                        new: None,
                    }),
                    (None, Some(n)) => out.push(Change {
                        path: child_path,
                        kind: ChangeKind::Added,
                        old: None,
                        new: Some(n.clone()),
                    }),
                    (None, None) => unreachable!("key came from one of the two maps"),
                }
            }
        }
        (Value::Array(old_items), Value::Array(new_items)) => {
            let max_len = old_items.len().max(new_items.len());
            for i in 0..max_len {
                let child_path = format!("{path}[{i}]");
                match (old_items.get(i), new_items.get(i)) {
                    (Some(o), Some(n)) => walk(&child_path, o, n, out),
                    (Some(o), None) => out.push(Change {
                        path: child_path,
                        kind: ChangeKind::Removed,
                        old: Some(o.clone()),
                        new: None,
                    }),
                    (None, Some(n)) => out.push(Change {
                        path: child_path,
                        kind: ChangeKind::Added,
                        old: None,
                        new: Some(n.clone()),
                    }),
                    (None, None) => unreachable!("index within max_len"),
                }
            }
        }
        _ => out.push(Change {
            path: path.to_string(),
            kind: ChangeKind::Changed,
            old: Some(old.clone()),
            new: Some(new.clone()),
        }),
    }
}
