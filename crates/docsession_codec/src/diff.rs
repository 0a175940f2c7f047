//! Structural comparison of documents.

use crate::value::{Document, Value};
use std::fmt;

/// How a field differs between two documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Present only in the current document.
    Added,
    /// Present only in the original document.
    Removed,
    /// Present in both with different values.
    Modified,
}

/// A single difference found by [`diff`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentChange {
    /// Dotted path of the field, with `[i]` for array elements.
    pub path: String,
    /// What happened to the field.
    pub kind: ChangeKind,
    /// Value in the original document, if any.
    pub old: Option<Value>,
    /// Value in the current document, if any.
    pub new: Option<Value>,
}

impl fmt::Display for DocumentChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ChangeKind::Added => write!(f, "+{}", self.path),
            ChangeKind::Removed => write!(f, "-{}", self.path),
            ChangeKind::Modified => write!(f, "~{}", self.path),
        }
    }
}

/// Lists every difference between `original` and `current`.
///
/// Objects are walked recursively. Arrays of equal length are compared
/// element by element; arrays whose length changed are reported as one
/// modification at the array's own path. An empty result means the two
/// documents are structurally equal.
pub fn diff(original: &Document, current: &Document) -> Vec<DocumentChange> {
    let mut changes = Vec::new();
    diff_objects("", original, current, &mut changes);
    changes
}

fn diff_objects(prefix: &str, original: &Document, current: &Document, out: &mut Vec<DocumentChange>) {
    for (field, old) in original {
        let path = join(prefix, field);
        match current.get(field) {
            Some(new) => diff_values(path, old, new, out),
            None => out.push(DocumentChange {
                path,
                kind: ChangeKind::Removed,
                old: Some(old.clone()),
                new: None,
            }),
        }
    }
    for (field, new) in current {
        if !original.contains_key(field) {
            out.push(DocumentChange {
                path: join(prefix, field),
                kind: ChangeKind::Added,
                old: None,
                new: Some(new.clone()),
            });
        }
    }
}

fn diff_values(path: String, old: &Value, new: &Value, out: &mut Vec<DocumentChange>) {
    match (old, new) {
        (Value::Object(a), Value::Object(b)) => diff_objects(&path, a, b, out),
        (Value::Array(a), Value::Array(b)) if a.len() == b.len() => {
            for (i, (x, y)) in a.iter().zip(b).enumerate() {
                diff_values(format!("{path}[{i}]"), x, y, out);
            }
        }
        _ if old == new => {}
        _ => out.push(DocumentChange {
            path,
            kind: ChangeKind::Modified,
            old: Some(old.clone()),
            new: Some(new.clone()),
        }),
    }
}

fn join(prefix: &str, field: &str) -> String {
    if prefix.is_empty() {
        field.to_string()
    } else {
        format!("{prefix}.{field}")
    }
}
