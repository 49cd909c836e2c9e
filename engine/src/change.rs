//! Change events reported for every mutation of the live cache.
//!
//! A [`DocChange`] pairs the document after the mutation with the undo
//! needed to get back. Everything else (`was`, `changes`, per-key
//! decomposition of a nested field) is derived from those two on demand
//! and cached on the event.

use crate::{
    diff::{self, Diff, Operand, PartialOp},
    document::{Flag, ID_FIELD},
    DocId,
};
use serde::{ser::SerializeStruct, Serialize, Serializer};
use serde_json::Value;
use std::{
    cell::OnceCell,
    cmp::Ordering,
    collections::BTreeMap,
    fmt,
    rc::Rc,
};

/// What happened to a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeKind {
    Add,
    Change,
    Delete,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Add => f.write_str("add"),
            ChangeKind::Change => f.write_str("change"),
            ChangeKind::Delete => f.write_str("delete"),
        }
    }
}

/// How to reverse a change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Undo {
    /// Re-add the document (undoes a Delete)
    Add,
    /// Delete the document (undoes an Add)
    Delete,
    /// Apply this diff to the new document (undoes a Change)
    Diff(Diff),
}

impl fmt::Display for Undo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Undo::Add => f.write_str("add"),
            Undo::Delete => f.write_str("delete"),
            Undo::Diff(diff) => match serde_json::to_string(diff) {
                Ok(json) => f.write_str(&json),
                Err(_) => write!(f, "{diff:?}"),
            },
        }
    }
}

/// A single add, change or delete of a document.
///
/// For a Delete, [`doc`](Self::doc) is the document as it was just before
/// removal. Cloning shares the document and undo but not the derived caches.
#[derive(Debug)]
pub struct DocChange {
    id: DocId,
    doc: Rc<Value>,
    undo: Rc<Undo>,
    flag: Option<Flag>,
    was: OnceCell<Value>,
    changes: OnceCell<Diff>,
}

impl DocChange {
    fn build(id: DocId, doc: Rc<Value>, undo: Undo, flag: Option<Flag>) -> Self {
        Self {
            id,
            doc,
            undo: Rc::new(undo),
            flag,
            was: OnceCell::new(),
            changes: OnceCell::new(),
        }
    }

    /// A document was added.
    pub fn add(doc: Value, flag: Option<Flag>) -> Self {
        Self::build(doc_id(&doc), Rc::new(doc), Undo::Delete, flag)
    }

    /// A document was removed; `doc` is its last state.
    pub fn delete(doc: Value, flag: Option<Flag>) -> Self {
        Self::build(doc_id(&doc), Rc::new(doc), Undo::Add, flag)
    }

    /// A document changed; `undo` turns `doc` back into its previous state.
    pub fn change(doc: Value, undo: Diff, flag: Option<Flag>) -> Self {
        Self::build(doc_id(&doc), Rc::new(doc), Undo::Diff(undo), flag)
    }

    pub fn kind(&self) -> ChangeKind {
        match *self.undo {
            Undo::Delete => ChangeKind::Add,
            Undo::Add => ChangeKind::Delete,
            Undo::Diff(_) => ChangeKind::Change,
        }
    }

    pub fn is_add(&self) -> bool {
        self.kind() == ChangeKind::Add
    }

    pub fn is_change(&self) -> bool {
        self.kind() == ChangeKind::Change
    }

    pub fn is_delete(&self) -> bool {
        self.kind() == ChangeKind::Delete
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn doc(&self) -> &Value {
        &self.doc
    }

    pub fn undo(&self) -> &Undo {
        &self.undo
    }

    pub fn flag(&self) -> Option<&Flag> {
        self.flag.as_ref()
    }

    /// The document before the change. `None` for an Add.
    ///
    /// Computed once; later calls return the same value.
    pub fn was(&self) -> Option<&Value> {
        match &*self.undo {
            Undo::Delete => None,
            Undo::Add => Some(&self.doc),
            Undo::Diff(undo) => Some(self.was.get_or_init(|| {
                let mut was = (*self.doc).clone();
                diff::apply_lenient(&mut was, undo);
                was
            })),
        }
    }

    /// The forward diff from [`was`](Self::was) to [`doc`](Self::doc).
    pub fn changes(&self) -> &Diff {
        self.changes.get_or_init(|| match &*self.undo {
            Undo::Delete => Diff::fields(
                object_entries(&self.doc).map(|(key, value)| (key.clone(), value.clone())),
            ),
            Undo::Add => Diff::fields(
                object_entries(&self.doc)
                    .filter(|(key, _)| key.as_str() != ID_FIELD)
                    .map(|(key, _)| (key.clone(), Value::Null)),
            ),
            // applying the undo yields its inverse, which is the forward diff
            Undo::Diff(undo) => {
                let mut scratch = (*self.doc).clone();
                diff::apply_lenient(&mut scratch, undo)
            }
        })
    }

    /// Whether the change touches the top-level field `name`.
    pub fn has_field(&self, name: &str) -> bool {
        match &*self.undo {
            Undo::Diff(undo) => diff::extract_changed_keys(&self.doc, undo).contains(name),
            Undo::Add | Undo::Delete => self.doc.get(name).is_some_and(|v| !v.is_null()),
        }
    }

    pub fn has_any_field(&self, names: &[&str]) -> bool {
        names.iter().any(|name| self.has_field(name))
    }

    /// Keys of the nested object or list at `field` whose value differs
    /// between [`was`](Self::was) and [`doc`](Self::doc). List elements are
    /// keyed by index.
    pub fn sub_doc_keys(&self, field: &str) -> Vec<String> {
        self.decompose(field).into_iter().map(|(key, _)| key).collect()
    }

    /// One event per key of the nested object or list at `field` that
    /// changed, in key order (indices numerically).
    ///
    /// Each event is freshly allocated and carries this event's flag. The
    /// sub-documents need not be objects; the event id is the key.
    pub fn sub_docs(&self, field: &str) -> Vec<DocChange> {
        self.decompose(field)
            .into_iter()
            .map(|(_, change)| change)
            .collect()
    }

    fn decompose(&self, field: &str) -> Vec<(String, DocChange)> {
        let now = self.doc.get(field);
        let mut out = match &*self.undo {
            Undo::Delete => self.compare(None, now),
            Undo::Add => self.compare(now, None),
            Undo::Diff(undo) => self.decompose_diff(field, undo),
        };
        out.sort_by(|(a, _), (b, _)| key_order(a, b));
        out
    }

    fn decompose_diff(&self, field: &str, undo: &Diff) -> Vec<(String, DocChange)> {
        let mut whole_field = false;
        let mut groups: BTreeMap<String, Vec<PartialOp>> = BTreeMap::new();

        // nested replaces were flattened into scalars, so every depth is treated alike
        for op in diff::flatten(undo) {
            match op.path.as_slice() {
                [] => whole_field = true,
                [key] if key == field => whole_field = true,
                [key, sub, rest @ ..] if key == field => groups
                    .entry(sub.clone())
                    .or_default()
                    .push(PartialOp::at(rest.to_vec(), op.operand)),
                _ => {}
            }
        }

        if whole_field {
            let was = self.was().and_then(|was| was.get(field));
            return self.compare(was, self.doc.get(field));
        }

        let container = self.doc.get(field);
        let mut out = Vec::new();
        for (key, ops) in groups {
            let now = container
                .and_then(|value| diff::child(value, &key))
                .cloned()
                .unwrap_or(Value::Null);
            let undo = sub_undo(ops);
            let mut was = now.clone();
            diff::apply_lenient(&mut was, &undo);
            if let Some(change) = self.sub_change(&key, non_null(&was), non_null(&now), Some(undo))
            {
                out.push((key, change));
            }
        }
        out
    }

    fn compare(&self, was: Option<&Value>, now: Option<&Value>) -> Vec<(String, DocChange)> {
        let mut keys: Vec<String> = child_keys(was).into_iter().chain(child_keys(now)).collect();
        keys.sort_by(|a, b| key_order(a, b));
        keys.dedup();

        let mut out = Vec::new();
        for key in keys {
            let before = was.and_then(|value| present(value, &key));
            let after = now.and_then(|value| present(value, &key));
            if let Some(change) = self.sub_change(&key, before, after, None) {
                out.push((key, change));
            }
        }
        out
    }

    fn sub_change(
        &self,
        key: &str,
        was: Option<&Value>,
        now: Option<&Value>,
        undo: Option<Diff>,
    ) -> Option<DocChange> {
        let flag = self.flag.clone();
        match (was, now) {
            (None, None) => None,
            (None, Some(now)) => Some(Self::build(
                key.to_owned(),
                Rc::new(now.clone()),
                Undo::Delete,
                flag,
            )),
            (Some(was), None) => Some(Self::build(
                key.to_owned(),
                Rc::new(was.clone()),
                Undo::Add,
                flag,
            )),
            (Some(was), Some(now)) if was == now => None,
            (Some(was), Some(now)) => {
                let undo = undo
                    .or_else(|| diff::diff_values(now, was))
                    .unwrap_or_default();
                Some(Self::build(
                    key.to_owned(),
                    Rc::new(now.clone()),
                    Undo::Diff(undo),
                    flag,
                ))
            }
        }
    }
}

/// A lone scalar at the root is a replace; anything else stays partial.
fn sub_undo(ops: Vec<PartialOp>) -> Diff {
    if let [PartialOp {
        path,
        operand: Operand::Scalar(value),
    }] = ops.as_slice()
    {
        if path.is_empty() {
            return Diff::Replace(value.clone());
        }
    }
    Diff::Partial(ops)
}

/// Object keys, or the indices of a list.
fn child_keys(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Object(map)) => map.keys().cloned().collect(),
        Some(Value::Array(items)) => (0..items.len()).map(|i| i.to_string()).collect(),
        _ => Vec::new(),
    }
}

/// Indices before other keys, indices numerically.
fn key_order(a: &str, b: &str) -> Ordering {
    match (a.parse::<usize>(), b.parse::<usize>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

fn present<'a>(container: &'a Value, key: &str) -> Option<&'a Value> {
    diff::child(container, key).filter(|value| !value.is_null())
}

fn non_null(value: &Value) -> Option<&Value> {
    Some(value).filter(|v| !v.is_null())
}

fn doc_id(doc: &Value) -> DocId {
    doc.get(ID_FIELD)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

fn object_entries(value: &Value) -> impl Iterator<Item = (&String, &Value)> {
    value.as_object().into_iter().flatten()
}

impl Clone for DocChange {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            doc: Rc::clone(&self.doc),
            undo: Rc::clone(&self.undo),
            flag: self.flag.clone(),
            was: OnceCell::new(),
            changes: OnceCell::new(),
        }
    }
}

impl PartialEq for DocChange {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.doc == other.doc
            && self.undo == other.undo
            && self.flag == other.flag
    }
}

impl fmt::Display for DocChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocChange.{}({}, {}", self.kind(), self.doc, self.undo)?;
        if let Some(flag) = &self.flag {
            write!(f, ", {flag}")?;
        }
        f.write_str(")")
    }
}

impl Serialize for DocChange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("DocChange", 5)?;
        state.serialize_field("kind", &self.kind())?;
        state.serialize_field("id", &self.id)?;
        state.serialize_field("doc", &*self.doc)?;
        state.serialize_field("undo", &*self.undo)?;
        if let Some(flag) = &self.flag {
            state.serialize_field("flag", flag)?;
        } else {
            state.skip_field("flag")?;
        }
        state.end()
    }
}
