//! Partial-change algebra.
//!
//! A [`Diff`] describes how to turn one version of a JSON value into another.
//! It either replaces the value wholesale or carries an ordered list of
//! [`PartialOp`]s, each addressing a path below the value. Applying a diff
//! always yields its inverse, so every mutation can be undone without
//! keeping the old document around.
//!
//! # Conventions
//!
//! - `null` means "absent": setting an object key to `null` removes the key.
//! - Array elements are addressed by decimal index. List operands carry the
//!   index *at the time they are applied*; ops must be applied in order.
//! - Missing intermediate objects are created on the way down and the
//!   inverse removes them again.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Path segments below the value a diff is applied to.
pub type Path = Vec<String>;

/// A change to a JSON value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Diff {
    /// Replace the whole value. `null` deletes it.
    Replace(Value),
    /// Ordered edits below the value.
    Partial(Vec<PartialOp>),
}

/// One edit inside a [`Diff::Partial`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialOp {
    /// Where the operand applies. Empty means the value itself.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Path,
    /// What to do there.
    pub operand: Operand,
}

/// The edit performed at a [`PartialOp`]'s path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operand {
    /// Set the value at the path (`null` removes it).
    Scalar(Value),
    /// Apply a diff to the value at the path.
    Nested(Diff),
    /// Insert into the array at the path.
    ListInsert { index: usize, value: Value },
    /// Remove from the array at the path. `value` is the element removed,
    /// kept so the op can be inverted.
    ListRemove { index: usize, value: Value },
}

impl Default for Diff {
    fn default() -> Self {
        Diff::Partial(Vec::new())
    }
}

impl Diff {
    /// A diff that changes nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A partial diff from a list of ops.
    pub fn partial(ops: impl IntoIterator<Item = PartialOp>) -> Self {
        Diff::Partial(ops.into_iter().collect())
    }

    /// Set a single top-level field.
    pub fn set(field: impl Into<String>, value: Value) -> Self {
        Diff::Partial(vec![PartialOp::at(vec![field.into()], Operand::Scalar(value))])
    }

    /// Set several top-level fields.
    pub fn fields<K: Into<String>>(pairs: impl IntoIterator<Item = (K, Value)>) -> Self {
        Diff::partial(
            pairs
                .into_iter()
                .map(|(key, value)| PartialOp::at(vec![key.into()], Operand::Scalar(value))),
        )
    }

    /// Whether applying this diff can never change anything.
    pub fn is_empty(&self) -> bool {
        matches!(self, Diff::Partial(ops) if ops.is_empty())
    }
}

impl PartialOp {
    /// An op at an explicit path.
    pub fn at(path: Path, operand: Operand) -> Self {
        Self { path, operand }
    }

    /// An op on the value itself.
    pub fn root(operand: Operand) -> Self {
        Self::at(Vec::new(), operand)
    }

    /// Set the value at a dotted path.
    pub fn set(path: &str, value: Value) -> Self {
        Self::at(parse_path(path), Operand::Scalar(value))
    }

    /// Apply `diff` to the value at a dotted path.
    pub fn nested(path: &str, diff: Diff) -> Self {
        Self::at(parse_path(path), Operand::Nested(diff))
    }

    /// Insert `value` at `index` of the array at a dotted path.
    pub fn insert(path: &str, index: usize, value: Value) -> Self {
        Self::at(parse_path(path), Operand::ListInsert { index, value })
    }

    /// Remove the element at `index` of the array at a dotted path.
    pub fn remove(path: &str, index: usize, value: Value) -> Self {
        Self::at(parse_path(path), Operand::ListRemove { index, value })
    }
}

/// Split a dotted path. Keys that themselves contain `.` need [`PartialOp::at`].
pub fn parse_path(dotted: &str) -> Path {
    if dotted.is_empty() {
        Vec::new()
    } else {
        dotted.split('.').map(str::to_owned).collect()
    }
}

pub(crate) fn dotted(path: &[String]) -> String {
    path.join(".")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Strict,
    Lenient,
}

/// Apply `diff` to a copy of `value`.
pub fn apply_diff(value: &Value, diff: &Diff) -> Result<Value> {
    let mut next = value.clone();
    apply_in_place(&mut next, diff, Mode::Strict)?;
    Ok(next)
}

/// Apply `diff` to `target` and return the diff that undoes it.
///
/// On error `target` is left untouched.
pub fn apply_with_undo(target: &mut Value, diff: &Diff) -> Result<Diff> {
    let mut next = target.clone();
    let undo = apply_in_place(&mut next, diff, Mode::Strict)?;
    *target = next;
    Ok(undo)
}

/// The diff that restores `before` from `apply_diff(before, diff)`.
pub fn invert_diff(before: &Value, diff: &Diff) -> Result<Diff> {
    let mut scratch = before.clone();
    apply_in_place(&mut scratch, diff, Mode::Strict)
}

/// Apply `diff`, skipping ops that do not fit the value's shape.
///
/// Used for derived views where a partial answer beats an error.
pub fn apply_lenient(target: &mut Value, diff: &Diff) -> Diff {
    match apply_in_place(target, diff, Mode::Lenient) {
        Ok(undo) => undo,
        // only a root-level mismatch gets here; nothing was applied
        Err(err) => {
            tracing::debug!(error = %err, "lenient apply skipped diff");
            Diff::empty()
        }
    }
}

fn apply_in_place(target: &mut Value, diff: &Diff, mode: Mode) -> Result<Diff> {
    match diff {
        Diff::Replace(value) => Ok(replace(target, value).map_or_else(Diff::empty, Diff::Replace)),
        Diff::Partial(ops) => apply_ops(target, ops, mode).map(Diff::Partial),
    }
}

fn apply_ops(target: &mut Value, ops: &[PartialOp], mode: Mode) -> Result<Vec<PartialOp>> {
    let mut undo = Vec::with_capacity(ops.len());
    for op in ops {
        match apply_at(target, &op.path, &op.operand, mode) {
            Ok(Some(inverse)) => undo.push(inverse),
            Ok(None) => {}
            Err(err) if mode == Mode::Lenient => {
                tracing::debug!(path = %dotted(&op.path), error = %err, "skipping op");
            }
            Err(err) => return Err(err),
        }
    }
    // inverses must run last-to-first for list indices to line up
    undo.reverse();
    Ok(undo)
}

/// Apply `operand` at `path` below `node`. Leaves `node` unchanged on error.
fn apply_at(
    node: &mut Value,
    path: &[String],
    operand: &Operand,
    mode: Mode,
) -> Result<Option<PartialOp>> {
    let Some((segment, rest)) = path.split_first() else {
        return Ok(apply_operand(node, operand, mode)?.map(PartialOp::root));
    };

    let created = node.is_null();
    if created {
        *node = Value::Object(Map::new());
    }

    let result = match &mut *node {
        Value::Object(map) => {
            let child = map.entry(segment.clone()).or_insert(Value::Null);
            let result = apply_at(child, rest, operand, mode);
            if child.is_null() {
                map.remove(segment);
            }
            result
        }
        Value::Array(items) => match array_index(segment, items.len()) {
            Ok(index) => apply_at(&mut items[index], rest, operand, mode),
            Err(err) => Err(err),
        },
        other => Err(Error::malformed(format!(
            "cannot descend into {} at `{segment}`",
            kind_name(other)
        ))),
    };

    match result {
        Err(err) => {
            if created {
                *node = Value::Null;
            }
            Err(err)
        }
        Ok(None) if created => {
            *node = Value::Null;
            Ok(None)
        }
        Ok(Some(_)) if created => Ok(Some(PartialOp::root(Operand::Scalar(Value::Null)))),
        Ok(inverse) => Ok(inverse.map(|mut op| {
            op.path.insert(0, segment.clone());
            op
        })),
    }
}

fn apply_operand(node: &mut Value, operand: &Operand, mode: Mode) -> Result<Option<Operand>> {
    match operand {
        Operand::Scalar(value) | Operand::Nested(Diff::Replace(value)) => {
            Ok(replace(node, value).map(Operand::Scalar))
        }
        Operand::Nested(Diff::Partial(ops)) => {
            let created = node.is_null();
            if created {
                *node = empty_container_for(ops);
            }
            match apply_ops(node, ops, mode) {
                Err(err) => {
                    if created {
                        *node = Value::Null;
                    }
                    Err(err)
                }
                Ok(undo) if created => {
                    if undo.is_empty() {
                        *node = Value::Null;
                        Ok(None)
                    } else {
                        Ok(Some(Operand::Scalar(Value::Null)))
                    }
                }
                Ok(undo) if undo.is_empty() => Ok(None),
                Ok(undo) => Ok(Some(Operand::Nested(Diff::Partial(undo)))),
            }
        }
        Operand::ListInsert { index, value } => {
            if node.is_null() {
                if *index != 0 {
                    return Err(Error::malformed(format!(
                        "insert at {index} into a missing list"
                    )));
                }
                *node = Value::Array(vec![value.clone()]);
                return Ok(Some(Operand::Scalar(Value::Null)));
            }
            let kind = kind_name(node);
            let Value::Array(items) = node else {
                return Err(Error::malformed(format!("list insert into {kind}")));
            };
            if *index > items.len() {
                return Err(Error::malformed(format!(
                    "insert index {index} out of bounds (len {})",
                    items.len()
                )));
            }
            items.insert(*index, value.clone());
            Ok(Some(Operand::ListRemove {
                index: *index,
                value: value.clone(),
            }))
        }
        Operand::ListRemove { index, .. } => {
            let kind = kind_name(node);
            let Value::Array(items) = node else {
                return Err(Error::malformed(format!("list remove from {kind}")));
            };
            if *index >= items.len() {
                return Err(Error::malformed(format!(
                    "remove index {index} out of bounds (len {})",
                    items.len()
                )));
            }
            let removed = items.remove(*index);
            Ok(Some(Operand::ListInsert {
                index: *index,
                value: removed,
            }))
        }
    }
}

fn replace(node: &mut Value, value: &Value) -> Option<Value> {
    if node == value {
        return None;
    }
    Some(std::mem::replace(node, value.clone()))
}

fn empty_container_for(ops: &[PartialOp]) -> Value {
    match ops.first() {
        Some(PartialOp {
            path,
            operand: Operand::ListInsert { .. } | Operand::ListRemove { .. },
        }) if path.is_empty() => Value::Array(Vec::new()),
        _ => Value::Object(Map::new()),
    }
}

/// The value one path segment below `value`: an object key or a list index.
pub(crate) fn child<'a>(value: &'a Value, segment: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => array_index(segment, items.len())
            .ok()
            .and_then(|index| items.get(index)),
        _ => None,
    }
}

fn array_index(segment: &str, len: usize) -> Result<usize> {
    match segment.parse::<usize>() {
        Ok(index) if index < len => Ok(index),
        Ok(index) => Err(Error::malformed(format!(
            "index {index} out of bounds (len {len})"
        ))),
        Err(_) => Err(Error::malformed(format!(
            "non-numeric index `{segment}` for a list"
        ))),
    }
}

pub(crate) fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a bool",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

/// Top-level keys of `doc` that `diff` touches.
///
/// Looks one level into nested diffs at the root; deeper structure is
/// reported under its top-level key.
pub fn extract_changed_keys(doc: &Value, diff: &Diff) -> BTreeSet<String> {
    let mut keys = BTreeSet::new();
    collect_keys(doc, diff, &mut keys);
    keys
}

fn collect_keys(doc: &Value, diff: &Diff, keys: &mut BTreeSet<String>) {
    match diff {
        Diff::Replace(value) => replaced_keys(doc, value, keys),
        Diff::Partial(ops) => {
            for op in ops {
                match (op.path.first(), &op.operand) {
                    (Some(key), _) => {
                        keys.insert(key.clone());
                    }
                    (None, Operand::Scalar(value) | Operand::Nested(Diff::Replace(value))) => {
                        replaced_keys(doc, value, keys)
                    }
                    (None, Operand::Nested(inner)) => collect_keys(doc, inner, keys),
                    (None, _) => {}
                }
            }
        }
    }
}

fn replaced_keys(doc: &Value, value: &Value, keys: &mut BTreeSet<String>) {
    let empty = Map::new();
    let before = doc.as_object().unwrap_or(&empty);
    let after = value.as_object().unwrap_or(&empty);
    for (key, old) in before {
        if after.get(key) != Some(old) {
            keys.insert(key.clone());
        }
    }
    for (key, new) in after {
        if before.get(key) != Some(new) {
            keys.insert(key.clone());
        }
    }
}

/// Rewrite a diff as leaf ops with full paths. `Nested` operands disappear:
/// a nested replace becomes a `Scalar`, a nested partial is inlined.
pub(crate) fn flatten(diff: &Diff) -> Vec<PartialOp> {
    let mut out = Vec::new();
    flatten_into(diff, &mut Vec::new(), &mut out);
    out
}

fn flatten_into(diff: &Diff, prefix: &mut Path, out: &mut Vec<PartialOp>) {
    match diff {
        Diff::Replace(value) => out.push(PartialOp::at(
            prefix.clone(),
            Operand::Scalar(value.clone()),
        )),
        Diff::Partial(ops) => {
            for op in ops {
                let depth = prefix.len();
                prefix.extend(op.path.iter().cloned());
                match &op.operand {
                    Operand::Nested(inner) => flatten_into(inner, prefix, out),
                    operand => out.push(PartialOp::at(prefix.clone(), operand.clone())),
                }
                prefix.truncate(depth);
            }
        }
    }
}

/// Compute a diff turning `from` into `to`, or `None` if they are equal.
///
/// Objects recurse key by key, arrays keep their common prefix and suffix
/// and splice the middle, anything else is replaced.
pub fn diff_values(from: &Value, to: &Value) -> Option<Diff> {
    if from == to {
        return None;
    }
    match (from, to) {
        (Value::Object(old), Value::Object(new)) => Some(Diff::Partial(object_ops(old, new))),
        (Value::Array(old), Value::Array(new)) => Some(Diff::Partial(array_ops(old, new, Vec::new()))),
        _ => Some(Diff::Replace(to.clone())),
    }
}

fn object_ops(from: &Map<String, Value>, to: &Map<String, Value>) -> Vec<PartialOp> {
    let mut ops = Vec::new();
    for key in from.keys() {
        if !to.contains_key(key) {
            ops.push(PartialOp::at(vec![key.clone()], Operand::Scalar(Value::Null)));
        }
    }
    for (key, value) in to {
        let path = vec![key.clone()];
        match (from.get(key), value) {
            (Some(old), new) if old == new => {}
            (Some(Value::Object(old)), Value::Object(new)) => ops.push(PartialOp::at(
                path,
                Operand::Nested(Diff::Partial(object_ops(old, new))),
            )),
            (Some(Value::Array(old)), Value::Array(new)) => ops.extend(array_ops(old, new, path)),
            (_, new) => ops.push(PartialOp::at(path, Operand::Scalar(new.clone()))),
        }
    }
    ops
}

fn array_ops(from: &[Value], to: &[Value], path: Path) -> Vec<PartialOp> {
    let prefix = from.iter().zip(to).take_while(|(a, b)| a == b).count();
    let room = from.len().min(to.len()) - prefix;
    let suffix = from
        .iter()
        .rev()
        .zip(to.iter().rev())
        .take(room)
        .take_while(|(a, b)| a == b)
        .count();

    let removed = &from[prefix..from.len() - suffix];
    let inserted = &to[prefix..to.len() - suffix];

    let mut ops = Vec::with_capacity(removed.len() + inserted.len());
    for value in removed {
        ops.push(PartialOp::at(
            path.clone(),
            Operand::ListRemove {
                index: prefix,
                value: value.clone(),
            },
        ));
    }
    for (offset, value) in inserted.iter().enumerate() {
        ops.push(PartialOp::at(
            path.clone(),
            Operand::ListInsert {
                index: prefix + offset,
                value: value.clone(),
            },
        ));
    }
    ops
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_top_level_field() {
        let doc = json!({"_id": "1", "age": 5});
        let diff = Diff::set("age", json!(7));

        let after = apply_diff(&doc, &diff).unwrap();
        assert_eq!(after, json!({"_id": "1", "age": 7}));

        let undo = invert_diff(&doc, &diff).unwrap();
        assert_eq!(undo, Diff::set("age", json!(5)));
        assert_eq!(apply_diff(&after, &undo).unwrap(), doc);
    }

    #[test]
    fn null_removes_key() {
        let doc = json!({"_id": "1", "age": 5});
        let after = apply_diff(&doc, &Diff::set("age", Value::Null)).unwrap();
        assert_eq!(after, json!({"_id": "1"}));
    }

    #[test]
    fn unchanged_field_has_no_undo() {
        let doc = json!({"_id": "1", "age": 5});
        let undo = invert_diff(&doc, &Diff::set("age", json!(5))).unwrap();
        assert!(undo.is_empty());

        // nothing to restore when a missing field is cleared
        let undo = invert_diff(&doc, &Diff::set("name", Value::Null)).unwrap();
        assert!(undo.is_empty());
    }

    #[test]
    fn nested_path_creates_intermediates() {
        let doc = json!({"_id": "1"});
        let diff = Diff::partial([PartialOp::set("a.b.c", json!(1))]);

        let after = apply_diff(&doc, &diff).unwrap();
        assert_eq!(after, json!({"_id": "1", "a": {"b": {"c": 1}}}));

        // the inverse removes the outermost created container
        let undo = invert_diff(&doc, &diff).unwrap();
        assert_eq!(undo, Diff::partial([PartialOp::set("a", Value::Null)]));
        assert_eq!(apply_diff(&after, &undo).unwrap(), doc);
    }

    #[test]
    fn nested_partial_inverts_recursively() {
        let doc = json!({"foo": {"bar": {"baz": "old", "keep": 1}}});
        let diff = Diff::partial([PartialOp::nested(
            "foo.bar",
            Diff::partial([
                PartialOp::set("baz", json!("new")),
                PartialOp::set("extra", json!(true)),
            ]),
        )]);

        let after = apply_diff(&doc, &diff).unwrap();
        assert_eq!(
            after,
            json!({"foo": {"bar": {"baz": "new", "keep": 1, "extra": true}}})
        );

        let undo = invert_diff(&doc, &diff).unwrap();
        assert_eq!(
            undo,
            Diff::partial([PartialOp::nested(
                "foo.bar",
                Diff::partial([
                    PartialOp::set("extra", Value::Null),
                    PartialOp::set("baz", json!("old")),
                ]),
            )])
        );
        assert_eq!(apply_diff(&after, &undo).unwrap(), doc);
    }

    #[test]
    fn nested_replace_sets_value() {
        let doc = json!({"foo": {"bar": {"baz": "old"}}});
        let diff = Diff::partial([PartialOp::nested(
            "foo.bar.baz",
            Diff::Replace(json!("new")),
        )]);
        let after = apply_diff(&doc, &diff).unwrap();
        assert_eq!(after, json!({"foo": {"bar": {"baz": "new"}}}));
    }

    #[test]
    fn list_ops_use_index_at_application_time() {
        let doc = json!({"tags": ["a", "b", "c"]});
        let diff = Diff::partial([
            PartialOp::remove("tags", 0, json!("a")),
            PartialOp::remove("tags", 0, json!("b")),
            PartialOp::insert("tags", 1, json!("z")),
        ]);

        let after = apply_diff(&doc, &diff).unwrap();
        assert_eq!(after, json!({"tags": ["c", "z"]}));

        let undo = invert_diff(&doc, &diff).unwrap();
        assert_eq!(
            undo,
            Diff::partial([
                PartialOp::remove("tags", 1, json!("z")),
                PartialOp::insert("tags", 0, json!("b")),
                PartialOp::insert("tags", 0, json!("a")),
            ])
        );
        assert_eq!(apply_diff(&after, &undo).unwrap(), doc);
    }

    #[test]
    fn list_insert_creates_missing_list() {
        let doc = json!({"_id": "1"});
        let diff = Diff::partial([PartialOp::insert("tags", 0, json!("x"))]);

        let after = apply_diff(&doc, &diff).unwrap();
        assert_eq!(after, json!({"_id": "1", "tags": ["x"]}));
        assert_eq!(
            invert_diff(&doc, &diff).unwrap(),
            Diff::partial([PartialOp::set("tags", Value::Null)])
        );
    }

    #[test]
    fn array_elements_by_index() {
        let doc = json!({"rows": [{"n": 1}, {"n": 2}]});
        let diff = Diff::partial([PartialOp::set("rows.1.n", json!(20))]);
        let after = apply_diff(&doc, &diff).unwrap();
        assert_eq!(after, json!({"rows": [{"n": 1}, {"n": 20}]}));
    }

    #[test]
    fn malformed_ops_fail_and_leave_target_untouched() {
        let mut doc = json!({"title": "x", "tags": ["a"]});
        let original = doc.clone();

        let diff = Diff::partial([
            PartialOp::set("fresh", json!(1)),
            PartialOp::set("title.deep", json!(1)),
        ]);
        assert!(matches!(
            apply_with_undo(&mut doc, &diff),
            Err(Error::MalformedDiff(_))
        ));
        assert_eq!(doc, original);

        let diff = Diff::partial([PartialOp::remove("tags", 3, Value::Null)]);
        assert!(apply_with_undo(&mut doc, &diff).is_err());

        let diff = Diff::partial([PartialOp::set("tags.x", json!(1))]);
        assert!(apply_with_undo(&mut doc, &diff).is_err());

        let diff = Diff::partial([PartialOp::insert("title", 0, json!(1))]);
        assert!(apply_with_undo(&mut doc, &diff).is_err());
        assert_eq!(doc, original);
    }

    #[test]
    fn failed_descent_drops_containers_it_created() {
        let mut doc = json!({"rows": [{"n": 1}]});
        let original = doc.clone();

        // the intermediate `missing` object is created, then the insert fails
        let diff = Diff::partial([PartialOp::insert("missing.list", 3, json!("x"))]);
        assert!(matches!(
            apply_with_undo(&mut doc, &diff),
            Err(Error::MalformedDiff(_))
        ));
        assert_eq!(doc, original);

        let diff = Diff::partial([PartialOp::set("rows.0.n.deep", json!(2))]);
        assert!(apply_with_undo(&mut doc, &diff).is_err());
        assert_eq!(doc, original);
    }

    #[test]
    fn child_resolves_keys_and_indices() {
        let value = json!({"rows": [10, 20], "name": "x"});
        assert_eq!(child(&value, "name"), Some(&json!("x")));
        assert_eq!(child(&value["rows"], "1"), Some(&json!(20)));
        assert_eq!(child(&value["rows"], "2"), None);
        assert_eq!(child(&value["rows"], "x"), None);
        assert_eq!(child(&value["name"], "0"), None);
    }

    #[test]
    fn lenient_apply_skips_bad_ops() {
        let mut doc = json!({"title": "x"});
        let diff = Diff::partial([
            PartialOp::set("title.deep", json!(1)),
            PartialOp::set("pages", json!(12)),
        ]);
        let undo = apply_lenient(&mut doc, &diff);
        assert_eq!(doc, json!({"title": "x", "pages": 12}));
        assert_eq!(undo, Diff::set("pages", Value::Null));
    }

    #[test]
    fn replace_whole_value() {
        let doc = json!({"a": 1});
        let diff = Diff::Replace(json!({"b": 2}));
        assert_eq!(apply_diff(&doc, &diff).unwrap(), json!({"b": 2}));
        assert_eq!(invert_diff(&doc, &diff).unwrap(), Diff::Replace(doc.clone()));
    }

    #[test]
    fn changed_keys() {
        let doc = json!({"_id": "1", "a": 1, "b": 2});

        let diff = Diff::partial([
            PartialOp::set("a", json!(3)),
            PartialOp::set("c.d", json!(4)),
            PartialOp::insert("list", 0, json!(1)),
        ]);
        let keys: Vec<_> = extract_changed_keys(&doc, &diff).into_iter().collect();
        assert_eq!(keys, vec!["a", "c", "list"]);

        let diff = Diff::Replace(json!({"_id": "1", "a": 1, "z": 0}));
        let keys: Vec<_> = extract_changed_keys(&doc, &diff).into_iter().collect();
        assert_eq!(keys, vec!["b", "z"]);

        let diff = Diff::partial([PartialOp::root(Operand::Nested(Diff::set("q", json!(1))))]);
        let keys: Vec<_> = extract_changed_keys(&doc, &diff).into_iter().collect();
        assert_eq!(keys, vec!["q"]);
    }

    #[test]
    fn flatten_inlines_nested() {
        let diff = Diff::partial([PartialOp::nested(
            "foo",
            Diff::partial([
                PartialOp::set("a", json!(1)),
                PartialOp::nested("b.c", Diff::Replace(json!(2))),
            ]),
        )]);
        assert_eq!(
            flatten(&diff),
            vec![
                PartialOp::set("foo.a", json!(1)),
                PartialOp::set("foo.b.c", json!(2)),
            ]
        );
    }

    #[test]
    fn diff_values_objects_and_arrays() {
        let from = json!({"a": 1, "gone": true, "o": {"x": 1, "y": 2}, "l": [1, 2, 3, 4]});
        let to = json!({"a": 2, "o": {"x": 1, "y": 3}, "l": [1, 9, 4], "new": "n"});

        let diff = diff_values(&from, &to).unwrap();
        assert_eq!(apply_diff(&from, &diff).unwrap(), to);

        let ops = flatten(&diff);
        assert!(ops.contains(&PartialOp::set("gone", Value::Null)));
        assert!(ops.contains(&PartialOp::set("o.y", json!(3))));
        assert!(ops.contains(&PartialOp::remove("l", 1, json!(2))));
        assert!(ops.contains(&PartialOp::insert("l", 1, json!(9))));

        assert_eq!(diff_values(&from, &from), None);
        assert_eq!(diff_values(&json!(1), &json!("x")), Some(Diff::Replace(json!("x"))));
    }

    #[test]
    fn serialization_format() {
        let diff = Diff::partial([
            PartialOp::set("a", json!(1)),
            PartialOp::insert("l", 0, json!("x")),
        ]);
        let json = serde_json::to_value(&diff).unwrap();
        assert_eq!(
            json,
            json!({"partial": [
                {"path": ["a"], "operand": {"scalar": 1}},
                {"path": ["l"], "operand": {"listInsert": {"index": 0, "value": "x"}}},
            ]})
        );
        let parsed: Diff = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, diff);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_leaf() -> impl Strategy<Value = Value> {
            prop_oneof![
                any::<bool>().prop_map(Value::Bool),
                any::<i32>().prop_map(Value::from),
                "[a-z]{0,4}".prop_map(Value::from),
            ]
        }

        fn arb_value() -> impl Strategy<Value = Value> {
            arb_leaf().prop_recursive(3, 24, 4, |inner| {
                prop_oneof![
                    prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                    prop::collection::btree_map("[a-e]", inner, 0..4)
                        .prop_map(|map| Value::Object(map.into_iter().collect())),
                ]
            })
        }

        // documents never hold explicit nulls: null means absent
        fn arb_doc() -> impl Strategy<Value = Value> {
            prop::collection::btree_map("[a-e]", arb_value(), 0..5)
                .prop_map(|map| Value::Object(map.into_iter().collect()))
        }

        proptest! {
            #[test]
            fn prop_diff_is_invertible(before in arb_doc(), target in arb_doc()) {
                if let Some(diff) = diff_values(&before, &target) {
                    let after = apply_diff(&before, &diff).unwrap();
                    prop_assert_eq!(&after, &target);

                    let undo = invert_diff(&before, &diff).unwrap();
                    prop_assert_eq!(apply_diff(&after, &undo).unwrap(), before);
                }
            }

            #[test]
            fn prop_undo_of_undo_is_forward(before in arb_doc(), target in arb_doc()) {
                if let Some(diff) = diff_values(&before, &target) {
                    let mut value = before.clone();
                    let undo = apply_with_undo(&mut value, &diff).unwrap();
                    let redo = apply_with_undo(&mut value, &undo).unwrap();
                    prop_assert_eq!(&value, &before);
                    prop_assert_eq!(apply_diff(&before, &redo).unwrap(), target);
                }
            }
        }
    }
}
