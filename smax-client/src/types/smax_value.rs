//! Pulled values with their store metadata.

use crate::types::{Dim, StructMap, Timestamp, TypeTag, Value};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Per-variable metadata reported by the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Metadata {
    /// Full `table:key[:path]` name; pulling this name returns this value.
    pub name: String,
    /// When the value was written.
    pub timestamp: Option<Timestamp>,
    /// Writer identity, `host:program`.
    pub origin: String,
    /// Serial assigned by the store per key.
    pub seq: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coords: Option<String>,
}

/// Optional metadata fields, looked up separately and non-atomically.
pub const OPTIONAL_METADATA: [&str; 3] = ["description", "unit", "coords"];

impl Metadata {
    /// Reads one of the [`OPTIONAL_METADATA`] fields.
    #[must_use]
    pub fn optional(&self, field: &str) -> Option<&str> {
        match field {
            "description" => self.description.as_deref(),
            "unit" => self.unit.as_deref(),
            "coords" => self.coords.as_deref(),
            _ => None,
        }
    }

    /// Sets one of the [`OPTIONAL_METADATA`] fields; other names are ignored.
    pub fn set_optional(&mut self, field: &str, value: String) {
        match field {
            "description" => self.description = Some(value),
            "unit" => self.unit = Some(value),
            "coords" => self.coords = Some(value),
            _ => {}
        }
    }
}

/// Payload of a pulled node.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Leaf(Value),
    Struct(BTreeMap<String, SmaxValue>),
}

/// A decoded value, or a struct tree of them, with metadata on every node.
#[derive(Debug, Clone, PartialEq)]
pub struct SmaxValue {
    pub payload: Payload,
    pub type_tag: TypeTag,
    pub dim: Dim,
    pub meta: Metadata,
}

impl SmaxValue {
    /// A leaf node.
    #[must_use]
    pub fn leaf(value: Value, type_tag: TypeTag, dim: Dim, meta: Metadata) -> Self {
        Self {
            payload: Payload::Leaf(value),
            type_tag,
            dim,
            meta,
        }
    }

    /// An empty struct node.
    #[must_use]
    pub fn structure(meta: Metadata) -> Self {
        Self {
            payload: Payload::Struct(BTreeMap::new()),
            type_tag: TypeTag::Struct,
            dim: Dim::Scalar,
            meta,
        }
    }

    /// Full name of this node.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    /// The leaf payload, if this is a leaf.
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        match &self.payload {
            Payload::Leaf(v) => Some(v),
            Payload::Struct(_) => None,
        }
    }

    /// Returns true for struct nodes.
    #[must_use]
    pub fn is_struct(&self) -> bool {
        matches!(self.payload, Payload::Struct(_))
    }

    /// Child nodes of a struct.
    #[must_use]
    pub fn fields(&self) -> Option<&BTreeMap<String, SmaxValue>> {
        match &self.payload {
            Payload::Struct(map) => Some(map),
            Payload::Leaf(_) => None,
        }
    }

    /// A direct child of a struct node.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&SmaxValue> {
        self.fields().and_then(|map| map.get(field))
    }

    /// A descendant addressed by a `:`-separated relative path.
    #[must_use]
    pub fn get_path(&self, path: &str) -> Option<&SmaxValue> {
        path.split(':')
            .filter(|s| !s.is_empty())
            .try_fold(self, |node, segment| node.get(segment))
    }

    /// Every leaf below this node, in field order.
    #[must_use]
    pub fn leaves(&self) -> Vec<&SmaxValue> {
        let mut out = Vec::new();
        collect_leaves(self, &mut out);
        out
    }

    /// Strips metadata, yielding a value that can be shared again.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match &self.payload {
            Payload::Leaf(v) => v.clone(),
            Payload::Struct(map) => Value::Struct(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_value()))
                    .collect::<StructMap>(),
            ),
        }
    }

    pub(crate) fn fields_mut(&mut self) -> Option<&mut BTreeMap<String, SmaxValue>> {
        match &mut self.payload {
            Payload::Struct(map) => Some(map),
            Payload::Leaf(_) => None,
        }
    }
}

fn collect_leaves<'a>(node: &'a SmaxValue, out: &mut Vec<&'a SmaxValue>) {
    match &node.payload {
        Payload::Leaf(_) => out.push(node),
        Payload::Struct(map) => map.values().for_each(|child| collect_leaves(child, out)),
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Scalar(s) => s.to_string(),
        Value::Array(a) => format!("{:?}", a.to_f64().iter().collect::<Vec<_>>()),
        Value::Strings(s) => format!("{:?}", s.items()),
        Value::Struct(map) => format!("{{{} fields}}", map.len()),
    }
}

fn render(node: &SmaxValue, label: &str, depth: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let indent = "  ".repeat(depth);
    match &node.payload {
        Payload::Leaf(value) => writeln!(
            f,
            "{indent}{label}: {} ({}, dim {})",
            render_value(value),
            node.type_tag,
            node.dim
        ),
        Payload::Struct(map) => {
            writeln!(f, "{indent}{label}:")?;
            for (name, child) in map {
                render(child, name, depth + 1, f)?;
            }
            Ok(())
        }
    }
}

/// Renders an indented tree, one line per node.
impl fmt::Display for SmaxValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        render(self, &self.meta.name, 0, f)
    }
}
