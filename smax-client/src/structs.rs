//! Struct translation between nested values and the store's flat tables.
//!
//! A struct shared as `table:key` becomes one hash per nesting level:
//!
//! ```text
//! {"roach2-03": {"temp": 100}}  under  system:roach
//!
//!   system:roach            roach2-03 -> "system:roach:roach2-03" (struct)
//!   system:roach:roach2-03  temp      -> "100" (int8)
//! ```
//!
//! All hashes of one struct are written in a single all-or-nothing batch;
//! each hash is updated atomically by the store's multi-field primitive.

use crate::codec::{decode_record, encode};
use crate::error::SmaxError;
use crate::store::{FieldUpdate, StructDump, TableUpdate};
use crate::types::{
    Metadata, PATH_SEPARATOR, SmaxValue, StructMap, TypeTag, Value, join_path,
};
use crate::Result;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// One leaf of a flattened struct: its path below the struct root and its value.
pub type FlatLeaf<'a> = (Vec<String>, &'a Value);

/// Flattens a nested struct into its leaves, in pre-order.
///
/// Nested empty structs carry no data and are skipped.
///
/// # Errors
///
/// Returns [`SmaxError::TypeMismatch`] for an empty struct or for a field name
/// that is empty or contains the path separator.
pub fn flatten(map: &StructMap) -> Result<Vec<FlatLeaf<'_>>> {
    let mut leaves = Vec::new();
    walk(map, &mut Vec::new(), &mut leaves)?;
    if leaves.is_empty() {
        return Err(SmaxError::mismatch("struct has no fields to share"));
    }
    Ok(leaves)
}

fn walk<'a>(map: &'a StructMap, path: &mut Vec<String>, out: &mut Vec<FlatLeaf<'a>>) -> Result<()> {
    for (name, value) in map {
        if name.is_empty() || name.contains(PATH_SEPARATOR) {
            return Err(SmaxError::mismatch(format!(
                "field name '{name}' must be non-empty and free of '{PATH_SEPARATOR}'"
            )));
        }
        path.push(name.clone());
        match value {
            Value::Struct(inner) if inner.is_empty() => {
                debug!("skipping empty struct at {}", path.join(":"));
            }
            Value::Struct(inner) => walk(inner, path, out)?,
            leaf => out.push((path.clone(), leaf)),
        }
        path.pop();
    }
    Ok(())
}

/// Groups flattened leaves into one multi-field update per table.
///
/// Every intermediate level is also registered in its parent table as a
/// `struct` entry whose value is the child table's full name. Tables appear in
/// first-use order and the last one carries the notify flag.
///
/// # Errors
///
/// Returns the codec error of the first leaf that fails to encode, named after
/// that leaf.
pub fn group_for_atomic_update(
    leaves: &[FlatLeaf<'_>],
    table: &str,
    key: &str,
) -> Result<Vec<TableUpdate>> {
    let root = join_path([table, key]);
    let mut groups: Vec<TableUpdate> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut registered: HashSet<String> = HashSet::new();

    let mut push = |groups: &mut Vec<TableUpdate>, parents: &[String], field: FieldUpdate| {
        let target = if parents.is_empty() {
            root.clone()
        } else {
            format!("{root}:{}", parents.join(":"))
        };
        let slot = *index.entry(target.clone()).or_insert_with(|| {
            groups.push(TableUpdate {
                table: target,
                fields: Vec::new(),
                notify: false,
            });
            groups.len() - 1
        });
        groups[slot].fields.push(field);
    };

    for (path, value) in leaves {
        let Some((leaf, parents)) = path.split_last() else {
            continue;
        };

        for depth in 0..parents.len() {
            let child = &parents[..=depth];
            let child_table = format!("{root}:{}", child.join(":"));
            if !registered.insert(child_table.clone()) {
                continue;
            }
            push(
                &mut groups,
                &parents[..depth],
                FieldUpdate {
                    field: parents[depth].clone(),
                    value: child_table,
                    type_tag: TypeTag::Struct.to_string(),
                    dim: "1".to_string(),
                },
            );
        }

        let full_name = format!("{root}:{}", path.join(":"));
        let encoded = encode(value, None).map_err(|e| e.at(&full_name))?;
        push(
            &mut groups,
            parents,
            FieldUpdate {
                field: leaf.clone(),
                value: encoded.value,
                type_tag: encoded.type_tag.to_string(),
                dim: encoded.dim.to_wire(),
            },
        );
    }

    if let Some(last) = groups.last_mut() {
        last.notify = true;
    }
    Ok(groups)
}

/// Rebuilds the tree of a struct stored at `table:key` from its dump.
///
/// The returned node is the struct itself, carrying `header` as its metadata.
/// Intermediate nodes inherit the header's timestamp, origin and serial; leaves
/// carry their own. Bookkeeping entries tagged `struct` are skipped, and an
/// existing node is never replaced.
///
/// # Errors
///
/// - the codec errors of any leaf, named after that leaf
/// - [`SmaxError::Protocol`] when a plain value sits where a struct level is expected
pub fn rebuild(dump: &StructDump, table: &str, key: &str, header: Metadata) -> Result<SmaxValue> {
    let root_name = join_path([table, key]);
    let mut root = SmaxValue::structure(Metadata {
        name: root_name.clone(),
        ..header.clone()
    });
    let prefix = format!("{root_name}:");

    for sub in &dump.tables {
        let relative = if sub.name == root_name {
            ""
        } else if let Some(rest) = sub.name.strip_prefix(&prefix) {
            rest
        } else {
            debug!("struct dump table '{}' is outside {}", sub.name, root_name);
            continue;
        };

        let mut node = &mut root;
        let mut name = root_name.clone();
        for segment in relative.split(PATH_SEPARATOR).filter(|s| !s.is_empty()) {
            name = format!("{name}:{segment}");
            let fields = node.fields_mut().ok_or_else(|| not_a_struct(&name))?;
            node = fields.entry(segment.to_string()).or_insert_with(|| {
                SmaxValue::structure(Metadata {
                    name: name.clone(),
                    timestamp: header.timestamp,
                    origin: header.origin.clone(),
                    seq: header.seq,
                    ..Metadata::default()
                })
            });
        }

        let fields = node.fields_mut().ok_or_else(|| not_a_struct(&sub.name))?;
        for (field, record) in &sub.fields {
            if record.type_tag == TypeTag::Struct.as_str() {
                continue;
            }
            if fields.contains_key(field) {
                continue;
            }
            let leaf_name = format!("{}:{field}", sub.name);
            fields.insert(field.clone(), decode_record(record, &leaf_name)?);
        }
    }
    Ok(root)
}

fn not_a_struct(name: &str) -> SmaxError {
    SmaxError::protocol(
        "struct rebuild",
        format!("'{name}' holds a value where a struct level was expected"),
    )
}
