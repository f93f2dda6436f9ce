//! JSON import and export of values and pulled trees.
//!
//! Export writes every node as `{name, type, dim, data, timestamp, origin, seq}`
//! plus any optional metadata that was fetched. Import accepts that form back
//! (casting `data` to the recorded type) as well as plain JSON, whose types are
//! inferred the same way as for native values.

use crate::codec::{decode, encode};
use crate::error::{SmaxError, UNNAMED};
use crate::types::{
    Dim, NumericArray, OPTIONAL_METADATA, Payload, Scalar, SmaxValue, StringArray, StructMap,
    TypeTag, Value,
};
use crate::Result;
use ndarray::{ArrayD, IxDyn};
use serde_json::{Map, Number, Value as Json, json};

impl Value {
    /// Builds a value from JSON, inferring its type.
    ///
    /// Integers take the smallest signed tag that holds them and other numbers
    /// become `float64`. Rectangular arrays of numbers or booleans become numeric
    /// arrays; arrays holding strings, or ragged arrays, become string arrays.
    /// Objects become structs, except objects with `data` and `type` members,
    /// which are read as exported leaves and cast to their recorded type.
    ///
    /// # Errors
    ///
    /// - [`SmaxError::TypeMismatch`] for `null`, objects inside arrays, or arrays
    ///   mixing booleans with numbers
    /// - [`SmaxError::UnknownType`] for an exported leaf with an unknown type
    /// - [`SmaxError::EncodingOverflow`] for integers beyond `int64`
    pub fn from_json(json: &Json) -> Result<Self> {
        match json {
            Json::Null => Err(SmaxError::mismatch("JSON null has no SMA-X type")),
            Json::Bool(b) => Ok(Self::from(*b)),
            Json::Number(n) => number(n),
            Json::String(s) => Ok(Self::from(s.as_str())),
            Json::Array(_) => array(json),
            Json::Object(map) if is_exported_leaf(map) => exported_leaf(map),
            Json::Object(map) => map
                .iter()
                .map(|(name, child)| Ok((name.clone(), Self::from_json(child)?)))
                .collect::<Result<StructMap>>()
                .map(Self::Struct),
        }
    }

    /// Plain JSON form of the payload, without type information.
    #[must_use]
    pub fn to_json(&self) -> Json {
        match self {
            Self::Scalar(scalar) => scalar_json(scalar),
            Self::Array(array) => nest(array.shape(), &numeric_items(array)),
            Self::Strings(strings) => {
                let items: Vec<Json> = strings.items().iter().map(|s| json!(s)).collect();
                nest(strings.shape(), &items)
            }
            Self::Struct(fields) => Json::Object(
                fields
                    .iter()
                    .map(|(name, value)| (name.clone(), value.to_json()))
                    .collect(),
            ),
        }
    }
}

impl SmaxValue {
    /// Exports this node, and for structs every node below it, with metadata.
    #[must_use]
    pub fn to_json(&self) -> Json {
        let mut out = Map::new();
        out.insert("name".into(), json!(self.meta.name));
        out.insert("type".into(), json!(self.type_tag.as_str()));
        out.insert("dim".into(), dim_json(&self.dim));
        let data = match &self.payload {
            Payload::Leaf(value) => value.to_json(),
            Payload::Struct(fields) => Json::Object(
                fields
                    .iter()
                    .map(|(name, child)| (name.clone(), child.to_json()))
                    .collect(),
            ),
        };
        out.insert("data".into(), data);
        out.insert(
            "timestamp".into(),
            self.meta.timestamp.map_or(Json::Null, |ts| json!(ts.as_secs_f64())),
        );
        out.insert("origin".into(), json!(self.meta.origin));
        out.insert("seq".into(), self.meta.seq.map_or(Json::Null, |seq| json!(seq)));
        for field in OPTIONAL_METADATA {
            if let Some(text) = self.meta.optional(field) {
                out.insert(field.into(), json!(text));
            }
        }
        Json::Object(out)
    }
}

// ============================================================================
// Import
// ============================================================================

fn int_of(n: &Number) -> Option<i128> {
    n.as_i64()
        .map(i128::from)
        .or_else(|| n.as_u64().map(i128::from))
}

fn number(n: &Number) -> Result<Value> {
    if let Some(i) = int_of(n) {
        return Value::integer(i);
    }
    n.as_f64()
        .map(Value::from)
        .ok_or_else(|| SmaxError::mismatch(format!("unrepresentable number {n}")))
}

/// Row-major extents of a rectangular nested array; `None` when ragged.
fn shape_of(json: &Json) -> Option<Vec<usize>> {
    let Json::Array(items) = json else {
        return Some(Vec::new());
    };
    let Some(first) = items.first() else {
        return Some(vec![0]);
    };
    let inner = shape_of(first)?;
    for item in &items[1..] {
        if shape_of(item)? != inner {
            return None;
        }
    }
    let mut shape = vec![items.len()];
    shape.extend(inner);
    Some(shape)
}

fn collect_leaves<'a>(json: &'a Json, out: &mut Vec<&'a Json>) {
    match json {
        Json::Array(items) => items.iter().for_each(|item| collect_leaves(item, out)),
        leaf => out.push(leaf),
    }
}

fn array(json: &Json) -> Result<Value> {
    let shape = shape_of(json);
    let mut leaves = Vec::new();
    collect_leaves(json, &mut leaves);

    if leaves.iter().any(|leaf| matches!(leaf, Json::Object(_) | Json::Null)) {
        return Err(SmaxError::mismatch(
            "arrays may hold only numbers, booleans or strings",
        ));
    }
    let has_text = leaves.iter().any(|leaf| leaf.is_string());
    let bools = leaves.iter().filter(|leaf| leaf.is_boolean()).count();

    let Some(shape) = shape.filter(|_| !has_text) else {
        return Ok(Value::Strings(strings(&leaves, shape_of(json))));
    };

    if bools == leaves.len() && bools > 0 {
        let items: Vec<bool> = leaves.iter().filter_map(|leaf| leaf.as_bool()).collect();
        return build(&shape, items).map(NumericArray::Boolean).map(Value::Array);
    }
    if bools > 0 {
        return Err(SmaxError::mismatch("array mixes booleans and numbers"));
    }

    let ints: Option<Vec<i128>> = leaves
        .iter()
        .map(|leaf| leaf.as_number().and_then(int_of))
        .collect();
    if let Some(ints) = ints.filter(|ints| !ints.is_empty()) {
        return Value::integers(&ints, &shape);
    }
    let floats: Vec<f64> = leaves.iter().filter_map(|leaf| leaf.as_f64()).collect();
    build(&shape, floats).map(NumericArray::Float64).map(Value::Array)
}

fn build<T>(shape: &[usize], items: Vec<T>) -> Result<ArrayD<T>> {
    ArrayD::from_shape_vec(IxDyn(shape), items)
        .map_err(|e| SmaxError::mismatch(format!("shape {shape:?} does not fit: {e}")))
}

fn strings(leaves: &[&Json], shape: Option<Vec<usize>>) -> StringArray {
    let items: Vec<String> = leaves
        .iter()
        .map(|leaf| match leaf {
            Json::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect();
    match shape {
        Some(shape) => StringArray::with_shape(items.clone(), shape)
            .unwrap_or_else(|| StringArray::new(items)),
        None => StringArray::new(items),
    }
}

fn is_exported_leaf(map: &Map<String, Json>) -> bool {
    map.contains_key("data") && map.get("type").is_some_and(Json::is_string)
}

fn exported_leaf(map: &Map<String, Json>) -> Result<Value> {
    let name = map.get("name").and_then(Json::as_str).unwrap_or(UNNAMED);
    let type_name = map.get("type").and_then(Json::as_str).unwrap_or_default();
    let tag = TypeTag::lookup(type_name).map_err(|e| e.at(name))?;
    let data = map.get("data").unwrap_or(&Json::Null);

    if tag == TypeTag::Struct {
        let Json::Object(fields) = data else {
            return Err(SmaxError::mismatch("struct data must be an object").at(name));
        };
        return fields
            .iter()
            .map(|(field, child)| Ok((field.clone(), Value::from_json(child)?)))
            .collect::<Result<StructMap>>()
            .map(Value::Struct);
    }

    let inner = Value::from_json(data).map_err(|e| e.at(name))?;
    if inner.type_tag() == tag {
        return Ok(inner);
    }
    let encoded = encode(&inner, Some(tag)).map_err(|e| e.at(name))?;
    decode(encoded.value.as_bytes(), encoded.type_tag, &encoded.dim).map_err(|e| e.at(name))
}

// ============================================================================
// Export
// ============================================================================

fn scalar_json(scalar: &Scalar) -> Json {
    match scalar {
        Scalar::Int8(v) => json!(v),
        Scalar::Int16(v) => json!(v),
        Scalar::Int32(v) => json!(v),
        Scalar::Int64(v) => json!(v),
        Scalar::Float32(v) => json!(f64::from(*v)),
        Scalar::Float64(v) => json!(v),
        Scalar::Boolean(v) => json!(v),
        Scalar::String(v) => json!(v),
        Scalar::Raw(v) => json!(String::from_utf8_lossy(v)),
    }
}

fn numeric_items(array: &NumericArray) -> Vec<Json> {
    match array {
        NumericArray::Int8(a) => a.iter().map(|v| json!(v)).collect(),
        NumericArray::Int16(a) => a.iter().map(|v| json!(v)).collect(),
        NumericArray::Int32(a) => a.iter().map(|v| json!(v)).collect(),
        NumericArray::Int64(a) => a.iter().map(|v| json!(v)).collect(),
        NumericArray::Float32(a) => a.iter().map(|v| json!(f64::from(*v))).collect(),
        NumericArray::Float64(a) => a.iter().map(|v| json!(v)).collect(),
        NumericArray::Boolean(a) => a.iter().map(|v| json!(v)).collect(),
    }
}

/// Folds row-major items into nested arrays following `shape`.
fn nest(shape: &[usize], items: &[Json]) -> Json {
    match shape {
        [] | [_] => Json::Array(items.to_vec()),
        [outer, rest @ ..] => {
            let chunk: usize = rest.iter().product();
            if chunk == 0 {
                return Json::Array((0..*outer).map(|_| nest(rest, &[])).collect());
            }
            Json::Array(items.chunks(chunk).map(|part| nest(rest, part)).collect())
        }
    }
}

fn dim_json(dim: &Dim) -> Json {
    match dim {
        Dim::Scalar => json!(1),
        Dim::Vector(n) => json!(n),
        Dim::Shape(extents) => json!(extents),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Metadata, Timestamp};
    use ndarray::array;

    #[test]
    fn numbers_take_smallest_int_or_float64() -> Result<()> {
        assert_eq!(Value::from_json(&json!(100))?.type_tag(), TypeTag::Int8);
        assert_eq!(Value::from_json(&json!(128))?.type_tag(), TypeTag::Int16);
        assert_eq!(Value::from_json(&json!(1_i64 << 40))?.type_tag(), TypeTag::Int64);
        assert_eq!(Value::from_json(&json!(2.5))?, Value::from(2.5_f64));
        assert!(matches!(
            Value::from_json(&json!(u64::MAX)),
            Err(SmaxError::EncodingOverflow { .. })
        ));
        Ok(())
    }

    #[test]
    fn nested_arrays_keep_their_shape() -> Result<()> {
        let value = Value::from_json(&json!([
            [0.0, 1.1],
            [1.12345, 2.123456],
            [-1.654321, -1.54321]
        ]))?;
        assert_eq!(value.dim(), Dim::Shape(vec![3, 2]));
        let expected = array![[0.0, 1.1], [1.12345, 2.123456], [-1.654321, -1.54321]];
        assert_eq!(value, Value::from(expected));

        let ints = Value::from_json(&json!([1, 2, 300]))?;
        assert_eq!(ints.type_tag(), TypeTag::Int16);
        assert_eq!(ints.dim(), Dim::Vector(3));
        Ok(())
    }

    #[test]
    fn strings_and_ragged_arrays_become_string_arrays() -> Result<()> {
        let words = Value::from_json(&json!(["i", "am", "list"]))?;
        assert_eq!(words, Value::from(vec!["i", "am", "list"]));

        let ragged = Value::from_json(&json!([[1, 2], [3]]))?;
        assert_eq!(ragged.type_tag(), TypeTag::String);
        assert_eq!(ragged.as_strings().map(StringArray::len), Some(3));
        Ok(())
    }

    #[test]
    fn unsafe_mixtures_are_rejected() {
        assert!(Value::from_json(&json!([true, 1])).is_err());
        assert!(Value::from_json(&json!([{"a": 1}])).is_err());
        assert!(Value::from_json(&Json::Null).is_err());
    }

    #[test]
    fn objects_become_structs() -> Result<()> {
        let value = Value::from_json(&json!({"roach2-03": {"temp": 100, "firmware": 2.0}}))?;
        let expected = Value::structure().with_field(
            "roach2-03",
            Value::structure().with_field("temp", 100_i8).with_field("firmware", 2.0_f64),
        );
        assert_eq!(value, expected);
        Ok(())
    }

    #[test]
    fn exported_leaves_are_cast_to_their_type() -> Result<()> {
        let value = Value::from_json(&json!({"data": 7, "type": "int32", "dim": 1}))?;
        assert_eq!(value, Value::from(7_i32));

        let single = Value::from_json(&json!({"data": [1.5, 2.5], "type": "float32"}))?;
        assert_eq!(single.type_tag(), TypeTag::Float32);

        let unknown = Value::from_json(&json!({"name": "a:b", "data": 1, "type": "quaternion"}));
        assert!(matches!(unknown, Err(SmaxError::UnknownType { name, .. }) if name == "a:b"));
        Ok(())
    }

    #[test]
    fn tree_export_round_trips_through_import() -> Result<()> {
        let meta = |name: &str| Metadata {
            name: name.into(),
            timestamp: Some(Timestamp::from_micros(1_500_000)),
            origin: "host:prog".into(),
            seq: Some(2),
            ..Metadata::default()
        };
        let mut root = SmaxValue::structure(meta("t:k"));
        if let Some(fields) = root.fields_mut() {
            fields.insert(
                "temp".into(),
                SmaxValue::leaf(Value::from(100_i16), TypeTag::Int16, Dim::Scalar, meta("t:k:temp")),
            );
        }

        let exported = root.to_json();
        assert_eq!(exported["type"], json!("struct"));
        assert_eq!(exported["data"]["temp"]["name"], json!("t:k:temp"));
        assert_eq!(exported["data"]["temp"]["timestamp"], json!(1.5));
        assert_eq!(exported["data"]["temp"]["data"], json!(100));

        let imported = Value::from_json(&exported)?;
        assert_eq!(imported, root.to_value());
        Ok(())
    }

    #[test]
    fn export_nests_arrays_by_shape() {
        let value = Value::from(array![[1_i8, 2, 3], [4, 5, 6]]);
        assert_eq!(value.to_json(), json!([[1, 2, 3], [4, 5, 6]]));
        let strings = StringArray::with_shape(
            vec!["a".into(), "b".into(), "c".into(), "d".into()],
            vec![2, 2],
        );
        assert_eq!(
            strings.map(|s| Value::from(s).to_json()),
            Some(json!([["a", "b"], ["c", "d"]]))
        );
    }
}
