//! Wire triples back to native values.

use crate::codec::text::{parse_bool, split_strings};
use crate::error::SmaxError;
use crate::store::RawRecord;
use crate::types::value::{int_array, int_scalar};
use crate::types::{
    Dim, Family, Metadata, NumericArray, Scalar, SmaxValue, StringArray, Timestamp, TypeTag, Value,
};
use crate::Result;
use ndarray::{ArrayD, IxDyn};
use tracing::debug;

/// Decodes a stored value given its tag and dimension.
///
/// # Errors
///
/// - [`SmaxError::TypeMismatch`] when an element does not parse as the tag
/// - [`SmaxError::EncodingOverflow`] when an integer exceeds its tag
/// - [`SmaxError::Protocol`] when the element count contradicts the dimension
pub fn decode(bytes: &[u8], tag: TypeTag, dim: &Dim) -> Result<Value> {
    match tag {
        TypeTag::Struct => {
            return Err(SmaxError::mismatch(
                "struct entries are rebuilt from the struct dump, not decoded",
            ));
        }
        TypeTag::Raw => return Ok(Value::raw(bytes.to_vec())),
        _ => {}
    }

    let text = String::from_utf8_lossy(bytes);
    let empty = dim.element_count() == 0 || (text.is_empty() && tag != TypeTag::String);

    if tag == TypeTag::String {
        if dim.is_scalar() {
            return Ok(Value::Scalar(Scalar::String(text.into_owned())));
        }
        if empty {
            let strings = StringArray::with_shape(Vec::new(), empty_shape(dim))
                .unwrap_or_else(|| StringArray::new(Vec::<String>::new()));
            return Ok(Value::Strings(strings));
        }
        let items = split_strings(&text);
        let shape = dim.shape();
        return Ok(Value::Strings(
            match StringArray::with_shape(items.clone(), shape) {
                Some(strings) => strings,
                None => {
                    debug!("string array does not fill dimension {}, keeping it flat", dim);
                    StringArray::new(items)
                }
            },
        ));
    }

    if empty {
        return empty_array(tag, &empty_shape(dim));
    }

    if dim.is_scalar() {
        return decode_scalar(text.trim(), tag).map(Value::Scalar);
    }

    let items: Vec<&str> = text.split_whitespace().collect();
    if items.len() != dim.element_count() {
        return Err(SmaxError::protocol(
            "array decode",
            format!(
                "dimension {} needs {} elements, value holds {}",
                dim,
                dim.element_count(),
                items.len()
            ),
        ));
    }
    decode_array(&items, tag, &dim.shape()).map(Value::Array)
}

fn decode_scalar(text: &str, tag: TypeTag) -> Result<Scalar> {
    Ok(match tag {
        TypeTag::Boolean => Scalar::Boolean(parse_bool(text)),
        TypeTag::Float32 => Scalar::Float32(parse_f32(text)?),
        TypeTag::Float64 => Scalar::Float64(parse_f64(text)?),
        int => int_scalar(int, parse_int(text, int)?),
    })
}

fn parse_f64(text: &str) -> Result<f64> {
    text.parse()
        .map_err(|_| SmaxError::mismatch(format!("'{text}' is not a valid float64")))
}

fn parse_f32(text: &str) -> Result<f32> {
    text.parse()
        .map_err(|_| SmaxError::mismatch(format!("'{text}' is not a valid float32")))
}

/// Parses an integer element, accepting float text by truncation.
#[allow(clippy::cast_possible_truncation)]
fn parse_int(text: &str, tag: TypeTag) -> Result<i128> {
    let value = match text.parse::<i128>() {
        Ok(v) => v,
        Err(_) => {
            let number: f64 = text
                .parse()
                .map_err(|_| SmaxError::mismatch(format!("'{text}' is not a valid {tag}")))?;
            if !number.is_finite() {
                return Err(SmaxError::overflow(tag, text));
            }
            number.trunc() as i128
        }
    };
    if !tag.holds_int(value) {
        return Err(SmaxError::overflow(tag, text));
    }
    Ok(value)
}

fn build<T>(shape: &[usize], items: Vec<T>) -> Result<ArrayD<T>> {
    ArrayD::from_shape_vec(IxDyn(shape), items)
        .map_err(|e| SmaxError::protocol("array decode", e.to_string()))
}

fn decode_array(items: &[&str], tag: TypeTag, shape: &[usize]) -> Result<NumericArray> {
    match tag.family() {
        Some(Family::Integer) => {
            let values = items
                .iter()
                .map(|item| parse_int(item, tag))
                .collect::<Result<Vec<_>>>()?;
            int_array(tag, &values, shape)
        }
        Some(Family::Float) if tag == TypeTag::Float32 => {
            let values = items.iter().map(|item| parse_f32(item)).collect::<Result<Vec<_>>>()?;
            Ok(NumericArray::Float32(build(shape, values)?))
        }
        Some(Family::Float) => {
            let values = items.iter().map(|item| parse_f64(item)).collect::<Result<Vec<_>>>()?;
            Ok(NumericArray::Float64(build(shape, values)?))
        }
        None => {
            let values: Vec<bool> = items.iter().map(|item| parse_bool(item)).collect();
            Ok(NumericArray::Boolean(build(shape, values)?))
        }
    }
}

/// Extents of an empty value: the dimension's own when it holds no elements.
fn empty_shape(dim: &Dim) -> Vec<usize> {
    if dim.element_count() == 0 && !dim.is_scalar() {
        dim.shape()
    } else {
        vec![0]
    }
}

fn empty_array(tag: TypeTag, shape: &[usize]) -> Result<Value> {
    Ok(Value::Array(match tag {
        TypeTag::Float32 => NumericArray::Float32(build(shape, Vec::new())?),
        TypeTag::Float64 => NumericArray::Float64(build(shape, Vec::new())?),
        TypeTag::Boolean => NumericArray::Boolean(build(shape, Vec::new())?),
        int => int_array(int, &[], shape)?,
    }))
}

/// Decodes one stored record, naming it `name` in its metadata and in any error.
///
/// Unknown tags are decoded as strings with a warning.
///
/// # Errors
///
/// Returns the codec errors of [`decode`], and [`SmaxError::Protocol`] for a
/// malformed dimension.
pub fn decode_record(record: &RawRecord, name: &str) -> Result<SmaxValue> {
    let tag = TypeTag::lookup_lenient(&record.type_tag);
    let dim = Dim::parse(&record.dim).map_err(|e| e.at(name))?;
    let value = decode(&record.value, tag, &dim).map_err(|e| e.with_tag(tag).at(name))?;
    Ok(SmaxValue::leaf(value, tag, dim, record_meta(record, name)))
}

/// Metadata carried by a stored record.
pub(crate) fn record_meta(record: &RawRecord, name: &str) -> Metadata {
    Metadata {
        name: name.to_string(),
        timestamp: Timestamp::parse_wire(&record.timestamp),
        origin: record.origin.clone(),
        seq: record.serial.trim().parse().ok(),
        ..Metadata::default()
    }
}
