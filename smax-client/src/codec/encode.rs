//! Native values to wire triples.

use crate::codec::Encoded;
use crate::codec::text::{format_bool, format_f32, format_f64, join_strings, parse_bool};
use crate::error::SmaxError;
use crate::types::{Dim, Family, NumericArray, Scalar, TypeTag, Value};
use crate::Result;
use tracing::{info, warn};

/// Encodes a value for the store.
///
/// Without a requested tag the tag follows the value's own variant. With one,
/// the value is cast to it: integer tags that cannot hold the value are
/// promoted to the smallest wider integer tag, `float32` overflow is promoted
/// to `float64`, and float to integer casts truncate.
///
/// # Errors
///
/// - [`SmaxError::TypeMismatch`] for structs, raw arrays and uncastable text
/// - [`SmaxError::EncodingOverflow`] when no tag of the family can hold a value
pub fn encode(value: &Value, requested: Option<TypeTag>) -> Result<Encoded> {
    if let Value::Struct(_) = value {
        let err = SmaxError::mismatch("structs are shared field by field, not as a single value");
        return Err(match requested {
            Some(tag) => err.with_tag(tag),
            None => err,
        });
    }
    match requested {
        None => Ok(encode_native(value)),
        Some(tag) if tag == value.type_tag() => Ok(encode_native(value)),
        Some(tag) => encode_as(value, tag).map_err(|e| e.with_tag(tag)),
    }
}

fn encode_native(value: &Value) -> Encoded {
    match value {
        Value::Scalar(scalar) => Encoded {
            value: scalar_text(scalar),
            type_tag: scalar.type_tag(),
            dim: Dim::Scalar,
        },
        Value::Array(array) => Encoded {
            value: array_text(array),
            type_tag: array.type_tag(),
            dim: array.dim(),
        },
        Value::Strings(strings) => Encoded {
            value: join_strings(strings.items().iter().map(String::as_str)),
            type_tag: TypeTag::String,
            dim: strings.dim(),
        },
        // Rejected by `encode` before dispatch.
        Value::Struct(_) => Encoded {
            value: String::new(),
            type_tag: TypeTag::Struct,
            dim: Dim::Scalar,
        },
    }
}

fn scalar_text(scalar: &Scalar) -> String {
    match scalar {
        Scalar::Int8(v) => v.to_string(),
        Scalar::Int16(v) => v.to_string(),
        Scalar::Int32(v) => v.to_string(),
        Scalar::Int64(v) => v.to_string(),
        Scalar::Float32(v) => format_f32(*v),
        Scalar::Float64(v) => format_f64(*v),
        Scalar::Boolean(v) => format_bool(*v).to_string(),
        Scalar::String(v) => v.clone(),
        Scalar::Raw(bytes) => raw_text(bytes),
    }
}

fn raw_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(e) => {
            warn!("raw payload is not valid UTF-8 ({}), storing lossily", e);
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

fn array_text(array: &NumericArray) -> String {
    let items: Vec<String> = match array {
        NumericArray::Int8(a) => a.iter().map(ToString::to_string).collect(),
        NumericArray::Int16(a) => a.iter().map(ToString::to_string).collect(),
        NumericArray::Int32(a) => a.iter().map(ToString::to_string).collect(),
        NumericArray::Int64(a) => a.iter().map(ToString::to_string).collect(),
        NumericArray::Float32(a) => a.iter().map(|v| format_f32(*v)).collect(),
        NumericArray::Float64(a) => a.iter().map(|v| format_f64(*v)).collect(),
        NumericArray::Boolean(a) => a.iter().map(|v| format_bool(*v).to_string()).collect(),
    };
    items.join(" ")
}

// ============================================================================
// Casting to a requested tag
// ============================================================================

/// One element on its way to a requested tag.
#[derive(Debug, Clone)]
enum Elem {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl Elem {
    fn render(&self) -> String {
        match self {
            Self::Int(v) => v.to_string(),
            Self::Float(v) => format_f64(*v),
            Self::Bool(v) => v.to_string(),
            Self::Text(v) => v.clone(),
        }
    }
}

fn scalar_elem(scalar: &Scalar) -> Elem {
    match scalar {
        Scalar::Float32(v) => Elem::Float(f64::from(*v)),
        Scalar::Float64(v) => Elem::Float(*v),
        Scalar::Boolean(v) => Elem::Bool(*v),
        Scalar::String(v) => Elem::Text(v.clone()),
        Scalar::Raw(bytes) => Elem::Text(raw_text(bytes)),
        other => Elem::Int(other.as_i64().unwrap_or_default()),
    }
}

fn array_elems(array: &NumericArray) -> Vec<Elem> {
    match array {
        NumericArray::Int8(a) => a.iter().map(|v| Elem::Int(i64::from(*v))).collect(),
        NumericArray::Int16(a) => a.iter().map(|v| Elem::Int(i64::from(*v))).collect(),
        NumericArray::Int32(a) => a.iter().map(|v| Elem::Int(i64::from(*v))).collect(),
        NumericArray::Int64(a) => a.iter().map(|v| Elem::Int(*v)).collect(),
        NumericArray::Float32(a) => a.iter().map(|v| Elem::Float(f64::from(*v))).collect(),
        NumericArray::Float64(a) => a.iter().map(|v| Elem::Float(*v)).collect(),
        NumericArray::Boolean(a) => a.iter().map(|v| Elem::Bool(*v)).collect(),
    }
}

fn encode_as(value: &Value, tag: TypeTag) -> Result<Encoded> {
    let (elems, dim, scalar) = match value {
        Value::Scalar(s) => (vec![scalar_elem(s)], Dim::Scalar, true),
        Value::Array(a) => (array_elems(a), a.dim(), false),
        Value::Strings(s) => (
            s.items().iter().cloned().map(Elem::Text).collect(),
            s.dim(),
            false,
        ),
        Value::Struct(_) => return Err(SmaxError::mismatch("cannot cast a struct")),
    };

    let (type_tag, items) = match tag {
        TypeTag::Struct => {
            return Err(SmaxError::mismatch("values cannot be shared as struct"));
        }
        TypeTag::Raw => {
            if !scalar {
                return Err(SmaxError::mismatch("raw payloads cannot be arrays"));
            }
            (TypeTag::Raw, elems.iter().map(Elem::render).collect())
        }
        TypeTag::String => (TypeTag::String, elems.iter().map(Elem::render).collect()),
        TypeTag::Boolean => (
            TypeTag::Boolean,
            elems
                .iter()
                .map(|e| format_bool(elem_to_bool(e)).to_string())
                .collect(),
        ),
        numeric => match numeric.family() {
            Some(Family::Integer) => cast_integers(&elems, numeric)?,
            _ => cast_floats(&elems, numeric)?,
        },
    };

    let value = if type_tag == TypeTag::String && !scalar {
        join_strings(items.iter().map(String::as_str))
    } else {
        items.join(" ")
    };
    Ok(Encoded {
        value,
        type_tag,
        dim,
    })
}

fn elem_to_bool(elem: &Elem) -> bool {
    match elem {
        Elem::Int(v) => *v != 0,
        Elem::Float(v) => v.trunc() != 0.0,
        Elem::Bool(v) => *v,
        Elem::Text(v) => parse_bool(v),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn float_to_int(value: f64) -> Result<i128> {
    let truncated = value.trunc();
    if value.is_nan() || truncated < i64::MIN as f64 || truncated >= i64::MAX as f64 {
        return Err(SmaxError::overflow(TypeTag::Int64, format_f64(value)));
    }
    Ok(truncated as i128)
}

fn parse_float(text: &str) -> Result<f64> {
    let trimmed = text.trim();
    let number: f64 = trimmed
        .parse()
        .map_err(|_| SmaxError::mismatch(format!("'{text}' is not a number")))?;
    let spelled_infinite = trimmed
        .trim_start_matches(['+', '-'])
        .to_ascii_lowercase()
        .starts_with("inf");
    if number.is_infinite() && !spelled_infinite {
        return Err(SmaxError::overflow(TypeTag::Float64, trimmed));
    }
    Ok(number)
}

fn cast_integers(elems: &[Elem], requested: TypeTag) -> Result<(TypeTag, Vec<String>)> {
    let mut narrowed = false;
    let values = elems
        .iter()
        .map(|elem| match elem {
            Elem::Int(v) => Ok(i128::from(*v)),
            Elem::Bool(v) => Ok(i128::from(*v)),
            Elem::Float(v) => {
                narrowed = true;
                float_to_int(*v)
            }
            Elem::Text(text) => match text.trim().parse::<i64>() {
                Ok(v) => Ok(i128::from(v)),
                Err(_) => {
                    narrowed = true;
                    parse_float(text).and_then(float_to_int)
                }
            },
        })
        .collect::<Result<Vec<i128>>>()?;

    if narrowed {
        info!("casting floating values to {} truncates their fraction", requested);
    }

    let min = values.iter().copied().min().unwrap_or(0);
    let max = values.iter().copied().max().unwrap_or(0);
    let tag = TypeTag::smallest_int_for(min, max, requested)
        .ok_or_else(|| SmaxError::overflow(TypeTag::Int64, if min < 0 { min } else { max }))?;
    if tag != requested {
        warn!(
            "values in {}..={} do not fit {}, promoting to {}",
            min, max, requested, tag
        );
    }
    Ok((tag, values.iter().map(ToString::to_string).collect()))
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn cast_floats(elems: &[Elem], requested: TypeTag) -> Result<(TypeTag, Vec<String>)> {
    let values = elems
        .iter()
        .map(|elem| match elem {
            Elem::Int(v) => Ok(*v as f64),
            Elem::Float(v) => Ok(*v),
            Elem::Bool(v) => Ok(if *v { 1.0 } else { 0.0 }),
            Elem::Text(text) => parse_float(text),
        })
        .collect::<Result<Vec<f64>>>()?;

    if requested == TypeTag::Float32 {
        let overflows = values
            .iter()
            .any(|v| v.is_finite() && (*v as f32).is_infinite());
        if !overflows {
            return Ok((
                TypeTag::Float32,
                values.iter().map(|v| format_f32(*v as f32)).collect(),
            ));
        }
        warn!("values exceed the float32 range, promoting to float64");
    }
    Ok((TypeTag::Float64, values.iter().map(|v| format_f64(*v)).collect()))
}
