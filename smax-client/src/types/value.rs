//! The closed set of value kinds the codec understands.

use crate::error::SmaxError;
use crate::types::{ArrayElement, Dim, NumericArray, Scalar, StringArray, TypeTag};
use ndarray::{Array, Array1, ArrayD, Dimension, IxDyn};
use std::collections::BTreeMap;

/// A nested mapping of field name to value.
pub type StructMap = BTreeMap<String, Value>;

/// A value to share, or the payload of a pulled leaf.
///
/// Every encode path is chosen once by matching on this union.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(Scalar),
    Array(NumericArray),
    Strings(StringArray),
    Struct(StructMap),
}

impl Value {
    /// An integer whose tag is inferred as the smallest signed type holding it.
    ///
    /// # Errors
    ///
    /// Returns [`SmaxError::EncodingOverflow`] beyond the `int64` range.
    pub fn integer(value: i128) -> Result<Self, SmaxError> {
        let tag = TypeTag::smallest_int_for(value, value, TypeTag::Int8)
            .ok_or_else(|| SmaxError::overflow(TypeTag::Int64, value))?;
        Ok(Self::Scalar(int_scalar(tag, value)))
    }

    /// Integers in row-major order with a shape; the element tag is chosen by the
    /// largest magnitude present.
    ///
    /// # Errors
    ///
    /// Returns [`SmaxError::EncodingOverflow`] beyond the `int64` range and
    /// [`SmaxError::TypeMismatch`] when the shape does not match the element count.
    pub fn integers(values: &[i128], shape: &[usize]) -> Result<Self, SmaxError> {
        let min = values.iter().copied().min().unwrap_or(0);
        let max = values.iter().copied().max().unwrap_or(0);
        let extreme = if min.unsigned_abs() > max.unsigned_abs() { min } else { max };
        let tag = TypeTag::smallest_int_for(min, max, TypeTag::Int8)
            .ok_or_else(|| SmaxError::overflow(TypeTag::Int64, extreme))?;
        let array = int_array(tag, values, shape)?;
        Ok(Self::Array(array))
    }

    /// A raw byte payload.
    #[must_use]
    pub fn raw(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Scalar(Scalar::Raw(bytes.into()))
    }

    /// An empty struct, to be filled with [`Self::with_field`].
    #[must_use]
    pub fn structure() -> Self {
        Self::Struct(StructMap::new())
    }

    /// Builder-style field insertion; a non-struct receiver is replaced by a struct.
    #[must_use]
    pub fn with_field(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut map = match self {
            Self::Struct(map) => map,
            _ => StructMap::new(),
        };
        map.insert(name.into(), value.into());
        Self::Struct(map)
    }

    /// The tag this value is shared with when no tag is requested.
    #[must_use]
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Self::Scalar(s) => s.type_tag(),
            Self::Array(a) => a.type_tag(),
            Self::Strings(_) => TypeTag::String,
            Self::Struct(_) => TypeTag::Struct,
        }
    }

    /// The dimension descriptor of this value.
    #[must_use]
    pub fn dim(&self) -> Dim {
        match self {
            Self::Scalar(_) | Self::Struct(_) => Dim::Scalar,
            Self::Array(a) => a.dim(),
            Self::Strings(s) => s.dim(),
        }
    }

    #[must_use]
    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Self::Scalar(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&NumericArray> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_strings(&self) -> Option<&StringArray> {
        match self {
            Self::Strings(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_struct(&self) -> Option<&StructMap> {
        match self {
            Self::Struct(m) => Some(m),
            _ => None,
        }
    }

    /// Shorthand for a scalar's integer view.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        self.as_scalar().and_then(Scalar::as_i64)
    }

    /// Shorthand for a scalar's floating view.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        self.as_scalar().and_then(Scalar::as_f64)
    }

    /// Shorthand for a scalar's boolean payload.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        self.as_scalar().and_then(Scalar::as_bool)
    }

    /// Shorthand for a scalar's string payload.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        self.as_scalar().and_then(Scalar::as_str)
    }
}

#[allow(clippy::cast_possible_truncation)]
pub(crate) fn int_scalar(tag: TypeTag, value: i128) -> Scalar {
    // Callers have already checked that `tag` holds `value`.
    match tag {
        TypeTag::Int8 => Scalar::Int8(value as i8),
        TypeTag::Int16 => Scalar::Int16(value as i16),
        TypeTag::Int32 => Scalar::Int32(value as i32),
        _ => Scalar::Int64(value as i64),
    }
}

#[allow(clippy::cast_possible_truncation)]
pub(crate) fn int_array(
    tag: TypeTag,
    values: &[i128],
    shape: &[usize],
) -> Result<NumericArray, SmaxError> {
    fn build<T>(shape: &[usize], items: Vec<T>) -> Result<ArrayD<T>, SmaxError> {
        ArrayD::from_shape_vec(IxDyn(shape), items)
            .map_err(|e| SmaxError::mismatch(format!("shape {shape:?} does not fit: {e}")))
    }
    Ok(match tag {
        TypeTag::Int8 => NumericArray::Int8(build(shape, values.iter().map(|v| *v as i8).collect())?),
        TypeTag::Int16 => {
            NumericArray::Int16(build(shape, values.iter().map(|v| *v as i16).collect())?)
        }
        TypeTag::Int32 => {
            NumericArray::Int32(build(shape, values.iter().map(|v| *v as i32).collect())?)
        }
        _ => NumericArray::Int64(build(shape, values.iter().map(|v| *v as i64).collect())?),
    })
}

macro_rules! value_from_scalar {
    ($($ty:ty),* $(,)?) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Self::Scalar(Scalar::from(v))
            }
        })*
    };
}

value_from_scalar!(i8, i16, i32, i64, f32, f64, bool, String, &str);

macro_rules! value_from_unsigned {
    ($($ty:ty),* $(,)?) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                let wide = i128::from(v);
                let tag = TypeTag::smallest_int_for(wide, wide, TypeTag::Int8)
                    .unwrap_or(TypeTag::Int64);
                Self::Scalar(int_scalar(tag, wide))
            }
        })*
    };
}

// Unsigned types have no tag of their own; they take the smallest signed tag.
value_from_unsigned!(u8, u16, u32);

macro_rules! value_from_vec {
    ($($ty:ty),* $(,)?) => {
        $(impl From<Vec<$ty>> for Value {
            fn from(v: Vec<$ty>) -> Self {
                Self::Array(<$ty as ArrayElement>::wrap(Array1::from_vec(v).into_dyn()))
            }
        })*
    };
}

value_from_vec!(i8, i16, i32, i64, f32, f64, bool);

impl<T: ArrayElement, D: Dimension> From<Array<T, D>> for Value {
    fn from(array: Array<T, D>) -> Self {
        Self::Array(T::wrap(array.into_dyn()))
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Self::Strings(StringArray::new(v))
    }
}

impl From<Vec<&str>> for Value {
    fn from(v: Vec<&str>) -> Self {
        Self::Strings(StringArray::new(v))
    }
}

impl From<Scalar> for Value {
    fn from(v: Scalar) -> Self {
        Self::Scalar(v)
    }
}

impl From<NumericArray> for Value {
    fn from(v: NumericArray) -> Self {
        Self::Array(v)
    }
}

impl From<StringArray> for Value {
    fn from(v: StringArray) -> Self {
        Self::Strings(v)
    }
}

impl From<StructMap> for Value {
    fn from(v: StructMap) -> Self {
        Self::Struct(v)
    }
}
