//! Single typed values.

use crate::types::TypeTag;
use std::fmt;

/// One value of a fixed SMA-X type.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Boolean(bool),
    String(String),
    Raw(Vec<u8>),
}

impl Scalar {
    /// The tag this scalar is shared with.
    #[must_use]
    pub const fn type_tag(&self) -> TypeTag {
        match self {
            Self::Int8(_) => TypeTag::Int8,
            Self::Int16(_) => TypeTag::Int16,
            Self::Int32(_) => TypeTag::Int32,
            Self::Int64(_) => TypeTag::Int64,
            Self::Float32(_) => TypeTag::Float32,
            Self::Float64(_) => TypeTag::Float64,
            Self::Boolean(_) => TypeTag::Boolean,
            Self::String(_) => TypeTag::String,
            Self::Raw(_) => TypeTag::Raw,
        }
    }

    /// Integer view of integer and boolean scalars.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int8(v) => Some(i64::from(*v)),
            Self::Int16(v) => Some(i64::from(*v)),
            Self::Int32(v) => Some(i64::from(*v)),
            Self::Int64(v) => Some(*v),
            Self::Boolean(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    /// Floating view of any numeric scalar.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float32(v) => Some(f64::from(*v)),
            Self::Float64(v) => Some(*v),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    /// Returns the boolean payload.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the string payload.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Returns the raw byte payload.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Raw(v) => Some(v.as_slice()),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int8(v) => write!(f, "{v}"),
            Self::Int16(v) => write!(f, "{v}"),
            Self::Int32(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float32(v) => write!(f, "{v:?}"),
            Self::Float64(v) => write!(f, "{v:?}"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::String(v) => f.write_str(v),
            Self::Raw(v) => f.write_str(&String::from_utf8_lossy(v)),
        }
    }
}

macro_rules! scalar_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for Scalar {
            fn from(v: $ty) -> Self {
                Self::$variant(v)
            }
        })*
    };
}

scalar_from! {
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    f32 => Float32,
    f64 => Float64,
    bool => Boolean,
    String => String,
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_follow_variants() {
        assert_eq!(Scalar::from(3_i8).type_tag(), TypeTag::Int8);
        assert_eq!(Scalar::from(3_i64).type_tag(), TypeTag::Int64);
        assert_eq!(Scalar::from(1.5_f32).type_tag(), TypeTag::Float32);
        assert_eq!(Scalar::from("x").type_tag(), TypeTag::String);
        assert_eq!(Scalar::Raw(vec![1, 2]).type_tag(), TypeTag::Raw);
    }

    #[test]
    fn numeric_views() {
        assert_eq!(Scalar::Int16(-5).as_i64(), Some(-5));
        assert_eq!(Scalar::Boolean(true).as_i64(), Some(1));
        assert_eq!(Scalar::Int32(7).as_f64(), Some(7.0));
        assert_eq!(Scalar::Float32(0.5).as_f64(), Some(0.5));
        assert_eq!(Scalar::from("7").as_i64(), None);
    }

    #[test]
    fn display_keeps_float_marker() {
        assert_eq!(Scalar::Float64(2.0).to_string(), "2.0");
        assert_eq!(Scalar::Int32(2).to_string(), "2");
        assert_eq!(Scalar::from("a b").to_string(), "a b");
    }
}
