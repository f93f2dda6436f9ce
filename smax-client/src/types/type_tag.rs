//! The fixed set of SMA-X type tags and their native Rust counterparts.

use crate::error::{SmaxError, UNNAMED};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Wire-level type name of a stored value.
///
/// Numeric tags are ordered by width within their family, so
/// `Int8 < Int16 < Int32 < Int64` and `Float32 < Float64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TypeTag {
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Boolean,
    String,
    Raw,
    /// Bookkeeping tag of a struct node; never carried by a leaf.
    Struct,
}

/// Numeric family used for promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Integer,
    Float,
}

impl TypeTag {
    /// Every tag, in registry order.
    pub const ALL: [TypeTag; 10] = [
        Self::Int8,
        Self::Int16,
        Self::Int32,
        Self::Int64,
        Self::Float32,
        Self::Float64,
        Self::Boolean,
        Self::String,
        Self::Raw,
        Self::Struct,
    ];

    /// Returns the canonical wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Boolean => "boolean",
            Self::String => "string",
            Self::Raw => "raw",
            Self::Struct => "struct",
        }
    }

    /// Returns the name of the native Rust type holding values of this tag.
    #[must_use]
    pub const fn native_name(&self) -> &'static str {
        match self {
            Self::Int8 => "i8",
            Self::Int16 => "i16",
            Self::Int32 => "i32",
            Self::Int64 => "i64",
            Self::Float32 => "f32",
            Self::Float64 => "f64",
            Self::Boolean => "bool",
            Self::String => "String",
            Self::Raw => "Vec<u8>",
            Self::Struct => "BTreeMap<String, Value>",
        }
    }

    /// Strict lookup of a wire name, accepting the legacy aliases.
    ///
    /// # Errors
    ///
    /// Returns [`SmaxError::UnknownType`] for names outside the registry.
    pub fn lookup(name: &str) -> Result<Self, SmaxError> {
        let canonical = match name.trim().to_ascii_lowercase().as_str() {
            "int8" => Self::Int8,
            "int16" => Self::Int16,
            "int32" | "int" | "integer" => Self::Int32,
            "int64" => Self::Int64,
            "float32" | "single" => Self::Float32,
            "float64" | "float" | "double" => Self::Float64,
            "boolean" | "bool" => Self::Boolean,
            "string" | "str" => Self::String,
            "raw" | "bytes" => Self::Raw,
            "struct" => Self::Struct,
            _ => {
                return Err(SmaxError::UnknownType {
                    name: UNNAMED.to_string(),
                    tag: name.to_string(),
                });
            }
        };
        Ok(canonical)
    }

    /// Tolerant lookup used on the decode path: unknown names read as strings.
    #[must_use]
    pub fn lookup_lenient(name: &str) -> Self {
        Self::lookup(name).unwrap_or_else(|_| {
            tracing::warn!("unrecognised type '{}', decoding as string", name);
            Self::String
        })
    }

    /// Returns the numeric family, if any.
    #[must_use]
    pub const fn family(&self) -> Option<Family> {
        match self {
            Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64 => Some(Family::Integer),
            Self::Float32 | Self::Float64 => Some(Family::Float),
            _ => None,
        }
    }

    /// Width in bits for numeric tags.
    #[must_use]
    pub const fn bits(&self) -> Option<u32> {
        match self {
            Self::Int8 => Some(8),
            Self::Int16 => Some(16),
            Self::Int32 | Self::Float32 => Some(32),
            Self::Int64 | Self::Float64 => Some(64),
            _ => None,
        }
    }

    /// The next wider tag of the same family.
    #[must_use]
    pub const fn wider(&self) -> Option<Self> {
        match self {
            Self::Int8 => Some(Self::Int16),
            Self::Int16 => Some(Self::Int32),
            Self::Int32 => Some(Self::Int64),
            Self::Float32 => Some(Self::Float64),
            _ => None,
        }
    }

    /// The widest tag of this tag's family.
    #[must_use]
    pub const fn widest(&self) -> Self {
        match self.family() {
            Some(Family::Integer) => Self::Int64,
            Some(Family::Float) => Self::Float64,
            None => *self,
        }
    }

    /// Returns true when `value` lies in this integer tag's range.
    #[must_use]
    pub fn holds_int(&self, value: i128) -> bool {
        match self {
            Self::Int8 => i8::try_from(value).is_ok(),
            Self::Int16 => i16::try_from(value).is_ok(),
            Self::Int32 => i32::try_from(value).is_ok(),
            Self::Int64 => i64::try_from(value).is_ok(),
            _ => false,
        }
    }

    /// Smallest signed integer tag, no narrower than `floor`, holding every value in `min..=max`.
    ///
    /// Returns `None` when even `int64` is too narrow.
    #[must_use]
    pub fn smallest_int_for(min: i128, max: i128, floor: Self) -> Option<Self> {
        let mut tag = if floor.family() == Some(Family::Integer) {
            floor
        } else {
            Self::Int8
        };
        loop {
            if tag.holds_int(min) && tag.holds_int(max) {
                return Some(tag);
            }
            tag = tag.wider()?;
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TypeTag {
    type Err = SmaxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::lookup(s)
    }
}

impl Serialize for TypeTag {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TypeTag {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::lookup(&s).map_err(serde::de::Error::custom)
    }
}

/// Native Rust types with a fixed SMA-X tag.
pub trait SmaxNative: Sized {
    /// The tag values of this type are shared with.
    const TAG: TypeTag;
}

macro_rules! native {
    ($($ty:ty => $tag:ident),* $(,)?) => {
        $(impl SmaxNative for $ty {
            const TAG: TypeTag = TypeTag::$tag;
        })*
    };
}

native! {
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    f32 => Float32,
    f64 => Float64,
    bool => Boolean,
    String => String,
}

/// Returns the tag a native Rust type is shared with.
#[must_use]
pub const fn tag_of<T: SmaxNative>() -> TypeTag {
    T::TAG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_names_round_trip() {
        for tag in TypeTag::ALL {
            assert_eq!(TypeTag::lookup(tag.as_str()).ok(), Some(tag));
        }
    }

    #[test]
    fn aliases_resolve() {
        assert_eq!(TypeTag::lookup("int").ok(), Some(TypeTag::Int32));
        assert_eq!(TypeTag::lookup("integer").ok(), Some(TypeTag::Int32));
        assert_eq!(TypeTag::lookup("double").ok(), Some(TypeTag::Float64));
        assert_eq!(TypeTag::lookup("float").ok(), Some(TypeTag::Float64));
        assert_eq!(TypeTag::lookup("single").ok(), Some(TypeTag::Float32));
        assert_eq!(TypeTag::lookup("bool").ok(), Some(TypeTag::Boolean));
        assert_eq!(TypeTag::lookup("str").ok(), Some(TypeTag::String));
        assert_eq!(TypeTag::lookup("bytes").ok(), Some(TypeTag::Raw));
        assert_eq!(TypeTag::lookup(" Int16 ").ok(), Some(TypeTag::Int16));
    }

    #[test]
    fn unknown_is_strict_error() {
        let result = TypeTag::lookup("complex128");
        assert!(matches!(result, Err(SmaxError::UnknownType { tag, .. }) if tag == "complex128"));
    }

    #[test]
    fn lenient_lookup_falls_back_to_string() {
        assert_eq!(TypeTag::lookup_lenient("quaternion"), TypeTag::String);
        assert_eq!(TypeTag::lookup_lenient("int64"), TypeTag::Int64);
    }

    #[test]
    fn width_ordering() {
        assert!(TypeTag::Int8 < TypeTag::Int16);
        assert!(TypeTag::Int16 < TypeTag::Int32);
        assert!(TypeTag::Int32 < TypeTag::Int64);
        assert!(TypeTag::Float32 < TypeTag::Float64);
        assert_eq!(TypeTag::Int64.wider(), None);
        assert_eq!(TypeTag::Float32.wider(), Some(TypeTag::Float64));
        assert_eq!(TypeTag::Int16.widest(), TypeTag::Int64);
    }

    #[test]
    fn smallest_int_tag_boundaries() {
        let pick = |v: i128| TypeTag::smallest_int_for(v, v, TypeTag::Int8);
        assert_eq!(pick(-129), Some(TypeTag::Int16));
        assert_eq!(pick(-128), Some(TypeTag::Int8));
        assert_eq!(pick(127), Some(TypeTag::Int8));
        assert_eq!(pick(128), Some(TypeTag::Int16));
        assert_eq!(pick(i128::from(i32::MAX) + 1), Some(TypeTag::Int64));
        assert_eq!(pick(i128::from(i64::MAX) + 1), None);
    }

    #[test]
    fn smallest_int_respects_floor() {
        assert_eq!(
            TypeTag::smallest_int_for(0, 1, TypeTag::Int32),
            Some(TypeTag::Int32)
        );
    }

    #[test]
    fn native_tags() {
        assert_eq!(tag_of::<i8>(), TypeTag::Int8);
        assert_eq!(tag_of::<i32>(), TypeTag::Int32);
        assert_eq!(tag_of::<f64>(), TypeTag::Float64);
        assert_eq!(tag_of::<bool>(), TypeTag::Boolean);
        assert_eq!(tag_of::<String>(), TypeTag::String);
        assert_eq!(TypeTag::Raw.native_name(), "Vec<u8>");
    }

    #[test]
    fn serde_uses_wire_names() -> Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_string(&TypeTag::Float32)?;
        assert_eq!(json, "\"float32\"");
        let restored: TypeTag = serde_json::from_str("\"double\"")?;
        assert_eq!(restored, TypeTag::Float64);
        Ok(())
    }
}
