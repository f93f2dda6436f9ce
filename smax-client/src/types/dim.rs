//! Dimension descriptor of a stored value.

use crate::error::SmaxError;
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Shape of a stored value as written on the wire.
///
/// The wire form is `1` for a scalar, a bare length for a 1-D sequence and
/// space-separated extents for higher ranks. A sequence of length one is
/// indistinguishable from a scalar on the wire and reads back as one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Dim {
    #[default]
    Scalar,
    Vector(usize),
    Shape(Vec<usize>),
}

impl Dim {
    /// Builds the descriptor for a row-major shape.
    #[must_use]
    pub fn from_shape(shape: &[usize]) -> Self {
        match shape {
            [] | [1] => Self::Scalar,
            [n] => Self::Vector(*n),
            extents => Self::Shape(extents.to_vec()),
        }
    }

    /// Parses a wire descriptor such as `"1"`, `"5"` or `"3 2"`.
    ///
    /// # Errors
    ///
    /// Returns [`SmaxError::Protocol`] when an extent is not a non-negative integer.
    pub fn parse(text: &str) -> Result<Self, SmaxError> {
        let extents = text
            .split_whitespace()
            .map(|part| {
                part.parse::<usize>().map_err(|_| {
                    SmaxError::protocol("dimension parse", format!("bad extent '{part}' in '{text}'"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if extents.is_empty() {
            // Struct bookkeeping entries sometimes arrive without a dimension.
            return Ok(Self::Scalar);
        }
        Ok(Self::from_shape(&extents))
    }

    /// Returns true for the scalar descriptor.
    #[must_use]
    pub fn is_scalar(&self) -> bool {
        matches!(self, Self::Scalar)
    }

    /// Row-major extents; empty for a scalar.
    #[must_use]
    pub fn shape(&self) -> Vec<usize> {
        match self {
            Self::Scalar => Vec::new(),
            Self::Vector(n) => vec![*n],
            Self::Shape(extents) => extents.clone(),
        }
    }

    /// Number of elements described.
    #[must_use]
    pub fn element_count(&self) -> usize {
        match self {
            Self::Scalar => 1,
            Self::Vector(n) => *n,
            Self::Shape(extents) => extents.iter().product(),
        }
    }

    /// Number of axes; zero for a scalar.
    #[must_use]
    pub fn rank(&self) -> usize {
        match self {
            Self::Scalar => 0,
            Self::Vector(_) => 1,
            Self::Shape(extents) => extents.len(),
        }
    }

    /// Wire form of the descriptor.
    #[must_use]
    pub fn to_wire(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar => f.write_str("1"),
            Self::Vector(n) => write!(f, "{n}"),
            Self::Shape(extents) => {
                let parts: Vec<String> = extents.iter().map(ToString::to_string).collect();
                f.write_str(&parts.join(" "))
            }
        }
    }
}

impl FromStr for Dim {
    type Err = SmaxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Dim {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Scalar => serializer.serialize_u64(1),
            Self::Vector(n) => serializer.serialize_u64(*n as u64),
            Self::Shape(extents) => extents.serialize(serializer),
        }
    }
}
