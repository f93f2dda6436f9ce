//! Homogeneous N-dimensional arrays and string arrays.

use crate::types::{Dim, SmaxNative, TypeTag};
use ndarray::ArrayD;

/// A homogeneous numeric or boolean array of any rank, stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub enum NumericArray {
    Int8(ArrayD<i8>),
    Int16(ArrayD<i16>),
    Int32(ArrayD<i32>),
    Int64(ArrayD<i64>),
    Float32(ArrayD<f32>),
    Float64(ArrayD<f64>),
    Boolean(ArrayD<bool>),
}

/// Element types a [`NumericArray`] can hold.
pub trait ArrayElement: SmaxNative + Clone {
    /// Wraps a typed array.
    fn wrap(array: ArrayD<Self>) -> NumericArray;

    /// Borrows the typed array when the variant matches.
    fn peek(array: &NumericArray) -> Option<&ArrayD<Self>>;
}

macro_rules! array_element {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl ArrayElement for $ty {
            fn wrap(array: ArrayD<Self>) -> NumericArray {
                NumericArray::$variant(array)
            }

            fn peek(array: &NumericArray) -> Option<&ArrayD<Self>> {
                match array {
                    NumericArray::$variant(inner) => Some(inner),
                    _ => None,
                }
            }
        })*
    };
}

array_element! {
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    f32 => Float32,
    f64 => Float64,
    bool => Boolean,
}

macro_rules! each_variant {
    ($array:expr, $inner:ident => $body:expr) => {
        match $array {
            NumericArray::Int8($inner) => $body,
            NumericArray::Int16($inner) => $body,
            NumericArray::Int32($inner) => $body,
            NumericArray::Int64($inner) => $body,
            NumericArray::Float32($inner) => $body,
            NumericArray::Float64($inner) => $body,
            NumericArray::Boolean($inner) => $body,
        }
    };
}

impl NumericArray {
    /// The element tag.
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
        }
    }

    /// Row-major extents.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        each_variant!(self, a => a.shape())
    }

    /// Dimension descriptor matching [`Self::shape`].
    #[must_use]
    pub fn dim(&self) -> Dim {
        Dim::from_shape(self.shape())
    }

    /// Total number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        each_variant!(self, a => a.len())
    }

    /// Returns true when the array holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrows the array as its native element type.
    #[must_use]
    pub fn view<T: ArrayElement>(&self) -> Option<&ArrayD<T>> {
        T::peek(self)
    }

    /// Converts every element to `f64`; booleans become `1.0`/`0.0`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn to_f64(&self) -> ArrayD<f64> {
        match self {
            Self::Int8(a) => a.mapv(f64::from),
            Self::Int16(a) => a.mapv(f64::from),
            Self::Int32(a) => a.mapv(f64::from),
            Self::Int64(a) => a.mapv(|v| v as f64),
            Self::Float32(a) => a.mapv(f64::from),
            Self::Float64(a) => a.clone(),
            Self::Boolean(a) => a.mapv(|v| if v { 1.0 } else { 0.0 }),
        }
    }
}

/// A sequence of strings, optionally carrying a rectangular shape.
///
/// Ragged nested input is flattened and described only by its element count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringArray {
    items: Vec<String>,
    shape: Vec<usize>,
}

impl StringArray {
    /// Creates a flat string array.
    pub fn new<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let items: Vec<String> = items.into_iter().map(Into::into).collect();
        let shape = vec![items.len()];
        Self { items, shape }
    }

    /// Creates a string array with an explicit row-major shape.
    ///
    /// Returns `None` when the shape does not account for every item.
    #[must_use]
    pub fn with_shape(items: Vec<String>, shape: Vec<usize>) -> Option<Self> {
        (shape.iter().product::<usize>() == items.len()).then_some(Self { items, shape })
    }

    /// The flattened items.
    #[must_use]
    pub fn items(&self) -> &[String] {
        &self.items
    }

    /// Consumes the array, returning the flattened items.
    #[must_use]
    pub fn into_items(self) -> Vec<String> {
        self.items
    }

    /// Row-major extents.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Dimension descriptor matching [`Self::shape`].
    #[must_use]
    pub fn dim(&self) -> Dim {
        Dim::from_shape(&self.shape)
    }

    /// Number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true when there are no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr2, ArrayD, IxDyn};

    #[test]
    fn shape_and_dim_follow_the_array() {
        let array = NumericArray::Float64(arr2(&[[0.0, 1.1], [2.0, 3.0], [4.0, 5.0]]).into_dyn());
        assert_eq!(array.shape(), &[3, 2]);
        assert_eq!(array.dim(), Dim::Shape(vec![3, 2]));
        assert_eq!(array.len(), 6);
        assert_eq!(array.type_tag(), TypeTag::Float64);
    }

    #[test]
    fn typed_view_matches_variant_only() -> Result<(), Box<dyn std::error::Error>> {
        let array = NumericArray::Int16(ArrayD::from_shape_vec(IxDyn(&[2]), vec![1_i16, -2])?);
        assert!(array.view::<i16>().is_some());
        assert!(array.view::<i32>().is_none());
        Ok(())
    }

    #[test]
    fn booleans_widen_to_unit_floats() -> Result<(), Box<dyn std::error::Error>> {
        let array = NumericArray::Boolean(ArrayD::from_shape_vec(IxDyn(&[3]), vec![true, false, true])?);
        assert_eq!(array.to_f64().iter().copied().collect::<Vec<_>>(), vec![1.0, 0.0, 1.0]);
        Ok(())
    }

    #[test]
    fn string_array_shapes() {
        let flat = StringArray::new(["i", "am", "list"]);
        assert_eq!(flat.dim(), Dim::Vector(3));

        let grid = StringArray::with_shape(
            vec!["a".into(), "b".into(), "c".into(), "d".into()],
            vec![2, 2],
        );
        assert_eq!(grid.map(|g| g.dim()), Some(Dim::Shape(vec![2, 2])));

        assert!(StringArray::with_shape(vec!["a".into()], vec![2, 2]).is_none());
    }
}
