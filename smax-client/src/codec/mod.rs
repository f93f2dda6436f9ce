//! Value codec: native values to and from the store's flat wire form.
//!
//! Every stored value is a triple of a value string, a [`TypeTag`] and a
//! [`Dim`] descriptor:
//!
//! | Value kind | Wire value | Dim |
//! |---|---|---|
//! | scalar | the value's text; booleans as `1`/`0` | `1` |
//! | numeric array | elements joined by spaces, row-major | extents joined by spaces |
//! | string array | elements joined by `\r`, escaped | element count or extents |
//!
//! Encoding and decoding are pure functions and hold no state.

mod decode;
mod encode;
mod text;

pub use decode::{decode, decode_record};
pub use encode::encode;
pub use text::{
    NUMBER_SEPARATOR, STRING_SEPARATOR, escape_element, format_bool, format_f32, format_f64,
    parse_bool, unescape_element,
};

pub(crate) use decode::record_meta;

use crate::types::{Dim, TypeTag};

/// A value in the store's wire form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    pub value: String,
    pub type_tag: TypeTag,
    pub dim: Dim,
}
