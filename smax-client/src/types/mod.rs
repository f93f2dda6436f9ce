//! Core value types for the SMA-X client.
//!
//! - [`TypeTag`]: the fixed set of wire type names and their width ordering
//! - [`Dim`]: the dimension descriptor stored beside every value
//! - [`Value`]: the closed union of shareable values
//! - [`SmaxValue`]: a pulled value or struct tree with its [`Metadata`]
//! - [`Pattern`]: a validated subscription pattern

mod array;
mod dim;
mod pattern;
mod scalar;
mod smax_value;
mod timestamp;
mod type_tag;
pub(crate) mod value;

pub use array::{ArrayElement, NumericArray, StringArray};
pub use dim::Dim;
pub use pattern::{
    CHANNEL_PREFIX, InvalidPattern, PATH_SEPARATOR, Pattern, glob_match, join_path, split_path,
    strip_channel_prefix,
};
pub use scalar::Scalar;
pub use smax_value::{Metadata, OPTIONAL_METADATA, Payload, SmaxValue};
pub use timestamp::Timestamp;
pub use type_tag::{Family, SmaxNative, TypeTag, tag_of};
pub use value::{StructMap, Value};
