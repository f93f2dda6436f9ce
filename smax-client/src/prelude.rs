//! Convenient re-exports for common usage.
//!
//! ```rust,ignore
//! use smax_client::prelude::*;
//!
//! let client = SmaxClient::connect_default().await?;
//! let mut stream = client.subscribe_stream("weather:*").await?;
//!
//! while let Some(value) = stream.next().await {
//!     println!("{value}");
//! }
//! ```

pub use crate::config::SmaxConfig;
pub use crate::connection::{ShareOptions, SmaxClient};
pub use crate::error::SmaxError;
pub use crate::stream::ValueStream;
pub use crate::subscribe::Notification;
pub use crate::types::{Dim, SmaxValue, StructMap, TypeTag, Value};
pub use crate::Result;

// Re-export StreamExt for convenient stream operations
pub use futures::StreamExt;
