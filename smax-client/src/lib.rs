//! SMA-X Client Library
//!
//! A typed client for SMA-X, the shared key-value store many telescope
//! processes use to publish state and be told about updates. Values live at
//! `table:key` paths and carry a type tag, a dimension descriptor, a
//! timestamp, the writer's origin and a serial number.
//!
//! # Components
//!
//! - [`types`] - the fixed type set ([`TypeTag`]), the [`Value`] union and pulled [`SmaxValue`] trees
//! - [`codec`] - encoding values to the store's wire form and back, with type inference and promotion
//! - [`structs`] - flattening nested structs into atomic per-table updates and rebuilding them
//! - [`SmaxClient`] - share, pull, metadata and subscriptions over a [`store::Store`]
//!
//! # Example: Share and Pull
//!
//! ```rust,ignore
//! use smax_client::{SmaxClient, SmaxConfig, TypeTag, Value};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = SmaxClient::connect(&SmaxConfig::discover()?).await?;
//!
//!     client.share("receiver:lo", "frequency", 230.538e9).await?;
//!     client.share_as("receiver:lo", "locked", 1_i8, TypeTag::Boolean).await?;
//!
//!     let roach = Value::structure()
//!         .with_field("temp", 41_i8)
//!         .with_field("firmware", 2.1);
//!     client.share("correlator", "roach2-03", roach).await?;
//!
//!     let tree = client.pull("correlator", "roach2-03").await?;
//!     println!("{tree}");
//!     Ok(())
//! }
//! ```
//!
//! # Example: Subscriptions
//!
//! ```rust,ignore
//! use smax_client::SmaxClient;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = SmaxClient::connect_default().await?;
//!
//!     // Callback on a background worker, for anything under the prefix.
//!     client
//!         .subscribe_with_callback("weather:*", |value| println!("{value}"))
//!         .await?;
//!
//!     // Or block until the next update.
//!     client.subscribe("receiver:lo:frequency").await?;
//!     let value = client
//!         .wait_on_any_subscribed(Some(Duration::from_secs(5)))
//!         .await?;
//!     println!("{} = {}", value.name(), value);
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
mod connection;
mod error;
mod json;
pub mod prelude;
pub mod retry;
pub mod store;
mod stream;
pub mod structs;
mod subscribe;
pub mod types;

pub use config::{ConfigError, SmaxConfig};
pub use connection::{ShareOptions, SmaxClient};
pub use error::SmaxError;
pub use retry::RetryPolicy;
pub use stream::ValueStream;
pub use subscribe::{Callback, Notification};
pub use types::{
    Dim, Metadata, NumericArray, Pattern, Scalar, SmaxValue, StringArray, StructMap, Timestamp,
    TypeTag, Value,
};

/// Result type for SMA-X client operations.
pub type Result<T> = std::result::Result<T, SmaxError>;
