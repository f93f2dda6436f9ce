//! The boundary between the client and the store.
//!
//! The store is reached through a small fixed set of primitives, modelled by
//! the [`Store`] and [`Subscriber`] traits. [`RedisStore`] talks to a live
//! SMA-X server; [`MemoryStore`] emulates one in-process.
//!
//! The traits return boxed futures so they stay object-safe and the client can
//! hold an `Arc<dyn Store>`.

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use crate::Result;
use crate::types::Timestamp;
use futures::future::BoxFuture;
use std::time::Duration;

/// One stored field as returned by the atomic get primitive.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawRecord {
    pub value: Vec<u8>,
    pub type_tag: String,
    pub dim: String,
    /// Decimal seconds since the Unix epoch.
    pub timestamp: String,
    pub origin: String,
    pub serial: String,
}

/// One table of a struct dump: its full name and its fields in store order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StructTable {
    pub name: String,
    pub fields: Vec<(String, RawRecord)>,
}

/// Every table reachable from a struct's root, parents before children.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StructDump {
    pub tables: Vec<StructTable>,
}

/// One field of a grouped multi-field update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldUpdate {
    pub field: String,
    pub value: String,
    pub type_tag: String,
    pub dim: String,
}

/// All fields written to one table by a single multi-field update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableUpdate {
    /// Full table name, e.g. `"system:roach:roach2-03"`.
    pub table: String,
    pub fields: Vec<FieldUpdate>,
    /// Asks the store to notify parent tables once this update lands.
    pub notify: bool,
}

/// A message received from the store's pub/sub primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNotification {
    /// Full channel name, including the namespace prefix.
    pub channel: String,
    /// The channel pattern that matched, for pattern subscriptions.
    pub pattern: Option<String>,
    pub payload: Vec<u8>,
}

/// Primitive operations of the store.
pub trait Store: Send + Sync {
    /// Atomically reads one field with its metadata; `None` when it does not exist.
    fn get_with_meta<'a>(
        &'a self,
        table: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<RawRecord>>>;

    /// Reads every table of the struct stored at `id` (`table:key`).
    fn get_struct<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<StructDump>>;

    /// Atomically writes one field with its metadata and notifies subscribers.
    fn set_with_meta<'a>(
        &'a self,
        table: &'a str,
        origin: &'a str,
        key: &'a str,
        value: &'a str,
        type_tag: &'a str,
        dim: &'a str,
    ) -> BoxFuture<'a, Result<()>>;

    /// Applies a batch of per-table updates all-or-nothing.
    fn multi_set_with_meta<'a>(
        &'a self,
        origin: &'a str,
        updates: &'a [TableUpdate],
    ) -> BoxFuture<'a, Result<()>>;

    /// Reads a best-effort metadata entry, e.g. `description` of `table`.
    fn get_meta_field<'a>(
        &'a self,
        meta: &'a str,
        table: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>>>;

    /// Writes a best-effort metadata entry.
    fn set_meta_field<'a>(
        &'a self,
        meta: &'a str,
        table: &'a str,
        value: &'a str,
    ) -> BoxFuture<'a, Result<()>>;

    fn publish<'a>(&'a self, channel: &'a str, message: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Deletes every table and variable whose name matches the glob `pattern`.
    ///
    /// Returns how many variables were removed.
    fn purge<'a>(&'a self, pattern: &'a str) -> BoxFuture<'a, Result<u64>>;

    /// Deletes every table not marked persistent; returns how many variables went.
    fn purge_volatile(&self) -> BoxFuture<'_, Result<u64>>;

    /// Resolves a DSM `(host, target, key)` triple to the table holding it.
    fn dsm_get_table<'a>(
        &'a self,
        host: &'a str,
        target: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>>>;

    /// Full names of the variables written after `cutoff`.
    fn list_newer_than(&self, cutoff: Timestamp) -> BoxFuture<'_, Result<Vec<String>>>;

    /// Full names of the variables last written before `cutoff`.
    fn list_older_than(&self, cutoff: Timestamp) -> BoxFuture<'_, Result<Vec<String>>>;

    /// Fields of `table` holding a number greater than `threshold`.
    fn list_higher_than<'a>(
        &'a self,
        table: &'a str,
        threshold: f64,
    ) -> BoxFuture<'a, Result<Vec<String>>>;

    /// Fields of `table` holding a numeric zero.
    fn list_zeroes<'a>(&'a self, table: &'a str) -> BoxFuture<'a, Result<Vec<String>>>;

    /// Checks the store is reachable.
    fn ping(&self) -> BoxFuture<'_, Result<()>>;

    /// Opens a dedicated pub/sub listener.
    fn subscriber(&self) -> BoxFuture<'_, Result<Box<dyn Subscriber>>>;
}

/// A pub/sub listener owned by one consumer.
pub trait Subscriber: Send {
    fn subscribe_exact<'a>(&'a mut self, channel: &'a str) -> BoxFuture<'a, Result<()>>;

    fn subscribe_pattern<'a>(&'a mut self, pattern: &'a str) -> BoxFuture<'a, Result<()>>;

    fn unsubscribe_exact<'a>(&'a mut self, channel: &'a str) -> BoxFuture<'a, Result<()>>;

    fn unsubscribe_pattern<'a>(&'a mut self, pattern: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Waits for the next message; `Ok(None)` when `timeout` elapses first.
    ///
    /// A listener whose connection is gone returns a connection error.
    fn next_message(
        &mut self,
        timeout: Option<Duration>,
    ) -> BoxFuture<'_, Result<Option<RawNotification>>>;
}
