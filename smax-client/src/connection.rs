//! The SMA-X client.
//!
//! [`SmaxClient`] owns one store connection, the identity written into every
//! update, and all subscriptions started through it.

use crate::codec::{decode_record, encode, record_meta};
use crate::config::SmaxConfig;
use crate::error::SmaxError;
use crate::retry::{RetryPolicy, with_retry};
use crate::store::{RedisStore, Store};
use crate::stream::ValueStream;
use crate::structs::{flatten, group_for_atomic_update, rebuild};
use crate::subscribe::{Delivery, Notification, SubscriptionEngine};
use crate::types::{
    OPTIONAL_METADATA, Pattern, SmaxValue, Timestamp, TypeTag, Value, join_path, split_path,
};
use crate::Result;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

// ============================================================================
// Store Handle
// ============================================================================

/// The store plus what every request against it needs; cheap to clone into workers.
#[derive(Clone)]
pub(crate) struct StoreHandle {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) retry: RetryPolicy,
    pub(crate) origin: Arc<str>,
}

impl StoreHandle {
    /// Pulls `table:key`, rebuilding the tree when it is a struct.
    pub(crate) async fn pull(&self, table: &str, key: &str) -> Result<SmaxValue> {
        let name = join_path([table, key]);
        let record = with_retry(&self.retry, "pull", || self.store.get_with_meta(table, key))
            .await?
            .ok_or_else(|| SmaxError::KeyNotFound {
                table: table.to_string(),
                key: key.to_string(),
            })?;

        if record.type_tag != TypeTag::Struct.as_str() {
            let value = decode_record(&record, &name)?;
            debug!("pulled {} ({}, dim {})", name, value.type_tag, value.dim);
            return Ok(value);
        }

        let dump = with_retry(&self.retry, "struct pull", || self.store.get_struct(&name)).await?;
        let tree = rebuild(&dump, table, key, record_meta(&record, &name))?;
        debug!("pulled struct {} from {} tables", name, dump.tables.len());
        Ok(tree)
    }
}

// ============================================================================
// Share Options
// ============================================================================

/// Options for [`SmaxClient::share_with`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShareOptions {
    /// Casts the value to this type, promoting when it does not fit.
    pub type_tag: Option<TypeTag>,
    /// Optional metadata (`description`, `unit`, `coords`) pushed after the value.
    pub meta: BTreeMap<String, String>,
}

impl ShareOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_type(mut self, type_tag: TypeTag) -> Self {
        self.type_tag = Some(type_tag);
        self
    }

    #[must_use]
    pub fn with_meta(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(field.into(), value.into());
        self
    }
}

// ============================================================================
// SmaxClient
// ============================================================================

/// A client of the SMA-X store.
///
/// # Example
///
/// ```rust,ignore
/// use smax_client::{SmaxClient, SmaxConfig};
///
/// let client = SmaxClient::connect(&SmaxConfig::discover()?).await?;
/// client.share("weather", "temperature", 21.5).await?;
///
/// let value = client.pull("weather", "temperature").await?;
/// println!("{value}");
/// ```
pub struct SmaxClient {
    handle: StoreHandle,
    engine: SubscriptionEngine,
    capacity: usize,
}

impl SmaxClient {
    /// Connects to the server named by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the server cannot
    /// be reached within the retry budget.
    pub async fn connect(config: &SmaxConfig) -> Result<Self> {
        config.validate()?;
        let url = config.redis_url();
        let store = with_retry(&config.retry.policy(), "connect", || RedisStore::connect(&url)).await?;
        info!(
            "connected to {}:{} db={}",
            config.server.host, config.server.port, config.server.db
        );
        Ok(Self::with_store(Arc::new(store), config.origin(), config))
    }

    /// Connects using [`SmaxConfig::discover`].
    ///
    /// # Errors
    ///
    /// Returns an error if configuration discovery or the connection fails.
    pub async fn connect_default() -> Result<Self> {
        let config = SmaxConfig::discover()?;
        Self::connect(&config).await
    }

    /// Builds a client over any [`Store`], e.g. a [`crate::store::MemoryStore`].
    pub fn with_store(store: Arc<dyn Store>, origin: impl Into<String>, config: &SmaxConfig) -> Self {
        let handle = StoreHandle {
            store,
            retry: config.retry.policy(),
            origin: Arc::from(origin.into()),
        };
        let capacity = config.client.channel_capacity.max(1);
        Self {
            engine: SubscriptionEngine::new(handle.clone(), capacity),
            handle,
            capacity,
        }
    }

    /// The `host:program` identity written with every update.
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.handle.origin
    }

    // ------------------------------------------------------------------------
    // Share / pull
    // ------------------------------------------------------------------------

    /// Shares a value under `table:key` with its inferred type.
    ///
    /// # Errors
    ///
    /// Returns codec errors for values that cannot be represented, and
    /// connection errors once the retry budget is spent.
    pub async fn share(&self, table: &str, key: &str, value: impl Into<Value>) -> Result<()> {
        self.share_with(table, key, value, ShareOptions::default()).await
    }

    /// Shares a value cast to `type_tag`.
    ///
    /// # Errors
    ///
    /// See [`Self::share`].
    pub async fn share_as(
        &self,
        table: &str,
        key: &str,
        value: impl Into<Value>,
        type_tag: TypeTag,
    ) -> Result<()> {
        self.share_with(table, key, value, ShareOptions::new().with_type(type_tag))
            .await
    }

    /// Shares a value with explicit options.
    ///
    /// Structs are written as one all-or-nothing batch. Optional metadata is
    /// pushed afterwards on a best-effort basis.
    ///
    /// # Errors
    ///
    /// See [`Self::share`]. Requesting a non-struct type for a struct is a
    /// [`SmaxError::TypeMismatch`].
    pub async fn share_with(
        &self,
        table: &str,
        key: &str,
        value: impl Into<Value>,
        options: ShareOptions,
    ) -> Result<()> {
        let value = value.into();
        let name = join_path([table, key]);
        let origin = &*self.handle.origin;
        let store = &self.handle.store;

        let shared_as = if let Value::Struct(map) = &value {
            if let Some(tag) = options.type_tag.filter(|tag| *tag != TypeTag::Struct) {
                return Err(SmaxError::mismatch("a struct cannot be cast to a plain type")
                    .with_tag(tag)
                    .at(&name));
            }
            let leaves = flatten(map).map_err(|e| e.at(&name))?;
            let updates = group_for_atomic_update(&leaves, table, key)?;
            with_retry(&self.handle.retry, "struct share", || {
                store.multi_set_with_meta(origin, &updates)
            })
            .await?;
            debug!("struct {} written as {} tables", name, updates.len());
            TypeTag::Struct
        } else {
            let encoded = encode(&value, options.type_tag).map_err(|e| e.at(&name))?;
            let dim = encoded.dim.to_wire();
            let tag = encoded.type_tag.as_str();
            with_retry(&self.handle.retry, "share", || {
                store.set_with_meta(table, origin, key, &encoded.value, tag, &dim)
            })
            .await?;
            encoded.type_tag
        };
        info!("shared {} as {}", name, shared_as);

        for (field, text) in &options.meta {
            self.push_meta(field, &name, text).await?;
        }
        Ok(())
    }

    /// Pulls `table:key`; structs come back as a tree.
    ///
    /// # Errors
    ///
    /// - [`SmaxError::KeyNotFound`] when nothing is stored there
    /// - codec errors for undecodable data
    /// - connection errors once the retry budget is spent
    pub async fn pull(&self, table: &str, key: &str) -> Result<SmaxValue> {
        let value = self.handle.pull(table, key).await?;
        info!("pulled {}", value.name());
        Ok(value)
    }

    /// Pulls like [`Self::pull`], then fills in optional metadata of every leaf.
    ///
    /// Metadata lookups are not atomic with the value and failures are logged
    /// and skipped.
    ///
    /// # Errors
    ///
    /// See [`Self::pull`].
    pub async fn pull_with_meta(&self, table: &str, key: &str) -> Result<SmaxValue> {
        let mut value = self.pull(table, key).await?;
        let names: Vec<String> = value.leaves().iter().map(|leaf| leaf.name().to_string()).collect();

        let mut found: HashMap<String, Vec<(&str, String)>> = HashMap::new();
        for name in names {
            for field in OPTIONAL_METADATA {
                match self.handle.store.get_meta_field(field, &name).await {
                    Ok(Some(text)) => found.entry(name.clone()).or_default().push((field, text)),
                    Ok(None) => {}
                    Err(e) => warn!("could not read {} of {}: {}", field, name, e),
                }
            }
        }
        apply_meta(&mut value, &mut found);
        Ok(value)
    }

    /// Reads a metadata entry such as `description` for a full variable name.
    ///
    /// Connection failures are logged and read as `None`.
    ///
    /// # Errors
    ///
    /// Returns non-connection errors, e.g. a malformed reply.
    pub async fn pull_meta(&self, meta: &str, table: &str) -> Result<Option<String>> {
        match self.handle.store.get_meta_field(meta, table).await {
            Ok(value) => {
                info!("pulled {} of {}", meta, table);
                Ok(value)
            }
            Err(e) if e.is_connection() => {
                warn!("could not pull {} of {}: {}", meta, table, e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Writes a metadata entry for a full variable name.
    ///
    /// Connection failures are logged and otherwise ignored.
    ///
    /// # Errors
    ///
    /// Returns non-connection errors.
    pub async fn push_meta(&self, meta: &str, table: &str, value: &str) -> Result<()> {
        match self.handle.store.set_meta_field(meta, table, value).await {
            Ok(()) => {
                info!("pushed {} of {}", meta, table);
                Ok(())
            }
            Err(e) if e.is_connection() => {
                warn!("could not push {} of {}: {}", meta, table, e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    // ------------------------------------------------------------------------
    // Purge / listings
    // ------------------------------------------------------------------------

    /// Deletes everything matching `table[:key]`; glob wildcards are allowed.
    /// `None` for the table means every table.
    ///
    /// Returns how many variables were removed.
    ///
    /// # Errors
    ///
    /// Returns connection errors once the retry budget is spent.
    pub async fn purge(&self, table: Option<&str>, key: Option<&str>) -> Result<u64> {
        let mut pattern = table.unwrap_or("*").to_string();
        if let Some(key) = key {
            pattern = format!("{pattern}:{key}");
        }
        warn!("purging all keys matching {}", pattern);
        let store = &self.handle.store;
        with_retry(&self.handle.retry, "purge", || store.purge(&pattern)).await
    }

    /// Deletes every table not marked persistent on the server.
    ///
    /// # Errors
    ///
    /// Returns connection errors once the retry budget is spent.
    pub async fn purge_volatile(&self) -> Result<u64> {
        warn!("purging all volatile keys");
        let store = &self.handle.store;
        with_retry(&self.handle.retry, "purge volatile", || store.purge_volatile()).await
    }

    /// Looks up the SMA-X table serving a DSM `target`/`key`; `host` defaults to `target`.
    ///
    /// # Errors
    ///
    /// Returns connection errors once the retry budget is spent.
    pub async fn dsm_get_table(
        &self,
        target: &str,
        key: &str,
        host: Option<&str>,
    ) -> Result<Option<String>> {
        let host = host.unwrap_or(target);
        let store = &self.handle.store;
        with_retry(&self.handle.retry, "dsm lookup", || {
            store.dsm_get_table(host, target, key)
        })
        .await
    }

    /// Pulls every variable written after `cutoff`.
    ///
    /// # Errors
    ///
    /// See [`Self::pull`].
    pub async fn list_newer_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<(String, SmaxValue)>> {
        let cutoff = Timestamp::from(cutoff);
        let store = &self.handle.store;
        let names = with_retry(&self.handle.retry, "list newer", || store.list_newer_than(cutoff)).await?;
        self.pull_names(names).await
    }

    /// Pulls every variable last written before `cutoff`.
    ///
    /// # Errors
    ///
    /// See [`Self::pull`].
    pub async fn list_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<(String, SmaxValue)>> {
        let cutoff = Timestamp::from(cutoff);
        let store = &self.handle.store;
        let names = with_retry(&self.handle.retry, "list older", || store.list_older_than(cutoff)).await?;
        self.pull_names(names).await
    }

    /// Pulls the fields of `table` holding a number above `threshold`.
    ///
    /// # Errors
    ///
    /// See [`Self::pull`].
    pub async fn list_higher_than(
        &self,
        table: &str,
        threshold: f64,
    ) -> Result<Vec<(String, SmaxValue)>> {
        let store = &self.handle.store;
        let fields = with_retry(&self.handle.retry, "list higher", || {
            store.list_higher_than(table, threshold)
        })
        .await?;
        let mut out = Vec::with_capacity(fields.len());
        for field in fields {
            match self.handle.pull(table, &field).await {
                Ok(value) => out.push((field, value)),
                Err(SmaxError::KeyNotFound { .. }) => debug!("{}:{} vanished before its pull", table, field),
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    /// Names the fields of `table` equal to zero.
    ///
    /// # Errors
    ///
    /// Returns connection errors once the retry budget is spent.
    pub async fn list_zeroes(&self, table: &str) -> Result<Vec<String>> {
        let store = &self.handle.store;
        with_retry(&self.handle.retry, "list zeroes", || store.list_zeroes(table)).await
    }

    /// Pulls each full name, skipping those deleted since they were listed.
    async fn pull_names(&self, names: Vec<String>) -> Result<Vec<(String, SmaxValue)>> {
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            let Some((table, key)) = split_path(&name) else {
                warn!("listed name '{}' has no table part, skipping", name);
                continue;
            };
            match self.handle.pull(&table, &key).await {
                Ok(value) => out.push((name, value)),
                Err(SmaxError::KeyNotFound { .. }) => debug!("{} vanished before its pull", name),
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    // ------------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------------

    /// Subscribes to a full name, or to everything under a prefix ending in `*`,
    /// for use with the wait calls.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid pattern or when the store cannot be reached.
    pub async fn subscribe(&self, pattern: &str) -> Result<()> {
        self.engine.subscribe(Pattern::new(pattern)?).await
    }

    /// Subscribes with a callback run on a background worker for every update.
    ///
    /// Wildcard subscriptions deliver the struct they cover; exact ones deliver
    /// the variable itself. Updates reach one callback in order. A panicking
    /// callback is logged and keeps receiving.
    ///
    /// # Errors
    ///
    /// See [`Self::subscribe`].
    pub async fn subscribe_with_callback<F>(&self, pattern: &str, callback: F) -> Result<()>
    where
        F: Fn(SmaxValue) + Send + Sync + 'static,
    {
        let pattern = Pattern::new(pattern)?;
        self.engine
            .subscribe_worker(pattern, Delivery::Callback(Arc::new(callback)))
            .await
    }

    /// Subscribes and returns the pulled updates as a stream.
    ///
    /// # Errors
    ///
    /// See [`Self::subscribe`].
    pub async fn subscribe_stream(&self, pattern: &str) -> Result<ValueStream> {
        let pattern = Pattern::new(pattern)?;
        let (tx, rx) = mpsc::channel(self.capacity);
        self.engine.subscribe_worker(pattern, Delivery::Stream(tx)).await?;
        Ok(ValueStream::new(rx))
    }

    /// Waits for an update matching `pattern` among the subscriptions and pulls it.
    ///
    /// A wildcard pattern pulls the struct it covers.
    ///
    /// # Errors
    ///
    /// - [`SmaxError::NotSubscribed`] without poll subscriptions
    /// - [`SmaxError::Timeout`] once `timeout` elapses
    /// - [`SmaxError::Connection`] when reconnecting gives up
    pub async fn wait_on_subscribed(
        &self,
        pattern: &str,
        timeout: Option<Duration>,
    ) -> Result<SmaxValue> {
        let filter = Pattern::new(pattern)?;
        self.engine.wait_value(Some(&filter), timeout).await
    }

    /// Waits for any subscribed update and pulls the variable that changed.
    ///
    /// # Errors
    ///
    /// See [`Self::wait_on_subscribed`].
    pub async fn wait_on_any_subscribed(&self, timeout: Option<Duration>) -> Result<SmaxValue> {
        self.engine.wait_value(None, timeout).await
    }

    /// Like [`Self::wait_on_subscribed`], returning the notification without pulling.
    ///
    /// # Errors
    ///
    /// See [`Self::wait_on_subscribed`].
    pub async fn wait_on_subscribed_notification(
        &self,
        pattern: &str,
        timeout: Option<Duration>,
    ) -> Result<Notification> {
        let filter = Pattern::new(pattern)?;
        self.engine.wait(Some(&filter), timeout).await
    }

    /// Like [`Self::wait_on_any_subscribed`], returning the notification without pulling.
    ///
    /// # Errors
    ///
    /// See [`Self::wait_on_subscribed`].
    pub async fn wait_on_any_subscribed_notification(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Notification> {
        self.engine.wait(None, timeout).await
    }

    /// Removes one subscription, or all of them when `pattern` is `None`.
    ///
    /// Callback workers on the pattern are stopped and joined.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid pattern or a failed store request.
    pub async fn unsubscribe(&self, pattern: Option<&str>) -> Result<()> {
        let pattern = pattern.map(Pattern::new).transpose()?;
        self.engine.unsubscribe(pattern.as_ref()).await
    }

    /// Stops every subscription and worker.
    ///
    /// # Errors
    ///
    /// Returns an error if tearing down subscriptions fails.
    pub async fn disconnect(&self) -> Result<()> {
        self.engine.unsubscribe(None).await?;
        info!("disconnected ({})", self.origin());
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn worker_count(&self) -> usize {
        self.engine.worker_count()
    }
}

impl Drop for SmaxClient {
    fn drop(&mut self) {
        self.engine.signal_shutdown();
    }
}

fn apply_meta(node: &mut SmaxValue, found: &mut HashMap<String, Vec<(&str, String)>>) {
    if let Some(fields) = node.fields_mut() {
        for child in fields.values_mut() {
            apply_meta(child, found);
        }
    } else if let Some(entries) = found.remove(node.name()) {
        for (field, text) in entries {
            node.meta.set_optional(field, text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{Dim, StringArray};
    use ndarray::array;

    type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

    fn client() -> (Arc<MemoryStore>, SmaxClient) {
        let store = Arc::new(MemoryStore::new());
        let mut config = SmaxConfig::default();
        config.retry.initial_backoff_ms = 1;
        config.retry.max_backoff_ms = 5;
        let client = SmaxClient::with_store(store.clone(), "host:test", &config);
        (store, client)
    }

    #[tokio::test]
    async fn scalars_round_trip_with_metadata() -> TestResult {
        let (_store, client) = client();
        client.share("test:scalar", "temp", 21.5_f64).await?;
        let value = client.pull("test:scalar", "temp").await?;

        assert_eq!(value.value(), Some(&Value::from(21.5_f64)));
        assert_eq!(value.type_tag, TypeTag::Float64);
        assert_eq!(value.dim, Dim::Scalar);
        assert_eq!(value.name(), "test:scalar:temp");
        assert_eq!(value.meta.origin, "host:test");
        assert_eq!(value.meta.seq, Some(1));
        assert!(value.meta.timestamp.is_some());

        client.share("test:scalar", "temp", 22.0_f64).await?;
        assert_eq!(client.pull("test:scalar", "temp").await?.meta.seq, Some(2));
        Ok(())
    }

    #[tokio::test]
    async fn integer_boundaries_promote() -> TestResult {
        let (_store, client) = client();
        for (n, tag) in [
            (-129, TypeTag::Int16),
            (-128, TypeTag::Int8),
            (127, TypeTag::Int8),
            (128, TypeTag::Int16),
        ] {
            client.share("test:ints", "n", Value::integer(n)?).await?;
            let value = client.pull("test:ints", "n").await?;
            assert_eq!(value.type_tag, tag, "{n}");
            assert_eq!(value.value().and_then(Value::as_i64), Some(n as i64));
        }

        client.share_as("test:ints", "forced", 128_i32, TypeTag::Int8).await?;
        let forced = client.pull("test:ints", "forced").await?;
        assert_ne!(forced.type_tag, TypeTag::Int8);
        assert!(forced.type_tag.holds_int(128));
        Ok(())
    }

    #[tokio::test]
    async fn float32_overflow_promotes_to_float64() -> TestResult {
        let (_store, client) = client();
        client
            .share_as("test:floats", "big", 1.23456789e123_f64, TypeTag::Float32)
            .await?;
        let value = client.pull("test:floats", "big").await?;
        assert_eq!(value.type_tag, TypeTag::Float64);
        assert_eq!(value.value(), Some(&Value::from(1.23456789e123_f64)));
        Ok(())
    }

    #[tokio::test]
    async fn arrays_keep_their_shape() -> TestResult {
        let (_store, client) = client();
        let grid = array![[0.0, 1.1], [1.12345, 2.123456], [-1.654321, -1.54321]];
        client.share("test:arrays", "grid", grid.clone()).await?;
        let value = client.pull("test:arrays", "grid").await?;
        assert_eq!(value.dim, Dim::Shape(vec![3, 2]));
        assert_eq!(value.value(), Some(&Value::from(grid)));

        client.share("test:arrays", "words", vec!["i", "am", "list"]).await?;
        let words = client.pull("test:arrays", "words").await?;
        assert_eq!(words.type_tag, TypeTag::String);
        assert_eq!(words.dim, Dim::Vector(3));
        assert_eq!(words.value(), Some(&Value::from(vec!["i", "am", "list"])));

        client
            .share("test:arrays", "spaced", vec!["with space", "two  spaces"])
            .await?;
        let spaced = client.pull("test:arrays", "spaced").await?;
        assert_eq!(
            spaced.value().and_then(Value::as_strings).map(StringArray::items),
            Some(&["with space".to_string(), "two  spaces".to_string()][..])
        );
        Ok(())
    }

    #[tokio::test]
    async fn structs_round_trip_with_full_names() -> TestResult {
        let (_store, client) = client();
        let roaches = Value::structure()
            .with_field(
                "roach2-03",
                Value::structure()
                    .with_field("temp", Value::integer(100)?)
                    .with_field("firmware", 2.0_f64),
            )
            .with_field(
                "roach2-04",
                Value::structure()
                    .with_field("temp", Value::integer(0)?)
                    .with_field("firmware", 2.1_f64),
            );
        client.share("table", "key", roaches.clone()).await?;

        let tree = client.pull("table", "key").await?;
        assert!(tree.is_struct());
        assert_eq!(tree.name(), "table:key");
        assert_eq!(tree.to_value(), roaches);

        for board in ["roach2-03", "roach2-04"] {
            for field in ["temp", "firmware"] {
                let leaf = tree.get_path(&format!("{board}:{field}"));
                let expected = format!("table:key:{board}:{field}");
                assert_eq!(leaf.map(SmaxValue::name), Some(expected.as_str()));
                assert_eq!(leaf.map(|l| l.dim.clone()), Some(Dim::Scalar));
            }
        }
        let temp = tree.get_path("roach2-03:temp");
        assert_eq!(temp.map(|t| t.type_tag), Some(TypeTag::Int8));

        // A leaf's full name pulls that leaf directly.
        let direct = client.pull("table:key:roach2-04", "firmware").await?;
        assert_eq!(direct.value(), Some(&Value::from(2.1_f64)));
        Ok(())
    }

    #[tokio::test]
    async fn missing_keys_are_reported() {
        let (_store, client) = client();
        let result = client.pull("test:none", "here").await;
        assert!(matches!(
            result,
            Err(SmaxError::KeyNotFound { table, key }) if table == "test:none" && key == "here"
        ));
    }

    #[tokio::test]
    async fn codec_errors_name_the_variable() {
        let (_store, client) = client();
        let result = client
            .share_as("test:bad", "raw", vec![1_i8, 2], TypeTag::Raw)
            .await;
        assert!(matches!(
            &result,
            Err(SmaxError::TypeMismatch { name, tag: Some(TypeTag::Raw), .. }) if name == "test:bad:raw"
        ));
        assert!(result.is_err_and(|e| e.to_string().contains("as raw")));

        let result = client
            .share_as("test:bad", "tree", Value::structure().with_field("a", 1_i8), TypeTag::Int32)
            .await;
        assert!(matches!(result, Err(SmaxError::TypeMismatch { tag: Some(TypeTag::Int32), .. })));
    }

    #[tokio::test]
    async fn offline_share_surfaces_after_retries() {
        let (store, client) = client();
        store.set_offline(true);
        let result = client.share("test:offline", "v", 1_i8).await;
        assert!(result.is_err_and(|e| e.is_connection()));
    }

    #[tokio::test]
    async fn optional_metadata_is_best_effort() -> TestResult {
        let (store, client) = client();
        client
            .share_with(
                "test:meta",
                "speed",
                3.5_f64,
                ShareOptions::new()
                    .with_meta("unit", "m/s")
                    .with_meta("description", "wind speed"),
            )
            .await?;

        assert_eq!(client.pull_meta("unit", "test:meta:speed").await?.as_deref(), Some("m/s"));
        let plain = client.pull("test:meta", "speed").await?;
        assert_eq!(plain.meta.unit, None);

        let full = client.pull_with_meta("test:meta", "speed").await?;
        assert_eq!(full.meta.unit.as_deref(), Some("m/s"));
        assert_eq!(full.meta.description.as_deref(), Some("wind speed"));
        assert_eq!(full.meta.coords, None);

        store.set_offline(true);
        assert_eq!(client.pull_meta("unit", "test:meta:speed").await?, None);
        client.push_meta("unit", "test:meta:speed", "knots").await?;
        Ok(())
    }

    #[tokio::test]
    async fn struct_metadata_lands_on_leaves() -> TestResult {
        let (_store, client) = client();
        client
            .share("test", "sonde", Value::structure().with_field("depth", 4.0_f64))
            .await?;
        client.push_meta("unit", "test:sonde:depth", "m").await?;

        let tree = client.pull_with_meta("test", "sonde").await?;
        let depth = tree.get("depth");
        assert_eq!(depth.and_then(|d| d.meta.unit.as_deref()), Some("m"));
        Ok(())
    }

    #[tokio::test]
    async fn invalid_patterns_are_rejected() {
        let (_store, client) = client();
        assert!(matches!(client.subscribe("").await, Err(SmaxError::InvalidPattern(_))));
        assert!(matches!(
            client.subscribe("has space").await,
            Err(SmaxError::InvalidPattern(_))
        ));
    }

    #[tokio::test]
    async fn disconnect_stops_workers() -> TestResult {
        let (_store, client) = client();
        client.subscribe_with_callback("test:bye*", |_| {}).await?;
        client.subscribe("test:bye:x").await?;
        assert_eq!(client.worker_count(), 1);

        client.disconnect().await?;
        assert_eq!(client.worker_count(), 0);
        let result = client.wait_on_any_subscribed(Some(Duration::from_millis(10))).await;
        assert!(matches!(result, Err(SmaxError::NotSubscribed)));
        Ok(())
    }

    #[tokio::test]
    async fn purge_builds_the_pattern_from_table_and_key() -> TestResult {
        let (_store, client) = client();
        client.share("test:purge", "a", 1_i8).await?;
        client.share("test:purge", "b", 2_i8).await?;
        client.share("test:keep", "a", 3_i8).await?;

        assert_eq!(client.purge(Some("test:purge"), Some("a")).await?, 1);
        assert!(matches!(
            client.pull("test:purge", "a").await,
            Err(SmaxError::KeyNotFound { .. })
        ));
        // The remaining field plus the table's registration in `test`.
        assert_eq!(client.purge(Some("test:p*"), None).await?, 2);
        assert!(client.pull("test:keep", "a").await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn purge_volatile_keeps_persistent_tables() -> TestResult {
        let (store, client) = client();
        store.mark_persistent("site");
        client.share("site:wx", "temp", 1_i8).await?;
        client.share("scratch", "x", 1_i8).await?;

        assert_eq!(client.purge_volatile().await?, 1);
        assert!(client.pull("site:wx", "temp").await.is_ok());
        assert!(client.pull("scratch", "x").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn dsm_host_defaults_to_target() -> TestResult {
        let (store, client) = client();
        store.map_dsm("crate1", "crate1", "DSM_TEMP", "crate1:env");
        store.map_dsm("hal", "crate1", "DSM_TEMP", "hal:env");

        assert_eq!(
            client.dsm_get_table("crate1", "DSM_TEMP", None).await?,
            Some("crate1:env".to_string())
        );
        assert_eq!(
            client.dsm_get_table("crate1", "DSM_TEMP", Some("hal")).await?,
            Some("hal:env".to_string())
        );
        assert_eq!(client.dsm_get_table("crate2", "DSM_TEMP", None).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn time_listings_pull_each_variable() -> TestResult {
        let (_store, client) = client();
        client.share("aged", "old", 1_i8).await?;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let cutoff = Utc::now();
        tokio::time::sleep(Duration::from_millis(5)).await;
        client.share("fresh", "new", 2.5_f64).await?;

        let newer = client.list_newer_than(cutoff).await?;
        assert_eq!(newer.len(), 1);
        assert_eq!(newer[0].0, "fresh:new");
        assert_eq!(newer[0].1.value(), Some(&Value::from(2.5_f64)));

        let older = client.list_older_than(cutoff).await?;
        assert_eq!(older.len(), 1);
        assert_eq!(older[0].0, "aged:old");
        Ok(())
    }

    #[tokio::test]
    async fn numeric_listings() -> TestResult {
        let (_store, client) = client();
        client.share("test:adc", "ch1", 0_i8).await?;
        client.share("test:adc", "ch2", 7.5_f64).await?;
        client.share("test:adc", "ch3", -2_i8).await?;
        client.share("test:adc", "label", "zero").await?;

        let higher = client.list_higher_than("test:adc", 1.0).await?;
        assert_eq!(higher.len(), 1);
        assert_eq!(higher[0].0, "ch2");
        assert_eq!(higher[0].1.name(), "test:adc:ch2");

        assert_eq!(client.list_zeroes("test:adc").await?, vec!["ch1".to_string()]);
        Ok(())
    }
}
