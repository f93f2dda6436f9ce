//! In-process store emulating the SMA-X server scripts.
//!
//! Useful for tests and offline runs. Values, struct registration, struct
//! dumps, purges, listings and pub/sub routing behave like the server; nothing
//! is written to disk, and "persistent" only shields a table from
//! [`Store::purge_volatile`]. Connection faults can be injected with [`MemoryStore::set_offline`]
//! and [`MemoryStore::drop_subscribers`].

use crate::error::SmaxError;
use crate::store::{RawNotification, RawRecord, Store, StructDump, StructTable, Subscriber, TableUpdate};
use crate::types::{CHANNEL_PREFIX, Timestamp, TypeTag, glob_match, join_path, split_path};
use crate::Result;
use futures::future::BoxFuture;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    type_tag: String,
    dim: String,
    timestamp: Timestamp,
    origin: String,
    serial: u64,
}

impl Entry {
    fn record(&self) -> RawRecord {
        RawRecord {
            value: self.value.clone(),
            type_tag: self.type_tag.clone(),
            dim: self.dim.clone(),
            timestamp: self.timestamp.to_string(),
            origin: self.origin.clone(),
            serial: self.serial.to_string(),
        }
    }

    /// The value read as one number, if it is one.
    fn number(&self) -> Option<f64> {
        std::str::from_utf8(&self.value).ok()?.trim().parse().ok()
    }
}

#[derive(Debug, Default)]
struct State {
    tables: HashMap<String, BTreeMap<String, Entry>>,
    meta: HashMap<(String, String), String>,
    persistent: HashSet<String>,
    dsm: HashMap<(String, String, String), String>,
    offline: bool,
}

impl State {
    fn check_online(&self, context: &str) -> Result<()> {
        if self.offline {
            return Err(SmaxError::connection(context, "store is offline"));
        }
        Ok(())
    }

    fn write(&mut self, table: &str, field: &str, value: &[u8], type_tag: &str, dim: &str, origin: &str) {
        let fields = self.tables.entry(table.to_string()).or_default();
        let serial = fields.get(field).map_or(1, |e| e.serial + 1);
        fields.insert(
            field.to_string(),
            Entry {
                value: value.to_vec(),
                type_tag: type_tag.to_string(),
                dim: dim.to_string(),
                timestamp: Timestamp::now(),
                origin: origin.to_string(),
                serial,
            },
        );
    }

    /// Registers `table` as a struct field of its parent, up to the top level.
    fn register_parents(&mut self, table: &str, origin: &str) {
        let mut name = table.to_string();
        while let Some((parent, child)) = split_path(&name) {
            let registered = self
                .tables
                .get(&parent)
                .and_then(|fields| fields.get(&child))
                .is_some_and(|e| e.type_tag == TypeTag::Struct.as_str());
            if !registered {
                self.write(&parent, &child, name.as_bytes(), TypeTag::Struct.as_str(), "1", origin);
            }
            name = parent;
        }
    }

    fn is_persistent(&self, table: &str) -> bool {
        self.persistent.iter().any(|p| {
            table
                .strip_prefix(p.as_str())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with(':'))
        })
    }

    /// Full names of every variable whose entry passes `keep`, sorted.
    fn list_where(&self, keep: impl Fn(&Entry) -> bool) -> Vec<String> {
        let keep = &keep;
        let mut names: Vec<String> = self
            .tables
            .iter()
            .flat_map(|(table, fields)| {
                fields
                    .iter()
                    .filter(move |(_, entry)| keep(entry))
                    .map(move |(field, _)| join_path([table, field]))
            })
            .collect();
        names.sort();
        names
    }

    /// Fields of `table` whose number passes `keep`, in field order.
    fn fields_where(&self, table: &str, keep: impl Fn(f64) -> bool) -> Vec<String> {
        self.tables
            .get(table)
            .map(|fields| {
                fields
                    .iter()
                    .filter(|(_, entry)| entry.number().is_some_and(&keep))
                    .map(|(field, _)| field.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
struct Published {
    channel: String,
    payload: String,
}

/// An in-memory [`Store`].
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<State>,
    events: broadcast::Sender<Published>,
    generation: watch::Sender<u64>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (generation, _) = watch::channel(0);
        Self {
            state: Mutex::new(State::default()),
            events,
            generation,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every primitive fail with a connection error until set back.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
        debug!("memory store offline={}", offline);
    }

    /// Breaks every open subscriber, as if their connections dropped.
    pub fn drop_subscribers(&self) {
        self.generation.send_modify(|g| *g += 1);
        debug!("memory store dropped its subscribers");
    }

    /// Shields `table` and everything below it from [`Store::purge_volatile`].
    pub fn mark_persistent(&self, table: &str) {
        self.lock().persistent.insert(table.to_string());
    }

    /// Maps a DSM `(host, target, key)` triple to an SMA-X table.
    pub fn map_dsm(&self, host: &str, target: &str, key: &str, table: &str) {
        self.lock().dsm.insert(
            (host.to_string(), target.to_string(), key.to_string()),
            table.to_string(),
        );
    }

    /// Every field of `table`, in field-name order.
    #[must_use]
    pub fn table(&self, table: &str) -> Option<Vec<(String, RawRecord)>> {
        self.lock().tables.get(table).map(|fields| {
            fields
                .iter()
                .map(|(name, entry)| (name.clone(), entry.record()))
                .collect()
        })
    }

    fn broadcast(&self, channel: String, payload: &str) {
        debug!("publish {} <- {}", channel, payload);
        // No receivers is not an error for pub/sub.
        let _ = self.events.send(Published {
            channel,
            payload: payload.to_string(),
        });
    }

    fn struct_dump(state: &State, root: &str) -> StructDump {
        let mut tables = Vec::new();
        let mut visited = HashSet::new();
        let mut pending = vec![root.to_string()];
        while let Some(name) = pending.pop() {
            if !visited.insert(name.clone()) {
                continue;
            }
            let Some(fields) = state.tables.get(&name) else {
                continue;
            };
            let children: Vec<String> = fields
                .iter()
                .filter(|(_, e)| e.type_tag == TypeTag::Struct.as_str())
                .map(|(field, _)| format!("{name}:{field}"))
                .collect();
            // Reverse so the stack pops children in field order.
            pending.extend(children.into_iter().rev());
            tables.push(StructTable {
                name,
                fields: fields.iter().map(|(f, e)| (f.clone(), e.record())).collect(),
            });
        }
        StructDump { tables }
    }
}

impl Store for MemoryStore {
    fn get_with_meta<'a>(
        &'a self,
        table: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<RawRecord>>> {
        Box::pin(async move {
            let state = self.lock();
            state.check_online("get")?;
            Ok(state
                .tables
                .get(table)
                .and_then(|fields| fields.get(key))
                .map(Entry::record))
        })
    }

    fn get_struct<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<StructDump>> {
        Box::pin(async move {
            let state = self.lock();
            state.check_online("get struct")?;
            Ok(Self::struct_dump(&state, id))
        })
    }

    fn set_with_meta<'a>(
        &'a self,
        table: &'a str,
        origin: &'a str,
        key: &'a str,
        value: &'a str,
        type_tag: &'a str,
        dim: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            {
                let mut state = self.lock();
                state.check_online("set")?;
                state.write(table, key, value.as_bytes(), type_tag, dim, origin);
                state.register_parents(table, origin);
            }
            self.broadcast(format!("{CHANNEL_PREFIX}{table}:{key}"), origin);
            Ok(())
        })
    }

    fn multi_set_with_meta<'a>(
        &'a self,
        origin: &'a str,
        updates: &'a [TableUpdate],
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut channels = Vec::new();
            {
                let mut state = self.lock();
                state.check_online("multi set")?;
                if let Some(bad) = updates.iter().find(|u| u.table.is_empty() || u.fields.is_empty()) {
                    return Err(SmaxError::protocol(
                        "multi set",
                        format!("update of '{}' has no table or no fields", bad.table),
                    ));
                }
                for update in updates {
                    for field in &update.fields {
                        state.write(
                            &update.table,
                            &field.field,
                            field.value.as_bytes(),
                            &field.type_tag,
                            &field.dim,
                            origin,
                        );
                    }
                    state.register_parents(&update.table, origin);
                    channels.push(update.table.clone());
                    if update.notify {
                        let mut name = update.table.as_str();
                        while let Some((parent, _)) = name.rsplit_once(':') {
                            if !parent.contains(':') {
                                break;
                            }
                            channels.push(parent.to_string());
                            name = parent;
                        }
                    }
                }
            }
            for table in channels {
                self.broadcast(format!("{CHANNEL_PREFIX}{table}"), origin);
            }
            Ok(())
        })
    }

    fn get_meta_field<'a>(
        &'a self,
        meta: &'a str,
        table: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let state = self.lock();
            state.check_online("get meta")?;
            Ok(state.meta.get(&(meta.to_string(), table.to_string())).cloned())
        })
    }

    fn set_meta_field<'a>(
        &'a self,
        meta: &'a str,
        table: &'a str,
        value: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.check_online("set meta")?;
            state
                .meta
                .insert((meta.to_string(), table.to_string()), value.to_string());
            Ok(())
        })
    }

    fn publish<'a>(&'a self, channel: &'a str, message: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.lock().check_online("publish")?;
            self.broadcast(channel.to_string(), message);
            Ok(())
        })
    }

    fn purge<'a>(&'a self, pattern: &'a str) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.check_online("purge")?;
            let mut removed = 0;
            state.tables.retain(|table, fields| {
                if glob_match(pattern, table) {
                    removed += fields.len();
                    return false;
                }
                let before = fields.len();
                fields.retain(|field, _| !glob_match(pattern, &join_path([table, field])));
                removed += before - fields.len();
                !fields.is_empty()
            });
            state.meta.retain(|(_, name), _| !glob_match(pattern, name));
            debug!("purged {} variables matching {}", removed, pattern);
            Ok(removed as u64)
        })
    }

    fn purge_volatile(&self) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.check_online("purge volatile")?;
            let volatile: Vec<String> = state
                .tables
                .keys()
                .filter(|table| !state.is_persistent(table))
                .cloned()
                .collect();
            let mut removed = 0;
            for table in volatile {
                removed += state.tables.remove(&table).map_or(0, |fields| fields.len());
            }
            let kept: Vec<(String, String)> = state
                .meta
                .keys()
                .filter(|(_, name)| state.is_persistent(name))
                .cloned()
                .collect();
            state.meta.retain(|key, _| kept.contains(key));
            Ok(removed as u64)
        })
    }

    fn dsm_get_table<'a>(
        &'a self,
        host: &'a str,
        target: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let state = self.lock();
            state.check_online("dsm lookup")?;
            Ok(state
                .dsm
                .get(&(host.to_string(), target.to_string(), key.to_string()))
                .cloned())
        })
    }

    fn list_newer_than(&self, cutoff: Timestamp) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            let state = self.lock();
            state.check_online("list newer")?;
            Ok(state.list_where(|entry| entry.timestamp > cutoff))
        })
    }

    fn list_older_than(&self, cutoff: Timestamp) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            let state = self.lock();
            state.check_online("list older")?;
            Ok(state.list_where(|entry| entry.timestamp < cutoff))
        })
    }

    fn list_higher_than<'a>(
        &'a self,
        table: &'a str,
        threshold: f64,
    ) -> BoxFuture<'a, Result<Vec<String>>> {
        Box::pin(async move {
            let state = self.lock();
            state.check_online("list higher")?;
            Ok(state.fields_where(table, |n| n > threshold))
        })
    }

    fn list_zeroes<'a>(&'a self, table: &'a str) -> BoxFuture<'a, Result<Vec<String>>> {
        Box::pin(async move {
            let state = self.lock();
            state.check_online("list zeroes")?;
            Ok(state.fields_where(table, |n| n == 0.0))
        })
    }

    fn ping(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.lock().check_online("ping") })
    }

    fn subscriber(&self) -> BoxFuture<'_, Result<Box<dyn Subscriber>>> {
        Box::pin(async move {
            self.lock().check_online("subscribe")?;
            let generation = self.generation.subscribe();
            let born = *generation.borrow();
            Ok(Box::new(MemorySubscriber {
                events: self.events.subscribe(),
                generation,
                born,
                exact: HashSet::new(),
                patterns: Vec::new(),
            }) as Box<dyn Subscriber>)
        })
    }
}

/// A subscriber on a [`MemoryStore`].
struct MemorySubscriber {
    events: broadcast::Receiver<Published>,
    generation: watch::Receiver<u64>,
    born: u64,
    exact: HashSet<String>,
    patterns: Vec<String>,
}

impl MemorySubscriber {
    fn check_alive(&self) -> Result<()> {
        if *self.generation.borrow() != self.born {
            return Err(SmaxError::connection("pub/sub", "subscriber connection dropped"));
        }
        Ok(())
    }

    fn route(&self, event: Published) -> Option<RawNotification> {
        let pattern = if self.exact.contains(&event.channel) {
            None
        } else {
            Some(
                self.patterns
                    .iter()
                    .find(|p| glob_match(p, &event.channel))?
                    .clone(),
            )
        };
        Some(RawNotification {
            channel: event.channel,
            pattern,
            payload: event.payload.into_bytes(),
        })
    }

    async fn next_routed(&mut self) -> Result<RawNotification> {
        loop {
            tokio::select! {
                changed = self.generation.changed() => {
                    if changed.is_err() {
                        return Err(SmaxError::connection("pub/sub", "store was dropped"));
                    }
                    self.check_alive()?;
                }
                event = self.events.recv() => match event {
                    Ok(event) => {
                        if let Some(notification) = self.route(event) {
                            return Ok(notification);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("subscriber lagged, {} notifications lost", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(SmaxError::connection("pub/sub", "store was dropped"));
                    }
                },
            }
        }
    }
}

impl Subscriber for MemorySubscriber {
    fn subscribe_exact<'a>(&'a mut self, channel: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.check_alive()?;
            self.exact.insert(channel.to_string());
            Ok(())
        })
    }

    fn subscribe_pattern<'a>(&'a mut self, pattern: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.check_alive()?;
            if !self.patterns.iter().any(|p| p == pattern) {
                self.patterns.push(pattern.to_string());
            }
            Ok(())
        })
    }

    fn unsubscribe_exact<'a>(&'a mut self, channel: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.check_alive()?;
            self.exact.remove(channel);
            Ok(())
        })
    }

    fn unsubscribe_pattern<'a>(&'a mut self, pattern: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.check_alive()?;
            self.patterns.retain(|p| p != pattern);
            Ok(())
        })
    }

    fn next_message(
        &mut self,
        timeout: Option<Duration>,
    ) -> BoxFuture<'_, Result<Option<RawNotification>>> {
        Box::pin(async move {
            self.check_alive()?;
            match timeout {
                Some(limit) => match tokio::time::timeout(limit, self.next_routed()).await {
                    Ok(routed) => routed.map(Some),
                    Err(_) => Ok(None),
                },
                None => self.next_routed().await.map(Some),
            }
        })
    }
}
