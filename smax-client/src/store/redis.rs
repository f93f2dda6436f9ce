//! Store backed by a live SMA-X Redis server.

use crate::error::SmaxError;
use crate::store::{RawNotification, RawRecord, Store, StructDump, StructTable, Subscriber, TableUpdate};
use crate::types::Timestamp;
use crate::Result;
use futures::StreamExt;
use futures::future::BoxFuture;
use redis::aio::{ConnectionManager, PubSub};
use redis::{Client, ErrorKind, Value as RedisValue};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Hash holding the SHA1 of every server-side script.
const SCRIPT_TABLE: &str = "scripts";

/// Server-side scripts this client calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Script {
    Get,
    Set,
    MultiSet,
    GetStruct,
    Purge,
    PurgeVolatile,
    DsmGetTable,
    ListNewerThan,
    ListOlderThan,
    ListHigherThan,
    ListZeroes,
}

impl Script {
    const COUNT: usize = 11;

    const ALL: [Script; Self::COUNT] = [
        Self::Get,
        Self::Set,
        Self::MultiSet,
        Self::GetStruct,
        Self::Purge,
        Self::PurgeVolatile,
        Self::DsmGetTable,
        Self::ListNewerThan,
        Self::ListOlderThan,
        Self::ListHigherThan,
        Self::ListZeroes,
    ];

    const fn name(self) -> &'static str {
        match self {
            Self::Get => "HGetWithMeta",
            Self::Set => "HSetWithMeta",
            Self::MultiSet => "HMSetWithMeta",
            Self::GetStruct => "GetStruct",
            Self::Purge => "Purge",
            Self::PurgeVolatile => "PurgeVolatile",
            Self::DsmGetTable => "DSMGetTable",
            Self::ListNewerThan => "ListNewerThan",
            Self::ListOlderThan => "ListOlderThan",
            Self::ListHigherThan => "ListHigherThan",
            Self::ListZeroes => "ListZeroes",
        }
    }
}

/// SHA1 digests of the loaded scripts, in [`Script::ALL`] order.
#[derive(Debug, Default, Clone)]
struct ScriptShas([Option<String>; Script::COUNT]);

impl ScriptShas {
    fn get(&self, script: Script) -> Option<&str> {
        self.0[script as usize].as_deref()
    }
}

/// A [`Store`] on a Redis server with the SMA-X scripts loaded.
///
/// Requests share one auto-reconnecting [`ConnectionManager`]; every
/// [`Subscriber`] opens its own pub/sub connection.
pub struct RedisStore {
    client: Client,
    conn: ConnectionManager,
    shas: RwLock<ScriptShas>,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("server", &self.client.get_connection_info().addr)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connects to `url` and loads the script table.
    ///
    /// # Errors
    ///
    /// Returns a connection error if the server cannot be reached.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)
            .map_err(|e| SmaxError::connection("opening redis client", e.to_string()))?;
        let conn = ConnectionManager::new(client.clone()).await?;
        let store = Self {
            client,
            conn,
            shas: RwLock::new(ScriptShas::default()),
        };
        store.load_scripts().await?;
        info!("connected to SMA-X at {}", store.client.get_connection_info().addr);
        Ok(store)
    }

    async fn load_scripts(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut shas = ScriptShas::default();
        for script in Script::ALL {
            let sha: Option<String> = redis::cmd("HGET")
                .arg(SCRIPT_TABLE)
                .arg(script.name())
                .query_async(&mut conn)
                .await?;
            if sha.is_none() {
                warn!("script {} is not registered on the server", script.name());
            }
            shas.0[script as usize] = sha;
        }
        debug!("loaded script table: {:?}", shas);
        *self.shas.write().await = shas;
        Ok(())
    }

    async fn sha(&self, script: Script) -> Result<String> {
        if let Some(sha) = self.shas.read().await.get(script) {
            return Ok(sha.to_string());
        }
        self.load_scripts().await?;
        self.shas
            .read()
            .await
            .get(script)
            .map(str::to_string)
            .ok_or_else(|| {
                SmaxError::protocol(
                    "script lookup",
                    format!("{} is missing from the '{}' table", script.name(), SCRIPT_TABLE),
                )
            })
    }

    /// Runs a script, reloading the script table once on `NOSCRIPT`.
    async fn eval_script(&self, script: Script, keys: &[&str], args: &[&str]) -> Result<RedisValue> {
        let mut conn = self.conn.clone();
        let mut reloaded = false;
        loop {
            let sha = self.sha(script).await?;
            let reply: redis::RedisResult<RedisValue> = redis::cmd("EVALSHA")
                .arg(&sha)
                .arg(keys.len())
                .arg(keys)
                .arg(args)
                .query_async(&mut conn)
                .await;
            match reply {
                Err(e) if e.kind() == ErrorKind::NoScriptError && !reloaded => {
                    warn!("{} not cached on the server, reloading script table", script.name());
                    reloaded = true;
                    self.load_scripts().await?;
                }
                other => return Ok(other?),
            }
        }
    }
}

impl Store for RedisStore {
    fn get_with_meta<'a>(
        &'a self,
        table: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<RawRecord>>> {
        Box::pin(async move {
            let reply = self.eval_script(Script::Get, &[table], &[key]).await?;
            debug!("HGetWithMeta {}:{} -> {:?}", table, key, reply);
            parse_record_reply(reply)
        })
    }

    fn get_struct<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<StructDump>> {
        Box::pin(async move {
            let reply = self.eval_script(Script::GetStruct, &[id], &[]).await?;
            parse_struct_reply(reply)
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
            self.eval_script(Script::Set, &[table], &[origin, key, value, type_tag, dim])
                .await?;
            Ok(())
        })
    }

    fn multi_set_with_meta<'a>(
        &'a self,
        origin: &'a str,
        updates: &'a [TableUpdate],
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let mut reloaded = false;
            loop {
                let sha = self.sha(Script::MultiSet).await?;
                let mut pipe = redis::pipe();
                pipe.atomic();
                for update in updates {
                    let cmd = pipe.cmd("EVALSHA").arg(&sha).arg(1).arg(&update.table).arg(origin);
                    for field in &update.fields {
                        cmd.arg(&field.field)
                            .arg(&field.value)
                            .arg(&field.type_tag)
                            .arg(&field.dim);
                    }
                    if update.notify {
                        cmd.arg("T");
                    }
                }
                let reply: redis::RedisResult<RedisValue> = pipe.query_async(&mut conn).await;
                match reply {
                    Err(e) if e.kind() == ErrorKind::NoScriptError && !reloaded => {
                        warn!("HMSetWithMeta not cached on the server, reloading script table");
                        reloaded = true;
                        self.load_scripts().await?;
                    }
                    other => {
                        other?;
                        return Ok(());
                    }
                }
            }
        })
    }

    fn get_meta_field<'a>(
        &'a self,
        meta: &'a str,
        table: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let value: Option<String> = redis::cmd("HGET")
                .arg(meta_table(meta))
                .arg(table)
                .query_async(&mut conn)
                .await?;
            Ok(value)
        })
    }

    fn set_meta_field<'a>(
        &'a self,
        meta: &'a str,
        table: &'a str,
        value: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let _: i64 = redis::cmd("HSET")
                .arg(meta_table(meta))
                .arg(table)
                .arg(value)
                .query_async(&mut conn)
                .await?;
            Ok(())
        })
    }

    fn publish<'a>(&'a self, channel: &'a str, message: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let _: i64 = redis::cmd("PUBLISH")
                .arg(channel)
                .arg(message)
                .query_async(&mut conn)
                .await?;
            Ok(())
        })
    }

    fn purge<'a>(&'a self, pattern: &'a str) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            let reply = self.eval_script(Script::Purge, &[], &[pattern]).await?;
            reply_count(&reply, "Purge")
        })
    }

    fn purge_volatile(&self) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async move {
            let reply = self.eval_script(Script::PurgeVolatile, &[], &[]).await?;
            reply_count(&reply, "PurgeVolatile")
        })
    }

    fn dsm_get_table<'a>(
        &'a self,
        host: &'a str,
        target: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let reply = self.eval_script(Script::DsmGetTable, &[], &[host, target, key]).await?;
            Ok(reply_bytes(&reply).map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
        })
    }

    fn list_newer_than(&self, cutoff: Timestamp) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            let cutoff = cutoff.to_string();
            let reply = self.eval_script(Script::ListNewerThan, &[], &[cutoff.as_str()]).await?;
            parse_name_list(reply, "ListNewerThan")
        })
    }

    fn list_older_than(&self, cutoff: Timestamp) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            let cutoff = cutoff.to_string();
            let reply = self.eval_script(Script::ListOlderThan, &[], &[cutoff.as_str()]).await?;
            parse_name_list(reply, "ListOlderThan")
        })
    }

    fn list_higher_than<'a>(
        &'a self,
        table: &'a str,
        threshold: f64,
    ) -> BoxFuture<'a, Result<Vec<String>>> {
        Box::pin(async move {
            let threshold = threshold.to_string();
            let reply = self
                .eval_script(Script::ListHigherThan, &[table], &[threshold.as_str()])
                .await?;
            parse_name_list(reply, "ListHigherThan")
        })
    }

    fn list_zeroes<'a>(&'a self, table: &'a str) -> BoxFuture<'a, Result<Vec<String>>> {
        Box::pin(async move {
            let reply = self.eval_script(Script::ListZeroes, &[table], &[]).await?;
            parse_name_list(reply, "ListZeroes")
        })
    }

    fn ping(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(())
        })
    }

    fn subscriber(&self) -> BoxFuture<'_, Result<Box<dyn Subscriber>>> {
        Box::pin(async move {
            let pubsub = self.client.get_async_pubsub().await?;
            Ok(Box::new(RedisSubscriber { pubsub }) as Box<dyn Subscriber>)
        })
    }
}

/// Hash holding one kind of optional metadata, e.g. `<description>`.
fn meta_table(meta: &str) -> String {
    format!("<{meta}>")
}

/// A dedicated Redis pub/sub connection.
struct RedisSubscriber {
    pubsub: PubSub,
}

impl Subscriber for RedisSubscriber {
    fn subscribe_exact<'a>(&'a mut self, channel: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { Ok(self.pubsub.subscribe(channel).await?) })
    }

    fn subscribe_pattern<'a>(&'a mut self, pattern: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { Ok(self.pubsub.psubscribe(pattern).await?) })
    }

    fn unsubscribe_exact<'a>(&'a mut self, channel: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { Ok(self.pubsub.unsubscribe(channel).await?) })
    }

    fn unsubscribe_pattern<'a>(&'a mut self, pattern: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { Ok(self.pubsub.punsubscribe(pattern).await?) })
    }

    fn next_message(
        &mut self,
        timeout: Option<Duration>,
    ) -> BoxFuture<'_, Result<Option<RawNotification>>> {
        Box::pin(async move {
            let mut messages = std::pin::pin!(self.pubsub.on_message());
            let next = match timeout {
                Some(limit) => match tokio::time::timeout(limit, messages.next()).await {
                    Ok(next) => next,
                    Err(_) => return Ok(None),
                },
                None => messages.next().await,
            };
            let msg = next.ok_or_else(|| {
                SmaxError::connection("pub/sub listen", "subscriber connection closed")
            })?;
            let pattern = if msg.from_pattern() {
                msg.get_pattern::<String>().ok()
            } else {
                None
            };
            Ok(Some(RawNotification {
                channel: msg.get_channel_name().to_string(),
                pattern,
                payload: msg.get_payload_bytes().to_vec(),
            }))
        })
    }
}

// ============================================================================
// Reply parsing
// ============================================================================

fn reply_bytes(value: &RedisValue) -> Option<Vec<u8>> {
    match value {
        RedisValue::BulkString(bytes) => Some(bytes.clone()),
        RedisValue::SimpleString(text) => Some(text.as_bytes().to_vec()),
        RedisValue::Int(n) => Some(n.to_string().into_bytes()),
        RedisValue::Double(n) => Some(n.to_string().into_bytes()),
        RedisValue::Okay => Some(b"OK".to_vec()),
        _ => None,
    }
}

fn reply_text(value: &RedisValue) -> String {
    reply_bytes(value)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

fn reply_array(value: RedisValue, context: &str) -> Result<Vec<RedisValue>> {
    match value {
        RedisValue::Array(items) => Ok(items),
        RedisValue::Nil => Ok(Vec::new()),
        other => Err(SmaxError::protocol(
            context,
            format!("expected an array, got {other:?}"),
        )),
    }
}

fn reply_count(value: &RedisValue, context: &str) -> Result<u64> {
    match value {
        RedisValue::Nil => Ok(0),
        RedisValue::Int(n) => Ok(u64::try_from(*n).unwrap_or(0)),
        other => reply_text(other).trim().parse().map_err(|_| {
            SmaxError::protocol(context, format!("expected a count, got {other:?}"))
        }),
    }
}

/// Parses a list of names; entries given as `[name, ...]` pairs use their first element.
fn parse_name_list(reply: RedisValue, context: &str) -> Result<Vec<String>> {
    reply_array(reply, context)?
        .into_iter()
        .map(|item| match item {
            RedisValue::Array(parts) => parts.first().map(reply_text).ok_or_else(|| {
                SmaxError::protocol(context, "empty entry in name list")
            }),
            other => Ok(reply_text(&other)),
        })
        .collect()
}

/// Parses `[value, type, dim, timestamp, origin, serial]`; a nil value means absent.
fn parse_record_reply(reply: RedisValue) -> Result<Option<RawRecord>> {
    if reply == RedisValue::Nil {
        return Ok(None);
    }
    let items = reply_array(reply, "HGetWithMeta")?;
    if items.len() < 6 {
        return Err(SmaxError::protocol(
            "HGetWithMeta",
            format!("expected 6 fields, got {}", items.len()),
        ));
    }
    let Some(value) = reply_bytes(&items[0]) else {
        return Ok(None);
    };
    Ok(Some(RawRecord {
        value,
        type_tag: reply_text(&items[1]),
        dim: reply_text(&items[2]),
        timestamp: reply_text(&items[3]),
        origin: reply_text(&items[4]),
        serial: reply_text(&items[5]),
    }))
}

/// Parses `[names, fields_0, data_0, fields_1, data_1, ...]`, where each
/// `data_i` is `[values, types, dims, timestamps, origins, serials]`.
fn parse_struct_reply(reply: RedisValue) -> Result<StructDump> {
    let mut items = reply_array(reply, "GetStruct")?.into_iter();
    let names = match items.next() {
        Some(names) => reply_array(names, "GetStruct names")?,
        None => return Ok(StructDump::default()),
    };

    let mut tables = Vec::with_capacity(names.len());
    for name in names {
        let (Some(fields), Some(data)) = (items.next(), items.next()) else {
            return Err(SmaxError::protocol("GetStruct", "struct reply is truncated"));
        };
        let fields = reply_array(fields, "GetStruct fields")?;
        let columns = reply_array(data, "GetStruct data")?
            .into_iter()
            .map(|column| reply_array(column, "GetStruct column"))
            .collect::<Result<Vec<_>>>()?;
        if columns.len() < 6 {
            return Err(SmaxError::protocol(
                "GetStruct",
                format!("expected 6 data columns, got {}", columns.len()),
            ));
        }
        let cell = |column: usize, row: usize| columns[column].get(row).map(reply_text).unwrap_or_default();

        let fields = fields
            .iter()
            .enumerate()
            .map(|(row, field)| {
                let record = RawRecord {
                    value: columns[0].get(row).and_then(reply_bytes).unwrap_or_default(),
                    type_tag: cell(1, row),
                    dim: cell(2, row),
                    timestamp: cell(3, row),
                    origin: cell(4, row),
                    serial: cell(5, row),
                };
                (reply_text(field), record)
            })
            .collect();
        tables.push(StructTable {
            name: reply_text(&name),
            fields,
        });
    }
    Ok(StructDump { tables })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(text: &str) -> RedisValue {
        RedisValue::BulkString(text.as_bytes().to_vec())
    }

    fn column(cells: &[&str]) -> RedisValue {
        RedisValue::Array(cells.iter().map(|c| bulk(c)).collect())
    }

    #[test]
    fn record_reply_parses_all_fields() -> Result<()> {
        let reply = RedisValue::Array(vec![
            bulk("1 2 3"),
            bulk("int16"),
            bulk("3"),
            bulk("1704067200.25"),
            bulk("host:prog"),
            RedisValue::Int(9),
        ]);
        let record = parse_record_reply(reply)?;
        assert_eq!(
            record,
            Some(RawRecord {
                value: b"1 2 3".to_vec(),
                type_tag: "int16".into(),
                dim: "3".into(),
                timestamp: "1704067200.25".into(),
                origin: "host:prog".into(),
                serial: "9".into(),
            })
        );
        Ok(())
    }

    #[test]
    fn nil_value_means_absent() -> Result<()> {
        let reply = RedisValue::Array(vec![
            RedisValue::Nil,
            RedisValue::Nil,
            RedisValue::Nil,
            RedisValue::Nil,
            RedisValue::Nil,
            RedisValue::Nil,
        ]);
        assert_eq!(parse_record_reply(reply)?, None);
        assert_eq!(parse_record_reply(RedisValue::Nil)?, None);
        Ok(())
    }

    #[test]
    fn short_record_reply_is_protocol_error() {
        let reply = RedisValue::Array(vec![bulk("1")]);
        assert!(matches!(parse_record_reply(reply), Err(SmaxError::Protocol { .. })));
    }

    #[test]
    fn struct_reply_pairs_fields_with_columns() -> Result<()> {
        let reply = RedisValue::Array(vec![
            column(&["t:k", "t:k:roach2-03"]),
            column(&["roach2-03"]),
            RedisValue::Array(vec![
                column(&["t:k:roach2-03"]),
                column(&["struct"]),
                column(&["1"]),
                column(&["1.0"]),
                column(&["h:p"]),
                column(&["1"]),
            ]),
            column(&["temp", "firmware"]),
            RedisValue::Array(vec![
                column(&["100", "2.0"]),
                column(&["int8", "float64"]),
                column(&["1", "1"]),
                column(&["1.5", "1.5"]),
                column(&["h:p", "h:p"]),
                column(&["4", "5"]),
            ]),
        ]);
        let dump = parse_struct_reply(reply)?;
        assert_eq!(dump.tables.len(), 2);
        assert_eq!(dump.tables[0].name, "t:k");
        assert_eq!(dump.tables[0].fields[0].1.type_tag, "struct");
        let leaf = &dump.tables[1].fields[1];
        assert_eq!(leaf.0, "firmware");
        assert_eq!(leaf.1.value, b"2.0".to_vec());
        assert_eq!(leaf.1.serial, "5");
        Ok(())
    }

    #[test]
    fn truncated_struct_reply_is_protocol_error() {
        let reply = RedisValue::Array(vec![column(&["t:k"]), column(&["a"])]);
        assert!(matches!(parse_struct_reply(reply), Err(SmaxError::Protocol { .. })));
    }

    #[test]
    fn name_lists_accept_plain_and_paired_entries() -> Result<()> {
        let reply = RedisValue::Array(vec![
            bulk("rx:temp"),
            RedisValue::Array(vec![bulk("rx:lock"), bulk("1704067200.5")]),
        ]);
        assert_eq!(parse_name_list(reply, "ListNewerThan")?, vec!["rx:temp", "rx:lock"]);
        assert!(parse_name_list(RedisValue::Nil, "ListZeroes")?.is_empty());
        assert!(parse_name_list(RedisValue::Array(vec![RedisValue::Array(vec![])]), "x").is_err());
        Ok(())
    }

    #[test]
    fn counts_parse_from_ints_and_text() -> Result<()> {
        assert_eq!(reply_count(&RedisValue::Int(4), "Purge")?, 4);
        assert_eq!(reply_count(&RedisValue::Nil, "Purge")?, 0);
        assert_eq!(reply_count(&bulk("7"), "Purge")?, 7);
        assert!(reply_count(&bulk("many"), "Purge").is_err());
        Ok(())
    }

    #[test]
    fn script_slots_are_distinct() {
        let mut shas = ScriptShas::default();
        shas.0[Script::GetStruct as usize] = Some("abc".into());
        assert_eq!(shas.get(Script::GetStruct), Some("abc"));
        assert_eq!(shas.get(Script::Get), None);
        assert_eq!(Script::MultiSet.name(), "HMSetWithMeta");
        assert_eq!(Script::DsmGetTable.name(), "DSMGetTable");
        for (slot, script) in Script::ALL.iter().enumerate() {
            assert_eq!(*script as usize, slot);
        }
    }
}
