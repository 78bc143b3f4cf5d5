//! Redis adapter, standalone or cluster.
//!
//! Keys are listed with `SCAN` (or `KEYS` when configured). In cluster mode
//! every master is scanned in turn and the cursor carries the node index as
//! `"<node>:<cursor>"`.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;
use redis::{ClientTlsConfig, FromRedisValue, TlsCertificates, Value};
use serde_json::{Map, Value as Json};

use super::{BackendAdapter, BackendKind, EnumerationStrategy, KeyBatch, summarize_key};
use crate::config::RedisConfig;
use crate::error::{Error, Result};
use crate::key::{Key, KeySummary, KeyType, Ttl};
use crate::pattern::Pattern;

#[derive(Clone)]
enum Connection {
    Single(MultiplexedConnection),
    Cluster {
        router: ClusterConnection,
        /// Master address and a direct connection, sorted by address
        masters: Vec<(String, MultiplexedConnection)>,
    },
}

/// Redis backend over a multiplexed async connection.
#[derive(Clone)]
pub struct RedisAdapter {
    conn: Connection,
    scan_count: usize,
    keys_command: bool,
}

impl std::fmt::Debug for RedisAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match &self.conn {
            Connection::Single(_) => "standalone".to_string(),
            Connection::Cluster { masters, .. } => format!("cluster({} masters)", masters.len()),
        };
        f.debug_struct("RedisAdapter")
            .field("mode", &mode)
            .field("scan_count", &self.scan_count)
            .field("keys_command", &self.keys_command)
            .finish()
    }
}

impl RedisAdapter {
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        config.validate()?;

        let conn = if config.nodes.is_empty() {
            let client = open_client(config, &config.connection_url()?)?;
            Connection::Single(client.get_multiplexed_async_connection().await?)
        } else {
            let seeds = config.node_urls()?;
            let mut builder = ClusterClient::builder(seeds.iter().map(url::Url::as_str));
            if let Some(certs) = tls_certificates(config)? {
                builder = builder.certs(certs);
            }
            let mut router = builder.build()?.get_async_connection().await?;

            let listing: String = redis::cmd("CLUSTER")
                .arg("NODES")
                .query_async(&mut router)
                .await?;

            let mut masters = Vec::new();
            for addr in parse_cluster_masters(&listing) {
                let client = open_client(config, &config.node_url(&addr)?)?;
                masters.push((addr, client.get_multiplexed_async_connection().await?));
            }
            if masters.is_empty() {
                return Err(Error::Connection(
                    "CLUSTER NODES reported no reachable masters".to_string(),
                ));
            }
            tracing::debug!(masters = masters.len(), "connected to redis cluster");

            Connection::Cluster { router, masters }
        };

        Ok(Self {
            conn,
            scan_count: config.scansize,
            keys_command: config.keys_command,
        })
    }

    async fn query<T: FromRedisValue>(&self, cmd: &redis::Cmd) -> Result<T> {
        match &self.conn {
            Connection::Single(conn) => {
                let mut conn = conn.clone();
                Ok(cmd.query_async(&mut conn).await?)
            }
            Connection::Cluster { router, .. } => {
                let mut conn = router.clone();
                Ok(cmd.query_async(&mut conn).await?)
            }
        }
    }

    /// One `SCAN` step against a single node.
    async fn scan(
        &self,
        conn: &MultiplexedConnection,
        cursor: u64,
        pattern: &Pattern,
    ) -> Result<(u64, Vec<Key>)> {
        let mut conn = conn.clone();
        let (next, keys): (u64, Vec<Vec<u8>>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern.server_pattern())
            .arg("COUNT")
            .arg(self.scan_count)
            .query_async(&mut conn)
            .await?;
        Ok((next, filter_keys(keys, pattern)))
    }

    async fn keys(&self, conn: &MultiplexedConnection, pattern: &Pattern) -> Result<Vec<Key>> {
        let mut conn = conn.clone();
        let keys: Vec<Vec<u8>> = redis::cmd("KEYS")
            .arg(pattern.server_pattern())
            .query_async(&mut conn)
            .await?;
        Ok(filter_keys(keys, pattern))
    }

    fn nodes(&self) -> Vec<&MultiplexedConnection> {
        match &self.conn {
            Connection::Single(conn) => vec![conn],
            Connection::Cluster { masters, .. } => masters.iter().map(|(_, c)| c).collect(),
        }
    }

    /// Read a non-string value and render it as JSON text.
    async fn render(&self, key: &Key, key_type: &KeyType) -> Result<Option<Vec<u8>>> {
        let k = key.as_bytes();
        let json = match key_type {
            KeyType::List => {
                let items: Value = self.query(redis::cmd("LRANGE").arg(k).arg(0).arg(-1)).await?;
                to_json(&items)
            }
            KeyType::Set => {
                let members: Value = self.query(redis::cmd("SMEMBERS").arg(k)).await?;
                let mut json = to_json(&members);
                if let Json::Array(items) = &mut json {
                    items.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
                }
                json
            }
            KeyType::Hash => {
                let fields: Value = self.query(redis::cmd("HGETALL").arg(k)).await?;
                pairs_to_object(&fields)
            }
            KeyType::ZSet => {
                let members: Value = self
                    .query(redis::cmd("ZRANGE").arg(k).arg(0).arg(-1).arg("WITHSCORES"))
                    .await?;
                zset_to_json(&members)
            }
            KeyType::Stream => {
                let entries: Value = self.query(redis::cmd("XRANGE").arg(k).arg("-").arg("+")).await?;
                stream_to_json(&entries)
            }
            KeyType::String | KeyType::Json | KeyType::None => return Ok(None),
            KeyType::Other(_) => {
                return Err(Error::Unsupported {
                    backend: "redis",
                    operation: "reading this data type",
                });
            }
        };

        serde_json::to_vec_pretty(&json)
            .map(Some)
            .map_err(|e| Error::Backend(format!("Failed to render {key_type} value: {e}")))
    }

    fn size_command(key: &Key, key_type: &KeyType) -> Option<redis::Cmd> {
        let name = match key_type {
            KeyType::String => "STRLEN",
            KeyType::List => "LLEN",
            KeyType::Set => "SCARD",
            KeyType::Hash => "HLEN",
            KeyType::ZSet => "ZCARD",
            KeyType::Stream => "XLEN",
            KeyType::Json | KeyType::Other(_) => {
                let mut cmd = redis::cmd("MEMORY");
                cmd.arg("USAGE").arg(key.as_bytes());
                return Some(cmd);
            }
            KeyType::None => return None,
        };
        let mut cmd = redis::cmd(name);
        cmd.arg(key.as_bytes());
        Some(cmd)
    }
}

#[async_trait]
impl BackendAdapter for RedisAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Redis
    }

    fn strategy(&self) -> EnumerationStrategy {
        if self.keys_command {
            EnumerationStrategy::Snapshot
        } else {
            EnumerationStrategy::Cursor
        }
    }

    async fn get(&self, key: &Key) -> Result<Option<Vec<u8>>> {
        let key_type = self.type_of(key).await?;
        match key_type {
            KeyType::None => Ok(None),
            KeyType::String => self.query(redis::cmd("GET").arg(key.as_bytes())).await,
            KeyType::Json => self.query(redis::cmd("JSON.GET").arg(key.as_bytes())).await,
            other => self.render(key, &other).await,
        }
    }

    async fn set(&self, key: &Key, value: &[u8], ttl: Option<Duration>) -> Result<bool> {
        let key_type = self.type_of(key).await?;

        if key_type == KeyType::Json {
            let document = std::str::from_utf8(value)
                .map_err(|_| Error::write(key, "JSON documents must be valid UTF-8"))?;
            let reply: Value = self
                .query(redis::cmd("JSON.SET").arg(key.as_bytes()).arg("$").arg(document))
                .await?;
            if !is_acknowledged(&reply) {
                return Ok(false);
            }

            let _: Value = match ttl {
                Some(ttl) => {
                    self.query(redis::cmd("PEXPIRE").arg(key.as_bytes()).arg(ttl_millis(ttl)))
                        .await?
                }
                None => self.query(redis::cmd("PERSIST").arg(key.as_bytes())).await?,
            };
            return Ok(true);
        }

        if !key_type.is_writable() {
            return Err(Error::write(
                key,
                format!("cannot overwrite a {key_type} value in place"),
            ));
        }

        let mut cmd = redis::cmd("SET");
        cmd.arg(key.as_bytes()).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let reply: Value = self.query(&cmd).await?;
        Ok(is_acknowledged(&reply))
    }

    async fn delete(&self, key: &Key) -> Result<bool> {
        let removed: i64 = self.query(redis::cmd("DEL").arg(key.as_bytes())).await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &Key) -> Result<bool> {
        let count: i64 = self.query(redis::cmd("EXISTS").arg(key.as_bytes())).await?;
        Ok(count > 0)
    }

    async fn ttl(&self, key: &Key) -> Result<Ttl> {
        let ms: i64 = self.query(redis::cmd("PTTL").arg(key.as_bytes())).await?;
        Ok(Ttl::from_millis(ms))
    }

    async fn type_of(&self, key: &Key) -> Result<KeyType> {
        let name: String = self.query(redis::cmd("TYPE").arg(key.as_bytes())).await?;
        Ok(KeyType::from_redis(&name))
    }

    async fn size_of(&self, key: &Key) -> Result<Option<u64>> {
        let key_type = self.type_of(key).await?;
        match Self::size_command(key, &key_type) {
            Some(cmd) => self.query(&cmd).await,
            None => Ok(None),
        }
    }

    async fn flush_all(&self) -> Result<()> {
        for conn in self.nodes() {
            let mut conn = conn.clone();
            redis::cmd("FLUSHDB").query_async::<()>(&mut conn).await?;
        }
        Ok(())
    }

    async fn enumerate_keys(&self, pattern: &Pattern, cursor: Option<&str>) -> Result<KeyBatch> {
        if self.keys_command {
            if cursor.is_some() {
                return Err(Error::validation("KEYS listings take no cursor"));
            }
            let mut keys = Vec::new();
            for conn in self.nodes() {
                keys.extend(self.keys(conn, pattern).await?);
            }
            return Ok(KeyBatch::done(keys));
        }

        match &self.conn {
            Connection::Single(conn) => {
                let cursor = parse_scan_cursor(cursor)?;
                let (next, keys) = self.scan(conn, cursor, pattern).await?;
                Ok(KeyBatch {
                    keys,
                    next: (next != 0).then(|| next.to_string()),
                })
            }
            Connection::Cluster { masters, .. } => {
                let (node, cursor) = parse_cluster_cursor(cursor, masters.len())?;
                let (next, keys) = self.scan(&masters[node].1, cursor, pattern).await?;
                let next = if next != 0 {
                    Some(format!("{node}:{next}"))
                } else if node + 1 < masters.len() {
                    Some(format!("{}:0", node + 1))
                } else {
                    None
                };
                Ok(KeyBatch { keys, next })
            }
        }
    }

    async fn summarize(&self, keys: &[Key]) -> Result<Vec<KeySummary>> {
        let Connection::Single(conn) = &self.conn else {
            // Cluster pipelines would span slots; read keys one by one
            let mut summaries = Vec::with_capacity(keys.len());
            for key in keys {
                summaries.push(summarize_key(self, key).await?);
            }
            return Ok(summaries);
        };
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = conn.clone();
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.cmd("TYPE").arg(key.as_bytes());
            pipe.cmd("PTTL").arg(key.as_bytes());
        }
        let replies: Vec<Value> = pipe.query_async(&mut conn).await?;

        let mut summaries = Vec::with_capacity(keys.len());
        for (key, pair) in keys.iter().zip(replies.chunks(2)) {
            let [type_reply, ttl_reply] = pair else {
                return Err(Error::Backend("short pipeline reply".to_string()));
            };
            let key_type = KeyType::from_redis(&String::from_redis_value(type_reply)?);
            let ttl = Ttl::from_millis(i64::from_redis_value(ttl_reply)?);
            summaries.push(if key_type == KeyType::None || ttl.is_missing() {
                KeySummary::missing(key.clone())
            } else {
                KeySummary {
                    key: key.clone(),
                    key_type,
                    ttl,
                    size: None,
                }
            });
        }

        let mut pipe = redis::pipe();
        let mut sized = Vec::new();
        for (i, summary) in summaries.iter().enumerate() {
            if let Some(cmd) = Self::size_command(&summary.key, &summary.key_type) {
                pipe.add_command(cmd);
                sized.push(i);
            }
        }
        if !sized.is_empty() {
            match pipe.query_async::<Vec<Value>>(&mut conn).await {
                Ok(sizes) => {
                    for (i, reply) in sized.into_iter().zip(sizes) {
                        summaries[i].size = size_from_reply(&reply);
                    }
                }
                // One refused size command (MEMORY USAGE under ACLs, a type
                // changed since TYPE) fails the pipeline; size keys alone
                Err(err) => {
                    tracing::debug!(error = %err, keys = sized.len(), "size pipeline failed");
                    for i in sized {
                        let size = self.size_of(&summaries[i].key).await;
                        summaries[i].size = size.unwrap_or_default();
                    }
                }
            }
        }

        Ok(summaries)
    }

    async fn health_check(&self) -> Result<()> {
        for conn in self.nodes() {
            let mut conn = conn.clone();
            redis::cmd("PING").query_async::<()>(&mut conn).await?;
        }
        Ok(())
    }
}

fn open_client(config: &RedisConfig, url: &url::Url) -> Result<redis::Client> {
    Ok(match tls_certificates(config)? {
        Some(certs) => redis::Client::build_with_tls(url.as_str(), certs)?,
        None => redis::Client::open(url.as_str())?,
    })
}

fn tls_certificates(config: &RedisConfig) -> Result<Option<TlsCertificates>> {
    Ok(config.tls_material()?.map(|material| TlsCertificates {
        client_tls: material
            .client_identity
            .map(|(client_cert, client_key)| ClientTlsConfig {
                client_cert,
                client_key,
            }),
        root_cert: material.root_cert,
    }))
}

/// Size from a size command reply. Errors and a key deleted between the
/// two round trips (nil) both report no size.
fn size_from_reply(reply: &Value) -> Option<u64> {
    Option::<u64>::from_redis_value(reply).ok().flatten()
}

fn filter_keys(keys: Vec<Vec<u8>>, pattern: &Pattern) -> Vec<Key> {
    keys.into_iter()
        .filter(|k| pattern.matches(k))
        .map(Key::from)
        .collect()
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn parse_scan_cursor(cursor: Option<&str>) -> Result<u64> {
    cursor.map_or(Ok(0), |c| {
        c.parse()
            .map_err(|_| Error::validation(format!("invalid scan cursor: {c}")))
    })
}

fn parse_cluster_cursor(cursor: Option<&str>, nodes: usize) -> Result<(usize, u64)> {
    let Some(raw) = cursor else {
        return Ok((0, 0));
    };
    let invalid = || Error::validation(format!("invalid cluster cursor: {raw}"));

    let (node, cursor) = raw.split_once(':').ok_or_else(invalid)?;
    let node: usize = node.parse().map_err(|_| invalid())?;
    let cursor: u64 = cursor.parse().map_err(|_| invalid())?;
    if node >= nodes {
        return Err(invalid());
    }
    Ok((node, cursor))
}

/// Master addresses from a `CLUSTER NODES` reply, sorted.
fn parse_cluster_masters(listing: &str) -> Vec<String> {
    let mut masters: Vec<String> = listing
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let _id = fields.next()?;
            let addr = fields.next()?;
            let flags = fields.next()?;
            let is_master = flags.split(',').any(|f| f == "master");
            let unusable = flags
                .split(',')
                .any(|f| matches!(f, "fail" | "fail?" | "noaddr" | "handshake"));
            if !is_master || unusable {
                return None;
            }
            // ip:port@cport[,hostname]
            let addr = addr.split('@').next()?;
            (!addr.starts_with(':')).then(|| addr.to_string())
        })
        .collect();
    masters.sort();
    masters.dedup();
    masters
}

/// Collapse the acknowledgement shapes of plain and module commands.
fn is_acknowledged(reply: &Value) -> bool {
    match reply {
        Value::Okay => true,
        Value::SimpleString(s) => s.eq_ignore_ascii_case("OK"),
        Value::BulkString(b) => matches!(b.as_slice(), b"OK" | b"true" | b"1"),
        Value::Int(n) => *n > 0,
        Value::Boolean(b) => *b,
        _ => false,
    }
}

fn bytes_to_json(bytes: &[u8]) -> Json {
    Json::String(cacheadmin_codec::display_bytes(bytes))
}

fn to_json(value: &Value) -> Json {
    match value {
        Value::Nil => Json::Null,
        Value::Int(n) => Json::from(*n),
        Value::BulkString(b) => bytes_to_json(b),
        Value::SimpleString(s) => Json::String(s.clone()),
        Value::Okay => Json::String("OK".to_string()),
        Value::Array(items) | Value::Set(items) => Json::Array(items.iter().map(to_json).collect()),
        Value::Map(pairs) => Json::Object(
            pairs
                .iter()
                .map(|(k, v)| (json_key(k), to_json(v)))
                .collect(),
        ),
        Value::Double(d) => serde_json::Number::from_f64(*d).map_or(Json::Null, Json::Number),
        Value::Boolean(b) => Json::Bool(*b),
        other => Json::String(format!("{other:?}")),
    }
}

fn json_key(value: &Value) -> String {
    match to_json(value) {
        Json::String(s) => s,
        other => other.to_string(),
    }
}

fn flat_items(value: &Value) -> &[Value] {
    match value {
        Value::Array(items) => items,
        _ => &[],
    }
}

/// `HGETALL` reply as an object; RESP3 maps and flat RESP2 arrays both work.
fn pairs_to_object(value: &Value) -> Json {
    if let Value::Map(_) = value {
        return to_json(value);
    }
    let object: Map<String, Json> = flat_items(value)
        .chunks(2)
        .filter_map(|pair| match pair {
            [k, v] => Some((json_key(k), to_json(v))),
            _ => None,
        })
        .collect();
    Json::Object(object)
}

fn zset_to_json(value: &Value) -> Json {
    let members = flat_items(value)
        .chunks(2)
        .filter_map(|pair| match pair {
            [member, score] => {
                let score = match to_json(score) {
                    Json::String(s) => s
                        .parse::<f64>()
                        .ok()
                        .and_then(serde_json::Number::from_f64)
                        .map_or(Json::String(s), Json::Number),
                    other => other,
                };
                Some(Json::Array(vec![to_json(member), score]))
            }
            _ => None,
        })
        .collect();
    Json::Array(members)
}

fn stream_to_json(value: &Value) -> Json {
    let entries = flat_items(value)
        .iter()
        .filter_map(|entry| match flat_items(entry) {
            [id, fields] => {
                let mut object = Map::new();
                object.insert("id".to_string(), to_json(id));
                object.insert("fields".to_string(), pairs_to_object(fields));
                Some(Json::Object(object))
            }
            _ => None,
        })
        .collect();
    Json::Array(entries)
}
