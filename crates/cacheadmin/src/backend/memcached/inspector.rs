//! Key listing and per-key metadata over the text protocol.
//!
//! The client library covers storage commands only, so
//! `lru_crawler metadump all` and the meta debug command `me` run here on a
//! dedicated connection. Both need memcached 1.5.19 or newer.
//!
//! A failed exchange drops the connection: a half-read reply is never left
//! for the next command. The next call reconnects.

use std::path::PathBuf;

use base64::prelude::*;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::config::MemcachedConfig;
use crate::constants::MEMCACHED_MAX_KEY_LENGTH;
use crate::error::{Error, Result};
use crate::key::{Key, KeySummary, KeyType, Ttl};
use crate::pattern::Pattern;

trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

type Conn = BufStream<Box<dyn Transport>>;

/// Metadata reported by `me` or a `metadump` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct ItemMeta {
    pub(super) key: Key,
    /// Seconds left; `-1` never expires
    pub(super) exp: i64,
    pub(super) size: Option<u64>,
}

impl ItemMeta {
    pub(super) fn summary(&self) -> KeySummary {
        KeySummary {
            key: self.key.clone(),
            key_type: KeyType::String,
            ttl: Ttl::from_secs(self.exp),
            size: self.size,
        }
    }
}

#[derive(Debug, Clone)]
enum Endpoint {
    Tcp(String, u16),
    Unix(PathBuf),
}

impl Endpoint {
    async fn connect(&self) -> Result<Conn> {
        let stream: Box<dyn Transport> = match self {
            Self::Tcp(host, port) => Box::new(TcpStream::connect((host.as_str(), *port)).await?),
            #[cfg(unix)]
            Self::Unix(path) => Box::new(tokio::net::UnixStream::connect(path).await?),
            #[cfg(not(unix))]
            Self::Unix(_) => {
                return Err(Error::Config(
                    "unix sockets are not supported on this platform".to_string(),
                ));
            }
        };
        Ok(BufStream::new(stream))
    }
}

pub(super) struct Inspector {
    endpoint: Endpoint,
    conn: Mutex<Option<Conn>>,
}

impl std::fmt::Debug for Inspector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inspector")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl Inspector {
    /// Connects lazily on first use.
    pub(super) fn new(config: &MemcachedConfig) -> Self {
        let endpoint = config.path.clone().map_or_else(
            || Endpoint::Tcp(config.host.clone(), config.port),
            Endpoint::Unix,
        );
        Self {
            endpoint,
            conn: Mutex::new(None),
        }
    }

    /// Live keys matching `pattern`, in server order.
    pub(super) async fn list_keys(&self, pattern: &Pattern, now: u64) -> Result<Vec<Key>> {
        let mut slot = self.conn.lock().await;
        let conn = self.connection(&mut slot).await?;
        let result = read_metadump(conn, now).await;
        if result.is_err() {
            *slot = None;
        }

        Ok(result?
            .into_iter()
            .filter(|meta| meta.exp != 0 && pattern.matches(meta.key.as_bytes()))
            .map(|meta| meta.key)
            .collect())
    }

    /// Metadata for one key, `None` if it does not exist.
    pub(super) async fn meta(&self, key: &Key) -> Result<Option<ItemMeta>> {
        let line = meta_command(key)?;
        let mut slot = self.conn.lock().await;
        let conn = self.connection(&mut slot).await?;
        let result = match request(conn, &line).await {
            Ok(reply) => parse_meta_debug(&reply, key),
            Err(err) => Err(err),
        };
        if result.is_err() {
            *slot = None;
        }
        result
    }

    /// Summaries in request order. A key whose metadata cannot be read is
    /// reported missing instead of failing the batch.
    pub(super) async fn summarize(&self, keys: &[Key]) -> Vec<KeySummary> {
        let mut summaries = Vec::with_capacity(keys.len());
        for key in keys {
            let summary = match self.meta(key).await {
                Ok(Some(meta)) => meta.summary(),
                Ok(None) => KeySummary::missing(key.clone()),
                Err(err) => {
                    tracing::debug!(key = %key, error = %err, "metadata unavailable");
                    KeySummary::missing(key.clone())
                }
            };
            summaries.push(summary);
        }
        summaries
    }

    async fn connection<'a>(&self, slot: &'a mut Option<Conn>) -> Result<&'a mut Conn> {
        let conn = match slot.take() {
            Some(conn) => conn,
            None => self.endpoint.connect().await?,
        };
        Ok(slot.insert(conn))
    }
}

/// Send one command line and read the first reply line.
async fn request(conn: &mut Conn, line: &[u8]) -> Result<Vec<u8>> {
    conn.write_all(line).await?;
    conn.write_all(b"\r\n").await?;
    conn.flush().await?;
    read_line(conn).await
}

async fn read_metadump(conn: &mut Conn, now: u64) -> Result<Vec<ItemMeta>> {
    let mut items = Vec::new();
    let mut line = request(conn, b"lru_crawler metadump all").await?;

    while line != b"END" {
        if is_error_reply(&line) {
            return Err(reply_error(&line));
        }
        if let Some(meta) = parse_metadump_line(&line, now) {
            items.push(meta);
        }
        line = read_line(conn).await?;
    }

    Ok(items)
}

async fn read_line<R: AsyncBufReadExt + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let mut line = Vec::new();
    if reader.read_until(b'\n', &mut line).await? == 0 {
        return Err(Error::Connection("memcached closed the connection".to_string()));
    }
    while matches!(line.last(), Some(b'\n' | b'\r')) {
        line.pop();
    }
    Ok(line)
}

/// Returns true if the key can go on a command line as is.
pub(super) fn is_text_key(key: &[u8]) -> bool {
    !key.iter().any(|&b| b <= b' ' || b == 0x7f)
}

/// `me <key>`, or `me <base64> b` for keys with whitespace or control bytes.
fn meta_command(key: &Key) -> Result<Vec<u8>> {
    if key.is_empty() || key.len() > MEMCACHED_MAX_KEY_LENGTH {
        return Err(Error::validation(format!(
            "memcached keys must be 1 to {MEMCACHED_MAX_KEY_LENGTH} bytes"
        )));
    }

    let mut line = b"me ".to_vec();
    if is_text_key(key.as_bytes()) {
        line.extend_from_slice(key.as_bytes());
    } else {
        line.extend_from_slice(BASE64_STANDARD.encode(key.as_bytes()).as_bytes());
        line.extend_from_slice(b" b");
    }
    Ok(line)
}

fn is_error_reply(line: &[u8]) -> bool {
    [b"ERROR".as_slice(), b"CLIENT_ERROR", b"SERVER_ERROR", b"BUSY"]
        .iter()
        .any(|prefix| line.starts_with(prefix))
}

fn reply_error(line: &[u8]) -> Error {
    Error::Backend(format!(
        "memcached replied: {}",
        String::from_utf8_lossy(line)
    ))
}

fn field<'a>(line: &'a [u8], name: &[u8]) -> Option<&'a [u8]> {
    line.split(|&b| b == b' ')
        .find_map(|token| token.strip_prefix(name)?.strip_prefix(b"="))
}

fn numeric<T: std::str::FromStr>(raw: Option<&[u8]>) -> Option<T> {
    std::str::from_utf8(raw?).ok()?.parse().ok()
}

/// Parse `ME <key> exp=.. la=.. cas=.. fetch=.. cls=.. size=..` (`EN` = miss).
fn parse_meta_debug(reply: &[u8], key: &Key) -> Result<Option<ItemMeta>> {
    if reply == b"EN" {
        return Ok(None);
    }
    if !reply.starts_with(b"ME ") {
        return Err(reply_error(reply));
    }
    Ok(Some(ItemMeta {
        key: key.clone(),
        exp: numeric(field(reply, b"exp")).unwrap_or(-1),
        size: numeric(field(reply, b"size")),
    }))
}

/// Parse one `metadump` line. `exp` there is an absolute unix time and is
/// turned into seconds left; expired items report 0.
fn parse_metadump_line(line: &[u8], now: u64) -> Option<ItemMeta> {
    let raw_key = field(line, b"key")?;
    let key = urlencoding::decode_binary(raw_key).into_owned();
    let exp: i64 = numeric(field(line, b"exp"))?;
    let exp = if exp < 0 {
        -1
    } else {
        (exp - now as i64).max(0)
    };
    Some(ItemMeta {
        key: Key::from(key),
        exp,
        size: numeric(field(line, b"size")),
    })
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    use super::*;

    type Responder = dyn Fn(&[u8]) -> Vec<u8> + Send + Sync;

    /// Line-oriented fake server. Counts accepted connections.
    async fn fake_server(respond: Arc<Responder>) -> (SocketAddr, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepted);

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let respond = Arc::clone(&respond);
                tokio::spawn(async move {
                    let (read, mut write) = stream.into_split();
                    let mut lines = BufReader::new(read);
                    loop {
                        let mut line = Vec::new();
                        if lines.read_until(b'\n', &mut line).await.unwrap_or(0) == 0 {
                            break;
                        }
                        let line = line.strip_suffix(b"\r\n").unwrap_or(&line[..]);
                        if write.write_all(&respond(line)).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });

        (addr, accepted)
    }

    fn inspector(addr: SocketAddr) -> Inspector {
        Inspector::new(&MemcachedConfig {
            host: addr.ip().to_string(),
            port: addr.port(),
            path: None,
        })
    }

    #[test]
    fn test_meta_command() {
        assert_eq!(meta_command(&Key::from("user:1")).unwrap(), b"me user:1");
        assert_eq!(meta_command(&Key::from("bin\0")).unwrap(), b"me YmluAA== b");
        assert_eq!(meta_command(&Key::from("has space")).unwrap(), b"me aGFzIHNwYWNl b");
        assert!(meta_command(&Key::from("")).unwrap_err().is_validation());
        assert!(meta_command(&Key::from("x".repeat(251))).is_err());
        assert!(meta_command(&Key::from("x".repeat(250))).is_ok());
    }

    #[test]
    fn test_text_keys() {
        assert!(is_text_key(b"user:1"));
        assert!(!is_text_key(b"line\nbreak"));
        assert!(!is_text_key(b"del\x7f"));
    }

    #[test]
    fn test_parse_meta_debug_hit() {
        let key = Key::from("foo");
        let meta = parse_meta_debug(b"ME foo exp=57 la=3 cas=2 fetch=no cls=1 size=63", &key)
            .unwrap()
            .unwrap();
        assert_eq!(meta.exp, 57);
        assert_eq!(meta.size, Some(63));
        assert_eq!(meta.summary().ttl, Ttl::Expires(Duration::from_secs(57)));
    }

    #[test]
    fn test_parse_meta_debug_persistent() {
        let key = Key::from("foo");
        let meta = parse_meta_debug(b"ME foo exp=-1 la=3 cas=2 fetch=no cls=1 size=63", &key)
            .unwrap()
            .unwrap();
        assert_eq!(meta.summary().ttl, Ttl::Persistent);
    }

    #[test]
    fn test_parse_meta_debug_miss_and_error() {
        let key = Key::from("foo");
        assert!(parse_meta_debug(b"EN", &key).unwrap().is_none());
        assert!(parse_meta_debug(b"ERROR", &key).unwrap_err().is_backend());
    }

    #[test]
    fn test_parse_metadump_line() {
        let line = b"key=user%3A1 exp=1700000060 la=1699999990 cas=7 fetch=no cls=1 size=70";
        let meta = parse_metadump_line(line, 1_700_000_000).unwrap();
        assert_eq!(meta.key, Key::from("user:1"));
        assert_eq!(meta.exp, 60);
        assert_eq!(meta.size, Some(70));
    }

    #[test]
    fn test_parse_metadump_binary_key() {
        let line = b"key=bin%FF%00 exp=-1 la=1 cas=1 fetch=no cls=1 size=10";
        let meta = parse_metadump_line(line, 0).unwrap();
        assert_eq!(meta.key.as_bytes(), b"bin\xff\x00");
        assert_eq!(meta.exp, -1);
    }

    #[test]
    fn test_parse_metadump_expired() {
        let line = b"key=old exp=100 la=1 cas=1 fetch=no cls=1 size=10";
        assert_eq!(parse_metadump_line(line, 500).unwrap().exp, 0);
    }

    #[test]
    fn test_parse_metadump_garbage() {
        assert!(parse_metadump_line(b"nonsense", 0).is_none());
    }

    #[test]
    fn test_error_replies() {
        assert!(is_error_reply(b"BUSY crawler is busy"));
        assert!(is_error_reply(b"CLIENT_ERROR bad command line format"));
        assert!(is_error_reply(b"ERROR"));
        assert!(!is_error_reply(b"key=a exp=-1"));
    }

    #[tokio::test]
    async fn test_read_line_strips_crlf() {
        let mut reader = BufReader::new(&b"STORED\r\nEND\r\n"[..]);
        assert_eq!(read_line(&mut reader).await.unwrap(), b"STORED");
        assert_eq!(read_line(&mut reader).await.unwrap(), b"END");
        assert!(read_line(&mut reader).await.unwrap_err().is_connection());
    }

    #[tokio::test]
    async fn test_list_keys_filters_pattern_and_expired() {
        let (addr, _) = fake_server(Arc::new(|line: &[u8]| {
            assert_eq!(line, b"lru_crawler metadump all");
            b"key=user%3A1 exp=-1 la=1 cas=1 fetch=no cls=1 size=5\r\n\
              key=user%3A2 exp=100 la=1 cas=2 fetch=no cls=1 size=5\r\n\
              key=order%3A1 exp=-1 la=1 cas=3 fetch=no cls=1 size=5\r\n\
              END\r\n"
                .to_vec()
        }))
        .await;

        let keys = inspector(addr)
            .list_keys(&Pattern::parse("user:*").unwrap(), 500)
            .await
            .unwrap();
        assert_eq!(keys, [Key::from("user:1")]);
    }

    #[tokio::test]
    async fn test_control_byte_key_is_summarized() {
        let (addr, _) = fake_server(Arc::new(|line: &[u8]| match line {
            b"me YmluAA== b" => b"ME YmluAA== exp=-1 la=1 cas=1 fetch=no cls=1 size=3\r\n".to_vec(),
            b"me plain" => b"ME plain exp=30 la=1 cas=2 fetch=no cls=1 size=9\r\n".to_vec(),
            b"me refused" => b"SERVER_ERROR temporary failure\r\n".to_vec(),
            _ => b"EN\r\n".to_vec(),
        }))
        .await;

        let keys = [
            Key::from("bin\0"),
            Key::from("plain"),
            Key::from("refused"),
            Key::from("gone"),
        ];
        let summaries = inspector(addr).summarize(&keys).await;

        assert_eq!(summaries.len(), 4);
        assert_eq!(summaries[0].key, Key::from("bin\0"));
        assert_eq!(summaries[0].size, Some(3));
        assert_eq!(summaries[0].ttl, Ttl::Persistent);
        assert_eq!(summaries[1].size, Some(9));
        assert_eq!(summaries[2], KeySummary::missing(Key::from("refused")));
        assert_eq!(summaries[3], KeySummary::missing(Key::from("gone")));
    }

    #[tokio::test]
    async fn test_failed_exchange_reconnects() {
        let requests = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&requests);
        // first reply is unparseable and followed by a stray line
        let (addr, accepted) = fake_server(Arc::new(move |_: &[u8]| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                b"GARBAGE\r\nEN\r\n".to_vec()
            } else {
                b"ME k exp=-1 la=1 cas=1 fetch=no cls=1 size=4\r\n".to_vec()
            }
        }))
        .await;

        let inspector = inspector(addr);
        let key = Key::from("k");
        assert!(inspector.meta(&key).await.unwrap_err().is_backend());

        let meta = inspector.meta(&key).await.unwrap().unwrap();
        assert_eq!(meta.size, Some(4));
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_busy_crawler_is_error() {
        let (addr, accepted) = fake_server(Arc::new(|_: &[u8]| {
            b"key=a exp=-1 la=1 cas=1 fetch=no cls=1 size=1\r\nBUSY crawler is busy\r\n".to_vec()
        }))
        .await;

        let inspector = inspector(addr);
        let err = inspector.list_keys(&Pattern::any(), 0).await.unwrap_err();
        assert!(err.is_backend());
        assert!(inspector.list_keys(&Pattern::any(), 0).await.is_err());
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
    }
}
