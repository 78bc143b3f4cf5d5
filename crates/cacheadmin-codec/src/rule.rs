//! Reversible codec rules.
//!
//! A [`CodecRule`] pairs a decoder with its inverse encoder under a stable
//! name. Rules work on bytes so binary payloads survive a decode/encode
//! cycle unchanged. Decoders return `None` for input they do not recognise,
//! which is how the pipeline moves on to the next rule.

use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;

use flate2::read::GzDecoder;
use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};
use flate2::{Compression, Decompress, FlushDecompress, Status};

/// Names of all built-in codec rules.
pub const BUILTIN_CODECS: &[&str] = &["gzcompress", "gzencode", "gzdeflate", "gz_magento"];

/// Codec rules enabled when configuration does not name any.
pub const DEFAULT_CODECS: &[&str] = &["gzcompress", "gzencode", "gzdeflate"];

/// Prefix Magento's Redis cache backend writes before a zlib stream.
pub const MAGENTO_PREFIX: &[u8] = b"gz:\x1f\x8b";

type DecodeFn = dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync;
type EncodeFn = dyn Fn(&[u8]) -> Vec<u8> + Send + Sync;

/// Named decode/encode pair.
#[derive(Clone)]
pub struct CodecRule {
    name: Arc<str>,
    decode: Arc<DecodeFn>,
    encode: Arc<EncodeFn>,
}

impl fmt::Debug for CodecRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecRule")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl CodecRule {
    /// Build a rule from a decoder and its inverse encoder.
    pub fn new<D, E>(name: impl Into<String>, decode: D, encode: E) -> Self
    where
        D: Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync + 'static,
        E: Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name.into()),
            decode: Arc::new(decode),
            encode: Arc::new(encode),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Decode stored bytes, or `None` if this rule does not apply.
    #[must_use]
    pub fn decode(&self, raw: &[u8]) -> Option<Vec<u8>> {
        (self.decode)(raw)
    }

    /// Encode a value for storage.
    #[must_use]
    pub fn encode(&self, value: &[u8]) -> Vec<u8> {
        (self.encode)(value)
    }

    /// zlib stream (PHP `gzcompress`).
    #[must_use]
    pub fn gzcompress() -> Self {
        Self::new(
            "gzcompress",
            |raw| inflate_stream(raw, true),
            |value| finish(ZlibEncoder::new(Vec::new(), Compression::default()), value),
        )
    }

    /// gzip member (PHP `gzencode`).
    #[must_use]
    pub fn gzencode() -> Self {
        Self::new(
            "gzencode",
            |raw| read_all(GzDecoder::new(raw)),
            |value| finish(GzEncoder::new(Vec::new(), Compression::default()), value),
        )
    }

    /// Raw deflate stream (PHP `gzdeflate`).
    #[must_use]
    pub fn gzdeflate() -> Self {
        Self::new(
            "gzdeflate",
            |raw| inflate_stream(raw, false),
            |value| finish(DeflateEncoder::new(Vec::new(), Compression::default()), value),
        )
    }

    /// Magento Redis backend framing: `gz:\x1f\x8b` followed by a zlib stream.
    ///
    /// Unprefixed zlib input is accepted on read as well.
    #[must_use]
    pub fn gz_magento() -> Self {
        Self::new(
            "gz_magento",
            |raw| {
                let body = raw.strip_prefix(MAGENTO_PREFIX).unwrap_or(raw);
                inflate_stream(body, true)
            },
            |value| {
                let mut out = MAGENTO_PREFIX.to_vec();
                out.extend(finish(
                    ZlibEncoder::new(Vec::new(), Compression::default()),
                    value,
                ));
                out
            },
        )
    }

    /// Look up a built-in rule by name.
    #[must_use]
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "gzcompress" => Some(Self::gzcompress()),
            "gzencode" => Some(Self::gzencode()),
            "gzdeflate" => Some(Self::gzdeflate()),
            "gz_magento" => Some(Self::gz_magento()),
            _ => None,
        }
    }
}

fn read_all(mut decoder: impl Read) -> Option<Vec<u8>> {
    let mut buf = Vec::new();
    decoder.read_to_end(&mut buf).ok()?;
    Some(buf)
}

/// Inflate a zlib or raw deflate stream, requiring its end marker.
///
/// The output buffer doubles whenever it fills. Truncated input is a
/// mismatch rather than a partial result.
fn inflate_stream(raw: &[u8], zlib_header: bool) -> Option<Vec<u8>> {
    let mut inflater = Decompress::new(zlib_header);
    let mut out = Vec::with_capacity(raw.len().saturating_mul(4).max(64));

    loop {
        if out.len() == out.capacity() {
            out.reserve(out.capacity());
        }

        let (before_in, before_out) = (inflater.total_in(), inflater.total_out());
        let consumed = usize::try_from(before_in).ok()?;
        let status = inflater
            .decompress_vec(raw.get(consumed..)?, &mut out, FlushDecompress::None)
            .ok()?;

        match status {
            Status::StreamEnd => return Some(out),
            // output space was free, so no progress means the input ran out
            _ if inflater.total_in() == before_in && inflater.total_out() == before_out => {
                return None;
            }
            _ => {}
        }
    }
}

trait Finish: Write {
    fn finish_vec(self) -> std::io::Result<Vec<u8>>;
}

impl Finish for ZlibEncoder<Vec<u8>> {
    fn finish_vec(self) -> std::io::Result<Vec<u8>> {
        self.finish()
    }
}

impl Finish for GzEncoder<Vec<u8>> {
    fn finish_vec(self) -> std::io::Result<Vec<u8>> {
        self.finish()
    }
}

impl Finish for DeflateEncoder<Vec<u8>> {
    fn finish_vec(self) -> std::io::Result<Vec<u8>> {
        self.finish()
    }
}

// Writing into a Vec does not fail; the raw fallback mirrors a missing
// compression library.
fn finish(mut encoder: impl Finish, value: &[u8]) -> Vec<u8> {
    match encoder.write_all(value) {
        Ok(()) => encoder.finish_vec().unwrap_or_else(|_| value.to_vec()),
        Err(_) => value.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// zlib stream of `"test"` at the default level.
    const ZLIB_TEST: &[u8] = b"\x78\x9c\x2b\x49\x2d\x2e\x01\x00\x04\x5d\x01\xc1";

    #[test]
    fn test_gzcompress_decodes_known_blob() {
        let rule = CodecRule::gzcompress();
        assert_eq!(rule.decode(ZLIB_TEST).as_deref(), Some(&b"test"[..]));
    }

    #[test]
    fn test_builtin_round_trip() {
        for name in BUILTIN_CODECS {
            let rule = CodecRule::builtin(name).unwrap();
            for text in ["test", "", "ünïcödé ✓", "{\"a\":[1,2,3]}"] {
                let encoded = rule.encode(text.as_bytes());
                assert_eq!(rule.decode(&encoded).as_deref(), Some(text.as_bytes()), "{name}");
            }
        }
    }

    #[test]
    fn test_binary_round_trip() {
        let value = b"\xff\xfe\0bin\\x41";
        for name in BUILTIN_CODECS {
            let rule = CodecRule::builtin(name).unwrap();
            assert_eq!(rule.decode(&rule.encode(value)).as_deref(), Some(&value[..]), "{name}");
        }
    }

    #[test]
    fn test_plain_text_does_not_match() {
        for name in DEFAULT_CODECS {
            let rule = CodecRule::builtin(name).unwrap();
            assert!(rule.decode(b"hello world").is_none(), "{name}");
        }
    }

    #[test]
    fn test_gzencode_has_gzip_magic() {
        let encoded = CodecRule::gzencode().encode(b"payload");
        assert_eq!(&encoded[..2], b"\x1f\x8b");
    }

    #[test]
    fn test_truncated_stream_does_not_match() {
        let encoded = CodecRule::gzcompress().encode(b"a longer payload to truncate");
        let truncated = &encoded[..encoded.len() / 2];
        assert!(CodecRule::gzcompress().decode(truncated).is_none());
        assert!(CodecRule::gzdeflate().decode(b"test").is_none());
    }

    #[test]
    fn test_large_payload_grows_buffer() {
        let text = "abcdefghij".repeat(10_000);
        let rule = CodecRule::gzdeflate();
        assert_eq!(rule.decode(&rule.encode(text.as_bytes())), Some(text.into_bytes()));
    }

    #[test]
    fn test_highly_compressible_values() {
        let repeated = "hello world ".repeat(100);
        let json = r#"{"id":1,"tags":["a","b"],"ok":true}"#.repeat(50);
        let zeros = vec![0_u8; 100 * 1024];

        for name in BUILTIN_CODECS {
            let rule = CodecRule::builtin(name).unwrap();
            for value in [repeated.as_bytes(), json.as_bytes(), zeros.as_slice()] {
                let encoded = rule.encode(value);
                assert!(encoded.len() * 4 < value.len(), "{name} did not compress");
                assert_eq!(rule.decode(&encoded).as_deref(), Some(value), "{name}");
            }
        }
    }

    #[test]
    fn test_large_truncated_stream_does_not_match() {
        let value = "hello world ".repeat(1_000);
        for rule in [CodecRule::gzcompress(), CodecRule::gzdeflate()] {
            let encoded = rule.encode(value.as_bytes());
            assert!(rule.decode(&encoded[..encoded.len() - 4]).is_none(), "{}", rule.name());
        }
    }

    #[test]
    fn test_gzip_is_not_zlib() {
        let gzip = CodecRule::gzencode().encode(b"payload");
        assert!(CodecRule::gzcompress().decode(&gzip).is_none());
    }

    #[test]
    fn test_gz_magento_prefix() {
        let rule = CodecRule::gz_magento();
        let encoded = rule.encode(b"magento");
        assert!(encoded.starts_with(MAGENTO_PREFIX));
        assert_eq!(rule.decode(&encoded).as_deref(), Some(&b"magento"[..]));
        assert_eq!(rule.decode(ZLIB_TEST).as_deref(), Some(&b"test"[..]));
    }

    #[test]
    fn test_custom_rule() {
        let rule = CodecRule::new(
            "reverse",
            |raw| {
                raw.strip_prefix(b"rev:")
                    .map(|rest| rest.iter().rev().copied().collect())
            },
            |value| {
                let mut out = b"rev:".to_vec();
                out.extend(value.iter().rev());
                out
            },
        );

        assert_eq!(rule.name(), "reverse");
        assert_eq!(rule.decode(&rule.encode(b"abc")).as_deref(), Some(&b"abc"[..]));
        assert!(rule.decode(b"abc").is_none());
    }

    #[test]
    fn test_unknown_builtin() {
        assert!(CodecRule::builtin("brotli").is_none());
    }

    #[test]
    fn test_debug_shows_name() {
        let debug = format!("{:?}", CodecRule::gzdeflate());
        assert!(debug.contains("gzdeflate"));
    }
}
