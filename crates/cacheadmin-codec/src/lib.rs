//! Value codec pipeline for the cache admin console.
//!
//! Stored cache values are often compressed or serialized by the
//! application that wrote them. This crate turns those bytes into editable
//! text and back again:
//!
//! - [`CodecRule`]: a named decode/encode pair, tried in declaration order
//! - [`FormatterRule`]: display-only pretty printing of decoded text
//! - [`CodecPipeline`]: the ordered chain, remembering which codec matched
//!
//! # Example
//!
//! ```rust
//! use cacheadmin_codec::CodecPipeline;
//!
//! let pipeline = CodecPipeline::default();
//! let stored = pipeline.encode_for_storage("test", Some("gzcompress")).unwrap();
//!
//! let decoded = pipeline.decode_for_display(&stored);
//! assert_eq!(decoded.display, "test");
//! assert_eq!(decoded.matched_encoder.as_deref(), Some("gzcompress"));
//! ```
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod escape;
pub mod formatter;
pub mod php;
pub mod pipeline;
pub mod rule;

pub use error::{CodecError, Result};
pub use escape::{display_bytes, is_binary, unescape_bytes};
pub use formatter::{BUILTIN_FORMATTERS, DEFAULT_FORMATTERS, FormatterRule};
pub use pipeline::{CodecPipeline, DecodedValue, NO_ENCODER, PipelineBuilder};
pub use rule::{BUILTIN_CODECS, CodecRule, DEFAULT_CODECS, MAGENTO_PREFIX};
