//! Ordered decode/encode pipeline.
//!
//! Codec rules are tried in declaration order and the first one that
//! decodes wins. Its name travels with the [`DecodedValue`] so that a later
//! save can apply the inverse encoder. Formatters only ever touch display
//! text.

use serde::{Deserialize, Serialize};

use crate::error::{CodecError, Result};
use crate::escape::{display_bytes, is_binary, unescape_bytes};
use crate::formatter::{DEFAULT_FORMATTERS, FormatterRule};
use crate::rule::{CodecRule, DEFAULT_CODECS};

/// Encoder id meaning "store the text as is".
pub const NO_ENCODER: &str = "none";

/// Result of decoding a stored value for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedValue {
    /// Text to show, formatter output if one applied.
    pub display: String,
    /// Decoded text before formatting; this is what an editor saves back.
    /// Escaped when `binary` is set, see [`DecodedValue::to_bytes`].
    pub text: String,
    /// Codec that decoded the value. Echo it back on save.
    pub matched_encoder: Option<String>,
    /// Formatter that produced `display`, if any.
    pub formatter: Option<String>,
    /// Whether the decoded value was not UTF-8 and `text` is escaped.
    pub binary: bool,
}

impl DecodedValue {
    /// Exact decoded bytes behind `text`, ready for [`CodecPipeline::encode_bytes`].
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        if self.binary {
            unescape_bytes(&self.text)
        } else {
            Ok(self.text.clone().into_bytes())
        }
    }

    fn plain(text: String, binary: bool) -> Self {
        Self {
            display: text.clone(),
            text,
            matched_encoder: None,
            formatter: None,
            binary,
        }
    }
}

/// Configured chain of codec rules and formatters.
#[derive(Debug, Clone)]
pub struct CodecPipeline {
    codecs: Vec<CodecRule>,
    formatters: Vec<FormatterRule>,
    format_undecoded: bool,
}

impl Default for CodecPipeline {
    fn default() -> Self {
        Self::builder()
            .builtin_codecs(DEFAULT_CODECS)
            .and_then(|b| b.builtin_formatters(DEFAULT_FORMATTERS))
            .map(PipelineBuilder::build)
            .unwrap_or_else(|_| Self::empty())
    }
}

impl CodecPipeline {
    /// Pipeline with no rules: values are shown and stored as is.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            codecs: Vec::new(),
            formatters: Vec::new(),
            format_undecoded: false,
        }
    }

    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Build from built-in rule names, in the given order.
    pub fn from_names<C, F>(codecs: &[C], formatters: &[F]) -> Result<Self>
    where
        C: AsRef<str>,
        F: AsRef<str>,
    {
        Ok(Self::builder()
            .builtin_codecs(codecs)?
            .builtin_formatters(formatters)?
            .build())
    }

    /// Names of the configured codecs, in order.
    pub fn codec_names(&self) -> impl Iterator<Item = &str> {
        self.codecs.iter().map(CodecRule::name)
    }

    /// Names of the configured formatters, in order.
    pub fn formatter_names(&self) -> impl Iterator<Item = &str> {
        self.formatters.iter().map(FormatterRule::name)
    }

    /// Returns true if `name` is a configured codec or [`NO_ENCODER`].
    #[must_use]
    pub fn knows_encoder(&self, name: &str) -> bool {
        name == NO_ENCODER || self.codec(name).is_some()
    }

    fn codec(&self, name: &str) -> Option<&CodecRule> {
        self.codecs.iter().find(|c| c.name() == name)
    }

    /// Decode stored bytes for display. Never fails.
    ///
    /// With no matching codec the raw bytes are shown as text, invalid UTF-8
    /// escaped as `\xNN`. Formatters run on decoded text only, unless the
    /// pipeline was built with `format_undecoded`, and never on binary values.
    #[must_use]
    pub fn decode_for_display(&self, raw: &[u8]) -> DecodedValue {
        if raw.is_empty() {
            return DecodedValue::plain(String::new(), false);
        }

        let matched = self
            .codecs
            .iter()
            .find_map(|codec| codec.decode(raw).map(|bytes| (codec.name(), bytes)));

        let mut value = match matched {
            Some((name, bytes)) => DecodedValue {
                matched_encoder: Some(name.to_owned()),
                ..DecodedValue::plain(display_bytes(&bytes), is_binary(&bytes))
            },
            None => DecodedValue::plain(display_bytes(raw), is_binary(raw)),
        };

        if !value.binary && (value.matched_encoder.is_some() || self.format_undecoded) {
            if let Some((name, display)) = self
                .formatters
                .iter()
                .find_map(|f| f.format(&value.text).map(|out| (f.name(), out)))
            {
                value.display = display;
                value.formatter = Some(name.to_owned());
            }
        }

        value
    }

    /// Encode text for storage with the named codec.
    ///
    /// `None` and [`NO_ENCODER`] store the text's bytes unchanged. Unknown
    /// names are rejected rather than silently stored raw.
    pub fn encode_for_storage(&self, text: &str, encoder: Option<&str>) -> Result<Vec<u8>> {
        self.encode_bytes(text.as_bytes(), encoder)
    }

    /// Byte-level form of [`encode_for_storage`](Self::encode_for_storage).
    pub fn encode_bytes(&self, value: &[u8], encoder: Option<&str>) -> Result<Vec<u8>> {
        match encoder {
            None | Some(NO_ENCODER) => Ok(value.to_vec()),
            Some(name) => self
                .codec(name)
                .map(|codec| codec.encode(value))
                .ok_or_else(|| CodecError::unknown_codec(name)),
        }
    }
}

/// Builder for [`CodecPipeline`].
#[derive(Debug, Default)]
pub struct PipelineBuilder {
    codecs: Vec<CodecRule>,
    formatters: Vec<FormatterRule>,
    format_undecoded: bool,
}

impl PipelineBuilder {
    /// Append a codec rule. Later rules have lower priority.
    pub fn codec(mut self, rule: CodecRule) -> Result<Self> {
        if rule.name() == NO_ENCODER || self.codecs.iter().any(|c| c.name() == rule.name()) {
            return Err(CodecError::duplicate_rule(rule.name()));
        }
        self.codecs.push(rule);
        Ok(self)
    }

    /// Append a formatter. Later formatters have lower priority.
    pub fn formatter(mut self, rule: FormatterRule) -> Result<Self> {
        if self.formatters.iter().any(|f| f.name() == rule.name()) {
            return Err(CodecError::duplicate_rule(rule.name()));
        }
        self.formatters.push(rule);
        Ok(self)
    }

    /// Append built-in codecs by name.
    pub fn builtin_codecs<S: AsRef<str>>(mut self, names: &[S]) -> Result<Self> {
        for name in names {
            let name = name.as_ref();
            let rule = CodecRule::builtin(name).ok_or_else(|| CodecError::unknown_codec(name))?;
            self = self.codec(rule)?;
        }
        Ok(self)
    }

    /// Append built-in formatters by name.
    pub fn builtin_formatters<S: AsRef<str>>(mut self, names: &[S]) -> Result<Self> {
        for name in names {
            let name = name.as_ref();
            let rule =
                FormatterRule::builtin(name).ok_or_else(|| CodecError::unknown_formatter(name))?;
            self = self.formatter(rule)?;
        }
        Ok(self)
    }

    /// Also run formatters on values no codec decoded.
    #[must_use]
    pub const fn format_undecoded(mut self, enabled: bool) -> Self {
        self.format_undecoded = enabled;
        self
    }

    #[must_use]
    pub fn build(self) -> CodecPipeline {
        CodecPipeline {
            codecs: self.codecs,
            formatters: self.formatters,
            format_undecoded: self.format_undecoded,
        }
    }
}
