//! Error type for codec pipeline assembly.
//!
//! Decoding itself never fails: a rule that cannot decode its input reports
//! "no match" and the pipeline moves on. Errors arise while resolving rule
//! names from configuration, or when escaped binary text is malformed.

use thiserror::Error;

/// Root error type for the codec crate.
///
/// Exposes predicate methods (`is_xxx()`) for classification without
/// exposing the internal kind enum.
#[derive(Error, Debug)]
#[error("{kind}")]
pub struct CodecError {
    kind: ErrorKind,
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub(crate) enum ErrorKind {
    /// A configured codec name has no registered rule.
    #[error("unknown codec: {0}")]
    UnknownCodec(String),

    /// A configured formatter name has no registered rule.
    #[error("unknown formatter: {0}")]
    UnknownFormatter(String),

    /// The same rule name was registered twice.
    #[error("duplicate rule name: {0}")]
    DuplicateRule(String),

    /// Escaped binary text has a bad escape at the given byte offset.
    #[error("invalid escape sequence at offset {0}")]
    InvalidEscape(usize),
}

impl CodecError {
    /// Create error for an unregistered codec name.
    #[must_use]
    pub fn unknown_codec(name: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::UnknownCodec(name.into()),
        }
    }

    /// Create error for an unregistered formatter name.
    #[must_use]
    pub fn unknown_formatter(name: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::UnknownFormatter(name.into()),
        }
    }

    /// Create error for a rule name registered twice.
    #[must_use]
    pub fn duplicate_rule(name: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::DuplicateRule(name.into()),
        }
    }

    /// Create error for a malformed escape in binary display text.
    #[must_use]
    pub const fn invalid_escape(offset: usize) -> Self {
        Self {
            kind: ErrorKind::InvalidEscape(offset),
        }
    }

    /// Returns true if a codec name could not be resolved.
    #[must_use]
    pub const fn is_unknown_codec(&self) -> bool {
        matches!(self.kind, ErrorKind::UnknownCodec(_))
    }

    /// Returns true if a formatter name could not be resolved.
    #[must_use]
    pub const fn is_unknown_formatter(&self) -> bool {
        matches!(self.kind, ErrorKind::UnknownFormatter(_))
    }

    /// Returns true if a rule name was registered twice.
    #[must_use]
    pub const fn is_duplicate_rule(&self) -> bool {
        matches!(self.kind, ErrorKind::DuplicateRule(_))
    }

    /// Returns true if escaped binary text could not be restored.
    #[must_use]
    pub const fn is_invalid_escape(&self) -> bool {
        matches!(self.kind, ErrorKind::InvalidEscape(_))
    }
}

/// Result type alias for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_codec() {
        let err = CodecError::unknown_codec("brotli");
        assert!(err.is_unknown_codec());
        assert!(!err.is_unknown_formatter());
        assert_eq!(err.to_string(), "unknown codec: brotli");
    }

    #[test]
    fn test_unknown_formatter() {
        let err = CodecError::unknown_formatter("yaml");
        assert!(err.is_unknown_formatter());
        assert!(!err.is_duplicate_rule());
        assert!(err.to_string().contains("yaml"));
    }

    #[test]
    fn test_duplicate_rule() {
        let err = CodecError::duplicate_rule("gzcompress");
        assert!(err.is_duplicate_rule());
        assert!(err.to_string().contains("gzcompress"));
    }

    #[test]
    fn test_invalid_escape() {
        let err = CodecError::invalid_escape(3);
        assert!(err.is_invalid_escape());
        assert!(!err.is_unknown_codec());
        assert_eq!(err.to_string(), "invalid escape sequence at offset 3");
    }
}
