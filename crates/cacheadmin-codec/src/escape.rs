//! Binary-safe rendering of raw bytes as text.
//!
//! Escaping only applies to values that are not valid UTF-8. In that mode a
//! literal backslash is written as `\\` so that [`unescape_bytes`] can
//! restore the exact bytes.

use std::fmt::Write;

use crate::error::{CodecError, Result};

/// Render bytes as display text.
///
/// Valid UTF-8 is returned unchanged. Otherwise every valid UTF-8 run is kept
/// with `\` doubled, and each invalid byte is written as `\xNN`.
#[must_use]
pub fn display_bytes(raw: &[u8]) -> String {
    match std::str::from_utf8(raw) {
        Ok(text) => text.to_owned(),
        Err(_) => escape_invalid(raw),
    }
}

/// Returns true if the bytes are not valid UTF-8 and would be escaped.
#[must_use]
pub fn is_binary(raw: &[u8]) -> bool {
    std::str::from_utf8(raw).is_err()
}

/// Inverse of [`display_bytes`] for escaped (binary) text.
///
/// Accepts `\\` and `\xNN`; any other escape is an error.
pub fn unescape_bytes(text: &str) -> Result<Vec<u8>> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'\\' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }

        match bytes.get(i + 1) {
            Some(b'\\') => {
                out.push(b'\\');
                i += 2;
            }
            Some(b'x') => {
                let byte = bytes
                    .get(i + 2..i + 4)
                    .and_then(|hex| std::str::from_utf8(hex).ok())
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                    .ok_or_else(|| CodecError::invalid_escape(i))?;
                out.push(byte);
                i += 4;
            }
            _ => return Err(CodecError::invalid_escape(i)),
        }
    }

    Ok(out)
}

fn push_escaped_text(out: &mut String, text: &str) {
    for ch in text.chars() {
        if ch == '\\' {
            out.push_str("\\\\");
        } else {
            out.push(ch);
        }
    }
}

fn escape_invalid(mut raw: &[u8]) -> String {
    let mut out = String::with_capacity(raw.len() * 2);

    while !raw.is_empty() {
        match std::str::from_utf8(raw) {
            Ok(text) => {
                push_escaped_text(&mut out, text);
                break;
            }
            Err(err) => {
                let (valid, rest) = raw.split_at(err.valid_up_to());
                // valid_up_to guarantees this prefix is UTF-8
                push_escaped_text(&mut out, std::str::from_utf8(valid).unwrap_or_default());

                let bad = err.error_len().unwrap_or(rest.len());
                for byte in &rest[..bad] {
                    let _ = write!(out, "\\x{byte:02x}");
                }
                raw = &rest[bad..];
            }
        }
    }

    out
}
