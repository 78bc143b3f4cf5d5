//! Shell-style glob patterns over raw key bytes.
//!
//! Syntax follows Redis `SCAN MATCH`: `*` any run of bytes, `?` a single
//! byte, `[abc]`, `[a-z]` and `[^a]` classes, `\` escapes the next byte.
//! Matching is case-sensitive.

use std::fmt;

use cacheadmin_codec::display_bytes;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Byte(u8),
    Any,
    Star,
    Class { negated: bool, ranges: Vec<(u8, u8)> },
}

impl Token {
    fn matches(&self, b: u8) -> bool {
        match self {
            Self::Byte(expected) => *expected == b,
            Self::Any => true,
            Self::Star => false,
            Self::Class { negated, ranges } => {
                ranges.iter().any(|&(lo, hi)| lo <= b && b <= hi) != *negated
            }
        }
    }
}

/// Compiled glob pattern. The empty pattern matches every key.
#[derive(Clone, PartialEq, Eq)]
pub struct Pattern {
    source: Vec<u8>,
    tokens: Vec<Token>,
}

impl Pattern {
    /// Pattern matching every key.
    #[must_use]
    pub const fn any() -> Self {
        Self {
            source: Vec::new(),
            tokens: Vec::new(),
        }
    }

    /// Compile a pattern. Unclosed classes and a trailing escape are
    /// rejected.
    pub fn parse(source: impl AsRef<[u8]>) -> Result<Self> {
        let source = source.as_ref();
        let mut tokens = Vec::with_capacity(source.len());
        let mut i = 0;

        while i < source.len() {
            match source[i] {
                b'*' => {
                    if tokens.last() != Some(&Token::Star) {
                        tokens.push(Token::Star);
                    }
                    i += 1;
                }
                b'?' => {
                    tokens.push(Token::Any);
                    i += 1;
                }
                b'\\' => {
                    let escaped = *source.get(i + 1).ok_or_else(|| {
                        Error::validation(format!(
                            "pattern {:?} ends with an escape",
                            display_bytes(source)
                        ))
                    })?;
                    tokens.push(Token::Byte(escaped));
                    i += 2;
                }
                b'[' => {
                    let (token, next) = parse_class(source, i + 1)?;
                    tokens.push(token);
                    i = next;
                }
                b => {
                    tokens.push(Token::Byte(b));
                    i += 1;
                }
            }
        }

        if tokens == [Token::Star] {
            tokens.clear();
        }

        Ok(Self {
            source: source.to_vec(),
            tokens,
        })
    }

    /// Compile an optional pattern; `None` and `""` match everything.
    pub fn parse_optional(source: Option<&str>) -> Result<Self> {
        source.map_or_else(|| Ok(Self::any()), Self::parse)
    }

    /// Whether every key matches.
    #[must_use]
    pub fn matches_all(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Pattern text to hand to a server side matcher.
    #[must_use]
    pub fn server_pattern(&self) -> &[u8] {
        if self.source.is_empty() {
            b"*"
        } else {
            &self.source
        }
    }

    /// Test a key against the pattern.
    #[must_use]
    pub fn matches(&self, key: &[u8]) -> bool {
        if self.matches_all() {
            return true;
        }

        let tokens = &self.tokens;
        let (mut t, mut k) = (0, 0);
        // Last star seen and the key position it is currently absorbing up to
        let mut backtrack: Option<(usize, usize)> = None;

        while k < key.len() {
            match tokens.get(t) {
                Some(Token::Star) => {
                    backtrack = Some((t, k));
                    t += 1;
                }
                Some(token) if token.matches(key[k]) => {
                    t += 1;
                    k += 1;
                }
                _ => match backtrack {
                    Some((star, absorbed)) => {
                        t = star + 1;
                        k = absorbed + 1;
                        backtrack = Some((star, k));
                    }
                    None => return false,
                },
            }
        }

        tokens[t..].iter().all(|token| *token == Token::Star)
    }
}

fn parse_class(source: &[u8], start: usize) -> Result<(Token, usize)> {
    let unclosed = || {
        Error::validation(format!(
            "pattern {:?} has an unclosed character class",
            display_bytes(source)
        ))
    };

    let mut i = start;
    let negated = source.get(i) == Some(&b'^');
    if negated {
        i += 1;
    }

    let mut ranges = Vec::new();
    loop {
        let mut lo = *source.get(i).ok_or_else(unclosed)?;
        match lo {
            b']' if i > start + usize::from(negated) => {
                return Ok((Token::Class { negated, ranges }, i + 1));
            }
            b'\\' => {
                i += 1;
                lo = *source.get(i).ok_or_else(unclosed)?;
            }
            _ => {}
        }
        i += 1;

        if source.get(i) == Some(&b'-') && source.get(i + 1).is_some_and(|&b| b != b']') {
            let mut hi = source[i + 1];
            i += 2;
            if hi == b'\\' {
                hi = *source.get(i).ok_or_else(unclosed)?;
                i += 1;
            }
            ranges.push((lo.min(hi), lo.max(hi)));
        } else {
            ranges.push((lo, lo));
        }
    }
}

impl Default for Pattern {
    fn default() -> Self {
        Self::any()
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pattern({:?})", display_bytes(&self.source))
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&display_bytes(self.server_pattern()))
    }
}
