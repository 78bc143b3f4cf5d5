//! Reader for PHP `serialize()` output.
//!
//! Classes are never instantiated: objects are kept as incomplete classes,
//! the same as `unserialize($value, ['allowed_classes' => false])`.
//! References (`r:`/`R:`), custom serialization (`C:`) and enums (`E:`) are
//! not supported and make the whole input unreadable.

use serde_json::{Map, Number, Value as Json};

/// Key of a PHP array or object property.
#[derive(Debug, Clone, PartialEq)]
pub enum PhpKey {
    Int(i64),
    Str(String),
}

impl PhpKey {
    fn into_json_key(self) -> String {
        match self {
            Self::Int(i) => i.to_string(),
            Self::Str(s) => s,
        }
    }
}

/// Deserialized PHP value.
#[derive(Debug, Clone, PartialEq)]
pub enum PhpValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<(PhpKey, PhpValue)>),
    Object {
        class: String,
        properties: Vec<(PhpKey, PhpValue)>,
    },
}

/// Error raised when a deserialized value cannot be rendered as JSON.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Inf and NaN cannot be JSON encoded")]
pub struct NonFiniteFloat;

impl PhpValue {
    /// Render as JSON the way `json_encode` would.
    ///
    /// Arrays whose keys are exactly `0..n` become lists, all other arrays
    /// become objects.
    pub fn to_json(&self) -> Result<Json, NonFiniteFloat> {
        Ok(match self {
            Self::Null => Json::Null,
            Self::Bool(b) => Json::Bool(*b),
            Self::Int(i) => Json::Number((*i).into()),
            Self::Float(f) => Json::Number(Number::from_f64(*f).ok_or(NonFiniteFloat)?),
            Self::Str(s) => Json::String(s.clone()),
            Self::Array(entries) => {
                let is_list = entries
                    .iter()
                    .enumerate()
                    .all(|(i, (k, _))| *k == PhpKey::Int(i as i64));

                if is_list {
                    Json::Array(
                        entries
                            .iter()
                            .map(|(_, v)| v.to_json())
                            .collect::<Result<_, _>>()?,
                    )
                } else {
                    Json::Object(entries_to_map(entries)?)
                }
            }
            Self::Object { class, properties } => {
                let mut map = Map::new();
                map.insert(
                    "__PHP_Incomplete_Class_Name".to_owned(),
                    Json::String(class.clone()),
                );
                map.extend(entries_to_map(properties)?);
                Json::Object(map)
            }
        })
    }
}

fn entries_to_map(entries: &[(PhpKey, PhpValue)]) -> Result<Map<String, Json>, NonFiniteFloat> {
    let mut map = Map::new();
    for (key, value) in entries {
        map.insert(key.clone().into_json_key(), value.to_json()?);
    }
    Ok(map)
}

/// Parse a complete serialized value. Trailing bytes make the input invalid.
#[must_use]
pub fn unserialize(input: &str) -> Option<PhpValue> {
    let mut parser = Parser {
        bytes: input.as_bytes(),
        pos: 0,
    };
    let value = parser.value()?;
    (parser.pos == parser.bytes.len()).then_some(value)
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn value(&mut self) -> Option<PhpValue> {
        let tag = self.next()?;
        match tag {
            b'N' => {
                self.expect(b';')?;
                Some(PhpValue::Null)
            }
            b'b' => {
                self.expect(b':')?;
                let flag = self.until(b';')?;
                match flag {
                    b"0" => Some(PhpValue::Bool(false)),
                    b"1" => Some(PhpValue::Bool(true)),
                    _ => None,
                }
            }
            b'i' => {
                self.expect(b':')?;
                let digits = self.until(b';')?;
                std::str::from_utf8(digits).ok()?.parse().ok().map(PhpValue::Int)
            }
            b'd' => {
                self.expect(b':')?;
                let raw = std::str::from_utf8(self.until(b';')?).ok()?;
                let float = match raw {
                    "INF" => f64::INFINITY,
                    "-INF" => f64::NEG_INFINITY,
                    "NAN" => f64::NAN,
                    other => other.parse().ok()?,
                };
                Some(PhpValue::Float(float))
            }
            b's' => {
                let s = self.string_body()?;
                self.expect(b';')?;
                Some(PhpValue::Str(s))
            }
            b'a' => {
                self.expect(b':')?;
                let count = self.count(b':')?;
                self.expect(b'{')?;
                let entries = self.entries(count)?;
                Some(PhpValue::Array(entries))
            }
            b'O' => {
                let class = self.string_body()?;
                self.expect(b':')?;
                let count = self.count(b':')?;
                self.expect(b'{')?;
                let properties = self
                    .entries(count)?
                    .into_iter()
                    .map(|(k, v)| (unmangle(k), v))
                    .collect();
                Some(PhpValue::Object { class, properties })
            }
            _ => None,
        }
    }

    fn entries(&mut self, count: usize) -> Option<Vec<(PhpKey, PhpValue)>> {
        // count comes from untrusted input, cap the preallocation
        let mut entries = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let key = match self.value()? {
                PhpValue::Int(i) => PhpKey::Int(i),
                PhpValue::Str(s) => PhpKey::Str(s),
                _ => return None,
            };
            let value = self.value()?;
            entries.push((key, value));
        }
        self.expect(b'}')?;
        Some(entries)
    }

    /// `:<len>:"<bytes>"` as used by strings and class names.
    fn string_body(&mut self) -> Option<String> {
        self.expect(b':')?;
        let len = self.count(b':')?;
        self.expect(b'"')?;
        let end = self.pos.checked_add(len)?;
        let raw = self.bytes.get(self.pos..end)?;
        self.pos = end;
        self.expect(b'"')?;
        String::from_utf8(raw.to_vec()).ok()
    }

    fn count(&mut self, terminator: u8) -> Option<usize> {
        std::str::from_utf8(self.until(terminator)?).ok()?.parse().ok()
    }

    fn until(&mut self, terminator: u8) -> Option<&[u8]> {
        let start = self.pos;
        let offset = self.bytes[start..].iter().position(|&b| b == terminator)?;
        self.pos = start + offset + 1;
        Some(&self.bytes[start..start + offset])
    }

    fn next(&mut self) -> Option<u8> {
        let byte = *self.bytes.get(self.pos)?;
        self.pos += 1;
        Some(byte)
    }

    fn expect(&mut self, byte: u8) -> Option<()> {
        (self.next()? == byte).then_some(())
    }
}

/// Strip the NUL-delimited visibility prefix from private/protected names.
fn unmangle(key: PhpKey) -> PhpKey {
    match key {
        PhpKey::Str(name) if name.starts_with('\0') => {
            let plain = name.rsplit('\0').next().unwrap_or_default().to_owned();
            PhpKey::Str(plain)
        }
        other => other,
    }
}
