//! # Text Encoding Policy
//!
//! Purpose: Convert caller text to wire bytes and, when decoded output is
//! requested, wire bytes back to text.
//!
//! ## Design Principles
//! 1. **Bytes Are Opaque**: Raw byte arguments never pass through this module.
//! 2. **Explicit Policy**: Every lossy step is governed by `EncodingErrors`.
//! 3. **Borrow When Possible**: UTF-8 text encodes without copying.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use crate::error::{ProtocolError, ProtocolResult};

/// Character encoding applied to text values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    #[default]
    Utf8,
    /// ISO-8859-1; code points above U+00FF are unrepresentable.
    Latin1,
}

/// What to do with text that cannot be represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncodingErrors {
    #[default]
    Strict,
    /// Substitute `?` when encoding and U+FFFD when decoding.
    Replace,
    /// Drop the offending characters or bytes.
    Ignore,
}

impl TextEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Latin1 => "latin-1",
        }
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TextEncoding {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(TextEncoding::Utf8),
            "latin-1" | "latin1" | "iso-8859-1" => Ok(TextEncoding::Latin1),
            other => Err(ProtocolError::Encoding(format!("unknown encoding '{}'", other))),
        }
    }
}

impl EncodingErrors {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncodingErrors::Strict => "strict",
            EncodingErrors::Replace => "replace",
            EncodingErrors::Ignore => "ignore",
        }
    }
}

impl fmt::Display for EncodingErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EncodingErrors {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(EncodingErrors::Strict),
            "replace" => Ok(EncodingErrors::Replace),
            "ignore" => Ok(EncodingErrors::Ignore),
            other => Err(ProtocolError::Encoding(format!("unknown error policy '{}'", other))),
        }
    }
}

/// Encoding plus error policy, as configured on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextCodec {
    pub encoding: TextEncoding,
    pub errors: EncodingErrors,
}

impl TextCodec {
    pub fn new(encoding: TextEncoding, errors: EncodingErrors) -> Self {
        TextCodec { encoding, errors }
    }

    /// Encodes text into wire bytes.
    pub fn encode<'a>(&self, text: &'a str) -> ProtocolResult<Cow<'a, [u8]>> {
        match self.encoding {
            TextEncoding::Utf8 => Ok(Cow::Borrowed(text.as_bytes())),
            TextEncoding::Latin1 => {
                if text.is_ascii() {
                    return Ok(Cow::Borrowed(text.as_bytes()));
                }
                let mut out = Vec::with_capacity(text.len());
                for (pos, ch) in text.chars().enumerate() {
                    let code = ch as u32;
                    if code <= 0xFF {
                        out.push(code as u8);
                        continue;
                    }
                    match self.errors {
                        EncodingErrors::Strict => {
                            return Err(ProtocolError::Encoding(format!(
                                "'latin-1' codec can't encode character {:?} in position {}",
                                ch, pos
                            )))
                        }
                        EncodingErrors::Replace => out.push(b'?'),
                        EncodingErrors::Ignore => {}
                    }
                }
                Ok(Cow::Owned(out))
            }
        }
    }

    /// Decodes wire bytes into text.
    pub fn decode(&self, bytes: &[u8]) -> ProtocolResult<String> {
        match self.encoding {
            TextEncoding::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
            TextEncoding::Utf8 => match std::str::from_utf8(bytes) {
                Ok(text) => Ok(text.to_owned()),
                Err(err) => match self.errors {
                    EncodingErrors::Strict => Err(ProtocolError::Encoding(format!(
                        "'utf-8' codec can't decode byte at position {}",
                        err.valid_up_to()
                    ))),
                    EncodingErrors::Replace => Ok(String::from_utf8_lossy(bytes).into_owned()),
                    EncodingErrors::Ignore => Ok(decode_utf8_ignoring(bytes)),
                },
            },
        }
    }
}

fn decode_utf8_ignoring(mut bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    loop {
        match std::str::from_utf8(bytes) {
            Ok(rest) => {
                out.push_str(rest);
                return out;
            }
            Err(err) => {
                let valid = err.valid_up_to();
                out.push_str(std::str::from_utf8(&bytes[..valid]).unwrap_or_default());
                let skip = err.error_len().unwrap_or(bytes.len() - valid);
                bytes = &bytes[valid + skip..];
            }
        }
    }
}
