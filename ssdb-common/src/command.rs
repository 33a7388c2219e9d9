//! # Commands and Arguments
//!
//! Purpose: Model one client request as an immutable, ordered list of
//! arguments, the first of which names the command.
//!
//! ## Design Principles
//! 1. **Typed Scalars**: Integers and floats stay typed until encoding.
//! 2. **Literal Tokens**: Command names bypass the text encoding policy.
//! 3. **Immutable After Build**: A `Command` is assembled once, then shared.

use std::borrow::Cow;
use std::fmt;

use crate::encoding::TextCodec;
use crate::error::ProtocolResult;

/// One command argument before it is turned into wire bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// Literal protocol token, sent as-is without text encoding.
    Token(String),
    /// Raw bytes, passed through unchanged.
    Bytes(Vec<u8>),
    /// Text, encoded with the connection's `TextCodec`.
    Text(String),
    Int(i64),
    UInt(u64),
    Float(f64),
}

impl Arg {
    /// Canonicalizes the argument to wire bytes.
    ///
    /// Integers use plain decimal text (sign only when negative). Floats use
    /// the shortest digits that round-trip, see `format_float`.
    pub fn to_bytes<'a>(&'a self, codec: &TextCodec) -> ProtocolResult<Cow<'a, [u8]>> {
        match self {
            Arg::Token(token) => Ok(Cow::Borrowed(token.as_bytes())),
            Arg::Bytes(bytes) => Ok(Cow::Borrowed(bytes.as_slice())),
            Arg::Text(text) => codec.encode(text),
            Arg::Int(value) => {
                let mut buf = itoa::Buffer::new();
                Ok(Cow::Owned(buf.format(*value).as_bytes().to_vec()))
            }
            Arg::UInt(value) => {
                let mut buf = itoa::Buffer::new();
                Ok(Cow::Owned(buf.format(*value).as_bytes().to_vec()))
            }
            Arg::Float(value) => Ok(Cow::Owned(format_float(*value).into_bytes())),
        }
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Token(token) => f.write_str(token),
            Arg::Bytes(bytes) => f.write_str(&String::from_utf8_lossy(bytes)),
            Arg::Text(text) => f.write_str(text),
            Arg::Int(value) => write!(f, "{}", value),
            Arg::UInt(value) => write!(f, "{}", value),
            Arg::Float(value) => f.write_str(&format_float(*value)),
        }
    }
}

/// Float text as the server parses it: shortest round-trip digits, switching
/// to exponent form below `1e-4` and from `1e16` on, with a signed exponent of
/// at least two digits (`1e+16`, `1.5e-05`). Non-finite values are written
/// as `nan`, `inf` and `-inf`.
fn format_float(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    // `Debug` already picks the same digits and the same exponent cutoffs.
    let text = format!("{:?}", value);
    match text.split_once('e') {
        Some((mantissa, exponent)) => {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exponent),
            };
            format!("{}e{}{:0>2}", mantissa, sign, digits)
        }
        None => text,
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Text(value.to_owned())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::Text(value)
    }
}

impl From<&String> for Arg {
    fn from(value: &String) -> Self {
        Arg::Text(value.clone())
    }
}

impl From<&[u8]> for Arg {
    fn from(value: &[u8]) -> Self {
        Arg::Bytes(value.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for Arg {
    fn from(value: &[u8; N]) -> Self {
        Arg::Bytes(value.to_vec())
    }
}

impl From<Vec<u8>> for Arg {
    fn from(value: Vec<u8>) -> Self {
        Arg::Bytes(value)
    }
}

impl From<i64> for Arg {
    fn from(value: i64) -> Self {
        Arg::Int(value)
    }
}

impl From<i32> for Arg {
    fn from(value: i32) -> Self {
        Arg::Int(value as i64)
    }
}

impl From<u64> for Arg {
    fn from(value: u64) -> Self {
        Arg::UInt(value)
    }
}

impl From<u32> for Arg {
    fn from(value: u32) -> Self {
        Arg::UInt(value as u64)
    }
}

impl From<usize> for Arg {
    fn from(value: usize) -> Self {
        Arg::UInt(value as u64)
    }
}

impl From<f64> for Arg {
    fn from(value: f64) -> Self {
        Arg::Float(value)
    }
}

/// An immutable request: command name followed by its arguments.
///
/// A name containing spaces (e.g. `"config get"`) is split into separate
/// literal tokens, which is what the server expects.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    name: String,
    args: Vec<Arg>,
}

impl Command {
    /// Starts a command with no arguments.
    ///
    /// The name is split on every single space, so empty pieces stay as
    /// empty tokens and an empty name still sends one (empty) name frame.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let args = name
            .split(' ')
            .map(|part| Arg::Token(part.to_owned()))
            .collect();
        Command { name, args }
    }

    /// Builds a command from a name and an argument list.
    pub fn with_args<I, A>(name: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        let mut command = Command::new(name);
        command.args.extend(args.into_iter().map(Into::into));
        command
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<Arg>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Command name as given by the caller, used for response dispatch.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Every argument that goes on the wire, name tokens included.
    pub fn args(&self) -> &[Arg] {
        &self.args
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, arg) in self.args.iter().enumerate() {
            if idx > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", arg)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_two_word_names_into_tokens() {
        let cmd = Command::new("config get").arg("maxmemory");
        assert_eq!(cmd.name(), "config get");
        assert_eq!(
            cmd.args(),
            &[
                Arg::Token("config".into()),
                Arg::Token("get".into()),
                Arg::Text("maxmemory".into()),
            ]
        );
    }

    #[test]
    fn integers_encode_as_plain_decimal() {
        let codec = TextCodec::default();
        assert_eq!(&*Arg::Int(-42).to_bytes(&codec).unwrap(), b"-42");
        assert_eq!(&*Arg::UInt(7).to_bytes(&codec).unwrap(), b"7");
        assert_eq!(&*Arg::Int(0).to_bytes(&codec).unwrap(), b"0");
        assert_eq!(&*Arg::Float(1.5).to_bytes(&codec).unwrap(), b"1.5");
    }

    #[test]
    fn empty_name_pieces_are_kept() {
        assert_eq!(Command::new("").args(), &[Arg::Token(String::new())]);
        assert_eq!(
            Command::new("a  b").args(),
            &[
                Arg::Token("a".into()),
                Arg::Token(String::new()),
                Arg::Token("b".into()),
            ]
        );
    }

    #[test]
    fn floats_use_signed_two_digit_exponents() {
        let codec = TextCodec::default();
        let text = |value: f64| String::from_utf8(Arg::Float(value).to_bytes(&codec).unwrap().into_owned()).unwrap();
        assert_eq!(text(1.0), "1.0");
        assert_eq!(text(0.0001), "0.0001");
        assert_eq!(text(1e16), "1e+16");
        assert_eq!(text(1e-7), "1e-07");
        assert_eq!(text(-1.5e-5), "-1.5e-05");
        assert_eq!(text(2.5e123), "2.5e+123");
        assert_eq!(text(f64::NAN), "nan");
        assert_eq!(text(f64::NEG_INFINITY), "-inf");
        assert_eq!(Arg::Float(1e16).to_string(), "1e+16");
    }

    #[test]
    fn display_joins_arguments() {
        let cmd = Command::with_args("set", ["key", "value"]);
        assert_eq!(cmd.to_string(), "set key value");
    }
}
