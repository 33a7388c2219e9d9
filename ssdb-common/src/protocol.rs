//! # Wire Protocol
//!
//! Purpose: Encode commands and decode responses for the line-oriented,
//! length-prefixed protocol.
//!
//! ## Design Principles
//! 1. **Pure Functions**: Encoding appends to a caller buffer; decoding pulls
//!    from any `FrameSource`, so sockets and byte slices share one parser.
//! 2. **Binary-Safe**: Payloads are length-delimited and may hold `\n`.
//! 3. **Fail Fast**: Invalid framing surfaces as `ProtocolError::Framing`.
//!
//! ## Frame Layout
//!
//! ```text
//! Command:   <len>\n<arg0>\n<len>\n<arg1>\n ... \n
//! Response:  <len>\n<status>\n<len>\n<field0>\n ... \n
//!
//! "get" "k"   =>  3\nget\n1\nk\n\n
//! ok "v"      =>  2\nok\n1\nv\n\n
//! ```

use std::fmt;
use std::str::FromStr;

use crate::command::Command;
use crate::encoding::TextCodec;
use crate::error::{ProtocolError, ProtocolResult};

/// Line terminator used by every frame.
pub const LF: u8 = b'\n';

/// Status token carried in the first frame of every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    NotFound,
    Error,
    Fail,
    ClientError,
}

impl Status {
    /// Token as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ok => "ok",
            Status::NotFound => "not_found",
            Status::Error => "error",
            Status::Fail => "fail",
            Status::ClientError => "client_error",
        }
    }

    /// Human-readable meaning of the status.
    pub fn message(&self) -> &'static str {
        match self {
            Status::Ok => "Operation succeeded.",
            Status::NotFound => "Not found.",
            Status::Error => "Server error.",
            Status::Fail => "Operation failed.",
            Status::ClientError => "Client or command error.",
        }
    }

    pub fn from_bytes(token: &[u8]) -> Option<Status> {
        match token {
            b"ok" => Some(Status::Ok),
            b"not_found" => Some(Status::NotFound),
            b"error" => Some(Status::Error),
            b"fail" => Some(Status::Fail),
            b"client_error" => Some(Status::ClientError),
            _ => None,
        }
    }

    /// True for statuses the server uses to report a failure.
    pub fn is_error(&self) -> bool {
        matches!(self, Status::Error | Status::Fail | Status::ClientError)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::from_bytes(s.as_bytes())
            .ok_or_else(|| ProtocolError::Framing(format!("unknown status '{}'", s)))
    }
}

/// One payload field of a response.
///
/// Fields are raw bytes unless the connection decodes responses to text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Field {
    Bytes(Vec<u8>),
    Text(String),
}

impl Field {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Field::Bytes(bytes) => bytes,
            Field::Text(text) => text.as_bytes(),
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Field::Bytes(bytes) => bytes,
            Field::Text(text) => text.into_bytes(),
        }
    }

    /// Returns the field as text, replacing invalid UTF-8.
    pub fn to_text_lossy(&self) -> String {
        match self {
            Field::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            Field::Text(text) => text.clone(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Field::Bytes(bytes) => std::str::from_utf8(bytes).ok(),
            Field::Text(text) => Some(text),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text_lossy())
    }
}

impl From<&str> for Field {
    fn from(value: &str) -> Self {
        Field::Text(value.to_owned())
    }
}

impl From<&[u8]> for Field {
    fn from(value: &[u8]) -> Self {
        Field::Bytes(value.to_vec())
    }
}

/// A decoded response: status token plus payload fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: Status,
    pub fields: Vec<Field>,
}

/// Incremental source of protocol lines and length-delimited payloads.
///
/// Implemented by the socket buffer and by `SliceSource`.
pub trait FrameSource {
    type Error: From<ProtocolError>;

    /// Returns the next line without its terminator.
    fn read_line(&mut self) -> Result<&[u8], Self::Error>;

    /// Returns exactly `len` payload bytes and consumes the mandatory
    /// trailing terminator.
    fn read_payload(&mut self, len: usize) -> Result<&[u8], Self::Error>;
}

/// Appends one length-prefixed frame.
pub fn encode_frame(payload: &[u8], out: &mut Vec<u8>) {
    let mut len = itoa::Buffer::new();
    out.extend_from_slice(len.format(payload.len()).as_bytes());
    out.push(LF);
    out.extend_from_slice(payload);
    out.push(LF);
}

/// Encodes a full command, including the terminating empty line.
pub fn encode_command(command: &Command, codec: &TextCodec, out: &mut Vec<u8>) -> ProtocolResult<()> {
    for arg in command.args() {
        let bytes = arg.to_bytes(codec)?;
        encode_frame(&bytes, out);
    }
    out.push(LF);
    Ok(())
}

/// Encodes a response block from raw fields. Used by servers and tests.
pub fn encode_response<I, F>(status: Status, fields: I, out: &mut Vec<u8>)
where
    I: IntoIterator<Item = F>,
    F: AsRef<[u8]>,
{
    encode_frame(status.as_str().as_bytes(), out);
    for field in fields {
        encode_frame(field.as_ref(), out);
    }
    out.push(LF);
}

/// Reads raw frames until the terminating empty line.
pub fn decode_frames<S: FrameSource>(source: &mut S) -> Result<Vec<Vec<u8>>, S::Error> {
    let mut frames = Vec::new();
    loop {
        let line = source.read_line()?;
        if line.is_empty() {
            return Ok(frames);
        }
        let len = parse_length(line)?;
        frames.push(source.read_payload(len)?.to_vec());
    }
}

/// Reads one response and splits off the status token.
///
/// When `decode` is set, payload fields become `Field::Text`.
pub fn decode_response<S: FrameSource>(
    source: &mut S,
    decode: Option<&TextCodec>,
) -> Result<Response, S::Error> {
    let frames = decode_frames(source)?;
    Ok(parse_response(frames, decode)?)
}

/// Builds a `Response` from raw frames.
pub fn parse_response(frames: Vec<Vec<u8>>, decode: Option<&TextCodec>) -> ProtocolResult<Response> {
    let mut frames = frames.into_iter();
    let token = frames
        .next()
        .ok_or_else(|| ProtocolError::Framing("empty response".to_string()))?;
    let status = Status::from_bytes(&token).ok_or_else(|| {
        ProtocolError::Framing(format!("unknown status '{}'", String::from_utf8_lossy(&token)))
    })?;

    let fields = match decode {
        Some(codec) => frames
            .map(|raw| codec.decode(&raw).map(Field::Text))
            .collect::<ProtocolResult<Vec<_>>>()?,
        None => frames.map(Field::Bytes).collect(),
    };
    Ok(Response { status, fields })
}

/// Parses a decimal length line.
pub fn parse_length(line: &[u8]) -> ProtocolResult<usize> {
    if line.is_empty() || !line.iter().all(u8::is_ascii_digit) {
        return Err(ProtocolError::Framing(format!(
            "invalid length line '{}'",
            String::from_utf8_lossy(line)
        )));
    }
    let mut value: usize = 0;
    for &b in line {
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add((b - b'0') as usize))
            .ok_or_else(|| ProtocolError::Framing("length overflow".to_string()))?;
    }
    Ok(value)
}

/// Bytes a payload of `len` occupies on the wire, terminator included.
pub fn payload_span(len: usize) -> ProtocolResult<usize> {
    len.checked_add(1)
        .ok_or_else(|| ProtocolError::Framing(format!("payload length {} too large", len)))
}

/// `FrameSource` over an in-memory byte slice.
pub struct SliceSource<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceSource<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        SliceSource { data, pos: 0 }
    }

    /// Bytes not consumed yet.
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }
}

impl<'a> FrameSource for SliceSource<'a> {
    type Error = ProtocolError;

    fn read_line(&mut self) -> Result<&[u8], Self::Error> {
        let rest = &self.data[self.pos..];
        let idx = memchr::memchr(LF, rest)
            .ok_or_else(|| ProtocolError::Framing("unterminated line".to_string()))?;
        self.pos += idx + 1;
        Ok(&rest[..idx])
    }

    fn read_payload(&mut self, len: usize) -> Result<&[u8], Self::Error> {
        let rest = &self.data[self.pos..];
        let needed = payload_span(len)?;
        if rest.len() < needed {
            return Err(ProtocolError::Framing(format!(
                "expected {} payload bytes, {} available",
                len,
                rest.len().saturating_sub(1)
            )));
        }
        if rest[len] != LF {
            return Err(ProtocolError::Framing("missing payload terminator".to_string()));
        }
        self.pos += needed;
        Ok(&rest[..len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{EncodingErrors, TextEncoding};

    #[test]
    fn encodes_command() {
        let mut buf = Vec::new();
        let cmd = Command::new("get").arg("key");
        encode_command(&cmd, &TextCodec::default(), &mut buf).unwrap();
        assert_eq!(&buf, b"3\nget\n3\nkey\n\n");
    }

    #[test]
    fn encodes_split_name_and_numbers() {
        let mut buf = Vec::new();
        let cmd = Command::new("config get").arg(10i64).arg(&b"a\nb"[..]);
        encode_command(&cmd, &TextCodec::default(), &mut buf).unwrap();
        assert_eq!(&buf, b"6\nconfig\n3\nget\n2\n10\n3\na\nb\n\n");
    }

    #[test]
    fn empty_name_still_frames_a_token() {
        let mut buf = Vec::new();
        encode_command(&Command::new(""), &TextCodec::default(), &mut buf).unwrap();
        assert_eq!(&buf, b"0\n\n\n");
    }

    #[test]
    fn response_roundtrip_keeps_empty_and_newline_fields() {
        let fields: Vec<&[u8]> = vec![b"", b"plain", b"line\nbreak", b"\n\n", b"\xff\x00"];
        let mut buf = Vec::new();
        encode_response(Status::Ok, &fields, &mut buf);

        let mut source = SliceSource::new(&buf);
        let response = decode_response(&mut source, None).unwrap();
        assert_eq!(response.status, Status::Ok);
        let decoded: Vec<Vec<u8>> = response.fields.into_iter().map(Field::into_bytes).collect();
        let expected: Vec<Vec<u8>> = fields.iter().map(|f| f.to_vec()).collect();
        assert_eq!(decoded, expected);
        assert!(source.remaining().is_empty());
    }

    #[test]
    fn ok_without_payload_is_empty() {
        let mut source = SliceSource::new(b"2\nok\n\n");
        let response = decode_response(&mut source, None).unwrap();
        assert_eq!(response.status, Status::Ok);
        assert!(response.fields.is_empty());
    }

    #[test]
    fn decodes_text_when_requested() {
        let codec = TextCodec::new(TextEncoding::Utf8, EncodingErrors::Strict);
        let mut source = SliceSource::new("2\nok\n5\nh\u{e9}ll\n\n".as_bytes());
        let response = decode_response(&mut source, Some(&codec)).unwrap();
        assert_eq!(response.fields, vec![Field::Text("h\u{e9}ll".into())]);
    }

    #[test]
    fn rejects_non_numeric_length() {
        let mut source = SliceSource::new(b"2\nok\nxx\nabc\n\n");
        let err = decode_response(&mut source, None).unwrap_err();
        assert!(matches!(err, ProtocolError::Framing(_)));
    }

    #[test]
    fn rejects_short_payload() {
        let mut source = SliceSource::new(b"2\nok\n10\nabc\n");
        assert!(decode_response(&mut source, None).is_err());
    }

    #[test]
    fn oversized_length_is_framing_error() {
        let mut source = SliceSource::new(b"2\nok\n18446744073709551615\nabc\n\n");
        let err = decode_response(&mut source, None).unwrap_err();
        assert!(matches!(err, ProtocolError::Framing(_)), "{err:?}");

        let mut source = SliceSource::new(b"abc\n");
        assert!(matches!(source.read_payload(usize::MAX), Err(ProtocolError::Framing(_))));
    }

    #[test]
    fn rejects_unknown_status() {
        let mut source = SliceSource::new(b"4\nmeh!\n\n");
        assert!(decode_response(&mut source, None).is_err());
    }

    #[test]
    fn parses_status_tokens() {
        for status in [Status::Ok, Status::NotFound, Status::Error, Status::Fail, Status::ClientError] {
            assert_eq!(status.as_str().parse::<Status>().unwrap(), status);
        }
        assert!(Status::Fail.is_error());
        assert!(!Status::NotFound.is_error());
    }
}
