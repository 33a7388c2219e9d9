//! # Client Errors
//!
//! Transport, framing, server-status and pool failures, in one enum.

use std::io;
use std::time::Duration;

use ssdb_common::{Field, ProtocolError, Status};
use thiserror::Error;

/// Result type for the sync client.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the sync client.
#[derive(Error, Debug)]
pub enum Error {
    /// Connect, write or read failure, including a remote close.
    #[error("connection error: {0}")]
    Connection(String),

    /// A socket operation exceeded its configured timeout.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The byte stream does not follow the protocol.
    #[error("invalid response: {0}")]
    Framing(String),

    /// The server answered with `error`, `fail` or `client_error`.
    #[error(transparent)]
    Response(#[from] ResponseError),

    /// A value could not be encoded or a reply could not be reshaped.
    #[error("data error: {0}")]
    Data(String),

    #[error("too many connections (max {max})")]
    PoolExhausted { max: usize },

    #[error("no connection available after {0:?}")]
    PoolTimeout(Duration),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Transport failures are retried once after a reconnect.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Timeout(_))
    }

    /// Adds batch position and command text to the error message.
    pub(crate) fn annotate(self, position: usize, command: &str) -> Error {
        match self {
            Error::Response(err) => Error::Response(err.annotate(position, command)),
            Error::Data(message) => Error::Data(pipeline_message(position, command, &message)),
            other => other,
        }
    }

    /// Maps a socket error, tagging timeouts.
    pub(crate) fn from_io(err: io::Error, action: &str) -> Error {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
                Error::Timeout(format!("Timeout {}", action))
            }
            _ => Error::Connection(format!("Error while {}. {}.", action, err)),
        }
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Framing(message) => Error::Framing(message),
            ProtocolError::Encoding(message) => Error::Data(message),
        }
    }
}

/// Error status returned by the server for one command.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{}", self.render())]
pub struct ResponseError {
    pub status: Status,
    pub payload: Vec<Field>,
    context: Option<String>,
}

impl ResponseError {
    pub fn new(status: Status, payload: Vec<Field>) -> Self {
        ResponseError {
            status,
            payload,
            context: None,
        }
    }

    /// Human-readable meaning of the status.
    pub fn message(&self) -> &'static str {
        self.status.message()
    }

    /// Batch annotation, when the error came out of a pipeline.
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    fn annotate(mut self, position: usize, command: &str) -> Self {
        self.context = Some(pipeline_message(position, command, &self.base_message()));
        self
    }

    fn render(&self) -> String {
        match &self.context {
            Some(context) => context.clone(),
            None => self.base_message(),
        }
    }

    fn base_message(&self) -> String {
        let mut message = format!("{} ({})", self.message(), self.status);
        if !self.payload.is_empty() {
            let detail: Vec<String> = self.payload.iter().map(Field::to_text_lossy).collect();
            message.push_str(": ");
            message.push_str(&detail.join(" "));
        }
        message
    }
}

fn pipeline_message(position: usize, command: &str, message: &str) -> String {
    format!(
        "Command # {} ({}) of pipeline caused error: {}",
        position, command, message
    )
}
