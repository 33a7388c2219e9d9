//! # Synchronous Client API
//!
//! Purpose: Expose a compact, blocking API for issuing commands to the
//! server over the length-prefixed protocol.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `Client` hides pooling, retries and decoding.
//! 2. **One Entry Point**: Every helper funnels through `execute`, which
//!    sends, retries once on transport failure, and reshapes the reply.
//! 3. **Per-Client Table**: Response rules are owned by the client and can
//!    be overridden without affecting other clients.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ssdb_common::{Arg, Command, Field};

use crate::batch::Batch;
use crate::config::ClientConfig;
use crate::connection::with_reconnect;
use crate::dispatch::{Reply, Reshape, ResponseCallbacks};
use crate::error::{Error, Result};
use crate::pool::{build_pool, Pool, PooledConnection};

/// Synchronous client with connection pooling.
///
/// Each call acquires a connection, executes one command, and returns the
/// connection to the pool. Cloning shares the pool and the response table.
#[derive(Clone)]
pub struct Client {
    pool: Arc<dyn Pool>,
    callbacks: Arc<ResponseCallbacks>,
}

impl Client {
    /// Creates a client with default configuration for `host:port`.
    pub fn connect(host: impl Into<String>, port: u16) -> Result<Self> {
        Self::with_config(ClientConfig::new(host, port))
    }

    /// Creates a client with a custom configuration.
    pub fn with_config(config: ClientConfig) -> Result<Self> {
        Ok(Self::with_pool(build_pool(&config)?))
    }

    /// Creates a client over an existing pool.
    pub fn with_pool(pool: Arc<dyn Pool>) -> Self {
        Client {
            pool,
            callbacks: Arc::new(ResponseCallbacks::default()),
        }
    }

    pub fn pool(&self) -> &Arc<dyn Pool> {
        &self.pool
    }

    pub fn response_callbacks(&self) -> &ResponseCallbacks {
        &self.callbacks
    }

    /// Overrides the reshape rule for `command` on this client.
    pub fn set_response_callback(&mut self, command: impl Into<String>, reshape: Reshape) {
        Arc::make_mut(&mut self.callbacks).set(command, reshape);
    }

    /// Sends a command and returns its reshaped reply.
    ///
    /// Returns `Reply::Absent` for `not_found` and `Error::Response` for
    /// error statuses. A transport failure is retried once on a fresh socket.
    pub fn execute(&self, command: &Command) -> Result<Reply> {
        self.execute_with(command, None)
    }

    /// Like `execute`, with an explicit reshape rule for this call.
    pub fn execute_as(&self, command: &Command, reshape: &Reshape) -> Result<Reply> {
        self.execute_with(command, Some(reshape))
    }

    fn execute_with(&self, command: &Command, reshape: Option<&Reshape>) -> Result<Reply> {
        let mut conn = PooledConnection::acquire(self.pool.as_ref(), command.name())?;
        let response = with_reconnect(&mut conn, |conn| {
            conn.send_command(command)?;
            conn.read_response()
        })?;
        drop(conn);
        self.callbacks.dispatch(command.name(), response, reshape)
    }

    /// Starts a batch sharing this client's pool and response table.
    pub fn batch(&self) -> Batch {
        Batch::new(self.pool.clone(), self.callbacks.clone())
    }

    /// Fetches a value by key. Returns `Ok(None)` when the key is missing.
    pub fn get(&self, name: impl Into<Arg>) -> Result<Option<Field>> {
        match self.execute(&Command::new("get").arg(name))? {
            Reply::Absent => Ok(None),
            Reply::Value(field) => Ok(Some(field)),
            other => Err(unexpected("get", &other)),
        }
    }

    /// Sets a value for a key without expiration.
    pub fn set(&self, name: impl Into<Arg>, value: impl Into<Arg>) -> Result<bool> {
        expect_bool("set", self.execute(&Command::new("set").arg(name).arg(value))?)
    }

    /// Sets a value and attaches an expiration in whole seconds.
    pub fn setx(&self, name: impl Into<Arg>, value: impl Into<Arg>, ttl: Duration) -> Result<bool> {
        let seconds = positive("ttl", ttl.as_secs())?;
        expect_bool(
            "setx",
            self.execute(&Command::new("setx").arg(name).arg(value).arg(seconds))?,
        )
    }

    /// Deletes a key. Returns true when a key was removed.
    pub fn delete(&self, name: impl Into<Arg>) -> Result<bool> {
        expect_bool("del", self.execute(&Command::new("del").arg(name))?)
    }

    pub fn exists(&self, name: impl Into<Arg>) -> Result<bool> {
        expect_bool("exists", self.execute(&Command::new("exists").arg(name))?)
    }

    /// Adds `amount` to the integer at `name` and returns the new value.
    pub fn incr(&self, name: impl Into<Arg>, amount: i64) -> Result<i64> {
        expect_int("incr", self.execute(&Command::new("incr").arg(name).arg(amount))?)
    }

    /// Fetches several keys; missing keys are left out of the result.
    pub fn multi_get<I, A>(&self, names: I) -> Result<Vec<(Field, Field)>>
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        match self.execute(&Command::with_args("multi_get", names))? {
            Reply::Map(pairs) => Ok(pairs),
            Reply::Absent => Ok(Vec::new()),
            other => Err(unexpected("multi_get", &other)),
        }
    }

    /// Lists keys in `(start, end]`, at most `limit` of them.
    pub fn keys(&self, start: impl Into<Arg>, end: impl Into<Arg>, limit: usize) -> Result<Vec<Field>> {
        let limit = positive("limit", limit as u64)?;
        match self.execute(&Command::new("keys").arg(start).arg(end).arg(limit))? {
            Reply::List(fields) => Ok(fields),
            Reply::Absent => Ok(Vec::new()),
            other => Err(unexpected("keys", &other)),
        }
    }

    pub fn hget(&self, name: impl Into<Arg>, key: impl Into<Arg>) -> Result<Option<Field>> {
        match self.execute(&Command::new("hget").arg(name).arg(key))? {
            Reply::Absent => Ok(None),
            Reply::Value(field) => Ok(Some(field)),
            other => Err(unexpected("hget", &other)),
        }
    }

    pub fn hset(&self, name: impl Into<Arg>, key: impl Into<Arg>, value: impl Into<Arg>) -> Result<bool> {
        expect_bool(
            "hset",
            self.execute(&Command::new("hset").arg(name).arg(key).arg(value))?,
        )
    }

    pub fn zset(&self, name: impl Into<Arg>, key: impl Into<Arg>, score: i64) -> Result<bool> {
        expect_bool(
            "zset",
            self.execute(&Command::new("zset").arg(name).arg(key).arg(score))?,
        )
    }

    /// Returns the score of `key` in sorted set `name`.
    pub fn zget(&self, name: impl Into<Arg>, key: impl Into<Arg>) -> Result<Option<i64>> {
        match self.execute(&Command::new("zget").arg(name).arg(key))? {
            Reply::Absent => Ok(None),
            Reply::Int(score) => Ok(Some(score)),
            other => Err(unexpected("zget", &other)),
        }
    }
}

impl fmt::Display for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Client<{}>", self.pool)
    }
}

fn expect_bool(command: &str, reply: Reply) -> Result<bool> {
    match reply.as_bool() {
        Some(value) => Ok(value),
        None if reply.is_absent() => Ok(false),
        None => Err(unexpected(command, &reply)),
    }
}

fn expect_int(command: &str, reply: Reply) -> Result<i64> {
    reply.as_int().ok_or_else(|| unexpected(command, &reply))
}

fn unexpected(command: &str, reply: &Reply) -> Error {
    Error::Data(format!("unexpected reply to '{}': {:?}", command, reply))
}

fn positive(name: &str, value: u64) -> Result<u64> {
    if value == 0 {
        return Err(Error::Data(format!("``{}`` must be a positive integer", name)));
    }
    Ok(value)
}
