//! # Batch Pipeline
//!
//! Purpose: Queue commands locally and send them in one write, then read
//! the responses back in submission order.
//!
//! ## Design Principles
//! 1. **Composition**: A batch shares the client's pool and response table
//!    instead of re-implementing command dispatch.
//! 2. **Single Flush**: `execute` is the only place that touches the network.
//! 3. **Whole-Batch Retry**: A transport failure resends every command once;
//!    individual commands are never retried.
//! 4. **Always Release**: The connection goes back to the pool on every exit
//!    path, before any captured error is raised.

use std::sync::Arc;

use ssdb_common::Command;
use tracing::debug;

use crate::connection::{with_reconnect, Connection};
use crate::dispatch::{Reply, Reshape, ResponseCallbacks};
use crate::error::{Error, Result};
use crate::pool::{Pool, PooledConnection};

/// Outcome of one queued command: a value, or the error it produced.
pub type BatchReply = std::result::Result<Reply, Error>;

/// Client-side command buffer executed as one pipeline.
pub struct Batch {
    pool: Arc<dyn Pool>,
    callbacks: Arc<ResponseCallbacks>,
    stack: Vec<(Command, Option<Reshape>)>,
}

impl Batch {
    pub(crate) fn new(pool: Arc<dyn Pool>, callbacks: Arc<ResponseCallbacks>) -> Self {
        Batch {
            pool,
            callbacks,
            stack: Vec::new(),
        }
    }

    /// Queues a command using the reshape rule registered for its name.
    pub fn queue(&mut self, command: Command) -> &mut Self {
        self.stack.push((command, None));
        self
    }

    /// Queues a command with an explicit reshape rule.
    pub fn queue_as(&mut self, command: Command, reshape: Reshape) -> &mut Self {
        self.stack.push((command, Some(reshape)));
        self
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Drops every queued command.
    pub fn reset(&mut self) {
        self.stack.clear();
    }

    /// Sends every queued command and returns one reply per command.
    ///
    /// Server error statuses are captured at their position. With
    /// `raise_on_error`, the first captured error is returned instead,
    /// annotated with its 1-based position and command text.
    pub fn execute(&mut self, raise_on_error: bool) -> Result<Vec<BatchReply>> {
        let stack = std::mem::take(&mut self.stack);
        if stack.is_empty() {
            return Ok(Vec::new());
        }

        let callbacks = &self.callbacks;
        let result = {
            let mut conn = PooledConnection::acquire(self.pool.as_ref(), "batch")?;
            with_reconnect(&mut conn, |conn| run_pipeline(conn, callbacks, &stack))
        };
        let mut replies = result?;
        debug!(commands = stack.len(), "batch executed");

        if raise_on_error {
            if let Some(pos) = replies.iter().position(Result::is_err) {
                let captured = std::mem::replace(&mut replies[pos], Ok(Reply::Absent));
                if let Err(err) = captured {
                    return Err(err.annotate(pos + 1, &stack[pos].0.to_string()));
                }
            }
        }
        Ok(replies)
    }
}

fn run_pipeline(
    conn: &mut Connection,
    callbacks: &ResponseCallbacks,
    stack: &[(Command, Option<Reshape>)],
) -> Result<Vec<BatchReply>> {
    let packed = conn.pack_commands(stack.iter().map(|(command, _)| command))?;
    conn.send_packed(&packed)?;

    let mut replies = Vec::with_capacity(stack.len());
    for (command, reshape) in stack {
        let response = conn.read_response()?;
        replies.push(callbacks.dispatch(command.name(), response, reshape.as_ref()));
    }
    Ok(replies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::pool::ConnectionPool;

    fn batch() -> Batch {
        let pool = ConnectionPool::new(ConnectionConfig::default(), Some(1)).unwrap();
        Batch::new(Arc::new(pool), Arc::new(ResponseCallbacks::default()))
    }

    #[test]
    fn empty_batch_touches_nothing() {
        let mut batch = batch();
        assert!(batch.execute(true).unwrap().is_empty());
        assert_eq!(batch.pool.stats().created, 0);
    }

    #[test]
    fn queue_and_reset() {
        let mut batch = batch();
        batch
            .queue(Command::new("set").arg("a").arg("1"))
            .queue_as(Command::new("get").arg("a"), Reshape::Int);
        assert_eq!(batch.len(), 2);
        batch.reset();
        assert!(batch.is_empty());
    }
}
