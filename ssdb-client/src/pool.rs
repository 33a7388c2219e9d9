//! # Connection Pool
//!
//! Purpose: Share a bounded set of TCP connections between threads so each
//! caller gets exclusive use of one connection per command or batch.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Freed connections are reused LIFO, so the
//!    number of sockets only grows with demand.
//! 2. **Ownership Transfer**: `acquire` moves a `Connection` out of the pool
//!    and `release` moves it back; no connection is ever shared.
//! 3. **One Lock**: All bookkeeping, including the fork check, sits behind a
//!    single mutex.
//! 4. **Fork Safety**: A process id change discards every pooled connection
//!    before the next acquire or release proceeds.
//!
//! ## Variants
//!
//! - `ConnectionPool` fails immediately with `PoolExhausted` when full.
//! - `BlockingConnectionPool` keeps `max_connections` slots: idle
//!   connections in a LIFO stack on top of a count of empty placeholders.
//!   It waits up to `timeout` for one.
//!
//! ```text
//! BlockingConnectionPool slots (top = end of Vec):
//!   sentinels = 2 | idle = [ c7, c3 ]
//!                                ^ popped first: reuse before create
//! ```

use std::collections::HashSet;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use crate::config::{ClientConfig, ConnectionConfig, PoolKind, DEFAULT_MAX_CONNECTIONS};
use crate::connection::Connection;
use crate::error::{Error, Result};

/// Source of the current process id; replaceable for embedding and tests.
pub type PidSource = Arc<dyn Fn() -> u32 + Send + Sync>;

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Idle connections ready for reuse.
    pub available: usize,
    /// Connections currently handed out.
    pub in_use: usize,
    /// Connections created since the last reset.
    pub created: usize,
    pub max_connections: usize,
}

/// Common contract of both pool variants.
pub trait Pool: Send + Sync + fmt::Display {
    /// Hands out a connection for exclusive use.
    fn acquire(&self, command_hint: &str) -> Result<Connection>;

    /// Returns a connection obtained from `acquire`.
    fn release(&self, conn: Connection);

    /// Closes idle sockets now and in-use sockets when they are released.
    fn disconnect_all(&self);

    fn stats(&self) -> PoolStats;

    fn connection_config(&self) -> &ConnectionConfig;
}

/// Builds the pool variant selected by `config`.
pub fn build_pool(config: &ClientConfig) -> Result<Arc<dyn Pool>> {
    config.validate()?;
    let max = config.pool.effective_max_connections();
    let pool: Arc<dyn Pool> = match config.pool.kind {
        PoolKind::NonBlocking => Arc::new(ConnectionPool::new(config.connection.clone(), Some(max))?),
        PoolKind::Blocking => Arc::new(BlockingConnectionPool::new(
            config.connection.clone(),
            max,
            config.pool.timeout,
        )?),
    };
    Ok(pool)
}

fn default_pid_source() -> PidSource {
    Arc::new(std::process::id)
}

fn check_max_connections(max_connections: usize) -> Result<()> {
    if max_connections == 0 {
        return Err(Error::Config(
            "\"max_connections\" must be a positive integer".to_string(),
        ));
    }
    Ok(())
}

struct PoolState {
    pid: u32,
    created: usize,
    available: Vec<Connection>,
    in_use: HashSet<u64>,
    // In-use connections to disconnect when they come back.
    stale: HashSet<u64>,
}

impl PoolState {
    fn new(pid: u32) -> Self {
        PoolState {
            pid,
            created: 0,
            available: Vec::new(),
            in_use: HashSet::new(),
            stale: HashSet::new(),
        }
    }
}

/// Non-blocking pool: raises `PoolExhausted` once `max_connections` exist.
pub struct ConnectionPool {
    config: Arc<ConnectionConfig>,
    max_connections: usize,
    pid_source: PidSource,
    state: Mutex<PoolState>,
}

impl ConnectionPool {
    /// Creates a pool; `None` means effectively unbounded.
    pub fn new(config: ConnectionConfig, max_connections: Option<usize>) -> Result<Self> {
        let max_connections = max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS);
        check_max_connections(max_connections)?;
        config.validate()?;
        let pid_source = default_pid_source();
        Ok(ConnectionPool {
            config: Arc::new(config),
            max_connections,
            state: Mutex::new(PoolState::new(pid_source())),
            pid_source,
        })
    }

    /// Replaces the process id source and resets the pool under it.
    pub fn with_pid_source(mut self, pid_source: PidSource) -> Self {
        *self.state.get_mut() = PoolState::new(pid_source());
        self.pid_source = pid_source;
        self
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    fn check_pid(&self, state: &mut PoolState) {
        let pid = (self.pid_source)();
        if pid == state.pid {
            return;
        }
        debug!(pool = %self, old_pid = state.pid, new_pid = pid, "process changed, resetting pool");
        for conn in state.available.iter_mut() {
            conn.abandon_socket();
        }
        *state = PoolState::new(pid);
    }
}

impl Pool for ConnectionPool {
    fn acquire(&self, command_hint: &str) -> Result<Connection> {
        let mut state = self.state.lock();
        self.check_pid(&mut state);

        if let Some(conn) = state.available.pop() {
            state.in_use.insert(conn.id());
            trace!(command = command_hint, id = conn.id(), "reusing pooled connection");
            return Ok(conn);
        }

        if state.created >= self.max_connections {
            return Err(Error::PoolExhausted {
                max: self.max_connections,
            });
        }
        state.created += 1;
        let conn = Connection::with_pid(self.config.clone(), state.pid);
        state.in_use.insert(conn.id());
        trace!(command = command_hint, id = conn.id(), "created pooled connection");
        Ok(conn)
    }

    fn release(&self, mut conn: Connection) {
        let mut state = self.state.lock();
        self.check_pid(&mut state);

        if conn.pid() != state.pid {
            conn.abandon_socket();
            return;
        }
        if !state.in_use.remove(&conn.id()) {
            warn!(pool = %self, id = conn.id(), "released connection does not belong to this pool");
            return;
        }
        if state.stale.remove(&conn.id()) {
            conn.disconnect();
        }
        state.available.push(conn);
    }

    fn disconnect_all(&self) {
        let mut state = self.state.lock();
        for conn in state.available.iter_mut() {
            conn.disconnect();
        }
        state.stale = state.in_use.clone();
    }

    fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            available: state.available.len(),
            in_use: state.in_use.len(),
            created: state.created,
            max_connections: self.max_connections,
        }
    }

    fn connection_config(&self) -> &ConnectionConfig {
        &self.config
    }
}

impl fmt::Display for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionPool<Connection<{}>>", self.config.describe())
    }
}

struct BlockingState {
    pid: u32,
    // LIFO stack of idle connections.
    idle: Vec<Connection>,
    // Empty slots: permission to create a connection.
    sentinels: usize,
    created: usize,
    in_use: HashSet<u64>,
    stale: HashSet<u64>,
}

impl BlockingState {
    fn new(pid: u32, max_connections: usize) -> Self {
        BlockingState {
            pid,
            idle: Vec::new(),
            sentinels: max_connections,
            created: 0,
            in_use: HashSet::new(),
            stale: HashSet::new(),
        }
    }

    fn free_slots(&self) -> usize {
        self.idle.len() + self.sentinels
    }
}

/// Blocking pool: waits up to `timeout` for a free slot.
pub struct BlockingConnectionPool {
    config: Arc<ConnectionConfig>,
    max_connections: usize,
    timeout: Option<Duration>,
    pid_source: PidSource,
    state: Mutex<BlockingState>,
    slot_freed: Condvar,
}

impl BlockingConnectionPool {
    /// Creates a pool; a `timeout` of `None` waits forever.
    pub fn new(
        config: ConnectionConfig,
        max_connections: usize,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        check_max_connections(max_connections)?;
        config.validate()?;
        let pid_source = default_pid_source();
        Ok(BlockingConnectionPool {
            config: Arc::new(config),
            max_connections,
            timeout,
            state: Mutex::new(BlockingState::new(pid_source(), max_connections)),
            pid_source,
            slot_freed: Condvar::new(),
        })
    }

    /// Replaces the process id source and resets the pool under it.
    pub fn with_pid_source(mut self, pid_source: PidSource) -> Self {
        *self.state.get_mut() = BlockingState::new(pid_source(), self.max_connections);
        self.pid_source = pid_source;
        self
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn check_pid(&self, state: &mut BlockingState) {
        let pid = (self.pid_source)();
        if pid == state.pid {
            return;
        }
        debug!(pool = %self, old_pid = state.pid, new_pid = pid, "process changed, resetting pool");
        for conn in state.idle.iter_mut() {
            conn.abandon_socket();
        }
        *state = BlockingState::new(pid, self.max_connections);
        self.slot_freed.notify_all();
    }
}

impl Pool for BlockingConnectionPool {
    fn acquire(&self, command_hint: &str) -> Result<Connection> {
        let mut state = self.state.lock();
        self.check_pid(&mut state);

        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);
        while state.free_slots() == 0 {
            match deadline {
                Some(deadline) => {
                    let waited = self.slot_freed.wait_until(&mut state, deadline);
                    if waited.timed_out() && state.free_slots() == 0 {
                        return Err(Error::PoolTimeout(self.timeout.unwrap_or_default()));
                    }
                }
                None => self.slot_freed.wait(&mut state),
            }
        }

        let conn = match state.idle.pop() {
            Some(conn) => {
                trace!(command = command_hint, id = conn.id(), "reusing pooled connection");
                conn
            }
            None => {
                state.sentinels -= 1;
                state.created += 1;
                let conn = Connection::with_pid(self.config.clone(), state.pid);
                trace!(command = command_hint, id = conn.id(), "created pooled connection");
                conn
            }
        };
        state.in_use.insert(conn.id());
        Ok(conn)
    }

    fn release(&self, mut conn: Connection) {
        let mut state = self.state.lock();
        self.check_pid(&mut state);

        if conn.pid() != state.pid {
            conn.abandon_socket();
            return;
        }
        if !state.in_use.remove(&conn.id()) || state.free_slots() >= self.max_connections {
            // Left over from before a reset; the pool has no room for it.
            debug!(pool = %self, id = conn.id(), "dropping connection on release");
            return;
        }
        if state.stale.remove(&conn.id()) {
            conn.disconnect();
        }
        state.idle.push(conn);
        drop(state);
        self.slot_freed.notify_one();
    }

    fn disconnect_all(&self) {
        let mut state = self.state.lock();
        for conn in state.idle.iter_mut() {
            conn.disconnect();
        }
        state.stale = state.in_use.clone();
    }

    fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            available: state.idle.len(),
            in_use: state.in_use.len(),
            created: state.created,
            max_connections: self.max_connections,
        }
    }

    fn connection_config(&self) -> &ConnectionConfig {
        &self.config
    }
}

impl fmt::Display for BlockingConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockingConnectionPool<Connection<{}>>", self.config.describe())
    }
}

/// RAII wrapper returning a connection to the pool on drop.
pub struct PooledConnection<'a> {
    pool: &'a dyn Pool,
    conn: Option<Connection>,
}

impl<'a> PooledConnection<'a> {
    pub fn acquire(pool: &'a dyn Pool, command_hint: &str) -> Result<Self> {
        let conn = pool.acquire(command_hint)?;
        Ok(PooledConnection {
            pool,
            conn: Some(conn),
        })
    }
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection exists")
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection exists")
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn pool(max: usize) -> ConnectionPool {
        ConnectionPool::new(ConnectionConfig::default(), Some(max)).unwrap()
    }

    fn assert_bounded(stats: PoolStats) {
        assert!(stats.available + stats.in_use <= stats.max_connections, "{stats:?}");
    }

    #[test]
    fn reuses_most_recently_released() {
        let pool = pool(4);
        let a = pool.acquire("get").unwrap();
        let b = pool.acquire("get").unwrap();
        let (a_id, b_id) = (a.id(), b.id());
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.acquire("get").unwrap().id(), b_id);
        assert_eq!(pool.acquire("get").unwrap().id(), a_id);
    }

    #[test]
    fn exhausts_at_max_connections() {
        let pool = pool(2);
        let _a = pool.acquire("_").unwrap();
        let _b = pool.acquire("_").unwrap();
        assert!(matches!(pool.acquire("_"), Err(Error::PoolExhausted { max: 2 })));
    }

    #[test]
    fn never_hands_out_in_use_connection() {
        let pool = pool(3);
        let mut held = Vec::new();
        for round in 0..20 {
            if round % 3 == 2 {
                if let Some(conn) = held.pop() {
                    pool.release(conn);
                }
            } else if let Ok(conn) = pool.acquire("_") {
                assert!(held.iter().all(|h: &Connection| h.id() != conn.id()));
                held.push(conn);
            }
            assert_bounded(pool.stats());
        }
    }

    #[test]
    fn rejects_zero_max() {
        assert!(matches!(
            ConnectionPool::new(ConnectionConfig::default(), Some(0)),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            BlockingConnectionPool::new(ConnectionConfig::default(), 0, None),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn fork_discards_prior_connections() {
        let pid = Arc::new(AtomicU32::new(100));
        let source = pid.clone();
        let pool = pool(2).with_pid_source(Arc::new(move || source.load(Ordering::SeqCst)));

        let before = pool.acquire("_").unwrap();
        let idle = pool.acquire("_").unwrap();
        let idle_id = idle.id();
        pool.release(idle);

        pid.store(200, Ordering::SeqCst);
        let fresh = pool.acquire("_").unwrap();
        assert_ne!(fresh.id(), idle_id);
        assert_ne!(fresh.id(), before.id());
        assert_eq!(fresh.pid(), 200);

        // A connection from the old process is ignored on release.
        pool.release(before);
        let stats = pool.stats();
        assert_eq!(stats.available, 0);
        assert_eq!(stats.in_use, 1);
        assert_eq!(stats.created, 1);
    }

    #[test]
    fn blocking_pool_prefers_released_connections() {
        let pool = BlockingConnectionPool::new(ConnectionConfig::default(), 3, None).unwrap();
        let a = pool.acquire("_").unwrap();
        let a_id = a.id();
        pool.release(a);
        assert_eq!(pool.acquire("_").unwrap().id(), a_id);
        assert_eq!(pool.stats().created, 1);
    }

    #[test]
    fn blocking_pool_placeholders_cost_nothing() {
        let pool = BlockingConnectionPool::new(ConnectionConfig::default(), usize::MAX / 2, None).unwrap();
        let a = pool.acquire("_").unwrap();
        assert_eq!(pool.stats().in_use, 1);
        pool.release(a);
        assert_eq!(pool.stats().available, 1);
        assert_eq!(pool.timeout(), None);
    }

    #[test]
    fn blocking_pool_fork_refills_slots() {
        let pid = Arc::new(AtomicU32::new(1));
        let source = pid.clone();
        let pool = BlockingConnectionPool::new(ConnectionConfig::default(), 1, Some(Duration::from_millis(10)))
            .unwrap()
            .with_pid_source(Arc::new(move || source.load(Ordering::SeqCst)));

        let held = pool.acquire("_").unwrap();
        assert!(matches!(pool.acquire("_"), Err(Error::PoolTimeout(_))));

        pid.store(2, Ordering::SeqCst);
        let fresh = pool.acquire("_").unwrap();
        assert_ne!(fresh.id(), held.id());
        pool.release(held);
        assert_bounded(pool.stats());
    }

    #[test]
    fn disconnect_all_marks_in_use() {
        let pool = pool(2);
        let conn = pool.acquire("_").unwrap();
        let id = conn.id();
        pool.disconnect_all();
        pool.release(conn);
        let conn = pool.acquire("_").unwrap();
        assert_eq!(conn.id(), id);
        assert!(!conn.is_connected());
    }

    #[test]
    fn guard_releases_on_drop() {
        let pool = pool(1);
        {
            let guard = PooledConnection::acquire(&pool, "get").unwrap();
            assert!(!guard.is_connected());
            assert_eq!(pool.stats().in_use, 1);
        }
        let stats = pool.stats();
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.available, 1);
    }

    #[test]
    fn display_names_host_and_port() {
        assert_eq!(pool(1).to_string(), "ConnectionPool<Connection<host=127.0.0.1,port=8888>>");
    }
}
