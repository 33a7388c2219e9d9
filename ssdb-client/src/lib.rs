//! # SSDB Sync Client
//!
//! Purpose: Provide a synchronous client for the line-oriented,
//! length-prefixed key-value protocol, with connection pooling and batching.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse TCP connections to avoid repeated connects.
//! 2. **Exclusive Ownership**: A connection serves one caller at a time.
//! 3. **Retry Once**: Transport failures reconnect and retry exactly once.
//! 4. **Protocol Clarity**: Framing lives in `ssdb-common`; this crate moves bytes.
//!
//! ## Layers
//!
//! ```text
//! Client ── ResponseCallbacks (reshape)
//!   │
//!   ├── Batch ──┐
//!   │           ▼
//!   └──────► Pool (ConnectionPool | BlockingConnectionPool)
//!                 │
//!                 ▼
//!             Connection ── SocketBuffer ── TcpStream
//! ```

mod batch;
mod client;
mod config;
mod connection;
mod dispatch;
mod error;
mod pool;
mod reader;

pub use batch::{Batch, BatchReply};
pub use client::Client;
pub use config::{
    ClientConfig, ConnectionConfig, KeepaliveOptions, PoolConfig, PoolKind,
    DEFAULT_BLOCKING_MAX_CONNECTIONS, DEFAULT_MAX_CONNECTIONS, DEFAULT_POOL_TIMEOUT,
    DEFAULT_SOCKET_READ_SIZE,
};
pub use connection::{with_reconnect, ConnectCallback, Connection};
pub use dispatch::{Reply, Reshape, ReshapeFn, ResponseCallbacks};
pub use error::{Error, ResponseError, Result};
pub use pool::{
    build_pool, BlockingConnectionPool, ConnectionPool, PidSource, Pool, PoolStats,
    PooledConnection,
};
pub use reader::{SocketBuffer, SERVER_CLOSED_CONNECTION};
pub use ssdb_common::{
    Arg, Command, EncodingErrors, Field, ProtocolError, Response, Status, TextCodec, TextEncoding,
};
