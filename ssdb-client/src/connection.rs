//! # Connection
//!
//! Purpose: Own one TCP socket to the server and move commands and responses
//! across it.
//!
//! ## Design Principles
//! 1. **Lazy Connect**: The socket is opened on first send or explicit
//!    `connect`, and reopened the same way after any disconnect.
//! 2. **Disconnect On Failure**: Transport and framing errors close the
//!    socket before they propagate, so a broken stream is never reused.
//! 3. **Retry Lives Above**: A connection never retries on its own;
//!    `with_reconnect` is the single place that does.
//!
//! ```text
//! unconnected --connect--> connected --error/disconnect--> disconnected
//!                              ^                               |
//!                              +------------connect------------+
//! ```

use std::fmt;
use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ssdb_common::{decode_response, encode_command, Arg, Command, Response, TextCodec};
use tracing::{debug, warn};

use crate::config::{ConnectionConfig, KeepaliveOptions};
use crate::error::{Error, Result};
use crate::reader::SocketBuffer;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Hook run right after the socket is established.
pub type ConnectCallback = Box<dyn FnMut(&mut Connection) -> Result<()> + Send>;

/// Single TCP connection with a reusable read buffer.
pub struct Connection {
    id: u64,
    pid: u32,
    config: Arc<ConnectionConfig>,
    codec: TextCodec,
    sock: Option<SocketBuffer<TcpStream>>,
    connect_callbacks: Vec<ConnectCallback>,
}

impl Connection {
    /// Creates an unconnected connection owned by the current process.
    pub fn new(config: ConnectionConfig) -> Self {
        Self::with_pid(Arc::new(config), std::process::id())
    }

    /// Creates an unconnected connection recorded as owned by `pid`.
    pub fn with_pid(config: Arc<ConnectionConfig>, pid: u32) -> Self {
        let codec = config.text_codec();
        Connection {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            pid,
            config,
            codec,
            sock: None,
            connect_callbacks: Vec::new(),
        }
    }

    /// Process-unique identifier, stable across reconnects.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Process id recorded when the connection was created.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.sock.is_some()
    }

    /// True when a response is already (partially) buffered.
    pub fn can_read(&self) -> bool {
        self.sock.as_ref().map(|sock| !sock.is_empty()).unwrap_or(false)
    }

    pub fn register_connect_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&mut Connection) -> Result<()> + Send + 'static,
    {
        self.connect_callbacks.push(Box::new(callback));
    }

    pub fn clear_connect_callbacks(&mut self) {
        self.connect_callbacks.clear();
    }

    /// Connects to the server if not already connected.
    pub fn connect(&mut self) -> Result<()> {
        if self.sock.is_some() {
            return Ok(());
        }
        let stream = self.open_stream().map_err(|err| {
            Error::Connection(format!(
                "Error connecting to {}:{}. {}.",
                self.config.host, self.config.port, err
            ))
        })?;
        self.sock = Some(SocketBuffer::new(stream, self.config.socket_read_size));
        debug!(connection = %self, id = self.id, "connected");

        if let Err(err) = self.on_connect() {
            self.disconnect();
            return Err(err);
        }
        Ok(())
    }

    fn on_connect(&mut self) -> Result<()> {
        let mut callbacks = std::mem::take(&mut self.connect_callbacks);
        let result = callbacks.iter_mut().try_for_each(|callback| callback(self));
        // Callbacks registered while running are kept after the existing ones.
        callbacks.append(&mut self.connect_callbacks);
        self.connect_callbacks = callbacks;
        result
    }

    /// Closes the socket. Safe to call on an unconnected connection.
    pub fn disconnect(&mut self) {
        if let Some(sock) = self.sock.take() {
            let _ = sock.get_ref().shutdown(Shutdown::Both);
            debug!(connection = %self, id = self.id, "disconnected");
        }
    }

    /// Drops the socket without a shutdown, so a process sharing the
    /// descriptor after a fork keeps its stream intact.
    pub(crate) fn abandon_socket(&mut self) {
        if self.sock.take().is_some() {
            debug!(connection = %self, id = self.id, "socket abandoned");
        }
    }

    /// Canonicalizes one argument to wire bytes.
    pub fn encode(&self, value: &Arg) -> Result<Vec<u8>> {
        Ok(value.to_bytes(&self.codec)?.into_owned())
    }

    /// Packs a command into its wire representation.
    pub fn pack_command(&self, command: &Command) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(64);
        encode_command(command, &self.codec, &mut out)?;
        Ok(out)
    }

    /// Packs several commands into one buffer for a single write.
    pub fn pack_commands<'a, I>(&self, commands: I) -> Result<Vec<u8>>
    where
        I: IntoIterator<Item = &'a Command>,
    {
        let mut out = Vec::with_capacity(256);
        for command in commands {
            encode_command(command, &self.codec, &mut out)?;
        }
        Ok(out)
    }

    /// Sends already packed bytes, connecting first if needed.
    pub fn send_packed(&mut self, data: &[u8]) -> Result<()> {
        self.connect()?;
        let result = match self.sock.as_mut() {
            Some(sock) => sock.write_all(data),
            None => Err(Error::Connection("socket closed before write".to_string())),
        };
        if result.is_err() {
            self.disconnect();
        }
        result
    }

    /// Packs and sends a command.
    pub fn send_command(&mut self, command: &Command) -> Result<()> {
        let packed = self.pack_command(command)?;
        self.send_packed(&packed)
    }

    /// Reads the response to a previously sent command.
    pub fn read_response(&mut self) -> Result<Response> {
        let decode = self.config.decode_responses.then_some(&self.codec);
        let result = match self.sock.as_mut() {
            Some(sock) => decode_response(sock, decode),
            None => Err(Error::Connection("not connected".to_string())),
        };
        if result.is_err() {
            self.disconnect();
        }
        result
    }

    fn open_stream(&self) -> io::Result<TcpStream> {
        let addrs = (self.config.host.as_str(), self.config.port).to_socket_addrs()?;
        let mut last_err = None;
        for addr in addrs {
            match self.open_addr(addr) {
                Ok(stream) => return Ok(stream),
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "address lookup returned no results")
        }))
    }

    fn open_addr(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        let config = &self.config;
        let stream = match config.effective_connect_timeout() {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout)?,
            None => TcpStream::connect(addr)?,
        };
        stream.set_nodelay(config.tcp_nodelay)?;
        if config.socket_keepalive {
            apply_keepalive(&stream, &config.keepalive)?;
        }
        stream.set_read_timeout(config.read_timeout)?;
        stream.set_write_timeout(config.write_timeout)?;
        Ok(stream)
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Connection<{}>", self.config.describe())
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Runs `op`, and on a transport failure reconnects and runs it once more.
///
/// Framing and server-status errors are returned as-is: replaying them would
/// not change the outcome.
pub fn with_reconnect<T, F>(conn: &mut Connection, mut op: F) -> Result<T>
where
    F: FnMut(&mut Connection) -> Result<T>,
{
    match op(conn) {
        Err(err) if err.is_retryable() => {
            warn!(connection = %conn, error = %err, "retrying after reconnect");
            conn.disconnect();
            op(conn)
        }
        result => result,
    }
}

#[cfg(unix)]
fn apply_keepalive(stream: &TcpStream, options: &KeepaliveOptions) -> io::Result<()> {
    use nix::sys::socket::{setsockopt, sockopt};

    setsockopt(stream, sockopt::KeepAlive, &true)?;
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        let secs = |d: std::time::Duration| d.as_secs().clamp(1, u32::MAX as u64) as u32;
        if let Some(idle) = options.idle {
            setsockopt(stream, sockopt::TcpKeepIdle, &secs(idle))?;
        }
        if let Some(interval) = options.interval {
            setsockopt(stream, sockopt::TcpKeepInterval, &secs(interval))?;
        }
        if let Some(count) = options.count {
            setsockopt(stream, sockopt::TcpKeepCount, &count)?;
        }
    }
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    let _ = options;
    Ok(())
}

#[cfg(not(unix))]
fn apply_keepalive(_: &TcpStream, _: &KeepaliveOptions) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "socket keepalive requires a unix target",
    ))
}
