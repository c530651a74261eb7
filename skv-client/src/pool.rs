//! # Connection Pool
//!
//! Purpose: Reuse TCP/Unix connections per backend address so calls skip the
//! dial and AUTH/SELECT handshake.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Keep a small free list per address.
//! 2. **Minimal Locking**: Hold the mutex only while moving idle connections,
//!    never across socket I/O.
//! 3. **RAII Release**: `PooledConnection` returns or closes its connection on
//!    every exit path, unwinding included.
//! 4. **Distrust Broken Pipes**: Only error replies keep a connection alive;
//!    any other failure closes it.

use std::collections::HashMap;
use std::io::{self, BufReader, Read, Write};
use std::net::{Shutdown, TcpStream};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use bytes::BytesMut;
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};
use crate::resp::{encode, read_response, Encoding, RespValue};
use crate::server::{ServerAddr, ServerInfo};

/// Maximum idle connections kept per backend address.
pub const MAX_IDLE_CONNS_PER_ADDR: usize = 2;

/// Plain stream socket to a backend.
#[derive(Debug)]
pub enum Stream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Stream {
    /// Opens a blocking socket to `addr` without any timeout.
    pub fn connect(addr: &ServerAddr) -> io::Result<Stream> {
        match addr {
            ServerAddr::Tcp(addr) => {
                let stream = TcpStream::connect(addr)?;
                // Disable Nagle to keep request latency low for small payloads.
                stream.set_nodelay(true)?;
                Ok(Stream::Tcp(stream))
            }
            #[cfg(unix)]
            ServerAddr::Unix(path) => Ok(Stream::Unix(UnixStream::connect(path)?)),
            #[cfg(not(unix))]
            ServerAddr::Unix(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "unix sockets are not supported on this platform",
            )),
        }
    }

    fn set_timeout(&self, timeout: Duration) -> io::Result<()> {
        match self {
            Stream::Tcp(stream) => {
                stream.set_read_timeout(Some(timeout))?;
                stream.set_write_timeout(Some(timeout))
            }
            #[cfg(unix)]
            Stream::Unix(stream) => {
                stream.set_read_timeout(Some(timeout))?;
                stream.set_write_timeout(Some(timeout))
            }
        }
    }

    fn shutdown(&self) {
        // The peer may already be gone; closing is best effort.
        let _ = match self {
            Stream::Tcp(stream) => stream.shutdown(Shutdown::Both),
            #[cfg(unix)]
            Stream::Unix(stream) => stream.shutdown(Shutdown::Both),
        };
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            Stream::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            Stream::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            Stream::Unix(stream) => stream.flush(),
        }
    }
}

/// Connects to `addr`, giving up after `timeout`.
pub fn dial(addr: &ServerAddr, timeout: Duration) -> ClientResult<Stream> {
    let target = addr.clone();
    dial_with(addr, timeout, move || Stream::connect(&target))
}

/// Runs `connect` on its own thread and waits at most `timeout` for it.
///
/// When the wait times out the thread keeps going; a socket it opens later
/// is shut down instead of being handed to anyone.
pub fn dial_with<F>(addr: &ServerAddr, timeout: Duration, connect: F) -> ClientResult<Stream>
where
    F: FnOnce() -> io::Result<Stream> + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);
    let target = addr.to_string();
    thread::Builder::new()
        .name("skv-dial".to_string())
        .spawn(move || {
            if let Err(mpsc::SendError(Ok(stream))) = tx.send(connect()) {
                debug!(addr = %target, "closing connection that completed after connect timeout");
                stream.shutdown();
            }
        })?;

    match rx.recv_timeout(timeout) {
        Ok(result) => Ok(result?),
        Err(RecvTimeoutError::Timeout) => Err(ClientError::ConnectTimeout {
            addr: addr.to_string(),
        }),
        Err(RecvTimeoutError::Disconnected) => Err(ClientError::Io(io::Error::new(
            io::ErrorKind::Other,
            "dial thread exited without a result",
        ))),
    }
}

/// Single connection with reusable buffers.
///
/// The buffers are stored on the connection to avoid per-call allocations.
pub struct Connection {
    // Buffered reader reduces syscalls while still allowing direct writes.
    reader: BufReader<Stream>,
    line_buf: Vec<u8>,
    write_buf: BytesMut,
    server: Arc<ServerInfo>,
}

impl Connection {
    fn new(stream: Stream, server: Arc<ServerInfo>) -> Self {
        Connection {
            reader: BufReader::new(stream),
            line_buf: Vec::with_capacity(128),
            write_buf: BytesMut::with_capacity(256),
            server,
        }
    }

    fn set_timeout(&self, timeout: Duration) -> ClientResult<()> {
        self.reader.get_ref().set_timeout(timeout)?;
        Ok(())
    }

    fn exec(&mut self, encoding: Encoding, args: &[&[u8]]) -> ClientResult<RespValue> {
        self.write_buf.clear();
        encode(encoding, args, &mut self.write_buf);

        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buf)?;
        stream.flush()?;

        read_response(&mut self.reader, &mut self.line_buf)
    }

    fn close(self) {
        self.reader.get_ref().shutdown();
    }
}

struct PoolInner {
    free: Mutex<HashMap<String, Vec<Connection>>>,
}

/// Per-address connection pool handle.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl Default for ConnectionPool {
    fn default() -> Self {
        ConnectionPool::new()
    }
}

impl ConnectionPool {
    pub fn new() -> Self {
        ConnectionPool {
            inner: Arc::new(PoolInner {
                free: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Borrows a ready connection for `server`.
    ///
    /// Idle connections are reused newest first. Otherwise a new one is dialed
    /// and authenticated. Either way the socket timeout is set to `timeout`
    /// right before it is handed out.
    pub fn borrow(
        &self,
        server: &Arc<ServerInfo>,
        timeout: Duration,
        connect_timeout: Duration,
    ) -> ClientResult<PooledConnection> {
        let key = server.pool_key();
        if let Some(conn) = self.pop_idle(&key) {
            if let Err(err) = conn.set_timeout(timeout) {
                conn.close();
                return Err(err);
            }
            return Ok(PooledConnection::new(self.inner.clone(), conn));
        }

        let conn = Self::open(server, timeout, connect_timeout)?;
        debug!(addr = %key, "opened new connection");
        Ok(PooledConnection::new(self.inner.clone(), conn))
    }

    /// Number of idle connections held under a free-list key.
    ///
    /// See [`ServerInfo::pool_key`]: the plain address, or `"<addr> db=<N>"`.
    pub fn idle_count(&self, key: &str) -> usize {
        self.lock().get(key).map_or(0, Vec::len)
    }

    /// Closes every idle connection.
    pub fn clear(&self) {
        let drained: Vec<Connection> = self.lock().drain().flat_map(|(_, conns)| conns).collect();
        for conn in drained {
            conn.close();
        }
    }

    fn open(
        server: &Arc<ServerInfo>,
        timeout: Duration,
        connect_timeout: Duration,
    ) -> ClientResult<Connection> {
        let stream = dial(server.addr(), connect_timeout)?;
        let mut conn = Connection::new(stream, Arc::clone(server));
        conn.set_timeout(timeout)?;

        // Dropping `conn` on any failure below closes the fresh socket.
        if let Some(password) = server.password() {
            conn.exec(Encoding::Unified, &[b"AUTH", password.as_bytes()])?
                .into_result()?;
        }
        if let Some(db) = server.db() {
            conn.exec(Encoding::Inline, &[b"SELECT", db.as_bytes()])?
                .into_result()?;
        }
        Ok(conn)
    }

    fn pop_idle(&self, key: &str) -> Option<Connection> {
        self.lock().get_mut(key).and_then(Vec::pop)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Connection>>> {
        self.inner.free.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PoolInner {
    fn release(&self, conn: Connection) {
        let key = conn.server.pool_key();
        let excess = {
            let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
            let list = free.entry(key.clone()).or_default();
            if list.len() >= MAX_IDLE_CONNS_PER_ADDR {
                Some(conn)
            } else {
                list.push(conn);
                None
            }
        };
        if let Some(conn) = excess {
            debug!(addr = %key, "idle list full, closing connection");
            conn.close();
        }
    }

    fn evict(&self, conn: Connection) {
        debug!(addr = %conn.server.key(), "evicting connection");
        conn.close();
    }
}

/// RAII wrapper returning a connection to the pool on drop.
///
/// The connection goes back to the free list only if the last call succeeded
/// or failed with a resumable error. A panic mid-call leaves it marked
/// unhealthy, so unwinding closes it.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    conn: Option<Connection>,
    healthy: bool,
}

impl PooledConnection {
    fn new(pool: Arc<PoolInner>, conn: Connection) -> Self {
        PooledConnection {
            pool,
            conn: Some(conn),
            healthy: true,
        }
    }

    /// Sends one command and reads its reply.
    ///
    /// A top-level error reply is returned as `ClientError::Server`.
    pub fn exec(&mut self, encoding: Encoding, args: &[&[u8]]) -> ClientResult<RespValue> {
        let conn = self.conn.as_mut().ok_or(ClientError::ConnectionClosed)?;
        self.healthy = false;
        let response = conn.exec(encoding, args).and_then(RespValue::into_result);
        self.healthy = match &response {
            Ok(_) => true,
            Err(err) => err.is_resumable(),
        };
        match &response {
            Err(err @ ClientError::Protocol(_)) => {
                warn!(addr = %conn.server.key(), error = %err, "reply stream out of sync");
            }
            Err(err) if err.is_timeout() => {
                debug!(addr = %conn.server.key(), "call timed out, connection will be closed");
            }
            _ => {}
        }
        response
    }

    /// Whether the connection will be pooled again on drop.
    pub fn is_healthy(&self) -> bool {
        self.healthy
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => return,
        };

        if self.healthy && !thread::panicking() {
            self.pool.release(conn);
        } else {
            self.pool.evict(conn);
        }
    }
}
