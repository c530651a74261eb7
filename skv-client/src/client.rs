//! # Synchronous Client API
//!
//! Purpose: Route commands to the right backend, borrow a pooled connection
//! for it and hand back the parsed reply.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `Client` hides selection, pooling and protocol details.
//! 2. **Single Choke Point**: Every command goes through `execute_with_addr`.
//! 3. **Explicit Timeouts**: Blocking commands pass their own deadline per call
//!    instead of touching shared client state.
//! 4. **No Retries**: Each call makes one attempt; the caller owns retry policy.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::ClientResult;
use crate::pool::ConnectionPool;
use crate::resp::{Encoding, RespValue};
use crate::selector::{HashRingSelector, ModuloSelector, ServerSelector};
use crate::server::ServerInfo;

/// Default socket read/write timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);

/// Key distribution strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorKind {
    /// CRC-32 of the key modulo the number of servers.
    #[default]
    Modulo,
    /// Consistent hashing on server addresses.
    HashRing,
}

impl SelectorKind {
    fn build(self) -> Box<dyn ServerSelector> {
        match self {
            SelectorKind::Modulo => Box::new(ModuloSelector::new()),
            SelectorKind::HashRing => Box::new(HashRingSelector::new()),
        }
    }
}

/// Configuration for the client and its pool.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server addresses with options, e.g. "127.0.0.1:6379 db=1 passwd=secret".
    pub servers: Vec<String>,
    /// How keys are spread across `servers`.
    pub selector: SelectorKind,
    /// Socket read/write timeout applied to every call.
    #[serde(rename = "timeout_ms", deserialize_with = "millis")]
    pub timeout: Duration,
    /// Dial timeout. Falls back to `timeout` when unset.
    #[serde(rename = "connect_timeout_ms", deserialize_with = "optional_millis")]
    pub connect_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            servers: Vec::new(),
            selector: SelectorKind::Modulo,
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: None,
        }
    }
}

fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
}

fn optional_millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
    Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
}

/// Sharding-aware client with per-address connection pooling.
///
/// Safe to share between threads. Each call borrows its own connection, so
/// two concurrent calls for the same key are not ordered relative to each
/// other.
pub struct Client {
    selector: Box<dyn ServerSelector>,
    pool: ConnectionPool,
    timeout: Duration,
    connect_timeout: Option<Duration>,
}

impl Client {
    /// Creates a client over `servers` using modulo selection.
    pub fn new<I, S>(servers: I) -> ClientResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::with_selector(ModuloSelector::new(), servers)
    }

    /// Creates a client registering `servers` with the given selector.
    pub fn with_selector<Sel, I, S>(selector: Sel, servers: I) -> ClientResult<Self>
    where
        Sel: ServerSelector + 'static,
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::build(Box::new(selector), servers, DEFAULT_TIMEOUT, None)
    }

    /// Creates a client from a full configuration.
    pub fn with_config(config: ClientConfig) -> ClientResult<Self> {
        Self::build(
            config.selector.build(),
            &config.servers,
            config.timeout,
            config.connect_timeout,
        )
    }

    fn build<I, S>(
        selector: Box<dyn ServerSelector>,
        servers: I,
        timeout: Duration,
        connect_timeout: Option<Duration>,
    ) -> ClientResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        // Parse everything first so a bad address leaves the selector untouched.
        let parsed = servers
            .into_iter()
            .map(|entry| entry.as_ref().parse::<ServerInfo>())
            .collect::<ClientResult<Vec<_>>>()?;
        for server in parsed {
            selector.add(server);
        }
        Ok(Client {
            selector,
            pool: ConnectionPool::new(),
            timeout,
            connect_timeout,
        })
    }

    /// Replaces the socket read/write timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replaces the dial timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn selector(&self) -> &dyn ServerSelector {
        self.selector.as_ref()
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Idle pooled connections for a backend, keyed as in
    /// [`ServerInfo::pool_key`].
    pub fn idle_connections(&self, key: &str) -> usize {
        self.pool.idle_count(key)
    }

    /// Closes all idle pooled connections.
    pub fn close_idle(&self) {
        self.pool.clear();
    }

    /// Runs `cmd key args...` on the backend owning `key`.
    pub fn execute_with_key(&self, cmd: &str, key: &[u8], args: &[&[u8]]) -> ClientResult<RespValue> {
        self.execute_with_key_timeout(cmd, key, args, self.timeout)
    }

    pub(crate) fn execute_with_key_timeout(
        &self,
        cmd: &str,
        key: &[u8],
        args: &[&[u8]],
        timeout: Duration,
    ) -> ClientResult<RespValue> {
        let server = self.selector.get(key)?;
        let mut full: Vec<&[u8]> = Vec::with_capacity(args.len() + 2);
        full.push(cmd.as_bytes());
        full.push(key);
        full.extend_from_slice(args);
        self.execute_with_addr(&server, Encoding::Unified, &full, timeout)
    }

    /// Runs `cmd key` once per key and concatenates the array replies.
    ///
    /// Keys may live on different backends, so this is a sequence of
    /// independent calls: it is not atomic, and an error on one key stops the
    /// loop after earlier keys were already processed. Only use it for
    /// commands whose multi-key form decomposes per key. Non-array replies
    /// contribute nothing.
    pub fn execute_with_keys(&self, cmd: &str, keys: &[&[u8]]) -> ClientResult<RespValue> {
        let mut items = Vec::new();
        for key in keys {
            if let RespValue::Array(Some(values)) = self.execute_with_key(cmd, key, &[])? {
                items.extend(values);
            }
        }
        Ok(RespValue::Array(if items.is_empty() { None } else { Some(items) }))
    }

    /// Runs a command without a key on the first registered backend.
    pub fn execute_on_first(&self, encoding: Encoding, args: &[&[u8]]) -> ClientResult<RespValue> {
        let server = self.selector.get_first()?;
        self.execute_with_addr(&server, encoding, args, self.timeout)
    }

    /// Runs a command on a specific backend.
    ///
    /// The borrowed connection goes back to the pool when the call succeeds
    /// or the server answers with an error reply, and is closed otherwise.
    pub fn execute_with_addr(
        &self,
        server: &Arc<ServerInfo>,
        encoding: Encoding,
        args: &[&[u8]],
        timeout: Duration,
    ) -> ClientResult<RespValue> {
        let connect_timeout = self.connect_timeout.unwrap_or(self.timeout);
        let mut conn = self.pool.borrow(server, timeout, connect_timeout)?;
        conn.exec(encoding, args)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.pool.clear();
    }
}
