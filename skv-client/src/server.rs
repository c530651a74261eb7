//! # Server Descriptors
//!
//! Purpose: Parse and hold the address, database index and password of one
//! backend.
//!
//! Address syntax: `<host:port | /socket/path> [db=<N>] [passwd=<secret>]`.

use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{ClientError, ClientResult};

/// Network endpoint of a backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ServerAddr {
    /// TCP endpoint, resolved at parse time.
    Tcp(SocketAddr),
    /// Local stream socket path.
    Unix(PathBuf),
}

impl fmt::Display for ServerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerAddr::Tcp(addr) => write!(f, "{}", addr),
            ServerAddr::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Immutable description of one backend.
#[derive(Clone, PartialEq, Eq)]
pub struct ServerInfo {
    addr: ServerAddr,
    db: Option<String>,
    password: Option<String>,
}

impl ServerInfo {
    /// Creates a descriptor without database selection or authentication.
    pub fn new(addr: ServerAddr) -> Self {
        ServerInfo {
            addr,
            db: None,
            password: None,
        }
    }

    /// Selects a database index after connecting.
    pub fn with_db(mut self, db: impl Into<String>) -> Self {
        self.db = Some(db.into());
        self
    }

    /// Authenticates with a password after connecting.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn addr(&self) -> &ServerAddr {
        &self.addr
    }

    pub fn db(&self) -> Option<&str> {
        self.db.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Address string used to place this server on the hash ring.
    pub fn key(&self) -> String {
        self.addr.to_string()
    }

    /// Free-list key: the address plus the selected db, if any.
    ///
    /// Connections have already run SELECT, so two entries for the same
    /// address with different dbs must not share idle connections.
    pub fn pool_key(&self) -> String {
        match &self.db {
            Some(db) => format!("{} db={}", self.addr, db),
            None => self.addr.to_string(),
        }
    }
}

// Keeps the password out of logs.
impl fmt::Debug for ServerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerInfo")
            .field("addr", &self.addr)
            .field("db", &self.db)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

impl FromStr for ServerInfo {
    type Err = ClientError;

    fn from_str(s: &str) -> ClientResult<Self> {
        let mut items = s.split(' ').filter(|item| !item.is_empty());
        let target = items.next().ok_or_else(|| ClientError::InvalidAddress {
            server: s.to_string(),
            reason: "empty address".to_string(),
        })?;

        let mut info = ServerInfo::new(parse_addr(s, target)?);
        for item in items {
            let (key, value) = item
                .split_once('=')
                .ok_or_else(|| ClientError::UnknownOption(item.to_string()))?;
            match key {
                "db" => info.db = Some(value.to_string()),
                "passwd" => info.password = Some(value.to_string()),
                _ => return Err(ClientError::UnknownOption(item.to_string())),
            }
        }
        Ok(info)
    }
}

fn parse_addr(server: &str, target: &str) -> ClientResult<ServerAddr> {
    if target.contains('/') {
        return Ok(ServerAddr::Unix(PathBuf::from(target)));
    }
    let invalid = |reason: String| ClientError::InvalidAddress {
        server: server.to_string(),
        reason,
    };
    let mut resolved = target.to_socket_addrs().map_err(|err| invalid(err.to_string()))?;
    resolved
        .next()
        .map(ServerAddr::Tcp)
        .ok_or_else(|| invalid("address did not resolve".to_string()))
}
