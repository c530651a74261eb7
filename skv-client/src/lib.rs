//! # ShardKV Sync Client
//!
//! Purpose: Provide a blocking Redis-compatible client that spreads keys over
//! several independent servers and pools connections per server.
//!
//! ## Design Principles
//! 1. **Strategy Pattern**: Key distribution is a pluggable `ServerSelector`
//!    (modulo or consistent hashing), chosen and owned by the caller.
//! 2. **Object Pool Pattern**: Reuse connections per address, at most two idle.
//! 3. **Minimal Allocation**: Reuse buffers for RESP framing and parsing.
//! 4. **Protocol Clarity**: Encode/parse RESP explicitly for correctness.
//!
//! ```no_run
//! use skv_client::{Client, HashRingSelector};
//!
//! # fn main() -> skv_client::ClientResult<()> {
//! let client = Client::with_selector(
//!     HashRingSelector::new(),
//!     ["127.0.0.1:6379", "127.0.0.1:6380 db=2 passwd=secret"],
//! )?;
//! client.set(b"greeting", b"hello")?;
//! assert_eq!(client.get(b"greeting")?, Some(b"hello".to_vec()));
//! # Ok(())
//! # }
//! ```

mod client;
mod commands;
mod error;
mod pool;
mod resp;
mod selector;
mod server;

pub use client::{Client, ClientConfig, SelectorKind, DEFAULT_TIMEOUT};
pub use commands::ClientTtl;
pub use error::{ClientError, ClientResult};
pub use pool::{ConnectionPool, PooledConnection, MAX_IDLE_CONNS_PER_ADDR};
pub use resp::{Encoding, RespValue};
pub use selector::{HashRingSelector, ModuloSelector, ServerSelector, RING_REPLICAS};
pub use server::{ServerAddr, ServerInfo};
