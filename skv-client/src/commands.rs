//! # Commands
//!
//! Thin typed wrappers over the dispatcher. Key-addressed commands use the
//! unified encoding and go to the key's backend; server-wide commands go to
//! the first backend and are not shard-aware.
//!
//! Blocking commands take whole seconds, as the server does, and extend the
//! socket timeout for that call only. Fractions round up, since zero asks the
//! server to block forever.

use std::time::Duration;

use crate::client::Client;
use crate::error::{ClientError, ClientResult};
use crate::resp::{Encoding, RespValue};

/// TTL state returned by the server, mirroring Redis semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientTtl {
    /// Key is missing or already expired.
    Missing,
    /// Key exists without expiration.
    NoExpiry,
    /// Key expires after the provided duration.
    ExpiresIn(Duration),
}

impl Client {
    /// Pings the first backend.
    pub fn ping(&self) -> ClientResult<String> {
        self.execute_on_first(Encoding::Inline, &[b"PING"])?.into_string()
    }

    /// Echoes `message` back from the first backend.
    pub fn echo(&self, message: &[u8]) -> ClientResult<Vec<u8>> {
        let reply = self.execute_on_first(Encoding::Unified, &[b"ECHO", message])?;
        Ok(reply.into_bytes()?.unwrap_or_default())
    }

    /// Raw INFO text of the first backend.
    pub fn info(&self) -> ClientResult<String> {
        self.execute_on_first(Encoding::Inline, &[b"INFO"])?.into_string()
    }

    /// Key count of the first backend only.
    pub fn dbsize(&self) -> ClientResult<i64> {
        self.execute_on_first(Encoding::Inline, &[b"DBSIZE"])?.into_integer()
    }

    /// Flushes the selected database of the first backend only.
    pub fn flushdb(&self) -> ClientResult<()> {
        self.execute_on_first(Encoding::Inline, &[b"FLUSHDB"])?.into_status()
    }

    /// Flushes every database of the first backend only.
    pub fn flushall(&self) -> ClientResult<()> {
        self.execute_on_first(Encoding::Inline, &[b"FLUSHALL"])?.into_status()
    }

    /// Fetches a value by key.
    ///
    /// Returns `Ok(None)` when the key is missing.
    pub fn get(&self, key: &[u8]) -> ClientResult<Option<Vec<u8>>> {
        self.execute_with_key("GET", key, &[])?.into_bytes()
    }

    /// Sets a value for a key without expiration.
    pub fn set(&self, key: &[u8], value: &[u8]) -> ClientResult<()> {
        self.execute_with_key("SET", key, &[value])?.into_status()
    }

    /// Sets a value and returns the previous one.
    pub fn getset(&self, key: &[u8], value: &[u8]) -> ClientResult<Option<Vec<u8>>> {
        self.execute_with_key("GETSET", key, &[value])?.into_bytes()
    }

    /// Appends to a string value. Returns the new length.
    pub fn append(&self, key: &[u8], value: &[u8]) -> ClientResult<i64> {
        self.execute_with_key("APPEND", key, &[value])?.into_integer()
    }

    pub fn exists(&self, key: &[u8]) -> ClientResult<bool> {
        self.execute_with_key("EXISTS", key, &[])?.into_bool()
    }

    /// Deletes keys and returns how many were removed.
    ///
    /// With more than one backend this sends one DEL per key, so the delete is
    /// no longer atomic and stops at the first failing key.
    pub fn del(&self, keys: &[&[u8]]) -> ClientResult<i64> {
        let (first, rest) = match keys.split_first() {
            Some(split) => split,
            None => return Ok(0),
        };
        if !self.selector().is_sharding() {
            return self.execute_with_key("DEL", first, rest)?.into_integer();
        }
        let mut deleted = 0;
        for key in keys {
            deleted += self.execute_with_key("DEL", key, &[])?.into_integer()?;
        }
        Ok(deleted)
    }

    /// Sets a time-to-live on a key. Returns true when the TTL was set.
    pub fn expire(&self, key: &[u8], ttl: Duration) -> ClientResult<bool> {
        let seconds = ttl.as_secs().to_string();
        self.execute_with_key("EXPIRE", key, &[seconds.as_bytes()])?.into_bool()
    }

    /// Returns TTL status for a key.
    pub fn ttl(&self, key: &[u8]) -> ClientResult<ClientTtl> {
        match self.execute_with_key("TTL", key, &[])?.into_integer()? {
            -2 => Ok(ClientTtl::Missing),
            -1 => Ok(ClientTtl::NoExpiry),
            value if value >= 0 => Ok(ClientTtl::ExpiresIn(Duration::from_secs(value as u64))),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub fn incr(&self, key: &[u8]) -> ClientResult<i64> {
        self.execute_with_key("INCR", key, &[])?.into_integer()
    }

    pub fn incrby(&self, key: &[u8], increment: i64) -> ClientResult<i64> {
        let increment = increment.to_string();
        self.execute_with_key("INCRBY", key, &[increment.as_bytes()])?.into_integer()
    }

    pub fn decr(&self, key: &[u8]) -> ClientResult<i64> {
        self.execute_with_key("DECR", key, &[])?.into_integer()
    }

    pub fn decrby(&self, key: &[u8], decrement: i64) -> ClientResult<i64> {
        let decrement = decrement.to_string();
        self.execute_with_key("DECRBY", key, &[decrement.as_bytes()])?.into_integer()
    }

    /// Prepends values to a list. Returns the new length.
    pub fn lpush(&self, key: &[u8], values: &[&[u8]]) -> ClientResult<i64> {
        self.execute_with_key("LPUSH", key, values)?.into_integer()
    }

    /// Appends values to a list. Returns the new length.
    pub fn rpush(&self, key: &[u8], values: &[&[u8]]) -> ClientResult<i64> {
        self.execute_with_key("RPUSH", key, values)?.into_integer()
    }

    pub fn lindex(&self, key: &[u8], index: i64) -> ClientResult<Option<Vec<u8>>> {
        let index = index.to_string();
        self.execute_with_key("LINDEX", key, &[index.as_bytes()])?.into_bytes()
    }

    /// Fetches several keys; missing keys come back as `None`.
    ///
    /// With more than one backend this issues one MGET per key.
    pub fn mget(&self, keys: &[&[u8]]) -> ClientResult<Vec<Option<Vec<u8>>>> {
        let (first, rest) = match keys.split_first() {
            Some(split) => split,
            None => return Ok(Vec::new()),
        };
        let reply = if self.selector().is_sharding() {
            self.execute_with_keys("MGET", keys)?
        } else {
            self.execute_with_key("MGET", first, rest)?
        };
        reply.into_array()?.into_iter().map(RespValue::into_bytes).collect()
    }

    /// Pops from the head of the first non-empty list.
    ///
    /// All keys are sent to the backend owning the first key. Returns `None`
    /// when the server-side timeout expires.
    pub fn blpop(&self, keys: &[&[u8]], timeout: Duration) -> ClientResult<Option<(Vec<u8>, Vec<u8>)>> {
        self.blocking_pop("BLPOP", keys, timeout)
    }

    /// Pops from the tail of the first non-empty list. See [`Client::blpop`].
    pub fn brpop(&self, keys: &[&[u8]], timeout: Duration) -> ClientResult<Option<(Vec<u8>, Vec<u8>)>> {
        self.blocking_pop("BRPOP", keys, timeout)
    }

    /// Moves the tail of `src` to the head of `dst`, waiting up to `timeout`.
    ///
    /// Both keys must live on the backend owning `src`.
    pub fn brpoplpush(&self, src: &[u8], dst: &[u8], timeout: Duration) -> ClientResult<Option<Vec<u8>>> {
        let seconds = blocking_seconds(timeout);
        let reply = self.execute_with_key_timeout(
            "BRPOPLPUSH",
            src,
            &[dst, seconds.as_bytes()],
            self.timeout() + timeout,
        )?;
        match reply {
            RespValue::Array(None) => Ok(None),
            other => other.into_bytes(),
        }
    }

    fn blocking_pop(
        &self,
        cmd: &str,
        keys: &[&[u8]],
        timeout: Duration,
    ) -> ClientResult<Option<(Vec<u8>, Vec<u8>)>> {
        let (first, rest) = keys
            .split_first()
            .ok_or_else(|| ClientError::InvalidArgument(format!("{} needs at least one key", cmd)))?;
        let seconds = blocking_seconds(timeout);
        let mut args: Vec<&[u8]> = rest.to_vec();
        args.push(seconds.as_bytes());

        let reply = self.execute_with_key_timeout(cmd, first, &args, self.timeout() + timeout)?;
        let mut items = match reply {
            RespValue::Array(None) => return Ok(None),
            other => other.into_array()?.into_iter(),
        };
        match (items.next(), items.next(), items.next()) {
            (Some(key), Some(value), None) => {
                let key = key.into_bytes()?.ok_or(ClientError::UnexpectedResponse)?;
                let value = value.into_bytes()?.ok_or(ClientError::UnexpectedResponse)?;
                Ok(Some((key, value)))
            }
            _ => Err(ClientError::UnexpectedResponse),
        }
    }
}

/// Whole seconds for a blocking command, rounding any fraction up.
fn blocking_seconds(timeout: Duration) -> String {
    let mut seconds = timeout.as_secs();
    if timeout.subsec_nanos() > 0 {
        seconds += 1;
    }
    seconds.to_string()
}
