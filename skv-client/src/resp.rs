//! # RESP Encoding and Parsing
//!
//! Purpose: Encode client commands in the inline or unified request format and
//! parse server replies, including nested multi-bulk replies.
//!
//! ## Design Principles
//! 1. **State-Free Parsing**: Replies are parsed top-down by recursion.
//! 2. **Buffer Reuse**: Caller provides buffers to avoid per-call allocations.
//! 3. **Binary-Safe**: Bulk strings are treated as raw bytes.
//! 4. **Fail Fast**: Invalid framing returns protocol errors immediately; the
//!    stream is never resynchronized.

use std::io::{BufRead, Read};

use bytes::{BufMut, BytesMut};

use crate::error::{ClientError, ClientResult};

/// Upper bound on pre-allocated array slots for a single reply.
const MAX_PREALLOC_ITEMS: usize = 1024;

/// Largest bulk string accepted, matching the server's `proto-max-bulk-len`.
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Deepest array nesting accepted in one reply.
const MAX_NESTING_DEPTH: usize = 32;

/// Initial buffer for a bulk payload; larger payloads grow as bytes arrive.
const BULK_READ_CHUNK: usize = 64 * 1024;

/// Request wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Space-joined arguments on one line. No escaping: arguments must not
    /// contain spaces or line breaks.
    Inline,
    /// Length-prefixed arguments (`*<n>` / `$<len>`). Binary-safe.
    Unified,
}

/// RESP reply value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// +OK or +PONG style replies.
    Status(String),
    /// -ERR ... replies.
    Error(String),
    /// :123 replies.
    Integer(i64),
    /// $... bulk strings, with None for null.
    Bulk(Option<Vec<u8>>),
    /// *... multi-bulk replies, with None for null or empty.
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    /// Turns a top-level error reply into `ClientError::Server`.
    pub fn into_result(self) -> ClientResult<RespValue> {
        match self {
            RespValue::Error(message) => Err(ClientError::Server(message)),
            value => Ok(value),
        }
    }

    pub fn into_integer(self) -> ClientResult<i64> {
        match self {
            RespValue::Integer(value) => Ok(value),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Integer replies of 1 or more are true.
    pub fn into_bool(self) -> ClientResult<bool> {
        self.into_integer().map(|value| value > 0)
    }

    /// Bulk or status payload. `None` means the server sent a null bulk.
    pub fn into_bytes(self) -> ClientResult<Option<Vec<u8>>> {
        match self {
            RespValue::Bulk(data) => Ok(data),
            RespValue::Status(text) => Ok(Some(text.into_bytes())),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Status or non-null UTF-8 bulk payload.
    pub fn into_string(self) -> ClientResult<String> {
        match self {
            RespValue::Status(text) => Ok(text),
            RespValue::Bulk(Some(data)) => {
                String::from_utf8(data).map_err(|_| ClientError::UnexpectedResponse)
            }
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Multi-bulk items; a null array yields an empty vector.
    pub fn into_array(self) -> ClientResult<Vec<RespValue>> {
        match self {
            RespValue::Array(items) => Ok(items.unwrap_or_default()),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Accepts any status reply, e.g. `+OK`.
    pub fn into_status(self) -> ClientResult<()> {
        match self {
            RespValue::Status(_) => Ok(()),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }
}

/// Encodes a command into the provided buffer.
pub fn encode(encoding: Encoding, args: &[&[u8]], out: &mut BytesMut) {
    match encoding {
        Encoding::Inline => encode_inline(args, out),
        Encoding::Unified => encode_command(args, out),
    }
}

/// Encodes a unified (RESP2 array) command into the provided buffer.
pub fn encode_command(args: &[&[u8]], out: &mut BytesMut) {
    out.put_u8(b'*');
    push_usize(out, args.len());
    out.put_slice(b"\r\n");
    for arg in args {
        out.put_u8(b'$');
        push_usize(out, arg.len());
        out.put_slice(b"\r\n");
        out.put_slice(arg);
        out.put_slice(b"\r\n");
    }
}

/// Encodes an inline command into the provided buffer.
pub fn encode_inline(args: &[&[u8]], out: &mut BytesMut) {
    for (idx, arg) in args.iter().enumerate() {
        if idx > 0 {
            out.put_u8(b' ');
        }
        out.put_slice(arg);
    }
    out.put_slice(b"\r\n");
}

/// Reads one RESP value from the buffered reader.
pub fn read_response<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>) -> ClientResult<RespValue> {
    read_value(reader, line_buf, 0)
}

fn read_value<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>, depth: usize) -> ClientResult<RespValue> {
    read_line(reader, line_buf)?;
    let (&prefix, rest) = line_buf
        .split_first()
        .ok_or_else(|| ClientError::Protocol("empty reply line".to_string()))?;

    match prefix {
        b'+' => Ok(RespValue::Status(String::from_utf8_lossy(rest).into_owned())),
        b'-' => Ok(RespValue::Error(String::from_utf8_lossy(rest).into_owned())),
        b':' => Ok(RespValue::Integer(parse_i64(rest)?)),
        b'$' => {
            let len = parse_i64(rest)?;
            parse_bulk_len(reader, len, line_buf)
        }
        b'*' => {
            let len = parse_i64(rest)?;
            parse_array_len(reader, len, line_buf, depth)
        }
        other => Err(ClientError::Protocol(format!(
            "unexpected reply prefix {:?} in line {:?}",
            other as char,
            String::from_utf8_lossy(line_buf)
        ))),
    }
}

fn parse_bulk_len<R: BufRead>(
    reader: &mut R,
    len: i64,
    line_buf: &mut Vec<u8>,
) -> ClientResult<RespValue> {
    if len == -1 {
        return Ok(RespValue::Bulk(None));
    }
    let len = match usize::try_from(len) {
        Ok(len) if len <= MAX_BULK_LEN => len,
        _ => return Err(ClientError::Protocol(format!("invalid bulk length {}", len))),
    };
    let mut data = Vec::with_capacity(len.min(BULK_READ_CHUNK));
    let read = reader.by_ref().take(len as u64).read_to_end(&mut data)?;
    if read < len {
        return Err(ClientError::ConnectionClosed);
    }

    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf)?;
    if crlf != [b'\r', b'\n'] {
        return Err(ClientError::Protocol("bulk string missing CRLF".to_string()));
    }

    line_buf.clear();
    Ok(RespValue::Bulk(Some(data)))
}

fn parse_array_len<R: BufRead>(
    reader: &mut R,
    len: i64,
    line_buf: &mut Vec<u8>,
    depth: usize,
) -> ClientResult<RespValue> {
    if len < 1 {
        return Ok(RespValue::Array(None));
    }
    if depth >= MAX_NESTING_DEPTH {
        return Err(ClientError::Protocol(format!(
            "array nesting deeper than {}",
            MAX_NESTING_DEPTH
        )));
    }

    let len = len as usize;
    let mut items = Vec::with_capacity(len.min(MAX_PREALLOC_ITEMS));
    for _ in 0..len {
        items.push(read_value(reader, line_buf, depth + 1)?);
    }
    Ok(RespValue::Array(Some(items)))
}

fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> ClientResult<()> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Err(ClientError::ConnectionClosed);
    }
    // A line cut short before CRLF means the deadline hit mid-reply.
    if !buf.ends_with(b"\r\n") {
        return Err(ClientError::Timeout);
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_i64(data: &[u8]) -> ClientResult<i64> {
    let invalid = || ClientError::Protocol(format!("invalid integer {:?}", String::from_utf8_lossy(data)));
    let (negative, digits) = match data.split_first() {
        Some((b'-', digits)) => (true, digits),
        _ => (false, data),
    };
    if digits.is_empty() {
        return Err(invalid());
    }

    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(invalid());
        }
        let digit = (b - b'0') as i64;
        value = value
            .checked_mul(10)
            .and_then(|v| if negative { v.checked_sub(digit) } else { v.checked_add(digit) })
            .ok_or_else(invalid)?;
    }
    Ok(value)
}

fn push_usize(out: &mut BytesMut, mut value: usize) {
    // Write digits into a small stack buffer to avoid heap allocations.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        len = 1;
    } else {
        while value > 0 {
            buf[len] = b'0' + (value % 10) as u8;
            value /= 10;
            len += 1;
        }
    }
    buf[..len].reverse();
    out.put_slice(&buf[..len]);
}
