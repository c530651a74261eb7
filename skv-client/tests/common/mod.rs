#![allow(dead_code)]

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// What the fake server does with one command.
pub enum Action {
    /// Write these raw bytes back.
    Reply(Vec<u8>),
    /// Write the bytes after a delay.
    Delayed(Duration, Vec<u8>),
    /// Never answer; wait for the client to hang up.
    Stall,
    /// Drop the connection without answering.
    Close,
}

pub type Handler = fn(&[Vec<u8>]) -> Action;

/// One command as received, tagged with the connection it came in on.
#[derive(Debug, Clone)]
pub struct Received {
    pub conn: usize,
    pub args: Vec<Vec<u8>>,
}

/// Minimal RESP server running on background threads.
pub struct FakeServer {
    pub addr: String,
    accepted: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
    log: Arc<Mutex<Vec<Received>>>,
}

impl FakeServer {
    pub fn spawn(handler: Handler) -> FakeServer {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();
        let accepted = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));
        let log = Arc::new(Mutex::new(Vec::new()));

        let (acc, cls, lg) = (accepted.clone(), closed.clone(), log.clone());
        thread::spawn(move || {
            for stream in listener.incoming() {
                let stream = match stream {
                    Ok(stream) => stream,
                    Err(_) => break,
                };
                let conn = acc.fetch_add(1, Ordering::SeqCst);
                let (cls, lg) = (cls.clone(), lg.clone());
                thread::spawn(move || serve(conn, stream, handler, lg, cls));
            }
        });

        FakeServer {
            addr,
            accepted,
            closed,
            log,
        }
    }

    /// Connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Connections the client has closed so far.
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<Received> {
        self.log.lock().expect("log").clone()
    }

    /// Command names and arguments as UTF-8, in arrival order.
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.received()
            .into_iter()
            .map(|r| r.args.iter().map(|a| String::from_utf8_lossy(a).into_owned()).collect())
            .collect()
    }

    /// Waits until `closed() >= n`, giving up after two seconds.
    pub fn wait_closed(&self, n: usize) -> bool {
        wait_for(|| self.closed() >= n)
    }

    /// Waits until `accepted() >= n`; the kernel completes handshakes before
    /// the accept loop sees them.
    pub fn wait_accepted(&self, n: usize) -> bool {
        wait_for(|| self.accepted() >= n)
    }
}

fn wait_for(done: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

fn serve(
    conn: usize,
    mut stream: TcpStream,
    handler: Handler,
    log: Arc<Mutex<Vec<Received>>>,
    closed: Arc<AtomicUsize>,
) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let mut reader = BufReader::new(stream.try_clone().expect("clone"));
    loop {
        let args = match read_command(&mut reader) {
            Ok(Some(args)) => args,
            _ => break,
        };
        log.lock().expect("log").push(Received {
            conn,
            args: args.clone(),
        });
        match handler(&args) {
            Action::Reply(bytes) => {
                let _ = stream.write_all(&bytes);
                let _ = stream.flush();
            }
            Action::Delayed(delay, bytes) => {
                thread::sleep(delay);
                let _ = stream.write_all(&bytes);
                let _ = stream.flush();
            }
            Action::Stall => {
                let mut sink = Vec::new();
                let _ = reader.read_to_end(&mut sink);
                break;
            }
            Action::Close => return,
        }
    }
    closed.fetch_add(1, Ordering::SeqCst);
}

/// Reads one unified or inline command. `Ok(None)` on clean EOF.
fn read_command(reader: &mut BufReader<TcpStream>) -> std::io::Result<Option<Vec<Vec<u8>>>> {
    let mut line = Vec::new();
    if !read_line(reader, &mut line)? {
        return Ok(None);
    }
    if line.first() != Some(&b'*') {
        let args = line
            .split(|b| *b == b' ')
            .filter(|part| !part.is_empty())
            .map(|part| part.to_vec())
            .collect();
        return Ok(Some(args));
    }

    let count = parse_usize(&line[1..])?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        if !read_line(reader, &mut line)? || line.first() != Some(&b'$') {
            return Err(invalid("expected bulk"));
        }
        let len = parse_usize(&line[1..])?;
        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf)?;
        if crlf != [b'\r', b'\n'] {
            return Err(invalid("missing crlf"));
        }
        args.push(data);
    }
    Ok(Some(args))
}

fn read_line(reader: &mut BufReader<TcpStream>, buf: &mut Vec<u8>) -> std::io::Result<bool> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Ok(false);
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(invalid("invalid line"));
    }
    buf.truncate(buf.len() - 2);
    Ok(true)
}

fn parse_usize(data: &[u8]) -> std::io::Result<usize> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| invalid("digit"))
}

fn invalid(msg: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg.to_string())
}

pub fn simple(msg: &str) -> Action {
    Action::Reply(format!("+{}\r\n", msg).into_bytes())
}

pub fn error(msg: &str) -> Action {
    Action::Reply(format!("-{}\r\n", msg).into_bytes())
}

pub fn integer(value: i64) -> Action {
    Action::Reply(format!(":{}\r\n", value).into_bytes())
}

pub fn bulk(data: &[u8]) -> Action {
    Action::Reply(bulk_bytes(data))
}

pub fn null_bulk() -> Action {
    Action::Reply(b"$-1\r\n".to_vec())
}

pub fn bulk_bytes(data: &[u8]) -> Vec<u8> {
    let mut out = format!("${}\r\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    out
}

pub fn array_of_bulks(items: &[&[u8]]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", items.len()).into_bytes();
    for item in items {
        out.extend_from_slice(&bulk_bytes(item));
    }
    out
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
