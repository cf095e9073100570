//! Mock RESP server helpers shared by the integration tests.
//!
//! Each test drives the real client against an in-process TCP server whose
//! handler asserts on the exact command arguments and scripts the replies.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use tablekv::{ConnectOptions, NodeConfig};

/// Receives `(command_index, args)` and returns the raw reply bytes.
/// Returning an empty reply closes the connection, which the client sees as
/// a transport failure.
pub type Handler = dyn FnMut(usize, Vec<Vec<u8>>) -> Vec<u8> + Send;

/// Spawns a mock server on an ephemeral port; returns its `host:port`.
///
/// The command index is global across connections, so pooled reconnects and
/// concurrent callers still see one script.
pub async fn spawn<F>(handler: F) -> String
where
    F: FnMut(usize, Vec<Vec<u8>>) -> Vec<u8> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    spawn_on(listener, handler).await
}

/// Like [`spawn`], for a pre-bound listener (lets tests learn addresses
/// before building handlers that reference each other).
pub async fn spawn_on<F>(listener: TcpListener, handler: F) -> String
where
    F: FnMut(usize, Vec<Vec<u8>>) -> Vec<u8> + Send + 'static,
{
    let addr = listener.local_addr().expect("addr").to_string();
    let shared: Arc<Mutex<(Box<Handler>, usize)>> = Arc::new(Mutex::new((Box::new(handler), 0)));

    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => return,
            };
            let shared = shared.clone();
            tokio::spawn(serve(stream, shared));
        }
    });

    addr
}

async fn serve(stream: TcpStream, shared: Arc<Mutex<(Box<Handler>, usize)>>) {
    let mut reader = BufReader::new(stream);
    loop {
        let args = match read_command(&mut reader).await {
            Ok(Some(args)) => args,
            _ => return,
        };
        let reply = {
            let mut guard = shared.lock().expect("handler mutex");
            let (handler, count) = &mut *guard;
            let idx = *count;
            *count += 1;
            handler(idx, args)
        };
        if reply.is_empty() {
            return;
        }
        if reader.get_mut().write_all(&reply).await.is_err() {
            return;
        }
    }
}

async fn read_command(reader: &mut BufReader<TcpStream>) -> std::io::Result<Option<Vec<Vec<u8>>>> {
    let mut line = Vec::new();
    if !read_line(reader, &mut line).await? {
        return Ok(None);
    }
    if line.first() != Some(&b'*') {
        return Err(bad("expected array header"));
    }
    let count = parse_usize(&line[1..])?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        if !read_line(reader, &mut line).await? {
            return Err(bad("eof inside command"));
        }
        if line.first() != Some(&b'$') {
            return Err(bad("expected bulk header"));
        }
        let len = parse_usize(&line[1..])?;
        let mut data = vec![0u8; len];
        reader.read_exact(&mut data).await?;
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf).await?;
        if crlf != [b'\r', b'\n'] {
            return Err(bad("missing crlf"));
        }
        args.push(data);
    }
    Ok(Some(args))
}

async fn read_line(reader: &mut BufReader<TcpStream>, buf: &mut Vec<u8>) -> std::io::Result<bool> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf).await?;
    if bytes == 0 {
        return Ok(false);
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(bad("invalid line"));
    }
    buf.truncate(buf.len() - 2);
    Ok(true)
}

fn parse_usize(data: &[u8]) -> std::io::Result<usize> {
    let text = std::str::from_utf8(data).map_err(|_| bad("non-utf8 length"))?;
    text.parse().map_err(|_| bad("bad length"))
}

fn bad(msg: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg.to_string())
}

// ---- reply builders ----

pub fn simple(msg: &str) -> Vec<u8> {
    format!("+{msg}\r\n").into_bytes()
}

pub fn err(msg: &str) -> Vec<u8> {
    format!("-{msg}\r\n").into_bytes()
}

pub fn int(value: i64) -> Vec<u8> {
    format!(":{value}\r\n").into_bytes()
}

pub fn bulk(data: &[u8]) -> Vec<u8> {
    let mut out = format!("${}\r\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    out
}

pub fn nil() -> Vec<u8> {
    b"$-1\r\n".to_vec()
}

pub fn nil_array() -> Vec<u8> {
    b"*-1\r\n".to_vec()
}

/// Array from pre-encoded frames.
pub fn array(frames: &[Vec<u8>]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", frames.len()).into_bytes();
    for frame in frames {
        out.extend_from_slice(frame);
    }
    out
}

/// `CLUSTER SLOTS` reply for `(start, end, master, replicas)` ranges.
pub fn slots_reply(ranges: &[(u16, u16, &str, &[&str])]) -> Vec<u8> {
    let node = |addr: &str| {
        let (host, port) = addr.rsplit_once(':').expect("host:port");
        array(&[bulk(host.as_bytes()), int(port.parse().expect("port"))])
    };
    let frames: Vec<Vec<u8>> = ranges
        .iter()
        .map(|(start, end, master, replicas)| {
            let mut parts = vec![int(*start as i64), int(*end as i64), node(master)];
            parts.extend(replicas.iter().map(|r| node(r)));
            array(&parts)
        })
        .collect();
    array(&frames)
}

// ---- argument assertions & config shorthand ----

/// Asserts a received command equals the expected words exactly.
pub fn assert_cmd(args: &[Vec<u8>], expected: &[&str]) {
    let got: Vec<String> = args
        .iter()
        .map(|a| String::from_utf8_lossy(a).into_owned())
        .collect();
    assert_eq!(got, expected, "unexpected command arguments");
}

pub fn arg(args: &[Vec<u8>], idx: usize) -> String {
    String::from_utf8_lossy(&args[idx]).into_owned()
}

/// Node config for a mock server's `host:port`.
pub fn node(addr: &str) -> NodeConfig {
    let (host, port) = addr.rsplit_once(':').expect("host:port");
    NodeConfig::new(host, port.parse().expect("port"))
}

pub fn single(addr: &str) -> ConnectOptions {
    ConnectOptions::Single(node(addr))
}

pub fn cluster(seeds: &[&str]) -> ConnectOptions {
    ConnectOptions::Cluster(seeds.iter().map(|s| node(s)).collect())
}
