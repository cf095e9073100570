//! # Connection Pool
//!
//! Purpose: Reuse TCP connections per backend node to keep command latency
//! low without unbounded socket growth.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Keep a bounded set of reusable connections.
//! 2. **Minimal Locking**: Hold the mutex only while moving idle connections.
//! 3. **Fail Fast**: Exceeding the pool limit returns an error immediately.
//! 4. **Cheap Handles**: The pool handle clones as an `Arc`, so every table
//!    handle shares the same node state.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bytes::BytesMut;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use tablekv_resp::{encode_command, read_reply, RespValue};

use crate::config::{NodeConfig, PoolOptions};
use crate::error::{Error, Result};

struct PoolState {
    idle: VecDeque<Connection>,
    total: usize,
}

struct PoolInner {
    node: NodeConfig,
    options: PoolOptions,
    // Replica connections enter read-only mode during the handshake.
    readonly: bool,
    state: Mutex<PoolState>,
}

/// Pool of connections to one backend node.
#[derive(Clone)]
pub(crate) struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Creates an empty pool; connections are opened lazily on acquire.
    pub(crate) fn new(node: NodeConfig, options: PoolOptions, readonly: bool) -> Self {
        let state = PoolState {
            idle: VecDeque::with_capacity(options.max_idle),
            total: 0,
        };
        Pool {
            inner: Arc::new(PoolInner {
                node,
                options,
                readonly,
                state: Mutex::new(state),
            }),
        }
    }

    /// Endpoint this pool serves.
    pub(crate) fn addr(&self) -> String {
        self.inner.node.addr()
    }

    /// Acquires a connection, opening a new one when no idle connection is
    /// available and the total cap allows it.
    pub(crate) async fn acquire(&self) -> Result<PooledConnection> {
        if let Some(conn) = self.pop_idle() {
            return Ok(PooledConnection::new(self.inner.clone(), conn));
        }

        if !self.try_reserve() {
            return Err(Error::PoolExhausted);
        }

        match Connection::open(&self.inner.node, &self.inner.options, self.inner.readonly).await {
            Ok(conn) => Ok(PooledConnection::new(self.inner.clone(), conn)),
            Err(err) => {
                self.release_slot();
                Err(err)
            }
        }
    }

    fn pop_idle(&self) -> Option<Connection> {
        let mut state = self.inner.state.lock().expect("pool mutex poisoned");
        state.idle.pop_front()
    }

    fn try_reserve(&self) -> bool {
        let mut state = self.inner.state.lock().expect("pool mutex poisoned");
        if state.total >= self.inner.options.max_total {
            return false;
        }
        state.total += 1;
        true
    }

    fn release_slot(&self) {
        let mut state = self.inner.state.lock().expect("pool mutex poisoned");
        state.total = state.total.saturating_sub(1);
    }
}

/// RAII wrapper returning a connection to the pool on drop.
pub(crate) struct PooledConnection {
    pool: Arc<PoolInner>,
    conn: Option<Connection>,
    valid: bool,
}

impl PooledConnection {
    fn new(pool: Arc<PoolInner>, conn: Connection) -> Self {
        PooledConnection {
            pool,
            conn: Some(conn),
            valid: true,
        }
    }

    /// Executes one command and returns the parsed reply.
    pub(crate) async fn exec(&mut self, args: &[&[u8]]) -> Result<RespValue> {
        let conn = self.conn.as_mut().expect("connection exists");
        let response = conn.exec(args).await;
        if response.is_err() {
            // An IO/protocol failure poisons this connection for reuse.
            self.valid = false;
        }
        response
    }

    /// Writes every command back to back, then reads one reply per command.
    ///
    /// This is the transport for both plain pipelines and MULTI/EXEC blocks;
    /// request-order FIFO on one connection is what makes the replies line up.
    pub(crate) async fn exec_pipeline(&mut self, cmds: &[Vec<Vec<u8>>]) -> Result<Vec<RespValue>> {
        let conn = self.conn.as_mut().expect("connection exists");
        let response = conn.exec_pipeline(cmds).await;
        if response.is_err() {
            self.valid = false;
        }
        response
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => return,
        };

        let mut state = self.pool.state.lock().expect("pool mutex poisoned");
        if self.valid && state.idle.len() < self.pool.options.max_idle {
            state.idle.push_back(conn);
        } else {
            state.total = state.total.saturating_sub(1);
        }
    }
}

/// Single TCP connection with reusable buffers.
struct Connection {
    reader: BufReader<TcpStream>,
    line_buf: Vec<u8>,
    write_buf: BytesMut,
}

impl Connection {
    async fn open(node: &NodeConfig, options: &PoolOptions, readonly: bool) -> Result<Self> {
        let addr = node.addr();
        let stream = match options.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, TcpStream::connect(&addr))
                .await
                .map_err(|_| {
                    Error::Io(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("connect to {addr} timed out"),
                    ))
                })??,
            None => TcpStream::connect(&addr).await?,
        };
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(true)?;

        let mut conn = Connection {
            reader: BufReader::new(stream),
            line_buf: Vec::with_capacity(128),
            write_buf: BytesMut::with_capacity(256),
        };
        conn.handshake(node, readonly).await?;
        Ok(conn)
    }

    /// AUTH, SELECT, and READONLY as required by the node config.
    async fn handshake(&mut self, node: &NodeConfig, readonly: bool) -> Result<()> {
        if let Some(auth) = &node.auth {
            self.exec_ok(&[b"AUTH", auth.as_bytes()]).await?;
        }
        if node.db != 0 {
            let db = node.db.to_string();
            self.exec_ok(&[b"SELECT", db.as_bytes()]).await?;
        }
        if readonly {
            self.exec_ok(&[b"READONLY"]).await?;
        }
        Ok(())
    }

    async fn exec_ok(&mut self, args: &[&[u8]]) -> Result<()> {
        match self.exec(args).await? {
            RespValue::Simple(_) => Ok(()),
            RespValue::Error(message) => Err(Error::Server { message }),
            _ => Err(Error::UnexpectedResponse),
        }
    }

    async fn exec(&mut self, args: &[&[u8]]) -> Result<RespValue> {
        self.write_buf.clear();
        encode_command(args, &mut self.write_buf);

        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buf).await?;
        stream.flush().await?;

        Ok(read_reply(&mut self.reader, &mut self.line_buf).await?)
    }

    async fn exec_pipeline(&mut self, cmds: &[Vec<Vec<u8>>]) -> Result<Vec<RespValue>> {
        self.write_buf.clear();
        for cmd in cmds {
            let args: Vec<&[u8]> = cmd.iter().map(|arg| arg.as_slice()).collect();
            encode_command(&args, &mut self.write_buf);
        }

        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buf).await?;
        stream.flush().await?;

        let mut replies = Vec::with_capacity(cmds.len());
        for _ in 0..cmds.len() {
            replies.push(read_reply(&mut self.reader, &mut self.line_buf).await?);
        }
        Ok(replies)
    }
}
