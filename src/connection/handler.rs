//! Connection Handling
//!
//! One task per accepted socket. Each task owns the connection state the
//! rest of the server never sees: the inbound byte queue (inside the
//! frame parser), the outbound response buffer, and the per-connection
//! parse position.
//!
//! ## The loop
//!
//! ```text
//! read socket ──> parser queue ──> try_parse ──┬─> dispatch ──> out buffer
//!      ▲                                       │ (repeat while frames left)
//!      └────────────── flush out buffer <──────┘
//! ```
//!
//! Reading once may surface zero, one, or many complete frames; every
//! complete frame is dispatched and its response appended to the out
//! buffer, so pipelined requests are answered in arrival order with one
//! write for the whole batch.
//!
//! ## Limits
//!
//! - Inbound: the parser queue is capped at 1 MiB. A client that sends
//!   that much without completing a frame is disconnected.
//! - Outbound: if a batch of responses grows past the 16 MiB high-water
//!   mark, the task stops consuming input and writes the backlog out
//!   before parsing anything else. A slow consumer therefore stalls its
//!   own connection instead of growing the buffer without bound.
//! - Protocol errors poison the parser; the client gets a best-effort
//!   error frame and the connection closes.

use crate::commands::CommandHandler;
use crate::protocol::{FrameParser, Message, ParseError};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

/// Cap on buffered inbound bytes awaiting a complete frame (1 MiB).
pub const MAX_READ_BUFFER: usize = 1024 * 1024;

/// Outbound buffer size that pauses request parsing (16 MiB).
pub const WRITE_HIGH_WATER: usize = 16 * 1024 * 1024;

/// Counters shared by all connection tasks.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Connections accepted since startup.
    pub connections_accepted: AtomicU64,
    /// Connections currently open.
    pub active_connections: AtomicU64,
    /// Requests dispatched across all connections.
    pub commands_processed: AtomicU64,
    /// Bytes read from sockets.
    pub bytes_read: AtomicU64,
    /// Bytes written to sockets.
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new connection and returns its id.
    pub fn connection_opened(&self) -> u64 {
        let id = self.connections_accepted.fetch_add(1, Ordering::Relaxed) + 1;
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        id
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn add_bytes_written(&self, count: usize) {
        self.bytes_written.fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Why a connection ended.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Network-level failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer sent bytes that do not frame.
    #[error("protocol error: {0}")]
    Protocol(#[from] ParseError),

    /// Clean EOF between frames.
    #[error("client disconnected")]
    ClientDisconnected,

    /// EOF in the middle of a frame.
    #[error("unexpected end of stream")]
    UnexpectedEof,

    /// The peer exceeded the inbound buffer cap without completing a
    /// frame.
    #[error("read buffer limit exceeded")]
    ReadBufferFull,
}

/// State for one client connection.
pub struct ConnectionHandler {
    /// Monotonic id assigned at accept time.
    id: u64,
    stream: TcpStream,
    addr: SocketAddr,
    parser: FrameParser,
    /// Serialized responses awaiting a write.
    out: Vec<u8>,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
}

impl ConnectionHandler {
    /// Wraps an accepted socket. Sets `TCP_NODELAY` so small replies are
    /// not delayed behind Nagle batching.
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        command_handler: CommandHandler,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            warn!(client = %addr, error = %e, "Failed to set TCP_NODELAY");
        }
        let id = stats.connection_opened();

        Self {
            id,
            stream,
            addr,
            parser: FrameParser::new(),
            out: Vec::with_capacity(4096),
            command_handler,
            stats,
        }
    }

    /// Runs the connection to completion.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(id = self.id, client = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) | Err(ConnectionError::ClientDisconnected) => {
                debug!(id = self.id, client = %self.addr, "Client disconnected")
            }
            Err(ConnectionError::Io(e)) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                debug!(id = self.id, client = %self.addr, "Connection reset by client")
            }
            Err(e) => {
                warn!(id = self.id, client = %self.addr, error = %e, "Connection closed with error")
            }
        }

        self.stats.connection_closed();
        result
    }

    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            self.read_more().await?;
            self.drain_requests().await?;
            self.flush().await?;
        }
    }

    /// Parses and dispatches every complete frame currently buffered.
    async fn drain_requests(&mut self) -> Result<(), ConnectionError> {
        loop {
            match self.parser.try_parse() {
                Ok(Some(request)) => {
                    let response = self.command_handler.execute(request);
                    self.stats.command_processed();
                    response.serialize_into(&mut self.out);
                    trace!(
                        client = %self.addr,
                        pending = self.out.len(),
                        "Buffered response"
                    );

                    if self.out.len() >= WRITE_HIGH_WATER {
                        // Stop consuming input until the backlog is gone
                        debug!(
                            client = %self.addr,
                            pending = self.out.len(),
                            "Write buffer high-water mark reached"
                        );
                        self.flush().await?;
                    }
                }
                Ok(None) => return Ok(()),
                Err(e) => {
                    warn!(client = %self.addr, error = %e, "Protocol error, closing");
                    // Best effort: answer what was already parsed, then
                    // tell the client why it is being dropped
                    Message::error(format!("ERR protocol error: {}", e))
                        .serialize_into(&mut self.out);
                    let _ = self.flush().await;
                    return Err(ConnectionError::Protocol(e));
                }
            }
        }
    }

    /// Reads once from the socket into the parser queue.
    async fn read_more(&mut self) -> Result<(), ConnectionError> {
        if self.parser.buffered() >= MAX_READ_BUFFER {
            warn!(
                client = %self.addr,
                buffered = self.parser.buffered(),
                "Read buffer limit exceeded"
            );
            return Err(ConnectionError::ReadBufferFull);
        }

        let buf = self.parser.buffer_mut();
        if buf.capacity() - buf.len() < 1024 {
            buf.reserve(4096);
        }

        let n = self.stream.read_buf(buf).await?;
        if n == 0 {
            return Err(if self.parser.buffered() == 0 {
                ConnectionError::ClientDisconnected
            } else {
                ConnectionError::UnexpectedEof
            });
        }

        self.stats.add_bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read data");
        Ok(())
    }

    /// Writes the whole outbound buffer to the socket.
    async fn flush(&mut self) -> Result<(), ConnectionError> {
        if self.out.is_empty() {
            return Ok(());
        }
        self.stream.write_all(&self.out).await?;
        self.stream.flush().await?;
        self.stats.add_bytes_written(self.out.len());
        trace!(client = %self.addr, bytes = self.out.len(), "Flushed responses");
        self.out.clear();
        Ok(())
    }
}

/// Runs one connection, swallowing the routine end-of-life errors.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
) {
    let handler = ConnectionHandler::new(stream, addr, command_handler, stats);
    let _ = handler.run().await;
}
