//! # EmberKV - An In-Memory Key-Value Server
//!
//! EmberKV is a Redis-like, in-memory key-value server speaking a
//! compact length-prefixed binary protocol over TCP. It supports plain
//! string keys, sorted sets ordered by (score, member), and per-key TTL
//! expiration, with full request pipelining on every connection.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            EmberKV                               │
//! │                                                                  │
//! │  ┌─────────────┐    ┌──────────────┐    ┌─────────────┐          │
//! │  │ TCP Server  │───>│ Connection   │───>│  Command    │          │
//! │  │ (Listener)  │    │  Task        │    │  Handler    │          │
//! │  └─────────────┘    └──────────────┘    └──────┬──────┘          │
//! │                            │                   │                 │
//! │                     ┌──────┴──────┐            ▼                 │
//! │                     │ FrameParser │    ┌──────────────────────┐  │
//! │                     └─────────────┘    │   RwLock<Engine>     │  │
//! │                                        │  ┌──────┐ ┌───────┐  │  │
//! │                                        │  │ hash │ │ zsets │  │  │
//! │                                        │  └──────┘ └───────┘  │  │
//! │                                        │      ┌──────────┐    │  │
//! │                                        │      │ TTL heap │    │  │
//! │                                        │      └──────────┘    │  │
//! │                                        └──────────▲───────────┘  │
//! │                                                   │              │
//! │                               ┌───────────────────┴────────────┐ │
//! │                               │         ExpirySweeper          │ │
//! │                               │     (Background Tokio Task)    │ │
//! │                               └────────────────────────────────┘ │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Data flows socket → parser → dispatcher → engine → serializer →
//! socket. The engine itself is lock-free inside; all synchronization
//! happens at its boundary through a single reader/writer lock, held
//! only for the duration of one command and never across an await.
//!
//! ## Wire protocol
//!
//! Every frame is `type: u8`, `len: u32` little-endian, then `len`
//! payload bytes (or, for arrays, `len` nested frames). Commands are
//! arrays of bulk strings; pipelining is frame concatenation. See
//! [`protocol`] for the full layout.
//!
//! ## Supported commands
//!
//! - Strings: `SET key value [EX s | PX ms]`, `GET`, `DEL`, `EXISTS`
//! - Keyspace: `KEYS pattern`, `DBSIZE`, `FLUSHDB`
//! - Sorted sets: `ZADD`, `ZREM`, `ZSCORE`, `ZRANK`, `ZREVRANK`,
//!   `ZRANGE`, `ZREVRANGE`, `ZRANGEBYSCORE`, `ZCOUNT`, `ZCARD`
//! - TTL: `EXPIRE`, `PEXPIRE`, `TTL`, `PTTL`, `PERSIST`
//! - Server: `PING [msg]`, `ECHO`, `INFO`
//!
//! ## Module overview
//!
//! - [`protocol`]: binary framing, streaming parser, serializer
//! - [`storage`]: hash table, sorted sets, TTL heap, engine, sweeper
//! - [`commands`]: dispatcher with arity validation and panic isolation
//! - [`connection`]: per-client task, buffering, back-pressure

pub mod commands;
pub mod connection;
pub mod protocol;
pub mod storage;

pub use commands::CommandHandler;
pub use connection::{handle_connection, ConnectionStats};
pub use protocol::{FrameParser, Message, ParseError};
pub use storage::{start_expiry_sweeper, Engine, ExpirySweeper, SweeperConfig};

/// Default port the server listens on.
pub const DEFAULT_PORT: u16 = 6380;

/// Default address the server binds to.
pub const DEFAULT_BIND: &str = "0.0.0.0";

/// Crate version, surfaced by INFO.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
