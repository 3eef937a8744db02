//! Command Layer
//!
//! Receives parsed request messages, validates them (name, arity,
//! argument types), executes them against the storage engine, and
//! produces the reply message.
//!
//! ```text
//! Client request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  FrameParser    │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! │  - validate     │
//! │  - dispatch     │
//! │  - isolate      │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │     Engine      │  (storage module)
//! └─────────────────┘
//! ```
//!
//! Supported commands: GET, SET (with EX/PX), DEL, EXISTS, KEYS, PING,
//! ECHO, FLUSHDB, DBSIZE, INFO, the ZADD/ZREM/ZSCORE/ZRANK/ZREVRANK/
//! ZRANGE/ZREVRANGE/ZRANGEBYSCORE/ZCOUNT/ZCARD sorted-set family, and
//! EXPIRE/PEXPIRE/TTL/PTTL/PERSIST.

pub mod handler;

pub use handler::{CommandHandler, DispatchStats};
