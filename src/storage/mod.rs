//! Storage Layer
//!
//! Everything that holds data lives here:
//!
//! - [`hash`]: the string keyspace, a separate-chaining hash table with
//!   MurmurHash3 and power-of-two growth
//! - [`zset`]: sorted sets, a member→score map paired with a
//!   size-annotated AVL tree ordered by (score, member)
//! - [`ttl`]: the expiry index, a min-heap of deadlines with a key→slot
//!   map for keyed updates
//! - [`engine`]: the [`Engine`] that owns all three and keeps them
//!   consistent across deletes, overwrites, and sweeps
//! - [`expiry`]: the background task that runs the periodic sweep
//!
//! The engine has no internal locking. The server wraps it in a single
//! `parking_lot::RwLock` and every command dispatch borrows it through
//! that lock for the duration of one call.
//!
//! ## Example
//!
//! ```
//! use emberkv::storage::Engine;
//! use bytes::Bytes;
//!
//! let mut engine = Engine::new();
//! engine.set(Bytes::from("name"), Bytes::from("ember"));
//! assert_eq!(engine.get(b"name"), Some(Bytes::from("ember")));
//!
//! engine.zadd(Bytes::from("board"), vec![(Bytes::from("alice"), 3.0)]);
//! assert_eq!(engine.zset(b"board").map(|s| s.len()), Some(1));
//! ```

pub mod engine;
pub mod expiry;
pub mod hash;
pub mod ttl;
pub mod zset;

pub use engine::Engine;
pub use expiry::{start_expiry_sweeper, ExpirySweeper, SweeperConfig};
pub use hash::{HashTable, SetOutcome, TableStats};
pub use ttl::{TtlHeap, TtlRecord};
pub use zset::{Score, SortedSet};
