//! Command Dispatcher
//!
//! Turns a parsed request message into a response message. The pipeline
//! for every request is:
//!
//! ```text
//! Message ──> argument vector ──> name lookup ──> arity check ──> handler
//! ```
//!
//! Command names fold to ASCII uppercase, so `get`, `Get` and `GET` are
//! the same command. Every command declares an arity rule over the full
//! argument vector (name included); violations answer with
//! `ERR wrong number of arguments for '<NAME>'` and an unknown name with
//! `ERR unknown command '<name>'`; both leave the connection open.
//!
//! Handlers borrow the engine through the shared lock for exactly one
//! call: read lock for read-only commands, write lock for mutators.
//! Dispatch runs under `catch_unwind`, so a handler bug produces an
//! `ERR internal error` reply instead of tearing down the connection
//! task. The engine lock is a `parking_lot` lock precisely so such a
//! panic cannot poison it.

use crate::connection::ConnectionStats;
use crate::protocol::{parse_command, Message};
use crate::storage::{Engine, Score};
use bytes::Bytes;
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::error;

/// Counters kept by the dispatcher, reported by INFO.
#[derive(Debug, Default)]
pub struct DispatchStats {
    /// Requests that reached dispatch.
    pub commands_processed: AtomicU64,
    /// Error replies produced (arity, unknown command, handler errors).
    pub errors_returned: AtomicU64,
    /// GET commands.
    pub get_commands: AtomicU64,
    /// SET commands.
    pub set_commands: AtomicU64,
    /// DEL commands.
    pub del_commands: AtomicU64,
    /// Sorted-set commands (Z*).
    pub zset_commands: AtomicU64,
}

/// Arity rule over the full argument vector, command name included.
#[derive(Debug, Clone, Copy)]
enum Arity {
    Exact(usize),
    AtLeast(usize),
}

impl Arity {
    fn accepts(self, argc: usize) -> bool {
        match self {
            Arity::Exact(n) => argc == n,
            Arity::AtLeast(n) => argc >= n,
        }
    }
}

/// Arity table. `None` means the command does not exist.
fn arity_of(name: &str) -> Option<Arity> {
    use Arity::{AtLeast, Exact};
    Some(match name {
        "GET" => Exact(2),
        "SET" => AtLeast(3),
        "DEL" => AtLeast(2),
        "EXISTS" => AtLeast(2),
        "KEYS" => Exact(2),
        "PING" => AtLeast(1),
        "ECHO" => Exact(2),
        "FLUSHDB" => Exact(1),
        "DBSIZE" => Exact(1),
        "INFO" => AtLeast(1),
        "ZADD" => AtLeast(4),
        "ZREM" => AtLeast(3),
        "ZSCORE" => Exact(3),
        "ZRANK" => Exact(3),
        "ZREVRANK" => Exact(3),
        "ZRANGE" => AtLeast(4),
        "ZREVRANGE" => AtLeast(4),
        "ZRANGEBYSCORE" => AtLeast(4),
        "ZCOUNT" => Exact(4),
        "ZCARD" => Exact(2),
        "EXPIRE" => Exact(3),
        "PEXPIRE" => Exact(3),
        "TTL" => Exact(2),
        "PTTL" => Exact(2),
        "PERSIST" => Exact(2),
        "DEBUG" => AtLeast(2),
        _ => return None,
    })
}

/// Executes commands against the shared engine.
///
/// Cheap to clone: one handle per connection task, all pointing at the
/// same engine and counters.
#[derive(Clone)]
pub struct CommandHandler {
    engine: Arc<RwLock<Engine>>,
    stats: Arc<DispatchStats>,
    /// Connection counters, reported by INFO's `# Clients` section.
    connections: Arc<ConnectionStats>,
    start_time: Instant,
}

impl CommandHandler {
    /// Creates a handler over a shared engine and the server's
    /// connection counters.
    pub fn new(engine: Arc<RwLock<Engine>>, connections: Arc<ConnectionStats>) -> Self {
        Self {
            engine,
            stats: Arc::new(DispatchStats::default()),
            connections,
            start_time: Instant::now(),
        }
    }

    /// Dispatcher counters.
    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Executes one request and returns the reply to serialize.
    pub fn execute(&self, request: Message) -> Message {
        let response = self.execute_inner(&request);
        if response.is_error() {
            self.stats.errors_returned.fetch_add(1, Ordering::Relaxed);
        }
        response
    }

    fn execute_inner(&self, request: &Message) -> Message {
        let Some(args) = parse_command(request) else {
            return Message::error("ERR invalid command format");
        };
        if args.is_empty() {
            return Message::error("ERR empty command");
        }

        let name = match std::str::from_utf8(&args[0]) {
            Ok(s) => s.to_ascii_uppercase(),
            Err(_) => return Message::error("ERR invalid command name"),
        };

        self.stats.commands_processed.fetch_add(1, Ordering::Relaxed);

        let Some(arity) = arity_of(&name) else {
            return Message::error(format!(
                "ERR unknown command '{}'",
                String::from_utf8_lossy(&args[0])
            ));
        };
        if !arity.accepts(args.len()) {
            return wrong_args(&name);
        }

        match catch_unwind(AssertUnwindSafe(|| self.dispatch(&name, &args))) {
            Ok(response) => response,
            Err(_) => {
                error!(command = %name, "Handler panicked");
                Message::error("ERR internal error")
            }
        }
    }

    fn dispatch(&self, name: &str, args: &[Bytes]) -> Message {
        match name {
            "GET" => {
                self.stats.get_commands.fetch_add(1, Ordering::Relaxed);
                self.cmd_get(args)
            }
            "SET" => {
                self.stats.set_commands.fetch_add(1, Ordering::Relaxed);
                self.cmd_set(args)
            }
            "DEL" => {
                self.stats.del_commands.fetch_add(1, Ordering::Relaxed);
                self.cmd_del(args)
            }
            "EXISTS" => self.cmd_exists(args),
            "KEYS" => self.cmd_keys(args),
            "PING" => self.cmd_ping(args),
            "ECHO" => Message::bulk(args[1].clone()),
            "FLUSHDB" => self.cmd_flushdb(),
            "DBSIZE" => Message::integer(self.engine.read().dbsize() as i64),
            "INFO" => self.cmd_info(),
            "ZADD" | "ZREM" | "ZSCORE" | "ZRANK" | "ZREVRANK" | "ZRANGE" | "ZREVRANGE"
            | "ZRANGEBYSCORE" | "ZCOUNT" | "ZCARD" => {
                self.stats.zset_commands.fetch_add(1, Ordering::Relaxed);
                self.dispatch_zset(name, args)
            }
            "EXPIRE" => self.cmd_expire(args, 1000),
            "PEXPIRE" => self.cmd_expire(args, 1),
            "TTL" => Message::integer(self.engine.read().ttl_secs(&args[1], Instant::now())),
            "PTTL" => Message::integer(self.engine.read().ttl_millis(&args[1], Instant::now())),
            "PERSIST" => Message::integer(i64::from(self.engine.write().persist(&args[1]))),
            "DEBUG" => self.cmd_debug(args),
            // arity_of and dispatch cover the same names
            _ => Message::error(format!("ERR unknown command '{}'", name)),
        }
    }

    fn dispatch_zset(&self, name: &str, args: &[Bytes]) -> Message {
        match name {
            "ZADD" => self.cmd_zadd(args),
            "ZREM" => Message::integer(self.engine.write().zrem(&args[1], &args[2..]) as i64),
            "ZSCORE" => self.cmd_zscore(args),
            "ZRANK" => self.cmd_zrank(args, false),
            "ZREVRANK" => self.cmd_zrank(args, true),
            "ZRANGE" => self.cmd_zrange(args, "ZRANGE", false),
            "ZREVRANGE" => self.cmd_zrange(args, "ZREVRANGE", true),
            "ZRANGEBYSCORE" => self.cmd_zrangebyscore(args),
            "ZCOUNT" => self.cmd_zcount(args),
            _ => {
                // Only ZCARD remains
                let len = self.engine.read().zset(&args[1]).map_or(0, |s| s.len());
                Message::integer(len as i64)
            }
        }
    }

    // ------------------------------------------------------------------
    // Strings & keyspace
    // ------------------------------------------------------------------

    fn cmd_get(&self, args: &[Bytes]) -> Message {
        match self.engine.read().get(&args[1]) {
            Some(value) => Message::bulk(value),
            None => Message::Null,
        }
    }

    /// SET key value [EX seconds | PX milliseconds]
    fn cmd_set(&self, args: &[Bytes]) -> Message {
        let key = args[1].clone();
        let value = args[2].clone();

        let mut ttl_millis: Option<i64> = None;
        let mut i = 3;
        while i < args.len() {
            let option = match std::str::from_utf8(&args[i]) {
                Ok(s) => s.to_ascii_uppercase(),
                Err(_) => return Message::error("ERR syntax error"),
            };
            match option.as_str() {
                "EX" | "PX" => {
                    i += 1;
                    let Some(amount) = args.get(i).and_then(|a| parse_int(a)) else {
                        return Message::error("ERR syntax error");
                    };
                    if amount <= 0 {
                        return Message::error("ERR invalid expire time in 'set' command");
                    }
                    let scale = if option == "EX" { 1000 } else { 1 };
                    ttl_millis = Some(amount.saturating_mul(scale));
                }
                _ => return Message::error("ERR syntax error"),
            }
            i += 1;
        }

        let mut engine = self.engine.write();
        match ttl_millis {
            Some(millis) => {
                engine.set_with_ttl(
                    key,
                    value,
                    std::time::Duration::from_millis(millis as u64),
                    Instant::now(),
                );
            }
            None => {
                engine.set(key, value);
            }
        }
        Message::ok()
    }

    fn cmd_del(&self, args: &[Bytes]) -> Message {
        let mut engine = self.engine.write();
        let deleted = args[1..].iter().filter(|key| engine.del(key)).count();
        Message::integer(deleted as i64)
    }

    fn cmd_exists(&self, args: &[Bytes]) -> Message {
        let engine = self.engine.read();
        let count = args[1..].iter().filter(|key| engine.exists(key)).count();
        Message::integer(count as i64)
    }

    fn cmd_keys(&self, args: &[Bytes]) -> Message {
        let keys = self.engine.read().keys(&args[1]);
        Message::array(keys.into_iter().map(Message::bulk).collect())
    }

    fn cmd_ping(&self, args: &[Bytes]) -> Message {
        match args.len() {
            1 => Message::pong(),
            2 => Message::bulk(args[1].clone()),
            _ => wrong_args("PING"),
        }
    }

    fn cmd_flushdb(&self) -> Message {
        self.engine.write().flush();
        Message::ok()
    }

    fn cmd_info(&self) -> Message {
        let engine = self.engine.read();
        let table = engine.table_stats();
        let uptime = self.start_time.elapsed().as_secs();

        let info = format!(
            "# Server\r\n\
             emberkv_version:{}\r\n\
             mode:standalone\r\n\
             uptime_in_seconds:{}\r\n\
             \r\n\
             # Clients\r\n\
             connected_clients:{}\r\n\
             connections_accepted:{}\r\n\
             \r\n\
             # Memory\r\n\
             string_keys:{}\r\n\
             buckets:{}\r\n\
             used_buckets:{}\r\n\
             max_chain_length:{}\r\n\
             load_factor:{:.2}\r\n\
             \r\n\
             # Stats\r\n\
             total_commands_processed:{}\r\n\
             total_errors:{}\r\n\
             get_commands:{}\r\n\
             set_commands:{}\r\n\
             del_commands:{}\r\n\
             zset_commands:{}\r\n\
             expired_keys:{}\r\n\
             \r\n\
             # Keyspace\r\n\
             db0:keys={},expires={}\r\n",
            env!("CARGO_PKG_VERSION"),
            uptime,
            self.connections.active_connections.load(Ordering::Relaxed),
            self.connections.connections_accepted.load(Ordering::Relaxed),
            engine.string_count(),
            table.buckets,
            table.used_buckets,
            table.max_chain_len,
            table.load_factor,
            self.stats.commands_processed.load(Ordering::Relaxed),
            self.stats.errors_returned.load(Ordering::Relaxed),
            self.stats.get_commands.load(Ordering::Relaxed),
            self.stats.set_commands.load(Ordering::Relaxed),
            self.stats.del_commands.load(Ordering::Relaxed),
            self.stats.zset_commands.load(Ordering::Relaxed),
            engine.expired_total(),
            engine.dbsize(),
            engine.ttl_count(),
        );

        Message::bulk(info)
    }

    // ------------------------------------------------------------------
    // Sorted sets
    // ------------------------------------------------------------------

    /// ZADD key score member [score member ...]
    fn cmd_zadd(&self, args: &[Bytes]) -> Message {
        if (args.len() - 2) % 2 != 0 {
            return wrong_args("ZADD");
        }

        let mut pairs = Vec::with_capacity((args.len() - 2) / 2);
        for chunk in args[2..].chunks(2) {
            let Some(score) = parse_score(&chunk[0]) else {
                return Message::error("ERR value is not a valid float");
            };
            pairs.push((chunk[1].clone(), score));
        }

        let added = self.engine.write().zadd(args[1].clone(), pairs);
        Message::integer(added as i64)
    }

    fn cmd_zscore(&self, args: &[Bytes]) -> Message {
        match self
            .engine
            .read()
            .zset(&args[1])
            .and_then(|set| set.score(&args[2]))
        {
            Some(score) => Message::bulk(format_score(score)),
            None => Message::Null,
        }
    }

    fn cmd_zrank(&self, args: &[Bytes], reverse: bool) -> Message {
        let engine = self.engine.read();
        let rank = engine.zset(&args[1]).and_then(|set| {
            if reverse {
                set.rev_rank(&args[2])
            } else {
                set.rank(&args[2])
            }
        });
        match rank {
            Some(rank) => Message::integer(rank as i64),
            None => Message::Null,
        }
    }

    /// ZRANGE key start stop [WITHSCORES] (and the reversed variant)
    fn cmd_zrange(&self, args: &[Bytes], name: &str, reverse: bool) -> Message {
        let with_scores = match parse_withscores(args, 4, name) {
            Ok(flag) => flag,
            Err(response) => return response,
        };

        let (Some(start), Some(stop)) = (parse_int(&args[2]), parse_int(&args[3])) else {
            return Message::error("ERR value is not an integer or out of range");
        };

        let engine = self.engine.read();
        let entries = match engine.zset(&args[1]) {
            Some(set) if reverse => set.rev_range(start, stop),
            Some(set) => set.range(start, stop),
            None => Vec::new(),
        };

        Message::array(render_entries(entries, with_scores))
    }

    /// ZRANGEBYSCORE key min max [WITHSCORES]
    fn cmd_zrangebyscore(&self, args: &[Bytes]) -> Message {
        let with_scores = match parse_withscores(args, 4, "ZRANGEBYSCORE") {
            Ok(flag) => flag,
            Err(response) => return response,
        };

        let (Some(min), Some(max)) = (parse_score(&args[2]), parse_score(&args[3])) else {
            return Message::error("ERR min or max is not a float");
        };

        let entries = self
            .engine
            .read()
            .zset(&args[1])
            .map(|set| set.range_by_score(min, max))
            .unwrap_or_default();

        Message::array(render_entries(entries, with_scores))
    }

    fn cmd_zcount(&self, args: &[Bytes]) -> Message {
        let (Some(min), Some(max)) = (parse_score(&args[2]), parse_score(&args[3])) else {
            return Message::error("ERR min or max is not a float");
        };
        let count = self
            .engine
            .read()
            .zset(&args[1])
            .map_or(0, |set| set.count_by_score(min, max));
        Message::integer(count as i64)
    }

    // ------------------------------------------------------------------
    // TTL
    // ------------------------------------------------------------------

    /// EXPIRE / PEXPIRE, differing only in the unit scale.
    fn cmd_expire(&self, args: &[Bytes], scale_millis: i64) -> Message {
        let Some(amount) = parse_int(&args[2]) else {
            return Message::error("ERR value is not an integer or out of range");
        };
        let applied = self.engine.write().set_ttl(
            &args[1],
            amount.saturating_mul(scale_millis),
            Instant::now(),
        );
        Message::integer(i64::from(applied))
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// DEBUG PANIC deliberately panics inside dispatch so the panic
    /// isolation path stays testable end to end.
    fn cmd_debug(&self, args: &[Bytes]) -> Message {
        let Ok(subcommand) = std::str::from_utf8(&args[1]) else {
            return Message::error("ERR unknown DEBUG subcommand");
        };
        match subcommand.to_ascii_uppercase().as_str() {
            "PANIC" => panic!("DEBUG PANIC requested"),
            other => Message::error(format!("ERR unknown DEBUG subcommand '{}'", other)),
        }
    }
}

fn wrong_args(name: &str) -> Message {
    Message::error(format!("ERR wrong number of arguments for '{}'", name))
}

/// Checks for a trailing WITHSCORES token at `position`.
fn parse_withscores(args: &[Bytes], position: usize, name: &str) -> Result<bool, Message> {
    match args.len() - position {
        0 => Ok(false),
        1 if args[position].eq_ignore_ascii_case(b"WITHSCORES") => Ok(true),
        1 => Err(Message::error("ERR syntax error")),
        _ => Err(wrong_args(name)),
    }
}

/// Parses an i64 from command argument bytes.
fn parse_int(arg: &[u8]) -> Option<i64> {
    std::str::from_utf8(arg).ok()?.parse().ok()
}

/// Parses a score; NaN is never accepted.
fn parse_score(arg: &[u8]) -> Option<Score> {
    let score: f64 = std::str::from_utf8(arg).ok()?.trim().parse().ok()?;
    if score.is_nan() {
        return None;
    }
    Some(score)
}

/// Renders a score the way clients expect it: integral values without a
/// decimal point.
fn format_score(score: Score) -> String {
    if score.is_finite() && score.fract() == 0.0 && score.abs() < 1e15 {
        format!("{}", score as i64)
    } else {
        format!("{}", score)
    }
}

/// Flattens range entries into the reply array, alternating member and
/// score text when WITHSCORES is set.
fn render_entries(entries: Vec<(Bytes, Score)>, with_scores: bool) -> Vec<Message> {
    let mut out = Vec::with_capacity(entries.len() * if with_scores { 2 } else { 1 });
    for (member, score) in entries {
        out.push(Message::bulk(member));
        if with_scores {
            out.push(Message::bulk(format_score(score)));
        }
    }
    out
}
