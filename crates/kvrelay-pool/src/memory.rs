//! # In-Memory Transport
//!
//! A [`Transport`] backed by a shared in-process map. It understands the
//! string and hash commands the relay exercises and can inject faults
//! (refused connects, broken connections, latency), which makes it the
//! backend for tests and for the probe's `--memory` mode.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use kvrelay_domain::{Command, Reply};
use parking_lot::Mutex;

use crate::error::TransportError;
use crate::transport::Transport;

const WRONG_TYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";
const NOT_AN_INTEGER: &str = "ERR value is not an integer or out of range";

#[derive(Debug, Clone)]
enum Value {
    Str(Vec<u8>),
    Hash(BTreeMap<String, Vec<u8>>),
}

#[derive(Debug, Default)]
struct Backend {
    data: Mutex<BTreeMap<String, Value>>,
    generation: AtomicU64,
    next_connection: AtomicU64,
    failing_connects: AtomicUsize,
    offline: AtomicBool,
    latency_us: AtomicU64,
    connects: AtomicU64,
    closes: AtomicU64,
    commands: AtomicU64,
}

/// Shared in-process key-value backend. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    backend: Arc<Backend>,
}

/// A session with the in-memory backend.
#[derive(Debug)]
pub struct MemoryConnection {
    id: u64,
    generation: u64,
}

impl MemoryConnection {
    pub const fn id(&self) -> u64 {
        self.id
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // FAULT INJECTION
    // =========================================================================

    /// Make the next `count` connection attempts fail.
    pub fn fail_next_connects(&self, count: usize) {
        self.backend.failing_connects.store(count, Ordering::Release);
    }

    /// Invalidate every connection opened so far.
    pub fn break_connections(&self) {
        self.backend.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// While offline, connects are refused and every connection is broken.
    pub fn set_offline(&self, offline: bool) {
        self.backend.offline.store(offline, Ordering::Release);
    }

    /// Delay applied to connects and commands.
    pub fn set_latency(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.backend.latency_us.store(micros, Ordering::Release);
    }

    // =========================================================================
    // INSPECTION
    // =========================================================================

    pub fn connect_count(&self) -> u64 {
        self.backend.connects.load(Ordering::Acquire)
    }

    pub fn close_count(&self) -> u64 {
        self.backend.closes.load(Ordering::Acquire)
    }

    /// Commands that reached the backend.
    pub fn command_count(&self) -> u64 {
        self.backend.commands.load(Ordering::Acquire)
    }

    pub fn key_count(&self) -> usize {
        self.backend.data.lock().len()
    }

    /// Write a string value directly, as another client would.
    pub fn put(&self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.backend
            .data
            .lock()
            .insert(key.into(), Value::Str(value.into()));
    }

    fn is_broken(&self, conn: &MemoryConnection) -> bool {
        self.backend.offline.load(Ordering::Acquire)
            || conn.generation != self.backend.generation.load(Ordering::Acquire)
    }

    async fn simulate_latency(&self) {
        let micros = self.backend.latency_us.load(Ordering::Acquire);
        if micros > 0 {
            tokio::time::sleep(Duration::from_micros(micros)).await;
        }
    }

    fn take_connect_failure(&self) -> bool {
        self.backend
            .failing_connects
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }

    // =========================================================================
    // COMMAND INTERPRETER
    // =========================================================================

    fn apply(&self, command: &Command) -> Reply {
        let args = command.args();
        let mut data = self.backend.data.lock();

        match command.name() {
            "PING" => args
                .first()
                .map_or_else(|| Reply::Simple("PONG".to_string()), |m| Reply::bulk(m.as_bytes())),
            "ECHO" => match args {
                [message] => Reply::bulk(message.as_bytes()),
                _ => wrong_arity(command),
            },
            "GET" => match args {
                [key] => match data.get(key) {
                    Some(Value::Str(value)) => Reply::Bulk(value.clone()),
                    Some(Value::Hash(_)) => Reply::Error(WRONG_TYPE.to_string()),
                    None => Reply::Nil,
                },
                _ => wrong_arity(command),
            },
            "SET" => match args {
                [key, value, ..] => {
                    data.insert(key.clone(), Value::Str(value.clone().into_bytes()));
                    Reply::Ok
                }
                _ => wrong_arity(command),
            },
            "MSET" => {
                if args.is_empty() || args.len() % 2 != 0 {
                    return wrong_arity(command);
                }
                for pair in args.chunks_exact(2) {
                    data.insert(pair[0].clone(), Value::Str(pair[1].clone().into_bytes()));
                }
                Reply::Ok
            }
            "DEL" | "UNLINK" => {
                if args.is_empty() {
                    return wrong_arity(command);
                }
                let removed = args.iter().filter(|key| data.remove(*key).is_some()).count();
                Reply::Int(count(removed))
            }
            "EXISTS" => {
                if args.is_empty() {
                    return wrong_arity(command);
                }
                Reply::Int(count(args.iter().filter(|key| data.contains_key(*key)).count()))
            }
            "INCR" | "DECR" => match args {
                [key] => {
                    let delta = if command.is("INCR") { 1 } else { -1 };
                    let current = match data.get(key) {
                        Some(Value::Str(raw)) => {
                            let parsed = std::str::from_utf8(raw)
                                .ok()
                                .and_then(|s| s.parse::<i64>().ok());
                            match parsed {
                                Some(n) => n,
                                None => return Reply::Error(NOT_AN_INTEGER.to_string()),
                            }
                        }
                        Some(Value::Hash(_)) => return Reply::Error(WRONG_TYPE.to_string()),
                        None => 0,
                    };
                    let Some(next) = current.checked_add(delta) else {
                        return Reply::Error(NOT_AN_INTEGER.to_string());
                    };
                    data.insert(key.clone(), Value::Str(next.to_string().into_bytes()));
                    Reply::Int(next)
                }
                _ => wrong_arity(command),
            },
            "STRLEN" => match args {
                [key] => match data.get(key) {
                    Some(Value::Str(value)) => Reply::Int(count(value.len())),
                    Some(Value::Hash(_)) => Reply::Error(WRONG_TYPE.to_string()),
                    None => Reply::Int(0),
                },
                _ => wrong_arity(command),
            },
            "HSET" => {
                if args.len() < 3 || args.len() % 2 == 0 {
                    return wrong_arity(command);
                }
                let entry = data
                    .entry(args[0].clone())
                    .or_insert_with(|| Value::Hash(BTreeMap::new()));
                let Value::Hash(fields) = entry else {
                    return Reply::Error(WRONG_TYPE.to_string());
                };
                let added = args[1..]
                    .chunks_exact(2)
                    .filter(|pair| {
                        fields
                            .insert(pair[0].clone(), pair[1].clone().into_bytes())
                            .is_none()
                    })
                    .count();
                Reply::Int(count(added))
            }
            "HGET" => match args {
                [key, field] => match data.get(key) {
                    Some(Value::Hash(fields)) => {
                        fields.get(field).map_or(Reply::Nil, |v| Reply::Bulk(v.clone()))
                    }
                    Some(Value::Str(_)) => Reply::Error(WRONG_TYPE.to_string()),
                    None => Reply::Nil,
                },
                _ => wrong_arity(command),
            },
            "HGETALL" => match args {
                [key] => match data.get(key) {
                    Some(Value::Hash(fields)) => Reply::Array(
                        fields
                            .iter()
                            .flat_map(|(f, v)| [Reply::bulk(f.as_bytes()), Reply::Bulk(v.clone())])
                            .collect(),
                    ),
                    Some(Value::Str(_)) => Reply::Error(WRONG_TYPE.to_string()),
                    None => Reply::Array(Vec::new()),
                },
                _ => wrong_arity(command),
            },
            "HLEN" => match args {
                [key] => match data.get(key) {
                    Some(Value::Hash(fields)) => Reply::Int(count(fields.len())),
                    Some(Value::Str(_)) => Reply::Error(WRONG_TYPE.to_string()),
                    None => Reply::Int(0),
                },
                _ => wrong_arity(command),
            },
            "HDEL" => {
                if args.len() < 2 {
                    return wrong_arity(command);
                }
                match data.get_mut(&args[0]) {
                    Some(Value::Hash(fields)) => {
                        let removed = args[1..]
                            .iter()
                            .filter(|f| fields.remove(*f).is_some())
                            .count();
                        if fields.is_empty() {
                            data.remove(&args[0]);
                        }
                        Reply::Int(count(removed))
                    }
                    Some(Value::Str(_)) => Reply::Error(WRONG_TYPE.to_string()),
                    None => Reply::Int(0),
                }
            }
            "KEYS" => match args {
                [pattern] => {
                    let prefix = pattern.strip_suffix('*');
                    Reply::Array(
                        data.keys()
                            .filter(|key| prefix.map_or(*key == pattern, |p| key.starts_with(p)))
                            .map(|key| Reply::bulk(key.as_bytes()))
                            .collect(),
                    )
                }
                _ => wrong_arity(command),
            },
            "TYPE" => match args {
                [key] => Reply::Simple(
                    match data.get(key) {
                        Some(Value::Str(_)) => "string",
                        Some(Value::Hash(_)) => "hash",
                        None => "none",
                    }
                    .to_string(),
                ),
                _ => wrong_arity(command),
            },
            "DBSIZE" => Reply::Int(count(data.len())),
            "FLUSHDB" | "FLUSHALL" => {
                data.clear();
                Reply::Ok
            }
            other => Reply::Error(format!("ERR unknown command '{other}'")),
        }
    }
}

fn wrong_arity(command: &Command) -> Reply {
    Reply::Error(format!(
        "ERR wrong number of arguments for '{}' command",
        command.name().to_lowercase()
    ))
}

fn count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

#[async_trait]
impl Transport for MemoryTransport {
    type Connection = MemoryConnection;

    async fn connect(&self) -> Result<Self::Connection, TransportError> {
        self.simulate_latency().await;
        if self.backend.offline.load(Ordering::Acquire) {
            return Err(TransportError::Connect("memory backend offline".to_string()));
        }
        if self.take_connect_failure() {
            return Err(TransportError::Connect("injected connect failure".to_string()));
        }
        self.backend.connects.fetch_add(1, Ordering::AcqRel);
        Ok(MemoryConnection {
            id: self.backend.next_connection.fetch_add(1, Ordering::AcqRel),
            generation: self.backend.generation.load(Ordering::Acquire),
        })
    }

    async fn execute(
        &self,
        conn: &mut Self::Connection,
        command: &Command,
    ) -> Result<Reply, TransportError> {
        self.simulate_latency().await;
        if self.is_broken(conn) {
            return Err(TransportError::Io(format!(
                "connection {} reset by peer",
                conn.id
            )));
        }
        self.backend.commands.fetch_add(1, Ordering::AcqRel);
        Ok(self.apply(command))
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> bool {
        !self.is_broken(conn)
    }

    async fn close(&self, conn: Self::Connection) {
        self.backend.closes.fetch_add(1, Ordering::AcqRel);
        drop(conn);
    }

    fn endpoint(&self) -> String {
        "memory".to_string()
    }
}
