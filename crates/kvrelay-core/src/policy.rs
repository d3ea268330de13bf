//! # Command Policy
//!
//! Decides how the facade treats each command:
//!
//! - **Cacheable**: idempotent keyed reads answered through the cache
//! - **Passthrough**: read-only or administrative verbs that bypass it
//! - **Write**: anything else; the keys it touches are invalidated
//! - **WriteUnscoped**: a write whose keys cannot be told from its
//!   arguments (`EXEC`, a script with no declared keys); empties the cache
//! - **Flush**: `FLUSHDB` / `FLUSHALL`, which empty the whole cache
//!
//! Cached replies are stored under a key derived from the store key, the
//! verb and the remaining arguments. Every reply derived from one store key
//! shares the prefix returned by [`key_prefix`], so one write can drop them
//! all at once.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::time::Duration;

use kvrelay_domain::Command;
use serde::{Deserialize, Serialize};

const CACHEABLE: &[&str] = &[
    "GET", "HGET", "HGETALL", "HMGET", "LRANGE", "SMEMBERS", "ZRANGE", "STRLEN", "HLEN", "LLEN",
    "SCARD", "ZCARD",
];

const PASSTHROUGH: &[&str] = &[
    "PING", "INFO", "TTL", "PTTL", "TYPE", "EXISTS", "DBSIZE", "ECHO", "TIME", "SCAN", "KEYS",
];

const FLUSH: &[&str] = &["FLUSHDB", "FLUSHALL"];

/// How the facade routes one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandClass {
    Cacheable { cache_key: String },
    Passthrough,
    Write { keys: Vec<String> },
    WriteUnscoped,
    Flush,
}

/// Cache eligibility and natural TTLs per verb.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandPolicy {
    /// Verbs whose replies may be cached
    pub cacheable: BTreeSet<String>,

    /// Verbs that neither read from nor invalidate the cache
    pub passthrough: BTreeSet<String>,

    /// TTL for cached replies of a verb; verbs without one use the cache default
    pub ttls: BTreeMap<String, Duration>,
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self {
            cacheable: CACHEABLE.iter().map(|v| (*v).to_string()).collect(),
            passthrough: PASSTHROUGH.iter().map(|v| (*v).to_string()).collect(),
            ttls: BTreeMap::new(),
        }
    }
}

impl CommandPolicy {
    /// Classify `command`.
    pub fn classify(&self, command: &Command) -> CommandClass {
        let verb = command.name();
        if FLUSH.contains(&verb) {
            return CommandClass::Flush;
        }
        if self.cacheable.contains(verb) {
            return cache_key(command).map_or(CommandClass::Passthrough, |cache_key| {
                CommandClass::Cacheable { cache_key }
            });
        }
        if self.passthrough.contains(verb) {
            return CommandClass::Passthrough;
        }
        affected_keys(command)
            .map_or(CommandClass::WriteUnscoped, |keys| CommandClass::Write { keys })
    }

    pub fn is_cacheable(&self, verb: &str) -> bool {
        self.cacheable.contains(&verb.to_ascii_uppercase())
    }

    /// Natural TTL for replies of `verb`, if one is configured.
    pub fn ttl_for(&self, verb: &str) -> Option<Duration> {
        self.ttls.get(&verb.to_ascii_uppercase()).copied()
    }

    /// Add `verb` to the cacheable set.
    #[must_use]
    pub fn allow(mut self, verb: &str) -> Self {
        let verb = verb.to_ascii_uppercase();
        self.passthrough.remove(&verb);
        self.cacheable.insert(verb);
        self
    }

    /// Stop caching `verb`; it is treated as a write from then on.
    #[must_use]
    pub fn deny(mut self, verb: &str) -> Self {
        self.cacheable.remove(&verb.to_ascii_uppercase());
        self
    }

    #[must_use]
    pub fn with_ttl(mut self, verb: &str, ttl: Duration) -> Self {
        self.ttls.insert(verb.to_ascii_uppercase(), ttl);
        self
    }

    /// Parse `VERB=millis` pairs separated by commas, e.g. `GET=30000,HGETALL=5000`.
    /// Malformed pairs are skipped.
    pub fn parse_ttls(pairs: &str) -> BTreeMap<String, Duration> {
        pairs.split(',')
            .filter_map(|pair| {
                let (verb, millis) = pair.split_once('=')?;
                let millis: u64 = millis.trim().parse().ok()?;
                let verb = verb.trim();
                (!verb.is_empty() && millis > 0)
                    .then(|| (verb.to_ascii_uppercase(), Duration::from_millis(millis)))
            })
            .collect()
    }

    /// Check for contradictory entries.
    ///
    /// # Errors
    ///
    /// Returns a description of the first problem found.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Some(verb) = self.cacheable.intersection(&self.passthrough).next() {
            return Err(format!("{verb} is both cacheable and passthrough"));
        }
        if let Some(verb) = self.cacheable.iter().find(|v| FLUSH.contains(&v.as_str())) {
            return Err(format!("{verb} cannot be cached"));
        }
        if let Some((verb, _)) = self.ttls.iter().find(|(_, ttl)| ttl.is_zero()) {
            return Err(format!("TTL for {verb} must be greater than 0"));
        }
        Ok(())
    }
}

/// Prefix shared by every cached reply derived from `key`.
///
/// Length-prefixed so that `user:1` never matches entries of `user:10`.
pub fn key_prefix(key: &str) -> String {
    format!("{}:{key}|", key.len())
}

/// Cache key for a keyed command, or `None` when it has no key.
pub fn cache_key(command: &Command) -> Option<String> {
    let key = command.key()?;
    let mut out = key_prefix(key);
    out.push_str(command.name());
    for arg in &command.args()[1..] {
        let _ = write!(out, "|{}:{arg}", arg.len());
    }
    Some(out)
}

/// Store keys a mutating command touches, or `None` when they cannot be
/// told from the arguments.
pub fn affected_keys(command: &Command) -> Option<Vec<String>> {
    let args = command.args();
    let keys = match command.name() {
        "DEL" | "UNLINK" => args.to_vec(),
        "MSET" | "MSETNX" => args.iter().step_by(2).cloned().collect(),
        "RENAME" | "RENAMENX" | "SMOVE" | "LMOVE" | "BLMOVE" | "RPOPLPUSH" | "BRPOPLPUSH"
        | "COPY" => args.iter().take(2).cloned().collect(),
        "BITOP" => args.get(1).cloned().into_iter().collect(),
        "BLPOP" | "BRPOP" | "BZPOPMIN" | "BZPOPMAX" => {
            args.split_last().map(|(_, keys)| keys.to_vec()).unwrap_or_default()
        }
        "EVAL" | "EVALSHA" | "FCALL" | "LMPOP" | "ZMPOP" => counted_keys(args, 1)?,
        "BLMPOP" | "BZMPOP" => counted_keys(args, 2)?,
        _ => args.first().cloned().into_iter().collect(),
    };
    (!keys.is_empty()).then_some(keys)
}

/// Keys following a `numkeys` argument at `count_at`.
fn counted_keys(args: &[String], count_at: usize) -> Option<Vec<String>> {
    let count: usize = args.get(count_at)?.parse().ok()?;
    let start = count_at + 1;
    args.get(start..start.checked_add(count)?).map(<[String]>::to_vec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_classification() {
        let policy = CommandPolicy::default();
        assert!(matches!(
            policy.classify(&Command::new("get").arg("user:1")),
            CommandClass::Cacheable { .. }
        ));
        assert_eq!(policy.classify(&Command::new("PING")), CommandClass::Passthrough);
        assert_eq!(
            policy.classify(&Command::new("EXISTS").arg("a")),
            CommandClass::Passthrough
        );
        assert_eq!(policy.classify(&Command::new("FLUSHALL")), CommandClass::Flush);
        assert_eq!(
            policy.classify(&Command::with_args("SET", ["k", "v"])),
            CommandClass::Write {
                keys: vec!["k".to_string()]
            }
        );
    }

    #[test]
    fn test_cacheable_without_key_is_passthrough() {
        let policy = CommandPolicy::default();
        assert_eq!(policy.classify(&Command::new("GET")), CommandClass::Passthrough);
    }

    fn keys_of(command: &Command) -> Vec<String> {
        affected_keys(command).unwrap_or_default()
    }

    #[test]
    fn test_multi_key_extraction() {
        assert_eq!(keys_of(&Command::with_args("DEL", ["a", "b", "c"])), vec!["a", "b", "c"]);
        assert_eq!(keys_of(&Command::with_args("MSET", ["a", "1", "b", "2"])), vec!["a", "b"]);
        assert_eq!(keys_of(&Command::with_args("RENAME", ["old", "new"])), vec!["old", "new"]);
        assert_eq!(keys_of(&Command::with_args("BLPOP", ["q1", "q2", "0"])), vec!["q1", "q2"]);
    }

    #[test]
    fn test_bitop_invalidates_destination() {
        let bitop = Command::with_args("BITOP", ["AND", "dest", "a", "b"]);
        assert_eq!(keys_of(&bitop), vec!["dest"]);
    }

    #[test]
    fn test_script_keys_follow_numkeys() {
        let eval = Command::with_args("EVAL", ["return 1", "2", "k1", "k2", "arg"]);
        assert_eq!(keys_of(&eval), vec!["k1", "k2"]);

        let fcall = Command::with_args("FCALL", ["bump", "1", "counter", "5"]);
        assert_eq!(keys_of(&fcall), vec!["counter"]);

        let blmpop = Command::with_args("BLMPOP", ["0", "2", "l1", "l2", "LEFT"]);
        assert_eq!(keys_of(&blmpop), vec!["l1", "l2"]);
    }

    #[test]
    fn test_undeclared_write_keys_are_unscoped() {
        let policy = CommandPolicy::default();
        for command in [
            Command::new("EXEC"),
            Command::with_args("EVAL", ["return 1", "0"]),
            Command::with_args("EVALSHA", ["abc", "many", "k"]),
            Command::with_args("EVAL", ["return 1", "3", "k1"]),
            Command::with_args("FCALL", ["bump", "18446744073709551615", "k"]),
        ] {
            assert_eq!(affected_keys(&command), None, "{}", command.name());
            assert_eq!(policy.classify(&command), CommandClass::WriteUnscoped);
        }
    }

    #[test]
    fn test_cache_keys_are_unambiguous() {
        let a = cache_key(&Command::with_args("HGET", ["h", "ab"])).unwrap();
        let b = cache_key(&Command::with_args("HGET", ["h|a", "b"])).unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with(&key_prefix("h")));
        assert!(!a.starts_with(&key_prefix("h|a")));

        let short = cache_key(&Command::new("GET").arg("user:1")).unwrap();
        assert!(!short.starts_with(&key_prefix("user:10")));
    }

    #[test]
    fn test_allow_deny_and_ttls() {
        let policy = CommandPolicy::default()
            .allow("type")
            .deny("GET")
            .with_ttl("hgetall", Duration::from_secs(5));

        assert!(policy.is_cacheable("TYPE"));
        assert!(!policy.passthrough.contains("TYPE"));
        assert!(!policy.is_cacheable("get"));
        assert_eq!(policy.ttl_for("HGETALL"), Some(Duration::from_secs(5)));
        assert_eq!(policy.ttl_for("GET"), None);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_parse_ttls_skips_malformed_pairs() {
        let ttls = CommandPolicy::parse_ttls("get=30000, HGETALL = 5000,bogus,LRANGE=0,x=abc");
        assert_eq!(ttls.len(), 2);
        assert_eq!(ttls["GET"], Duration::from_secs(30));
        assert_eq!(ttls["HGETALL"], Duration::from_secs(5));
    }

    #[test]
    fn test_validate_rejects_contradictions() {
        let mut policy = CommandPolicy::default();
        policy.passthrough.insert("GET".to_string());
        assert!(policy.validate().unwrap_err().contains("GET"));

        let policy = CommandPolicy::default().allow("FLUSHDB");
        assert!(policy.validate().is_err());
    }
}
