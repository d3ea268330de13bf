//! # kvrelay Domain Model
//!
//! Value types shared by every layer of the client-side resource manager:
//! the commands sent to the remote key-value store, the replies it sends
//! back, and the lifecycle states of a pooled connection.
//!
//! These types carry no behaviour beyond validation and inspection. The
//! cache, the pool and the facade all agree on them, and nothing here
//! depends on a particular transport.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// COMMANDS
// =============================================================================

/// A single command addressed to the backing store.
///
/// The verb is normalised to upper case on construction so that policy
/// lookups (`GET`, `get`, `Get`) all agree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Command {
    name: String,
    args: Vec<String>,
}

impl Command {
    /// Create a command with no arguments.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self {
            name: name.as_ref().trim().to_ascii_uppercase(),
            args: Vec::new(),
        }
    }

    /// Create a command from a verb and an argument list.
    pub fn with_args<I, S>(name: impl AsRef<str>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.as_ref().trim().to_ascii_uppercase(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Upper-cased verb.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// The store key this command addresses, by convention its first argument.
    pub fn key(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }

    /// Whether the verb matches `name`, ignoring case.
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

// =============================================================================
// REPLIES
// =============================================================================

/// Reply returned by the backing store for one command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reply {
    /// Key absent / null reply
    Nil,
    /// Plain acknowledgement (`+OK`)
    Ok,
    Int(i64),
    Double(f64),
    /// Binary-safe string
    Bulk(Vec<u8>),
    /// Status string other than `OK`
    Simple(String),
    Array(Vec<Reply>),
    /// Error reported by the server for this command
    Error(String),
}

impl Reply {
    pub const fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Borrow the payload of a bulk or simple string reply.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bulk(bytes) => Some(bytes),
            Self::Simple(text) => Some(text.as_bytes()),
            _ => None,
        }
    }

    /// Borrow the payload as UTF-8 text, if it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|bytes| std::str::from_utf8(bytes).ok())
    }

    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Convenience constructor for a bulk string reply.
    pub fn bulk(value: impl Into<Vec<u8>>) -> Self {
        Self::Bulk(value.into())
    }
}

// =============================================================================
// CONNECTION LIFECYCLE
// =============================================================================

/// Lifecycle state of a pooled connection.
///
/// ```text
/// Idle ──acquire──▶ Active ──release──▶ Validating ──ok──▶ Idle
///                     │                     │
///                     └──── fatal ──▶ Closed ◀── failed ┘
/// ```
///
/// `Closed` is terminal; every state may move to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Idle,
    Active,
    Validating,
    Closed,
}

impl ConnectionState {
    /// Whether `self -> next` is an edge of the state machine.
    pub const fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::{Active, Closed, Idle, Validating};
        matches!(
            (self, next),
            (Idle, Active)
                | (Active, Idle)
                | (Active, Validating)
                | (Validating, Idle)
                | (Validating, Closed)
                | (Idle | Active, Closed)
        )
    }

    /// Move to `next`, rejecting edges that are not in the state machine.
    ///
    /// # Errors
    ///
    /// Returns [`StateTransitionError`] when the edge does not exist, which
    /// always includes any transition out of `Closed`.
    pub fn transition(&mut self, next: Self) -> Result<(), StateTransitionError> {
        if !self.can_transition_to(next) {
            return Err(StateTransitionError {
                from: *self,
                to: next,
            });
        }
        *self = next;
        Ok(())
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Validating => "validating",
            Self::Closed => "closed",
        };
        f.write_str(label)
    }
}

/// Attempted an edge that the connection state machine does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid connection state transition: {from} -> {to}")]
pub struct StateTransitionError {
    pub from: ConnectionState,
    pub to: ConnectionState,
}
