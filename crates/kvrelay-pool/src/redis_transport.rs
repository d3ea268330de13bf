//! Redis transport over multiplexed async connections.

use async_trait::async_trait;
use kvrelay_domain::{Command, Reply};
use redis::aio::MultiplexedConnection;
use redis::{Client, RedisResult, Value};
use tracing::debug;

use crate::error::TransportError;
use crate::transport::Transport;

/// [`Transport`] speaking RESP to a Redis-compatible server.
pub struct RedisTransport {
    client: Client,
    endpoint: String,
}

impl RedisTransport {
    /// Create a transport for `url` (`redis://host:port/db`).
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connect`] if the URL cannot be parsed.
    pub fn new(url: &str) -> Result<Self, TransportError> {
        let client = Client::open(url).map_err(|e| TransportError::Connect(e.to_string()))?;
        let endpoint = client.get_connection_info().addr.to_string();
        debug!(endpoint = %endpoint, "Created Redis transport");
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl Transport for RedisTransport {
    type Connection = MultiplexedConnection;

    async fn connect(&self) -> Result<Self::Connection, TransportError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))
    }

    async fn execute(
        &self,
        conn: &mut Self::Connection,
        command: &Command,
    ) -> Result<Reply, TransportError> {
        let mut cmd = redis::cmd(command.name());
        for arg in command.args() {
            cmd.arg(arg.as_str());
        }

        let result: RedisResult<Value> = cmd.query_async(conn).await;
        match result {
            Ok(value) => Ok(reply_from_value(value)),
            // Error replies from the server are data, not transport failures.
            Err(err) if err.code().is_some() => Ok(Reply::Error(err.to_string())),
            Err(err) => Err(TransportError::from(err)),
        }
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> bool {
        let pong: RedisResult<String> = redis::cmd("PING").query_async(conn).await;
        pong.is_ok()
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }
}

fn reply_from_value(value: Value) -> Reply {
    match value {
        Value::Nil => Reply::Nil,
        Value::Okay => Reply::Ok,
        Value::Int(n) => Reply::Int(n),
        Value::Double(d) => Reply::Double(d),
        Value::Boolean(b) => Reply::Int(i64::from(b)),
        Value::BulkString(bytes) => Reply::Bulk(bytes),
        Value::SimpleString(text) => Reply::Simple(text),
        Value::VerbatimString { text, .. } => Reply::Simple(text),
        Value::Array(items) | Value::Set(items) => {
            Reply::Array(items.into_iter().map(reply_from_value).collect())
        }
        Value::Map(pairs) => Reply::Array(
            pairs
                .into_iter()
                .flat_map(|(k, v)| [reply_from_value(k), reply_from_value(v)])
                .collect(),
        ),
        other => Reply::Simple(format!("{other:?}")),
    }
}
