//! Redis-backed set store.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, RedisError};
use tracing::debug;

use super::{Backend, Command, RawConnection, Reply};
use crate::error::{StoreError, StoreResult};

/// Opens multiplexed connections to one Redis server.
#[derive(Debug, Clone)]
pub struct RedisBackend {
    client: Client,
}

impl RedisBackend {
    /// Validate `url` and build a backend. No connection is made yet.
    pub fn open(url: &str) -> StoreResult<Self> {
        let client = Client::open(url).map_err(|err| StoreError::Connect {
            backend: "redis",
            message: err.to_string(),
        })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Backend for RedisBackend {
    type Connection = RedisConnection;

    async fn connect(&self) -> StoreResult<RedisConnection> {
        let inner = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|err| StoreError::Connect {
                backend: "redis",
                message: err.to_string(),
            })?;
        debug!(addr = ?self.client.get_connection_info().addr, "redis_connected");
        Ok(RedisConnection { inner })
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// One multiplexed Redis connection.
pub struct RedisConnection {
    inner: MultiplexedConnection,
}

#[async_trait]
impl RawConnection for RedisConnection {
    async fn execute(&mut self, command: &Command) -> StoreResult<Reply> {
        let conn = &mut self.inner;
        let fail = |err: RedisError| classify(command, err);

        match command {
            Command::SAdd { key, member } => {
                let added: i64 = redis::cmd("SADD")
                    .arg(key)
                    .arg(member)
                    .query_async(conn)
                    .await
                    .map_err(fail)?;
                Ok(Reply::Integer(added))
            }
            Command::SScan { key, cursor, count } => {
                let (cursor, members): (u64, Vec<String>) = redis::cmd("SSCAN")
                    .arg(key)
                    .arg(*cursor)
                    .arg("COUNT")
                    .arg(*count)
                    .query_async(conn)
                    .await
                    .map_err(fail)?;
                Ok(Reply::Scan { cursor, members })
            }
            Command::SInterStore { dest, left, right } => {
                let size: i64 = redis::cmd("SINTERSTORE")
                    .arg(dest)
                    .arg(left)
                    .arg(right)
                    .query_async(conn)
                    .await
                    .map_err(fail)?;
                Ok(Reply::Integer(size))
            }
            Command::Exists { key } => {
                let exists: i64 = redis::cmd("EXISTS")
                    .arg(key)
                    .query_async(conn)
                    .await
                    .map_err(fail)?;
                Ok(Reply::Integer(exists))
            }
            Command::Del { key } => {
                let removed: i64 = redis::cmd("DEL")
                    .arg(key)
                    .query_async(conn)
                    .await
                    .map_err(fail)?;
                Ok(Reply::Integer(removed))
            }
        }
    }
}

/// Connection-level failures are worth a reconnect; server errors are not.
fn classify(command: &Command, err: RedisError) -> StoreError {
    let transient = err.is_io_error()
        || err.is_connection_dropped()
        || err.is_timeout()
        || err.is_connection_refusal();

    if transient {
        StoreError::Transient {
            command: command.to_string(),
            message: err.to_string(),
        }
    } else {
        StoreError::Rejected {
            command: command.to_string(),
            message: err.to_string(),
        }
    }
}
