//! Set-store backends and the retrying connection wrapper.
//!
//! The engine needs exactly five set verbs:
//!
//! | Command        | Effect                                             |
//! |----------------|----------------------------------------------------|
//! | `SADD`         | add a member to a set; idempotent                  |
//! | `SSCAN`        | cursor batch iteration; cursor `0` ends the scan   |
//! | `SINTERSTORE`  | store the intersection of two sets at a key        |
//! | `EXISTS`       | non-zero iff the key holds a non-empty set         |
//! | `DEL`          | delete a key                                       |
//!
//! A [`Backend`] hands out raw connections; [`Connection`] wraps one with the
//! [`BackoffPolicy`] so callers see either a reply or a fatal error.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::retry::BackoffPolicy;

mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use memory::{MemoryBackend, MemoryConnection};
#[cfg(feature = "redis")]
pub use self::redis::{RedisBackend, RedisConnection};

/// A set command understood by every backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SAdd { key: String, member: String },
    SScan { key: String, cursor: u64, count: usize },
    SInterStore { dest: String, left: String, right: String },
    Exists { key: String },
    Del { key: String },
}

impl Command {
    /// Command verb as sent on the wire.
    pub fn verb(&self) -> &'static str {
        match self {
            Command::SAdd { .. } => "SADD",
            Command::SScan { .. } => "SSCAN",
            Command::SInterStore { .. } => "SINTERSTORE",
            Command::Exists { .. } => "EXISTS",
            Command::Del { .. } => "DEL",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::SAdd { key, member } => write!(f, "SADD {key} {member}"),
            Command::SScan { key, cursor, count } => {
                write!(f, "SSCAN {key} {cursor} COUNT {count}")
            }
            Command::SInterStore { dest, left, right } => {
                write!(f, "SINTERSTORE {dest} {left} {right}")
            }
            Command::Exists { key } => write!(f, "EXISTS {key}"),
            Command::Del { key } => write!(f, "DEL {key}"),
        }
    }
}

/// Reply to a [`Command`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Integer(i64),
    Scan { cursor: u64, members: Vec<String> },
}

impl Reply {
    fn into_integer(self, command: &Command) -> StoreResult<i64> {
        match self {
            Reply::Integer(value) => Ok(value),
            other => Err(unexpected(command, &other)),
        }
    }

    fn into_scan(self, command: &Command) -> StoreResult<(u64, Vec<String>)> {
        match self {
            Reply::Scan { cursor, members } => Ok((cursor, members)),
            other => Err(unexpected(command, &other)),
        }
    }
}

fn unexpected(command: &Command, reply: &Reply) -> StoreError {
    StoreError::UnexpectedReply {
        command: command.to_string(),
        reply: format!("{reply:?}"),
    }
}

/// A single connection to a set store.
///
/// Commands on one connection are serialized; workers each own one.
#[async_trait]
pub trait RawConnection: Send {
    /// Run one command. Dropped connections and timeouts must be reported as
    /// [`StoreError::Transient`] so the caller can reconnect.
    async fn execute(&mut self, command: &Command) -> StoreResult<Reply>;
}

/// A set store that can open connections.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    type Connection: RawConnection + 'static;

    /// Open a fresh connection.
    async fn connect(&self) -> StoreResult<Self::Connection>;

    /// Backend label used in logs.
    fn name(&self) -> &'static str;
}

/// A connection with bounded retry and reconnect.
pub struct Connection<B: Backend> {
    id: usize,
    backend: Arc<B>,
    raw: Option<B::Connection>,
    policy: BackoffPolicy,
}

impl<B: Backend> Connection<B> {
    /// Open connection number `id`.
    pub async fn open(id: usize, backend: Arc<B>, policy: BackoffPolicy) -> StoreResult<Self> {
        let raw = backend.connect().await?;
        debug!(connection = id, backend = backend.name(), "store_connection_open");
        Ok(Self {
            id,
            backend,
            raw: Some(raw),
            policy,
        })
    }

    /// Run a command, retrying transient failures with exponential backoff.
    ///
    /// Every failed attempt drops the raw connection so the next attempt
    /// reconnects. When the attempts run out the error names the command.
    pub async fn execute(&mut self, command: Command) -> StoreResult<Reply> {
        let attempts = self.policy.attempts();
        let mut attempt = 0;

        loop {
            match self.try_once(&command).await {
                Ok(reply) => return Ok(reply),
                Err(err) if err.is_transient() => {
                    attempt += 1;
                    if attempt >= attempts {
                        warn!(
                            connection = self.id,
                            command = %command,
                            attempt,
                            max_attempts = attempts,
                            error = %err,
                            "store_retries_exhausted"
                        );
                        return Err(StoreError::Exhausted {
                            command: command.to_string(),
                            attempts,
                            message: err.to_string(),
                        });
                    }

                    let delay = self.policy.delay(attempt - 1);
                    warn!(
                        connection = self.id,
                        command = %command,
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "store_retry"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn try_once(&mut self, command: &Command) -> StoreResult<Reply> {
        let mut raw = match self.raw.take() {
            Some(raw) => raw,
            None => self.backend.connect().await?,
        };
        let result = raw.execute(command).await;
        if !matches!(&result, Err(err) if err.is_transient()) {
            self.raw = Some(raw);
        }
        result
    }

    /// `SADD`; true if the member was new.
    pub async fn sadd(&mut self, key: &str, member: &str) -> StoreResult<bool> {
        let command = Command::SAdd {
            key: key.to_string(),
            member: member.to_string(),
        };
        Ok(self.execute(command.clone()).await?.into_integer(&command)? > 0)
    }

    /// `SSCAN`; returns the next cursor and a batch of members.
    pub async fn sscan(
        &mut self,
        key: &str,
        cursor: u64,
        count: usize,
    ) -> StoreResult<(u64, Vec<String>)> {
        let command = Command::SScan {
            key: key.to_string(),
            cursor,
            count,
        };
        self.execute(command.clone()).await?.into_scan(&command)
    }

    /// `SINTERSTORE`; returns the size of the stored intersection.
    pub async fn sinterstore(&mut self, dest: &str, left: &str, right: &str) -> StoreResult<u64> {
        let command = Command::SInterStore {
            dest: dest.to_string(),
            left: left.to_string(),
            right: right.to_string(),
        };
        let size = self.execute(command.clone()).await?.into_integer(&command)?;
        Ok(size.max(0) as u64)
    }

    /// `EXISTS`.
    pub async fn exists(&mut self, key: &str) -> StoreResult<bool> {
        let command = Command::Exists {
            key: key.to_string(),
        };
        Ok(self.execute(command.clone()).await?.into_integer(&command)? > 0)
    }

    /// `DEL`; true if the key existed.
    pub async fn del(&mut self, key: &str) -> StoreResult<bool> {
        let command = Command::Del {
            key: key.to_string(),
        };
        Ok(self.execute(command.clone()).await?.into_integer(&command)? > 0)
    }
}

impl<B: Backend> fmt::Debug for Connection<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("backend", &self.backend.name())
            .field("connected", &self.raw.is_some())
            .finish()
    }
}
