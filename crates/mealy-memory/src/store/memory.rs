//! In-process set store.
//!
//! Shares one keyspace between all connections, like a single Redis server.
//! Used by tests and by small runs that do not need an external store. Supports
//! failure injection so retry paths can be exercised deterministically: blanket
//! drops of the next commands, drops of one verb only, and lost replies where
//! the command is applied but the caller sees a transient error.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{Backend, Command, RawConnection, Reply};
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Default)]
struct Keyspace {
    sets: DashMap<String, BTreeSet<String>>,
    pending_failures: AtomicUsize,
    verb_failures: DashMap<&'static str, usize>,
    lost_replies: DashMap<&'static str, usize>,
    commands: AtomicU64,
}

/// Shared in-memory keyspace. Clones refer to the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    keyspace: Arc<Keyspace>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` commands fail with a transient error.
    pub fn inject_failures(&self, count: usize) {
        self.keyspace
            .pending_failures
            .fetch_add(count, Ordering::SeqCst);
    }

    /// Make the next `count` commands with `verb` (e.g. `"EXISTS"`) fail with a
    /// transient error before they are applied.
    pub fn inject_verb_failures(&self, verb: &'static str, count: usize) {
        let mut pending = self.keyspace.verb_failures.entry(verb).or_default();
        *pending = pending.saturating_add(count);
    }

    /// Apply the next `count` commands with `verb`, then report a transient
    /// error as if the reply had been lost.
    pub fn inject_lost_replies(&self, verb: &'static str, count: usize) {
        let mut pending = self.keyspace.lost_replies.entry(verb).or_default();
        *pending = pending.saturating_add(count);
    }

    /// Blanket injected failures not yet consumed.
    pub fn pending_failures(&self) -> usize {
        self.keyspace.pending_failures.load(Ordering::SeqCst)
    }

    /// Commands executed successfully so far.
    pub fn command_count(&self) -> u64 {
        self.keyspace.commands.load(Ordering::Relaxed)
    }

    /// Copy of the set stored at `key`; empty if absent.
    pub fn snapshot(&self, key: &str) -> HashSet<String> {
        self.keyspace
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// All keys currently present, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .keyspace
            .sets
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// Number of keys currently present.
    pub fn key_count(&self) -> usize {
        self.keyspace.sets.len()
    }

    fn take_failure(&self, command: &Command) -> bool {
        self.keyspace
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
            || take_for(&self.keyspace.verb_failures, command)
    }

    fn apply(&self, command: &Command) -> Reply {
        let sets = &self.keyspace.sets;
        match command {
            Command::SAdd { key, member } => {
                let added = sets.entry(key.clone()).or_default().insert(member.clone());
                Reply::Integer(added as i64)
            }
            Command::SScan { key, cursor, count } => {
                let Some(set) = sets.get(key) else {
                    return Reply::Scan {
                        cursor: 0,
                        members: Vec::new(),
                    };
                };
                // The cursor is an offset into the ordered set.
                let start = (*cursor as usize).min(set.len());
                let batch: Vec<String> = set
                    .iter()
                    .skip(start)
                    .take((*count).max(1))
                    .cloned()
                    .collect();
                let end = start + batch.len();
                let next = if end >= set.len() { 0 } else { end as u64 };
                Reply::Scan {
                    cursor: next,
                    members: batch,
                }
            }
            Command::SInterStore { dest, left, right } => {
                let left_set = sets.get(left).map(|set| set.clone()).unwrap_or_default();
                let result: BTreeSet<String> = match sets.get(right) {
                    Some(right_set) => left_set
                        .into_iter()
                        .filter(|member| right_set.contains(member))
                        .collect(),
                    None => BTreeSet::new(),
                };
                let size = result.len() as i64;
                sets.remove(dest);
                if !result.is_empty() {
                    sets.insert(dest.clone(), result);
                }
                Reply::Integer(size)
            }
            Command::Exists { key } => {
                let exists = sets.get(key).is_some_and(|set| !set.is_empty());
                Reply::Integer(exists as i64)
            }
            Command::Del { key } => Reply::Integer(sets.remove(key).is_some() as i64),
        }
    }
}

fn take_for(pending: &DashMap<&'static str, usize>, command: &Command) -> bool {
    match pending.get_mut(command.verb()) {
        Some(mut left) if *left > 0 => {
            *left -= 1;
            true
        }
        _ => false,
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    type Connection = MemoryConnection;

    async fn connect(&self) -> StoreResult<MemoryConnection> {
        Ok(MemoryConnection {
            backend: self.clone(),
        })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Connection to a [`MemoryBackend`].
#[derive(Debug)]
pub struct MemoryConnection {
    backend: MemoryBackend,
}

#[async_trait]
impl RawConnection for MemoryConnection {
    async fn execute(&mut self, command: &Command) -> StoreResult<Reply> {
        if self.backend.take_failure(command) {
            return Err(transient(command, "injected connection drop"));
        }
        let reply = self.backend.apply(command);
        self.backend.keyspace.commands.fetch_add(1, Ordering::Relaxed);
        if take_for(&self.backend.keyspace.lost_replies, command) {
            return Err(transient(command, "injected lost reply"));
        }
        Ok(reply)
    }
}

fn transient(command: &Command, message: &str) -> StoreError {
    StoreError::Transient {
        command: command.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run(conn: &mut MemoryConnection, command: Command) -> Reply {
        conn.execute(&command).await.unwrap()
    }

    fn sadd(key: &str, member: &str) -> Command {
        Command::SAdd {
            key: key.into(),
            member: member.into(),
        }
    }

    #[tokio::test]
    async fn test_sadd_is_idempotent() {
        let backend = MemoryBackend::new();
        let mut conn = backend.connect().await.unwrap();

        assert_eq!(run(&mut conn, sadd("k", "a")).await, Reply::Integer(1));
        assert_eq!(run(&mut conn, sadd("k", "a")).await, Reply::Integer(0));
        assert_eq!(backend.snapshot("k").len(), 1);
        assert_eq!(backend.command_count(), 2);
    }

    #[tokio::test]
    async fn test_sscan_visits_every_member_once() {
        let backend = MemoryBackend::new();
        let mut conn = backend.connect().await.unwrap();
        for i in 0..10 {
            run(&mut conn, sadd("k", &format!("m{i}"))).await;
        }

        let mut seen = Vec::new();
        let mut cursor = 0;
        loop {
            let reply = run(
                &mut conn,
                Command::SScan {
                    key: "k".into(),
                    cursor,
                    count: 3,
                },
            )
            .await;
            let Reply::Scan { cursor: next, members } = reply else {
                panic!("expected scan reply");
            };
            seen.extend(members);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 10);
    }

    #[tokio::test]
    async fn test_sscan_missing_key_ends_immediately() {
        let backend = MemoryBackend::new();
        let mut conn = backend.connect().await.unwrap();

        let reply = run(
            &mut conn,
            Command::SScan {
                key: "nope".into(),
                cursor: 0,
                count: 4,
            },
        )
        .await;
        assert_eq!(
            reply,
            Reply::Scan {
                cursor: 0,
                members: vec![]
            }
        );
    }

    #[tokio::test]
    async fn test_sinterstore_replaces_destination() {
        let backend = MemoryBackend::new();
        let mut conn = backend.connect().await.unwrap();
        run(&mut conn, sadd("a", "x")).await;
        run(&mut conn, sadd("a", "y")).await;
        run(&mut conn, sadd("b", "y")).await;
        run(&mut conn, sadd("dest", "stale")).await;

        let stored = run(
            &mut conn,
            Command::SInterStore {
                dest: "dest".into(),
                left: "a".into(),
                right: "b".into(),
            },
        )
        .await;
        assert_eq!(stored, Reply::Integer(1));
        assert_eq!(backend.snapshot("dest"), HashSet::from(["y".to_string()]));

        let empty = run(
            &mut conn,
            Command::SInterStore {
                dest: "dest".into(),
                left: "a".into(),
                right: "missing".into(),
            },
        )
        .await;
        assert_eq!(empty, Reply::Integer(0));
        let exists = run(&mut conn, Command::Exists { key: "dest".into() }).await;
        assert_eq!(exists, Reply::Integer(0));
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let backend = MemoryBackend::new();
        let mut conn = backend.connect().await.unwrap();
        backend.inject_failures(1);

        let err = conn.execute(&sadd("k", "a")).await.unwrap_err();
        assert!(err.is_transient());
        assert!(backend.snapshot("k").is_empty());
        assert_eq!(run(&mut conn, sadd("k", "a")).await, Reply::Integer(1));
    }

    #[tokio::test]
    async fn test_verb_failures_hit_only_that_verb() {
        let backend = MemoryBackend::new();
        let mut conn = backend.connect().await.unwrap();
        backend.inject_verb_failures("EXISTS", 1);

        assert_eq!(run(&mut conn, sadd("k", "a")).await, Reply::Integer(1));
        let err = conn
            .execute(&Command::Exists { key: "k".into() })
            .await
            .unwrap_err();
        assert!(err.is_transient());
        let exists = run(&mut conn, Command::Exists { key: "k".into() }).await;
        assert_eq!(exists, Reply::Integer(1));
    }

    #[tokio::test]
    async fn test_lost_reply_still_applies_the_command() {
        let backend = MemoryBackend::new();
        let mut conn = backend.connect().await.unwrap();
        backend.inject_lost_replies("SADD", 1);

        assert!(conn.execute(&sadd("k", "a")).await.is_err());
        assert_eq!(backend.snapshot("k").len(), 1);
        assert_eq!(run(&mut conn, sadd("k", "a")).await, Reply::Integer(0));
    }

    #[tokio::test]
    async fn test_del_and_keys() {
        let backend = MemoryBackend::new();
        let mut conn = backend.connect().await.unwrap();
        run(&mut conn, sadd("b", "1")).await;
        run(&mut conn, sadd("a", "1")).await;

        assert_eq!(backend.keys(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(run(&mut conn, Command::Del { key: "a".into() }).await, Reply::Integer(1));
        assert_eq!(run(&mut conn, Command::Del { key: "a".into() }).await, Reply::Integer(0));
        assert_eq!(backend.key_count(), 1);
    }
}
