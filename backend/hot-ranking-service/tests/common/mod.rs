//! In-process fakes for the broker commit path and the shared cache tier.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hot_ranking::consumers::{ConsumedMessage, MessageHandler, OffsetCommitter};
use hot_ranking::models::{Item, ItemStatus};
use hot_ranking::cache::{CachedRanking, RemoteTier};
use hot_ranking::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Records every committed (topic, partition, next offset).
#[derive(Default)]
pub struct RecordingCommitter {
    commits: Mutex<Vec<(String, i32, i64)>>,
}

impl RecordingCommitter {
    pub fn commits(&self) -> Vec<(String, i32, i64)> {
        self.commits.lock().unwrap().clone()
    }

    pub fn last_offset(&self, topic: &str, partition: i32) -> Option<i64> {
        self.commits
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, p, _)| t == topic && *p == partition)
            .map(|(_, _, offset)| *offset)
            .last()
    }
}

impl OffsetCommitter for RecordingCommitter {
    fn commit(&self, topic: &str, partition: i32, next_offset: i64) -> Result<()> {
        self.commits
            .lock()
            .unwrap()
            .push((topic.to_string(), partition, next_offset));
        Ok(())
    }
}

/// Shared tier backed by a map; can be switched to refuse connections.
#[derive(Default)]
pub struct InMemoryRemoteTier {
    entries: Mutex<HashMap<String, CachedRanking>>,
    down: AtomicBool,
}

impl InMemoryRemoteTier {
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            let err = redis::RedisError::from((redis::ErrorKind::IoError, "connection refused"));
            return Err(err.into());
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteTier for InMemoryRemoteTier {
    async fn load(&self, key: &str) -> Result<Option<CachedRanking>> {
        self.check()?;
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn store(&self, key: &str, snapshot: &CachedRanking, _ttl: Duration) -> Result<()> {
        self.check()?;
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), snapshot.clone());
        Ok(())
    }
}

/// Counts calls before delegating.
pub struct CountingHandler {
    inner: Arc<dyn MessageHandler>,
    calls: AtomicU32,
}

impl CountingHandler {
    pub fn new(inner: Arc<dyn MessageHandler>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageHandler for CountingHandler {
    async fn handle(&self, message: &ConsumedMessage) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.handle(message).await
    }
}

pub fn published_item(id: i64, at: DateTime<Utc>) -> Item {
    Item {
        id,
        author_id: 100 + id,
        title: format!("post {}", id),
        status: ItemStatus::Published,
        created_at: at,
        updated_at: at,
    }
}

pub fn message(topic: &str, partition: i32, offset: i64, payload: &str) -> ConsumedMessage {
    ConsumedMessage {
        topic: topic.to_string(),
        partition,
        offset,
        key: None,
        payload: Some(payload.as_bytes().to_vec()),
        headers: Vec::new(),
    }
}

pub fn dead_letter(original_topic: &str, offset: i64, payload: &str) -> ConsumedMessage {
    let mut msg = message(&format!("{}_dlq", original_topic), 0, offset, payload);
    msg.headers = vec![
        ("original_topic".to_string(), original_topic.as_bytes().to_vec()),
        ("failure_count".to_string(), b"1".to_vec()),
    ];
    msg
}
