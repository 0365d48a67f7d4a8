use std::collections::VecDeque;

use async_trait::async_trait;
use dashmap::DashMap;

use super::StorageBackend;
use crate::core::error::StorageResult;
use crate::core::message::Message;

#[derive(Debug)]
struct Entry {
    score: f64,
    message: Message,
}

/// In-process pending store: one ordered list per queue.
///
/// Insertion walks to the first entry with a strictly lower score, so equal
/// scores keep arrival order. Nothing here ever blocks on I/O.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    queues: DashMap<String, VecDeque<Entry>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            queues: DashMap::new(),
        }
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn insert(&self, queue: &str, message: Message, score: f64) -> StorageResult<()> {
        let mut list = self.queues.entry(queue.to_string()).or_default();
        let pos = list
            .iter()
            .position(|e| e.score < score)
            .unwrap_or(list.len());
        list.insert(pos, Entry { score, message });
        Ok(())
    }

    async fn push_front(&self, queue: &str, message: Message, score: f64) -> StorageResult<()> {
        let mut list = self.queues.entry(queue.to_string()).or_default();
        let score = list.front().map_or(score, |head| head.score.max(score));
        list.push_front(Entry { score, message });
        Ok(())
    }

    async fn peek(&self, queue: &str) -> StorageResult<Option<Message>> {
        Ok(self
            .queues
            .get(queue)
            .and_then(|list| list.front().map(|e| e.message.clone())))
    }

    async fn extract_highest_priority(&self, queue: &str) -> StorageResult<Option<Message>> {
        Ok(self
            .queues
            .get_mut(queue)
            .and_then(|mut list| list.pop_front().map(|e| e.message)))
    }

    async fn size(&self, queue: &str) -> StorageResult<usize> {
        Ok(self.queues.get(queue).map_or(0, |list| list.len()))
    }

    async fn evict_oldest(&self, queue: &str) -> StorageResult<Option<Message>> {
        let Some(mut list) = self.queues.get_mut(queue) else {
            return Ok(None);
        };
        let oldest = list
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| e.message.timestamp)
            .map(|(i, _)| i);
        Ok(oldest.and_then(|i| list.remove(i)).map(|e| e.message))
    }

    async fn purge(&self, queue: &str) -> StorageResult<usize> {
        Ok(self.queues.remove(queue).map_or(0, |(_, list)| list.len()))
    }

    async fn list(&self, queue: &str, limit: usize) -> StorageResult<Vec<Message>> {
        Ok(self.queues.get(queue).map_or_else(Vec::new, |list| {
            list.iter().take(limit).map(|e| e.message.clone()).collect()
        }))
    }

    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}
