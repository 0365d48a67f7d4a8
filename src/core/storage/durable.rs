use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::debug;

use super::StorageBackend;
use crate::core::error::{StorageError, StorageResult};
use crate::core::message::Message;

/// Durable pending store backed by one Redis sorted set per queue.
///
/// Members are encoded messages, scores their ordering score. `ZPOPMAX`
/// returns the highest score; ties come back in member order, not arrival
/// order.
pub struct RedisStorage {
    conn: MultiplexedConnection,
    key_prefix: String,
    closed: AtomicBool,
}

impl RedisStorage {
    /// Opens a multiplexed connection and verifies it with `PING`.
    pub async fn connect(url: &str, key_prefix: &str, timeout: Duration) -> StorageResult<Self> {
        let client = redis::Client::open(url)?;
        let mut conn = tokio::time::timeout(timeout, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| StorageError::Unavailable(format!("connect to {url} timed out")))??;

        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        debug!(url, "Redis storage connection established");

        Ok(Self {
            conn,
            key_prefix: key_prefix.to_string(),
            closed: AtomicBool::new(false),
        })
    }

    fn key(&self, queue: &str) -> String {
        format!("{}{}", self.key_prefix, queue)
    }

    fn conn(&self) -> StorageResult<MultiplexedConnection> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Unavailable("connection closed".into()));
        }
        Ok(self.conn.clone())
    }

    async fn top(&self, key: &str) -> StorageResult<Option<(Vec<u8>, f64)>> {
        let mut conn = self.conn()?;
        let top: Vec<(Vec<u8>, f64)> = conn.zrevrange_withscores(key, 0, 0).await?;
        Ok(top.into_iter().next())
    }
}

#[async_trait]
impl StorageBackend for RedisStorage {
    async fn insert(&self, queue: &str, message: Message, score: f64) -> StorageResult<()> {
        let mut conn = self.conn()?;
        let _: () = conn.zadd(self.key(queue), message.encode(), score).await?;
        Ok(())
    }

    async fn push_front(&self, queue: &str, message: Message, score: f64) -> StorageResult<()> {
        let key = self.key(queue);
        let score = match self.top(&key).await? {
            Some((_, head)) if head >= score => head + 1.0,
            _ => score,
        };
        let mut conn = self.conn()?;
        let _: () = conn.zadd(key, message.encode(), score).await?;
        Ok(())
    }

    async fn peek(&self, queue: &str) -> StorageResult<Option<Message>> {
        match self.top(&self.key(queue)).await? {
            Some((raw, _)) => Ok(Some(Message::decode(&raw)?)),
            None => Ok(None),
        }
    }

    async fn extract_highest_priority(&self, queue: &str) -> StorageResult<Option<Message>> {
        let mut conn = self.conn()?;
        let popped: Vec<(Vec<u8>, f64)> = conn.zpopmax(self.key(queue), 1).await?;
        match popped.into_iter().next() {
            Some((raw, _)) => Ok(Some(Message::decode(&raw)?)),
            None => Ok(None),
        }
    }

    async fn size(&self, queue: &str) -> StorageResult<usize> {
        let mut conn = self.conn()?;
        let n: usize = conn.zcard(self.key(queue)).await?;
        Ok(n)
    }

    async fn evict_oldest(&self, queue: &str) -> StorageResult<Option<Message>> {
        let key = self.key(queue);
        let mut conn = self.conn()?;
        let members: Vec<Vec<u8>> = conn.zrange(&key, 0, -1).await?;

        let mut oldest: Option<(Vec<u8>, Message)> = None;
        for raw in members {
            let message = Message::decode(&raw)?;
            if oldest
                .as_ref()
                .map_or(true, |(_, o)| message.timestamp < o.timestamp)
            {
                oldest = Some((raw, message));
            }
        }

        let Some((raw, message)) = oldest else {
            return Ok(None);
        };
        let removed: usize = conn.zrem(&key, raw).await?;
        Ok((removed > 0).then_some(message))
    }

    async fn purge(&self, queue: &str) -> StorageResult<usize> {
        let key = self.key(queue);
        let mut conn = self.conn()?;
        let n: usize = conn.zcard(&key).await?;
        let _: () = conn.del(&key).await?;
        Ok(n)
    }

    async fn list(&self, queue: &str, limit: usize) -> StorageResult<Vec<Message>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn()?;
        let stop = isize::try_from(limit).unwrap_or(isize::MAX) - 1;
        let members: Vec<Vec<u8>> = conn.zrevrange(self.key(queue), 0, stop).await?;
        members.iter().map(|raw| Message::decode(raw)).collect()
    }

    async fn close(&self) -> StorageResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "redis"
    }
}
