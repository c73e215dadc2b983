//! The `queue` module defines the abstract [`RequestQueue`] contract and two
//! implementations: [`InMemoryQueue`] (a test double) and [`ListServerQueue`]
//! (the reference backing, a Redis list).
//!
//! The abstract contract (`spec.md` §4.2): `pop` never blocks and returns up
//! to `n` items oldest-first, decoding failures on individual entries are
//! dropped from the batch rather than failing the whole call, `push`
//! enqueues in the given order, and an inactive queue's `pop` always returns
//! empty regardless of contents.

use async_trait::async_trait;

use crate::error::EngineError;
use crate::item::RequestItem;

/// Abstract FIFO of encoded [`RequestItem`]s with batch pop and push.
#[async_trait]
pub trait RequestQueue: Send + Sync {
    /// Pops up to `n` items, oldest-first. Never blocks; returns an empty
    /// vector if the queue is empty or [`RequestQueue::is_active`] is
    /// `false`. A malformed individual entry is logged and dropped from the
    /// batch rather than failing the call.
    ///
    /// # Errors
    ///
    /// Only a backend-level failure (e.g. lost connection) returns `Err`;
    /// per-entry decode failures never do.
    async fn pop(&self, n: usize) -> Result<Vec<RequestItem>, EngineError>;

    /// Enqueues `items` in the given order.
    async fn push(&self, items: Vec<RequestItem>) -> Result<(), EngineError>;

    /// Removes all items under the current key.
    async fn clear(&self) -> Result<(), EngineError>;

    /// Toggles the active flag. While inactive, `pop` returns empty.
    async fn set_active(&self, active: bool);

    /// Whether the queue is currently active.
    async fn is_active(&self) -> bool;
}

/// An in-memory, single-process [`RequestQueue`] used for tests. Not a
/// production backing — nothing here is durable or shared across processes.
pub struct InMemoryQueue {
    items: tokio::sync::Mutex<std::collections::VecDeque<RequestItem>>,
    active: std::sync::atomic::AtomicBool,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self {
            items: tokio::sync::Mutex::new(std::collections::VecDeque::new()),
            active: std::sync::atomic::AtomicBool::new(true),
        }
    }
}

impl InMemoryQueue {
    /// Creates an empty, active queue.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RequestQueue for InMemoryQueue {
    async fn pop(&self, n: usize) -> Result<Vec<RequestItem>, EngineError> {
        if !self.is_active().await {
            return Ok(Vec::new());
        }
        let mut items = self.items.lock().await;
        let drain_count = n.min(items.len());
        Ok(items.drain(..drain_count).collect())
    }

    async fn push(&self, new_items: Vec<RequestItem>) -> Result<(), EngineError> {
        let mut items = self.items.lock().await;
        items.extend(new_items);
        Ok(())
    }

    async fn clear(&self) -> Result<(), EngineError> {
        self.items.lock().await.clear();
        Ok(())
    }

    async fn set_active(&self, active: bool) {
        self.active
            .store(active, std::sync::atomic::Ordering::SeqCst);
    }

    async fn is_active(&self) -> bool {
        self.active.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// Reference queue backing: a Redis list keyed by `queue_name`.
///
/// Mirrors the original `RedisRequestQueue`: `push` issues one `LPUSH` per
/// item (head-insert, preserving argument order), `pop` pipelines `n`
/// `RPOP`s in a single round trip (tail-remove, so the oldest pushed item is
/// popped first — FIFO), and `clear` issues `DEL`. Per `spec.md` §4.2, this
/// relies only on each individual tail-pop being atomic, not on
/// server-side atomicity across the whole batch.
pub struct ListServerQueue {
    connection: redis::aio::ConnectionManager,
    queue_name: String,
    active: std::sync::atomic::AtomicBool,
}

impl ListServerQueue {
    /// Connects to `redis_url` and binds to `queue_name`.
    pub async fn connect(redis_url: &str, queue_name: impl Into<String>) -> Result<Self, EngineError> {
        let client = redis::Client::open(redis_url)?;
        let connection = client.get_connection_manager().await?;
        Ok(Self {
            connection,
            queue_name: queue_name.into(),
            active: std::sync::atomic::AtomicBool::new(true),
        })
    }
}

#[async_trait]
impl RequestQueue for ListServerQueue {
    async fn pop(&self, n: usize) -> Result<Vec<RequestItem>, EngineError> {
        use redis::AsyncCommands;

        if !self.is_active().await {
            return Ok(Vec::new());
        }
        if n == 0 {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for _ in 0..n {
            pipe.rpop(&self.queue_name, None);
        }
        let mut conn = self.connection.clone();
        let raw: Vec<Option<Vec<u8>>> = pipe.query_async(&mut conn).await?;

        let mut items = Vec::with_capacity(raw.len());
        for entry in raw.into_iter().flatten() {
            match RequestItem::decode(&entry) {
                Ok(item) => items.push(item),
                Err(e) => {
                    let e = EngineError::QueueDecode(e.to_string());
                    log::warn!("dropping malformed queue entry: {e}");
                }
            }
        }
        Ok(items)
    }

    async fn push(&self, new_items: Vec<RequestItem>) -> Result<(), EngineError> {
        use redis::AsyncCommands;

        if new_items.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection.clone();
        for item in new_items {
            let encoded = item.encode()?;
            conn.lpush::<_, _, ()>(&self.queue_name, encoded).await?;
        }
        Ok(())
    }

    async fn clear(&self) -> Result<(), EngineError> {
        use redis::AsyncCommands;
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(&self.queue_name).await?;
        Ok(())
    }

    async fn set_active(&self, active: bool) {
        self.active
            .store(active, std::sync::atomic::Ordering::SeqCst);
    }

    async fn is_active(&self) -> bool {
        self.active.load(std::sync::atomic::Ordering::SeqCst)
    }
}
