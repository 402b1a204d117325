//! # Consumer Registry
//!
//! Tracks the consumers subscribed to each queue and picks which one receives
//! the next message.
//!
//! ## Overview
//!
//! Every queue has an ordered list of consumers and a rotation cursor.
//! [`QueueConsumers::choose`] returns the consumer at `cursor % len` and
//! advances the cursor, so consumers are served round-robin in subscription
//! order. Removing a consumer shifts the rotation without skipping anyone.
//!
//! Consumers do not hold callbacks. Each one carries a [`Deliver`]
//! capability supplied by its owner: the broker's channel implements it by
//! pushing a delivery frame to the client connection, tests implement it by
//! recording calls.
//!
//! ## Lifecycle
//!
//! The list for a queue is created when the queue is declared and dropped,
//! with all its consumers, when the queue is deleted. Consumer tags are
//! unique within a queue.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tidemq::consumer::{ConsumerRegistry, Deliver};
//! use tidemq::protocol::BasicProperties;
//!
//! let registry = ConsumerRegistry::new();
//! registry.init_queue("queue1");
//!
//! let printer = Arc::new(|tag: &str, _props: &BasicProperties, body: &[u8]| {
//!     println!("{} got {} bytes", tag, body.len());
//! });
//! registry.create("c1", "queue1", true, printer).unwrap();
//! let chosen = registry.choose("queue1").unwrap();
//! assert_eq!(chosen.tag, "c1");
//! ```

use crate::protocol::BasicProperties;
use crate::storage::Message;
use crate::{Result, TidemqError};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

#[cfg(test)]
mod tests;

/// Capability to hand a message to whoever owns a consumer
pub trait Deliver: Send + Sync {
    /// Returns false when the owner has stopped taking messages; the message
    /// was not handed over and stays with the caller.
    fn deliver(&self, consumer_tag: &str, properties: &BasicProperties, body: &[u8]) -> bool;
}

impl<F> Deliver for F
where
    F: Fn(&str, &BasicProperties, &[u8]) + Send + Sync,
{
    fn deliver(&self, consumer_tag: &str, properties: &BasicProperties, body: &[u8]) -> bool {
        self(consumer_tag, properties, body);
        true
    }
}

pub struct Consumer {
    pub tag: String,
    pub queue_name: String,
    pub auto_ack: bool,
    sink: Arc<dyn Deliver>,
}

impl Consumer {
    pub fn new(tag: &str, queue_name: &str, auto_ack: bool, sink: Arc<dyn Deliver>) -> Self {
        Self {
            tag: tag.to_string(),
            queue_name: queue_name.to_string(),
            auto_ack,
            sink,
        }
    }

    pub fn deliver(&self, message: &Message) -> bool {
        self.sink
            .deliver(&self.tag, &message.properties, &message.body)
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("tag", &self.tag)
            .field("queue_name", &self.queue_name)
            .field("auto_ack", &self.auto_ack)
            .finish()
    }
}

#[derive(Default)]
struct Rotation {
    consumers: Vec<Arc<Consumer>>,
    cursor: usize,
}

/// Consumers of a single queue
pub struct QueueConsumers {
    queue_name: String,
    rotation: Mutex<Rotation>,
}

impl QueueConsumers {
    pub fn new(queue_name: &str) -> Self {
        Self {
            queue_name: queue_name.to_string(),
            rotation: Mutex::new(Rotation::default()),
        }
    }

    /// Register a consumer; `None` if `tag` is already taken
    pub fn create(
        &self,
        tag: &str,
        auto_ack: bool,
        sink: Arc<dyn Deliver>,
    ) -> Option<Arc<Consumer>> {
        let mut rotation = self.rotation.lock();
        if rotation.consumers.iter().any(|c| c.tag == tag) {
            return None;
        }
        let consumer = Arc::new(Consumer::new(tag, &self.queue_name, auto_ack, sink));
        rotation.consumers.push(Arc::clone(&consumer));
        Some(consumer)
    }

    /// Remove the first consumer with `tag`
    pub fn remove(&self, tag: &str) -> bool {
        let mut rotation = self.rotation.lock();
        match rotation.consumers.iter().position(|c| c.tag == tag) {
            Some(index) => {
                rotation.consumers.remove(index);
                true
            }
            None => false,
        }
    }

    /// Next consumer in round-robin order
    pub fn choose(&self) -> Option<Arc<Consumer>> {
        let mut rotation = self.rotation.lock();
        if rotation.consumers.is_empty() {
            return None;
        }
        let index = rotation.cursor % rotation.consumers.len();
        rotation.cursor = rotation.cursor.wrapping_add(1);
        Some(Arc::clone(&rotation.consumers[index]))
    }

    pub fn exists(&self, tag: &str) -> bool {
        self.rotation.lock().consumers.iter().any(|c| c.tag == tag)
    }

    pub fn len(&self) -> usize {
        self.rotation.lock().consumers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rotation.lock().consumers.is_empty()
    }

    pub fn clear(&self) {
        let mut rotation = self.rotation.lock();
        rotation.consumers.clear();
        rotation.cursor = 0;
    }
}

/// Consumer lists for every queue of a virtual host
#[derive(Default)]
pub struct ConsumerRegistry {
    queues: DashMap<String, Arc<QueueConsumers>>,
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the (empty) consumer list of a queue. Idempotent.
    pub fn init_queue(&self, queue_name: &str) {
        if let Entry::Vacant(entry) = self.queues.entry(queue_name.to_string()) {
            entry.insert(Arc::new(QueueConsumers::new(queue_name)));
            debug!("Initialized consumer list for queue '{}'", queue_name);
        }
    }

    /// Drop a queue's consumer list, cancelling all its consumers
    pub fn destroy_queue(&self, queue_name: &str) {
        if let Some((_, consumers)) = self.queues.remove(queue_name) {
            consumers.clear();
            debug!("Destroyed consumer list for queue '{}'", queue_name);
        }
    }

    fn queue(&self, queue_name: &str) -> Option<Arc<QueueConsumers>> {
        self.queues.get(queue_name).map(|q| Arc::clone(q.value()))
    }

    pub fn create(
        &self,
        tag: &str,
        queue_name: &str,
        auto_ack: bool,
        sink: Arc<dyn Deliver>,
    ) -> Result<Arc<Consumer>> {
        let consumers = self.queue(queue_name).ok_or_else(|| {
            TidemqError::NotFound(format!("queue '{}' has no consumer list", queue_name))
        })?;
        let consumer = consumers.create(tag, auto_ack, sink).ok_or_else(|| {
            TidemqError::Conflict(format!(
                "consumer tag '{}' already used on queue '{}'",
                tag, queue_name
            ))
        })?;
        info!("Consumer '{}' subscribed to queue '{}'", tag, queue_name);
        Ok(consumer)
    }

    pub fn remove(&self, tag: &str, queue_name: &str) -> bool {
        let removed = self
            .queue(queue_name)
            .map_or(false, |consumers| consumers.remove(tag));
        if removed {
            info!("Consumer '{}' cancelled on queue '{}'", tag, queue_name);
        }
        removed
    }

    pub fn choose(&self, queue_name: &str) -> Option<Arc<Consumer>> {
        self.queue(queue_name)?.choose()
    }

    pub fn exists(&self, tag: &str, queue_name: &str) -> bool {
        self.queue(queue_name)
            .map_or(false, |consumers| consumers.exists(tag))
    }

    /// True when the queue has no consumers (or no consumer list)
    pub fn is_empty(&self, queue_name: &str) -> bool {
        self.queue(queue_name)
            .map_or(true, |consumers| consumers.is_empty())
    }

    pub fn consumer_count(&self, queue_name: &str) -> usize {
        self.queue(queue_name).map_or(0, |consumers| consumers.len())
    }

    pub fn clear(&self) {
        self.queues.clear();
    }
}
