//! # Message Storage
//!
//! Per-queue message storage for a virtual host.
//!
//! ## Layout
//!
//! Every queue owns an append-only log, `<dir>/<queue>.mqd`, and an in-memory
//! view made of three collections:
//!
//! - **pending**: FIFO of messages waiting for delivery
//! - **awaiting ack**: delivered messages keyed by id
//! - **durable index**: every durable message not yet acknowledged, keyed by
//!   id, whatever its delivery state
//!
//! Only durable messages are written to the log. Acknowledging a durable
//! message appends a delete marker for its id instead of touching the
//! original record, so records are never rewritten in place.
//!
//! ## Compaction
//!
//! After an ack, a queue compacts its log when more than `gc_min_records`
//! durable records were written since the last compaction and fewer than
//! half of them are still live (`live * 10 / total < 5`). Compaction copies
//! the live records to `<queue>.mqd.tmp` and renames it over the log.
//!
//! ## Recovery
//!
//! Opening a queue runs the same compaction pass. Durable messages that were
//! never acknowledged come back as pending, so delivery is at-least-once.
//! A torn or corrupt trailing record ends the scan and is discarded.
//!
//! ## Locking
//!
//! Each queue has its own mutex; [`MessageStore`] keeps the queues in a
//! sharded map, so operations on different queues never contend.

pub mod log;
pub mod queue;


pub use log::{LogRecord, QueueLog, ScannedMessage};
pub use queue::{Message, QueueMessages};

use crate::protocol::{BasicProperties, DeliveryMode};
use crate::{Result, TidemqError};
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub sync_writes: bool,
    pub gc_min_records: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            sync_writes: true,
            gc_min_records: 2000,
        }
    }
}

/// Message storage for all queues of a virtual host
pub struct MessageStore {
    dir: PathBuf,
    options: StoreOptions,
    queues: DashMap<String, Arc<QueueMessages>>,
}

impl MessageStore {
    pub fn new<P: AsRef<Path>>(dir: P, options: StoreOptions) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            options,
            queues: DashMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Open the storage of `queue_name`, recovering its log. Idempotent.
    pub fn init_queue(&self, queue_name: &str) -> Result<()> {
        match self.queues.entry(queue_name.to_string()) {
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(entry) => {
                let queue = QueueMessages::open(
                    &self.dir,
                    queue_name,
                    self.options.sync_writes,
                    self.options.gc_min_records,
                )?;
                entry.insert(Arc::new(queue));
                info!("Initialized message storage for queue '{}'", queue_name);
                Ok(())
            }
        }
    }

    /// Drop the queue's messages and delete its log
    pub fn destroy_queue(&self, queue_name: &str) -> Result<()> {
        if let Some((_, queue)) = self.queues.remove(queue_name) {
            queue.destroy()?;
        }
        Ok(())
    }

    pub fn queue(&self, queue_name: &str) -> Option<Arc<QueueMessages>> {
        self.queues.get(queue_name).map(|q| Arc::clone(q.value()))
    }

    fn require(&self, queue_name: &str) -> Result<Arc<QueueMessages>> {
        self.queue(queue_name).ok_or_else(|| {
            TidemqError::NotFound(format!("queue '{}' has no message storage", queue_name))
        })
    }

    pub fn insert(
        &self,
        queue_name: &str,
        properties: Option<BasicProperties>,
        body: Bytes,
        default_mode: DeliveryMode,
    ) -> Result<Arc<Message>> {
        self.require(queue_name)?
            .insert(properties, body, default_mode)
    }

    pub fn front(&self, queue_name: &str) -> Option<Arc<Message>> {
        self.queue(queue_name)?.front()
    }

    pub fn ack(&self, queue_name: &str, message_id: &str) -> Result<()> {
        self.require(queue_name)?.remove(message_id)
    }

    pub fn requeue(&self, queue_name: &str, message_id: &str) -> Result<()> {
        self.require(queue_name)?.requeue(message_id)
    }

    pub fn retract(&self, queue_name: &str, message_id: &str) -> Result<()> {
        self.require(queue_name)?.retract(message_id)
    }

    pub fn pending_count(&self, queue_name: &str) -> usize {
        self.queue(queue_name).map_or(0, |q| q.pending_count())
    }

    pub fn total_count(&self, queue_name: &str) -> usize {
        self.queue(queue_name).map_or(0, |q| q.total_count())
    }

    pub fn durable_count(&self, queue_name: &str) -> usize {
        self.queue(queue_name).map_or(0, |q| q.durable_count())
    }

    pub fn waitack_count(&self, queue_name: &str) -> usize {
        self.queue(queue_name).map_or(0, |q| q.waitack_count())
    }

    pub fn queue_names(&self) -> Vec<String> {
        self.queues.iter().map(|q| q.key().clone()).collect()
    }

    /// Destroy every queue's storage
    pub fn clear(&self) -> Result<()> {
        for name in self.queue_names() {
            self.destroy_queue(&name)?;
        }
        Ok(())
    }
}
