use super::log::{LogRecord, QueueLog, ScannedMessage};
use crate::protocol::{BasicProperties, DeliveryMode, MessageId};
use crate::{Result, TidemqError};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info};

/// A message held by one queue
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub properties: BasicProperties,
    pub body: Bytes,
    /// Payload location in the queue log; zero for non-durable messages
    pub offset: u64,
    pub length: u64,
}

impl Message {
    pub fn id(&self) -> &str {
        &self.properties.id
    }

    pub fn is_durable(&self) -> bool {
        self.properties.delivery_mode.is_durable()
    }
}

impl From<ScannedMessage> for Message {
    fn from(scanned: ScannedMessage) -> Self {
        Self {
            properties: scanned.properties,
            body: scanned.body,
            offset: scanned.offset,
            length: scanned.length,
        }
    }
}

struct QueueState {
    log: QueueLog,
    pending: VecDeque<Arc<Message>>,
    waiting_ack: HashMap<MessageId, Arc<Message>>,
    durable: HashMap<MessageId, Arc<Message>>,
    /// Ids that are pending or awaiting ack
    live: HashSet<MessageId>,
    /// Durable message records in the log since the last compaction
    total_count: usize,
}

/// Messages of a single queue: pending FIFO, awaiting-ack set and the
/// durable index, backed by the queue's log.
pub struct QueueMessages {
    name: String,
    gc_min_records: usize,
    state: Mutex<QueueState>,
}

impl QueueMessages {
    /// Open the queue's log and rebuild state from it. Every durable message
    /// that was never acknowledged is pending again, in log order.
    pub fn open<P: AsRef<Path>>(
        dir: P,
        name: &str,
        sync_writes: bool,
        gc_min_records: usize,
    ) -> Result<Self> {
        let mut log = QueueLog::open(dir, name, sync_writes)?;
        let survivors: Vec<Arc<Message>> = log
            .compact()?
            .into_iter()
            .map(|m| Arc::new(Message::from(m)))
            .collect();

        let durable = survivors
            .iter()
            .map(|m| (m.properties.id.clone(), Arc::clone(m)))
            .collect::<HashMap<_, _>>();
        let live = durable.keys().cloned().collect();
        if !survivors.is_empty() {
            info!("Recovered {} messages for queue '{}'", survivors.len(), name);
        }

        Ok(Self {
            name: name.to_string(),
            gc_min_records,
            state: Mutex::new(QueueState {
                log,
                total_count: survivors.len(),
                pending: survivors.into_iter().collect(),
                waiting_ack: HashMap::new(),
                durable,
                live,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a new message. Without properties a fresh id and
    /// `default_mode` are used. Durable messages reach the log before they
    /// are queued; a failed append queues nothing. An id that is still
    /// pending or awaiting ack is refused with `Conflict`.
    pub fn insert(
        &self,
        properties: Option<BasicProperties>,
        body: Bytes,
        default_mode: DeliveryMode,
    ) -> Result<Arc<Message>> {
        let mut properties =
            properties.unwrap_or_else(|| BasicProperties::with_routing_key(default_mode, ""));
        if properties.id.is_empty() {
            properties.id = uuid::Uuid::new_v4().to_string();
        }

        let mut state = self.state.lock();
        if state.live.contains(&properties.id) {
            return Err(TidemqError::Conflict(format!(
                "message '{}' is already queued on '{}'",
                properties.id, self.name
            )));
        }
        let mut message = Message {
            properties,
            body,
            offset: 0,
            length: 0,
        };

        if message.is_durable() {
            let record = LogRecord::message(message.properties.clone(), message.body.clone());
            let (offset, length) = state.log.append(&record)?;
            message.offset = offset;
            message.length = length;
        }

        let message = Arc::new(message);
        if message.is_durable() {
            state
                .durable
                .insert(message.properties.id.clone(), Arc::clone(&message));
            state.total_count += 1;
        }
        state.live.insert(message.properties.id.clone());
        state.pending.push_back(Arc::clone(&message));
        debug!("Queued message {} on '{}'", message.id(), self.name);
        Ok(message)
    }

    /// Pop the oldest pending message and hold it until it is acknowledged
    pub fn front(&self) -> Option<Arc<Message>> {
        let mut state = self.state.lock();
        let message = state.pending.pop_front()?;
        state
            .waiting_ack
            .insert(message.properties.id.clone(), Arc::clone(&message));
        Some(message)
    }

    /// Acknowledge `id`. A durable message is retired with a delete marker
    /// in the log, which may trigger compaction.
    pub fn remove(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock();
        let message = state
            .waiting_ack
            .get(id)
            .cloned()
            .ok_or_else(|| self.not_awaiting_ack(id))?;

        if message.is_durable() {
            state.log.append(&LogRecord::tombstone(id))?;
            state.durable.remove(id);
        }
        state.waiting_ack.remove(id);
        state.live.remove(id);

        if self.needs_gc(&state) {
            if let Err(e) = Self::gc(&mut state) {
                error!("Compaction of queue '{}' failed: {}", self.name, e);
            }
        }
        Ok(())
    }

    /// Put an unacknowledged message back at the head of the pending sequence
    pub fn requeue(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock();
        let message = state
            .waiting_ack
            .remove(id)
            .ok_or_else(|| self.not_awaiting_ack(id))?;
        state.pending.push_front(message);
        Ok(())
    }

    /// Take back a message that was queued but never handed out. A durable
    /// copy is retired in the log like an acknowledged one.
    pub fn retract(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock();
        let position = state
            .pending
            .iter()
            .position(|m| m.id() == id)
            .ok_or_else(|| {
                TidemqError::NotFound(format!("message '{}' is not pending on '{}'", id, self.name))
            })?;
        let message = state.pending.remove(position);
        state.live.remove(id);

        if message.is_some_and(|m| m.is_durable()) {
            state.durable.remove(id);
            state.log.append(&LogRecord::tombstone(id))?;
        }
        Ok(())
    }

    fn not_awaiting_ack(&self, id: &str) -> TidemqError {
        TidemqError::NotFound(format!("message '{}' is not awaiting ack on '{}'", id, self.name))
    }

    fn needs_gc(&self, state: &QueueState) -> bool {
        let total = state.total_count;
        total > self.gc_min_records && state.durable.len() * 10 / total < 5
    }

    fn gc(state: &mut QueueState) -> Result<()> {
        let survivors = state.log.compact()?;
        for scanned in survivors.iter() {
            if let Some(current) = state.durable.get_mut(&scanned.properties.id) {
                let mut relocated = Message::clone(current);
                relocated.offset = scanned.offset;
                relocated.length = scanned.length;
                *current = Arc::new(relocated);
            }
        }
        state.total_count = survivors.len();
        Ok(())
    }

    /// Force a compaction regardless of the garbage ratio
    pub fn compact(&self) -> Result<()> {
        let mut state = self.state.lock();
        Self::gc(&mut state)
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Durable records written since the last compaction
    pub fn total_count(&self) -> usize {
        self.state.lock().total_count
    }

    /// Durable messages not yet acknowledged
    pub fn durable_count(&self) -> usize {
        self.state.lock().durable.len()
    }

    pub fn waitack_count(&self) -> usize {
        self.state.lock().waiting_ack.len()
    }

    /// Location of a durable message in the log
    pub fn durable_location(&self, id: &str) -> Option<(u64, u64)> {
        self.state
            .lock()
            .durable
            .get(id)
            .map(|m| (m.offset, m.length))
    }

    pub fn log_size(&self) -> Result<u64> {
        self.state.lock().log.size()
    }

    /// Drop all messages and delete the log
    pub fn destroy(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.log.remove()?;
        state.pending.clear();
        state.waiting_ack.clear();
        state.durable.clear();
        state.live.clear();
        state.total_count = 0;
        info!("Destroyed message log of queue '{}'", self.name);
        Ok(())
    }
}
