//! # Virtual Host
//!
//! The domain API of the broker. A virtual host owns the exchange, queue and
//! binding catalogs, the message store and the consumer registry, and keeps
//! them consistent with each other:
//!
//! - declaring a queue provisions its message storage and consumer list
//! - deleting a queue removes its bindings, its messages and its consumers
//! - deleting an exchange removes its bindings
//! - a binding is durable only when both of its ends are durable
//!
//! Everything a virtual host persists lives under one directory:
//!
//! ```text
//! <dir>/meta/exchanges.json
//! <dir>/meta/queues.json
//! <dir>/meta/bindings.json
//! <dir>/queues/<queue>.mqd
//! ```
//!
//! Every method takes at most one component lock at a time.

use crate::catalog::{
    Binding, BindingCatalog, Exchange, ExchangeCatalog, JsonTable, MsgQueue, QueueBindings,
    QueueCatalog,
};
use crate::config::BrokerConfig;
use crate::consumer::ConsumerRegistry;
use crate::protocol::{Args, BasicProperties, DeliveryMode, ExchangeType};
use crate::router;
use crate::storage::{Message, MessageStore, StoreOptions};
use crate::{Result, TidemqError};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub struct VirtualHost {
    name: String,
    dir: PathBuf,
    exchanges: ExchangeCatalog,
    queues: QueueCatalog,
    bindings: BindingCatalog,
    messages: MessageStore,
    consumers: ConsumerRegistry,
}

/// Names double as file names, so path syntax is not allowed
fn validate_name(kind: &str, name: &str) -> Result<()> {
    let illegal = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if illegal {
        return Err(TidemqError::Protocol(format!("illegal {} name '{}'", kind, name)));
    }
    Ok(())
}

impl VirtualHost {
    /// Open the virtual host rooted at `dir`, recovering its catalogs and
    /// every queue's messages.
    pub fn open<P: AsRef<Path>>(name: &str, dir: P, options: StoreOptions) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let meta = dir.join("meta");

        let host = Self {
            name: name.to_string(),
            exchanges: ExchangeCatalog::new(Box::new(JsonTable::new(&meta, "exchanges")))?,
            queues: QueueCatalog::new(Box::new(JsonTable::new(&meta, "queues")))?,
            bindings: BindingCatalog::new(Box::new(JsonTable::new(&meta, "bindings")))?,
            messages: MessageStore::new(dir.join("queues"), options)?,
            consumers: ConsumerRegistry::new(),
            dir,
        };

        for queue in host.queues.keys() {
            host.messages.init_queue(&queue)?;
            host.consumers.init_queue(&queue);
        }
        host.prune_dangling_bindings()?;

        info!(
            "Opened virtual host '{}': {} exchanges, {} queues, {} bindings",
            host.name,
            host.exchanges.len(),
            host.queues.len(),
            host.bindings.len()
        );
        Ok(host)
    }

    pub fn from_config(config: &BrokerConfig) -> Result<Self> {
        let options = StoreOptions {
            sync_writes: config.sync_writes,
            gc_min_records: config.gc_min_records,
        };
        Self::open(&config.vhost, config.vhost_dir(), options)
    }

    /// Drop recovered bindings whose exchange or queue no longer exists
    fn prune_dangling_bindings(&self) -> Result<()> {
        for binding in self.bindings.recover()? {
            let exchange_missing = !self.exchanges.exists(&binding.exchange_name);
            let queue_missing = !self.queues.exists(&binding.queue_name);
            if exchange_missing || queue_missing {
                warn!(
                    "Dropping dangling binding {} -> {}",
                    binding.exchange_name, binding.queue_name
                );
                self.bindings
                    .unbind(&binding.exchange_name, &binding.queue_name)?;
            }
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn declare_exchange(
        &self,
        name: &str,
        exchange_type: ExchangeType,
        durable: bool,
        auto_delete: bool,
        args: Args,
    ) -> Result<()> {
        validate_name("exchange", name)?;
        self.exchanges
            .declare(Exchange::new(name, exchange_type, durable, auto_delete, args))
    }

    pub fn delete_exchange(&self, name: &str) -> Result<()> {
        self.bindings.remove_exchange_bindings(name)?;
        self.exchanges.delete(name)?;
        Ok(())
    }

    pub fn declare_queue(
        &self,
        name: &str,
        durable: bool,
        exclusive: bool,
        auto_delete: bool,
        args: Args,
    ) -> Result<()> {
        validate_name("queue", name)?;
        self.queues
            .declare(MsgQueue::new(name, durable, exclusive, auto_delete, args))?;
        self.messages.init_queue(name)?;
        self.consumers.init_queue(name);
        Ok(())
    }

    pub fn delete_queue(&self, name: &str) -> Result<()> {
        if self.queues.delete(name)?.is_none() {
            return Ok(());
        }
        self.bindings.remove_queue_bindings(name)?;
        self.consumers.destroy_queue(name);
        self.messages.destroy_queue(name)?;
        Ok(())
    }

    /// Bind a queue to an exchange. Both must exist and the binding key must
    /// be legal; the binding is durable iff both ends are.
    pub fn bind(&self, exchange_name: &str, queue_name: &str, binding_key: &str) -> Result<()> {
        router::validate_binding_key(binding_key)?;
        let exchange = self
            .exchanges
            .select(exchange_name)
            .ok_or_else(|| TidemqError::NotFound(format!("exchange '{}'", exchange_name)))?;
        let queue = self
            .queues
            .select(queue_name)
            .ok_or_else(|| TidemqError::NotFound(format!("queue '{}'", queue_name)))?;

        let durable = exchange.durable && queue.durable;
        self.bindings
            .bind(exchange_name, queue_name, binding_key, durable)
    }

    pub fn unbind(&self, exchange_name: &str, queue_name: &str) -> Result<()> {
        self.bindings.unbind(exchange_name, queue_name)
    }

    pub fn select_exchange(&self, name: &str) -> Option<Arc<Exchange>> {
        self.exchanges.select(name)
    }

    pub fn select_queue(&self, name: &str) -> Option<Arc<MsgQueue>> {
        self.queues.select(name)
    }

    pub fn select_binding(&self, exchange_name: &str, queue_name: &str) -> Option<Arc<Binding>> {
        self.bindings.select(exchange_name, queue_name)
    }

    pub fn exchange_bindings(&self, exchange_name: &str) -> QueueBindings {
        self.bindings.exchange_bindings(exchange_name)
    }

    pub fn exists_exchange(&self, name: &str) -> bool {
        self.exchanges.exists(name)
    }

    pub fn exists_queue(&self, name: &str) -> bool {
        self.queues.exists(name)
    }

    pub fn exists_binding(&self, exchange_name: &str, queue_name: &str) -> bool {
        self.bindings.exists(exchange_name, queue_name)
    }

    pub fn all_queues(&self) -> Vec<Arc<MsgQueue>> {
        self.queues.all()
    }

    /// Store a copy of a message in `queue_name`.
    ///
    /// Messages without properties take the queue's durability. A message on
    /// a non-durable queue is never written to disk, whatever it asks for.
    pub fn basic_publish(
        &self,
        queue_name: &str,
        properties: Option<BasicProperties>,
        body: Bytes,
    ) -> Result<Arc<Message>> {
        let queue = self
            .queues
            .select(queue_name)
            .ok_or_else(|| TidemqError::NotFound(format!("queue '{}'", queue_name)))?;

        let default_mode = DeliveryMode::from_durable(queue.durable);
        let properties = properties.map(|mut p| {
            if !queue.durable {
                p.delivery_mode = DeliveryMode::Undurable;
            }
            p
        });
        self.messages
            .insert(queue_name, properties, body, default_mode)
    }

    pub fn basic_ack(&self, queue_name: &str, message_id: &str) -> Result<()> {
        self.messages.ack(queue_name, message_id)
    }

    /// Take the next message of `queue_name` for delivery
    pub fn basic_consume(&self, queue_name: &str) -> Option<Arc<Message>> {
        self.messages.front(queue_name)
    }

    /// Return a delivered but unacknowledged message to the head of its queue
    pub fn basic_requeue(&self, queue_name: &str, message_id: &str) -> Result<()> {
        self.messages.requeue(queue_name, message_id)
    }

    /// Withdraw a stored copy that has not been delivered yet
    pub fn basic_retract(&self, queue_name: &str, message_id: &str) -> Result<()> {
        self.messages.retract(queue_name, message_id)
    }

    pub fn consumers(&self) -> &ConsumerRegistry {
        &self.consumers
    }

    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    /// Remove everything the virtual host holds, on disk and in memory
    pub fn clear(&self) -> Result<()> {
        self.messages.clear()?;
        self.consumers.clear();
        self.bindings.clear()?;
        self.queues.clear()?;
        self.exchanges.clear()?;
        info!("Cleared virtual host '{}'", self.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn options() -> StoreOptions {
        StoreOptions {
            sync_writes: false,
            gc_min_records: 2000,
        }
    }

    fn open(dir: &Path) -> VirtualHost {
        VirtualHost::open("test", dir, options()).expect("Failed to open virtual host")
    }

    fn declare_topology(host: &VirtualHost) {
        host.declare_exchange("exchange1", ExchangeType::Topic, true, false, Args::new())
            .expect("Failed to declare exchange1");
        host.declare_exchange("exchange2", ExchangeType::Direct, true, false, Args::new())
            .expect("Failed to declare exchange2");
        host.declare_queue("queue1", true, false, false, Args::new())
            .expect("Failed to declare queue1");
        host.declare_queue("queue2", true, false, false, Args::new())
            .expect("Failed to declare queue2");
        host.bind("exchange1", "queue1", "news.music.#")
            .expect("Failed to bind queue1");
        host.bind("exchange1", "queue2", "news.#")
            .expect("Failed to bind queue2");
        host.bind("exchange2", "queue1", "direct.key")
            .expect("Failed to bind exchange2");
    }

    #[test]
    fn test_declare_and_exists() {
        let dir = tempdir().expect("Failed to create temp dir");
        let host = open(dir.path());
        declare_topology(&host);

        assert!(host.exists_exchange("exchange1"));
        assert!(host.exists_queue("queue2"));
        assert!(host.exists_binding("exchange1", "queue1"));
        assert_eq!(host.exchange_bindings("exchange1").len(), 2);
        assert_eq!(host.all_queues().len(), 2);
        assert!(dir.path().join("queues").join("queue1.mqd").exists());
    }

    #[test]
    fn test_delete_exchange_cascades() {
        let dir = tempdir().expect("Failed to create temp dir");
        let host = open(dir.path());
        declare_topology(&host);

        host.delete_exchange("exchange1")
            .expect("Failed to delete exchange");
        assert!(!host.exists_exchange("exchange1"));
        assert!(!host.exists_binding("exchange1", "queue1"));
        assert!(!host.exists_binding("exchange1", "queue2"));
        assert!(host.exists_binding("exchange2", "queue1"));
    }

    #[test]
    fn test_delete_queue_cascades() {
        let dir = tempdir().expect("Failed to create temp dir");
        let host = open(dir.path());
        declare_topology(&host);
        host.basic_publish("queue1", None, Bytes::from("m1"))
            .expect("Failed to publish");

        host.delete_queue("queue1").expect("Failed to delete queue");
        assert!(!host.exists_queue("queue1"));
        assert!(!host.exists_binding("exchange1", "queue1"));
        assert!(!host.exists_binding("exchange2", "queue1"));
        assert!(host.exists_binding("exchange1", "queue2"));
        assert!(host.basic_consume("queue1").is_none());
        assert!(!dir.path().join("queues").join("queue1.mqd").exists());

        host.delete_queue("queue1").expect("Deleting twice is a no-op");
    }

    #[test]
    fn test_bind_requires_both_sides_and_legal_key() {
        let dir = tempdir().expect("Failed to create temp dir");
        let host = open(dir.path());
        declare_topology(&host);

        assert!(matches!(
            host.bind("missing", "queue1", "a"),
            Err(TidemqError::NotFound(_))
        ));
        assert!(matches!(
            host.bind("exchange1", "missing", "a"),
            Err(TidemqError::NotFound(_))
        ));
        assert!(matches!(
            host.bind("exchange1", "queue1", "news#"),
            Err(TidemqError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_binding_durability_follows_both_ends() {
        let dir = tempdir().expect("Failed to create temp dir");
        {
            let host = open(dir.path());
            declare_topology(&host);
            host.declare_queue("transient", false, false, false, Args::new())
                .expect("Failed to declare transient queue");
            host.bind("exchange1", "transient", "#")
                .expect("Failed to bind transient queue");
            let binding = host
                .select_binding("exchange1", "transient")
                .expect("Binding missing");
            assert!(!binding.durable);
        }

        let host = open(dir.path());
        assert!(host.exists_binding("exchange1", "queue1"));
        assert!(!host.exists_queue("transient"));
        assert!(!host.exists_binding("exchange1", "transient"));
    }

    #[test]
    fn test_publish_consume_ack() {
        let dir = tempdir().expect("Failed to create temp dir");
        let host = open(dir.path());
        declare_topology(&host);

        let properties = BasicProperties::with_routing_key(DeliveryMode::Durable, "news.music.pop");
        host.basic_publish("queue1", Some(properties.clone()), Bytes::from("hello"))
            .expect("Failed to publish");

        let message = host.basic_consume("queue1").expect("Expected a message");
        assert_eq!(message.properties, properties);
        assert_eq!(host.messages().waitack_count("queue1"), 1);

        host.basic_ack("queue1", &properties.id)
            .expect("Failed to ack");
        assert_eq!(host.messages().waitack_count("queue1"), 0);
        assert!(host.basic_consume("queue1").is_none());
    }

    #[test]
    fn test_publish_to_missing_queue_fails() {
        let dir = tempdir().expect("Failed to create temp dir");
        let host = open(dir.path());
        assert!(matches!(
            host.basic_publish("missing", None, Bytes::from("x")),
            Err(TidemqError::NotFound(_))
        ));
    }

    #[test]
    fn test_transient_queue_never_persists() {
        let dir = tempdir().expect("Failed to create temp dir");
        let host = open(dir.path());
        host.declare_queue("transient", false, false, false, Args::new())
            .expect("Failed to declare queue");

        let durable = BasicProperties::with_routing_key(DeliveryMode::Durable, "a");
        let message = host
            .basic_publish("transient", Some(durable), Bytes::from("x"))
            .expect("Failed to publish");
        assert!(!message.is_durable());
        assert_eq!(host.messages().total_count("transient"), 0);
    }

    #[test]
    fn test_restart_recovers_topology_and_messages() {
        let dir = tempdir().expect("Failed to create temp dir");
        {
            let host = open(dir.path());
            declare_topology(&host);
            host.basic_publish("queue1", None, Bytes::from("survivor"))
                .expect("Failed to publish");
        }

        let host = open(dir.path());
        assert!(host.exists_exchange("exchange1"));
        assert_eq!(
            host.select_exchange("exchange2").map(|e| e.exchange_type),
            Some(ExchangeType::Direct)
        );
        assert_eq!(host.exchange_bindings("exchange1").len(), 2);
        let message = host.basic_consume("queue1").expect("Expected recovered message");
        assert_eq!(message.body, Bytes::from("survivor"));
    }

    #[test]
    fn test_illegal_names_rejected() {
        let dir = tempdir().expect("Failed to create temp dir");
        let host = open(dir.path());
        for name in ["", "..", "a/b", "a\\b"] {
            assert!(host
                .declare_queue(name, true, false, false, Args::new())
                .is_err());
        }
        assert!(host
            .declare_exchange("", ExchangeType::Fanout, false, false, Args::new())
            .is_err());
    }

    #[test]
    fn test_clear_removes_everything() {
        let dir = tempdir().expect("Failed to create temp dir");
        {
            let host = open(dir.path());
            declare_topology(&host);
            host.basic_publish("queue1", None, Bytes::from("m"))
                .expect("Failed to publish");
            host.clear().expect("Failed to clear");
            assert!(host.all_queues().is_empty());
        }

        let host = open(dir.path());
        assert!(!host.exists_exchange("exchange1"));
        assert!(!host.exists_queue("queue1"));
        assert!(host.exchange_bindings("exchange1").is_empty());
    }
}
