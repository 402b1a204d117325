//! # TideMQ Core Library
//!
//! TideMQ is a single-node message broker built around AMQP concepts. A virtual
//! host owns exchanges, queues and bindings; producers publish to exchanges,
//! the broker routes each message to the bound queues by matching its routing
//! key against every binding key, and consumers receive messages round-robin
//! with explicit or automatic acknowledgment.
//!
//! ## Architecture Overview
//!
//! - [`catalog`] - Exchange, queue and binding tables with durable recovery
//! - [`storage`] - Per-queue append-only message log with compaction
//! - [`router`] - Direct, fanout and topic key matching
//! - [`consumer`] - Per-queue consumer registry with round-robin selection
//! - [`vhost`] - The domain API composing catalogs, store and registry
//! - [`broker`] - Channel/connection sessions, dispatch and the TCP server
//! - [`protocol`] - Request/response types and the frame codec
//! - [`pool`] - Owned worker pool used for asynchronous delivery
//! - [`config`] - Broker configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tidemq::{BrokerConfig, BrokerServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BrokerConfig::default()
//!         .with_port(8085)
//!         .with_data_dir("./data");
//!
//!     let server = BrokerServer::new(config)?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Delivery Guarantees
//!
//! Delivery is at-least-once. A durable message that was delivered but not yet
//! acknowledged when the process stopped is pending again after restart.

pub mod broker;
pub mod catalog;
pub mod config;
pub mod consumer;
pub mod pool;
pub mod protocol;
pub mod router;
pub mod storage;
pub mod vhost;

pub use broker::{BrokerServer, MessageHandler};
pub use config::BrokerConfig;
pub use consumer::{Consumer, ConsumerRegistry, Deliver};
pub use pool::{TaskHandle, WorkerPool};
pub use protocol::{BasicProperties, DeliveryMode, ExchangeType, Request, Response};
pub use storage::{Message, MessageStore};
pub use vhost::VirtualHost;

use thiserror::Error;

/// Comprehensive error type for all broker operations
///
/// Domain operations report failures through this type; the session layer
/// turns any error into a negative acknowledgment for the requesting client.
///
/// # Error Categories
///
/// - **Not found**: unknown exchange, queue, channel, consumer tag or message id
/// - **Conflict**: duplicate consumer tag, duplicate channel id, occupied consumer slot
/// - **Persistence**: catalog row writes, log appends and compaction
/// - **Format**: illegal routing or binding keys, malformed frames
#[derive(Debug, Error)]
pub enum TidemqError {
    /// Storage-related errors (file I/O, disk operations)
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed request or frame
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// A routing or binding key with characters or wildcards that are not allowed
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// A log record that failed its checksum or could not be decoded
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Worker pool has been shut down")]
    PoolShutdown,

    /// A submitted task panicked or was dropped before completing
    #[error("Task error: {0}")]
    Task(String),
}

/// Result type alias for broker operations
pub type Result<T> = std::result::Result<T, TidemqError>;
