//! # TideMQ Client Library
//!
//! An async Rust client for the TideMQ broker.
//!
//! A [`Connection`] multiplexes any number of [`Channel`]s over one TCP
//! stream. Each channel method sends one request and waits, bounded by
//! [`ClientConfig::request_timeout`], for the broker's acknowledgment. A
//! channel may hold one consumer subscription; its deliveries are handed to a
//! [`DeliveryHandler`] on a dedicated task, in order.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tidemq_client::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let connection = Connection::connect(ClientConfig::new("127.0.0.1:8085")).await?;
//!     let channel = connection.open_channel().await?;
//!
//!     channel.declare_exchange("exchange1", ExchangeType::Topic, true, false).await?;
//!     channel.declare_queue("queue1", true, false, false).await?;
//!     channel.queue_bind("exchange1", "queue1", "news.music.#").await?;
//!
//!     channel
//!         .basic_consume("consumer1", "queue1", true, |delivery: Delivery| {
//!             println!("Received: {}", String::from_utf8_lossy(&delivery.body));
//!         })
//!         .await?;
//!
//!     let properties = BasicProperties::with_routing_key(DeliveryMode::Durable, "news.music.pop");
//!     channel.basic_publish("exchange1", Some(properties), "hello").await?;
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod config;
pub mod connection;
pub mod consumer;
pub mod error;

pub use channel::Channel;
pub use config::ClientConfig;
pub use connection::Connection;
pub use consumer::{Delivery, DeliveryHandler};
pub use error::TidemqClientError;
pub use tidemq::protocol::{BasicProperties, DeliveryMode, ExchangeType};

/// Client library result type
pub type Result<T> = std::result::Result<T, TidemqClientError>;

/// Client library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
