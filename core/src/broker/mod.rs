//! # TideMQ Broker Module
//!
//! Sessions, request dispatch and the TCP server.
//!
//! ## Architecture
//!
//! - [`server`] - Accepts TCP connections and runs one async loop per
//!   connection over a length-prefixed JSON frame stream
//! - [`connection`] - A client connection, its outbound queue and its channels
//! - [`channel`] - Executes requests against the virtual host; owns at most one
//!   consumer subscription
//! - [`handler`] - Routes each decoded request to the right channel and turns
//!   the outcome into a correlated response
//!
//! Every request gets exactly one [`CommonResponse`](crate::protocol::CommonResponse)
//! echoing its request and channel ids. Deliveries to consumers are pushed on
//! the same connection at any later time, from the worker pool.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use tidemq::{BrokerConfig, BrokerServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BrokerConfig::default()
//!         .with_host("127.0.0.1")
//!         .with_port(8085);
//!
//!     let server = BrokerServer::new(config)?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod connection;
pub mod handler;
pub mod server;

pub use channel::{Channel, ChannelDelivery, ChannelManager};
pub use connection::{Connection, ConnectionId, ConnectionManager};
pub use handler::MessageHandler;
pub use server::BrokerServer;

use crate::protocol::Response;
use tokio::sync::mpsc;

/// Outbound queue of a connection; drained by its serve loop
pub type ResponseSender = mpsc::UnboundedSender<Response>;
