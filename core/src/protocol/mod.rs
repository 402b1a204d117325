//! # Wire Protocol
//!
//! Typed requests and responses exchanged between clients and the broker,
//! plus the length-prefixed frame codec that carries them over TCP.
//!
//! Every request carries a request id (`rid`) and a channel id (`cid`); the
//! broker answers each one with exactly one [`CommonResponse`] echoing both.
//! Deliveries to consumers travel as [`DeliverResponse`] frames that are not
//! correlated with any request.

pub mod codec;
pub mod messages;

pub use codec::{ClientCodec, JsonFrameCodec, ServerCodec};
pub use messages::*;
