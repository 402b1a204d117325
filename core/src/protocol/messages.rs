use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type ChannelId = String;
pub type RequestId = String;
pub type MessageId = String;
pub type Args = HashMap<String, String>;

/// Longest message id a message log record can hold
pub const MAX_MESSAGE_ID_LEN: usize = u16::MAX as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeType {
    /// Routing key must equal the binding key
    Direct,
    /// Every bound queue receives the message
    Fanout,
    /// Segment-wise pattern match with `*` and `#`
    Topic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    Durable,
    Undurable,
}

impl DeliveryMode {
    pub fn from_durable(durable: bool) -> Self {
        if durable {
            DeliveryMode::Durable
        } else {
            DeliveryMode::Undurable
        }
    }

    pub fn is_durable(self) -> bool {
        self == DeliveryMode::Durable
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicProperties {
    pub id: MessageId,
    pub delivery_mode: DeliveryMode,
    pub routing_key: String,
}

impl BasicProperties {
    pub fn new(
        id: impl Into<String>,
        delivery_mode: DeliveryMode,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            delivery_mode,
            routing_key: routing_key.into(),
        }
    }

    /// Properties with a fresh message id
    pub fn with_routing_key(delivery_mode: DeliveryMode, routing_key: impl Into<String>) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), delivery_mode, routing_key)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenChannelRequest {
    pub rid: RequestId,
    pub cid: ChannelId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseChannelRequest {
    pub rid: RequestId,
    pub cid: ChannelId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclareExchangeRequest {
    pub rid: RequestId,
    pub cid: ChannelId,
    pub exchange_name: String,
    pub exchange_type: ExchangeType,
    pub durable: bool,
    pub auto_delete: bool,
    #[serde(default)]
    pub args: Args,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteExchangeRequest {
    pub rid: RequestId,
    pub cid: ChannelId,
    pub exchange_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclareQueueRequest {
    pub rid: RequestId,
    pub cid: ChannelId,
    pub queue_name: String,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    #[serde(default)]
    pub args: Args,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteQueueRequest {
    pub rid: RequestId,
    pub cid: ChannelId,
    pub queue_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueBindRequest {
    pub rid: RequestId,
    pub cid: ChannelId,
    pub exchange_name: String,
    pub queue_name: String,
    pub binding_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueUnbindRequest {
    pub rid: RequestId,
    pub cid: ChannelId,
    pub exchange_name: String,
    pub queue_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicPublishRequest {
    pub rid: RequestId,
    pub cid: ChannelId,
    pub exchange_name: String,
    pub properties: Option<BasicProperties>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicAckRequest {
    pub rid: RequestId,
    pub cid: ChannelId,
    pub queue_name: String,
    pub message_id: MessageId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicConsumeRequest {
    pub rid: RequestId,
    pub cid: ChannelId,
    pub consumer_tag: String,
    pub queue_name: String,
    pub auto_ack: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicCancelRequest {
    pub rid: RequestId,
    pub cid: ChannelId,
    pub consumer_tag: String,
    pub queue_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    OpenChannel(OpenChannelRequest),
    CloseChannel(CloseChannelRequest),
    DeclareExchange(DeclareExchangeRequest),
    DeleteExchange(DeleteExchangeRequest),
    DeclareQueue(DeclareQueueRequest),
    DeleteQueue(DeleteQueueRequest),
    QueueBind(QueueBindRequest),
    QueueUnbind(QueueUnbindRequest),
    BasicPublish(BasicPublishRequest),
    BasicAck(BasicAckRequest),
    BasicConsume(BasicConsumeRequest),
    BasicCancel(BasicCancelRequest),
}

impl Request {
    pub fn request_id(&self) -> &str {
        match self {
            Request::OpenChannel(r) => &r.rid,
            Request::CloseChannel(r) => &r.rid,
            Request::DeclareExchange(r) => &r.rid,
            Request::DeleteExchange(r) => &r.rid,
            Request::DeclareQueue(r) => &r.rid,
            Request::DeleteQueue(r) => &r.rid,
            Request::QueueBind(r) => &r.rid,
            Request::QueueUnbind(r) => &r.rid,
            Request::BasicPublish(r) => &r.rid,
            Request::BasicAck(r) => &r.rid,
            Request::BasicConsume(r) => &r.rid,
            Request::BasicCancel(r) => &r.rid,
        }
    }

    pub fn channel_id(&self) -> &str {
        match self {
            Request::OpenChannel(r) => &r.cid,
            Request::CloseChannel(r) => &r.cid,
            Request::DeclareExchange(r) => &r.cid,
            Request::DeleteExchange(r) => &r.cid,
            Request::DeclareQueue(r) => &r.cid,
            Request::DeleteQueue(r) => &r.cid,
            Request::QueueBind(r) => &r.cid,
            Request::QueueUnbind(r) => &r.cid,
            Request::BasicPublish(r) => &r.cid,
            Request::BasicAck(r) => &r.cid,
            Request::BasicConsume(r) => &r.cid,
            Request::BasicCancel(r) => &r.cid,
        }
    }

    /// Operation name used in logs and client errors
    pub fn operation(&self) -> &'static str {
        match self {
            Request::OpenChannel(_) => "open_channel",
            Request::CloseChannel(_) => "close_channel",
            Request::DeclareExchange(_) => "declare_exchange",
            Request::DeleteExchange(_) => "delete_exchange",
            Request::DeclareQueue(_) => "declare_queue",
            Request::DeleteQueue(_) => "delete_queue",
            Request::QueueBind(_) => "queue_bind",
            Request::QueueUnbind(_) => "queue_unbind",
            Request::BasicPublish(_) => "basic_publish",
            Request::BasicAck(_) => "basic_ack",
            Request::BasicConsume(_) => "basic_consume",
            Request::BasicCancel(_) => "basic_cancel",
        }
    }
}

/// Acknowledgment sent for every request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommonResponse {
    pub rid: RequestId,
    pub cid: ChannelId,
    pub ok: bool,
}

impl CommonResponse {
    pub fn new(rid: impl Into<String>, cid: impl Into<String>, ok: bool) -> Self {
        Self {
            rid: rid.into(),
            cid: cid.into(),
            ok,
        }
    }
}

/// A message pushed to a subscribed consumer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliverResponse {
    pub cid: ChannelId,
    pub consumer_tag: String,
    pub properties: Option<BasicProperties>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Common(CommonResponse),
    Deliver(DeliverResponse),
}

impl Response {
    pub fn channel_id(&self) -> &str {
        match self {
            Response::Common(r) => &r.cid,
            Response::Deliver(r) => &r.cid,
        }
    }
}
