//! Client channels and request/response correlation
//!
//! Every request carries a fresh request id. Before the request is written,
//! the channel registers a one-shot completion under that id in its pending
//! table; the connection's reader completes it when the matching response
//! arrives. Waiting is bounded by the configured request timeout, and the
//! entry is removed however the wait ends, including when the caller drops
//! the future.

use crate::consumer::{ActiveConsumer, Delivery, DeliveryHandler};
use crate::error::TidemqClientError;
use crate::Result;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tidemq::protocol::{
    Args, BasicAckRequest, BasicCancelRequest, BasicConsumeRequest, BasicProperties,
    BasicPublishRequest, ChannelId, DeclareExchangeRequest, DeclareQueueRequest,
    DeleteExchangeRequest, DeleteQueueRequest, DeliverResponse, ExchangeType, QueueBindRequest,
    QueueUnbindRequest, Request, RequestId,
};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, warn};

type PendingTable = DashMap<RequestId, oneshot::Sender<bool>>;

/// State of a channel shared with the connection's reader
pub(crate) struct ChannelState {
    cid: ChannelId,
    pending: PendingTable,
    consumer: Mutex<Option<ActiveConsumer>>,
    closed: AtomicBool,
}

impl ChannelState {
    pub(crate) fn new(cid: &str) -> Self {
        Self {
            cid: cid.to_string(),
            pending: DashMap::new(),
            consumer: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Resolve the waiter of `rid`
    pub(crate) fn complete(&self, rid: &str, ok: bool) {
        match self.pending.remove(rid) {
            Some((_, waiter)) => {
                let _ = waiter.send(ok);
            }
            None => debug!("Response {} on channel {} has no waiter", rid, self.cid),
        }
    }

    /// Hand a delivery to the channel's consumer
    pub(crate) fn dispatch(&self, frame: DeliverResponse) {
        let consumer = self.consumer.lock();
        match consumer.as_ref() {
            Some(active) if active.tag == frame.consumer_tag => {
                if !active.push(Delivery::from(frame)) {
                    warn!("Delivery task of '{}' has stopped", active.tag);
                }
            }
            _ => warn!(
                "Dropping delivery for unknown consumer '{}' on channel {}",
                frame.consumer_tag, self.cid
            ),
        }
    }

    /// Fail every waiter and stop the consumer
    pub(crate) fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.pending.clear();
        self.consumer.lock().take();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Removes a pending entry when the wait ends, whatever the outcome
struct PendingGuard<'a> {
    table: &'a PendingTable,
    rid: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.table.remove(self.rid);
    }
}

/// A channel on a broker connection
pub struct Channel {
    state: Arc<ChannelState>,
    outbound: mpsc::UnboundedSender<Request>,
    request_timeout: Duration,
}

impl Channel {
    pub(crate) fn new(
        state: Arc<ChannelState>,
        outbound: mpsc::UnboundedSender<Request>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            state,
            outbound,
            request_timeout,
        }
    }

    pub fn id(&self) -> &str {
        &self.state.cid
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    pub(crate) fn state(&self) -> &Arc<ChannelState> {
        &self.state
    }

    /// Tag of the active subscription
    pub fn consumer_tag(&self) -> Option<String> {
        self.state.consumer.lock().as_ref().map(|c| c.tag.clone())
    }

    fn rid() -> RequestId {
        uuid::Uuid::new_v4().to_string()
    }

    fn cid(&self) -> ChannelId {
        self.state.cid.clone()
    }

    /// Send `request` and wait for its acknowledgment
    pub(crate) async fn call(&self, request: Request) -> Result<()> {
        let rid = request.request_id().to_string();
        let operation = request.operation();
        if self.state.is_closed() {
            return Err(TidemqClientError::ChannelClosed);
        }

        let (tx, rx) = oneshot::channel();
        self.state.pending.insert(rid.clone(), tx);
        let _guard = PendingGuard {
            table: &self.state.pending,
            rid: &rid,
        };
        // Closed between the check and the insert
        if self.state.is_closed() {
            return Err(TidemqClientError::ChannelClosed);
        }

        self.outbound
            .send(request)
            .map_err(|_| TidemqClientError::ChannelClosed)?;
        debug!("Sent {} ({}) on channel {}", operation, rid, self.state.cid);

        match timeout(self.request_timeout, rx).await {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => Err(TidemqClientError::rejected(operation)),
            Ok(Err(_)) => Err(TidemqClientError::ChannelClosed),
            Err(_) => {
                warn!("{} ({}) timed out on channel {}", operation, rid, self.state.cid);
                Err(TidemqClientError::timeout(self.request_timeout.as_millis() as u64))
            }
        }
    }

    pub async fn declare_exchange(
        &self,
        exchange_name: &str,
        exchange_type: ExchangeType,
        durable: bool,
        auto_delete: bool,
    ) -> Result<()> {
        self.call(Request::DeclareExchange(DeclareExchangeRequest {
            rid: Self::rid(),
            cid: self.cid(),
            exchange_name: exchange_name.to_string(),
            exchange_type,
            durable,
            auto_delete,
            args: Args::new(),
        }))
        .await
    }

    pub async fn delete_exchange(&self, exchange_name: &str) -> Result<()> {
        self.call(Request::DeleteExchange(DeleteExchangeRequest {
            rid: Self::rid(),
            cid: self.cid(),
            exchange_name: exchange_name.to_string(),
        }))
        .await
    }

    pub async fn declare_queue(
        &self,
        queue_name: &str,
        durable: bool,
        exclusive: bool,
        auto_delete: bool,
    ) -> Result<()> {
        self.call(Request::DeclareQueue(DeclareQueueRequest {
            rid: Self::rid(),
            cid: self.cid(),
            queue_name: queue_name.to_string(),
            durable,
            exclusive,
            auto_delete,
            args: Args::new(),
        }))
        .await
    }

    pub async fn delete_queue(&self, queue_name: &str) -> Result<()> {
        self.call(Request::DeleteQueue(DeleteQueueRequest {
            rid: Self::rid(),
            cid: self.cid(),
            queue_name: queue_name.to_string(),
        }))
        .await
    }

    pub async fn queue_bind(
        &self,
        exchange_name: &str,
        queue_name: &str,
        binding_key: &str,
    ) -> Result<()> {
        self.call(Request::QueueBind(QueueBindRequest {
            rid: Self::rid(),
            cid: self.cid(),
            exchange_name: exchange_name.to_string(),
            queue_name: queue_name.to_string(),
            binding_key: binding_key.to_string(),
        }))
        .await
    }

    pub async fn queue_unbind(&self, exchange_name: &str, queue_name: &str) -> Result<()> {
        self.call(Request::QueueUnbind(QueueUnbindRequest {
            rid: Self::rid(),
            cid: self.cid(),
            exchange_name: exchange_name.to_string(),
            queue_name: queue_name.to_string(),
        }))
        .await
    }

    /// Publish through an exchange. The routing key travels in `properties`;
    /// without properties the message is routed with an empty key.
    pub async fn basic_publish<B: Into<Vec<u8>>>(
        &self,
        exchange_name: &str,
        properties: Option<BasicProperties>,
        body: B,
    ) -> Result<()> {
        self.call(Request::BasicPublish(BasicPublishRequest {
            rid: Self::rid(),
            cid: self.cid(),
            exchange_name: exchange_name.to_string(),
            properties,
            body: body.into(),
        }))
        .await
    }

    /// Acknowledge a message delivered to this channel's consumer
    pub async fn basic_ack(&self, message_id: &str) -> Result<()> {
        let queue_name = self
            .state
            .consumer
            .lock()
            .as_ref()
            .map(|c| c.queue_name.clone())
            .ok_or_else(|| TidemqClientError::consumer("channel has no active consumer"))?;

        self.call(Request::BasicAck(BasicAckRequest {
            rid: Self::rid(),
            cid: self.cid(),
            queue_name,
            message_id: message_id.to_string(),
        }))
        .await
    }

    /// Subscribe to `queue_name`. A channel holds at most one subscription.
    pub async fn basic_consume<H: DeliveryHandler>(
        &self,
        consumer_tag: &str,
        queue_name: &str,
        auto_ack: bool,
        handler: H,
    ) -> Result<()> {
        {
            let mut consumer = self.state.consumer.lock();
            if let Some(active) = consumer.as_ref() {
                return Err(TidemqClientError::consumer(format!(
                    "channel already consumes as '{}'",
                    active.tag
                )));
            }
            // Installed first: deliveries may follow the acknowledgment closely
            *consumer = Some(ActiveConsumer::spawn(consumer_tag, queue_name, handler));
        }

        let result = self
            .call(Request::BasicConsume(BasicConsumeRequest {
                rid: Self::rid(),
                cid: self.cid(),
                consumer_tag: consumer_tag.to_string(),
                queue_name: queue_name.to_string(),
                auto_ack,
            }))
            .await;

        if result.is_err() {
            self.state.consumer.lock().take();
        }
        result
    }

    /// End the active subscription
    pub async fn basic_cancel(&self) -> Result<()> {
        let (consumer_tag, queue_name) = self
            .state
            .consumer
            .lock()
            .as_ref()
            .map(|c| (c.tag.clone(), c.queue_name.clone()))
            .ok_or_else(|| TidemqClientError::consumer("channel has no active consumer"))?;

        self.call(Request::BasicCancel(BasicCancelRequest {
            rid: Self::rid(),
            cid: self.cid(),
            consumer_tag,
            queue_name,
        }))
        .await?;
        self.state.consumer.lock().take();
        Ok(())
    }
}
