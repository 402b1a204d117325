use super::ResponseSender;
use crate::consumer::{Consumer, Deliver};
use crate::pool::WorkerPool;
use crate::protocol::{
    BasicAckRequest, BasicCancelRequest, BasicConsumeRequest, BasicProperties,
    BasicPublishRequest, ChannelId, CommonResponse, DeclareExchangeRequest, DeclareQueueRequest,
    DeleteExchangeRequest, DeleteQueueRequest, DeliverResponse, MessageId, QueueBindRequest,
    QueueUnbindRequest, Request, Response, MAX_MESSAGE_ID_LEN,
};
use crate::router;
use crate::storage::Message;
use crate::vhost::VirtualHost;
use crate::{Result, TidemqError};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Deliveries handed to one subscription. Once `closed` is set the
/// subscription takes no more messages.
#[derive(Debug, Default)]
struct Outstanding {
    closed: bool,
    /// Delivered but unacknowledged ids, in delivery order
    unacked: Vec<MessageId>,
}

type SharedOutstanding = Arc<Mutex<Outstanding>>;

/// Delivers to a consumer by pushing a delivery frame onto the owning
/// connection's outbound queue.
pub struct ChannelDelivery {
    cid: ChannelId,
    sender: ResponseSender,
    outstanding: SharedOutstanding,
    track_unacked: bool,
}

impl ChannelDelivery {
    pub fn new(cid: &str, sender: ResponseSender) -> Self {
        Self {
            cid: cid.to_string(),
            sender,
            outstanding: SharedOutstanding::default(),
            track_unacked: false,
        }
    }

    fn tracking(mut self, outstanding: SharedOutstanding, track_unacked: bool) -> Self {
        self.outstanding = outstanding;
        self.track_unacked = track_unacked;
        self
    }
}

impl Deliver for ChannelDelivery {
    fn deliver(&self, consumer_tag: &str, properties: &BasicProperties, body: &[u8]) -> bool {
        // Held across the send so a closing subscription sees every id it owns
        let mut outstanding = self.outstanding.lock();
        if outstanding.closed {
            return false;
        }
        if self.track_unacked {
            outstanding.unacked.push(properties.id.clone());
        }

        let frame = Response::Deliver(DeliverResponse {
            cid: self.cid.clone(),
            consumer_tag: consumer_tag.to_string(),
            properties: Some(properties.clone()),
            body: body.to_vec(),
        });
        if self.sender.send(frame).is_err() {
            debug!(
                "Connection of channel {} is gone, dropping delivery of {}",
                self.cid, properties.id
            );
        }
        true
    }
}

/// Hand the head of `queue_name` to the next consumer in rotation and
/// acknowledge it right away for auto-ack consumers. Returns whether a
/// message was delivered.
///
/// A queue without consumers keeps its messages pending.
pub fn deliver_next(host: &VirtualHost, queue_name: &str) -> bool {
    let consumers = host.consumers();
    if consumers.is_empty(queue_name) {
        return false;
    }
    let Some(message) = host.basic_consume(queue_name) else {
        return false;
    };
    match consumers.choose(queue_name) {
        Some(consumer) => deliver_to(host, queue_name, &message, consumer),
        None => {
            // The last consumer left after the check
            requeue(host, queue_name, &message);
            false
        }
    }
}

/// Deliver a message taken from `queue_name` to `consumer`, moving on to the
/// next consumer in rotation if it has already left. A message nobody takes
/// goes back to the head of the queue.
pub fn deliver_to(
    host: &VirtualHost,
    queue_name: &str,
    message: &Message,
    consumer: Arc<Consumer>,
) -> bool {
    let mut candidate = Some(consumer);
    while let Some(consumer) = candidate {
        if consumer.deliver(message) {
            debug!(
                "Delivered {} from '{}' to consumer '{}'",
                message.id(),
                queue_name,
                consumer.tag
            );
            if consumer.auto_ack {
                if let Err(e) = host.basic_ack(queue_name, message.id()) {
                    warn!("Auto-ack of {} on '{}' failed: {}", message.id(), queue_name, e);
                }
            }
            return true;
        }

        debug!(
            "Consumer '{}' left before {} reached it",
            consumer.tag,
            message.id()
        );
        candidate = host
            .consumers()
            .choose(queue_name)
            .filter(|next| !Arc::ptr_eq(next, &consumer));
    }

    requeue(host, queue_name, message);
    false
}

fn requeue(host: &VirtualHost, queue_name: &str, message: &Message) {
    if let Err(e) = host.basic_requeue(queue_name, message.id()) {
        warn!("Failed to requeue {} on '{}': {}", message.id(), queue_name, e);
    }
}

struct Subscription {
    consumer: Arc<Consumer>,
    outstanding: SharedOutstanding,
}

/// Executes requests against the virtual host. Holds no state besides an
/// optional consumer subscription.
pub struct Channel {
    cid: ChannelId,
    host: Arc<VirtualHost>,
    pool: Arc<WorkerPool>,
    sender: ResponseSender,
    subscription: Mutex<Option<Subscription>>,
}

impl Channel {
    pub fn new(
        cid: &str,
        host: Arc<VirtualHost>,
        pool: Arc<WorkerPool>,
        sender: ResponseSender,
    ) -> Self {
        Self {
            cid: cid.to_string(),
            host,
            pool,
            sender,
            subscription: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.cid
    }

    pub fn consumer(&self) -> Option<Arc<Consumer>> {
        self.subscription
            .lock()
            .as_ref()
            .map(|s| Arc::clone(&s.consumer))
    }

    /// Execute `request` and acknowledge it. Failures are logged and
    /// reported as `ok: false`.
    pub fn handle(&self, request: Request) -> CommonResponse {
        let rid = request.request_id().to_string();
        let operation = request.operation();

        let result = match request {
            Request::DeclareExchange(r) => self.declare_exchange(r),
            Request::DeleteExchange(r) => self.delete_exchange(r),
            Request::DeclareQueue(r) => self.declare_queue(r),
            Request::DeleteQueue(r) => self.delete_queue(r),
            Request::QueueBind(r) => self.queue_bind(r),
            Request::QueueUnbind(r) => self.queue_unbind(r),
            Request::BasicPublish(r) => self.basic_publish(r),
            Request::BasicAck(r) => self.basic_ack(r),
            Request::BasicConsume(r) => self.basic_consume(r),
            Request::BasicCancel(r) => self.basic_cancel(r),
            Request::OpenChannel(_) | Request::CloseChannel(_) => Err(TidemqError::Protocol(
                format!("{} is not a channel operation", operation),
            )),
        };

        let ok = match result {
            Ok(()) => {
                debug!("{} on channel {} succeeded", operation, self.cid);
                true
            }
            Err(e) => {
                warn!("{} on channel {} failed: {}", operation, self.cid, e);
                false
            }
        };
        CommonResponse::new(rid, self.cid.clone(), ok)
    }

    pub fn declare_exchange(&self, request: DeclareExchangeRequest) -> Result<()> {
        self.host.declare_exchange(
            &request.exchange_name,
            request.exchange_type,
            request.durable,
            request.auto_delete,
            request.args,
        )
    }

    pub fn delete_exchange(&self, request: DeleteExchangeRequest) -> Result<()> {
        self.host.delete_exchange(&request.exchange_name)
    }

    pub fn declare_queue(&self, request: DeclareQueueRequest) -> Result<()> {
        self.host.declare_queue(
            &request.queue_name,
            request.durable,
            request.exclusive,
            request.auto_delete,
            request.args,
        )
    }

    pub fn delete_queue(&self, request: DeleteQueueRequest) -> Result<()> {
        self.host.delete_queue(&request.queue_name)
    }

    pub fn queue_bind(&self, request: QueueBindRequest) -> Result<()> {
        self.host
            .bind(&request.exchange_name, &request.queue_name, &request.binding_key)
    }

    pub fn queue_unbind(&self, request: QueueUnbindRequest) -> Result<()> {
        self.host
            .unbind(&request.exchange_name, &request.queue_name)
    }

    /// Route a message through an exchange. Every bound queue whose binding
    /// key matches gets its own copy. Delivery is scheduled only once every
    /// copy is stored; if any copy fails, the ones already stored are
    /// withdrawn and nothing is delivered.
    pub fn basic_publish(&self, request: BasicPublishRequest) -> Result<()> {
        let exchange = self
            .host
            .select_exchange(&request.exchange_name)
            .ok_or_else(|| TidemqError::NotFound(format!("exchange '{}'", request.exchange_name)))?;

        let routing_key = match &request.properties {
            Some(properties) => {
                if properties.id.len() > MAX_MESSAGE_ID_LEN {
                    return Err(TidemqError::Protocol(format!(
                        "message id of {} bytes exceeds {} bytes",
                        properties.id.len(),
                        MAX_MESSAGE_ID_LEN
                    )));
                }
                properties.routing_key.clone()
            }
            None => String::new(),
        };
        router::validate_routing_key(&routing_key)?;

        let targets: Vec<String> = self
            .host
            .exchange_bindings(&exchange.name)
            .into_iter()
            .filter(|(_, binding)| {
                router::route(exchange.exchange_type, &routing_key, &binding.binding_key)
            })
            .map(|(queue_name, _)| queue_name)
            .collect();

        let body = Bytes::from(request.body);
        let mut stored: Vec<(String, Arc<Message>)> = Vec::with_capacity(targets.len());
        for queue_name in targets {
            match self
                .host
                .basic_publish(&queue_name, request.properties.clone(), body.clone())
            {
                Ok(message) => stored.push((queue_name, message)),
                Err(e) => {
                    self.withdraw(&stored);
                    return Err(e);
                }
            }
        }

        debug!(
            "Routed '{}' through '{}' to {} queues",
            routing_key,
            exchange.name,
            stored.len()
        );
        for (queue_name, _) in stored {
            self.schedule_delivery(queue_name);
        }
        Ok(())
    }

    fn withdraw(&self, stored: &[(String, Arc<Message>)]) {
        for (queue_name, message) in stored {
            if let Err(e) = self.host.basic_retract(queue_name, message.id()) {
                warn!(
                    "Failed to withdraw {} from '{}' after a failed publish: {}",
                    message.id(),
                    queue_name,
                    e
                );
            }
        }
    }

    pub fn basic_ack(&self, request: BasicAckRequest) -> Result<()> {
        self.host
            .basic_ack(&request.queue_name, &request.message_id)?;
        if let Some(active) = self.subscription.lock().as_ref() {
            active
                .outstanding
                .lock()
                .unacked
                .retain(|id| id != &request.message_id);
        }
        Ok(())
    }

    /// Subscribe this channel to a queue. One subscription per channel;
    /// messages already waiting in the queue are scheduled for delivery.
    pub fn basic_consume(&self, request: BasicConsumeRequest) -> Result<()> {
        let mut subscription = self.subscription.lock();
        if let Some(active) = subscription.as_ref() {
            return Err(TidemqError::Conflict(format!(
                "channel {} already consumes as '{}'",
                self.cid, active.consumer.tag
            )));
        }
        if !self.host.exists_queue(&request.queue_name) {
            return Err(TidemqError::NotFound(format!("queue '{}'", request.queue_name)));
        }

        let outstanding = SharedOutstanding::default();
        let sink = ChannelDelivery::new(&self.cid, self.sender.clone())
            .tracking(Arc::clone(&outstanding), !request.auto_ack);
        let consumer = self.host.consumers().create(
            &request.consumer_tag,
            &request.queue_name,
            request.auto_ack,
            Arc::new(sink),
        )?;
        *subscription = Some(Subscription {
            consumer,
            outstanding,
        });
        drop(subscription);

        info!(
            "Consumer '{}' subscribed to '{}' on channel {}",
            request.consumer_tag, request.queue_name, self.cid
        );
        let pending = self.host.messages().pending_count(&request.queue_name);
        for _ in 0..pending {
            self.schedule_delivery(request.queue_name.clone());
        }
        Ok(())
    }

    pub fn basic_cancel(&self, request: BasicCancelRequest) -> Result<()> {
        let ended = {
            let mut subscription = self.subscription.lock();
            let matches = subscription.as_ref().is_some_and(|active| {
                active.consumer.tag == request.consumer_tag
                    && active.consumer.queue_name == request.queue_name
            });
            if !matches {
                return Err(TidemqError::NotFound(format!(
                    "consumer '{}' on '{}'",
                    request.consumer_tag, request.queue_name
                )));
            }
            subscription.take()
        };

        if let Some(ended) = ended {
            self.end_subscription(ended);
        }
        Ok(())
    }

    /// Cancel the active subscription, if any
    pub fn shutdown(&self) {
        let ended = self.subscription.lock().take();
        if let Some(ended) = ended {
            self.end_subscription(ended);
        }
    }

    /// Unregister the consumer and put its unacknowledged messages back at
    /// the head of the queue, in their original order. A delivery racing with
    /// this either lands before the sink closes, and is requeued here, or is
    /// refused and requeued by the worker.
    fn end_subscription(&self, subscription: Subscription) {
        let consumer = subscription.consumer;
        self.host
            .consumers()
            .remove(&consumer.tag, &consumer.queue_name);

        let unacked = {
            let mut outstanding = subscription.outstanding.lock();
            outstanding.closed = true;
            std::mem::take(&mut outstanding.unacked)
        };
        let mut requeued = 0;
        for id in unacked.iter().rev() {
            match self.host.basic_requeue(&consumer.queue_name, id) {
                Ok(()) => requeued += 1,
                Err(e) => debug!("Message {} not requeued: {}", id, e),
            }
        }
        for _ in 0..requeued {
            self.schedule_delivery(consumer.queue_name.clone());
        }

        info!(
            "Consumer '{}' left '{}' on channel {} ({} requeued)",
            consumer.tag, consumer.queue_name, self.cid, requeued
        );
    }

    fn schedule_delivery(&self, queue_name: String) {
        let host = Arc::clone(&self.host);
        if let Err(e) = self.pool.submit(move || deliver_next(&host, &queue_name)) {
            warn!("Failed to schedule delivery: {}", e);
        }
    }
}

/// Channels of one connection keyed by channel id
#[derive(Default)]
pub struct ChannelManager {
    channels: Mutex<HashMap<ChannelId, Arc<Channel>>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, channel: Channel) -> Result<Arc<Channel>> {
        match self.channels.lock().entry(channel.id().to_string()) {
            Entry::Occupied(_) => Err(TidemqError::Conflict(format!(
                "channel {} is already open",
                channel.id()
            ))),
            Entry::Vacant(entry) => Ok(Arc::clone(entry.insert(Arc::new(channel)))),
        }
    }

    /// Remove the channel and cancel its consumer
    pub fn close(&self, cid: &str) -> bool {
        let removed = self.channels.lock().remove(cid);
        match removed {
            Some(channel) => {
                channel.shutdown();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, cid: &str) -> Option<Arc<Channel>> {
        self.channels.lock().get(cid).cloned()
    }

    pub fn len(&self) -> usize {
        self.channels.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.lock().is_empty()
    }

    pub fn close_all(&self) {
        let channels: Vec<_> = self
            .channels
            .lock()
            .drain()
            .map(|(_, channel)| channel)
            .collect();
        for channel in channels {
            channel.shutdown();
        }
    }
}
