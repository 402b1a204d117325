//! Consumer-side delivery handling
//!
//! Deliveries for a subscription are queued to a dedicated task that calls
//! the subscription's [`DeliveryHandler`] one message at a time, in arrival
//! order. A slow handler delays only its own subscription.

use tidemq::protocol::{BasicProperties, DeliverResponse};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// A message pushed by the broker to a subscription
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub consumer_tag: String,
    pub properties: Option<BasicProperties>,
    pub body: Vec<u8>,
}

impl Delivery {
    /// Id to pass to `basic_ack`
    pub fn message_id(&self) -> Option<&str> {
        self.properties.as_ref().map(|p| p.id.as_str())
    }

    pub fn routing_key(&self) -> Option<&str> {
        self.properties.as_ref().map(|p| p.routing_key.as_str())
    }
}

impl From<DeliverResponse> for Delivery {
    fn from(frame: DeliverResponse) -> Self {
        Self {
            consumer_tag: frame.consumer_tag,
            properties: frame.properties,
            body: frame.body,
        }
    }
}

/// Receives deliveries of one subscription
pub trait DeliveryHandler: Send + Sync + 'static {
    fn handle(&self, delivery: Delivery);
}

impl<F> DeliveryHandler for F
where
    F: Fn(Delivery) + Send + Sync + 'static,
{
    fn handle(&self, delivery: Delivery) {
        self(delivery)
    }
}

/// The live subscription of a channel
pub(crate) struct ActiveConsumer {
    pub(crate) tag: String,
    pub(crate) queue_name: String,
    sender: mpsc::UnboundedSender<Delivery>,
    _task: JoinHandle<()>,
}

impl ActiveConsumer {
    /// Start the delivery task for `handler`
    pub(crate) fn spawn<H: DeliveryHandler>(tag: &str, queue_name: &str, handler: H) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Delivery>();
        let task_tag = tag.to_string();
        let task = tokio::spawn(async move {
            while let Some(delivery) = receiver.recv().await {
                handler.handle(delivery);
            }
            debug!("Delivery task for consumer '{}' finished", task_tag);
        });

        Self {
            tag: tag.to_string(),
            queue_name: queue_name.to_string(),
            sender,
            _task: task,
        }
    }

    /// Queue a delivery for the handler; false once the task has stopped
    pub(crate) fn push(&self, delivery: Delivery) -> bool {
        self.sender.send(delivery).is_ok()
    }
}
