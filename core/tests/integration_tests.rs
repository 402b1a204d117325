use std::sync::Arc;
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use tidemq::{
    broker::{Connection, MessageHandler},
    pool::WorkerPool,
    protocol::{
        BasicAckRequest, BasicCancelRequest, BasicConsumeRequest, BasicProperties,
        BasicPublishRequest, DeclareExchangeRequest, DeclareQueueRequest, DeleteExchangeRequest,
        DeleteQueueRequest, DeliverResponse, DeliveryMode, ExchangeType, OpenChannelRequest,
        QueueBindRequest, QueueUnbindRequest, Request, Response,
    },
    storage::StoreOptions,
    VirtualHost,
};
use tokio::sync::mpsc;
use tokio::time::timeout;

const CID: &str = "channel-1";

/// One connection with one open channel, driving the handler directly
struct Session {
    _dir: TempDir,
    handler: MessageHandler,
    connection: Connection,
    outbound: mpsc::UnboundedReceiver<Response>,
    next_rid: u32,
}

impl Session {
    fn open() -> Self {
        let dir = tempdir().expect("Failed to create temp dir");
        let options = StoreOptions {
            sync_writes: false,
            gc_min_records: 2000,
        };
        let host = Arc::new(
            VirtualHost::open("test", dir.path(), options).expect("Failed to open host"),
        );
        let pool = Arc::new(WorkerPool::new(2).expect("Failed to start pool"));
        let handler = MessageHandler::new(host, pool);
        let (sender, outbound) = mpsc::unbounded_channel();
        let connection = Connection::new(1, None, sender);

        let mut session = Self {
            _dir: dir,
            handler,
            connection,
            outbound,
            next_rid: 0,
        };
        let rid = session.rid();
        assert!(session.call(Request::OpenChannel(OpenChannelRequest {
            rid,
            cid: CID.to_string(),
        })));
        session
    }

    fn rid(&mut self) -> String {
        self.next_rid += 1;
        format!("rid-{}", self.next_rid)
    }

    /// Send a request and check the response is correlated to it
    fn call(&mut self, request: Request) -> bool {
        let rid = request.request_id().to_string();
        match self.handler.handle_request(&self.connection, request) {
            Response::Common(common) => {
                assert_eq!(common.rid, rid);
                assert_eq!(common.cid, CID);
                common.ok
            }
            other => panic!("Expected a common response, got {:?}", other),
        }
    }

    fn declare_exchange(&mut self, name: &str, exchange_type: ExchangeType, durable: bool) -> bool {
        let rid = self.rid();
        self.call(Request::DeclareExchange(DeclareExchangeRequest {
            rid,
            cid: CID.to_string(),
            exchange_name: name.to_string(),
            exchange_type,
            durable,
            auto_delete: false,
            args: Default::default(),
        }))
    }

    fn declare_queue(&mut self, name: &str, durable: bool) -> bool {
        let rid = self.rid();
        self.call(Request::DeclareQueue(DeclareQueueRequest {
            rid,
            cid: CID.to_string(),
            queue_name: name.to_string(),
            durable,
            exclusive: false,
            auto_delete: false,
            args: Default::default(),
        }))
    }

    fn bind(&mut self, exchange: &str, queue: &str, binding_key: &str) -> bool {
        let rid = self.rid();
        self.call(Request::QueueBind(QueueBindRequest {
            rid,
            cid: CID.to_string(),
            exchange_name: exchange.to_string(),
            queue_name: queue.to_string(),
            binding_key: binding_key.to_string(),
        }))
    }

    fn publish(&mut self, exchange: &str, routing_key: &str, body: &str) -> bool {
        let rid = self.rid();
        self.call(Request::BasicPublish(BasicPublishRequest {
            rid,
            cid: CID.to_string(),
            exchange_name: exchange.to_string(),
            properties: Some(BasicProperties::with_routing_key(DeliveryMode::Durable, routing_key)),
            body: body.as_bytes().to_vec(),
        }))
    }

    fn consume(&mut self, tag: &str, queue: &str, auto_ack: bool) -> bool {
        let rid = self.rid();
        self.call(Request::BasicConsume(BasicConsumeRequest {
            rid,
            cid: CID.to_string(),
            consumer_tag: tag.to_string(),
            queue_name: queue.to_string(),
            auto_ack,
        }))
    }

    fn ack(&mut self, queue: &str, message_id: &str) -> bool {
        let rid = self.rid();
        self.call(Request::BasicAck(BasicAckRequest {
            rid,
            cid: CID.to_string(),
            queue_name: queue.to_string(),
            message_id: message_id.to_string(),
        }))
    }

    async fn delivery(&mut self) -> DeliverResponse {
        match timeout(Duration::from_secs(5), self.outbound.recv()).await {
            Ok(Some(Response::Deliver(delivery))) => delivery,
            other => panic!("Expected a delivery, got {:?}", other),
        }
    }

    async fn assert_no_delivery(&mut self) {
        let next = timeout(Duration::from_millis(200), self.outbound.recv()).await;
        assert!(next.is_err(), "Unexpected frame: {:?}", next);
    }

    fn host(&self) -> &Arc<VirtualHost> {
        self.handler.host()
    }
}

#[tokio::test]
async fn test_topic_publish_delivered_once_then_acked() {
    let mut session = Session::open();
    assert!(session.declare_exchange("exchange1", ExchangeType::Topic, true));
    assert!(session.declare_queue("queue1", true));
    assert!(session.bind("exchange1", "queue1", "news.music.#"));

    assert!(session.publish("exchange1", "news.music.pop", "hello"));
    let head = session
        .host()
        .messages()
        .queue("queue1")
        .and_then(|q| q.front())
        .expect("Message should be at the head of queue1");
    assert_eq!(head.body.as_ref(), b"hello");
    session
        .host()
        .basic_requeue("queue1", head.id())
        .expect("Failed to put message back");

    assert!(session.consume("consumer1", "queue1", false));
    let delivery = session.delivery().await;
    assert_eq!(delivery.cid, CID);
    assert_eq!(delivery.consumer_tag, "consumer1");
    assert_eq!(delivery.body, b"hello".to_vec());
    let properties = delivery.properties.expect("Delivery without properties");
    assert_eq!(properties.routing_key, "news.music.pop");
    session.assert_no_delivery().await;

    assert!(session.ack("queue1", &properties.id));
    assert_eq!(session.host().messages().waitack_count("queue1"), 0);
    assert_eq!(session.host().messages().pending_count("queue1"), 0);
    assert!(!session.ack("queue1", &properties.id));
}

#[tokio::test]
async fn test_exchange_types_route_to_bound_queues() {
    let mut session = Session::open();
    assert!(session.declare_exchange("direct", ExchangeType::Direct, false));
    assert!(session.declare_exchange("fanout", ExchangeType::Fanout, false));
    assert!(session.declare_queue("a", false));
    assert!(session.declare_queue("b", false));
    assert!(session.bind("direct", "a", "orders.created"));
    assert!(session.bind("direct", "b", "orders.cancelled"));
    assert!(session.bind("fanout", "a", "ignored"));
    assert!(session.bind("fanout", "b", "ignored"));

    assert!(session.publish("direct", "orders.created", "d1"));
    assert!(session.publish("direct", "orders.shipped", "d2"));
    assert!(session.publish("fanout", "anything", "f1"));

    let messages = session.host().messages();
    assert_eq!(messages.pending_count("a"), 2);
    assert_eq!(messages.pending_count("b"), 1);
    // Non-durable queues keep published copies in memory only
    assert_eq!(messages.total_count("a"), 0);
}

#[tokio::test]
async fn test_auto_ack_round_robin_across_channels() {
    let mut session = Session::open();
    assert!(session.declare_exchange("exchange1", ExchangeType::Fanout, true));
    assert!(session.declare_queue("queue1", true));
    assert!(session.bind("exchange1", "queue1", ""));
    assert!(session.consume("c1", "queue1", true));

    // A second channel on the same connection with its own consumer
    let rid = session.rid();
    assert!(matches!(
        session.handler.handle_request(
            &session.connection,
            Request::OpenChannel(OpenChannelRequest {
                rid,
                cid: "channel-2".to_string(),
            }),
        ),
        Response::Common(common) if common.ok
    ));
    let second = session
        .connection
        .channels()
        .get("channel-2")
        .expect("channel-2 missing");
    second
        .basic_consume(BasicConsumeRequest {
            rid: "direct".to_string(),
            cid: "channel-2".to_string(),
            consumer_tag: "c2".to_string(),
            queue_name: "queue1".to_string(),
            auto_ack: true,
        })
        .expect("Failed to subscribe c2");

    for i in 0..4 {
        assert!(session.publish("exchange1", "", &format!("m{}", i)));
    }

    let mut tags = Vec::new();
    for _ in 0..4 {
        tags.push(session.delivery().await.consumer_tag);
    }
    tags.sort();
    assert_eq!(tags, vec!["c1", "c1", "c2", "c2"]);

    // Auto-ack runs right after delivery on the worker
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(session.host().messages().durable_count("queue1"), 0);
}

#[tokio::test]
async fn test_failures_are_reported_not_fatal() {
    let mut session = Session::open();
    assert!(session.declare_queue("queue1", true));

    assert!(!session.bind("missing", "queue1", "a"));
    assert!(!session.publish("missing", "a", "x"));
    assert!(!session.consume("c1", "missing", false));
    assert!(!session.ack("queue1", "never-delivered"));

    assert!(session.declare_exchange("exchange1", ExchangeType::Topic, true));
    assert!(!session.bind("exchange1", "queue1", "news.music*"));
    assert!(session.bind("exchange1", "queue1", "news.music.*"));

    assert!(session.consume("c1", "queue1", false));
    assert!(!session.consume("c2", "queue1", false));

    let rid = session.rid();
    assert!(!session.call(Request::BasicCancel(BasicCancelRequest {
        rid,
        cid: CID.to_string(),
        consumer_tag: "c2".to_string(),
        queue_name: "queue1".to_string(),
    })));
    let rid = session.rid();
    assert!(session.call(Request::BasicCancel(BasicCancelRequest {
        rid,
        cid: CID.to_string(),
        consumer_tag: "c1".to_string(),
        queue_name: "queue1".to_string(),
    })));
}

#[tokio::test]
async fn test_deletes_cascade_bindings() {
    let mut session = Session::open();
    assert!(session.declare_exchange("e1", ExchangeType::Topic, true));
    assert!(session.declare_exchange("e2", ExchangeType::Topic, true));
    assert!(session.declare_queue("q1", true));
    assert!(session.declare_queue("q2", true));
    assert!(session.bind("e1", "q1", "#"));
    assert!(session.bind("e1", "q2", "#"));
    assert!(session.bind("e2", "q1", "#"));

    let rid = session.rid();
    assert!(session.call(Request::DeleteExchange(DeleteExchangeRequest {
        rid,
        cid: CID.to_string(),
        exchange_name: "e1".to_string(),
    })));
    assert!(!session.host().exists_binding("e1", "q1"));
    assert!(!session.host().exists_binding("e1", "q2"));
    assert!(session.host().exists_binding("e2", "q1"));

    let rid = session.rid();
    assert!(session.call(Request::DeleteQueue(DeleteQueueRequest {
        rid,
        cid: CID.to_string(),
        queue_name: "q1".to_string(),
    })));
    assert!(!session.host().exists_binding("e2", "q1"));
    assert!(!session.publish("e1", "a", "x"));
    assert!(session.publish("e2", "a", "x"));

    assert!(session.bind("e2", "q2", "a"));
    let rid = session.rid();
    assert!(session.call(Request::QueueUnbind(QueueUnbindRequest {
        rid,
        cid: CID.to_string(),
        exchange_name: "e2".to_string(),
        queue_name: "q2".to_string(),
    })));
    assert!(!session.host().exists_binding("e2", "q2"));
}

#[tokio::test]
async fn test_closing_connection_requeues_unacked() {
    let mut session = Session::open();
    assert!(session.declare_exchange("exchange1", ExchangeType::Direct, true));
    assert!(session.declare_queue("queue1", true));
    assert!(session.bind("exchange1", "queue1", "k"));
    assert!(session.consume("c1", "queue1", false));
    assert!(session.publish("exchange1", "k", "m1"));
    session.delivery().await;
    assert_eq!(session.host().messages().waitack_count("queue1"), 1);

    session.connection.close();
    assert!(session.connection.channels().is_empty());
    assert!(!session.host().consumers().exists("c1", "queue1"));
    assert_eq!(session.host().messages().waitack_count("queue1"), 0);
    assert_eq!(session.host().messages().pending_count("queue1"), 1);
}
