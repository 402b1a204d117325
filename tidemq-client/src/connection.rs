//! Connection management for the TideMQ client

use crate::channel::{Channel, ChannelState};
use crate::config::ClientConfig;
use crate::error::TidemqClientError;
use crate::Result;
use dashmap::DashMap;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tidemq::protocol::{
    ChannelId, ClientCodec, CloseChannelRequest, OpenChannelRequest, Request, Response,
};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

type Channels = Arc<DashMap<ChannelId, Arc<ChannelState>>>;

/// A connection to a broker. Requests from all channels share one writer
/// task; one reader task routes responses and deliveries to their channel.
pub struct Connection {
    broker: String,
    config: ClientConfig,
    outbound: mpsc::UnboundedSender<Request>,
    channels: Channels,
    closed: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Connection {
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let broker = config.broker.clone();
        debug!("Connecting to broker: {}", broker);

        let stream = timeout(config.connection_timeout, TcpStream::connect(&broker))
            .await
            .map_err(|_| TidemqClientError::timeout(config.connection_timeout.as_millis() as u64))?
            .map_err(|e| {
                TidemqClientError::connection(format!("Failed to connect to {}: {}", broker, e))
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY: {}", e);
        }

        let framed = Framed::new(stream, ClientCodec::new(config.max_frame_size));
        let (sink, frames) = framed.split();
        let (outbound, requests) = mpsc::unbounded_channel();
        let channels: Channels = Arc::new(DashMap::new());
        let closed = Arc::new(AtomicBool::new(false));

        let writer = tokio::spawn(Self::write_loop(broker.clone(), sink, requests));
        let reader = tokio::spawn(Self::read_loop(
            broker.clone(),
            frames,
            Arc::clone(&channels),
            Arc::clone(&closed),
        ));

        info!("Connected to broker: {}", broker);
        Ok(Self {
            broker,
            config,
            outbound,
            channels,
            closed,
            tasks: Mutex::new(vec![writer, reader]),
        })
    }

    async fn write_loop(
        broker: String,
        mut sink: SplitSink<Framed<TcpStream, ClientCodec>, Request>,
        mut requests: mpsc::UnboundedReceiver<Request>,
    ) {
        while let Some(request) = requests.recv().await {
            if let Err(e) = sink.send(request).await {
                error!("Failed to send request to {}: {}", broker, e);
                break;
            }
        }
        debug!("Writer for {} finished", broker);
    }

    async fn read_loop(
        broker: String,
        mut frames: SplitStream<Framed<TcpStream, ClientCodec>>,
        channels: Channels,
        closed: Arc<AtomicBool>,
    ) {
        while let Some(frame) = frames.next().await {
            match frame {
                Ok(Response::Common(response)) => match channels.get(&response.cid) {
                    Some(channel) => channel.complete(&response.rid, response.ok),
                    None => debug!("Response for unknown channel {}", response.cid),
                },
                Ok(Response::Deliver(delivery)) => match channels.get(&delivery.cid) {
                    Some(channel) => channel.dispatch(delivery),
                    None => warn!("Delivery for unknown channel {}", delivery.cid),
                },
                Err(e) => {
                    error!("Error receiving frame from {}: {}", broker, e);
                    break;
                }
            }
        }

        closed.store(true, Ordering::SeqCst);
        for channel in channels.iter() {
            channel.shutdown();
        }
        info!("Connection to {} closed", broker);
    }

    pub fn broker(&self) -> &str {
        &self.broker
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Open a new channel with a random id
    pub async fn open_channel(&self) -> Result<Channel> {
        if self.is_closed() {
            return Err(TidemqClientError::ChannelClosed);
        }

        let cid = uuid::Uuid::new_v4().to_string();
        let state = Arc::new(ChannelState::new(&cid));
        self.channels.insert(cid.clone(), Arc::clone(&state));
        let channel = Channel::new(state, self.outbound.clone(), self.config.request_timeout);

        let opened = channel
            .call(Request::OpenChannel(OpenChannelRequest {
                rid: uuid::Uuid::new_v4().to_string(),
                cid: cid.clone(),
            }))
            .await;
        if let Err(e) = opened {
            self.channels.remove(&cid);
            return Err(e);
        }

        debug!("Opened channel {} on {}", cid, self.broker);
        Ok(channel)
    }

    /// Close `channel` on the broker and stop its consumer
    pub async fn close_channel(&self, channel: &Channel) -> Result<()> {
        let result = channel
            .call(Request::CloseChannel(CloseChannelRequest {
                rid: uuid::Uuid::new_v4().to_string(),
                cid: channel.id().to_string(),
            }))
            .await;

        channel.state().shutdown();
        self.channels.remove(channel.id());
        debug!("Closed channel {} on {}", channel.id(), self.broker);
        result
    }

    /// Drop the transport. Pending requests on every channel fail.
    pub fn close(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.closed.store(true, Ordering::SeqCst);
        for channel in self.channels.iter() {
            channel.shutdown();
        }
        self.channels.clear();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}
