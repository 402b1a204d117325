use super::{ConnectionManager, MessageHandler};
use crate::config::BrokerConfig;
use crate::pool::WorkerPool;
use crate::protocol::ServerCodec;
use crate::vhost::VirtualHost;
use crate::{Result, TidemqError};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

pub struct BrokerServer {
    config: BrokerConfig,
    handler: Arc<MessageHandler>,
    connections: Arc<ConnectionManager>,
    // Graceful shutdown coordination
    shutdown_tx: broadcast::Sender<()>,
}

impl BrokerServer {
    /// Open the virtual host, recovering its state, and start the worker pool
    pub fn new(config: BrokerConfig) -> Result<Self> {
        config.validate().map_err(TidemqError::Config)?;

        let host = Arc::new(VirtualHost::from_config(&config)?);
        let pool = Arc::new(WorkerPool::new(config.worker_threads)?);
        let handler = Arc::new(MessageHandler::new(host, pool));
        let (shutdown_tx, _) = broadcast::channel(16);

        Ok(Self {
            config,
            handler,
            connections: Arc::new(ConnectionManager::new()),
            shutdown_tx,
        })
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn handler(&self) -> &Arc<MessageHandler> {
        &self.handler
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// A sender that stops [`serve`](Self::serve) and every connection loop
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Bind `host:port` and serve until shutdown
    pub async fn run(&self) -> Result<()> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener until shutdown
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        info!(
            "TideMQ broker listening on {} (vhost '{}')",
            listener.local_addr()?,
            self.handler.host().name()
        );
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            if let Err(e) = stream.set_nodelay(true) {
                                warn!("Failed to set TCP_NODELAY for {}: {}", peer_addr, e);
                            }

                            let handler = Arc::clone(&self.handler);
                            let connections = Arc::clone(&self.connections);
                            let max_frame_size = self.config.max_frame_size;
                            let shutdown_rx = self.shutdown_tx.subscribe();

                            tokio::spawn(async move {
                                if let Err(e) = Self::handle_client(
                                    stream,
                                    peer_addr,
                                    handler,
                                    connections,
                                    max_frame_size,
                                    shutdown_rx,
                                )
                                .await
                                {
                                    error!("Error handling client {}: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Received shutdown signal, stopping server gracefully...");
                    break;
                }
            }
        }

        self.connections.close_all();
        info!("Server shutdown complete");
        Ok(())
    }

    /// One loop per connection: requests are executed one at a time in
    /// arrival order on the blocking pool, since they may write and fsync
    /// logs and catalog tables. Deliveries queued by the worker pool are
    /// written as they arrive.
    async fn handle_client(
        stream: TcpStream,
        peer_addr: SocketAddr,
        handler: Arc<MessageHandler>,
        connections: Arc<ConnectionManager>,
        max_frame_size: usize,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        let (sender, mut outbound) = mpsc::unbounded_channel();
        let connection = connections.register(Some(peer_addr), sender);
        let mut framed = Framed::new(stream, ServerCodec::new(max_frame_size));

        let result = loop {
            tokio::select! {
                inbound = framed.next() => {
                    match inbound {
                        Some(Ok(request)) => {
                            let handler = Arc::clone(&handler);
                            let conn = Arc::clone(&connection);
                            let response = match tokio::task::spawn_blocking(move || {
                                handler.handle_request(&conn, request)
                            })
                            .await
                            {
                                Ok(response) => response,
                                Err(e) => {
                                    break Err(TidemqError::Task(format!(
                                        "request from {} failed: {}",
                                        peer_addr, e
                                    )));
                                }
                            };
                            if let Err(e) = framed.send(response).await {
                                break Err(e.into());
                            }
                        }
                        Some(Err(e)) => {
                            warn!("Failed to decode frame from {}: {}", peer_addr, e);
                            break Ok(());
                        }
                        None => break Ok(()),
                    }
                }
                Some(frame) = outbound.recv() => {
                    if let Err(e) = framed.send(frame).await {
                        break Err(e.into());
                    }
                }
                _ = shutdown_rx.recv() => {
                    debug!("Closing connection {} for shutdown", connection.id());
                    break Ok(());
                }
            }
        };

        connections.remove(connection.id());
        info!("Client {} disconnected", peer_addr);
        result
    }
}
