use super::{Channel, Connection};
use crate::pool::WorkerPool;
use crate::protocol::{CommonResponse, Request, Response};
use crate::vhost::VirtualHost;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Dispatches decoded requests. Channel lifecycle requests are served by the
/// connection; everything else goes to the addressed channel.
pub struct MessageHandler {
    host: Arc<VirtualHost>,
    pool: Arc<WorkerPool>,
}

impl MessageHandler {
    pub fn new(host: Arc<VirtualHost>, pool: Arc<WorkerPool>) -> Self {
        Self { host, pool }
    }

    pub fn host(&self) -> &Arc<VirtualHost> {
        &self.host
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Execute `request` on behalf of `connection`. Always produces exactly
    /// one response carrying the request's ids.
    pub fn handle_request(&self, connection: &Connection, request: Request) -> Response {
        let rid = request.request_id().to_string();
        let cid = request.channel_id().to_string();
        debug!(
            "Connection {} -> {} (channel {}, request {})",
            connection.id(),
            request.operation(),
            cid,
            rid
        );

        let response = match request {
            Request::OpenChannel(_) => {
                let channel = Channel::new(
                    &cid,
                    Arc::clone(&self.host),
                    Arc::clone(&self.pool),
                    connection.sender().clone(),
                );
                let ok = match connection.channels().open(channel) {
                    Ok(_) => {
                        info!("Connection {} opened channel {}", connection.id(), cid);
                        true
                    }
                    Err(e) => {
                        warn!("open_channel failed: {}", e);
                        false
                    }
                };
                CommonResponse::new(rid, cid, ok)
            }
            Request::CloseChannel(_) => {
                let ok = connection.channels().close(&cid);
                if ok {
                    info!("Connection {} closed channel {}", connection.id(), cid);
                } else {
                    warn!("close_channel for unknown channel {}", cid);
                }
                CommonResponse::new(rid, cid, ok)
            }
            request => match connection.channels().get(&cid) {
                Some(channel) => channel.handle(request),
                None => {
                    warn!(
                        "{} for unknown channel {} on connection {}",
                        request.operation(),
                        cid,
                        connection.id()
                    );
                    CommonResponse::new(rid, cid, false)
                }
            },
        };
        Response::Common(response)
    }
}
