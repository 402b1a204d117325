//! Configuration types for the TideMQ client

use crate::error::TidemqClientError;
use std::time::Duration;

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Broker address, `host:port`
    pub broker: String,
    /// Limit on establishing the TCP connection
    pub connection_timeout: Duration,
    /// Limit on waiting for the response to any request
    pub request_timeout: Duration,
    pub max_frame_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            broker: "127.0.0.1:8085".to_string(),
            connection_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            max_frame_size: 16 * 1024 * 1024, // 16MB
        }
    }
}

impl ClientConfig {
    pub fn new<S: Into<String>>(broker: S) -> Self {
        Self {
            broker: broker.into(),
            ..Default::default()
        }
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    pub fn validate(&self) -> Result<(), TidemqClientError> {
        if self.broker.is_empty() {
            return Err(TidemqClientError::invalid_config("broker address is empty"));
        }
        if self.connection_timeout.is_zero() {
            return Err(TidemqClientError::invalid_config("connection_timeout must be non-zero"));
        }
        if self.request_timeout.is_zero() {
            return Err(TidemqClientError::invalid_config("request_timeout must be non-zero"));
        }
        if self.max_frame_size < 1024 {
            return Err(TidemqClientError::invalid_config("max_frame_size must be at least 1KB"));
        }
        Ok(())
    }
}
