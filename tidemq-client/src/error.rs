//! Error types for the TideMQ client library

use tidemq::protocol::codec::CodecError;

/// Main error type for TideMQ client operations
#[derive(Debug, thiserror::Error)]
pub enum TidemqClientError {
    /// Connection-related errors
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Protocol-related errors
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No response within the request timeout
    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The broker answered `ok: false`
    #[error("Broker rejected {operation}")]
    Rejected { operation: String },

    /// Consumer-specific errors
    #[error("Consumer error: {message}")]
    Consumer { message: String },

    /// The channel or its connection is gone
    #[error("Channel closed")]
    ChannelClosed,

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl TidemqClientError {
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn consumer<S: Into<String>>(message: S) -> Self {
        Self::Consumer {
            message: message.into(),
        }
    }

    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    pub fn rejected<S: Into<String>>(operation: S) -> Self {
        Self::Rejected {
            operation: operation.into(),
        }
    }

    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    /// Whether retrying on a fresh connection may succeed
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Io(_) | Self::Timeout { .. } | Self::ChannelClosed
        )
    }
}

impl From<CodecError> for TidemqClientError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Io(e) => Self::Io(e),
            other => Self::protocol(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(TidemqClientError::timeout(100).is_timeout());
        assert!(TidemqClientError::timeout(100).is_retriable());
        assert!(TidemqClientError::rejected("queue_bind").is_rejected());
        assert!(!TidemqClientError::rejected("queue_bind").is_retriable());
        assert!(TidemqClientError::ChannelClosed.is_retriable());
        assert!(!TidemqClientError::consumer("busy").is_retriable());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            TidemqClientError::timeout(250).to_string(),
            "Operation timed out after 250ms"
        );
        assert_eq!(
            TidemqClientError::rejected("basic_publish").to_string(),
            "Broker rejected basic_publish"
        );
    }

    #[test]
    fn test_codec_error_conversion() {
        let io = CodecError::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"));
        assert!(matches!(TidemqClientError::from(io), TidemqClientError::Io(_)));

        let large = CodecError::FrameTooLarge { size: 10, limit: 5 };
        assert!(matches!(
            TidemqClientError::from(large),
            TidemqClientError::Protocol { .. }
        ));
    }
}
