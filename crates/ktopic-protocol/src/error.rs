//! Protocol error types

use thiserror::Error;

/// Protocol error types
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Message too large
    #[error("Message size {0} exceeds maximum {1}")]
    MessageTooLarge(usize, usize),

    /// Invalid message format
    #[error("Invalid message format: {0}")]
    InvalidFormat(String),
}

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::Serialization("test".to_string());
        assert_eq!(err.to_string(), "Serialization error: test");

        let err = ProtocolError::Deserialization("bad data".to_string());
        assert_eq!(err.to_string(), "Deserialization error: bad data");

        let err = ProtocolError::MessageTooLarge(1000, 500);
        assert_eq!(err.to_string(), "Message size 1000 exceeds maximum 500");

        let err = ProtocolError::InvalidFormat("unknown wire format".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid message format: unknown wire format"
        );
    }
}
