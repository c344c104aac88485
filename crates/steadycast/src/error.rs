use reqwest::StatusCode;

/// Result type used throughout the engine crate.
pub type Result<T> = std::result::Result<T, PlayerError>;

#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("invalid stream descriptor for channel `{channel}`: {reason}")]
    InvalidDescriptor { channel: String, reason: String },

    #[error("channel not found: {channel}")]
    NotFound { channel: String },

    #[error("descriptor request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("request failed with HTTP {status} for {url}")]
    HttpStatus { status: StatusCode, url: String },

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("request for channel `{channel}` was superseded")]
    Superseded { channel: String },

    #[error("player driver is no longer running")]
    DriverClosed,
}

impl PlayerError {
    pub fn invalid_descriptor(channel: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDescriptor {
            channel: channel.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(channel: impl Into<String>) -> Self {
        Self::NotFound {
            channel: channel.into(),
        }
    }

    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Whether retrying the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Io { .. } => true,
            Self::HttpStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::InvalidDescriptor { .. }
            | Self::NotFound { .. }
            | Self::InvalidUrl { .. }
            | Self::Configuration { .. }
            | Self::Serialization { .. }
            | Self::Superseded { .. }
            | Self::DriverClosed => false,
        }
    }
}

/// Classification of a fatal streaming fault reported by an engine.
///
/// The terminal case (both sources exhausted) is not a fault class: it is
/// the controller's `FatalError` phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum FaultClass {
    /// Transient transport failure, retried with backoff.
    #[error("network fault")]
    Network,
    /// Decoder failure, recovered in place.
    #[error("media fault")]
    Media,
    /// Anything else; always escalates to a fail-over.
    #[error("unclassified fault")]
    Unclassified,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(!PlayerError::not_found("7112").is_retryable());
        assert!(!PlayerError::invalid_descriptor("7112", "empty").is_retryable());
        assert!(
            PlayerError::HttpStatus {
                status: StatusCode::BAD_GATEWAY,
                url: "http://example.com".to_string(),
            }
            .is_retryable()
        );
        assert!(
            !PlayerError::HttpStatus {
                status: StatusCode::FORBIDDEN,
                url: "http://example.com".to_string(),
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_fault_class_display() {
        assert_eq!(FaultClass::Network.to_string(), "network fault");
        assert_eq!(FaultClass::Unclassified.to_string(), "unclassified fault");
    }
}
