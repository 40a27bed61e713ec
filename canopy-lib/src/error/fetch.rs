//! Snapshot fetch error types

use std::time::Duration;

use crate::model::NodeId;

/// Errors that can occur while fetching a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// HTTP error response from the backend.
    #[error("HTTP {status}: {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Error message.
        message: String,
    },

    /// Network error during the request.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Request timed out.
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    /// Invalid URL provided.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to parse the backend response.
    #[error("Response parse error: {message}")]
    Parse {
        /// Description of the parse error.
        message: String,
        /// Raw response body, if available.
        body: Option<String>,
    },

    /// The requested page no longer exists.
    #[error("Page {page} is out of range")]
    PageOutOfRange {
        /// The 1-based page that was requested.
        page: usize,
    },

    /// The backend does not know the node.
    #[error("Node not found: {0}")]
    NotFound(NodeId),

    /// The backend is unavailable.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

impl FetchError {
    /// Creates a new HTTP error.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    /// Creates a new parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
            body: None,
        }
    }

    /// Creates a new parse error with the raw response body.
    pub fn parse_with_body(message: impl Into<String>, body: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
            body: Some(body.into()),
        }
    }

    /// Returns `true` if this error is potentially retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => matches!(status, 429 | 500 | 502 | 503 | 504),
            Self::Network(_) => true,
            Self::Timeout(_) => true,
            Self::Unavailable(_) => true,
            _ => false,
        }
    }

    /// Returns `true` if the requested page is past the end.
    pub fn is_out_of_range(&self) -> bool {
        matches!(self, Self::PageOutOfRange { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(FetchError::http(503, "busy").is_retryable());
        assert!(!FetchError::http(404, "gone").is_retryable());
        assert!(!FetchError::PageOutOfRange { page: 3 }.is_retryable());
        assert!(FetchError::Timeout(Duration::from_secs(1)).is_retryable());
    }

    #[test]
    fn test_display() {
        let error = FetchError::NotFound(NodeId::record("9"));
        assert_eq!(error.to_string(), "Node not found: record:9");
    }
}
