//! Error handling for the client.

use http::StatusCode;
use thiserror::Error;

/// The result type used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Comprehensive error type for all client operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Opening the event connection was refused or the upgrade handshake failed.
    #[error("event connection failed to {location}: {message}")]
    ConnectionFailed { location: String, message: String },

    /// Too many event channels are open in this process.
    #[error("you may only use {max} event channels per process; close one before opening another")]
    ResourceExhausted { max: usize },

    /// The server answered an action dispatch with a non-200 status.
    #[error("server returned HTTP {status} for {url}")]
    Transport { status: StatusCode, url: String },

    /// The server's response body could not be decoded.
    #[error("malformed server response: {message}")]
    Protocol { message: String },

    /// A file upload was rejected by the server.
    #[error("upload failed with HTTP {status}")]
    UploadFailed { status: StatusCode },

    /// The reachability check at construction failed.
    #[error("cannot reach server at {url}: {detail}")]
    ServerUnreachable { url: String, detail: String },

    /// The client was configured in a way the server cannot accept.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// A payload value could not be encoded for the wire.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transport-level HTTP failure (connection refused, timeout, TLS, ...).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// WebSocket-level failure.
    #[error("websocket error: {message}")]
    WebSocket { message: String },

    /// Local I/O failure (reading a file to upload).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a connection-failed error for an event channel.
    pub fn connection_failed(location: impl ToString, message: impl ToString) -> Self {
        Self::ConnectionFailed {
            location: location.to_string(),
            message: message.to_string(),
        }
    }

    /// Create a resource-exhausted error.
    pub fn resource_exhausted(max: usize) -> Self {
        Self::ResourceExhausted { max }
    }

    /// Create a transport error from a status code.
    pub fn transport(status: StatusCode, url: impl Into<String>) -> Self {
        Self::Transport {
            status,
            url: url.into(),
        }
    }

    /// Create a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create an upload-failed error.
    pub fn upload_failed(status: StatusCode) -> Self {
        Self::UploadFailed { status }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Create a WebSocket error.
    pub fn websocket(message: impl Into<String>) -> Self {
        Self::WebSocket {
            message: message.into(),
        }
    }

    /// Create a server-unreachable error whose message points the user at the
    /// most likely misconfiguration: the URL when no token was supplied, the
    /// token otherwise.
    pub fn unreachable(url: impl Into<String>, status: Option<StatusCode>, has_token: bool) -> Self {
        let mut detail = match status {
            Some(status) => format!("health check returned HTTP {status}"),
            None => "no response from server".to_string(),
        };
        if has_token {
            detail.push_str("; check that the authorization token is valid for this server");
        } else {
            detail.push_str("; you may want to check the URL with your web browser");
        }
        Self::ServerUnreachable {
            url: url.into(),
            detail,
        }
    }
}
