//! Errors, connection states, and client events.

use std::fmt;
use std::time::Duration;

use a2g_domain::ValidationError;
use a2g_protocol::{PolicyParams, ProtocolError, RpcError};
use serde_json::Value;

/// Why a pending request was failed by a connection close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The caller invoked `disconnect()` (or shut the client down).
    ClientDisconnected,
    /// The transport dropped or the peer closed the session.
    ConnectionLost,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::ClientDisconnected => f.write_str("client disconnected"),
            CloseReason::ConnectionLost => f.write_str("connection closed"),
        }
    }
}

/// Top-level SDK error.
#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("config: {0}")]
    Config(String),
    #[error("validation: {0}")]
    Validation(#[from] ValidationError),
    #[error("connection: {0}")]
    Connection(String),
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("not connected")]
    NotConnected,
    #[error("request {id} timed out after {after:?}")]
    RequestTimeout { id: String, after: Duration },
    #[error("{0}")]
    ConnectionClosed(CloseReason),
    #[error("governance error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },
    #[error("protocol: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no intent tracked for context {0:?}")]
    UnknownContext(String),
    #[error("client shut down")]
    Shutdown,
}

impl ClientError {
    /// The request never got an answer because the line went away.
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, ClientError::ConnectionClosed(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ClientError::RequestTimeout { .. } | ClientError::ConnectTimeout(_)
        )
    }
}

impl From<RpcError> for ClientError {
    fn from(e: RpcError) -> Self {
        ClientError::Rpc {
            code: e.code,
            message: e.message,
            data: e.data,
        }
    }
}

/// Connection lifecycle, owned by the connection task.
///
/// `Disconnected → Connecting → Connected → Closing → Disconnected`, with
/// `Reconnecting` entered only after an established session is lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
    Reconnecting { attempt: u32 },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Diagnostics and server pushes, delivered on a broadcast channel.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    StateChanged(ConnectionState),
    /// `ws://` to a non-loopback host.  Advisory only.
    InsecureTransport { url: String },
    /// A response whose id matches no pending request (late, duplicate,
    /// or unsolicited).
    UnmatchedResponse { id: String },
    /// An inbound frame that could not be classified.  It was discarded.
    ProtocolError(ProtocolError),
    /// `g2a/policy` pushed by the governance service.
    Policy(PolicyParams),
    /// Any other server-initiated method.
    Notification { method: String, params: Value },
    /// Automatic reconnection gave up; `connect()` must be called again.
    ReconnectExhausted { attempts: u32 },
}
