//! `a2g-sdk`: connects an agent to an A2G governance service.
//!
//! One [`AgentClient`] owns one long-lived WebSocket.  Over it the agent asks
//! for verdicts on tool calls (`a2g/intent`, correlated by id), reports what
//! happened (`a2g/report`, fire-and-forget), and receives policy pushes
//! (`g2a/policy`).
//!
//! # Architecture
//!
//! ```text
//!   AgentClient ──Command──▶ ConnectionManager (one task, owns the socket)
//!       │                          │
//!       │ register/wait            │ complete / fail_all
//!       ▼                          ▼
//!   Correlator ◀─────────── inbound responses
//!
//!   IntentEncoder: builds + signs params     ContextTracker: token → intent id
//! ```
//!
//! # Guarantees
//!
//! - Every request settles exactly once: response, deadline, or close.
//! - Closing the connection fails every pending request with
//!   [`ClientError::ConnectionClosed`], carrying a [`CloseReason`] that tells
//!   a caller-initiated disconnect apart from a lost connection.
//! - Only an established session that drops is reconnected; a failed
//!   [`AgentClient::connect`] is returned to the caller.

pub mod builder;
pub mod client;
mod connection;
pub mod correlator;
pub mod intents;
pub mod reconnect;
pub mod types;

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use builder::AgentClientBuilder;
pub use client::AgentClient;
pub use intents::{
    verify_intent_signature, ContextToken, ContextTracker, ExecutionOutcome, IntentEncoder,
    IntentOptions,
};
pub use reconnect::ReconnectBackoff;
pub use types::{ClientError, ClientEvent, CloseReason, ConnectionState};

pub use a2g_domain::{AgentIdentity, Signature, Signer, DEFAULT_MAX_AGE_MS};
pub use a2g_protocol::{
    AgentMetadata, ExecutionStatus, PolicyParams, RiskLevel, Verdict, VerdictResult,
};
