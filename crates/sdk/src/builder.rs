//! Builder pattern for constructing an [`AgentClient`].

use std::sync::Arc;
use std::time::Duration;

use a2g_domain::config::Config;
use a2g_domain::{parse_did, AgentIdentity};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::client::{AgentClient, ClientInner};
use crate::connection::{ConnectionManager, ConnectionSettings};
use crate::correlator::Correlator;
use crate::intents::{ContextTracker, IntentEncoder};
use crate::reconnect::ReconnectBackoff;
use crate::types::{ClientError, ConnectionState};

const COMMAND_QUEUE: usize = 64;
const EVENT_QUEUE: usize = 256;

/// Fluent builder for [`AgentClient`].
///
/// # Example
///
/// ```rust,no_run
/// # use a2g_sdk::AgentClientBuilder;
/// # async fn demo() -> Result<(), a2g_sdk::ClientError> {
/// let client = AgentClientBuilder::new()
///     .url("wss://governance.example.com/a2g")
///     .api_key("secret")
///     .agent_did("did:aeon:builder")
///     .signing_key("5f2b…")
///     .request_timeout(std::time::Duration::from_secs(10))
///     .build()?;
/// client.connect().await?;
/// # Ok(())
/// # }
/// ```
pub struct AgentClientBuilder {
    url: String,
    api_key: Option<String>,
    agent_did: Option<String>,
    signing_key: Option<String>,
    connect_timeout: Duration,
    request_timeout: Duration,
    max_message_bytes: usize,
    reconnect_backoff: ReconnectBackoff,
    context_ttl: Duration,
    context_capacity: usize,
}

impl Default for AgentClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentClientBuilder {
    pub fn new() -> Self {
        Self::from_config(&Config::default())
    }

    /// Seed every setting from a loaded [`Config`].  The API key is read
    /// from the environment variable the config names.
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            url: cfg.governance.url.clone(),
            api_key: cfg.governance.api_key(),
            agent_did: None,
            signing_key: None,
            connect_timeout: cfg.governance.connect_timeout(),
            request_timeout: cfg.governance.request_timeout(),
            max_message_bytes: cfg.governance.max_message_bytes,
            reconnect_backoff: ReconnectBackoff::from(&cfg.reconnect),
            context_ttl: cfg.intents.context_ttl(),
            context_capacity: cfg.intents.context_capacity,
        }
    }

    // ── Endpoint ─────────────────────────────────────────────────────

    /// Governance WebSocket URL (`ws://` or `wss://`).
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Sent as `Authorization: Bearer <key>` on connect.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    // ── Identity ─────────────────────────────────────────────────────

    /// Use `identity`'s DID and signing key.
    pub fn identity(mut self, identity: &AgentIdentity) -> Self {
        self.agent_did = Some(identity.did().to_string());
        self.signing_key = Some(identity.signing_key().to_string());
        self
    }

    pub fn agent_did(mut self, did: impl Into<String>) -> Self {
        self.agent_did = Some(did.into());
        self
    }

    /// Enables connection headers and per-intent signatures.
    pub fn signing_key(mut self, key: impl Into<String>) -> Self {
        self.signing_key = Some(key.into());
        self
    }

    // ── Behavior ─────────────────────────────────────────────────────

    /// Upper bound on the WebSocket handshake (default 10s).
    pub fn connect_timeout(mut self, d: Duration) -> Self {
        self.connect_timeout = d;
        self
    }

    /// Default per-request deadline (default 5s).
    pub fn request_timeout(mut self, d: Duration) -> Self {
        self.request_timeout = d;
        self
    }

    pub fn reconnect_backoff(mut self, policy: ReconnectBackoff) -> Self {
        self.reconnect_backoff = policy;
        self
    }

    /// Inbound frames larger than this are dropped (default 1 MiB).
    pub fn max_message_bytes(mut self, n: usize) -> Self {
        self.max_message_bytes = n;
        self
    }

    pub fn context_ttl(mut self, d: Duration) -> Self {
        self.context_ttl = d;
        self
    }

    pub fn context_capacity(mut self, n: usize) -> Self {
        self.context_capacity = n;
        self
    }

    // ── Build ────────────────────────────────────────────────────────

    /// Validate settings and spawn the connection task (disconnected).
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(self) -> Result<AgentClient, ClientError> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(ClientError::Config(format!(
                "url must start with ws:// or wss://, got {:?}",
                self.url
            )));
        }
        let agent_did = self
            .agent_did
            .ok_or_else(|| ClientError::Config("agent_did is required".into()))?;
        parse_did(&agent_did)?;
        if self.signing_key.as_deref().is_some_and(str::is_empty) {
            return Err(ClientError::Config("signing_key must not be empty".into()));
        }
        if self.request_timeout.is_zero() || self.connect_timeout.is_zero() {
            return Err(ClientError::Config("timeouts must be non-zero".into()));
        }

        let correlator = Arc::new(Correlator::new());
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, _) = broadcast::channel(EVENT_QUEUE);
        let shutdown = CancellationToken::new();

        let settings = ConnectionSettings {
            url: self.url,
            api_key: self.api_key,
            agent_did: agent_did.clone(),
            signing_key: self.signing_key.clone(),
            connect_timeout: self.connect_timeout,
            max_message_bytes: self.max_message_bytes,
            backoff: self.reconnect_backoff,
        };
        let task = ConnectionManager::new(
            settings,
            Arc::clone(&correlator),
            cmd_rx,
            state_tx,
            events_tx.clone(),
            shutdown.clone(),
        )
        .spawn();

        tracing::debug!(agent_did = %agent_did, "agent client built");

        Ok(AgentClient {
            inner: Arc::new(ClientInner {
                commands: cmd_tx,
                state: state_rx,
                events: events_tx,
                correlator,
                encoder: IntentEncoder::new(agent_did, self.signing_key),
                contexts: ContextTracker::new(self.context_ttl, self.context_capacity),
                request_timeout: self.request_timeout,
                shutdown,
                task: Mutex::new(Some(task)),
            }),
        })
    }
}
