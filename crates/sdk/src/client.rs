//! The agent-facing client handle.

use std::sync::Arc;
use std::time::Duration;

use a2g_protocol::{
    AgentMetadata, RpcRequest, VerdictResult, METHOD_INTENT, METHOD_REGISTER, METHOD_REPORT,
};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::connection::Command;
use crate::correlator::Correlator;
use crate::intents::{ContextToken, ContextTracker, ExecutionOutcome, IntentEncoder, IntentOptions};
use crate::types::{ClientError, ClientEvent, ConnectionState};

pub(crate) struct ClientInner {
    pub(crate) commands: mpsc::Sender<Command>,
    pub(crate) state: watch::Receiver<ConnectionState>,
    pub(crate) events: broadcast::Sender<ClientEvent>,
    pub(crate) correlator: Arc<Correlator>,
    pub(crate) encoder: IntentEncoder,
    pub(crate) contexts: ContextTracker,
    pub(crate) request_timeout: Duration,
    pub(crate) shutdown: CancellationToken,
    pub(crate) task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Handle to one governance connection.
///
/// Cheap to clone; all clones share the connection.  The connection task
/// stops when the last clone is dropped or [`shutdown`](Self::shutdown) is
/// called.
///
/// Create via [`AgentClientBuilder`](crate::builder::AgentClientBuilder).
#[derive(Clone)]
pub struct AgentClient {
    pub(crate) inner: Arc<ClientInner>,
}

impl AgentClient {
    /// Start a new builder.
    pub fn builder() -> crate::builder::AgentClientBuilder {
        crate::builder::AgentClientBuilder::new()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Open the connection.
    ///
    /// A failure here is returned as-is and never retried; automatic
    /// reconnection only applies to sessions that were established.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Connect { reply }).await?;
        rx.await.map_err(|_| ClientError::Shutdown)?
    }

    /// Fail all pending requests and close with a normal-closure frame.
    /// Also cancels a reconnect in progress.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Disconnect { reply }).await?;
        rx.await.map_err(|_| ClientError::Shutdown)
    }

    /// Stop the connection task and wait for it to finish.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let handle = self.inner.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "connection task failed");
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// A receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.clone()
    }

    /// Subscribe to diagnostics and server pushes.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    pub fn agent_did(&self) -> &str {
        self.inner.encoder.agent_did()
    }

    /// Requests currently awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.inner.correlator.pending_count()
    }

    /// Inbound responses that matched no pending request.
    pub fn unmatched_count(&self) -> u64 {
        self.inner.correlator.unmatched_count()
    }

    pub fn contexts(&self) -> &ContextTracker {
        &self.inner.contexts
    }

    // ── Correlated requests ──────────────────────────────────────────

    /// Send `method` with `params` under a fresh correlation id and wait for
    /// the matching response.
    ///
    /// `timeout` overrides the client default and bounds the whole call,
    /// including handing the frame to a peer that has stopped reading.  A
    /// timed-out request is not retried.
    pub async fn request<P: Serialize>(
        &self,
        method: &str,
        params: P,
        timeout: Option<Duration>,
    ) -> Result<Value, ClientError> {
        if !self.state().is_connected() {
            return Err(ClientError::NotConnected);
        }

        let id = Uuid::new_v4().to_string();
        let text = serde_json::to_string(&RpcRequest::new(method, params, id.clone()))?;

        let timeout = timeout.unwrap_or(self.inner.request_timeout);
        let waiter = self.inner.correlator.register(id, timeout);
        tracing::debug!(
            method,
            request_id = %waiter.id(),
            timeout_ms = timeout.as_millis() as u64,
            "sending request"
        );

        // The write counts against the same deadline as the reply.  On expiry
        // `wait` resolves at once with the timeout (or a racing response).
        if let Ok(sent) = tokio::time::timeout_at(waiter.deadline(), self.send_text(text)).await {
            sent?;
        }
        waiter.wait().await
    }

    /// Ask governance for a verdict on calling `tool` with `arguments`.
    ///
    /// With `options.context` set, the generated intent id is remembered so
    /// [`report_for_context`](Self::report_for_context) can find it later.
    pub async fn request_intent(
        &self,
        tool: &str,
        arguments: Value,
        options: IntentOptions,
    ) -> Result<VerdictResult, ClientError> {
        let params = self.inner.encoder.intent(tool, arguments, &options)?;
        let intent_id = params.intent_id.clone();

        if let Some(token) = options.context.clone() {
            self.inner.contexts.track(token, intent_id.clone());
        }

        let value = self.request(METHOD_INTENT, &params, options.timeout).await?;
        let verdict: VerdictResult = serde_json::from_value(value)?;

        if verdict.intent_id != intent_id {
            tracing::warn!(
                sent = %intent_id,
                received = %verdict.intent_id,
                "verdict intent_id mismatch"
            );
        }
        tracing::info!(
            tool,
            intent_id = %intent_id,
            verdict = ?verdict.verdict,
            risk = ?verdict.risk_assessment.level,
            "verdict received"
        );
        Ok(verdict)
    }

    /// Announce this agent and the capabilities it wants.  Returns the raw
    /// result object.
    pub async fn register(
        &self,
        capabilities: Vec<String>,
        metadata: Option<AgentMetadata>,
    ) -> Result<Value, ClientError> {
        let params = self.inner.encoder.register(capabilities, metadata)?;
        self.request(METHOD_REGISTER, &params, None).await
    }

    // ── Fire-and-forget ──────────────────────────────────────────────

    /// Report the outcome of `intent_id`.  No response is awaited.
    pub async fn report(
        &self,
        intent_id: &str,
        outcome: &ExecutionOutcome,
    ) -> Result<(), ClientError> {
        let params = self.inner.encoder.report(intent_id, outcome);
        let request = RpcRequest::new(METHOD_REPORT, params, Uuid::new_v4().to_string());
        let text = serde_json::to_string(&request)?;
        tracing::debug!(intent_id, status = ?outcome.status, "sending report");
        self.send_text(text).await
    }

    /// Report the outcome of the intent tracked under `token`.
    ///
    /// The mapping is dropped once the report is handed to the transport.
    /// Returns the intent id that was reported.
    pub async fn report_for_context(
        &self,
        token: &ContextToken,
        outcome: &ExecutionOutcome,
    ) -> Result<String, ClientError> {
        let intent_id = self
            .inner
            .contexts
            .intent_for(token)
            .ok_or_else(|| ClientError::UnknownContext(token.as_str().to_string()))?;
        self.report(&intent_id, outcome).await?;
        self.inner.contexts.forget(token);
        Ok(intent_id)
    }

    // ── Internals ────────────────────────────────────────────────────

    async fn send_text(&self, text: String) -> Result<(), ClientError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Send { text, reply }).await?;
        rx.await.map_err(|_| ClientError::Shutdown)?
    }

    async fn command(&self, cmd: Command) -> Result<(), ClientError> {
        self.inner
            .commands
            .send(cmd)
            .await
            .map_err(|_| ClientError::Shutdown)
    }
}

impl std::fmt::Debug for AgentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentClient")
            .field("agent_did", &self.agent_did())
            .field("state", &self.state())
            .finish()
    }
}
