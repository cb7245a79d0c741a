//! Connection manager: the single task that owns the WebSocket.
//!
//! All transport I/O and every state transition happen here.  Callers talk
//! to it through [`Command`]s; it reports state on a `watch` channel and
//! diagnostics on a `broadcast` channel.  Because outbound frames go through
//! one queue, they hit the wire in call order.
//!
//! ```text
//!   Idle ──connect ok──▶ Live ──disconnect──▶ Idle
//!    ▲                    │
//!    │               lost │ (reconnect enabled)
//!    │                    ▼
//!    └──exhausted──── Backoff{n} ──open ok──▶ Live
//! ```

use std::sync::Arc;
use std::time::Duration;

use a2g_domain::config::is_loopback_url;
use a2g_domain::Signer;
use a2g_protocol::{InboundMessage, PolicyParams, ProtocolError, METHOD_POLICY};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderName, AUTHORIZATION};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::correlator::Correlator;
use crate::reconnect::ReconnectBackoff;
use crate::types::{ClientError, ClientEvent, CloseReason, ConnectionState};

pub(crate) const HEADER_AGENT_DID: &str = "x-agent-did";
pub(crate) const HEADER_TIMESTAMP: &str = "x-timestamp";
pub(crate) const HEADER_NONCE: &str = "x-nonce";
pub(crate) const HEADER_SIGNATURE: &str = "x-signature";

/// How long to wait for the peer to acknowledge our close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// A single frame write that takes longer than this means the peer stopped
/// reading; the connection is treated as lost.
const WRITE_STALL: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Requests from client handles to the connection task.
pub(crate) enum Command {
    Connect {
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
    Send {
        text: String,
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
}

/// Everything needed to open (and re-open) the session.
#[derive(Clone)]
pub(crate) struct ConnectionSettings {
    pub url: String,
    pub api_key: Option<String>,
    pub agent_did: String,
    pub signing_key: Option<String>,
    pub connect_timeout: Duration,
    pub max_message_bytes: usize,
    pub backoff: ReconnectBackoff,
}

enum Phase {
    Idle,
    Live(WsStream),
    Backoff { attempt: u32 },
    Stopped,
}

/// What ended a live session.
enum LiveExit {
    Disconnected,
    Lost,
    Stopped,
}

pub(crate) struct ConnectionManager {
    settings: ConnectionSettings,
    correlator: Arc<Correlator>,
    commands: mpsc::Receiver<Command>,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<ClientEvent>,
    shutdown: CancellationToken,
}

impl ConnectionManager {
    pub(crate) fn new(
        settings: ConnectionSettings,
        correlator: Arc<Correlator>,
        commands: mpsc::Receiver<Command>,
        state: watch::Sender<ConnectionState>,
        events: broadcast::Sender<ClientEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            settings,
            correlator,
            commands,
            state,
            events,
            shutdown,
        }
    }

    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let mut phase = Phase::Idle;
        loop {
            phase = match phase {
                Phase::Idle => self.idle().await,
                Phase::Live(ws) => self.live(ws).await,
                Phase::Backoff { attempt } => self.backoff(attempt).await,
                Phase::Stopped => break,
            };
        }

        self.correlator.fail_all(CloseReason::ClientDisconnected);
        self.set_state(ConnectionState::Disconnected);
        // Anything still queued gets an answer instead of a dropped sender.
        self.commands.close();
        while let Ok(cmd) = self.commands.try_recv() {
            reject(cmd, || ClientError::Shutdown);
        }
        tracing::debug!(agent_did = %self.settings.agent_did, "connection task stopped");
    }

    // ── Disconnected ─────────────────────────────────────────────────

    async fn idle(&mut self) -> Phase {
        let cmd = tokio::select! {
            _ = self.shutdown.cancelled() => return Phase::Stopped,
            cmd = self.commands.recv() => cmd,
        };

        match cmd {
            None => Phase::Stopped,
            Some(Command::Connect { reply }) => {
                self.set_state(ConnectionState::Connecting);
                match self.open_unless_shutdown().await {
                    None => {
                        let _ = reply.send(Err(ClientError::Shutdown));
                        Phase::Stopped
                    }
                    Some(Ok(ws)) => {
                        self.set_state(ConnectionState::Connected);
                        let _ = reply.send(Ok(()));
                        Phase::Live(ws)
                    }
                    Some(Err(e)) => {
                        self.set_state(ConnectionState::Disconnected);
                        let _ = reply.send(Err(e));
                        Phase::Idle
                    }
                }
            }
            Some(Command::Disconnect { reply }) => {
                let _ = reply.send(());
                Phase::Idle
            }
            Some(cmd) => {
                reject(cmd, || ClientError::NotConnected);
                Phase::Idle
            }
        }
    }

    // ── Connected ────────────────────────────────────────────────────

    async fn live(&mut self, ws: WsStream) -> Phase {
        tracing::info!(
            url = %self.settings.url,
            agent_did = %self.settings.agent_did,
            "connected to governance"
        );
        let (mut sink, mut source) = ws.split();

        let exit = loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    self.close(&mut sink, &mut source).await;
                    break LiveExit::Stopped;
                }
                cmd = self.commands.recv() => match cmd {
                    None => {
                        self.close(&mut sink, &mut source).await;
                        break LiveExit::Stopped;
                    }
                    Some(Command::Send { text, reply }) => {
                        let write = sink.send(Message::Text(text));
                        match tokio::time::timeout(WRITE_STALL, write).await {
                            Ok(Ok(())) => {
                                let _ = reply.send(Ok(()));
                            }
                            Ok(Err(e)) => {
                                tracing::warn!(error = %e, "write to governance failed");
                                let _ = reply.send(Err(ClientError::Connection(e.to_string())));
                                break LiveExit::Lost;
                            }
                            Err(_) => {
                                tracing::warn!(
                                    stall_ms = WRITE_STALL.as_millis() as u64,
                                    "governance stopped reading, dropping connection"
                                );
                                let _ = reply.send(Err(ClientError::Connection(
                                    "write stalled".into(),
                                )));
                                break LiveExit::Lost;
                            }
                        }
                    }
                    Some(Command::Connect { reply }) => {
                        let _ = reply.send(Ok(()));
                    }
                    Some(Command::Disconnect { reply }) => {
                        self.close(&mut sink, &mut source).await;
                        let _ = reply.send(());
                        break LiveExit::Disconnected;
                    }
                },
                frame = source.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handle_inbound(&text),
                    Some(Ok(Message::Close(frame))) => {
                        let normal = frame.as_ref().is_some_and(|f| f.code == CloseCode::Normal);
                        tracing::info!(
                            code = ?frame.as_ref().map(|f| f.code),
                            "governance closed the connection"
                        );
                        if normal {
                            self.correlator.fail_all(CloseReason::ConnectionLost);
                            break LiveExit::Disconnected;
                        }
                        break LiveExit::Lost;
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        tracing::debug!(bytes = bytes.len(), "ignoring binary frame");
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "connection error");
                        break LiveExit::Lost;
                    }
                    None => break LiveExit::Lost,
                },
            }
        };

        match exit {
            LiveExit::Stopped => Phase::Stopped,
            LiveExit::Disconnected => {
                self.set_state(ConnectionState::Disconnected);
                Phase::Idle
            }
            LiveExit::Lost => self.on_lost(),
        }
    }

    /// Client-initiated close: fail pending requests, then send a
    /// normal-closure frame so the peer does not treat this as a drop.
    async fn close(&self, sink: &mut WsSink, source: &mut WsSource) {
        self.set_state(ConnectionState::Closing);
        self.correlator.fail_all(CloseReason::ClientDisconnected);

        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "client disconnect".into(),
        };
        match tokio::time::timeout(CLOSE_GRACE, sink.send(Message::Close(Some(frame)))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "close frame not sent");
                return;
            }
            Err(_) => {
                tracing::debug!("close frame write stalled");
                return;
            }
        }

        let _ = tokio::time::timeout(CLOSE_GRACE, async {
            while let Some(Ok(msg)) = source.next().await {
                if msg.is_close() {
                    break;
                }
            }
        })
        .await;
        tracing::info!(agent_did = %self.settings.agent_did, "disconnected");
    }

    fn on_lost(&self) -> Phase {
        self.correlator.fail_all(CloseReason::ConnectionLost);
        tracing::warn!(url = %self.settings.url, "connection to governance lost");

        if !self.settings.backoff.enabled {
            self.set_state(ConnectionState::Disconnected);
            return Phase::Idle;
        }
        Phase::Backoff { attempt: 1 }
    }

    // ── Reconnecting ─────────────────────────────────────────────────

    async fn backoff(&mut self, attempt: u32) -> Phase {
        let policy = &self.settings.backoff;
        if policy.should_give_up(attempt) {
            let attempts = attempt.saturating_sub(1);
            tracing::error!(attempts, "reconnect attempts exhausted");
            self.set_state(ConnectionState::Disconnected);
            let _ = self.events.send(ClientEvent::ReconnectExhausted { attempts });
            return Phase::Idle;
        }

        let delay = policy.delay_for_attempt(attempt);
        self.set_state(ConnectionState::Reconnecting { attempt });
        tracing::info!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "reconnecting"
        );

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                _ = self.shutdown.cancelled() => return Phase::Stopped,
                cmd = self.commands.recv() => match cmd {
                    None => return Phase::Stopped,
                    Some(Command::Disconnect { reply }) => {
                        tracing::info!("reconnect cancelled by disconnect");
                        self.set_state(ConnectionState::Disconnected);
                        let _ = reply.send(());
                        return Phase::Idle;
                    }
                    Some(Command::Connect { reply }) => {
                        // Explicit connect skips the remaining delay.
                        return match self.open_unless_shutdown().await {
                            None => {
                                let _ = reply.send(Err(ClientError::Shutdown));
                                Phase::Stopped
                            }
                            Some(Ok(ws)) => {
                                self.set_state(ConnectionState::Connected);
                                let _ = reply.send(Ok(()));
                                Phase::Live(ws)
                            }
                            Some(Err(e)) => {
                                let _ = reply.send(Err(e));
                                Phase::Backoff { attempt: attempt + 1 }
                            }
                        };
                    }
                    Some(cmd) => reject(cmd, || ClientError::NotConnected),
                },
            }
        }

        match self.open_unless_shutdown().await {
            None => Phase::Stopped,
            Some(Ok(ws)) => {
                tracing::info!(attempt, "reconnected");
                self.set_state(ConnectionState::Connected);
                Phase::Live(ws)
            }
            Some(Err(e)) => {
                tracing::warn!(attempt, error = %e, "reconnect attempt failed");
                Phase::Backoff { attempt: attempt + 1 }
            }
        }
    }

    // ── Transport ────────────────────────────────────────────────────

    async fn open_unless_shutdown(&self) -> Option<Result<WsStream, ClientError>> {
        tokio::select! {
            r = self.open() => Some(r),
            _ = self.shutdown.cancelled() => None,
        }
    }

    async fn open(&self) -> Result<WsStream, ClientError> {
        let s = &self.settings;

        if s.url.starts_with("ws://") && !is_loopback_url(&s.url) {
            tracing::warn!(url = %s.url, "unencrypted connection to a non-loopback host");
            let _ = self.events.send(ClientEvent::InsecureTransport { url: s.url.clone() });
        }

        let mut request = s
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ClientError::Connection(e.to_string()))?;
        let headers = request.headers_mut();

        if let Some(api_key) = &s.api_key {
            headers.insert(AUTHORIZATION, header_value(&format!("Bearer {api_key}"))?);
        }
        if let Some(key) = &s.signing_key {
            let sig = Signer::sign(key, s.agent_did.as_str(), None, None);
            headers.insert(HeaderName::from_static(HEADER_AGENT_DID), header_value(&s.agent_did)?);
            headers.insert(HeaderName::from_static(HEADER_TIMESTAMP), header_value(&sig.timestamp)?);
            headers.insert(HeaderName::from_static(HEADER_NONCE), header_value(&sig.nonce)?);
            headers.insert(HeaderName::from_static(HEADER_SIGNATURE), header_value(&sig.hash)?);
        }

        tracing::info!(url = %s.url, agent_did = %s.agent_did, "connecting to governance");

        match tokio::time::timeout(s.connect_timeout, tokio_tungstenite::connect_async(request))
            .await
        {
            Ok(Ok((ws, _response))) => Ok(ws),
            Ok(Err(e)) => {
                tracing::warn!(url = %s.url, error = %e, "connect failed");
                Err(ClientError::Connection(e.to_string()))
            }
            Err(_) => {
                tracing::warn!(
                    url = %s.url,
                    timeout_ms = s.connect_timeout.as_millis() as u64,
                    "connect timed out"
                );
                Err(ClientError::ConnectTimeout(s.connect_timeout))
            }
        }
    }

    // ── Inbound ──────────────────────────────────────────────────────

    fn handle_inbound(&self, text: &str) {
        if text.len() > self.settings.max_message_bytes {
            tracing::warn!(
                bytes = text.len(),
                max = self.settings.max_message_bytes,
                "inbound message exceeds max_message_bytes, dropping"
            );
            let _ = self.events.send(ClientEvent::ProtocolError(ProtocolError::TooLarge {
                bytes: text.len(),
                max: self.settings.max_message_bytes,
            }));
            return;
        }

        match InboundMessage::parse(text) {
            Ok(InboundMessage::Response { id, outcome }) => {
                let outcome = outcome.map_err(ClientError::from);
                if !self.correlator.complete(&id, outcome) {
                    let _ = self.events.send(ClientEvent::UnmatchedResponse { id });
                }
            }
            Ok(InboundMessage::Notification { method, params }) if method == METHOD_POLICY => {
                match serde_json::from_value::<PolicyParams>(params) {
                    Ok(policy) => {
                        tracing::info!(version = %policy.version, "policy update received");
                        let _ = self.events.send(ClientEvent::Policy(policy));
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "malformed policy notification");
                        let _ = self
                            .events
                            .send(ClientEvent::ProtocolError(ProtocolError::InvalidJson(e.to_string())));
                    }
                }
            }
            Ok(InboundMessage::Notification { method, params }) => {
                tracing::debug!(method = %method, "notification received");
                let _ = self.events.send(ClientEvent::Notification { method, params });
            }
            Err(e) => {
                tracing::debug!(error = %e, "discarding malformed message");
                // A recognisable id settles its waiter now instead of at the deadline.
                if let Some(id) = e.response_id() {
                    self.correlator.complete(id, Err(ClientError::Protocol(e.clone())));
                }
                let _ = self.events.send(ClientEvent::ProtocolError(e));
            }
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            tracing::debug!(from = ?prev, to = ?next, "connection state");
            let _ = self.events.send(ClientEvent::StateChanged(next));
        }
    }
}

fn header_value(v: &str) -> Result<HeaderValue, ClientError> {
    HeaderValue::from_str(v).map_err(|e| ClientError::Config(format!("invalid header value: {e}")))
}

/// Answer a command that cannot be carried out in the current phase.
fn reject(cmd: Command, err: impl Fn() -> ClientError) {
    match cmd {
        Command::Connect { reply } | Command::Send { reply, .. } => {
            let _ = reply.send(Err(err()));
        }
        Command::Disconnect { reply } => {
            let _ = reply.send(());
        }
    }
}
