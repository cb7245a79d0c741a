//! End-to-end tests against an in-process governance peer.
//!
//! The peer accepts WebSocket connections on an ephemeral port and hands
//! each one to the test, which then plays the governance side by hand.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use a2g_protocol::{IntentParams, ProtocolError};
use a2g_sdk::{
    verify_intent_signature, AgentClient, AgentClientBuilder, ClientError, ClientEvent,
    CloseReason, ConnectionState, ContextToken, ExecutionOutcome, IntentOptions,
    ReconnectBackoff, Signature, Signer, Verdict, DEFAULT_MAX_AGE_MS,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderMap;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

const DID: &str = "did:aeon:test-agent";
const KEY: &str = "8c1f5b0e9a7d4c3b2a19080706050403020100ffeeddccbbaa99887766554433";
const WAIT: Duration = Duration::from_secs(5);

// ── Governance peer ──────────────────────────────────────────────────

struct Peer {
    addr: SocketAddr,
    conns: mpsc::UnboundedReceiver<PeerConn>,
    task: JoinHandle<()>,
}

struct PeerConn {
    headers: HeaderMap,
    ws: WebSocketStream<TcpStream>,
}

async fn spawn_peer() -> Peer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, conns) = mpsc::unbounded_channel();

    let task = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let captured = Arc::new(Mutex::new(HeaderMap::new()));
            let sink = Arc::clone(&captured);
            let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                *sink.lock().unwrap() = req.headers().clone();
                Ok(resp)
            };
            let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
                continue;
            };
            let headers = captured.lock().unwrap().clone();
            if tx.send(PeerConn { headers, ws }).is_err() {
                break;
            }
        }
    });

    Peer { addr, conns, task }
}

impl Peer {
    fn url(&self) -> String {
        format!("ws://{}/a2g", self.addr)
    }

    async fn accept(&mut self) -> PeerConn {
        timeout(WAIT, self.conns.recv())
            .await
            .expect("no connection within deadline")
            .expect("peer stopped")
    }
}

impl PeerConn {
    fn header(&self, name: &str) -> &str {
        self.headers
            .get(name)
            .unwrap_or_else(|| panic!("missing header {name}"))
            .to_str()
            .unwrap()
    }

    async fn recv_json(&mut self) -> Value {
        loop {
            let msg = timeout(WAIT, self.ws.next())
                .await
                .expect("peer read timed out")
                .expect("stream ended")
                .expect("read error");
            if let Message::Text(text) = msg {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    async fn send_json(&mut self, value: Value) {
        self.ws.send(Message::Text(value.to_string())).await.unwrap();
    }

    async fn reply(&mut self, id: &Value, result: Value) {
        self.send_json(json!({"jsonrpc": "2.0", "id": id, "result": result}))
            .await;
    }

    /// Next close frame's code, or `None` if the stream ended without one.
    async fn next_close(mut self) -> Option<CloseCode> {
        while let Ok(Some(Ok(msg))) = timeout(WAIT, self.ws.next()).await {
            if let Message::Close(frame) = msg {
                return frame.map(|f| f.code);
            }
        }
        None
    }
}

fn verdict(intent_id: &Value, verdict: &str) -> Value {
    json!({
        "verdict": verdict,
        "intent_id": intent_id,
        "risk_assessment": {"score": 0.12, "level": "LOW", "threats": []}
    })
}

// ── Client helpers ───────────────────────────────────────────────────

fn fast_backoff() -> ReconnectBackoff {
    ReconnectBackoff {
        enabled: true,
        base_delay: Duration::from_millis(20),
        max_delay: Duration::from_millis(100),
        max_attempts: 3,
        jitter_max: Duration::from_millis(10),
    }
}

fn builder_for(peer: &Peer) -> AgentClientBuilder {
    AgentClientBuilder::new()
        .url(peer.url())
        .agent_did(DID)
        .signing_key(KEY)
        .request_timeout(Duration::from_secs(3))
        .reconnect_backoff(fast_backoff())
}

async fn connected(peer: &mut Peer) -> (AgentClient, PeerConn) {
    let client = builder_for(peer).build().unwrap();
    client.connect().await.unwrap();
    let conn = peer.accept().await;
    (client, conn)
}

async fn wait_for_state(client: &AgentClient, want: ConnectionState) {
    let mut rx = client.watch_state();
    timeout(WAIT, rx.wait_for(|s| *s == want))
        .await
        .unwrap_or_else(|_| panic!("state never became {want:?}"))
        .unwrap();
}

async fn next_event(
    rx: &mut broadcast::Receiver<ClientEvent>,
    pred: impl Fn(&ClientEvent) -> bool,
) -> ClientEvent {
    timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(ev) if pred(&ev) => return ev,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event stream closed: {e}"),
            }
        }
    })
    .await
    .expect("expected event never arrived")
}

// ── Handshake ────────────────────────────────────────────────────────

#[tokio::test]
async fn handshake_carries_bearer_and_signed_identity() {
    let mut peer = spawn_peer().await;
    let client = builder_for(&peer).api_key("test-api-key").build().unwrap();
    client.connect().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Connected);

    let conn = peer.accept().await;
    assert_eq!(conn.header("authorization"), "Bearer test-api-key");
    assert_eq!(conn.header("x-agent-did"), DID);

    let sig = Signature {
        timestamp: conn.header("x-timestamp").to_string(),
        nonce: conn.header("x-nonce").to_string(),
        hash: conn.header("x-signature").to_string(),
    };
    assert!(Signer::verify(KEY, &sig, DID, DEFAULT_MAX_AGE_MS));

    client.shutdown().await;
}

#[tokio::test]
async fn unsigned_client_sends_no_identity_headers() {
    let mut peer = spawn_peer().await;
    let client = AgentClientBuilder::new()
        .url(peer.url())
        .agent_did(DID)
        .build()
        .unwrap();
    client.connect().await.unwrap();

    let conn = peer.accept().await;
    assert!(conn.headers.get("x-signature").is_none());
    assert!(conn.headers.get("x-agent-did").is_none());
    client.shutdown().await;
}

#[tokio::test]
async fn first_connect_failure_is_returned_not_retried() {
    let port = {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    };
    let client = AgentClientBuilder::new()
        .url(format!("ws://127.0.0.1:{port}/a2g"))
        .agent_did(DID)
        .reconnect_backoff(fast_backoff())
        .build()
        .unwrap();

    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, ClientError::Connection(_)), "got {err:?}");
    assert_eq!(client.state(), ConnectionState::Disconnected);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
    client.shutdown().await;
}

// ── Correlation ──────────────────────────────────────────────────────

#[tokio::test]
async fn signed_intent_roundtrip() {
    let mut peer = spawn_peer().await;
    let (client, mut conn) = connected(&mut peer).await;

    let c = client.clone();
    let call = tokio::spawn(async move {
        c.request_intent(
            "fs.read",
            json!({"path": "/etc/hosts"}),
            IntentOptions::default().with_reasoning("resolve a host"),
        )
        .await
    });

    let req = conn.recv_json().await;
    assert_eq!(req["jsonrpc"], "2.0");
    assert_eq!(req["method"], "a2g/intent");
    assert_eq!(req["params"]["agent_did"], DID);
    assert_eq!(req["params"]["tool"], "fs.read");
    assert_ne!(req["params"]["intent_id"], req["id"]);

    let params: IntentParams = serde_json::from_value(req["params"].clone()).unwrap();
    assert!(verify_intent_signature(KEY, &params, DEFAULT_MAX_AGE_MS));

    conn.reply(&req["id"], verdict(&req["params"]["intent_id"], "APPROVED"))
        .await;

    let result = call.await.unwrap().unwrap();
    assert_eq!(result.verdict, Verdict::Approved);
    assert_eq!(result.intent_id, params.intent_id);
    assert_eq!(client.pending_count(), 0);
    client.shutdown().await;
}

#[tokio::test]
async fn responses_are_matched_by_id_not_order() {
    let mut peer = spawn_peer().await;
    let (client, mut conn) = connected(&mut peer).await;

    let calls: Vec<_> = (1..=3)
        .map(|n| {
            let c = client.clone();
            tokio::spawn(async move { c.request("test/echo", json!({"n": n}), None).await })
        })
        .collect();

    let mut requests = Vec::new();
    for _ in 0..3 {
        requests.push(conn.recv_json().await);
    }
    for req in requests.iter().rev() {
        conn.reply(&req["id"], json!({"echo": req["params"]["n"]})).await;
    }

    for (i, call) in calls.into_iter().enumerate() {
        let value = call.await.unwrap().unwrap();
        assert_eq!(value, json!({"echo": i + 1}));
    }
    assert_eq!(client.unmatched_count(), 0);
    client.shutdown().await;
}

#[tokio::test]
async fn rpc_error_is_surfaced_as_rpc() {
    let mut peer = spawn_peer().await;
    let (client, mut conn) = connected(&mut peer).await;

    let c = client.clone();
    let call = tokio::spawn(async move {
        c.request_intent("shell.exec", json!({"cmd": "rm -rf /"}), IntentOptions::default())
            .await
    });

    let req = conn.recv_json().await;
    conn.send_json(json!({
        "jsonrpc": "2.0",
        "id": req["id"],
        "error": {"code": -32001, "message": "policy violation", "data": {"rule": "no-rm"}}
    }))
    .await;

    match call.await.unwrap() {
        Err(ClientError::Rpc { code, message, data }) => {
            assert_eq!(code, -32001);
            assert_eq!(message, "policy violation");
            assert_eq!(data, Some(json!({"rule": "no-rm"})));
        }
        other => panic!("expected Rpc error, got {other:?}"),
    }
    client.shutdown().await;
}

#[tokio::test]
async fn timed_out_request_reports_late_reply_as_unmatched() {
    let mut peer = spawn_peer().await;
    let client = builder_for(&peer)
        .request_timeout(Duration::from_millis(100))
        .build()
        .unwrap();
    let mut events = client.subscribe();
    client.connect().await.unwrap();
    let mut conn = peer.accept().await;

    let c = client.clone();
    let call = tokio::spawn(async move { c.request("test/slow", json!({}), None).await });
    let req = conn.recv_json().await;

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, ClientError::RequestTimeout { .. }), "got {err:?}");
    assert_eq!(client.pending_count(), 0);

    conn.reply(&req["id"], json!("too late")).await;
    let ev = next_event(&mut events, |e| matches!(e, ClientEvent::UnmatchedResponse { .. })).await;
    match ev {
        ClientEvent::UnmatchedResponse { id } => assert_eq!(json!(id), req["id"]),
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(client.unmatched_count(), 1);
    assert_eq!(client.state(), ConnectionState::Connected);
    client.shutdown().await;
}

#[tokio::test]
async fn per_request_timeouts_are_independent() {
    let mut peer = spawn_peer().await;
    let (client, mut conn) = connected(&mut peer).await;

    let c = client.clone();
    let short = tokio::spawn(async move {
        c.request("test/short", json!({}), Some(Duration::from_millis(80)))
            .await
    });
    let c = client.clone();
    let long = tokio::spawn(async move {
        c.request("test/long", json!({}), Some(Duration::from_secs(3)))
            .await
    });

    let a = conn.recv_json().await;
    let b = conn.recv_json().await;
    let long_req = if a["method"] == "test/long" { a } else { b };

    assert!(short.await.unwrap().unwrap_err().is_timeout());
    assert_eq!(client.pending_count(), 1);

    conn.reply(&long_req["id"], json!("done")).await;
    assert_eq!(long.await.unwrap().unwrap(), json!("done"));
    client.shutdown().await;
}

// ── Close and reconnect ──────────────────────────────────────────────

#[tokio::test]
async fn disconnect_fails_pending_and_closes_normally() {
    let mut peer = spawn_peer().await;
    let (client, mut conn) = connected(&mut peer).await;

    let c = client.clone();
    let call = tokio::spawn(async move { c.request("test/pending", json!({}), None).await });
    conn.recv_json().await;
    assert_eq!(client.pending_count(), 1);

    let close = tokio::spawn(conn.next_close());
    client.disconnect().await.unwrap();

    match call.await.unwrap() {
        Err(ClientError::ConnectionClosed(CloseReason::ClientDisconnected)) => {}
        other => panic!("expected ClientDisconnected, got {other:?}"),
    }
    assert_eq!(client.pending_count(), 0);
    assert_eq!(close.await.unwrap(), Some(CloseCode::Normal));
    assert_eq!(client.state(), ConnectionState::Disconnected);

    // A normal close never triggers a reconnect.
    assert!(timeout(Duration::from_millis(300), peer.conns.recv()).await.is_err());
    client.shutdown().await;
}

#[tokio::test]
async fn lost_connection_fails_pending_then_reconnects() {
    let mut peer = spawn_peer().await;
    let (client, mut conn) = connected(&mut peer).await;

    let c = client.clone();
    let call = tokio::spawn(async move { c.request("test/pending", json!({}), None).await });
    conn.recv_json().await;

    drop(conn);

    match call.await.unwrap() {
        Err(ClientError::ConnectionClosed(CloseReason::ConnectionLost)) => {}
        other => panic!("expected ConnectionLost, got {other:?}"),
    }

    let mut conn = peer.accept().await;
    wait_for_state(&client, ConnectionState::Connected).await;

    // The new session carries a fresh connection signature.
    assert_eq!(conn.header("x-agent-did"), DID);

    let c = client.clone();
    let call = tokio::spawn(async move { c.request("test/after", json!({}), None).await });
    let req = conn.recv_json().await;
    conn.reply(&req["id"], json!("ok")).await;
    assert_eq!(call.await.unwrap().unwrap(), json!("ok"));
    client.shutdown().await;
}

#[tokio::test]
async fn abnormal_close_code_triggers_reconnect() {
    let mut peer = spawn_peer().await;
    let (client, mut conn) = connected(&mut peer).await;

    conn.ws
        .send(Message::Close(Some(CloseFrame {
            code: CloseCode::Away,
            reason: "restarting".into(),
        })))
        .await
        .unwrap();

    let _second = peer.accept().await;
    wait_for_state(&client, ConnectionState::Connected).await;
    client.shutdown().await;
}

#[tokio::test]
async fn peer_normal_close_does_not_reconnect() {
    let mut peer = spawn_peer().await;
    let (client, mut conn) = connected(&mut peer).await;

    conn.ws
        .send(Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "bye".into(),
        })))
        .await
        .unwrap();

    wait_for_state(&client, ConnectionState::Disconnected).await;
    assert!(timeout(Duration::from_millis(300), peer.conns.recv()).await.is_err());
    client.shutdown().await;
}

#[tokio::test]
async fn reconnect_gives_up_after_max_attempts() {
    let mut peer = spawn_peer().await;
    let (client, conn) = connected(&mut peer).await;
    let mut events = client.subscribe();

    peer.task.abort();
    let _ = (&mut peer.task).await;
    drop(conn);

    let ev = next_event(&mut events, |e| matches!(e, ClientEvent::ReconnectExhausted { .. })).await;
    match ev {
        ClientEvent::ReconnectExhausted { attempts } => assert_eq!(attempts, 3),
        other => panic!("unexpected event {other:?}"),
    }
    wait_for_state(&client, ConnectionState::Disconnected).await;

    let err = client.request("test/x", json!({}), None).await.unwrap_err();
    assert!(matches!(err, ClientError::NotConnected));
    client.shutdown().await;
}

#[tokio::test]
async fn reconnect_disabled_stays_down() {
    let mut peer = spawn_peer().await;
    let client = builder_for(&peer)
        .reconnect_backoff(ReconnectBackoff::disabled())
        .build()
        .unwrap();
    client.connect().await.unwrap();
    let conn = peer.accept().await;
    drop(conn);

    wait_for_state(&client, ConnectionState::Disconnected).await;
    assert!(timeout(Duration::from_millis(300), peer.conns.recv()).await.is_err());

    // An explicit connect still works.
    client.connect().await.unwrap();
    let _again = peer.accept().await;
    client.shutdown().await;
}

// ── Reports and pushes ───────────────────────────────────────────────

#[tokio::test]
async fn report_for_context_is_fire_and_forget() {
    let mut peer = spawn_peer().await;
    let (client, mut conn) = connected(&mut peer).await;
    let token = ContextToken::from("task-7");

    let c = client.clone();
    let t = token.clone();
    let call = tokio::spawn(async move {
        c.request_intent(
            "net.fetch",
            json!({"url": "https://example.com"}),
            IntentOptions::default().with_context(t),
        )
        .await
    });
    let req = conn.recv_json().await;
    conn.reply(&req["id"], verdict(&req["params"]["intent_id"], "CONDITIONAL"))
        .await;
    let result = call.await.unwrap().unwrap();
    assert_eq!(result.verdict, Verdict::Conditional);

    let outcome = ExecutionOutcome::success(json!({"status": 200}), Duration::from_millis(25));
    let intent_id = client.report_for_context(&token, &outcome).await.unwrap();
    assert_eq!(json!(intent_id), req["params"]["intent_id"]);
    assert_eq!(client.pending_count(), 0);

    let report = conn.recv_json().await;
    assert_eq!(report["method"], "a2g/report");
    assert_eq!(report["params"]["intent_id"], req["params"]["intent_id"]);
    assert_eq!(report["params"]["status"], "SUCCESS");
    assert_eq!(report["params"]["metrics"]["duration_ms"], 25);

    let again = client.report_for_context(&token, &outcome).await.unwrap_err();
    assert!(matches!(again, ClientError::UnknownContext(_)));
    client.shutdown().await;
}

#[tokio::test]
async fn policy_push_and_garbage_are_events() {
    let mut peer = spawn_peer().await;
    let (client, mut conn) = connected(&mut peer).await;
    let mut events = client.subscribe();

    conn.ws.send(Message::Text("{not json".into())).await.unwrap();
    conn.send_json(json!({
        "jsonrpc": "2.0",
        "method": "g2a/policy",
        "params": {
            "agent_did": DID,
            "version": "7",
            "capabilities": {"tools": {"fs.read": {"allowed": true}}}
        }
    }))
    .await;

    next_event(&mut events, |e| matches!(e, ClientEvent::ProtocolError(_))).await;
    match next_event(&mut events, |e| matches!(e, ClientEvent::Policy(_))).await {
        ClientEvent::Policy(p) => {
            assert_eq!(p.version, "7");
            assert!(p.capabilities.tools.unwrap()["fs.read"].allowed);
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(client.unmatched_count(), 0);
    assert_eq!(client.state(), ConnectionState::Connected);
    client.shutdown().await;
}

#[tokio::test]
async fn oversized_frame_is_dropped_with_event() {
    let mut peer = spawn_peer().await;
    let client = builder_for(&peer).max_message_bytes(32).build().unwrap();
    let mut events = client.subscribe();
    client.connect().await.unwrap();
    let mut conn = peer.accept().await;

    conn.send_json(json!({
        "jsonrpc": "2.0",
        "method": "g2a/notice",
        "params": {"text": "this notification is well over thirty-two bytes"}
    }))
    .await;

    match next_event(&mut events, |e| matches!(e, ClientEvent::ProtocolError(_))).await {
        ClientEvent::ProtocolError(ProtocolError::TooLarge { bytes, max }) => {
            assert!(bytes > 32);
            assert_eq!(max, 32);
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(client.state(), ConnectionState::Connected);
    client.shutdown().await;
}

#[tokio::test]
async fn success_with_null_error_field_resolves() {
    let mut peer = spawn_peer().await;
    let (client, mut conn) = connected(&mut peer).await;

    let c = client.clone();
    let call = tokio::spawn(async move { c.request("test/echo", json!({}), None).await });
    let req = conn.recv_json().await;
    conn.send_json(json!({
        "jsonrpc": "2.0",
        "id": req["id"],
        "result": {"ok": true},
        "error": null
    }))
    .await;

    let value = timeout(WAIT, call).await.unwrap().unwrap().unwrap();
    assert_eq!(value, json!({"ok": true}));
    assert_eq!(client.unmatched_count(), 0);
    client.shutdown().await;
}

#[tokio::test]
async fn malformed_response_settles_its_request_immediately() {
    let mut peer = spawn_peer().await;
    let (client, mut conn) = connected(&mut peer).await;

    let c = client.clone();
    let call = tokio::spawn(async move { c.request("test/bad", json!({}), None).await });
    let req = conn.recv_json().await;
    conn.send_json(json!({"jsonrpc": "2.0", "id": req["id"], "error": "nope"}))
        .await;

    // The request deadline is 3s; settling must not wait for it.
    let err = timeout(Duration::from_secs(1), call)
        .await
        .expect("malformed response left the request pending")
        .unwrap()
        .unwrap_err();
    match err {
        ClientError::Protocol(e) => assert_eq!(json!(e.response_id()), req["id"]),
        other => panic!("expected protocol error, got {other:?}"),
    }
    assert_eq!(client.pending_count(), 0);
    assert_eq!(client.state(), ConnectionState::Connected);
    client.shutdown().await;
}

#[tokio::test]
async fn request_deadline_covers_a_stalled_write() {
    let mut peer = spawn_peer().await;
    let (client, conn) = connected(&mut peer).await;

    // The peer never reads, so this frame fills the socket buffers and
    // leaves the connection task blocked mid-write.
    let c = client.clone();
    let big = "x".repeat(32 << 20);
    let flood = tokio::spawn(async move {
        c.request("test/flood", json!({"blob": big}), Some(Duration::from_millis(200)))
            .await
    });

    let started = tokio::time::Instant::now();
    let err = timeout(
        Duration::from_secs(3),
        client.request("test/small", json!({}), Some(Duration::from_millis(200))),
    )
    .await
    .expect("request outlived its own deadline")
    .unwrap_err();
    assert!(matches!(err, ClientError::RequestTimeout { .. }), "got {err:?}");
    assert!(started.elapsed() < Duration::from_secs(1));

    let flooded = timeout(WAIT, flood).await.unwrap().unwrap();
    assert!(matches!(flooded, Err(ClientError::RequestTimeout { .. })));
    assert_eq!(client.pending_count(), 0);

    // Closing the peer side unblocks the write so shutdown is prompt.
    drop(conn);
    client.shutdown().await;
}
