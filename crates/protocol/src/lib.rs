//! A2G wire protocol: JSON-RPC 2.0 envelopes exchanged between an agent and
//! the governance service over a single WebSocket.
//!
//! Agent → governance:
//! - `a2g/intent`: ask for a verdict on a tool call (correlated)
//! - `a2g/register`: announce the agent and its requested capabilities (correlated)
//! - `a2g/report`: report an execution outcome (fire-and-forget)
//!
//! Governance → agent:
//! - responses carrying exactly one of `result` / `error`
//! - `g2a/policy`: pushed capability policy (notification)

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use a2g_domain::Signature;

pub const JSONRPC_VERSION: &str = "2.0";

pub const METHOD_INTENT: &str = "a2g/intent";
pub const METHOD_REPORT: &str = "a2g/report";
pub const METHOD_REGISTER: &str = "a2g/register";
pub const METHOD_POLICY: &str = "g2a/policy";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request envelope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outbound JSON-RPC request.  `id` is the transport-level correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest<P> {
    pub jsonrpc: String,
    pub method: String,
    pub params: P,
    pub id: String,
}

impl<P> RpcRequest<P> {
    pub fn new(method: &str, params: P, id: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
            id: id.into(),
        }
    }
}

pub type IntentRequest = RpcRequest<IntentParams>;
pub type ReportRequest = RpcRequest<ReportParams>;
pub type RegisterRequest = RpcRequest<RegisterParams>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// a2g/intent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentParams {
    pub agent_did: String,
    /// Business-level id of this intent (distinct from the request `id`).
    pub intent_id: String,
    pub tool: String,
    pub arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<IntentContext>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntentContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_intent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Proof over the params object with this field removed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
}

impl IntentContext {
    pub fn is_empty(&self) -> bool {
        self.session_id.is_none()
            && self.parent_intent.is_none()
            && self.reasoning.is_none()
            && self.signature.is_none()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// a2g/report
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportParams {
    pub agent_did: String,
    pub intent_id: String,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metrics: ExecutionMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Success,
    Failure,
    Timeout,
    Aborted,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_used_mb: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<f32>,
}

impl ExecutionMetrics {
    pub fn from_duration_ms(duration_ms: u64) -> Self {
        Self {
            duration_ms,
            ..Default::default()
        }
    }
}

impl ReportParams {
    pub fn success(agent_did: &str, intent_id: &str, result: Value, duration_ms: u64) -> Self {
        Self {
            agent_did: agent_did.to_string(),
            intent_id: intent_id.to_string(),
            status: ExecutionStatus::Success,
            result: Some(result),
            error: None,
            metrics: ExecutionMetrics::from_duration_ms(duration_ms),
        }
    }

    pub fn failure(agent_did: &str, intent_id: &str, error: &str, duration_ms: u64) -> Self {
        Self {
            agent_did: agent_did.to_string(),
            intent_id: intent_id.to_string(),
            status: ExecutionStatus::Failure,
            result: None,
            error: Some(error.to_string()),
            metrics: ExecutionMetrics::from_duration_ms(duration_ms),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// a2g/register
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterParams {
    pub agent_did: String,
    /// Key fingerprint; never the secret itself.
    pub public_key: String,
    pub capabilities_requested: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<AgentMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMetadata {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Verdict (response to a2g/intent)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerdictResult {
    pub verdict: Verdict,
    pub intent_id: String,
    pub risk_assessment: RiskAssessment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability_manifest: Option<CapabilityManifest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl VerdictResult {
    pub fn is_approved(&self) -> bool {
        self.verdict == Verdict::Approved
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Approved,
    Denied,
    Escalate,
    Conditional,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub score: f32,
    pub level: RiskLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_score: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heuristic_score: Option<f32>,
    #[serde(default)]
    pub threats: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Critical,
    High,
    Medium,
    Low,
}

impl RiskLevel {
    pub fn from_score(score: f32) -> Self {
        match score {
            s if s >= 0.9 => RiskLevel::Critical,
            s if s >= 0.7 => RiskLevel::High,
            s if s >= 0.4 => RiskLevel::Medium,
            _ => RiskLevel::Low,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_memory_mb: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cpu_percent: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_allowed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem_scope: Option<Vec<String>>,
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// g2a/policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyParams {
    pub agent_did: String,
    pub version: String,
    pub capabilities: PolicyCapabilities,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constitution_hash: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<HashMap<String, ToolPolicy>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceLimits>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolPolicy {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkPolicy {
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    #[serde(default)]
    pub blocked_domains: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_requests_per_minute: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_memory_mb: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cpu_percent: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_disk_mb: Option<u32>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inbound classification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A message received from the governance service.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Reply to one of our requests.  `outcome` holds `result` or `error`.
    Response {
        id: String,
        outcome: Result<Value, RpcError>,
    },
    /// Server-initiated message (e.g. `g2a/policy`).
    Notification { method: String, params: Value },
}

/// Malformed inbound message.  Logged and discarded by the client.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("missing or unsupported jsonrpc version")]
    InvalidVersion,
    #[error("response id must be a string or number")]
    InvalidId,
    #[error("response {id} must carry exactly one of result/error")]
    AmbiguousResponse { id: String },
    #[error("response {id} has a malformed error object: {reason}")]
    InvalidError { id: String, reason: String },
    #[error("message has neither id nor method")]
    Unclassifiable,
    #[error("message of {bytes} bytes exceeds the {max} byte limit")]
    TooLarge { bytes: usize, max: usize },
}

impl ProtocolError {
    /// Correlation id of a response that was recognised but malformed.
    pub fn response_id(&self) -> Option<&str> {
        match self {
            ProtocolError::AmbiguousResponse { id } | ProtocolError::InvalidError { id, .. } => {
                Some(id)
            }
            _ => None,
        }
    }
}

impl InboundMessage {
    /// Parse and classify a raw text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
        Self::classify(value)
    }

    /// Classify an already-parsed JSON value.
    ///
    /// Presence of `method` makes it a notification; otherwise an `id` plus
    /// exactly one of `result`/`error` makes it a response.  `"error": null`
    /// counts as absent, as does `"result": null` next to a real error.
    pub fn classify(mut value: Value) -> Result<Self, ProtocolError> {
        if value.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err(ProtocolError::InvalidVersion);
        }

        if let Some(method) = value.get("method").and_then(Value::as_str) {
            let method = method.to_string();
            let params = value
                .get_mut("params")
                .map(Value::take)
                .unwrap_or(Value::Null);
            return Ok(InboundMessage::Notification { method, params });
        }

        let id = match value.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(_) => return Err(ProtocolError::InvalidId),
            None => return Err(ProtocolError::Unclassifiable),
        };

        let result = value.get_mut("result").map(Value::take);
        let error = value
            .get_mut("error")
            .map(Value::take)
            .filter(|e| !e.is_null());
        let outcome = match (result, error) {
            (Some(result), None) => Ok(result),
            (None | Some(Value::Null), Some(error)) => {
                Err(serde_json::from_value::<RpcError>(error).map_err(|e| {
                    ProtocolError::InvalidError {
                        id: id.clone(),
                        reason: e.to_string(),
                    }
                })?)
            }
            _ => return Err(ProtocolError::AmbiguousResponse { id }),
        };

        Ok(InboundMessage::Response { id, outcome })
    }
}
