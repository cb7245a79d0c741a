//! Intent/report encoding and the context → intent id side table.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use a2g_domain::Signer;
use a2g_protocol::{
    AgentMetadata, ExecutionMetrics, ExecutionStatus, IntentContext, IntentParams, RegisterParams,
    ReportParams,
};
use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

use crate::types::ClientError;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Caller-facing inputs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Opaque caller-chosen handle used to find an intent again at report time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextToken(String);

impl ContextToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// A fresh random token.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ContextToken {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ContextToken {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Per-intent options.  Everything is optional.
#[derive(Debug, Clone, Default)]
pub struct IntentOptions {
    pub session_id: Option<String>,
    pub parent_intent: Option<String>,
    pub reasoning: Option<String>,
    /// Overrides the client's default request deadline.
    pub timeout: Option<Duration>,
    /// Remember the generated intent id under this token.
    pub context: Option<ContextToken>,
}

impl IntentOptions {
    pub fn with_context(mut self, token: impl Into<ContextToken>) -> Self {
        self.context = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    fn base_context(&self) -> Option<IntentContext> {
        let ctx = IntentContext {
            session_id: self.session_id.clone(),
            parent_intent: self.parent_intent.clone(),
            reasoning: self.reasoning.clone(),
            signature: None,
        };
        (!ctx.is_empty()).then_some(ctx)
    }
}

/// What happened when the agent executed (or declined to execute) a tool.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub duration: Duration,
    pub memory_used_mb: Option<u32>,
    pub cpu_percent: Option<f32>,
}

impl ExecutionOutcome {
    fn new(status: ExecutionStatus, duration: Duration) -> Self {
        Self {
            status,
            result: None,
            error: None,
            duration,
            memory_used_mb: None,
            cpu_percent: None,
        }
    }

    pub fn success(result: Value, duration: Duration) -> Self {
        Self {
            result: Some(result),
            ..Self::new(ExecutionStatus::Success, duration)
        }
    }

    pub fn failure(error: impl Into<String>, duration: Duration) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(ExecutionStatus::Failure, duration)
        }
    }

    pub fn timeout(duration: Duration) -> Self {
        Self::new(ExecutionStatus::Timeout, duration)
    }

    pub fn aborted(reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Self::new(ExecutionStatus::Aborted, Duration::ZERO)
        }
    }

    pub fn with_memory_mb(mut self, mb: u32) -> Self {
        self.memory_used_mb = Some(mb);
        self
    }

    pub fn with_cpu_percent(mut self, percent: f32) -> Self {
        self.cpu_percent = Some(percent);
        self
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Encoder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Builds `a2g/*` params for one agent.
#[derive(Clone)]
pub struct IntentEncoder {
    agent_did: String,
    signing_key: Option<String>,
}

impl std::fmt::Debug for IntentEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentEncoder")
            .field("agent_did", &self.agent_did)
            .field("signing", &self.signing_key.is_some())
            .finish()
    }
}

impl IntentEncoder {
    pub fn new(agent_did: impl Into<String>, signing_key: Option<String>) -> Self {
        Self {
            agent_did: agent_did.into(),
            signing_key,
        }
    }

    pub fn agent_did(&self) -> &str {
        &self.agent_did
    }

    pub fn signs(&self) -> bool {
        self.signing_key.is_some()
    }

    /// Build intent params with a fresh `intent_id`.
    ///
    /// With a signing key, the signature covers the params object as it
    /// serializes without a signature and is then placed in `context`.
    pub fn intent(
        &self,
        tool: &str,
        arguments: Value,
        options: &IntentOptions,
    ) -> Result<IntentParams, ClientError> {
        let mut params = IntentParams {
            agent_did: self.agent_did.clone(),
            intent_id: Uuid::new_v4().to_string(),
            tool: tool.to_string(),
            arguments,
            context: options.base_context(),
        };

        if let Some(key) = &self.signing_key {
            let unsigned = serde_json::to_value(&params)?;
            let signature = Signer::sign(key, &unsigned, None, None);
            params
                .context
                .get_or_insert_with(IntentContext::default)
                .signature = Some(signature);
        }

        Ok(params)
    }

    /// Build report params for `intent_id`.
    pub fn report(&self, intent_id: &str, outcome: &ExecutionOutcome) -> ReportParams {
        ReportParams {
            agent_did: self.agent_did.clone(),
            intent_id: intent_id.to_string(),
            status: outcome.status,
            result: outcome.result.clone(),
            error: outcome.error.clone(),
            metrics: ExecutionMetrics {
                duration_ms: u64::try_from(outcome.duration.as_millis()).unwrap_or(u64::MAX),
                memory_used_mb: outcome.memory_used_mb,
                cpu_percent: outcome.cpu_percent,
            },
        }
    }

    /// Build registration params.  `public_key` is a fingerprint of the
    /// signing key bound to this DID, so a key is required.
    pub fn register(
        &self,
        capabilities: Vec<String>,
        metadata: Option<AgentMetadata>,
    ) -> Result<RegisterParams, ClientError> {
        let key = self
            .signing_key
            .as_deref()
            .ok_or_else(|| ClientError::Config("registration requires a signing key".into()))?;

        Ok(RegisterParams {
            agent_did: self.agent_did.clone(),
            public_key: Signer::hash(key, &self.agent_did),
            capabilities_requested: capabilities,
            metadata,
        })
    }
}

/// Check the signature embedded in intent params the way the governance
/// peer does: strip it, canonicalize the rest, verify.
pub fn verify_intent_signature(signing_key: &str, params: &IntentParams, max_age_ms: u64) -> bool {
    let mut unsigned = params.clone();
    let Some(signature) = unsigned
        .context
        .as_mut()
        .and_then(|ctx| ctx.signature.take())
    else {
        return false;
    };
    if unsigned.context.as_ref().is_some_and(IntentContext::is_empty) {
        unsigned.context = None;
    }

    match serde_json::to_value(&unsigned) {
        Ok(value) => Signer::verify(signing_key, &signature, &value, max_age_ms),
        Err(_) => false,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context tracker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct TrackedIntent {
    intent_id: String,
    tracked_at: Instant,
    seq: u64,
}

#[derive(Default)]
struct TrackerInner {
    entries: HashMap<ContextToken, TrackedIntent>,
    /// Insertion order; entries whose `seq` no longer matches are stale.
    order: VecDeque<(u64, ContextToken)>,
    next_seq: u64,
}

impl TrackerInner {
    fn prune(&mut self, ttl: Duration, capacity: usize) {
        while let Some((seq, token)) = self.order.front().cloned() {
            let keep = match self.entries.get(&token) {
                Some(e) if e.seq == seq => {
                    self.entries.len() <= capacity && e.tracked_at.elapsed() < ttl
                }
                _ => {
                    self.order.pop_front();
                    continue;
                }
            };
            if keep {
                break;
            }
            self.entries.remove(&token);
            self.order.pop_front();
        }
    }

    /// Drop order slots left behind by `forget`, `take`, or re-tracking.
    fn compact(&mut self) {
        let entries = &self.entries;
        self.order
            .retain(|(seq, token)| entries.get(token).is_some_and(|e| e.seq == *seq));
    }
}

/// Expiring token → intent id association.
///
/// Holds only the caller's token, never the caller's context object.  Entries
/// go away when taken, after `ttl`, or when `capacity` is exceeded (oldest
/// first).
pub struct ContextTracker {
    inner: Mutex<TrackerInner>,
    ttl: Duration,
    capacity: usize,
}

impl ContextTracker {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(TrackerInner::default()),
            ttl,
            capacity,
        }
    }

    /// Associate `token` with `intent_id`, replacing any previous mapping.
    pub fn track(&self, token: ContextToken, intent_id: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(
            token.clone(),
            TrackedIntent {
                intent_id: intent_id.into(),
                tracked_at: Instant::now(),
                seq,
            },
        );
        inner.order.push_back((seq, token));
        inner.prune(self.ttl, self.capacity);
        if inner.order.len() > self.capacity.saturating_mul(2) {
            inner.compact();
        }
    }

    /// Intent id for `token`, if tracked and not expired.
    pub fn intent_for(&self, token: &ContextToken) -> Option<String> {
        let mut inner = self.inner.lock();
        inner.prune(self.ttl, self.capacity);
        inner.entries.get(token).map(|e| e.intent_id.clone())
    }

    /// Remove and return the intent id for `token`.
    pub fn take(&self, token: &ContextToken) -> Option<String> {
        let mut inner = self.inner.lock();
        inner.prune(self.ttl, self.capacity);
        inner.entries.remove(token).map(|e| e.intent_id)
    }

    /// Drop the mapping for `token`.  Returns whether one existed.
    pub fn forget(&self, token: &ContextToken) -> bool {
        self.inner.lock().entries.remove(token).is_some()
    }

    pub fn len(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.prune(self.ttl, self.capacity);
        inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
