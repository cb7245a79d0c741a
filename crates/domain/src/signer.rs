//! HMAC-SHA256 signing with replay protection.
//!
//! A [`Signature`] binds a message to a millisecond timestamp and a random
//! nonce: `hash = hex(HMAC_SHA256(key, "<timestamp>:<nonce>:<canonical>"))`.
//! The governance peer recomputes the same hash, so the canonical form of a
//! structured message must be byte-identical on both sides.
//!
//! Everything here is a pure function over explicit keys.  No key material is
//! retained between calls.

use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Default verification window: five minutes.
pub const DEFAULT_MAX_AGE_MS: u64 = 5 * 60 * 1000;

/// Length in bytes of keys produced by [`Signer::generate_key`].
pub const KEY_BYTES: usize = 32;

/// A replay-protected proof over a message.
///
/// Serialized verbatim onto the wire (`{"timestamp", "nonce", "hash"}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Milliseconds since the Unix epoch, as a decimal string.
    pub timestamp: String,
    /// Single-use random token.
    pub nonce: String,
    /// Hex-encoded HMAC-SHA256.
    pub hash: String,
}

/// The content being signed: either raw text or a structured JSON value.
#[derive(Debug, Clone, Copy)]
pub enum Payload<'a> {
    Text(&'a str),
    Structured(&'a Value),
}

impl Payload<'_> {
    /// The exact string fed into the MAC.
    pub fn canonical(&self) -> String {
        match self {
            Payload::Text(s) => (*s).to_string(),
            Payload::Structured(v) => canonicalize(v),
        }
    }
}

impl<'a> From<&'a str> for Payload<'a> {
    fn from(s: &'a str) -> Self {
        Payload::Text(s)
    }
}

impl<'a> From<&'a String> for Payload<'a> {
    fn from(s: &'a String) -> Self {
        Payload::Text(s.as_str())
    }
}

impl<'a> From<&'a Value> for Payload<'a> {
    fn from(v: &'a Value) -> Self {
        Payload::Structured(v)
    }
}

/// Stateless signing functions.
pub struct Signer;

impl Signer {
    /// Sign `message`, generating a fresh timestamp and nonce unless given.
    ///
    /// Deterministic for a fixed `(key, message, timestamp, nonce)`.
    pub fn sign<'a>(
        signing_key: &str,
        message: impl Into<Payload<'a>>,
        timestamp: Option<&str>,
        nonce: Option<&str>,
    ) -> Signature {
        let timestamp = timestamp
            .map(str::to_string)
            .unwrap_or_else(|| Utc::now().timestamp_millis().to_string());
        let nonce = nonce
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let payload = format!("{timestamp}:{nonce}:{}", message.into().canonical());
        let hash = hmac_hex(signing_key, payload.as_bytes());

        Signature {
            timestamp,
            nonce,
            hash,
        }
    }

    /// Verify `signature` against `message` using the current wall clock.
    ///
    /// Returns `false` for a stale signature (`now - timestamp > max_age_ms`),
    /// an unparseable timestamp, or a hash mismatch.  Timestamps in the
    /// future are not rejected.
    pub fn verify<'a>(
        signing_key: &str,
        signature: &Signature,
        message: impl Into<Payload<'a>>,
        max_age_ms: u64,
    ) -> bool {
        Self::verify_at(
            signing_key,
            signature,
            message,
            max_age_ms,
            Utc::now().timestamp_millis(),
        )
    }

    /// Same as [`verify`](Self::verify) with an explicit "now" in epoch ms.
    pub fn verify_at<'a>(
        signing_key: &str,
        signature: &Signature,
        message: impl Into<Payload<'a>>,
        max_age_ms: u64,
        now_ms: i64,
    ) -> bool {
        let signed_at = match signature.timestamp.parse::<i64>() {
            Ok(t) => t,
            Err(_) => return false,
        };

        let max_age = i64::try_from(max_age_ms).unwrap_or(i64::MAX);
        if now_ms.saturating_sub(signed_at) > max_age {
            return false;
        }

        let expected = Self::sign(
            signing_key,
            message,
            Some(&signature.timestamp),
            Some(&signature.nonce),
        );

        // Slice ct_eq rejects unequal lengths up front and never exits early
        // on a per-byte mismatch.
        expected
            .hash
            .as_bytes()
            .ct_eq(signature.hash.as_bytes())
            .into()
    }

    /// Deterministic keyed hash without timestamp or nonce.
    pub fn hash<'a>(signing_key: &str, message: impl Into<Payload<'a>>) -> String {
        hmac_hex(signing_key, message.into().canonical().as_bytes())
    }

    /// A new 256-bit key, hex-encoded (64 characters), from the OS CSPRNG.
    pub fn generate_key() -> String {
        let mut key = [0u8; KEY_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut key);
        hex::encode(key)
    }
}

fn hmac_hex(signing_key: &str, data: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(signing_key.as_bytes()).expect("HMAC accepts any key length");
    mac.update(data);
    hex::encode(mac.finalize().into_bytes())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Canonical JSON
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Canonical form of a structured message.
///
/// Object keys are sorted at every nesting level, arrays keep their order,
/// and output uses compact separators.  A top-level JSON string yields its
/// raw content so that `sign(k, "x")` and `sign(k, &json!("x"))` agree.
///
/// Non-ASCII text is written as raw UTF-8, not `\uXXXX` escapes.  Peers that
/// canonicalize with ASCII escaping (Python's `json.dumps` default) hash such
/// payloads differently.
pub fn canonicalize(value: &Value) -> String {
    if let Value::String(s) = value {
        return s.clone();
    }
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, v)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, v) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(v, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
