//! Agent identities: `did:aeon:<name>` paired with a secret signing key.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::signer::Signer;

/// Namespace used for identities created by this SDK.
pub const DID_NAMESPACE: &str = "aeon";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Identity document
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The persisted form of an identity.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityDocument {
    pub did: String,
    pub name: String,
    pub signing_key: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl fmt::Debug for IdentityDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityDocument")
            .field("did", &self.did)
            .field("name", &self.name)
            .field("signing_key", &"<redacted>")
            .field("created_at", &self.created_at)
            .field("metadata", &self.metadata)
            .finish()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AgentIdentity
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An immutable agent identity.
///
/// Rotating the key means creating a new identity; there is no setter.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentIdentity {
    document: IdentityDocument,
}

impl AgentIdentity {
    /// Create a new identity named `name`.
    ///
    /// A fresh 256-bit key is generated unless `signing_key` is supplied.
    pub fn create(
        name: &str,
        signing_key: Option<String>,
        metadata: Option<serde_json::Value>,
    ) -> Result<Self, ValidationError> {
        validate_name(name)?;

        let document = IdentityDocument {
            did: format!("did:{DID_NAMESPACE}:{name}"),
            name: name.to_string(),
            signing_key: signing_key.unwrap_or_else(Signer::generate_key),
            created_at: Utc::now(),
            metadata,
        };

        tracing::debug!(did = %document.did, "identity created");
        Ok(Self { document })
    }

    /// Rebuild an identity from a stored document, re-checking its fields.
    pub fn from_document(document: IdentityDocument) -> Result<Self, ValidationError> {
        validate_name(&document.name)?;
        let (_, name) = parse_did(&document.did)?;
        if name != document.name {
            return Err(ValidationError::InvalidDid(document.did));
        }
        Ok(Self { document })
    }

    pub fn did(&self) -> &str {
        &self.document.did
    }

    pub fn name(&self) -> &str {
        &self.document.name
    }

    pub fn signing_key(&self) -> &str {
        &self.document.signing_key
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.document.created_at
    }

    pub fn metadata(&self) -> Option<&serde_json::Value> {
        self.document.metadata.as_ref()
    }

    pub fn document(&self) -> &IdentityDocument {
        &self.document
    }

    pub fn into_document(self) -> IdentityDocument {
        self.document
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Names are lowercase ASCII alphanumerics with internal hyphens only.
pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');

    if name.is_empty() || !valid_chars || name.starts_with('-') || name.ends_with('-') {
        return Err(ValidationError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Split `did:<namespace>:<name>` into `(namespace, name)`.
pub fn parse_did(did: &str) -> Result<(&str, &str), ValidationError> {
    let invalid = || ValidationError::InvalidDid(did.to_string());

    let mut parts = did.splitn(3, ':');
    let (Some("did"), Some(namespace), Some(name)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid());
    };

    let namespace_ok = !namespace.is_empty()
        && namespace
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
    if !namespace_ok || validate_name(name).is_err() {
        return Err(invalid());
    }
    Ok((namespace, name))
}
