//! Shared building blocks for the A2G (agent-to-governance) SDK.
//!
//! - [`signer`]: stateless HMAC-SHA256 signing with replay protection
//! - [`did`]: agent identities (`did:aeon:<name>`) and their key material
//! - [`store`]: name-keyed persistence for identity documents
//! - [`config`]: TOML configuration shared by the SDK and the CLI
//! - [`error`]: the error type used across the workspace

pub mod config;
pub mod did;
pub mod error;
pub mod signer;
pub mod store;

pub use did::{parse_did, AgentIdentity, IdentityDocument, DID_NAMESPACE};
pub use error::{Error, Result, ValidationError};
pub use signer::{canonicalize, Signature, Signer, DEFAULT_MAX_AGE_MS};
pub use store::{FileIdentityStore, IdentityStore};
