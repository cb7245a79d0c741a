/// Input that fails fast and is never retried.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid identity name {0:?}: use lowercase letters, digits and internal hyphens")]
    InvalidName(String),

    #[error("invalid DID {0:?}: expected did:<namespace>:<name>")]
    InvalidDid(String),
}

/// Shared error type used across all A2G crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("validation: {0}")]
    Validation(#[from] ValidationError),

    #[error("identity not found: {0}")]
    IdentityNotFound(String),

    #[error("config: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
