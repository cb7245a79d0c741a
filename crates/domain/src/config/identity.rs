use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Identity
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Name of the stored identity to act as.  When `None`, the client runs
    /// without a DID-bound signing key.
    #[serde(default)]
    pub name: Option<String>,
    /// Directory holding one `<name>.json` document per identity.
    #[serde(default = "d_store_dir")]
    pub store_dir: PathBuf,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            name: None,
            store_dir: d_store_dir(),
        }
    }
}

fn d_store_dir() -> PathBuf {
    PathBuf::from(".a2g/identities")
}
