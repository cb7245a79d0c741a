//! Identity persistence keyed by name.
//!
//! Each identity lives in its own `<dir>/<name>.json` document.  Names are
//! validated before touching the filesystem, so a name can never escape the
//! store directory.

use std::path::{Path, PathBuf};

use crate::did::{validate_name, AgentIdentity, IdentityDocument};
use crate::error::{Error, Result};

/// Save/load/list/delete identity documents by name.
pub trait IdentityStore: Send + Sync {
    /// Persist `identity`, replacing any document with the same name.
    fn save(&self, identity: &AgentIdentity) -> Result<()>;

    /// Load the identity stored under `name`.
    fn load(&self, name: &str) -> Result<AgentIdentity>;

    /// Names of all stored identities, sorted.
    fn list(&self) -> Result<Vec<String>>;

    /// Remove `name`.  Returns `false` if nothing was stored under it.
    fn delete(&self, name: &str) -> Result<bool>;

    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.list()?.iter().any(|n| n == name))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// File-backed store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Identity store backed by one JSON file per identity.
pub struct FileIdentityStore {
    dir: PathBuf,
}

impl FileIdentityStore {
    /// Open (and create if needed) the store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(Error::Io)?;
        tracing::debug!(path = %dir.display(), "identity store opened");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.dir.join(format!("{name}.json")))
    }
}

impl IdentityStore for FileIdentityStore {
    fn save(&self, identity: &AgentIdentity) -> Result<()> {
        let path = self.path_for(identity.name())?;
        let json = serde_json::to_string_pretty(identity.document())?;

        // Write to a sibling temp file and rename so readers never observe a
        // half-written document.
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(Error::Io)?;
        restrict_permissions(&tmp)?;
        std::fs::rename(&tmp, &path).map_err(Error::Io)?;

        tracing::info!(did = %identity.did(), path = %path.display(), "identity saved");
        Ok(())
    }

    fn load(&self, name: &str) -> Result<AgentIdentity> {
        let path = self.path_for(name)?;
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::IdentityNotFound(name.to_string()));
            }
            Err(e) => return Err(Error::Io(e)),
        };
        let document: IdentityDocument = serde_json::from_str(&raw)?;
        Ok(AgentIdentity::from_document(document)?)
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.dir).map_err(Error::Io)? {
            let path = entry.map_err(Error::Io)?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_name(stem).is_ok() {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn delete(&self, name: &str) -> Result<bool> {
        let path = self.path_for(name)?;
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!(name = %name, "identity deleted");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.path_for(name)?.is_file())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).map_err(Error::Io)
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
