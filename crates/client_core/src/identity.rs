use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use shared::domain::Participant;

/// File name of the persisted local identity.
pub const IDENTITY_FILE_NAME: &str = "planning-poker-user.json";

/// Where the local participant identity is cached between runs.
pub trait IdentityStore: Send + Sync {
    fn load(&self) -> Result<Option<Participant>>;
    fn save(&self, identity: &Participant) -> Result<()>;
}

pub struct FileIdentityStore {
    path: PathBuf,
}

impl FileIdentityStore {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(IDENTITY_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IdentityStore for FileIdentityStore {
    fn load(&self) -> Result<Option<Participant>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read '{}'", self.path.display()))
            }
        };
        let identity = serde_json::from_str(&raw)
            .with_context(|| format!("invalid identity record in '{}'", self.path.display()))?;
        Ok(Some(identity))
    }

    fn save(&self, identity: &Participant) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create identity directory '{}'", parent.display())
            })?;
        }
        let raw = serde_json::to_string_pretty(identity)?;
        fs::write(&self.path, raw)
            .with_context(|| format!("failed to write '{}'", self.path.display()))
    }
}

#[cfg(test)]
#[path = "tests/identity_tests.rs"]
mod tests;
