use std::path::{Path, PathBuf};

use crate::{
    domain::Credential,
    storage::{self, Stored},
    Result,
};

/// Persisted credential record (`auth.json`), pretty-printed JSON.
#[derive(Clone, Debug)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read(&self) -> Stored<Credential> {
        storage::read_json(&self.path).await
    }

    pub async fn load_credential(&self) -> Option<Credential> {
        match self.read().await {
            Stored::Found(c) => Some(c),
            Stored::Missing => None,
            Stored::Corrupt(reason) => {
                tracing::warn!("ignoring unreadable credential record: {reason}");
                None
            }
        }
    }

    pub async fn store(&self, credential: &Credential) -> Result<()> {
        let txt = serde_json::to_string_pretty(credential)?;
        storage::write_text(&self.path, &txt).await
    }
}
