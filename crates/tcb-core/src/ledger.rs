use std::path::{Path, PathBuf};

use crate::{
    storage::{self, Stored},
    Result,
};

/// On-disk record of the channels the bot currently occupies.
///
/// The file holds a compact JSON array of channel names and is rewritten
/// wholesale on every mutation.
#[derive(Clone, Debug)]
pub struct ChannelLedger {
    path: PathBuf,
}

impl ChannelLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read(&self) -> Stored<Vec<String>> {
        storage::read_json(&self.path).await
    }

    /// Persisted channels, or an empty list when the record is absent or unusable.
    pub async fn load(&self) -> Vec<String> {
        match self.read().await {
            Stored::Found(channels) => channels,
            Stored::Missing => Vec::new(),
            Stored::Corrupt(reason) => {
                tracing::warn!("ignoring unreadable channel ledger: {reason}");
                Vec::new()
            }
        }
    }

    pub async fn store(&self, channels: &[String]) -> Result<()> {
        let txt = serde_json::to_string(channels)?;
        storage::write_text(&self.path, &txt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tmp_path;

    #[tokio::test]
    async fn load_missing_file_returns_empty() {
        let ledger = ChannelLedger::new(tmp_path("tcb-ledger-missing").join("channels.json"));
        assert!(ledger.load().await.is_empty());
    }

    #[tokio::test]
    async fn load_invalid_content_returns_empty() {
        let path = tmp_path("tcb-ledger-invalid").join("channels.json");
        storage::write_text(&path, "{\"not\": \"a list\"}").await.unwrap();
        let ledger = ChannelLedger::new(path);
        assert!(matches!(ledger.read().await, Stored::Corrupt(_)));
        assert!(ledger.load().await.is_empty());
    }

    #[tokio::test]
    async fn store_overwrites_with_compact_array() {
        let path = tmp_path("tcb-ledger-store").join("channels.json");
        let ledger = ChannelLedger::new(&path);
        ledger
            .store(&["other".to_string(), "test".to_string()])
            .await
            .unwrap();
        ledger.store(&["other".to_string()]).await.unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, r#"["other"]"#);
        assert_eq!(ledger.load().await, vec!["other".to_string()]);
    }
}
