//! Whole-file JSON records under the bot's config directory.

use std::path::Path;

use serde::de::DeserializeOwned;

use crate::Result;

/// Outcome of reading a persisted record.
///
/// Callers that only care about "usable or not" collapse `Missing` and
/// `Corrupt` via [`Stored::found`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Stored<T> {
    Found(T),
    Missing,
    Corrupt(String),
}

impl<T> Stored<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Stored::Found(v) => Some(v),
            Stored::Missing | Stored::Corrupt(_) => None,
        }
    }
}

/// Read and parse a JSON record. Never fails: an absent file is `Missing`,
/// an unreadable or unparsable one is `Corrupt`.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Stored<T> {
    let txt = match tokio::fs::read_to_string(path).await {
        Ok(txt) => txt,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Stored::Missing,
        Err(e) => return Stored::Corrupt(format!("read {}: {e}", path.display())),
    };
    if txt.trim().is_empty() {
        return Stored::Missing;
    }
    match serde_json::from_str(&txt) {
        Ok(v) => Stored::Found(v),
        Err(e) => Stored::Corrupt(format!("parse {}: {e}", path.display())),
    }
}

/// Overwrite `path` with `txt`, creating the parent directory first.
pub async fn write_text(path: &Path, txt: &str) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            tokio::fs::create_dir_all(dir).await?;
        }
    }
    tokio::fs::write(path, txt).await?;
    Ok(())
}

#[cfg(test)]
pub(crate) fn tmp_path(prefix: &str) -> std::path::PathBuf {
    let ts = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let pid = std::process::id();
    std::path::PathBuf::from(format!("/tmp/{prefix}-{pid}-{ts}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_is_missing() {
        let path = tmp_path("tcb-storage-missing").join("nothing.json");
        let got: Stored<Vec<String>> = read_json(&path).await;
        assert_eq!(got, Stored::Missing);
    }

    #[tokio::test]
    async fn invalid_json_is_corrupt() {
        let path = tmp_path("tcb-storage-corrupt").join("bad.json");
        write_text(&path, "{not json").await.unwrap();
        let got: Stored<Vec<String>> = read_json(&path).await;
        assert!(matches!(got, Stored::Corrupt(_)));
        assert_eq!(got.found(), None);
    }

    #[tokio::test]
    async fn write_creates_parent_dirs() {
        let path = tmp_path("tcb-storage-nested").join("a/b/c.json");
        write_text(&path, "[\"x\"]").await.unwrap();
        let got: Stored<Vec<String>> = read_json(&path).await;
        assert_eq!(got, Stored::Found(vec!["x".to_string()]));
    }
}
