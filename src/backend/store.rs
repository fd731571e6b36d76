//! Per-user style store for the native engine.
//!
//! Each user gets one JSON file, named by the SHA-256 of the user id, holding
//! their writing samples and the embedding of each. Samples are keyed by their text, so seeding the same
//! sample twice keeps one copy.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::Result;

/// One stored writing sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleEntry {
    pub text: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct UserFile {
    samples: BTreeMap<String, Vec<f32>>,
}

/// File-backed store, one file per user.
#[derive(Debug, Clone)]
pub struct StyleStore {
    root: PathBuf,
    // Serializes read-modify-write cycles on user files.
    lock: Arc<Mutex<()>>,
}

impl StyleStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Add a sample for a user. Re-adding the same text replaces its embedding.
    pub async fn add(&self, user_id: &str, text: &str, embedding: Vec<f32>) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut file = self.read(user_id).await?;
        file.samples.insert(text.to_string(), embedding);
        self.write(user_id, &file).await
    }

    /// All samples stored for a user. Unknown users have none.
    pub async fn entries(&self, user_id: &str) -> Result<Vec<StyleEntry>> {
        let file = self.read(user_id).await?;
        Ok(file
            .samples
            .into_iter()
            .map(|(text, embedding)| StyleEntry { text, embedding })
            .collect())
    }

    /// Forget everything stored for a user.
    pub async fn clear(&self, user_id: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.user_path(user_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, user_id: &str) -> Result<UserFile> {
        let path = self.user_path(user_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(UserFile::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, user_id: &str, file: &UserFile) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.user_path(user_id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(file)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!("Stored {} samples at {}", file.samples.len(), path.display());
        Ok(())
    }

    fn user_path(&self, user_id: &str) -> PathBuf {
        self.root.join(format!("{}.json", file_stem(user_id)))
    }
}

/// Hex SHA-256 of the user id. Safe as a file name whatever the id contains.
fn file_stem(user_id: &str) -> String {
    format!("{:x}", Sha256::digest(user_id.as_bytes()))
}
