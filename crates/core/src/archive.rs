use crate::audio::AudioFormat;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;

/// Durable storage for candidate recordings.
#[async_trait]
pub trait MediaArchive: Send + Sync {
    /// Stores one recording and returns a reference to where it lives.
    async fn store_audio(&self, session_token: &str, audio: &[u8], format: AudioFormat) -> Result<String>;
}

/// Keeps recordings under `<root>/<session_token>/<timestamp>.<ext>`.
pub struct LocalArchive {
    root: PathBuf,
}

impl LocalArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl MediaArchive for LocalArchive {
    async fn store_audio(&self, session_token: &str, audio: &[u8], format: AudioFormat) -> Result<String> {
        let dir = self.root.join(crate::store::file_safe(session_token));
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create archive directory {}", dir.display()))?;

        let path = dir.join(format!(
            "{}.{}",
            Utc::now().format("%Y%m%dT%H%M%S%.3f"),
            format.extension()
        ));
        tokio::fs::write(&path, audio)
            .await
            .with_context(|| format!("Failed to write recording {}", path.display()))?;
        Ok(path.display().to_string())
    }
}
