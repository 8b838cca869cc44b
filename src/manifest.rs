use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::{fs::{self, OpenOptions}, io::{AsyncBufReadExt, AsyncWriteExt}, sync::Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemOutcome {
    Done,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestRecord {
    pub seq: usize,
    pub run_id: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    pub status: ItemOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: String,
}

/// Append-only JSONL log of finished batch items.
#[derive(Clone)]
pub struct ManifestWriter {
    file: Arc<Mutex<tokio::fs::File>>,
    path: PathBuf,
}

impl ManifestWriter {
    pub async fn open(path: PathBuf) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() { fs::create_dir_all(parent).await?; }
        let file = OpenOptions::new().create(true).append(true).open(&path).await?;
        Ok(Self { file: Arc::new(Mutex::new(file)), path })
    }

    pub async fn append(&self, rec: &ManifestRecord) -> anyhow::Result<()> {
        let mut f = self.file.lock().await;
        let line = serde_json::to_vec(rec)?;
        f.write_all(&line).await?;
        f.write_all(b"\n").await?;
        f.flush().await?;
        Ok(())
    }

    pub fn path(&self) -> &Path { &self.path }
}

/// Labels of every item a previous run completed. Unreadable lines are ignored.
pub async fn completed_labels(path: &Path) -> anyhow::Result<HashSet<String>> {
    let file = match tokio::fs::File::open(path).await {
        Ok(f) => f,
        Err(_) => return Ok(HashSet::new()),
    };
    let mut lines = tokio::io::BufReader::new(file).lines();
    let mut done = HashSet::new();
    while let Some(line) = lines.next_line().await? {
        match serde_json::from_str::<ManifestRecord>(&line) {
            Ok(rec) if rec.status == ItemOutcome::Done => { done.insert(rec.label); }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "skipping unreadable manifest line"),
        }
    }
    Ok(done)
}
