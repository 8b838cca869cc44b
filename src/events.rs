use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStage {
    Pending,
    Generating,
    Parsing,
    Persisting,
    Done,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]

pub enum RunEvent {
    Started { run_id: String, total: u64 },
    Stage { run_id: String, index: usize, label: String, stage: ItemStage },
    ItemFailed { run_id: String, index: usize, label: String, error: String },
    Progress { run_id: String, done: u64, failed: u64, skipped: u64, total: u64 },
    Finished { run_id: String, succeeded: u64, failed: u64, skipped: u64 },
    Failed { run_id: String, error: String },
}

impl RunEvent {
    pub fn run_id(&self) -> &str {
        match self {
            RunEvent::Started { run_id, .. }
            | RunEvent::Stage { run_id, .. }
            | RunEvent::ItemFailed { run_id, .. }
            | RunEvent::Progress { run_id, .. }
            | RunEvent::Finished { run_id, .. }
            | RunEvent::Failed { run_id, .. } => run_id,
        }
    }
}
