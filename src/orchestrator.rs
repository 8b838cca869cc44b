use std::{collections::HashSet, sync::Arc};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{sync::broadcast, time::{sleep, Duration}};

use crate::events::{ItemStage, RunEvent};
use crate::generator::{ContentGenerator, GenerationError, GenerationJob};
use crate::manifest::{completed_labels, ItemOutcome, ManifestRecord, ManifestWriter};
use crate::store::{ProductStore, StoreError};

/// What to do with the rest of the batch once an item fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    ContinueOnError,
    FailFast,
}

#[derive(Debug, Clone)]
pub struct BatchParams {
    /// Constant pause between consecutive items.
    pub delay: Duration,
    pub policy: FailurePolicy,
    pub resume: bool,
}

#[derive(Debug, Error)]
pub enum ItemError {
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error("persisting failed: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct BatchReport {
    pub run_id: String,
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub skipped: Vec<String>,
    pub aborted: bool,
}

pub struct BatchDriver {
    generator: Arc<ContentGenerator>,
    store: Arc<dyn ProductStore>,
    params: BatchParams,
    manifest: Option<ManifestWriter>,
    events: Option<broadcast::Sender<RunEvent>>,
}

impl BatchDriver {
    pub fn new(generator: Arc<ContentGenerator>, store: Arc<dyn ProductStore>, params: BatchParams) -> Self {
        Self { generator, store, params, manifest: None, events: None }
    }

    pub fn with_manifest(mut self, manifest: ManifestWriter) -> Self {
        self.manifest = Some(manifest);
        self
    }

    pub fn with_events(mut self, tx: broadcast::Sender<RunEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    fn emit(&self, evt: RunEvent) {
        if let Some(tx) = &self.events {
            // no subscribers is fine
            let _ = tx.send(evt);
        }
    }

    fn stage(&self, run_id: &str, index: usize, label: &str, stage: ItemStage) {
        tracing::debug!(index, label, ?stage, "item stage");
        self.emit(RunEvent::Stage { run_id: run_id.into(), index, label: label.into(), stage });
    }

    async fn record(&self, run_id: &str, seq: usize, label: &str, slug: Option<String>, status: ItemOutcome, error: Option<String>) {
        let Some(m) = &self.manifest else { return };
        let rec = ManifestRecord {
            seq,
            run_id: run_id.into(),
            label: label.into(),
            slug,
            status,
            error,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        if let Err(e) = m.append(&rec).await {
            tracing::warn!(error = %e, path = %m.path().display(), "could not append manifest record");
        }
    }

    /// Runs every job in order, one at a time.
    pub async fn run(&self, run_id: &str, jobs: &[GenerationJob]) -> Result<BatchReport> {
        let done_before: HashSet<String> = match (&self.manifest, self.params.resume) {
            (Some(m), true) => completed_labels(m.path()).await?,
            _ => HashSet::new(),
        };

        let total = jobs.len() as u64;
        let mut report = BatchReport { run_id: run_id.into(), ..Default::default() };
        self.emit(RunEvent::Started { run_id: run_id.into(), total });
        tracing::info!(run_id, total, store = self.store.name(), policy = ?self.params.policy, "batch started");

        let mut attempted_any = false;
        for (index, job) in jobs.iter().enumerate() {
            let label = job.label(index);
            self.stage(run_id, index, &label, ItemStage::Pending);

            if let Some(reason) = self.skip_reason(job, &label, &done_before).await {
                tracing::info!(index, %label, reason, "skipping item");
                self.stage(run_id, index, &label, ItemStage::Skipped);
                self.record(run_id, index, &label, job.expected_slug(), ItemOutcome::Skipped, Some(reason.into())).await;
                report.skipped.push(label);
                self.progress(run_id, &report, total);
                continue;
            }

            if attempted_any && !self.params.delay.is_zero() {
                sleep(self.params.delay).await;
            }
            attempted_any = true;

            tracing::info!("generating {} ({}/{})", label, index + 1, total);
            match self.process(run_id, index, &label, job).await {
                Ok(slug) => {
                    self.stage(run_id, index, &label, ItemStage::Done);
                    self.record(run_id, index, &label, Some(slug.clone()), ItemOutcome::Done, None).await;
                    report.succeeded.push(slug);
                }
                Err(e) => {
                    tracing::error!(index, %label, error = %e, "item failed");
                    self.stage(run_id, index, &label, ItemStage::Failed);
                    self.emit(RunEvent::ItemFailed { run_id: run_id.into(), index, label: label.clone(), error: e.to_string() });
                    self.record(run_id, index, &label, job.expected_slug(), ItemOutcome::Failed, Some(e.to_string())).await;
                    report.failed.push((label, e.to_string()));
                    if self.params.policy == FailurePolicy::FailFast {
                        report.aborted = true;
                        self.progress(run_id, &report, total);
                        tracing::warn!(run_id, "stopping batch after first failure");
                        break;
                    }
                }
            }
            self.progress(run_id, &report, total);
        }

        self.emit(RunEvent::Finished {
            run_id: run_id.into(),
            succeeded: report.succeeded.len() as u64,
            failed: report.failed.len() as u64,
            skipped: report.skipped.len() as u64,
        });
        tracing::info!(
            run_id,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "batch finished"
        );
        Ok(report)
    }

    async fn skip_reason(&self, job: &GenerationJob, label: &str, done_before: &HashSet<String>) -> Option<&'static str> {
        if done_before.contains(label) {
            return Some("completed in a previous run");
        }
        let slug = job.expected_slug()?;
        match self.store.contains_slug(&slug).await {
            Ok(true) => Some("slug already in store"),
            Ok(false) => None,
            Err(e) => {
                // let the insert report it properly
                tracing::warn!(error = %e, "slug lookup failed");
                None
            }
        }
    }

    async fn process(&self, run_id: &str, index: usize, label: &str, job: &GenerationJob) -> Result<String, ItemError> {
        self.stage(run_id, index, label, ItemStage::Generating);
        let raw = self.generator.fetch(job).await?;

        self.stage(run_id, index, label, ItemStage::Parsing);
        let product = self.generator.assemble(job, raw)?;

        self.stage(run_id, index, label, ItemStage::Persisting);
        self.store.insert(&product).await?;
        Ok(product.slug)
    }

    fn progress(&self, run_id: &str, report: &BatchReport, total: u64) {
        self.emit(RunEvent::Progress {
            run_id: run_id.into(),
            done: report.succeeded.len() as u64,
            failed: report.failed.len() as u64,
            skipped: report.skipped.len() as u64,
            total,
        });
    }
}
