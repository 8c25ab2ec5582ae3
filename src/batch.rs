//! Batch driver
//!
//! Items run one after another. A failed item is logged and recorded, and
//! the batch moves on; the summary tells the caller what happened to each.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::job::{Job, JobFile};
use crate::pipeline::{ItemOutcome, ItemProducer};
use crate::publish::{duration_ms, Manifest, ManifestRecord};

/// A job plus the directory its relative paths resolve against
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub job: Job,
    pub base_dir: PathBuf,
}

/// Pick items from loaded job files.
///
/// `item` selects one job by name; `count` keeps the first N of the
/// selection. Asking for a name that no file defines is an error.
pub fn select(files: &[JobFile], item: Option<&str>, count: Option<usize>) -> Result<Vec<BatchItem>> {
    let mut items: Vec<BatchItem> = files
        .iter()
        .flat_map(|file| {
            file.jobs.iter().map(|job| BatchItem {
                job: job.clone(),
                base_dir: file.base_dir.clone(),
            })
        })
        .filter(|candidate| item.is_none_or(|name| candidate.job.name == name))
        .collect();

    if let Some(name) = item {
        if items.is_empty() {
            return Err(Error::Config(format!("no job named '{name}'")));
        }
    }
    if let Some(n) = count {
        items.truncate(n);
    }
    Ok(items)
}

/// One failed item
#[derive(Debug, Clone, PartialEq)]
pub struct ItemFailure {
    pub name: String,
    /// Pipeline step that failed (`narration`, `render`, `mux`, ...)
    pub step: String,
    pub message: String,
}

/// Outcome of a batch
#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub succeeded: Vec<String>,
    pub failed: Vec<ItemFailure>,
    pub skipped: Vec<String>,
    /// Video produced by the successful items, seconds
    pub video_duration: f64,
    pub elapsed: Duration,
}

impl BatchSummary {
    #[must_use]
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len() + self.skipped.len()
    }

    /// True when no item failed
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Batch line for the manifest; `durationMs` is video length, as in artifact lines
    #[must_use]
    pub fn manifest_record(&self) -> ManifestRecord {
        ManifestRecord::new(
            "batch",
            self.succeeded.len(),
            self.failed.len(),
            self.skipped.len(),
            duration_ms(self.video_duration),
        )
    }
}

pub struct BatchRunner {
    producer: Arc<dyn ItemProducer>,
    manifest: Option<Arc<Manifest>>,
    dry_run: bool,
}

impl BatchRunner {
    pub fn new(producer: Arc<dyn ItemProducer>) -> Self {
        Self {
            producer,
            manifest: None,
            dry_run: false,
        }
    }

    /// Record the batch outcome in `manifest` when the run ends
    #[must_use]
    pub fn with_manifest(mut self, manifest: Arc<Manifest>) -> Self {
        self.manifest = Some(manifest);
        self
    }

    /// Validate every item but produce nothing
    #[must_use]
    pub fn dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }

    /// Run every item; never stops early
    pub async fn run(&self, items: &[BatchItem]) -> BatchSummary {
        let started = Instant::now();
        let mut summary = BatchSummary::default();

        for (i, item) in items.iter().enumerate() {
            let name = item.job.name.clone();
            info!("[{}/{}] {}", i + 1, items.len(), name);

            if self.dry_run {
                match self.producer.validate(&item.job, &item.base_dir).await {
                    Ok(()) => {
                        info!("'{name}' is valid (dry run, skipped)");
                        summary.skipped.push(name);
                    }
                    Err(e) => {
                        error!("'{name}' is invalid: {e}");
                        summary.failed.push(failure(name, &e));
                    }
                }
                continue;
            }

            match self.producer.produce(&item.job, &item.base_dir).await {
                Ok(outcome) => {
                    summary.video_duration += outcome.duration;
                    summary.succeeded.push(name);
                }
                Err(e) => {
                    error!("'{name}' failed at {}: {e}", e.step());
                    summary.failed.push(failure(name, &e));
                }
            }
        }

        summary.elapsed = started.elapsed();
        info!(
            "Batch finished: {} succeeded, {} failed, {} skipped in {:.2}s",
            summary.succeeded.len(),
            summary.failed.len(),
            summary.skipped.len(),
            summary.elapsed.as_secs_f64()
        );

        if !self.dry_run {
            if let Some(manifest) = &self.manifest {
                if let Err(e) = manifest.append(&summary.manifest_record()).await {
                    warn!("failed to write batch record to {}: {e}", manifest.path().display());
                }
            }
        }
        summary
    }
}

fn failure(name: String, err: &Error) -> ItemFailure {
    ItemFailure {
        name,
        step: err.step().to_string(),
        message: err.to_string(),
    }
}
