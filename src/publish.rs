//! Publishing finished artifacts
//!
//! [`OutputPackager::publish`] copies a composed video to each destination
//! directory and appends one record to the [`Manifest`]. A failed
//! destination is reported and the rest are still attempted.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::PublishError;
use crate::probe::MediaProbe;

/// Details of a published video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRecord {
    pub path: PathBuf,
    pub bytes: u64,
    /// Probed length; absent when probing failed
    pub duration_seconds: Option<f64>,
    pub destinations: Vec<PathBuf>,
}

/// Seconds of video as whole milliseconds, the unit of `durationMs`
#[must_use]
pub fn duration_ms(seconds: f64) -> u64 {
    if seconds.is_finite() && seconds > 0.0 {
        (seconds * 1000.0).round() as u64
    } else {
        0
    }
}

/// One manifest line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub generated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactRecord>,
}

impl ManifestRecord {
    pub fn new(kind: impl Into<String>, success: usize, failed: usize, skipped: usize, duration_ms: u64) -> Self {
        Self {
            kind: kind.into(),
            success,
            failed,
            skipped,
            duration_ms,
            generated_at: Utc::now(),
            artifact: None,
        }
    }

    #[must_use]
    pub fn with_artifact(mut self, artifact: ArtifactRecord) -> Self {
        self.artifact = Some(artifact);
        self
    }
}

/// Append-only JSON lines file
#[derive(Debug)]
pub struct Manifest {
    path: PathBuf,
    // one writer per process; lines from concurrent appends never interleave
    lock: Mutex<()>,
}

impl Manifest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, record: &ManifestRecord) -> std::io::Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }

    /// All records so far; unparseable lines are skipped
    pub async fn records(&self) -> std::io::Result<Vec<ManifestRecord>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        Ok(content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect())
    }
}

/// Result of publishing one artifact
#[derive(Debug, Clone)]
pub struct PublishReport {
    pub record: ManifestRecord,
    /// Copies that were written
    pub copies: Vec<PathBuf>,
    /// Destinations that failed; the others were still written
    pub failures: Vec<PublishError>,
}

impl PublishReport {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct OutputPackager {
    probe: Arc<dyn MediaProbe>,
    manifest: Arc<Manifest>,
}

impl OutputPackager {
    pub fn new(probe: Arc<dyn MediaProbe>, manifest: Arc<Manifest>) -> Self {
        Self { probe, manifest }
    }

    #[must_use]
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Copy `output` into each destination directory and record it.
    ///
    /// Fails outright only when the artifact itself is unusable or the
    /// manifest cannot be written.
    pub async fn publish(
        &self,
        item_type: &str,
        output: &Path,
        destinations: &[PathBuf],
    ) -> Result<PublishReport, PublishError> {
        let bytes = tokio::fs::metadata(output)
            .await
            .map_err(|e| PublishError {
                destination: output.to_path_buf(),
                message: format!("artifact unreadable: {e}"),
            })?
            .len();

        let duration = match self.probe.duration(output).await {
            Ok(d) => Some(d),
            Err(e) => {
                warn!("could not probe {}: {e}", output.display());
                None
            }
        };

        let file_name = output.file_name().ok_or_else(|| PublishError {
            destination: output.to_path_buf(),
            message: "artifact path has no file name".to_string(),
        })?;

        let mut copies = Vec::new();
        let mut failures = Vec::new();
        for dest_dir in destinations {
            let target = dest_dir.join(file_name);
            match copy_to(output, &target).await {
                Ok(()) => {
                    info!("Published {}", target.display());
                    copies.push(target);
                }
                Err(e) => {
                    warn!("publish to {} failed: {e}", dest_dir.display());
                    failures.push(PublishError {
                        destination: dest_dir.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        // a partly published item is not a success
        let success = usize::from(failures.is_empty());
        let record = ManifestRecord::new(item_type, success, failures.len(), 0, duration.map_or(0, duration_ms))
            .with_artifact(ArtifactRecord {
            path: output.to_path_buf(),
            bytes,
            duration_seconds: duration,
            destinations: copies.clone(),
        });
        self.manifest.append(&record).await.map_err(|e| PublishError {
            destination: self.manifest.path().to_path_buf(),
            message: format!("manifest append failed: {e}"),
        })?;

        Ok(PublishReport {
            record,
            copies,
            failures,
        })
    }
}

async fn copy_to(src: &Path, target: &Path) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    if tokio::fs::canonicalize(src).await.ok() == tokio::fs::canonicalize(target).await.ok()
        && target.exists()
    {
        return Ok(());
    }
    tokio::fs::copy(src, target).await.map(|_| ())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::error::ProbeError;

    struct ConstProbe(Option<f64>);

    #[async_trait]
    impl MediaProbe for ConstProbe {
        async fn duration(&self, path: &Path) -> Result<f64, ProbeError> {
            self.0.ok_or_else(|| ProbeError::NoStream(path.to_path_buf()))
        }
    }

    fn packager(dir: &Path, duration: Option<f64>) -> OutputPackager {
        OutputPackager::new(
            Arc::new(ConstProbe(duration)),
            Arc::new(Manifest::new(dir.join("manifest.jsonl"))),
        )
    }

    #[tokio::test]
    async fn test_publish_copies_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("mug-promo.mp4");
        std::fs::write(&artifact, vec![0u8; 2048]).unwrap();
        let dests = [dir.path().join("a"), dir.path().join("nested/b")];

        let packager = packager(dir.path(), Some(9.5));
        let report = packager.publish("promo", &artifact, &dests).await.unwrap();

        assert!(report.is_complete());
        assert_eq!(report.copies.len(), 2);
        assert!(dir.path().join("nested/b/mug-promo.mp4").exists());

        let records = packager.manifest().records().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, "promo");
        assert_eq!((records[0].success, records[0].failed), (1, 0));
        assert_eq!(records[0].duration_ms, 9500);
        let artifact = records[0].artifact.as_ref().unwrap();
        assert_eq!(artifact.bytes, 2048);
        assert_eq!(artifact.duration_seconds, Some(9.5));
    }

    #[tokio::test]
    async fn test_failed_destination_does_not_stop_others() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("clip.mp4");
        std::fs::write(&artifact, b"video").unwrap();
        // a regular file where a directory is expected
        let blocked = dir.path().join("blocked");
        std::fs::write(&blocked, b"file").unwrap();
        let dests = [blocked.clone(), dir.path().join("ok")];

        let report = packager(dir.path(), Some(1.0))
            .publish("promo", &artifact, &dests)
            .await
            .unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].destination, blocked);
        assert_eq!(report.copies, vec![dir.path().join("ok/clip.mp4")]);
        assert_eq!(report.record.failed, 1);
        assert_eq!(report.record.success, 0);
    }

    #[test]
    fn test_duration_ms_rounds_and_clamps() {
        assert_eq!(duration_ms(9.0), 9000);
        assert_eq!(duration_ms(2.4996), 2500);
        assert_eq!(duration_ms(-1.0), 0);
        assert_eq!(duration_ms(f64::NAN), 0);
    }

    #[tokio::test]
    async fn test_missing_artifact_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = packager(dir.path(), None)
            .publish("promo", &dir.path().join("nope.mp4"), &[])
            .await
            .unwrap_err();
        assert!(err.message.contains("artifact unreadable"));
    }

    #[tokio::test]
    async fn test_unprobeable_artifact_still_published() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("clip.mp4");
        std::fs::write(&artifact, b"video").unwrap();
        let report = packager(dir.path(), None)
            .publish("promo", &artifact, &[])
            .await
            .unwrap();
        assert_eq!(report.record.artifact.unwrap().duration_seconds, None);
    }

    #[tokio::test]
    async fn test_manifest_is_append_only() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = Manifest::new(dir.path().join("out/manifest.jsonl"));
        manifest.append(&ManifestRecord::new("batch", 4, 1, 0, 1200)).await.unwrap();
        manifest.append(&ManifestRecord::new("batch", 5, 0, 0, 900)).await.unwrap();

        let raw = std::fs::read_to_string(manifest.path()).unwrap();
        assert_eq!(raw.lines().count(), 2);
        let first: serde_json::Value = serde_json::from_str(raw.lines().next().unwrap()).unwrap();
        assert_eq!(first["type"], "batch");
        assert_eq!(first["durationMs"], 1200);
        assert!(first.get("generatedAt").is_some());
        assert!(first.get("artifact").is_none());
    }
}
