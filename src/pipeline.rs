//! One item, end to end
//!
//! [`VideoPipeline`] turns a job into a published video: convert the job,
//! resolve the timeline (narrating as needed), compose, publish. Items
//! differ only by their segment lists; there is no per-item code path.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::compositor::Compositor;
use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::job::Job;
use crate::narration::NarrationSession;
use crate::probe::MediaProbe;
use crate::publish::{Manifest, OutputPackager, PublishReport};
use crate::timeline::{DurationSource, TimelineBuilder};

/// What producing one item yielded
#[derive(Debug, Clone)]
pub struct ItemOutcome {
    pub name: String,
    pub output: PathBuf,
    /// Timeline length, seconds
    pub duration: f64,
    pub publish: PublishReport,
}

/// Produces items for the batch driver
#[async_trait]
pub trait ItemProducer: Send + Sync {
    /// Check a job without running any external tool
    async fn validate(&self, job: &Job, base_dir: &Path) -> Result<()>;

    /// Produce and publish one item
    async fn produce(&self, job: &Job, base_dir: &Path) -> Result<ItemOutcome>;
}

pub struct VideoPipeline {
    config: RunConfig,
    probe: Arc<dyn MediaProbe>,
    narration: Option<Arc<NarrationSession>>,
    compositor: Compositor,
    packager: OutputPackager,
    extra_destinations: Vec<PathBuf>,
}

impl VideoPipeline {
    pub fn new(config: RunConfig, probe: Arc<dyn MediaProbe>, manifest: Arc<Manifest>) -> Self {
        let compositor = Compositor::new(config.clone());
        let packager = OutputPackager::new(Arc::clone(&probe), manifest);
        Self {
            config,
            probe,
            narration: None,
            compositor,
            packager,
            extra_destinations: Vec::new(),
        }
    }

    /// Share one narration session across every item of the run
    #[must_use]
    pub fn with_narration(mut self, session: Arc<NarrationSession>) -> Self {
        self.narration = Some(session);
        self
    }

    /// Destinations added to every job's own list
    #[must_use]
    pub fn with_extra_destinations(mut self, destinations: Vec<PathBuf>) -> Self {
        self.extra_destinations = destinations;
        self
    }

    #[must_use]
    pub fn compositor(&self) -> &Compositor {
        &self.compositor
    }
}

#[async_trait]
impl ItemProducer for VideoPipeline {
    async fn validate(&self, job: &Job, base_dir: &Path) -> Result<()> {
        let segments = job.segments(base_dir, &self.config.narration.voice)?;
        let narrated = segments
            .iter()
            .filter(|s| matches!(s.duration, DurationSource::Narration { .. }))
            .count();
        if narrated > 0 && self.narration.is_none() {
            return Err(Error::MissingCredentials(format!(
                "job '{}' has {narrated} narrated segments but no narration provider is configured",
                job.name
            )));
        }
        Ok(())
    }

    async fn produce(&self, job: &Job, base_dir: &Path) -> Result<ItemOutcome> {
        let started = Instant::now();
        info!("Producing '{}'", job.name);

        let plan = job
            .plan(
                base_dir,
                &self.config.narration.voice,
                self.config.overflow,
                self.probe.as_ref(),
            )
            .await?;

        let mut builder = TimelineBuilder::new(self.probe.as_ref(), self.config.frame_rate);
        if let Some(session) = &self.narration {
            builder = builder.with_narration(session);
        }
        let resolution = builder.resolve(&plan.segments).await?;
        for dropped in &resolution.dropped {
            warn!(item = %job.name, segment = dropped.index, "segment dropped: {}", dropped.error);
        }
        // an item missing part of its narration is not shipped
        if let Some(first) = resolution.dropped.first() {
            return Err(Error::NarrationDropped {
                segments: resolution.dropped.iter().map(|d| d.index).collect(),
                source: first.error.clone(),
            });
        }

        let output = self.config.output_root.join(plan.output_file_name());
        let report = self
            .compositor
            .compose(&resolution.timeline, &plan.tracks, &output)
            .await?;

        let mut destinations = plan.destinations.clone();
        destinations.extend(self.extra_destinations.iter().cloned());
        let publish = self.packager.publish(&plan.item_type, &output, &destinations).await?;
        if let Some(first) = publish.failures.first() {
            return Err(Error::Publish(first.clone()));
        }

        info!(
            "Produced '{}' ({:.2}s video) in {:.2}s",
            job.name,
            report.duration,
            started.elapsed().as_secs_f64()
        );
        Ok(ItemOutcome {
            name: job.name.clone(),
            output,
            duration: report.duration,
            publish,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::error::{ProbeError, ProviderErrorKind};
    use crate::job::JobFile;
    use crate::narration::testing::ScriptedProvider;

    struct NoMedia;

    #[async_trait]
    impl MediaProbe for NoMedia {
        async fn duration(&self, path: &Path) -> std::result::Result<f64, ProbeError> {
            Err(ProbeError::Missing(path.to_path_buf()))
        }
    }

    fn pipeline(dir: &Path) -> VideoPipeline {
        let config = RunConfig::default()
            .with_tools("/nonexistent/ffmpeg", "/nonexistent/ffprobe")
            .with_output_root(dir.join("out"))
            .with_temp_root(dir.join("tmp"));
        let manifest = Arc::new(Manifest::new(config.manifest_path()));
        VideoPipeline::new(config, Arc::new(NoMedia), manifest)
    }

    fn narrated_job() -> JobFile {
        JobFile::parse(
            r#"{"name": "promo", "segments": [{"kind": "narrated", "narration": "Hello"}]}"#,
            Path::new("job.json"),
            PathBuf::from("."),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_validate_requires_narration_provider() {
        let dir = tempfile::tempdir().unwrap();
        let file = narrated_job();
        let err = pipeline(dir.path())
            .validate(&file.jobs[0], &file.base_dir)
            .await
            .unwrap_err();
        assert_eq!(err.step(), "credentials");
    }

    #[tokio::test]
    async fn test_validate_with_provider() {
        let dir = tempfile::tempdir().unwrap();
        let file = narrated_job();
        let session = NarrationSession::new(Arc::new(ScriptedProvider::new()), Duration::ZERO);
        let pipeline = pipeline(dir.path()).with_narration(Arc::new(session));
        assert!(pipeline.validate(&file.jobs[0], &file.base_dir).await.is_ok());
    }

    #[tokio::test]
    async fn test_rate_limited_item_fails_at_narration() {
        let dir = tempfile::tempdir().unwrap();
        let file = narrated_job();
        let provider = ScriptedProvider::new().failing("Hello", ProviderErrorKind::RateLimited);
        let session = NarrationSession::new(Arc::new(provider), Duration::ZERO);
        let pipeline = pipeline(dir.path()).with_narration(Arc::new(session));

        let err = pipeline.produce(&file.jobs[0], &file.base_dir).await.unwrap_err();
        assert_eq!(err.step(), "narration");
        assert!(!dir.path().join("out/promo.mp4").exists());
    }

    #[tokio::test]
    async fn test_partly_narrated_item_fails_before_rendering() {
        let dir = tempfile::tempdir().unwrap();
        let file = JobFile::parse(
            r#"{"name": "hook", "segments": [
                {"kind": "text", "duration": 1},
                {"kind": "narrated", "narration": "Busy line"},
                {"kind": "text", "duration": 1}
            ]}"#,
            Path::new("job.json"),
            PathBuf::from("."),
        )
        .unwrap();
        let provider = ScriptedProvider::new().failing("Busy line", ProviderErrorKind::RateLimited);
        let session = NarrationSession::new(Arc::new(provider), Duration::ZERO);
        let pipeline = pipeline(dir.path()).with_narration(Arc::new(session));

        let err = pipeline.produce(&file.jobs[0], &file.base_dir).await.unwrap_err();
        assert_eq!(err.step(), "narration");
        match err {
            Error::NarrationDropped { segments, source } => {
                assert_eq!(segments, vec![1]);
                assert!(source.is_rate_limited());
            }
            other => panic!("unexpected error: {other}"),
        }
        // nothing was rendered, so no run directory was ever created
        assert!(!dir.path().join("tmp").exists());
        assert!(!dir.path().join("out/hook.mp4").exists());
    }

    #[tokio::test]
    async fn test_render_failure_reports_render_step() {
        let dir = tempfile::tempdir().unwrap();
        let file = JobFile::parse(
            r#"{"name": "card", "segments": [{"kind": "text", "duration": 2}]}"#,
            Path::new("job.json"),
            PathBuf::from("."),
        )
        .unwrap();
        let err = pipeline(dir.path())
            .produce(&file.jobs[0], &file.base_dir)
            .await
            .unwrap_err();
        assert_eq!(err.step(), "render");
    }
}
