pub mod check;
pub mod probe;
pub mod produce;
pub mod timeline;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use clipwright::narration::cache::DiskCache;
use clipwright::narration::elevenlabs::ElevenLabsProvider;
use clipwright::{Credentials, Ffprobe, JobFile, MediaProbe, NarrationSession, RunConfig};

pub fn ffprobe(config: &RunConfig) -> Arc<dyn MediaProbe> {
    Arc::new(Ffprobe::new(config.ffprobe_path.clone(), config.timeouts.probe()))
}

/// One narration session for the whole invocation, if a key is configured
pub fn narration_session(
    config: &RunConfig,
    credentials: &Credentials,
    probe: Arc<dyn MediaProbe>,
) -> Result<Option<Arc<NarrationSession>>> {
    let Some(api_key) = credentials.narration_api_key.as_deref() else {
        return Ok(None);
    };
    let provider = ElevenLabsProvider::new(
        &config.narration.endpoint,
        api_key,
        config.narration.timeout(),
        probe,
        config.temp_root.join("narration-scratch"),
    )
    .context("creating narration client")?;

    let mut session = NarrationSession::new(Arc::new(provider), config.narration.cooldown());
    if let Some(dir) = &config.narration.cache_dir {
        session = session.with_cache(DiskCache::new(dir));
    }
    Ok(Some(Arc::new(session)))
}

pub fn load_job_files(paths: &[PathBuf]) -> Result<Vec<JobFile>> {
    paths
        .iter()
        .map(|path| JobFile::load(path).with_context(|| format!("loading {}", path.display())))
        .collect()
}
