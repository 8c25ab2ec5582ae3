use std::path::Path;

use anyhow::{bail, Result};

use clipwright::batch::select;
use clipwright::{Credentials, RunConfig, TimelineBuilder};

pub async fn cmd_timeline(config: RunConfig, job: &Path, item: Option<&str>) -> Result<()> {
    let files = super::load_job_files(&[job.to_path_buf()])?;
    let items = select(&files, item, None)?;
    let [selected] = items.as_slice() else {
        bail!("{} holds {} jobs; pick one with --item", job.display(), items.len());
    };

    let probe = super::ffprobe(&config);
    let credentials = Credentials::from_env(&config.narration);
    let session = super::narration_session(&config, &credentials, probe.clone())?;

    let segments = selected.job.segments(&selected.base_dir, &config.narration.voice)?;
    let mut builder = TimelineBuilder::new(probe.as_ref(), config.frame_rate);
    if let Some(session) = &session {
        builder = builder.with_narration(session);
    }
    let resolution = builder.resolve(&segments).await?;

    for dropped in &resolution.dropped {
        eprintln!("⚠️  Segment {} dropped: {}", dropped.index, dropped.error);
    }
    println!("{}", serde_json::to_string_pretty(&resolution.timeline)?);
    eprintln!(
        "⏱️  {} entries, {:.3}s total",
        resolution.timeline.len(),
        resolution.timeline.total_duration()
    );
    Ok(())
}
