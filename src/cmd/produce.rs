use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use clipwright::batch::select;
use clipwright::{BatchRunner, Credentials, Manifest, RunConfig, VideoPipeline};

pub struct ProduceOptions {
    pub jobs: Vec<PathBuf>,
    pub item: Option<String>,
    pub count: Option<usize>,
    pub dry_run: bool,
    pub out: Option<PathBuf>,
    pub dest: Vec<PathBuf>,
}

/// Returns `false` when any item failed
pub async fn cmd_produce(mut config: RunConfig, options: ProduceOptions) -> Result<bool> {
    if let Some(out) = options.out {
        config = config.with_output_root(out);
    }

    let files = super::load_job_files(&options.jobs)?;
    let items = select(&files, options.item.as_deref(), options.count)?;
    if items.is_empty() {
        eprintln!("⚠️  No items selected");
        return Ok(true);
    }

    let needs_narration = items.iter().any(|item| {
        item.job.segments(&item.base_dir, &config.narration.voice).is_ok_and(|segments| {
            segments
                .iter()
                .any(|s| matches!(s.duration, clipwright::DurationSource::Narration { .. }))
        })
    });
    let credentials = Credentials::from_env(&config.narration);
    if needs_narration && !options.dry_run {
        // before anything renders
        credentials.require_narration(&config.narration)?;
    }

    eprintln!(
        "🎬 {} {} item(s) -> {}",
        if options.dry_run { "Validating" } else { "Producing" },
        items.len(),
        config.output_root.display()
    );

    let probe = super::ffprobe(&config);
    let manifest = Arc::new(Manifest::new(config.manifest_path()));
    let mut pipeline = VideoPipeline::new(config.clone(), Arc::clone(&probe), Arc::clone(&manifest))
        .with_extra_destinations(options.dest);
    if let Some(session) = super::narration_session(&config, &credentials, probe)? {
        pipeline = pipeline.with_narration(session);
    }

    let runner = BatchRunner::new(Arc::new(pipeline))
        .with_manifest(manifest)
        .dry_run(options.dry_run);
    let summary = runner.run(&items).await;

    eprintln!();
    eprintln!(
        "{} {} succeeded, {} failed, {} skipped in {:.1}s",
        if summary.is_success() { "✅" } else { "❌" },
        summary.succeeded.len(),
        summary.failed.len(),
        summary.skipped.len(),
        summary.elapsed.as_secs_f64()
    );
    for failure in &summary.failed {
        eprintln!("   {} [{}]: {}", failure.name, failure.step, failure.message);
    }

    Ok(summary.is_success())
}
