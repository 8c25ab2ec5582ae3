//! Timeline to finished video
//!
//! A compose run renders every timeline entry to a clip, concatenates the
//! clips, mixes narration and music into one track, muxes the two and
//! checks the result against the timeline length. All intermediates live in
//! a [`RunWorkspace`] that is removed whatever the outcome; the output path
//! only ever receives a complete, verified file.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use futures::{stream, StreamExt, TryStreamExt};
use tracing::{debug, info, instrument, warn};

use crate::audio::{mix_graph, AudioSource, AudioTrack};
use crate::config::RunConfig;
use crate::error::{ComposeStep, CompositeError};
use crate::filter::{secs, Filter, FilterChain, FilterGraph};
use crate::probe::Ffprobe;
use crate::process::{ToolCommand, ToolFailure};
use crate::render::{ClipFormat, RenderPlan, RenderedClip, SegmentRenderer};
use crate::timeline::Timeline;
use crate::workspace::{persist, RunWorkspace};

/// Summary of a successful compose run
#[derive(Debug, Clone)]
pub struct ComposeReport {
    pub output: PathBuf,
    /// Timeline length, seconds
    pub duration: f64,
    /// Measured output length, when verification ran
    pub measured: Option<f64>,
    pub clips: usize,
    pub frames: u64,
    pub audio_tracks: usize,
    pub elapsed: Duration,
}

pub struct Compositor {
    config: RunConfig,
    renderer: SegmentRenderer,
    probe: Ffprobe,
}

fn tool_error(step: ComposeStep, failure: &ToolFailure) -> CompositeError {
    let stderr = match failure {
        ToolFailure::Exit { stderr, .. } => stderr.clone(),
        _ => String::new(),
    };
    CompositeError::new(step, format!("ffmpeg {}", failure.diagnostics())).with_stderr(stderr)
}

fn io_error(step: ComposeStep, context: &str, err: &std::io::Error) -> CompositeError {
    CompositeError::new(step, format!("{context}: {err}"))
}

/// Concat demuxer list; `'` inside paths becomes `'\''`
#[must_use]
pub fn concat_list(clips: &[PathBuf]) -> String {
    clips
        .iter()
        .map(|path| format!("file '{}'\n", path.to_string_lossy().replace('\'', r"'\''")))
        .collect()
}

const QUIET: [&str; 4] = ["-y", "-hide_banner", "-loglevel", "error"];

impl Compositor {
    #[must_use]
    pub fn new(config: RunConfig) -> Self {
        let renderer = SegmentRenderer::new(&config);
        let probe = Ffprobe::new(config.ffprobe_path.clone(), config.timeouts.probe());
        Self {
            config,
            renderer,
            probe,
        }
    }

    #[must_use]
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Check that ffmpeg and ffprobe start
    pub async fn check_dependencies(&self) -> Vec<(String, bool)> {
        let timeout = self.config.timeouts.probe();
        let mut results = Vec::new();
        for tool in [&self.config.ffmpeg_path, &self.config.ffprobe_path] {
            results.push((tool.clone(), ToolCommand::check_available(tool, timeout).await));
        }
        results
    }

    /// Render `timeline` with its narration plus `extra_tracks` to `output`.
    ///
    /// On failure nothing is written to `output` and the run's temporary
    /// directory is gone by the time this returns.
    #[instrument(skip_all, fields(entries = timeline.len(), output = %output.display()))]
    pub async fn compose(
        &self,
        timeline: &Timeline,
        extra_tracks: &[AudioTrack],
        output: &Path,
    ) -> Result<ComposeReport, CompositeError> {
        let started = Instant::now();
        let workspace = RunWorkspace::create(&self.config.temp_root)
            .await
            .map_err(|e| io_error(ComposeStep::Prepare, "cannot create run directory", &e))?;

        let result = self.run(&workspace, timeline, extra_tracks, output).await;
        workspace.cleanup().await;

        let mut report = result?;
        report.elapsed = started.elapsed();
        info!(
            "Composed {} ({:.2}s, {} clips) in {:.2}s",
            output.display(),
            report.duration,
            report.clips,
            report.elapsed.as_secs_f64()
        );
        Ok(report)
    }

    async fn run(
        &self,
        workspace: &RunWorkspace,
        timeline: &Timeline,
        extra_tracks: &[AudioTrack],
        output: &Path,
    ) -> Result<ComposeReport, CompositeError> {
        if timeline.is_empty() {
            return Err(CompositeError::new(ComposeStep::Prepare, "timeline has no entries"));
        }
        let total = timeline.total_duration();
        let tolerance = self.config.frame_duration();

        // Step 1: plan every clip and the mix before any tool runs
        let plans = timeline
            .entries()
            .iter()
            .enumerate()
            .map(|(pos, entry)| self.renderer.plan(pos, entry, &workspace.path(&format!("seg-{pos:03}.mp4"))))
            .collect::<Result<Vec<RenderPlan>, _>>()?;

        let mut tracks = timeline.narration_tracks();
        tracks.extend(extra_tracks.iter().cloned());
        let mix = if tracks.is_empty() {
            None
        } else {
            Some(mix_graph(&tracks, total, self.config.audio.sample_rate, tolerance)?)
        };

        // Step 2: render, bounded concurrency, results in timeline order
        info!("Rendering {} segments...", plans.len());
        let pending: Vec<_> = plans.iter().map(|plan| self.renderer.execute(plan)).collect();
        let clips: Vec<RenderedClip> = stream::iter(pending)
            .buffered(self.config.render_concurrency.max(1))
            .try_collect()
            .await?;
        let frames = clips.iter().map(|c| c.frames).sum();

        // Step 3: concatenate
        let video = self.concat(workspace, &clips).await?;

        // Step 4-5: mix and mux, or ship the silent video as is
        let muxed = match mix {
            Some(graph) => {
                let inputs = self.materialize_tracks(workspace, &tracks).await?;
                let audio = workspace.path("mixed.wav");
                self.mix(&inputs, &graph.compile(), &audio).await?;
                let muxed = workspace.path("output.mp4");
                self.mux(&video, &audio, total, &muxed).await?;
                muxed
            }
            None => video,
        };

        // Step 6: verify before anything leaves the workspace
        let measured = if self.config.verify_duration {
            Some(self.verify(&muxed, total, tolerance).await?)
        } else {
            None
        };

        persist(&muxed, output)
            .await
            .map_err(|e| io_error(ComposeStep::Mux, &format!("cannot write {}", output.display()), &e))?;

        Ok(ComposeReport {
            output: output.to_path_buf(),
            duration: total,
            measured,
            clips: clips.len(),
            frames,
            audio_tracks: tracks.len(),
            elapsed: Duration::ZERO,
        })
    }

    /// Join clips in timeline order.
    ///
    /// Clips whose probed formats all match are stream-copied through the
    /// concat demuxer; otherwise they are normalized and re-encoded.
    async fn concat(&self, workspace: &RunWorkspace, clips: &[RenderedClip]) -> Result<PathBuf, CompositeError> {
        if let [only] = clips {
            return Ok(only.path.clone());
        }
        let joined = workspace.path("video.mp4");
        let uniform = self.uniform_format(clips).await;

        let args = if uniform {
            info!("Concatenating {} clips...", clips.len());
            let list = workspace.path("concat.txt");
            let paths: Vec<PathBuf> = clips.iter().map(|c| c.path.clone()).collect();
            tokio::fs::write(&list, concat_list(&paths))
                .await
                .map_err(|e| io_error(ComposeStep::Concat, "cannot write concat list", &e))?;
            concat_args(&list, &joined)
        } else {
            info!("Concatenating {} clips with re-encode (mixed formats)...", clips.len());
            let graph = concat_graph(clips.len(), &self.config);
            reencode_concat_args(clips, &graph, &self.config, &joined)
        };

        ToolCommand::new(&self.config.ffmpeg_path, self.config.timeouts.concat())
            .args(args)
            .run()
            .await
            .map_err(|f| tool_error(ComposeStep::Concat, &f))?;
        Ok(joined)
    }

    /// True when every clip probes to the same stream format.
    ///
    /// A clip that cannot be probed, or reports an incomplete format,
    /// counts as different.
    async fn uniform_format(&self, clips: &[RenderedClip]) -> bool {
        let mut first: Option<ClipFormat> = None;
        for clip in clips {
            let format = match self.probe.inspect(&clip.path).await {
                Ok(info) => ClipFormat::of(&info),
                Err(e) => {
                    warn!("cannot probe clip {}: {e}", clip.path.display());
                    None
                }
            };
            let Some(format) = format else {
                return false;
            };
            match &first {
                None => first = Some(format),
                Some(expected) if *expected != format => {
                    debug!(position = clip.position, ?expected, found = ?format, "clip format differs");
                    return false;
                }
                Some(_) => {}
            }
        }
        true
    }

    /// Write in-memory tracks to the workspace; returns one input path per track
    async fn materialize_tracks(
        &self,
        workspace: &RunWorkspace,
        tracks: &[AudioTrack],
    ) -> Result<Vec<PathBuf>, CompositeError> {
        let mut paths = Vec::with_capacity(tracks.len());
        for (i, track) in tracks.iter().enumerate() {
            match &track.source {
                AudioSource::File(path) => {
                    if !path.is_file() {
                        return Err(CompositeError::new(
                            ComposeStep::Mix,
                            format!("audio track {i} not found: {}", path.display()),
                        ));
                    }
                    paths.push(path.clone());
                }
                AudioSource::Bytes { data, extension } => {
                    let path = workspace.path(&format!("track-{i:02}.{extension}"));
                    tokio::fs::write(&path, data)
                        .await
                        .map_err(|e| io_error(ComposeStep::Mix, "cannot write audio track", &e))?;
                    paths.push(path);
                }
            }
        }
        Ok(paths)
    }

    async fn mix(&self, inputs: &[PathBuf], graph: &str, audio: &Path) -> Result<(), CompositeError> {
        info!("Mixing {} audio tracks...", inputs.len());
        let args = mix_args(inputs, graph, self.config.audio.sample_rate, audio);
        ToolCommand::new(&self.config.ffmpeg_path, self.config.timeouts.mix())
            .args(args)
            .run()
            .await
            .map_err(|f| tool_error(ComposeStep::Mix, &f))?;
        Ok(())
    }

    async fn mux(&self, video: &Path, audio: &Path, total: f64, output: &Path) -> Result<(), CompositeError> {
        info!("Muxing video and audio...");
        let args = mux_args(video, audio, total, &self.config.audio.codec, &self.config.audio.bitrate, output);
        ToolCommand::new(&self.config.ffmpeg_path, self.config.timeouts.mux())
            .args(args)
            .run()
            .await
            .map_err(|f| tool_error(ComposeStep::Mux, &f))?;
        Ok(())
    }

    async fn verify(&self, output: &Path, expected: f64, tolerance: f64) -> Result<f64, CompositeError> {
        let measured = self
            .probe
            .inspect(output)
            .await
            .map_err(|e| CompositeError::new(ComposeStep::Verify, e.to_string()))?
            .duration;
        debug!(expected, measured, "verified output duration");
        if (measured - expected).abs() > tolerance {
            return Err(CompositeError::new(
                ComposeStep::Verify,
                format!("output is {measured:.3}s but the timeline is {expected:.3}s"),
            ));
        }
        Ok(measured)
    }
}

fn quiet() -> Vec<String> {
    QUIET.iter().map(ToString::to_string).collect()
}

fn concat_args(list: &Path, output: &Path) -> Vec<String> {
    let mut args = quiet();
    args.extend([
        "-f".to_string(),
        "concat".to_string(),
        "-safe".to_string(),
        "0".to_string(),
        "-i".to_string(),
        list.to_string_lossy().to_string(),
        "-c".to_string(),
        "copy".to_string(),
        output.to_string_lossy().to_string(),
    ]);
    args
}

/// Normalize every input to the canvas and rate, then join them
fn concat_graph(count: usize, config: &RunConfig) -> FilterGraph {
    let (w, h) = (config.canvas.width, config.canvas.height);
    let mut graph = FilterGraph::new();
    let mut pads = Vec::with_capacity(count);
    for i in 0..count {
        let pad = format!("v{i}");
        graph.push(
            FilterChain::from_pads([format!("{i}:v")])
                .then(
                    Filter::new("scale")
                        .opt("w", w)
                        .opt("h", h)
                        .opt("force_original_aspect_ratio", "decrease"),
                )
                .then(
                    Filter::new("pad")
                        .opt("w", w)
                        .opt("h", h)
                        .opt("x", "(ow-iw)/2")
                        .opt("y", "(oh-ih)/2"),
                )
                .then(Filter::new("setsar").opt("r", 1))
                .then(Filter::new("fps").opt("fps", config.frame_rate))
                .then(Filter::new("format").opt("pix_fmts", &config.video.pixel_format))
                .output(pad.clone()),
        );
        pads.push(pad);
    }
    graph.push(
        FilterChain::from_pads(pads)
            .then(Filter::new("concat").opt("n", count).opt("v", 1).opt("a", 0))
            .output("v"),
    );
    graph
}

fn reencode_concat_args(clips: &[RenderedClip], graph: &FilterGraph, config: &RunConfig, output: &Path) -> Vec<String> {
    let mut args = quiet();
    for clip in clips {
        args.push("-i".to_string());
        args.push(clip.path.to_string_lossy().to_string());
    }
    args.extend([
        "-filter_complex".to_string(),
        graph.compile(),
        "-map".to_string(),
        "[v]".to_string(),
        "-c:v".to_string(),
        config.video.codec.clone(),
        "-preset".to_string(),
        config.video.preset.clone(),
        "-crf".to_string(),
        config.video.crf.to_string(),
        "-pix_fmt".to_string(),
        config.video.pixel_format.clone(),
        "-an".to_string(),
        output.to_string_lossy().to_string(),
    ]);
    args
}

fn mix_args(inputs: &[PathBuf], graph: &str, sample_rate: u32, output: &Path) -> Vec<String> {
    let mut args = quiet();
    for input in inputs {
        args.push("-i".to_string());
        args.push(input.to_string_lossy().to_string());
    }
    args.extend([
        "-filter_complex".to_string(),
        graph.to_string(),
        "-map".to_string(),
        "[aout]".to_string(),
        "-ar".to_string(),
        sample_rate.to_string(),
        "-ac".to_string(),
        "2".to_string(),
        "-c:a".to_string(),
        "pcm_s16le".to_string(),
        output.to_string_lossy().to_string(),
    ]);
    args
}

fn mux_args(video: &Path, audio: &Path, total: f64, codec: &str, bitrate: &str, output: &Path) -> Vec<String> {
    let mut args = quiet();
    args.extend([
        "-i".to_string(),
        video.to_string_lossy().to_string(),
        "-i".to_string(),
        audio.to_string_lossy().to_string(),
        "-map".to_string(),
        "0:v:0".to_string(),
        "-map".to_string(),
        "1:a:0".to_string(),
        "-c:v".to_string(),
        "copy".to_string(),
        "-c:a".to_string(),
        codec.to_string(),
        "-b:a".to_string(),
        bitrate.to_string(),
        "-t".to_string(),
        secs(total),
        "-movflags".to_string(),
        "+faststart".to_string(),
        output.to_string_lossy().to_string(),
    ]);
    args
}
