//! Segment rasterization
//!
//! Each timeline entry becomes one silent H.264 clip of exactly its frame
//! span. Planning is pure (build the ffmpeg arguments and filter graph) and
//! execution is one [`ToolCommand`] per clip, so plans can be checked
//! without running anything.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use crate::config::{CanvasSize, RunConfig, VideoEncoding};
use crate::error::RenderError;
use crate::filter::{secs, Filter, FilterChain, FilterGraph};
use crate::probe::MediaInfo;
use crate::process::{ToolCommand, ToolFailure};
use crate::timeline::{MediaSource, SegmentKind, TimelineEntry};
use crate::visual::{Background, Color, GradientDirection, TextOverlay};

/// Frames covered by `[start, start + duration)` at `fps`.
///
/// Uses rounded boundary positions rather than rounding each duration, so
/// the spans of adjacent entries add up to the rounded total.
#[must_use]
pub fn frame_span(start: f64, duration: f64, fps: u32) -> u64 {
    let fps = f64::from(fps);
    let first = (start * fps).round();
    let last = ((start + duration) * fps).round();
    ((last - first) as u64).max(1)
}

/// Stream parameters that decide whether clips concatenate without re-encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipFormat {
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: String,
    pub pixel_format: String,
}

impl ClipFormat {
    /// Format of a probed clip; `None` unless the probe reported every field
    #[must_use]
    pub fn of(info: &MediaInfo) -> Option<Self> {
        Some(Self {
            codec: info.video_codec.clone()?,
            width: info.width?,
            height: info.height?,
            frame_rate: info.frame_rate.clone()?,
            pixel_format: info.pixel_format.clone()?,
        })
    }
}

/// A clip ready to render
#[derive(Debug, Clone)]
pub struct RenderPlan {
    /// Position in the timeline
    pub position: usize,
    /// Index of the originating segment, for error reports
    pub segment_index: usize,
    pub graph: FilterGraph,
    pub args: Vec<String>,
    pub output: PathBuf,
    pub frames: u64,
    pub duration: f64,
}

impl RenderPlan {
    /// Where ffmpeg writes before the clip is moved into place
    #[must_use]
    pub fn partial_path(&self) -> PathBuf {
        self.output.with_extension("partial.mp4")
    }
}

/// A finished clip on disk
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedClip {
    pub position: usize,
    pub path: PathBuf,
    pub frames: u64,
    pub duration: f64,
}

/// Renders timeline entries to clips
#[derive(Debug, Clone)]
pub struct SegmentRenderer {
    ffmpeg_path: String,
    canvas: CanvasSize,
    frame_rate: u32,
    pad_color: Color,
    video: VideoEncoding,
    timeout: Duration,
}

impl SegmentRenderer {
    #[must_use]
    pub fn new(config: &RunConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            canvas: config.canvas,
            frame_rate: config.frame_rate,
            pad_color: Color::new(config.pad_color.clone()),
            video: config.video.clone(),
            timeout: config.timeouts.render(),
        }
    }

    /// Build the ffmpeg invocation for the entry at `position`
    pub fn plan(&self, position: usize, entry: &TimelineEntry, output: &Path) -> Result<RenderPlan, RenderError> {
        let index = entry.source_index;
        let config_err = |reason: String| RenderError::Config { index, reason };
        let frames = frame_span(entry.start, entry.duration, self.frame_rate);
        let visual = &entry.segment.visual;

        let mut inputs: Vec<String> = Vec::new();
        let mut chain = match &entry.segment.kind {
            SegmentKind::TextCard | SegmentKind::NarratedCard => {
                FilterChain::new().then(self.background_source(&visual.background, entry.duration).map_err(config_err)?)
            }
            SegmentKind::MediaClip { source } => {
                if !source.path.is_file() {
                    return Err(config_err(format!("source media not found: {}", source.path.display())));
                }
                inputs.extend(self.media_input_args(source));
                self.fit_to_canvas(FilterChain::from_pads(["0:v"])).map_err(config_err)?
            }
        };

        for (i, overlay) in visual.overlays.iter().enumerate() {
            let filter = drawtext(overlay, entry.duration)
                .map_err(|reason| config_err(format!("overlay {i} ({:?}): {reason}", overlay.text)))?;
            chain = chain.then(filter);
        }
        chain = chain
            .then(Filter::new("format").opt("pix_fmts", &self.video.pixel_format))
            .output("v");

        let mut graph = FilterGraph::new();
        graph.push(chain);

        let partial = output.with_extension("partial.mp4");
        let mut args: Vec<String> = ["-y", "-hide_banner", "-loglevel", "error"]
            .iter()
            .map(ToString::to_string)
            .collect();
        args.extend(inputs);
        args.extend([
            "-filter_complex".to_string(),
            graph.compile(),
            "-map".to_string(),
            "[v]".to_string(),
            "-frames:v".to_string(),
            frames.to_string(),
            "-r".to_string(),
            self.frame_rate.to_string(),
            "-c:v".to_string(),
            self.video.codec.clone(),
            "-preset".to_string(),
            self.video.preset.clone(),
            "-crf".to_string(),
            self.video.crf.to_string(),
            "-pix_fmt".to_string(),
            self.video.pixel_format.clone(),
            "-an".to_string(),
            partial.to_string_lossy().to_string(),
        ]);

        Ok(RenderPlan {
            position,
            segment_index: index,
            graph,
            args,
            output: output.to_path_buf(),
            frames,
            duration: entry.duration,
        })
    }

    /// Plan and render in one step
    pub async fn render(
        &self,
        position: usize,
        entry: &TimelineEntry,
        output: &Path,
    ) -> Result<RenderedClip, RenderError> {
        let plan = self.plan(position, entry, output)?;
        self.execute(&plan).await
    }

    /// Run a plan; the clip only appears at `plan.output` on success
    pub async fn execute(&self, plan: &RenderPlan) -> Result<RenderedClip, RenderError> {
        let index = plan.segment_index;
        let partial = plan.partial_path();
        debug!(position = plan.position, frames = plan.frames, "rendering segment");

        let result = ToolCommand::new(&self.ffmpeg_path, self.timeout)
            .args(plan.args.iter().cloned())
            .run()
            .await;

        if let Err(failure) = result {
            let _ = tokio::fs::remove_file(&partial).await;
            let diagnostics = failure.diagnostics();
            return Err(match failure {
                ToolFailure::Spawn(message) => RenderError::Io { index, message },
                ToolFailure::Exit { .. } => RenderError::Tool {
                    index,
                    stderr: diagnostics,
                },
                ToolFailure::Timeout(limit) => RenderError::Timeout {
                    index,
                    secs: limit.as_secs(),
                },
            });
        }

        tokio::fs::rename(&partial, &plan.output)
            .await
            .map_err(|e| RenderError::Io {
                index,
                message: format!("ffmpeg produced no clip at {}: {e}", partial.display()),
            })?;

        info!(
            position = plan.position,
            segment = index,
            frames = plan.frames,
            "rendered {}",
            plan.output.display()
        );
        Ok(RenderedClip {
            position: plan.position,
            path: plan.output.clone(),
            frames: plan.frames,
            duration: plan.duration,
        })
    }

    fn size(&self) -> String {
        format!("{}x{}", self.canvas.width, self.canvas.height)
    }

    /// Lavfi source filter drawing the background for `duration` seconds
    fn background_source(&self, background: &Background, duration: f64) -> Result<Filter, String> {
        match background {
            Background::Solid { color } => Ok(Filter::new("color")
                .opt("c", color.to_ffmpeg()?)
                .opt("s", self.size())
                .opt("r", self.frame_rate)
                .opt("d", secs(duration))),
            Background::Gradient { from, to, direction } => {
                let (w, h) = (self.canvas.width, self.canvas.height);
                let (x1, y1) = match direction {
                    GradientDirection::Vertical => (0, h),
                    GradientDirection::Horizontal => (w, 0),
                    GradientDirection::Diagonal => (w, h),
                };
                Ok(Filter::new("gradients")
                    .opt("s", self.size())
                    .opt("r", self.frame_rate)
                    .opt("d", secs(duration))
                    .opt("c0", from.to_ffmpeg()?)
                    .opt("c1", to.to_ffmpeg()?)
                    .opt("n", 2)
                    .opt("x0", 0)
                    .opt("y0", 0)
                    .opt("x1", x1)
                    .opt("y1", y1)
                    // slowest the filter allows; keeps the gradient still
                    .opt("speed", "0.00001"))
            }
        }
    }

    fn media_input_args(&self, source: &MediaSource) -> Vec<String> {
        let mut args = Vec::new();
        if source.is_still_image() {
            args.extend([
                "-loop".to_string(),
                "1".to_string(),
                "-framerate".to_string(),
                self.frame_rate.to_string(),
            ]);
        } else if source.start > 0.0 {
            args.extend(["-ss".to_string(), secs(source.start)]);
        }
        args.extend(["-i".to_string(), source.path.to_string_lossy().to_string()]);
        args
    }

    /// Letterbox into the canvas, normalize rate, hold the last frame
    fn fit_to_canvas(&self, chain: FilterChain) -> Result<FilterChain, String> {
        let (w, h) = (self.canvas.width, self.canvas.height);
        Ok(chain
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
                    .opt("y", "(oh-ih)/2")
                    .opt("color", self.pad_color.to_ffmpeg()?),
            )
            .then(Filter::new("setsar").opt("r", 1))
            .then(Filter::new("fps").opt("fps", self.frame_rate))
            .then(Filter::new("tpad").opt("stop_mode", "clone").opt("stop", -1)))
    }
}

/// `drawtext` for one overlay, visible for its window clamped to the clip
fn drawtext(overlay: &TextOverlay, duration: f64) -> Result<Filter, String> {
    let (from, to) = overlay
        .clamped_window(duration)
        .ok_or_else(|| "visibility window lies outside the segment".to_string())?;
    let style = &overlay.style;
    let (x, y) = style.position.to_drawtext_position(style.margin);

    let mut filter = Filter::new("drawtext").opt("text", &overlay.text).opt("expansion", "none");
    filter = match &style.font_file {
        Some(file) => filter.opt("fontfile", file),
        None => filter.opt("font", &style.font),
    };
    filter = filter
        .opt("fontsize", style.font_size)
        .opt("fontcolor", style.color.to_ffmpeg()?);
    if style.outline_width > 0 {
        filter = filter
            .opt("borderw", style.outline_width)
            .opt("bordercolor", style.outline_color.to_ffmpeg()?);
    }
    if let Some(box_color) = &style.box_color {
        filter = filter
            .opt("box", 1)
            .opt("boxcolor", format!("{}@{}", box_color.to_ffmpeg()?, style.box_opacity))
            .opt("boxborderw", style.font_size / 4);
    }
    filter = filter.opt("x", x).opt("y", y);

    #[allow(clippy::float_cmp)]
    let whole_clip = from == 0.0 && to == duration;
    if !whole_clip {
        filter = filter.opt("enable", format!("gte(t,{})*lt(t,{})", secs(from), secs(to)));
    }
    Ok(filter)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::timeline::{DurationSource, Segment};
    use crate::visual::{TextStyle, VisualSpec};

    fn renderer() -> SegmentRenderer {
        SegmentRenderer::new(&RunConfig::default().with_tools("ffmpeg", "ffprobe"))
    }

    fn entry(segment: Segment, start: f64, duration: f64) -> TimelineEntry {
        TimelineEntry {
            source_index: 3,
            segment: Arc::new(segment),
            start,
            duration,
            narration: None,
        }
    }

    fn arg_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn test_frame_span_adds_up() {
        // 0.7 + 0.7 + 0.7 = 2.1s -> 63 frames at 30fps
        let spans: Vec<u64> = [0.0, 0.7, 1.4].iter().map(|s| frame_span(*s, 0.7, 30)).collect();
        assert_eq!(spans.iter().sum::<u64>(), 63);
        assert_eq!(frame_span(0.0, 3.0, 30), 90);
        assert_eq!(frame_span(0.0, 1.0 / 30.0, 30), 1);
    }

    #[test]
    fn test_solid_card_plan() {
        let visual = VisualSpec::new(Background::solid("#112233")).with_overlay(TextOverlay::new("Hello"));
        let plan = renderer()
            .plan(0, &entry(Segment::text_card(visual, 3.0), 0.0, 3.0), Path::new("/tmp/run/seg-000.mp4"))
            .unwrap();

        let color = plan.graph.filters().find(|f| f.name() == "color").unwrap();
        assert_eq!(color.get("c"), Some("0x112233"));
        assert_eq!(color.get("s"), Some("1080x1920"));
        assert_eq!(color.get("d"), Some("3"));

        let text = plan.graph.filters().find(|f| f.name() == "drawtext").unwrap();
        assert_eq!(text.get("text"), Some("Hello"));
        assert_eq!(text.get("expansion"), Some("none"));
        // visible for the whole clip, so no enable expression
        assert_eq!(text.get("enable"), None);

        assert_eq!(arg_after(&plan.args, "-frames:v"), Some("90"));
        assert_eq!(arg_after(&plan.args, "-map"), Some("[v]"));
        assert!(plan.args.contains(&"-an".to_string()));
        assert_eq!(plan.args.last().unwrap(), "/tmp/run/seg-000.partial.mp4");
        assert_eq!(plan.frames, 90);
    }

    #[test]
    fn test_overlay_window_becomes_enable_expression() {
        let overlay = TextOverlay::new("50% off: today").between(1.0, 2.5);
        let visual = VisualSpec::default().with_overlay(overlay);
        let plan = renderer()
            .plan(1, &entry(Segment::text_card(visual, 4.0), 3.0, 4.0), Path::new("/tmp/seg.mp4"))
            .unwrap();

        let text = plan.graph.filters().find(|f| f.name() == "drawtext").unwrap();
        assert_eq!(text.get("enable"), Some("gte(t,1)*lt(t,2.5)"));
        let compiled = plan.graph.compile();
        assert!(compiled.contains(r"text=50% off\\: today"));
        assert!(compiled.contains(r"enable=gte(t\,1)*lt(t\,2.5)"));
    }

    #[test]
    fn test_overlay_outside_clip_is_config_error() {
        let overlay = TextOverlay::new("late").between(5.0, 6.0);
        let visual = VisualSpec::default().with_overlay(overlay);
        let err = renderer()
            .plan(0, &entry(Segment::text_card(visual, 4.0), 0.0, 4.0), Path::new("/tmp/seg.mp4"))
            .unwrap_err();
        assert!(matches!(err, RenderError::Config { index: 3, .. }));
        assert!(err.to_string().contains("outside the segment"));
    }

    #[test]
    fn test_invalid_color_is_config_error() {
        let visual = VisualSpec::new(Background::solid("#12"));
        let err = renderer()
            .plan(0, &entry(Segment::text_card(visual, 1.0), 0.0, 1.0), Path::new("/tmp/seg.mp4"))
            .unwrap_err();
        assert!(matches!(err, RenderError::Config { .. }));
    }

    #[test]
    fn test_gradient_background() {
        let visual = VisualSpec::new(Background::Gradient {
            from: Color::new("#ff0000"),
            to: Color::new("#0000ff"),
            direction: GradientDirection::Horizontal,
        });
        let plan = renderer()
            .plan(0, &entry(Segment::text_card(visual, 2.0), 0.0, 2.0), Path::new("/tmp/seg.mp4"))
            .unwrap();
        let gradient = plan.graph.filters().find(|f| f.name() == "gradients").unwrap();
        assert_eq!(gradient.get("c0"), Some("0xFF0000"));
        assert_eq!(gradient.get("x1"), Some("1080"));
        assert_eq!(gradient.get("y1"), Some("0"));
    }

    #[test]
    fn test_banner_style_draws_box() {
        let overlay = TextOverlay::new("Shop now").with_style(TextStyle::banner());
        let filter = drawtext(&overlay, 3.0).unwrap();
        assert_eq!(filter.get("box"), Some("1"));
        assert_eq!(filter.get("boxcolor"), Some("0x000000@0.6"));
        assert_eq!(filter.get("y"), Some("h-text_h-160"));
        assert_eq!(filter.get("borderw"), None);
    }

    #[test]
    fn test_media_clip_letterboxed_and_held() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("clip.mp4");
        std::fs::write(&source, b"not really video").unwrap();

        let segment = Segment::media_clip(
            MediaSource::new(&source).starting_at(1.5),
            VisualSpec::default(),
            DurationSource::Fixed(2.0),
        );
        let plan = renderer()
            .plan(0, &entry(segment, 0.0, 2.0), &dir.path().join("seg-000.mp4"))
            .unwrap();

        assert_eq!(arg_after(&plan.args, "-ss"), Some("1.5"));
        assert_eq!(arg_after(&plan.args, "-i"), Some(source.to_str().unwrap()));
        let names: Vec<&str> = plan.graph.filters().map(|f| f.name()).collect();
        assert_eq!(names, ["scale", "pad", "setsar", "fps", "tpad", "format"]);
        assert!(plan.graph.compile().starts_with("[0:v]scale="));
    }

    #[test]
    fn test_pad_color_fills_media_letterbox_only() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("clip.mp4");
        std::fs::write(&source, b"not really video").unwrap();
        let config = RunConfig {
            pad_color: "#ff0000".to_string(),
            ..RunConfig::default().with_tools("ffmpeg", "ffprobe")
        };
        let renderer = SegmentRenderer::new(&config);

        let media = Segment::media_clip(MediaSource::new(&source), VisualSpec::default(), DurationSource::Fixed(2.0));
        let plan = renderer.plan(0, &entry(media, 0.0, 2.0), &dir.path().join("seg-000.mp4")).unwrap();
        let pad = plan.graph.filters().find(|f| f.name() == "pad").unwrap();
        assert_eq!(pad.get("color"), Some("0xFF0000"));

        let card = Segment::text_card(VisualSpec::default(), 1.0);
        let plan = renderer.plan(1, &entry(card, 2.0, 1.0), &dir.path().join("seg-001.mp4")).unwrap();
        let color = plan.graph.filters().find(|f| f.name() == "color").unwrap();
        assert_eq!(color.get("c"), Some(Color::default().to_ffmpeg().unwrap().as_str()));
        assert!(plan.graph.filters().all(|f| f.name() != "pad"));
    }

    #[test]
    fn test_still_image_loops() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("listing.png");
        std::fs::write(&source, b"png").unwrap();

        let segment = Segment::media_clip(MediaSource::new(&source), VisualSpec::default(), DurationSource::Fixed(3.0));
        let plan = renderer()
            .plan(0, &entry(segment, 0.0, 3.0), &dir.path().join("seg-000.mp4"))
            .unwrap();
        assert_eq!(arg_after(&plan.args, "-loop"), Some("1"));
        assert_eq!(arg_after(&plan.args, "-framerate"), Some("30"));
        assert_eq!(arg_after(&plan.args, "-frames:v"), Some("90"));
    }

    #[test]
    fn test_missing_media_is_config_error() {
        let segment = Segment::media_clip(
            MediaSource::new("/nonexistent/clip.mp4"),
            VisualSpec::default(),
            DurationSource::Fixed(2.0),
        );
        let err = renderer()
            .plan(0, &entry(segment, 0.0, 2.0), Path::new("/tmp/seg.mp4"))
            .unwrap_err();
        assert!(err.to_string().contains("source media not found"));
    }

    #[tokio::test]
    async fn test_missing_ffmpeg_is_io_error() {
        let config = RunConfig::default().with_tools("/nonexistent/ffmpeg", "ffprobe");
        let renderer = SegmentRenderer::new(&config);
        let dir = tempfile::tempdir().unwrap();
        let err = renderer
            .render(
                0,
                &entry(Segment::text_card(VisualSpec::default(), 1.0), 0.0, 1.0),
                &dir.path().join("seg-000.mp4"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::Io { index: 3, .. }));
        assert!(!dir.path().join("seg-000.mp4").exists());
    }

    #[test]
    fn test_clip_format_needs_every_field() {
        let mut info = MediaInfo {
            duration: 2.0,
            has_video: true,
            has_audio: false,
            width: Some(1080),
            height: Some(1920),
            video_codec: Some("h264".to_string()),
            pixel_format: Some("yuv420p".to_string()),
            frame_rate: Some("30/1".to_string()),
        };
        let format = ClipFormat::of(&info).unwrap();
        assert_eq!(format.codec, "h264");
        assert_eq!(format.frame_rate, "30/1");

        info.pixel_format = None;
        assert_eq!(ClipFormat::of(&info), None);
    }
}
