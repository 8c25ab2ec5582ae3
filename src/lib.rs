//! `clipwright` - timed multimedia segment compositor
//!
//! Turns a declarative list of segments (text cards, narrated cards, media
//! clips) into one finished video: durations are resolved (narration is
//! synthesized and measured), segments are rendered and concatenated,
//! narration and music are mixed at their timeline offsets, and the result
//! is published with a manifest record.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//!
//! use clipwright::{Compositor, Ffprobe, RunConfig, Segment, TimelineBuilder, VisualSpec};
//! use clipwright::visual::{Background, TextOverlay};
//!
//! #[tokio::main]
//! async fn main() -> clipwright::Result<()> {
//!     let config = RunConfig::load(None)?;
//!     let probe = Ffprobe::new(config.ffprobe_path.clone(), config.timeouts.probe());
//!
//!     let segments = vec![
//!         Segment::text_card(
//!             VisualSpec::new(Background::solid("#112233")).with_overlay(TextOverlay::new("New mug!")),
//!             3.0,
//!         ),
//!         Segment::text_card(VisualSpec::new(Background::gradient("#ff8800", "#220044")), 2.0),
//!     ];
//!     let resolution = TimelineBuilder::new(&probe, config.frame_rate).resolve(&segments).await?;
//!
//!     let compositor = Compositor::new(config);
//!     let report = compositor
//!         .compose(&resolution.timeline, &[], Path::new("promo.mp4"))
//!         .await?;
//!     println!("{:.2}s written to {}", report.duration, report.output.display());
//!     Ok(())
//! }
//! ```

pub mod audio;
pub mod batch;
pub mod compositor;
pub mod config;
pub mod error;
pub mod filter;
pub mod job;
pub mod narration;
pub mod pipeline;
pub mod probe;
pub mod process;
pub mod publish;
pub mod render;
pub mod timeline;
pub mod visual;
pub mod workspace;

pub use audio::{AudioSource, AudioTrack, OverflowPolicy};
pub use batch::{BatchItem, BatchRunner, BatchSummary, ItemFailure};
pub use compositor::{ComposeReport, Compositor};
pub use config::{CanvasSize, Credentials, RunConfig};
pub use error::{
    ComposeStep, CompositeError, Error, ProbeError, ProviderError, ProviderErrorKind, PublishError, RenderError,
    Result, TimelineError,
};
pub use job::{Job, JobFile, JobPlan};
pub use narration::{Narration, NarrationProvider, NarrationRequest, NarrationSession, VoiceProfile};
pub use pipeline::{ItemOutcome, ItemProducer, VideoPipeline};
pub use probe::{Ffprobe, MediaInfo, MediaProbe};
pub use publish::{Manifest, ManifestRecord, OutputPackager, PublishReport};
pub use render::{RenderedClip, SegmentRenderer};
pub use timeline::{DurationSource, MediaSource, Segment, SegmentKind, Timeline, TimelineBuilder, TimelineEntry};
pub use visual::VisualSpec;

/// Version of clipwright
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
