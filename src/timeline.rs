//! Segment model and timeline resolution
//!
//! A [`Segment`] declares where its duration comes from; the
//! [`TimelineBuilder`] resolves every duration (synthesizing narration or
//! probing source media as needed) and lays the segments end to end.
//!
//! Resolution rules:
//! - narration-sourced segments last exactly as long as their narration
//! - padding after narration becomes its own trailing hold segment
//! - a failed narration drops only the segments that depend on it
//! - offsets are a running sum, so `start[i] + duration[i] == start[i + 1]`

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::audio::{AudioSource, AudioTrack, OverflowPolicy};
use crate::error::{Error, ProviderError, Result, TimelineError};
use crate::narration::{Narration, NarrationRequest, NarrationSession};
use crate::probe::MediaProbe;
use crate::visual::VisualSpec;

/// Existing media used as a segment's picture
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaSource {
    pub path: PathBuf,
    /// Seek offset into the source, seconds
    pub start: f64,
}

impl MediaSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            start: 0.0,
        }
    }

    #[must_use]
    pub fn starting_at(mut self, start: f64) -> Self {
        self.start = start;
        self
    }

    /// Still images (rasterizer output) have no natural duration
    #[must_use]
    pub fn is_still_image(&self) -> bool {
        is_still_image(&self.path)
    }
}

fn is_still_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            matches!(
                ext.to_ascii_lowercase().as_str(),
                "png" | "jpg" | "jpeg" | "webp" | "bmp"
            )
        })
}

/// What a segment shows
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SegmentKind {
    TextCard,
    NarratedCard,
    MediaClip { source: MediaSource },
}

impl SegmentKind {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::TextCard => "text card",
            Self::NarratedCard => "narrated card",
            Self::MediaClip { .. } => "media clip",
        }
    }
}

/// Where a segment's duration comes from
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DurationSource {
    /// Requested up front, in seconds
    Fixed(f64),
    /// Equal to the narration's measured length
    Narration {
        request: NarrationRequest,
        /// Trailing hold appended as a separate segment
        padding: f64,
    },
    /// The source media's own length (media clips only)
    Natural,
}

/// One timed unit of the final video
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segment {
    pub kind: SegmentKind,
    pub visual: VisualSpec,
    pub duration: DurationSource,
}

impl Segment {
    #[must_use]
    pub fn text_card(visual: VisualSpec, seconds: f64) -> Self {
        Self {
            kind: SegmentKind::TextCard,
            visual,
            duration: DurationSource::Fixed(seconds),
        }
    }

    #[must_use]
    pub fn narrated_card(visual: VisualSpec, request: NarrationRequest) -> Self {
        Self {
            kind: SegmentKind::NarratedCard,
            visual,
            duration: DurationSource::Narration { request, padding: 0.0 },
        }
    }

    #[must_use]
    pub fn media_clip(source: MediaSource, visual: VisualSpec, duration: DurationSource) -> Self {
        Self {
            kind: SegmentKind::MediaClip { source },
            visual,
            duration,
        }
    }

    /// Add explicit padding after the narration
    #[must_use]
    pub fn with_padding(mut self, seconds: f64) -> Self {
        if let DurationSource::Narration { padding, .. } = &mut self.duration {
            *padding = seconds;
        }
        self
    }

    /// Background-only card holding the screen for `seconds`
    fn hold_after(&self, seconds: f64) -> Self {
        Self::text_card(self.visual.background_only(), seconds)
    }

    fn check_source(&self, index: usize) -> std::result::Result<(), TimelineError> {
        let reason = match (&self.kind, &self.duration) {
            (SegmentKind::TextCard, DurationSource::Fixed(_))
            | (SegmentKind::NarratedCard, DurationSource::Narration { .. })
            | (SegmentKind::MediaClip { .. }, DurationSource::Fixed(_) | DurationSource::Narration { .. }) => {
                return Ok(());
            }
            (SegmentKind::MediaClip { source }, DurationSource::Natural) => {
                if source.is_still_image() {
                    "a still image has no natural duration; request one".to_string()
                } else {
                    return Ok(());
                }
            }
            (kind, DurationSource::Natural) => format!("a {} has no natural duration", kind.label()),
            (SegmentKind::TextCard, DurationSource::Narration { .. }) => {
                "a text card cannot take its duration from narration; use a narrated card".to_string()
            }
            (SegmentKind::NarratedCard, DurationSource::Fixed(_)) => {
                "a narrated card needs a narration script".to_string()
            }
        };
        Err(TimelineError::InvalidSource { index, reason })
    }
}

/// A resolved `(segment, start, duration)` triple
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineEntry {
    /// Index of the originating segment in the input list
    pub source_index: usize,
    pub segment: Arc<Segment>,
    pub start: f64,
    pub duration: f64,
    /// Narration attached to this entry's time range
    #[serde(skip)]
    pub narration: Option<Arc<Narration>>,
}

impl TimelineEntry {
    #[must_use]
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Gap-free, non-overlapping sequence of entries
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Timeline {
    entries: Vec<TimelineEntry>,
    frame_rate: u32,
}

impl Timeline {
    /// Lay out already-known durations end to end and validate the result
    pub fn from_durations(
        items: Vec<(usize, Arc<Segment>, f64, Option<Arc<Narration>>)>,
        frame_rate: u32,
    ) -> std::result::Result<Self, TimelineError> {
        if items.is_empty() {
            return Err(TimelineError::Empty);
        }

        let frame = 1.0 / f64::from(frame_rate);
        let mut entries = Vec::with_capacity(items.len());
        let mut cursor = 0.0_f64;

        for (source_index, segment, duration, narration) in items {
            if !duration.is_finite() || duration <= 0.0 {
                return Err(TimelineError::InvalidDuration {
                    index: source_index,
                    duration,
                });
            }
            if duration < frame {
                return Err(TimelineError::SubFrame {
                    index: source_index,
                    duration,
                    fps: frame_rate,
                });
            }
            entries.push(TimelineEntry {
                source_index,
                segment,
                start: cursor,
                duration,
                narration,
            });
            cursor += duration;
        }

        let timeline = Self { entries, frame_rate };
        timeline.validate()?;
        Ok(timeline)
    }

    /// Check offsets: first at zero, each starting where the previous ended
    pub fn validate(&self) -> std::result::Result<(), TimelineError> {
        let Some(first) = self.entries.first() else {
            return Err(TimelineError::Empty);
        };
        if first.start != 0.0 {
            return Err(TimelineError::OffsetOrder {
                index: first.source_index,
                start: first.start,
            });
        }
        for pair in self.entries.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            #[allow(clippy::float_cmp)]
            let contiguous = prev.end() == next.start;
            if !contiguous || next.start <= prev.start {
                return Err(TimelineError::OffsetOrder {
                    index: next.source_index,
                    start: next.start,
                });
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    #[must_use]
    pub fn offsets(&self) -> Vec<f64> {
        self.entries.iter().map(|e| e.start).collect()
    }

    /// Sum of all durations (equal to the last entry's end)
    #[must_use]
    pub fn total_duration(&self) -> f64 {
        self.entries.last().map_or(0.0, TimelineEntry::end)
    }

    /// One audio track per narrated entry, placed at the entry's start
    #[must_use]
    pub fn narration_tracks(&self) -> Vec<AudioTrack> {
        self.entries
            .iter()
            .filter_map(|entry| {
                let narration = entry.narration.as_ref()?;
                Some(AudioTrack {
                    source: AudioSource::Bytes {
                        data: narration.audio.clone(),
                        extension: narration.extension.clone(),
                    },
                    natural_duration: narration.duration,
                    offset: entry.start,
                    gain_db: 0.0,
                    // narration defines its own window, so it never overflows
                    overflow: OverflowPolicy::Truncate,
                })
            })
            .collect()
    }
}

/// A segment removed because its narration failed
#[derive(Debug, Clone)]
pub struct DroppedSegment {
    pub index: usize,
    pub error: ProviderError,
}

/// Outcome of resolving a segment list
#[derive(Debug, Clone)]
pub struct Resolution {
    pub timeline: Timeline,
    pub dropped: Vec<DroppedSegment>,
}

/// Resolves durations and offsets for a segment list
pub struct TimelineBuilder<'a> {
    narration: Option<&'a NarrationSession>,
    probe: &'a dyn MediaProbe,
    frame_rate: u32,
}

impl<'a> TimelineBuilder<'a> {
    pub fn new(probe: &'a dyn MediaProbe, frame_rate: u32) -> Self {
        Self {
            narration: None,
            probe,
            frame_rate,
        }
    }

    #[must_use]
    pub fn with_narration(mut self, session: &'a NarrationSession) -> Self {
        self.narration = Some(session);
        self
    }

    /// Resolve every duration and compute start offsets.
    ///
    /// Narration is requested in segment order, one call at a time.
    #[instrument(skip_all, fields(segments = segments.len()))]
    pub async fn resolve(&self, segments: &[Segment]) -> Result<Resolution> {
        if segments.is_empty() {
            return Err(TimelineError::Empty.into());
        }
        for (index, segment) in segments.iter().enumerate() {
            segment.check_source(index)?;
            if let DurationSource::Narration { padding, .. } = segment.duration {
                if !padding.is_finite() || padding < 0.0 {
                    return Err(TimelineError::InvalidPadding { index, padding }.into());
                }
            }
        }

        let mut items = Vec::with_capacity(segments.len());
        let mut dropped = Vec::new();

        for (index, segment) in segments.iter().enumerate() {
            let shared = Arc::new(segment.clone());
            match &segment.duration {
                DurationSource::Fixed(seconds) => items.push((index, shared, *seconds, None)),
                DurationSource::Natural => {
                    let SegmentKind::MediaClip { source } = &segment.kind else {
                        return Err(TimelineError::InvalidSource {
                            index,
                            reason: format!("a {} has no natural duration", segment.kind.label()),
                        }
                        .into());
                    };
                    let natural = self.probe.duration(&source.path).await?;
                    let remaining = natural - source.start.max(0.0);
                    items.push((index, shared, remaining, None));
                }
                DurationSource::Narration { request, padding } => {
                    let session = self.narration.ok_or_else(|| {
                        Error::MissingCredentials(format!(
                            "segment {index} needs narration but no narration provider is configured"
                        ))
                    })?;
                    match session.narrate(request).await {
                        Ok(narration) => {
                            let duration = narration.duration;
                            items.push((index, shared, duration, Some(narration)));
                            if *padding > 0.0 {
                                items.push((index, Arc::new(segment.hold_after(*padding)), *padding, None));
                            }
                        }
                        Err(error) => {
                            warn!(segment = index, "dropping segment: {error}");
                            dropped.push(DroppedSegment { index, error });
                        }
                    }
                }
            }
        }

        if items.is_empty() {
            // Every segment depended on narration and every narration failed
            let first = dropped.into_iter().next().map(|d| d.error);
            return Err(first.map_or_else(|| TimelineError::Empty.into(), Error::Provider));
        }

        let timeline = Timeline::from_durations(items, self.frame_rate)?;
        info!(
            entries = timeline.len(),
            dropped = dropped.len(),
            total = timeline.total_duration(),
            "timeline resolved"
        );
        Ok(Resolution { timeline, dropped })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::error::{ProbeError, ProviderErrorKind};
    use crate::narration::testing::ScriptedProvider;
    use crate::narration::VoiceProfile;
    use crate::visual::{Background, TextOverlay};

    struct FixedProbe(HashMap<PathBuf, f64>);

    #[async_trait]
    impl MediaProbe for FixedProbe {
        async fn duration(&self, path: &Path) -> std::result::Result<f64, ProbeError> {
            self.0
                .get(path)
                .copied()
                .ok_or_else(|| ProbeError::Missing(path.to_path_buf()))
        }
    }

    fn no_media() -> FixedProbe {
        FixedProbe(HashMap::new())
    }

    fn card(seconds: f64) -> Segment {
        Segment::text_card(
            VisualSpec::new(Background::solid("#112233")).with_overlay(TextOverlay::new("Hello")),
            seconds,
        )
    }

    fn narrated(script: &str) -> Segment {
        Segment::narrated_card(
            VisualSpec::new(Background::solid("#000000")),
            NarrationRequest::new(script, VoiceProfile::default()),
        )
    }

    fn session(provider: ScriptedProvider) -> NarrationSession {
        NarrationSession::new(Arc::new(provider), Duration::ZERO)
    }

    #[tokio::test]
    async fn test_fixed_cards_offsets() {
        let probe = no_media();
        let builder = TimelineBuilder::new(&probe, 30);
        let resolution = builder.resolve(&[card(3.0), card(2.0), card(4.0)]).await.unwrap();

        let timeline = resolution.timeline;
        assert_eq!(timeline.offsets(), vec![0.0, 3.0, 5.0]);
        assert_eq!(timeline.total_duration(), 9.0);
        assert!(resolution.dropped.is_empty());
    }

    #[tokio::test]
    async fn test_adjacent_offsets_reconcile_exactly() {
        let probe = no_media();
        let builder = TimelineBuilder::new(&probe, 30);
        let durations = [0.1, 0.7, 1.3, 2.9, 0.05, 3.333];
        let segments: Vec<Segment> = durations.iter().map(|d| card(*d)).collect();
        let timeline = builder.resolve(&segments).await.unwrap().timeline;

        let entries = timeline.entries();
        assert_eq!(entries[0].start, 0.0);
        for pair in entries.windows(2) {
            assert_eq!(pair[0].start + pair[0].duration, pair[1].start);
        }
        let sum: f64 = entries.iter().map(|e| e.duration).sum();
        assert!((timeline.total_duration() - sum).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_narrated_duration_is_exact() {
        let probe = no_media();
        let narration = session(ScriptedProvider::new().with("Meet the new mug.", 7.2));
        let builder = TimelineBuilder::new(&probe, 30).with_narration(&narration);

        let timeline = builder
            .resolve(&[narrated("Meet the new mug.")])
            .await
            .unwrap()
            .timeline;

        assert_eq!(timeline.entries()[0].duration, 7.2);
        assert_eq!(timeline.narration_tracks().len(), 1);
        assert_eq!(timeline.narration_tracks()[0].offset, 0.0);
    }

    #[tokio::test]
    async fn test_padding_is_a_separate_segment() {
        let probe = no_media();
        let narration = session(ScriptedProvider::new().with("Line", 4.0));
        let builder = TimelineBuilder::new(&probe, 30).with_narration(&narration);

        let segments = [card(2.0), narrated("Line").with_padding(0.5), card(1.0)];
        let timeline = builder.resolve(&segments).await.unwrap().timeline;

        let entries = timeline.entries();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[1].duration, 4.0);
        assert_eq!(entries[2].duration, 0.5);
        assert_eq!(entries[2].source_index, 1);
        assert!(entries[2].segment.visual.overlays.is_empty());
        assert!(entries[2].narration.is_none());
        assert_eq!(timeline.offsets(), vec![0.0, 2.0, 6.0, 6.5]);
        // narration track sits at the narrated segment's start
        assert_eq!(timeline.narration_tracks()[0].offset, 2.0);
    }

    #[tokio::test]
    async fn test_resolution_is_idempotent() {
        let probe = no_media();
        let narration = session(ScriptedProvider::new().with("A", 1.25).with("B", 2.5));
        let builder = TimelineBuilder::new(&probe, 30).with_narration(&narration);
        let segments = [narrated("A"), card(1.0), narrated("B").with_padding(0.25)];

        let first = builder.resolve(&segments).await.unwrap().timeline;
        let second = builder.resolve(&segments).await.unwrap().timeline;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_sub_frame_duration_rejected() {
        let probe = no_media();
        let builder = TimelineBuilder::new(&probe, 30);
        let err = builder.resolve(&[card(1.0), card(0.01)]).await.unwrap_err();

        match err {
            Error::Timeline(TimelineError::SubFrame { index, fps, .. }) => {
                assert_eq!(index, 1);
                assert_eq!(fps, 30);
            }
            other => panic!("expected SubFrame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_positive_duration_rejected() {
        let probe = no_media();
        let builder = TimelineBuilder::new(&probe, 30);
        for bad in [0.0, -2.0, f64::NAN, f64::INFINITY] {
            let err = builder.resolve(&[card(bad)]).await.unwrap_err();
            assert!(matches!(
                err,
                Error::Timeline(TimelineError::InvalidDuration { index: 0, .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_failed_narration_drops_only_its_segment() {
        let probe = no_media();
        let narration = session(
            ScriptedProvider::new()
                .with("ok", 3.0)
                .failing("busy", ProviderErrorKind::RateLimited),
        );
        let builder = TimelineBuilder::new(&probe, 30).with_narration(&narration);

        let resolution = builder
            .resolve(&[card(1.0), narrated("busy"), narrated("ok")])
            .await
            .unwrap();

        assert_eq!(resolution.dropped.len(), 1);
        assert_eq!(resolution.dropped[0].index, 1);
        assert!(resolution.dropped[0].error.is_rate_limited());
        assert_eq!(resolution.timeline.offsets(), vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn test_all_narration_failed_is_provider_error() {
        let probe = no_media();
        let narration = session(ScriptedProvider::new().failing("busy", ProviderErrorKind::RateLimited));
        let builder = TimelineBuilder::new(&probe, 30).with_narration(&narration);

        let err = builder.resolve(&[narrated("busy")]).await.unwrap_err();
        assert!(matches!(err, Error::Provider(ref e) if e.is_rate_limited()));
    }

    #[tokio::test]
    async fn test_narration_without_provider_fails_fast() {
        let probe = no_media();
        let builder = TimelineBuilder::new(&probe, 30);
        let err = builder.resolve(&[narrated("hello")]).await.unwrap_err();
        assert!(matches!(err, Error::MissingCredentials(_)));
    }

    #[tokio::test]
    async fn test_duplicate_scripts_synthesized_once() {
        let probe = no_media();
        let provider = Arc::new(ScriptedProvider::new().with("Buy now", 2.0));
        let narration = NarrationSession::new(provider.clone(), Duration::ZERO);
        let builder = TimelineBuilder::new(&probe, 30).with_narration(&narration);

        builder
            .resolve(&[narrated("Buy now"), card(1.0), narrated("Buy now")])
            .await
            .unwrap();
        assert_eq!(narration.provider_calls().await, 1);
    }

    #[tokio::test]
    async fn test_natural_media_duration_from_probe() {
        let path = PathBuf::from("/media/unboxing.mp4");
        let probe = FixedProbe(HashMap::from([(path.clone(), 12.0)]));
        let builder = TimelineBuilder::new(&probe, 30);
        let clip = Segment::media_clip(
            MediaSource::new(&path).starting_at(2.0),
            VisualSpec::default(),
            DurationSource::Natural,
        );

        let timeline = builder.resolve(&[clip, card(2.0)]).await.unwrap().timeline;
        assert_eq!(timeline.entries()[0].duration, 10.0);
        assert_eq!(timeline.total_duration(), 12.0);
    }

    #[tokio::test]
    async fn test_missing_media_is_probe_error() {
        let probe = no_media();
        let builder = TimelineBuilder::new(&probe, 30);
        let clip = Segment::media_clip(
            MediaSource::new("/media/missing.mp4"),
            VisualSpec::default(),
            DurationSource::Natural,
        );
        let err = builder.resolve(&[clip]).await.unwrap_err();
        assert!(matches!(err, Error::Probe(ProbeError::Missing(_))));
    }

    #[tokio::test]
    async fn test_mismatched_duration_source_rejected() {
        let probe = no_media();
        let builder = TimelineBuilder::new(&probe, 30);
        let still = Segment::media_clip(
            MediaSource::new("/art/listing.png"),
            VisualSpec::default(),
            DurationSource::Natural,
        );
        let err = builder.resolve(&[card(1.0), still]).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Timeline(TimelineError::InvalidSource { index: 1, .. })
        ));
    }

    #[test]
    fn test_validate_catches_gap() {
        let seg = Arc::new(card(1.0));
        let mut timeline = Timeline::from_durations(
            vec![(0, seg.clone(), 1.0, None), (1, seg, 1.0, None)],
            30,
        )
        .unwrap();
        timeline.entries[1].start = 1.5;
        assert_eq!(
            timeline.validate(),
            Err(TimelineError::OffsetOrder { index: 1, start: 1.5 })
        );
    }
}
