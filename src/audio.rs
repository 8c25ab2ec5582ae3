//! Audio tracks and the mix graph
//!
//! Each track is delayed to its timeline offset, padded with silence to the
//! video length and cut at the video end. Tracks are summed with
//! normalization off so caller-set levels survive the mix.

use std::path::PathBuf;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{ComposeStep, CompositeError};
use crate::filter::{secs, Filter, FilterChain, FilterGraph};

/// What happens to a track that runs past the end of the video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Cut the track at the video's end
    #[default]
    Truncate,
    /// Fail the mix step
    Reject,
}

/// Where a track's audio lives
#[derive(Debug, Clone, PartialEq)]
pub enum AudioSource {
    /// In-memory audio (e.g. narration), written to the run directory before mixing
    Bytes { data: Bytes, extension: String },
    /// Audio already on disk
    File(PathBuf),
}

/// One track placed on the timeline
#[derive(Debug, Clone, PartialEq)]
pub struct AudioTrack {
    pub source: AudioSource,
    /// Length of the audio itself, seconds
    pub natural_duration: f64,
    /// Where the track starts on the timeline, seconds
    pub offset: f64,
    /// Level adjustment applied before mixing
    pub gain_db: f64,
    pub overflow: OverflowPolicy,
}

impl AudioTrack {
    pub fn from_file(path: impl Into<PathBuf>, natural_duration: f64, offset: f64) -> Self {
        Self {
            source: AudioSource::File(path.into()),
            natural_duration,
            offset,
            gain_db: 0.0,
            overflow: OverflowPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }

    #[must_use]
    pub fn with_gain_db(mut self, gain_db: f64) -> Self {
        self.gain_db = gain_db;
        self
    }

    /// Timeline position where the track's audio ends
    #[must_use]
    pub fn end(&self) -> f64 {
        self.offset + self.natural_duration
    }
}

/// Build the mix graph for `tracks` on a video of `total` seconds.
///
/// Input `i` of the ffmpeg invocation must be `tracks[i]`; the graph's
/// output pad is `[aout]`. `tolerance` absorbs sub-frame overshoot before
/// the reject policy fires.
pub fn mix_graph(
    tracks: &[AudioTrack],
    total: f64,
    sample_rate: u32,
    tolerance: f64,
) -> Result<FilterGraph, CompositeError> {
    if tracks.is_empty() {
        return Err(CompositeError::new(ComposeStep::Mix, "no audio tracks to mix"));
    }

    let mut graph = FilterGraph::new();
    let mut pads = Vec::with_capacity(tracks.len());

    for (i, track) in tracks.iter().enumerate() {
        if !track.offset.is_finite() || track.offset < 0.0 {
            return Err(CompositeError::new(
                ComposeStep::Mix,
                format!("track {i}: offset {}s must be non-negative", track.offset),
            ));
        }
        if track.overflow == OverflowPolicy::Reject && track.end() > total + tolerance {
            return Err(CompositeError::new(
                ComposeStep::Mix,
                format!(
                    "track {i}: ends at {:.3}s but the video is {:.3}s (overflow policy: reject)",
                    track.end(),
                    total
                ),
            ));
        }

        let delay_samples = (track.offset * f64::from(sample_rate)).round() as u64;
        let pad = format!("a{i}");
        let mut chain = FilterChain::from_pads([format!("{i}:a")])
            .then(Filter::new("aresample").opt("osr", sample_rate))
            .then(Filter::new("aformat").opt("channel_layouts", "stereo"));
        if track.gain_db.abs() > f64::EPSILON {
            chain = chain.then(Filter::new("volume").opt("volume", format!("{}dB", track.gain_db)));
        }
        chain = chain
            .then(
                Filter::new("adelay")
                    .opt("delays", format!("{delay_samples}S"))
                    .opt("all", 1),
            )
            .then(Filter::new("apad").opt("whole_dur", secs(total)))
            .then(Filter::new("atrim").opt("end", secs(total)))
            .output(pad.clone());
        graph.push(chain);
        pads.push(pad);
    }

    if pads.len() == 1 {
        graph.push(FilterChain::from_pads(pads).then(Filter::new("anull")).output("aout"));
    } else {
        let count = pads.len();
        graph.push(
            FilterChain::from_pads(pads)
                .then(
                    Filter::new("amix")
                        .opt("inputs", count)
                        .opt("duration", "longest")
                        .opt("normalize", 0),
                )
                .output("aout"),
        );
    }

    Ok(graph)
}
