//! Job files
//!
//! A job file is JSON holding one job or an array of jobs. Each job names
//! an item, lists its segments and optional music tracks, and says where
//! the finished video is published. Relative paths resolve against the job
//! file's directory.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::audio::{AudioTrack, OverflowPolicy};
use crate::error::{Error, Result};
use crate::narration::{NarrationRequest, VoiceProfile};
use crate::probe::MediaProbe;
use crate::timeline::{DurationSource, MediaSource, Segment};
use crate::visual::{Background, TextOverlay, VisualSpec};

/// Segment kind as written in job files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKindSpec {
    Text,
    Narrated,
    Media,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentSpec {
    pub kind: SegmentKindSpec,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub narration: Option<String>,
    #[serde(default)]
    pub padding: Option<f64>,
    #[serde(default)]
    pub background: Option<Background>,
    #[serde(default)]
    pub overlays: Vec<TextOverlay>,
    #[serde(default)]
    pub source: Option<PathBuf>,
    #[serde(default)]
    pub source_start: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackSpec {
    pub path: PathBuf,
    #[serde(default)]
    pub offset: f64,
    /// Falls back to the configured default policy
    #[serde(default)]
    pub overflow: Option<OverflowPolicy>,
    #[serde(default)]
    pub gain_db: f64,
}

/// One producible item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub name: String,
    /// Item category recorded in the manifest
    #[serde(rename = "type", default = "default_item_type")]
    pub item_type: String,
    pub segments: Vec<SegmentSpec>,
    #[serde(default)]
    pub tracks: Vec<TrackSpec>,
    #[serde(default)]
    pub destinations: Vec<PathBuf>,
    /// Voice id overriding the configured default
    #[serde(default)]
    pub voice: Option<String>,
}

fn default_item_type() -> String {
    "video".to_string()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JobFileContent {
    Many(Vec<Job>),
    One(Box<Job>),
}

/// Jobs loaded from one file, with the directory relative paths resolve against
#[derive(Debug, Clone)]
pub struct JobFile {
    pub path: PathBuf,
    pub base_dir: PathBuf,
    pub jobs: Vec<Job>,
}

impl JobFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read job file {}: {e}", path.display())))?;
        let base_dir = path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Self::parse(&content, path, base_dir)
    }

    pub fn parse(content: &str, path: &Path, base_dir: PathBuf) -> Result<Self> {
        let parsed: JobFileContent = serde_json::from_str(content)
            .map_err(|e| Error::Config(format!("invalid job file {}: {e}", path.display())))?;
        let jobs = match parsed {
            JobFileContent::Many(jobs) => jobs,
            JobFileContent::One(job) => vec![*job],
        };

        let mut seen = HashSet::new();
        for job in &jobs {
            if job.name.trim().is_empty() {
                return Err(Error::Config(format!("{}: job with empty name", path.display())));
            }
            if !seen.insert(job.name.as_str()) {
                return Err(Error::Config(format!(
                    "{}: duplicate job name '{}'",
                    path.display(),
                    job.name
                )));
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            base_dir,
            jobs,
        })
    }
}

/// A job converted to pipeline values
#[derive(Debug, Clone)]
pub struct JobPlan {
    pub name: String,
    pub item_type: String,
    pub segments: Vec<Segment>,
    pub tracks: Vec<AudioTrack>,
    pub destinations: Vec<PathBuf>,
}

impl JobPlan {
    /// File name of the composed video
    #[must_use]
    pub fn output_file_name(&self) -> String {
        format!("{}.mp4", sanitize_name(&self.name))
    }

    /// Whether any segment needs a narration provider
    #[must_use]
    pub fn needs_narration(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s.duration, DurationSource::Narration { .. }))
    }
}

/// Lowercase file-system-safe form of an item name
#[must_use]
pub fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        "item".to_string()
    } else {
        trimmed.to_string()
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

impl Job {
    /// Convert the declarative segments (no I/O)
    pub fn segments(&self, base_dir: &Path, default_voice: &VoiceProfile) -> Result<Vec<Segment>> {
        if self.segments.is_empty() {
            return Err(Error::Config(format!("job '{}' has no segments", self.name)));
        }
        let voice = match &self.voice {
            Some(id) => default_voice.clone().with_voice(id),
            None => default_voice.clone(),
        };
        self.segments
            .iter()
            .enumerate()
            .map(|(i, spec)| self.segment(i, spec, base_dir, &voice))
            .collect()
    }

    fn segment(&self, index: usize, spec: &SegmentSpec, base_dir: &Path, voice: &VoiceProfile) -> Result<Segment> {
        let err = |msg: &str| Error::Config(format!("job '{}' segment {index}: {msg}", self.name));
        let visual = VisualSpec {
            background: spec.background.clone().unwrap_or_default(),
            overlays: spec.overlays.clone(),
        };

        let narration = spec
            .narration
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|script| NarrationRequest::new(script, voice.clone()));
        if narration.is_some() {
            if let Some(duration) = spec.duration {
                warn!(
                    job = %self.name,
                    segment = index,
                    "ignoring duration {duration}s; narration sets the length"
                );
            }
        } else if spec.padding.is_some() {
            return Err(err("padding only applies to narrated segments"));
        }
        let padding = spec.padding.unwrap_or(0.0);

        let segment = match (spec.kind, narration) {
            (SegmentKindSpec::Text | SegmentKindSpec::Narrated, Some(request)) => {
                Segment::narrated_card(visual, request).with_padding(padding)
            }
            (SegmentKindSpec::Narrated, None) => return Err(err("narrated segment needs a narration script")),
            (SegmentKindSpec::Text, None) => {
                let duration = spec.duration.ok_or_else(|| err("text segment needs a duration"))?;
                Segment::text_card(visual, duration)
            }
            (SegmentKindSpec::Media, narration) => {
                let path = spec.source.as_ref().ok_or_else(|| err("media segment needs a source"))?;
                let source = MediaSource::new(resolve(base_dir, path)).starting_at(spec.source_start.unwrap_or(0.0));
                let duration = match (narration, spec.duration) {
                    (Some(request), _) => DurationSource::Narration { request, padding },
                    (None, Some(seconds)) => DurationSource::Fixed(seconds),
                    (None, None) => DurationSource::Natural,
                };
                Segment::media_clip(source, visual, duration)
            }
        };
        Ok(segment)
    }

    /// Convert music tracks; each file is probed for its natural length
    pub async fn tracks(
        &self,
        base_dir: &Path,
        default_overflow: OverflowPolicy,
        probe: &dyn MediaProbe,
    ) -> Result<Vec<AudioTrack>> {
        let mut tracks = Vec::with_capacity(self.tracks.len());
        for (i, spec) in self.tracks.iter().enumerate() {
            if !spec.offset.is_finite() || spec.offset < 0.0 {
                return Err(Error::Config(format!(
                    "job '{}' track {i}: offset must be non-negative",
                    self.name
                )));
            }
            let path = resolve(base_dir, &spec.path);
            let natural = probe.duration(&path).await?;
            tracks.push(
                AudioTrack::from_file(path, natural, spec.offset)
                    .with_overflow(spec.overflow.unwrap_or(default_overflow))
                    .with_gain_db(spec.gain_db),
            );
        }
        Ok(tracks)
    }

    /// Full conversion, probing track files
    pub async fn plan(
        &self,
        base_dir: &Path,
        default_voice: &VoiceProfile,
        default_overflow: OverflowPolicy,
        probe: &dyn MediaProbe,
    ) -> Result<JobPlan> {
        let segments = self.segments(base_dir, default_voice)?;
        let tracks = self.tracks(base_dir, default_overflow, probe).await?;
        Ok(JobPlan {
            name: self.name.clone(),
            item_type: self.item_type.clone(),
            segments,
            tracks,
            destinations: self.destinations.iter().map(|d| resolve(base_dir, d)).collect(),
        })
    }
}
