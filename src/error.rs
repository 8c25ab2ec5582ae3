//! Error taxonomy for the compositor pipeline
//!
//! Each pipeline stage owns one error type. [`Error`] unifies them for the
//! batch driver, which only needs to know which step failed and why.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Media probing failures
#[derive(Error, Debug, Clone)]
pub enum ProbeError {
    #[error("media file not found: {}", .0.display())]
    Missing(PathBuf),

    #[error("ffprobe failed on {}: {stderr}", path.display())]
    Tool { path: PathBuf, stderr: String },

    #[error("no decodable stream in {}", .0.display())]
    NoStream(PathBuf),

    #[error("ffprobe timed out after {secs}s on {}", path.display())]
    Timeout { path: PathBuf, secs: u64 },

    #[error("unreadable probe output for {}: {reason}", path.display())]
    Unreadable { path: PathBuf, reason: String },
}

/// Sub-kind of a narration/text provider failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// HTTP 429 or an equivalent provider throttle
    RateLimited,
    /// Missing or rejected credentials
    Auth,
    /// Any other non-success HTTP status
    Status(u16),
    /// Connection, TLS or body transfer failure
    Transport,
    /// The call exceeded its timeout
    Timeout,
    /// Success status with an unusable payload
    InvalidResponse,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited => f.write_str("rate limited"),
            Self::Auth => f.write_str("authentication failed"),
            Self::Status(code) => write!(f, "HTTP {code}"),
            Self::Transport => f.write_str("transport error"),
            Self::Timeout => f.write_str("timed out"),
            Self::InvalidResponse => f.write_str("invalid response"),
        }
    }
}

/// Remote narration (or text) call failure
#[derive(Error, Debug, Clone)]
#[error("{provider} {kind}: {message}")]
pub struct ProviderError {
    pub provider: String,
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(provider: impl Into<String>, kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            kind,
            message: message.into(),
        }
    }

    /// Map an HTTP status to the matching sub-kind
    #[must_use]
    pub fn kind_for_status(status: u16) -> ProviderErrorKind {
        match status {
            429 => ProviderErrorKind::RateLimited,
            401 | 403 => ProviderErrorKind::Auth,
            other => ProviderErrorKind::Status(other),
        }
    }

    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        self.kind == ProviderErrorKind::RateLimited
    }
}

/// Invariant violation while resolving durations and offsets
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TimelineError {
    #[error("timeline has no segments")]
    Empty,

    #[error("segment {index}: duration {duration}s must be positive and finite")]
    InvalidDuration { index: usize, duration: f64 },

    #[error("segment {index}: duration {duration}s is shorter than one frame at {fps}fps")]
    SubFrame { index: usize, duration: f64, fps: u32 },

    #[error("segment {index}: start offset {start}s does not follow the previous segment")]
    OffsetOrder { index: usize, start: f64 },

    #[error("segment {index}: {reason}")]
    InvalidSource { index: usize, reason: String },

    #[error("segment {index}: padding {padding}s must be non-negative and finite")]
    InvalidPadding { index: usize, padding: f64 },
}

impl TimelineError {
    /// Index of the offending segment, if the error names one
    #[must_use]
    pub fn segment_index(&self) -> Option<usize> {
        match self {
            Self::Empty => None,
            Self::InvalidDuration { index, .. }
            | Self::SubFrame { index, .. }
            | Self::OffsetOrder { index, .. }
            | Self::InvalidSource { index, .. }
            | Self::InvalidPadding { index, .. } => Some(*index),
        }
    }
}

/// A segment failed to rasterize or encode
#[derive(Error, Debug, Clone)]
pub enum RenderError {
    #[error("segment {index}: invalid visual spec: {reason}")]
    Config { index: usize, reason: String },

    #[error("segment {index}: ffmpeg failed: {stderr}")]
    Tool { index: usize, stderr: String },

    #[error("segment {index}: render timed out after {secs}s")]
    Timeout { index: usize, secs: u64 },

    #[error("segment {index}: {message}")]
    Io { index: usize, message: String },
}

impl RenderError {
    #[must_use]
    pub fn segment_index(&self) -> usize {
        match self {
            Self::Config { index, .. }
            | Self::Tool { index, .. }
            | Self::Timeout { index, .. }
            | Self::Io { index, .. } => *index,
        }
    }

    /// Tool diagnostics carried by the error, empty when none
    #[must_use]
    pub fn stderr(&self) -> &str {
        match self {
            Self::Tool { stderr, .. } => stderr,
            _ => "",
        }
    }
}

/// Named step of a compositor run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeStep {
    Prepare,
    Render,
    Concat,
    Mix,
    Mux,
    Verify,
}

impl ComposeStep {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prepare => "prepare",
            Self::Render => "render",
            Self::Concat => "concat",
            Self::Mix => "mix",
            Self::Mux => "mux",
            Self::Verify => "verify",
        }
    }
}

impl fmt::Display for ComposeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Concatenation, mixing or muxing failed
#[derive(Error, Debug, Clone)]
#[error("compose step '{step}' failed: {message}")]
pub struct CompositeError {
    pub step: ComposeStep,
    pub message: String,
    /// Last external tool's stderr, empty when the failure was not a tool's
    pub stderr: String,
}

impl CompositeError {
    pub fn new(step: ComposeStep, message: impl Into<String>) -> Self {
        Self {
            step,
            message: message.into(),
            stderr: String::new(),
        }
    }

    #[must_use]
    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self
    }
}

impl From<RenderError> for CompositeError {
    fn from(err: RenderError) -> Self {
        let stderr = err.stderr().to_string();
        Self {
            step: ComposeStep::Render,
            message: err.to_string(),
            stderr,
        }
    }
}

/// A single destination write failed
#[derive(Error, Debug, Clone)]
#[error("publish to {} failed: {message}", destination.display())]
pub struct PublishError {
    pub destination: PathBuf,
    pub message: String,
}

/// Any pipeline failure, tagged with the step that raised it
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Some narrated segments failed while others resolved
    #[error("narration failed for segment(s) {segments:?}: {source}")]
    NarrationDropped { segments: Vec<usize>, source: ProviderError },

    #[error(transparent)]
    Timeline(#[from] TimelineError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Composite(#[from] CompositeError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("missing credentials: {0}")]
    MissingCredentials(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Pipeline step name reported in batch summaries
    #[must_use]
    pub fn step(&self) -> &'static str {
        match self {
            Self::Probe(_) => "probe",
            Self::Provider(_) | Self::NarrationDropped { .. } => "narration",
            Self::Timeline(_) => "timeline",
            Self::Render(_) => "render",
            Self::Composite(e) => e.step.as_str(),
            Self::Publish(_) => "publish",
            Self::Config(_) | Self::Json(_) => "config",
            Self::MissingCredentials(_) => "credentials",
            Self::Io(_) => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
