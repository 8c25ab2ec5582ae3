//! Run configuration loaded from `~/.config/clipwright/config.toml`.
//!
//! A [`RunConfig`] is built once per invocation and threaded through the
//! pipeline explicitly. Nothing downstream reads ambient globals.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audio::OverflowPolicy;
use crate::error::{Error, Result};
use crate::narration::VoiceProfile;

/// Output canvas in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasSize {
    pub width: u32,
    pub height: u32,
}

impl CanvasSize {
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Portrait 9:16, the short-video default
    #[must_use]
    pub fn portrait() -> Self {
        Self::new(1080, 1920)
    }

    #[must_use]
    pub fn landscape() -> Self {
        Self::new(1920, 1080)
    }
}

impl Default for CanvasSize {
    fn default() -> Self {
        Self::portrait()
    }
}

/// Video encoder settings shared by every segment render
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoEncoding {
    pub codec: String,
    pub preset: String,
    pub crf: u8,
    pub pixel_format: String,
}

impl Default for VideoEncoding {
    fn default() -> Self {
        Self {
            codec: "libx264".to_string(),
            preset: "veryfast".to_string(),
            crf: 20,
            pixel_format: "yuv420p".to_string(),
        }
    }
}

/// Audio settings for the mixed track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioEncoding {
    pub codec: String,
    pub bitrate: String,
    pub sample_rate: u32,
}

impl Default for AudioEncoding {
    fn default() -> Self {
        Self {
            codec: "aac".to_string(),
            bitrate: "192k".to_string(),
            sample_rate: 48_000,
        }
    }
}

/// Upper bounds for every external call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub probe_secs: u64,
    pub render_secs: u64,
    pub concat_secs: u64,
    pub mix_secs: u64,
    pub mux_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            probe_secs: 30,
            render_secs: 300,
            concat_secs: 300,
            mix_secs: 120,
            mux_secs: 300,
        }
    }
}

impl Timeouts {
    #[must_use]
    pub fn probe(&self) -> Duration {
        Duration::from_secs(self.probe_secs)
    }

    #[must_use]
    pub fn render(&self) -> Duration {
        Duration::from_secs(self.render_secs)
    }

    #[must_use]
    pub fn concat(&self) -> Duration {
        Duration::from_secs(self.concat_secs)
    }

    #[must_use]
    pub fn mix(&self) -> Duration {
        Duration::from_secs(self.mix_secs)
    }

    #[must_use]
    pub fn mux(&self) -> Duration {
        Duration::from_secs(self.mux_secs)
    }
}

/// Narration provider settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrationConfig {
    /// Base URL of the text-to-speech API
    pub endpoint: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Fixed delay between consecutive provider calls
    pub cooldown_ms: u64,
    pub timeout_secs: u64,
    /// Voice used when a job does not name one
    pub voice: VoiceProfile,
    /// Cross-run cache of synthesized audio, keyed by content hash
    pub cache_dir: Option<PathBuf>,
}

impl Default for NarrationConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.elevenlabs.io".to_string(),
            api_key_env: "ELEVENLABS_API_KEY".to_string(),
            cooldown_ms: 1500,
            timeout_secs: 120,
            voice: VoiceProfile::default(),
            cache_dir: dirs::cache_dir().map(|d| d.join("clipwright").join("narration")),
        }
    }
}

impl NarrationConfig {
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Per-invocation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub frame_rate: u32,
    pub canvas: CanvasSize,
    /// Fill around media clips that do not cover the canvas; cards paint their own background
    pub pad_color: String,
    pub video: VideoEncoding,
    pub audio: AudioEncoding,
    /// Parent of every per-run temp directory
    pub temp_root: PathBuf,
    /// Where finished artifacts land before publishing
    pub output_root: PathBuf,
    /// Append-only manifest; defaults to `<output_root>/manifest.jsonl`
    pub manifest_path: Option<PathBuf>,
    /// Maximum segment renders in flight
    pub render_concurrency: usize,
    pub timeouts: Timeouts,
    pub narration: NarrationConfig,
    /// Policy for music tracks that run past the video
    pub overflow: OverflowPolicy,
    /// Probe the muxed output and fail if it drifts by more than a frame
    pub verify_duration: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: find_tool("ffmpeg"),
            ffprobe_path: find_tool("ffprobe"),
            frame_rate: 30,
            canvas: CanvasSize::default(),
            pad_color: "#000000".to_string(),
            video: VideoEncoding::default(),
            audio: AudioEncoding::default(),
            temp_root: std::env::temp_dir().join("clipwright"),
            output_root: PathBuf::from("output"),
            manifest_path: None,
            render_concurrency: 2,
            timeouts: Timeouts::default(),
            narration: NarrationConfig::default(),
            overflow: OverflowPolicy::default(),
            verify_duration: true,
        }
    }
}

impl RunConfig {
    /// Load from an explicit path, the user config file, or defaults.
    ///
    /// A missing user config file is not an error; an explicit path that
    /// cannot be read is.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let (path, required) = match explicit {
            Some(p) => (p.to_path_buf(), true),
            None => (config_path(), false),
        };

        if !path.exists() {
            if required {
                return Err(Error::Config(format!("config file not found: {}", path.display())));
            }
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("invalid TOML in {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.frame_rate == 0 {
            return Err(Error::Config("frame_rate must be non-zero".to_string()));
        }
        if self.canvas.width == 0 || self.canvas.height == 0 {
            return Err(Error::Config("canvas width/height must be non-zero".to_string()));
        }
        if self.canvas.width % 2 != 0 || self.canvas.height % 2 != 0 {
            // yuv420p needs even dimensions
            return Err(Error::Config("canvas width/height must be even".to_string()));
        }
        if self.render_concurrency == 0 {
            return Err(Error::Config("render_concurrency must be at least 1".to_string()));
        }
        Ok(())
    }

    /// One frame at the configured rate, in seconds
    #[must_use]
    pub fn frame_duration(&self) -> f64 {
        1.0 / f64::from(self.frame_rate)
    }

    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.manifest_path
            .clone()
            .unwrap_or_else(|| self.output_root.join("manifest.jsonl"))
    }

    /// Redirect outputs (and the default manifest) to another root
    #[must_use]
    pub fn with_output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.output_root = root.into();
        self
    }

    #[must_use]
    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = root.into();
        self
    }

    #[must_use]
    pub fn with_tools(mut self, ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        self.ffmpeg_path = ffmpeg.into();
        self.ffprobe_path = ffprobe.into();
        self
    }
}

/// API keys read once at startup
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub narration_api_key: Option<String>,
}

impl Credentials {
    #[must_use]
    pub fn from_env(config: &NarrationConfig) -> Self {
        Self {
            narration_api_key: std::env::var(&config.api_key_env)
                .ok()
                .filter(|k| !k.trim().is_empty()),
        }
    }

    /// Fail unless narration can run at all
    pub fn require_narration(&self, config: &NarrationConfig) -> Result<&str> {
        self.narration_api_key.as_deref().ok_or_else(|| {
            Error::MissingCredentials(format!(
                "{} is not set; narrated segments cannot be produced",
                config.api_key_env
            ))
        })
    }
}

/// Return the path to the user config file.
fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("clipwright")
        .join("config.toml")
}

fn find_tool(name: &str) -> String {
    which::which(name).map_or_else(|_| name.to_string(), |p| p.to_string_lossy().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_config_uses_defaults() {
        let config: RunConfig = toml::from_str("").unwrap();
        assert_eq!(config.frame_rate, 30);
        assert_eq!(config.canvas, CanvasSize::portrait());
        assert_eq!(config.video.codec, "libx264");
        assert!(config.verify_duration);
    }

    #[test]
    fn parse_partial_config() {
        let toml_str = r#"
frame_rate = 25
render_concurrency = 4
overflow = "reject"

[canvas]
width = 1920
height = 1080

[narration]
cooldown_ms = 3000
api_key_env = "TTS_KEY"
"#;
        let config: RunConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.frame_rate, 25);
        assert_eq!(config.canvas, CanvasSize::landscape());
        assert_eq!(config.overflow, OverflowPolicy::Reject);
        assert_eq!(config.narration.cooldown(), Duration::from_millis(3000));
        assert_eq!(config.narration.api_key_env, "TTS_KEY");
        // untouched nested defaults survive
        assert_eq!(config.narration.endpoint, "https://api.elevenlabs.io");
        assert_eq!(config.timeouts.probe_secs, 30);
    }

    #[test]
    fn validate_rejects_odd_canvas() {
        let mut config = RunConfig::default();
        config.canvas = CanvasSize::new(1081, 1920);
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_frame_rate() {
        let config = RunConfig {
            frame_rate: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn manifest_defaults_under_output_root() {
        let config = RunConfig::default().with_output_root("/srv/out");
        assert_eq!(config.manifest_path(), PathBuf::from("/srv/out/manifest.jsonl"));
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        let err = RunConfig::load(Some(Path::new("/nonexistent/clipwright.toml"))).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }

    #[test]
    fn missing_credentials_fail_with_env_name() {
        let config = NarrationConfig {
            api_key_env: "CLIPWRIGHT_TEST_UNSET_KEY".to_string(),
            ..Default::default()
        };
        let creds = Credentials::default();
        let err = creds.require_narration(&config).unwrap_err();
        assert!(err.to_string().contains("CLIPWRIGHT_TEST_UNSET_KEY"));
    }
}
