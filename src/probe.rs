//! Media duration probing via ffprobe

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::ProbeError;
use crate::process::{ToolCommand, ToolFailure};

/// Anything that can report a media file's duration
#[async_trait]
pub trait MediaProbe: Send + Sync {
    /// Duration in seconds of the longest decodable stream
    async fn duration(&self, path: &Path) -> Result<f64, ProbeError>;
}

/// Stream summary of a media file
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    pub duration: f64,
    pub has_video: bool,
    pub has_audio: bool,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// First video stream's codec (`h264`)
    pub video_codec: Option<String>,
    pub pixel_format: Option<String>,
    /// First video stream's rate as ffprobe reports it (`30/1`)
    pub frame_rate: Option<String>,
}

/// ffprobe-backed probe
#[derive(Debug, Clone)]
pub struct Ffprobe {
    ffprobe_path: String,
    timeout: Duration,
}

impl Ffprobe {
    pub fn new(ffprobe_path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
            timeout,
        }
    }

    /// Probe streams and duration
    pub async fn inspect(&self, path: &Path) -> Result<MediaInfo, ProbeError> {
        if !path.is_file() {
            return Err(ProbeError::Missing(path.to_path_buf()));
        }

        let output = ToolCommand::new(&self.ffprobe_path, self.timeout)
            .args([
                "-v",
                "error",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .args([path.to_string_lossy().to_string()])
            .run()
            .await
            .map_err(|failure| match failure {
                ToolFailure::Timeout(limit) => ProbeError::Timeout {
                    path: path.to_path_buf(),
                    secs: limit.as_secs(),
                },
                other => ProbeError::Tool {
                    path: path.to_path_buf(),
                    stderr: other.diagnostics(),
                },
            })?;

        parse_probe_output(path, &output.stdout)
    }
}

#[async_trait]
impl MediaProbe for Ffprobe {
    async fn duration(&self, path: &Path) -> Result<f64, ProbeError> {
        Ok(self.inspect(path).await?.duration)
    }
}

fn parse_probe_output(path: &Path, stdout: &[u8]) -> Result<MediaInfo, ProbeError> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout).map_err(|e| ProbeError::Unreadable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let decodable: Vec<&FfprobeStream> = probe
        .streams
        .iter()
        .filter(|s| matches!(s.codec_type.as_deref(), Some("video" | "audio")))
        .collect();

    if decodable.is_empty() {
        return Err(ProbeError::NoStream(path.to_path_buf()));
    }

    // Container duration first; some muxers only report per-stream durations
    let duration = probe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .or_else(|| {
            decodable
                .iter()
                .filter_map(|s| s.duration.as_deref()?.parse::<f64>().ok())
                .reduce(f64::max)
        })
        .filter(|d| d.is_finite() && *d >= 0.0)
        .ok_or_else(|| ProbeError::Unreadable {
            path: path.to_path_buf(),
            reason: "no duration reported".to_string(),
        })?;

    let video = decodable.iter().find(|s| s.codec_type.as_deref() == Some("video"));

    Ok(MediaInfo {
        duration,
        has_video: video.is_some(),
        has_audio: decodable.iter().any(|s| s.codec_type.as_deref() == Some("audio")),
        width: video.and_then(|v| v.width),
        height: video.and_then(|v| v.height),
        video_codec: video.and_then(|v| v.codec_name.clone()),
        pixel_format: video.and_then(|v| v.pix_fmt.clone()),
        frame_rate: video.and_then(|v| v.r_frame_rate.clone()),
    })
}

/// `FFprobe` JSON output structure
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    pix_fmt: Option<String>,
    r_frame_rate: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const VIDEO_JSON: &str = r#"{
        "streams": [
            {"codec_type": "video", "codec_name": "h264", "pix_fmt": "yuv420p", "r_frame_rate": "30/1",
             "width": 1080, "height": 1920, "duration": "9.000000"},
            {"codec_type": "audio", "duration": "9.010000"}
        ],
        "format": {"duration": "9.010000"}
    }"#;

    #[test]
    fn test_parse_format_duration() {
        let info = parse_probe_output(Path::new("a.mp4"), VIDEO_JSON.as_bytes()).unwrap();
        assert!((info.duration - 9.01).abs() < 1e-9);
        assert!(info.has_video);
        assert!(info.has_audio);
        assert_eq!(info.width, Some(1080));
        assert_eq!(info.video_codec.as_deref(), Some("h264"));
        assert_eq!(info.pixel_format.as_deref(), Some("yuv420p"));
        assert_eq!(info.frame_rate.as_deref(), Some("30/1"));
    }

    #[test]
    fn test_parse_falls_back_to_stream_duration() {
        let json = r#"{"streams": [{"codec_type": "audio", "duration": "7.2"}], "format": {}}"#;
        let info = parse_probe_output(Path::new("n.mp3"), json.as_bytes()).unwrap();
        assert!((info.duration - 7.2).abs() < 1e-9);
        assert!(!info.has_video);
    }

    #[test]
    fn test_no_decodable_stream() {
        let json = r#"{"streams": [{"codec_type": "data"}], "format": {"duration": "1.0"}}"#;
        let err = parse_probe_output(Path::new("x.bin"), json.as_bytes()).unwrap_err();
        assert!(matches!(err, ProbeError::NoStream(_)));
    }

    #[test]
    fn test_garbage_output_is_unreadable() {
        let err = parse_probe_output(Path::new("x"), b"not json").unwrap_err();
        assert!(matches!(err, ProbeError::Unreadable { .. }));
    }

    #[test]
    fn test_missing_file() {
        let probe = Ffprobe::new("ffprobe", Duration::from_secs(5));
        let result = tokio_test::block_on(probe.duration(Path::new("/nonexistent/clip.mp4")));
        assert!(matches!(result, Err(ProbeError::Missing(_))));
    }
}
