//! FFprobe source information.

use serde::{Deserialize, Serialize};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use sentinel_models::SourceId;

use crate::error::{MediaError, MediaResult};

/// Native rate assumed when a source does not report a usable frame rate.
pub const FALLBACK_FPS: f64 = 30.0;

/// Video source information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Native frame rate, if the container reports one
    pub fps: Option<f64>,
    /// Video codec
    pub codec: String,
}

impl SourceInfo {
    pub fn new(width: u32, height: u32, fps: Option<f64>) -> Self {
        Self {
            width,
            height,
            fps,
            codec: String::new(),
        }
    }

    /// Native frame rate, falling back to 30 when unknown or non-positive.
    pub fn effective_fps(&self) -> f64 {
        self.fps
            .filter(|fps| fps.is_finite() && *fps > 0.0)
            .unwrap_or(FALLBACK_FPS)
    }

    /// Bytes in one BGR24 frame.
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
}

/// FFmpeg/FFprobe input arguments for a source (everything up to and
/// including the input URL).
pub fn input_args(source: &SourceId) -> Vec<String> {
    match source {
        SourceId::File(path) => vec!["-i".to_string(), path.to_string_lossy().to_string()],
        SourceId::Url(url) => {
            let mut args = Vec::new();
            if url.scheme() == "rtsp" {
                args.push("-rtsp_transport".to_string());
                args.push("tcp".to_string());
            }
            args.push("-i".to_string());
            args.push(url.to_string());
            args
        }
        SourceId::Device(index) => vec![
            "-f".to_string(),
            "v4l2".to_string(),
            "-i".to_string(),
            format!("/dev/video{}", index),
        ],
    }
}

/// Probe a video source for geometry and native frame rate.
///
/// Fails with [`MediaError::SourceUnavailable`] when the source cannot be
/// read. Missing files are rejected without spawning FFprobe.
pub async fn probe_source(source: &SourceId) -> MediaResult<SourceInfo> {
    if let SourceId::File(path) = source {
        if !path.exists() {
            return Err(MediaError::source_unavailable(source, "file not found"));
        }
    }

    // Check FFprobe exists
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)?;

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_streams",
            "-select_streams",
            "v:0",
        ])
        .args(input_args(source))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::source_unavailable(
            source,
            format!(
                "ffprobe exited with {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        ));
    }

    let info = parse_probe_output(&output.stdout)
        .map_err(|e| MediaError::source_unavailable(source, e.to_string()))?;

    debug!(
        source = %source,
        width = info.width,
        height = info.height,
        fps = ?info.fps,
        codec = %info.codec,
        "Probed video source"
    );

    Ok(info)
}

/// Parse FFprobe JSON into source information.
fn parse_probe_output(stdout: &[u8]) -> MediaResult<SourceInfo> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)?;

    // Find video stream
    let video_stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or_else(|| MediaError::FfprobeFailed {
            message: "No video stream found".to_string(),
            stderr: None,
        })?;

    let width = video_stream.width.unwrap_or(0);
    let height = video_stream.height.unwrap_or(0);
    if width == 0 || height == 0 {
        return Err(MediaError::FfprobeFailed {
            message: format!("Video stream has no geometry ({}x{})", width, height),
            stderr: None,
        });
    }

    // avg_frame_rate is "0/0" for many live streams; fall through to r_frame_rate
    let fps = [&video_stream.avg_frame_rate, &video_stream.r_frame_rate]
        .into_iter()
        .flatten()
        .filter_map(|r| parse_frame_rate(r))
        .find(|fps| *fps > 0.0);

    Ok(SourceInfo {
        width,
        height,
        fps,
        codec: video_stream.codec_name.clone().unwrap_or_default(),
    })
}

/// Parse frame rate string (e.g., "30/1" or "29.97").
fn parse_frame_rate(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den > 0.0 {
            return Some(num / den);
        }
        return None;
    }
    s.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_rate() {
        assert!((parse_frame_rate("30/1").unwrap() - 30.0).abs() < 0.01);
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert!((parse_frame_rate("29.97").unwrap() - 29.97).abs() < 0.01);
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("n/a"), None);
    }

    #[test]
    fn test_parse_probe_output_prefers_avg_rate() {
        let json = br#"{"streams":[
            {"codec_type":"audio","codec_name":"aac"},
            {"codec_type":"video","codec_name":"h264","width":640,"height":360,
             "r_frame_rate":"30/1","avg_frame_rate":"25/1"}
        ]}"#;
        let info = parse_probe_output(json).unwrap();
        assert_eq!((info.width, info.height), (640, 360));
        assert_eq!(info.fps, Some(25.0));
        assert_eq!(info.codec, "h264");
    }

    #[test]
    fn test_parse_probe_output_live_stream_rate() {
        let json = br#"{"streams":[{"codec_type":"video","width":320,"height":240,
            "r_frame_rate":"15/1","avg_frame_rate":"0/0"}]}"#;
        let info = parse_probe_output(json).unwrap();
        assert_eq!(info.fps, Some(15.0));
    }

    #[test]
    fn test_parse_probe_output_rejects_audio_only() {
        let json = br#"{"streams":[{"codec_type":"audio"}]}"#;
        assert!(parse_probe_output(json).is_err());
    }

    #[test]
    fn test_effective_fps_fallback() {
        assert_eq!(SourceInfo::new(1, 1, None).effective_fps(), FALLBACK_FPS);
        assert_eq!(SourceInfo::new(1, 1, Some(0.0)).effective_fps(), FALLBACK_FPS);
        assert_eq!(SourceInfo::new(1, 1, Some(-5.0)).effective_fps(), FALLBACK_FPS);
        assert_eq!(SourceInfo::new(1, 1, Some(25.0)).effective_fps(), 25.0);
    }

    #[test]
    fn test_input_args_per_source_kind() {
        let rtsp: SourceId = "rtsp://cam/1".parse().unwrap();
        assert_eq!(
            input_args(&rtsp),
            vec!["-rtsp_transport", "tcp", "-i", "rtsp://cam/1"]
        );
        assert_eq!(
            input_args(&SourceId::Device(2)),
            vec!["-f", "v4l2", "-i", "/dev/video2"]
        );
        assert_eq!(input_args(&SourceId::file("a.mp4")), vec!["-i", "a.mp4"]);
    }

    #[tokio::test]
    async fn test_missing_file_is_unavailable() {
        let err = probe_source(&SourceId::file("/nonexistent/clip.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::SourceUnavailable { .. }));
    }
}
