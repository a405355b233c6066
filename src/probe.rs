use std::path::Path;
use std::process::Command;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;

/// Source-video metadata read once per session, before any decode work.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoMetadata {
    pub width: u32,
    pub height: u32,
    /// Native frame rate of the video stream.
    pub fps: f64,
    /// Declared frame count, when the container carries one. Progress
    /// reporting only; the decode loop never relies on it.
    pub frame_count: Option<u64>,
    pub has_audio: bool,
}

#[derive(Debug, Deserialize)]
struct ProbeDocument {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    nb_frames: Option<String>,
}

/// Reads stream metadata via `ffprobe -print_format json`.
pub fn probe_video(path: &Path) -> Result<VideoMetadata> {
    let output = Command::new("ffprobe")
        .arg("-hide_banner")
        .arg("-loglevel")
        .arg("error")
        .arg("-print_format")
        .arg("json")
        .arg("-show_streams")
        .arg(path)
        .output()
        .context("failed to run ffprobe (is ffmpeg installed?)")?;

    if !output.status.success() {
        bail!(
            "ffprobe failed for {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    let document: ProbeDocument = serde_json::from_slice(&output.stdout)
        .with_context(|| format!("failed to parse ffprobe output for {}", path.display()))?;
    metadata_from_streams(&document, path)
}

fn metadata_from_streams(document: &ProbeDocument, path: &Path) -> Result<VideoMetadata> {
    let video = document
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| anyhow!("no video stream in {}", path.display()))?;

    let width = video
        .width
        .ok_or_else(|| anyhow!("video stream in {} has no width", path.display()))?;
    let height = video
        .height
        .ok_or_else(|| anyhow!("video stream in {} has no height", path.display()))?;
    if width == 0 || height == 0 {
        bail!("video stream in {} has zero dimensions", path.display());
    }

    let rate = video
        .avg_frame_rate
        .as_deref()
        .filter(|r| *r != "0/0")
        .or(video.r_frame_rate.as_deref())
        .ok_or_else(|| anyhow!("video stream in {} has no frame rate", path.display()))?;
    let fps = parse_frame_rate(rate)?;

    let frame_count = video
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<u64>().ok());
    let has_audio = document
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));

    Ok(VideoMetadata {
        width,
        height,
        fps,
        frame_count,
        has_audio,
    })
}

/// Parses ffprobe's rational frame rates ("30000/1001", "25/1", "24").
fn parse_frame_rate(raw: &str) -> Result<f64> {
    let raw = raw.trim();
    let value = match raw.split_once('/') {
        Some((numerator, denominator)) => {
            let numerator: f64 = numerator
                .parse()
                .map_err(|_| anyhow!("invalid frame rate '{raw}'"))?;
            let denominator: f64 = denominator
                .parse()
                .map_err(|_| anyhow!("invalid frame rate '{raw}'"))?;
            if denominator == 0.0 {
                bail!("invalid frame rate '{raw}': zero denominator");
            }
            numerator / denominator
        }
        None => raw
            .parse()
            .map_err(|_| anyhow!("invalid frame rate '{raw}'"))?,
    };
    if !value.is_finite() || value <= 0.0 {
        bail!("invalid frame rate '{raw}': must be positive");
    }
    Ok(value)
}

/// The decimation formula is only defined for `fps_out <= fps_in`; requesting
/// an upsample is rejected here rather than producing undefined output.
pub fn validate_rates(fps_in: f64, fps_out: u32) -> Result<()> {
    if fps_out == 0 {
        bail!("output frame rate must be at least 1");
    }
    if f64::from(fps_out) > fps_in {
        bail!(
            "requested output rate {fps_out} fps exceeds the source rate {fps_in:.3} fps; \
             upsampling is not supported"
        );
    }
    Ok(())
}
