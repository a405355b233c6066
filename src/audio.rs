use std::path::Path;
use std::process::{Child, Command, Stdio};

use anyhow::{bail, Context, Result};

/// Extracts the audio track of `video` to `output` as mp3, via system
/// ffmpeg. Runs once per transcode; playback reuses the cached file.
pub fn extract_audio(video: &Path, output: &Path) -> Result<()> {
    let status = Command::new("ffmpeg")
        .arg("-hide_banner")
        .arg("-loglevel")
        .arg("error")
        .arg("-y")
        .arg("-i")
        .arg(video)
        .arg("-vn")
        .arg("-acodec")
        .arg("libmp3lame")
        .arg(output)
        .stdin(Stdio::null())
        .status()
        .context("failed to run ffmpeg for audio extraction")?;

    if !status.success() {
        bail!(
            "ffmpeg failed to extract audio from {} to {}",
            video.display(),
            output.display()
        );
    }
    Ok(())
}

/// A fire-and-forget audio child process (`ffplay -nodisp -autoexit`).
///
/// No position feedback flows back to the frame loop; audio and video are
/// reconciled only through wall-clock drift correction. Dropping the handle
/// kills the child, so interrupting playback silences audio too.
pub struct AudioPlayback {
    child: Child,
}

impl AudioPlayback {
    pub fn spawn(audio_path: &Path) -> Result<Self> {
        let child = Command::new("ffplay")
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-nodisp")
            .arg("-autoexit")
            .arg(audio_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to start audio playback of {}", audio_path.display()))?;
        Ok(Self { child })
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
