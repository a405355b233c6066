use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;

use crate::ansi;
use crate::decode::FramePipe;
use crate::probe::VideoMetadata;

/// Monotonic frame-rate decimation. Both counters start one before zero so
/// the very first input frame is always admitted; after that an input frame
/// is kept only when its ideal output slot has moved past the last emitted
/// one. Tolerant of source rates that are not an integer multiple of the
/// output rate.
pub(crate) struct Decimator {
    fps_in: f64,
    fps_out: f64,
    index_in: i64,
    index_out: i64,
}

impl Decimator {
    pub(crate) fn new(fps_in: f64, fps_out: f64) -> Self {
        Self {
            fps_in,
            fps_out,
            index_in: -1,
            index_out: -1,
        }
    }

    /// Advances the input counter and reports whether this frame is retained.
    pub(crate) fn admit(&mut self) -> bool {
        self.index_in += 1;
        let due = (self.index_in as f64 / self.fps_in * self.fps_out).floor() as i64;
        if due > self.index_out {
            self.index_out += 1;
            true
        } else {
            false
        }
    }
}

/// Decodes `path` and returns one character-art string per retained frame,
/// decimated from the source rate down to `target_fps` and sized to
/// `columns`.
///
/// A decode failure mid-stream ends the loop and returns the frames
/// accumulated so far: a truncated playback beats no playback. The
/// `interrupted` flag is checked once per decoded frame, so ctrl-c lands
/// within a frame's worth of work; the caller decides what becomes of the
/// partial result.
pub fn transcode(
    path: &Path,
    metadata: &VideoMetadata,
    target_fps: u32,
    columns: u16,
    interrupted: &AtomicBool,
) -> Result<Vec<String>> {
    let (width, height) = ansi::render_dimensions(metadata.width, metadata.height, columns);

    #[cfg(feature = "sidecar_ffmpeg")]
    let pipe = match FramePipe::spawn_sidecar(path, width, height) {
        Ok(pipe) => pipe,
        Err(error) => {
            eprintln!("[tvp] sidecar decoder unavailable ({error:#}); using system ffmpeg");
            FramePipe::spawn(path, width, height)?
        }
    };
    #[cfg(not(feature = "sidecar_ffmpeg"))]
    let pipe = FramePipe::spawn(path, width, height)?;

    let expected = metadata
        .frame_count
        .map(|total| decimated_count(total, metadata.fps, target_fps));
    let mut decimator = Decimator::new(metadata.fps, f64::from(target_fps));
    let mut frames: Vec<String> = Vec::new();

    while let Some(raw) = pipe.read_frame() {
        if interrupted.load(Ordering::SeqCst) {
            eprintln!(
                "[tvp] transcode interrupted after {} frame(s)",
                frames.len()
            );
            break;
        }
        // Dropped frames skip the conversion entirely; the escape-sequence
        // formatting is the expensive step at terminal resolutions.
        if !decimator.admit() {
            continue;
        }
        match ansi::frame_to_ansi(&raw, width, height) {
            Ok(frame) => frames.push(frame),
            Err(error) => {
                eprintln!("[tvp] stopping transcode on malformed frame: {error:#}");
                break;
            }
        }

        if frames.len() % (target_fps as usize).max(1) == 0 {
            match expected {
                Some(total) => eprintln!("[tvp] transcoded {}/{total} frame(s)", frames.len()),
                None => eprintln!("[tvp] transcoded {} frame(s)", frames.len()),
            }
        }
    }

    if let Err(error) = pipe.finish() {
        eprintln!(
            "[tvp] decode ended early ({error:#}); keeping {} frame(s)",
            frames.len()
        );
    }

    Ok(frames)
}

fn decimated_count(total_input: u64, fps_in: f64, fps_out: u32) -> u64 {
    let mut decimator = Decimator::new(fps_in, f64::from(fps_out));
    (0..total_input).filter(|_| decimator.admit()).count() as u64
}
