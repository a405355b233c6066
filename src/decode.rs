use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context, Result};

/// A stream of raw `rgb24` frames decoded from a video file, already scaled
/// to the terminal's render resolution.
///
/// A system `ffmpeg` process writes packed frames to a pipe; a named reader
/// thread slices the pipe into whole frames and hands them over a bounded
/// channel. The stream ends on EOF or on a decode error; the caller decides
/// what to do with whatever frames arrived before that (the transcoder keeps
/// them).
pub struct FramePipe {
    receiver: Option<mpsc::Receiver<Vec<u8>>>,
    worker: Option<JoinHandle<Result<()>>>,
    child: Option<Child>,
}

impl FramePipe {
    pub fn spawn(input_path: &Path, width: u32, height: u32) -> Result<Self> {
        let size = format!("{}x{}", width, height);

        let mut child = Command::new("ffmpeg")
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(input_path)
            .arg("-f")
            .arg("rawvideo")
            .arg("-pix_fmt")
            .arg("rgb24")
            .arg("-s")
            .arg(size)
            .arg("-sws_flags")
            .arg("area")
            .arg("-an")
            .arg("-")
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .stdin(Stdio::null())
            .spawn()
            .context("failed to spawn ffmpeg decoder (is ffmpeg installed?)")?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("failed to capture ffmpeg stdout"))?;
        let frame_size = (width * height * 3) as usize;
        let (sender, receiver) = mpsc::sync_channel::<Vec<u8>>(4);

        let worker = thread::Builder::new()
            .name("tvp-ffmpeg-decoder".to_owned())
            .spawn(move || loop {
                let mut buffer = vec![0u8; frame_size];
                match stdout.read_exact(&mut buffer) {
                    Ok(()) => {
                        if sender.send(buffer).is_err() {
                            break Ok(());
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break Ok(()),
                    Err(e) => break Err(anyhow!("failed to read from ffmpeg: {e}")),
                }
            })
            .context("failed to spawn ffmpeg reader thread")?;

        Ok(Self {
            receiver: Some(receiver),
            worker: Some(worker),
            child: Some(child),
        })
    }

    /// Sidecar backend: same frame stream, but through `ffmpeg-sidecar`'s
    /// managed binary instead of whatever `ffmpeg` is on PATH.
    #[cfg(feature = "sidecar_ffmpeg")]
    pub fn spawn_sidecar(input_path: &Path, width: u32, height: u32) -> Result<Self> {
        use ffmpeg_sidecar::command::FfmpegCommand;

        let scale = format!("scale={}:{}", width, height);
        let iter = FfmpegCommand::new()
            .arg("-hide_banner")
            .input(input_path.to_string_lossy())
            .args(["-vf", &scale, "-sws_flags", "area", "-an"])
            .rawvideo()
            .spawn()
            .context("failed to spawn sidecar ffmpeg decoder")?
            .iter()
            .context("failed to read sidecar ffmpeg events")?;
        let (sender, receiver) = mpsc::sync_channel::<Vec<u8>>(4);

        let worker = thread::Builder::new()
            .name("tvp-sidecar-decoder".to_owned())
            .spawn(move || {
                for frame in iter.filter_frames() {
                    if sender.send(frame.data).is_err() {
                        break;
                    }
                }
                Ok(())
            })
            .context("failed to spawn sidecar reader thread")?;

        Ok(Self {
            receiver: Some(receiver),
            worker: Some(worker),
            child: None,
        })
    }

    /// Next decoded frame, or `None` once the stream has ended for any
    /// reason. Blocks while ffmpeg is still producing.
    pub fn read_frame(&self) -> Option<Vec<u8>> {
        self.receiver.as_ref().and_then(|r| r.recv().ok())
    }

    /// Tears the pipe down and reports how the stream ended. An `Err` here
    /// means the decode stopped early; frames already read remain valid.
    ///
    /// The receiver goes first: a consumer that stopped reading mid-stream
    /// leaves the worker parked in `send` on a full channel, and only a dead
    /// receiver unparks it so the join below can complete.
    pub fn finish(mut self) -> Result<()> {
        drop(self.receiver.take());

        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }

        if let Some(handle) = self.worker.take() {
            match handle.join() {
                Ok(result) => result,
                Err(_) => Err(anyhow!("ffmpeg reader thread panicked")),
            }
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::thread;

    use anyhow::Result;

    use super::FramePipe;

    #[test]
    fn finish_returns_even_when_frames_remain_unread() {
        let (sender, receiver) = mpsc::sync_channel::<Vec<u8>>(4);
        let worker = thread::Builder::new()
            .name("tvp-test-producer".to_owned())
            .spawn(move || -> Result<()> {
                // Produces until the consumer side disappears, like a decoder
                // on a long video; fills the channel and parks in `send`.
                loop {
                    if sender.send(vec![0u8; 8]).is_err() {
                        break Ok(());
                    }
                }
            })
            .expect("producer thread should spawn");

        let pipe = FramePipe {
            receiver: Some(receiver),
            worker: Some(worker),
            child: None,
        };

        assert!(pipe.read_frame().is_some(), "first frame should arrive");
        // Frames are still queued and more are being produced; teardown must
        // not wait for them.
        pipe.finish().expect("teardown should complete cleanly");
    }
}
