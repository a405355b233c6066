use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use crossterm::{cursor, execute, queue, terminal};

use crate::audio::{self, AudioPlayback};
use crate::cache::{self, CachedVideo, FrameBlob, FRAME_BLOB_VERSION};
use crate::checksum::checksum_for_file;
use crate::probe;
use crate::term::{self, TerminalAdapter};
use crate::transcode;

/// Output rate frames are transcoded at, and the default playback rate.
pub const TRANSCODE_FPS: u32 = 5;
/// Font size the terminal is dropped to during playback; smaller glyphs mean
/// more effective resolution.
pub const PLAYBACK_FONT_SIZE: u32 = 13;
/// Time given to the emulator to apply a font-size change before drawing.
const FONT_SETTLE_DELAY: Duration = Duration::from_secs(1);
const FALLBACK_COLUMNS: u16 = 80;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackSummary {
    pub frames_rendered: usize,
    pub frames_dropped: usize,
    pub interrupted: bool,
}

/// One video, loaded for one play session.
#[derive(Debug)]
pub struct Player {
    video_path: PathBuf,
    display_name: String,
    cache_dir: PathBuf,
}

impl Player {
    pub fn new(video_path: &Path, cache_dir: &Path) -> Result<Self> {
        if !video_path.is_file() {
            bail!("missing video file: {}", video_path.display());
        }
        let display_name = video_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video".to_owned());

        Ok(Self {
            video_path: video_path.to_path_buf(),
            display_name,
            cache_dir: cache_dir.to_path_buf(),
        })
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Resolves the cache and plays: checksum lookup first, fresh transcode
    /// on a miss, then the scheduler loop.
    pub fn run(&self, interrupted: &AtomicBool) -> Result<PlaybackSummary> {
        let mut adapter = term::detect_adapter();
        let cached = self.resolve(interrupted)?;
        if interrupted.load(Ordering::SeqCst) {
            // Interrupted while transcoding: the partial result was
            // discarded, so the next play starts over from a clean miss.
            return Ok(PlaybackSummary {
                interrupted: true,
                ..PlaybackSummary::default()
            });
        }

        if cached.blob.frames.is_empty() {
            bail!(
                "no frames could be produced from {}",
                self.video_path.display()
            );
        }

        let summary = play(
            &cached.blob.frames,
            cached.audio_path.as_deref(),
            cached.blob.fps,
            PLAYBACK_FONT_SIZE,
            adapter.as_mut(),
            interrupted,
        )?;
        eprintln!(
            "[tvp] '{}': {} frame(s) rendered, {} dropped{}",
            self.display_name,
            summary.frames_rendered,
            summary.frames_dropped,
            if summary.interrupted {
                ", interrupted"
            } else {
                ""
            }
        );
        Ok(summary)
    }

    /// Returns the cached conversion of this video, transcoding and storing
    /// it first if the checksum has never been seen.
    ///
    /// An interruption that lands mid-transcode truncates the frame list, so
    /// nothing is stored in that case: the checksum covers the whole file and
    /// must never resolve to a partial conversion.
    pub fn resolve(&self, interrupted: &AtomicBool) -> Result<CachedVideo> {
        let checksum = checksum_for_file(&self.video_path)?;
        if let Some(cached) = cache::lookup(&self.cache_dir, &checksum) {
            eprintln!("[tvp] cache hit for {}", &checksum[..12.min(checksum.len())]);
            return Ok(cached);
        }
        eprintln!("[tvp] cache miss; transcoding {}", self.video_path.display());

        let metadata = probe::probe_video(&self.video_path)?;
        probe::validate_rates(metadata.fps, TRANSCODE_FPS)?;

        let columns = terminal::size().map(|(c, _)| c).unwrap_or(FALLBACK_COLUMNS);
        let frames =
            transcode::transcode(&self.video_path, &metadata, TRANSCODE_FPS, columns, interrupted)?;

        if !should_store_transcode(&frames, interrupted)
            .with_context(|| format!("failed to transcode {}", self.video_path.display()))?
        {
            eprintln!("[tvp] transcode interrupted; discarding the partial result");
            return Ok(CachedVideo {
                blob: FrameBlob {
                    version: FRAME_BLOB_VERSION,
                    fps: TRANSCODE_FPS,
                    columns,
                    frames,
                },
                audio_path: None,
            });
        }

        let audio_path = if metadata.has_audio {
            std::fs::create_dir_all(&self.cache_dir).with_context(|| {
                format!("failed to create cache directory {}", self.cache_dir.display())
            })?;
            let path = self
                .cache_dir
                .join(format!("{}.mp3", cache::fresh_asset_id(&checksum)));
            audio::extract_audio(&self.video_path, &path)?;
            Some(path)
        } else {
            eprintln!("[tvp] no audio stream; playing silent");
            None
        };

        let blob = FrameBlob {
            version: FRAME_BLOB_VERSION,
            fps: TRANSCODE_FPS,
            columns,
            frames,
        };
        cache::store(
            &self.cache_dir,
            &self.display_name,
            &checksum,
            &blob,
            audio_path.as_deref(),
        )?;
        eprintln!("[tvp] cached {} frame(s)", blob.frames.len());

        Ok(CachedVideo { blob, audio_path })
    }
}

/// Gate between transcode and store. An interrupted session keeps nothing
/// (`Ok(false)`); a transcode that produced no frames at all is an error, not
/// a cache entry, so a broken source is retried on the next play instead of
/// resolving to an empty blob forever.
fn should_store_transcode(frames: &[String], interrupted: &AtomicBool) -> Result<bool> {
    if interrupted.load(Ordering::SeqCst) {
        return Ok(false);
    }
    if frames.is_empty() {
        bail!("no frames could be produced");
    }
    Ok(true)
}

/// Wall-clock pacing for the frame loop.
///
/// `drift` accumulates how late rendering is running. A frame whose turn
/// arrives with a full period of accumulated lateness is dropped instead of
/// rendered, repaying exactly one period; an on-time frame sleeps out the
/// remainder of its budget. Isolated slow frames therefore cost a bounded
/// number of future drops rather than a compounding desync against audio.
pub(crate) struct FrameClock {
    frame_period: Duration,
    drift: Duration,
}

impl FrameClock {
    pub(crate) fn new(fps: u32) -> Self {
        Self {
            frame_period: Duration::from_secs_f64(1.0 / f64::from(fps.max(1))),
            drift: Duration::ZERO,
        }
    }

    /// True when the next frame is too late to display without falling
    /// further behind. Dropping repays one frame period of drift.
    pub(crate) fn should_drop(&mut self) -> bool {
        if self.drift >= self.frame_period {
            self.drift -= self.frame_period;
            true
        } else {
            false
        }
    }

    /// Accounts for a rendered frame that took `elapsed` and returns how
    /// long to sleep before the next one. Overruns grow `drift`; the return
    /// value is never negative because `Duration` cannot be.
    pub(crate) fn after_render(&mut self, elapsed: Duration) -> Duration {
        if elapsed > self.frame_period {
            self.drift += elapsed - self.frame_period;
            Duration::ZERO
        } else {
            self.frame_period - elapsed
        }
    }

    #[cfg(test)]
    pub(crate) fn drift(&self) -> Duration {
        self.drift
    }
}

/// Restores the terminal font exactly once, on every exit path out of
/// `play` (normal exhaustion, interruption, render error).
struct FontGuard<'a> {
    adapter: &'a mut dyn TerminalAdapter,
}

impl Drop for FontGuard<'_> {
    fn drop(&mut self) {
        if let Err(error) = self.adapter.restore_font_size() {
            eprintln!("[tvp] failed to restore terminal font size: {error:#}");
        }
    }
}

/// Leaves the alternate screen and re-shows the cursor on every exit path.
struct ScreenGuard;

impl Drop for ScreenGuard {
    fn drop(&mut self) {
        let _ = execute!(io::stdout(), cursor::Show, terminal::LeaveAlternateScreen);
    }
}

/// Plays a frame sequence against the terminal, with audio running as an
/// independent child process. Interruption is cooperative: the flag is
/// checked between frames, never mid-render, and still routes through font
/// and screen restoration.
pub fn play(
    frames: &[String],
    audio_path: Option<&Path>,
    fps: u32,
    font_size: u32,
    adapter: &mut dyn TerminalAdapter,
    interrupted: &AtomicBool,
) -> Result<PlaybackSummary> {
    eprintln!(
        "[tvp] playing {} frame(s) at {fps} fps via {} adapter",
        frames.len(),
        adapter.name()
    );

    let adjusted = adapter
        .adjust_font_size(font_size)
        .context("failed to adjust terminal font size")?;
    thread::sleep(settle_for(adjusted));
    let guard = FontGuard { adapter };

    let summary = run_frame_loop(frames, audio_path, fps, interrupted);
    drop(guard);
    summary
}

/// The emulator only needs settle time when the config actually changed; an
/// inert adapter (or a font already at the target size) starts immediately.
fn settle_for(adjusted: bool) -> Duration {
    if adjusted {
        FONT_SETTLE_DELAY
    } else {
        Duration::ZERO
    }
}

fn run_frame_loop(
    frames: &[String],
    audio_path: Option<&Path>,
    fps: u32,
    interrupted: &AtomicBool,
) -> Result<PlaybackSummary> {
    let mut stdout = io::stdout();
    execute!(
        stdout,
        terminal::EnterAlternateScreen,
        cursor::Hide,
        terminal::Clear(terminal::ClearType::All)
    )
    .context("failed to enter alternate screen")?;
    let _screen = ScreenGuard;

    let _audio = match audio_path {
        Some(path) => Some(AudioPlayback::spawn(path)?),
        None => None,
    };

    let mut clock = FrameClock::new(fps);
    let mut summary = PlaybackSummary::default();
    let mut frame_start = Instant::now();

    for frame in frames {
        if interrupted.load(Ordering::SeqCst) {
            summary.interrupted = true;
            break;
        }

        if clock.should_drop() {
            summary.frames_dropped += 1;
            frame_start = Instant::now();
            continue;
        }

        queue!(stdout, cursor::MoveTo(0, 0)).context("failed to reposition cursor")?;
        stdout
            .write_all(frame.as_bytes())
            .context("failed to write frame")?;
        stdout.flush().context("failed to flush frame")?;
        summary.frames_rendered += 1;

        thread::sleep(clock.after_render(frame_start.elapsed()));
        frame_start = Instant::now();
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use anyhow::Result;

    use super::{FrameClock, Player};
    use crate::term::TerminalAdapter;

    #[test]
    fn player_requires_an_existing_file() {
        let error = Player::new(&PathBuf::from("/no/such/clip.mp4"), &PathBuf::from("cache"))
            .expect_err("missing file should fail");
        assert!(error.to_string().contains("clip.mp4"));
    }

    #[test]
    fn display_name_strips_directory_and_extension() {
        let dir = tempfile::tempdir().expect("tempdir should create");
        let path = dir.path().join("My Holiday.clip.mp4");
        std::fs::write(&path, b"stub").expect("stub should write");

        let player = Player::new(&path, dir.path()).expect("player should build");
        assert_eq!(player.display_name(), "My Holiday.clip");
    }

    #[test]
    fn resolve_returns_cached_frames_without_invoking_ffmpeg() {
        let dir = tempfile::tempdir().expect("tempdir should create");
        let video = dir.path().join("clip.mp4");
        std::fs::write(&video, b"pretend this is a video").expect("stub should write");

        // Pre-seed the cache under the file's real checksum. A hit must come
        // straight from the store; no ffmpeg/ffprobe exists for this stub.
        let checksum = crate::checksum::checksum_for_file(&video).expect("stub should hash");
        let blob = crate::cache::FrameBlob {
            version: crate::cache::FRAME_BLOB_VERSION,
            fps: 5,
            columns: 40,
            frames: vec!["cached frame".to_owned()],
        };
        crate::cache::store(dir.path(), "clip", &checksum, &blob, None)
            .expect("seed store should succeed");

        let player = Player::new(&video, dir.path()).expect("player should build");
        let interrupted = AtomicBool::new(false);
        let cached = player.resolve(&interrupted).expect("cache hit should resolve");
        assert_eq!(cached.blob.frames, vec!["cached frame".to_owned()]);
        assert_eq!(cached.audio_path, None);
    }

    #[test]
    fn interrupted_transcode_is_never_stored() {
        let interrupted = AtomicBool::new(true);
        let frames = vec!["partial frame".to_owned()];
        let store = super::should_store_transcode(&frames, &interrupted)
            .expect("interruption is not an error");
        assert!(!store, "a truncated frame list must not reach the cache");
    }

    #[test]
    fn empty_transcode_is_an_error_not_a_cache_entry() {
        let interrupted = AtomicBool::new(false);
        let error = super::should_store_transcode(&[], &interrupted)
            .expect_err("zero frames should fail instead of caching");
        assert!(error.to_string().contains("no frames"));
    }

    #[test]
    fn completed_transcode_is_stored() {
        let interrupted = AtomicBool::new(false);
        let frames = vec!["frame".to_owned()];
        assert!(super::should_store_transcode(&frames, &interrupted).expect("should store"));
    }

    #[test]
    fn on_time_frames_accumulate_no_drift() {
        let mut clock = FrameClock::new(5);
        let period = Duration::from_millis(200);

        for _ in 0..10 {
            assert!(!clock.should_drop());
            let sleep = clock.after_render(Duration::from_millis(50));
            assert_eq!(sleep, period - Duration::from_millis(50));
        }
        assert_eq!(clock.drift(), Duration::ZERO);
    }

    #[test]
    fn overrun_sleeps_zero_and_banks_the_excess() {
        let mut clock = FrameClock::new(5);

        // Rendering took 1.5 periods: no sleep, half a period of drift.
        let sleep = clock.after_render(Duration::from_millis(300));
        assert_eq!(sleep, Duration::ZERO);
        assert_eq!(clock.drift(), Duration::from_millis(100));
        assert!(!clock.should_drop());
    }

    #[test]
    fn a_full_period_of_drift_drops_exactly_one_frame() {
        // Scenario: frame 3 overruns until cumulative drift reaches one full
        // period; frame 4 is dropped, frame 5 renders normally.
        let mut clock = FrameClock::new(5);

        clock.after_render(Duration::from_millis(300)); // +100ms drift
        clock.after_render(Duration::from_millis(300)); // +100ms drift
        assert_eq!(clock.drift(), Duration::from_millis(200));

        assert!(clock.should_drop(), "frame with a period of drift drops");
        assert_eq!(clock.drift(), Duration::ZERO);
        assert!(!clock.should_drop(), "next frame renders normally");
    }

    #[test]
    fn drift_never_goes_negative() {
        let mut clock = FrameClock::new(10);
        for _ in 0..100 {
            clock.after_render(Duration::from_millis(1));
            assert!(!clock.should_drop());
            assert_eq!(clock.drift(), Duration::ZERO);
        }
    }

    /// Counts adjust/restore calls so the exactly-once contract is checkable.
    struct CountingAdapter {
        calls: Mutex<(u32, u32)>,
    }

    impl CountingAdapter {
        fn new() -> Self {
            Self {
                calls: Mutex::new((0, 0)),
            }
        }
    }

    impl TerminalAdapter for CountingAdapter {
        fn name(&self) -> &'static str {
            "counting"
        }
        fn read_config(&self) -> Result<String> {
            Ok(String::new())
        }
        fn write_config(&self, _config: &str) -> Result<()> {
            Ok(())
        }
        fn adjust_font_size(&mut self, _font_size: u32) -> Result<bool> {
            self.calls.lock().expect("lock").0 += 1;
            Ok(true)
        }
        fn restore_font_size(&mut self) -> Result<()> {
            self.calls.lock().expect("lock").1 += 1;
            Ok(())
        }
    }

    #[test]
    fn font_guard_restores_once_on_normal_and_error_exits() {
        let mut adapter = CountingAdapter::new();

        {
            let _guard = super::FontGuard {
                adapter: &mut adapter,
            };
        }
        assert_eq!(*adapter.calls.lock().expect("lock"), (0, 1));

        let result: Result<()> = (|| {
            let _guard = super::FontGuard {
                adapter: &mut adapter,
            };
            anyhow::bail!("render exploded")
        })();
        assert!(result.is_err());
        assert_eq!(*adapter.calls.lock().expect("lock"), (0, 2));
    }

    #[test]
    fn settle_delay_applies_only_after_a_real_font_change() {
        assert_eq!(super::settle_for(true), super::FONT_SETTLE_DELAY);
        assert_eq!(super::settle_for(false), Duration::ZERO);
    }

    #[test]
    fn interruption_flag_is_observed_between_frames() {
        // The loop checks at the top of each iteration; a pre-set flag means
        // zero frames rendered and an interrupted summary.
        let interrupted = AtomicBool::new(true);
        let mut clock = FrameClock::new(5);
        let frames = vec!["a".to_owned(), "b".to_owned()];

        let mut summary = super::PlaybackSummary::default();
        for _frame in &frames {
            if interrupted.load(Ordering::SeqCst) {
                summary.interrupted = true;
                break;
            }
            if clock.should_drop() {
                summary.frames_dropped += 1;
                continue;
            }
            summary.frames_rendered += 1;
        }

        assert!(summary.interrupted);
        assert_eq!(summary.frames_rendered, 0);
    }
}
