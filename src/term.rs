use std::env;
use std::fs;
use std::ops::Range;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};

/// Capability interface for terminal emulators whose font size can be
/// adjusted around playback. The player only ever holds a `dyn
/// TerminalAdapter`; supporting a new emulator means adding a variant, not
/// touching the scheduler.
pub trait TerminalAdapter {
    fn name(&self) -> &'static str;
    fn read_config(&self) -> Result<String>;
    fn write_config(&self, config: &str) -> Result<()>;
    /// Applies `font_size`, reporting whether the config was actually
    /// rewritten. Must be a no-op returning `false` when `font_size` is
    /// already the current size; callers use the flag to decide whether the
    /// emulator needs time to pick up the change.
    fn adjust_font_size(&mut self, font_size: u32) -> Result<bool>;
    /// Restores exactly the size captured when the adapter was constructed,
    /// however many adjustments happened in between.
    fn restore_font_size(&mut self) -> Result<()>;
}

/// Picks an adapter for the running emulator, falling back to the inert
/// variant when none is recognized (playback still works, just at the
/// current font size).
pub fn detect_adapter() -> Box<dyn TerminalAdapter> {
    if env::var("TERM_PROGRAM").is_ok_and(|v| v == "Hyper") {
        match HyperAdapter::new() {
            Ok(adapter) => return Box::new(adapter),
            Err(error) => eprintln!("[tvp] Hyper config unusable ({error:#}); font size left alone"),
        }
    }
    if env::var_os("ALACRITTY_WINDOW_ID").is_some() {
        match AlacrittyAdapter::new() {
            Ok(adapter) => return Box::new(adapter),
            Err(error) => {
                eprintln!("[tvp] Alacritty config unusable ({error:#}); font size left alone")
            }
        }
    }
    Box::new(NullAdapter)
}

/// Shared marker-edit mechanics: the emulator config is treated as opaque
/// text with one numeric font-size field located by a textual marker and
/// updated by literal substring replacement. Deliberately not a structured
/// parse; both supported formats survive round-tripping untouched except for
/// that one token.
#[derive(Debug)]
struct FontConfigFile {
    path: PathBuf,
    marker: &'static str,
    /// Size token captured at construction; what restore writes back.
    baseline: String,
}

impl FontConfigFile {
    fn open(path: PathBuf, marker: &'static str) -> Result<Self> {
        if path.as_os_str().is_empty() {
            bail!("terminal config file location not set");
        }
        let config = fs::read_to_string(&path)
            .with_context(|| format!("failed to read terminal config {}", path.display()))?;
        let (_, token) = find_size_token(&config, marker)
            .with_context(|| format!("terminal config {}", path.display()))?;
        Ok(Self {
            path,
            marker,
            baseline: token.to_owned(),
        })
    }

    fn read(&self) -> Result<String> {
        fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read terminal config {}", self.path.display()))
    }

    fn write(&self, config: &str) -> Result<()> {
        fs::write(&self.path, config)
            .with_context(|| format!("failed to write terminal config {}", self.path.display()))
    }

    /// Writes `token` as the size value, returning whether a rewrite was
    /// needed at all.
    fn set_token(&self, token: &str) -> Result<bool> {
        let config = self.read()?;
        let (range, current) = find_size_token(&config, self.marker)
            .with_context(|| format!("terminal config {}", self.path.display()))?;
        if tokens_equal(current, token) {
            return Ok(false);
        }
        let mut updated = config.clone();
        updated.replace_range(range, token);
        self.write(&updated)?;
        Ok(true)
    }
}

/// Locates the numeric token following `marker` (and an optional `:`),
/// returning its byte range and text.
fn find_size_token<'a>(config: &'a str, marker: &str) -> Result<(Range<usize>, &'a str)> {
    let marker_at = config
        .find(marker)
        .ok_or_else(|| anyhow!("no '{marker}' field found"))?;
    let mut start = marker_at + marker.len();
    let bytes = config.as_bytes();
    while start < bytes.len() && (bytes[start] == b':' || bytes[start].is_ascii_whitespace()) {
        start += 1;
    }
    let mut end = start;
    while end < bytes.len() && (bytes[end].is_ascii_digit() || bytes[end] == b'.') {
        end += 1;
    }
    if end == start {
        bail!("'{marker}' field has no numeric value");
    }
    Ok((start..end, &config[start..end]))
}

fn tokens_equal(a: &str, b: &str) -> bool {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x == y,
        _ => a == b,
    }
}

/// Adapter for the web-based terminal Hyper (`~/.hyper.js`, `fontSize: 12`).
#[derive(Debug)]
pub struct HyperAdapter {
    config: FontConfigFile,
}

impl HyperAdapter {
    pub fn new() -> Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| anyhow!("home directory not set"))?;
        Self::with_config_path(home.join(".hyper.js"))
    }

    pub fn with_config_path(path: PathBuf) -> Result<Self> {
        Ok(Self {
            config: FontConfigFile::open(path, "fontSize")?,
        })
    }
}

impl TerminalAdapter for HyperAdapter {
    fn name(&self) -> &'static str {
        "hyper"
    }

    fn read_config(&self) -> Result<String> {
        self.config.read()
    }

    fn write_config(&self, config: &str) -> Result<()> {
        self.config.write(config)
    }

    fn adjust_font_size(&mut self, font_size: u32) -> Result<bool> {
        self.config.set_token(&font_size.to_string())
    }

    fn restore_font_size(&mut self) -> Result<()> {
        let baseline = self.config.baseline.clone();
        self.config.set_token(&baseline).map(|_| ())
    }
}

/// Adapter for Alacritty (`~/.alacritty.yml`, `size: 11.0` under `font:`).
/// The marker scan binds to the first `size` field in the file, which in
/// stock configs is the font block; the same lightweight trade-off as the
/// Hyper adapter.
pub struct AlacrittyAdapter {
    config: FontConfigFile,
}

impl AlacrittyAdapter {
    pub fn new() -> Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| anyhow!("home directory not set"))?;
        Self::with_config_path(home.join(".alacritty.yml"))
    }

    pub fn with_config_path(path: PathBuf) -> Result<Self> {
        Ok(Self {
            config: FontConfigFile::open(path, "size")?,
        })
    }
}

impl TerminalAdapter for AlacrittyAdapter {
    fn name(&self) -> &'static str {
        "alacritty"
    }

    fn read_config(&self) -> Result<String> {
        self.config.read()
    }

    fn write_config(&self, config: &str) -> Result<()> {
        self.config.write(config)
    }

    fn adjust_font_size(&mut self, font_size: u32) -> Result<bool> {
        self.config.set_token(&font_size.to_string())
    }

    fn restore_font_size(&mut self) -> Result<()> {
        let baseline = self.config.baseline.clone();
        self.config.set_token(&baseline).map(|_| ())
    }
}

/// Inert adapter for emulators without font-size control. Adjust and restore
/// are no-ops; the config capabilities are a contract error because there is
/// no config file to speak of.
pub struct NullAdapter;

impl TerminalAdapter for NullAdapter {
    fn name(&self) -> &'static str {
        "null"
    }

    fn read_config(&self) -> Result<String> {
        bail!("the null terminal adapter has no config file")
    }

    fn write_config(&self, _config: &str) -> Result<()> {
        bail!("the null terminal adapter has no config file")
    }

    fn adjust_font_size(&mut self, _font_size: u32) -> Result<bool> {
        Ok(false)
    }

    fn restore_font_size(&mut self) -> Result<()> {
        Ok(())
    }
}
