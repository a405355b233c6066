use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};

pub const INDEX_FILE_NAME: &str = "cache.json";
pub const FRAME_BLOB_VERSION: u32 = 1;

const fn default_index_version() -> u32 {
    1
}

/// One transcoded video. Entries are append-only: a re-encoded video gets a
/// new checksum and therefore a new entry; nothing is evicted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub name: String,
    /// Path of the frame blob, relative to the cache directory.
    pub video: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_path: Option<String>,
    pub sha256: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheIndex {
    #[serde(default = "default_index_version")]
    pub version: u32,
    #[serde(default)]
    pub entries: Vec<CacheEntry>,
}

impl Default for CacheIndex {
    fn default() -> Self {
        Self {
            version: default_index_version(),
            entries: Vec::new(),
        }
    }
}

/// Versioned serialization of a transcoded frame sequence. The version field
/// is what lets a future layout change invalidate old blobs instead of
/// feeding them to the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameBlob {
    pub version: u32,
    pub fps: u32,
    pub columns: u16,
    pub frames: Vec<String>,
}

/// A cache hit: the deserialized frame blob plus the extracted audio track,
/// if the source video had one.
#[derive(Debug, Clone)]
pub struct CachedVideo {
    pub blob: FrameBlob,
    pub audio_path: Option<PathBuf>,
}

pub fn index_path(cache_dir: &Path) -> PathBuf {
    cache_dir.join(INDEX_FILE_NAME)
}

/// Loads the cache index. A missing or unparseable index file is a cold
/// cache, never an error.
pub fn load_index(cache_dir: &Path) -> CacheIndex {
    let path = index_path(cache_dir);
    let Ok(content) = fs::read_to_string(&path) else {
        return CacheIndex::default();
    };
    match serde_json::from_str(&content) {
        Ok(index) => index,
        Err(error) => {
            eprintln!(
                "[tvp] ignoring unreadable cache index {}: {error}",
                path.display()
            );
            CacheIndex::default()
        }
    }
}

/// Scans the index for the first entry matching `sha256` and loads its frame
/// blob. An entry whose blob is missing or corrupt is skipped: stale index
/// rows degrade to a cache miss, not a failure.
pub fn lookup(cache_dir: &Path, sha256: &str) -> Option<CachedVideo> {
    let index = load_index(cache_dir);
    for entry in index.entries.iter().filter(|e| e.sha256 == sha256) {
        let blob_path = cache_dir.join(&entry.video);
        match load_frame_blob(&blob_path) {
            Ok(blob) => {
                return Some(CachedVideo {
                    blob,
                    audio_path: entry.audio_path.as_ref().map(PathBuf::from),
                });
            }
            Err(error) => {
                eprintln!(
                    "[tvp] cache entry '{}' has unusable blob {}: {error:#}",
                    entry.name,
                    blob_path.display()
                );
            }
        }
    }
    None
}

/// Persists a freshly transcoded video: writes the frame blob under a new
/// collision-free identifier, appends an index entry, and rewrites the index
/// atomically (temp file + rename) so a concurrent reader never sees a
/// partial document.
pub fn store(
    cache_dir: &Path,
    name: &str,
    sha256: &str,
    blob: &FrameBlob,
    audio_path: Option<&Path>,
) -> Result<CacheEntry> {
    fs::create_dir_all(cache_dir)
        .with_context(|| format!("failed to create cache directory {}", cache_dir.display()))?;

    let blob_name = format!("{}.json", fresh_asset_id(sha256));
    let blob_path = cache_dir.join(&blob_name);
    let json = serde_json::to_string(blob).context("failed to serialize frame blob")?;
    fs::write(&blob_path, json)
        .with_context(|| format!("failed to write frame blob {}", blob_path.display()))?;

    let entry = CacheEntry {
        name: name.to_owned(),
        video: blob_name,
        audio_path: audio_path.map(|p| p.to_string_lossy().into_owned()),
        sha256: sha256.to_owned(),
        created_at: Some(Utc::now().to_rfc3339()),
    };

    let mut index = load_index(cache_dir);
    index.entries.push(entry.clone());
    save_index(cache_dir, &index)?;
    Ok(entry)
}

/// A fresh identifier for blob and audio files: checksum prefix for
/// legibility, then process id, a nanosecond timestamp, and an in-process
/// counter for uniqueness. Never reused across entries, even for the same
/// video name.
pub fn fresh_asset_id(sha256: &str) -> String {
    static SEQUENCE: AtomicU64 = AtomicU64::new(0);

    let prefix = &sha256[..sha256.len().min(12)];
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{:x}-{nanos:x}-{sequence}", process::id())
}

fn save_index(cache_dir: &Path, index: &CacheIndex) -> Result<()> {
    let path = index_path(cache_dir);
    let json =
        serde_json::to_string_pretty(index).context("failed to serialize cache index JSON")?;

    // Write-then-rename keeps the index a single complete document even if
    // another session reads it mid-store. Concurrent writers are
    // last-writer-wins on the entry list; blob files themselves cannot
    // collide because their names embed pid and timestamp.
    let temp_path = cache_dir.join(format!(".{INDEX_FILE_NAME}.{}.tmp", process::id()));
    fs::write(&temp_path, format!("{json}\n"))
        .with_context(|| format!("failed to write cache index {}", temp_path.display()))?;
    fs::rename(&temp_path, &path)
        .with_context(|| format!("failed to replace cache index {}", path.display()))?;
    Ok(())
}

fn load_frame_blob(path: &Path) -> Result<FrameBlob> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read frame blob {}", path.display()))?;
    let blob: FrameBlob = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse frame blob {}", path.display()))?;
    if blob.version != FRAME_BLOB_VERSION {
        anyhow::bail!(
            "frame blob {} has unsupported version {} (expected {})",
            path.display(),
            blob.version,
            FRAME_BLOB_VERSION
        );
    }
    Ok(blob)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::{
        fresh_asset_id, index_path, load_index, lookup, store, CacheIndex, FrameBlob,
        FRAME_BLOB_VERSION,
    };

    fn sample_blob() -> FrameBlob {
        FrameBlob {
            version: FRAME_BLOB_VERSION,
            fps: 5,
            columns: 80,
            frames: vec!["frame zero".to_owned(), "frame one".to_owned()],
        }
    }

    #[test]
    fn missing_index_is_a_cold_cache() {
        let dir = tempdir().expect("tempdir should create");
        let index = load_index(dir.path());
        assert_eq!(index, CacheIndex::default());
        assert!(lookup(dir.path(), "abc123").is_none());
    }

    #[test]
    fn corrupt_index_is_a_cold_cache() {
        let dir = tempdir().expect("tempdir should create");
        fs::write(index_path(dir.path()), "{ not json").expect("index should write");
        assert!(load_index(dir.path()).entries.is_empty());
        assert!(lookup(dir.path(), "abc123").is_none());
    }

    #[test]
    fn store_on_cold_cache_creates_index_with_one_entry() {
        let dir = tempdir().expect("tempdir should create");
        let entry = store(dir.path(), "clip", "abc123", &sample_blob(), None)
            .expect("store should succeed");

        let index = load_index(dir.path());
        assert_eq!(index.entries.len(), 1);
        assert_eq!(index.entries[0], entry);
        assert_eq!(entry.sha256, "abc123");
        assert!(dir.path().join(&entry.video).exists());
    }

    #[test]
    fn lookup_returns_stored_frames_and_audio_for_matching_checksum() {
        let dir = tempdir().expect("tempdir should create");
        let audio = dir.path().join("track.mp3");
        store(dir.path(), "clip", "abc123", &sample_blob(), Some(&audio))
            .expect("store should succeed");

        let hit = lookup(dir.path(), "abc123").expect("checksum should hit");
        assert_eq!(hit.blob, sample_blob());
        assert_eq!(hit.audio_path.as_deref(), Some(audio.as_path()));

        assert!(lookup(dir.path(), "def456").is_none());
    }

    #[test]
    fn same_name_different_checksum_appends_a_second_entry() {
        let dir = tempdir().expect("tempdir should create");
        store(dir.path(), "clip", "aaa", &sample_blob(), None).expect("first store");
        store(dir.path(), "clip", "bbb", &sample_blob(), None).expect("second store");

        let index = load_index(dir.path());
        assert_eq!(index.entries.len(), 2);
        assert_ne!(index.entries[0].video, index.entries[1].video);
        assert!(lookup(dir.path(), "aaa").is_some());
        assert!(lookup(dir.path(), "bbb").is_some());
    }

    #[test]
    fn entry_with_missing_blob_degrades_to_a_miss() {
        let dir = tempdir().expect("tempdir should create");
        let entry = store(dir.path(), "clip", "abc123", &sample_blob(), None)
            .expect("store should succeed");
        fs::remove_file(dir.path().join(&entry.video)).expect("blob should delete");

        assert!(lookup(dir.path(), "abc123").is_none());
    }

    #[test]
    fn blob_with_unknown_version_degrades_to_a_miss() {
        let dir = tempdir().expect("tempdir should create");
        let mut blob = sample_blob();
        blob.version = FRAME_BLOB_VERSION + 1;
        store(dir.path(), "clip", "abc123", &blob, None).expect("store should succeed");

        assert!(lookup(dir.path(), "abc123").is_none());
    }

    #[test]
    fn asset_ids_are_never_reused() {
        let a = fresh_asset_id("abc123def4567890");
        let b = fresh_asset_id("abc123def4567890");
        assert_ne!(a, b);
        assert!(a.starts_with("abc123def456-"));
    }

    #[test]
    fn short_checksum_does_not_panic_asset_id() {
        let id = fresh_asset_id("ab");
        assert!(id.starts_with("ab-"));
    }
}
