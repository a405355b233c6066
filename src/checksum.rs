use std::fs;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

/// Streaming SHA-256 of a file's full byte content, as lowercase hex.
///
/// The digest is the cache key: identical bytes hash identically no matter
/// where the file lives, and any byte difference forces a fresh transcode.
/// Videos are multi-megabyte, so the file is read through a fixed buffer
/// rather than slurped.
pub fn checksum_for_file(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path)
        .with_context(|| format!("failed to open video for hashing {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0_u8; 16 * 1024];
    loop {
        let read = file
            .read(&mut buffer)
            .with_context(|| format!("failed to read video for hashing {}", path.display()))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::checksum_for_file;

    #[test]
    fn identical_bytes_hash_identically_regardless_of_path() {
        let dir = tempdir().expect("tempdir should create");
        let first = dir.path().join("movie.mp4");
        let second = dir.path().join("renamed (copy).mp4");
        fs::write(&first, b"not actually mpeg4 but stable bytes").expect("first should write");
        fs::write(&second, b"not actually mpeg4 but stable bytes").expect("second should write");

        let a = checksum_for_file(&first).expect("first should hash");
        let b = checksum_for_file(&second).expect("second should hash");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn single_byte_difference_changes_the_digest() {
        let dir = tempdir().expect("tempdir should create");
        let first = dir.path().join("a.mp4");
        let second = dir.path().join("b.mp4");
        fs::write(&first, b"frame data 0").expect("first should write");
        fs::write(&second, b"frame data 1").expect("second should write");

        let a = checksum_for_file(&first).expect("first should hash");
        let b = checksum_for_file(&second).expect("second should hash");
        assert_ne!(a, b);
    }

    #[test]
    fn unreadable_file_is_an_error() {
        let dir = tempdir().expect("tempdir should create");
        let missing = dir.path().join("nope.mp4");
        let error = checksum_for_file(&missing).expect_err("missing file should fail");
        assert!(error.to_string().contains("nope.mp4"));
    }
}
