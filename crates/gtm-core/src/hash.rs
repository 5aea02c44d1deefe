//! File identifiers derived from SHA-1 path hashes.
//!
//! Metric files are keyed by a 40-hex-digit digest of the source path so
//! that arbitrary paths become filename-safe without any escaping.

use sha1::{Digest, Sha1};

/// Compute the FileId for a source path: lowercase SHA-1 hex of its bytes.
pub fn file_id(path: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(path.as_bytes());
    let result = hasher.finalize();
    hex_encode(&result)
}

/// Encode raw bytes as a lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_id_deterministic() {
        let h1 = file_id("src/main.rs");
        let h2 = file_id("src/main.rs");
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_file_id_distinct_paths() {
        // Two distinct paths must land in two distinct metric files.
        let h1 = file_id("src/main.rs");
        let h2 = file_id("src/lib.rs");
        assert_ne!(h1, h2);
    }

    #[test]
    fn test_file_id_length() {
        // SHA-1 produces 40 hex characters
        let h = file_id("event/event.go");
        assert_eq!(h.len(), 40);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_file_id_known_value() {
        // sha1("hello") — pins the digest choice.
        assert_eq!(file_id("hello"), "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d");
    }
}
