//! Content hashing and line splitting shared by indexer and matcher

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of a text, the key of the exact-match lookups
#[must_use]
pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Split a source into its indexable lines
///
/// Returns `(ordinal, line)` pairs; blank and whitespace-only lines keep
/// their ordinal but are skipped, so line artifacts never reference them.
#[must_use]
pub fn indexable_lines(source: &str) -> Vec<(u32, &str)> {
    source
        .split('\n')
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| (u32::try_from(i).unwrap_or(u32::MAX), line))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_indexable_lines_skips_blanks() {
        let lines = indexable_lines("A\n\n  \nB");
        assert_eq!(lines, vec![(0, "A"), (3, "B")]);
    }

    #[test]
    fn test_indexable_lines_empty_input() {
        assert!(indexable_lines("").is_empty());
        assert!(indexable_lines("   ").is_empty());
    }
}
