//! The SHA-1 identity of an info dictionary.

use sha1::{Digest, Sha1};
use std::fmt;

/// A 20-byte SHA-1 info hash.
///
/// This is the trust anchor for metadata fetched from peers: a magnet link
/// (or any prior source) supplies the hash, and an assembled info dictionary
/// is only authoritative once its bytes hash back to it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash(pub [u8; 20]);

impl InfoHash {
    /// Hashes raw info-dictionary bytes.
    pub fn for_info_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(bytes);
        InfoHash(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoHash({})", self.to_hex())
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<[u8; 20]> for InfoHash {
    fn from(bytes: [u8; 20]) -> Self {
        InfoHash(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_info_bytes() {
        // sha1("abc") is a fixed vector
        let hash = InfoHash::for_info_bytes(b"abc");
        assert_eq!(hash.to_hex(), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn hex_formatting() {
        let hash = InfoHash([0xab; 20]);
        assert_eq!(hash.to_hex().len(), 40);
        assert!(hash.to_hex().starts_with("abab"));
    }
}
