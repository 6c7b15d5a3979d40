use core::{array::from_fn, fmt};
use sha2::{Digest as _, Sha256};

use super::internals::Error;

/// The key to a stored object: the SHA-256 digest of its bytes.
///
/// Example: `e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ContentDigest([u32; 8]);

impl ContentDigest {
    pub fn new(bytes: [u8; 32]) -> Self {
        let mut iter = bytes.chunks(4);
        Self(from_fn(|_i| {
            let mut u32_bytes = [0; 4];
            u32_bytes.copy_from_slice(iter.next().unwrap());
            u32::from_ne_bytes(u32_bytes)
        }))
    }

    /// The digest of the empty byte string, used for file tombstones.
    pub fn of_empty() -> Self {
        digest(&[])
    }

    /// Tries to parse a lowercase-hex string into a digest.
    ///
    /// The string must be 64 characters long and contain only hex digits.
    pub fn from_hex(mut hex: &str) -> Option<Self> {
        if hex.len() == 64 && hex.is_ascii() {
            let mut array = [0; 8];

            for j in 0..8 {
                let mut u32_bytes = [0; 4];

                for i in 0..4 {
                    let hex_byte = &hex[i * 2..][..2];
                    u32_bytes[i] = u8::from_str_radix(hex_byte, 16).ok()?;
                }

                array[j] = u32::from_ne_bytes(u32_bytes);
                hex = &hex[8..];
            }

            Some(Self(array))
        } else {
            None
        }
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        let mut array = [0; 32];

        let mut i = 0;
        for dword in self.0 {
            for byte in dword.to_ne_bytes() {
                array[i] = byte;
                i += 1;
            }
        }

        array
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.to_bytes() {
            write!(f, "{:02x}", byte)?;
        }

        Ok(())
    }
}

impl serde::Serialize for ContentDigest {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for ContentDigest {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Self::from_hex(&hex).ok_or_else(|| serde::de::Error::custom("invalid content digest"))
    }
}

impl TryFrom<&str> for ContentDigest {
    type Error = Error;

    fn try_from(hex: &str) -> Result<Self, Error> {
        Self::from_hex(hex).ok_or(Error::InvalidObject)
    }
}

/// Computes the content digest of a byte sequence.
pub fn digest(bytes: &[u8]) -> ContentDigest {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    ContentDigest::new(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic() {
        assert_eq!(digest(b"hello"), digest(b"hello"));
    }

    #[test]
    fn distinct_content_distinct_digest() {
        assert_ne!(digest(b"hello"), digest(b"hello world"));
    }

    #[test]
    fn hex_roundtrip() {
        let d = digest(b"some content");
        let hex = d.to_string();
        assert_eq!(ContentDigest::from_hex(&hex), Some(d));
    }

    #[test]
    fn of_empty_matches_digest_of_empty_slice() {
        assert_eq!(ContentDigest::of_empty(), digest(b""));
    }
}
