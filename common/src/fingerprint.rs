use core::fmt;

use sha1::{Digest, Sha1};

/// SHA-1 digest of a server-supplied content tag.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint([u8; Fingerprint::LEN]);

impl Fingerprint {
    pub const LEN: usize = 20;

    pub fn of(tag: &str) -> Self {
        let digest = Sha1::digest(tag.as_bytes());
        let mut bytes = [0_u8; Self::LEN];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; Self::LEN] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn matches(&self, tag: &str) -> bool {
        *self == Self::of(tag)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_matches_known_sha1() {
        assert_eq!(
            Fingerprint::of("abc").to_string(),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn compares_digests_not_raw_tags() {
        let persisted = Fingerprint::of("\"33a64df5\"");
        assert!(persisted.matches("\"33a64df5\""));
        assert!(!persisted.matches("\"33a64df6\""));
        assert_ne!(persisted.as_bytes(), "\"33a64df5\"".as_bytes());
    }

    #[test]
    fn rejects_wrong_length_slices() {
        assert!(Fingerprint::from_slice(&[1_u8; 19]).is_none());
        assert!(Fingerprint::from_slice(&[1_u8; 21]).is_none());
        assert!(Fingerprint::from_slice(&[1_u8; 20]).is_some());
    }
}
