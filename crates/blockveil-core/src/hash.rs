//! Hash dispatch for ESSIV salt derivation.
//!
//! ESSIV names its hash algorithm as a free-form string (`essiv:sha256`).
//! We only need to go from that name to a digest of the data key, so a
//! small closed enum stands in for a full hash-registry abstraction.

use digest::Digest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgo {
    Sha1,
    Sha256,
    Sha512,
}

impl HashAlgo {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "sha1" => Some(HashAlgo::Sha1),
            "sha256" => Some(HashAlgo::Sha256),
            "sha512" => Some(HashAlgo::Sha512),
            _ => None,
        }
    }

    pub fn output_len(self) -> usize {
        match self {
            HashAlgo::Sha1 => 20,
            HashAlgo::Sha256 => 32,
            HashAlgo::Sha512 => 64,
        }
    }

    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlgo::Sha1 => sha1::Sha1::digest(data).to_vec(),
            HashAlgo::Sha256 => sha2::Sha256::digest(data).to_vec(),
            HashAlgo::Sha512 => sha2::Sha512::digest(data).to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_names() {
        assert_eq!(HashAlgo::parse("sha1"), Some(HashAlgo::Sha1));
        assert_eq!(HashAlgo::parse("sha256"), Some(HashAlgo::Sha256));
        assert_eq!(HashAlgo::parse("sha512"), Some(HashAlgo::Sha512));
        assert_eq!(HashAlgo::parse("md5"), None);
    }

    #[test]
    fn test_output_len_matches_digest_len() {
        for algo in [HashAlgo::Sha1, HashAlgo::Sha256, HashAlgo::Sha512] {
            assert_eq!(algo.digest(b"blockveil").len(), algo.output_len());
        }
    }

    #[test]
    fn test_digest_is_deterministic() {
        let a = HashAlgo::Sha256.digest(b"same key");
        let b = HashAlgo::Sha256.digest(b"same key");
        assert_eq!(a, b);
    }
}
