//! Content digest selection from provider checksums.
//!
//! S3 returns up to four additional checksums for an object. The gateway
//! exposes a single one as an RFC 9530 `Content-Digest` value, picking the
//! strongest whole-object checksum available. Composite checksums (from
//! multipart uploads) have the form `{base64}-{parts}`; `-` is not a base64
//! character, so its presence identifies them.

use std::fmt;

// ---------------------------------------------------------------------------
// ChecksumAlgorithm
// ---------------------------------------------------------------------------

/// Checksum algorithms, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumAlgorithm {
    /// SHA-256.
    Sha256,
    /// SHA-1.
    Sha1,
    /// CRC-32C (Castagnoli).
    Crc32c,
    /// CRC-32 (IEEE 802.3).
    Crc32,
}

impl ChecksumAlgorithm {
    /// Selection priority.
    pub const PRIORITY: [Self; 4] = [Self::Sha256, Self::Sha1, Self::Crc32c, Self::Crc32];

    /// Digest algorithm token used in `Content-Digest`.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha-256",
            Self::Sha1 => "sha-1",
            Self::Crc32c => "crc32c",
            Self::Crc32 => "crc32",
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ObjectChecksums
// ---------------------------------------------------------------------------

/// Raw base64 checksums as returned by the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectChecksums {
    /// `x-amz-checksum-sha256`.
    pub sha256: Option<String>,
    /// `x-amz-checksum-sha1`.
    pub sha1: Option<String>,
    /// `x-amz-checksum-crc32c`.
    pub crc32c: Option<String>,
    /// `x-amz-checksum-crc32`.
    pub crc32: Option<String>,
}

impl ObjectChecksums {
    fn get(&self, algorithm: ChecksumAlgorithm) -> Option<&str> {
        match algorithm {
            ChecksumAlgorithm::Sha256 => self.sha256.as_deref(),
            ChecksumAlgorithm::Sha1 => self.sha1.as_deref(),
            ChecksumAlgorithm::Crc32c => self.crc32c.as_deref(),
            ChecksumAlgorithm::Crc32 => self.crc32.as_deref(),
        }
    }

    /// The `Content-Digest` value for the strongest whole-object checksum,
    /// or an empty string when none qualifies.
    #[must_use]
    pub fn content_digest(&self) -> String {
        ChecksumAlgorithm::PRIORITY
            .iter()
            .find_map(|algo| {
                self.get(*algo)
                    .filter(|value| !value.contains('-'))
                    .map(|value| format!("{algo}=:{value}:"))
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_prefer_sha256() {
        let sums = ObjectChecksums {
            sha256: Some("c2hhMjU2".into()),
            sha1: Some("c2hhMQ==".into()),
            crc32c: Some("AAAAAA==".into()),
            crc32: Some("BBBBBB==".into()),
        };
        assert_eq!(sums.content_digest(), "sha-256=:c2hhMjU2:");
    }

    #[test]
    fn test_should_skip_composite_checksums() {
        let sums = ObjectChecksums {
            sha256: Some("c2hhMjU2-3".into()),
            sha1: Some("c2hhMQ==-3".into()),
            crc32c: Some("AAAAAA==".into()),
            crc32: None,
        };
        assert_eq!(sums.content_digest(), "crc32c=:AAAAAA==:");
    }

    #[test]
    fn test_should_fall_back_to_crc32() {
        let sums = ObjectChecksums {
            crc32: Some("BBBBBB==".into()),
            ..ObjectChecksums::default()
        };
        assert_eq!(sums.content_digest(), "crc32=:BBBBBB==:");
    }

    #[test]
    fn test_should_return_empty_digest_when_nothing_qualifies() {
        assert_eq!(ObjectChecksums::default().content_digest(), "");
        let composite_only = ObjectChecksums {
            crc32: Some("BBBBBB==-2".into()),
            ..ObjectChecksums::default()
        };
        assert_eq!(composite_only.content_digest(), "");
    }
}
