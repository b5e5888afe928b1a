//! Buffers: immutable intermediate batches of pieces awaiting aggregation.

use crate::hash::{ContentHash, PieceLink};
use serde::{Deserialize, Serialize};

/// Inclusion policy for a buffered piece.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiecePolicy {
    /// First sighting; include normally.
    #[default]
    Insert,
    /// Piece re-entered the pipeline after a failed aggregate.
    Retry,
}

/// A piece carried inside a buffer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferedPiece {
    /// Content-addressed identifier.
    pub link: PieceLink,
    /// Piece size in bytes.
    pub size: u64,
    /// Inclusion policy.
    #[serde(default)]
    pub policy: PiecePolicy,
}

/// An immutable batch of pieces destined for one aggregate.
///
/// Stored as a content-addressed blob; queue messages carry its address,
/// never the payload. Reduction produces a new buffer rather than editing
/// an existing one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Buffer {
    /// Tenant grouping tag (storefront/group).
    pub group: String,
    /// The buffered pieces.
    pub pieces: Vec<BufferedPiece>,
}

impl Buffer {
    /// Create a new buffer for a tenant group.
    pub fn new(group: impl Into<String>, pieces: Vec<BufferedPiece>) -> Self {
        Self {
            group: group.into(),
            pieces,
        }
    }

    /// Merge buffers into a single new buffer, retaining the group of the
    /// first buffer. Piece order across inputs is preserved but carries no
    /// meaning; only membership and sizes matter downstream.
    pub fn merge(buffers: Vec<Buffer>) -> crate::Result<Buffer> {
        let group = buffers
            .first()
            .map(|b| b.group.clone())
            .ok_or_else(|| crate::Error::Serialization("cannot merge zero buffers".to_string()))?;
        let pieces = buffers.into_iter().flat_map(|b| b.pieces).collect();
        Ok(Buffer { group, pieces })
    }

    /// Total size in bytes of all buffered pieces.
    pub fn total_size(&self) -> u64 {
        self.pieces.iter().map(|p| p.size).sum()
    }

    /// Encode to canonical bytes for storage.
    pub fn encode(&self) -> crate::Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| crate::Error::Serialization(e.to_string()))
    }

    /// Decode from stored bytes.
    pub fn decode(bytes: &[u8]) -> crate::Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| crate::Error::Serialization(e.to_string()))
    }

    /// Content address of the encoded buffer.
    pub fn content_hash(&self) -> crate::Result<ContentHash> {
        Ok(ContentHash::compute(&self.encode()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffered(seed: &[u8], size: u64) -> BufferedPiece {
        BufferedPiece {
            link: PieceLink::compute(seed),
            size,
            policy: PiecePolicy::Insert,
        }
    }

    #[test]
    fn test_buffer_codec_roundtrip() {
        let buffer = Buffer::new("store-a", vec![buffered(b"a", 10), buffered(b"b", 20)]);
        let bytes = buffer.encode().unwrap();
        let decoded = Buffer::decode(&bytes).unwrap();
        assert_eq!(buffer, decoded);
        assert_eq!(buffer.total_size(), 30);
    }

    #[test]
    fn test_content_hash_is_stable() {
        let buffer = Buffer::new("store-a", vec![buffered(b"a", 10)]);
        assert_eq!(
            buffer.content_hash().unwrap(),
            buffer.clone().content_hash().unwrap()
        );

        let other = Buffer::new("store-a", vec![buffered(b"b", 10)]);
        assert_ne!(
            buffer.content_hash().unwrap(),
            other.content_hash().unwrap()
        );
    }

    #[test]
    fn test_merge_retains_group_and_pieces() {
        let a = Buffer::new("store-a", vec![buffered(b"a", 1), buffered(b"b", 2)]);
        let b = Buffer::new("store-a", vec![buffered(b"c", 3)]);
        let merged = Buffer::merge(vec![a, b]).unwrap();
        assert_eq!(merged.group, "store-a");
        assert_eq!(merged.pieces.len(), 3);
        assert_eq!(merged.total_size(), 6);
    }

    #[test]
    fn test_merge_empty_fails() {
        assert!(Buffer::merge(vec![]).is_err());
    }
}
