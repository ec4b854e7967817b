//! Blob location types.

/// Size of one blob block. Blobs are split into blocks of this size,
/// only the last block of a blob may be shorter.
pub const BLOB_BLOCK_SIZE: usize = 64 * 1024;

/// Where a blob lives within a blobs log.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct BlobId {
    /// Sequence number of the first block.
    pub block_offset: u64,

    /// Number of blocks.
    pub block_length: u64,

    /// Total byte length of the blob.
    pub byte_length: u64,
}

/// A half-open byte range `[start, end)`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct ByteRange {
    /// First byte included.
    pub start: u64,

    /// First byte excluded.
    pub end: u64,
}

impl ByteRange {
    /// Clamp `end` to `len`. The result may be empty.
    pub fn clamp(self, len: u64) -> Self {
        let end = self.end.min(len);
        Self {
            start: self.start.min(end),
            end,
        }
    }

    /// Number of bytes covered.
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// True if no bytes are covered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
