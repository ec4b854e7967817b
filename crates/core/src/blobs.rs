//! Blob storage over an append log. A blob is split into
//! [BLOB_BLOCK_SIZE] blocks appended contiguously, so a byte range can be
//! read by fetching only the blocks it covers.

use hrss_api::*;

/// Blob storage over an append log.
#[derive(Debug, Clone)]
pub struct Blobs {
    log: DynAppendLog,
}

impl Blobs {
    /// Construct blob storage over `log`.
    pub fn new(log: DynAppendLog) -> Self {
        Self { log }
    }

    /// The underlying log.
    pub fn log(&self) -> &DynAppendLog {
        &self.log
    }

    /// Store `content`, returning where it lives.
    pub async fn put(&self, content: bytes::Bytes) -> HrssResult<BlobId> {
        let blocks: Vec<bytes::Bytes> = (0..content.len())
            .step_by(BLOB_BLOCK_SIZE)
            .map(|start| {
                content.slice(start..(start + BLOB_BLOCK_SIZE).min(content.len()))
            })
            .collect();
        let block_length = blocks.len() as u64;
        let block_offset = self.log.append(blocks).await?;
        Ok(BlobId {
            block_offset,
            block_length,
            byte_length: content.len() as u64,
        })
    }

    /// Fetch a whole blob.
    pub async fn get(&self, id: &BlobId) -> HrssResult<bytes::Bytes> {
        self.get_range(
            id,
            ByteRange {
                start: 0,
                end: id.byte_length,
            },
        )
        .await
    }

    /// Fetch `[start, end)` of a blob. `end` is clamped to the blob length,
    /// an empty range yields no bytes.
    ///
    /// Ids arrive from rpc clients, so the id is checked against the log
    /// before any block is read.
    pub async fn get_range(
        &self,
        id: &BlobId,
        range: ByteRange,
    ) -> HrssResult<bytes::Bytes> {
        if range.start > range.end {
            return Err(HrssError::protocol(format!(
                "byte range start {} is after end {}",
                range.start, range.end
            )));
        }
        self.check(id)?;

        let range = range.clamp(id.byte_length);
        if range.is_empty() {
            return Ok(bytes::Bytes::new());
        }

        let bs = BLOB_BLOCK_SIZE as u64;
        let first = range.start / bs;
        let last = (range.end - 1) / bs;
        let mut skip = (range.start - first * bs) as usize;
        let mut want = range.len();

        if first == last {
            let block = self.block(id, first).await?;
            return slice(&block, skip, want as usize);
        }

        let mut out = bytes::BytesMut::new();
        for b in first..=last {
            let block = self.block(id, b).await?;
            let part = slice(
                &block,
                skip,
                (block.len().saturating_sub(skip) as u64).min(want) as usize,
            )?;
            want -= part.len() as u64;
            skip = 0;
            out.extend_from_slice(&part);
        }
        if want != 0 {
            return Err(HrssError::other("blob blocks shorter than expected"));
        }
        Ok(out.freeze())
    }

    /// The id must describe whole blocks that exist in the log.
    fn check(&self, id: &BlobId) -> HrssResult<()> {
        let blocks = id.byte_length.div_ceil(BLOB_BLOCK_SIZE as u64);
        if blocks != id.block_length {
            return Err(HrssError::protocol(format!(
                "blob {id:?} should span {blocks} blocks"
            )));
        }
        match id.block_offset.checked_add(id.block_length) {
            Some(end) if end <= self.log.len() => Ok(()),
            _ => Err(HrssError::not_found(format!(
                "blob {id:?} is past the end of the log"
            ))),
        }
    }

    async fn block(&self, id: &BlobId, b: u64) -> HrssResult<bytes::Bytes> {
        let seq = id.block_offset + b;
        self.log.get(seq).await?.ok_or_else(|| {
            HrssError::not_found(format!("blob block {seq} not replicated"))
        })
    }
}

fn slice(b: &bytes::Bytes, skip: usize, take: usize) -> HrssResult<bytes::Bytes> {
    match skip.checked_add(take) {
        Some(end) if end <= b.len() => Ok(b.slice(skip..end)),
        _ => Err(HrssError::other("blob block shorter than expected")),
    }
}
