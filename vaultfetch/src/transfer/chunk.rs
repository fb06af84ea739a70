//! Chunk planning for ranged transfers.
//!
//! A plan is computed per transfer attempt from the current resume offset
//! and the server-reported total size. It is never persisted; resuming
//! recomputes it from the partial file's length.

/// Default chunk size: 8 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 8 * 1024 * 1024;

/// One inclusive byte range to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes the range covers.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Range` header value for this chunk.
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// Ordered, non-overlapping ranges covering `[resume_offset, total_size)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    ranges: Vec<ByteRange>,
}

impl ChunkPlan {
    /// Build a plan. Empty when nothing remains to download.
    pub fn new(resume_offset: u64, total_size: u64, chunk_size: u64) -> Self {
        let chunk_size = chunk_size.max(1);
        let mut ranges = Vec::new();
        let mut start = resume_offset;
        while start < total_size {
            let end = (start + chunk_size - 1).min(total_size - 1);
            ranges.push(ByteRange { start, end });
            start = end + 1;
        }
        Self { ranges }
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ByteRange> {
        self.ranges.iter()
    }

    /// Total bytes the plan will transfer.
    pub fn remaining_bytes(&self) -> u64 {
        self.ranges.iter().map(|r| r.len()).sum()
    }
}
