//! Chunk sizing.

use std::ops::Range;

use crate::error::{Result, StoreError};

/// Default chunk size: just under the channel's per-message attachment limit.
pub const DEFAULT_CHUNK_SIZE: u64 = 9_000_000;

/// Number of chunks needed for an object: `max(1, ceil(size / chunk_size))`.
///
/// An empty object still occupies one (empty) chunk.
pub fn chunk_count(size: u64, chunk_size: u64) -> Result<usize> {
    if chunk_size == 0 {
        return Err(StoreError::InvalidRequest(
            "chunk size must be positive".to_string(),
        ));
    }
    Ok(size.div_ceil(chunk_size).max(1) as usize)
}

/// Fixed-size split of one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    size: u64,
    chunk_size: u64,
    count: usize,
}

impl ChunkPlan {
    pub fn new(size: u64, chunk_size: u64) -> Result<Self> {
        let count = chunk_count(size, chunk_size)?;
        Ok(Self {
            size,
            chunk_size,
            count,
        })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Byte range `[i*C, min((i+1)*C, size))` of chunk `index`.
    pub fn range(&self, index: usize) -> Range<u64> {
        let start = (index as u64 * self.chunk_size).min(self.size);
        let end = (start + self.chunk_size).min(self.size);
        start..end
    }

    /// Length of chunk `index` in bytes.
    pub fn len_of(&self, index: usize) -> u64 {
        let r = self.range(index);
        r.end - r.start
    }

    /// Iterate `(index, range)` over every chunk.
    pub fn chunks(&self) -> impl Iterator<Item = (usize, Range<u64>)> + '_ {
        (0..self.count).map(move |i| (i, self.range(i)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_count() {
        assert_eq!(chunk_count(20_000_000, 9_000_000).unwrap(), 3);
        assert_eq!(chunk_count(18_000_000, 9_000_000).unwrap(), 2);
        assert_eq!(chunk_count(18_000_001, 9_000_000).unwrap(), 3);
        assert_eq!(chunk_count(1, 9_000_000).unwrap(), 1);
        assert_eq!(chunk_count(0, 9_000_000).unwrap(), 1);
    }

    #[test]
    fn test_chunk_count_rejects_zero_chunk_size() {
        assert!(matches!(
            chunk_count(10, 0),
            Err(StoreError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_twenty_megabyte_plan() {
        let plan = ChunkPlan::new(20_000_000, DEFAULT_CHUNK_SIZE).unwrap();
        let sizes: Vec<u64> = (0..plan.count()).map(|i| plan.len_of(i)).collect();
        assert_eq!(sizes, vec![9_000_000, 9_000_000, 2_000_000]);
        assert_eq!(plan.range(2), 18_000_000..20_000_000);
    }

    #[test]
    fn test_plan_covers_object_exactly() {
        for size in [0u64, 1, 9, 10, 11, 99, 100, 101] {
            let plan = ChunkPlan::new(size, 10).unwrap();
            let total: u64 = plan.chunks().map(|(_, r)| r.end - r.start).sum();
            assert_eq!(total, size);
            let mut expected_start = 0;
            for (_, r) in plan.chunks() {
                assert_eq!(r.start, expected_start);
                expected_start = r.end;
            }
        }
    }
}
