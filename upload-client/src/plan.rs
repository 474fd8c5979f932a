//! Splitting a file into the byte ranges transferred one PUT at a time.

use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Platform-declared chunking constraints, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkLimits {
    /// Smallest chunk the platform accepts when a file is split.
    pub min_chunk: u64,
    /// Nominal chunk size; files up to this size go up in one piece.
    pub max_chunk: u64,
    /// Largest the final chunk may grow when a short remainder is folded into it.
    pub last_chunk_cap: u64,
    /// Largest file the platform accepts at all.
    pub max_file_size: u64,
}

impl ChunkLimits {
    /// # Panics
    ///
    /// Panics if the limits contradict each other: a folded remainder must always fit under the
    /// last-chunk cap, so `last_chunk_cap` has to leave room for `max_chunk + min_chunk`.
    pub const fn new(min_chunk: u64, max_chunk: u64, last_chunk_cap: u64, max_file_size: u64) -> Self {
        assert!(min_chunk > 0, "minimum chunk size must be positive");
        assert!(min_chunk <= max_chunk, "minimum chunk exceeds maximum chunk");
        assert!(
            last_chunk_cap >= max_chunk + min_chunk,
            "last-chunk cap cannot absorb a folded remainder"
        );
        Self {
            min_chunk,
            max_chunk,
            last_chunk_cap,
            max_file_size,
        }
    }
}

/// One contiguous byte range of the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub start: u64,
    /// Exclusive.
    pub end: u64,
}

impl Chunk {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn range(&self) -> Range<u64> {
        self.start..self.end
    }

    /// `Content-Range` header value, `bytes first-last/total` with `last` inclusive.
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end - 1, total)
    }
}

/// Ordered, gapless, non-overlapping chunks covering the whole file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPlan {
    total: u64,
    chunk_size: u64,
    chunks: Vec<Chunk>,
}

impl ChunkPlan {
    /// Plans `total` bytes against `limits`.
    ///
    /// Files up to `max_chunk` go up as a single chunk. Larger files are cut into `max_chunk`
    /// pieces; a remainder of at least `min_chunk` becomes its own final chunk, while a shorter
    /// one is folded into the previous chunk so no chunk is ever below the platform minimum.
    ///
    /// Returns `None` for an empty file, which has no valid plan.
    pub fn new(total: u64, limits: &ChunkLimits) -> Option<Self> {
        if total == 0 {
            return None;
        }

        if total <= limits.max_chunk {
            return Some(Self {
                total,
                chunk_size: total,
                chunks: vec![Chunk {
                    index: 0,
                    start: 0,
                    end: total,
                }],
            });
        }

        let full = total / limits.max_chunk;
        let remainder = total % limits.max_chunk;
        let count = if remainder >= limits.min_chunk {
            full + 1
        } else {
            full
        };

        let mut chunks = Vec::with_capacity(count as usize);
        let mut start = 0;
        for index in 0..count {
            let end = if index + 1 == count {
                total
            } else {
                start + limits.max_chunk
            };
            chunks.push(Chunk {
                index: index as usize,
                start,
                end,
            });
            start = end;
        }
        debug_assert!(chunks.last().is_some_and(|c| c.len() <= limits.last_chunk_cap));

        Some(Self {
            total,
            chunk_size: limits.max_chunk,
            chunks,
        })
    }

    pub fn total_bytes(&self) -> u64 {
        self.total
    }

    /// The nominal chunk size declared to the platform.
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Index of the chunk beginning exactly at `offset`, if any.
    pub fn chunk_starting_at(&self, offset: u64) -> Option<usize> {
        self.chunks.iter().position(|c| c.start == offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MIB: u64 = 1024 * 1024;
    const TIKTOK: ChunkLimits = ChunkLimits::new(5 * MIB, 64 * MIB, 128 * MIB, 4096 * MIB);

    fn sizes(plan: &ChunkPlan) -> Vec<u64> {
        plan.chunks().iter().map(Chunk::len).collect()
    }

    fn assert_covers(plan: &ChunkPlan, total: u64, limits: &ChunkLimits) {
        let mut expected_start = 0;
        for (i, chunk) in plan.chunks().iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert_eq!(chunk.start, expected_start, "gap or overlap before chunk {i}");
            assert!(!chunk.is_empty());
            expected_start = chunk.end;
        }
        assert_eq!(expected_start, total);
        assert_eq!(sizes(plan).iter().sum::<u64>(), total);
        if plan.len() > 1 {
            let last = plan.chunks().last().unwrap();
            assert!(last.len() >= limits.min_chunk);
            assert!(last.len() <= limits.last_chunk_cap);
        }
    }

    #[test]
    fn small_file_is_one_chunk() {
        let plan = ChunkPlan::new(10 * MIB, &TIKTOK).unwrap();
        assert_eq!(sizes(&plan), vec![10 * MIB]);
        assert_eq!(plan.chunk_size(), 10 * MIB);

        // below the minimum is still one chunk
        let plan = ChunkPlan::new(1, &TIKTOK).unwrap();
        assert_eq!(sizes(&plan), vec![1]);

        let plan = ChunkPlan::new(64 * MIB, &TIKTOK).unwrap();
        assert_eq!(sizes(&plan), vec![64 * MIB]);
    }

    #[test]
    fn large_file_keeps_a_real_remainder_chunk() {
        let plan = ChunkPlan::new(150 * MIB, &TIKTOK).unwrap();
        assert_eq!(sizes(&plan), vec![64 * MIB, 64 * MIB, 22 * MIB]);
        let ranges: Vec<_> = plan.chunks().iter().map(Chunk::range).collect();
        assert_eq!(
            ranges,
            vec![0..64 * MIB, 64 * MIB..128 * MIB, 128 * MIB..150 * MIB]
        );
        assert_eq!(plan.chunk_size(), 64 * MIB);
    }

    #[test]
    fn short_remainder_folds_into_last_chunk() {
        let plan = ChunkPlan::new(128 * MIB + 3 * MIB, &TIKTOK).unwrap();
        assert_eq!(sizes(&plan), vec![64 * MIB, 67 * MIB]);

        let plan = ChunkPlan::new(64 * MIB + 1, &TIKTOK).unwrap();
        assert_eq!(sizes(&plan), vec![64 * MIB + 1]);
    }

    #[test]
    fn exact_multiple_has_no_remainder() {
        let plan = ChunkPlan::new(192 * MIB, &TIKTOK).unwrap();
        assert_eq!(sizes(&plan), vec![64 * MIB; 3]);
    }

    #[test]
    fn empty_file_has_no_plan() {
        assert!(ChunkPlan::new(0, &TIKTOK).is_none());
    }

    #[test]
    fn chunk_count_and_coverage_hold_for_many_sizes() {
        let limits = ChunkLimits::new(5, 64, 128, u64::MAX);
        for total in 1..=1000 {
            let plan = ChunkPlan::new(total, &limits).unwrap();
            assert_covers(&plan, total, &limits);
            if total <= limits.max_chunk {
                assert_eq!(plan.len(), 1);
            } else {
                let floor = (total / limits.max_chunk) as usize;
                assert!(
                    plan.len() == floor || plan.len() == floor + 1,
                    "{total} bytes planned as {} chunks",
                    plan.len()
                );
            }
        }
    }

    #[test]
    fn content_range_is_inclusive() {
        let plan = ChunkPlan::new(25, &ChunkLimits::new(4, 10, 20, 100)).unwrap();
        let headers: Vec<_> = plan.chunks().iter().map(|c| c.content_range(25)).collect();
        assert_eq!(
            headers,
            vec!["bytes 0-9/25", "bytes 10-19/25", "bytes 20-24/25"]
        );
        assert_eq!(plan.chunk_starting_at(10), Some(1));
        assert_eq!(plan.chunk_starting_at(11), None);
    }
}
