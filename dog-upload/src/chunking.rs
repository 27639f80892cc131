//! Part arithmetic shared by the coordinator and the chunked uploader.
//!
//! Both sides derive the chunk size from the same [`ChunkRules`], so the part
//! count a client expects before `initiate` matches what the coordinator records.

use std::ops::{Range, RangeInclusive};

use crate::{ChunkRules, UploadError, UploadResult};

/// How a file of `total_size` bytes is split into parts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pub total_size: u64,
    pub chunk_size: u64,
    pub total_parts: u32,
}

impl ChunkPlan {
    /// Plan with an explicit chunk size. Both sizes must be non-zero.
    pub fn new(total_size: u64, chunk_size: u64) -> UploadResult<Self> {
        if total_size == 0 {
            return Err(UploadError::bad_request("totalSize must be at least 1 byte"));
        }
        if chunk_size == 0 {
            return Err(UploadError::bad_request("chunkSize must be at least 1 byte"));
        }

        let parts = total_size.div_ceil(chunk_size);
        let total_parts = u32::try_from(parts)
            .map_err(|_| UploadError::bad_request(format!("{} parts is too many", parts)))?;

        Ok(Self {
            total_size,
            chunk_size,
            total_parts,
        })
    }

    /// Plan for an upload, honoring a client-preferred chunk size when given.
    ///
    /// The preferred size is clamped into the rule bounds. Without a preference,
    /// small files get the flat default and larger files scale the chunk so the
    /// part count stays under `max_parts`.
    pub fn for_upload(total_size: u64, preferred: Option<u64>, rules: &ChunkRules) -> UploadResult<Self> {
        if total_size == 0 {
            return Err(UploadError::bad_request("totalSize must be at least 1 byte"));
        }

        let max_parts = u64::from(rules.max_parts);
        let ceiling = rules.max_chunk_size.saturating_mul(max_parts);
        if total_size > ceiling {
            return Err(UploadError::bad_request(format!(
                "File of {} bytes exceeds the maximum upload size of {} bytes",
                total_size, ceiling
            )));
        }

        let mut chunk_size = choose_chunk_size(total_size, preferred, rules);

        // A preferred size can still be too small for a huge file.
        if total_size.div_ceil(chunk_size) > max_parts {
            chunk_size = total_size
                .div_ceil(max_parts)
                .clamp(rules.min_chunk_size, rules.max_chunk_size);
        }

        Self::new(total_size, chunk_size)
    }

    /// 1-based part numbers covered by this plan
    pub fn part_numbers(&self) -> RangeInclusive<u32> {
        1..=self.total_parts
    }

    /// Byte range `[(n-1)*chunk, min(n*chunk, total))` of part `n`
    pub fn part_range(&self, part_number: u32) -> Option<Range<u64>> {
        if part_number == 0 || part_number > self.total_parts {
            return None;
        }

        let start = u64::from(part_number - 1) * self.chunk_size;
        let end = (start + self.chunk_size).min(self.total_size);
        Some(start..end)
    }

    pub fn part_size(&self, part_number: u32) -> Option<u64> {
        self.part_range(part_number).map(|r| r.end - r.start)
    }

    pub fn contains(&self, part_number: u32) -> bool {
        part_number >= 1 && part_number <= self.total_parts
    }
}

/// Chunk size policy. `preferred` wins after clamping.
pub fn choose_chunk_size(total_size: u64, preferred: Option<u64>, rules: &ChunkRules) -> u64 {
    if let Some(preferred) = preferred {
        return preferred.clamp(rules.min_chunk_size, rules.max_chunk_size);
    }

    if total_size < rules.small_file_threshold {
        return rules.default_chunk_size;
    }

    total_size
        .div_ceil(u64::from(rules.max_parts))
        .clamp(rules.min_chunk_size, rules.max_chunk_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn twenty_megabytes_in_ten_megabyte_chunks_is_two_parts() {
        let plan = ChunkPlan::for_upload(20 * MIB, Some(10 * MIB), &ChunkRules::default()).unwrap();
        assert_eq!(plan.total_parts, 2);
        assert_eq!(plan.part_range(2), Some(10 * MIB..20 * MIB));
        assert_eq!(plan.part_range(3), None);
        assert_eq!(plan.part_range(0), None);
    }

    #[test]
    fn preferred_chunk_size_is_clamped() {
        let rules = ChunkRules::default();
        assert_eq!(choose_chunk_size(50 * MIB, Some(MIB), &rules), 5 * MIB);
        assert_eq!(choose_chunk_size(50 * MIB, Some(500 * MIB), &rules), 100 * MIB);
    }

    #[test]
    fn small_files_use_flat_default() {
        let rules = ChunkRules::default();
        assert_eq!(choose_chunk_size(MIB, None, &rules), 10 * MIB);
        assert_eq!(choose_chunk_size(99 * MIB, None, &rules), 10 * MIB);
    }

    #[test]
    fn large_files_scale_chunk_to_bound_part_count() {
        let rules = ChunkRules::default();
        let total = 200 * 1024 * MIB; // 200 GiB
        let plan = ChunkPlan::for_upload(total, None, &rules).unwrap();
        assert!(plan.total_parts <= rules.max_parts);
        assert!(plan.chunk_size >= rules.min_chunk_size);
    }

    #[test]
    fn tiny_preference_is_raised_for_huge_files() {
        let rules = ChunkRules::default();
        let total = 100 * 1024 * MIB;
        let plan = ChunkPlan::for_upload(total, Some(5 * MIB), &rules).unwrap();
        assert!(plan.total_parts <= rules.max_parts);
    }

    #[test]
    fn oversized_files_are_rejected() {
        let rules = ChunkRules::default().with_max_parts(2);
        let err = ChunkPlan::for_upload(300 * MIB, None, &rules).unwrap_err();
        assert!(matches!(err, UploadError::BadRequest { .. }));
    }

    #[test]
    fn empty_file_is_rejected() {
        assert!(ChunkPlan::for_upload(0, None, &ChunkRules::default()).is_err());
    }

    proptest! {
        #[test]
        fn parts_cover_the_file_exactly(total in 1u64..5_000_000, chunk in 1_000u64..400_000) {
            let plan = ChunkPlan::new(total, chunk).unwrap();

            prop_assert_eq!(u64::from(plan.total_parts), total.div_ceil(chunk));

            let sizes: Vec<u64> = plan.part_numbers().map(|n| plan.part_size(n).unwrap()).collect();
            prop_assert_eq!(sizes.iter().sum::<u64>(), total);

            let (last, rest) = sizes.split_last().unwrap();
            prop_assert!(rest.iter().all(|s| *s == chunk));
            prop_assert!(*last >= 1 && *last <= chunk);
        }

        #[test]
        fn ranges_are_contiguous(total in 1u64..2_000_000, chunk in 100u64..100_000) {
            let plan = ChunkPlan::new(total, chunk).unwrap();
            let mut expected_start = 0;
            for n in plan.part_numbers() {
                let range = plan.part_range(n).unwrap();
                prop_assert_eq!(range.start, expected_start);
                expected_start = range.end;
            }
            prop_assert_eq!(expected_start, total);
        }
    }
}
