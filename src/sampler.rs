use rand::{Rng, SeedableRng as _, rngs::StdRng};
use serde::Serialize;

use crate::{
    error::{Result, config},
    fingerprint::Fingerprint,
};

pub const DEFAULT_NUM_SAMPLES: usize = 3;
pub const DEFAULT_SEED: u64 = 12345;

/// Chunk offsets sampled from every page of a run.
///
/// The same value has to be used for building an index and for querying it,
/// otherwise fingerprints of equal content land on different offsets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SampleLocations {
    page_size: usize,
    chunk_size: usize,
    offsets: Vec<usize>,
}

impl SampleLocations {
    /// One offset per equal partition of the page, drawn uniformly from the
    /// positions where the chunk still fits inside its partition.
    pub fn choose(
        page_size: usize,
        chunk_size: usize,
        num: usize,
        rng: &mut impl Rng,
    ) -> Result<Self> {
        if num == 0 {
            return Err(config("at least one sample per page is required"));
        }
        if chunk_size == 0 {
            return Err(config("chunk size must be positive"));
        }
        let partition = page_size / num;
        if chunk_size > partition {
            return Err(config(format!(
                "chunk size {chunk_size} does not fit in a {partition}-byte partition \
                 ({num} samples of a {page_size}-byte page)"
            )));
        }

        let offsets = (0..num)
            .map(|n| rng.random_range(n * partition..=(n + 1) * partition - chunk_size))
            .collect();
        Ok(Self {
            page_size,
            chunk_size,
            offsets,
        })
    }

    pub fn seeded(page_size: usize, chunk_size: usize, num: usize, seed: u64) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        Self::choose(page_size, chunk_size, num, &mut rng)
    }

    pub fn from_offsets(page_size: usize, chunk_size: usize, offsets: Vec<usize>) -> Result<Self> {
        if offsets.is_empty() {
            return Err(config("at least one sample per page is required"));
        }
        if chunk_size == 0 {
            return Err(config("chunk size must be positive"));
        }
        if let Some(&bad) = offsets
            .iter()
            .find(|&&offset| offset.saturating_add(chunk_size) > page_size)
        {
            return Err(config(format!(
                "chunk at offset {bad} overruns the {page_size}-byte page"
            )));
        }
        Ok(Self {
            page_size,
            chunk_size,
            offsets,
        })
    }

    pub fn whole_page(page_size: usize) -> Self {
        Self {
            page_size,
            chunk_size: page_size,
            offsets: vec![0],
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn chunks<'a>(&'a self, page: &'a [u8]) -> impl Iterator<Item = &'a [u8]> + 'a {
        debug_assert_eq!(page.len(), self.page_size);
        self.offsets
            .iter()
            .map(move |&offset| &page[offset..offset + self.chunk_size])
    }

    pub fn fingerprints<'a>(&'a self, page: &'a [u8]) -> impl Iterator<Item = Fingerprint> + 'a {
        self.chunks(page).map(Fingerprint::of)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_stay_inside_partitions() {
        for seed in 0..32 {
            let locations = SampleLocations::seeded(4096, 64, 3, seed).unwrap();
            let partition = 4096 / 3;
            assert_eq!(locations.len(), 3);
            for (n, &offset) in locations.offsets().iter().enumerate() {
                assert!(offset >= n * partition);
                assert!(offset + 64 <= (n + 1) * partition);
            }
        }
    }

    #[test]
    fn same_seed_same_offsets() {
        let a = SampleLocations::seeded(4096, 32, 4, 99).unwrap();
        let b = SampleLocations::seeded(4096, 32, 4, 99).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn full_partition_chunk_has_one_choice() {
        let locations = SampleLocations::seeded(16, 16, 1, 7).unwrap();
        assert_eq!(locations.offsets(), [0]);
        assert_eq!(locations, SampleLocations::whole_page(16));
    }

    #[test]
    fn rejects_chunks_larger_than_partition() {
        assert!(SampleLocations::seeded(4096, 2048, 3, 0).is_err());
        assert!(SampleLocations::seeded(4096, 64, 0, 0).is_err());
        assert!(SampleLocations::seeded(4096, 0, 3, 0).is_err());
    }

    #[test]
    fn explicit_offsets_are_validated() {
        assert!(SampleLocations::from_offsets(16, 4, vec![0, 12]).is_ok());
        assert!(SampleLocations::from_offsets(16, 4, vec![13]).is_err());
        assert!(SampleLocations::from_offsets(16, 4, vec![]).is_err());
    }

    #[test]
    fn chunks_follow_offsets() {
        let page: Vec<u8> = (0..16).collect();
        let locations = SampleLocations::from_offsets(16, 2, vec![1, 10]).unwrap();
        let chunks: Vec<_> = locations.chunks(&page).collect();
        assert_eq!(chunks, [&[1, 2][..], &[10, 11]]);
    }
}
