use std::num::NonZeroUsize;

use rand::{Rng, SeedableRng as _, rngs::StdRng};
use rustc_hash::FxHashMap;

use crate::{
    error::{Result, config},
    fingerprint::Fingerprint,
    page::{Geometry, PageIndex, PageStore, is_zero},
    sampler::{DEFAULT_SEED, SampleLocations},
    source::PageSource,
};

/// How an exact index cuts pages into fingerprinted units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Page,
    /// Consecutive chunks of this many bytes; must evenly divide the page size.
    Chunk(usize),
}

impl Granularity {
    fn chunk_size(self, page_size: usize) -> Result<usize> {
        match self {
            Granularity::Page => Ok(page_size),
            Granularity::Chunk(chunk_size) => {
                Geometry::new(page_size, chunk_size)?.chunks_per_page()?;
                Ok(chunk_size)
            }
        }
    }
}

/// Fingerprint to the pages whose chunks produced it.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FingerprintIndex {
    buckets: FxHashMap<Fingerprint, Vec<PageIndex>>,
    units: u64,
}

impl FingerprintIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one occurrence of `fingerprint` on `page`.
    pub fn insert(&mut self, fingerprint: Fingerprint, page: PageIndex) {
        self.buckets.entry(fingerprint).or_default().push(page);
        self.units += 1;
    }

    /// Exact index over a dump on disk; every unit occurrence is recorded.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    pub fn build_exact(source: &PageSource, granularity: Granularity) -> Result<Self> {
        let chunk_size = granularity.chunk_size(source.page_size())?;
        let mut index = Self::new();
        source.scan_chunks(chunk_size, |page, chunk| {
            index.insert(Fingerprint::of(chunk), page)
        })?;
        #[cfg(feature = "tracing")]
        tracing::info!(
            fingerprints = index.len(),
            units = index.units(),
            "built exact index"
        );
        Ok(index)
    }

    pub fn from_pages(pages: &PageStore, granularity: Granularity) -> Result<Self> {
        let chunk_size = granularity.chunk_size(pages.page_size())?;
        let mut index = Self::new();
        for (page_index, page) in pages.iter() {
            for chunk in page.chunks_exact(chunk_size) {
                index.insert(Fingerprint::of(chunk), page_index);
            }
        }
        Ok(index)
    }

    /// Pages recorded under `fingerprint`, in insertion order; empty if absent.
    pub fn lookup(&self, fingerprint: &Fingerprint) -> &[PageIndex] {
        self.buckets
            .get(fingerprint)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.buckets.contains_key(fingerprint)
    }

    /// Number of distinct fingerprints.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Number of recorded occurrences across all fingerprints.
    pub fn units(&self) -> u64 {
        self.units
    }

    pub fn fingerprints(&self) -> impl Iterator<Item = &Fingerprint> {
        self.buckets.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Fingerprint, &[PageIndex])> {
        self.buckets.iter().map(|(fp, pages)| (fp, pages.as_slice()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampledIndexOptions {
    /// Keep at most this many pages per fingerprint, chosen by reservoir sampling.
    pub bucket_limit: Option<NonZeroUsize>,
    pub skip_zero_samples: bool,
    pub seed: u64,
}

impl Default for SampledIndexOptions {
    fn default() -> Self {
        Self {
            bucket_limit: None,
            skip_zero_samples: false,
            seed: DEFAULT_SEED,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Reservoir {
    seen: u64,
    last: Option<PageIndex>,
}

impl Reservoir {
    fn push(
        &mut self,
        bucket: &mut Vec<PageIndex>,
        page: PageIndex,
        limit: usize,
        rng: &mut impl Rng,
    ) {
        if self.last == Some(page) {
            return;
        }
        self.last = Some(page);
        if bucket.len() < limit {
            bucket.push(page);
        } else {
            let slot = rng.random_range(0..=self.seen);
            if slot < limit as u64 {
                bucket[slot as usize] = page;
            }
        }
        self.seen += 1;
    }
}

/// Index over sampled chunks of a base dump, holding the dump's pages so that
/// candidates can be diffed against.
#[derive(Debug, Clone)]
pub struct SampledIndex {
    locations: SampleLocations,
    options: SampledIndexOptions,
    index: FingerprintIndex,
    pages: PageStore,
}

impl SampledIndex {
    pub fn build(source: &PageSource, locations: SampleLocations) -> Result<Self> {
        Self::build_with(source, locations, SampledIndexOptions::default())
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    pub fn build_with(
        source: &PageSource,
        locations: SampleLocations,
        options: SampledIndexOptions,
    ) -> Result<Self> {
        let pages = source.read_all()?;
        let index = Self::from_pages(pages, locations, options)?;
        #[cfg(feature = "tracing")]
        tracing::info!(
            pages = index.pages.len(),
            fingerprints = index.index.len(),
            "built sampled index"
        );
        Ok(index)
    }

    pub fn from_pages(
        pages: PageStore,
        locations: SampleLocations,
        options: SampledIndexOptions,
    ) -> Result<Self> {
        if locations.page_size() != pages.page_size() {
            return Err(config(format!(
                "sample locations are for {}-byte pages, dump has {}-byte pages",
                locations.page_size(),
                pages.page_size()
            )));
        }

        let mut index = FingerprintIndex::new();
        let mut reservoirs = FxHashMap::<Fingerprint, Reservoir>::default();
        let mut rng = StdRng::seed_from_u64(options.seed);
        for (page_index, page) in pages.iter() {
            for chunk in locations.chunks(page) {
                if options.skip_zero_samples && is_zero(chunk) {
                    continue;
                }
                let fingerprint = Fingerprint::of(chunk);
                let reservoir = reservoirs.entry(fingerprint).or_default();
                let bucket = index.buckets.entry(fingerprint).or_default();
                let limit = options.bucket_limit.map_or(usize::MAX, NonZeroUsize::get);
                let before = bucket.len();
                reservoir.push(bucket, page_index, limit, &mut rng);
                if bucket.len() != before {
                    index.units += 1;
                }
            }
        }

        Ok(Self {
            locations,
            options,
            index,
            pages,
        })
    }

    pub fn lookup(&self, fingerprint: &Fingerprint) -> &[PageIndex] {
        self.index.lookup(fingerprint)
    }

    pub fn locations(&self) -> &SampleLocations {
        &self.locations
    }

    pub fn options(&self) -> &SampledIndexOptions {
        &self.options
    }

    pub fn pages(&self) -> &PageStore {
        &self.pages
    }

    pub fn fingerprints(&self) -> &FingerprintIndex {
        &self.index
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::{aggregate::exact_stats, error::Error, source::ShortReadPolicy};

    fn page(fill: u8) -> Vec<u8> {
        vec![fill; 16]
    }

    fn dump_dir(pages: &[Vec<u8>]) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("pages-1.img"), pages.concat()).unwrap();
        dir
    }

    fn open(dir: &TempDir) -> PageSource {
        PageSource::from_dir(dir.path(), 16, |name| name.starts_with("pages-")).unwrap()
    }

    #[test]
    fn exact_indexes_of_dumps_on_disk() {
        let a = dump_dir(&[page(1), page(2)]);
        let b = dump_dir(&[page(1), page(3)]);
        let a = FingerprintIndex::build_exact(&open(&a), Granularity::Page).unwrap();
        let b = FingerprintIndex::build_exact(&open(&b), Granularity::Page).unwrap();
        assert_eq!(a.units(), 2);
        assert_eq!(a.lookup(&Fingerprint::of(&page(2))), [1]);

        let stats = exact_stats(&a, &b);
        assert_eq!(stats.first.common.fingerprints, 1);
        assert_eq!(stats.first.distinct.fingerprints, 1);
        assert_eq!(stats.second.distinct.fingerprints, 1);
    }

    #[test]
    fn exact_index_follows_short_read_policy() {
        let dir = tempfile::tempdir().unwrap();
        let mut data = [page(1), page(2)].concat();
        data.extend([9; 5]);
        fs::write(dir.path().join("pages-1.img"), data).unwrap();

        let dropped = FingerprintIndex::build_exact(&open(&dir), Granularity::Page).unwrap();
        assert_eq!(dropped.units(), 2);

        let padded = open(&dir).with_policy(ShortReadPolicy::Pad);
        let padded = FingerprintIndex::build_exact(&padded, Granularity::Chunk(8)).unwrap();
        assert_eq!(padded.units(), 6);
        let mut tail = vec![9; 5];
        tail.resize(8, 0);
        assert_eq!(padded.lookup(&Fingerprint::of(&tail)), [2]);
        assert_eq!(padded.lookup(&Fingerprint::of(&[0; 8])), [2]);

        let rejected = open(&dir).with_policy(ShortReadPolicy::Reject);
        assert!(matches!(
            FingerprintIndex::build_exact(&rejected, Granularity::Page),
            Err(Error::ShortRead { len: 5, unit: 16, .. })
        ));
    }

    #[test]
    fn sampled_index_reads_base_dump_from_disk() {
        let dir = dump_dir(&[page(1), page(2), page(1)]);
        let index = SampledIndex::build(&open(&dir), SampleLocations::whole_page(16)).unwrap();
        assert_eq!(index.pages().len(), 3);
        assert_eq!(&index.pages()[2], page(1).as_slice());
        assert_eq!(index.lookup(&Fingerprint::of(&page(1))), [0, 2]);
        assert_eq!(index.options(), &SampledIndexOptions::default());
    }

    #[test]
    fn exact_index_counts_occurrences() {
        let store = PageStore::from_pages(16, [&page(1)[..], &page(2), &page(1)]);
        let index = FingerprintIndex::from_pages(&store, Granularity::Page).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.units(), 3);
        assert_eq!(index.lookup(&Fingerprint::of(&page(1))), [0, 2]);
        assert_eq!(index.lookup(&Fingerprint::of(&page(2))), [1]);
        assert!(index.lookup(&Fingerprint::of(&page(3))).is_empty());
    }

    #[test]
    fn chunk_granularity_tiles_pages() {
        let mut p = page(0);
        p[8..].fill(9);
        let store = PageStore::from_pages(16, [&p[..]]);
        let index = FingerprintIndex::from_pages(&store, Granularity::Chunk(4)).unwrap();
        assert_eq!(index.units(), 4);
        assert_eq!(index.len(), 2);
        assert_eq!(index.lookup(&Fingerprint::of(&[0; 4])), [0, 0]);
        assert!(FingerprintIndex::from_pages(&store, Granularity::Chunk(5)).is_err());
    }

    #[test]
    fn build_is_idempotent() {
        let store = PageStore::from_pages(16, [&page(1)[..], &page(2), &page(3)]);
        let a = FingerprintIndex::from_pages(&store, Granularity::Chunk(8)).unwrap();
        let b = FingerprintIndex::from_pages(&store, Granularity::Chunk(8)).unwrap();
        assert_eq!(a, b);

        let locations = SampleLocations::seeded(16, 4, 2, 1).unwrap();
        let opts = SampledIndexOptions::default();
        let a = SampledIndex::from_pages(store.clone(), locations.clone(), opts).unwrap();
        let b = SampledIndex::from_pages(store, locations, opts).unwrap();
        assert_eq!(a.fingerprints(), b.fingerprints());
    }

    #[test]
    fn sampled_index_records_page_once_per_fingerprint() {
        let store = PageStore::from_pages(16, [&page(5)[..]]);
        let locations = SampleLocations::from_offsets(16, 4, vec![0, 8]).unwrap();
        let index =
            SampledIndex::from_pages(store, locations, SampledIndexOptions::default()).unwrap();
        assert_eq!(index.lookup(&Fingerprint::of(&[5; 4])), [0]);
        assert_eq!(index.fingerprints().units(), 1);
    }

    #[test]
    fn sampled_index_keeps_pages() {
        let store = PageStore::from_pages(16, [&page(1)[..], &page(2)]);
        let index = SampledIndex::from_pages(
            store.clone(),
            SampleLocations::whole_page(16),
            SampledIndexOptions::default(),
        )
        .unwrap();
        assert_eq!(index.pages(), &store);
    }

    #[test]
    fn bucket_limit_caps_fan_out() {
        let pages: Vec<Vec<u8>> = (0..10u8)
            .map(|i| {
                let mut p = page(0xAA);
                p[15] = i;
                p
            })
            .collect();
        let store = PageStore::from_pages(16, pages.iter().map(Vec::as_slice));
        let locations = SampleLocations::from_offsets(16, 4, vec![0]).unwrap();
        let shared = Fingerprint::of(&[0xAA; 4]);

        let unbounded =
            SampledIndex::from_pages(store.clone(), locations.clone(), Default::default())
                .unwrap();
        assert_eq!(unbounded.lookup(&shared).len(), 10);

        let options = SampledIndexOptions {
            bucket_limit: NonZeroUsize::new(3),
            ..Default::default()
        };
        let bounded = SampledIndex::from_pages(store, locations, options).unwrap();
        let kept = bounded.lookup(&shared);
        assert_eq!(kept.len(), 3);
        assert!(kept.iter().all(|&p| p < 10));
    }

    #[test]
    fn zero_samples_can_be_skipped() {
        let store = PageStore::from_pages(16, [&page(0)[..], &page(1)]);
        let options = SampledIndexOptions {
            skip_zero_samples: true,
            ..Default::default()
        };
        let index = SampledIndex::from_pages(store, SampleLocations::whole_page(16), options)
            .unwrap();
        assert!(index.lookup(&Fingerprint::of(&page(0))).is_empty());
        assert_eq!(index.lookup(&Fingerprint::of(&page(1))), [1]);
    }

    #[test]
    fn mismatched_page_size_is_rejected() {
        let store = PageStore::from_pages(16, [&page(1)[..]]);
        assert!(
            SampledIndex::from_pages(
                store,
                SampleLocations::whole_page(32),
                SampledIndexOptions::default()
            )
            .is_err()
        );
    }
}
