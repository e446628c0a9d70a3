//! Comparison statistics over fingerprint indexes and patch results.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::{
    error::{Error, Result},
    flags::{PageFlags, set_bits},
    index::FingerprintIndex,
    matcher::BestPatch,
    page::PageIndex,
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub fingerprints: u64,
    pub occurrences: u64,
}

impl Tally {
    fn add(&mut self, occurrences: usize) {
        self.fingerprints += 1;
        self.occurrences += occurrences as u64;
    }
}

/// Counts for one dump of a pair.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SideStats {
    pub common: Tally,
    pub distinct: Tally,
}

impl SideStats {
    pub fn total(&self) -> Tally {
        Tally {
            fingerprints: self.common.fingerprints + self.distinct.fingerprints,
            occurrences: self.common.occurrences + self.distinct.occurrences,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExactStats {
    pub first: SideStats,
    pub second: SideStats,
}

/// Splits the fingerprints of two exact indexes into common and distinct sets.
#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
pub fn exact_stats(first: &FingerprintIndex, second: &FingerprintIndex) -> ExactStats {
    let mut stats = ExactStats::default();
    for (fingerprint, pages) in first.iter() {
        let other = second.lookup(fingerprint);
        if other.is_empty() {
            stats.first.distinct.add(pages.len());
        } else {
            stats.first.common.add(pages.len());
            stats.second.common.add(other.len());
        }
    }
    for (fingerprint, pages) in second.iter() {
        if !first.contains(fingerprint) {
            stats.second.distinct.add(pages.len());
        }
    }
    #[cfg(feature = "tracing")]
    tracing::info!(
        common = stats.first.common.fingerprints,
        distinct_first = stats.first.distinct.fingerprints,
        distinct_second = stats.second.distinct.fingerprints,
        "compared fingerprints"
    );
    stats
}

/// Occurrences per flag bit, plus the overall number of occurrences.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct FlagCounts {
    pub total: u64,
    pub bits: BTreeMap<u32, u64>,
}

impl FlagCounts {
    fn credit(&mut self, flags: u64) {
        self.total += 1;
        for bit in set_bits(flags) {
            *self.bits.entry(bit).or_default() += 1;
        }
    }

    pub fn bit(&self, bit: u32) -> u64 {
        self.bits.get(&bit).copied().unwrap_or(0)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SideFlagStats {
    pub common: FlagCounts,
    pub distinct: FlagCounts,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct FlagStats {
    pub first: SideFlagStats,
    pub second: SideFlagStats,
}

/// Like [`exact_stats`], but counting the flag bits of every occurrence.
#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
pub fn flag_stats(
    first: &FingerprintIndex,
    first_flags: &PageFlags,
    second: &FingerprintIndex,
    second_flags: &PageFlags,
) -> Result<FlagStats> {
    fn credit(counts: &mut FlagCounts, pages: &[PageIndex], flags: &PageFlags) -> Result<()> {
        for &page in pages {
            let value = flags.get(page).ok_or(Error::MissingFlags {
                page,
                flags: flags.len(),
            })?;
            counts.credit(value);
        }
        Ok(())
    }

    let mut stats = FlagStats::default();
    for (fingerprint, pages) in first.iter() {
        let other = second.lookup(fingerprint);
        if other.is_empty() {
            credit(&mut stats.first.distinct, pages, first_flags)?;
        } else {
            credit(&mut stats.first.common, pages, first_flags)?;
            credit(&mut stats.second.common, other, second_flags)?;
        }
    }
    for (fingerprint, pages) in second.iter() {
        if !first.contains(fingerprint) {
            credit(&mut stats.second.distinct, pages, second_flags)?;
        }
    }
    Ok(stats)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PatchStats {
    pub pages: u64,
    /// Pages for which some candidate was found.
    pub patched_pages: u64,
    pub raw_length: u64,
    /// Stored volume: deltas where a candidate was found, raw pages elsewhere.
    pub patched_length: u64,
    /// Delta payload volume alone.
    pub patch_length: u64,
    pub recompressed_patch_length: Option<u64>,
}

/// Running patch totals for one target dump.
#[derive(Debug, Clone)]
pub struct PatchTally {
    page_size: u64,
    clamp_to_raw: bool,
    stats: PatchStats,
}

impl PatchTally {
    pub fn new(page_size: usize, clamp_to_raw: bool) -> Self {
        Self {
            page_size: page_size as u64,
            clamp_to_raw,
            stats: PatchStats::default(),
        }
    }

    pub fn push(&mut self, patch: BestPatch) {
        let stats = &mut self.stats;
        stats.pages += 1;
        stats.raw_length += self.page_size;
        if !patch.used_candidate() {
            stats.patched_length += self.page_size;
            return;
        }
        let length = patch.length as u64;
        stats.patched_pages += 1;
        stats.patch_length += length;
        stats.patched_length += if self.clamp_to_raw {
            length.min(self.page_size)
        } else {
            length
        };
    }

    pub fn finish(self) -> PatchStats {
        self.stats
    }
}

pub fn patch_stats(
    page_size: usize,
    patches: impl IntoIterator<Item = BestPatch>,
    clamp_to_raw: bool,
) -> PatchStats {
    let mut tally = PatchTally::new(page_size, clamp_to_raw);
    for patch in patches {
        tally.push(patch);
    }
    tally.finish()
}
