use serde::Serialize;

use crate::{
    aggregate::{PatchStats, PatchTally},
    delta::Encoder,
    error::{Result, config},
    fingerprint::Fingerprint,
    index::SampledIndex,
    page::{PageIndex, is_zero},
    recompress::{Recompress, RecompressSink},
    source::PageSource,
};

/// Cheapest way found to store one target page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BestPatch {
    /// Delta length in bytes, or the page size when no candidate was found.
    pub length: usize,
    pub candidate: Option<PageIndex>,
}

impl BestPatch {
    pub fn raw(page_size: usize) -> Self {
        Self {
            length: page_size,
            candidate: None,
        }
    }

    pub fn used_candidate(&self) -> bool {
        self.candidate.is_some()
    }
}

/// Finds the base page a target page diffs against most cheaply.
///
/// Only base pages sharing at least one sampled chunk with the target are
/// tried, so a similar page that happens to differ on every sampled offset is
/// never found.
pub struct Matcher<'a> {
    index: &'a SampledIndex,
    candidates: Vec<PageIndex>,
    encoder: Encoder,
    best: Vec<u8>,
}

impl<'a> Matcher<'a> {
    pub fn new(index: &'a SampledIndex) -> Self {
        Self {
            index,
            candidates: Vec::new(),
            encoder: Encoder::new(),
            best: Vec::new(),
        }
    }

    /// Distinct base pages sharing a sampled fingerprint with `target`, ascending.
    pub fn candidates(&mut self, target: &[u8]) -> &[PageIndex] {
        let index = self.index;
        let skip_zero = index.options().skip_zero_samples;
        self.candidates.clear();
        for chunk in index.locations().chunks(target) {
            if skip_zero && is_zero(chunk) {
                continue;
            }
            self.candidates
                .extend_from_slice(index.lookup(&Fingerprint::of(chunk)));
        }
        self.candidates.sort_unstable();
        self.candidates.dedup();
        &self.candidates
    }

    pub fn best_patch(&mut self, target: &[u8]) -> Result<BestPatch> {
        Ok(self.best_delta(target)?.0)
    }

    /// Like [`Matcher::best_patch`], also returning the winning delta bytes.
    /// The slice is empty when no candidate was found.
    pub fn best_delta(&mut self, target: &[u8]) -> Result<(BestPatch, &[u8])> {
        let page_size = self.index.pages().page_size();
        if target.len() != page_size {
            return Err(config(format!(
                "target page has {} bytes, base pages have {page_size}",
                target.len()
            )));
        }
        Ok(self.best_delta_unchecked(target))
    }

    // `target` must be exactly one page long
    fn best_delta_unchecked(&mut self, target: &[u8]) -> (BestPatch, &[u8]) {
        let index = self.index;
        self.candidates(target);
        self.best.clear();
        let mut best = BestPatch::raw(index.pages().page_size());
        for &candidate in &self.candidates {
            let Some(base) = index.pages().get(candidate) else {
                continue;
            };
            let delta = self.encoder.encode(base, target);
            // ties keep the lowest page index
            if best.candidate.is_none() || delta.len() < best.length {
                best = BestPatch {
                    length: delta.len(),
                    candidate: Some(candidate),
                };
                self.best.clear();
                self.best.extend_from_slice(delta);
                if best.length == 0 {
                    break;
                }
            }
        }
        (best, &self.best)
    }
}

pub fn best_patch(target: &[u8], index: &SampledIndex) -> Result<BestPatch> {
    Matcher::new(index).best_patch(target)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PatchOptions {
    /// Count a delta larger than a page as a raw page in the stored volume.
    pub clamp_to_raw: bool,
    pub recompress: Recompress,
}

/// Runs every page of `target` through the matcher and tallies the result.
#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
pub fn patch_source(
    index: &SampledIndex,
    target: &PageSource,
    options: PatchOptions,
) -> Result<PatchStats> {
    let page_size = index.pages().page_size();
    if target.page_size() != page_size {
        return Err(config(format!(
            "target dump uses {}-byte pages, base dump {page_size}-byte pages",
            target.page_size()
        )));
    }

    let mut matcher = Matcher::new(index);
    let mut tally = PatchTally::new(page_size, options.clamp_to_raw);
    let mut sink = RecompressSink::new(options.recompress)?;
    let mut write_result = Ok(());
    target.scan(|_, page| {
        let (patch, delta) = matcher.best_delta_unchecked(page);
        tally.push(patch);
        if write_result.is_ok() {
            write_result = sink.write(delta);
        }
    })?;
    write_result?;

    let mut stats = tally.finish();
    stats.recompressed_patch_length = sink.finish()?;
    #[cfg(feature = "tracing")]
    tracing::info!(
        raw_length = stats.raw_length,
        patched_length = stats.patched_length,
        patch_length = stats.patch_length,
        "patched target dump"
    );
    Ok(stats)
}
