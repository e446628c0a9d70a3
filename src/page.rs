use std::ops::Index;

use serde::Serialize;

use crate::error::{Result, config};

pub const DEFAULT_PAGE_SIZE: usize = 1024 * 4;

// 0-based position of a page across all files of one dump
pub type PageIndex = u32;

/// Page and chunk sizes for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Geometry {
    page_size: usize,
    chunk_size: usize,
}

impl Geometry {
    pub fn new(page_size: usize, chunk_size: usize) -> Result<Self> {
        if page_size == 0 {
            return Err(config("page size must be positive"));
        }
        if chunk_size == 0 {
            return Err(config("chunk size must be positive"));
        }
        if chunk_size > page_size {
            return Err(config(format!(
                "chunk size {chunk_size} exceeds page size {page_size}"
            )));
        }
        Ok(Self {
            page_size,
            chunk_size,
        })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of consecutive chunks a page is tiled into.
    pub fn chunks_per_page(&self) -> Result<usize> {
        if !self.page_size.is_multiple_of(self.chunk_size) {
            return Err(config(format!(
                "chunk size {} does not evenly divide page size {}",
                self.chunk_size, self.page_size
            )));
        }
        Ok(self.page_size / self.chunk_size)
    }
}

pub fn is_zero(bytes: &[u8]) -> bool {
    // This optimizes better than a naive loop
    let (blocks, rem) = bytes.as_chunks::<64>();
    blocks.iter().all(|b| b.iter().all(|&y| y == 0)) && rem.iter().all(|&y| y == 0)
}

pub fn page_xor(a: &[u8], b: &[u8], out: &mut Vec<u8>) {
    assert_eq!(a.len(), b.len(), "pages should have equal length");
    out.clear();
    out.extend(a.iter().zip(b).map(|(x, y)| x ^ y));
}

/// Pages of one dump kept in a single contiguous buffer.
///
/// Peak memory is `len() * page_size()` bytes; the whole base dump is held for
/// the lifetime of a run so deltas can be taken against any page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageStore {
    page_size: usize,
    data: Vec<u8>,
}

impl PageStore {
    pub fn new(page_size: usize) -> Self {
        Self::with_capacity(page_size, 0)
    }

    pub fn with_capacity(page_size: usize, pages: usize) -> Self {
        assert!(page_size > 0, "page size must be positive");
        Self {
            page_size,
            data: Vec::with_capacity(pages * page_size),
        }
    }

    pub fn from_pages<'a>(page_size: usize, pages: impl IntoIterator<Item = &'a [u8]>) -> Self {
        let mut store = Self::new(page_size);
        for page in pages {
            store.push(page);
        }
        store
    }

    pub fn push(&mut self, page: &[u8]) -> PageIndex {
        assert_eq!(page.len(), self.page_size, "page has the wrong length");
        let index = self.len() as PageIndex;
        self.data.extend_from_slice(page);
        index
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn len(&self) -> usize {
        self.data.len() / self.page_size
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, index: PageIndex) -> Option<&[u8]> {
        let start = (index as usize).checked_mul(self.page_size)?;
        self.data.get(start..start + self.page_size)
    }

    pub fn iter(&self) -> impl Iterator<Item = (PageIndex, &[u8])> {
        self.data
            .chunks_exact(self.page_size)
            .enumerate()
            .map(|(i, page)| (i as PageIndex, page))
    }
}

impl Index<PageIndex> for PageStore {
    type Output = [u8];

    fn index(&self, index: PageIndex) -> &Self::Output {
        self.get(index).expect("page index out of range")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_rejects_oversized_chunks() {
        assert!(Geometry::new(16, 32).is_err());
        assert!(Geometry::new(0, 0).is_err());
        assert!(Geometry::new(16, 0).is_err());
        assert_eq!(Geometry::new(16, 16).unwrap().chunk_size(), 16);
    }

    #[test]
    fn chunks_per_page_requires_even_tiling() {
        assert_eq!(Geometry::new(4096, 512).unwrap().chunks_per_page().unwrap(), 8);
        assert!(Geometry::new(4096, 1000).unwrap().chunks_per_page().is_err());
    }

    #[test]
    fn zero_detection_covers_tail() {
        let mut bytes = vec![0u8; 100];
        assert!(is_zero(&bytes));
        bytes[99] = 1;
        assert!(!is_zero(&bytes));
        bytes[99] = 0;
        bytes[3] = 7;
        assert!(!is_zero(&bytes));
    }

    #[test]
    fn store_indexes_pages_in_order() {
        let store = PageStore::from_pages(4, [&[1, 1, 1, 1][..], &[2, 2, 2, 2], &[3, 3, 3, 3]]);
        assert_eq!(store.len(), 3);
        assert_eq!(&store[1], &[2, 2, 2, 2]);
        assert_eq!(store.get(3), None);
        let firsts: Vec<_> = store.iter().map(|(i, p)| (i, p[0])).collect();
        assert_eq!(firsts, [(0, 1), (1, 2), (2, 3)]);
    }

    #[test]
    fn xor_of_equal_pages_is_zero() {
        let mut out = Vec::new();
        page_xor(&[5, 6, 7], &[5, 6, 7], &mut out);
        assert!(is_zero(&out));
        page_xor(&[5, 6, 7], &[5, 0, 7], &mut out);
        assert_eq!(out, [0, 6, 0]);
    }
}
