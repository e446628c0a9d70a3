//! Reading dumps as a stream of fixed-size pages.

use std::{
    fs::{self, File},
    io::{self, BufReader, Read},
    path::{Path, PathBuf},
};

use crate::{
    error::{Error, Result, config},
    page::{Geometry, PageIndex, PageStore},
};

/// What to do with bytes at the end of a file that do not fill a page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ShortReadPolicy {
    #[default]
    Drop,
    Pad,
    Reject,
}

/// Pages of one dump, read file by file in name order.
#[derive(Debug, Clone)]
pub struct PageSource {
    files: Vec<PathBuf>,
    page_size: usize,
    policy: ShortReadPolicy,
}

impl PageSource {
    /// Collects the regular files in `dir` whose name satisfies `is_page_file`.
    pub fn from_dir(
        dir: &Path,
        page_size: usize,
        is_page_file: impl Fn(&str) -> bool,
    ) -> Result<Self> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            if name.to_str().is_some_and(&is_page_file) {
                files.push(entry.path());
            }
        }
        files.sort();
        #[cfg(feature = "tracing")]
        tracing::debug!(dir = %dir.display(), files = files.len(), "collected dump files");
        Self::from_files(files, page_size)
    }

    pub fn from_files(files: Vec<PathBuf>, page_size: usize) -> Result<Self> {
        if page_size == 0 {
            return Err(config("page size must be positive"));
        }
        Ok(Self {
            files,
            page_size,
            policy: ShortReadPolicy::default(),
        })
    }

    pub fn with_policy(mut self, policy: ShortReadPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of pages a scan will produce, from file sizes alone.
    pub fn page_count(&self) -> Result<u64> {
        let unit = self.page_size as u64;
        let mut total = 0;
        for path in &self.files {
            let len = fs::metadata(path)?.len();
            total += len / unit;
            let rem = len % unit;
            if rem != 0 {
                match self.policy {
                    ShortReadPolicy::Drop => {}
                    ShortReadPolicy::Pad => total += 1,
                    ShortReadPolicy::Reject => {
                        return Err(Error::ShortRead {
                            path: path.clone(),
                            len: rem as usize,
                            unit: self.page_size,
                        });
                    }
                }
            }
        }
        Ok(total)
    }

    /// Calls `visit` with every page in dump order and returns the page count.
    pub fn scan(&self, mut visit: impl FnMut(PageIndex, &[u8])) -> Result<u64> {
        let mut buf = vec![0; self.page_size];
        let mut next: u64 = 0;
        for path in &self.files {
            let mut reader = BufReader::new(File::open(path)?);
            #[cfg(feature = "tracing")]
            let first = next;
            loop {
                let filled = read_unit(&mut reader, &mut buf)?;
                if filled == 0 {
                    break;
                }
                if filled < buf.len() {
                    match self.policy {
                        ShortReadPolicy::Drop => break,
                        ShortReadPolicy::Pad => buf[filled..].fill(0),
                        ShortReadPolicy::Reject => {
                            return Err(Error::ShortRead {
                                path: path.clone(),
                                len: filled,
                                unit: self.page_size,
                            });
                        }
                    }
                }
                let index = PageIndex::try_from(next)
                    .map_err(|_| config(format!("dump exceeds {} pages", PageIndex::MAX)))?;
                visit(index, &buf);
                next += 1;
                if filled < buf.len() {
                    break;
                }
            }
            #[cfg(feature = "tracing")]
            tracing::debug!(file = %path.display(), pages = next - first, "read dump file");
        }
        Ok(next)
    }

    /// Tiles every page into consecutive `chunk_size` chunks; each chunk is
    /// reported with the index of the page it came from.
    pub fn scan_chunks(
        &self,
        chunk_size: usize,
        mut visit: impl FnMut(PageIndex, &[u8]),
    ) -> Result<u64> {
        Geometry::new(self.page_size, chunk_size)?.chunks_per_page()?;
        let mut chunks = 0;
        self.scan(|index, page| {
            for chunk in page.chunks_exact(chunk_size) {
                visit(index, chunk);
                chunks += 1;
            }
        })?;
        Ok(chunks)
    }

    pub fn read_all(&self) -> Result<PageStore> {
        let expected = self.page_count()? as usize;
        let mut store = PageStore::with_capacity(self.page_size, expected);
        self.scan(|_, page| {
            store.push(page);
        })?;
        Ok(store)
    }
}

// Fills `buf` unless the reader hits end of file first; returns the bytes read.
fn read_unit(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
