use std::{io, path::PathBuf};

use thiserror::Error;

use crate::page::PageIndex;

#[derive(Debug, Error)]
pub enum Error {
    /// The last read of a dump file did not fill a whole unit.
    #[error("{len} trailing bytes in {} do not fill a {unit}-byte unit", path.display())]
    ShortRead {
        path: PathBuf,
        len: usize,
        unit: usize,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    /// Per-page flags were supplied for a different number of pages than the dump holds.
    #[error("metadata has {flags} entries but the dump has {pages} pages")]
    MisalignedMetadata { flags: usize, pages: u64 },

    #[error("no flag entry for page {page}, metadata has {flags} entries")]
    MissingFlags { page: PageIndex, flags: usize },

    #[error("corrupt delta: {0}")]
    CorruptDelta(&'static str),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T, E = Error> = core::result::Result<T, E>;

pub(crate) fn config(msg: impl Into<String>) -> Error {
    Error::Config(msg.into())
}
