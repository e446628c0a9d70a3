//! Per-page VMA flags, as recorded by the checkpointer next to each dump.

use crate::{
    error::{Error, Result},
    page::PageIndex,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagBit {
    pub name: &'static str,
    pub bit: u32,
}

const fn flag(name: &'static str, bit: u32) -> FlagBit {
    FlagBit { name, bit }
}

pub const VMA_FLAGS: &[FlagBit] = &[
    flag("VMA_AREA_REGULAR", 0),
    flag("VMA_AREA_STACK", 1),
    flag("VMA_AREA_VSYSCALL", 2),
    flag("VMA_AREA_VDSO", 3),
    flag("VMA_AREA_HEAP", 5),
    flag("VMA_FILE_PRIVATE", 6),
    flag("VMA_FILE_SHARED", 7),
    flag("VMA_ANON_SHARED", 8),
    flag("VMA_ANON_PRIVATE", 9),
    flag("VMA_AREA_SYSVIPC", 10),
    flag("VMA_AREA_SOCKET", 11),
    flag("VMA_AREA_VVAR", 12),
    flag("VMA_AREA_AIORING", 13),
    flag("VMA_CLOSE", 28),
    flag("VMA_NO_PROT_WRITE", 29),
    flag("VMA_PREMMAPED", 30),
    flag("VMA_UNSUPP", 31),
];

/// Positions of the set bits of `flags`, lowest first.
pub fn set_bits(mut flags: u64) -> impl Iterator<Item = u32> {
    core::iter::from_fn(move || {
        if flags == 0 {
            return None;
        }
        let bit = flags.trailing_zeros();
        flags &= flags - 1;
        Some(bit)
    })
}

/// Flag word per page of one dump, indexed like the dump's pages.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PageFlags(Vec<u64>);

impl PageFlags {
    /// Fails unless there is exactly one entry per page.
    pub fn aligned(values: Vec<u64>, pages: u64) -> Result<Self> {
        if values.len() as u64 != pages {
            return Err(Error::MisalignedMetadata {
                flags: values.len(),
                pages,
            });
        }
        Ok(Self(values))
    }

    pub fn get(&self, page: PageIndex) -> Option<u64> {
        self.0.get(page as usize).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
