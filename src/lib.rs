//! Estimates how much two memory snapshots could share: exact page and chunk
//! deduplication, and sampled fingerprint matching followed by per-page
//! binary deltas.

pub mod aggregate;
pub mod delta;
mod error;
pub mod fingerprint;
pub mod flags;
pub mod index;
pub mod matcher;
mod page;
pub mod recompress;
pub mod sampler;
pub mod source;

pub use crate::{
    error::{Error, Result},
    page::{DEFAULT_PAGE_SIZE, Geometry, PageIndex, PageStore, is_zero},
};
