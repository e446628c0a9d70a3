//! Sizing the delta stream after a general-purpose compressor.
//!
//! Deltas are streamed through the encoder into a byte counter, so nothing is
//! kept in memory beyond the compressor's own window.

use std::io::{self, Write};

use serde::Serialize;

use crate::error::Result;

const ZSTD_LEVEL: i32 = 3;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Recompress {
    #[default]
    None,
    Zstd,
    Lz4,
}

#[derive(Debug, Default)]
struct CountingWriter {
    written: u64,
}

impl Write for CountingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct RecompressSink {
    inner: Inner,
}

enum Inner {
    None,
    Zstd(zstd::Encoder<'static, CountingWriter>),
    Lz4(lz4_flex::frame::FrameEncoder<CountingWriter>),
}

impl RecompressSink {
    pub fn new(mode: Recompress) -> Result<Self> {
        let inner = match mode {
            Recompress::None => Inner::None,
            Recompress::Zstd => {
                Inner::Zstd(zstd::Encoder::new(CountingWriter::default(), ZSTD_LEVEL)?)
            }
            Recompress::Lz4 => {
                Inner::Lz4(lz4_flex::frame::FrameEncoder::new(CountingWriter::default()))
            }
        };
        Ok(Self { inner })
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        match &mut self.inner {
            Inner::None => {}
            Inner::Zstd(encoder) => encoder.write_all(bytes)?,
            Inner::Lz4(encoder) => encoder.write_all(bytes)?,
        }
        Ok(())
    }

    /// Compressed size of everything written, or `None` without a compressor.
    pub fn finish(self) -> Result<Option<u64>> {
        let counter = match self.inner {
            Inner::None => return Ok(None),
            Inner::Zstd(encoder) => encoder.finish()?,
            Inner::Lz4(encoder) => encoder.finish().map_err(io::Error::other)?,
        };
        Ok(Some(counter.written))
    }
}
