//! Binary deltas between two equally sized pages.
//!
//! A delta is `target ^ base` run through the smallest of a few byte-level
//! encoders, prefixed by one method byte. Identical pages give an empty delta.
//! Nothing fits worse than raw, so a delta is at most one byte longer than the
//! page.

use crate::{
    error::{Error, Result},
    page::{is_zero, page_xor},
};

pub type Method = u8;

pub const RAW: Method = 0b00;
pub const BYTE_PLACEMENT: Method = 0b01;
pub const RUN_LENGTH: Method = 0b10;
pub const ZERO_LENGTH: Method = 0b11;

type CodecError = &'static str;
type CodecResult<T> = core::result::Result<T, CodecError>;

fn write(output: &mut &mut [u8], data: &[u8]) -> CodecResult<()> {
    let segment = output
        .split_off_mut(..data.len())
        .ok_or("Ran out of output buffer")?;
    segment.copy_from_slice(data);
    Ok(())
}

fn read<'a>(input: &mut &'a [u8], len: usize) -> CodecResult<&'a [u8]> {
    input.split_off(..len).ok_or("Ran out of input buffer")
}

fn read_pair(input: &mut &[u8]) -> CodecResult<[u8; 2]> {
    let pair = read(input, 2)?;
    Ok([pair[0], pair[1]])
}

fn read_byte(input: &mut &[u8]) -> CodecResult<u8> {
    Ok(read(input, 1)?[0])
}

/// Positions and values of the nonzero bytes.
///
/// The input is split into 256-byte blocks so that positions fit a u8.
/// Counts are one-biased, so an all-zero block still stores one placement.
///
/// [u8]: number of 1-biased placements per block
/// [
///      u8: position
///      u8: data
/// ]
struct BytePlacement;

impl BytePlacement {
    const BLOCK: usize = 256;

    fn compress(xor: &[u8], full_output: &mut [u8]) -> CodecResult<usize> {
        let mut output = &mut full_output[..];
        let num_blocks = xor.len().div_ceil(Self::BLOCK);
        let mut head = output
            .split_off_mut(..num_blocks)
            .ok_or("Not enough output space")?;
        for block in xor.chunks(Self::BLOCK) {
            let num_nonzero = block.iter().filter(|b| **b != 0).count();
            if num_nonzero == 0 {
                write(&mut head, &[0])?;
                write(&mut output, &[0, 0])?;
                continue;
            }
            write(&mut head, &[(num_nonzero - 1) as u8])?;
            for (pos, &byte) in block.iter().enumerate() {
                if byte != 0 {
                    write(&mut output, &[pos as u8, byte])?;
                }
            }
        }
        let output_len = output.len();
        Ok(full_output.len() - output_len)
    }

    fn decompress(input: &mut &[u8], output: &mut [u8]) -> CodecResult<()> {
        output.fill(0);
        let num_blocks = output.len().div_ceil(Self::BLOCK);
        let header = read(input, num_blocks)?;
        for (block, &count) in output.chunks_mut(Self::BLOCK).zip(header) {
            for _ in 0..count as usize + 1 {
                let [pos, data] = read_pair(input)?;
                *block
                    .get_mut(pos as usize)
                    .ok_or("Placement outside of block")? = data;
            }
        }
        Ok(())
    }
}

/// A byte and the number of times it repeats.
///
/// [
///      u8: data
///      u8: count
/// ]
struct RunLength;

impl RunLength {
    fn compress(xor: &[u8], full_output: &mut [u8]) -> CodecResult<usize> {
        let mut output = &mut full_output[..];
        let Some((&first, rest)) = xor.split_first() else {
            return Ok(0);
        };

        let mut last = first;
        let mut count = 1u8;
        for &byte in rest {
            if byte == last {
                if count == u8::MAX {
                    write(&mut output, &[byte, count])?;
                    count = 0;
                }
                count += 1;
                continue;
            }
            write(&mut output, &[last, count])?;
            last = byte;
            count = 1;
        }
        write(&mut output, &[last, count])?;
        let output_len = output.len();
        Ok(full_output.len() - output_len)
    }

    fn decompress(input: &mut &[u8], output: &mut [u8]) -> CodecResult<()> {
        let mut output = &mut output[..];
        while !output.is_empty() {
            let [data, count] = read_pair(input)?;
            if count == 0 {
                return Err("Empty run");
            }
            let len = (count as usize).min(output.len());
            let run = output
                .split_off_mut(..len)
                .ok_or("Ran out of output buffer")?;
            run.fill(data);
        }
        Ok(())
    }
}

/// Alternating zero runs and literal segments.
///
/// [
///      u8: number of zeroes
///      u8: length of data
///      [u8]: data
/// ]
/// A trailing zero run is written without a length byte.
struct ZeroLength;

impl ZeroLength {
    fn compress(xor: &[u8], full_output: &mut [u8]) -> CodecResult<usize> {
        let mut output = &mut full_output[..];
        let mut input = xor;

        while !input.is_empty() {
            let num_zeros = input
                .iter()
                .position(|e| *e != 0)
                .unwrap_or(input.len())
                .min(u8::MAX as usize);
            input = &input[num_zeros..];
            let num_data = input
                .windows(2)
                .position(|e| e == [0, 0])
                .unwrap_or(input.len())
                .min(u8::MAX as usize);
            let (data, rem) = input.split_at(num_data);
            input = rem;
            if input.is_empty() && num_data == 0 {
                write(&mut output, &[num_zeros as u8])?;
                break;
            }
            write(&mut output, &[num_zeros as u8, num_data as u8])?;
            write(&mut output, data)?;
        }
        let output_len = output.len();
        Ok(full_output.len() - output_len)
    }

    fn decompress(input: &mut &[u8], output: &mut [u8]) -> CodecResult<()> {
        let mut output = &mut output[..];
        while !output.is_empty() {
            let num_zeros = read_byte(input)? as usize;
            output
                .split_off_mut(..num_zeros)
                .ok_or("Zero run exceeds output buffer")?
                .fill(0);
            if output.is_empty() {
                break;
            }
            let data_len = read_byte(input)? as usize;
            let data = read(input, data_len).map_err(|_| "Segment exceeds input buffer")?;
            write(&mut output, data)?;
        }
        Ok(())
    }
}

/// Reusable buffers for computing many deltas of the same page size.
#[derive(Debug, Default)]
pub struct Encoder {
    xor: Vec<u8>,
    scratch: Vec<u8>,
    best: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delta turning `base` into `target`; the returned slice lives until the next call.
    pub fn encode(&mut self, base: &[u8], target: &[u8]) -> &[u8] {
        page_xor(base, target, &mut self.xor);
        self.best.clear();
        if is_zero(&self.xor) {
            return &self.best;
        }

        self.best.push(RAW);
        self.best.extend_from_slice(&self.xor);

        let encoders: [(Method, fn(&[u8], &mut [u8]) -> CodecResult<usize>); 3] = [
            (BYTE_PLACEMENT, BytePlacement::compress),
            (RUN_LENGTH, RunLength::compress),
            (ZERO_LENGTH, ZeroLength::compress),
        ];
        for (method, compress) in encoders {
            // only payloads strictly smaller than the current best are of interest
            self.scratch.clear();
            self.scratch.resize(self.best.len() - 2, 0);
            if let Ok(len) = compress(&self.xor, &mut self.scratch)
                && len + 1 < self.best.len()
            {
                self.best.clear();
                self.best.push(method);
                self.best.extend_from_slice(&self.scratch[..len]);
            }
        }
        &self.best
    }
}

pub fn encode(base: &[u8], target: &[u8]) -> Vec<u8> {
    Encoder::new().encode(base, target).to_vec()
}

/// Rebuilds the target page from `base` and a delta produced by [`encode`].
pub fn apply(base: &[u8], delta: &[u8]) -> Result<Vec<u8>> {
    let Some((&method, mut payload)) = delta.split_first() else {
        return Ok(base.to_vec());
    };
    let mut xor = vec![0; base.len()];
    let decoded = match method {
        RAW => read(&mut payload, base.len()).map(|raw| xor.copy_from_slice(raw)),
        BYTE_PLACEMENT => BytePlacement::decompress(&mut payload, &mut xor),
        RUN_LENGTH => RunLength::decompress(&mut payload, &mut xor),
        ZERO_LENGTH => ZeroLength::decompress(&mut payload, &mut xor),
        _ => Err("Unknown method"),
    };
    decoded.map_err(Error::CorruptDelta)?;
    if !payload.is_empty() {
        return Err(Error::CorruptDelta("Trailing bytes after payload"));
    }
    let mut target = Vec::with_capacity(base.len());
    page_xor(base, &xor, &mut target);
    Ok(target)
}
