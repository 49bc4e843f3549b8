//! Streaming inflater engine
//!
//! The controller in [`crate::session`] only needs a stateful raw-deflate
//! decompressor that reports how many bytes it consumed and produced per
//! call. [`Inflate`] is that seam; [`FlateInflater`] is the zlib-backed
//! implementation used on real connections.

use flate2::{Decompress, FlushDecompress, Status};

use crate::MAX_WINDOW_BITS;
use crate::error::Result;

/// zlib refuses raw windows below 2^9; a larger window still decodes a
/// stream produced with a smaller one.
const MIN_INFLATE_WINDOW_BITS: u8 = 9;

/// Outcome of one inflate call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InflateStatus {
    /// Bytes taken from the input slice
    pub consumed: usize,
    /// Bytes written to the front of the output slice
    pub produced: usize,
    /// The peer closed its deflate stream with a BFINAL block
    pub stream_end: bool,
}

/// A stateful streaming decompressor
///
/// Context is preserved across calls until [`Inflate::reset`] is invoked.
pub trait Inflate {
    /// Inflate as much of `input` into `output` as possible
    fn inflate(&mut self, input: &[u8], output: &mut [u8]) -> Result<InflateStatus>;

    /// Drop the LZ77 window and start a fresh raw stream
    fn reset(&mut self);
}

impl<T: Inflate + ?Sized> Inflate for &mut T {
    fn inflate(&mut self, input: &[u8], output: &mut [u8]) -> Result<InflateStatus> {
        (**self).inflate(input, output)
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}

impl<T: Inflate + ?Sized> Inflate for Box<T> {
    fn inflate(&mut self, input: &[u8], output: &mut [u8]) -> Result<InflateStatus> {
        (**self).inflate(input, output)
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}

/// Raw-deflate inflater backed by zlib through `flate2`
pub struct FlateInflater {
    decompress: Decompress,
    window_bits: u8,
}

impl FlateInflater {
    /// Create an inflater for the negotiated LZ77 window size
    pub fn new(window_bits: u8) -> Self {
        let window_bits = window_bits.clamp(MIN_INFLATE_WINDOW_BITS, MAX_WINDOW_BITS);
        Self {
            decompress: Decompress::new_with_window_bits(false, window_bits),
            window_bits,
        }
    }

    /// Window bits actually used by the inflater
    pub fn window_bits(&self) -> u8 {
        self.window_bits
    }
}

impl Default for FlateInflater {
    fn default() -> Self {
        Self::new(MAX_WINDOW_BITS)
    }
}

impl Inflate for FlateInflater {
    fn inflate(&mut self, input: &[u8], output: &mut [u8]) -> Result<InflateStatus> {
        let before_in = self.decompress.total_in();
        let before_out = self.decompress.total_out();

        let status = self
            .decompress
            .decompress(input, output, FlushDecompress::Sync)?;

        let consumed = (self.decompress.total_in() - before_in) as usize;
        let produced = (self.decompress.total_out() - before_out) as usize;
        let stream_end = status == Status::StreamEnd;

        if stream_end {
            // Anything after a BFINAL block belongs to a new raw stream.
            tracing::debug!(consumed, produced, "deflate stream ended with BFINAL block");
            self.decompress.reset(false);
        }

        Ok(InflateStatus {
            consumed,
            produced,
            stream_end,
        })
    }

    fn reset(&mut self) {
        self.decompress.reset(false);
    }
}
