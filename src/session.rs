//! Per-message inflate session
//!
//! One [`InflateSession`] drives the connection's inflater across the
//! compressed payload of a single message, possibly spread over several
//! frames and transport reads:
//!
//! - real payload bytes are fed while the current frame still has some,
//! - once the final frame is exhausted the empty-block trailer
//!   `00 00 FF FF` is fed instead,
//! - the message is complete only when a trailer step produces nothing.
//!
//! Some inflaters hand back a few stray bytes on the trailer call. That is
//! accepted as output and another trailer step runs until one comes back
//! empty. Later trailer steps only feed the part of the trailer the inflater
//! has not taken yet: re-feeding bytes it already consumed would desync the
//! window kept for the next message.
//!
//! A message whose last block has BFINAL set ends the raw stream itself. The
//! inflater re-arms for a new stream, and no trailer is fed after it: four
//! bytes into a fresh stream would be read as a stored block header and
//! leave the inflater mid-block for the next message.

use bytes::Buf;

use crate::DEFLATE_TRAILER;
use crate::deflate::DeflateDecoder;
use crate::error::{Error, Result};
use crate::inflate::Inflate;

/// Position of a session in the per-message state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for payload bytes or the next frame
    AwaitingInput,
    /// Last step fed real payload bytes
    ConsumingReal,
    /// Real input is exhausted on the final frame; next step feeds the trailer
    TrailerPending,
    /// A trailer step ran and its output is being classified
    TrailerZeroCheck,
    /// A trailer step produced nothing; the message is complete
    Done,
    /// A step failed; no further inflate calls are made
    Failed,
}

impl SessionState {
    /// Returns true once no more steps are accepted
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Done | SessionState::Failed)
    }
}

/// Result of a single session step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// No buffered payload and the frame is not final: fetch more from the
    /// frame layer (payload bytes or the next frame header)
    NeedInput,
    /// The inflater ran; `output[..produced]` holds decompressed bytes
    Output {
        /// Bytes written to the front of the output slice
        produced: usize,
        /// The message is fully decompressed
        complete: bool,
    },
}

/// Decompression state of one compressed message
#[derive(Debug)]
pub struct InflateSession {
    state: SessionState,
    /// Compressed bytes of the current frame not yet fed to the inflater
    remaining: u64,
    /// FIN bit of the current frame
    fin: bool,
    frames: u32,
    /// Decompressed bytes delivered so far
    produced: u64,
    /// Compressed bytes consumed by non-trailer steps
    consumed: u64,
    max_message_size: usize,
    max_trailer_steps: u32,
    /// How much of the current trailer the inflater has taken
    trailer_offset: usize,
    trailer_calls: u32,
    /// Trailer calls that returned stray output without filling the buffer
    stray_trailer_outputs: u32,
    /// The last inflate call finished a BFINAL block
    stream_ended: bool,
}

impl InflateSession {
    /// Create a session for a new message
    ///
    /// `max_message_size` of 0 means unlimited. `max_trailer_steps` bounds
    /// how many trailer calls may return stray output before the peer is
    /// treated as broken.
    pub fn new(max_message_size: usize, max_trailer_steps: u32) -> Self {
        Self {
            state: SessionState::AwaitingInput,
            remaining: 0,
            fin: false,
            frames: 0,
            produced: 0,
            consumed: 0,
            max_message_size,
            max_trailer_steps,
            trailer_offset: 0,
            trailer_calls: 0,
            stray_trailer_outputs: 0,
            stream_ended: false,
        }
    }

    /// Register the next frame of the message
    pub fn begin_frame(&mut self, payload_len: u64, fin: bool) -> Result<()> {
        if self.state != SessionState::AwaitingInput {
            return Err(Error::InvalidState("frame started while inflating"));
        }
        if self.fin {
            return Err(Error::InvalidState("frame after final frame"));
        }
        if self.remaining > 0 {
            return Err(Error::InvalidState("previous frame payload not consumed"));
        }

        self.remaining = payload_len;
        self.fin = fin;
        self.frames += 1;

        tracing::trace!(frame = self.frames, payload_len, fin, "inflate frame");
        Ok(())
    }

    /// Returns true when the next step would only ask for more input
    ///
    /// `buffered` is the number of payload bytes the caller holds for the
    /// current frame. Lets callers skip preparing output space.
    pub fn needs_input(&self, buffered: usize) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        if self.remaining > 0 {
            buffered == 0
        } else {
            !self.fin
        }
    }

    /// Run one inflate step
    ///
    /// `input` holds buffered payload bytes of the current frame; it is only
    /// advanced by what the inflater consumed from real payload. `output`
    /// must not be empty.
    pub fn step<I, B>(
        &mut self,
        decoder: &mut DeflateDecoder<I>,
        input: &mut B,
        output: &mut [u8],
    ) -> Result<Step>
    where
        I: Inflate,
        B: Buf + ?Sized,
    {
        match self.state {
            SessionState::Done => return Err(Error::InvalidState("message already complete")),
            SessionState::Failed => return Err(Error::InvalidState("inflate session failed")),
            _ => {}
        }
        assert!(!output.is_empty(), "inflate step needs output capacity");

        let result = self.advance(decoder, input, output);
        if result.is_err() {
            self.state = SessionState::Failed;
        }
        result
    }

    fn advance<I, B>(
        &mut self,
        decoder: &mut DeflateDecoder<I>,
        input: &mut B,
        output: &mut [u8],
    ) -> Result<Step>
    where
        I: Inflate,
        B: Buf + ?Sized,
    {
        if self.needs_input(input.remaining()) {
            self.state = SessionState::AwaitingInput;
            Ok(Step::NeedInput)
        } else if self.remaining > 0 {
            self.state = SessionState::ConsumingReal;
            self.real_step(decoder, input, output)
        } else if self.stream_ended {
            Ok(self.complete(decoder))
        } else {
            self.state = SessionState::TrailerPending;
            self.trailer_step(decoder, output)
        }
    }

    fn real_step<I, B>(
        &mut self,
        decoder: &mut DeflateDecoder<I>,
        input: &mut B,
        output: &mut [u8],
    ) -> Result<Step>
    where
        I: Inflate,
        B: Buf + ?Sized,
    {
        let chunk = input.chunk();
        let len = chunk.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let status = decoder.inflate(&chunk[..len], output)?;
        debug_assert!(status.consumed <= len && status.produced <= output.len());

        if status.consumed == 0 && status.produced == 0 {
            return Err(Error::Compression("inflater made no progress".into()));
        }
        self.check_size(status.produced)?;

        if status.stream_end {
            self.stream_ended = true;
        } else if status.consumed > 0 {
            self.stream_ended = false;
        }

        self.remaining -= status.consumed as u64;
        self.consumed += status.consumed as u64;
        input.advance(status.consumed);
        self.produced += status.produced as u64;

        self.state = if self.remaining == 0 && self.fin {
            SessionState::TrailerPending
        } else {
            SessionState::AwaitingInput
        };

        tracing::trace!(
            consumed = status.consumed,
            produced = status.produced,
            remaining = self.remaining,
            "inflate step"
        );

        Ok(Step::Output {
            produced: status.produced,
            complete: false,
        })
    }

    fn trailer_step<I: Inflate>(
        &mut self,
        decoder: &mut DeflateDecoder<I>,
        output: &mut [u8],
    ) -> Result<Step> {
        // Resume a partially taken trailer; once taken, only drain
        let status = decoder.inflate(&DEFLATE_TRAILER[self.trailer_offset..], output)?;
        self.state = SessionState::TrailerZeroCheck;
        self.trailer_calls += 1;
        self.trailer_offset = (self.trailer_offset + status.consumed).min(DEFLATE_TRAILER.len());

        if status.produced == 0 {
            return Ok(self.complete(decoder));
        }

        self.check_size(status.produced)?;

        if status.stream_end {
            // Pending output of a BFINAL block; the stream is over
            self.stream_ended = true;
        } else if status.produced < output.len() {
            // Short of a full buffer, so not pending output being drained
            self.stray_trailer_outputs += 1;
            tracing::debug!(
                produced = status.produced,
                count = self.stray_trailer_outputs,
                "trailer step returned output, feeding trailer again"
            );
            if self.stray_trailer_outputs > self.max_trailer_steps {
                tracing::warn!(
                    count = self.stray_trailer_outputs,
                    "deflate trailer never drained"
                );
                return Err(Error::Protocol("deflate trailer did not drain"));
            }
        }

        self.produced += status.produced as u64;
        self.state = SessionState::TrailerPending;

        Ok(Step::Output {
            produced: status.produced,
            complete: false,
        })
    }

    fn complete<I: Inflate>(&mut self, decoder: &mut DeflateDecoder<I>) -> Step {
        self.state = SessionState::Done;
        decoder.finish_message();
        tracing::debug!(
            frames = self.frames,
            consumed = self.consumed,
            produced = self.produced,
            trailer_calls = self.trailer_calls,
            stream_ended = self.stream_ended,
            "inflated message"
        );
        Step::Output {
            produced: 0,
            complete: true,
        }
    }

    fn check_size(&self, produced: usize) -> Result<()> {
        if self.max_message_size > 0
            && self.produced + produced as u64 > self.max_message_size as u64
        {
            tracing::debug!(
                produced = self.produced,
                next = produced,
                limit = self.max_message_size,
                "decompressed message over limit"
            );
            return Err(Error::MessageTooLarge);
        }
        Ok(())
    }

    /// Current state
    #[inline]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns true once a trailer step came back empty
    #[inline]
    pub fn is_done(&self) -> bool {
        self.state == SessionState::Done
    }

    /// Compressed bytes of the current frame still to be fed
    #[inline]
    pub fn remaining_compressed(&self) -> u64 {
        self.remaining
    }

    /// FIN bit of the current frame
    #[inline]
    pub fn is_final_frame(&self) -> bool {
        self.fin
    }

    /// Decompressed bytes delivered so far
    #[inline]
    pub fn produced_total(&self) -> u64 {
        self.produced
    }

    /// Compressed bytes consumed by real-input steps
    #[inline]
    pub fn consumed_total(&self) -> u64 {
        self.consumed
    }

    /// Number of trailer inflate calls made
    #[inline]
    pub fn trailer_calls(&self) -> u32 {
        self.trailer_calls
    }

    /// Number of frames registered
    #[inline]
    pub fn frames(&self) -> u32 {
        self.frames
    }
}
