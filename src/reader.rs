//! Message read loop over an external frame layer
//!
//! Frame parsing, unmasking and the transport live outside this crate.
//! [`FrameSource`] is the seam: it reports frame headers and hands out
//! unmasked payload bytes. [`MessageReader`] drives an [`InflateSession`]
//! over it and suspends only while the source is waiting on the transport.

use std::future::Future;

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;

use crate::Config;
use crate::deflate::DeflateDecoder;
use crate::error::{Error, Result};
use crate::inflate::Inflate;
use crate::session::{InflateSession, Step};

/// Header fields of one frame of a compressed message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// FIN bit: last frame of the message
    pub fin: bool,
    /// Payload length from the frame header
    pub payload_len: u64,
}

impl FrameInfo {
    /// Create frame info
    #[inline]
    pub fn new(payload_len: u64, fin: bool) -> Self {
        Self { fin, payload_len }
    }
}

/// Frame-layer collaborator feeding a compressed message
pub trait FrameSource {
    /// Wait for the header of the next frame of the current message
    fn next_frame(&mut self) -> impl Future<Output = Result<FrameInfo>> + Send;

    /// Append at most `limit` payload bytes of the current frame to `buf`
    ///
    /// Returns the number of bytes appended; 0 means the transport closed.
    fn read_payload(
        &mut self,
        buf: &mut BytesMut,
        limit: usize,
    ) -> impl Future<Output = Result<usize>> + Send;
}

/// Item sent by a frame-parsing task to a [`ChannelSource`]
#[derive(Debug, Clone)]
pub enum FramePart {
    /// Header of the next frame
    Header(FrameInfo),
    /// Unmasked payload bytes of the current frame
    Payload(Bytes),
}

/// [`FrameSource`] fed by a frame-parsing task over a tokio channel
#[derive(Debug)]
pub struct ChannelSource {
    rx: mpsc::Receiver<FramePart>,
    pending: Bytes,
}

impl ChannelSource {
    /// Wrap a receiver
    pub fn new(rx: mpsc::Receiver<FramePart>) -> Self {
        Self {
            rx,
            pending: Bytes::new(),
        }
    }

    /// Create a bounded channel and the source reading from it
    pub fn channel(capacity: usize) -> (mpsc::Sender<FramePart>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(rx))
    }
}

impl FrameSource for ChannelSource {
    async fn next_frame(&mut self) -> Result<FrameInfo> {
        if !self.pending.is_empty() {
            return Err(Error::Protocol("frame header before payload was drained"));
        }
        match self.rx.recv().await {
            Some(FramePart::Header(info)) => Ok(info),
            Some(FramePart::Payload(_)) => Err(Error::Protocol("payload without frame header")),
            None => Err(Error::ConnectionClosed),
        }
    }

    async fn read_payload(&mut self, buf: &mut BytesMut, limit: usize) -> Result<usize> {
        while self.pending.is_empty() {
            match self.rx.recv().await {
                Some(FramePart::Payload(bytes)) => self.pending = bytes,
                Some(FramePart::Header(_)) => {
                    return Err(Error::Protocol("frame header inside payload"));
                }
                None => return Ok(0),
            }
        }

        let n = limit.min(self.pending.len());
        buf.extend_from_slice(&self.pending.split_to(n));
        Ok(n)
    }
}

/// Summary of one decompressed message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageStats {
    /// Frames the message spanned
    pub frames: u32,
    /// Compressed payload bytes consumed
    pub compressed: u64,
    /// Decompressed bytes delivered
    pub decompressed: u64,
    /// Trailer inflate calls made
    pub trailer_calls: u32,
}

/// Reads and inflates compressed messages from a [`FrameSource`]
///
/// Dropping a `read_message` future mid-message leaves the decoder's
/// window out of step with the peer; call [`MessageReader::abandon`] or
/// tear the connection down.
#[derive(Debug)]
pub struct MessageReader {
    config: Config,
    input: BytesMut,
}

impl MessageReader {
    /// Create a reader
    pub fn new(config: Config) -> Self {
        let input = BytesMut::with_capacity(config.read_chunk_size);
        Self { config, input }
    }

    /// Reader configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Inflate the next compressed message, appending it to `out`
    pub async fn read_message<I, S>(
        &mut self,
        decoder: &mut DeflateDecoder<I>,
        source: &mut S,
        out: &mut BytesMut,
    ) -> Result<MessageStats>
    where
        I: Inflate,
        S: FrameSource,
    {
        self.input.clear();
        let mut session =
            InflateSession::new(self.config.max_message_size, self.config.max_trailer_steps);

        let first = source.next_frame().await?;
        session.begin_frame(first.payload_len, first.fin)?;

        loop {
            // Only offer output space to steps that will inflate
            if session.needs_input(self.input.len()) {
                self.fetch(&mut session, source).await?;
                continue;
            }

            let start = out.len();
            out.resize(start + self.config.output_chunk_size, 0);

            let step = session.step(decoder, &mut self.input, &mut out[start..]);
            let produced = match &step {
                Ok(Step::Output { produced, .. }) => *produced,
                _ => 0,
            };
            out.truncate(start + produced);

            match step? {
                Step::Output { complete: true, .. } => break,
                Step::Output { .. } => {}
                Step::NeedInput => self.fetch(&mut session, source).await?,
            }
        }

        Ok(MessageStats {
            frames: session.frames(),
            compressed: session.consumed_total(),
            decompressed: session.produced_total(),
            trailer_calls: session.trailer_calls(),
        })
    }

    /// Pull payload bytes or the next frame header from the source
    async fn fetch<S: FrameSource>(
        &mut self,
        session: &mut InflateSession,
        source: &mut S,
    ) -> Result<()> {
        let remaining = session.remaining_compressed();

        if remaining == 0 {
            let frame = source.next_frame().await?;
            return session.begin_frame(frame.payload_len, frame.fin);
        }

        let want = remaining.min(self.config.read_chunk_size as u64) as usize;
        let n = source.read_payload(&mut self.input, want).await?;
        if n == 0 {
            tracing::debug!(remaining, "transport closed inside compressed message");
            return Err(Error::ConnectionClosed);
        }
        if n > want {
            return Err(Error::Protocol("frame source returned more than requested"));
        }

        tracing::trace!(read = n, remaining, "fetched compressed payload");
        Ok(())
    }

    /// Drop buffered input and the decoder window after an abandoned read
    pub fn abandon<I: Inflate>(&mut self, decoder: &mut DeflateDecoder<I>) {
        self.input.clear();
        decoder.reset();
    }
}
