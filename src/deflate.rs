//! Per-Message Deflate Extension (RFC 7692)
//!
//! Negotiated extension parameters, the connection-owned decoder handle that
//! carries the context-takeover policy, and the sending-side encoder.

use bytes::{Bytes, BytesMut};
use flate2::{Compress, Compression, FlushCompress};

use crate::error::{Error, Result};
use crate::inflate::{FlateInflater, Inflate, InflateStatus};
use crate::session::{InflateSession, Step};
use crate::{
    DEFAULT_MAX_TRAILER_STEPS, DEFAULT_WINDOW_BITS, DEFLATE_TRAILER, MAX_WINDOW_BITS,
    MIN_WINDOW_BITS, OUTPUT_CHUNK_SIZE,
};

/// Extension token in `Sec-WebSocket-Extensions`
pub const PERMESSAGE_DEFLATE: &str = "permessage-deflate";

/// WebSocket endpoint role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Client (inflates what the server compressed)
    Client,
    /// Server (inflates what the client compressed)
    Server,
}

/// Negotiated permessage-deflate parameters
#[derive(Debug, Clone)]
pub struct DeflateConfig {
    /// Server's maximum LZ77 window bits (for compression when server, decompression when client)
    pub server_max_window_bits: u8,
    /// Client's maximum LZ77 window bits (for compression when client, decompression when server)
    pub client_max_window_bits: u8,
    /// If true, server must reset compression context after each message
    pub server_no_context_takeover: bool,
    /// If true, client must reset compression context after each message
    pub client_no_context_takeover: bool,
    /// Compression level (0-9) for outgoing messages
    pub compression_level: u32,
    /// Minimum message size to compress
    pub compression_threshold: usize,
}

impl Default for DeflateConfig {
    fn default() -> Self {
        Self {
            server_max_window_bits: DEFAULT_WINDOW_BITS,
            client_max_window_bits: DEFAULT_WINDOW_BITS,
            server_no_context_takeover: false,
            client_no_context_takeover: false,
            compression_level: 6,
            compression_threshold: 32,
        }
    }
}

impl DeflateConfig {
    /// Create config optimized for low memory usage
    pub fn low_memory() -> Self {
        Self {
            server_max_window_bits: 10,
            client_max_window_bits: 10,
            server_no_context_takeover: true,
            client_no_context_takeover: true,
            compression_level: 1,
            compression_threshold: 64,
        }
    }

    /// Build a config from the parameters of an accepted extension offer
    pub fn from_params(params: &[(&str, Option<&str>)]) -> Result<Self> {
        let mut config = Self::default();

        for (name, value) in params {
            match *name {
                "server_no_context_takeover" => {
                    if value.is_some() {
                        return Err(Error::InvalidExtension(
                            "server_no_context_takeover must not have a value",
                        ));
                    }
                    config.server_no_context_takeover = true;
                }
                "client_no_context_takeover" => {
                    if value.is_some() {
                        return Err(Error::InvalidExtension(
                            "client_no_context_takeover must not have a value",
                        ));
                    }
                    config.client_no_context_takeover = true;
                }
                "server_max_window_bits" => {
                    // Mandatory value in a response, so it never stays implicit here
                    let v = value.ok_or(Error::InvalidExtension(
                        "server_max_window_bits requires a value",
                    ))?;
                    config.server_max_window_bits = parse_window_bits(v)?;
                }
                "client_max_window_bits" => {
                    // Bare form only advertises support
                    if let Some(v) = value {
                        config.client_max_window_bits = parse_window_bits(v)?;
                    }
                }
                _ => {
                    return Err(Error::InvalidExtension(
                        "unknown permessage-deflate parameter",
                    ));
                }
            }
        }

        Ok(config)
    }

    /// Parse a `Sec-WebSocket-Extensions` value into a config
    pub fn from_header(value: &str) -> Result<Self> {
        let params = parse_deflate_offer(value)
            .ok_or(Error::InvalidExtension("not a permessage-deflate extension"))?;
        Self::from_params(&params)
    }

    /// Window bits and context-takeover flag the peer compresses with
    fn peer_params(&self, role: Role) -> (u8, bool) {
        match role {
            Role::Server => (self.client_max_window_bits, self.client_no_context_takeover),
            Role::Client => (self.server_max_window_bits, self.server_no_context_takeover),
        }
    }

    /// Decoder for messages received by `role`
    pub fn decoder(&self, role: Role) -> DeflateDecoder {
        let (window_bits, no_context_takeover) = self.peer_params(role);
        DeflateDecoder::new(window_bits, no_context_takeover)
    }

    /// Encoder for messages sent by `role`
    pub fn encoder(&self, role: Role) -> DeflateEncoder {
        let peer = match role {
            Role::Server => Role::Client,
            Role::Client => Role::Server,
        };
        let (window_bits, no_context_takeover) = self.peer_params(peer);
        DeflateEncoder::new(
            window_bits,
            no_context_takeover,
            self.compression_level,
            self.compression_threshold,
        )
    }
}

fn parse_window_bits(value: &str) -> Result<u8> {
    let bits: u8 = value
        .parse()
        .map_err(|_| Error::InvalidExtension("invalid max_window_bits value"))?;
    if !(MIN_WINDOW_BITS..=MAX_WINDOW_BITS).contains(&bits) {
        return Err(Error::InvalidExtension("max_window_bits out of range (8-15)"));
    }
    Ok(bits)
}

/// Parse permessage-deflate extension parameters from header value
pub fn parse_deflate_offer(value: &str) -> Option<Vec<(&str, Option<&str>)>> {
    let rest = value.trim().strip_prefix(PERMESSAGE_DEFLATE)?.trim_start();

    if rest.is_empty() {
        return Some(Vec::new());
    }

    // Parameters must be introduced by a semicolon
    let rest = rest.strip_prefix(';')?;

    let params = rest
        .split(';')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((name, value)) => (name.trim(), Some(value.trim().trim_matches('"'))),
            None => (part, None),
        })
        .collect();

    Some(params)
}

/// Connection-owned inflater handle for incoming compressed messages
///
/// The inflater outlives individual messages; whether its LZ77 window
/// survives a message boundary is decided by `no_context_takeover`.
pub struct DeflateDecoder<I = FlateInflater> {
    inflater: I,
    no_context_takeover: bool,
    messages: u64,
}

impl DeflateDecoder {
    /// Create a zlib-backed decoder
    pub fn new(window_bits: u8, no_context_takeover: bool) -> Self {
        Self::with_inflater(FlateInflater::new(window_bits), no_context_takeover)
    }
}

impl<I: Inflate> DeflateDecoder<I> {
    /// Wrap an arbitrary inflater engine
    pub fn with_inflater(inflater: I, no_context_takeover: bool) -> Self {
        Self {
            inflater,
            no_context_takeover,
            messages: 0,
        }
    }

    /// Run one inflate call on the underlying engine
    #[inline]
    pub fn inflate(&mut self, input: &[u8], output: &mut [u8]) -> Result<InflateStatus> {
        self.inflater.inflate(input, output)
    }

    /// Message-boundary bookkeeping: reset the window unless it is taken over
    pub fn finish_message(&mut self) {
        self.messages += 1;
        if self.no_context_takeover {
            self.inflater.reset();
        }
    }

    /// Discard all inflater state, e.g. after an abandoned read
    pub fn reset(&mut self) {
        self.inflater.reset();
    }

    /// Whether the window is reset between messages
    pub fn no_context_takeover(&self) -> bool {
        self.no_context_takeover
    }

    /// Number of messages fully decompressed with this decoder
    pub fn messages(&self) -> u64 {
        self.messages
    }

    /// Access the engine
    pub fn inflater_mut(&mut self) -> &mut I {
        &mut self.inflater
    }

    /// Decompress a complete in-memory message payload
    ///
    /// `max_size` of 0 disables the size ceiling.
    pub fn decompress(&mut self, data: &[u8], max_size: usize) -> Result<Bytes> {
        let mut session = InflateSession::new(max_size, DEFAULT_MAX_TRAILER_STEPS);
        session.begin_frame(data.len() as u64, true)?;

        let mut input = data;
        let mut output = BytesMut::with_capacity(data.len().saturating_mul(4).max(1024));

        loop {
            if session.needs_input(input.len()) {
                return Err(Error::InvalidState("in-memory payload ran out of input"));
            }

            let start = output.len();
            output.resize(start + OUTPUT_CHUNK_SIZE, 0);

            let step = session.step(self, &mut input, &mut output[start..]);
            let produced = match &step {
                Ok(Step::Output { produced, .. }) => *produced,
                _ => 0,
            };
            output.truncate(start + produced);

            if let Step::Output { complete: true, .. } = step? {
                break;
            }
        }

        Ok(output.freeze())
    }
}

/// Deflate compressor for outgoing messages
pub struct DeflateEncoder {
    compress: Compress,
    no_context_takeover: bool,
    threshold: usize,
}

impl DeflateEncoder {
    /// Create a new encoder
    pub fn new(window_bits: u8, no_context_takeover: bool, level: u32, threshold: usize) -> Self {
        // zlib's raw deflate rejects 8-bit windows
        let window_bits = window_bits.clamp(9, MAX_WINDOW_BITS);
        let compress = Compress::new_with_window_bits(Compression::new(level), false, window_bits);

        Self {
            compress,
            no_context_takeover,
            threshold,
        }
    }

    /// Compress a message payload, trailer stripped
    ///
    /// Returns `None` if the message is below the threshold, or if it would
    /// not shrink and the context is reset per message anyway.
    pub fn compress(&mut self, data: &[u8]) -> Result<Option<Bytes>> {
        if data.len() < self.threshold {
            return Ok(None);
        }

        if self.no_context_takeover {
            self.compress.reset();
        }

        let mut output = Vec::with_capacity(data.len() + 64);
        let mut input = data;

        loop {
            if output.len() == output.capacity() {
                output.reserve(4096);
            }

            let before_in = self.compress.total_in();
            self.compress
                .compress_vec(input, &mut output, FlushCompress::Sync)
                .map_err(|e| Error::Compression(format!("deflate error: {}", e)))?;
            let consumed = (self.compress.total_in() - before_in) as usize;
            input = &input[consumed..];

            // Sync flush is complete once zlib stops filling the buffer
            if input.is_empty() && output.len() < output.capacity() {
                break;
            }
        }

        if output.ends_with(&DEFLATE_TRAILER) {
            output.truncate(output.len() - DEFLATE_TRAILER.len());
        }

        // With context takeover the peer's window must see every byte we fed
        if self.no_context_takeover && output.len() >= data.len() {
            return Ok(None);
        }

        Ok(Some(Bytes::from(output)))
    }

    /// Reset the compression context
    pub fn reset(&mut self) {
        self.compress.reset();
    }
}
