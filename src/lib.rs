//! # Sockudo-Inflate: permessage-deflate read path
//!
//! Decompression side of the WebSocket permessage-deflate extension
//! (RFC 7692), built around a per-message inflate session that decides
//! when a compressed message is really finished.
//!
//! ## Completion detection
//!
//! Senders strip the `00 00 FF FF` tail of the sync-flushed deflate stream.
//! Once the final frame's payload has been fed, the receiver feeds that
//! empty stored block itself and keeps doing so until an inflate call
//! produces no output. Stray bytes returned by the trailer call are
//! delivered rather than treated as a broken deflate block.
//!
//! ## Example
//!
//! ```
//! use sockudo_inflate::{DeflateConfig, Role};
//!
//! let config = DeflateConfig::default();
//! let mut encoder = config.encoder(Role::Client);
//! let mut decoder = config.decoder(Role::Server);
//!
//! let payload = b"compressible compressible compressible compressible".repeat(4);
//! let compressed = encoder.compress(&payload).unwrap().unwrap();
//! let message = decoder.decompress(&compressed, 64 * 1024).unwrap();
//! assert_eq!(&message[..], &payload[..]);
//! ```

pub mod deflate;
pub mod error;
pub mod inflate;
pub mod reader;
pub mod session;

pub use deflate::{DeflateConfig, DeflateDecoder, DeflateEncoder, Role, parse_deflate_offer};
pub use error::{Error, Result};
pub use inflate::{FlateInflater, Inflate, InflateStatus};
pub use reader::{ChannelSource, FrameInfo, FramePart, FrameSource, MessageReader, MessageStats};
pub use session::{InflateSession, SessionState, Step};

/// Empty stored deflate block appended to every compressed message
pub const DEFLATE_TRAILER: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

/// Default LZ77 window size (32KB = 2^15)
pub const DEFAULT_WINDOW_BITS: u8 = 15;

/// Minimum LZ77 window size (256 bytes = 2^8)
pub const MIN_WINDOW_BITS: u8 = 8;

/// Maximum LZ77 window size (32KB = 2^15)
pub const MAX_WINDOW_BITS: u8 = 15;

/// Default receive chunk size (64KB for high throughput)
pub const RECV_BUFFER_SIZE: usize = 64 * 1024;

/// Default decompression output chunk (16KB)
pub const OUTPUT_CHUNK_SIZE: usize = 16 * 1024;

/// Default number of trailer calls allowed to return stray output
pub const DEFAULT_MAX_TRAILER_STEPS: u32 = 8;

/// Configuration for the inflate read path
///
/// # Example
///
/// ```
/// use sockudo_inflate::Config;
///
/// let config = Config::builder()
///     .max_message_size(16 * 1024)
///     .max_trailer_steps(4)
///     .build();
/// assert_eq!(config.max_message_size, 16 * 1024);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum decompressed message size (default: 64MB, 0 = unlimited)
    pub max_message_size: usize,
    /// Trailer calls allowed to return stray output before the message is
    /// rejected (default: 8)
    pub max_trailer_steps: u32,
    /// Maximum payload bytes requested from the frame layer at once (default: 64KB)
    pub read_chunk_size: usize,
    /// Output space offered to each inflate call (default: 16KB)
    pub output_chunk_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_message_size: 64 * 1024 * 1024,
            max_trailer_steps: DEFAULT_MAX_TRAILER_STEPS,
            read_chunk_size: RECV_BUFFER_SIZE,
            output_chunk_size: OUTPUT_CHUNK_SIZE,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }
}

/// Builder for inflate configuration
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Set maximum decompressed message size (0 = unlimited)
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    /// Set how many trailer calls may return stray output
    pub fn max_trailer_steps(mut self, steps: u32) -> Self {
        self.config.max_trailer_steps = steps;
        self
    }

    /// Set the frame-layer read chunk size
    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.config.read_chunk_size = size.max(1);
        self
    }

    /// Set the per-call output chunk size
    pub fn output_chunk_size(mut self, size: usize) -> Self {
        self.config.output_chunk_size = size.max(1);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::Config;
    pub use crate::deflate::{DeflateConfig, DeflateDecoder, Role};
    pub use crate::error::{Error, Result};
    pub use crate::reader::{FrameInfo, FrameSource, MessageReader};
    pub use crate::session::{InflateSession, Step};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = Config::builder().build();
        assert_eq!(config.max_message_size, 64 * 1024 * 1024);
        assert_eq!(config.max_trailer_steps, DEFAULT_MAX_TRAILER_STEPS);
        assert_eq!(config.output_chunk_size, OUTPUT_CHUNK_SIZE);
    }

    #[test]
    fn test_builder_clamps_chunks() {
        let config = Config::builder()
            .read_chunk_size(0)
            .output_chunk_size(0)
            .build();
        assert_eq!(config.read_chunk_size, 1);
        assert_eq!(config.output_chunk_size, 1);
    }
}
