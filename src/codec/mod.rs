//! Codec traits and the built-in wire codec.
//!
//! This module provides the [`Encoder`] and [`Decoder`] capability traits
//! the message layer is written against, and the concrete
//! [`WireEncoder`]/[`WireDecoder`] pair implementing the versioned tagged
//! binary format. The codec owns two responsibilities beyond plain value
//! encoding:
//!
//! - **Header framing**: every blob starts with magic bytes and a format
//!   version; decoding validates both before touching the body.
//! - **Transfer splicing**: buffers moved out-of-band travel as dense ids
//!   in the stream. The encoder is told up front which buffer each id
//!   refers to; the decoder is handed the id-indexed buffers before the
//!   body traversal starts.

pub mod wire;

use crate::buffer::{ArrayBuffer, TransferBuffer};
use crate::value::Value;

pub use wire::{WireDecoder, WireEncoder, WireLimits, WIRE_MAGIC, WIRE_VERSION};

/// Errors produced while encoding or decoding a message blob.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Missing or malformed wire header.
    #[error("missing or malformed wire header")]
    BadHeader,

    /// The blob was written by a newer format revision.
    #[error("unsupported wire version: expected <= {expected}, found {found}")]
    UnsupportedVersion {
        /// Maximum version this decoder understands.
        expected: u16,
        /// Version found in the header.
        found: u16,
    },

    /// A value could not be cloned onto the wire; the payload is the
    /// human-readable reason.
    #[error("{0}")]
    DataClone(String),

    /// The body ended mid-value.
    #[error("unexpected end of message body")]
    Truncated,

    /// The body contains a tag this decoder does not know.
    #[error("unknown value tag {0:#04x}")]
    UnknownTag(u8),

    /// Value nesting exceeded the configured depth limit.
    #[error("value nesting exceeds depth limit {0}")]
    DepthExceeded(usize),

    /// The blob exceeds the configured size limit.
    #[error("message blob exceeds size limit {0}")]
    BlobTooLarge(usize),

    /// A collection or string is too long for the wire's length fields.
    #[error("collection length exceeds wire limit")]
    LengthOverflow,

    /// An array buffer reachable from the value graph was already detached.
    #[error("array buffer is detached")]
    DetachedBuffer,

    /// The body referenced a transfer id that was never installed.
    #[error("transferred buffer id {0} out of range")]
    BadTransferId(u32),

    /// A text value did not hold valid UTF-8.
    #[error("invalid UTF-8 in text value")]
    InvalidText,
}

/// Write half of the codec: turns a value graph into a linear blob.
///
/// Usage order is fixed: register transferred buffers, write the header,
/// write the value, then [`finish`](Self::finish) to take the blob.
pub trait Encoder {
    /// Declares that wire id `id` refers to `buffer`.
    ///
    /// When the value traversal reaches a buffer registered here it writes
    /// the id instead of the bytes. Ids must be registered densely from 0
    /// in ascending order.
    fn transfer_array_buffer(&mut self, id: u32, buffer: &ArrayBuffer);

    /// Emits the version header. Must precede any value bytes.
    fn write_header(&mut self);

    /// Appends the encoding of `value` to the blob.
    fn write_value(&mut self, value: &Value) -> Result<(), CodecError>;

    /// Yields the completed blob.
    #[must_use]
    fn finish(self) -> TransferBuffer;
}

/// Read half of the codec: turns a linear blob back into a value graph.
pub trait Decoder {
    /// Installs `buffer` as the referent of wire id `id`.
    ///
    /// Must happen before [`read_value`](Self::read_value) so indexed
    /// references can be spliced in during the traversal.
    fn transfer_array_buffer(&mut self, id: u32, buffer: ArrayBuffer);

    /// Reads and validates the version header.
    fn read_header(&mut self) -> Result<(), CodecError>;

    /// Reads one value graph from the body.
    fn read_value(&mut self) -> Result<Value, CodecError>;
}
