//! Error types for wire-format parsing and packet protection.

use crate::types::PacketSequence;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while encoding, decoding, or protecting packets.
///
/// Decode-side variants are expected in normal operation (a load tester
/// talks to real networks); callers log them and drop the datagram rather
/// than tearing the session down.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Datagram shorter than the fixed header.
    #[error("frame too short: {len} bytes, need at least {min}")]
    FrameTooShort {
        /// Received datagram length.
        len: usize,
        /// Minimum acceptable length.
        min: usize,
    },

    /// First byte is not the frame marker.
    #[error("bad frame marker: {found:#04x}")]
    BadMarker {
        /// The byte found at offset 0.
        found: u8,
    },

    /// Header length field disagrees with the datagram size.
    #[error("length field says {declared} payload bytes, datagram has {actual}")]
    LengthMismatch {
        /// Payload length declared in the header.
        declared: usize,
        /// Payload bytes actually present.
        actual: usize,
    },

    /// Checksum over the decoded bytes does not match the header byte.
    #[error("checksum mismatch: header {expected:#04x}, computed {computed:#04x}")]
    ChecksumMismatch {
        /// Checksum byte carried in the header.
        expected: u8,
        /// Checksum recomputed over the decoded bytes.
        computed: u8,
    },

    /// A frame would exceed the maximum datagram size.
    #[error("frame overflow: {requested} bytes exceeds capacity {capacity}")]
    Overflow {
        /// Total size the write would have produced.
        requested: usize,
        /// Hard frame size cap.
        capacity: usize,
    },

    /// A payload read ran past the end of the frame.
    #[error("payload underrun: need {needed} bytes, {available} available")]
    Underrun {
        /// Bytes the read required.
        needed: usize,
        /// Bytes left in the payload.
        available: usize,
    },

    /// A length-prefixed string was not valid UTF-8.
    #[error("string field is not valid UTF-8")]
    InvalidString,

    /// Unknown packet-type byte.
    #[error("invalid packet type: {0:#04x}")]
    InvalidPacketType(u8),

    /// AEAD key was not the expected length.
    #[error("session key must be {expected} bytes, got {actual}")]
    BadKeyLength {
        /// Required key length.
        expected: usize,
        /// Provided key length.
        actual: usize,
    },

    /// Session salt was not the expected length.
    #[error("session salt must be {expected} bytes, got {actual}")]
    BadSaltLength {
        /// Required salt length.
        expected: usize,
        /// Provided salt length.
        actual: usize,
    },

    /// AEAD open failed: wrong key, wrong nonce inputs, or tampered body.
    #[error("packet authentication failed for sequence {sequence}")]
    AuthFailure {
        /// Sequence the nonce was derived from.
        sequence: PacketSequence,
    },

    /// Sealed region too small to contain an auth tag.
    #[error("sealed body too short: {len} bytes")]
    SealedBodyTooShort {
        /// Sealed region length.
        len: usize,
    },

    /// Session broker reported a non-success result code.
    #[error("session broker refused the session: {0}")]
    BrokerRefused(crate::ticket::ConnectResult),
}
