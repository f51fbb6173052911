//! Wire format for the Squall reliable-UDP protocol.
//!
//! Every datagram is a single frame: a fixed 18-byte header followed by a
//! variable payload. The header carries framing fields (marker, length,
//! salt, checksum) in the first five bytes and routing fields (packet type,
//! sequence, packet id) in the rest.
//!
//! Packet protection is two layered mechanisms, applied in a fixed order:
//!
//! 1. **AEAD** ([`crypto::PacketCrypto`]) — AES-256-GCM over the packet
//!    body, keyed per session, nonce derived from the session salt, the
//!    packet sequence, and the packet direction. Applied first on send,
//!    last on receive.
//! 2. **Framing** ([`frame::Frame::encode`]) — a rolling-XOR obfuscation
//!    keyed by a per-packet random salt byte and a fixed shared constant,
//!    plus a one-byte checksum. Applied last on send, first on receive.
//!
//! Handshake and teardown frames (Connect, Disconnect) only go through the
//! framing layer; the server cannot look up the session key before it has
//! read the session id out of the Connect payload.

pub mod crypto;
pub mod errors;
pub mod frame;
pub mod ticket;
pub mod types;

pub use crypto::PacketCrypto;
pub use errors::{ProtocolError, Result};
pub use frame::{Frame, HEADER_SIZE, MAX_FRAME_SIZE};
pub use ticket::{ConnectResult, SessionTicket};
pub use types::{PacketDirection, PacketId, PacketSequence, PacketType};
