//! Core wire-level identifiers: packet types, ids, sequences, directions.

use std::fmt;

/// Monotonic per-session packet sequence number.
pub type PacketSequence = u64;

/// Sequence reserved for the handshake (Connect) packet.
pub const HANDSHAKE_SEQUENCE: PacketSequence = 0;

/// First sequence handed to an application packet. The gap after the
/// reserved handshake sequence is intentional and never assigned.
pub const FIRST_APP_SEQUENCE: PacketSequence = 2;

/// Application packet identifier carried in the frame header.
///
/// Zero is reserved as the invalid id; the graph validator rejects nodes
/// configured with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PacketId(pub u32);

impl PacketId {
    /// Reserved invalid id.
    pub const INVALID: Self = Self(0);

    /// Whether this id is usable in a packet.
    #[must_use]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for PacketId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

/// Wire packet type, one byte at header offset 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Reserved, never valid on the wire.
    Invalid = 0,
    /// Client handshake, always sequence 0.
    Connect = 1,
    /// Graceful or forced teardown notice.
    Disconnect = 2,
    /// Application payload.
    Send = 3,
    /// Lightweight acknowledgment of a Send or Connect.
    SendReply = 4,
    /// Liveness probe.
    Heartbeat = 5,
    /// Lightweight acknowledgment of a Heartbeat.
    HeartbeatReply = 6,
}

impl PacketType {
    /// Parse a packet-type byte.
    #[must_use]
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::Connect),
            2 => Some(Self::Disconnect),
            3 => Some(Self::Send),
            4 => Some(Self::SendReply),
            5 => Some(Self::Heartbeat),
            6 => Some(Self::HeartbeatReply),
            _ => None,
        }
    }

    /// Wire byte for this type.
    #[must_use]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Core packets carry a payload of their own; replies only acknowledge.
    ///
    /// The distinction decides where the AEAD body region starts and is
    /// folded into the additional authenticated data.
    #[must_use]
    pub fn is_core(self) -> bool {
        !matches!(self, Self::SendReply | Self::HeartbeatReply)
    }

    /// Whether packets of this type go through the AEAD layer at all.
    ///
    /// Connect and Disconnect are framed but not sealed: the server has to
    /// read the session id out of the Connect payload before it can look
    /// up the session key.
    #[must_use]
    pub fn is_sealed(self) -> bool {
        matches!(
            self,
            Self::Send | Self::SendReply | Self::Heartbeat | Self::HeartbeatReply
        )
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Invalid => "Invalid",
            Self::Connect => "Connect",
            Self::Disconnect => "Disconnect",
            Self::Send => "Send",
            Self::SendReply => "SendReply",
            Self::Heartbeat => "Heartbeat",
            Self::HeartbeatReply => "HeartbeatReply",
        };
        f.write_str(name)
    }
}

/// Direction tag folded into the AEAD nonce and authenticated data.
///
/// Two bits on the wire; a client and server can never derive the same
/// nonce for the same sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketDirection {
    /// Core packet from client to server.
    ClientToServer = 0,
    /// Reply from client to server.
    ClientToServerReply = 1,
    /// Core packet from server to client.
    ServerToClient = 2,
    /// Reply from server to client.
    ServerToClientReply = 3,
}

impl PacketDirection {
    /// Direction a client stamps on a frame it sends.
    #[must_use]
    pub fn client_outbound(ty: PacketType) -> Self {
        if ty.is_core() { Self::ClientToServer } else { Self::ClientToServerReply }
    }

    /// Direction a server stamps on a frame it sends — what a client
    /// expects on frames it receives.
    #[must_use]
    pub fn server_outbound(ty: PacketType) -> Self {
        if ty.is_core() { Self::ServerToClient } else { Self::ServerToClientReply }
    }
}
