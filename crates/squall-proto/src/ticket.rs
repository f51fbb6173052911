//! Session ticket: the blob a session broker hands to a client.
//!
//! Before a client touches UDP it asks the broker (a stream-transport
//! collaborator) for a session assignment. The broker answers with one
//! frame-encoded blob: result code, then — on success — the target server
//! address, the session id, the AEAD key, and the session salt.

use std::fmt;

use crate::crypto::{KEY_SIZE, SALT_SIZE};
use crate::errors::{ProtocolError, Result};
use crate::frame::Frame;

/// Broker result codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectResult {
    /// Session assigned.
    Success,
    /// Server at capacity.
    ServerFull,
    /// A session for this client already exists.
    AlreadyConnected,
    /// Server failed to create the session socket.
    SocketFailed,
    /// Server-side I/O backend failed to initialize.
    IoInitFailed,
    /// Server failed to arm the first receive.
    RecvFailed,
    /// Code this client does not know.
    Unknown(u8),
}

impl ConnectResult {
    /// Parse a result-code byte.
    #[must_use]
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Success,
            1 => Self::ServerFull,
            2 => Self::AlreadyConnected,
            3 => Self::SocketFailed,
            4 => Self::IoInitFailed,
            5 => Self::RecvFailed,
            other => Self::Unknown(other),
        }
    }

    /// Wire byte for this code.
    #[must_use]
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::ServerFull => 1,
            Self::AlreadyConnected => 2,
            Self::SocketFailed => 3,
            Self::IoInitFailed => 4,
            Self::RecvFailed => 5,
            Self::Unknown(other) => other,
        }
    }
}

impl fmt::Display for ConnectResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::ServerFull => f.write_str("server full"),
            Self::AlreadyConnected => f.write_str("already connected"),
            Self::SocketFailed => f.write_str("socket creation failed"),
            Self::IoInitFailed => f.write_str("io backend init failed"),
            Self::RecvFailed => f.write_str("initial receive failed"),
            Self::Unknown(code) => write!(f, "unknown result code {code}"),
        }
    }
}

/// A successfully parsed session assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTicket {
    /// Target RUDP server IP, as the broker spelled it.
    pub server_ip: String,
    /// Target RUDP server port.
    pub server_port: u16,
    /// Session id the server knows this client by.
    pub session_id: u16,
    /// AEAD session key.
    pub session_key: Vec<u8>,
    /// Session salt (nonce material).
    pub session_salt: String,
}

impl SessionTicket {
    /// Parse a broker response frame.
    ///
    /// A non-success result code is fatal for the session's startup and
    /// surfaces as [`ProtocolError::BrokerRefused`].
    pub fn from_frame(frame: &mut Frame) -> Result<Self> {
        let result = ConnectResult::from_u8(frame.read_u8()?);
        if result != ConnectResult::Success {
            return Err(ProtocolError::BrokerRefused(result));
        }

        let server_ip = frame.read_str()?;
        let server_port = frame.read_u16()?;
        let session_id = frame.read_u16()?;
        let session_key = frame.read_blob()?;
        let session_salt = frame.read_str()?;

        if session_key.len() != KEY_SIZE {
            return Err(ProtocolError::BadKeyLength {
                expected: KEY_SIZE,
                actual: session_key.len(),
            });
        }
        if session_salt.len() != SALT_SIZE {
            return Err(ProtocolError::BadSaltLength {
                expected: SALT_SIZE,
                actual: session_salt.len(),
            });
        }

        Ok(Self { server_ip, server_port, session_id, session_key, session_salt })
    }

    /// Serialize a ticket into a frame payload — the broker side of
    /// [`SessionTicket::from_frame`], used by scripted test brokers.
    pub fn write_to(&self, frame: &mut Frame) -> Result<()> {
        frame.write_u8(ConnectResult::Success.to_u8())?;
        frame.write_str(&self.server_ip)?;
        frame.write_u16(self.server_port)?;
        frame.write_u16(self.session_id)?;
        frame.write_blob(&self.session_key)?;
        frame.write_str(&self.session_salt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket() -> SessionTicket {
        SessionTicket {
            server_ip: "10.0.0.5".to_string(),
            server_port: 50001,
            session_id: 77,
            session_key: vec![0xaa; KEY_SIZE],
            session_salt: "0123456789abcdef".to_string(),
        }
    }

    #[test]
    fn ticket_round_trip() {
        let mut frame = Frame::new();
        ticket().write_to(&mut frame).unwrap();

        let mut decoded = Frame::decode(&frame.encode()).unwrap();
        let parsed = SessionTicket::from_frame(&mut decoded).unwrap();
        assert_eq!(parsed, ticket());
    }

    #[test]
    fn refused_ticket_is_fatal() {
        let mut frame = Frame::new();
        frame.write_u8(ConnectResult::ServerFull.to_u8()).unwrap();

        let mut decoded = Frame::decode(&frame.encode()).unwrap();
        let err = SessionTicket::from_frame(&mut decoded).unwrap_err();
        assert_eq!(err, ProtocolError::BrokerRefused(ConnectResult::ServerFull));
    }

    #[test]
    fn short_key_is_rejected() {
        let mut frame = Frame::new();
        frame.write_u8(0).unwrap();
        frame.write_str("127.0.0.1").unwrap();
        frame.write_u16(9000).unwrap();
        frame.write_u16(1).unwrap();
        frame.write_blob(&[0u8; 8]).unwrap();
        frame.write_str("0123456789abcdef").unwrap();

        let mut decoded = Frame::decode(&frame.encode()).unwrap();
        let err = SessionTicket::from_frame(&mut decoded).unwrap_err();
        assert!(matches!(err, ProtocolError::BadKeyLength { actual: 8, .. }));
    }

    #[test]
    fn unknown_result_codes_survive_round_trip() {
        let code = ConnectResult::from_u8(200);
        assert_eq!(code, ConnectResult::Unknown(200));
        assert_eq!(code.to_u8(), 200);
    }
}
