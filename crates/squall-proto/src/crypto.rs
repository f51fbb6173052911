//! AEAD packet protection: AES-256-GCM over the packet body.
//!
//! The sealed region starts right after the sequence field for core
//! packets (packet id + payload) and right after the packet id for reply
//! packets. The 16-byte tag lands at the end of the payload region, so the
//! framing layer covers it like any other payload bytes.
//!
//! The nonce packs the first 8 bytes of the session salt, a 2-bit
//! direction tag, and the low 30 bits of the packet sequence; the
//! additional authenticated data repeats the direction, the core/reply
//! distinction, and the cleartext prefix of the frame. A reply can never
//! be replayed as a core packet, nor a client frame as a server frame.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};

use crate::errors::{ProtocolError, Result};
use crate::frame::{Frame, HEADER_SIZE, PACKET_ID_POS, TYPE_POS};
use crate::types::{PacketDirection, PacketSequence, PacketType};

/// Session key length in bytes (AES-256).
pub const KEY_SIZE: usize = 32;

/// Session salt length in bytes.
pub const SALT_SIZE: usize = 16;

/// GCM nonce length in bytes.
pub const NONCE_SIZE: usize = 12;

/// GCM authentication tag length in bytes.
pub const AUTH_TAG_SIZE: usize = 16;

/// Per-session packet sealer/opener.
///
/// Cheap to clone conceptually but owned by exactly one session in
/// practice; the key never leaves this struct after construction.
pub struct PacketCrypto {
    cipher: Aes256Gcm,
    salt: [u8; SALT_SIZE],
}

impl PacketCrypto {
    /// Build a sealer from the broker-issued key and salt.
    pub fn new(key: &[u8], salt: &[u8]) -> Result<Self> {
        if key.len() != KEY_SIZE {
            return Err(ProtocolError::BadKeyLength { expected: KEY_SIZE, actual: key.len() });
        }
        if salt.len() != SALT_SIZE {
            return Err(ProtocolError::BadSaltLength { expected: SALT_SIZE, actual: salt.len() });
        }

        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|_| ProtocolError::BadKeyLength { expected: KEY_SIZE, actual: key.len() })?;
        let mut salt_arr = [0u8; SALT_SIZE];
        salt_arr.copy_from_slice(salt);

        Ok(Self { cipher, salt: salt_arr })
    }

    /// Seal the frame body in place. The packet type and sequence must
    /// already be stamped. Connect/Disconnect frames pass through
    /// untouched.
    pub fn seal(&self, frame: &mut Frame, direction: PacketDirection) -> Result<()> {
        let ty = frame.packet_type()?;
        if !ty.is_sealed() {
            return Ok(());
        }

        let sequence = frame.sequence();
        let offset = body_offset(ty);
        let nonce = self.nonce(sequence, direction);
        let aad = aad(frame, ty, direction, offset);

        let sealed = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload { msg: frame.body(offset), aad: &aad },
            )
            .map_err(|_| ProtocolError::AuthFailure { sequence })?;

        frame.replace_body(offset, &sealed)
    }

    /// Open a sealed frame body in place, verifying the tag.
    ///
    /// Tag mismatch — tampering, a wrong key, or a direction mix-up — is
    /// an [`ProtocolError::AuthFailure`], never a panic.
    pub fn open(&self, frame: &mut Frame, direction: PacketDirection) -> Result<()> {
        let ty = frame.packet_type()?;
        if !ty.is_sealed() {
            return Ok(());
        }

        let sequence = frame.sequence();
        let offset = body_offset(ty);
        let body = frame.body(offset);
        if body.len() < AUTH_TAG_SIZE {
            return Err(ProtocolError::SealedBodyTooShort { len: body.len() });
        }

        let nonce = self.nonce(sequence, direction);
        let aad = aad(frame, ty, direction, offset);

        let opened = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce), Payload { msg: body, aad: &aad })
            .map_err(|_| ProtocolError::AuthFailure { sequence })?;

        frame.replace_body(offset, &opened)
    }

    fn nonce(&self, sequence: PacketSequence, direction: PacketDirection) -> [u8; NONCE_SIZE] {
        let mut nonce = [0u8; NONCE_SIZE];
        nonce[..8].copy_from_slice(&self.salt[..8]);
        nonce[8] = ((direction as u8) << 6) | ((sequence >> 24) & 0x3f) as u8;
        nonce[9] = (sequence >> 16) as u8;
        nonce[10] = (sequence >> 8) as u8;
        nonce[11] = sequence as u8;
        nonce
    }
}

fn body_offset(ty: PacketType) -> usize {
    if ty.is_core() { PACKET_ID_POS } else { HEADER_SIZE }
}

fn aad(frame: &Frame, ty: PacketType, direction: PacketDirection, offset: usize) -> Vec<u8> {
    // Only header bytes that are identical at seal and open time may be
    // authenticated: marker/length/salt/checksum are stamped later by the
    // framing layer.
    let mut aad = Vec::with_capacity(2 + offset - TYPE_POS);
    aad.push(direction as u8);
    aad.push(u8::from(ty.is_core()));
    aad.extend_from_slice(&frame.body(TYPE_POS)[..offset - TYPE_POS]);
    aad
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PacketId;

    fn crypto() -> PacketCrypto {
        PacketCrypto::new(&[0x42u8; KEY_SIZE], &[0x17u8; SALT_SIZE]).unwrap()
    }

    fn send_frame(payload: &[u8]) -> Frame {
        let mut frame = Frame::new();
        frame.set_packet_type(PacketType::Send);
        frame.set_sequence(9);
        frame.set_packet_id(PacketId(3));
        frame.write_bytes(payload).unwrap();
        frame
    }

    #[test]
    fn seal_then_open_restores_body() {
        let crypto = crypto();
        let mut frame = send_frame(b"secret payload");

        crypto.seal(&mut frame, PacketDirection::ClientToServer).unwrap();
        assert_ne!(frame.payload(), b"secret payload");

        crypto.open(&mut frame, PacketDirection::ClientToServer).unwrap();
        assert_eq!(frame.packet_id(), PacketId(3));
        assert_eq!(frame.payload(), b"secret payload");
    }

    #[test]
    fn seal_survives_the_framing_layer() {
        let crypto = crypto();
        let mut frame = send_frame(b"through both layers");
        crypto.seal(&mut frame, PacketDirection::ClientToServer).unwrap();

        let mut decoded = Frame::decode(&frame.encode()).unwrap();
        crypto.open(&mut decoded, PacketDirection::ClientToServer).unwrap();
        assert_eq!(decoded.payload(), b"through both layers");
    }

    #[test]
    fn tampered_body_fails_open() {
        let crypto = crypto();
        let mut frame = send_frame(b"do not touch");
        crypto.seal(&mut frame, PacketDirection::ClientToServer).unwrap();

        let mut body = frame.body(PACKET_ID_POS).to_vec();
        body[0] ^= 0x01;
        frame.replace_body(PACKET_ID_POS, &body).unwrap();

        let err = crypto.open(&mut frame, PacketDirection::ClientToServer).unwrap_err();
        assert!(matches!(err, ProtocolError::AuthFailure { .. }));
    }

    #[test]
    fn wrong_direction_fails_open() {
        let crypto = crypto();
        let mut frame = send_frame(b"directional");
        crypto.seal(&mut frame, PacketDirection::ClientToServer).unwrap();

        let err = crypto.open(&mut frame, PacketDirection::ServerToClient).unwrap_err();
        assert!(matches!(err, ProtocolError::AuthFailure { sequence: 9 }));
    }

    #[test]
    fn wrong_key_fails_open() {
        let crypto = crypto();
        let other = PacketCrypto::new(&[0x43u8; KEY_SIZE], &[0x17u8; SALT_SIZE]).unwrap();

        let mut frame = send_frame(b"keyed");
        crypto.seal(&mut frame, PacketDirection::ClientToServer).unwrap();
        let err = other.open(&mut frame, PacketDirection::ClientToServer).unwrap_err();
        assert!(matches!(err, ProtocolError::AuthFailure { .. }));
    }

    #[test]
    fn reply_frames_seal_after_the_packet_id() {
        let crypto = crypto();
        let mut frame = Frame::new();
        frame.set_packet_type(PacketType::SendReply);
        frame.set_sequence(5);
        frame.set_packet_id(PacketId(11));
        crypto.seal(&mut frame, PacketDirection::ServerToClientReply).unwrap();

        // The packet id stays readable on a sealed reply.
        assert_eq!(frame.packet_id(), PacketId(11));
        assert_eq!(frame.payload().len(), AUTH_TAG_SIZE);
    }

    #[test]
    fn handshake_frames_pass_through() {
        let crypto = crypto();
        let mut frame = Frame::new();
        frame.set_packet_type(PacketType::Connect);
        frame.write_u16(123).unwrap();
        crypto.seal(&mut frame, PacketDirection::ClientToServer).unwrap();
        assert_eq!(frame.payload().len(), 2);
    }

    #[test]
    fn key_and_salt_lengths_are_enforced() {
        assert!(matches!(
            PacketCrypto::new(&[0u8; 16], &[0u8; SALT_SIZE]),
            Err(ProtocolError::BadKeyLength { .. })
        ));
        assert!(matches!(
            PacketCrypto::new(&[0u8; KEY_SIZE], &[0u8; 8]),
            Err(ProtocolError::BadSaltLength { .. })
        ));
    }

    #[test]
    fn truncated_sealed_body_is_rejected() {
        let crypto = crypto();
        let mut frame = Frame::new();
        frame.set_packet_type(PacketType::Send);
        frame.set_sequence(1);
        let err = crypto.open(&mut frame, PacketDirection::ServerToClient).unwrap_err();
        assert!(matches!(err, ProtocolError::SealedBodyTooShort { .. }));
    }
}
