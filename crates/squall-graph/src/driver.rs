//! Driver trait: the graph's view of the session it is driving.
//!
//! Decouples node execution from the transport. Production wires this to
//! the tokio session runtime in `squall-client`; tests wire it to an
//! in-memory recorder. The graph never sees sockets, sequences, or
//! encryption — it builds payloads and asks the driver to move them.

use async_trait::async_trait;

use squall_proto::{Frame, PacketId};

use crate::error::NodeError;

/// Session operations available to executing nodes.
#[async_trait]
pub trait BotDriver: Send + Sync {
    /// Send one application packet.
    ///
    /// Returns once the packet is handed to the transport, not once it is
    /// acknowledged.
    async fn send_packet(&self, frame: Frame, packet_id: PacketId) -> Result<(), NodeError>;

    /// Tear the session down.
    async fn disconnect(&self, reason: &str);

    /// Whether the session handshake has completed.
    fn is_connected(&self) -> bool;

    /// Broker-assigned session id, for log correlation.
    fn session_id(&self) -> u16;
}
