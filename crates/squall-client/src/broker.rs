//! Session broker client.
//!
//! Before touching UDP, a bot asks the broker over a stream transport for
//! its session assignment: target address, session id, key, and salt. The
//! broker answers with one frame-encoded blob; the frame's own length
//! field delimits it on the stream.

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tracing::debug;

use squall_proto::{Frame, HEADER_SIZE, SessionTicket};

use crate::error::ClientError;

/// Fetch a session ticket from the broker at `addr`.
///
/// A non-success broker result code surfaces as
/// [`squall_proto::ProtocolError::BrokerRefused`], which is fatal for
/// this session's startup.
pub async fn fetch_ticket(addr: &str) -> Result<SessionTicket, ClientError> {
    let mut stream = TcpStream::connect(addr).await?;
    let ticket = read_ticket(&mut stream).await?;
    debug!(
        session_id = ticket.session_id,
        server = %ticket.server_ip,
        port = ticket.server_port,
        "session ticket received"
    );
    Ok(ticket)
}

async fn read_ticket(stream: &mut TcpStream) -> Result<SessionTicket, ClientError> {
    // The first two framing fields (marker, payload length) are sent in
    // the clear, so the header tells us how much more to read.
    let mut header = [0u8; HEADER_SIZE];
    stream.read_exact(&mut header).await?;

    let payload_len = u16::from_le_bytes([header[1], header[2]]) as usize;
    let mut wire = header.to_vec();
    wire.resize(HEADER_SIZE + payload_len, 0);
    stream.read_exact(&mut wire[HEADER_SIZE..]).await?;

    let mut frame = Frame::decode(&wire)?;
    Ok(SessionTicket::from_frame(&mut frame)?)
}
