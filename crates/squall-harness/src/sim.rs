//! In-process broker and RUDP server.
//!
//! Swarms need something to talk to in CI and in demo mode. [`SimServer`]
//! speaks the real wire protocol over a real localhost UDP socket —
//! framing, AEAD, acks, scripted replies — and exposes switches for the
//! failure modes the tester itself exists to exercise (dropped acks, a
//! server gone silent). [`SimBroker`] hands out session tickets over TCP
//! the way the production session broker does.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::watch;
use tracing::{debug, warn};

use squall_proto::crypto::{KEY_SIZE, SALT_SIZE};
use squall_proto::{
    Frame, MAX_FRAME_SIZE, PacketCrypto, PacketDirection, PacketId, PacketType, ProtocolError,
    SessionTicket,
};

use crate::error::HarnessError;

/// Deterministic session key and salt derived from a seed.
///
/// The salt is kept printable because it travels as a string field in
/// the broker blob.
#[must_use]
pub fn session_material(seed: u64) -> (Vec<u8>, String) {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut key = vec![0u8; KEY_SIZE];
    rng.fill(&mut key[..]);
    let salt: String =
        (0..SALT_SIZE).map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char).collect();
    (key, salt)
}

/// Session broker stub: answers every TCP connection with one ticket.
///
/// Session ids are handed out sequentially so each accepted client gets
/// a distinct identity against the same key material.
pub struct SimBroker {
    addr: SocketAddr,
    shutdown: watch::Sender<bool>,
}

impl SimBroker {
    /// Bind on an ephemeral localhost port and start answering.
    pub async fn spawn(
        server_addr: SocketAddr,
        key: Vec<u8>,
        salt: String,
    ) -> Result<Self, HarnessError> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        drop(tokio::spawn(async move {
            let mut next_session: u16 = 1;
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        let Ok((mut stream, peer)) = accepted else { return };
                        let ticket = SessionTicket {
                            server_ip: server_addr.ip().to_string(),
                            server_port: server_addr.port(),
                            session_id: next_session,
                            session_key: key.clone(),
                            session_salt: salt.clone(),
                        };
                        next_session = next_session.wrapping_add(1);

                        let mut frame = Frame::new();
                        if ticket.write_to(&mut frame).is_ok() {
                            if let Err(error) = stream.write_all(&frame.encode()).await {
                                warn!(%error, %peer, "broker write failed");
                            }
                        }
                    }
                    _ = async { drop(shutdown_rx.wait_for(|stop| *stop).await) } => return,
                }
            }
        }));

        Ok(Self { addr, shutdown })
    }

    /// Address clients should fetch tickets from.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// What the sim server has observed so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimServerCounters {
    /// Connect packets received.
    pub connects: u64,
    /// Application (Send) packets received.
    pub sends: u64,
    /// Acks (SendReply/HeartbeatReply) received from clients.
    pub acks: u64,
    /// Disconnect frames received.
    pub disconnects: u64,
}

struct ServerShared {
    socket: UdpSocket,
    crypto: PacketCrypto,
    peers: Mutex<Vec<SocketAddr>>,
    counters: Mutex<SimServerCounters>,
    auto_replies: Mutex<HashMap<PacketId, PacketId>>,
    drop_send_acks: AtomicBool,
    silent: AtomicBool,
    next_sequence: AtomicU64,
}

impl ServerShared {
    fn lock_counters(&self) -> std::sync::MutexGuard<'_, SimServerCounters> {
        match self.counters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_peers(&self) -> std::sync::MutexGuard<'_, Vec<SocketAddr>> {
        match self.peers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn handle_datagram(&self, wire: &[u8], peer: SocketAddr) -> Result<(), ProtocolError> {
        let mut frame = Frame::decode(wire)?;
        let ty = frame.packet_type()?;
        self.crypto.open(&mut frame, PacketDirection::client_outbound(ty))?;
        let sequence = frame.sequence();
        debug!(%ty, sequence, %peer, "sim server received");

        match ty {
            PacketType::Connect => {
                self.lock_counters().connects += 1;
                {
                    let mut peers = self.lock_peers();
                    if !peers.contains(&peer) {
                        peers.push(peer);
                    }
                }
                if !self.silent.load(Ordering::SeqCst) {
                    self.send_ack(PacketType::SendReply, sequence, peer).await?;
                }
            }
            PacketType::Send => {
                self.lock_counters().sends += 1;
                if self.silent.load(Ordering::SeqCst) {
                    return Ok(());
                }
                if !self.drop_send_acks.load(Ordering::SeqCst) {
                    self.send_ack(PacketType::SendReply, sequence, peer).await?;
                }
                let reply_id = {
                    let replies = match self.auto_replies.lock() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    replies.get(&frame.packet_id()).copied()
                };
                if let Some(reply_id) = reply_id {
                    self.send_core_to(reply_id, frame.payload(), peer).await?;
                }
            }
            PacketType::SendReply | PacketType::HeartbeatReply => {
                self.lock_counters().acks += 1;
            }
            PacketType::Disconnect => {
                self.lock_counters().disconnects += 1;
            }
            PacketType::Heartbeat | PacketType::Invalid => {}
        }
        Ok(())
    }

    async fn send_ack(
        &self,
        reply_ty: PacketType,
        sequence: u64,
        peer: SocketAddr,
    ) -> Result<(), ProtocolError> {
        let mut frame = Frame::new();
        frame.set_packet_type(reply_ty);
        frame.set_sequence(sequence);
        self.crypto.seal(&mut frame, PacketDirection::server_outbound(reply_ty))?;
        if let Err(error) = self.socket.send_to(&frame.encode(), peer).await {
            warn!(%error, %peer, "sim server ack send failed");
        }
        Ok(())
    }

    async fn send_core_to(
        &self,
        packet_id: PacketId,
        payload: &[u8],
        peer: SocketAddr,
    ) -> Result<(), ProtocolError> {
        let mut frame = Frame::new();
        frame.set_packet_type(PacketType::Send);
        frame.set_sequence(self.next_sequence.fetch_add(1, Ordering::SeqCst));
        frame.set_packet_id(packet_id);
        frame.write_bytes(payload)?;
        self.crypto.seal(&mut frame, PacketDirection::server_outbound(PacketType::Send))?;
        if let Err(error) = self.socket.send_to(&frame.encode(), peer).await {
            warn!(%error, %peer, "sim server core send failed");
        }
        Ok(())
    }
}

/// Scripted RUDP server on a localhost UDP socket.
pub struct SimServer {
    shared: Arc<ServerShared>,
    addr: SocketAddr,
    shutdown: watch::Sender<bool>,
}

impl SimServer {
    /// Bind on an ephemeral localhost port and start serving.
    pub async fn spawn(key: Vec<u8>, salt: String) -> Result<Self, HarnessError> {
        let socket = UdpSocket::bind("127.0.0.1:0").await?;
        let addr = socket.local_addr()?;
        let crypto = PacketCrypto::new(&key, salt.as_bytes()).map_err(squall_client::ClientError::from)?;

        let shared = Arc::new(ServerShared {
            socket,
            crypto,
            peers: Mutex::new(Vec::new()),
            counters: Mutex::new(SimServerCounters::default()),
            auto_replies: Mutex::new(HashMap::new()),
            drop_send_acks: AtomicBool::new(false),
            silent: AtomicBool::new(false),
            next_sequence: AtomicU64::new(1),
        });

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let loop_shared = shared.clone();
        drop(tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_FRAME_SIZE];
            loop {
                tokio::select! {
                    received = loop_shared.socket.recv_from(&mut buf) => {
                        match received {
                            Ok((len, peer)) => {
                                if let Err(error) = loop_shared.handle_datagram(&buf[..len], peer).await {
                                    warn!(%error, %peer, "sim server dropped datagram");
                                }
                            }
                            Err(error) => {
                                warn!(%error, "sim server socket failed");
                                return;
                            }
                        }
                    }
                    _ = async { drop(shutdown_rx.wait_for(|stop| *stop).await) } => return,
                }
            }
        }));

        Ok(Self { shared, addr, shutdown })
    }

    /// Address the broker should steer clients to.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Current observation counters.
    #[must_use]
    pub fn counters(&self) -> SimServerCounters {
        *self.shared.lock_counters()
    }

    /// When a Send with `request` arrives, answer with a core packet
    /// tagged `response` echoing the request payload.
    pub fn set_auto_reply(&self, request: PacketId, response: PacketId) {
        match self.shared.auto_replies.lock() {
            Ok(mut guard) => {
                guard.insert(request, response);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(request, response);
            }
        }
    }

    /// Stop acknowledging Send packets (Connect acks still flow), to
    /// drive clients into their retransmission ceiling.
    pub fn set_drop_send_acks(&self, drop_acks: bool) {
        self.shared.drop_send_acks.store(drop_acks, Ordering::SeqCst);
    }

    /// Stop reacting to anything, to trip client liveness checks.
    pub fn set_silent(&self, silent: bool) {
        self.shared.silent.store(silent, Ordering::SeqCst);
    }

    /// Push a core packet to every known peer.
    pub async fn broadcast_core(&self, packet_id: PacketId, payload: &[u8]) {
        let peers = self.shared.lock_peers().clone();
        for peer in peers {
            if let Err(error) = self.shared.send_core_to(packet_id, payload, peer).await {
                warn!(%error, %peer, "sim server broadcast failed");
            }
        }
    }

    /// Push a heartbeat to every known peer.
    pub async fn broadcast_heartbeat(&self) {
        let peers = self.shared.lock_peers().clone();
        for peer in peers {
            let mut frame = Frame::new();
            frame.set_packet_type(PacketType::Heartbeat);
            frame.set_sequence(self.shared.next_sequence.fetch_add(1, Ordering::SeqCst));
            if self
                .shared
                .crypto
                .seal(&mut frame, PacketDirection::server_outbound(PacketType::Heartbeat))
                .is_ok()
            {
                if let Err(error) = self.shared.socket.send_to(&frame.encode(), peer).await {
                    warn!(%error, %peer, "sim server heartbeat failed");
                }
            }
        }
    }

    /// Stop serving.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}
