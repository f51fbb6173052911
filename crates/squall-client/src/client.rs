//! One simulated client: socket, session loops, and graph wiring.
//!
//! The state machine in `squall-core` is pure; this module is the
//! runtime that executes its actions. Three loops run per session —
//! receive, retransmission sweep, liveness check — all stopped together
//! by one `watch` shutdown signal on teardown. The same signal reaches
//! detached graph continuations, so nothing outlives the session.
//!
//! Locking: the session (state machine plus pending store and sequence
//! counter) sits behind one `std::sync::Mutex`. Every lock is taken,
//! used, and released between awaits; actions are executed after the
//! guard is gone.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use squall_core::{Session, SessionAction, SessionConfig, SessionState};
use squall_graph::{
    AccessorRegistry, ActionGraph, BotDriver, GraphExecutor, NodeError, NodeStatsTracker,
    TriggerKind,
};
use squall_proto::{Frame, MAX_FRAME_SIZE, PacketCrypto, PacketId, SessionTicket};

use crate::error::ClientError;

/// Driver configuration for one client.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Transport timing knobs, forwarded to the session state machine.
    pub session: SessionConfig,
}

struct Shared {
    socket: UdpSocket,
    session: Mutex<Session>,
    shutdown: watch::Sender<bool>,
    state: watch::Sender<SessionState>,
    liveness_started: AtomicBool,
    executor: OnceLock<GraphExecutor>,
}

impl Shared {
    fn lock_session(&self) -> MutexGuard<'_, Session> {
        match self.session.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn send_app_packet(
        self: &Arc<Self>,
        frame: Frame,
        packet_id: PacketId,
    ) -> Result<(), NodeError> {
        let actions = self
            .lock_session()
            .send_packet(frame, packet_id, Instant::now())
            .map_err(|e| NodeError::Send(e.to_string()))?;

        for action in actions {
            if let SessionAction::Transmit(bytes) = action {
                self.socket
                    .send(&bytes)
                    .await
                    .map_err(|e| NodeError::Send(e.to_string()))?;
            }
        }
        Ok(())
    }

    async fn local_disconnect(self: &Arc<Self>, reason: &str) {
        debug!(reason, "local disconnect requested");
        let actions = self.lock_session().disconnect();
        if let Some(executor) = self.executor.get() {
            execute_actions(self, executor, actions).await;
        }
    }
}

/// The graph's handle onto the session. Holds the shared state weakly so
/// the executor (which lives inside `Shared`) does not keep the session
/// alive in a reference cycle; a handle whose session is gone reports
/// send failures instead of panicking.
struct DriverHandle {
    shared: Weak<Shared>,
}

#[async_trait]
impl BotDriver for DriverHandle {
    async fn send_packet(&self, frame: Frame, packet_id: PacketId) -> Result<(), NodeError> {
        let Some(shared) = self.shared.upgrade() else {
            return Err(NodeError::Send("session is gone".to_string()));
        };
        shared.send_app_packet(frame, packet_id).await
    }

    async fn disconnect(&self, reason: &str) {
        if let Some(shared) = self.shared.upgrade() {
            shared.local_disconnect(reason).await;
        }
    }

    fn is_connected(&self) -> bool {
        self.shared.upgrade().is_some_and(|shared| shared.lock_session().is_connected())
    }

    fn session_id(&self) -> u16 {
        self.shared.upgrade().map_or(0, |shared| shared.lock_session().session_id())
    }
}

/// A running simulated client bound to one behavior graph.
pub struct BotClient {
    shared: Arc<Shared>,
    executor: GraphExecutor,
    ticket: SessionTicket,
}

impl BotClient {
    /// Bind a socket, start the handshake, and spawn the session loops.
    ///
    /// Returns as soon as the Connect packet is on the wire; use
    /// [`BotClient::wait_connected`] to await the acknowledgment.
    pub async fn connect(
        ticket: SessionTicket,
        config: ClientConfig,
        graph: Arc<ActionGraph>,
        registry: Arc<AccessorRegistry>,
        stats: Arc<NodeStatsTracker>,
    ) -> Result<Self, ClientError> {
        let crypto = PacketCrypto::new(&ticket.session_key, ticket.session_salt.as_bytes())?;
        let session = Session::new(ticket.session_id, crypto, config.session);

        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect((ticket.server_ip.as_str(), ticket.server_port)).await?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let (state, _) = watch::channel(SessionState::Disconnected);
        let shared = Arc::new(Shared {
            socket,
            session: Mutex::new(session),
            shutdown,
            state,
            liveness_started: AtomicBool::new(false),
            executor: OnceLock::new(),
        });

        let driver = Arc::new(DriverHandle { shared: Arc::downgrade(&shared) });
        let executor = GraphExecutor::new(graph, driver, registry, stats, shutdown_rx.clone());
        drop(shared.executor.set(executor.clone()));

        let actions = shared.lock_session().connect(Instant::now())?;
        shared.state.send_replace(SessionState::Connecting);
        execute_actions(&shared, &executor, actions).await;

        spawn_recv_loop(shared.clone(), executor.clone(), shutdown_rx.clone());
        spawn_retransmit_loop(shared.clone(), executor.clone(), shutdown_rx);

        info!(session_id = ticket.session_id, server = %ticket.server_ip, "bot client started");
        Ok(Self { shared, executor, ticket })
    }

    /// Wait until the handshake is acknowledged.
    pub async fn wait_connected(&self, timeout: Duration) -> Result<(), ClientError> {
        let mut state = self.shared.state.subscribe();
        let connected = state.wait_for(|s| *s == SessionState::Connected);
        match tokio::time::timeout(timeout, connected).await {
            Ok(Ok(_)) => Ok(()),
            _ => Err(ClientError::HandshakeTimeout(timeout)),
        }
    }

    /// Wait until the session has torn down (for any reason).
    pub async fn wait_disconnected(&self) {
        let mut shutdown = self.shared.shutdown.subscribe();
        drop(shutdown.wait_for(|stop| *stop).await);
    }

    /// Whether the session is currently connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.lock_session().is_connected()
    }

    /// Current session lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.shared.lock_session().state()
    }

    /// Broker-assigned session id.
    #[must_use]
    pub fn session_id(&self) -> u16 {
        self.ticket.session_id
    }

    /// Send one application packet from outside the graph.
    pub async fn send_packet(&self, frame: Frame, packet_id: PacketId) -> Result<(), ClientError> {
        self.shared
            .send_app_packet(frame, packet_id)
            .await
            .map_err(|e| ClientError::Io(std::io::Error::other(e.to_string())))
    }

    /// Fire a manual trigger on this client's graph.
    pub async fn trigger_manual(&self) {
        self.executor.trigger_event(TriggerKind::Manual, None, None).await;
    }

    /// Tear the session down and stop all loops. Idempotent.
    pub async fn disconnect(&self) {
        self.shared.local_disconnect("local disconnect").await;
    }
}

/// Execute state-machine actions in order. Must be called without the
/// session lock held; delivery re-enters the graph, which may send.
async fn execute_actions(shared: &Arc<Shared>, executor: &GraphExecutor, actions: Vec<SessionAction>) {
    for action in actions {
        match action {
            SessionAction::Transmit(bytes) => {
                if let Err(error) = shared.socket.send(&bytes).await {
                    warn!(%error, "socket send failed");
                }
            }
            SessionAction::Deliver { packet_id, frame } => {
                executor
                    .trigger_event(TriggerKind::OnPacketReceived, Some(packet_id), Some(frame))
                    .await;
            }
            SessionAction::StartLiveness => {
                shared.state.send_replace(SessionState::Connected);
                spawn_liveness_loop(shared, executor);
                executor.trigger_event(TriggerKind::OnConnected, None, None).await;
            }
            SessionAction::Teardown { reason } => {
                info!(%reason, "session teardown");
                let _ = shared.shutdown.send(true);
                shared.lock_session().teardown_complete();
                shared.state.send_replace(SessionState::Disconnected);
                executor.trigger_event(TriggerKind::OnDisconnected, None, None).await;
            }
        }
    }
}

fn spawn_recv_loop(
    shared: Arc<Shared>,
    executor: GraphExecutor,
    mut shutdown: watch::Receiver<bool>,
) {
    drop(tokio::spawn(async move {
        let mut buf = vec![0u8; MAX_FRAME_SIZE];
        loop {
            tokio::select! {
                received = shared.socket.recv(&mut buf) => {
                    match received {
                        Ok(len) => {
                            let outcome = { shared.lock_session().on_datagram(&buf[..len]) };
                            match outcome {
                                Ok(actions) => execute_actions(&shared, &executor, actions).await,
                                Err(error) => warn!(%error, "dropping undecodable datagram"),
                            }
                        }
                        Err(error) => {
                            if !*shutdown.borrow() {
                                warn!(%error, "socket receive failed");
                            }
                            return;
                        }
                    }
                }
                _ = async { drop(shutdown.wait_for(|stop| *stop).await) } => return,
            }
        }
    }));
}

fn spawn_retransmit_loop(
    shared: Arc<Shared>,
    executor: GraphExecutor,
    mut shutdown: watch::Receiver<bool>,
) {
    let tick = shared.lock_session().config().retransmit_tick;
    drop(tokio::spawn(async move {
        loop {
            tokio::select! {
                () = sleep(tick) => {
                    let actions = { shared.lock_session().tick_retransmit(Instant::now()) };
                    execute_actions(&shared, &executor, actions).await;
                }
                _ = async { drop(shutdown.wait_for(|stop| *stop).await) } => return,
            }
        }
    }));
}

/// Spawned once, on the handshake acknowledgment.
fn spawn_liveness_loop(shared: &Arc<Shared>, executor: &GraphExecutor) {
    if shared.liveness_started.swap(true, Ordering::SeqCst) {
        return;
    }
    let shared = shared.clone();
    let executor = executor.clone();
    let mut shutdown = shared.shutdown.subscribe();
    let interval = shared.lock_session().config().liveness_interval;
    drop(tokio::spawn(async move {
        loop {
            tokio::select! {
                () = sleep(interval) => {
                    let actions = { shared.lock_session().tick_liveness() };
                    execute_actions(&shared, &executor, actions).await;
                }
                _ = async { drop(shutdown.wait_for(|stop| *stop).await) } => return,
            }
        }
    }));
}
