//! Swarm orchestration: N simulated clients, one shared graph.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{error, info, warn};

use squall_client::{BotClient, ClientConfig, fetch_ticket};
use squall_graph::{AccessorRegistry, ActionGraph, NodeStatsTracker, validator};

use crate::error::HarnessError;

/// Swarm startup parameters.
#[derive(Debug, Clone)]
pub struct SwarmConfig {
    /// Session broker address (`host:port`).
    pub broker_addr: String,
    /// Number of bot sessions to start.
    pub bots: u16,
    /// Per-client driver configuration.
    pub client: ClientConfig,
    /// How long each bot may take to finish its handshake.
    pub connect_timeout: Duration,
}

impl SwarmConfig {
    /// Config for `bots` sessions against one broker, default timings.
    #[must_use]
    pub fn new(broker_addr: impl Into<String>, bots: u16) -> Self {
        Self {
            broker_addr: broker_addr.into(),
            bots,
            client: ClientConfig::default(),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// A pool of bot sessions executing one behavior graph.
///
/// One session's failure never stops the others: startup keeps going
/// past individual broker or handshake errors, and a session that tears
/// down mid-run just leaves the pool.
pub struct BotSwarm {
    graph: Arc<ActionGraph>,
    registry: Arc<AccessorRegistry>,
    stats: Arc<NodeStatsTracker>,
    clients: Mutex<Vec<Arc<BotClient>>>,
}

impl BotSwarm {
    /// Create a swarm over a built graph and accessor registry.
    #[must_use]
    pub fn new(graph: ActionGraph, registry: AccessorRegistry) -> Self {
        Self {
            graph: Arc::new(graph),
            registry: Arc::new(registry),
            stats: Arc::new(NodeStatsTracker::new()),
            clients: Mutex::new(Vec::new()),
        }
    }

    /// Validate the graph, then start the configured number of bots.
    ///
    /// Returns the number of sessions that reached Connected. Individual
    /// failures are logged and skipped; only a graph with error-severity
    /// issues, or a run where every session failed, aborts the swarm.
    pub async fn start(&self, config: &SwarmConfig) -> Result<u16, HarnessError> {
        let report = validator::validate(&self.graph);
        for issue in &report.issues {
            match issue.severity {
                squall_graph::Severity::Error => {
                    error!(node = %issue.node_name, category = issue.category, "{}", issue.message);
                }
                squall_graph::Severity::Warning => {
                    warn!(node = %issue.node_name, category = issue.category, "{}", issue.message);
                }
                squall_graph::Severity::Info => {
                    info!(node = %issue.node_name, category = issue.category, "{}", issue.message);
                }
            }
        }
        if !report.is_valid() {
            return Err(HarnessError::InvalidGraph {
                graph: self.graph.name().to_string(),
                errors: report.error_count(),
            });
        }

        let mut connected = 0u16;
        for bot in 0..config.bots {
            match self.start_one(config).await {
                Ok(client) => {
                    connected += 1;
                    self.lock_clients().push(Arc::new(client));
                }
                Err(error) => {
                    error!(bot, %error, "bot session failed to start");
                }
            }
        }

        if connected == 0 && config.bots > 0 {
            return Err(HarnessError::NoSessions { attempted: config.bots });
        }

        info!(connected, requested = config.bots, "swarm started");
        Ok(connected)
    }

    async fn start_one(&self, config: &SwarmConfig) -> Result<BotClient, HarnessError> {
        let ticket = fetch_ticket(&config.broker_addr).await?;
        let client = BotClient::connect(
            ticket,
            config.client.clone(),
            self.graph.clone(),
            self.registry.clone(),
            self.stats.clone(),
        )
        .await?;
        client.wait_connected(config.connect_timeout).await?;
        Ok(client)
    }

    /// Sessions currently in the Connected state.
    #[must_use]
    pub fn active_count(&self) -> u16 {
        self.lock_clients().iter().filter(|client| client.is_connected()).count() as u16
    }

    /// All clients started by this swarm, including torn-down ones.
    #[must_use]
    pub fn clients(&self) -> Vec<Arc<BotClient>> {
        self.lock_clients().clone()
    }

    /// Shared execution statistics across all sessions.
    #[must_use]
    pub fn stats(&self) -> Arc<NodeStatsTracker> {
        self.stats.clone()
    }

    /// Fire the Manual trigger on every session's graph.
    pub async fn trigger_manual(&self) {
        for client in self.clients() {
            client.trigger_manual().await;
        }
    }

    /// Disconnect every session and empty the pool.
    pub async fn stop(&self) {
        let clients = {
            let mut guard = self.lock_clients();
            std::mem::take(&mut *guard)
        };
        for client in &clients {
            client.disconnect().await;
        }
        info!(stopped = clients.len(), "swarm stopped");
    }

    fn lock_clients(&self) -> std::sync::MutexGuard<'_, Vec<Arc<BotClient>>> {
        match self.clients.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
