//! Bot swarm orchestration and test infrastructure.
//!
//! [`swarm::BotSwarm`] owns a pool of simulated clients, all bound to the
//! same behavior graph; [`sim`] provides an in-process scripted broker
//! and RUDP server so swarms can run end-to-end on localhost — in
//! integration tests and in the `squall-bot` demo mode.

pub mod error;
pub mod sim;
pub mod swarm;

pub use error::HarnessError;
pub use sim::{SimBroker, SimServer, session_material};
pub use swarm::{BotSwarm, SwarmConfig};
