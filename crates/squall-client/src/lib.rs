//! Tokio driver for one Squall bot session.
//!
//! `squall-core` decides, this crate executes: the [`client::BotClient`]
//! owns the UDP socket and runs the three session loops — receive,
//! retransmission sweep, liveness check — feeding decoded packets into
//! the behavior graph and transmitting whatever the state machine tells
//! it to. The [`broker`] module fetches the session ticket that seeds a
//! client's identity.

pub mod broker;
pub mod client;
pub mod error;

pub use broker::fetch_ticket;
pub use client::{BotClient, ClientConfig};
pub use error::ClientError;
