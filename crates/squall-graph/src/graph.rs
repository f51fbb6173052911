//! Trigger-indexed collection of behavior nodes.
//!
//! Nodes live in an arena; two lookup indices — by trigger kind and, for
//! packet triggers with a concrete id, by packet id — are built
//! incrementally as nodes are added. The indices are append-only during
//! construction and read-only afterwards, so a built graph can be shared
//! across every session of a swarm behind an `Arc`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use squall_proto::PacketId;
use tokio::sync::Notify;

use crate::node::{ActionNode, NodeId, TriggerKind};

/// A named behavior graph plus its dispatch indices.
#[derive(Debug, Default)]
pub struct ActionGraph {
    name: String,
    nodes: Vec<ActionNode>,
    trigger_index: HashMap<TriggerKind, Vec<NodeId>>,
    packet_index: HashMap<PacketId, Vec<NodeId>>,
    waiters: Mutex<HashMap<PacketId, Vec<Arc<Notify>>>>,
}

impl ActionGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    /// Graph name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a node and index it by trigger if it has one.
    pub fn add_node(&mut self, node: ActionNode) -> NodeId {
        let id = NodeId(self.nodes.len());

        if let Some(trigger) = &node.trigger {
            self.trigger_index.entry(trigger.kind).or_default().push(id);

            if trigger.kind == TriggerKind::OnPacketReceived
                && let Some(packet_id) = trigger.packet_id
            {
                self.packet_index.entry(packet_id).or_default().push(id);
            }
        }

        self.nodes.push(node);
        id
    }

    /// Node by arena id.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&ActionNode> {
        self.nodes.get(id.0)
    }

    /// Mutable node access for the construction phase. Trigger fields
    /// must not change after insertion; the indices are not rebuilt.
    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut ActionNode> {
        self.nodes.get_mut(id.0)
    }

    /// All nodes in insertion order.
    #[must_use]
    pub fn all_nodes(&self) -> &[ActionNode] {
        &self.nodes
    }

    /// Ids of all nodes, in insertion order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(NodeId)
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Candidate roots for an event: the packet-id index when the event
    /// is a packet arrival with a concrete id, the trigger-kind index
    /// otherwise.
    #[must_use]
    pub fn candidates(&self, kind: TriggerKind, packet_id: Option<PacketId>) -> Vec<NodeId> {
        if kind == TriggerKind::OnPacketReceived
            && let Some(packet_id) = packet_id
        {
            return self.packet_index.get(&packet_id).cloned().unwrap_or_default();
        }
        self.trigger_index.get(&kind).cloned().unwrap_or_default()
    }

    /// Register interest in the next arrival of `packet_id`.
    ///
    /// The returned [`Notify`] holds a permit once
    /// [`ActionGraph::notify_packet`] fires, so a notification between
    /// registration and the await is not lost.
    #[must_use]
    pub fn register_waiter(&self, packet_id: PacketId) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.lock_waiters().entry(packet_id).or_default().push(notify.clone());
        notify
    }

    /// Drop a previously registered waiter, if still present.
    pub fn remove_waiter(&self, packet_id: PacketId, waiter: &Arc<Notify>) {
        let mut waiters = self.lock_waiters();
        if let Some(entries) = waiters.get_mut(&packet_id) {
            entries.retain(|entry| !Arc::ptr_eq(entry, waiter));
            if entries.is_empty() {
                waiters.remove(&packet_id);
            }
        }
    }

    /// Wake every chain waiting on `packet_id`. Each waiter fires once;
    /// the table entry is consumed.
    pub fn notify_packet(&self, packet_id: PacketId) {
        let entries = self.lock_waiters().remove(&packet_id);
        if let Some(entries) = entries {
            for waiter in entries {
                waiter.notify_one();
            }
        }
    }

    fn lock_waiters(&self) -> std::sync::MutexGuard<'_, HashMap<PacketId, Vec<Arc<Notify>>>> {
        match self.waiters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
