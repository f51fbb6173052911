//! Behavior node taxonomy.
//!
//! Nodes are a tagged variant ([`NodeKind`]) executed through one code
//! path, composed via arena ids rather than owned references — loop and
//! retry bodies may point back at earlier nodes, and ids keep that
//! traversable without reference cycles.

use std::fmt;
use std::sync::Arc;

use squall_proto::{Frame, PacketId};

use crate::context::{RuntimeContext, Value};
use crate::error::NodeError;

/// Index of a node in its graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Raw arena index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Event kinds a root node can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerKind {
    /// Session handshake completed.
    OnConnected,
    /// Session tore down.
    OnDisconnected,
    /// An application packet arrived.
    OnPacketReceived,
    /// Fired explicitly by the orchestrator.
    Manual,
}

/// Closure that builds an outbound packet payload.
pub type PacketBuilder = Arc<dyn Fn(&RuntimeContext) -> Frame + Send + Sync>;

/// Predicate over the runtime context.
pub type Predicate = Arc<dyn Fn(&RuntimeContext) -> bool + Send + Sync>;

/// Predicate over a received payload, used by trigger conditions.
pub type PayloadValidator = Arc<dyn Fn(&Frame) -> bool + Send + Sync>;

/// Arbitrary action over the context and the triggering packet.
pub type ActionFn =
    Arc<dyn Fn(&RuntimeContext, Option<&Frame>) -> Result<(), NodeError> + Send + Sync>;

/// Closure producing a log line.
pub type MessageBuilder = Arc<dyn Fn(&RuntimeContext, Option<&Frame>) -> String + Send + Sync>;

/// Condition attached to a root node: which events start its chain.
#[derive(Clone)]
pub struct TriggerCondition {
    /// Event kind this root reacts to.
    pub kind: TriggerKind,
    /// For packet triggers, the concrete id to match; `None` matches any.
    pub packet_id: Option<PacketId>,
    /// Optional payload filter for packet triggers.
    pub validator: Option<PayloadValidator>,
}

impl TriggerCondition {
    /// Trigger on an event kind, no packet filter.
    #[must_use]
    pub fn on(kind: TriggerKind) -> Self {
        Self { kind, packet_id: None, validator: None }
    }

    /// Trigger on a specific received packet id.
    #[must_use]
    pub fn on_packet(packet_id: PacketId) -> Self {
        Self { kind: TriggerKind::OnPacketReceived, packet_id: Some(packet_id), validator: None }
    }

    /// Whether an event matches this condition.
    #[must_use]
    pub fn matches(&self, kind: TriggerKind, packet_id: Option<PacketId>, frame: Option<&Frame>) -> bool {
        if self.kind != kind {
            return false;
        }
        if self.kind != TriggerKind::OnPacketReceived {
            return true;
        }
        if self.packet_id.is_some() && self.packet_id != packet_id {
            return false;
        }
        match (&self.validator, frame) {
            (Some(validator), Some(frame)) => validator(frame),
            _ => true,
        }
    }
}

impl fmt::Debug for TriggerCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerCondition")
            .field("kind", &self.kind)
            .field("packet_id", &self.packet_id)
            .field("validator", &self.validator.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// One weighted option of a RandomChoice node.
#[derive(Debug, Clone)]
pub struct ChoiceOption {
    /// Display name for logs.
    pub name: String,
    /// Relative weight of this option.
    pub weight: u32,
    /// Chain entered when this option is drawn.
    pub node: NodeId,
}

/// Kind-specific behavior and configuration of a node.
#[derive(Clone)]
pub enum NodeKind {
    /// Build and send one application packet; failure is logged, the
    /// chain continues.
    SendPacket {
        /// Id stamped on the outgoing packet.
        packet_id: PacketId,
        /// Payload builder; a node without one logs and does nothing.
        builder: Option<PacketBuilder>,
    },
    /// Run an arbitrary handler.
    Custom {
        /// Handler to invoke; absent handlers are a silent no-op.
        handler: Option<ActionFn>,
    },
    /// Emit an info-level log line.
    Log {
        /// Message producer.
        message: Option<MessageBuilder>,
    },
    /// Detach, sleep, then resume the chain through the successors.
    Delay {
        /// Sleep duration in milliseconds.
        delay_ms: u64,
    },
    /// Like Delay with a uniformly random duration.
    RandomDelay {
        /// Lower bound, milliseconds.
        min_ms: u64,
        /// Upper bound, milliseconds.
        max_ms: u64,
    },
    /// Evaluate a predicate and run one of two branch lists, then the
    /// successors.
    Conditional {
        /// Branch predicate.
        condition: Option<Predicate>,
        /// Nodes run when the predicate holds.
        true_nodes: Vec<NodeId>,
        /// Nodes run when it does not.
        false_nodes: Vec<NodeId>,
    },
    /// Run a body while a continuation predicate holds, bounded by an
    /// iteration cap; then exit nodes, then successors.
    Loop {
        /// Continuation predicate, checked before each iteration.
        condition: Option<Predicate>,
        /// Iteration cap.
        max_iterations: u32,
        /// Body chain roots.
        body: Vec<NodeId>,
        /// Chains run after the loop finishes.
        exit_nodes: Vec<NodeId>,
    },
    /// Detach and run a body a fixed number of times on a fixed interval,
    /// then the successors.
    RepeatTimer {
        /// Delay between iterations, milliseconds.
        interval_ms: u64,
        /// Number of iterations.
        repeat_count: u32,
        /// Body chain roots.
        body: Vec<NodeId>,
    },
    /// Detach and wait for a specific packet id; on arrival continue to
    /// the successors, on timeout run the timeout list instead.
    WaitForPacket {
        /// Id to wait for.
        packet_id: PacketId,
        /// Give-up timeout, milliseconds.
        timeout_ms: u64,
        /// Chains run on timeout.
        timeout_nodes: Vec<NodeId>,
    },
    /// Detach and run a body up to N times with a delay between attempts,
    /// judging each attempt with a success predicate.
    Retry {
        /// Attempt budget.
        max_retries: u32,
        /// Base delay between attempts, milliseconds.
        retry_delay_ms: u64,
        /// Double the delay after each failed attempt.
        exponential_backoff: bool,
        /// Predicate evaluated after each attempt.
        success: Option<Predicate>,
        /// Body chain roots, run once per attempt.
        body: Vec<NodeId>,
        /// Chains run when an attempt succeeds.
        success_nodes: Vec<NodeId>,
        /// Chains run when the budget is exhausted.
        failure_nodes: Vec<NodeId>,
    },
    /// Evaluate a predicate; on failure run the failure list and
    /// optionally halt the rest of the chain.
    Assert {
        /// Predicate that must hold.
        condition: Option<Predicate>,
        /// Message attached to the failure.
        message: String,
        /// Halt the remainder of the chain on failure.
        stop_on_failure: bool,
        /// Chains run on failure.
        failure_nodes: Vec<NodeId>,
    },
    /// Draw one weighted option and execute only that chain.
    RandomChoice {
        /// Weighted options.
        choices: Vec<ChoiceOption>,
    },
    /// Store a value into the runtime context.
    SetVariable {
        /// Variable name.
        variable: String,
        /// Value to store.
        value: Value,
    },
    /// Read a context variable (logged for visibility).
    GetVariable {
        /// Variable name.
        variable: String,
    },
    /// Extract a value from the triggering packet via a registered setter.
    PacketParser {
        /// Registered setter name.
        setter: String,
    },
    /// Ask the session driver to tear the connection down.
    Disconnect {
        /// Reason forwarded to the driver.
        reason: String,
    },
}

impl NodeKind {
    /// Whether this node detaches from the triggering call and re-enters
    /// chain execution itself once its own scheduling resolves.
    ///
    /// This is a declared capability of the variant, not a type check;
    /// new kinds state their scheduling behavior here.
    #[must_use]
    pub fn is_detached(&self) -> bool {
        matches!(
            self,
            Self::Delay { .. }
                | Self::RandomDelay { .. }
                | Self::RepeatTimer { .. }
                | Self::WaitForPacket { .. }
                | Self::Retry { .. }
        )
    }

    /// Whether the node drives its own successor traversal (branch lists,
    /// bodies, detached continuations) instead of the dispatcher chasing
    /// `next` edges for it.
    #[must_use]
    pub fn handles_own_successors(&self) -> bool {
        self.is_detached()
            || matches!(
                self,
                Self::Conditional { .. } | Self::Loop { .. } | Self::RandomChoice { .. }
            )
    }

    /// Short kind name for logs and validation issues.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::SendPacket { .. } => "SendPacket",
            Self::Custom { .. } => "Custom",
            Self::Log { .. } => "Log",
            Self::Delay { .. } => "Delay",
            Self::RandomDelay { .. } => "RandomDelay",
            Self::Conditional { .. } => "Conditional",
            Self::Loop { .. } => "Loop",
            Self::RepeatTimer { .. } => "RepeatTimer",
            Self::WaitForPacket { .. } => "WaitForPacket",
            Self::Retry { .. } => "Retry",
            Self::Assert { .. } => "Assert",
            Self::RandomChoice { .. } => "RandomChoice",
            Self::SetVariable { .. } => "SetVariable",
            Self::GetVariable { .. } => "GetVariable",
            Self::PacketParser { .. } => "PacketParser",
            Self::Disconnect { .. } => "Disconnect",
        }
    }

    /// All kind-specific successor edges, in traversal order. The shared
    /// `next` list is not included; callers combine both.
    #[must_use]
    pub fn kind_successors(&self) -> Vec<NodeId> {
        match self {
            Self::Conditional { true_nodes, false_nodes, .. } => {
                true_nodes.iter().chain(false_nodes).copied().collect()
            }
            Self::Loop { body, exit_nodes, .. } => {
                body.iter().chain(exit_nodes).copied().collect()
            }
            Self::RepeatTimer { body, .. } => body.clone(),
            Self::WaitForPacket { timeout_nodes, .. } => timeout_nodes.clone(),
            Self::Retry { body, success_nodes, failure_nodes, .. } => {
                body.iter().chain(success_nodes).chain(failure_nodes).copied().collect()
            }
            Self::Assert { failure_nodes, .. } => failure_nodes.clone(),
            Self::RandomChoice { choices } => choices.iter().map(|c| c.node).collect(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind_name())
    }
}

/// One behavior node: shared fields plus kind-specific configuration.
///
/// A node with a trigger is a root — a dispatch entry point. Nodes
/// without triggers are only reachable as successors of other nodes.
#[derive(Debug, Clone)]
pub struct ActionNode {
    /// Display name, used in logs and validation issues.
    pub name: String,
    /// Optional trigger making this node a root.
    pub trigger: Option<TriggerCondition>,
    /// Successor chain entered after this node executes.
    pub next: Vec<NodeId>,
    /// Kind-specific behavior.
    pub kind: NodeKind,
}

impl ActionNode {
    /// Create a node with no trigger and no successors.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self { name: name.into(), trigger: None, next: Vec::new(), kind }
    }

    /// Attach a trigger, making this node a root.
    #[must_use]
    pub fn with_trigger(mut self, trigger: TriggerCondition) -> Self {
        self.trigger = Some(trigger);
        self
    }

    /// All successor edges: kind-specific lists first, then `next`.
    #[must_use]
    pub fn successors(&self) -> Vec<NodeId> {
        let mut edges = self.kind.kind_successors();
        edges.extend(&self.next);
        edges
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_matching() {
        let trigger = TriggerCondition::on_packet(PacketId(5));
        assert!(trigger.matches(TriggerKind::OnPacketReceived, Some(PacketId(5)), None));
        assert!(!trigger.matches(TriggerKind::OnPacketReceived, Some(PacketId(6)), None));
        assert!(!trigger.matches(TriggerKind::OnConnected, Some(PacketId(5)), None));

        let any = TriggerCondition::on(TriggerKind::OnConnected);
        assert!(any.matches(TriggerKind::OnConnected, None, None));
        assert!(any.matches(TriggerKind::OnConnected, Some(PacketId(9)), None));
    }

    #[test]
    fn validator_filters_payloads() {
        let mut trigger = TriggerCondition::on_packet(PacketId(1));
        trigger.validator = Some(Arc::new(|frame: &Frame| frame.payload().len() > 2));

        let mut long = Frame::new();
        long.write_u32(1).unwrap();
        let short = Frame::new();

        assert!(trigger.matches(TriggerKind::OnPacketReceived, Some(PacketId(1)), Some(&long)));
        assert!(!trigger.matches(TriggerKind::OnPacketReceived, Some(PacketId(1)), Some(&short)));
        // No payload to validate: the id match is enough.
        assert!(trigger.matches(TriggerKind::OnPacketReceived, Some(PacketId(1)), None));
    }

    #[test]
    fn detached_capability_is_declared_per_kind() {
        assert!(NodeKind::Delay { delay_ms: 1 }.is_detached());
        assert!(NodeKind::RandomDelay { min_ms: 1, max_ms: 2 }.is_detached());
        assert!(
            NodeKind::WaitForPacket {
                packet_id: PacketId(1),
                timeout_ms: 10,
                timeout_nodes: vec![]
            }
            .is_detached()
        );
        assert!(!NodeKind::Custom { handler: None }.is_detached());
        assert!(!NodeKind::Conditional { condition: None, true_nodes: vec![], false_nodes: vec![] }
            .is_detached());
    }

    #[test]
    fn successors_combine_kind_edges_and_next() {
        let mut node = ActionNode::new(
            "branch",
            NodeKind::Conditional {
                condition: None,
                true_nodes: vec![NodeId(1)],
                false_nodes: vec![NodeId(2)],
            },
        );
        node.next.push(NodeId(3));
        assert_eq!(node.successors(), vec![NodeId(1), NodeId(2), NodeId(3)]);
    }
}
