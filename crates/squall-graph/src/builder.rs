//! Fluent graph construction.
//!
//! The programmatic counterpart of a visual editor: start a chain at a
//! trigger, append nodes with `then_*` methods, and descend into branch
//! scopes (`then_if`, `then_loop`, `then_retry`, ...) that return to the
//! parent builder on their `end_*` call.
//!
//! ```
//! use squall_graph::builder::GraphBuilder;
//! use squall_proto::{Frame, PacketId};
//!
//! let graph = GraphBuilder::new("login storm")
//!     .on_connected("session up")
//!     .then_send("send login", PacketId(10), |_ctx| {
//!         let mut frame = Frame::new();
//!         let _ = frame.write_str("bot");
//!         frame
//!     })
//!     .then_wait("settle", 250)
//!     .build();
//! assert_eq!(graph.len(), 3);
//! ```

use std::sync::Arc;

use squall_proto::{Frame, PacketId};

use crate::context::{RuntimeContext, Value};
use crate::error::NodeError;
use crate::graph::ActionGraph;
use crate::node::{
    ActionNode, ChoiceOption, NodeId, NodeKind, TriggerCondition, TriggerKind,
};

/// Builds an [`ActionGraph`] one chained node at a time.
#[derive(Debug)]
pub struct GraphBuilder {
    graph: ActionGraph,
    last: Option<NodeId>,
}

impl GraphBuilder {
    /// Start a named graph.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { graph: ActionGraph::new(name), last: None }
    }

    /// Finish and return the graph.
    #[must_use]
    pub fn build(self) -> ActionGraph {
        self.graph
    }

    /// Add a pre-built node, linked after the current chain tail.
    #[must_use]
    pub fn node(mut self, node: ActionNode) -> Self {
        self.chain(node);
        self
    }

    fn chain(&mut self, node: ActionNode) -> NodeId {
        let id = self.graph.add_node(node);
        if let Some(last) = self.last {
            if let Some(prev) = self.graph.node_mut(last) {
                prev.next.push(id);
            }
        }
        self.last = Some(id);
        id
    }

    fn root(&mut self, node: ActionNode) -> NodeId {
        let id = self.graph.add_node(node);
        self.last = Some(id);
        id
    }

    /// Start a chain when the session handshake completes.
    #[must_use]
    pub fn on_connected(mut self, name: impl Into<String>) -> Self {
        self.root(
            ActionNode::new(name, NodeKind::Custom { handler: None })
                .with_trigger(TriggerCondition::on(TriggerKind::OnConnected)),
        );
        self
    }

    /// Start a chain when the session tears down.
    #[must_use]
    pub fn on_disconnected(mut self, name: impl Into<String>) -> Self {
        self.root(
            ActionNode::new(name, NodeKind::Custom { handler: None })
                .with_trigger(TriggerCondition::on(TriggerKind::OnDisconnected)),
        );
        self
    }

    /// Start a chain when a packet with `packet_id` arrives.
    #[must_use]
    pub fn on_receive(mut self, name: impl Into<String>, packet_id: PacketId) -> Self {
        self.root(
            ActionNode::new(name, NodeKind::Custom { handler: None })
                .with_trigger(TriggerCondition::on_packet(packet_id)),
        );
        self
    }

    /// Like [`GraphBuilder::on_receive`] with a payload filter.
    #[must_use]
    pub fn on_receive_with(
        mut self,
        name: impl Into<String>,
        packet_id: PacketId,
        validator: impl Fn(&Frame) -> bool + Send + Sync + 'static,
    ) -> Self {
        let mut trigger = TriggerCondition::on_packet(packet_id);
        trigger.validator = Some(Arc::new(validator));
        self.root(ActionNode::new(name, NodeKind::Custom { handler: None }).with_trigger(trigger));
        self
    }

    /// Start a chain fired explicitly by the orchestrator.
    #[must_use]
    pub fn on_manual(mut self, name: impl Into<String>) -> Self {
        self.root(
            ActionNode::new(name, NodeKind::Custom { handler: None })
                .with_trigger(TriggerCondition::on(TriggerKind::Manual)),
        );
        self
    }

    /// Append a send node.
    #[must_use]
    pub fn then_send(
        mut self,
        name: impl Into<String>,
        packet_id: PacketId,
        builder: impl Fn(&RuntimeContext) -> Frame + Send + Sync + 'static,
    ) -> Self {
        self.chain(ActionNode::new(
            name,
            NodeKind::SendPacket { packet_id, builder: Some(Arc::new(builder)) },
        ));
        self
    }

    /// Append a custom action node.
    #[must_use]
    pub fn then_do(
        mut self,
        name: impl Into<String>,
        handler: impl Fn(&RuntimeContext, Option<&Frame>) -> Result<(), NodeError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.chain(ActionNode::new(name, NodeKind::Custom { handler: Some(Arc::new(handler)) }));
        self
    }

    /// Append a log node.
    #[must_use]
    pub fn then_log(
        mut self,
        name: impl Into<String>,
        message: impl Fn(&RuntimeContext, Option<&Frame>) -> String + Send + Sync + 'static,
    ) -> Self {
        self.chain(ActionNode::new(name, NodeKind::Log { message: Some(Arc::new(message)) }));
        self
    }

    /// Append a fixed delay.
    #[must_use]
    pub fn then_wait(mut self, name: impl Into<String>, delay_ms: u64) -> Self {
        self.chain(ActionNode::new(name, NodeKind::Delay { delay_ms }));
        self
    }

    /// Append a uniformly random delay.
    #[must_use]
    pub fn then_random_wait(mut self, name: impl Into<String>, min_ms: u64, max_ms: u64) -> Self {
        self.chain(ActionNode::new(name, NodeKind::RandomDelay { min_ms, max_ms }));
        self
    }

    /// Append a variable store.
    #[must_use]
    pub fn then_set(mut self, name: impl Into<String>, variable: impl Into<String>, value: Value) -> Self {
        self.chain(ActionNode::new(
            name,
            NodeKind::SetVariable { variable: variable.into(), value },
        ));
        self
    }

    /// Append a variable read.
    #[must_use]
    pub fn then_get(mut self, name: impl Into<String>, variable: impl Into<String>) -> Self {
        self.chain(ActionNode::new(name, NodeKind::GetVariable { variable: variable.into() }));
        self
    }

    /// Append a packet parser invoking a registered setter.
    #[must_use]
    pub fn then_parse(mut self, name: impl Into<String>, setter: impl Into<String>) -> Self {
        self.chain(ActionNode::new(name, NodeKind::PacketParser { setter: setter.into() }));
        self
    }

    /// Append an assertion.
    #[must_use]
    pub fn then_assert(
        mut self,
        name: impl Into<String>,
        condition: impl Fn(&RuntimeContext) -> bool + Send + Sync + 'static,
        message: impl Into<String>,
        stop_on_failure: bool,
    ) -> Self {
        self.chain(ActionNode::new(
            name,
            NodeKind::Assert {
                condition: Some(Arc::new(condition)),
                message: message.into(),
                stop_on_failure,
                failure_nodes: Vec::new(),
            },
        ));
        self
    }

    /// Append a disconnect request.
    #[must_use]
    pub fn then_disconnect(mut self, name: impl Into<String>, reason: impl Into<String>) -> Self {
        self.chain(ActionNode::new(name, NodeKind::Disconnect { reason: reason.into() }));
        self
    }

    /// Open a conditional scope.
    #[must_use]
    pub fn then_if(
        mut self,
        name: impl Into<String>,
        condition: impl Fn(&RuntimeContext) -> bool + Send + Sync + 'static,
    ) -> ConditionalBuilder {
        let id = self.chain(ActionNode::new(
            name,
            NodeKind::Conditional {
                condition: Some(Arc::new(condition)),
                true_nodes: Vec::new(),
                false_nodes: Vec::new(),
            },
        ));
        ConditionalBuilder { parent: self, node: id }
    }

    /// Open a loop scope.
    #[must_use]
    pub fn then_loop(
        mut self,
        name: impl Into<String>,
        condition: impl Fn(&RuntimeContext) -> bool + Send + Sync + 'static,
        max_iterations: u32,
    ) -> LoopBuilder {
        let id = self.chain(ActionNode::new(
            name,
            NodeKind::Loop {
                condition: Some(Arc::new(condition)),
                max_iterations,
                body: Vec::new(),
                exit_nodes: Vec::new(),
            },
        ));
        LoopBuilder { parent: self, node: id }
    }

    /// Open a repeat-timer scope.
    #[must_use]
    pub fn then_repeat(
        mut self,
        name: impl Into<String>,
        repeat_count: u32,
        interval_ms: u64,
    ) -> RepeatBuilder {
        let id = self.chain(ActionNode::new(
            name,
            NodeKind::RepeatTimer { interval_ms, repeat_count, body: Vec::new() },
        ));
        RepeatBuilder { parent: self, node: id }
    }

    /// Open a wait-for-packet scope.
    #[must_use]
    pub fn then_wait_for(
        mut self,
        name: impl Into<String>,
        packet_id: PacketId,
        timeout_ms: u64,
    ) -> WaitBuilder {
        let id = self.chain(ActionNode::new(
            name,
            NodeKind::WaitForPacket { packet_id, timeout_ms, timeout_nodes: Vec::new() },
        ));
        WaitBuilder { parent: self, node: id }
    }

    /// Open a retry scope.
    #[must_use]
    pub fn then_retry(
        mut self,
        name: impl Into<String>,
        max_retries: u32,
        retry_delay_ms: u64,
        exponential_backoff: bool,
        success: impl Fn(&RuntimeContext) -> bool + Send + Sync + 'static,
    ) -> RetryBuilder {
        let id = self.chain(ActionNode::new(
            name,
            NodeKind::Retry {
                max_retries,
                retry_delay_ms,
                exponential_backoff,
                success: Some(Arc::new(success)),
                body: Vec::new(),
                success_nodes: Vec::new(),
                failure_nodes: Vec::new(),
            },
        ));
        RetryBuilder { parent: self, node: id }
    }

    /// Open a weighted-choice scope.
    #[must_use]
    pub fn then_choice(mut self, name: impl Into<String>) -> ChoiceBuilder {
        let id = self.chain(ActionNode::new(name, NodeKind::RandomChoice { choices: Vec::new() }));
        ChoiceBuilder { parent: self, node: id }
    }

    fn add_detached(&mut self, node: ActionNode) -> NodeId {
        self.graph.add_node(node)
    }

    fn custom(
        name: impl Into<String>,
        handler: impl Fn(&RuntimeContext, Option<&Frame>) -> Result<(), NodeError>
        + Send
        + Sync
        + 'static,
    ) -> ActionNode {
        ActionNode::new(name, NodeKind::Custom { handler: Some(Arc::new(handler)) })
    }
}

/// Scope for a conditional's branch lists.
#[derive(Debug)]
pub struct ConditionalBuilder {
    parent: GraphBuilder,
    node: NodeId,
}

impl ConditionalBuilder {
    /// Add an action to the true branch.
    #[must_use]
    pub fn true_do(
        mut self,
        name: impl Into<String>,
        handler: impl Fn(&RuntimeContext, Option<&Frame>) -> Result<(), NodeError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        let id = self.parent.add_detached(GraphBuilder::custom(name, handler));
        if let Some(node) = self.parent.graph.node_mut(self.node) {
            if let NodeKind::Conditional { true_nodes, .. } = &mut node.kind {
                true_nodes.push(id);
            }
        }
        self
    }

    /// Add an action to the false branch.
    #[must_use]
    pub fn false_do(
        mut self,
        name: impl Into<String>,
        handler: impl Fn(&RuntimeContext, Option<&Frame>) -> Result<(), NodeError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        let id = self.parent.add_detached(GraphBuilder::custom(name, handler));
        if let Some(node) = self.parent.graph.node_mut(self.node) {
            if let NodeKind::Conditional { false_nodes, .. } = &mut node.kind {
                false_nodes.push(id);
            }
        }
        self
    }

    /// Close the scope; later `then_*` calls chain after the conditional.
    #[must_use]
    pub fn end_if(self) -> GraphBuilder {
        self.parent
    }
}

/// Scope for a loop's body and exit lists.
#[derive(Debug)]
pub struct LoopBuilder {
    parent: GraphBuilder,
    node: NodeId,
}

impl LoopBuilder {
    /// Add an action to the loop body.
    #[must_use]
    pub fn body_do(
        mut self,
        name: impl Into<String>,
        handler: impl Fn(&RuntimeContext, Option<&Frame>) -> Result<(), NodeError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        let id = self.parent.add_detached(GraphBuilder::custom(name, handler));
        if let Some(node) = self.parent.graph.node_mut(self.node) {
            if let NodeKind::Loop { body, .. } = &mut node.kind {
                body.push(id);
            }
        }
        self
    }

    /// Add an action to run when the loop exits.
    #[must_use]
    pub fn on_exit_do(
        mut self,
        name: impl Into<String>,
        handler: impl Fn(&RuntimeContext, Option<&Frame>) -> Result<(), NodeError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        let id = self.parent.add_detached(GraphBuilder::custom(name, handler));
        if let Some(node) = self.parent.graph.node_mut(self.node) {
            if let NodeKind::Loop { exit_nodes, .. } = &mut node.kind {
                exit_nodes.push(id);
            }
        }
        self
    }

    /// Close the scope.
    #[must_use]
    pub fn end_loop(self) -> GraphBuilder {
        self.parent
    }
}

/// Scope for a repeat timer's body.
#[derive(Debug)]
pub struct RepeatBuilder {
    parent: GraphBuilder,
    node: NodeId,
}

impl RepeatBuilder {
    /// Add an action to the repeated body.
    #[must_use]
    pub fn body_do(
        mut self,
        name: impl Into<String>,
        handler: impl Fn(&RuntimeContext, Option<&Frame>) -> Result<(), NodeError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        let id = self.parent.add_detached(GraphBuilder::custom(name, handler));
        if let Some(node) = self.parent.graph.node_mut(self.node) {
            if let NodeKind::RepeatTimer { body, .. } = &mut node.kind {
                body.push(id);
            }
        }
        self
    }

    /// Close the scope.
    #[must_use]
    pub fn end_repeat(self) -> GraphBuilder {
        self.parent
    }
}

/// Scope for a wait node's timeout list.
#[derive(Debug)]
pub struct WaitBuilder {
    parent: GraphBuilder,
    node: NodeId,
}

impl WaitBuilder {
    /// Add an action to run if the wait times out.
    #[must_use]
    pub fn on_timeout_do(
        mut self,
        name: impl Into<String>,
        handler: impl Fn(&RuntimeContext, Option<&Frame>) -> Result<(), NodeError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        let id = self.parent.add_detached(GraphBuilder::custom(name, handler));
        if let Some(node) = self.parent.graph.node_mut(self.node) {
            if let NodeKind::WaitForPacket { timeout_nodes, .. } = &mut node.kind {
                timeout_nodes.push(id);
            }
        }
        self
    }

    /// Close the scope; `then_*` calls chain onto the success path.
    #[must_use]
    pub fn end_wait(self) -> GraphBuilder {
        self.parent
    }
}

/// Scope for a retry node's body and outcome lists.
#[derive(Debug)]
pub struct RetryBuilder {
    parent: GraphBuilder,
    node: NodeId,
}

impl RetryBuilder {
    /// Add an action to run on each attempt.
    #[must_use]
    pub fn attempt_do(
        mut self,
        name: impl Into<String>,
        handler: impl Fn(&RuntimeContext, Option<&Frame>) -> Result<(), NodeError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        let id = self.parent.add_detached(GraphBuilder::custom(name, handler));
        if let Some(node) = self.parent.graph.node_mut(self.node) {
            if let NodeKind::Retry { body, .. } = &mut node.kind {
                body.push(id);
            }
        }
        self
    }

    /// Add an action to run once an attempt succeeds.
    #[must_use]
    pub fn on_success_do(
        mut self,
        name: impl Into<String>,
        handler: impl Fn(&RuntimeContext, Option<&Frame>) -> Result<(), NodeError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        let id = self.parent.add_detached(GraphBuilder::custom(name, handler));
        if let Some(node) = self.parent.graph.node_mut(self.node) {
            if let NodeKind::Retry { success_nodes, .. } = &mut node.kind {
                success_nodes.push(id);
            }
        }
        self
    }

    /// Add an action to run when every attempt failed.
    #[must_use]
    pub fn on_failure_do(
        mut self,
        name: impl Into<String>,
        handler: impl Fn(&RuntimeContext, Option<&Frame>) -> Result<(), NodeError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        let id = self.parent.add_detached(GraphBuilder::custom(name, handler));
        if let Some(node) = self.parent.graph.node_mut(self.node) {
            if let NodeKind::Retry { failure_nodes, .. } = &mut node.kind {
                failure_nodes.push(id);
            }
        }
        self
    }

    /// Close the scope.
    #[must_use]
    pub fn end_retry(self) -> GraphBuilder {
        self.parent
    }
}

/// Scope for a weighted-choice node's options.
#[derive(Debug)]
pub struct ChoiceBuilder {
    parent: GraphBuilder,
    node: NodeId,
}

impl ChoiceBuilder {
    /// Add one weighted option.
    #[must_use]
    pub fn option_do(
        mut self,
        name: impl Into<String>,
        weight: u32,
        handler: impl Fn(&RuntimeContext, Option<&Frame>) -> Result<(), NodeError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        let name = name.into();
        let id = self.parent.add_detached(GraphBuilder::custom(name.clone(), handler));
        if let Some(node) = self.parent.graph.node_mut(self.node) {
            if let NodeKind::RandomChoice { choices } = &mut node.kind {
                choices.push(ChoiceOption { name, weight, node: id });
            }
        }
        self
    }

    /// Close the scope.
    #[must_use]
    pub fn end_choice(self) -> GraphBuilder {
        self.parent
    }
}
