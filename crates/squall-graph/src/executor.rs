//! Event dispatch and chain execution.
//!
//! [`GraphExecutor::trigger_event`] locates matching root nodes and runs
//! each chain depth-first with a fresh context and a fresh visited-set
//! guard. Synchronous nodes execute on the same call stack and traversal
//! continues into their successors; detached nodes (Delay, RandomDelay,
//! RepeatTimer, WaitForPacket, Retry) schedule themselves on the runtime
//! and re-enter chain execution once their own condition resolves.
//!
//! Detached continuations subscribe to the session's shutdown signal and
//! exit at their next await point after teardown instead of leaking.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use squall_proto::{Frame, PacketId};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::context::RuntimeContext;
use crate::driver::BotDriver;
use crate::error::NodeError;
use crate::graph::ActionGraph;
use crate::node::{ActionNode, NodeId, NodeKind, TriggerKind};
use crate::registry::AccessorRegistry;
use crate::stats::NodeStatsTracker;

/// What the traversal does after a node executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    /// Chase the node's `next` edges.
    Continue,
    /// The node drove its own successors (or detached); stop here.
    Stop,
}

/// Executes chains of one graph against one session driver.
///
/// Cheap to clone: every field is shared. One executor belongs to one
/// session; the graph, registry, and stats may be shared more widely.
#[derive(Clone)]
pub struct GraphExecutor {
    graph: Arc<ActionGraph>,
    driver: Arc<dyn BotDriver>,
    registry: Arc<AccessorRegistry>,
    stats: Arc<NodeStatsTracker>,
    shutdown: watch::Receiver<bool>,
}

impl GraphExecutor {
    /// Wire an executor to its collaborators.
    ///
    /// `shutdown` is the session's teardown signal; detached
    /// continuations stop when it turns true.
    #[must_use]
    pub fn new(
        graph: Arc<ActionGraph>,
        driver: Arc<dyn BotDriver>,
        registry: Arc<AccessorRegistry>,
        stats: Arc<NodeStatsTracker>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self { graph, driver, registry, stats, shutdown }
    }

    /// The graph this executor runs.
    #[must_use]
    pub fn graph(&self) -> &Arc<ActionGraph> {
        &self.graph
    }

    /// Dispatch one event: wake packet waiters, then find matching roots
    /// and run each chain independently. A failing chain is logged and
    /// does not abort sibling matches.
    pub async fn trigger_event(
        &self,
        kind: TriggerKind,
        packet_id: Option<PacketId>,
        frame: Option<Frame>,
    ) {
        if kind == TriggerKind::OnPacketReceived
            && let Some(packet_id) = packet_id
        {
            self.graph.notify_packet(packet_id);
        }

        for id in self.graph.candidates(kind, packet_id) {
            let Some(node) = self.graph.node(id) else { continue };
            let Some(trigger) = &node.trigger else { continue };
            if !trigger.matches(kind, packet_id, frame.as_ref()) {
                continue;
            }

            debug!(node = %node.name, ?kind, "triggering node");
            let ctx = Arc::new(RuntimeContext::new(frame.clone()));
            let mut visited = HashSet::new();
            if let Err(error) = self.run_node(id, &ctx, &mut visited).await {
                warn!(node = %node.name, %error, "node chain failed");
            }
        }
    }

    /// Run a list of chain roots against one shared context, with a fresh
    /// visited set for the list.
    async fn run_list(
        &self,
        ids: &[NodeId],
        ctx: &Arc<RuntimeContext>,
    ) -> Result<(), NodeError> {
        let mut visited = HashSet::new();
        for id in ids {
            self.run_node(*id, ctx, &mut visited).await?;
        }
        Ok(())
    }

    /// Depth-first execution of one node and, for synchronous kinds, its
    /// `next` successors. A node already in this traversal's visited set
    /// is skipped with a warning rather than looped.
    fn run_node<'a>(
        &'a self,
        id: NodeId,
        ctx: &'a Arc<RuntimeContext>,
        visited: &'a mut HashSet<NodeId>,
    ) -> Pin<Box<dyn Future<Output = Result<(), NodeError>> + Send + 'a>> {
        Box::pin(async move {
            let Some(node) = self.graph.node(id) else {
                warn!(%id, "chain points at a node that does not exist");
                return Ok(());
            };
            if !visited.insert(id) {
                warn!(node = %node.name, "circular reference detected, skipping revisit");
                return Ok(());
            }

            let started = Instant::now();
            let result = self.execute_node(node, ctx).await;
            match &result {
                Ok(_) => self.stats.record(&node.name, started.elapsed(), true, None),
                Err(error) => {
                    let message = error.to_string();
                    self.stats.record(&node.name, started.elapsed(), false, Some(&message));
                }
            }

            if result? == Flow::Continue {
                for next in &node.next {
                    self.run_node(*next, ctx, visited).await?;
                }
            }
            Ok(())
        })
    }

    #[allow(clippy::too_many_lines)]
    async fn execute_node(
        &self,
        node: &ActionNode,
        ctx: &Arc<RuntimeContext>,
    ) -> Result<Flow, NodeError> {
        match &node.kind {
            NodeKind::SendPacket { packet_id, builder } => {
                let Some(builder) = builder else {
                    warn!(node = %node.name, "send node has no packet builder");
                    return Ok(Flow::Continue);
                };
                let frame = builder(ctx);
                match self.driver.send_packet(frame, *packet_id).await {
                    Ok(()) => debug!(node = %node.name, %packet_id, "packet sent"),
                    Err(error) => warn!(node = %node.name, %error, "failed to send packet"),
                }
                Ok(Flow::Continue)
            }

            NodeKind::Custom { handler } => {
                if let Some(handler) = handler {
                    let packet = ctx.packet();
                    handler(ctx, packet.as_ref())?;
                    debug!(node = %node.name, "executed custom action");
                }
                Ok(Flow::Continue)
            }

            NodeKind::Log { message } => {
                if let Some(message) = message {
                    let packet = ctx.packet();
                    info!(node = %node.name, "[bot action] {}", message(ctx, packet.as_ref()));
                }
                Ok(Flow::Continue)
            }

            NodeKind::Delay { delay_ms } => {
                self.detach_after(
                    Duration::from_millis(*delay_ms),
                    node.next.clone(),
                    ctx.clone(),
                    node.name.clone(),
                );
                Ok(Flow::Stop)
            }

            NodeKind::RandomDelay { min_ms, max_ms } => {
                let (low, high) = if min_ms <= max_ms { (*min_ms, *max_ms) } else { (*max_ms, *min_ms) };
                let delay_ms = rand::thread_rng().gen_range(low..=high);
                self.detach_after(
                    Duration::from_millis(delay_ms),
                    node.next.clone(),
                    ctx.clone(),
                    node.name.clone(),
                );
                Ok(Flow::Stop)
            }

            NodeKind::Conditional { condition, true_nodes, false_nodes } => {
                let Some(condition) = condition else {
                    warn!(node = %node.name, "conditional node has no condition");
                    return Ok(Flow::Stop);
                };
                let outcome = condition(ctx);
                debug!(node = %node.name, outcome, "conditional check");
                let branch = if outcome { true_nodes } else { false_nodes };
                self.run_list(branch, ctx).await?;
                self.run_list(&node.next, ctx).await?;
                Ok(Flow::Stop)
            }

            NodeKind::Loop { condition, max_iterations, body, exit_nodes } => {
                let Some(condition) = condition else {
                    warn!(node = %node.name, "loop node has no continue condition");
                    return Ok(Flow::Stop);
                };
                let mut iteration = 0;
                while iteration < *max_iterations && condition(ctx) {
                    debug!(node = %node.name, iteration, "loop iteration");
                    self.run_list(body, ctx).await?;
                    iteration += 1;
                }
                if iteration >= *max_iterations {
                    warn!(node = %node.name, max = max_iterations, "loop reached maximum iterations");
                }
                self.run_list(exit_nodes, ctx).await?;
                self.run_list(&node.next, ctx).await?;
                Ok(Flow::Stop)
            }

            NodeKind::RepeatTimer { interval_ms, repeat_count, body } => {
                let exec = self.clone();
                let ctx = ctx.clone();
                let body = body.clone();
                let next = node.next.clone();
                let name = node.name.clone();
                let interval = Duration::from_millis(*interval_ms);
                let count = *repeat_count;
                let mut shutdown = self.shutdown.clone();
                drop(tokio::spawn(async move {
                    for iteration in 0..count {
                        if *shutdown.borrow() {
                            return;
                        }
                        debug!(node = %name, iteration = iteration + 1, total = count, "repeat iteration");
                        if let Err(error) = exec.run_list(&body, &ctx).await {
                            warn!(node = %name, %error, "repeat body failed");
                            return;
                        }
                        if iteration + 1 < count {
                            tokio::select! {
                                () = sleep(interval) => {}
                                _ = shutdown.wait_for(|stop| *stop) => return,
                            }
                        }
                    }
                    if let Err(error) = exec.run_list(&next, &ctx).await {
                        warn!(node = %name, %error, "detached continuation failed");
                    }
                }));
                Ok(Flow::Stop)
            }

            NodeKind::WaitForPacket { packet_id, timeout_ms, timeout_nodes } => {
                let waiter = self.graph.register_waiter(*packet_id);
                let exec = self.clone();
                let ctx = ctx.clone();
                let next = node.next.clone();
                let timeout_nodes = timeout_nodes.clone();
                let name = node.name.clone();
                let packet_id = *packet_id;
                let timeout = Duration::from_millis(*timeout_ms);
                let mut shutdown = self.shutdown.clone();
                drop(tokio::spawn(async move {
                    tokio::select! {
                        () = waiter.notified() => {
                            exec.graph.remove_waiter(packet_id, &waiter);
                            debug!(node = %name, %packet_id, "expected packet arrived");
                            if let Err(error) = exec.run_list(&next, &ctx).await {
                                warn!(node = %name, %error, "detached continuation failed");
                            }
                        }
                        () = sleep(timeout) => {
                            exec.graph.remove_waiter(packet_id, &waiter);
                            warn!(node = %name, %packet_id, ?timeout, "timed out waiting for packet");
                            if let Err(error) = exec.run_list(&timeout_nodes, &ctx).await {
                                warn!(node = %name, %error, "timeout chain failed");
                            }
                        }
                        _ = async { drop(shutdown.wait_for(|stop| *stop).await) } => {
                            exec.graph.remove_waiter(packet_id, &waiter);
                        }
                    }
                }));
                Ok(Flow::Stop)
            }

            NodeKind::Retry {
                max_retries,
                retry_delay_ms,
                exponential_backoff,
                success,
                body,
                success_nodes,
                failure_nodes,
            } => {
                let Some(success) = success.clone() else {
                    warn!(node = %node.name, "retry node has no success predicate");
                    return Ok(Flow::Stop);
                };
                let exec = self.clone();
                let ctx = ctx.clone();
                let body = body.clone();
                let success_nodes = success_nodes.clone();
                let failure_nodes = failure_nodes.clone();
                let next = node.next.clone();
                let name = node.name.clone();
                let max_retries = *max_retries;
                let backoff = *exponential_backoff;
                let mut delay = Duration::from_millis(*retry_delay_ms);
                let mut shutdown = self.shutdown.clone();
                drop(tokio::spawn(async move {
                    let mut succeeded = false;
                    for attempt in 1..=max_retries {
                        if *shutdown.borrow() {
                            return;
                        }
                        debug!(node = %name, attempt, max_retries, "retry attempt");
                        if let Err(error) = exec.run_list(&body, &ctx).await {
                            warn!(node = %name, %error, "retry body failed");
                        }
                        if success(&ctx) {
                            succeeded = true;
                            break;
                        }
                        if attempt < max_retries {
                            tokio::select! {
                                () = sleep(delay) => {}
                                _ = shutdown.wait_for(|stop| *stop) => return,
                            }
                            if backoff {
                                delay *= 2;
                            }
                        }
                    }

                    let outcome = if succeeded { &success_nodes } else { &failure_nodes };
                    if let Err(error) = exec.run_list(outcome, &ctx).await {
                        warn!(node = %name, %error, "retry outcome chain failed");
                    }
                    if let Err(error) = exec.run_list(&next, &ctx).await {
                        warn!(node = %name, %error, "detached continuation failed");
                    }
                }));
                Ok(Flow::Stop)
            }

            NodeKind::Assert { condition, message, stop_on_failure, failure_nodes } => {
                let Some(condition) = condition else {
                    warn!(node = %node.name, "assert node has no condition");
                    return Ok(Flow::Continue);
                };
                if condition(ctx) {
                    return Ok(Flow::Continue);
                }
                warn!(node = %node.name, %message, "assertion failed");
                self.run_list(failure_nodes, ctx).await?;
                if *stop_on_failure {
                    Err(NodeError::AssertionFailed(message.clone()))
                } else {
                    Ok(Flow::Continue)
                }
            }

            NodeKind::RandomChoice { choices } => {
                let total: u32 = choices.iter().map(|c| c.weight).sum();
                if total == 0 {
                    warn!(node = %node.name, "random choice has no weighted options");
                    return Ok(Flow::Stop);
                }
                let mut draw = rand::thread_rng().gen_range(0..total);
                let mut chosen = &choices[0];
                for choice in choices {
                    if draw < choice.weight {
                        chosen = choice;
                        break;
                    }
                    draw -= choice.weight;
                }
                debug!(node = %node.name, option = %chosen.name, "random choice drawn");
                self.run_list(&[chosen.node], ctx).await?;
                Ok(Flow::Stop)
            }

            NodeKind::SetVariable { variable, value } => {
                debug!(node = %node.name, %variable, %value, "variable set");
                ctx.set(variable.clone(), value.clone());
                Ok(Flow::Continue)
            }

            NodeKind::GetVariable { variable } => {
                match ctx.get(variable) {
                    Some(value) => debug!(node = %node.name, %variable, %value, "variable read"),
                    None => debug!(node = %node.name, %variable, "variable not set"),
                }
                Ok(Flow::Continue)
            }

            NodeKind::PacketParser { setter } => {
                let packet = ctx.packet();
                self.registry.invoke_setter(setter, ctx, packet.as_ref())?;
                debug!(node = %node.name, %setter, "packet parser invoked");
                Ok(Flow::Continue)
            }

            NodeKind::Disconnect { reason } => {
                info!(node = %node.name, %reason, "bot disconnecting");
                self.driver.disconnect(reason).await;
                Ok(Flow::Continue)
            }
        }
    }

    /// Spawn a continuation that sleeps, then re-enters chain execution
    /// for `next` — unless the session tears down first.
    fn detach_after(
        &self,
        delay: Duration,
        next: Vec<NodeId>,
        ctx: Arc<RuntimeContext>,
        name: String,
    ) {
        let exec = self.clone();
        let mut shutdown = self.shutdown.clone();
        drop(tokio::spawn(async move {
            tokio::select! {
                () = sleep(delay) => {
                    debug!(node = %name, ?delay, "delay elapsed, resuming chain");
                    if let Err(error) = exec.run_list(&next, &ctx).await {
                        warn!(node = %name, %error, "detached continuation failed");
                    }
                }
                _ = async { drop(shutdown.wait_for(|stop| *stop).await) } => {
                    debug!(node = %name, "delay cancelled by session teardown");
                }
            }
        }));
    }
}

impl std::fmt::Debug for GraphExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphExecutor").field("graph", &self.graph.name()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Value;
    use crate::node::{ChoiceOption, TriggerCondition};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingDriver {
        sent: Mutex<Vec<PacketId>>,
        disconnects: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BotDriver for RecordingDriver {
        async fn send_packet(&self, _frame: Frame, packet_id: PacketId) -> Result<(), NodeError> {
            self.sent.lock().unwrap().push(packet_id);
            Ok(())
        }

        async fn disconnect(&self, reason: &str) {
            self.disconnects.lock().unwrap().push(reason.to_string());
        }

        fn is_connected(&self) -> bool {
            true
        }

        fn session_id(&self) -> u16 {
            1
        }
    }

    struct Harness {
        executor: GraphExecutor,
        driver: Arc<RecordingDriver>,
        stats: Arc<NodeStatsTracker>,
        _shutdown_tx: watch::Sender<bool>,
    }

    fn harness(graph: ActionGraph) -> Harness {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let driver = Arc::new(RecordingDriver::default());
        let stats = Arc::new(NodeStatsTracker::new());
        let executor = GraphExecutor::new(
            Arc::new(graph),
            driver.clone(),
            Arc::new(AccessorRegistry::new()),
            stats.clone(),
            shutdown_rx,
        );
        Harness { executor, driver, stats, _shutdown_tx: shutdown_tx }
    }

    fn mark(order: &Arc<Mutex<Vec<&'static str>>>, tag: &'static str) -> NodeKind {
        let order = order.clone();
        NodeKind::Custom {
            handler: Some(Arc::new(move |_, _| {
                order.lock().unwrap().push(tag);
                Ok(())
            })),
        }
    }

    async fn wait_until(check: impl Fn() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn dispatch_runs_only_the_matching_root() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut graph = ActionGraph::new("dispatch");
        let a = ActionNode::new("root-a", mark(&order, "a"))
            .with_trigger(TriggerCondition::on_packet(PacketId(1)));
        let b = ActionNode::new("root-b", mark(&order, "b"))
            .with_trigger(TriggerCondition::on_packet(PacketId(2)));
        graph.add_node(a);
        graph.add_node(b);

        let h = harness(graph);
        h.executor
            .trigger_event(TriggerKind::OnPacketReceived, Some(PacketId(1)), None)
            .await;

        assert_eq!(*order.lock().unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn chains_execute_depth_first() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut graph = ActionGraph::new("chain");
        let c = graph.add_node(ActionNode::new("c", mark(&order, "c")));
        let mut b = ActionNode::new("b", mark(&order, "b"));
        b.next.push(c);
        let b = graph.add_node(b);
        let mut a =
            ActionNode::new("a", mark(&order, "a")).with_trigger(TriggerCondition::on(TriggerKind::OnConnected));
        a.next.push(b);
        graph.add_node(a);

        let h = harness(graph);
        h.executor.trigger_event(TriggerKind::OnConnected, None, None).await;

        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn accidental_cycles_are_skipped_not_looped() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut graph = ActionGraph::new("cycle");

        let counter = count.clone();
        let a_kind = NodeKind::Custom {
            handler: Some(Arc::new(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })),
        };

        // a -> b -> a; ids are assigned in insertion order so wire b back
        // to the known id of a.
        let mut a = ActionNode::new("a", a_kind).with_trigger(TriggerCondition::on(TriggerKind::Manual));
        let a_id = NodeId(0);
        let mut b = ActionNode::new("b", NodeKind::Custom { handler: None });
        b.next.push(a_id);
        let b_id = NodeId(1);
        a.next.push(b_id);
        graph.add_node(a);
        graph.add_node(b);

        let h = harness(graph);
        h.executor.trigger_event(TriggerKind::Manual, None, None).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_chain_does_not_abort_sibling_matches() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut graph = ActionGraph::new("siblings");

        let failing = NodeKind::Custom {
            handler: Some(Arc::new(|_, _| Err(NodeError::Handler("kaboom".into())))),
        };
        graph.add_node(
            ActionNode::new("bad", failing).with_trigger(TriggerCondition::on_packet(PacketId(1))),
        );
        graph.add_node(
            ActionNode::new("good", mark(&order, "good"))
                .with_trigger(TriggerCondition::on_packet(PacketId(1))),
        );

        let h = harness(graph);
        h.executor
            .trigger_event(TriggerKind::OnPacketReceived, Some(PacketId(1)), None)
            .await;

        assert_eq!(*order.lock().unwrap(), vec!["good"]);
        let bad = h.stats.get("bad").unwrap();
        assert_eq!(bad.failure_count, 1);
        assert!(bad.last_error.as_deref().unwrap().contains("kaboom"));
    }

    #[tokio::test]
    async fn conditional_takes_the_matching_branch_then_next() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut graph = ActionGraph::new("cond");
        let yes = graph.add_node(ActionNode::new("yes", mark(&order, "yes")));
        let no = graph.add_node(ActionNode::new("no", mark(&order, "no")));
        let after = graph.add_node(ActionNode::new("after", mark(&order, "after")));

        let mut cond = ActionNode::new(
            "cond",
            NodeKind::Conditional {
                condition: Some(Arc::new(|ctx| ctx.is_flag_set("go"))),
                true_nodes: vec![yes],
                false_nodes: vec![no],
            },
        )
        .with_trigger(TriggerCondition::on(TriggerKind::Manual));
        cond.next.push(after);
        graph.add_node(cond);

        let h = harness(graph);
        // Flag unset: false branch.
        h.executor.trigger_event(TriggerKind::Manual, None, None).await;
        assert_eq!(*order.lock().unwrap(), vec!["no", "after"]);
    }

    #[tokio::test]
    async fn loop_is_bounded_and_runs_exit_nodes() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let count = Arc::new(AtomicUsize::new(0));
        let mut graph = ActionGraph::new("loop");

        let counter = count.clone();
        let body = graph.add_node(ActionNode::new(
            "body",
            NodeKind::Custom {
                handler: Some(Arc::new(move |_, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })),
            },
        ));
        let exit = graph.add_node(ActionNode::new("exit", mark(&order, "exit")));

        graph.add_node(
            ActionNode::new(
                "loop",
                NodeKind::Loop {
                    condition: Some(Arc::new(|_| true)),
                    max_iterations: 4,
                    body: vec![body],
                    exit_nodes: vec![exit],
                },
            )
            .with_trigger(TriggerCondition::on(TriggerKind::Manual)),
        );

        let h = harness(graph);
        h.executor.trigger_event(TriggerKind::Manual, None, None).await;

        assert_eq!(count.load(Ordering::SeqCst), 4);
        assert_eq!(*order.lock().unwrap(), vec!["exit"]);
    }

    #[tokio::test]
    async fn delay_resumes_the_chain_later() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut graph = ActionGraph::new("delay");
        let after = graph.add_node(ActionNode::new("after", mark(&order, "after")));
        let mut delay = ActionNode::new("delay", NodeKind::Delay { delay_ms: 20 })
            .with_trigger(TriggerCondition::on(TriggerKind::Manual));
        delay.next.push(after);
        graph.add_node(delay);

        let h = harness(graph);
        h.executor.trigger_event(TriggerKind::Manual, None, None).await;
        // The trigger returns before the delay elapses.
        assert!(order.lock().unwrap().is_empty());

        let order_check = order.clone();
        wait_until(move || !order_check.lock().unwrap().is_empty()).await;
        assert_eq!(*order.lock().unwrap(), vec!["after"]);
    }

    #[tokio::test]
    async fn teardown_cancels_detached_delays() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut graph = ActionGraph::new("cancel");
        let after = graph.add_node(ActionNode::new("after", mark(&order, "after")));
        let mut delay = ActionNode::new("delay", NodeKind::Delay { delay_ms: 50 })
            .with_trigger(TriggerCondition::on(TriggerKind::Manual));
        delay.next.push(after);
        graph.add_node(delay);

        let h = harness(graph);
        h.executor.trigger_event(TriggerKind::Manual, None, None).await;
        h._shutdown_tx.send(true).unwrap();

        sleep(Duration::from_millis(100)).await;
        assert!(order.lock().unwrap().is_empty(), "continuation survived teardown");
    }

    #[tokio::test]
    async fn retry_exhausts_attempts_then_runs_failure_nodes() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut graph = ActionGraph::new("retry");

        let counter = attempts.clone();
        let body = graph.add_node(ActionNode::new(
            "attempt",
            NodeKind::Custom {
                handler: Some(Arc::new(move |_, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })),
            },
        ));
        let success = graph.add_node(ActionNode::new("success", mark(&order, "success")));
        let failure = graph.add_node(ActionNode::new("failure", mark(&order, "failure")));
        let after = graph.add_node(ActionNode::new("after", mark(&order, "after")));

        let mut retry = ActionNode::new(
            "retry",
            NodeKind::Retry {
                max_retries: 3,
                retry_delay_ms: 1,
                exponential_backoff: false,
                success: Some(Arc::new(|_| false)),
                body: vec![body],
                success_nodes: vec![success],
                failure_nodes: vec![failure],
            },
        )
        .with_trigger(TriggerCondition::on(TriggerKind::Manual));
        retry.next.push(after);
        graph.add_node(retry);

        let h = harness(graph);
        h.executor.trigger_event(TriggerKind::Manual, None, None).await;

        let order_check = order.clone();
        wait_until(move || order_check.lock().unwrap().contains(&"after")).await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(*order.lock().unwrap(), vec!["failure", "after"]);
    }

    #[tokio::test]
    async fn retry_success_short_circuits() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut graph = ActionGraph::new("retry-ok");

        let counter = attempts.clone();
        let body = graph.add_node(ActionNode::new(
            "attempt",
            NodeKind::Custom {
                handler: Some(Arc::new(move |ctx, _| {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if n >= 2 {
                        ctx.set_flag("done");
                    }
                    Ok(())
                })),
            },
        ));
        let success = graph.add_node(ActionNode::new("success", mark(&order, "success")));
        let failure = graph.add_node(ActionNode::new("failure", mark(&order, "failure")));

        graph.add_node(
            ActionNode::new(
                "retry",
                NodeKind::Retry {
                    max_retries: 5,
                    retry_delay_ms: 1,
                    exponential_backoff: true,
                    success: Some(Arc::new(|ctx| ctx.is_flag_set("done"))),
                    body: vec![body],
                    success_nodes: vec![success],
                    failure_nodes: vec![failure],
                },
            )
            .with_trigger(TriggerCondition::on(TriggerKind::Manual)),
        );

        let h = harness(graph);
        h.executor.trigger_event(TriggerKind::Manual, None, None).await;

        let order_check = order.clone();
        wait_until(move || !order_check.lock().unwrap().is_empty()).await;

        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(*order.lock().unwrap(), vec!["success"]);
    }

    #[tokio::test]
    async fn wait_for_packet_resolves_when_the_packet_arrives() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut graph = ActionGraph::new("wait");
        let got = graph.add_node(ActionNode::new("got", mark(&order, "got")));
        let timed_out = graph.add_node(ActionNode::new("timeout", mark(&order, "timeout")));

        let mut wait = ActionNode::new(
            "wait",
            NodeKind::WaitForPacket {
                packet_id: PacketId(9),
                timeout_ms: 5_000,
                timeout_nodes: vec![timed_out],
            },
        )
        .with_trigger(TriggerCondition::on(TriggerKind::OnConnected));
        wait.next.push(got);
        graph.add_node(wait);

        let h = harness(graph);
        h.executor.trigger_event(TriggerKind::OnConnected, None, None).await;
        sleep(Duration::from_millis(10)).await;

        // The awaited packet arrives; the dispatcher wakes the waiter.
        h.executor
            .trigger_event(TriggerKind::OnPacketReceived, Some(PacketId(9)), None)
            .await;

        let order_check = order.clone();
        wait_until(move || !order_check.lock().unwrap().is_empty()).await;
        assert_eq!(*order.lock().unwrap(), vec!["got"]);
    }

    #[tokio::test]
    async fn wait_for_packet_times_out_into_the_timeout_chain() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut graph = ActionGraph::new("wait-timeout");
        let got = graph.add_node(ActionNode::new("got", mark(&order, "got")));
        let timed_out = graph.add_node(ActionNode::new("timeout", mark(&order, "timeout")));

        let mut wait = ActionNode::new(
            "wait",
            NodeKind::WaitForPacket {
                packet_id: PacketId(9),
                timeout_ms: 20,
                timeout_nodes: vec![timed_out],
            },
        )
        .with_trigger(TriggerCondition::on(TriggerKind::OnConnected));
        wait.next.push(got);
        graph.add_node(wait);

        let h = harness(graph);
        h.executor.trigger_event(TriggerKind::OnConnected, None, None).await;

        let order_check = order.clone();
        wait_until(move || !order_check.lock().unwrap().is_empty()).await;
        assert_eq!(*order.lock().unwrap(), vec!["timeout"]);
    }

    #[tokio::test]
    async fn assert_failure_runs_failure_nodes_and_halts() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut graph = ActionGraph::new("assert");
        let cleanup = graph.add_node(ActionNode::new("cleanup", mark(&order, "cleanup")));
        let unreachable = graph.add_node(ActionNode::new("after", mark(&order, "after")));

        let mut assert_node = ActionNode::new(
            "assert",
            NodeKind::Assert {
                condition: Some(Arc::new(|_| false)),
                message: "hp must stay positive".into(),
                stop_on_failure: true,
                failure_nodes: vec![cleanup],
            },
        )
        .with_trigger(TriggerCondition::on(TriggerKind::Manual));
        assert_node.next.push(unreachable);
        graph.add_node(assert_node);

        let h = harness(graph);
        h.executor.trigger_event(TriggerKind::Manual, None, None).await;

        assert_eq!(*order.lock().unwrap(), vec!["cleanup"]);
        let stats = h.stats.get("assert").unwrap();
        assert_eq!(stats.failure_count, 1);
    }

    #[tokio::test]
    async fn random_choice_executes_exactly_one_option() {
        let a_count = Arc::new(AtomicUsize::new(0));
        let b_count = Arc::new(AtomicUsize::new(0));
        let mut graph = ActionGraph::new("choice");

        let counter = a_count.clone();
        let a = graph.add_node(ActionNode::new(
            "a",
            NodeKind::Custom {
                handler: Some(Arc::new(move |_, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })),
            },
        ));
        let counter = b_count.clone();
        let b = graph.add_node(ActionNode::new(
            "b",
            NodeKind::Custom {
                handler: Some(Arc::new(move |_, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })),
            },
        ));

        graph.add_node(
            ActionNode::new(
                "choice",
                NodeKind::RandomChoice {
                    choices: vec![
                        ChoiceOption { name: "a".into(), weight: 1, node: a },
                        ChoiceOption { name: "b".into(), weight: 1, node: b },
                    ],
                },
            )
            .with_trigger(TriggerCondition::on(TriggerKind::Manual)),
        );

        let h = harness(graph);
        for _ in 0..10 {
            h.executor.trigger_event(TriggerKind::Manual, None, None).await;
        }

        assert_eq!(
            a_count.load(Ordering::SeqCst) + b_count.load(Ordering::SeqCst),
            10,
            "exactly one option runs per draw"
        );
    }

    #[tokio::test]
    async fn send_and_variable_nodes() {
        let mut graph = ActionGraph::new("send");
        let send = graph.add_node(ActionNode::new(
            "send",
            NodeKind::SendPacket {
                packet_id: PacketId(42),
                builder: Some(Arc::new(|ctx| {
                    let mut frame = Frame::new();
                    let hp = ctx.int_or("hp", 0);
                    frame.write_i64(hp).unwrap();
                    frame
                })),
            },
        ));

        let mut set = ActionNode::new(
            "set",
            NodeKind::SetVariable { variable: "hp".into(), value: Value::Int(250) },
        )
        .with_trigger(TriggerCondition::on(TriggerKind::OnConnected));
        set.next.push(send);
        graph.add_node(set);

        let h = harness(graph);
        h.executor.trigger_event(TriggerKind::OnConnected, None, None).await;

        assert_eq!(*h.driver.sent.lock().unwrap(), vec![PacketId(42)]);
    }

    #[tokio::test]
    async fn disconnect_node_reaches_the_driver() {
        let mut graph = ActionGraph::new("disconnect");
        graph.add_node(
            ActionNode::new(
                "bye",
                NodeKind::Disconnect { reason: "scenario finished".into() },
            )
            .with_trigger(TriggerCondition::on(TriggerKind::Manual)),
        );

        let h = harness(graph);
        h.executor.trigger_event(TriggerKind::Manual, None, None).await;

        assert_eq!(*h.driver.disconnects.lock().unwrap(), vec!["scenario finished"]);
    }
}
