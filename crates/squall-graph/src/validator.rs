//! Static analysis over a built graph.
//!
//! Four passes, in order: structure, cycles, per-kind configuration,
//! reachability. Problems come back as structured issues, never as
//! errors — the caller decides whether to run a graph with warnings.

use std::collections::HashSet;

use crate::graph::ActionGraph;
use crate::node::{NodeId, NodeKind};

/// Maximum traversal depth before the cycle pass gives up; a guard
/// against unbounded recursion in degenerate graphs.
const MAX_DEPTH: usize = 500;

/// How bad an issue is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The graph should not run.
    Error,
    /// The graph runs but something is probably unintended.
    Warning,
    /// Expected but noteworthy, e.g. a loop's self-revisit.
    Info,
}

/// One finding of the validation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Issue severity.
    pub severity: Severity,
    /// Name of the node the issue is about, or "Graph".
    pub node_name: String,
    /// Check category (Structure, Cycles, Configuration, ...).
    pub category: &'static str,
    /// Human-readable description.
    pub message: String,
}

/// All findings for one graph.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Findings in discovery order.
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// True iff no Error-severity issue is present.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.issues.iter().all(|issue| issue.severity != Severity::Error)
    }

    /// Number of Error findings.
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.count(Severity::Error)
    }

    /// Number of Warning findings.
    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.count(Severity::Warning)
    }

    /// Number of Info findings.
    #[must_use]
    pub fn info_count(&self) -> usize {
        self.count(Severity::Info)
    }

    fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|issue| issue.severity == severity).count()
    }

    fn add(
        &mut self,
        severity: Severity,
        node_name: &str,
        message: impl Into<String>,
        category: &'static str,
    ) {
        self.issues.push(ValidationIssue {
            severity,
            node_name: node_name.to_string(),
            category,
            message: message.into(),
        });
    }

    fn add_error(&mut self, node: &str, message: impl Into<String>, category: &'static str) {
        self.add(Severity::Error, node, message, category);
    }

    fn add_warning(&mut self, node: &str, message: impl Into<String>, category: &'static str) {
        self.add(Severity::Warning, node, message, category);
    }

    fn add_info(&mut self, node: &str, message: impl Into<String>, category: &'static str) {
        self.add(Severity::Info, node, message, category);
    }
}

/// Run all validation passes over a graph.
#[must_use]
pub fn validate(graph: &ActionGraph) -> ValidationResult {
    let mut result = ValidationResult::default();

    validate_structure(graph, &mut result);
    validate_cycles(graph, &mut result);
    validate_configurations(graph, &mut result);
    validate_reachability(graph, &mut result);

    result
}

fn roots(graph: &ActionGraph) -> Vec<NodeId> {
    graph
        .node_ids()
        .filter(|id| graph.node(*id).is_some_and(|node| node.trigger.is_some()))
        .collect()
}

fn validate_structure(graph: &ActionGraph, result: &mut ValidationResult) {
    if graph.is_empty() {
        result.add_error("Graph", "Graph has no nodes", "Structure");
        return;
    }

    if roots(graph).is_empty() {
        result.add_warning("Graph", "No trigger nodes found; graph will not execute", "Structure");
    }
}

fn validate_cycles(graph: &ActionGraph, result: &mut ValidationResult) {
    let mut visited = HashSet::new();
    let mut stack = HashSet::new();
    let mut path = Vec::new();

    for root in roots(graph) {
        if !visited.contains(&root) {
            detect_cycle(graph, root, &mut visited, &mut stack, &mut path, result, 0);
        }
    }
}

/// Depth-first walk following every kind-specific successor edge. A
/// back-edge into a node still on the recursion path is an error unless
/// the revisiting node is a Loop or RepeatTimer, whose bodies are
/// expected to point back.
fn detect_cycle(
    graph: &ActionGraph,
    id: NodeId,
    visited: &mut HashSet<NodeId>,
    stack: &mut HashSet<NodeId>,
    path: &mut Vec<String>,
    result: &mut ValidationResult,
    depth: usize,
) -> bool {
    let Some(node) = graph.node(id) else {
        return false;
    };
    if depth > MAX_DEPTH {
        result.add_error(
            &node.name,
            format!("Graph depth exceeds {MAX_DEPTH} levels; possible unbounded recursion"),
            "Cycles",
        );
        return true;
    }

    visited.insert(id);
    stack.insert(id);
    path.push(node.name.clone());

    for next in node.successors() {
        if !visited.contains(&next) {
            if detect_cycle(graph, next, visited, stack, path, result, depth + 1) {
                return true;
            }
        } else if stack.contains(&next) {
            if matches!(node.kind, NodeKind::Loop { .. } | NodeKind::RepeatTimer { .. }) {
                result.add_info(&node.name, "Expected loop structure", "Cycles");
            } else {
                let target = graph.node(next).map_or(String::new(), |n| n.name.clone());
                let cycle_path = format!("{} -> {target}", path.join(" -> "));
                result.add_error(&node.name, format!("Circular dependency: {cycle_path}"), "Cycles");
                return true;
            }
        }
    }

    stack.remove(&id);
    path.pop();
    false
}

#[allow(clippy::too_many_lines)]
fn validate_configurations(graph: &ActionGraph, result: &mut ValidationResult) {
    for node in graph.all_nodes() {
        match &node.kind {
            NodeKind::SendPacket { packet_id, builder } => {
                if !packet_id.is_valid() {
                    result.add_error(&node.name, "Invalid packet id", "Configuration");
                } else if builder.is_none() {
                    result.add_error(&node.name, "Packet builder is missing", "Configuration");
                }
            }

            NodeKind::Delay { delay_ms } => {
                if *delay_ms == 0 {
                    result.add_error(&node.name, "Delay must be positive", "Configuration");
                } else if *delay_ms > 60_000 {
                    result.add_warning(&node.name, "Very long delay (>60s)", "Performance");
                }
            }

            NodeKind::RandomDelay { min_ms, max_ms } => {
                if *max_ms == 0 {
                    result.add_error(&node.name, "Delay must be positive", "Configuration");
                } else if min_ms > max_ms {
                    result.add_error(&node.name, "Minimum delay exceeds maximum", "Configuration");
                }
            }

            NodeKind::WaitForPacket { packet_id, timeout_ms, timeout_nodes } => {
                if !packet_id.is_valid() {
                    result.add_error(&node.name, "Invalid expected packet id", "Configuration");
                }
                if *timeout_ms == 0 {
                    result.add_error(&node.name, "Timeout must be positive", "Configuration");
                }
                if timeout_nodes.is_empty() {
                    result.add_warning(&node.name, "No timeout handler configured", "Logic");
                }
            }

            NodeKind::Conditional { condition, .. } => {
                if condition.is_none() {
                    result.add_error(&node.name, "Condition is missing", "Configuration");
                }
            }

            NodeKind::Loop { condition, max_iterations, .. } => {
                if condition.is_none() {
                    result.add_error(&node.name, "Continue condition is missing", "Configuration");
                }
                if *max_iterations > 10_000 {
                    result.add_warning(&node.name, "Very high iteration limit", "Performance");
                }
            }

            NodeKind::RepeatTimer { interval_ms, repeat_count, .. } => {
                if *interval_ms == 0 {
                    result.add_error(&node.name, "Interval must be positive", "Configuration");
                }
                if *repeat_count == 0 {
                    result.add_warning(&node.name, "Repeat count is zero", "Logic");
                }
            }

            NodeKind::Retry { success, max_retries, .. } => {
                if success.is_none() {
                    result.add_error(&node.name, "Success predicate is missing", "Configuration");
                }
                if *max_retries == 0 {
                    result.add_warning(&node.name, "Retry never attempts its body", "Logic");
                }
            }

            NodeKind::Assert { condition, .. } => {
                if condition.is_none() {
                    result.add_error(&node.name, "Condition is missing", "Configuration");
                }
            }

            NodeKind::RandomChoice { choices } => {
                if choices.iter().map(|c| c.weight).sum::<u32>() == 0 {
                    result.add_error(&node.name, "No weighted options", "Configuration");
                }
            }

            NodeKind::SetVariable { variable, .. } | NodeKind::GetVariable { variable } => {
                if variable.is_empty() {
                    result.add_error(&node.name, "Variable name is empty", "Configuration");
                }
            }

            NodeKind::PacketParser { setter } => {
                if setter.is_empty() {
                    result.add_error(&node.name, "Setter name is empty", "Configuration");
                }
            }

            NodeKind::Custom { .. } | NodeKind::Log { .. } | NodeKind::Disconnect { .. } => {}
        }
    }
}

fn validate_reachability(graph: &ActionGraph, result: &mut ValidationResult) {
    let mut reachable = HashSet::new();
    for root in roots(graph) {
        collect_reachable(graph, root, &mut reachable);
    }

    for id in graph.node_ids() {
        if !reachable.contains(&id)
            && let Some(node) = graph.node(id)
        {
            result.add_warning(&node.name, "Unreachable from any trigger", "Connectivity");
        }
    }
}

fn collect_reachable(graph: &ActionGraph, id: NodeId, reachable: &mut HashSet<NodeId>) {
    if !reachable.insert(id) {
        return;
    }
    if let Some(node) = graph.node(id) {
        for next in node.successors() {
            collect_reachable(graph, next, reachable);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{ActionNode, TriggerCondition, TriggerKind};
    use squall_proto::PacketId;
    use std::sync::Arc;

    fn custom(name: &str) -> ActionNode {
        ActionNode::new(name, NodeKind::Custom { handler: None })
    }

    fn manual_root(name: &str) -> ActionNode {
        custom(name).with_trigger(TriggerCondition::on(TriggerKind::Manual))
    }

    #[test]
    fn empty_graph_is_one_error() {
        let graph = ActionGraph::new("empty");
        let result = validate(&graph);

        assert_eq!(result.error_count(), 1);
        assert!(!result.is_valid());
        assert_eq!(result.issues[0].node_name, "Graph");
        assert!(result.issues[0].message.contains("no nodes"));
    }

    #[test]
    fn graph_without_roots_is_a_warning() {
        let mut graph = ActionGraph::new("no-roots");
        graph.add_node(custom("floating"));

        let result = validate(&graph);
        assert!(result.is_valid());
        assert!(result.issues.iter().any(|i| {
            i.severity == Severity::Warning && i.message.contains("No trigger nodes")
        }));
    }

    #[test]
    fn loop_body_pointing_back_is_info_only() {
        let mut graph = ActionGraph::new("self-loop");
        let loop_id = NodeId(0);
        graph.add_node(
            ActionNode::new(
                "loop",
                NodeKind::Loop {
                    condition: Some(Arc::new(|_| false)),
                    max_iterations: 10,
                    body: vec![loop_id],
                    exit_nodes: vec![],
                },
            )
            .with_trigger(TriggerCondition::on(TriggerKind::Manual)),
        );

        let result = validate(&graph);
        assert_eq!(result.info_count(), 1);
        assert_eq!(result.error_count(), 0);
        assert!(result.is_valid());
    }

    #[test]
    fn non_loop_cycle_is_an_error() {
        let mut graph = ActionGraph::new("cycle");
        let mut a = manual_root("a");
        a.next.push(NodeId(1));
        let mut b = custom("b");
        b.next.push(NodeId(0));
        graph.add_node(a);
        graph.add_node(b);

        let result = validate(&graph);
        assert_eq!(result.error_count(), 1);
        assert!(!result.is_valid());
        let issue = result.issues.iter().find(|i| i.severity == Severity::Error).unwrap();
        assert!(issue.message.contains("Circular dependency"));
        assert!(issue.message.contains("a -> b -> a"));
    }

    #[test]
    fn invalid_send_packet_id_is_an_error() {
        let mut graph = ActionGraph::new("bad-send");
        graph.add_node(
            ActionNode::new(
                "send",
                NodeKind::SendPacket { packet_id: PacketId::INVALID, builder: None },
            )
            .with_trigger(TriggerCondition::on(TriggerKind::Manual)),
        );

        let result = validate(&graph);
        assert_eq!(result.error_count(), 1);
        assert!(result.issues.iter().any(|i| i.message == "Invalid packet id"));
    }

    #[test]
    fn unreachable_node_is_a_warning() {
        let mut graph = ActionGraph::new("orphan");
        graph.add_node(manual_root("root"));
        graph.add_node(custom("orphan"));

        let result = validate(&graph);
        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 1);
        let issue = &result.issues[0];
        assert_eq!(issue.node_name, "orphan");
        assert!(issue.message.contains("Unreachable"));
    }

    #[test]
    fn depth_cap_guards_unbounded_recursion() {
        let mut graph = ActionGraph::new("deep");
        let total = MAX_DEPTH + 2;
        for i in 0..total {
            let mut node = custom(&format!("n{i}"));
            if i == 0 {
                node = node.with_trigger(TriggerCondition::on(TriggerKind::Manual));
            }
            if i + 1 < total {
                node.next.push(NodeId(i + 1));
            }
            graph.add_node(node);
        }

        let result = validate(&graph);
        assert!(!result.is_valid());
        assert!(result.issues.iter().any(|i| i.message.contains("depth exceeds")));
    }

    #[test]
    fn misconfigured_kinds_surface_per_severity() {
        let mut graph = ActionGraph::new("configs");
        graph.add_node(
            ActionNode::new("slow", NodeKind::Delay { delay_ms: 120_000 })
                .with_trigger(TriggerCondition::on(TriggerKind::Manual)),
        );
        graph.add_node(
            ActionNode::new("zero-delay", NodeKind::Delay { delay_ms: 0 })
                .with_trigger(TriggerCondition::on(TriggerKind::Manual)),
        );
        graph.add_node(
            ActionNode::new(
                "wait",
                NodeKind::WaitForPacket {
                    packet_id: PacketId(3),
                    timeout_ms: 100,
                    timeout_nodes: vec![],
                },
            )
            .with_trigger(TriggerCondition::on(TriggerKind::Manual)),
        );
        graph.add_node(
            ActionNode::new(
                "branch",
                NodeKind::Conditional { condition: None, true_nodes: vec![], false_nodes: vec![] },
            )
            .with_trigger(TriggerCondition::on(TriggerKind::Manual)),
        );

        let result = validate(&graph);
        assert!(!result.is_valid());
        // zero delay + missing condition
        assert_eq!(result.error_count(), 2);
        // long delay + missing timeout handler
        assert_eq!(result.warning_count(), 2);
    }
}
