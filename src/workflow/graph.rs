//! Workflow graph: an arena of nodes linked by `next` edges.
//!
//! The graph is built once per orchestrator and shared by every run. All
//! data flow lives in the mapper closures attached to nodes; they read the
//! accumulated [`RunState`] and build the next step's input.

use std::collections::HashSet;
use std::sync::Arc;

use super::run::RunState;
use super::step::{Step, StepPayload};
use crate::error::{WorkflowError, WorkflowResult};
use crate::events::OrdinalStep;

pub type NodeIdx = usize;

/// Builds a task's input from prior results.
pub type InputMapper = Arc<dyn Fn(&RunState) -> WorkflowResult<StepPayload> + Send + Sync>;

/// Builds one input per fan-out branch.
pub type FanOutMapper = Arc<dyn Fn(&RunState) -> WorkflowResult<Vec<StepPayload>> + Send + Sync>;

/// Folds branch outputs (in branch order) into the fan-out node's output.
pub type JoinFn =
    Arc<dyn Fn(&RunState, Vec<StepPayload>) -> WorkflowResult<StepPayload> + Send + Sync>;

/// Picks the arm to take. Must be pure over the state it is given.
pub type BranchPredicate = Arc<dyn Fn(&RunState) -> WorkflowResult<String> + Send + Sync>;

pub enum NodeKind {
    Task {
        step: Arc<dyn Step>,
        depends_on: Vec<String>,
        input: InputMapper,
        /// Failure ends the run.
        critical: bool,
    },
    FanOut {
        step: Arc<dyn Step>,
        depends_on: Vec<String>,
        expand: FanOutMapper,
        join: JoinFn,
    },
    Branch {
        ordinal: OrdinalStep,
        predicate: BranchPredicate,
        /// Arm name to the first node of that arm's chain.
        arms: Vec<(String, NodeIdx)>,
    },
}

impl std::fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Task {
                step,
                depends_on,
                critical,
                ..
            } => f
                .debug_struct("Task")
                .field("step", &step.id())
                .field("depends_on", depends_on)
                .field("critical", critical)
                .finish(),
            Self::FanOut {
                step, depends_on, ..
            } => f
                .debug_struct("FanOut")
                .field("step", &step.id())
                .field("depends_on", depends_on)
                .finish(),
            Self::Branch { ordinal, arms, .. } => f
                .debug_struct("Branch")
                .field("ordinal", ordinal)
                .field("arms", arms)
                .finish(),
        }
    }
}

#[derive(Debug)]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    pub next: Option<NodeIdx>,
}

#[derive(Debug)]
pub struct WorkflowGraph {
    nodes: Vec<Node>,
    entry: NodeIdx,
}

impl WorkflowGraph {
    pub fn builder() -> GraphBuilder {
        GraphBuilder::default()
    }

    pub fn entry(&self) -> NodeIdx {
        self.entry
    }

    pub fn node(&self, idx: NodeIdx) -> &Node {
        &self.nodes[idx]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn find(&self, id: &str) -> Option<NodeIdx> {
        self.nodes.iter().position(|n| n.id == id)
    }

    /// Last node of the top-level chain; its output is the run's output.
    pub fn terminal(&self) -> NodeIdx {
        let mut idx = self.entry;
        while let Some(next) = self.nodes[idx].next {
            idx = next;
        }
        idx
    }

    /// Node ids reachable from `start` without leaving the chain (nested arms included).
    pub fn chain_ids(&self, start: NodeIdx) -> Vec<String> {
        let mut ids = Vec::new();
        let mut cursor = Some(start);
        while let Some(idx) = cursor {
            let node = &self.nodes[idx];
            ids.push(node.id.clone());
            if let NodeKind::Branch { arms, .. } = &node.kind {
                for (_, arm) in arms {
                    ids.extend(self.chain_ids(*arm));
                }
            }
            cursor = node.next;
        }
        ids
    }
}

#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: Vec<Node>,
}

impl GraphBuilder {
    fn push(&mut self, id: impl Into<String>, kind: NodeKind) -> NodeIdx {
        self.nodes.push(Node {
            id: id.into(),
            kind,
            next: None,
        });
        self.nodes.len() - 1
    }

    pub fn task(
        &mut self,
        step: Arc<dyn Step>,
        depends_on: &[&str],
        input: InputMapper,
        critical: bool,
    ) -> NodeIdx {
        let id = step.id().to_string();
        self.push(
            id,
            NodeKind::Task {
                step,
                depends_on: depends_on.iter().map(ToString::to_string).collect(),
                input,
                critical,
            },
        )
    }

    pub fn fan_out(
        &mut self,
        id: impl Into<String>,
        step: Arc<dyn Step>,
        depends_on: &[&str],
        expand: FanOutMapper,
        join: JoinFn,
    ) -> NodeIdx {
        self.push(
            id,
            NodeKind::FanOut {
                step,
                depends_on: depends_on.iter().map(ToString::to_string).collect(),
                expand,
                join,
            },
        )
    }

    pub fn branch(
        &mut self,
        id: impl Into<String>,
        ordinal: OrdinalStep,
        predicate: BranchPredicate,
        arms: Vec<(String, NodeIdx)>,
    ) -> NodeIdx {
        self.push(
            id,
            NodeKind::Branch {
                ordinal,
                predicate,
                arms,
            },
        )
    }

    /// Links `from -> to`.
    pub fn then(&mut self, from: NodeIdx, to: NodeIdx) -> &mut Self {
        self.nodes[from].next = Some(to);
        self
    }

    /// Links the given nodes into a chain, in order.
    pub fn chain(&mut self, nodes: &[NodeIdx]) -> &mut Self {
        for pair in nodes.windows(2) {
            self.then(pair[0], pair[1]);
        }
        self
    }

    /// Checks ids and edges and freezes the graph.
    pub fn build(self, entry: NodeIdx) -> WorkflowResult<WorkflowGraph> {
        let invalid = |msg: String| WorkflowError::invalid_input("workflow_graph", msg);
        let len = self.nodes.len();

        if entry >= len {
            return Err(invalid(format!("entry node {entry} does not exist")));
        }
        if !matches!(self.nodes[entry].kind, NodeKind::Task { .. }) {
            return Err(invalid("entry node must be a task".into()));
        }

        let mut ids = HashSet::new();
        for node in &self.nodes {
            if !ids.insert(node.id.as_str()) {
                return Err(invalid(format!("duplicate node id '{}'", node.id)));
            }
            if node.id.contains('.') {
                return Err(invalid(format!("node id '{}' may not contain '.'", node.id)));
            }
            if node.next.is_some_and(|n| n >= len) {
                return Err(invalid(format!("node '{}' links past the graph", node.id)));
            }
            if let NodeKind::Branch { arms, .. } = &node.kind {
                if arms.is_empty() {
                    return Err(invalid(format!("branch '{}' has no arms", node.id)));
                }
                if arms.iter().any(|(_, idx)| *idx >= len) {
                    return Err(invalid(format!("branch '{}' has a dangling arm", node.id)));
                }
            }
        }

        // Every node is entered at most once; that rules out cycles too.
        let mut seen = vec![false; len];
        let mut stack = vec![entry];
        while let Some(idx) = stack.pop() {
            if seen[idx] {
                return Err(invalid(format!(
                    "node '{}' is reachable twice",
                    self.nodes[idx].id
                )));
            }
            seen[idx] = true;
            let node = &self.nodes[idx];
            stack.extend(node.next);
            if let NodeKind::Branch { arms, .. } = &node.kind {
                stack.extend(arms.iter().map(|(_, arm)| *arm));
            }
        }

        Ok(WorkflowGraph {
            nodes: self.nodes,
            entry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::step::{PayloadKind, StepContext, StepOutcome};
    use async_trait::async_trait;

    #[derive(Debug)]
    struct Noop(&'static str);

    #[async_trait]
    impl Step for Noop {
        fn id(&self) -> &str {
            self.0
        }
        fn input_kind(&self) -> PayloadKind {
            PayloadKind::Query
        }
        fn output_kind(&self) -> PayloadKind {
            PayloadKind::Query
        }
        async fn execute(
            &self,
            input: &StepPayload,
            _ctx: &StepContext,
        ) -> WorkflowResult<StepOutcome> {
            Ok(StepOutcome::Completed(input.clone()))
        }
    }

    fn mapper() -> InputMapper {
        Arc::new(|_| Ok(StepPayload::Query { query: "q".into() }))
    }

    fn task(b: &mut GraphBuilder, id: &'static str) -> NodeIdx {
        b.task(Arc::new(Noop(id)), &[], mapper(), true)
    }

    #[test]
    fn test_build_chain_with_branch() {
        let mut b = WorkflowGraph::builder();
        let a = task(&mut b, "a");
        let left = task(&mut b, "left");
        let right = task(&mut b, "right");
        let pick = b.branch(
            "pick",
            OrdinalStep::Search,
            Arc::new(|_| Ok("left".into())),
            vec![("left".into(), left), ("right".into(), right)],
        );
        let z = task(&mut b, "z");
        b.chain(&[a, pick, z]);

        let graph = b.build(a).unwrap();
        assert_eq!(graph.terminal(), z);
        assert_eq!(graph.find("right"), Some(right));
        assert_eq!(graph.chain_ids(pick), vec!["pick", "left", "right", "z"]);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let mut b = WorkflowGraph::builder();
        let a = task(&mut b, "a");
        let a2 = task(&mut b, "a");
        b.then(a, a2);
        assert!(b.build(a).is_err());
    }

    #[test]
    fn test_cycle_rejected() {
        let mut b = WorkflowGraph::builder();
        let a = task(&mut b, "a");
        let c = task(&mut b, "c");
        b.then(a, c).then(c, a);
        let err = b.build(a).unwrap_err();
        assert!(err.to_string().contains("reachable twice"));
    }
}
