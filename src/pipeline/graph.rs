//! Pipeline graph definition.
//!
//! A [`PipelineGraph`] is the static description of a pipeline: named steps
//! and the hops between them. It carries no runtime state and can be
//! serialized, cloned and prepared any number of times.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::{HopId, NodeId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

/// How a step spreads rows over several output hops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Distribution {
    /// Round-robin: each row goes to exactly one target.
    #[default]
    Distribute,
    /// Every target receives every row.
    Copy,
}

fn one() -> usize {
    1
}

/// One step of the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepNode {
    pub name: String,
    /// Registry id of the step kind, e.g. `"filter_rows"`.
    pub kind: String,
    /// Kind-specific configuration.
    #[serde(default)]
    pub params: serde_json::Value,
    /// Number of parallel copies, each on its own thread.
    #[serde(default = "one")]
    pub copies: usize,
    #[serde(default)]
    pub distribution: Distribution,
}

impl StepNode {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            params: serde_json::Value::Null,
            copies: 1,
            distribution: Distribution::Distribute,
        }
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    /// Store a typed configuration as the step parameters.
    pub fn with_config<T: Serialize>(mut self, config: &T) -> PipelineResult<Self> {
        self.params = serde_json::to_value(config).map_err(|e| PipelineError::Config {
            step: self.name.clone(),
            message: e.to_string(),
        })?;
        Ok(self)
    }

    pub fn with_copies(mut self, copies: usize) -> Self {
        self.copies = copies;
        self
    }

    pub fn with_distribution(mut self, distribution: Distribution) -> Self {
        self.distribution = distribution;
        self
    }

    /// Deserialize the parameters into a typed configuration.
    ///
    /// Missing parameters deserialize like an empty object, so configs with
    /// `#[serde(default)]` fields accept a bare node.
    pub fn config<T: DeserializeOwned>(&self) -> PipelineResult<T> {
        let params = if self.params.is_null() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            self.params.clone()
        };
        serde_json::from_value(params).map_err(|e| PipelineError::Config {
            step: self.name.clone(),
            message: e.to_string(),
        })
    }
}

/// A directed edge between two steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hop {
    pub from: NodeId,
    pub to: NodeId,
    /// Queue capacity override for this hop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<usize>,
    /// Marks `to` as the error sink of `from`.
    #[serde(default)]
    pub error: bool,
}

/// Static pipeline description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineGraph {
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<StepNode>,
    #[serde(default)]
    pub hops: Vec<Hop>,
}

impl PipelineGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            hops: Vec::new(),
        }
    }

    /// Add a step. Returns its NodeId.
    pub fn add_step(&mut self, node: StepNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Connect the output of `from` to the input of `to`.
    pub fn add_hop(&mut self, from: NodeId, to: NodeId) -> HopId {
        self.push_hop(Hop {
            from,
            to,
            capacity: None,
            error: false,
        })
    }

    pub fn add_hop_with_capacity(&mut self, from: NodeId, to: NodeId, capacity: usize) -> HopId {
        self.push_hop(Hop {
            from,
            to,
            capacity: Some(capacity),
            error: false,
        })
    }

    /// Route row-level failures of `from` to `to`.
    pub fn add_error_hop(&mut self, from: NodeId, to: NodeId) -> HopId {
        self.push_hop(Hop {
            from,
            to,
            capacity: None,
            error: true,
        })
    }

    fn push_hop(&mut self, hop: Hop) -> HopId {
        let id = HopId(self.hops.len() as u32);
        self.hops.push(hop);
        id
    }

    /// Add steps in order and chain them with hops. Returns their ids.
    pub fn chain(&mut self, nodes: impl IntoIterator<Item = StepNode>) -> Vec<NodeId> {
        let ids: Vec<NodeId> = nodes.into_iter().map(|n| self.add_step(n)).collect();
        for pair in ids.windows(2) {
            self.add_hop(pair[0], pair[1]);
        }
        ids
    }

    pub fn node(&self, id: NodeId) -> Option<&StepNode> {
        self.nodes.get(id.index())
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut StepNode> {
        self.nodes.get_mut(id.index())
    }

    pub fn hop(&self, id: HopId) -> Option<&Hop> {
        self.hops.get(id.index())
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    /// Find a step by name.
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|n| n.name == name)
            .map(|i| NodeId(i as u32))
    }

    pub fn find_by_kind(&self, kind: &str) -> Vec<NodeId> {
        self.node_ids()
            .filter(|id| self.nodes[id.index()].kind == kind)
            .collect()
    }

    /// Hops feeding rows into `id` (regular and error hops).
    pub fn inputs_of(&self, id: NodeId) -> impl Iterator<Item = (HopId, &Hop)> {
        self.hops
            .iter()
            .enumerate()
            .filter(move |(_, h)| h.to == id)
            .map(|(i, h)| (HopId(i as u32), h))
    }

    /// Regular output hops of `id`.
    pub fn outputs_of(&self, id: NodeId) -> impl Iterator<Item = (HopId, &Hop)> {
        self.hops
            .iter()
            .enumerate()
            .filter(move |(_, h)| h.from == id && !h.error)
            .map(|(i, h)| (HopId(i as u32), h))
    }

    pub fn error_hop_of(&self, id: NodeId) -> Option<(HopId, &Hop)> {
        self.hops
            .iter()
            .enumerate()
            .find(|(_, h)| h.from == id && h.error)
            .map(|(i, h)| (HopId(i as u32), h))
    }

    /// Check structural invariants: unique names, copies ≥ 1, hops between
    /// existing steps, at most one error sink per step, no cycles.
    pub fn validate(&self) -> PipelineResult<()> {
        let mut names = HashSet::new();
        for node in &self.nodes {
            if node.name.is_empty() {
                return Err(PipelineError::Step {
                    name: node.name.clone(),
                    message: "step name must not be empty".into(),
                });
            }
            if !names.insert(node.name.as_str()) {
                return Err(PipelineError::DuplicateName(node.name.clone()));
            }
            if node.copies == 0 {
                return Err(PipelineError::Step {
                    name: node.name.clone(),
                    message: "copies must be at least 1".into(),
                });
            }
        }

        let mut error_sources = HashSet::new();
        for (i, hop) in self.hops.iter().enumerate() {
            for end in [hop.from, hop.to] {
                if self.node(end).is_none() {
                    return Err(PipelineError::InvalidHop(format!(
                        "hop {} references missing node {:?}",
                        i, end
                    )));
                }
            }
            if hop.from == hop.to {
                return Err(PipelineError::InvalidHop(format!(
                    "hop {} connects '{}' to itself",
                    i, self.nodes[hop.from.index()].name
                )));
            }
            if hop.capacity == Some(0) {
                return Err(PipelineError::InvalidHop(format!(
                    "hop {} has zero capacity",
                    i
                )));
            }
            if hop.error && !error_sources.insert(hop.from) {
                return Err(PipelineError::InvalidHop(format!(
                    "step '{}' has more than one error hop",
                    self.nodes[hop.from.index()].name
                )));
            }
        }

        self.topological_order().map(|_| ())
    }

    /// Steps ordered so every hop points forward (Kahn's algorithm).
    pub fn topological_order(&self) -> PipelineResult<Vec<NodeId>> {
        let n = self.nodes.len();
        let mut in_degree = vec![0u32; n];
        let mut adj: Vec<Vec<usize>> = vec![Vec::new(); n];

        for hop in &self.hops {
            let from = hop.from.index();
            let to = hop.to.index();
            if from < n && to < n {
                adj[from].push(to);
                in_degree[to] += 1;
            }
        }

        let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);

        while let Some(node) = queue.pop_front() {
            order.push(NodeId(node as u32));
            for &next in &adj[node] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        if order.len() != n {
            tracing::warn!(
                "Pipeline graph '{}' has a cycle! Only {} of {} steps ordered.",
                self.name,
                order.len(),
                n
            );
            return Err(PipelineError::CycleDetected);
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_and_topological_order() {
        let mut graph = PipelineGraph::new("g");
        let ids = graph.chain([
            StepNode::new("a", "injector"),
            StepNode::new("b", "dummy"),
            StepNode::new("c", "dummy"),
        ]);
        assert_eq!(graph.hops.len(), 2);
        assert_eq!(graph.topological_order().unwrap(), ids);
        assert_eq!(graph.find("b"), Some(ids[1]));
        assert_eq!(graph.find_by_kind("dummy"), vec![ids[1], ids[2]]);
        graph.validate().unwrap();
    }

    #[test]
    fn test_cycle_rejected() {
        let mut graph = PipelineGraph::new("g");
        let a = graph.add_step(StepNode::new("a", "dummy"));
        let b = graph.add_step(StepNode::new("b", "dummy"));
        graph.add_hop(a, b);
        graph.add_hop(b, a);
        assert!(matches!(graph.validate(), Err(PipelineError::CycleDetected)));
    }

    #[test]
    fn test_validate_rejects_bad_graphs() {
        let mut graph = PipelineGraph::new("g");
        graph.add_step(StepNode::new("a", "dummy"));
        graph.add_step(StepNode::new("a", "dummy"));
        assert!(matches!(graph.validate(), Err(PipelineError::DuplicateName(_))));

        let mut graph = PipelineGraph::new("g");
        let a = graph.add_step(StepNode::new("a", "dummy"));
        graph.add_hop(a, NodeId(9));
        assert!(matches!(graph.validate(), Err(PipelineError::InvalidHop(_))));

        let mut graph = PipelineGraph::new("g");
        let a = graph.add_step(StepNode::new("a", "dummy"));
        let b = graph.add_step(StepNode::new("b", "dummy"));
        let c = graph.add_step(StepNode::new("c", "dummy"));
        graph.add_error_hop(a, b);
        graph.add_error_hop(a, c);
        assert!(matches!(graph.validate(), Err(PipelineError::InvalidHop(_))));

        let mut graph = PipelineGraph::new("g");
        graph.add_step(StepNode::new("a", "dummy").with_copies(0));
        assert!(graph.validate().is_err());
    }

    #[test]
    fn test_error_hops_are_not_outputs() {
        let mut graph = PipelineGraph::new("g");
        let a = graph.add_step(StepNode::new("a", "dummy"));
        let b = graph.add_step(StepNode::new("b", "dummy"));
        let e = graph.add_step(StepNode::new("e", "dummy"));
        graph.add_hop(a, b);
        let err = graph.add_error_hop(a, e);
        assert!(graph.hop(err).is_some_and(|h| h.error && h.to == e));
        assert_eq!(graph.outputs_of(a).count(), 1);
        assert_eq!(graph.error_hop_of(a).map(|(_, h)| h.to), Some(e));
        assert_eq!(graph.inputs_of(e).count(), 1);
    }

    #[test]
    fn test_graph_serde_round_trip() {
        let mut graph = PipelineGraph::new("g");
        graph.chain([
            StepNode::new("in", "injector"),
            StepNode::new("out", "dummy").with_copies(2),
        ]);
        let json = serde_json::to_string(&graph).unwrap();
        let back: PipelineGraph = serde_json::from_str(&json).unwrap();
        assert_eq!(back, graph);

        let parsed: PipelineGraph = serde_json::from_str(
            r#"{"name":"x","nodes":[{"name":"a","kind":"dummy"}],"hops":[]}"#,
        )
        .unwrap();
        assert_eq!(parsed.nodes[0].copies, 1);
    }
}
