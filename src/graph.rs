//! The System Graph: a labeled DAG of pending/ready task nodes.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::Serialize;

use crate::remote::JobHandle;
use crate::tag::{Rank, SourceIndex, Tag};

/// The status of a node, derived from the state of its jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodeStatus {
    NoJob,
    Pending,
    ReadyOk,
    ReadyFail,
}

/// Attributes carried by a System Graph node.
#[derive(Debug, Clone)]
pub struct NodeData {
    pub label: String,
    pub jobs: Vec<JobHandle>,
    pub subslice: Option<std::ops::Range<SourceIndex>>,
    pub tag: Option<Tag>,
    pub rank: Option<Rank>,
}

impl NodeData {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            jobs: Vec::new(),
            subslice: None,
            tag: None,
            rank: None,
        }
    }

    pub fn with_job(mut self, job: JobHandle) -> Self {
        self.jobs.push(job);
        self
    }

    pub fn with_jobs(mut self, jobs: Vec<JobHandle>) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn with_subslice(mut self, subslice: std::ops::Range<SourceIndex>) -> Self {
        self.subslice = Some(subslice);
        self
    }

    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tag = Some(tag);
        self
    }

    pub fn with_rank(mut self, rank: Rank) -> Self {
        self.rank = Some(rank);
        self
    }

    /// Node-status derivation: no-job if empty, pending while the
    /// *last* submitted job has not completed, ready-ok/ready-fail
    /// once it has.
    pub fn status(&self) -> NodeStatus {
        match self.jobs.last() {
            None => NodeStatus::NoJob,
            Some(job) => match job.poll() {
                None => NodeStatus::Pending,
                Some(true) => NodeStatus::ReadyOk,
                Some(false) => NodeStatus::ReadyFail,
            },
        }
    }
}

/// A directed graph of scheduled tasks. The `End` node's completion
/// implies the whole scheduled computation has completed.
#[derive(Debug, Default)]
pub struct SystemGraph {
    graph: DiGraph<NodeData, ()>,
}

impl SystemGraph {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
        }
    }

    pub fn add_node(&mut self, data: NodeData) -> NodeIndex {
        self.graph.add_node(data)
    }

    pub fn add_edge(&mut self, from: NodeIndex, to: NodeIndex) {
        self.graph.add_edge(from, to, ());
    }

    pub fn node(&self, idx: NodeIndex) -> &NodeData {
        &self.graph[idx]
    }

    pub fn predecessors(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        self.graph.neighbors_directed(idx, Direction::Incoming).collect()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn nodes_with_label_prefix(&self, prefix: &str) -> Vec<NodeIndex> {
        self.graph
            .node_indices()
            .filter(|&idx| self.graph[idx].label.starts_with(prefix))
            .collect()
    }

    /// The first node with exactly this label, if any.
    pub fn node_by_label(&self, label: &str) -> Option<NodeIndex> {
        self.graph.node_indices().find(|&idx| self.graph[idx].label == label)
    }

    /// True once every job-bearing node in the graph is `ReadyOk`.
    /// Structural nodes (`Begin`, `Head: ...`, `Tail: ...`) never carry
    /// jobs and are vacuously satisfied.
    pub fn all_ready_ok(&self) -> bool {
        self.graph
            .node_indices()
            .all(|idx| matches!(self.graph[idx].status(), NodeStatus::ReadyOk | NodeStatus::NoJob))
    }

    /// A JSON-serializable projection of the graph for visualization,
    /// mirroring the Python source's `SystemGraph._codeGraph`.
    pub fn to_view(&self) -> GraphView {
        let nodes = self
            .graph
            .node_indices()
            .map(|idx| GraphViewNode {
                id: idx.index(),
                label: self.graph[idx].label.clone(),
                status: self.graph[idx].status(),
            })
            .collect();
        let edges = self
            .graph
            .edge_indices()
            .filter_map(|e| {
                self.graph
                    .edge_endpoints(e)
                    .map(|(a, b)| GraphViewEdge {
                        from: a.index(),
                        to: b.index(),
                    })
            })
            .collect();
        GraphView { nodes, edges }
    }
}

#[derive(Debug, Serialize)]
pub struct GraphViewNode {
    pub id: usize,
    pub label: String,
    pub status: NodeStatus,
}

#[derive(Debug, Serialize)]
pub struct GraphViewEdge {
    pub from: usize,
    pub to: usize,
}

#[derive(Debug, Serialize)]
pub struct GraphView {
    pub nodes: Vec<GraphViewNode>,
    pub edges: Vec<GraphViewEdge>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_with_no_jobs_is_no_job() {
        let data = NodeData::new("Begin");
        assert_eq!(data.status(), NodeStatus::NoJob);
    }

    #[test]
    fn graph_view_serializes_nodes_and_edges() {
        let mut g = SystemGraph::new();
        let begin = g.add_node(NodeData::new("Begin"));
        let end = g.add_node(NodeData::new("End"));
        g.add_edge(begin, end);

        let view = g.to_view();
        assert_eq!(view.nodes.len(), 2);
        assert_eq!(view.edges.len(), 1);
        let json = serde_json::to_string(&view).unwrap();
        assert!(json.contains("Begin"));
    }
}
