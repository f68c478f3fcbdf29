use crate::model::AggregateTrace;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceNode {
    pub address: IpAddr,
    /// Display name, the address text until a layer renames the node.
    pub name: String,
    pub dns_name: Option<String>,
    pub excluded_from_naming: bool,
}

impl TraceNode {
    pub fn new(address: IpAddr) -> Self {
        Self {
            address,
            name: address.to_string(),
            dns_name: None,
            excluded_from_naming: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEdge {
    pub byte_count: u64,
    pub packet_count: u64,
    pub trace_count: u64,
}

/// Host-to-host traffic graph for one query window.
///
/// One node per address and one edge per (source, destination) pair; traces
/// for a pair that already has an edge add to its counters.
#[derive(Debug, Clone, Default)]
pub struct TraceGraph {
    graph: DiGraph<TraceNode, TraceEdge>,
    nodes: HashMap<IpAddr, NodeIndex>,
    edges: HashMap<(IpAddr, IpAddr), EdgeIndex>,
}

impl TraceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(traces: &[AggregateTrace]) -> Self {
        let mut graph = Self::new();
        for trace in traces {
            graph.add_trace(trace);
        }
        graph
    }

    pub fn add_trace(&mut self, trace: &AggregateTrace) {
        let source = self.ensure_node(trace.source_address, trace.source_dns_name.as_deref());
        let destination = self.ensure_node(
            trace.destination_address,
            trace.destination_dns_name.as_deref(),
        );

        let key = (trace.source_address, trace.destination_address);
        let index = match self.edges.get(&key) {
            Some(index) => *index,
            None => {
                let index = self.graph.add_edge(source, destination, TraceEdge::default());
                self.edges.insert(key, index);
                index
            }
        };

        if let Some(edge) = self.graph.edge_weight_mut(index) {
            edge.byte_count = edge.byte_count.saturating_add(trace.byte_count);
            edge.packet_count = edge.packet_count.saturating_add(trace.packet_count);
            edge.trace_count = edge.trace_count.saturating_add(trace.trace_count);
        }
    }

    fn ensure_node(&mut self, address: IpAddr, dns_name: Option<&str>) -> NodeIndex {
        let index = match self.nodes.get(&address) {
            Some(index) => *index,
            None => {
                let index = self.graph.add_node(TraceNode::new(address));
                self.nodes.insert(address, index);
                index
            }
        };

        // First non-empty DNS name sticks
        if let (Some(node), Some(name)) = (self.graph.node_weight_mut(index), dns_name) {
            if node.dns_name.is_none() && !name.is_empty() {
                node.dns_name = Some(name.to_string());
            }
        }

        index
    }

    pub fn node(&self, address: &IpAddr) -> Option<&TraceNode> {
        self.nodes
            .get(address)
            .and_then(|index| self.graph.node_weight(*index))
    }

    pub fn node_mut(&mut self, address: &IpAddr) -> Option<&mut TraceNode> {
        let index = *self.nodes.get(address)?;
        self.graph.node_weight_mut(index)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &TraceNode> {
        self.graph.node_weights()
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut TraceNode> {
        self.graph.node_weights_mut()
    }

    pub fn edge(&self, source: &IpAddr, destination: &IpAddr) -> Option<&TraceEdge> {
        self.edges
            .get(&(*source, *destination))
            .and_then(|index| self.graph.edge_weight(*index))
    }

    /// Every edge as (source address, destination address, counters).
    pub fn edges(&self) -> impl Iterator<Item = (IpAddr, IpAddr, &TraceEdge)> {
        self.graph.edge_references().map(|edge| {
            (
                self.graph[edge.source()].address,
                self.graph[edge.target()].address,
                edge.weight(),
            )
        })
    }

    pub fn has_node(&self, address: &IpAddr) -> bool {
        self.nodes.contains_key(address)
    }

    pub fn has_edge(&self, source: &IpAddr, destination: &IpAddr) -> bool {
        self.edges.contains_key(&(*source, *destination))
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn total_bytes(&self) -> u64 {
        self.graph
            .edge_weights()
            .fold(0u64, |total, e| total.saturating_add(e.byte_count))
    }

    pub fn total_packets(&self) -> u64 {
        self.graph
            .edge_weights()
            .fold(0u64, |total, e| total.saturating_add(e.packet_count))
    }

    pub fn total_traces(&self) -> u64 {
        self.graph
            .edge_weights()
            .fold(0u64, |total, e| total.saturating_add(e.trace_count))
    }

    pub fn inner(&self) -> &DiGraph<TraceNode, TraceEdge> {
        &self.graph
    }
}
