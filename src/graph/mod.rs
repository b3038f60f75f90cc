//! In-memory link graph.
//!
//! [`GraphManager`] owns the current [`NodeGraph`] and is the only way the rest of the crate
//! reaches graph queries. Until the first [`GraphManager::build`] every query fails with
//! [`RouxError::GraphNotReady`].

pub mod kernel;

pub use kernel::NodeGraph;

use crate::{
    error::RouxError,
    paths::now_millis,
    properties::{Centrality, HubMetric, LinkDirection, Node},
};
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct GraphManager {
    graph: Option<NodeGraph>,
}

impl GraphManager {
    pub fn new() -> Self {
        GraphManager::default()
    }

    /// Replace the graph with one built from `nodes` and return the resulting degree centrality.
    #[tracing::instrument(skip_all, fields(nodes = nodes.len()))]
    pub fn build(&mut self, nodes: &[Node]) -> BTreeMap<String, Centrality> {
        let graph = NodeGraph::from_nodes(nodes);
        let centrality = graph.degree_centrality(now_millis());
        tracing::debug!(
            "[GraphManager] Built graph with {} vertices and {} edges",
            graph.node_count(),
            graph.edge_count()
        );
        self.graph = Some(graph);
        centrality
    }

    pub fn is_ready(&self) -> bool {
        self.graph.is_some()
    }

    fn graph(&self) -> Result<&NodeGraph, RouxError> {
        self.graph.as_ref().ok_or(RouxError::GraphNotReady)
    }

    pub fn neighbor_ids(
        &self,
        id: &str,
        direction: LinkDirection,
        limit: i64,
    ) -> Result<Vec<String>, RouxError> {
        Ok(self.graph()?.neighbor_ids(id, direction, limit))
    }

    pub fn find_path(&self, source: &str, target: &str) -> Result<Option<Vec<String>>, RouxError> {
        Ok(self.graph()?.find_path(source, target))
    }

    pub fn hubs(&self, metric: HubMetric, limit: i64) -> Result<Vec<(String, usize)>, RouxError> {
        Ok(self.graph()?.top_hubs(metric, limit))
    }

    pub fn node_count(&self) -> usize {
        self.graph.as_ref().map_or(0, NodeGraph::node_count)
    }

    pub fn edge_count(&self) -> usize {
        self.graph.as_ref().map_or(0, NodeGraph::edge_count)
    }
}
