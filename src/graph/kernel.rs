//! Pure graph operations over a directed link graph.
//!
//! Vertices are node ids, edges are resolved links. A link whose target is not a known node
//! contributes no edge. Parallel links collapse to one edge; self-links are kept.

use crate::{
    heap::{Ranked, TopK},
    properties::{Centrality, HubMetric, LinkDirection, Node},
};
use petgraph::{graph::NodeIndex, Direction};
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone, Default)]
pub struct NodeGraph {
    graph: petgraph::Graph<String, ()>,
    index: HashMap<String, NodeIndex>,
}

impl NodeGraph {
    pub fn from_nodes(nodes: &[Node]) -> Self {
        let mut graph = petgraph::Graph::with_capacity(nodes.len(), 0);
        let mut index = HashMap::with_capacity(nodes.len());
        for node in nodes {
            if !index.contains_key(&node.id) {
                let idx = graph.add_node(node.id.clone());
                index.insert(node.id.clone(), idx);
            }
        }
        for node in nodes {
            let source = index[&node.id];
            let mut seen = HashSet::new();
            for target in node.outgoing_links.iter() {
                let Some(&sink) = index.get(target) else {
                    continue;
                };
                if seen.insert(sink) && graph.find_edge(source, sink).is_none() {
                    graph.add_edge(source, sink, ());
                }
            }
        }
        NodeGraph { graph, index }
    }

    pub fn as_graph(&self) -> &petgraph::Graph<String, ()> {
        &self.graph
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    fn degree(&self, idx: NodeIndex, dir: Direction) -> usize {
        self.graph.neighbors_directed(idx, dir).count()
    }

    pub fn degree_centrality(&self, computed_at: i64) -> BTreeMap<String, Centrality> {
        self.graph
            .node_indices()
            .map(|idx| {
                (
                    self.graph[idx].clone(),
                    Centrality {
                        in_degree: self.degree(idx, Direction::Incoming),
                        out_degree: self.degree(idx, Direction::Outgoing),
                        pagerank: 0.0,
                        computed_at,
                    },
                )
            })
            .collect()
    }

    /// Up to `limit` neighbor ids. Iteration stops as soon as the limit is reached.
    pub fn neighbor_ids(&self, id: &str, direction: LinkDirection, limit: i64) -> Vec<String> {
        if limit <= 0 {
            return Vec::new();
        }
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        let dirs: &[Direction] = match direction {
            LinkDirection::Out => &[Direction::Outgoing],
            LinkDirection::In => &[Direction::Incoming],
            LinkDirection::Both => &[Direction::Outgoing, Direction::Incoming],
        };
        let limit = limit as usize;
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for dir in dirs {
            for neighbor in self.graph.neighbors_directed(idx, *dir) {
                if seen.insert(neighbor) {
                    out.push(self.graph[neighbor].clone());
                    if out.len() == limit {
                        return out;
                    }
                }
            }
        }
        out
    }

    /// Shortest directed path from `source` to `target`, inclusive of both ends.
    pub fn find_path(&self, source: &str, target: &str) -> Option<Vec<String>> {
        if source == target {
            return Some(vec![source.to_string()]);
        }
        let s = *self.index.get(source)?;
        let t = *self.index.get(target)?;

        let mut forward = Search::new(s);
        let mut backward = Search::new(t);
        while !forward.frontier.is_empty() && !backward.frontier.is_empty() {
            let meet = if forward.frontier.len() <= backward.frontier.len() {
                forward.expand(&self.graph, Direction::Outgoing, &backward)
            } else {
                backward.expand(&self.graph, Direction::Incoming, &forward)
            };
            if let Some(meet) = meet {
                let mut path = forward.trail(meet);
                path.reverse();
                path.extend(backward.trail(meet).into_iter().skip(1));
                return Some(path.into_iter().map(|i| self.graph[i].clone()).collect());
            }
        }
        None
    }

    /// Highest-degree nodes, ties broken by ascending id.
    pub fn top_hubs(&self, metric: HubMetric, limit: i64) -> Vec<(String, usize)> {
        if limit <= 0 {
            return Vec::new();
        }
        let dir = match metric {
            HubMetric::InDegree => Direction::Incoming,
            HubMetric::OutDegree => Direction::Outgoing,
        };
        let mut top = TopK::with_expected(limit as usize, self.graph.node_count());
        top.extend(self.graph.node_indices().map(|idx| Ranked {
            score: self.degree(idx, dir),
            id: self.graph[idx].clone(),
        }));
        top.into_sorted_vec()
            .into_iter()
            .map(|r| (r.id, r.score))
            .collect()
    }
}

/// One side of a bidirectional breadth-first search.
struct Search {
    /// Visited vertices with their BFS parent and depth.
    visited: HashMap<NodeIndex, (Option<NodeIndex>, usize)>,
    frontier: Vec<NodeIndex>,
}

impl Search {
    fn new(start: NodeIndex) -> Self {
        Search {
            visited: HashMap::from([(start, (None, 0))]),
            frontier: vec![start],
        }
    }

    /// Expand one full BFS level. Returns the meeting vertex minimizing total path length, if
    /// this level touched anything the other side has visited.
    fn expand(
        &mut self,
        graph: &petgraph::Graph<String, ()>,
        dir: Direction,
        other: &Search,
    ) -> Option<NodeIndex> {
        let mut next = Vec::new();
        let mut meet: Option<(NodeIndex, usize)> = None;
        for &u in self.frontier.iter() {
            let depth = self.visited[&u].1 + 1;
            for v in graph.neighbors_directed(u, dir) {
                if self.visited.contains_key(&v) {
                    continue;
                }
                self.visited.insert(v, (Some(u), depth));
                next.push(v);
                if let Some(&(_, other_depth)) = other.visited.get(&v) {
                    if meet.map_or(true, |(_, best)| other_depth < best) {
                        meet = Some((v, other_depth));
                    }
                }
            }
        }
        self.frontier = next;
        meet.map(|(v, _)| v)
    }

    /// Vertices from `end` back to this search's start.
    fn trail(&self, end: NodeIndex) -> Vec<NodeIndex> {
        let mut trail = vec![end];
        let mut cursor = end;
        while let Some(&(Some(parent), _)) = self.visited.get(&cursor) {
            trail.push(parent);
            cursor = parent;
        }
        trail
    }
}
