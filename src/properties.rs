//! Node, edge and query types shared by every component.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::BTreeMap,
    fmt::{self, Display},
    path::PathBuf,
    str::FromStr,
};

use crate::error::RouxError;

/// Header keys with first-class fields on [`Node`]. They never appear in `properties`.
pub const RESERVED_KEYS: [&str; 3] = ["id", "title", "tags"];

/// Where a node's content came from.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    File,
    Api,
    Manual,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::File => "file",
            SourceKind::Api => "api",
            SourceKind::Manual => "manual",
        }
    }
}

impl FromStr for SourceKind {
    type Err = RouxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(SourceKind::File),
            "api" => Ok(SourceKind::Api),
            "manual" => Ok(SourceKind::Manual),
            other => Err(RouxError::Serialization(format!(
                "unknown source kind '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub kind: SourceKind,
    /// Absolute path of the originating file.
    pub path: PathBuf,
    /// Modification time in epoch milliseconds.
    pub last_modified: i64,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    /// Link targets in document order. Entries are either resolved node ids or the literal
    /// (normalized) link text when resolution failed.
    pub outgoing_links: Vec<String>,
    pub properties: BTreeMap<String, Value>,
    pub source_ref: Option<SourceRef>,
}

impl Node {
    pub fn has_tag(&self, tag: &str) -> bool {
        let tag = tag.to_lowercase();
        self.tags.iter().any(|t| t.to_lowercase() == tag)
    }

    pub fn source_path(&self) -> Option<&PathBuf> {
        self.source_ref.as_ref().map(|s| &s.path)
    }
}

/// Fields for [`crate::sync::SyncEngine::create_node`]. `path` is relative to the source root.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewNode {
    pub path: PathBuf,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub properties: BTreeMap<String, Value>,
}

/// Partial update; `None` leaves the field untouched. Ids are immutable.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    pub properties: Option<BTreeMap<String, Value>>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Centrality {
    pub in_degree: usize,
    pub out_degree: usize,
    /// Reserved. Always 0.
    pub pagerank: f64,
    /// Epoch milliseconds of the graph build that produced this record.
    pub computed_at: i64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkDirection {
    In,
    #[default]
    Out,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HubMetric {
    InDegree,
    OutDegree,
}

impl Display for HubMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HubMetric::InDegree => write!(f, "in_degree"),
            HubMetric::OutDegree => write!(f, "out_degree"),
        }
    }
}

impl FromStr for HubMetric {
    type Err = RouxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_degree" => Ok(HubMetric::InDegree),
            "out_degree" => Ok(HubMetric::OutDegree),
            other => Err(RouxError::Serialization(format!(
                "unknown hub metric '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NeighborOptions {
    pub direction: LinkDirection,
    pub limit: i64,
}

impl Default for NeighborOptions {
    fn default() -> Self {
        NeighborOptions {
            direction: LinkDirection::Out,
            limit: 20,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagMode {
    #[default]
    Any,
    All,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListFilter {
    pub tag: Option<String>,
    /// Case-insensitive prefix on the path relative to the source root.
    pub path_prefix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListOptions {
    pub limit: usize,
    pub offset: usize,
}

impl Default for ListOptions {
    fn default() -> Self {
        ListOptions {
            limit: 100,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListResult {
    pub nodes: Vec<NodeSummary>,
    /// Number of matches before pagination.
    pub total: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStrategy {
    Exact,
    #[default]
    Fuzzy,
    Semantic,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResolveOptions {
    pub strategy: MatchStrategy,
    pub threshold: f64,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        ResolveOptions {
            strategy: MatchStrategy::Fuzzy,
            threshold: crate::config::DEFAULT_FUZZY_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedName {
    pub query: String,
    pub id: Option<String>,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorSearchResult {
    pub id: String,
    pub distance: f32,
}
