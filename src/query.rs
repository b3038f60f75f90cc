//! Provider operations shared by every node store.
//!
//! Anything that can load and fetch nodes implements [`NodeStore`]; the free functions here
//! derive tag search, listing, random selection and name resolution from those primitives, so
//! each backend gets identical semantics.

use crate::{
    error::RouxError,
    names::{self, Candidate},
    paths::relative_key,
    properties::{
        ListFilter, ListOptions, ListResult, Node, NodeSummary, ResolveOptions, ResolvedName,
        TagMode,
    },
};
use std::{collections::BTreeMap, future::Future, path::Path};

pub trait NodeStore: Sync {
    /// Every node, ordered by id.
    fn load_all(&self) -> impl Future<Output = Result<Vec<Node>, RouxError>> + Send;

    /// Nodes for `ids` in request order; unknown ids are skipped.
    fn get_many(&self, ids: &[String])
        -> impl Future<Output = Result<Vec<Node>, RouxError>> + Send;

    fn get(&self, id: &str) -> impl Future<Output = Result<Option<Node>, RouxError>> + Send {
        let ids = vec![id.to_string()];
        async move { Ok(self.get_many(&ids).await?.into_iter().next()) }
    }

    fn upsert(&self, node: &Node) -> impl Future<Output = Result<(), RouxError>> + Send;

    fn delete(&self, id: &str) -> impl Future<Output = Result<bool, RouxError>> + Send;
}

fn matches_tags(node: &Node, wanted: &[String], mode: TagMode) -> bool {
    match mode {
        TagMode::Any => wanted.iter().any(|tag| node.has_tag(tag)),
        TagMode::All => wanted.iter().all(|tag| node.has_tag(tag)),
    }
}

/// Nodes carrying any (or all) of `tags`, compared case-insensitively. An empty tag list matches
/// nothing.
pub async fn search_by_tags<S: NodeStore>(
    store: &S,
    tags: &[String],
    mode: TagMode,
    limit: Option<usize>,
) -> Result<Vec<Node>, RouxError> {
    if tags.is_empty() {
        return Ok(Vec::new());
    }
    let matches = store
        .load_all()
        .await?
        .into_iter()
        .filter(|node| matches_tags(node, tags, mode));
    Ok(match limit {
        Some(limit) => matches.take(limit).collect(),
        None => matches.collect(),
    })
}

/// A uniformly chosen node, optionally restricted to nodes with any of `tags`.
pub async fn random_node<S: NodeStore>(
    store: &S,
    tags: Option<&[String]>,
) -> Result<Option<Node>, RouxError> {
    let mut candidates = store.load_all().await?;
    if let Some(tags) = tags.filter(|t| !t.is_empty()) {
        candidates.retain(|node| matches_tags(node, tags, TagMode::Any));
    }
    if candidates.is_empty() {
        return Ok(None);
    }
    let mut bytes = [0u8; 8];
    getrandom::getrandom(&mut bytes)
        .map_err(|e| RouxError::Io(format!("random source unavailable: {e}")))?;
    let idx = (u64::from_le_bytes(bytes) % candidates.len() as u64) as usize;
    Ok(Some(candidates.swap_remove(idx)))
}

/// Paginated id/title listing. `total` counts matches before pagination.
pub async fn list_nodes<S: NodeStore>(
    store: &S,
    root: &Path,
    filter: &ListFilter,
    options: ListOptions,
) -> Result<ListResult, RouxError> {
    let prefix = filter
        .path_prefix
        .as_ref()
        .map(|p| p.replace('\\', "/").trim_start_matches('/').to_lowercase());
    let matching: Vec<Node> = store
        .load_all()
        .await?
        .into_iter()
        .filter(|node| filter.tag.as_ref().map_or(true, |tag| node.has_tag(tag)))
        .filter(|node| match &prefix {
            None => true,
            Some(prefix) => node
                .source_path()
                .and_then(|path| relative_key(root, path).ok())
                .is_some_and(|key| key.starts_with(prefix.as_str())),
        })
        .collect();
    let total = matching.len();
    let nodes = matching
        .into_iter()
        .skip(options.offset)
        .take(options.limit)
        .map(|node| NodeSummary {
            id: node.id,
            title: node.title,
        })
        .collect();
    Ok(ListResult { nodes, total })
}

pub async fn resolve_names<S: NodeStore>(
    store: &S,
    queries: &[String],
    options: ResolveOptions,
) -> Result<Vec<ResolvedName>, RouxError> {
    if queries.is_empty() {
        return Ok(Vec::new());
    }
    let candidates: Vec<Candidate> = store
        .load_all()
        .await?
        .into_iter()
        .map(|node| Candidate {
            id: node.id,
            title: node.title,
        })
        .collect();
    Ok(names::resolve_names(queries, &candidates, options))
}

pub async fn nodes_exist<S: NodeStore>(
    store: &S,
    ids: &[String],
) -> Result<BTreeMap<String, bool>, RouxError> {
    let found = store.get_many(ids).await?;
    let mut exists: BTreeMap<String, bool> = ids.iter().map(|id| (id.clone(), false)).collect();
    for node in found {
        exists.insert(node.id, true);
    }
    Ok(exists)
}

/// Titles for the ids that exist; unknown ids are absent from the map.
pub async fn resolve_titles<S: NodeStore>(
    store: &S,
    ids: &[String],
) -> Result<BTreeMap<String, String>, RouxError> {
    Ok(store
        .get_many(ids)
        .await?
        .into_iter()
        .map(|node| (node.id, node.title))
        .collect())
}
