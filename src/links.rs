//! Rewriting raw link text into node ids.
//!
//! A [`LinkResolver`] is a snapshot of the node set. For every raw link it tries, in order:
//! an existing id, a root-relative path, the file stem, the file stem with spaces and dashes
//! swapped, and finally the node title. Anything left over stays as the literal link text.

use crate::{
    paths::{relative_key, SEP},
    properties::Node,
};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    path::Path,
};

#[derive(Debug, Clone, Default)]
pub struct LinkResolver {
    ids: HashSet<String>,
    by_path: HashMap<String, String>,
    /// Lowercased file stem to every id carrying it, ascending.
    by_stem: BTreeMap<String, Vec<String>>,
    by_title: BTreeMap<String, Vec<String>>,
    default_extension: String,
}

fn insert_sorted(index: &mut BTreeMap<String, Vec<String>>, key: String, id: &str) {
    let ids = index.entry(key).or_default();
    if let Err(pos) = ids.binary_search_by(|probe| probe.as_str().cmp(id)) {
        ids.insert(pos, id.to_string());
    }
}

fn strip_extension(target: &str) -> &str {
    let segment_start = target.rfind(SEP).map_or(0, |i| i + 1);
    match target[segment_start..].rfind('.') {
        Some(0) | None => target,
        Some(dot) => &target[..segment_start + dot],
    }
}

impl LinkResolver {
    pub fn new(nodes: &[Node], root: &Path, default_extension: &str) -> Self {
        let mut resolver = LinkResolver {
            default_extension: default_extension.to_lowercase(),
            ..Default::default()
        };
        for node in nodes {
            resolver.ids.insert(node.id.clone());
            if let Some(path) = node.source_path() {
                if let Ok(key) = relative_key(root, path) {
                    let stem = strip_extension(key.rsplit(SEP).next().unwrap_or(&key)).to_string();
                    insert_sorted(&mut resolver.by_stem, stem, &node.id);
                    resolver.by_path.insert(key, node.id.clone());
                }
            }
            if !node.title.trim().is_empty() {
                insert_sorted(&mut resolver.by_title, node.title.trim().to_lowercase(), &node.id);
            }
        }
        resolver
    }

    fn by_stem(&self, stem: &str) -> Option<&String> {
        self.by_stem.get(stem).and_then(|ids| ids.first())
    }

    /// Resolve one raw link. Returns the input unchanged when nothing matches.
    pub fn resolve(&self, raw: &str) -> String {
        if self.ids.contains(raw) {
            return raw.to_string();
        }
        let key = raw.to_lowercase();
        if key.contains(SEP) {
            return match self.by_path.get(&key) {
                Some(id) => id.clone(),
                None => raw.to_string(),
            };
        }
        let stem = strip_extension(&key);
        if let Some(id) = self.by_stem(stem) {
            return id.clone();
        }
        let swapped: String = stem
            .chars()
            .map(|c| match c {
                ' ' => '-',
                '-' => ' ',
                other => other,
            })
            .collect();
        if let Some(id) = self.by_stem(&swapped) {
            return id.clone();
        }
        let title_key = if key.ends_with(&format!(".{}", self.default_extension)) {
            stem
        } else {
            key.as_str()
        };
        if let Some(id) = self.by_title.get(title_key.trim()).and_then(|ids| ids.first()) {
            return id.clone();
        }
        raw.to_string()
    }

    pub fn resolve_all(&self, raw: &[String]) -> Vec<String> {
        raw.iter().map(|link| self.resolve(link)).collect()
    }
}
