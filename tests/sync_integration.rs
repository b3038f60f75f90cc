//! Integration tests for SyncEngine (full sync, id write-back, graph and provider operations)
//!
//! Each test builds a small document tree in a temp directory and drives the engine through
//! its public API only.

mod common;

use async_trait::async_trait;
use common::{node_at, open_engine, touch_forward, write_doc};
use roux_core::{
    nodeid::is_valid_id,
    properties::{
        HubMetric, LinkDirection, ListFilter, ListOptions, MatchStrategy, NeighborOptions,
        NewNode, NodeUpdate, ResolveOptions, TagMode,
    },
    Embedder, RouxError,
};
use std::sync::Arc;
use tempfile::TempDir;

fn doc(id: &str, title: &str, body: &str) -> String {
    format!("---\nid: {id}\n---\n# {title}\n\n{body}\n")
}

#[test_log::test(tokio::test)]
async fn test_ids_written_back_and_stable() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    write_doc(root, "a.md", "# Alpha\n\nSee [[Beta]].\n");
    write_doc(root, "notes/b.md", "---\ntags: [draft]\n---\n# Beta\n");

    let engine = open_engine(&temp_dir).await;
    let report = engine.sync().await.unwrap();
    assert_eq!(report.scanned, 2);
    assert_eq!(report.parsed, 2);
    assert_eq!(report.ids_written, 2);

    let alpha = node_at(&engine, "a.md").await;
    let beta = node_at(&engine, "notes/b.md").await;
    assert!(is_valid_id(&alpha.id));
    assert!(is_valid_id(&beta.id));
    assert_eq!(alpha.outgoing_links, vec![beta.id.clone()]);

    let text = std::fs::read_to_string(engine.root().join("notes/b.md")).unwrap();
    assert!(text.starts_with("---\nid: "));
    assert!(text.contains(&beta.id));
    assert!(text.contains("draft"), "existing front matter survives: {text}");
    assert!(text.ends_with("# Beta\n"));

    let again = engine.sync().await.unwrap();
    assert_eq!(again.unchanged, 2);
    assert_eq!(again.parsed, 0);
    assert_eq!(node_at(&engine, "a.md").await.id, alpha.id);
    assert_eq!(node_at(&engine, "notes/b.md").await.id, beta.id);
}

#[test_log::test(tokio::test)]
async fn test_modified_file_is_reparsed_with_same_id() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_doc(temp_dir.path(), "a.md", "# First\n");
    let engine = open_engine(&temp_dir).await;
    engine.sync().await.unwrap();
    let before = node_at(&engine, "a.md").await;

    let text = std::fs::read_to_string(&path).unwrap();
    std::fs::write(&path, text.replace("# First", "# Second")).unwrap();
    touch_forward(&path, 5);

    let report = engine.sync().await.unwrap();
    assert_eq!(report.parsed, 1);
    assert_eq!(report.ids_written, 0);
    let after = node_at(&engine, "a.md").await;
    assert_eq!(after.id, before.id);
    assert_eq!(after.title, "Second");
}

#[test_log::test(tokio::test)]
async fn test_removed_file_leaves_cache_and_graph() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    write_doc(root, "a.md", &doc("aaaaaaaaaaaa", "A", "[[b]]"));
    let b = write_doc(root, "b.md", &doc("bbbbbbbbbbbb", "B", ""));
    let engine = open_engine(&temp_dir).await;
    engine.sync().await.unwrap();

    let out = NeighborOptions {
        direction: LinkDirection::Out,
        limit: 10,
    };
    let neighbors = engine.get_neighbors("aaaaaaaaaaaa", out).await.unwrap();
    assert_eq!(neighbors.len(), 1);

    std::fs::remove_file(b).unwrap();
    let report = engine.sync().await.unwrap();
    assert_eq!(report.removed, 1);
    assert_eq!(engine.get_node("bbbbbbbbbbbb").await.unwrap(), None);
    assert!(engine
        .get_neighbors("aaaaaaaaaaaa", out)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(engine.cache().count().await.unwrap(), 1);
}

#[test_log::test(tokio::test)]
async fn test_duplicate_id_keeps_first_claimant() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    write_doc(root, "a.md", &doc("dupdupdupdup", "Original", ""));
    let engine = open_engine(&temp_dir).await;
    engine.sync().await.unwrap();

    // A copy of an existing document.
    write_doc(root, "0-copy.md", &doc("dupdupdupdup", "Copy", ""));
    let report = engine.sync().await.unwrap();
    assert_eq!(report.duplicates, 1);

    let kept = engine.get_node("dupdupdupdup").await.unwrap().unwrap();
    assert_eq!(kept.title, "Original");
    assert!(engine
        .cache()
        .get_by_path(engine.root().join("0-copy.md"))
        .await
        .unwrap()
        .is_none());
}

#[test_log::test(tokio::test)]
async fn test_duplicate_ids_in_fresh_tree() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    write_doc(root, "a.md", &doc("samesamesame", "First", ""));
    write_doc(root, "b.md", &doc("samesamesame", "Second", ""));
    let engine = open_engine(&temp_dir).await;
    let report = engine.sync().await.unwrap();
    assert_eq!(report.parsed, 1);
    assert_eq!(report.duplicates, 1);
    assert_eq!(
        engine.get_node("samesamesame").await.unwrap().unwrap().title,
        "First"
    );
}

#[test_log::test(tokio::test)]
async fn test_renamed_file_keeps_its_id() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let old = write_doc(root, "old.md", &doc("renamedrenam", "Moving", ""));
    let engine = open_engine(&temp_dir).await;
    engine.sync().await.unwrap();

    std::fs::rename(&old, root.join("new.md")).unwrap();
    let report = engine.sync().await.unwrap();
    assert_eq!(report.duplicates, 0);
    let node = engine.get_node("renamedrenam").await.unwrap().unwrap();
    assert!(node.source_path().unwrap().ends_with("new.md"));
    assert_eq!(engine.cache().count().await.unwrap(), 1);
}

#[test_log::test(tokio::test)]
async fn test_diamond_graph_queries() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    write_doc(root, "a.md", &doc("aaaaaaaaaaaa", "A", "[[b]] and [[c]]"));
    write_doc(root, "b.md", &doc("bbbbbbbbbbbb", "B", "[[d]]"));
    write_doc(root, "c.md", &doc("cccccccccccc", "C", "[[d]]"));
    write_doc(root, "d.md", &doc("dddddddddddd", "D", ""));
    let engine = open_engine(&temp_dir).await;
    engine.sync().await.unwrap();

    let path = engine
        .find_path("aaaaaaaaaaaa", "dddddddddddd")
        .unwrap()
        .unwrap();
    assert_eq!(path.len(), 3);
    assert_eq!(path.first().map(String::as_str), Some("aaaaaaaaaaaa"));
    assert_eq!(path.last().map(String::as_str), Some("dddddddddddd"));
    assert_eq!(engine.find_path("dddddddddddd", "aaaaaaaaaaaa").unwrap(), None);

    let hubs = engine.get_hubs(HubMetric::InDegree, 1).unwrap();
    assert_eq!(hubs, vec![("dddddddddddd".to_string(), 2)]);

    let incoming = engine
        .get_neighbors(
            "dddddddddddd",
            NeighborOptions {
                direction: LinkDirection::In,
                limit: 10,
            },
        )
        .await
        .unwrap();
    let mut ids: Vec<_> = incoming.into_iter().map(|n| n.id).collect();
    ids.sort();
    assert_eq!(ids, vec!["bbbbbbbbbbbb", "cccccccccccc"]);

    let centrality = engine.get_centrality("dddddddddddd").await.unwrap().unwrap();
    assert_eq!(centrality.in_degree, 2);
    assert_eq!(centrality.out_degree, 0);
}

#[test_log::test(tokio::test)]
async fn test_create_update_delete_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    write_doc(temp_dir.path(), "target.md", &doc("targettarget", "Target", ""));
    let engine = open_engine(&temp_dir).await;
    engine.sync().await.unwrap();

    let created = engine
        .create_node(NewNode {
            path: "notes/fresh".into(),
            title: "Fresh".to_string(),
            content: "Points at [[target]].\n".to_string(),
            tags: vec!["new".to_string()],
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(is_valid_id(&created.id));
    assert_eq!(created.outgoing_links, vec!["targettarget".to_string()]);
    let file = engine.root().join("notes/fresh.md");
    let text = std::fs::read_to_string(&file).unwrap();
    assert!(text.contains(&created.id));

    let again = engine
        .create_node(NewNode {
            path: "notes/fresh.md".into(),
            ..Default::default()
        })
        .await;
    assert!(matches!(again, Err(RouxError::AlreadyExists(_))));

    let updated = engine
        .update_node(
            &created.id,
            NodeUpdate {
                title: Some("Renamed".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.id, created.id);
    assert_eq!(updated.title, "Renamed");
    assert!(std::fs::read_to_string(&file).unwrap().contains("Renamed"));
    assert_eq!(
        engine
            .update_node("missingmissi", NodeUpdate::default())
            .await
            .unwrap(),
        None
    );

    // A sync after our own writes sees nothing new.
    let report = engine.sync().await.unwrap();
    assert_eq!(report.parsed, 0);

    assert!(engine.delete_node(&created.id).await.unwrap());
    assert!(!file.exists());
    assert_eq!(engine.get_node(&created.id).await.unwrap(), None);
    assert!(!engine.delete_node(&created.id).await.unwrap());
}

#[test_log::test(tokio::test)]
async fn test_create_rejects_paths_outside_root() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open_engine(&temp_dir).await;
    for path in ["../escape.md", "notes/../../escape.md"] {
        let res = engine
            .create_node(NewNode {
                path: path.into(),
                title: "Nope".to_string(),
                ..Default::default()
            })
            .await;
        assert!(
            matches!(res, Err(RouxError::PathTraversal(_))),
            "{path}: {res:?}"
        );
    }
    assert!(!temp_dir.path().parent().unwrap().join("escape.md").exists());
    assert_eq!(engine.cache().count().await.unwrap(), 0);
}

#[test_log::test(tokio::test)]
async fn test_listing_tags_and_name_resolution() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    write_doc(
        root,
        "Projects/plan.md",
        "---\nid: planplanplan\ntags: [Work]\n---\n# Quarterly Plan\n",
    );
    write_doc(
        root,
        "journal/day.md",
        "---\nid: daydaydayday\ntags: [life]\n---\n# Day One\n",
    );
    let engine = open_engine(&temp_dir).await;
    engine.sync().await.unwrap();

    let listed = engine
        .list_nodes(
            &ListFilter {
                tag: None,
                path_prefix: Some("projects".to_string()),
            },
            ListOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(listed.total, 1);
    assert_eq!(listed.nodes[0].id, "planplanplan");

    let tagged = engine
        .search_by_tags(&["work".to_string()], TagMode::Any, None)
        .await
        .unwrap();
    assert_eq!(tagged.len(), 1);

    let resolved = engine
        .resolve_names(
            &["quarterly plan".to_string(), "Day On".to_string()],
            ResolveOptions {
                strategy: MatchStrategy::Fuzzy,
                threshold: 0.7,
            },
        )
        .await
        .unwrap();
    assert_eq!(resolved[0].id.as_deref(), Some("planplanplan"));
    assert_eq!(resolved[1].id.as_deref(), Some("daydaydayday"));

    let exists = engine
        .nodes_exist(&["planplanplan".to_string(), "nonononenone".to_string()])
        .await
        .unwrap();
    assert_eq!(exists.get("planplanplan"), Some(&true));
    assert_eq!(exists.get("nonononenone"), Some(&false));

    let titles = engine
        .resolve_titles(&["daydaydayday".to_string()])
        .await
        .unwrap();
    assert_eq!(titles.get("daydaydayday").map(String::as_str), Some("Day One"));
}

/// Deterministic letter-frequency embedding.
struct LetterEmbedder;

#[async_trait]
impl Embedder for LetterEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RouxError> {
        let mut vector = vec![0.0f32; 26];
        for c in text.to_lowercase().chars().filter(char::is_ascii_lowercase) {
            vector[(c as u8 - b'a') as usize] += 1.0;
        }
        if vector.iter().all(|v| *v == 0.0) {
            vector[0] = 1.0;
        }
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        26
    }

    fn model_id(&self) -> &str {
        "letters"
    }
}

#[test_log::test(tokio::test)]
async fn test_embeddings_follow_sync() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    write_doc(root, "zebra.md", &doc("zebrazebraze", "Zzz", "zzzz zzzz"));
    write_doc(root, "apple.md", &doc("appleappleap", "Aaa", "aaaa aaaa"));
    let engine = common::open_engine(&temp_dir)
        .await
        .with_embedder(Arc::new(LetterEmbedder));
    engine.sync().await.unwrap();
    assert_eq!(engine.vectors().count().await.unwrap(), 2);

    let query = LetterEmbedder.embed("zzz").await.unwrap();
    let hits = engine.search_by_vector(&query, 1).await.unwrap();
    assert_eq!(hits[0].id, "zebrazebraze");

    let resolved = engine
        .resolve_names(
            &["zz".to_string()],
            ResolveOptions {
                strategy: MatchStrategy::Semantic,
                threshold: 0.9,
            },
        )
        .await
        .unwrap();
    assert_eq!(resolved[0].id.as_deref(), Some("zebrazebraze"));

    assert!(engine.delete_node("zebrazebraze").await.unwrap());
    assert_eq!(engine.vectors().count().await.unwrap(), 1);
}
