//! The synchronization engine.
//!
//! [`SyncEngine`] owns the document cache, the vector index and the link graph for one source
//! root, and keeps them consistent with the files on disk:
//!
//! - [`SyncEngine::sync`] performs a full pass: scan, diff against the cache by modification
//!   time, parse what changed, write stable ids back into documents that lack one, drop rows
//!   for deleted files, resolve links and rebuild the graph.
//! - [`SyncEngine::apply_changes`] does the same for a [`ChangeBatch`] from the watcher.
//! - The mutating provider operations (`create_node`, `update_node`, `delete_node`) write the
//!   file first and then bring the cache and graph up to date.
//!
//! Every mutating entry point holds `sync_lock` and pauses the watcher for its duration, so the
//! engine's own writes are not fed back to it as changes.
//!
//! ## Duplicate ids
//!
//! Two files claiming the same id is a user error (usually a copied file). The first claimant
//! wins: a file already seen during this pass, or the cached owner of the id if its file still
//! exists. The losing file is logged and left out of the cache until its id is fixed.

use crate::{
    codec::{DocumentParser, ParseContext, ParserMap},
    config::{RouxConfig, CACHE_DIR_NAME},
    db::{db_init, DocumentCache, TrackedSource},
    error::RouxError,
    event::{ChangeBatch, ChangeKind},
    graph::GraphManager,
    links::LinkResolver,
    nodeid::{generate_id, is_valid_id},
    paths::{
        extension_of, file_mtime_millis, os_path_to_string, relative_reference,
        resolve_within_root,
    },
    properties::{
        Centrality, HubMetric, ListFilter, ListOptions, ListResult, MatchStrategy, NeighborOptions,
        NewNode, Node, NodeUpdate, ResolveOptions, ResolvedName, TagMode, VectorSearchResult,
        RESERVED_KEYS,
    },
    query,
    vector::{Embedder, VectorIndex},
    watch::{FileWatcher, WatchHandle, WatchOptions},
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::task::JoinHandle;
use walkdir::WalkDir;

/// Counters describing one sync pass or change batch.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Candidate files found on disk (full sync) or paths in the batch.
    pub scanned: usize,
    pub parsed: usize,
    pub unchanged: usize,
    pub removed: usize,
    pub ids_written: usize,
    pub write_races: usize,
    pub duplicates: usize,
    pub failed: usize,
    pub links_updated: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileOutcome {
    Unchanged,
    Parsed,
    IdWritten,
    WriteRace,
    Duplicate,
}

impl SyncReport {
    fn record(&mut self, outcome: FileOutcome) {
        match outcome {
            FileOutcome::Unchanged => self.unchanged += 1,
            FileOutcome::Parsed => self.parsed += 1,
            FileOutcome::IdWritten => {
                self.parsed += 1;
                self.ids_written += 1;
            }
            FileOutcome::WriteRace => {
                self.parsed += 1;
                self.write_races += 1;
            }
            FileOutcome::Duplicate => self.duplicates += 1,
        }
    }
}

/// Resumes the watcher when dropped.
struct PauseGuard(Option<WatchHandle>);

impl Drop for PauseGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.resume();
        }
    }
}

/// Ids claimed so far in one pass, with the claiming file.
type Claims = HashMap<String, PathBuf>;

fn path_key(path: &Path) -> String {
    os_path_to_string(path).to_lowercase()
}

pub struct SyncEngine {
    config: RouxConfig,
    root: PathBuf,
    excluded_dirs: BTreeSet<String>,
    cache: DocumentCache,
    vectors: VectorIndex,
    graph: RwLock<GraphManager>,
    parsers: ParserMap,
    embedder: Option<Arc<dyn Embedder>>,
    sync_lock: tokio::sync::Mutex<()>,
    watcher: Mutex<Option<FileWatcher>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    /// Open (creating if needed) the cache for `config.source_root`. The graph stays unbuilt
    /// until the first [`SyncEngine::sync`].
    #[tracing::instrument(skip_all)]
    pub async fn open(mut config: RouxConfig) -> Result<Self, RouxError> {
        config.validate()?;
        let root = match tokio::fs::canonicalize(&config.source_root).await {
            Ok(root) => root,
            Err(e) => {
                tracing::warn!(
                    "[SyncEngine] Could not canonicalize source root {:?}: {e}",
                    config.source_root
                );
                config.source_root.clone()
            }
        };
        config.source_root = root.clone();
        let mut excluded_dirs = config.excluded_dirs.clone();
        excluded_dirs.insert(CACHE_DIR_NAME.to_string());

        let pool = db_init(config.cache_db_path()).await?;
        let parsers = ParserMap::create(&config.default_link_extension);
        tracing::info!("[SyncEngine] Opened source root {:?}", root);
        Ok(SyncEngine {
            cache: DocumentCache::new(pool.clone(), &root),
            vectors: VectorIndex::new(pool),
            graph: RwLock::new(GraphManager::new()),
            parsers,
            embedder: None,
            sync_lock: tokio::sync::Mutex::new(()),
            watcher: Mutex::new(None),
            consumer: Mutex::new(None),
            excluded_dirs,
            root,
            config,
        })
    }

    /// Embed every parsed node with `embedder`. Embedding failures are logged, never fatal.
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn config(&self) -> &RouxConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cache(&self) -> &DocumentCache {
        &self.cache
    }

    pub fn vectors(&self) -> &VectorIndex {
        &self.vectors
    }

    /// Register additional parsers here before the first sync.
    pub fn parsers(&self) -> &ParserMap {
        &self.parsers
    }

    pub fn is_graph_ready(&self) -> bool {
        self.graph.read().is_ready()
    }

    fn pause_watcher(&self) -> PauseGuard {
        let handle = self.watcher.lock().as_ref().map(FileWatcher::handle);
        if let Some(handle) = handle.as_ref() {
            handle.pause();
        }
        PauseGuard(handle)
    }

    /// Every file under the root with a registered parser, skipping excluded directories and
    /// hidden files. An unreadable root yields an empty list.
    fn scan_files(&self) -> Vec<PathBuf> {
        if let Err(e) = std::fs::read_dir(&self.root) {
            tracing::warn!("[SyncEngine] Cannot read source root {:?}: {e}", self.root);
            return Vec::new();
        }
        let excluded = &self.excluded_dirs;
        let mut files = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !(entry.file_type().is_dir()
                        && excluded.contains(&*entry.file_name().to_string_lossy()))
            });
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!("[SyncEngine] Skipping unreadable entry: {e}");
                    continue;
                }
            };
            if !entry.file_type().is_file()
                || entry.file_name().to_string_lossy().starts_with('.')
            {
                continue;
            }
            if extension_of(entry.path()).is_some_and(|ext| self.parsers.contains(&ext)) {
                files.push(entry.into_path());
            }
        }
        files
    }

    async fn tracked_by_key(&self) -> Result<HashMap<String, TrackedSource>, RouxError> {
        Ok(self
            .cache
            .tracked_sources()
            .await?
            .into_iter()
            .map(|(path, tracked)| (path.to_lowercase(), tracked))
            .collect())
    }

    /// Full synchronization pass.
    #[tracing::instrument(skip_all)]
    pub async fn sync(&self) -> Result<SyncReport, RouxError> {
        let _lock = self.sync_lock.lock().await;
        let _pause = self.pause_watcher();
        let mut report = SyncReport::default();

        let files = self.scan_files();
        report.scanned = files.len();
        let tracked = self.tracked_by_key().await?;
        tracing::info!(
            "[SyncEngine] Syncing {} file(s) against {} cached source(s)",
            files.len(),
            tracked.len()
        );

        let mut claims = Claims::new();
        let mut present = BTreeSet::new();
        for path in files.iter() {
            let key = path_key(path);
            let outcome = self.sync_file(path, tracked.get(&key), &mut claims).await;
            present.insert(key);
            self.tally(&mut report, path, outcome);
        }

        for (key, source) in tracked.iter() {
            if present.contains(key) {
                continue;
            }
            if let Some(id) = self.cache.delete_by_path(key).await? {
                tracing::debug!("[SyncEngine] Source of {} is gone, removing", source.id);
                self.vectors.delete(&id).await?;
                report.removed += 1;
            }
        }

        report.links_updated = self.relink_and_rebuild().await?;
        tracing::info!("[SyncEngine] Sync complete: {:?}", report);
        Ok(report)
    }

    /// Incremental counterpart of [`SyncEngine::sync`] for one watcher batch. Paths are
    /// relative to the source root.
    #[tracing::instrument(skip_all, fields(changes = batch.len()))]
    pub async fn apply_changes(&self, batch: ChangeBatch) -> Result<SyncReport, RouxError> {
        let _lock = self.sync_lock.lock().await;
        let _pause = self.pause_watcher();
        let mut report = SyncReport {
            scanned: batch.len(),
            ..Default::default()
        };
        let tracked = self.tracked_by_key().await?;
        let mut claims = Claims::new();

        let (removals, upserts): (Vec<_>, Vec<_>) = batch
            .into_iter()
            .partition(|(_, kind)| *kind == ChangeKind::Removed);
        for (rel, kind) in removals.into_iter().chain(upserts) {
            let path = match resolve_within_root(&self.root, Path::new(&rel)) {
                Ok(path) => path,
                Err(e) => {
                    tracing::warn!("[SyncEngine] Ignoring change outside of the root: {e}");
                    report.failed += 1;
                    continue;
                }
            };
            let exists = tokio::fs::try_exists(&path).await.unwrap_or(false);
            if kind == ChangeKind::Removed || !exists {
                if let Some(id) = self.cache.delete_by_path(&path).await? {
                    tracing::debug!("[SyncEngine] {rel} removed, dropping {id}");
                    self.vectors.delete(&id).await?;
                    report.removed += 1;
                }
                continue;
            }
            let outcome = self
                .sync_file(&path, tracked.get(&path_key(&path)), &mut claims)
                .await;
            self.tally(&mut report, &path, outcome);
        }

        report.links_updated = self.relink_and_rebuild().await?;
        tracing::debug!("[SyncEngine] Applied change batch: {:?}", report);
        Ok(report)
    }

    fn tally(&self, report: &mut SyncReport, path: &Path, outcome: Result<FileOutcome, RouxError>) {
        match outcome {
            Ok(outcome) => report.record(outcome),
            Err(RouxError::FileMissing(msg)) => {
                tracing::debug!("[SyncEngine] {:?} vanished during sync: {msg}", path);
            }
            Err(e) => {
                tracing::error!("[SyncEngine] Failed to sync {:?}: {e}", path);
                report.failed += 1;
            }
        }
    }

    async fn sync_file(
        &self,
        path: &Path,
        tracked: Option<&TrackedSource>,
        claims: &mut Claims,
    ) -> Result<FileOutcome, RouxError> {
        let mtime = file_mtime_millis(path).await?;
        if let Some(tracked) = tracked {
            if mtime <= tracked.modified {
                tracing::debug!("[SyncEngine] {:?} unchanged", path);
                claims
                    .entry(tracked.id.clone())
                    .or_insert_with(|| path.to_path_buf());
                return Ok(FileOutcome::Unchanged);
            }
        }

        let content = tokio::fs::read_to_string(path).await?;
        let ext = extension_of(path).unwrap_or_default();
        let parser = self
            .parsers
            .get(&ext)
            .ok_or_else(|| RouxError::Parse(format!("no parser registered for .{ext}")))?;
        let rel = relative_reference(&self.root, path)?;
        let ctx = ParseContext {
            absolute_path: path,
            relative_path: &rel,
            extension: &ext,
            mtime,
        };
        let mut node = parser.parse(&content, &ctx)?;
        let mut outcome = FileOutcome::Parsed;

        if !is_valid_id(&node.id) {
            let id = generate_id()?;
            match self
                .write_back(path, &rel, parser.as_ref(), &content, &id, mtime)
                .await
            {
                Ok(Some(written_mtime)) => {
                    tracing::debug!("[SyncEngine] Wrote id {id} into {rel}");
                    node.id = id;
                    if let Some(source) = node.source_ref.as_mut() {
                        source.last_modified = written_mtime;
                    }
                    outcome = FileOutcome::IdWritten;
                }
                Ok(None) => node.id = ctx.provisional_id(),
                Err(e @ RouxError::WriteBackRace(_)) => {
                    tracing::warn!("[SyncEngine] {e}; keeping provisional id until next sync");
                    node.id = ctx.provisional_id();
                    outcome = FileOutcome::WriteRace;
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(owner) = self.existing_claimant(&node.id, path, claims).await? {
            let err = RouxError::DuplicateId {
                id: node.id.clone(),
                kept: os_path_to_string(&owner),
                dropped: os_path_to_string(path),
            };
            tracing::warn!("[SyncEngine] {err}");
            if let Some(stale) = self.cache.delete_by_path(path).await? {
                self.vectors.delete(&stale).await?;
            }
            return Ok(FileOutcome::Duplicate);
        }

        if let Some(previous) = self.cache.get_by_path(path).await? {
            if previous.id != node.id {
                tracing::debug!(
                    "[SyncEngine] {rel} changed id {} -> {}",
                    previous.id,
                    node.id
                );
                self.cache.delete(&previous.id).await?;
                self.vectors.delete(&previous.id).await?;
            }
        }

        self.cache.upsert(&node).await?;
        claims.insert(node.id.clone(), path.to_path_buf());
        self.embed_node(&node).await;
        Ok(outcome)
    }

    /// Another file that already owns `id`: one claimed earlier in this pass, or the cached
    /// owner if its file still exists.
    async fn existing_claimant(
        &self,
        id: &str,
        path: &Path,
        claims: &Claims,
    ) -> Result<Option<PathBuf>, RouxError> {
        let key = path_key(path);
        if let Some(owner) = claims.get(id) {
            if path_key(owner) != key {
                return Ok(Some(owner.clone()));
            }
            return Ok(None);
        }
        let Some(cached) = self.cache.get(id).await? else {
            return Ok(None);
        };
        match cached.source_path() {
            Some(owner)
                if path_key(owner) != key
                    && tokio::fs::try_exists(owner).await.unwrap_or(false) =>
            {
                Ok(Some(owner.clone()))
            }
            _ => Ok(None),
        }
    }

    /// Store `id` in the file, unless it changed since `mtime_before` was read. Returns the
    /// new modification time, or `None` if the format cannot hold an id.
    async fn write_back(
        &self,
        path: &Path,
        rel: &str,
        parser: &dyn DocumentParser,
        content: &str,
        id: &str,
        mtime_before: i64,
    ) -> Result<Option<i64>, RouxError> {
        let Some(updated) = parser.write_id(content, id)? else {
            return Ok(None);
        };
        if file_mtime_millis(path).await? != mtime_before {
            return Err(RouxError::WriteBackRace(rel.to_string()));
        }
        tokio::fs::write(path, updated).await?;
        Ok(Some(file_mtime_millis(path).await?))
    }

    async fn embed_node(&self, node: &Node) {
        let Some(embedder) = self.embedder.as_ref() else {
            return;
        };
        let text = format!("{}\n\n{}", node.title, node.content);
        match embedder.embed(&text).await {
            Ok(vector) => {
                if let Err(e) = self
                    .vectors
                    .store(&node.id, &vector, embedder.model_id())
                    .await
                {
                    tracing::warn!("[SyncEngine] Could not store embedding for {}: {e}", node.id);
                }
            }
            Err(e) => tracing::warn!("[SyncEngine] Embedding {} failed: {e}", node.id),
        }
    }

    /// Resolve every node's links against the current node set, persist the ones that changed,
    /// rebuild the graph and store fresh centrality. Returns how many nodes had links rewritten.
    async fn relink_and_rebuild(&self) -> Result<usize, RouxError> {
        let mut nodes = self.cache.load_all().await?;
        let resolver = LinkResolver::new(&nodes, &self.root, &self.config.default_link_extension);
        let mut updated = 0;
        for node in nodes.iter_mut() {
            let resolved = resolver.resolve_all(&node.outgoing_links);
            if resolved != node.outgoing_links {
                self.cache.update_outgoing_links(&node.id, &resolved).await?;
                node.outgoing_links = resolved;
                updated += 1;
            }
        }
        let centrality = self.graph.write().build(&nodes);
        self.cache.store_centrality(&centrality).await?;
        Ok(updated)
    }

    pub async fn get_node(&self, id: &str) -> Result<Option<Node>, RouxError> {
        self.cache.get(id).await
    }

    pub async fn get_nodes(&self, ids: &[String]) -> Result<Vec<Node>, RouxError> {
        self.cache.get_many(ids).await
    }

    /// Write a new document and index it. `new.path` is relative to the source root; the
    /// default link extension is appended when it has none.
    #[tracing::instrument(skip_all, fields(path = ?new.path))]
    pub async fn create_node(&self, new: NewNode) -> Result<Node, RouxError> {
        let _lock = self.sync_lock.lock().await;
        let _pause = self.pause_watcher();

        let mut requested = new.path.clone();
        if requested.extension().is_none() {
            requested.set_extension(&self.config.default_link_extension);
        }
        let path = resolve_within_root(&self.root, &requested)?;
        let rel = relative_reference(&self.root, &path)?;
        let ext = extension_of(&path).unwrap_or_default();
        let parser = self
            .parsers
            .get(&ext)
            .ok_or_else(|| RouxError::Parse(format!("no parser registered for .{ext}")))?;
        if tokio::fs::try_exists(&path).await? || self.cache.get_by_path(&path).await?.is_some() {
            return Err(RouxError::AlreadyExists(rel));
        }

        let id = generate_id()?;
        let mut properties = new.properties;
        properties.retain(|key, _| !RESERVED_KEYS.contains(&key.as_str()));
        let draft = Node {
            id: id.clone(),
            title: new.title,
            content: new.content,
            tags: new.tags,
            outgoing_links: Vec::new(),
            properties,
            source_ref: None,
        };
        let text = parser.serialize(&draft)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &text).await?;

        let indexed = match self
            .reparse_written(&path, &rel, &ext, parser.as_ref(), &text, &id)
            .await
        {
            Ok(node) => self.cache.upsert(&node).await.map(|_| node),
            Err(e) => Err(e),
        };
        let node = match indexed {
            Ok(node) => node,
            Err(e) => {
                // Leave no file behind that the cache doesn't know about.
                if let Err(remove_err) = tokio::fs::remove_file(&path).await {
                    tracing::warn!(
                        "[SyncEngine] Could not remove {rel} after failed create: {remove_err}"
                    );
                }
                return Err(e);
            }
        };
        self.embed_node(&node).await;
        self.relink_and_rebuild().await?;
        tracing::info!("[SyncEngine] Created {} at {rel}", node.id);
        Ok(self.cache.get(&id).await?.unwrap_or(node))
    }

    async fn reparse_written(
        &self,
        path: &Path,
        rel: &str,
        ext: &str,
        parser: &dyn DocumentParser,
        text: &str,
        id: &str,
    ) -> Result<Node, RouxError> {
        let ctx = ParseContext {
            absolute_path: path,
            relative_path: rel,
            extension: ext,
            mtime: file_mtime_millis(path).await?,
        };
        let mut node = parser.parse(text, &ctx)?;
        node.id = id.to_string();
        Ok(node)
    }

    /// Apply `update` to the node and its file. Returns `None` for an unknown id.
    #[tracing::instrument(skip(self, update))]
    pub async fn update_node(
        &self,
        id: &str,
        update: NodeUpdate,
    ) -> Result<Option<Node>, RouxError> {
        let _lock = self.sync_lock.lock().await;
        let _pause = self.pause_watcher();

        let Some(mut node) = self.cache.get(id).await? else {
            return Ok(None);
        };
        let content_changed = update.title.is_some() || update.content.is_some();
        if let Some(title) = update.title {
            node.title = title;
        }
        if let Some(content) = update.content {
            node.content = content;
        }
        if let Some(tags) = update.tags {
            node.tags = tags;
        }
        if let Some(mut properties) = update.properties {
            properties.retain(|key, _| !RESERVED_KEYS.contains(&key.as_str()));
            node.properties = properties;
        }

        if let Some(source) = node.source_path().cloned() {
            let path = resolve_within_root(&self.root, &source)?;
            let rel = relative_reference(&self.root, &path)?;
            let ext = extension_of(&path).unwrap_or_default();
            let parser = self
                .parsers
                .get(&ext)
                .ok_or_else(|| RouxError::Parse(format!("no parser registered for .{ext}")))?;
            let text = parser.serialize(&node)?;
            tokio::fs::write(&path, &text).await?;
            node = self.reparse_written(&path, &rel, &ext, parser.as_ref(), &text, id).await?;
        }

        self.cache.upsert(&node).await?;
        if content_changed {
            self.embed_node(&node).await;
        }
        self.relink_and_rebuild().await?;
        Ok(Some(self.cache.get(id).await?.unwrap_or(node)))
    }

    /// Remove the node, its file and its embedding. Returns false for an unknown id.
    #[tracing::instrument(skip(self))]
    pub async fn delete_node(&self, id: &str) -> Result<bool, RouxError> {
        let _lock = self.sync_lock.lock().await;
        let _pause = self.pause_watcher();

        let Some(node) = self.cache.get(id).await? else {
            return Ok(false);
        };
        if let Some(source) = node.source_path() {
            let path = resolve_within_root(&self.root, source)?;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!("[SyncEngine] {:?} was already gone", path);
                }
                Err(e) => return Err(e.into()),
            }
        }
        self.cache.delete(id).await?;
        self.vectors.delete(id).await?;
        self.relink_and_rebuild().await?;
        Ok(true)
    }

    pub async fn get_neighbors(
        &self,
        id: &str,
        options: NeighborOptions,
    ) -> Result<Vec<Node>, RouxError> {
        let ids = self
            .graph
            .read()
            .neighbor_ids(id, options.direction, options.limit)?;
        self.cache.get_many(&ids).await
    }

    pub fn find_path(&self, source: &str, target: &str) -> Result<Option<Vec<String>>, RouxError> {
        self.graph.read().find_path(source, target)
    }

    pub fn get_hubs(&self, metric: HubMetric, limit: i64) -> Result<Vec<(String, usize)>, RouxError> {
        self.graph.read().hubs(metric, limit)
    }

    pub async fn get_centrality(&self, id: &str) -> Result<Option<Centrality>, RouxError> {
        self.cache.get_centrality(id).await
    }

    pub async fn store_embedding(
        &self,
        id: &str,
        vector: &[f32],
        model: &str,
    ) -> Result<(), RouxError> {
        self.vectors.store(id, vector, model).await
    }

    pub async fn search_by_vector(
        &self,
        vector: &[f32],
        limit: i64,
    ) -> Result<Vec<VectorSearchResult>, RouxError> {
        self.vectors.search(vector, limit).await
    }

    pub async fn search_by_tags(
        &self,
        tags: &[String],
        mode: TagMode,
        limit: Option<usize>,
    ) -> Result<Vec<Node>, RouxError> {
        self.cache.search_by_tags(tags, mode, limit).await
    }

    pub async fn random_node(&self, tags: Option<&[String]>) -> Result<Option<Node>, RouxError> {
        query::random_node(&self.cache, tags).await
    }

    pub async fn list_nodes(
        &self,
        filter: &ListFilter,
        options: ListOptions,
    ) -> Result<ListResult, RouxError> {
        self.cache.list(filter, options).await
    }

    /// Options for `strategy` using the configured fuzzy threshold.
    pub fn resolve_options(&self, strategy: MatchStrategy) -> ResolveOptions {
        ResolveOptions {
            strategy,
            threshold: self.config.fuzzy_threshold,
        }
    }

    /// Resolve free-text names to node ids. Semantic matching embeds each name and takes the
    /// nearest stored vector; without an embedder nothing matches.
    pub async fn resolve_names(
        &self,
        names: &[String],
        options: ResolveOptions,
    ) -> Result<Vec<ResolvedName>, RouxError> {
        if options.strategy != MatchStrategy::Semantic {
            return self.cache.resolve_names(names, options).await;
        }
        let Some(embedder) = self.embedder.as_ref() else {
            tracing::debug!("[SyncEngine] Semantic resolution requested without an embedder");
            return Ok(names
                .iter()
                .map(|name| ResolvedName {
                    query: name.clone(),
                    id: None,
                    score: 0.0,
                })
                .collect());
        };
        let mut resolved = Vec::with_capacity(names.len());
        for name in names {
            let vector = embedder.embed(name).await?;
            let nearest = self.vectors.search(&vector, 1).await?.into_iter().next();
            let hit = match nearest {
                Some(hit) if 1.0 - hit.distance as f64 >= options.threshold => {
                    let exists = self.cache.get(&hit.id).await?.is_some();
                    exists.then(|| (hit.id, 1.0 - hit.distance as f64))
                }
                _ => None,
            };
            resolved.push(match hit {
                Some((id, score)) => ResolvedName {
                    query: name.clone(),
                    id: Some(id),
                    score,
                },
                None => ResolvedName {
                    query: name.clone(),
                    id: None,
                    score: 0.0,
                },
            });
        }
        Ok(resolved)
    }

    pub async fn nodes_exist(&self, ids: &[String]) -> Result<BTreeMap<String, bool>, RouxError> {
        query::nodes_exist(&self.cache, ids).await
    }

    pub async fn resolve_titles(
        &self,
        ids: &[String],
    ) -> Result<BTreeMap<String, String>, RouxError> {
        query::resolve_titles(&self.cache, ids).await
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.lock().is_some()
    }

    /// Start the file watcher and a task applying its batches. Errors from a batch are logged
    /// and the task keeps going.
    pub fn start_watching(self: &Arc<Self>) -> Result<(), RouxError> {
        let mut slot = self.watcher.lock();
        if slot.is_some() {
            return Err(RouxError::Watch("already watching".to_string()));
        }
        let mut watcher = FileWatcher::new(WatchOptions {
            root: self.root.clone(),
            extensions: self.parsers.extensions().into_iter().collect(),
            excluded_dirs: self.excluded_dirs.clone(),
            debounce: self.config.debounce(),
            channel_capacity: self.config.watch_channel_capacity,
        });
        let mut batches = watcher.start()?;
        *slot = Some(watcher);
        drop(slot);

        let engine = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            while let Some(batch) = batches.recv().await {
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                match engine.apply_changes(batch).await {
                    Ok(report) => tracing::debug!("[SyncEngine] Watch batch applied: {report:?}"),
                    Err(e) => tracing::error!("[SyncEngine] Watch batch failed: {e}"),
                }
            }
            tracing::debug!("[SyncEngine] Watch consumer finished");
        });
        *self.consumer.lock() = Some(task);
        Ok(())
    }

    /// Stop the watcher and wait for the consumer to apply any batch it already received.
    /// Changes still inside the debounce window are discarded.
    pub async fn stop_watching(&self) {
        let watcher = self.watcher.lock().take();
        if let Some(mut watcher) = watcher {
            watcher.stop();
        }
        let task = self.consumer.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!("[SyncEngine] Watch consumer ended abnormally: {e}");
            }
        }
    }

    /// Handle to the running watcher, if any.
    pub fn watch_handle(&self) -> Option<WatchHandle> {
        self.watcher.lock().as_ref().map(FileWatcher::handle)
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        // The consumer only holds a weak reference, so it exits once the channel closes.
        if let Some(mut watcher) = self.watcher.lock().take() {
            watcher.stop();
        }
        self.consumer.lock().take();
    }
}
