//! Debounced file watching.
//!
//! A [`FileWatcher`] turns raw `notify` events under the source root into [`ChangeBatch`]es:
//!
//! 1. The notify callback (running on notify's own thread) filters each path by extension,
//!    excluded directory and hidden file name, converts it to a root-relative reference and
//!    folds it into the pending set with [`PendingChanges::record`].
//! 2. Every accepted event pings the debounce task, which restarts its timer.
//! 3. When the timer expires the pending set is swapped out and sent, if non-empty, on a bounded
//!    channel. A slow consumer therefore applies backpressure to the debounce task, never to
//!    notify.
//!
//! [`WatchHandle::pause`] suspends intake without discarding what is already pending; the sync
//! engine pauses around its own writes so they do not echo back as changes. [`FileWatcher::stop`]
//! discards pending changes.

use crate::{
    error::RouxError,
    event::{ChangeBatch, ChangeKind, PendingChanges},
    paths::{is_excluded, path_to_reference},
};
use notify::{
    event::{ModifyKind, RenameMode},
    Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use parking_lot::Mutex;
use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
    time::Instant,
};

#[derive(Debug, Clone, PartialEq)]
pub struct WatchOptions {
    pub root: PathBuf,
    /// Lowercased, without the dot.
    pub extensions: BTreeSet<String>,
    pub excluded_dirs: BTreeSet<String>,
    pub debounce: Duration,
    pub channel_capacity: usize,
}

#[derive(Debug)]
struct WatchShared {
    options: WatchOptions,
    paused: AtomicBool,
    pending: Mutex<PendingChanges>,
    ticks: Mutex<Option<UnboundedSender<()>>>,
}

/// Cheap handle for pausing the watcher and feeding it events.
#[derive(Debug, Clone)]
pub struct WatchHandle {
    shared: Arc<WatchShared>,
}

impl WatchHandle {
    pub fn pause(&self) {
        tracing::debug!("[FileWatcher] Pausing intake");
        self.shared.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        tracing::debug!("[FileWatcher] Resuming intake");
        self.shared.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    pub fn pending_len(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Root-relative reference for `path` if the watcher cares about it.
    fn accept(&self, path: &Path) -> Option<String> {
        let options = &self.shared.options;
        let rel = if path.is_absolute() {
            path.strip_prefix(&options.root).ok()?
        } else {
            path
        };
        let file_name = rel.file_name()?.to_string_lossy();
        if file_name.starts_with('.') {
            return None;
        }
        let ext = rel.extension()?.to_string_lossy().to_lowercase();
        if !options.extensions.contains(&ext) || is_excluded(rel, &options.excluded_dirs) {
            return None;
        }
        Some(path_to_reference(rel))
    }

    /// Fold one event into the pending set and restart the debounce timer. Returns false if the
    /// event was filtered out or intake is paused or stopped.
    pub fn record(&self, path: &Path, kind: ChangeKind) -> bool {
        if self.is_paused() {
            tracing::trace!("[FileWatcher] Paused, ignoring {kind} {path:?}");
            return false;
        }
        let Some(rel) = self.accept(path) else {
            return false;
        };
        let ticks = self.shared.ticks.lock();
        let Some(ticks) = ticks.as_ref() else {
            return false;
        };
        tracing::trace!("[FileWatcher] {kind} {rel}");
        self.shared.pending.lock().record(rel, kind);
        ticks.send(()).is_ok()
    }

    fn handle_event(&self, event: Event) {
        let mut changes = Vec::with_capacity(event.paths.len());
        match event.kind {
            EventKind::Create(_) => {
                changes.extend(event.paths.iter().map(|p| (p, ChangeKind::Added)));
            }
            EventKind::Remove(_) => {
                changes.extend(event.paths.iter().map(|p| (p, ChangeKind::Removed)));
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                changes.extend(event.paths.iter().map(|p| (p, ChangeKind::Removed)));
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                changes.extend(event.paths.iter().map(|p| (p, ChangeKind::Added)));
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
                changes.push((&event.paths[0], ChangeKind::Removed));
                changes.push((&event.paths[1], ChangeKind::Added));
            }
            EventKind::Modify(ModifyKind::Name(_)) => {
                changes.extend(event.paths.iter().map(|p| {
                    let kind = if p.exists() {
                        ChangeKind::Added
                    } else {
                        ChangeKind::Removed
                    };
                    (p, kind)
                }));
            }
            EventKind::Modify(_) => {
                changes.extend(event.paths.iter().map(|p| (p, ChangeKind::Changed)));
            }
            EventKind::Access(_) | EventKind::Any | EventKind::Other => {}
        }
        for (path, kind) in changes {
            self.record(path, kind);
        }
    }
}

/// Sleep until `debounce` has passed without a new tick, then flush the pending set.
async fn debounce_loop(
    handle: WatchHandle,
    mut ticks: UnboundedReceiver<()>,
    batches: mpsc::Sender<ChangeBatch>,
    debounce: Duration,
) {
    loop {
        if ticks.recv().await.is_none() {
            return;
        }
        let timer = tokio::time::sleep(debounce);
        tokio::pin!(timer);
        loop {
            tokio::select! {
                tick = ticks.recv() => match tick {
                    Some(()) => timer.as_mut().reset(Instant::now() + debounce),
                    None => return,
                },
                _ = &mut timer => break,
            }
        }
        let batch = handle.shared.pending.lock().take();
        if batch.is_empty() {
            continue;
        }
        tracing::debug!("[FileWatcher] Flushing {} coalesced change(s)", batch.len());
        if batches.send(batch).await.is_err() {
            tracing::debug!("[FileWatcher] Batch receiver dropped, stopping debounce task");
            return;
        }
    }
}

pub struct FileWatcher {
    handle: WatchHandle,
    watcher: Option<RecommendedWatcher>,
    task: Option<JoinHandle<()>>,
}

impl FileWatcher {
    pub fn new(mut options: WatchOptions) -> Self {
        if let Ok(root) = std::fs::canonicalize(&options.root) {
            options.root = root;
        }
        options.extensions = options
            .extensions
            .iter()
            .map(|ext| ext.trim_start_matches('.').to_lowercase())
            .collect();
        FileWatcher {
            handle: WatchHandle {
                shared: Arc::new(WatchShared {
                    options,
                    paused: AtomicBool::new(false),
                    pending: Mutex::new(PendingChanges::new()),
                    ticks: Mutex::new(None),
                }),
            },
            watcher: None,
            task: None,
        }
    }

    pub fn handle(&self) -> WatchHandle {
        self.handle.clone()
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Start watching the root recursively. Must be called inside a tokio runtime. Coalesced
    /// batches arrive on the returned receiver.
    #[tracing::instrument(skip_all)]
    pub fn start(&mut self) -> Result<mpsc::Receiver<ChangeBatch>, RouxError> {
        if self.is_running() {
            return Err(RouxError::Watch("watcher already started".to_string()));
        }
        let options = self.handle.shared.options.clone();
        let (tick_tx, tick_rx) = mpsc::unbounded_channel();
        let (batch_tx, batch_rx) = mpsc::channel(options.channel_capacity.max(1));

        let callback_handle = self.handle.clone();
        let mut watcher =
            RecommendedWatcher::new(
                move |result: notify::Result<Event>| match result {
                    Ok(event) => callback_handle.handle_event(event),
                    Err(e) => {
                        let err = RouxError::from(e);
                        if err.is_descriptor_exhaustion() {
                            tracing::error!(
                                "[FileWatcher] Out of watch descriptors, changes may be missed: {err}"
                            );
                        } else {
                            tracing::error!("[FileWatcher] Watch error: {err}");
                        }
                    }
                },
                notify::Config::default(),
            )?;
        if let Err(e) = watcher.watch(&options.root, RecursiveMode::Recursive) {
            let err = RouxError::from(e);
            if err.is_descriptor_exhaustion() {
                tracing::error!(
                    "[FileWatcher] Could not watch {:?}, descriptor limit reached: {err}",
                    options.root
                );
            }
            return Err(err);
        }

        *self.handle.shared.ticks.lock() = Some(tick_tx);
        self.task = Some(tokio::spawn(debounce_loop(
            self.handle.clone(),
            tick_rx,
            batch_tx,
            options.debounce,
        )));
        self.watcher = Some(watcher);
        tracing::info!("[FileWatcher] Watching {:?}", options.root);
        Ok(batch_rx)
    }

    /// Stop watching and discard anything pending.
    pub fn stop(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            if let Err(e) = watcher.unwatch(&self.handle.shared.options.root) {
                tracing::debug!("[FileWatcher] Unwatch failed: {e}");
            }
        }
        self.handle.shared.ticks.lock().take();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.handle.shared.pending.lock().clear();
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
