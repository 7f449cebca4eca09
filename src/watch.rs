//! Filesystem watch pipeline.
//!
//! Watches the repository root recursively with `notify-debouncer-full`.
//! Each debounced batch is filtered through the repository globs and
//! coalesced to one change per path (the last event kind wins), then
//! applied in order by a tokio task:
//!
//! - create / modify → incremental sync of the path
//! - remove → delete of the path's document
//! - a directory that appeared, moved or vanished → every stored document
//!   under it whose file is gone is deleted, and every document file now
//!   under it is synced
//!
//! The kind only proposes the action. Whether the file exists when the
//! change is applied decides it, so a rename shows up as a delete of the
//! old path and a sync of the new one. Renaming a directory produces a
//! single event for the directory itself, which is why directories get
//! their own change kind.
//!
//! There is no pause and no hot reload of the root: [`WatchPipeline::stop`]
//! then [`WatchPipeline::start`] on a pipeline built for a new engine.

use anyhow::{bail, Context, Result};
use notify_debouncer_full::notify::event::ModifyKind;
use notify_debouncer_full::notify::{EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebounceEventResult, Debouncer, RecommendedCache};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::scan::{relative_str, scan_subtree, PathFilter};
use crate::sync::SyncEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Stopped,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Upsert,
    Remove,
    /// Reconcile everything stored or present under a directory path.
    Directory,
}

/// What applying a change did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOutcome {
    Synced,
    Deleted,
    /// Remove of a path with no stored document.
    Ignored,
    /// A directory change: files synced and documents deleted under it.
    Reconciled { synced: usize, deleted: usize },
}

/// One change per path, in first-seen order; the last kind wins.
pub fn coalesce<I>(changes: I) -> Vec<(String, ChangeKind)>
where
    I: IntoIterator<Item = (String, ChangeKind)>,
{
    let mut out: Vec<(String, ChangeKind)> = Vec::new();
    for (path, kind) in changes {
        match out.iter_mut().find(|(p, _)| *p == path) {
            Some(entry) => entry.1 = kind,
            None => out.push((path, kind)),
        }
    }
    out
}

/// Apply one coalesced change to the engine.
pub async fn apply_change(
    engine: &SyncEngine,
    path: &str,
    kind: ChangeKind,
) -> Result<ChangeOutcome> {
    if kind == ChangeKind::Directory {
        return reconcile_directory(engine, path).await;
    }

    let exists = tokio::fs::try_exists(engine.config().repo.root.join(path))
        .await
        .unwrap_or(false);

    if exists {
        if kind == ChangeKind::Remove {
            debug!(path, "removed path exists again, syncing");
        }
        engine.sync_one(path, None).await?;
        Ok(ChangeOutcome::Synced)
    } else if engine.delete_path(path).await? {
        Ok(ChangeOutcome::Deleted)
    } else {
        Ok(ChangeOutcome::Ignored)
    }
}

/// Bring the documents under `dir` in line with the filesystem. Failures
/// on single files are logged and skipped.
async fn reconcile_directory(engine: &SyncEngine, dir: &str) -> Result<ChangeOutcome> {
    let repo = &engine.config().repo;
    let prefix = format!("{}/", dir.trim_end_matches('/'));

    let mut deleted = 0;
    for doc in engine.store().list_documents().await? {
        if !doc.path.starts_with(&prefix) {
            continue;
        }
        let exists = tokio::fs::try_exists(repo.root.join(&doc.path))
            .await
            .unwrap_or(false);
        if !exists && engine.delete_path(&doc.path).await? {
            deleted += 1;
        }
    }

    let mut synced = 0;
    let is_dir = tokio::fs::metadata(repo.root.join(dir))
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false);
    if is_dir {
        let scan = scan_subtree(repo, engine.filter(), dir)?;
        for path in scan.paths {
            match engine.sync_one(&path, None).await {
                Ok(_) => synced += 1,
                Err(e) => warn!(path = %path, error = %format!("{:#}", e), "sync failed"),
            }
        }
    }

    Ok(ChangeOutcome::Reconciled { synced, deleted })
}

/// Change for an event path that is not itself a document. Only
/// directories and paths that moved or vanished can hide documents.
fn directory_change(kind: &EventKind, path: &Path, rel: &str, filter: &PathFilter) -> bool {
    // The second check catches excluded trees such as `.git` itself.
    if rel.is_empty() || filter.excludes(rel) || filter.excludes(&format!("{rel}/_")) {
        return false;
    }
    matches!(
        kind,
        EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_))
    ) || path.is_dir()
}

fn classify(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) | EventKind::Modify(_) => Some(ChangeKind::Upsert),
        EventKind::Remove(_) => Some(ChangeKind::Remove),
        _ => None,
    }
}

fn relative_to(roots: &[PathBuf], path: &Path) -> Option<String> {
    roots
        .iter()
        .find_map(|root| path.strip_prefix(root).ok())
        .and_then(relative_str)
}

struct Running {
    _debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
    worker: JoinHandle<()>,
}

/// Debounced watcher bound to one [`SyncEngine`].
pub struct WatchPipeline {
    engine: Arc<SyncEngine>,
    running: Option<Running>,
}

impl WatchPipeline {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self {
            engine,
            running: None,
        }
    }

    pub fn state(&self) -> WatchState {
        if self.running.is_some() {
            WatchState::Running
        } else {
            WatchState::Stopped
        }
    }

    /// Start watching. Fails when already running. Must be called inside a
    /// tokio runtime.
    pub fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            bail!("watch pipeline is already running");
        }

        let config = self.engine.config();
        let root = config.repo.root.clone();
        let canonical = std::fs::canonicalize(&root)
            .with_context(|| format!("Failed to resolve repository root: {}", root.display()))?;
        // Event paths are usually canonical, but not on every platform.
        let roots = vec![canonical.clone(), root.clone()];
        let filter: PathFilter = self.engine.filter().clone();

        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<(String, ChangeKind)>>();

        let mut debouncer = new_debouncer(
            Duration::from_millis(config.watch.debounce_ms),
            None,
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    let mut batch = Vec::new();
                    for event in events {
                        let Some(kind) = classify(&event.kind) else {
                            continue;
                        };
                        for path in &event.paths {
                            let Some(rel) = relative_to(&roots, path) else {
                                continue;
                            };
                            if filter.matches(&rel) {
                                batch.push((rel, kind));
                            } else if directory_change(&event.kind, path, &rel, &filter) {
                                batch.push((rel, ChangeKind::Directory));
                            }
                        }
                    }
                    if !batch.is_empty() {
                        // Receiver gone means the pipeline is stopping.
                        let _ = tx.send(coalesce(batch));
                    }
                }
                Err(errors) => {
                    for e in errors {
                        warn!(error = %e, "file watcher error");
                    }
                }
            },
        )?;
        debouncer.watch(&canonical, RecursiveMode::Recursive)?;

        let engine = self.engine.clone();
        let worker = tokio::spawn(async move {
            while let Some(batch) = rx.recv().await {
                for (path, kind) in batch {
                    match apply_change(&engine, &path, kind).await {
                        Ok(outcome) => debug!(path = %path, ?outcome, "change applied"),
                        Err(e) => {
                            warn!(path = %path, error = %format!("{:#}", e), "change failed")
                        }
                    }
                }
            }
        });

        self.running = Some(Running {
            _debouncer: debouncer,
            worker,
        });
        info!(root = %canonical.display(), "watch pipeline started");
        Ok(())
    }

    /// Stop watching. A no-op when already stopped.
    pub fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            running.worker.abort();
            info!("watch pipeline stopped");
        }
    }
}

impl Drop for WatchPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(path: &str, kind: ChangeKind) -> (String, ChangeKind) {
        (path.to_string(), kind)
    }

    #[test]
    fn test_coalesce_last_kind_wins() {
        let out = coalesce(vec![
            change("a.md", ChangeKind::Upsert),
            change("b.md", ChangeKind::Upsert),
            change("a.md", ChangeKind::Remove),
            change("b.md", ChangeKind::Upsert),
        ]);
        assert_eq!(
            out,
            vec![
                change("a.md", ChangeKind::Remove),
                change("b.md", ChangeKind::Upsert)
            ]
        );
    }

    #[test]
    fn test_classify() {
        use notify_debouncer_full::notify::event::{CreateKind, RemoveKind};
        assert_eq!(
            classify(&EventKind::Create(CreateKind::File)),
            Some(ChangeKind::Upsert)
        );
        assert_eq!(
            classify(&EventKind::Modify(ModifyKind::Any)),
            Some(ChangeKind::Upsert)
        );
        assert_eq!(
            classify(&EventKind::Remove(RemoveKind::File)),
            Some(ChangeKind::Remove)
        );
        assert_eq!(classify(&EventKind::Any), None);
    }

    #[test]
    fn test_relative_to_tries_each_root() {
        let roots = vec![PathBuf::from("/real/wiki"), PathBuf::from("/link/wiki")];
        assert_eq!(
            relative_to(&roots, Path::new("/link/wiki/docs/a.md")).as_deref(),
            Some("docs/a.md")
        );
        assert_eq!(relative_to(&roots, Path::new("/elsewhere/a.md")), None);
    }

    #[test]
    fn test_directory_change_candidates() {
        use crate::config::RepoConfig;
        use notify_debouncer_full::notify::event::{ModifyKind, RemoveKind, RenameMode};

        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("sub")).unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "n").unwrap();
        let repo = RepoConfig {
            root: tmp.path().to_path_buf(),
            include_globs: vec!["**/*.md".to_string()],
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        };
        let filter = PathFilter::new(&repo).unwrap();
        let renamed = EventKind::Modify(ModifyKind::Name(RenameMode::Both));
        let edited = EventKind::Modify(ModifyKind::Any);

        // A renamed directory no longer exists at its old path.
        assert!(directory_change(&renamed, &tmp.path().join("old"), "old", &filter));
        assert!(directory_change(
            &EventKind::Remove(RemoveKind::Folder),
            &tmp.path().join("gone"),
            "gone",
            &filter
        ));
        assert!(directory_change(&edited, &tmp.path().join("sub"), "sub", &filter));
        assert!(!directory_change(&edited, &tmp.path().join("notes.txt"), "notes.txt", &filter));
        assert!(!directory_change(&renamed, &tmp.path().join(".git/index.lock"), ".git/index.lock", &filter));
        assert!(!directory_change(&edited, &tmp.path().join(".git"), ".git", &filter));
    }
}
