use crate::changes::{ChangeDetector, FileState, RawEventKind, RawFsEvent};
use crate::config::WatchedFolderConfig;
use globset::{Glob, GlobSet, GlobSetBuilder};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const ALWAYS_EXCLUDED: &str = "**/.git/**";
const MIN_TICK: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("invalid glob pattern {pattern}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },
    #[error("watched folder {0} does not exist")]
    MissingRoot(PathBuf),
    #[error("watch {path}: {source}")]
    Notify {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// Include/exclude globs over root-relative, `/`-separated paths.
#[derive(Debug, Clone)]
pub struct PathFilter {
    include: GlobSet,
    exclude: GlobSet,
}

impl PathFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self, WatchError> {
        let include = if include.is_empty() {
            build_globset(&["**".to_string()])?
        } else {
            build_globset(include)?
        };
        let mut excludes = exclude.to_vec();
        excludes.push(ALWAYS_EXCLUDED.to_string());
        Ok(Self {
            include,
            exclude: build_globset(&excludes)?,
        })
    }

    pub fn matches(&self, relative: &str) -> bool {
        self.include.is_match(relative) && !self.exclude.is_match(relative)
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, WatchError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|source| WatchError::Pattern {
            pattern: pattern.clone(),
            source,
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|source| WatchError::Pattern {
        pattern: patterns.join(","),
        source,
    })
}

/// Combines a queued event with a newer one for the same path. `None` means
/// the two cancel out.
fn coalesce(previous: RawEventKind, next: RawEventKind) -> Option<RawEventKind> {
    match (previous, next) {
        (RawEventKind::Add, RawEventKind::Change) => Some(RawEventKind::Add),
        (RawEventKind::Add, RawEventKind::Delete) => None,
        (RawEventKind::Delete, RawEventKind::Add) => Some(RawEventKind::Change),
        (_, next) => Some(next),
    }
}

struct PendingEvent {
    kind: RawEventKind,
    last_seen: Instant,
    seq: u64,
}

/// Per-path debounce queue.
#[derive(Default)]
struct PendingEvents {
    by_path: HashMap<String, PendingEvent>,
    next_seq: u64,
}

impl PendingEvents {
    fn push(&mut self, path: String, kind: RawEventKind, now: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        match self.by_path.remove(&path) {
            Some(existing) => {
                if let Some(kind) = coalesce(existing.kind, kind) {
                    self.by_path.insert(
                        path,
                        PendingEvent {
                            kind,
                            last_seen: now,
                            seq: existing.seq,
                        },
                    );
                }
            }
            None => {
                self.by_path.insert(
                    path,
                    PendingEvent {
                        kind,
                        last_seen: now,
                        seq,
                    },
                );
            }
        }
    }

    /// Events quiet for at least `debounce`, in first-seen order.
    fn drain_ready(&mut self, now: Instant, debounce: Duration) -> Vec<(String, RawEventKind)> {
        let ready: Vec<String> = self
            .by_path
            .iter()
            .filter(|(_, event)| now.saturating_duration_since(event.last_seen) >= debounce)
            .map(|(path, _)| path.clone())
            .collect();
        self.take(ready)
    }

    fn drain_all(&mut self) -> Vec<(String, RawEventKind)> {
        let all: Vec<String> = self.by_path.keys().cloned().collect();
        self.take(all)
    }

    fn take(&mut self, paths: Vec<String>) -> Vec<(String, RawEventKind)> {
        let mut taken: Vec<_> = paths
            .into_iter()
            .filter_map(|path| {
                self.by_path
                    .remove(&path)
                    .map(|event| (event.seq, path, event.kind))
            })
            .collect();
        taken.sort_by_key(|(seq, _, _)| *seq);
        taken
            .into_iter()
            .map(|(_, path, kind)| (path, kind))
            .collect()
    }

    fn len(&self) -> usize {
        self.by_path.len()
    }
}

/// Feeds filesystem activity under one watched folder into a
/// [`ChangeDetector`] as debounced, filtered, root-relative events.
pub struct FolderWatcher {
    config: WatchedFolderConfig,
    root: PathBuf,
    filter: PathFilter,
    known_dirs: HashSet<String>,
}

impl FolderWatcher {
    pub fn new(config: WatchedFolderConfig) -> Result<Self, WatchError> {
        let root = fs::canonicalize(&config.root)
            .map_err(|_| WatchError::MissingRoot(config.root.clone()))?;
        let filter = PathFilter::new(&config.include, &config.exclude)?;
        Ok(Self {
            config,
            root,
            filter,
            known_dirs: HashSet::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Walks the folder and returns the state of every matching file.
    pub fn scan(&mut self) -> Vec<(String, FileState)> {
        let mut states = Vec::new();
        let walker = WalkDir::new(&self.root)
            .min_depth(1)
            .into_iter()
            .filter_entry(|entry| !(entry.file_type().is_dir() && entry.file_name() == ".git"));
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(folder = %self.config.id, error = %err, "skipping unreadable entry");
                    continue;
                }
            };
            let Some(relative) = self.relative(entry.path()) else {
                continue;
            };
            if entry.file_type().is_dir() {
                self.known_dirs.insert(relative);
                continue;
            }
            if !entry.file_type().is_file() || !self.filter.matches(&relative) {
                continue;
            }
            if let Ok(metadata) = entry.metadata() {
                states.push((relative, file_state(&metadata)));
            }
        }
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    /// Runs until `shutdown` resolves, then emits whatever is still queued
    /// and flushes the detector's pending deletions.
    pub async fn run(
        mut self,
        detector: Arc<ChangeDetector>,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), WatchError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut watcher = notify::recommended_watcher(move |event| {
            if tx.send(event).is_err() {
                debug!("watch event dropped because the receiver is closed");
            }
        })
        .map_err(|source| WatchError::Notify {
            path: self.root.clone(),
            source,
        })?;
        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(|source| WatchError::Notify {
                path: self.root.clone(),
                source,
            })?;

        let initial = self.scan();
        info!(
            folder = %self.config.id,
            root = %self.root.display(),
            files = initial.len(),
            "watching folder"
        );
        detector.prime(initial);

        let debounce = self.config.debounce();
        let mut tick = tokio::time::interval((debounce / 2).max(MIN_TICK));
        let mut pending = PendingEvents::default();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                received = rx.recv() => match received {
                    Some(Ok(event)) => {
                        let now = Instant::now();
                        for (kind, path) in map_notify_event(event) {
                            if let Some(relative) = self.accept(&path, kind) {
                                pending.push(relative, kind, now);
                            }
                        }
                    }
                    Some(Err(err)) => {
                        warn!(folder = %self.config.id, error = %err, "watch error");
                    }
                    None => break,
                },
                _ = tick.tick() => {
                    for (path, kind) in pending.drain_ready(Instant::now(), debounce) {
                        detector.handle_event(self.raw_event(path, kind));
                    }
                }
            }
        }

        debug!(folder = %self.config.id, queued = pending.len(), "watcher stopping");
        for (path, kind) in pending.drain_all() {
            detector.handle_event(self.raw_event(path, kind));
        }
        detector.flush();
        Ok(())
    }

    /// Root-relative path for an event worth queueing; directories and
    /// filtered paths yield `None`.
    fn accept(&mut self, path: &Path, kind: RawEventKind) -> Option<String> {
        let relative = self.relative(path)?;
        match kind {
            RawEventKind::Delete => {
                if self.known_dirs.remove(&relative) {
                    return None;
                }
            }
            RawEventKind::Add | RawEventKind::Change => {
                if path.is_dir() {
                    self.known_dirs.insert(relative);
                    return None;
                }
            }
        }
        self.filter.matches(&relative).then_some(relative)
    }

    fn raw_event(&self, path: String, kind: RawEventKind) -> RawFsEvent {
        let state = match kind {
            RawEventKind::Delete => None,
            _ => fs::metadata(self.root.join(&path))
                .ok()
                .map(|metadata| file_state(&metadata)),
        };
        RawFsEvent { kind, path, state }
    }

    fn relative(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<_> = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect();
        if parts.is_empty() {
            return None;
        }
        Some(parts.join("/"))
    }
}

fn file_state(metadata: &fs::Metadata) -> FileState {
    FileState {
        size: metadata.len(),
        modified_ms: metadata
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map(|elapsed| elapsed.as_millis() as u64),
    }
}

fn map_notify_event(event: Event) -> Vec<(RawEventKind, PathBuf)> {
    let Event { kind, paths, .. } = event;
    match kind {
        EventKind::Create(_) => tag(paths, RawEventKind::Add),
        EventKind::Remove(_) => tag(paths, RawEventKind::Delete),
        EventKind::Modify(ModifyKind::Name(mode)) => map_rename(paths, mode),
        EventKind::Modify(_) => tag(paths, RawEventKind::Change),
        _ => Vec::new(),
    }
}

fn map_rename(paths: Vec<PathBuf>, mode: RenameMode) -> Vec<(RawEventKind, PathBuf)> {
    match mode {
        RenameMode::Both => {
            let mut events = Vec::with_capacity(2);
            if let Some(from) = paths.first() {
                events.push((RawEventKind::Delete, from.clone()));
            }
            if let Some(to) = paths.get(1) {
                events.push((RawEventKind::Add, to.clone()));
            }
            events
        }
        RenameMode::From => tag(paths, RawEventKind::Delete),
        RenameMode::To => tag(paths, RawEventKind::Add),
        RenameMode::Any | RenameMode::Other => paths
            .into_iter()
            .map(|path| {
                let kind = if fs::symlink_metadata(&path).is_ok() {
                    RawEventKind::Add
                } else {
                    RawEventKind::Delete
                };
                (kind, path)
            })
            .collect(),
    }
}

fn tag(paths: Vec<PathBuf>, kind: RawEventKind) -> Vec<(RawEventKind, PathBuf)> {
    paths.into_iter().map(|path| (kind, path)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};
    use tempfile::TempDir;

    fn folder(root: &Path, include: &[&str], exclude: &[&str]) -> WatchedFolderConfig {
        WatchedFolderConfig {
            id: "notes".into(),
            root: root.to_path_buf(),
            include: include.iter().map(|s| s.to_string()).collect(),
            exclude: exclude.iter().map(|s| s.to_string()).collect(),
            debounce_ms: 100,
        }
    }

    #[test]
    fn default_filter_includes_everything_but_git() {
        let filter = PathFilter::new(&[], &[]).unwrap();
        assert!(filter.matches("README.md"));
        assert!(filter.matches("deep/nested/file.rs"));
        assert!(!filter.matches(".git/config"));
        assert!(!filter.matches("vendor/.git/HEAD"));
    }

    #[test]
    fn include_and_exclude_globs_combine() {
        let filter =
            PathFilter::new(&["**/*.md".to_string()], &["drafts/**".to_string()]).unwrap();
        assert!(filter.matches("guide/intro.md"));
        assert!(filter.matches("intro.md"));
        assert!(!filter.matches("src/main.rs"));
        assert!(!filter.matches("drafts/todo.md"));
    }

    #[test]
    fn invalid_glob_is_reported() {
        let err = PathFilter::new(&["[".to_string()], &[]).unwrap_err();
        assert!(matches!(err, WatchError::Pattern { .. }));
    }

    #[test]
    fn coalescing_rules() {
        use RawEventKind::*;
        assert_eq!(coalesce(Add, Change), Some(Add));
        assert_eq!(coalesce(Add, Delete), None);
        assert_eq!(coalesce(Delete, Add), Some(Change));
        assert_eq!(coalesce(Change, Delete), Some(Delete));
        assert_eq!(coalesce(Change, Change), Some(Change));
    }

    #[test]
    fn pending_events_wait_for_quiet_period() {
        let start = Instant::now();
        let debounce = Duration::from_millis(100);
        let mut pending = PendingEvents::default();
        pending.push("a.md".into(), RawEventKind::Add, start);
        pending.push("b.md".into(), RawEventKind::Change, start);
        pending.push("a.md".into(), RawEventKind::Change, start + Duration::from_millis(80));
        pending.push("c.md".into(), RawEventKind::Add, start);
        pending.push("c.md".into(), RawEventKind::Delete, start + Duration::from_millis(10));

        let ready = pending.drain_ready(start + Duration::from_millis(120), debounce);
        assert_eq!(ready, vec![("b.md".to_string(), RawEventKind::Change)]);
        let ready = pending.drain_ready(start + Duration::from_millis(200), debounce);
        assert_eq!(ready, vec![("a.md".to_string(), RawEventKind::Add)]);
        assert_eq!(pending.len(), 0);
    }

    #[test]
    fn notify_events_map_to_raw_kinds() {
        let create = Event::new(EventKind::Create(CreateKind::File)).add_path("/r/a.md".into());
        assert_eq!(
            map_notify_event(create),
            vec![(RawEventKind::Add, PathBuf::from("/r/a.md"))]
        );
        let write = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path("/r/a.md".into());
        assert_eq!(map_notify_event(write)[0].0, RawEventKind::Change);
        let remove = Event::new(EventKind::Remove(RemoveKind::File)).add_path("/r/a.md".into());
        assert_eq!(map_notify_event(remove)[0].0, RawEventKind::Delete);
        let rename = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path("/r/a.md".into())
            .add_path("/r/b.md".into());
        assert_eq!(
            map_notify_event(rename),
            vec![
                (RawEventKind::Delete, PathBuf::from("/r/a.md")),
                (RawEventKind::Add, PathBuf::from("/r/b.md")),
            ]
        );
    }

    #[test]
    fn scan_reports_relative_filtered_files() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("guide")).unwrap();
        fs::create_dir_all(tmp.path().join(".git")).unwrap();
        fs::write(tmp.path().join("guide/intro.md"), "hello").unwrap();
        fs::write(tmp.path().join("notes.txt"), "skip").unwrap();
        fs::write(tmp.path().join(".git/config"), "[core]").unwrap();

        let mut watcher = FolderWatcher::new(folder(tmp.path(), &["**/*.md"], &[])).unwrap();
        let states = watcher.scan();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].0, "guide/intro.md");
        assert_eq!(states[0].1.size, 5);
        assert!(watcher.known_dirs.contains("guide"));
        assert!(!watcher.known_dirs.contains(".git"));
    }

    #[test]
    fn scan_walks_nested_dirs_and_applies_excludes() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("a/b/c")).unwrap();
        fs::create_dir_all(tmp.path().join("drafts")).unwrap();
        fs::write(tmp.path().join("a/b/c/deep.md"), "deep").unwrap();
        fs::write(tmp.path().join("drafts/wip.md"), "wip").unwrap();
        fs::write(tmp.path().join("top.md"), "top").unwrap();

        let mut watcher =
            FolderWatcher::new(folder(tmp.path(), &["**/*.md"], &["drafts/**"])).unwrap();
        let paths: Vec<_> = watcher.scan().into_iter().map(|(path, _)| path).collect();
        assert_eq!(paths, vec!["a/b/c/deep.md".to_string(), "top.md".to_string()]);
        for dir in ["a", "a/b", "a/b/c", "drafts"] {
            assert!(watcher.known_dirs.contains(dir), "{dir}");
        }
    }

    #[test]
    fn directories_are_not_queued() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("sub")).unwrap();
        let mut watcher = FolderWatcher::new(folder(tmp.path(), &[], &[])).unwrap();
        let root = watcher.root().to_path_buf();
        assert_eq!(watcher.accept(&root.join("sub"), RawEventKind::Add), None);
        assert_eq!(watcher.accept(&root.join("sub"), RawEventKind::Delete), None);
        assert_eq!(
            watcher.accept(&root.join("sub/file.md"), RawEventKind::Delete),
            Some("sub/file.md".to_string())
        );
    }

    #[test]
    fn missing_root_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let err = FolderWatcher::new(folder(&tmp.path().join("nope"), &[], &[])).err();
        assert!(matches!(err, Some(WatchError::MissingRoot(_))));
    }
}
