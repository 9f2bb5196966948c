use crate::clock::now_millis;
use crate::model::ChangeKind;
use serde::Serialize;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

const SIZE_CONFIDENCE: f64 = 0.7;
const EXTENSION_CONFIDENCE: f64 = 0.15;
const FILE_NAME_CONFIDENCE: f64 = 0.1;
const MTIME_CONFIDENCE: f64 = 0.05;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RawEventKind {
    Add,
    Change,
    Delete,
}

/// Debounced notification for one path, relative to the watched root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawFsEvent {
    pub kind: RawEventKind,
    pub path: String,
    pub state: Option<FileState>,
}

impl RawFsEvent {
    pub fn add(path: impl Into<String>, state: Option<FileState>) -> Self {
        Self {
            kind: RawEventKind::Add,
            path: path.into(),
            state,
        }
    }

    pub fn change(path: impl Into<String>, state: Option<FileState>) -> Self {
        Self {
            kind: RawEventKind::Change,
            path: path.into(),
            state,
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            kind: RawEventKind::Delete,
            path: path.into(),
            state: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct FileState {
    pub size: u64,
    pub modified_ms: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectedChange {
    pub kind: ChangeKind,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_path: Option<String>,
    pub current: Option<FileState>,
    pub previous: Option<FileState>,
    /// Only set for renames, in `[0.7, 1.0]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub detected_at_ms: u64,
}

impl DetectedChange {
    fn new(kind: ChangeKind, path: String) -> Self {
        Self {
            kind,
            path,
            previous_path: None,
            current: None,
            previous: None,
            confidence: None,
            detected_at_ms: now_millis(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber = Arc<dyn Fn(&DetectedChange) -> anyhow::Result<()> + Send + Sync>;

struct PendingDelete {
    seq: u64,
    path: String,
    state: Option<FileState>,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct Inner {
    pending: Vec<PendingDelete>,
    states: HashMap<String, FileState>,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    next_seq: u64,
    next_subscriber: u64,
}

struct Shared {
    inner: Mutex<Inner>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Timer callback: the rename window for `seq` elapsed without a match.
    fn expire(&self, seq: u64) {
        let (change, subscribers) = {
            let mut inner = self.lock();
            let Some(idx) = inner.pending.iter().position(|p| p.seq == seq) else {
                return;
            };
            let pending = inner.pending.remove(idx);
            (deleted_change(pending), subscribers_of(&inner))
        };
        dispatch(&subscribers, &[change]);
    }
}

/// Turns debounced add/change/delete notifications into change records,
/// folding a delete and a matching add within the rename window into a
/// single rename.
///
/// Deletes are held back for the window; each pending delete owns a timer
/// task, so [`ChangeDetector::handle_event`] must run inside a Tokio runtime.
/// Subscribers run synchronously, outside the internal lock, in
/// registration order.
pub struct ChangeDetector {
    shared: Arc<Shared>,
    rename_window: Duration,
    track_state: bool,
}

impl ChangeDetector {
    pub fn new(rename_window: Duration, track_state: bool) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner::default()),
            }),
            rename_window,
            track_state,
        }
    }

    pub fn subscribe<F>(&self, subscriber: F) -> SubscriptionId
    where
        F: Fn(&DetectedChange) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let mut inner = self.shared.lock();
        let id = SubscriptionId(inner.next_subscriber);
        inner.next_subscriber += 1;
        inner.subscribers.push((id, Arc::new(subscriber)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.shared.lock();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|(existing, _)| *existing != id);
        inner.subscribers.len() != before
    }

    /// Seeds known file states, typically from an initial scan, so deletes of
    /// pre-existing files carry a size and can take part in renames.
    pub fn prime(&self, states: impl IntoIterator<Item = (String, FileState)>) {
        if !self.track_state {
            return;
        }
        self.shared.lock().states.extend(states);
    }

    pub fn pending_deletions(&self) -> usize {
        self.shared.lock().pending.len()
    }

    pub fn handle_event(&self, event: RawFsEvent) {
        let (changes, subscribers) = {
            let mut inner = self.shared.lock();
            let changes = match event.kind {
                RawEventKind::Add => vec![self.on_add(&mut inner, event)],
                RawEventKind::Change => vec![self.on_change(&mut inner, event)],
                RawEventKind::Delete => {
                    self.on_delete(&mut inner, event);
                    Vec::new()
                }
            };
            (changes, subscribers_of(&inner))
        };
        dispatch(&subscribers, &changes);
    }

    /// Emits every pending delete immediately. Used at shutdown.
    pub fn flush(&self) {
        let (changes, subscribers) = {
            let mut inner = self.shared.lock();
            let pending = std::mem::take(&mut inner.pending);
            let changes: Vec<_> = pending
                .into_iter()
                .map(|pending| {
                    pending.timer.abort();
                    deleted_change(pending)
                })
                .collect();
            (changes, subscribers_of(&inner))
        };
        if !changes.is_empty() {
            debug!(count = changes.len(), "flushed pending deletions");
        }
        dispatch(&subscribers, &changes);
    }

    fn on_add(&self, inner: &mut Inner, event: RawFsEvent) -> DetectedChange {
        let current = event.state;
        self.remember(inner, &event.path, current);

        if let Some(idx) = inner.pending.iter().position(|p| p.path == event.path) {
            let pending = inner.pending.remove(idx);
            pending.timer.abort();
            let mut change = DetectedChange::new(ChangeKind::Modified, event.path);
            change.previous = pending.state;
            change.current = current;
            return change;
        }

        if let Some((idx, confidence)) = best_rename_candidate(&inner.pending, &event.path, current)
        {
            let pending = inner.pending.remove(idx);
            pending.timer.abort();
            debug!(from = %pending.path, to = %event.path, confidence, "correlated rename");
            let mut change = DetectedChange::new(ChangeKind::Renamed, event.path);
            change.previous_path = Some(pending.path);
            change.previous = pending.state;
            change.current = current;
            change.confidence = Some(confidence);
            return change;
        }

        let mut change = DetectedChange::new(ChangeKind::Added, event.path);
        change.current = current;
        change
    }

    fn on_change(&self, inner: &mut Inner, event: RawFsEvent) -> DetectedChange {
        let previous = inner.states.get(&event.path).copied();
        self.remember(inner, &event.path, event.state);
        let mut change = DetectedChange::new(ChangeKind::Modified, event.path);
        change.previous = previous;
        change.current = event.state;
        change
    }

    fn on_delete(&self, inner: &mut Inner, event: RawFsEvent) {
        let tracked = inner.states.remove(&event.path);
        let state = event.state.or(tracked);
        // A second delete of the same path restarts its window.
        if let Some(idx) = inner.pending.iter().position(|p| p.path == event.path) {
            inner.pending.remove(idx).timer.abort();
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let window = self.rename_window;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if let Some(shared) = weak.upgrade() {
                shared.expire(seq);
            }
        });
        inner.pending.push(PendingDelete {
            seq,
            path: event.path,
            state,
            timer,
        });
    }

    fn remember(&self, inner: &mut Inner, path: &str, state: Option<FileState>) {
        if self.track_state
            && let Some(state) = state
        {
            inner.states.insert(path.to_string(), state);
        }
    }
}

impl Drop for ChangeDetector {
    fn drop(&mut self) {
        for pending in self.shared.lock().pending.drain(..) {
            pending.timer.abort();
        }
    }
}

/// Highest-confidence pending delete that could be the source of `path`.
/// Pending deletes are kept in arrival order, so ties go to the oldest.
fn best_rename_candidate(
    pending: &[PendingDelete],
    path: &str,
    current: Option<FileState>,
) -> Option<(usize, f64)> {
    let current = current?;
    let mut best: Option<(usize, f64)> = None;
    for (idx, candidate) in pending.iter().enumerate() {
        let Some(previous) = candidate.state else {
            continue;
        };
        let Some(confidence) = rename_confidence(&candidate.path, previous, path, current) else {
            continue;
        };
        if best.is_none_or(|(_, score)| confidence > score) {
            best = Some((idx, confidence));
        }
    }
    best
}

/// Confidence that `to` is `from` moved, or `None` when they cannot be the
/// same file. Size equality is required.
pub fn rename_confidence(from: &str, previous: FileState, to: &str, current: FileState) -> Option<f64> {
    if previous.size != current.size {
        return None;
    }
    let from = Path::new(from);
    let to = Path::new(to);
    let same_extension = from.extension() == to.extension();
    // Empty files all look alike.
    if current.size == 0 && !same_extension {
        return None;
    }
    let mut confidence = SIZE_CONFIDENCE;
    if same_extension {
        confidence += EXTENSION_CONFIDENCE;
    }
    if from.file_name() == to.file_name() {
        confidence += FILE_NAME_CONFIDENCE;
    }
    if previous.modified_ms.is_some() && previous.modified_ms == current.modified_ms {
        confidence += MTIME_CONFIDENCE;
    }
    Some(confidence.min(1.0))
}

fn deleted_change(pending: PendingDelete) -> DetectedChange {
    let mut change = DetectedChange::new(ChangeKind::Deleted, pending.path);
    change.previous = pending.state;
    change
}

fn subscribers_of(inner: &Inner) -> Vec<Subscriber> {
    inner
        .subscribers
        .iter()
        .map(|(_, subscriber)| Arc::clone(subscriber))
        .collect()
}

fn dispatch(subscribers: &[Subscriber], changes: &[DetectedChange]) {
    for change in changes {
        for subscriber in subscribers {
            match catch_unwind(AssertUnwindSafe(|| subscriber(change))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(path = %change.path, kind = change.kind.as_str(), error = %err, "change subscriber failed");
                }
                Err(_) => {
                    error!(path = %change.path, kind = change.kind.as_str(), "change subscriber panicked");
                }
            }
        }
    }
}
