//! Watch mode.
//!
//! A single debounced `notify` watcher observes the static roots of every
//! bound glob. Each change is routed to the bindings whose patterns match
//! the changed path. Every binding has its own worker with a
//! [`TriggerQueue`], so a long rebuild in one binding never delays another,
//! and changes arriving during a run collapse into one follow-up run.

mod queue;

use std::collections::HashSet;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;
use notify::event::{EventKind, ModifyKind};
use notify::RecursiveMode;
use notify_debouncer_full::{DebounceEventResult, new_debouncer};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::JoinSet;

use crate::error::WatchError;
use crate::io::TEMP_SUFFIX;
use crate::orchestrator::Orchestrator;
use crate::pipeline::MATCH_OPTIONS;
use crate::task::TaskRef;

pub use queue::{Batch, TriggerQueue};

const DEBOUNCE: Duration = Duration::from_millis(250);

/// Globs bound to the task they re-run.
#[derive(Debug, Clone)]
pub struct Binding {
    task: TaskRef,
    roots: Vec<Utf8PathBuf>,
    patterns: Vec<Pattern>,
}

impl Binding {
    /// Resolve `globs` against the filesystem. A glob whose static root does
    /// not exist yet cannot be watched and is skipped with a warning.
    pub fn new<I, S>(globs: I, task: impl Into<TaskRef>) -> Result<Self, WatchError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut roots = Vec::new();
        let mut patterns = Vec::new();

        for glob in globs {
            let glob = glob.as_ref();
            match resolve_watch_path(glob) {
                Ok((root, pattern)) => {
                    roots.push(root);
                    patterns.push(pattern);
                }
                Err(WatchError::Io(e)) => {
                    tracing::warn!(glob, "not watching, couldn't resolve its root: {e}");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(Self {
            task: task.into(),
            roots,
            patterns,
        })
    }

    pub fn task(&self) -> &TaskRef {
        &self.task
    }

    pub fn matches(&self, path: &Utf8Path) -> bool {
        if path.as_str().ends_with(TEMP_SUFFIX) {
            return false;
        }

        self.patterns
            .iter()
            .any(|pattern| pattern.matches_path_with(path.as_std_path(), MATCH_OPTIONS))
    }
}

/// Indexes of the bindings interested in `path`.
pub fn route<'a>(bindings: &'a [Binding], path: &'a Utf8Path) -> impl Iterator<Item = usize> + 'a {
    bindings
        .iter()
        .enumerate()
        .filter(move |(_, binding)| binding.matches(path))
        .map(|(i, _)| i)
}

fn is_change(kind: &EventKind) -> bool {
    match kind {
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => true,
        _ => false,
    }
}

/// Re-runs bound tasks when their files change.
pub struct Watcher {
    orchestrator: Orchestrator,
    bindings: Vec<Binding>,
}

impl Watcher {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator,
            bindings: Vec::new(),
        }
    }

    /// Re-run `task` whenever a file matching one of `globs` is created,
    /// modified or removed.
    pub fn bind<I, S>(&mut self, globs: I, task: impl Into<TaskRef>) -> Result<(), WatchError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let binding = Binding::new(globs, task)?;
        tracing::debug!(task = %binding.task, patterns = binding.patterns.len(), "bound");
        self.bindings.push(binding);
        Ok(())
    }

    /// Watch until the orchestrator is shut down. Runs already in progress
    /// are allowed to finish.
    pub async fn run(self) -> Result<(), WatchError> {
        let Watcher {
            orchestrator,
            bindings,
        } = self;

        let (tx, mut rx) = unbounded_channel();
        let mut debouncer = new_debouncer(DEBOUNCE, None, move |result: DebounceEventResult| {
            let _ = tx.send(result);
        })?;

        let roots = bindings.iter().flat_map(|b| b.roots.iter().cloned()).collect();
        for root in collapse_watch_paths(roots) {
            tracing::info!("watching {root}");
            debouncer.watch(&root, RecursiveMode::Recursive)?;
        }

        let mut workers = JoinSet::new();
        let mut senders = Vec::with_capacity(bindings.len());
        for binding in &bindings {
            let (worker_tx, worker_rx) = unbounded_channel();
            workers.spawn(worker(orchestrator.clone(), binding.task.clone(), worker_rx));
            senders.push(worker_tx);
        }

        let mut shutdown = orchestrator.shutdown_signal();
        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                received = rx.recv() => match received {
                    Some(Ok(events)) => dispatch(&bindings, &senders, events),
                    Some(Err(errors)) => {
                        for e in errors {
                            tracing::error!("watch error: {e}");
                        }
                    }
                    None => break,
                },
            }
        }

        tracing::info!("stopped watching");
        drop(debouncer);
        drop(senders);
        while workers.join_next().await.is_some() {}

        Ok(())
    }
}

fn dispatch(
    bindings: &[Binding],
    senders: &[UnboundedSender<Utf8PathBuf>],
    events: Vec<notify_debouncer_full::DebouncedEvent>,
) {
    for event in events {
        if !is_change(&event.kind) {
            continue;
        }

        for path in &event.paths {
            let Some(path) = Utf8Path::from_path(path) else {
                continue;
            };

            for i in route(bindings, path) {
                let _ = senders[i].send(path.to_path_buf());
            }
        }
    }
}

/// Runs one binding's task for every batch of changes.
async fn worker(orchestrator: Orchestrator, task: TaskRef, mut rx: UnboundedReceiver<Utf8PathBuf>) {
    let mut queue = TriggerQueue::default();

    while let Some(path) = rx.recv().await {
        queue.record(path);
        while let Ok(path) = rx.try_recv() {
            queue.record(path);
        }

        let batch = queue.drain();
        tracing::info!(task = %task, "changed: {}", batch.describe());
        orchestrator.run(task.clone()).await;
    }
}

/// Splits a glob string into a canonicalized static root path (for
/// watching) and a compiled absolute Pattern (for matching).
pub fn resolve_watch_path(glob: impl AsRef<str>) -> Result<(Utf8PathBuf, Pattern), WatchError> {
    let path = Utf8Path::new(glob.as_ref());

    let components: Vec<_> = path.components().collect();
    let split = components
        .iter()
        .position(|c| c.as_str().contains(['*', '?', '[']))
        .unwrap_or(components.len());

    let root: Utf8PathBuf = components.iter().take(split).collect();
    let suffix: Utf8PathBuf = components.iter().skip(split).collect();

    let root = root.canonicalize_utf8()?;

    // A concrete file is watched through its parent so that atomic
    // replacements are seen.
    let (watch_root, pattern) = if suffix.as_str().is_empty() && root.is_file() {
        let parent = root.parent().unwrap_or(&root).to_path_buf();
        (parent, root)
    } else {
        let pattern = root.join(&suffix);
        (root, pattern)
    };

    let pattern = Pattern::new(pattern.as_str())?;

    Ok((watch_root, pattern))
}

/// Reduces a set of paths to the minimal set of watch roots.
///
/// The watcher is recursive, so `/a/b` is covered by `/a`.
fn collapse_watch_paths(paths: HashSet<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    let mut paths: Vec<_> = paths.into_iter().collect();
    paths.sort();

    let mut filtered: Vec<Utf8PathBuf> = Vec::new();
    for path in paths {
        if let Some(last) = filtered.last()
            && path.starts_with(last)
        {
            continue;
        }
        filtered.push(path);
    }

    filtered
}
