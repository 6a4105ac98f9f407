//! Watch mode re-runs tasks when their sources change:
//!
//! 1. **Bindings** associate glob patterns, relative to the source root, with
//!    the name of the task they trigger.
//! 2. **Event source**: any iterator of change batches. The file system one
//!    uses `notify` with a debounce window, so a burst of saves arrives as one
//!    batch.
//! 3. **The loop** consumes batches one at a time and runs each matching
//!    task once per batch. Runs never overlap: a change arriving while a task
//!    is running is queued behind it.

use std::borrow::Cow;
use std::collections::HashSet;

use camino::{Utf8Path, Utf8PathBuf};
use glob::{MatchOptions, Pattern, PatternError};

use crate::error::WatchError;
use crate::orchestrator::Context;

const MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Glob patterns whose matches re-run a task.
#[derive(Debug, Clone)]
pub struct Binding {
    task: Cow<'static, str>,
    patterns: Vec<Pattern>,
}

impl Binding {
    pub fn new(task: impl Into<Cow<'static, str>>, patterns: &[&str]) -> Result<Self, PatternError> {
        Ok(Self {
            task: task.into(),
            patterns: patterns
                .iter()
                .map(|pattern| Pattern::new(pattern))
                .collect::<Result<_, _>>()?,
        })
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    /// Whether a path relative to the source root belongs to this binding.
    pub fn matches(&self, path: &Utf8Path) -> bool {
        self.patterns
            .iter()
            .any(|pattern| pattern.matches_with(path.as_str(), MATCH))
    }
}

/// Names of the tasks triggered by a batch of changed paths, in binding
/// order, each at most once.
pub fn dispatch<'a>(bindings: &'a [Binding], changed: &[Utf8PathBuf]) -> Vec<&'a str> {
    let mut tasks = Vec::new();

    for binding in bindings {
        if tasks.contains(&binding.task()) {
            continue;
        }

        if changed.iter().any(|path| binding.matches(path)) {
            tasks.push(binding.task());
        }
    }

    tasks
}

/// Static directory part of a glob pattern, e.g. `scss` for `scss/**/*.scss`.
fn static_root(pattern: &str) -> Utf8PathBuf {
    let path = Utf8Path::new(pattern);
    let components: Vec<_> = path.components().collect();

    match components
        .iter()
        .position(|c| c.as_str().contains(['*', '?', '[']))
    {
        Some(index) => components.iter().take(index).collect(),
        // a concrete file, watch its directory
        None => path.parent().map(Utf8Path::to_path_buf).unwrap_or_default(),
    }
}

/// Reduces a set of paths to the minimal set of watch roots.
///
/// If we watch `/a` and `/a/b`, we only need to watch `/a` because
/// the watcher is recursive.
fn collapse_watch_paths(paths: HashSet<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    let mut paths: Vec<_> = paths.into_iter().collect();
    paths.sort();

    let mut filtered = Vec::new();
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

/// Directories, relative to the source root, that cover every binding.
pub fn watch_roots(bindings: &[Binding]) -> Vec<Utf8PathBuf> {
    let roots = bindings
        .iter()
        .flat_map(|binding| binding.patterns.iter())
        .map(|pattern| static_root(pattern.as_str()))
        .collect();

    collapse_watch_paths(roots)
}

/// One batch of changed paths, relative to the source root.
pub type Batch = Result<Vec<Utf8PathBuf>, WatchError>;

/// A lazy sequence of change batches. The loop ends when the source does.
pub trait EventSource: Iterator<Item = Batch> {}

impl<I> EventSource for I where I: Iterator<Item = Batch> {}

/// Runs the bound tasks for every batch until the event source ends.
///
/// A failing task is reported and the loop keeps going; the affected
/// output stays stale until the next successful run.
pub fn run(ctx: &Context<'_>, bindings: &[Binding], events: impl EventSource) {
    tracing::info!("watching for changes...");

    for batch in events {
        let changed = match batch {
            Ok(changed) => changed,
            Err(e) => {
                tracing::error!("watch error: {e}");
                continue;
            }
        };

        let tasks = dispatch(bindings, &changed);
        if tasks.is_empty() {
            tracing::debug!("ignored changes: {changed:?}");
            continue;
        }

        tracing::info!("change detected, running {}", tasks.join(", "));

        for task in tasks {
            if let Err(e) = ctx.run(task) {
                ctx.report(&e);
            }
        }
    }
}

#[cfg(feature = "live")]
pub use fs::FsEvents;

#[cfg(feature = "live")]
mod fs {
    use std::sync::mpsc::{Receiver, channel};
    use std::time::Duration;

    use camino::{Utf8Path, Utf8PathBuf};
    use notify::{RecommendedWatcher, RecursiveMode};
    use notify_debouncer_full::{
        DebounceEventResult, DebouncedEvent, Debouncer, RecommendedCache, new_debouncer,
    };

    use super::{Batch, Binding, watch_roots};
    use crate::error::WatchError;

    const DEBOUNCE: Duration = Duration::from_millis(250);

    /// Debounced file system events below a source root.
    pub struct FsEvents {
        base: Utf8PathBuf,
        rx: Receiver<DebounceEventResult>,
        _debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
    }

    impl FsEvents {
        /// Watches the directories covering `bindings` below `base`.
        pub fn new(base: &Utf8Path, bindings: &[Binding]) -> Result<Self, WatchError> {
            let base = base.canonicalize_utf8()?;
            let (tx, rx) = channel();
            let mut debouncer = new_debouncer(DEBOUNCE, None, tx)?;

            for root in watch_roots(bindings) {
                let dir = base.join(&root);
                if dir.is_dir() {
                    tracing::info!("watching {dir}");
                    debouncer.watch(&dir, RecursiveMode::Recursive)?;
                } else {
                    tracing::warn!("not watching {dir}, it doesn't exist");
                }
            }

            Ok(Self {
                base,
                rx,
                _debouncer: debouncer,
            })
        }
    }

    /// Paths touched by `events`, relative to `base`, without duplicates.
    fn changed_paths(base: &Utf8Path, events: &[DebouncedEvent]) -> Vec<Utf8PathBuf> {
        let mut changed: Vec<Utf8PathBuf> = Vec::new();

        // reads by the build itself must not trigger rebuilds
        let paths = events
            .iter()
            .filter(|de| !de.event.kind.is_access())
            .flat_map(|de| de.event.paths.iter());

        for path in paths {
            let Some(path) = Utf8Path::from_path(path) else {
                continue;
            };
            let Ok(rel) = path.strip_prefix(base) else {
                continue;
            };
            if !changed.iter().any(|p| p == rel) {
                changed.push(rel.to_path_buf());
            }
        }

        changed
    }

    impl Iterator for FsEvents {
        type Item = Batch;

        fn next(&mut self) -> Option<Batch> {
            loop {
                match self.rx.recv().ok()? {
                    Ok(events) => {
                        let changed = changed_paths(&self.base, &events);
                        if !changed.is_empty() {
                            return Some(Ok(changed));
                        }
                    }
                    Err(errors) => {
                        if let Some(e) = errors.into_iter().next() {
                            return Some(Err(e.into()));
                        }
                    }
                }
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use std::path::PathBuf;
        use std::time::Instant;

        use notify::EventKind;
        use notify::event::{AccessKind, CreateKind, Event, ModifyKind};

        use super::*;

        fn event(kind: EventKind, paths: &[&str]) -> DebouncedEvent {
            let event = paths
                .iter()
                .fold(Event::new(kind), |event, path| event.add_path(PathBuf::from(path)));
            DebouncedEvent::new(event, Instant::now())
        }

        #[test]
        fn test_changed_paths() {
            let base = Utf8Path::new("/project/assets");
            let events = [
                event(EventKind::Access(AccessKind::Any), &["/project/assets/scss/a.scss"]),
                event(EventKind::Modify(ModifyKind::Any), &["/project/assets/scss/b.scss"]),
                event(EventKind::Create(CreateKind::File), &["/project/assets/images/x.png"]),
                event(EventKind::Modify(ModifyKind::Any), &["/project/assets/scss/b.scss"]),
                event(EventKind::Modify(ModifyKind::Any), &["/project/app/css/style.css"]),
            ];

            assert_eq!(
                changed_paths(base, &events),
                vec![Utf8PathBuf::from("scss/b.scss"), Utf8PathBuf::from("images/x.png")]
            );
        }

        #[test]
        fn test_only_access_events_yield_nothing() {
            let base = Utf8Path::new("/project/assets");
            let events = [event(EventKind::Access(AccessKind::Any), &["/project/assets/pages/index.html"])];

            assert!(changed_paths(base, &events).is_empty());
        }

        #[test]
        fn test_fs_events_over_temp_dir() {
            let dir = tempfile::tempdir().unwrap();
            let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
            std::fs::create_dir_all(root.join("scss")).unwrap();

            let bindings = [Binding::new("compile-styles", &["scss/**/*.scss"]).unwrap()];
            let events = FsEvents::new(&root, &bindings).unwrap();
            assert_eq!(events.base, root.canonicalize_utf8().unwrap());
        }
    }
}
