//! Watch mode: rebuild on source changes, rescan on handler changes.
//!
//! Adding or removing a file under a scan directory's `api`, `routes` or
//! `middleware` folder changes the handler set, so it triggers a rescan
//! and a fresh build context. Any other change rebuilds with the current
//! context. Bursts of events collapse into one cycle, and cycles never
//! overlap: the session loop awaits each rebuild before looking at the next
//! batch.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use stratus_config::Options;
use tokio::sync::{broadcast, mpsc, watch as state};
use tokio::task::JoinHandle;

use crate::build::{build_context, compile};
use crate::context::BuildContext;
use crate::scan::section_dirs;
use crate::types::write_types;
use crate::vfs::VirtualRegistry;
use crate::{Error, Result};

/// Quiet period before a batch of file events is acted upon.
pub const DEBOUNCE: Duration = Duration::from_millis(100);

/// Published after every build cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildEvent {
    Compiled { duration: Duration },
    Failed { message: String },
}

/// What a file event asks the session to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Rebuild,
    Rescan,
}

/// Paths the watch loop cares about.
#[derive(Debug, Clone)]
pub struct WatchFilter {
    sections: Vec<PathBuf>,
    ignored: Vec<PathBuf>,
}

impl WatchFilter {
    pub fn new(options: &Options) -> Self {
        Self {
            sections: section_dirs(&options.scan_dirs),
            ignored: vec![options.build_dir.clone(), options.output.dir.clone()],
        }
    }

    fn ignores(&self, path: &Path) -> bool {
        self.ignored.iter().any(|dir| path.starts_with(dir))
            || path.components().any(|c| {
                let name = c.as_os_str().to_string_lossy();
                name == "node_modules" || name == ".git"
            })
    }

    /// Maps a watcher event to a trigger, or ignores it.
    pub fn classify(&self, event: &Event) -> Option<Trigger> {
        let structural = matches!(event.kind, EventKind::Create(_) | EventKind::Remove(_));
        if !structural && !matches!(event.kind, EventKind::Modify(_) | EventKind::Any) {
            return None;
        }

        let mut trigger = None;
        for path in event.paths.iter().filter(|p| !self.ignores(p)) {
            if structural && self.sections.iter().any(|dir| path.starts_with(dir)) {
                return Some(Trigger::Rescan);
            }
            trigger = Some(Trigger::Rebuild);
        }
        trigger
    }
}

/// Waits out the debounce window after `first` and drains everything that
/// arrived meanwhile. Returns `Rescan` if any event in the batch asked
/// for one.
pub async fn collect_batch(rx: &mut mpsc::UnboundedReceiver<Trigger>, first: Trigger) -> Trigger {
    let mut batch = first;
    loop {
        tokio::time::sleep(DEBOUNCE).await;
        let mut drained = false;
        while let Ok(next) = rx.try_recv() {
            drained = true;
            if next == Trigger::Rescan {
                batch = Trigger::Rescan;
            }
        }
        if !drained {
            return batch;
        }
    }
}

/// A running watch loop.
///
/// Dropping the session stops the watchers; [`WatchSession::close`] also
/// waits for an in-flight rebuild to finish.
pub struct WatchSession {
    events: broadcast::Sender<BuildEvent>,
    registry: state::Receiver<VirtualRegistry>,
    shutdown: state::Sender<bool>,
    task: JoinHandle<()>,
    _watchers: Vec<RecommendedWatcher>,
}

impl std::fmt::Debug for WatchSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchSession")
            .field("watchers", &self._watchers.len())
            .finish_non_exhaustive()
    }
}

impl WatchSession {
    pub fn subscribe(&self) -> broadcast::Receiver<BuildEvent> {
        self.events.subscribe()
    }

    /// The registry of the last successful build.
    pub fn registry(&self) -> VirtualRegistry {
        self.registry.borrow().clone()
    }

    /// Notified whenever a build publishes a new registry.
    pub fn registry_updates(&self) -> state::Receiver<VirtualRegistry> {
        self.registry.clone()
    }

    pub async fn close(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "watch loop ended abnormally");
        }
    }
}

/// Roots to watch: scan directories, `srcDir` and `devServer.watch`.
fn watch_roots(options: &Options) -> Vec<PathBuf> {
    let mut roots: Vec<PathBuf> = Vec::new();
    for dir in options
        .scan_dirs
        .iter()
        .chain(std::iter::once(&options.src_dir))
        .chain(options.dev_server.watch.iter())
    {
        if dir.exists() && !roots.iter().any(|r| dir.starts_with(r)) {
            roots.retain(|r| !r.starts_with(dir));
            roots.push(dir.clone());
        }
    }
    roots
}

fn spawn_watcher(
    root: &Path,
    filter: WatchFilter,
    tx: mpsc::UnboundedSender<Trigger>,
) -> Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            if let Some(trigger) = filter.classify(&event) {
                let _ = tx.send(trigger);
            }
        }
        Err(e) => tracing::warn!(error = %e, "file watcher error"),
    })?;
    watcher.watch(root, RecursiveMode::Recursive)?;
    tracing::debug!(root = %root.display(), "watching");
    Ok(watcher)
}

/// Builds once, then keeps rebuilding on file changes until closed.
///
/// Build failures are reported as [`BuildEvent::Failed`] and never end the
/// loop. Only an error setting up the watchers is returned.
pub async fn watch(options: Arc<Options>) -> Result<WatchSession> {
    let (trigger_tx, mut trigger_rx) = mpsc::unbounded_channel();
    let filter = WatchFilter::new(&options);
    let watchers = watch_roots(&options)
        .iter()
        .map(|root| spawn_watcher(root, filter.clone(), trigger_tx.clone()))
        .collect::<Result<Vec<_>>>()?;

    let (events, _) = broadcast::channel(16);
    let (registry_tx, registry_rx) = state::channel(VirtualRegistry::default());
    let (shutdown_tx, mut shutdown_rx) = state::channel(false);

    let publisher = Publisher {
        events: events.clone(),
        registry: registry_tx,
    };
    let task = tokio::spawn(async move {
        let mut ctx = publisher.rescan(&options).await;
        publisher.rebuild(ctx.as_ref()).await;

        loop {
            let first = tokio::select! {
                _ = shutdown_rx.changed() => break,
                next = trigger_rx.recv() => match next {
                    Some(trigger) => trigger,
                    None => break,
                },
            };
            if collect_batch(&mut trigger_rx, first).await == Trigger::Rescan {
                tracing::info!("handlers changed, rescanning");
                if let Some(fresh) = publisher.rescan(&options).await {
                    ctx = Some(fresh);
                }
            }
            publisher.rebuild(ctx.as_ref()).await;
        }
        tracing::debug!("watch loop stopped");
    });

    Ok(WatchSession {
        events,
        registry: registry_rx,
        shutdown: shutdown_tx,
        task,
        _watchers: watchers,
    })
}

struct Publisher {
    events: broadcast::Sender<BuildEvent>,
    registry: state::Sender<VirtualRegistry>,
}

impl Publisher {
    fn fail(&self, error: &Error) {
        tracing::error!(error = %error, "build failed");
        let _ = self.events.send(BuildEvent::Failed {
            message: error.to_string(),
        });
    }

    async fn rescan(&self, options: &Arc<Options>) -> Option<Arc<BuildContext>> {
        let result = async {
            let ctx = build_context(Arc::clone(options)).await?;
            write_types(&ctx).await?;
            Ok::<_, Error>(Arc::new(ctx))
        }
        .await;
        result.inspect_err(|e| self.fail(e)).ok()
    }

    async fn rebuild(&self, ctx: Option<&Arc<BuildContext>>) {
        let Some(ctx) = ctx else {
            return;
        };
        let started = Instant::now();
        match compile(Arc::clone(ctx)).await {
            Ok((registry, _)) => {
                let duration = started.elapsed();
                self.registry.send_replace(registry);
                tracing::info!(ms = duration.as_millis() as u64, "Stratus built");
                let _ = self.events.send(BuildEvent::Compiled { duration });
            }
            Err(e) => self.fail(&e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind, RemoveKind};
    use serde_json::json;
    use stratus_config::{Environment, load_options};

    fn filter(root: &Path) -> WatchFilter {
        let options = load_options(json!({}), &Environment::new(root)).unwrap();
        WatchFilter::new(&options)
    }

    fn event(kind: EventKind, path: PathBuf) -> Event {
        Event::new(kind).add_path(path)
    }

    #[test]
    fn handler_files_trigger_rescan() {
        let root = Path::new("/app");
        let f = filter(root);
        assert_eq!(
            f.classify(&event(EventKind::Create(CreateKind::File), root.join("api/x.get.ts"))),
            Some(Trigger::Rescan)
        );
        assert_eq!(
            f.classify(&event(EventKind::Remove(RemoveKind::Folder), root.join("middleware"))),
            Some(Trigger::Rescan)
        );
        assert_eq!(
            f.classify(&event(EventKind::Modify(ModifyKind::Any), root.join("api/x.get.ts"))),
            Some(Trigger::Rebuild)
        );
        assert_eq!(
            f.classify(&event(EventKind::Create(CreateKind::File), root.join("utils/db.ts"))),
            Some(Trigger::Rebuild)
        );
    }

    #[test]
    fn build_output_is_ignored() {
        let root = Path::new("/app");
        let f = filter(root);
        for path in [".stratus/types/stratus.d.ts", ".output/server/index.mjs", "node_modules/ms/index.js"] {
            assert_eq!(
                f.classify(&event(EventKind::Modify(ModifyKind::Any), root.join(path))),
                None,
                "{path}"
            );
        }
        assert_eq!(
            f.classify(&event(EventKind::Access(notify::event::AccessKind::Any), root.join("a.ts"))),
            None
        );
    }

    #[tokio::test(start_paused = true)]
    async fn bursts_collapse_into_one_batch() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(Trigger::Rebuild).unwrap();
        tx.send(Trigger::Rescan).unwrap();
        tx.send(Trigger::Rebuild).unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(collect_batch(&mut rx, first).await, Trigger::Rescan);
        assert!(rx.try_recv().is_err());

        tx.send(Trigger::Rebuild).unwrap();
        let first = rx.recv().await.unwrap();
        assert_eq!(collect_batch(&mut rx, first).await, Trigger::Rebuild);
    }

    #[test]
    fn nested_roots_are_merged() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("server")).unwrap();
        let options = load_options(
            json!({ "devServer": { "watch": ["server", "missing"] } }),
            &Environment::new(dir.path()),
        )
        .unwrap();
        assert_eq!(watch_roots(&options), vec![dir.path().to_path_buf()]);
    }
}
