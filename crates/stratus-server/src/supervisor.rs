//! Dev worker supervision.
//!
//! The supervisor owns at most one worker. [`Supervisor::reload`] is
//! serialized and always terminates the current worker before it spawns the
//! next one, so two workers are never alive at once. The lifecycle is
//! published as a [`WorkerState`] on a `watch` channel; request handlers call
//! [`Supervisor::acquire`] which parks while a reload is in flight.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::{Mutex, watch};

use crate::error::{Result, ServerError};
use crate::worker::{Worker, WorkerAddress, WorkerCommand, WorkerExit};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Starting,
    Ready(WorkerAddress),
    Crashed(String),
    Stopping,
}

impl WorkerState {
    pub fn is_settled(&self) -> bool {
        !matches!(self, WorkerState::Starting | WorkerState::Stopping)
    }
}

/// Why no worker could serve a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unavailable {
    /// Start or crash error, `None` while idle.
    pub error: Option<String>,
}

type CommandFactory = dyn Fn() -> Result<WorkerCommand> + Send + Sync;

struct Inner {
    command: Box<CommandFactory>,
    current: Mutex<Option<Worker>>,
    state: watch::Sender<WorkerState>,
    generation: AtomicU64,
}

#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("state", &*self.inner.state.borrow())
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    /// `command` is called on every reload, after the previous worker is gone.
    pub fn new(command: impl Fn() -> Result<WorkerCommand> + Send + Sync + 'static) -> Self {
        let (state, _) = watch::channel(WorkerState::Idle);
        Self {
            inner: Arc::new(Inner {
                command: Box::new(command),
                current: Mutex::new(None),
                state,
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Runs `node <entry>`; the entry is checked on each reload.
    pub fn for_entry(entry: impl Into<PathBuf>) -> Self {
        let entry = entry.into();
        Self::new(move || WorkerCommand::node(&entry))
    }

    pub fn state(&self) -> WorkerState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.inner.state.subscribe()
    }

    /// Replace the current worker with a fresh one.
    pub async fn reload(&self) -> Result<WorkerAddress> {
        let mut current = self.inner.current.lock().await;
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(old) = current.take() {
            self.inner.state.send_replace(WorkerState::Stopping);
            old.kill().await;
        }
        self.inner.state.send_replace(WorkerState::Starting);

        let spawned = match (self.inner.command)() {
            Ok(command) => command.spawn().await,
            Err(err) => Err(err),
        };
        match spawned {
            Ok(worker) => {
                let address = worker.address().clone();
                self.watch_exit(generation, worker.exit_watch());
                *current = Some(worker);
                tracing::info!(address = %address, "dev worker ready");
                self.inner
                    .state
                    .send_replace(WorkerState::Ready(address.clone()));
                Ok(address)
            }
            Err(err) => {
                tracing::error!(error = %err, "dev worker failed to start");
                self.inner
                    .state
                    .send_replace(WorkerState::Crashed(err.to_string()));
                Err(err)
            }
        }
    }

    /// Terminate the current worker, if any.
    pub async fn stop(&self) {
        let mut current = self.inner.current.lock().await;
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(worker) = current.take() {
            self.inner.state.send_replace(WorkerState::Stopping);
            worker.kill().await;
        }
        self.inner.state.send_replace(WorkerState::Idle);
    }

    /// The ready worker's address, waiting out any reload in flight.
    pub async fn acquire(&self) -> std::result::Result<WorkerAddress, Unavailable> {
        let mut rx = self.inner.state.subscribe();
        let state = match rx.wait_for(WorkerState::is_settled).await {
            Ok(state) => state.clone(),
            Err(_) => WorkerState::Idle,
        };
        match state {
            WorkerState::Ready(address) => Ok(address),
            WorkerState::Crashed(error) => Err(Unavailable { error: Some(error) }),
            _ => Err(Unavailable { error: None }),
        }
    }

    /// Moves `Ready` to `Crashed` if this generation's worker dies unprompted.
    fn watch_exit(&self, generation: u64, mut exit: watch::Receiver<Option<WorkerExit>>) {
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let exit = match exit.wait_for(Option::is_some).await {
                Ok(exit) => *exit,
                Err(_) => return,
            };
            let Some(WorkerExit { code, killed: false }) = exit else {
                return;
            };
            let Some(inner) = inner.upgrade() else {
                return;
            };
            if inner.generation.load(Ordering::SeqCst) != generation {
                return;
            }
            let message = ServerError::WorkerExited { code }.to_string();
            tracing::error!("{message}");
            inner.state.send_if_modified(|state| {
                if matches!(state, WorkerState::Ready(_)) {
                    *state = WorkerState::Crashed(message);
                    true
                } else {
                    false
                }
            });
        });
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU16;
    use std::time::Duration;

    fn counting(script: &'static str) -> (Supervisor, Arc<AtomicU16>) {
        let spawned = Arc::new(AtomicU16::new(0));
        let counter = spawned.clone();
        let supervisor = Supervisor::new(move || {
            let port = 4000 + counter.fetch_add(1, Ordering::SeqCst);
            Ok(WorkerCommand::new("sh")
                .arg("-c")
                .arg(script.replace("PORT", &port.to_string())))
        });
        (supervisor, spawned)
    }

    fn tcp(port: u16) -> WorkerAddress {
        WorkerAddress::Tcp {
            host: "127.0.0.1".into(),
            port,
        }
    }

    #[tokio::test]
    async fn reload_replaces_the_single_worker() {
        let (supervisor, spawned) =
            counting(r#"echo '{"address":{"host":"127.0.0.1","port":PORT}}'; sleep 30"#);
        assert_eq!(supervisor.state(), WorkerState::Idle);

        assert_eq!(supervisor.reload().await.unwrap(), tcp(4000));
        assert_eq!(supervisor.reload().await.unwrap(), tcp(4001));
        assert_eq!(supervisor.state(), WorkerState::Ready(tcp(4001)));
        assert_eq!(spawned.load(Ordering::SeqCst), 2);

        supervisor.stop().await;
        assert_eq!(supervisor.state(), WorkerState::Idle);
        assert_eq!(supervisor.acquire().await, Err(Unavailable { error: None }));
    }

    #[tokio::test]
    async fn acquire_waits_for_an_in_flight_reload() {
        let (supervisor, _) = counting(
            r#"sleep 0.3; echo '{"address":{"host":"127.0.0.1","port":PORT}}'; sleep 30"#,
        );
        let reloading = {
            let supervisor = supervisor.clone();
            tokio::spawn(async move { supervisor.reload().await })
        };
        let mut rx = supervisor.subscribe();
        rx.wait_for(|s| *s == WorkerState::Starting).await.unwrap();

        assert_eq!(supervisor.acquire().await, Ok(tcp(4000)));
        reloading.await.unwrap().unwrap();
        supervisor.stop().await;
    }

    #[tokio::test]
    async fn failed_start_is_reported_to_requests() {
        let (supervisor, _) = counting("echo boom >&2; exit 1");
        assert!(supervisor.reload().await.is_err());

        let unavailable = supervisor.acquire().await.unwrap_err();
        assert_eq!(
            unavailable.error.as_deref(),
            Some("[worker] exited with code: 1")
        );
    }

    #[tokio::test]
    async fn crash_after_ready_moves_to_crashed() {
        let (supervisor, _) =
            counting(r#"echo '{"address":{"host":"127.0.0.1","port":PORT}}'; sleep 0.2; exit 9"#);
        supervisor.reload().await.unwrap();

        let mut rx = supervisor.subscribe();
        let state = tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|s| matches!(s, WorkerState::Crashed(_))),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        assert_eq!(
            state,
            WorkerState::Crashed("[worker] exited with code: 9".into())
        );
    }

    #[tokio::test]
    async fn missing_entry_surfaces_as_crash() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::for_entry(dir.path().join("server/index.mjs"));
        let err = supervisor.reload().await.unwrap_err();
        assert!(matches!(err, ServerError::MissingEntry { .. }));
        assert!(matches!(supervisor.state(), WorkerState::Crashed(_)));
    }
}
