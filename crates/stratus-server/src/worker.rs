//! A single app-server child process and its address handoff.
//!
//! The worker prints one JSON line on stdout once it listens:
//!
//! ```text
//! {"address": {"host": "127.0.0.1", "port": 41235}}
//! {"address": {"socketPath": "/tmp/stratus-worker-1.sock"}}
//! ```
//!
//! Every other stdout/stderr line is forwarded to `tracing`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use url::Url;

use crate::error::{Result, ServerError};

const DEFAULT_HANDOFF_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum WorkerAddress {
    Tcp {
        host: String,
        port: u16,
    },
    Socket {
        #[serde(rename = "socketPath")]
        path: PathBuf,
    },
}

impl WorkerAddress {
    /// Origin URL for a TCP worker. Wildcard hosts map to loopback.
    pub fn base_url(&self) -> Result<Url> {
        match self {
            WorkerAddress::Tcp { host, port } => {
                let host = match host.as_str() {
                    "" | "0.0.0.0" | "::" | "localhost" => "127.0.0.1".to_string(),
                    h if h.contains(':') && !h.starts_with('[') => format!("[{h}]"),
                    h => h.to_string(),
                };
                let raw = format!("http://{host}:{port}/");
                Url::parse(&raw).map_err(|e| ServerError::InvalidUrl {
                    url: raw,
                    message: e.to_string(),
                })
            }
            WorkerAddress::Socket { path } => {
                Err(ServerError::UnsupportedAddress { path: path.clone() })
            }
        }
    }
}

impl std::fmt::Display for WorkerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerAddress::Tcp { host, port } => write!(f, "{host}:{port}"),
            WorkerAddress::Socket { path } => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Deserialize)]
struct Handoff {
    address: WorkerAddress,
}

fn parse_handoff(line: &str) -> Option<WorkerAddress> {
    let line = line.trim();
    if !line.starts_with('{') {
        return None;
    }
    serde_json::from_str::<Handoff>(line).ok().map(|h| h.address)
}

/// How a worker process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    pub code: Option<i32>,
    /// Terminated by [`Worker::kill`] or by dropping the handle.
    pub killed: bool,
}

/// Builder for a worker process.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    cwd: Option<PathBuf>,
    handoff_timeout: Duration,
}

impl WorkerCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            cwd: None,
            handoff_timeout: DEFAULT_HANDOFF_TIMEOUT,
        }
    }

    /// `node <entry>` with the dev-worker environment.
    pub fn node(entry: &Path) -> Result<Self> {
        if !entry.is_file() {
            return Err(ServerError::MissingEntry {
                path: entry.to_path_buf(),
            });
        }
        let mut command = Self::new("node")
            .arg(entry.to_string_lossy())
            .env("STRATUS_DEV_WORKER", "1")
            .env("PORT", "0");
        if let Some(dir) = entry.parent() {
            command = command.current_dir(dir);
        }
        Ok(command)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn handoff_timeout(mut self, timeout: Duration) -> Self {
        self.handoff_timeout = timeout;
        self
    }

    /// Start the process and wait for its address.
    pub async fn spawn(&self) -> Result<Worker> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| ServerError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        let pid = child.id();

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward(BufReader::new(stderr).lines(), true));
        }
        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill().await;
            return Err(ServerError::WorkerExited { code: None });
        };

        let mut lines = BufReader::new(stdout).lines();
        let handoff = async {
            while let Some(line) = lines.next_line().await? {
                if let Some(address) = parse_handoff(&line) {
                    return Ok(Some(address));
                }
                tracing::info!(target: "stratus::worker", "{line}");
            }
            Ok::<_, std::io::Error>(None)
        };

        let address = match tokio::time::timeout(self.handoff_timeout, handoff).await {
            Ok(Ok(Some(address))) => address,
            Ok(Ok(None)) => {
                let status = child.wait().await?;
                return Err(ServerError::WorkerExited {
                    code: status.code(),
                });
            }
            Ok(Err(err)) => {
                let _ = child.kill().await;
                return Err(err.into());
            }
            Err(_) => {
                let _ = child.kill().await;
                return Err(ServerError::HandoffTimeout {
                    timeout: self.handoff_timeout,
                });
            }
        };

        tokio::spawn(forward(lines, false));

        tracing::debug!(pid, address = %address, "worker ready");
        Ok(Worker::monitor(child, pid, address))
    }
}

async fn forward<R: AsyncRead + Unpin>(mut lines: Lines<BufReader<R>>, stderr: bool) {
    while let Ok(Some(line)) = lines.next_line().await {
        if stderr {
            tracing::warn!(target: "stratus::worker", "{line}");
        } else {
            tracing::info!(target: "stratus::worker", "{line}");
        }
    }
}

/// A running worker. Dropping the handle terminates the process.
#[derive(Debug)]
pub struct Worker {
    pid: Option<u32>,
    address: WorkerAddress,
    kill: Option<oneshot::Sender<()>>,
    exit: watch::Receiver<Option<WorkerExit>>,
}

impl Worker {
    fn monitor(mut child: Child, pid: Option<u32>, address: WorkerAddress) -> Self {
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let (exit_tx, exit_rx) = watch::channel(None);

        tokio::spawn(async move {
            let exit = tokio::select! {
                status = child.wait() => WorkerExit {
                    code: status.ok().and_then(|s| s.code()),
                    killed: false,
                },
                _ = kill_rx => {
                    let _ = child.kill().await;
                    WorkerExit { code: None, killed: true }
                }
            };
            let _ = exit_tx.send(Some(exit));
        });

        Self {
            pid,
            address,
            kill: Some(kill_tx),
            exit: exit_rx,
        }
    }

    pub fn address(&self) -> &WorkerAddress {
        &self.address
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Receiver that flips to `Some` once the process is gone.
    pub fn exit_watch(&self) -> watch::Receiver<Option<WorkerExit>> {
        self.exit.clone()
    }

    pub fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }

    /// Wait for the process to end on its own.
    pub async fn wait(&mut self) -> WorkerExit {
        wait_exit(&mut self.exit).await
    }

    /// Terminate the process and wait until it is gone.
    pub async fn kill(mut self) -> WorkerExit {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
        let exit = wait_exit(&mut self.exit).await;
        if let WorkerAddress::Socket { path } = &self.address {
            if let Err(err) = tokio::fs::remove_file(path).await {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %err, "failed to remove worker socket");
                }
            }
        }
        exit
    }
}

async fn wait_exit(exit: &mut watch::Receiver<Option<WorkerExit>>) -> WorkerExit {
    match exit.wait_for(Option::is_some).await {
        Ok(state) => (*state).unwrap_or(WorkerExit {
            code: None,
            killed: false,
        }),
        // Monitor task is gone; treat as exited.
        Err(_) => WorkerExit {
            code: None,
            killed: false,
        },
    }
}
