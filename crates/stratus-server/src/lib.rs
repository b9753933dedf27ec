//! # stratus-server
//!
//! Runs the built app server as a supervised child process and exposes it
//! two ways: through [`LocalFetch`] for in-process callers such as the
//! prerenderer, and through the dev HTTP surface in [`dev`].
//!
//! ```no_run
//! use stratus_server::{LocalFetch, WorkerCommand, WorkerFetch};
//!
//! # #[tokio::main]
//! # async fn main() -> stratus_server::Result<()> {
//! let worker = WorkerCommand::node("./.output/server/index.mjs".as_ref())?
//!     .spawn()
//!     .await?;
//! let fetch = WorkerFetch::new(worker.address())?;
//! let page = fetch.fetch("/", Default::default()).await?;
//! println!("{} {}", page.status, page.text().len());
//! worker.kill().await;
//! # Ok(()) }
//! ```

pub mod dev;
pub mod error;
pub mod fetch;
pub mod supervisor;
pub mod worker;

pub use dev::{AssetMount, DevServer, asset_mounts, router};
pub use error::{Result, ServerError};
pub use fetch::{FetchResponse, LocalFetch, WorkerFetch};
pub use supervisor::{Supervisor, Unavailable, WorkerState};
pub use worker::{Worker, WorkerAddress, WorkerCommand, WorkerExit};
