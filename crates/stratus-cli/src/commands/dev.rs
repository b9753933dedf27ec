//! `stratus dev`.

use std::net::{IpAddr, SocketAddr};

use serde_json::{Map, Value};

use crate::cli::DevArgs;
use crate::commands::load_project;
use crate::error::{CliError, Result};
use crate::ui;

pub fn listen_addr(args: &DevArgs) -> Result<SocketAddr> {
    let ip: IpAddr = args
        .host
        .parse()
        .map_err(|_| CliError::InvalidArgument(format!("--host {} is not an IP address", args.host)))?;
    Ok(SocketAddr::new(ip, args.port))
}

/// Watch-build, supervise the worker and serve until Ctrl-C.
pub async fn execute(args: DevArgs) -> Result<()> {
    let addr = listen_addr(&args)?;

    let mut overrides = Map::new();
    overrides.insert("dev".into(), Value::Bool(true));
    let project = load_project(&args.project, overrides)?;

    ui::info(&format!("Starting dev server on http://{addr}"));
    stratus_server::dev::run(project.options, addr, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for Ctrl-C");
        }
    })
    .await?;

    ui::success("Dev server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::ProjectArgs;

    fn args(host: &str) -> DevArgs {
        DevArgs {
            project: ProjectArgs::default(),
            port: 4000,
            host: host.into(),
        }
    }

    #[test]
    fn listen_address_from_flags() {
        assert_eq!(listen_addr(&args("0.0.0.0")).unwrap().to_string(), "0.0.0.0:4000");
        assert_eq!(listen_addr(&args("::1")).unwrap().to_string(), "[::1]:4000");
        assert!(matches!(
            listen_addr(&args("localhost")),
            Err(CliError::InvalidArgument(_))
        ));
    }
}
