//! Command-line interface definition.
//!
//! - `stratus build` - production build for a deployment preset
//! - `stratus dev` - watch build with a supervised dev worker
//! - `stratus prerender` - generate static routes into the public directory

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Stratus - build server apps for any deployment target
#[derive(Parser, Debug)]
#[command(
    name = "stratus",
    version,
    about = "Build server apps for any deployment target",
    long_about = "Stratus scans your api/, routes/ and middleware/ directories, bundles them\n\
                  with a preset-specific runtime and writes a self-contained output tree\n\
                  with its own traced node_modules."
)]
pub struct Cli {
    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build the app for production
    ///
    /// Empties the output directory, copies public assets, prerenders the
    /// configured routes and bundles the server.
    Build(BuildArgs),

    /// Start the development server
    ///
    /// Rebuilds on change and restarts the app worker after each build.
    Dev(DevArgs),

    /// Prerender configured or crawled routes
    Prerender(PrerenderArgs),
}

/// Options shared by every command.
#[derive(Args, Debug, Clone, Default)]
pub struct ProjectArgs {
    /// Project root
    #[arg(value_name = "ROOT")]
    pub root: Option<PathBuf>,

    /// Config file, instead of discovering stratus.config.* from ROOT
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct BuildArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Deployment preset, e.g. node-server, vercel, cloudflare
    #[arg(short, long)]
    pub preset: Option<String>,

    /// Minify the server bundle
    #[arg(long)]
    pub minify: bool,
}

#[derive(Args, Debug, Clone)]
pub struct DevArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Port to listen on
    #[arg(long, default_value_t = 3000)]
    pub port: u16,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
}

#[derive(Args, Debug, Clone, Default)]
pub struct PrerenderArgs {
    #[command(flatten)]
    pub project: ProjectArgs,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn build_flags() {
        let cli = Cli::try_parse_from(["stratus", "build", "app", "--preset", "vercel", "--minify"])
            .unwrap();
        let Command::Build(args) = cli.command else {
            panic!("expected build");
        };
        assert_eq!(args.project.root, Some(PathBuf::from("app")));
        assert_eq!(args.preset.as_deref(), Some("vercel"));
        assert!(args.minify);
    }

    #[test]
    fn dev_defaults() {
        let cli = Cli::try_parse_from(["stratus", "dev", "-v"]).unwrap();
        assert!(cli.verbose);
        let Command::Dev(args) = cli.command else {
            panic!("expected dev");
        };
        assert_eq!(args.port, 3000);
        assert_eq!(args.host, "127.0.0.1");
        assert_eq!(args.project.root, None);
    }

    #[test]
    fn quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["stratus", "-q", "-v", "prerender"]).is_err());
    }
}
