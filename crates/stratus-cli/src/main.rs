//! `stratus` entry point: parse arguments, set up logging, dispatch.

use clap::Parser;
use miette::Result;
use stratus_cli::{cli, commands, error, logger, ui};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    logger::init_logger(args.verbose, args.quiet, args.no_color);
    ui::init_colors(args.no_color);

    let result = match args.command {
        cli::Command::Build(build_args) => commands::build_execute(build_args).await,
        cli::Command::Dev(dev_args) => commands::dev_execute(dev_args).await,
        cli::Command::Prerender(prerender_args) => {
            commands::prerender_execute(prerender_args).await
        }
    };

    result.map_err(error::cli_error_to_miette)
}
