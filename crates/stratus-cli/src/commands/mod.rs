//! Command implementations. Each exposes an `execute` function.

pub mod build;
pub mod dev;
pub mod prerender;

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{Map, Value};
use stratus_config::{Environment, Options, load_options, read_user_config};

use crate::cli::ProjectArgs;
use crate::error::Result;

pub use build::execute as build_execute;
pub use dev::execute as dev_execute;
pub use prerender::execute as prerender_execute;

/// Resolved options for a command, plus the inputs they came from.
#[derive(Debug, Clone)]
pub struct Project {
    pub options: Arc<Options>,
    /// User config after file, env and flag layers; reused by the prerender
    /// build.
    pub user_config: Value,
    pub env: Environment,
}

/// Absolute project root from the optional positional argument.
pub fn project_root(args: &ProjectArgs, env: &Environment) -> PathBuf {
    match &args.root {
        Some(root) if root.is_absolute() => root.clone(),
        Some(root) => env.cwd.join(root),
        None => env.cwd.clone(),
    }
}

/// Load options for `args` with command-specific `overrides` on top.
pub fn load_project(args: &ProjectArgs, mut overrides: Map<String, Value>) -> Result<Project> {
    let env = Environment::from_process()?;
    let root = project_root(args, &env);
    overrides
        .entry("rootDir")
        .or_insert_with(|| Value::String(root.to_string_lossy().into_owned()));

    let user_config = read_user_config(&root, args.config.as_deref(), Value::Object(overrides))?;
    let options = load_options(user_config.clone(), &env)?;
    tracing::debug!(preset = %options.preset, root = %options.root_dir.display(), "loaded options");

    Ok(Project {
        options: Arc::new(options),
        user_config,
        env,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roots_resolve_against_cwd() {
        let env = Environment::new("/work");
        let relative = ProjectArgs {
            root: Some("apps/site".into()),
            config: None,
        };
        assert_eq!(project_root(&relative, &env), PathBuf::from("/work/apps/site"));
        assert_eq!(project_root(&ProjectArgs::default(), &env), PathBuf::from("/work"));
    }
}
