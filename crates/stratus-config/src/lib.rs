//! Options model and preset resolution for stratus.
//!
//! Options are produced by merging defaults, a deployment preset chain and
//! the user's configuration, then normalizing every directory to an
//! absolute path. The result is immutable and shared by every build
//! component.
//!
//! ```no_run
//! use stratus_config::{Environment, load_options};
//! use serde_json::json;
//!
//! let env = Environment::from_process()?;
//! let options = load_options(json!({ "preset": "node-server" }), &env)?;
//! assert!(options.root_dir.is_absolute());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod detect;
pub mod discovery;
pub mod error;
pub mod load;
pub mod merge;
pub mod options;
pub mod preset;
pub mod template;

pub use detect::{Environment, detect_from_env, detect_from_project};
pub use discovery::{discover_config_file, load_from_root, read_user_config};
pub use error::{ConfigError, Result};
pub use load::{RUNTIME_ALIAS, load_options, load_options_with};
pub use options::*;
pub use preset::{Preset, PresetId, PresetRegistry, PresetSource, ResolvedPreset, canonical_name};
