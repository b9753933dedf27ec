//! Everything a build leaves on disk besides the traced `node_modules`.

pub mod manifest;
pub mod tree;
pub mod writer;

pub use manifest::BuildManifest;
pub use tree::{FileTree, format_size};
pub use writer::write_output;
