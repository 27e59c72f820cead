//! Path sandboxing for filesystem tool calls.
//!
//! - [`PathBoundary`] resolves candidate paths (`.`, `..`, symlinks) and
//!   rejects anything that is not the boundary root or below it
//! - [`fs`] opens files without following a final symlink, so a link planted
//!   between validation and execution is refused

pub mod fs;
pub mod path;

mod error;

pub use error::SecurityError;
pub use path::PathBoundary;
