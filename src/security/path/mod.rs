//! Boundary-checked path resolution with symlink following.

mod boundary;

pub use boundary::PathBoundary;

use std::path::{Component, Path, PathBuf};

pub(crate) const DEFAULT_MAX_SYMLINK_DEPTH: u8 = 40;

pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let mut components = Vec::new();

    for component in path.components() {
        match component {
            Component::ParentDir => {
                if !components.is_empty()
                    && !matches!(
                        components.last(),
                        Some(Component::RootDir) | Some(Component::Prefix(_))
                    )
                {
                    components.pop();
                }
            }
            Component::CurDir => {}
            c => components.push(c),
        }
    }

    if components.is_empty() {
        PathBuf::from(".")
    } else {
        components.iter().collect()
    }
}
