//! Sandbox boundary and realpath-style resolution of candidate paths.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{DEFAULT_MAX_SYMLINK_DEPTH, normalize_path};
use crate::security::SecurityError;

/// Canonical absolute directory that filesystem tool calls may not leave.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathBoundary {
    root: PathBuf,
}

enum Part {
    Root,
    Parent,
    Name(OsString),
}

impl PathBoundary {
    /// Canonicalizes `root`, which must be an existing directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, SecurityError> {
        let root = std::fs::canonicalize(root.as_ref())?;
        if !root.is_dir() {
            return Err(SecurityError::InvalidPath(format!(
                "boundary root is not a directory: {}",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `candidate` against the root and checks containment.
    ///
    /// Relative paths are joined to the root. `.`, `..` and symlinks are
    /// resolved the way the kernel would, including through components that
    /// do not exist yet. Containment is decided per path segment, so a sibling
    /// such as `/root-evil` never passes for `/root`.
    pub fn resolve(&self, candidate: impl AsRef<Path>) -> Result<PathBuf, SecurityError> {
        let candidate = candidate.as_ref();
        let raw = candidate.as_os_str();
        if raw.is_empty() {
            return Err(SecurityError::InvalidPath("empty path".into()));
        }
        if raw.as_encoded_bytes().contains(&0) {
            return Err(SecurityError::InvalidPath("null byte in path".into()));
        }

        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };

        let resolved = resolve_real(&joined, DEFAULT_MAX_SYMLINK_DEPTH)?;
        if resolved.starts_with(&self.root) {
            Ok(resolved)
        } else {
            Err(SecurityError::OutOfBoundary {
                requested: normalize_path(&joined),
                boundary: self.root.clone(),
            })
        }
    }

    /// Resolves again and fails closed if the result differs from `expected`.
    pub fn revalidate(
        &self,
        candidate: impl AsRef<Path>,
        expected: &Path,
    ) -> Result<PathBuf, SecurityError> {
        let resolved = self.resolve(candidate)?;
        if resolved != expected {
            return Err(SecurityError::ResolutionChanged { path: resolved });
        }
        Ok(resolved)
    }

    /// Path relative to the root, for display and git arguments.
    pub fn relative<'a>(&self, resolved: &'a Path) -> &'a Path {
        resolved.strip_prefix(&self.root).unwrap_or(resolved)
    }
}

fn parts_of(path: &Path) -> VecDeque<Part> {
    path.components()
        .filter_map(|c| match c {
            Component::RootDir => Some(Part::Root),
            Component::ParentDir => Some(Part::Parent),
            Component::Normal(name) => Some(Part::Name(name.to_os_string())),
            Component::CurDir | Component::Prefix(_) => None,
        })
        .collect()
}

fn resolve_real(path: &Path, max_symlink_depth: u8) -> Result<PathBuf, SecurityError> {
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return Ok(canonical);
    }

    let mut pending = parts_of(path);
    let mut resolved = PathBuf::from("/");
    let mut hops = 0u8;

    while let Some(part) = pending.pop_front() {
        match part {
            Part::Root => resolved = PathBuf::from("/"),
            Part::Parent => {
                resolved.pop();
            }
            Part::Name(name) => {
                let next = resolved.join(&name);
                match std::fs::symlink_metadata(&next) {
                    Ok(meta) if meta.file_type().is_symlink() => {
                        hops += 1;
                        if hops > max_symlink_depth {
                            return Err(SecurityError::InvalidPath(format!(
                                "symlink depth exceeded (max {}): {}",
                                max_symlink_depth,
                                path.display()
                            )));
                        }
                        let target = std::fs::read_link(&next)?;
                        let mut expanded = parts_of(&target);
                        expanded.extend(pending);
                        pending = expanded;
                    }
                    _ => resolved = next,
                }
            }
        }
    }

    Ok(resolved)
}
