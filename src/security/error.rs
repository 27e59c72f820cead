//! Security error types.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("path {requested} escapes sandbox boundary {boundary}")]
    OutOfBoundary {
        requested: PathBuf,
        boundary: PathBuf,
    },

    #[error("path resolution changed since validation: {path}")]
    ResolutionChanged { path: PathBuf },

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SecurityError {
    pub fn is_out_of_boundary(&self) -> bool {
        matches!(self, Self::OutOfBoundary { .. } | Self::ResolutionChanged { .. })
    }
}
