//! Settings files and the resolved run configuration.
//!
//! ```rust,no_run
//! use agent_gate::config::SettingsLoader;
//!
//! # async fn example() -> Result<(), agent_gate::ConfigError> {
//! let settings = SettingsLoader::load_merged(std::path::Path::new(".")).await?;
//! let policy = settings.to_policy()?;
//! let run_config = settings.to_run_config()?;
//! # Ok(())
//! # }
//! ```

mod run;
pub mod settings;

pub use run::RunConfig;
pub use settings::{PermissionSettings, RunSettings, Settings, SettingsLoader, SettingsSource};

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading or resolving configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid value for {key}: {message}")]
    InvalidValue {
        /// The key with invalid value
        key: String,
        /// Error message
        message: String,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A permission pattern failed to compile
    #[error("Invalid pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },
}

/// Result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

pub(crate) fn home_dir() -> Option<PathBuf> {
    directories::UserDirs::new().map(|d| d.home_dir().to_path_buf())
}
