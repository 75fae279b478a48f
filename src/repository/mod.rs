//! Backing stores for configuration files.
//!
//! A repository enumerates config file paths and hands out their parsed
//! contents; the `ConfigReader` decides what to re-read and when.

mod file;
mod memory;

pub use file::FileRepository;
pub use memory::MemoryRepository;

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use serde_yaml::{Mapping, Value};

/// Error type for repository and config file handling.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("io error: {0}")]
	Io(#[from] std::io::Error),

	#[error("yaml error: {0}")]
	Yaml(#[from] serde_yaml::Error),

	#[error("glob pattern error: {0}")]
	Glob(#[from] globset::Error),

	#[error("config file not found: {0:?}")]
	NotFound(PathBuf),

	#[error("{path:?}: top level of a config file must be a mapping")]
	NotMapping { path: PathBuf },

	#[error("{path:?}: node '{key}' has no string '{name_key}' field")]
	MissingName {
		path: PathBuf,
		key: String,
		name_key: String,
	},
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// An ordered source of configuration files.
#[async_trait]
pub trait ConfigRepository: Send + Sync + 'static {
	/// Enumerates the config file paths currently provided by this source.
	async fn list(&self) -> Result<Vec<PathBuf>>;

	/// Checks whether a previously listed path still exists.
	async fn exists(&self, path: &Path) -> bool;

	/// Returns the last modification time of a path.
	async fn last_modified(&self, path: &Path) -> Result<SystemTime>;

	/// Reads and parses a config file into its top-level mapping.
	async fn load(&self, path: &Path) -> Result<Mapping>;
}

/// Parses YAML text into the top-level mapping of a config file.
pub(crate) fn parse_document(path: &Path, text: &str) -> Result<Mapping> {
	let document: Value = serde_yaml::from_str(text)?;
	match document {
		Value::Mapping(mapping) => Ok(mapping),
		Value::Null => Ok(Mapping::new()),
		_ => Err(ConfigError::NotMapping {
			path: path.to_path_buf(),
		}),
	}
}
