use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde_yaml::Mapping;
use tokio::fs;

use super::{parse_document, ConfigError, ConfigRepository, Result};

/// A repository backed by a directory of YAML files.
///
/// Lists regular files in `root` (non-recursively) whose names match the
/// include patterns, in sorted order. Hidden files are skipped.
pub struct FileRepository {
	root: PathBuf,
	patterns: GlobSet,
}

impl FileRepository {
	/// Creates a repository over `root` matching `*.yml` and `*.yaml`.
	pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
		Self::with_patterns(root, &["*.yml", "*.yaml"])
	}

	/// Creates a repository over `root` with custom file name patterns.
	pub fn with_patterns(root: impl Into<PathBuf>, patterns: &[&str]) -> Result<Self> {
		let mut builder = GlobSetBuilder::new();
		for pattern in patterns {
			builder.add(Glob::new(pattern)?);
		}
		Ok(Self {
			root: root.into(),
			patterns: builder.build()?,
		})
	}
}

#[async_trait]
impl ConfigRepository for FileRepository {
	async fn list(&self) -> Result<Vec<PathBuf>> {
		// A missing root is not an error, just an empty source.
		if !fs::try_exists(&self.root).await.unwrap_or(false) {
			return Ok(Vec::new());
		}

		let mut paths = Vec::new();
		let mut entries = fs::read_dir(&self.root).await?;
		while let Some(entry) = entries.next_entry().await? {
			if !entry.file_type().await?.is_file() {
				continue;
			}
			let file_name = entry.file_name();
			let name = file_name.to_string_lossy();
			if name.starts_with('.') {
				continue;
			}
			if self.patterns.is_match(Path::new(file_name.as_os_str())) {
				paths.push(entry.path());
			}
		}
		paths.sort();
		Ok(paths)
	}

	async fn exists(&self, path: &Path) -> bool {
		fs::try_exists(path).await.unwrap_or(false)
	}

	async fn last_modified(&self, path: &Path) -> Result<SystemTime> {
		Ok(fs::metadata(path).await?.modified()?)
	}

	async fn load(&self, path: &Path) -> Result<Mapping> {
		let text = match fs::read_to_string(path).await {
			Ok(text) => text,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				return Err(ConfigError::NotFound(path.to_path_buf()));
			}
			Err(e) => return Err(e.into()),
		};
		parse_document(path, &text)
	}
}
