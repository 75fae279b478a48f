use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_yaml::Mapping;

use super::{parse_document, ConfigError, ConfigRepository, Result};

/// A simple in-memory repository useful for testing and embedded setups.
///
/// Every mutation bumps an internal revision that stands in for a file
/// modification time, so the reader's timestamp checks work the same way
/// they do with files on disk.
#[derive(Default)]
pub struct MemoryRepository {
	inner: RwLock<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
	files: BTreeMap<PathBuf, MemoryFile>,
	revision: u64,
}

struct MemoryFile {
	modified: SystemTime,
	text: String,
}

impl MemoryRepository {
	pub fn new() -> Self {
		Self::default()
	}

	/// Inserts or replaces a file.
	pub fn insert(&self, path: impl Into<PathBuf>, text: impl Into<String>) {
		let mut inner = self.inner.write();
		inner.revision += 1;
		let modified = SystemTime::UNIX_EPOCH + Duration::from_secs(inner.revision);
		inner.files.insert(
			path.into(),
			MemoryFile {
				modified,
				text: text.into(),
			},
		);
	}

	/// Removes a file.
	pub fn remove(&self, path: impl AsRef<Path>) {
		self.inner.write().files.remove(path.as_ref());
	}

	/// Bumps a file's modification time without changing its contents.
	pub fn touch(&self, path: impl AsRef<Path>) {
		let mut inner = self.inner.write();
		inner.revision += 1;
		let modified = SystemTime::UNIX_EPOCH + Duration::from_secs(inner.revision);
		if let Some(file) = inner.files.get_mut(path.as_ref()) {
			file.modified = modified;
		}
	}
}

#[async_trait]
impl ConfigRepository for MemoryRepository {
	async fn list(&self) -> Result<Vec<PathBuf>> {
		Ok(self.inner.read().files.keys().cloned().collect())
	}

	async fn exists(&self, path: &Path) -> bool {
		self.inner.read().files.contains_key(path)
	}

	async fn last_modified(&self, path: &Path) -> Result<SystemTime> {
		self.inner
			.read()
			.files
			.get(path)
			.map(|file| file.modified)
			.ok_or_else(|| ConfigError::NotFound(path.to_path_buf()))
	}

	async fn load(&self, path: &Path) -> Result<Mapping> {
		let text = self
			.inner
			.read()
			.files
			.get(path)
			.map(|file| file.text.clone())
			.ok_or_else(|| ConfigError::NotFound(path.to_path_buf()))?;
		parse_document(path, &text)
	}
}
