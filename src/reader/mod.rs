//! Scans attached repositories and publishes name → config snapshots.
//!
//! Parsed file contents are cached together with their last modification
//! time so repeated reads only touch files that are new or changed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use arc_swap::ArcSwap;
use log::warn;
use serde_yaml::Value;
use tokio::sync::Mutex;

use crate::repository::{ConfigError, ConfigRepository};
use crate::settings::ConfigSettings;

/// One object declaration extracted from a config file.
#[derive(Debug, Clone)]
pub struct ObjectConfig {
	/// File the declaration came from.
	pub path: PathBuf,
	/// Top-level key it was declared under.
	pub key: String,
	/// The parsed configuration subtree.
	pub node: Value,
}

impl ObjectConfig {
	/// Two configs are equivalent when their subtrees compare equal,
	/// regardless of which file or key they came from.
	pub fn is_equivalent(&self, other: &ObjectConfig) -> bool {
		self.node == other.node
	}
}

/// An immutable published snapshot. Compared by identity (`Arc::ptr_eq`)
/// to detect "nothing changed" cheaply.
pub type ObjectConfigs = Arc<HashMap<String, ObjectConfig>>;

struct FileInfo {
	last_modified: Option<SystemTime>,
	/// Parsed declarations in file order.
	entries: Vec<(String, ObjectConfig)>,
	/// Cleared before each rescan; a FileInfo left unflagged afterwards
	/// belongs to a removed file and is evicted.
	in_use: bool,
}

impl Default for FileInfo {
	fn default() -> Self {
		Self {
			last_modified: None,
			entries: Vec::new(),
			in_use: true,
		}
	}
}

struct ReaderState {
	repositories: Vec<(Arc<dyn ConfigRepository>, ConfigSettings)>,
	file_infos: HashMap<PathBuf, FileInfo>,
	/// Paths observed by the latest scan, in repository attachment order.
	/// Fixes the duplicate-name tie-break deterministically.
	scan_order: Vec<PathBuf>,
	/// Cached contents changed since the last published snapshot. Stays
	/// set when a scan aborts so the change is not lost.
	dirty: bool,
}

/// Reads config files from attached repositories and publishes snapshots.
pub struct ConfigReader {
	type_name: String,
	state: Mutex<ReaderState>,
	published: ArcSwap<HashMap<String, ObjectConfig>>,
	parse_failures: AtomicU64,
}

impl ConfigReader {
	pub fn new(type_name: impl Into<String>) -> Self {
		Self {
			type_name: type_name.into(),
			state: Mutex::new(ReaderState {
				repositories: Vec::new(),
				file_infos: HashMap::new(),
				scan_order: Vec::new(),
				dirty: false,
			}),
			published: ArcSwap::from_pointee(HashMap::new()),
			parse_failures: AtomicU64::new(0),
		}
	}

	/// Registers an ordered configuration source.
	pub async fn attach_repository(
		&self,
		repository: Arc<dyn ConfigRepository>,
		settings: ConfigSettings,
	) {
		let mut st = self.state.lock().await;
		st.repositories.push((repository, settings));
	}

	/// Reads changed files and returns the current snapshot.
	///
	/// When nothing changed the previously published snapshot is returned,
	/// so callers can compare snapshots by identity.
	pub async fn read(&self, ignore_timestamps: bool) -> ObjectConfigs {
		let mut st = self.state.lock().await;

		let completed = self.scan_files(&mut st, ignore_timestamps).await;
		if !completed || !st.dirty {
			return self.published.load_full();
		}

		let mut new_configs: HashMap<String, ObjectConfig> = HashMap::new();
		for path in &st.scan_order {
			let file_info = match st.file_infos.get(path) {
				Some(info) => info,
				None => continue,
			};
			for (name, config) in &file_info.entries {
				if let Some(already) = new_configs.get(name) {
					if already.path == *path {
						warn!(
							"{}: {} '{}' is found twice in the same file",
							path.display(),
							self.type_name,
							name
						);
					} else {
						warn!(
							"{} '{}' is found both in file '{}' and '{}'",
							self.type_name,
							name,
							already.path.display(),
							path.display()
						);
					}
					continue;
				}
				new_configs.insert(name.clone(), config.clone());
			}
		}

		let new_configs = Arc::new(new_configs);
		st.dirty = false;
		self.published.store(Arc::clone(&new_configs));
		new_configs
	}

	/// Returns the latest published snapshot without rescanning.
	pub fn current(&self) -> ObjectConfigs {
		self.published.load_full()
	}

	/// Number of file-level parse failures observed so far. A failed parse
	/// keeps the previously parsed contents of the file in service.
	pub fn parse_failure_count(&self) -> u64 {
		self.parse_failures.load(Ordering::Relaxed)
	}

	/// Rescans all repositories, marking the state dirty when any FileInfo
	/// is added, replaced or evicted. Returns false when the scan had to
	/// abort; nothing is evicted then and the dirty flag keeps any partial
	/// re-reads pending for the next complete scan.
	async fn scan_files(&self, st: &mut ReaderState, ignore_timestamps: bool) -> bool {
		for file_info in st.file_infos.values_mut() {
			file_info.in_use = false;
		}

		let mut scan_order = Vec::new();
		let repositories = st.repositories.clone();
		for (repository, settings) in &repositories {
			let paths = match repository.list().await {
				Ok(paths) => paths,
				Err(e) => {
					warn!("cannot list {} config files: {}", self.type_name, e);
					return false;
				}
			};
			for path in paths {
				match st.file_infos.get_mut(&path) {
					Some(file_info) => {
						if self
							.read_file(repository.as_ref(), &path, settings, ignore_timestamps, file_info)
							.await
						{
							st.dirty = true;
						}
					}
					None => {
						let mut file_info = FileInfo::default();
						if self
							.read_file(repository.as_ref(), &path, settings, true, &mut file_info)
							.await
						{
							st.file_infos.insert(path.clone(), file_info);
							st.dirty = true;
						}
					}
				}
				let in_use = st.file_infos.get(&path).map_or(false, |info| info.in_use);
				if in_use && !scan_order.contains(&path) {
					scan_order.push(path);
				}
			}
		}

		let deleted: Vec<PathBuf> = st
			.file_infos
			.iter()
			.filter(|(_, info)| !info.in_use)
			.map(|(path, _)| path.clone())
			.collect();
		for path in &deleted {
			st.file_infos.remove(path);
		}
		if !deleted.is_empty() {
			st.dirty = true;
		}

		st.scan_order = scan_order;
		true
	}

	/// Re-reads one file if it is new or changed. Returns true if the
	/// cached contents were replaced.
	async fn read_file(
		&self,
		repository: &dyn ConfigRepository,
		path: &Path,
		settings: &ConfigSettings,
		ignore_timestamps: bool,
		file_info: &mut FileInfo,
	) -> bool {
		if !repository.exists(path).await {
			warn!("config file '{}' does not exist", path.display());
			return false;
		}

		let last_modified = match repository.last_modified(path).await {
			Ok(time) => time,
			Err(e) => {
				warn!("cannot stat config file '{}': {}", path.display(), e);
				file_info.in_use = true;
				return false;
			}
		};

		if !ignore_timestamps {
			if let Some(previous) = file_info.last_modified {
				if last_modified <= previous {
					file_info.in_use = true;
					return false;
				}
			}
		}

		match self.parse_file(repository, path, settings).await {
			Ok(entries) => {
				file_info.entries = entries;
				file_info.last_modified = Some(last_modified);
				file_info.in_use = true;
				true
			}
			Err(e) => {
				self.parse_failures.fetch_add(1, Ordering::Relaxed);
				warn!(
					"failed to read config file '{}': {}; keeping the previously parsed contents",
					path.display(),
					e
				);
				file_info.in_use = true;
				false
			}
		}
	}

	async fn parse_file(
		&self,
		repository: &dyn ConfigRepository,
		path: &Path,
		settings: &ConfigSettings,
	) -> Result<Vec<(String, ObjectConfig)>, ConfigError> {
		let document = repository.load(path).await?;

		let mut entries = Vec::new();
		for (key, node) in &document {
			let key = match key.as_str() {
				Some(key) => key,
				None => {
					warn!("{}: ignoring non-string top-level key", path.display());
					continue;
				}
			};

			if !key.starts_with(settings.object_prefix.as_str()) {
				if !key.starts_with("comment") && !key.starts_with("include_from") {
					warn!(
						"{}: file contains unknown node '{}', expected '{}'",
						path.display(),
						key,
						settings.object_prefix
					);
				}
				continue;
			}

			let name = node
				.get(settings.name_key.as_str())
				.and_then(Value::as_str)
				.ok_or_else(|| ConfigError::MissingName {
					path: path.to_path_buf(),
					key: key.to_string(),
					name_key: settings.name_key.clone(),
				})?;

			if name.is_empty() {
				warn!(
					"{}: node '{}' defines {} with an empty name, skipping it",
					path.display(),
					key,
					self.type_name
				);
				continue;
			}

			entries.push((
				name.to_string(),
				ObjectConfig {
					path: path.to_path_buf(),
					key: key.to_string(),
					node: node.clone(),
				},
			));
		}
		Ok(entries)
	}
}
