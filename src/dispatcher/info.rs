use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::loadable::SharedError;
use crate::reader::ObjectConfig;

/// Externally visible state of one named object.
///
/// Tags are stable and exposed for introspection surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum Status {
	/// Present in the configuration but never attempted.
	NotLoaded = 0,
	Loaded = 1,
	Failed = 2,
	Loading = 3,
	LoadedAndReloading = 4,
	FailedAndReloading = 5,
	/// No such name in the current configuration.
	NotExist = 6,
}

impl Status {
	pub fn tag(self) -> i8 {
		self as i8
	}

	pub fn all() -> &'static [Status] {
		&[
			Status::NotLoaded,
			Status::Loaded,
			Status::Failed,
			Status::Loading,
			Status::LoadedAndReloading,
			Status::FailedAndReloading,
			Status::NotExist,
		]
	}

	pub fn as_str(self) -> &'static str {
		match self {
			Status::NotLoaded => "NOT_LOADED",
			Status::Loaded => "LOADED",
			Status::Failed => "FAILED",
			Status::Loading => "LOADING",
			Status::LoadedAndReloading => "LOADED_AND_RELOADING",
			Status::FailedAndReloading => "FAILED_AND_RELOADING",
			Status::NotExist => "NOT_EXIST",
		}
	}
}

impl fmt::Display for Status {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// The current load state of one object, as observed at a point in time.
#[derive(Debug)]
pub struct LoadResult<O> {
	pub status: Status,
	/// The published version, kept in service across failed reloads.
	pub object: Option<Arc<O>>,
	/// The error of the last terminated load, if it failed.
	pub error: Option<SharedError>,
	pub loading_start_time: Option<Instant>,
	pub loading_duration: Duration,
	/// File the object's configuration came from.
	pub origin: Option<PathBuf>,
}

impl<O> LoadResult<O> {
	pub(crate) fn not_exist() -> Self {
		Self {
			status: Status::NotExist,
			object: None,
			error: None,
			loading_start_time: None,
			loading_duration: Duration::ZERO,
			origin: None,
		}
	}
}

impl<O> Clone for LoadResult<O> {
	fn clone(&self) -> Self {
		Self {
			status: self.status,
			object: self.object.clone(),
			error: self.error.clone(),
			loading_start_time: self.loading_start_time,
			loading_duration: self.loading_duration,
			origin: self.origin.clone(),
		}
	}
}

/// Per-object state owned by the dispatcher.
pub(crate) struct ObjectInfo<O> {
	pub config: ObjectConfig,
	/// Set when a rescan delivers a non-equivalent config, cleared by the
	/// next successful load under that config.
	pub config_changed: bool,
	pub object: Option<Arc<O>>,
	pub error: Option<SharedError>,
	/// Non-zero iff a load is in flight under that id.
	pub loading_id: u64,
	/// Successive failures since the last success.
	pub error_count: u64,
	pub loading_start_time: Option<Instant>,
	pub loading_end_time: Option<Instant>,
	/// None means "never".
	pub next_update_time: Option<Instant>,
	/// Set by a user-demanded reload, cleared when the ensuing load
	/// terminates. Waiters do not consider the object ready while set.
	pub forced_to_reload: bool,
}

impl<O> ObjectInfo<O> {
	pub fn new(config: ObjectConfig) -> Self {
		Self {
			config,
			config_changed: true,
			object: None,
			error: None,
			loading_id: 0,
			error_count: 0,
			loading_start_time: None,
			loading_end_time: None,
			next_update_time: None,
			forced_to_reload: false,
		}
	}

	pub fn loaded(&self) -> bool {
		self.object.is_some()
	}

	pub fn failed(&self) -> bool {
		self.object.is_none() && self.error.is_some()
	}

	pub fn loading(&self) -> bool {
		self.loading_id != 0
	}

	pub fn was_loading(&self) -> bool {
		self.loaded() || self.failed() || self.loading()
	}

	pub fn ready(&self) -> bool {
		(self.loaded() || self.failed()) && !self.forced_to_reload
	}

	pub fn next_update_due(&self, now: Instant) -> bool {
		self.next_update_time.map_or(false, |time| now >= time)
	}

	pub fn status(&self) -> Status {
		if self.object.is_some() {
			if self.loading() {
				Status::LoadedAndReloading
			} else {
				Status::Loaded
			}
		} else if self.error.is_some() {
			if self.loading() {
				Status::FailedAndReloading
			} else {
				Status::Failed
			}
		} else if self.loading() {
			Status::Loading
		} else {
			Status::NotLoaded
		}
	}

	pub fn loading_duration(&self) -> Duration {
		let start = match self.loading_start_time {
			Some(start) => start,
			None => return Duration::ZERO,
		};
		if self.loading() {
			Instant::now().saturating_duration_since(start)
		} else {
			self.loading_end_time
				.map_or(Duration::ZERO, |end| end.saturating_duration_since(start))
		}
	}

	pub fn load_result(&self) -> LoadResult<O> {
		LoadResult {
			status: self.status(),
			object: self.object.clone(),
			error: self.error.clone(),
			loading_start_time: self.loading_start_time,
			loading_duration: self.loading_duration(),
			origin: Some(self.config.path.clone()),
		}
	}
}
