//! Owns the live population of objects and dispatches loads.
//!
//! Every public operation takes the internal lock briefly and releases it
//! around blocking work; user hooks are never invoked under the lock.

mod error;
mod info;

pub use error::LoadError;
pub use info::{LoadResult, Status};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::warn;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::loadable::{ObjectFactory, SharedError};
use crate::reader::ObjectConfigs;
use crate::updater::PeriodicUpdater;
use info::ObjectInfo;

struct State<O> {
	configs: Option<ObjectConfigs>,
	infos: HashMap<String, ObjectInfo<O>>,
	always_load_everything: bool,
	async_loading: bool,
	/// Monotonic loading id generator; ids are never reused.
	next_loading_id: u64,
	/// Join handles of asynchronously running loads, keyed by loading id.
	workers: HashMap<u64, JoinHandle<()>>,
}

/// A load that was scheduled while the lock was held and must run inline
/// on the caller's task once the lock is released (synchronous mode).
struct PendingLoad {
	name: String,
	loading_id: u64,
}

/// Manages loading and reloading of objects against the configuration
/// snapshots produced by the `ConfigReader`.
pub struct Dispatcher<F: ObjectFactory> {
	factory: Arc<F>,
	updater: Arc<PeriodicUpdater>,
	type_name: String,
	state: Mutex<State<F::Object>>,
	/// Bumped whenever object state changes, so waiters re-evaluate.
	wakeup: watch::Sender<u64>,
}

impl<F: ObjectFactory> Dispatcher<F> {
	pub fn new(
		factory: Arc<F>,
		updater: Arc<PeriodicUpdater>,
		type_name: impl Into<String>,
	) -> Arc<Self> {
		Arc::new(Self {
			factory,
			updater,
			type_name: type_name.into(),
			state: Mutex::new(State {
				configs: None,
				infos: HashMap::new(),
				always_load_everything: false,
				async_loading: false,
				next_loading_id: 1,
				workers: HashMap::new(),
			}),
			wakeup: watch::channel(0).0,
		})
	}

	fn notify_all(&self) {
		self.wakeup.send_modify(|version| *version = version.wrapping_add(1));
	}

	/// Reconciles the population against a new configuration snapshot.
	pub async fn set_configuration(self: &Arc<Self>, new_configs: ObjectConfigs) {
		let pending = {
			let mut st = self.state.lock();
			if st
				.configs
				.as_ref()
				.map_or(false, |old| Arc::ptr_eq(old, &new_configs))
			{
				return;
			}
			st.configs = Some(Arc::clone(&new_configs));

			let mut removed = Vec::new();
			let mut changed = Vec::new();
			for (name, info) in st.infos.iter_mut() {
				match new_configs.get(name) {
					None => removed.push(name.clone()),
					Some(new_config) => {
						if !info.config.is_equivalent(new_config) {
							info.config = new_config.clone();
							info.config_changed = true;
							if info.was_loading() {
								changed.push(name.clone());
							}
						}
					}
				}
			}

			let mut pending = Vec::new();
			// Objects whose config changed are reloaded under the new one.
			for name in changed {
				if let Some(info) = st.infos.get_mut(&name) {
					Self::cancel_loading(info);
				}
				pending.extend(self.schedule_load(&mut st, &name));
			}

			let mut added = Vec::new();
			for (name, config) in new_configs.iter() {
				if !st.infos.contains_key(name) {
					added.push((name.clone(), config.clone()));
				}
			}
			let always_load = st.always_load_everything;
			for (name, config) in added {
				st.infos.insert(name.clone(), ObjectInfo::new(config));
				if always_load {
					pending.extend(self.schedule_load(&mut st, &name));
				}
			}

			for name in removed {
				// An in-flight load will detect the erasure on completion
				// and discard its results.
				st.infos.remove(&name);
			}
			pending
		};

		self.notify_all();
		self.run_pending(pending).await;
	}

	/// When enabled, every object in the configuration is loaded even if
	/// nobody asked for it yet.
	pub async fn enable_always_load_everything(self: &Arc<Self>, enable: bool) {
		let pending = {
			let mut st = self.state.lock();
			if st.always_load_everything == enable {
				return;
			}
			st.always_load_everything = enable;

			let mut pending = Vec::new();
			if enable {
				let names: Vec<String> = st
					.infos
					.iter()
					.filter(|(_, info)| !info.was_loading())
					.map(|(name, _)| name.clone())
					.collect();
				for name in names {
					pending.extend(self.schedule_load(&mut st, &name));
				}
			}
			pending
		};
		self.run_pending(pending).await;
	}

	/// When enabled, loads run on spawned tasks instead of the caller's.
	pub fn enable_async_loading(&self, enable: bool) {
		self.state.lock().async_loading = enable;
	}

	/// Status of the object, `NotExist` if the name is unknown.
	pub fn status(&self, name: &str) -> Status {
		let st = self.state.lock();
		st.infos.get(name).map_or(Status::NotExist, ObjectInfo::status)
	}

	/// Current load result of the object without waiting for anything.
	pub fn load_result(&self, name: &str) -> LoadResult<F::Object> {
		let st = self.state.lock();
		st.infos
			.get(name)
			.map_or_else(LoadResult::not_exist, ObjectInfo::load_result)
	}

	/// Current load results of all objects matching the filter.
	pub fn load_results(
		&self,
		filter: impl Fn(&str) -> bool,
	) -> Vec<(String, LoadResult<F::Object>)> {
		let st = self.state.lock();
		st.infos
			.iter()
			.filter(|(name, _)| filter(name.as_str()))
			.map(|(name, info)| (name.clone(), info.load_result()))
			.collect()
	}

	/// Currently built objects matching the filter.
	pub fn loaded_objects(&self, filter: impl Fn(&str) -> bool) -> Vec<Arc<F::Object>> {
		let st = self.state.lock();
		st.infos
			.iter()
			.filter(|(name, _)| filter(name.as_str()))
			.filter_map(|(_, info)| info.object.clone())
			.collect()
	}

	pub fn loaded_object_count(&self) -> usize {
		let st = self.state.lock();
		st.infos.values().filter(|info| info.loaded()).count()
	}

	pub fn has_loaded_objects(&self) -> bool {
		let st = self.state.lock();
		st.infos.values().any(|info| info.loaded())
	}

	/// Schedules loading of the object and returns immediately.
	pub async fn start_loading(self: &Arc<Self>, name: &str) {
		let pending = {
			let mut st = self.state.lock();
			self.schedule_load(&mut st, name).into_iter().collect::<Vec<_>>()
		};
		self.run_pending(pending).await;
	}

	/// Schedules loading of every never-loaded object matching the filter.
	pub async fn start_loading_filtered(self: &Arc<Self>, filter: impl Fn(&str) -> bool) {
		let pending = {
			let mut st = self.state.lock();
			let names: Vec<String> = st
				.infos
				.iter()
				.filter(|(name, info)| !info.was_loading() && filter(name.as_str()))
				.map(|(name, _)| name.clone())
				.collect();
			let mut pending = Vec::new();
			for name in names {
				pending.extend(self.schedule_load(&mut st, &name));
			}
			pending
		};
		self.run_pending(pending).await;
	}

	/// Waits until the object is ready (or the timeout runs out) and
	/// returns its built version, if any. `None` timeout waits forever.
	/// An unknown name returns `None`.
	pub async fn load(
		self: &Arc<Self>,
		name: &str,
		timeout: Option<Duration>,
	) -> Option<Arc<F::Object>> {
		self.load_impl(name, timeout).await.and_then(|result| result.object)
	}

	/// Like `load`, but an absent name or a final failure is an error.
	pub async fn load_strict(
		self: &Arc<Self>,
		name: &str,
		timeout: Option<Duration>,
	) -> Result<Arc<F::Object>, LoadError> {
		match self.load_impl(name, timeout).await {
			None => Err(LoadError::NotFound {
				type_name: self.type_name.clone(),
				name: name.to_string(),
			}),
			Some(result) => match (result.object, result.error) {
				(Some(object), _) => Ok(object),
				(None, Some(error)) => Err(LoadError::Failed {
					type_name: self.type_name.clone(),
					name: name.to_string(),
					error,
				}),
				(None, None) => Err(LoadError::StillLoading {
					type_name: self.type_name.clone(),
					name: name.to_string(),
				}),
			},
		}
	}

	/// Waits until every object matching the filter is ready (or the
	/// timeout runs out) and returns the built ones.
	pub async fn load_filtered(
		self: &Arc<Self>,
		filter: impl Fn(&str) -> bool,
		timeout: Option<Duration>,
	) -> Vec<Arc<F::Object>> {
		let deadline = timeout.map(|t| Instant::now() + t);
		let mut rx = self.wakeup.subscribe();
		loop {
			rx.borrow_and_update();
			let (all_ready, pending) = {
				let mut st = self.state.lock();
				let mut all_ready = true;
				let mut to_start = Vec::new();
				for (name, info) in st.infos.iter() {
					if !filter(name.as_str()) || info.ready() {
						continue;
					}
					if !info.loading() {
						to_start.push(name.clone());
					}
					all_ready = false;
				}
				let mut pending = Vec::new();
				for name in to_start {
					pending.extend(self.schedule_load(&mut st, &name));
				}
				(all_ready, pending)
			};
			if !pending.is_empty() {
				self.run_pending(pending).await;
				continue;
			}
			if all_ready {
				break;
			}
			if !self.wait_for_change(&mut rx, deadline).await {
				break;
			}
		}
		self.loaded_objects(filter)
	}

	/// Cancels any in-flight load of the object and starts a fresh one.
	/// Objects never loaded before are only targeted when
	/// `load_never_loading` is set.
	pub async fn reload(self: &Arc<Self>, name: &str, load_never_loading: bool) {
		let pending = {
			let mut st = self.state.lock();
			let info = match st.infos.get_mut(name) {
				Some(info) => info,
				None => return,
			};
			if !info.was_loading() && !load_never_loading {
				return;
			}
			Self::cancel_loading(info);
			info.forced_to_reload = true;
			self.schedule_load(&mut st, name).into_iter().collect::<Vec<_>>()
		};
		self.run_pending(pending).await;
	}

	/// Reloads every object matching the filter.
	pub async fn reload_filtered(
		self: &Arc<Self>,
		filter: impl Fn(&str) -> bool,
		load_never_loading: bool,
	) {
		let pending = {
			let mut st = self.state.lock();
			let names: Vec<String> = st
				.infos
				.iter()
				.filter(|(name, info)| {
					(info.was_loading() || load_never_loading) && filter(name.as_str())
				})
				.map(|(name, _)| name.clone())
				.collect();
			let mut pending = Vec::new();
			for name in names {
				if let Some(info) = st.infos.get_mut(&name) {
					Self::cancel_loading(info);
					info.forced_to_reload = true;
				}
				pending.extend(self.schedule_load(&mut st, &name));
			}
			pending
		};
		self.run_pending(pending).await;
	}

	pub async fn reload_all(self: &Arc<Self>, load_never_loading: bool) {
		self.reload_filtered(|_| true, load_never_loading).await;
	}

	/// Reloads loaded objects whose update time has passed and whose
	/// source data changed, and retries failed ones. Objects never tried
	/// are not touched.
	pub async fn reload_outdated(self: &Arc<Self>) {
		// Phase 1: pick the loaded objects due for a modification check.
		let candidates: Vec<(String, Arc<F::Object>, u64)> = {
			let st = self.state.lock();
			let now = Instant::now();
			st.infos
				.iter()
				.filter(|(_, info)| info.next_update_due(now) && !info.loading())
				.filter_map(|(name, info)| {
					info.object
						.as_ref()
						.map(|object| (name.clone(), Arc::clone(object), info.error_count))
				})
				.collect()
		};

		// Phase 2: call the hooks with the lock released. The refresh time
		// for unmodified objects is drawn here for the same reason: the
		// object's lifetime query is a user hook too.
		let mut checked = HashMap::with_capacity(candidates.len());
		for (name, object, error_count) in candidates {
			let modified = match self.factory.is_modified(&object).await {
				Ok(modified) => modified,
				Err(e) => {
					warn!(
						"could not check if {} '{}' was modified: {}",
						self.type_name, name, e
					);
					false
				}
			};
			let refresh_time = if modified {
				None
			} else {
				self.updater.calculate_next_update_time(Some(&object), error_count)
			};
			checked.insert(name, (object, modified, refresh_time));
		}

		// Phase 3: re-check every precondition against the latest state
		// before acting; the world may have changed while unlocked.
		let pending = {
			let mut st = self.state.lock();
			let now = Instant::now();
			let mut to_start = Vec::new();
			for (name, info) in st.infos.iter_mut() {
				if !info.next_update_due(now) || info.loading() {
					continue;
				}
				if info.loaded() {
					let (object, modified, refresh_time) = match checked.get(name) {
						Some(entry) => entry,
						// Loaded after phase 1, nothing to do yet.
						None => continue,
					};
					let same_object = info
						.object
						.as_ref()
						.map_or(false, |current| Arc::ptr_eq(current, object));
					if !same_object {
						continue;
					}
					if *modified {
						to_start.push(name.clone());
					} else {
						info.next_update_time = *refresh_time;
					}
				} else if info.failed() {
					to_start.push(name.clone());
				}
			}
			let mut pending = Vec::new();
			for name in to_start {
				pending.extend(self.schedule_load(&mut st, &name));
			}
			pending
		};
		self.run_pending(pending).await;
	}

	/// Drops the whole population and joins every in-flight worker.
	/// In-flight loads observe the erased state and discard their results.
	pub async fn shutdown(&self) {
		loop {
			let workers: Vec<JoinHandle<()>> = {
				let mut st = self.state.lock();
				st.infos.clear();
				st.workers.drain().map(|(_, handle)| handle).collect()
			};
			self.notify_all();
			if workers.is_empty() {
				break;
			}
			for handle in workers {
				if let Err(e) = handle.await {
					warn!("{} loading worker failed: {}", self.type_name, e);
				}
			}
		}
	}

	/// Best-effort teardown for drop paths that cannot await: aborts the
	/// remaining workers instead of joining them.
	pub(crate) fn abort(&self) {
		let mut st = self.state.lock();
		st.infos.clear();
		for (_, handle) in st.workers.drain() {
			handle.abort();
		}
		drop(st);
		self.notify_all();
	}

	/// Single-object wait loop shared by `load` and `load_strict`.
	/// Returns `None` if the name is unknown.
	async fn load_impl(
		self: &Arc<Self>,
		name: &str,
		timeout: Option<Duration>,
	) -> Option<LoadResult<F::Object>> {
		let deadline = timeout.map(|t| Instant::now() + t);
		let mut rx = self.wakeup.subscribe();
		loop {
			rx.borrow_and_update();
			let pending: Vec<PendingLoad> = {
				let mut st = self.state.lock();
				let loading = match st.infos.get(name) {
					None => return None,
					Some(info) => {
						if info.ready() {
							return Some(info.load_result());
						}
						info.loading()
					}
				};
				if loading {
					Vec::new()
				} else {
					self.schedule_load(&mut st, name).into_iter().collect()
				}
			};
			if !pending.is_empty() {
				self.run_pending(pending).await;
				continue;
			}
			if !self.wait_for_change(&mut rx, deadline).await {
				// Timed out: report the current state as is.
				let st = self.state.lock();
				return st.infos.get(name).map(ObjectInfo::load_result);
			}
		}
	}

	/// Waits for a state change notification. Returns false when the
	/// deadline ran out instead.
	async fn wait_for_change(
		&self,
		rx: &mut watch::Receiver<u64>,
		deadline: Option<Instant>,
	) -> bool {
		match deadline {
			None => rx.changed().await.is_ok(),
			Some(deadline) => matches!(
				tokio::time::timeout_at(deadline, rx.changed()).await,
				Ok(Ok(()))
			),
		}
	}

	/// Stamps a fresh loading id on the object and either spawns a worker
	/// (asynchronous mode) or returns the load for the caller to run once
	/// the lock is released (synchronous mode). No-op if the object is
	/// unknown or already loading.
	fn schedule_load(
		self: &Arc<Self>,
		st: &mut State<F::Object>,
		name: &str,
	) -> Option<PendingLoad> {
		let loading_id = st.next_loading_id;
		let info = st.infos.get_mut(name)?;
		if info.loading() {
			return None;
		}
		info.loading_id = loading_id;
		info.loading_start_time = Some(Instant::now());
		info.loading_end_time = None;
		st.next_loading_id += 1;

		if st.async_loading {
			let worker = Self::loading_worker(Arc::clone(self), name.to_string(), loading_id);
			st.workers.insert(loading_id, tokio::spawn(worker));
			None
		} else {
			Some(PendingLoad {
				name: name.to_string(),
				loading_id,
			})
		}
	}

	async fn run_pending(self: &Arc<Self>, pending: Vec<PendingLoad>) {
		for load in pending {
			self.do_loading(&load.name, load.loading_id).await;
		}
	}

	async fn loading_worker(this: Arc<Self>, name: String, loading_id: u64) {
		this.do_loading(&name, loading_id).await;
		let mut st = this.state.lock();
		st.workers.remove(&loading_id);
	}

	/// Runs one load under a given loading id. The id is re-checked after
	/// every reacquisition of the lock; a mismatch means the load was
	/// cancelled or the object erased, and all results are discarded.
	async fn do_loading(self: &Arc<Self>, name: &str, loading_id: u64) {
		let (config, config_changed, previous, previous_error_count) = {
			let st = self.state.lock();
			let info = match st.infos.get(name) {
				Some(info) => info,
				None => return,
			};
			if info.loading_id != loading_id {
				return;
			}
			(
				info.config.clone(),
				info.config_changed,
				info.object.clone(),
				info.error_count,
			)
		};

		// The construction can take a long time; the lock stays released.
		let result = self
			.factory
			.create(name, &config, config_changed, previous.clone())
			.await;

		let (new_object, new_error, error_count): (_, Option<SharedError>, _) = match result {
			Ok(object) => (Some(object), None, 0),
			Err(e) => (None, Some(Arc::from(e)), previous_error_count + 1),
		};

		let next_update_time = self
			.updater
			.calculate_next_update_time(new_object.as_ref(), error_count);

		let mut st = self.state.lock();
		let info = match st.infos.get_mut(name) {
			Some(info) => info,
			None => return,
		};
		if info.loading_id != loading_id {
			return;
		}

		if let Some(error) = &new_error {
			let retry = match next_update_time {
				Some(time) => format!(
					", next attempt is scheduled in {:?}",
					time.saturating_duration_since(Instant::now())
				),
				None => String::new(),
			};
			if previous.is_some() {
				warn!(
					"could not update {} '{}', leaving the previous version{}: {}",
					self.type_name, name, retry, error
				);
			} else {
				warn!(
					"could not load {} '{}'{}: {}",
					self.type_name, name, retry, error
				);
			}
		}

		if let Some(object) = new_object {
			info.object = Some(object);
			info.config_changed = false;
		}
		info.error = new_error;
		info.error_count = error_count;
		info.loading_end_time = Some(Instant::now());
		info.loading_id = 0;
		info.next_update_time = next_update_time;
		info.forced_to_reload = false;

		drop(st);
		self.notify_all();
	}

	/// There is no way to interrupt a running hook; resetting the loading
	/// id makes the returning worker discard its results. Ids are never
	/// reused, so a stale worker can never be mistaken for a fresh one.
	fn cancel_loading(info: &mut ObjectInfo<F::Object>) {
		if !info.loading() {
			return;
		}
		info.loading_id = 0;
		info.loading_end_time = Some(Instant::now());
	}
}
