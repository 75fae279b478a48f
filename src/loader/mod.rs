//! The top-level loader façade tying the three components together.

use std::sync::Arc;
use std::time::Duration;

use crate::dispatcher::{Dispatcher, LoadError, LoadResult, Status};
use crate::loadable::ObjectFactory;
use crate::reader::{ConfigReader, ObjectConfigs};
use crate::repository::ConfigRepository;
use crate::settings::{ConfigSettings, UpdateSettings};
use crate::updater::PeriodicUpdater;

/// Owns a population of named, long-lived objects declared in config
/// files: loads new entries, reloads changed ones, drops removed ones,
/// retries failed ones with backoff and refreshes expired ones.
///
/// All methods are safe to call concurrently. `shutdown` performs a
/// graceful teardown; dropping the loader without it aborts the
/// background tasks instead of joining them.
pub struct ExternalLoader<F: ObjectFactory> {
	config_reader: Arc<ConfigReader>,
	dispatcher: Arc<Dispatcher<F>>,
	periodic_updater: Arc<PeriodicUpdater>,
}

impl<F: ObjectFactory> ExternalLoader<F> {
	/// `type_name` is a human-readable kind of the managed objects
	/// ("dictionary", "model", ...) used in log and error messages.
	pub fn new(factory: F, type_name: impl Into<String>) -> Self {
		let type_name = type_name.into();
		let config_reader = Arc::new(ConfigReader::new(type_name.clone()));
		let periodic_updater = PeriodicUpdater::new();
		let dispatcher = Dispatcher::new(
			Arc::new(factory),
			Arc::clone(&periodic_updater),
			type_name,
		);
		Self {
			config_reader,
			dispatcher,
			periodic_updater,
		}
	}

	/// Registers a configuration source and reconciles immediately.
	pub async fn attach_repository(
		&self,
		repository: Arc<dyn ConfigRepository>,
		settings: ConfigSettings,
	) {
		self.config_reader.attach_repository(repository, settings).await;
		let configs = self.config_reader.read(false).await;
		self.dispatcher.set_configuration(configs).await;
	}

	pub async fn enable_always_load_everything(&self, enable: bool) {
		self.dispatcher.enable_always_load_everything(enable).await;
	}

	pub fn enable_async_loading(&self, enable: bool) {
		self.dispatcher.enable_async_loading(enable);
	}

	pub async fn enable_periodic_updates(&self, enable: bool, settings: UpdateSettings) {
		self.periodic_updater
			.enable(enable, settings, &self.config_reader, &self.dispatcher)
			.await;
	}

	/// Status of the object, `NotExist` if the name is unknown.
	pub fn status(&self, name: &str) -> Status {
		self.dispatcher.status(name)
	}

	/// Current load result of the object without waiting for anything.
	pub fn load_result(&self, name: &str) -> LoadResult<F::Object> {
		self.dispatcher.load_result(name)
	}

	/// Current load results of all objects matching the filter.
	pub fn load_results(
		&self,
		filter: impl Fn(&str) -> bool,
	) -> Vec<(String, LoadResult<F::Object>)> {
		self.dispatcher.load_results(filter)
	}

	/// Currently built objects matching the filter.
	pub fn loaded_objects(&self, filter: impl Fn(&str) -> bool) -> Vec<Arc<F::Object>> {
		self.dispatcher.loaded_objects(filter)
	}

	pub fn loaded_object_count(&self) -> usize {
		self.dispatcher.loaded_object_count()
	}

	pub fn has_loaded_objects(&self) -> bool {
		self.dispatcher.has_loaded_objects()
	}

	/// Latest published configuration snapshot.
	pub fn current_configs(&self) -> ObjectConfigs {
		self.config_reader.current()
	}

	/// Number of config file parse failures observed so far.
	pub fn parse_failure_count(&self) -> u64 {
		self.config_reader.parse_failure_count()
	}

	/// Schedules loading of the object and returns immediately.
	pub async fn start_loading(&self, name: &str) {
		self.dispatcher.start_loading(name).await;
	}

	/// Schedules loading of every never-loaded object matching the filter.
	pub async fn start_loading_filtered(&self, filter: impl Fn(&str) -> bool) {
		self.dispatcher.start_loading_filtered(filter).await;
	}

	/// Waits until the object is ready (or the timeout runs out) and
	/// returns its built version, if any. `None` timeout waits forever.
	pub async fn load(&self, name: &str, timeout: Option<Duration>) -> Option<Arc<F::Object>> {
		self.dispatcher.load(name, timeout).await
	}

	/// Like `load`, but an absent name or a final failure is an error.
	pub async fn load_strict(
		&self,
		name: &str,
		timeout: Option<Duration>,
	) -> Result<Arc<F::Object>, LoadError> {
		self.dispatcher.load_strict(name, timeout).await
	}

	/// Waits until every object matching the filter is ready (or the
	/// timeout runs out) and returns the built ones.
	pub async fn load_filtered(
		&self,
		filter: impl Fn(&str) -> bool,
		timeout: Option<Duration>,
	) -> Vec<Arc<F::Object>> {
		self.dispatcher.load_filtered(filter, timeout).await
	}

	pub async fn load_all(&self, timeout: Option<Duration>) -> Vec<Arc<F::Object>> {
		self.dispatcher.load_filtered(|_| true, timeout).await
	}

	/// Re-reads the configuration and restarts loading of the object.
	pub async fn reload(&self, name: &str, load_never_loading: bool) {
		let configs = self.config_reader.read(false).await;
		self.dispatcher.set_configuration(configs).await;
		self.dispatcher.reload(name, load_never_loading).await;
	}

	/// Re-reads the configuration and restarts loading of every object
	/// matching the filter.
	pub async fn reload_filtered(
		&self,
		filter: impl Fn(&str) -> bool,
		load_never_loading: bool,
	) {
		let configs = self.config_reader.read(false).await;
		self.dispatcher.set_configuration(configs).await;
		self.dispatcher.reload_filtered(filter, load_never_loading).await;
	}

	pub async fn reload_all(&self, load_never_loading: bool) {
		self.reload_filtered(|_| true, load_never_loading).await;
	}

	/// Reloads loaded objects whose source data expired and retries
	/// failed ones. Normally driven by the periodic updater.
	pub async fn reload_outdated(&self) {
		self.dispatcher.reload_outdated().await;
	}

	/// Stops the periodic updater and joins every in-flight worker.
	pub async fn shutdown(&self) {
		self.periodic_updater
			.enable(
				false,
				UpdateSettings::default(),
				&self.config_reader,
				&self.dispatcher,
			)
			.await;
		self.dispatcher.shutdown().await;
	}
}

impl<F: ObjectFactory> Drop for ExternalLoader<F> {
	fn drop(&mut self) {
		self.periodic_updater.abort();
		self.dispatcher.abort();
	}
}
