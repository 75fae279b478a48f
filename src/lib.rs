//! Concurrent loader and live reloader for named external objects.
//!
//! This crate manages a population of long-lived domain objects
//! (dictionaries, models, user-defined functions) whose definitions live
//! in configuration files and whose construction can be slow and
//! failure-prone. It continuously reconciles the declared configuration
//! with the live population:
//!
//! - **Reader** (`ConfigReader`): scans attached repositories and
//!   publishes immutable name → config snapshots, re-parsing only files
//!   that are new or changed.
//! - **Dispatcher** (`Dispatcher`): owns the objects, dispatches loads to
//!   the caller's task or spawned workers, and answers status queries.
//! - **Updater** (`PeriodicUpdater`): rescans on a fixed cadence and
//!   refreshes objects whose source data expired, retrying failures with
//!   randomized exponential backoff.
//!
//! The `ExternalLoader` façade ties the three together. User code plugs
//! in an `ObjectFactory` (how objects are built and checked for
//! staleness) and one or more `ConfigRepository` sources (where the
//! files live).
//!
//! ## Basic usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use hotload::{
//! 	BoxError, ConfigSettings, ExternalLoader, FileRepository, Lifetime, Loadable,
//! 	ObjectConfig, ObjectFactory, UpdateSettings,
//! };
//!
//! struct Model {
//! 	name: String,
//! }
//!
//! impl Loadable for Model {
//! 	fn name(&self) -> &str {
//! 		&self.name
//! 	}
//!
//! 	fn lifetime(&self) -> Lifetime {
//! 		Lifetime::new(60, 120)
//! 	}
//! }
//!
//! struct ModelFactory;
//!
//! #[async_trait]
//! impl ObjectFactory for ModelFactory {
//! 	type Object = Model;
//!
//! 	async fn create(
//! 		&self,
//! 		name: &str,
//! 		_config: &ObjectConfig,
//! 		_config_changed: bool,
//! 		_previous: Option<Arc<Model>>,
//! 	) -> Result<Arc<Model>, BoxError> {
//! 		Ok(Arc::new(Model { name: name.to_string() }))
//! 	}
//! }
//!
//! # async fn demo() {
//! let loader = ExternalLoader::new(ModelFactory, "model");
//! let repository = Arc::new(FileRepository::new("conf.d").unwrap());
//! loader
//! 	.attach_repository(repository, ConfigSettings::new("model", "name"))
//! 	.await;
//! loader.enable_async_loading(true);
//! loader.enable_periodic_updates(true, UpdateSettings::default()).await;
//!
//! let model = loader.load("ranking", None).await;
//! # let _ = model;
//! # }
//! ```

pub mod dispatcher;
pub mod loadable;
pub mod loader;
pub mod reader;
pub mod repository;
pub mod settings;
pub mod updater;

pub use dispatcher::{Dispatcher, LoadError, LoadResult, Status};
pub use loadable::{BoxError, Lifetime, Loadable, ObjectFactory, SharedError};
pub use loader::ExternalLoader;
pub use reader::{ConfigReader, ObjectConfig, ObjectConfigs};
pub use repository::{ConfigError, ConfigRepository, FileRepository, MemoryRepository};
pub use settings::{ConfigSettings, UpdateSettings};
pub use updater::PeriodicUpdater;
