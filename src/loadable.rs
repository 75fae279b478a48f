use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::reader::ObjectConfig;

/// Boxed error returned by user hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A captured hook error, shared between all waiters that observe it.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Declared freshness range of a built object, in seconds.
///
/// After a successful load the next refresh is scheduled at a uniformly
/// random point inside `[min_sec, max_sec]`. A range containing zero means
/// the object is never refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lifetime {
	pub min_sec: u64,
	pub max_sec: u64,
}

impl Lifetime {
	pub fn new(min_sec: u64, max_sec: u64) -> Self {
		Self { min_sec, max_sec }
	}
}

/// A long-lived external object managed by the loader.
///
/// Built objects are shared as `Arc`s and never mutated after publication;
/// an update always produces a new instance.
pub trait Loadable: Send + Sync + 'static {
	fn name(&self) -> &str;

	/// Whether the object can become outdated and should be refreshed.
	fn supports_updates(&self) -> bool {
		true
	}

	fn lifetime(&self) -> Lifetime;
}

/// Constructs and inspects loadable objects.
///
/// Both hooks are called without any loader lock held and must be safe to
/// call concurrently for distinct names. The loader guarantees at most one
/// in-flight `create` per name.
#[async_trait]
pub trait ObjectFactory: Send + Sync + 'static {
	type Object: Loadable;

	/// Builds (or rebuilds) the object for `name` from its configuration.
	///
	/// `previous` is the currently published version, if any. When
	/// `previous` is present and `config_changed` is false the source data
	/// may not have to be re-read, and an implementation is free to return
	/// a cheap clone of the previous version.
	async fn create(
		&self,
		name: &str,
		config: &ObjectConfig,
		config_changed: bool,
		previous: Option<Arc<Self::Object>>,
	) -> Result<Arc<Self::Object>, BoxError>;

	/// Checks whether the source data behind a built object has changed.
	///
	/// A failure here is logged and treated as "not modified".
	async fn is_modified(&self, _object: &Arc<Self::Object>) -> Result<bool, BoxError> {
		Ok(false)
	}
}
