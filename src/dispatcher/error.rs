use crate::loadable::SharedError;

/// Errors surfaced by the strict loading entry points.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LoadError {
	/// The name does not appear in the current configuration.
	#[error("no such {type_name} '{name}'")]
	NotFound { type_name: String, name: String },

	/// The last load of the object failed; the original hook error is
	/// preserved.
	#[error("failed to load {type_name} '{name}': {error}")]
	Failed {
		type_name: String,
		name: String,
		error: SharedError,
	},

	/// The wait ran out while the object was still loading.
	#[error("{type_name} '{name}' is still loading")]
	StillLoading { type_name: String, name: String },
}
