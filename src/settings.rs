use serde::{Deserialize, Serialize};

/// Controls how object declarations are recognized inside config files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSettings {
	/// Top-level keys starting with this prefix declare one object each.
	pub object_prefix: String,
	/// Field inside a declaration holding the object's name.
	pub name_key: String,
}

impl ConfigSettings {
	pub fn new(object_prefix: impl Into<String>, name_key: impl Into<String>) -> Self {
		Self {
			object_prefix: object_prefix.into(),
			name_key: name_key.into(),
		}
	}
}

impl Default for ConfigSettings {
	fn default() -> Self {
		Self::new("object", "name")
	}
}

/// Cadence and retry behavior of the periodic updater.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSettings {
	/// How often the updater rescans configs and checks for outdated objects.
	pub check_period_sec: u64,
	/// Base delay before retrying a failed load.
	pub backoff_initial_sec: u64,
	/// Upper bound on the retry delay.
	pub backoff_max_sec: u64,
}

impl Default for UpdateSettings {
	fn default() -> Self {
		Self {
			check_period_sec: 5,
			backoff_initial_sec: 5,
			backoff_max_sec: 10 * 60,
		}
	}
}
