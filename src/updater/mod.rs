//! Periodic reconciliation worker and update-time scheduling.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::dispatcher::Dispatcher;
use crate::loadable::{Loadable, ObjectFactory};
use crate::reader::ConfigReader;
use crate::settings::UpdateSettings;

struct UpdaterState {
	enabled: bool,
	settings: UpdateSettings,
	worker: Option<Worker>,
}

struct Worker {
	handle: JoinHandle<()>,
	stop: watch::Sender<bool>,
}

/// Runs one long-lived worker that periodically rescans the configuration
/// and refreshes outdated objects, and computes when a just-finished load
/// should be reconsidered.
pub struct PeriodicUpdater {
	state: Mutex<UpdaterState>,
	rng: Mutex<Pcg64>,
}

impl PeriodicUpdater {
	pub fn new() -> Arc<Self> {
		Arc::new(Self {
			state: Mutex::new(UpdaterState {
				enabled: false,
				settings: UpdateSettings::default(),
				worker: None,
			}),
			rng: Mutex::new(Pcg64::from_entropy()),
		})
	}

	/// Starts the background worker if not running, or stops and joins it.
	pub async fn enable<F: ObjectFactory>(
		self: &Arc<Self>,
		enable: bool,
		settings: UpdateSettings,
		reader: &Arc<ConfigReader>,
		dispatcher: &Arc<Dispatcher<F>>,
	) {
		if enable {
			let mut st = self.state.lock();
			st.enabled = true;
			st.settings = settings;
			if st.worker.is_none() {
				let (stop, stop_rx) = watch::channel(false);
				let handle = tokio::spawn(Self::run(
					Arc::clone(self),
					Arc::clone(reader),
					Arc::clone(dispatcher),
					stop_rx,
				));
				st.worker = Some(Worker { handle, stop });
			}
		} else {
			let worker = {
				let mut st = self.state.lock();
				st.enabled = false;
				st.settings = settings;
				st.worker.take()
			};
			if let Some(worker) = worker {
				let _ = worker.stop.send(true);
				let _ = worker.handle.await;
			}
		}
	}

	async fn run<F: ObjectFactory>(
		this: Arc<Self>,
		reader: Arc<ConfigReader>,
		dispatcher: Arc<Dispatcher<F>>,
		mut stop_rx: watch::Receiver<bool>,
	) {
		loop {
			let period = {
				let st = this.state.lock();
				// A zero period would spin.
				Duration::from_secs(st.settings.check_period_sec.max(1))
			};
			tokio::select! {
				_ = tokio::time::sleep(period) => {}
				_ = stop_rx.changed() => break,
			}
			if !this.state.lock().enabled {
				break;
			}

			let configs = reader.read(false).await;
			dispatcher.set_configuration(configs).await;
			dispatcher.reload_outdated().await;
		}
	}

	/// Schedules the next reconsideration of an object after a load.
	///
	/// On success the time is drawn uniformly from the object's declared
	/// lifetime range; `None` means the object is never updated. On
	/// failure an exponential backoff with jitter applies, capped at
	/// `backoff_max_sec`.
	pub fn calculate_next_update_time<O: Loadable>(
		&self,
		object: Option<&Arc<O>>,
		error_count: u64,
	) -> Option<Instant> {
		if error_count == 0 {
			let object = object?;
			if !object.supports_updates() {
				return None;
			}
			let lifetime = object.lifetime();
			if lifetime.min_sec == 0 || lifetime.max_sec == 0 {
				return None;
			}
			let lo = lifetime.min_sec.min(lifetime.max_sec);
			let hi = lifetime.min_sec.max(lifetime.max_sec);
			let secs = self.rng.lock().gen_range(lo..=hi);
			// A draw too far in the future degrades to "never".
			return Instant::now().checked_add(Duration::from_secs(secs));
		}

		let settings = self.state.lock().settings.clone();
		let spread = match error_count {
			count if count >= 64 => u64::MAX,
			count => 1u64 << (count - 1),
		};
		let jitter = self.rng.lock().gen_range(0..=spread);
		let delay = settings
			.backoff_max_sec
			.min(settings.backoff_initial_sec.saturating_add(jitter));
		Instant::now().checked_add(Duration::from_secs(delay))
	}

	/// Best-effort teardown for drop paths that cannot await.
	pub(crate) fn abort(&self) {
		if let Some(worker) = self.state.lock().worker.take() {
			worker.handle.abort();
		}
	}
}
