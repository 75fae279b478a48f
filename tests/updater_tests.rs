use std::sync::Arc;
use std::time::Duration;

use hotload::{Lifetime, Loadable, PeriodicUpdater};
use tokio::time::Instant;

struct TestObject {
	lifetime: Lifetime,
	supports_updates: bool,
}

impl Loadable for TestObject {
	fn name(&self) -> &str {
		"test"
	}

	fn supports_updates(&self) -> bool {
		self.supports_updates
	}

	fn lifetime(&self) -> Lifetime {
		self.lifetime
	}
}

fn object(min_sec: u64, max_sec: u64) -> Arc<TestObject> {
	Arc::new(TestObject {
		lifetime: Lifetime::new(min_sec, max_sec),
		supports_updates: true,
	})
}

#[tokio::test(start_paused = true)]
async fn successful_load_schedules_within_lifetime_range() {
	let updater = PeriodicUpdater::new();
	let object = object(5, 10);

	for _ in 0..100 {
		let now = Instant::now();
		let time = updater
			.calculate_next_update_time(Some(&object), 0)
			.expect("lifetime range must schedule an update");
		let delay = time.saturating_duration_since(now);
		assert!(delay >= Duration::from_millis(4_900), "delay {:?} too short", delay);
		assert!(delay <= Duration::from_secs(10), "delay {:?} too long", delay);
	}
}

#[tokio::test]
async fn objects_without_updates_are_never_rescheduled() {
	let updater = PeriodicUpdater::new();

	let frozen = Arc::new(TestObject {
		lifetime: Lifetime::new(5, 10),
		supports_updates: false,
	});
	assert!(updater.calculate_next_update_time(Some(&frozen), 0).is_none());

	// A lifetime range containing zero also means "never".
	assert!(updater
		.calculate_next_update_time(Some(&object(0, 10)), 0)
		.is_none());
	assert!(updater
		.calculate_next_update_time(Some(&object(5, 0)), 0)
		.is_none());

	// No object and no error: nothing to schedule.
	let missing: Option<&Arc<TestObject>> = None;
	assert!(updater.calculate_next_update_time(missing, 0).is_none());
}

#[tokio::test(start_paused = true)]
async fn failures_back_off_exponentially_with_jitter() {
	let updater = PeriodicUpdater::new();
	let missing: Option<&Arc<TestObject>> = None;

	// Default settings: initial 5s, cap 600s. One failure draws from
	// [5, 5 + 2^0] = [5, 6].
	for _ in 0..100 {
		let now = Instant::now();
		let time = updater
			.calculate_next_update_time(missing, 1)
			.expect("failures must schedule a retry");
		let delay = time.saturating_duration_since(now);
		assert!(delay >= Duration::from_millis(4_900), "delay {:?} too short", delay);
		assert!(delay <= Duration::from_secs(6), "delay {:?} too long", delay);
	}

	// Three failures widen the spread to [5, 5 + 4].
	for _ in 0..100 {
		let now = Instant::now();
		let time = updater
			.calculate_next_update_time(missing, 3)
			.expect("failures must schedule a retry");
		let delay = time.saturating_duration_since(now);
		assert!(delay <= Duration::from_secs(9), "delay {:?} beyond spread", delay);
	}
}

#[tokio::test(start_paused = true)]
async fn backoff_is_capped_at_the_maximum() {
	let updater = PeriodicUpdater::new();
	let missing: Option<&Arc<TestObject>> = None;

	// Far past the point where 2^(k-1) overflows the cap, every draw must
	// stay at or below backoff_max_sec.
	for error_count in [20, 63, 64, 1_000] {
		let now = Instant::now();
		let time = updater
			.calculate_next_update_time(missing, error_count)
			.expect("failures must schedule a retry");
		let delay = time.saturating_duration_since(now);
		assert!(
			delay <= Duration::from_secs(600),
			"delay {:?} beyond the cap for {} errors",
			delay,
			error_count
		);
	}
}
