use std::sync::Arc;

use hotload::{ConfigReader, ConfigRepository, ConfigSettings, MemoryRepository};

fn settings() -> ConfigSettings {
	ConfigSettings::new("object", "name")
}

async fn reader_with(files: &[(&str, &str)]) -> (ConfigReader, Arc<MemoryRepository>) {
	let repository = Arc::new(MemoryRepository::new());
	for (path, text) in files {
		repository.insert(*path, *text);
	}
	let reader = ConfigReader::new("test object");
	reader
		.attach_repository(
			Arc::clone(&repository) as Arc<dyn ConfigRepository>,
			settings(),
		)
		.await;
	(reader, repository)
}

#[tokio::test]
async fn unchanged_files_return_the_same_snapshot() {
	let (reader, _repository) = reader_with(&[(
		"a.yml",
		"object_a:\n  name: alpha\n  payload: v1\n",
	)])
	.await;

	let first = reader.read(false).await;
	assert_eq!(first.len(), 1);
	assert!(first.contains_key("alpha"));

	let second = reader.read(false).await;
	assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn modified_file_is_reparsed() {
	let (reader, repository) = reader_with(&[(
		"a.yml",
		"object_a:\n  name: alpha\n  payload: v1\n",
	)])
	.await;

	let first = reader.read(false).await;

	repository.insert("a.yml", "object_a:\n  name: alpha\n  payload: v2\n");
	let second = reader.read(false).await;
	assert!(!Arc::ptr_eq(&first, &second));

	let config = &second["alpha"];
	assert_eq!(
		config.node.get("payload").and_then(serde_yaml::Value::as_str),
		Some("v2")
	);
	assert!(!first["alpha"].is_equivalent(config));
}

#[tokio::test]
async fn removed_file_is_evicted() {
	let (reader, repository) = reader_with(&[
		("a.yml", "object_a:\n  name: alpha\n"),
		("b.yml", "object_b:\n  name: beta\n"),
	])
	.await;

	let first = reader.read(false).await;
	assert_eq!(first.len(), 2);

	repository.remove("a.yml");
	let second = reader.read(false).await;
	assert_eq!(second.len(), 1);
	assert!(!second.contains_key("alpha"));
	assert!(second.contains_key("beta"));
}

#[tokio::test]
async fn duplicate_name_keeps_the_earlier_entry() {
	// BTreeMap-backed listing yields a.yml before b.yml.
	let (reader, _repository) = reader_with(&[
		("a.yml", "object_a:\n  name: twin\n  payload: first\n"),
		("b.yml", "object_b:\n  name: twin\n  payload: second\n"),
	])
	.await;

	let configs = reader.read(false).await;
	assert_eq!(configs.len(), 1);
	let config = &configs["twin"];
	assert_eq!(config.path, std::path::Path::new("a.yml"));
	assert_eq!(
		config.node.get("payload").and_then(serde_yaml::Value::as_str),
		Some("first")
	);
}

#[tokio::test]
async fn duplicate_name_in_one_file_keeps_the_earlier_key() {
	let (reader, _repository) = reader_with(&[(
		"a.yml",
		"object_one:\n  name: twin\n  payload: first\nobject_two:\n  name: twin\n  payload: second\n",
	)])
	.await;

	let configs = reader.read(false).await;
	assert_eq!(configs.len(), 1);
	assert_eq!(configs["twin"].key, "object_one");
}

#[tokio::test]
async fn first_repository_wins_across_sources() {
	let first_repository = Arc::new(MemoryRepository::new());
	first_repository.insert("one.yml", "object_a:\n  name: shared\n  payload: primary\n");
	let second_repository = Arc::new(MemoryRepository::new());
	second_repository.insert("two.yml", "object_a:\n  name: shared\n  payload: secondary\n");

	let reader = ConfigReader::new("test object");
	reader
		.attach_repository(first_repository as Arc<dyn ConfigRepository>, settings())
		.await;
	reader
		.attach_repository(second_repository as Arc<dyn ConfigRepository>, settings())
		.await;

	let configs = reader.read(false).await;
	assert_eq!(configs.len(), 1);
	assert_eq!(
		configs["shared"]
			.node
			.get("payload")
			.and_then(serde_yaml::Value::as_str),
		Some("primary")
	);
}

#[tokio::test]
async fn parse_failure_keeps_previous_contents() {
	let (reader, repository) = reader_with(&[(
		"a.yml",
		"object_a:\n  name: alpha\n  payload: v1\n",
	)])
	.await;

	let first = reader.read(false).await;
	assert_eq!(reader.parse_failure_count(), 0);

	// Broken YAML: the previously parsed contents stay in service and the
	// scan behaves as if nothing changed.
	repository.insert("a.yml", "object_a: [unclosed\n");
	let second = reader.read(false).await;
	assert!(Arc::ptr_eq(&first, &second));
	assert!(second.contains_key("alpha"));
	assert_eq!(reader.parse_failure_count(), 1);

	// A later fix is picked up again.
	repository.insert("a.yml", "object_a:\n  name: alpha\n  payload: v3\n");
	let third = reader.read(false).await;
	assert_eq!(
		third["alpha"]
			.node
			.get("payload")
			.and_then(serde_yaml::Value::as_str),
		Some("v3")
	);
}

#[tokio::test]
async fn missing_name_field_fails_the_whole_file() {
	let (reader, _repository) = reader_with(&[(
		"a.yml",
		"object_a:\n  payload: v1\n",
	)])
	.await;

	let configs = reader.read(false).await;
	assert!(configs.is_empty());
	assert_eq!(reader.parse_failure_count(), 1);
}

#[tokio::test]
async fn empty_names_and_foreign_keys_are_skipped() {
	let (reader, _repository) = reader_with(&[(
		"a.yml",
		concat!(
			"object_a:\n  name: alpha\n",
			"object_empty:\n  name: ''\n",
			"comment: some note\n",
			"include_from: /etc/elsewhere.yml\n",
			"unrelated:\n  name: ghost\n",
		),
	)])
	.await;

	let configs = reader.read(false).await;
	assert_eq!(configs.len(), 1);
	assert!(configs.contains_key("alpha"));
	assert_eq!(reader.parse_failure_count(), 0);
}

#[tokio::test]
async fn ignore_timestamps_forces_a_reparse() {
	let (reader, _repository) = reader_with(&[(
		"a.yml",
		"object_a:\n  name: alpha\n  payload: v1\n",
	)])
	.await;

	let first = reader.read(false).await;
	let second = reader.read(true).await;
	// Re-parsed, so a new snapshot is published even with equal contents.
	assert!(!Arc::ptr_eq(&first, &second));
	assert!(first["alpha"].is_equivalent(&second["alpha"]));
}

#[tokio::test]
async fn current_reflects_the_latest_published_snapshot() {
	let (reader, repository) = reader_with(&[(
		"a.yml",
		"object_a:\n  name: alpha\n",
	)])
	.await;

	assert!(reader.current().is_empty());
	let published = reader.read(false).await;
	assert!(Arc::ptr_eq(&published, &reader.current()));

	repository.insert("a.yml", "object_a:\n  name: alpha\n  payload: v2\n");
	let next = reader.read(false).await;
	assert!(Arc::ptr_eq(&next, &reader.current()));
}
