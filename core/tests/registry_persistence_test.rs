mod helpers;

use std::sync::Arc;

use hearth_core::{
	device::{DeviceEntry, DeviceFileProvider},
	registry::{FileBackedRegistry, FileProvider, Registry, RegistryError},
};
use pretty_assertions::assert_eq;
use tempfile::tempdir;

use helpers::registry_config;

fn entry_files(dir: &std::path::Path) -> Vec<String> {
	let mut files: Vec<String> = std::fs::read_dir(dir)
		.unwrap()
		.filter_map(|entry| entry.ok())
		.map(|entry| entry.file_name().to_string_lossy().into_owned())
		.filter(|name| name.ends_with(".json"))
		.collect();
	files.sort();
	files
}

#[tokio::test]
async fn register_creates_one_file_per_entry() {
	let dir = tempdir().unwrap();
	let registry = FileBackedRegistry::new(registry_config(dir.path()));
	registry.load_registry().await.unwrap();

	let lamp = DeviceEntry::new("Ceiling Lamp");
	let sensor = DeviceEntry::new("Motion Sensor");
	registry.register(lamp.clone()).await.unwrap();
	registry.register(sensor.clone()).await.unwrap();

	let provider = DeviceFileProvider;
	let mut expected = vec![provider.file_name(&lamp), provider.file_name(&sensor)];
	expected.sort();

	assert_eq!(entry_files(dir.path()), expected);
}

#[tokio::test]
async fn remove_deletes_the_backing_file() {
	let dir = tempdir().unwrap();
	let registry = FileBackedRegistry::new(registry_config(dir.path()));
	registry.load_registry().await.unwrap();

	let entry = DeviceEntry::new("Doomed Plug");
	registry.register(entry.clone()).await.unwrap();
	assert_eq!(entry_files(dir.path()).len(), 1);

	registry.remove(&entry.id).await.unwrap();
	assert!(entry_files(dir.path()).is_empty());
	assert_eq!(registry.entries().await.len(), 0);
}

#[tokio::test]
async fn loaded_registry_round_trips_entries() {
	let dir = tempdir().unwrap();

	{
		let registry = FileBackedRegistry::new(registry_config(dir.path()));
		registry.load_registry().await.unwrap();
		registry
			.register(DeviceEntry::new("Thermostat"))
			.await
			.unwrap();
		registry.register(DeviceEntry::new("Doorbell")).await.unwrap();
		registry.save_registry(false).await.unwrap();
	}

	let reloaded = FileBackedRegistry::new(registry_config(dir.path()));
	reloaded.load_registry().await.unwrap();

	assert_eq!(
		helpers::labels(&reloaded).await,
		vec!["Doorbell".to_string(), "Thermostat".to_string()]
	);
}

#[tokio::test]
async fn load_registry_is_one_shot() {
	let dir = tempdir().unwrap();
	let registry = FileBackedRegistry::new(registry_config(dir.path()));

	registry.load_registry().await.unwrap();
	assert!(matches!(
		registry.load_registry().await,
		Err(RegistryError::AlreadyLoaded)
	));
}

#[tokio::test]
async fn corrupt_entry_file_does_not_abort_the_load() {
	let dir = tempdir().unwrap();

	{
		let registry = FileBackedRegistry::new(registry_config(dir.path()));
		registry.load_registry().await.unwrap();
		registry.register(DeviceEntry::new("Survivor")).await.unwrap();
	}

	std::fs::write(dir.path().join("broken-device.json"), b"{ not json").unwrap();

	let registry = FileBackedRegistry::new(registry_config(dir.path()));
	let result = registry.load_registry().await;

	// The aggregate failure surfaces only after every file was attempted.
	assert!(matches!(result, Err(RegistryError::Aggregate(_))));
	assert_eq!(helpers::labels(&registry).await, vec!["Survivor".to_string()]);
}

#[tokio::test]
async fn save_renames_files_whose_canonical_name_drifted() {
	let dir = tempdir().unwrap();
	let registry = FileBackedRegistry::new(registry_config(dir.path()));
	registry.load_registry().await.unwrap();

	let entry = DeviceEntry::new("Old Name");
	registry.register(entry.clone()).await.unwrap();

	let mut renamed = entry.clone();
	renamed.label = "New Name".into();
	registry.update(renamed.clone()).await.unwrap();

	registry.save_registry(false).await.unwrap();

	let provider = DeviceFileProvider;
	assert_eq!(entry_files(dir.path()), vec![provider.file_name(&renamed)]);

	// Saving an unchanged registry again must be a no-op on file names.
	let before = entry_files(dir.path());
	registry.save_registry(false).await.unwrap();
	assert_eq!(entry_files(dir.path()), before);
}

#[tokio::test]
async fn reset_db_flag_skips_loading_persisted_entries() {
	let dir = tempdir().unwrap();

	{
		let registry = FileBackedRegistry::new(registry_config(dir.path()));
		registry.load_registry().await.unwrap();
		registry.register(DeviceEntry::new("Forgotten")).await.unwrap();
	}

	let mut config = registry_config(dir.path());
	config.flags.reset_db = true;

	let registry = FileBackedRegistry::new(config);
	registry.load_registry().await.unwrap();

	assert!(registry.entries().await.is_empty());
	// The files themselves are untouched.
	assert_eq!(entry_files(dir.path()).len(), 1);
}

#[tokio::test]
async fn test_mode_keeps_the_filesystem_untouched() {
	let dir = tempdir().unwrap();

	let mut config = registry_config(dir.path());
	config.flags.test_mode = true;

	let registry = FileBackedRegistry::new(config);
	registry.load_registry().await.unwrap();

	let entry = DeviceEntry::new("Ephemeral");
	registry.register(entry.clone()).await.unwrap();
	registry.save_registry(false).await.unwrap();

	assert!(entry_files(dir.path()).is_empty());
	assert_eq!(registry.entries().await.len(), 1);
}

#[tokio::test]
async fn missing_version_control_on_remote_backed_registry_is_fatal() {
	let dir = tempdir().unwrap();

	let mut config = registry_config(dir.path());
	config.remote_backed = true;

	let registry = FileBackedRegistry::new(config);
	assert!(matches!(
		registry.load_registry().await,
		Err(RegistryError::MissingVersionControl)
	));
}

#[tokio::test]
async fn global_read_only_accepts_mutations_in_memory_only() {
	let dir = tempdir().unwrap();

	let mut config = registry_config(dir.path());
	config.flags.global_read_only = true;

	let registry = FileBackedRegistry::new(config);
	registry.load_registry().await.unwrap();

	registry
		.register(DeviceEntry::new("Memory Only"))
		.await
		.unwrap();

	// Mutations are accepted in memory but never persisted.
	assert_eq!(registry.entries().await.len(), 1);
	assert!(entry_files(dir.path()).is_empty());

	// And the save refuses quietly instead of failing.
	registry.save_registry(false).await.unwrap();
	assert!(entry_files(dir.path()).is_empty());
}

#[tokio::test]
async fn consistency_check_repairs_tampered_files() {
	let dir = tempdir().unwrap();
	let registry = Arc::new(FileBackedRegistry::new(registry_config(dir.path())));
	registry.load_registry().await.unwrap();

	let entry = DeviceEntry::new("Tamper Target");
	registry.register(entry.clone()).await.unwrap();

	let provider = DeviceFileProvider;
	let file = dir.path().join(provider.file_name(&entry));
	std::fs::write(&file, b"{\"label\": \"hand-edited\"}").unwrap();

	let report = registry.consistency_check().await.unwrap();
	assert_eq!(report.repaired, vec![entry.id.to_string()]);

	// The file is back to the canonical serialized form.
	let reloaded = FileBackedRegistry::new(registry_config(dir.path()));
	reloaded.load_registry().await.unwrap();
	assert_eq!(
		helpers::labels(&reloaded).await,
		vec!["Tamper Target".to_string()]
	);
}

#[tokio::test]
async fn shutdown_rejects_further_mutations() {
	let dir = tempdir().unwrap();
	let registry = FileBackedRegistry::new(registry_config(dir.path()));
	registry.load_registry().await.unwrap();

	registry.register(DeviceEntry::new("Kept")).await.unwrap();
	registry.shutdown().await;

	assert!(matches!(
		registry.register(DeviceEntry::new("Late")).await,
		Err(RegistryError::ShutdownInProgress)
	));

	// The final save persisted the entry before the units were dropped.
	assert_eq!(entry_files(dir.path()).len(), 1);
}
