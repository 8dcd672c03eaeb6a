#![allow(dead_code)]

use std::{
	path::Path,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
};

use async_trait::async_trait;
use hearth_config::RuntimeFlags;
use hearth_core::{
	device::{DeviceEntry, DeviceFileProvider},
	registry::{
		FileBackedRegistryConfig, JsonFileProcessor, Registry, RegistryEntry, RegistryError,
		RegistryVersionControl,
	},
	sync::{EntrySource, SourceSignal, SyncError},
};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

/// In-memory stand-in for the controller communication layer: a push-based
/// source the tests mutate directly.
pub struct PushSource {
	entries: RwLock<Vec<DeviceEntry>>,
	available: AtomicBool,
	tx: broadcast::Sender<SourceSignal>,
}

impl Default for PushSource {
	fn default() -> Self {
		let (tx, _) = broadcast::channel(64);

		Self {
			entries: RwLock::new(Vec::new()),
			available: AtomicBool::new(false),
			tx,
		}
	}
}

impl PushSource {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub async fn set_entries(&self, entries: Vec<DeviceEntry>) {
		*self.entries.write().await = entries;
		self.available.store(true, Ordering::Release);
	}

	pub fn notify(&self) {
		let _ = self.tx.send(SourceSignal);
	}
}

#[async_trait]
impl EntrySource<DeviceEntry> for PushSource {
	fn is_data_available(&self) -> bool {
		self.available.load(Ordering::Acquire)
	}

	async fn entries(&self) -> Result<Vec<DeviceEntry>, SyncError> {
		Ok(self.entries.read().await.clone())
	}

	fn subscribe(&self) -> broadcast::Receiver<SourceSignal> {
		self.tx.subscribe()
	}
}

/// Registry wrapper that fails configured operations, for fault-isolation
/// tests.
pub struct FlakyRegistry<R> {
	inner: R,
	fail_register: RwLock<Vec<Uuid>>,
}

impl<R> FlakyRegistry<R> {
	pub fn new(inner: R) -> Self {
		Self {
			inner,
			fail_register: RwLock::new(Vec::new()),
		}
	}

	pub async fn fail_register_for(&self, key: Uuid) {
		self.fail_register.write().await.push(key);
	}

	pub fn inner(&self) -> &R {
		&self.inner
	}
}

#[async_trait]
impl<R: Registry<DeviceEntry>> Registry<DeviceEntry> for FlakyRegistry<R> {
	async fn register(&self, entry: DeviceEntry) -> Result<(), RegistryError> {
		if self.fail_register.read().await.contains(&entry.id()) {
			return Err(RegistryError::UnknownKey(entry.id().to_string()));
		}
		self.inner.register(entry).await
	}

	async fn update(&self, entry: DeviceEntry) -> Result<(), RegistryError> {
		self.inner.update(entry).await
	}

	async fn remove(&self, key: &Uuid) -> Result<DeviceEntry, RegistryError> {
		self.inner.remove(key).await
	}

	async fn get(&self, key: &Uuid) -> Result<Option<DeviceEntry>, RegistryError> {
		self.inner.get(key).await
	}

	async fn entries(&self) -> Vec<DeviceEntry> {
		self.inner.entries().await
	}
}

pub fn registry_config(dir: &Path) -> FileBackedRegistryConfig<DeviceEntry> {
	FileBackedRegistryConfig {
		dir: dir.to_path_buf(),
		provider: Arc::new(DeviceFileProvider),
		processor: Arc::new(JsonFileProcessor::default()),
		plugins: Vec::new(),
		version_control: RegistryVersionControl::None,
		remote_backed: false,
		flags: RuntimeFlags::default(),
	}
}

/// Sorted labels of every entry currently in a registry.
pub async fn labels<R: Registry<DeviceEntry>>(registry: &R) -> Vec<String> {
	let mut labels: Vec<String> = registry
		.entries()
		.await
		.into_iter()
		.map(|entry| entry.label)
		.collect();
	labels.sort();
	labels
}
