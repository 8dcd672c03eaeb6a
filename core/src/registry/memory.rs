use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{entry::RegistryEntry, error::RegistryError, Registry};

/// Plain in-memory registry, the base layer every file-backed registry
/// delegates to.
pub struct MemoryRegistry<E: RegistryEntry> {
	entries: RwLock<HashMap<E::Key, E>>,
}

impl<E: RegistryEntry> Default for MemoryRegistry<E> {
	fn default() -> Self {
		Self {
			entries: RwLock::new(HashMap::new()),
		}
	}
}

impl<E: RegistryEntry> MemoryRegistry<E> {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn len(&self) -> usize {
		self.entries.read().await.len()
	}

	pub async fn is_empty(&self) -> bool {
		self.entries.read().await.is_empty()
	}

	pub async fn clear(&self) {
		self.entries.write().await.clear();
	}

	/// Replaces an entry, returning the previous one.
	pub(super) async fn replace(&self, entry: E) -> Result<E, RegistryError> {
		let mut entries = self.entries.write().await;
		let key = entry.id();
		match entries.insert(key.clone(), entry) {
			Some(old) => Ok(old),
			None => {
				entries.remove(&key);
				Err(RegistryError::UnknownKey(key.to_string()))
			}
		}
	}
}

#[async_trait]
impl<E: RegistryEntry> Registry<E> for MemoryRegistry<E> {
	async fn register(&self, entry: E) -> Result<(), RegistryError> {
		let mut entries = self.entries.write().await;
		let key = entry.id();
		if entries.contains_key(&key) {
			return Err(RegistryError::DuplicateKey(key.to_string()));
		}
		entries.insert(key, entry);

		Ok(())
	}

	async fn update(&self, entry: E) -> Result<(), RegistryError> {
		self.replace(entry).await.map(|_| ())
	}

	async fn remove(&self, key: &E::Key) -> Result<E, RegistryError> {
		self.entries
			.write()
			.await
			.remove(key)
			.ok_or_else(|| RegistryError::UnknownKey(key.to_string()))
	}

	async fn get(&self, key: &E::Key) -> Result<Option<E>, RegistryError> {
		Ok(self.entries.read().await.get(key).cloned())
	}

	async fn entries(&self) -> Vec<E> {
		self.entries.read().await.values().cloned().collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::device::DeviceEntry;

	#[tokio::test]
	async fn register_rejects_duplicate_keys() {
		let registry = MemoryRegistry::<DeviceEntry>::new();
		let entry = DeviceEntry::new("thermostat-hall");

		registry.register(entry.clone()).await.unwrap();
		assert!(matches!(
			registry.register(entry).await,
			Err(RegistryError::DuplicateKey(_))
		));
	}

	#[tokio::test]
	async fn update_requires_existing_entry() {
		let registry = MemoryRegistry::<DeviceEntry>::new();
		let entry = DeviceEntry::new("dimmer-kitchen");

		assert!(matches!(
			registry.update(entry.clone()).await,
			Err(RegistryError::UnknownKey(_))
		));

		registry.register(entry.clone()).await.unwrap();

		let mut renamed = entry.clone();
		renamed.label = "dimmer-pantry".into();
		registry.update(renamed.clone()).await.unwrap();

		assert_eq!(registry.get(&entry.id()).await.unwrap(), Some(renamed));
	}
}
