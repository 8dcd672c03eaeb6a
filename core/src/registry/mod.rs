//! Generic versioned entry registry.
//!
//! A registry keeps a set of identifiable records in memory, mirrors each of
//! them to one file on disk and lets plugins observe or veto every lifecycle
//! transition. Loading is gated by the version control subsystem so the
//! on-disk schema is always the one the running code expects.

mod entry;
mod error;
mod file_backed;
mod memory;
mod persistence;
mod plugin;

pub use entry::{EntryFields, FieldError, RegistryEntry, RegistryKey};
pub use error::{AggregateError, RegistryError};
pub use file_backed::{
	FileBackedRegistry, FileBackedRegistryConfig, RegistryEvent, RegistryVersionControl,
};
pub use memory::MemoryRegistry;
pub use persistence::{
	FileProcessor, FileProvider, JsonFileProcessor, PersistenceError, PersistenceMode,
	PersistenceUnit,
};
pub use plugin::{AccessOp, ConsistencyReport, PluginError, PluginPool, RegistryPlugin};

use async_trait::async_trait;

/// The mutating surface a synchronizer drives.
///
/// Implemented by both [`MemoryRegistry`] and [`FileBackedRegistry`] so bulk
/// synchronization code does not care whether entries are persisted.
#[async_trait]
pub trait Registry<E: RegistryEntry>: Send + Sync {
	async fn register(&self, entry: E) -> Result<(), RegistryError>;

	async fn update(&self, entry: E) -> Result<(), RegistryError>;

	async fn remove(&self, key: &E::Key) -> Result<E, RegistryError>;

	async fn get(&self, key: &E::Key) -> Result<Option<E>, RegistryError>;

	async fn entries(&self) -> Vec<E>;
}
