use std::{
	io,
	marker::PhantomData,
	path::{Path, PathBuf},
	sync::Arc,
};

use hearth_utils::FileIOError;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::trace;

use super::entry::RegistryEntry;

#[derive(Error, Debug)]
pub enum PersistenceError {
	#[error("a file already exists at '{}'", .0.display())]
	AlreadyExists(PathBuf),

	#[error("entry (de)serialization failed: {0}")]
	Serialization(String),

	#[error("file name '{0}' is not valid for an entry file")]
	InvalidFileName(String),

	#[error(transparent)]
	FileIO(#[from] FileIOError),
}

/// How a persistence unit binds to its file on creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum PersistenceMode {
	/// A new file; fails if one already exists.
	Create,
	/// An existing file; the entry is read from it.
	Load,
	/// Branches on file existence between `Create` and `Load`.
	Auto,
	/// Deletes any existing file, then creates.
	Replace,
}

/// Serializer/deserializer for one entry type.
pub trait FileProcessor<E>: Send + Sync {
	fn serialize(&self, entry: &E) -> Result<Vec<u8>, PersistenceError>;

	fn deserialize(&self, bytes: &[u8]) -> Result<E, PersistenceError>;
}

/// Names entry files and filters which directory entries belong to the
/// registry.
///
/// The canonical file name must be a pure function of entry content; that is
/// what makes the rename-on-save pass both necessary and idempotent.
pub trait FileProvider<E>: Send + Sync {
	fn file_name(&self, entry: &E) -> String;

	fn matches(&self, path: &Path) -> bool;
}

/// Reference processor: pretty-printed JSON.
pub struct JsonFileProcessor<E> {
	_marker: PhantomData<fn() -> E>,
}

impl<E> Default for JsonFileProcessor<E> {
	fn default() -> Self {
		Self {
			_marker: PhantomData,
		}
	}
}

impl<E: Serialize + DeserializeOwned + Send + Sync> FileProcessor<E> for JsonFileProcessor<E> {
	fn serialize(&self, entry: &E) -> Result<Vec<u8>, PersistenceError> {
		serde_json::to_vec_pretty(entry).map_err(|e| PersistenceError::Serialization(e.to_string()))
	}

	fn deserialize(&self, bytes: &[u8]) -> Result<E, PersistenceError> {
		serde_json::from_slice(bytes).map_err(|e| PersistenceError::Serialization(e.to_string()))
	}
}

/// Binds one entry to exactly one file on disk.
///
/// The registry owns the map from key to unit; the unit owns the entry's
/// serialized representation.
pub struct PersistenceUnit<E> {
	entry: E,
	file: PathBuf,
	processor: Arc<dyn FileProcessor<E>>,
}

impl<E: RegistryEntry> PersistenceUnit<E> {
	/// Creates a unit for `entry` at `dir/file_name` according to `mode`.
	pub async fn new(
		dir: &Path,
		file_name: &str,
		entry: E,
		processor: Arc<dyn FileProcessor<E>>,
		mode: PersistenceMode,
	) -> Result<Self, PersistenceError> {
		let file = dir.join(file_name);

		match mode {
			PersistenceMode::Create => {
				if fs::try_exists(&file)
					.await
					.map_err(|e| FileIOError::from((&file, e)))?
				{
					return Err(PersistenceError::AlreadyExists(file));
				}
			}
			PersistenceMode::Load => return Self::from_file(file, processor).await,
			PersistenceMode::Auto => {
				if fs::try_exists(&file)
					.await
					.map_err(|e| FileIOError::from((&file, e)))?
				{
					return Self::from_file(file, processor).await;
				}
			}
			PersistenceMode::Replace => match fs::remove_file(&file).await {
				Ok(()) => trace!(file = %file.display(), "Replaced existing entry file"),
				Err(e) if e.kind() == io::ErrorKind::NotFound => {}
				Err(e) => return Err(FileIOError::from((&file, e)).into()),
			},
		}

		let unit = Self {
			entry,
			file,
			processor,
		};
		unit.persist().await?;

		Ok(unit)
	}

	/// Binds to an existing file, reading the entry from it.
	pub async fn from_file(
		file: PathBuf,
		processor: Arc<dyn FileProcessor<E>>,
	) -> Result<Self, PersistenceError> {
		let bytes = fs::read(&file)
			.await
			.map_err(|e| FileIOError::from((&file, e, "Failed to read entry file")))?;
		let entry = processor.deserialize(&bytes)?;

		Ok(Self {
			entry,
			file,
			processor,
		})
	}

	pub fn entry(&self) -> &E {
		&self.entry
	}

	pub fn file(&self) -> &Path {
		&self.file
	}

	pub fn set_entry(&mut self, entry: E) {
		self.entry = entry;
	}

	/// Serializes the current entry into its backing file.
	pub async fn persist(&self) -> Result<(), PersistenceError> {
		let bytes = self.processor.serialize(&self.entry)?;
		fs::write(&self.file, bytes)
			.await
			.map_err(|e| FileIOError::from((&self.file, e, "Failed to write entry file")).into())
	}

	/// Re-serializes the entry and reports whether the backing file content
	/// differs from it. A missing file reports as drifted.
	pub async fn is_drifted(&self) -> Result<bool, PersistenceError> {
		let expected = self.processor.serialize(&self.entry)?;
		match fs::read(&self.file).await {
			Ok(actual) => Ok(actual != expected),
			Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
			Err(e) => Err(FileIOError::from((&self.file, e)).into()),
		}
	}

	/// Deletes the backing file. A file that is already gone is not an error.
	pub async fn delete(&self) -> Result<(), PersistenceError> {
		match fs::remove_file(&self.file).await {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(FileIOError::from((&self.file, e)).into()),
		}
	}

	/// Renames the backing file in place, keeping the same parent directory.
	pub async fn rename_to(&mut self, new_name: &str) -> Result<(), PersistenceError> {
		let Some(parent) = self.file.parent() else {
			return Err(PersistenceError::InvalidFileName(new_name.to_string()));
		};

		let target = parent.join(new_name);
		fs::rename(&self.file, &target)
			.await
			.map_err(|e| FileIOError::from((&self.file, e, "Failed to rename entry file")))?;
		self.file = target;

		Ok(())
	}

	/// Whether the backing file's permissions allow writing.
	pub async fn is_writable(&self) -> Result<bool, PersistenceError> {
		let metadata = fs::metadata(&self.file)
			.await
			.map_err(|e| FileIOError::from((&self.file, e)))?;

		Ok(!metadata.permissions().readonly())
	}
}
