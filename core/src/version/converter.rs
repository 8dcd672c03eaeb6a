use std::{collections::BTreeMap, sync::Arc};

use serde_json::{Map, Value};
use tracing::warn;

use super::error::VersionControlError;

/// The JSON object of one entry file, as converters see it.
pub type EntryJson = Map<String, Value>;

/// Full in-memory snapshot of one database directory, keyed by file name.
#[derive(Debug, Default, Clone)]
pub struct DbSnapshot {
	pub entries: BTreeMap<String, EntryJson>,
}

impl DbSnapshot {
	pub fn remove(&mut self, file_name: &str) -> Option<EntryJson> {
		self.entries.remove(file_name)
	}

	pub fn insert(&mut self, file_name: impl Into<String>, entry: EntryJson) {
		self.entries.insert(file_name.into(), entry);
	}

	pub fn contains(&self, file_name: &str) -> bool {
		self.entries.contains_key(file_name)
	}
}

/// One sibling database, tagged with its own marker version.
#[derive(Debug, Clone)]
pub struct GlobalDatabase {
	pub version: Option<u32>,
	pub snapshot: DbSnapshot,
}

/// Snapshots of every sibling database, keyed by database directory name.
///
/// Handed to global converters only; removing an entry here deletes its file
/// when the upgrade step is persisted. This is the only sanctioned mechanism
/// for moving data between databases during an upgrade.
#[derive(Debug, Default)]
pub struct GlobalSnapshots {
	pub databases: BTreeMap<String, GlobalDatabase>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConverterOutcome {
	Keep,
	/// The entry's file is deleted immediately, not merely rewritten.
	Remove,
}

/// One version-upgrade step, `source_version() -> source_version() + 1`.
///
/// `upgrade` is invoked once per entry; the entry is taken out of the
/// snapshot for the duration of the call, so `rest` holds every other entry
/// of the database and may be freely modified.
pub trait DbConverter: Send + Sync {
	fn source_version(&self) -> u32;

	/// Global converters additionally receive the sibling-database snapshots.
	fn is_global(&self) -> bool {
		false
	}

	fn upgrade(
		&self,
		entry: &mut EntryJson,
		rest: &mut DbSnapshot,
		globals: Option<&mut GlobalSnapshots>,
	) -> Result<ConverterOutcome, VersionControlError>;
}

/// Statically registered, ordered converter pipeline.
///
/// The pipeline must be contiguous starting at version 0; everything after
/// the first gap is dropped and the contiguous prefix length defines the
/// latest supported version.
pub struct ConverterSet {
	steps: Vec<Arc<dyn DbConverter>>,
}

impl ConverterSet {
	pub fn builder() -> ConverterSetBuilder {
		ConverterSetBuilder {
			converters: Vec::new(),
		}
	}

	pub fn empty() -> Self {
		Self { steps: Vec::new() }
	}

	pub fn is_empty(&self) -> bool {
		self.steps.is_empty()
	}

	/// The version this pipeline can upgrade a database to.
	pub fn latest_version(&self) -> u32 {
		self.steps.len() as u32
	}

	pub fn step(&self, from: u32) -> Option<&Arc<dyn DbConverter>> {
		self.steps.get(from as usize)
	}
}

pub struct ConverterSetBuilder {
	converters: Vec<Arc<dyn DbConverter>>,
}

impl ConverterSetBuilder {
	pub fn add(mut self, converter: Arc<dyn DbConverter>) -> Self {
		self.converters.push(converter);
		self
	}

	/// Validates the registered converters into a contiguous pipeline.
	pub fn build(mut self) -> Result<ConverterSet, VersionControlError> {
		self.converters
			.sort_by_key(|converter| converter.source_version());

		for pair in self.converters.windows(2) {
			if pair[0].source_version() == pair[1].source_version() {
				return Err(VersionControlError::DuplicateConverter {
					version: pair[0].source_version(),
				});
			}
		}

		let contiguous = self
			.converters
			.iter()
			.enumerate()
			.take_while(|(i, converter)| converter.source_version() == *i as u32)
			.count();

		if contiguous < self.converters.len() {
			let dropped: Vec<u32> = self.converters[contiguous..]
				.iter()
				.map(|converter| converter.source_version())
				.collect();
			warn!(
				latest_supported = contiguous,
				?dropped,
				"Converter pipeline has a gap; converters after it will never run",
			);
			self.converters.truncate(contiguous);
		}

		Ok(ConverterSet {
			steps: self.converters,
		})
	}
}
