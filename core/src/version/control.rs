use std::{
	io,
	path::{Path, PathBuf},
};

use hearth_utils::FileIOError;
use itertools::Itertools;
use serde_json::Value;
use tokio::fs;
use tracing::{debug, info, warn};

use super::{
	converter::{ConverterOutcome, ConverterSet, DbSnapshot, GlobalDatabase, GlobalSnapshots},
	error::VersionControlError,
	marker::{MarkerVersion, VersionMarker, DB_VERSION_FILE},
};

/// Resolved state of a database directory relative to the running software.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbVersionState {
	UpToDate { version: u32 },
	Outdated { current: u32, latest: u32 },
}

/// Version control for one database directory.
///
/// Guarantees that whatever a registry loads from this directory is in the
/// schema shape the running code expects, by applying a linear, per-version
/// upgrade where every step is durably committed before the next one begins.
pub struct VersionControl {
	db_dir: PathBuf,
	marker: VersionMarker,
	converters: ConverterSet,
	/// Schema version the software expects when no converter pipeline is
	/// supplied; with converters present the pipeline length wins.
	declared_latest: Option<u32>,
	entry_file_suffix: String,
	global_root: Option<PathBuf>,
}

impl VersionControl {
	pub fn new(db_dir: impl Into<PathBuf>, converters: ConverterSet) -> Self {
		let db_dir = db_dir.into();

		Self {
			marker: VersionMarker::new(&db_dir),
			db_dir,
			converters,
			declared_latest: None,
			entry_file_suffix: "json".to_string(),
			global_root: None,
		}
	}

	/// Declares the expected schema version for databases managed without a
	/// converter pipeline.
	pub fn with_declared_latest(mut self, latest: u32) -> Self {
		self.declared_latest = Some(latest);
		self
	}

	/// Enables global converters by pointing at the directory holding every
	/// sibling database.
	pub fn with_global_root(mut self, root: impl Into<PathBuf>) -> Self {
		self.global_root = Some(root.into());
		self
	}

	pub fn db_dir(&self) -> &Path {
		&self.db_dir
	}

	/// The latest schema version this instance supports: the contiguous
	/// converter pipeline length, or the declared version when no pipeline
	/// was registered.
	pub fn latest_supported(&self) -> u32 {
		if self.converters.is_empty() {
			self.declared_latest.unwrap_or(0)
		} else {
			self.converters.latest_version()
		}
	}

	/// Creates the marker at the latest version if it does not exist yet.
	pub async fn ensure_marker(&self) -> Result<(), VersionControlError> {
		if self.marker.read().await?.is_none() {
			self.marker.write(self.latest_supported()).await?;
		}

		Ok(())
	}

	/// Detects the directory's current version from the marker file.
	pub async fn detect_version(
		&self,
		remote_backed: bool,
		test_mode: bool,
	) -> Result<MarkerVersion, VersionControlError> {
		match self.marker.read().await? {
			Some(version) => Ok(version),
			None if remote_backed && !test_mode => Err(VersionControlError::MissingMarker),
			None => {
				if self.has_entry_files().await? {
					warn!(
						db = %self.db_dir.display(),
						"Database has entries but no version marker; assuming version 0",
					);
					Ok(MarkerVersion::Known(0))
				} else {
					// A vanilla database is at the latest version by definition.
					Ok(MarkerVersion::Known(self.latest_supported()))
				}
			}
		}
	}

	/// Version detection without running any converter.
	pub async fn detect_state(
		&self,
		remote_backed: bool,
		test_mode: bool,
	) -> Result<DbVersionState, VersionControlError> {
		let latest = self.latest_supported();

		match self.detect_version(remote_backed, test_mode).await? {
			MarkerVersion::Unknown => Err(VersionControlError::UnresolvedMarker),
			MarkerVersion::Known(current) if current == latest => {
				Ok(DbVersionState::UpToDate { version: current })
			}
			MarkerVersion::Known(current) if current > latest => {
				Err(VersionControlError::NewerThanSupported { current, latest })
			}
			MarkerVersion::Known(current) => Ok(DbVersionState::Outdated { current, latest }),
		}
	}

	/// Detects the current version and, when the converter pipeline covers
	/// the distance, upgrades the directory to the latest supported version.
	///
	/// Returns `Outdated` instead of upgrading when no pipeline is available;
	/// the caller decides whether an operator override permits loading.
	pub async fn validate_and_upgrade(
		&self,
		remote_backed: bool,
		test_mode: bool,
	) -> Result<DbVersionState, VersionControlError> {
		match self.detect_state(remote_backed, test_mode).await? {
			state @ DbVersionState::UpToDate { .. } => Ok(state),
			state @ DbVersionState::Outdated { .. } if self.converters.is_empty() => Ok(state),
			DbVersionState::Outdated { current, latest } => {
				self.upgrade(current, latest).await?;
				Ok(DbVersionState::UpToDate { version: latest })
			}
		}
	}

	async fn upgrade(&self, current: u32, latest: u32) -> Result<(), VersionControlError> {
		let mut globals: Option<GlobalSnapshots> = None;

		for (from, to) in (current..=latest).tuple_windows() {
			let converter = self
				.converters
				.step(from)
				.ok_or(VersionControlError::MissingConverter { from })?;

			info!(from, to, db = %self.db_dir.display(), "Running DB converter");

			let mut snapshot = self.load_snapshot(&self.db_dir).await?;

			// Sibling databases are snapshotted lazily, once, the first time
			// a global converter is reached in the pipeline.
			if converter.is_global() && globals.is_none() {
				globals = Some(self.load_global_snapshots().await?);
			}

			let names: Vec<String> = snapshot.entries.keys().cloned().collect();
			for name in names {
				// A previous call in this step may have removed the entry
				// through its access to the rest of the snapshot.
				let Some(mut entry) = snapshot.remove(&name) else {
					continue;
				};

				match converter.upgrade(&mut entry, &mut snapshot, globals.as_mut())? {
					ConverterOutcome::Keep => snapshot.insert(name, entry),
					ConverterOutcome::Remove => {
						let path = self.db_dir.join(&name);
						match fs::remove_file(&path).await {
							Ok(()) => debug!(
								file = %path.display(),
								"Converter removed entry; deleted its file",
							),
							Err(e) if e.kind() == io::ErrorKind::NotFound => {}
							Err(e) => return Err(FileIOError::from((&path, e)).into()),
						}
					}
				}
			}

			self.persist_snapshot(&self.db_dir, &snapshot).await?;
			if let Some(globals) = &globals {
				self.persist_globals(globals).await?;
			}

			// Commit this step before the next one begins; a crash leaves
			// the database at a well-defined intermediate version.
			self.marker.write(to).await?;
		}

		Ok(())
	}

	fn is_entry_file(&self, path: &Path) -> bool {
		path.extension()
			.and_then(|ext| ext.to_str())
			.map(|ext| ext == self.entry_file_suffix)
			.unwrap_or(false)
	}

	async fn has_entry_files(&self) -> Result<bool, VersionControlError> {
		let mut read_dir = match fs::read_dir(&self.db_dir).await {
			Ok(read_dir) => read_dir,
			Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
			Err(e) => return Err(FileIOError::from((&self.db_dir, e)).into()),
		};

		while let Some(dir_entry) = read_dir
			.next_entry()
			.await
			.map_err(|e| FileIOError::from((&self.db_dir, e)))?
		{
			let path = dir_entry.path();
			if self.is_entry_file(&path) {
				return Ok(true);
			}
		}

		Ok(false)
	}

	async fn load_snapshot(&self, dir: &Path) -> Result<DbSnapshot, VersionControlError> {
		let mut snapshot = DbSnapshot::default();

		let mut read_dir = match fs::read_dir(dir).await {
			Ok(read_dir) => read_dir,
			Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(snapshot),
			Err(e) => return Err(FileIOError::from((dir, e)).into()),
		};

		while let Some(dir_entry) = read_dir
			.next_entry()
			.await
			.map_err(|e| FileIOError::from((dir, e)))?
		{
			let path = dir_entry.path();
			let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
				warn!(path = %path.display(), "Skipping non UTF-8 file name");
				continue;
			};

			if name == DB_VERSION_FILE || !self.is_entry_file(&path) {
				continue;
			}

			let bytes = fs::read(&path)
				.await
				.map_err(|e| FileIOError::from((&path, e, "Failed to read entry file")))?;

			match serde_json::from_slice::<Value>(&bytes)? {
				Value::Object(object) => snapshot.insert(name, object),
				_ => return Err(VersionControlError::NonEntryJson(name.to_string())),
			}
		}

		Ok(snapshot)
	}

	async fn persist_snapshot(
		&self,
		dir: &Path,
		snapshot: &DbSnapshot,
	) -> Result<(), VersionControlError> {
		for (name, entry) in &snapshot.entries {
			let path = dir.join(name);
			let contents = serde_json::to_vec_pretty(&Value::Object(entry.clone()))?;
			fs::write(&path, contents)
				.await
				.map_err(|e| FileIOError::from((&path, e, "Failed to write upgraded entry")))?;
		}

		// Files dropped from the snapshot by the converter are deleted.
		let mut read_dir = match fs::read_dir(dir).await {
			Ok(read_dir) => read_dir,
			Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
			Err(e) => return Err(FileIOError::from((dir, e)).into()),
		};

		while let Some(dir_entry) = read_dir
			.next_entry()
			.await
			.map_err(|e| FileIOError::from((dir, e)))?
		{
			let path = dir_entry.path();
			let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
				continue;
			};

			if name != DB_VERSION_FILE && self.is_entry_file(&path) && !snapshot.contains(name) {
				fs::remove_file(&path)
					.await
					.map_err(|e| FileIOError::from((&path, e)))?;
				debug!(file = %path.display(), "Deleted entry file dropped during upgrade");
			}
		}

		Ok(())
	}

	async fn load_global_snapshots(&self) -> Result<GlobalSnapshots, VersionControlError> {
		let mut globals = GlobalSnapshots::default();

		let Some(root) = &self.global_root else {
			return Ok(globals);
		};
		let own_name = self.db_dir.file_name();

		let mut read_dir = fs::read_dir(root)
			.await
			.map_err(|e| FileIOError::from((root, e)))?;

		while let Some(dir_entry) = read_dir
			.next_entry()
			.await
			.map_err(|e| FileIOError::from((root, e)))?
		{
			let path = dir_entry.path();
			if !dir_entry
				.metadata()
				.await
				.map_err(|e| FileIOError::from((&path, e)))?
				.is_dir()
			{
				continue;
			}

			let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
				continue;
			};
			if path.file_name() == own_name {
				continue;
			}

			let version = match VersionMarker::new(&path).read().await? {
				Some(MarkerVersion::Known(version)) => Some(version),
				_ => None,
			};

			globals.databases.insert(
				name.to_string(),
				GlobalDatabase {
					version,
					snapshot: self.load_snapshot(&path).await?,
				},
			);
		}

		Ok(globals)
	}

	async fn persist_globals(&self, globals: &GlobalSnapshots) -> Result<(), VersionControlError> {
		let Some(root) = &self.global_root else {
			return Ok(());
		};

		for (name, database) in &globals.databases {
			self.persist_snapshot(&root.join(name), &database.snapshot)
				.await?;
		}

		Ok(())
	}
}
