use std::{
	collections::HashMap,
	io,
	path::{Path, PathBuf},
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
};

use async_trait::async_trait;
use futures::future::join_all;
use hearth_config::RuntimeFlags;
use hearth_utils::{report_error, FileIOError};
use tokio::{
	fs,
	sync::{broadcast, OwnedMutexGuard, RwLock},
};
use tracing::{debug, info, warn};

use crate::version::{DbVersionState, GitVersionControl, VersionControl};

use super::{
	entry::RegistryEntry,
	error::{AggregateError, RegistryError},
	memory::MemoryRegistry,
	persistence::{FileProcessor, FileProvider, PersistenceMode, PersistenceUnit},
	plugin::{AccessOp, ConsistencyReport, PluginPool, RegistryPlugin},
	Registry,
};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Change notification emitted to registry subscribers.
#[derive(Debug, Clone)]
pub enum RegistryEvent<E> {
	Registered(E),
	Updated { old: E, new: E },
	Removed(E),
}

/// Version control attached to a file-backed registry.
pub enum RegistryVersionControl {
	None,
	Local(VersionControl),
	Git(GitVersionControl),
}

impl RegistryVersionControl {
	fn local(&self) -> Option<&VersionControl> {
		match self {
			Self::None => None,
			Self::Local(vc) => Some(vc),
			Self::Git(vc) => Some(vc.local()),
		}
	}
}

pub struct FileBackedRegistryConfig<E: RegistryEntry> {
	pub dir: PathBuf,
	pub provider: Arc<dyn FileProvider<E>>,
	pub processor: Arc<dyn FileProcessor<E>>,
	pub plugins: Vec<Arc<dyn RegistryPlugin<E>>>,
	pub version_control: RegistryVersionControl,
	/// Whether this registry's database is hosted remotely. A remote-backed
	/// registry without version control is a fatal configuration error.
	pub remote_backed: bool,
	pub flags: RuntimeFlags,
}

/// Registry that mirrors each entry 1:1 to a file on disk, under plugin
/// governance.
///
/// The canonical file name of an entry is a pure function of its content, so
/// after every save the set of on-disk file names is a deterministic function
/// of registry content.
pub struct FileBackedRegistry<E: RegistryEntry> {
	dir: PathBuf,
	memory: MemoryRegistry<E>,
	units: RwLock<HashMap<E::Key, PersistenceUnit<E>>>,
	key_locks: parking_lot::Mutex<HashMap<E::Key, Arc<tokio::sync::Mutex<()>>>>,
	plugins: PluginPool<E>,
	provider: Arc<dyn FileProvider<E>>,
	processor: Arc<dyn FileProcessor<E>>,
	version_control: RegistryVersionControl,
	remote_backed: bool,
	flags: RuntimeFlags,
	loaded: AtomicBool,
	read_only: AtomicBool,
	outdated: AtomicBool,
	shutting_down: AtomicBool,
	warned_read_only: AtomicBool,
	event_tx: broadcast::Sender<RegistryEvent<E>>,
}

impl<E: RegistryEntry> FileBackedRegistry<E> {
	pub fn new(config: FileBackedRegistryConfig<E>) -> Self {
		let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

		Self {
			dir: config.dir,
			memory: MemoryRegistry::new(),
			units: RwLock::new(HashMap::new()),
			key_locks: parking_lot::Mutex::new(HashMap::new()),
			plugins: PluginPool::new(config.plugins),
			provider: config.provider,
			processor: config.processor,
			version_control: config.version_control,
			remote_backed: config.remote_backed,
			flags: config.flags,
			loaded: AtomicBool::new(false),
			read_only: AtomicBool::new(false),
			outdated: AtomicBool::new(false),
			shutting_down: AtomicBool::new(false),
			warned_read_only: AtomicBool::new(false),
			event_tx,
		}
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent<E>> {
		self.event_tx.subscribe()
	}

	pub fn is_read_only(&self) -> bool {
		self.read_only.load(Ordering::Acquire)
	}

	pub fn is_outdated(&self) -> bool {
		self.outdated.load(Ordering::Acquire)
	}

	/// The schema version this registry's software supports, i.e. what an
	/// up-to-date database directory is at.
	pub fn db_version(&self) -> u32 {
		self.version_control
			.local()
			.map(VersionControl::latest_supported)
			.unwrap_or(0)
	}

	/// Loads every matching file in the database directory, one-shot.
	///
	/// Runs version-control validation/upgrade first; honors the reset-db
	/// flag by skipping the load entirely; detects read-only conditions; and
	/// accumulates per-file failures without aborting, surfacing them as one
	/// aggregate only after every file was attempted.
	pub async fn load_registry(&self) -> Result<(), RegistryError> {
		if self.loaded.swap(true, Ordering::SeqCst) {
			return Err(RegistryError::AlreadyLoaded);
		}

		self.plugins
			.dispatch("prepare_registry", |p| p.prepare_registry(&self.dir))?;

		self.run_version_control().await?;

		if self.flags.reset_db {
			info!(
				dir = %self.dir.display(),
				"Database reset requested; starting with an empty registry",
			);
			return Ok(());
		}

		fs::create_dir_all(&self.dir)
			.await
			.map_err(|e| FileIOError::from((&self.dir, e)))?;

		if self.is_shared_or_read_only_dir().await? {
			info!(dir = %self.dir.display(), "Database directory is read-only");
			self.read_only.store(true, Ordering::Release);
		}

		let mut failures = Vec::new();
		let mut read_dir = fs::read_dir(&self.dir)
			.await
			.map_err(|e| FileIOError::from((&self.dir, e)))?;

		while let Some(dir_entry) = read_dir
			.next_entry()
			.await
			.map_err(|e| FileIOError::from((&self.dir, e)))?
		{
			let path = dir_entry.path();

			let metadata = match dir_entry.metadata().await {
				Ok(metadata) => metadata,
				Err(e) => {
					failures.push((
						path.display().to_string(),
						FileIOError::from((&path, e)).into(),
					));
					continue;
				}
			};

			if !metadata.is_file() || !self.provider.matches(&path) {
				continue;
			}

			// Any individual non-writable file puts the whole registry into
			// read-only mode.
			if metadata.permissions().readonly() {
				info!(
					file = %path.display(),
					"Entry file is not writable; registry goes read-only",
				);
				self.read_only.store(true, Ordering::Release);
			}

			match PersistenceUnit::from_file(path.clone(), Arc::clone(&self.processor)).await {
				Ok(unit) => {
					let entry = unit.entry().clone();
					let key = entry.id();
					match self.memory.register(entry).await {
						Ok(()) => {
							self.units.write().await.insert(key, unit);
						}
						Err(e) => failures.push((path.display().to_string(), e)),
					}
				}
				Err(e) => {
					warn!(
						file = %path.display(),
						%e,
						"Failed to load entry file; skipping",
					);
					failures.push((path.display().to_string(), e.into()));
				}
			}
		}

		debug!(
			dir = %self.dir.display(),
			entries = self.memory.len().await,
			"Loaded registry",
		);

		AggregateError::new("load_registry", failures).into_result()
	}

	async fn run_version_control(&self) -> Result<(), RegistryError> {
		let state = match &self.version_control {
			RegistryVersionControl::None => {
				if self.remote_backed && !self.flags.test_mode {
					return Err(RegistryError::MissingVersionControl);
				}
				return Ok(());
			}
			RegistryVersionControl::Local(vc) => {
				vc.validate_and_upgrade(self.remote_backed, self.flags.test_mode)
					.await?
			}
			RegistryVersionControl::Git(vc) => {
				let outcome = vc.synchronize().await?;
				if outcome.permits_upgrade() {
					vc.local().validate_and_upgrade(true, self.flags.test_mode).await?
				} else {
					debug!(%outcome, "Custom database branch; skipping auto-upgrade");
					vc.local().detect_state(true, self.flags.test_mode).await?
				}
			}
		};

		match state {
			DbVersionState::UpToDate { .. } => Ok(()),
			DbVersionState::Outdated { current, latest } => {
				if self.flags.force_writes {
					warn!(
						current,
						latest,
						"Loading outdated database because force mode is enabled; \
						 entries may need manual fixes",
					);
					self.outdated.store(true, Ordering::Release);
					Ok(())
				} else {
					Err(RegistryError::Outdated { current, latest })
				}
			}
		}
	}

	/// Persists every unit, then applies filename drift: an entry whose
	/// canonical name no longer matches its file's actual name gets renamed
	/// on disk. No-op in test mode; refuses (logs, does not throw) when read
	/// only and not forced.
	pub async fn save_registry(&self, force: bool) -> Result<(), RegistryError> {
		if self.flags.test_mode {
			return Ok(());
		}

		if let Err(reason) = self.check_write_access().await {
			if force {
				debug!(%reason, "Write access check failed, but save is forced");
			} else {
				if !self.warned_read_only.swap(true, Ordering::SeqCst) {
					warn!(%reason, "Skipping registry save");
				}
				return Ok(());
			}
		}

		// The version marker is created at first save.
		if let Some(vc) = self.version_control.local() {
			vc.ensure_marker().await?;
		}

		let mut units = self.units.write().await;
		let mut failures = Vec::new();

		for (key, result) in join_all(units.iter().map(|(key, unit)| async move {
			(key.to_string(), unit.persist().await)
		}))
		.await
		{
			if let Err(e) = result {
				failures.push((key, e.into()));
			}
		}

		for (key, unit) in units.iter_mut() {
			let canonical = self.provider.file_name(unit.entry());
			let current = unit
				.file()
				.file_name()
				.and_then(|name| name.to_str())
				.map(str::to_string);

			if current.as_deref() != Some(canonical.as_str()) {
				match unit.rename_to(&canonical).await {
					Ok(()) => debug!(
						key = %key,
						from = current.as_deref().unwrap_or("<non-utf8>"),
						to = %canonical,
						"Renamed entry file to its canonical name",
					),
					Err(e) => failures.push((key.to_string(), e.into())),
				}
			}
		}

		AggregateError::new("save_registry", failures).into_result()
	}

	/// Layered write-access guard; each layer can reject independently.
	pub async fn check_write_access(&self) -> Result<(), RegistryError> {
		if self.is_read_only() && !self.flags.force_writes {
			return Err(RegistryError::WriteAccessDenied(
				"registry is in read-only mode".to_string(),
			));
		}

		if self.flags.force_writes {
			return Ok(());
		}

		if self.flags.global_read_only {
			return Err(RegistryError::WriteAccessDenied(
				"global read-only mode is enabled".to_string(),
			));
		}

		if self.is_outdated() {
			return Err(RegistryError::WriteAccessDenied(
				"database schema is outdated".to_string(),
			));
		}

		if self.is_shared_or_read_only_dir().await? {
			return Err(RegistryError::WriteAccessDenied(format!(
				"database directory '{}' is not writable",
				self.dir.display()
			)));
		}

		Ok(())
	}

	/// Verifies that every backing file still matches its in-memory entry,
	/// rewriting files that drifted or disappeared.
	pub async fn consistency_check(&self) -> Result<ConsistencyReport, RegistryError> {
		self.plugins
			.dispatch("before_consistency_check", |p| p.before_consistency_check())?;

		let mut report = ConsistencyReport::default();
		let mut failures = Vec::new();

		{
			let units = self.units.read().await;
			for (key, unit) in units.iter() {
				let missing = !fs::try_exists(unit.file()).await.unwrap_or(false);

				match unit.is_drifted().await {
					Ok(false) => continue,
					Ok(true) => {
						if !self.can_persist() {
							continue;
						}
						match unit.persist().await {
							Ok(()) => {
								if missing {
									report.recreated.push(key.to_string());
								} else {
									report.repaired.push(key.to_string());
								}
								self.plugins.notify("after_consistency_modification", |p| {
									p.after_consistency_modification(unit)
								});
							}
							Err(e) => failures.push((key.to_string(), e.into())),
						}
					}
					Err(e) => failures.push((key.to_string(), e.into())),
				}
			}
		}

		if !report.is_clean() {
			info!(
				repaired = report.repaired.len(),
				recreated = report.recreated.len(),
				"Consistency check modified entry files",
			);
		}

		self.plugins
			.notify("after_consistency_check", |p| p.after_consistency_check(&report));

		AggregateError::new("consistency_check", failures).into_result()?;

		Ok(report)
	}

	/// Best-effort final save, then drops all persistence units.
	///
	/// Mutations arriving after this point fail with
	/// [`RegistryError::ShutdownInProgress`].
	pub async fn shutdown(&self) {
		self.shutting_down.store(true, Ordering::SeqCst);
		report_error(&self.save_registry(false).await);
		self.units.write().await.clear();
	}

	pub async fn clear(&self) -> Result<(), RegistryError> {
		self.plugins.dispatch("before_clear", |p| p.before_clear())?;
		self.memory.clear().await;
		self.units.write().await.clear();
		self.key_locks.lock().clear();

		Ok(())
	}

	/// Whether mutations may touch the file layer at all.
	fn can_persist(&self) -> bool {
		!self.flags.test_mode
			&& !self.flags.global_read_only
			&& (!self.is_read_only() || self.flags.force_writes)
	}

	async fn is_shared_or_read_only_dir(&self) -> Result<bool, RegistryError> {
		match fs::metadata(&self.dir).await {
			Ok(metadata) => Ok(metadata.permissions().readonly()),
			Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
			Err(e) => Err(FileIOError::from((&self.dir, e)).into()),
		}
	}

	/// Sequences register/update/remove for one key, so an update racing its
	/// own registration waits instead of hitting a missing persistence unit.
	async fn lock_key(&self, key: &E::Key) -> OwnedMutexGuard<()> {
		let lock = {
			let mut locks = self.key_locks.lock();
			Arc::clone(locks.entry(key.clone()).or_default())
		};

		lock.lock_owned().await
	}

	fn guard_shutdown(&self) -> Result<(), RegistryError> {
		if self.shutting_down.load(Ordering::Acquire) {
			Err(RegistryError::ShutdownInProgress)
		} else {
			Ok(())
		}
	}

	fn emit(&self, event: RegistryEvent<E>) {
		self.plugins.notify("before_upstream_dependency_notification", |p| {
			p.before_upstream_dependency_notification()
		});

		if self.event_tx.receiver_count() > 0 {
			// Send only fails when every receiver is gone, which is fine.
			let _ = self.event_tx.send(event);
		}
	}
}

#[async_trait]
impl<E: RegistryEntry> Registry<E> for FileBackedRegistry<E> {
	async fn register(&self, entry: E) -> Result<(), RegistryError> {
		self.guard_shutdown()?;

		let key = entry.id();
		let _key_guard = self.lock_key(&key).await;

		self.plugins
			.dispatch("check_access", |p| p.check_access(&key, AccessOp::Register))?;
		self.plugins
			.dispatch("before_register", |p| p.before_register(&entry))?;

		self.memory.register(entry.clone()).await?;

		if self.can_persist() {
			let unit = match PersistenceUnit::new(
				&self.dir,
				&self.provider.file_name(&entry),
				entry.clone(),
				Arc::clone(&self.processor),
				PersistenceMode::Create,
			)
			.await
			{
				Ok(unit) => unit,
				Err(e) => {
					// Roll the in-memory insert back so memory and disk agree.
					let _ = self.memory.remove(&key).await;
					return Err(e.into());
				}
			};

			self.plugins
				.notify("after_register", |p| p.after_register(&unit));
			self.units.write().await.insert(key, unit);
		}

		self.plugins
			.notify("after_registry_change", |p| p.after_registry_change());
		self.emit(RegistryEvent::Registered(entry));

		Ok(())
	}

	async fn update(&self, entry: E) -> Result<(), RegistryError> {
		self.guard_shutdown()?;

		let key = entry.id();
		let _key_guard = self.lock_key(&key).await;

		self.plugins
			.dispatch("check_access", |p| p.check_access(&key, AccessOp::Update))?;

		let old = self
			.memory
			.get(&key)
			.await?
			.ok_or_else(|| RegistryError::UnknownKey(key.to_string()))?;

		self.plugins
			.dispatch("before_update", |p| p.before_update(&old, &entry))?;

		self.memory.replace(entry.clone()).await?;

		{
			let mut units = self.units.write().await;
			if let Some(unit) = units.get_mut(&key) {
				unit.set_entry(entry.clone());
				if self.can_persist() {
					unit.persist().await?;
				}
				self.plugins.notify("after_update", |p| p.after_update(unit));
			} else {
				// Only possible for entries registered while the file layer
				// was unavailable (read-only/test mode); nothing to persist.
				debug!(key = %key, "No persistence unit for updated entry");
			}
		}

		self.plugins
			.notify("after_registry_change", |p| p.after_registry_change());
		self.emit(RegistryEvent::Updated { old, new: entry });

		Ok(())
	}

	async fn remove(&self, key: &E::Key) -> Result<E, RegistryError> {
		self.guard_shutdown()?;

		let _key_guard = self.lock_key(key).await;

		self.plugins
			.dispatch("check_access", |p| p.check_access(key, AccessOp::Remove))?;

		let entry = self
			.memory
			.get(key)
			.await?
			.ok_or_else(|| RegistryError::UnknownKey(key.to_string()))?;

		self.plugins
			.dispatch("before_remove", |p| p.before_remove(&entry))?;

		self.memory.remove(key).await?;

		if let Some(unit) = self.units.write().await.remove(key) {
			if self.can_persist() {
				unit.delete().await?;
			}
		}

		self.plugins.notify("after_remove", |p| p.after_remove(&entry));
		self.plugins
			.notify("after_registry_change", |p| p.after_registry_change());
		self.emit(RegistryEvent::Removed(entry.clone()));

		Ok(entry)
	}

	async fn get(&self, key: &E::Key) -> Result<Option<E>, RegistryError> {
		self.plugins.dispatch("before_get", |p| p.before_get(key))?;
		self.memory.get(key).await
	}

	async fn entries(&self) -> Vec<E> {
		self.memory.entries().await
	}
}
