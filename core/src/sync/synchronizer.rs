use std::{
	collections::HashMap,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
	time::Duration,
};

use tokio::{
	sync::broadcast::{self, error::RecvError},
	task::JoinHandle,
	time::Instant,
};
use tracing::{debug, error, warn};

use crate::registry::{Registry, RegistryEntry};

use super::{
	diff::diff_snapshot,
	error::{SyncError, SyncFailure, SyncPassFailures, SyncPhase},
	source::{EntrySource, SourceSignal},
};

/// Minimum delay between two sync passes.
pub const DEFAULT_MIN_SYNC_INTERVAL: Duration = Duration::from_millis(15_000);

#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
	pub min_sync_interval: Duration,
	/// Treat any sync failure as fatal, to surface regressions early in
	/// verification runs.
	pub verification_mode: bool,
}

impl Default for SyncOptions {
	fn default() -> Self {
		Self {
			min_sync_interval: DEFAULT_MIN_SYNC_INTERVAL,
			verification_mode: false,
		}
	}
}

/// Per-entry admission policy of a synchronizer.
#[allow(unused_variables)]
pub trait SyncPolicy<E>: Send + Sync {
	/// Rejecting an entry is not an error: unsupported new entries are
	/// skipped and counted, unsupported updates demote to removals.
	fn is_supported(&self, entry: &E) -> bool {
		true
	}

	/// Called at the start of every pass; `is_initial_sync` distinguishes the
	/// very first pass so implementations can special-case bulk loads.
	fn pass_started(&self, is_initial_sync: bool) {}
}

/// Default policy: everything is supported.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl<E> SyncPolicy<E> for AcceptAll {}

/// What one sync pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
	pub registered: usize,
	pub updated: usize,
	pub removed: usize,
	pub skipped_unsupported: usize,
	pub initial: bool,
}

/// Keeps a registry's contents equal to a push-based external source.
///
/// Every source notification schedules a rate-limited re-sync on a background
/// task; notifications inside the window collapse into one pending sync. The
/// pass itself runs under an exclusive lock and applies a three-way diff with
/// per-entry fault isolation.
pub struct Synchronizer<E, S, R, P>
where
	E: RegistryEntry,
	S: EntrySource<E> + 'static,
	R: Registry<E> + 'static,
	P: SyncPolicy<E> + 'static,
{
	inner: Arc<Inner<E, S, R, P>>,
	listener: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

struct Inner<E: RegistryEntry, S, R, P> {
	source: Arc<S>,
	registry: Arc<R>,
	policy: P,
	options: SyncOptions,
	/// Mirror of what has actually been pushed into the registry; its mutex
	/// doubles as the exclusive sync-pass lock.
	snapshot: tokio::sync::Mutex<HashMap<E::Key, E>>,
	last_sync: parking_lot::Mutex<Option<Instant>>,
	initial_done: AtomicBool,
}

impl<E, S, R, P> Synchronizer<E, S, R, P>
where
	E: RegistryEntry,
	S: EntrySource<E> + 'static,
	R: Registry<E> + 'static,
	P: SyncPolicy<E> + 'static,
{
	pub fn new(source: Arc<S>, registry: Arc<R>, policy: P, options: SyncOptions) -> Self {
		Self {
			inner: Arc::new(Inner {
				source,
				registry,
				policy,
				options,
				snapshot: tokio::sync::Mutex::new(HashMap::new()),
				last_sync: parking_lot::Mutex::new(None),
				initial_done: AtomicBool::new(false),
			}),
			listener: parking_lot::Mutex::new(None),
		}
	}

	/// Whether no full pass has completed yet.
	pub fn is_initial_sync(&self) -> bool {
		!self.inner.initial_done.load(Ordering::Acquire)
	}

	/// Subscribes to the source and, if its data is already available, runs
	/// one synchronization pass immediately.
	///
	/// Failures of that pass other than shutdown-in-progress are logged, not
	/// returned (except in verification mode, where any failure is fatal).
	pub async fn activate(&self) -> Result<(), SyncError> {
		if self.listener.lock().is_some() {
			return Err(SyncError::AlreadyActive);
		}

		// Subscribe before the immediate pass so no notification is missed.
		let rx = self.inner.source.subscribe();

		if self.inner.source.is_data_available() {
			match self.inner.run_pass().await {
				Ok(report) => debug!(?report, "Initial synchronization complete"),
				Err(e) if e.is_shutdown() => return Err(e),
				Err(e) if self.inner.options.verification_mode => return Err(e),
				Err(e) => error!(%e, "Initial synchronization failed"),
			}
		}

		let handle = tokio::spawn(listen(Arc::clone(&self.inner), rx));

		let mut listener = self.listener.lock();
		if listener.is_some() {
			handle.abort();
			return Err(SyncError::AlreadyActive);
		}
		*listener = Some(handle);

		Ok(())
	}

	/// Unsubscribes and cancels any pending rate-limited trigger.
	pub fn deactivate(&self) {
		if let Some(handle) = self.listener.lock().take() {
			handle.abort();
		}
	}

	/// Runs one synchronization pass now, regardless of the rate limiter.
	pub async fn synchronize(&self) -> Result<SyncReport, SyncError> {
		self.inner.run_pass().await
	}
}

impl<E, S, R, P> Drop for Synchronizer<E, S, R, P>
where
	E: RegistryEntry,
	S: EntrySource<E> + 'static,
	R: Registry<E> + 'static,
	P: SyncPolicy<E> + 'static,
{
	fn drop(&mut self) {
		self.deactivate();
	}
}

async fn listen<E, S, R, P>(inner: Arc<Inner<E, S, R, P>>, mut rx: broadcast::Receiver<SourceSignal>)
where
	E: RegistryEntry,
	S: EntrySource<E>,
	R: Registry<E>,
	P: SyncPolicy<E>,
{
	let mut pending: Option<Instant> = None;

	loop {
		let wait = async {
			match pending {
				Some(deadline) => tokio::time::sleep_until(deadline).await,
				None => std::future::pending::<()>().await,
			}
		};

		tokio::select! {
			received = rx.recv() => match received {
				// A lagged receiver still means "something changed".
				Ok(_) | Err(RecvError::Lagged(_)) => {
					if pending.is_none() {
						pending = Some(inner.next_allowed_sync());
					}
				}
				Err(RecvError::Closed) => {
					debug!("Entry source dropped; stopping synchronizer listener");
					break;
				}
			},
			_ = wait => {
				pending = None;
				match inner.run_pass().await {
					Ok(report) => debug!(?report, "Synchronization complete"),
					Err(e) if e.is_shutdown() => {
						warn!("Shutdown during synchronization; stopping listener");
						break;
					}
					Err(e) if inner.options.verification_mode => {
						panic!("sync failure in verification mode: {e}");
					}
					Err(e) => error!(%e, "Synchronization pass failed"),
				}
			}
		}
	}
}

impl<E, S, R, P> Inner<E, S, R, P>
where
	E: RegistryEntry,
	S: EntrySource<E>,
	R: Registry<E>,
	P: SyncPolicy<E>,
{
	fn next_allowed_sync(&self) -> Instant {
		let now = Instant::now();
		match *self.last_sync.lock() {
			Some(last) => (last + self.options.min_sync_interval).max(now),
			None => now,
		}
	}

	async fn run_pass(&self) -> Result<SyncReport, SyncError> {
		let mut snapshot = self.snapshot.lock().await;

		let is_initial = !self.initial_done.load(Ordering::Acquire);
		self.policy.pass_started(is_initial);

		let observed = self.source.entries().await?;
		let diff = diff_snapshot::<E>(&snapshot, &observed);

		let mut applied = snapshot.clone();
		let mut failures: Vec<SyncFailure> = Vec::new();
		let mut report = SyncReport {
			initial: is_initial,
			..Default::default()
		};
		let mut shutdown = false;

		'phases: {
			// Removals run before updates and updates before registrations:
			// an entry that became unsupported is dropped before new entries
			// are considered, avoiding duplicate-identity conflicts.
			for entry in &diff.removed {
				let key = entry.id();
				match self.registry.remove(&key).await {
					Ok(_) => {
						applied.remove(&key);
						report.removed += 1;
					}
					Err(e) if e.is_shutdown() => {
						shutdown = true;
						break 'phases;
					}
					Err(e) => failures.push(SyncFailure {
						key: key.to_string(),
						phase: SyncPhase::Remove,
						cause: e,
					}),
				}
			}

			for entry in &diff.updated {
				let key = entry.id();

				if !self.policy.is_supported(entry) {
					// No longer supported: removal instead of update.
					match self.registry.remove(&key).await {
						Ok(_) => {
							applied.remove(&key);
							report.removed += 1;
						}
						Err(e) if e.is_shutdown() => {
							shutdown = true;
							break 'phases;
						}
						Err(e) => failures.push(SyncFailure {
							key: key.to_string(),
							phase: SyncPhase::Update,
							cause: e,
						}),
					}
					continue;
				}

				match self.registry.update(entry.clone()).await {
					Ok(()) => {
						applied.insert(key, entry.clone());
						report.updated += 1;
					}
					Err(e) if e.is_shutdown() => {
						shutdown = true;
						break 'phases;
					}
					Err(e) => failures.push(SyncFailure {
						key: key.to_string(),
						phase: SyncPhase::Update,
						cause: e,
					}),
				}
			}

			for entry in &diff.new {
				if !self.policy.is_supported(entry) {
					report.skipped_unsupported += 1;
					continue;
				}

				match self.registry.register(entry.clone()).await {
					Ok(()) => {
						applied.insert(entry.id(), entry.clone());
						report.registered += 1;
					}
					Err(e) if e.is_shutdown() => {
						shutdown = true;
						break 'phases;
					}
					Err(e) => failures.push(SyncFailure {
						key: entry.id().to_string(),
						phase: SyncPhase::Register,
						cause: e,
					}),
				}
			}
		}

		// Replaced exactly once per pass, with what was actually applied, so
		// the next diff compares against reality rather than intent.
		*snapshot = applied;
		*self.last_sync.lock() = Some(Instant::now());
		drop(snapshot);

		if shutdown {
			return Err(SyncError::ShutdownInProgress);
		}

		self.initial_done.store(true, Ordering::Release);

		if failures.is_empty() {
			Ok(report)
		} else {
			warn!(
				count = failures.len(),
				"Synchronization pass completed with failures",
			);
			Err(SyncPassFailures { failures }.into())
		}
	}
}
