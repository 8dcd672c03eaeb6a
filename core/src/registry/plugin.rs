use std::{cell::Cell, path::Path, sync::Arc};

use parking_lot::ReentrantMutex;
use thiserror::Error;
use tracing::{error, trace};

use super::{entry::RegistryEntry, error::RegistryError, persistence::PersistenceUnit};

/// How a plugin hook can fail.
///
/// `Denied` is the distinguished rejection kind: it aborts the operation and
/// propagates to the caller. Every other failure is caught and logged without
/// blocking the operation or the remaining plugins.
#[derive(Error, Debug)]
pub enum PluginError {
	#[error("denied: {0}")]
	Denied(String),

	#[error("{0}")]
	Failed(String),
}

/// The mutating operation a plugin is asked to admit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum AccessOp {
	Register,
	Update,
	Remove,
	Save,
}

/// Outcome of a consistency check pass over a file-backed registry.
#[derive(Debug, Default, Clone)]
pub struct ConsistencyReport {
	/// Keys whose backing file was rewritten because its content drifted
	/// from the in-memory entry.
	pub repaired: Vec<String>,
	/// Keys whose backing file was missing and has been recreated.
	pub recreated: Vec<String>,
}

impl ConsistencyReport {
	pub fn is_clean(&self) -> bool {
		self.repaired.is_empty() && self.recreated.is_empty()
	}
}

/// Lifecycle observer/gatekeeper invoked around every registry mutation.
///
/// All hooks default to no-ops so a plugin only implements the transitions it
/// cares about.
#[allow(unused_variables)]
pub trait RegistryPlugin<E: RegistryEntry>: Send + Sync {
	fn name(&self) -> &'static str;

	fn prepare_registry(&self, directory: &Path) -> Result<(), PluginError> {
		Ok(())
	}

	fn check_access(&self, key: &E::Key, op: AccessOp) -> Result<(), PluginError> {
		Ok(())
	}

	fn before_register(&self, entry: &E) -> Result<(), PluginError> {
		Ok(())
	}

	fn after_register(&self, unit: &PersistenceUnit<E>) -> Result<(), PluginError> {
		Ok(())
	}

	fn before_update(&self, old: &E, new: &E) -> Result<(), PluginError> {
		Ok(())
	}

	fn after_update(&self, unit: &PersistenceUnit<E>) -> Result<(), PluginError> {
		Ok(())
	}

	fn before_remove(&self, entry: &E) -> Result<(), PluginError> {
		Ok(())
	}

	fn after_remove(&self, entry: &E) -> Result<(), PluginError> {
		Ok(())
	}

	fn before_clear(&self) -> Result<(), PluginError> {
		Ok(())
	}

	fn before_get(&self, key: &E::Key) -> Result<(), PluginError> {
		Ok(())
	}

	fn before_consistency_check(&self) -> Result<(), PluginError> {
		Ok(())
	}

	fn after_consistency_check(&self, report: &ConsistencyReport) -> Result<(), PluginError> {
		Ok(())
	}

	fn after_consistency_modification(&self, unit: &PersistenceUnit<E>) -> Result<(), PluginError> {
		Ok(())
	}

	fn after_registry_change(&self) -> Result<(), PluginError> {
		Ok(())
	}

	fn before_upstream_dependency_notification(&self) -> Result<(), PluginError> {
		Ok(())
	}
}

/// Ordered set of plugins dispatched around every registry mutation.
///
/// Dispatch is an explicit {Idle, Dispatching} state machine: a nested
/// dispatch from a hook on the same thread is skipped instead of deadlocking,
/// while concurrent dispatch from other threads serializes on the section
/// lock.
pub struct PluginPool<E: RegistryEntry> {
	plugins: Vec<Arc<dyn RegistryPlugin<E>>>,
	section: ReentrantMutex<Cell<bool>>,
}

impl<E: RegistryEntry> PluginPool<E> {
	pub fn new(plugins: Vec<Arc<dyn RegistryPlugin<E>>>) -> Self {
		Self {
			plugins,
			section: ReentrantMutex::new(Cell::new(false)),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.plugins.is_empty()
	}

	/// Invokes `hook` on every plugin in registration order.
	///
	/// A `Denied` result aborts immediately and surfaces as
	/// [`RegistryError::Rejected`]; any other plugin failure is logged and the
	/// remaining plugins still run.
	pub fn dispatch(
		&self,
		point: &'static str,
		mut hook: impl FnMut(&dyn RegistryPlugin<E>) -> Result<(), PluginError>,
	) -> Result<(), RegistryError> {
		if self.plugins.is_empty() {
			return Ok(());
		}

		let state = self.section.lock();
		if state.get() {
			// Nested dispatch from a hook on this thread.
			trace!(point, "Skipping re-entrant plugin dispatch");
			return Ok(());
		}
		state.set(true);

		let result = self.dispatch_locked(point, &mut hook);

		state.set(false);
		result
	}

	/// Like [`PluginPool::dispatch`], for hooks fired after the operation
	/// already happened: a denial can no longer abort anything, so it is
	/// logged as a plugin bug instead of propagated.
	pub fn notify(
		&self,
		point: &'static str,
		hook: impl FnMut(&dyn RegistryPlugin<E>) -> Result<(), PluginError>,
	) {
		if let Err(e) = self.dispatch(point, hook) {
			error!(point, %e, "Plugin denied a notification-only hook; ignoring");
		}
	}

	fn dispatch_locked(
		&self,
		point: &'static str,
		hook: &mut impl FnMut(&dyn RegistryPlugin<E>) -> Result<(), PluginError>,
	) -> Result<(), RegistryError> {
		for plugin in &self.plugins {
			match hook(plugin.as_ref()) {
				Ok(()) => {}
				Err(PluginError::Denied(reason)) => {
					return Err(RegistryError::Rejected {
						plugin: plugin.name(),
						reason,
					});
				}
				Err(PluginError::Failed(cause)) => {
					error!(
						plugin = plugin.name(),
						point, %cause,
						"Plugin hook failed; continuing with remaining plugins",
					);
				}
			}
		}

		Ok(())
	}
}
