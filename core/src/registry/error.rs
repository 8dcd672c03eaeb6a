use std::fmt;

use hearth_utils::FileIOError;
use thiserror::Error;

use crate::version::VersionControlError;

use super::persistence::PersistenceError;

#[derive(Error, Debug)]
pub enum RegistryError {
	#[error("operation rejected by plugin '{plugin}': {reason}")]
	Rejected { plugin: &'static str, reason: String },

	#[error("write access denied: {0}")]
	WriteAccessDenied(String),

	#[error("registry was already loaded; loadRegistry is one-shot per instance")]
	AlreadyLoaded,

	#[error(
		"database schema is outdated (version {current}, latest supported {latest}); \
		 load with force mode to access it anyway"
	)]
	Outdated { current: u32, latest: u32 },

	#[error("remote-backed registry has no version control configured")]
	MissingVersionControl,

	#[error("no entry registered for key '{0}'")]
	UnknownKey(String),

	#[error("an entry with key '{0}' is already registered")]
	DuplicateKey(String),

	#[error("shutdown in progress")]
	ShutdownInProgress,

	#[error(transparent)]
	Version(#[from] VersionControlError),

	#[error(transparent)]
	Persistence(#[from] PersistenceError),

	#[error(transparent)]
	FileIO(#[from] FileIOError),

	#[error(transparent)]
	Aggregate(#[from] AggregateError),
}

impl RegistryError {
	/// Shutdown conditions short-circuit multi-step operations instead of
	/// being aggregated with ordinary per-entry failures.
	pub fn is_shutdown(&self) -> bool {
		matches!(self, Self::ShutdownInProgress)
	}

	/// Rejections are caller-correctable and are never retried or swallowed.
	pub fn is_rejection(&self) -> bool {
		matches!(self, Self::Rejected { .. } | Self::WriteAccessDenied(_))
	}
}

/// One combined failure for a bulk pass (load, save, consistency check),
/// carrying the per-entry causes so callers can log and keep operating with
/// whatever subset succeeded.
#[derive(Error, Debug)]
pub struct AggregateError {
	pub operation: &'static str,
	pub failures: Vec<(String, RegistryError)>,
}

impl AggregateError {
	pub fn new(operation: &'static str, failures: Vec<(String, RegistryError)>) -> Self {
		Self {
			operation,
			failures,
		}
	}

	/// Wraps the collected failures, or returns `Ok` when nothing failed.
	pub fn into_result(self) -> Result<(), RegistryError> {
		if self.failures.is_empty() {
			Ok(())
		} else {
			Err(self.into())
		}
	}
}

impl fmt::Display for AggregateError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"{} failed for {} entr{}: ",
			self.operation,
			self.failures.len(),
			if self.failures.len() == 1 { "y" } else { "ies" }
		)?;

		for (i, (subject, cause)) in self.failures.iter().enumerate() {
			if i > 0 {
				write!(f, "; ")?;
			}
			write!(f, "'{subject}': {cause}")?;
		}

		Ok(())
	}
}
