use std::fmt;

use thiserror::Error;

use crate::registry::RegistryError;

/// Which phase of a sync pass an entry failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum SyncPhase {
	Remove,
	Update,
	Register,
}

#[derive(Debug)]
pub struct SyncFailure {
	pub key: String,
	pub phase: SyncPhase,
	pub cause: RegistryError,
}

/// All per-entry failures of one sync pass, merged across the three phases.
#[derive(Error, Debug)]
pub struct SyncPassFailures {
	pub failures: Vec<SyncFailure>,
}

impl fmt::Display for SyncPassFailures {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"sync pass completed with {} failed entr{}: ",
			self.failures.len(),
			if self.failures.len() == 1 { "y" } else { "ies" }
		)?;

		for (i, failure) in self.failures.iter().enumerate() {
			if i > 0 {
				write!(f, "; ")?;
			}
			write!(
				f,
				"'{}' ({}): {}",
				failure.key, failure.phase, failure.cause
			)?;
		}

		Ok(())
	}
}

#[derive(Error, Debug)]
pub enum SyncError {
	#[error("external source failure: {0}")]
	Source(String),

	#[error("shutdown in progress")]
	ShutdownInProgress,

	#[error("synchronizer is already active")]
	AlreadyActive,

	#[error(transparent)]
	Pass(#[from] SyncPassFailures),
}

impl SyncError {
	pub fn is_shutdown(&self) -> bool {
		matches!(self, Self::ShutdownInProgress)
	}
}
