use std::{fmt::Display, hash::Hash};

use serde_json::Value;
use thiserror::Error;

/// Bound alias for registry key types.
///
/// Keys are ordered so directory scans and diff output stay deterministic.
pub trait RegistryKey: Eq + Hash + Ord + Clone + Display + Send + Sync + 'static {}

impl<T: Eq + Hash + Ord + Clone + Display + Send + Sync + 'static> RegistryKey for T {}

/// An identifiable record managed by a registry.
///
/// `id()` must be stable for the entry's lifetime and unique within one
/// registry snapshot. Equality is used by the synchronizer to decide whether
/// an observed entry counts as updated.
pub trait RegistryEntry: Clone + PartialEq + Send + Sync + 'static {
	type Key: RegistryKey;

	fn id(&self) -> Self::Key;
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FieldError {
	#[error("unknown field '{0}'")]
	UnknownField(String),

	#[error("invalid value for field '{field}': {reason}")]
	InvalidValue { field: String, reason: String },
}

/// Field access by name, implemented per concrete entry type via explicit
/// mapping instead of runtime reflection.
pub trait EntryFields {
	fn get(&self, name: &str) -> Option<Value>;

	fn set(&mut self, name: &str, value: Value) -> Result<(), FieldError>;

	fn has(&self, name: &str) -> bool {
		self.get(name).is_some()
	}
}
