use hearth_utils::FileIOError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VersionControlError {
	#[error(
		"database version {current} is newer than the latest supported version {latest}; \
		 the running software is older than the database"
	)]
	NewerThanSupported { current: u32, latest: u32 },

	#[error(
		"database version marker is unresolved ('?'); \
		 synchronize with the remote repository before loading"
	)]
	UnresolvedMarker,

	#[error(
		"database version marker is missing; a remote-backed database must be \
		 synchronized before any local version logic can run"
	)]
	MissingMarker,

	#[error("version marker would move backwards: {from} -> {to}")]
	MarkerDowngrade { from: u32, to: u32 },

	#[error("malformed version marker: {0}")]
	MalformedMarker(String),

	#[error("two converters registered for version {version}")]
	DuplicateConverter { version: u32 },

	#[error("no converter registered for version step {from} -> {}", .from + 1)]
	MissingConverter { from: u32 },

	#[error("converter for version step {from} -> {} failed: {cause}", .from + 1)]
	Converter { from: u32, cause: String },

	#[error("entry file '{0}' does not contain a JSON object")]
	NonEntryJson(String),

	#[error("no remote release branch compatible with supported version {latest}")]
	MissingReleaseBranch { latest: u32 },

	#[error("git synchronization task failed: {0}")]
	TaskJoin(String),

	#[error("git error: {0}")]
	Git(#[from] git2::Error),

	#[error(transparent)]
	FileIO(#[from] FileIOError),

	#[error("JSON (de)serialization failed: {0}")]
	SerdeJson(#[from] serde_json::Error),
}
