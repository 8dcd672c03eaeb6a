//! Database version control.
//!
//! Detects the schema version of a database directory from its `.db-version`
//! marker and upgrades outdated directories through an ordered converter
//! pipeline before a registry is allowed to load them. The git-backed variant
//! synchronizes the directory with a remote repository first, tracking the
//! release branch compatible with the running software.

mod control;
mod converter;
mod error;
mod git;
mod marker;

pub use control::{DbVersionState, VersionControl};
pub use converter::{
	ConverterOutcome, ConverterSet, ConverterSetBuilder, DbConverter, DbSnapshot, EntryJson,
	GlobalDatabase, GlobalSnapshots,
};
pub use error::VersionControlError;
pub use git::{GitSyncOutcome, GitVersionControl};
pub use marker::{MarkerVersion, VersionMarker, DB_VERSION_FILE};
