use std::{
	fmt,
	io,
	path::{Path, PathBuf},
};

use hearth_utils::FileIOError;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::trace;

use super::error::VersionControlError;

/// Name of the marker file in the database root.
pub const DB_VERSION_FILE: &str = ".db-version";

/// Value encoding "unknown, must be resolved via remote sync".
const UNKNOWN_VERSION: &str = "?";

const MARKER_HEADER: &str = "\
// Database schema version marker, managed by Hearth.
// Do not edit or delete this file; without it the schema version of the
// entries in this directory can no longer be determined.
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerVersion {
	Known(u32),
	/// `?` in the marker file; only a remote sync can resolve it.
	Unknown,
}

impl fmt::Display for MarkerVersion {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Known(version) => write!(f, "{version}"),
			Self::Unknown => write!(f, "{UNKNOWN_VERSION}"),
		}
	}
}

#[derive(Serialize, Deserialize)]
struct MarkerFile {
	version: String,
}

/// The `.db-version` marker of one database directory.
///
/// The persisted version is monotonically non-decreasing over the directory's
/// lifetime; [`VersionMarker::write`] enforces this.
#[derive(Debug, Clone)]
pub struct VersionMarker {
	path: PathBuf,
}

impl VersionMarker {
	pub fn new(db_dir: &Path) -> Self {
		Self {
			path: db_dir.join(DB_VERSION_FILE),
		}
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Reads the marker. `Ok(None)` means the file does not exist.
	pub async fn read(&self) -> Result<Option<MarkerVersion>, VersionControlError> {
		let contents = match fs::read_to_string(&self.path).await {
			Ok(contents) => contents,
			Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
			Err(e) => return Err(FileIOError::from((&self.path, e)).into()),
		};

		// The warning header is comment lines above the JSON object.
		let json: String = contents
			.lines()
			.filter(|line| !line.trim_start().starts_with("//"))
			.collect::<Vec<_>>()
			.join("\n");

		let marker: MarkerFile = serde_json::from_str(&json)
			.map_err(|e| VersionControlError::MalformedMarker(e.to_string()))?;

		if marker.version == UNKNOWN_VERSION {
			return Ok(Some(MarkerVersion::Unknown));
		}

		marker
			.version
			.parse::<u32>()
			.map(|version| Some(MarkerVersion::Known(version)))
			.map_err(|e| VersionControlError::MalformedMarker(e.to_string()))
	}

	/// Persists `version`, refusing to move the marker backwards.
	pub async fn write(&self, version: u32) -> Result<(), VersionControlError> {
		if let Some(MarkerVersion::Known(current)) = self.read().await? {
			if version < current {
				return Err(VersionControlError::MarkerDowngrade {
					from: current,
					to: version,
				});
			}
		}

		let marker = MarkerFile {
			version: version.to_string(),
		};
		let contents = format!("{MARKER_HEADER}{}\n", serde_json::to_string_pretty(&marker)?);

		fs::write(&self.path, contents)
			.await
			.map_err(|e| FileIOError::from((&self.path, e, "Failed to write version marker")))?;
		trace!(path = %self.path.display(), version, "Persisted version marker");

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;
	use tempfile::tempdir;

	#[tokio::test]
	async fn read_write_round_trip_keeps_header() {
		let dir = tempdir().unwrap();
		let marker = VersionMarker::new(dir.path());

		assert_eq!(marker.read().await.unwrap(), None);

		marker.write(3).await.unwrap();
		assert_eq!(
			marker.read().await.unwrap(),
			Some(MarkerVersion::Known(3))
		);

		let raw = std::fs::read_to_string(marker.path()).unwrap();
		assert!(raw.starts_with("// Database schema version marker"));
	}

	#[tokio::test]
	async fn marker_never_decreases() {
		let dir = tempdir().unwrap();
		let marker = VersionMarker::new(dir.path());

		marker.write(2).await.unwrap();
		marker.write(2).await.unwrap();

		assert!(matches!(
			marker.write(1).await,
			Err(VersionControlError::MarkerDowngrade { from: 2, to: 1 })
		));
	}

	#[tokio::test]
	async fn unknown_marker_is_parsed() {
		let dir = tempdir().unwrap();
		let marker = VersionMarker::new(dir.path());

		std::fs::write(
			marker.path(),
			"// some header\n{\n  \"version\": \"?\"\n}\n",
		)
		.unwrap();

		assert_eq!(
			marker.read().await.unwrap(),
			Some(MarkerVersion::Unknown)
		);
	}
}
