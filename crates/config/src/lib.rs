use anyhow::{anyhow, Result};
use std::fs;
use std::path::PathBuf;

/// Platform-specific data directory resolution
pub fn default_data_dir() -> Result<PathBuf> {
	#[cfg(target_os = "macos")]
	let dir = dirs::data_dir()
		.ok_or_else(|| anyhow!("Could not determine data directory"))?
		.join("hearth");

	#[cfg(target_os = "windows")]
	let dir = dirs::data_dir()
		.ok_or_else(|| anyhow!("Could not determine data directory"))?
		.join("Hearth");

	#[cfg(target_os = "linux")]
	let dir = dirs::data_local_dir()
		.ok_or_else(|| anyhow!("Could not determine data directory"))?
		.join("hearth");

	// Create directory if it doesn't exist
	fs::create_dir_all(&dir)?;

	Ok(dir)
}

/// Runtime flags consumed by the storage core.
///
/// All of these are environment driven so they can be toggled per deployment
/// without touching any config file. Tests construct the struct directly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeFlags {
	/// Overrides read-only and outdated-schema write guards.
	pub force_writes: bool,
	/// Puts every registry into read-only mode regardless of filesystem state.
	pub global_read_only: bool,
	/// Skips loading persisted entries entirely, starting with an empty registry.
	pub reset_db: bool,
	/// Tracks the git `master` branch instead of a release branch.
	pub developer_mode: bool,
	/// Disables file, commit and network side effects so unit tests are hermetic.
	pub test_mode: bool,
}

impl RuntimeFlags {
	pub fn from_env() -> Self {
		Self {
			force_writes: env_flag("HEARTH_FORCE_WRITES"),
			global_read_only: env_flag("HEARTH_READ_ONLY"),
			reset_db: env_flag("HEARTH_RESET_DB"),
			developer_mode: env_flag("HEARTH_DEVELOPER_MODE"),
			test_mode: env_flag("HEARTH_TEST_MODE"),
		}
	}
}

fn env_flag(name: &str) -> bool {
	std::env::var(name).as_deref() == Ok("true")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn flags_default_to_off() {
		let flags = RuntimeFlags::default();
		assert!(!flags.force_writes);
		assert!(!flags.global_read_only);
		assert!(!flags.reset_db);
		assert!(!flags.developer_mode);
		assert!(!flags.test_mode);
	}

	#[test]
	fn env_flag_requires_exact_true() {
		std::env::set_var("HEARTH_TEST_FLAG_PROBE", "1");
		assert!(!env_flag("HEARTH_TEST_FLAG_PROBE"));
		std::env::set_var("HEARTH_TEST_FLAG_PROBE", "true");
		assert!(env_flag("HEARTH_TEST_FLAG_PROBE"));
		std::env::remove_var("HEARTH_TEST_FLAG_PROBE");
	}
}
