use std::path::{Path, PathBuf};

use git2::{build::CheckoutBuilder, BranchType, Repository, StatusOptions};
use tracing::{debug, info, warn};

use super::{control::VersionControl, error::VersionControlError};

const DEVELOPER_BRANCH: &str = "master";
const RELEASE_BRANCH_PREFIX: &str = "release-";

/// How a remote synchronization attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum GitSyncOutcome {
	/// Tracking the selected branch and up to date with the remote.
	Synced,
	/// Remote unreachable; continuing with the local checkout.
	Offline,
	/// An operator's custom branch with a clean tree was synced, but custom
	/// branches are never auto-upgraded.
	SyncedCustomBranch,
	/// A custom branch with local modifications; neither synced nor
	/// upgraded, to avoid clobbering manual fixes.
	SkippedDirtyCustomBranch,
}

impl GitSyncOutcome {
	pub fn permits_upgrade(&self) -> bool {
		matches!(self, Self::Synced | Self::Offline)
	}
}

/// Version control for a database directory hosted in a git repository.
///
/// Synchronizes the directory with its remote before any local version logic
/// runs, selecting the release branch compatible with the running software.
pub struct GitVersionControl {
	local: VersionControl,
	repo_dir: PathBuf,
	developer_mode: bool,
	test_mode: bool,
}

impl GitVersionControl {
	pub fn new(
		local: VersionControl,
		repo_dir: impl Into<PathBuf>,
		developer_mode: bool,
		test_mode: bool,
	) -> Self {
		Self {
			local,
			repo_dir: repo_dir.into(),
			developer_mode,
			test_mode,
		}
	}

	pub fn local(&self) -> &VersionControl {
		&self.local
	}

	/// Fetches from `origin` and checks out the branch this software can
	/// load, per the branch policy described on [`GitSyncOutcome`].
	pub async fn synchronize(&self) -> Result<GitSyncOutcome, VersionControlError> {
		if self.test_mode {
			return Ok(GitSyncOutcome::Synced);
		}

		let repo_dir = self.repo_dir.clone();
		let developer_mode = self.developer_mode;
		let latest = self.local.latest_supported();

		tokio::task::spawn_blocking(move || {
			sync_repository(&repo_dir, developer_mode, latest)
		})
		.await
		.map_err(|e| VersionControlError::TaskJoin(e.to_string()))?
	}
}

fn sync_repository(
	repo_dir: &Path,
	developer_mode: bool,
	latest: u32,
) -> Result<GitSyncOutcome, VersionControlError> {
	let repo = Repository::open(repo_dir)?;
	let branch = repo
		.head()?
		.shorthand()
		.unwrap_or("HEAD")
		.to_string();

	let is_custom = branch != DEVELOPER_BRANCH && parse_release_branch(&branch).is_none();
	if is_custom {
		if has_local_modifications(&repo)? {
			warn!(
				branch,
				"Database repository is on a custom branch with local modifications; \
				 skipping synchronization",
			);
			return Ok(GitSyncOutcome::SkippedDirtyCustomBranch);
		}

		if let Err(e) = fetch_origin(&repo) {
			warn!(branch, %e, "Fetch from origin failed; continuing offline");
		} else {
			fast_forward(&repo, &branch)?;
		}

		return Ok(GitSyncOutcome::SyncedCustomBranch);
	}

	let offline = match fetch_origin(&repo) {
		Ok(()) => false,
		Err(e) => {
			warn!(%e, "Fetch from origin failed; continuing offline");
			true
		}
	};

	let target = if developer_mode {
		DEVELOPER_BRANCH.to_string()
	} else {
		// Resolved from refs/remotes/origin/, which survives offline since
		// it is populated by previous fetches. A missing release branch is a
		// hard error: it was expected to exist remotely.
		select_release_branch(&repo, latest)?
	};

	if branch != target {
		checkout_tracking_branch(&repo, &target)?;
	}
	if !offline {
		fast_forward(&repo, &target)?;
	}

	Ok(if offline {
		GitSyncOutcome::Offline
	} else {
		GitSyncOutcome::Synced
	})
}

fn parse_release_branch(name: &str) -> Option<u32> {
	name.strip_prefix(RELEASE_BRANCH_PREFIX)?.parse().ok()
}

fn has_local_modifications(repo: &Repository) -> Result<bool, VersionControlError> {
	let mut options = StatusOptions::new();
	options.include_untracked(true).include_ignored(false);

	Ok(!repo.statuses(Some(&mut options))?.is_empty())
}

fn fetch_origin(repo: &Repository) -> Result<(), git2::Error> {
	let mut remote = repo.find_remote("origin")?;
	// An empty refspec list fetches the remote's configured base refspecs.
	remote.fetch(&[] as &[&str], None, None)
}

/// The highest remote `release-N` branch with `N` no newer than the locally
/// supported latest version.
fn select_release_branch(
	repo: &Repository,
	latest: u32,
) -> Result<String, VersionControlError> {
	let mut best: Option<u32> = None;

	for branch in repo.branches(Some(BranchType::Remote))? {
		let (branch, _) = branch?;
		let name = match branch.name()? {
			Some(name) => name,
			None => continue,
		};
		let Some(name) = name.strip_prefix("origin/") else {
			continue;
		};

		if let Some(version) = parse_release_branch(name) {
			if version <= latest && best.map_or(true, |b| version > b) {
				best = Some(version);
			}
		}
	}

	best.map(|version| format!("{RELEASE_BRANCH_PREFIX}{version}"))
		.ok_or(VersionControlError::MissingReleaseBranch { latest })
}

fn checkout_tracking_branch(repo: &Repository, name: &str) -> Result<(), VersionControlError> {
	if repo.find_branch(name, BranchType::Local).is_err() {
		let remote_branch = repo.find_branch(&format!("origin/{name}"), BranchType::Remote)?;
		let commit = remote_branch.get().peel_to_commit()?;
		let mut local_branch = repo.branch(name, &commit, false)?;
		local_branch.set_upstream(Some(&format!("origin/{name}")))?;
	}

	repo.set_head(&format!("refs/heads/{name}"))?;
	repo.checkout_head(Some(CheckoutBuilder::new().force()))?;
	info!(branch = name, "Checked out database branch");

	Ok(())
}

fn fast_forward(repo: &Repository, branch: &str) -> Result<(), VersionControlError> {
	let remote_branch = match repo.find_branch(&format!("origin/{branch}"), BranchType::Remote) {
		Ok(remote_branch) => remote_branch,
		Err(_) => {
			debug!(branch, "No remote counterpart to fast-forward from");
			return Ok(());
		}
	};

	let annotated = repo.reference_to_annotated_commit(remote_branch.get())?;
	let (analysis, _) = repo.merge_analysis(&[&annotated])?;

	if analysis.is_up_to_date() {
		return Ok(());
	}

	if analysis.is_fast_forward() {
		let refname = format!("refs/heads/{branch}");
		let mut reference = repo.find_reference(&refname)?;
		reference.set_target(annotated.id(), "fast-forward")?;
		repo.set_head(&refname)?;
		repo.checkout_head(Some(CheckoutBuilder::new().force()))?;
		info!(branch, "Fast-forwarded database repository");
	} else {
		warn!(
			branch,
			"Database repository diverged from remote; leaving local state to the operator",
		);
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn release_branch_names_parse() {
		assert_eq!(parse_release_branch("release-4"), Some(4));
		assert_eq!(parse_release_branch("release-"), None);
		assert_eq!(parse_release_branch("master"), None);
		assert_eq!(parse_release_branch("feature/release-4"), None);
	}
}
