use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::registry::RegistryEntry;

/// Ephemeral three-way partition of (previous snapshot, newly observed
/// snapshot). Produced fresh on every sync pass, never persisted.
#[derive(Debug, Clone)]
pub struct Diff<E> {
	pub new: Vec<E>,
	pub updated: Vec<E>,
	pub removed: Vec<E>,
	/// Entries present and equal on both sides, the baseline the post-sync
	/// snapshot starts from.
	pub unchanged: Vec<E>,
}

impl<E> Default for Diff<E> {
	fn default() -> Self {
		Self {
			new: Vec::new(),
			updated: Vec::new(),
			removed: Vec::new(),
			unchanged: Vec::new(),
		}
	}
}

impl<E> Diff<E> {
	pub fn is_empty(&self) -> bool {
		self.new.is_empty() && self.updated.is_empty() && self.removed.is_empty()
	}
}

/// Partitions `observed` against `previous`.
///
/// An entry with the same key but different content counts as updated; a
/// duplicate id inside one observation keeps the first occurrence.
pub fn diff_snapshot<E: RegistryEntry>(
	previous: &HashMap<E::Key, E>,
	observed: &[E],
) -> Diff<E> {
	let mut diff = Diff::default();
	let mut seen: HashSet<E::Key> = HashSet::with_capacity(observed.len());

	for entry in observed {
		let key = entry.id();
		if !seen.insert(key.clone()) {
			warn!(%key, "Duplicate entry id in observed snapshot; keeping the first");
			continue;
		}

		match previous.get(&key) {
			None => diff.new.push(entry.clone()),
			Some(prev) if prev == entry => diff.unchanged.push(entry.clone()),
			Some(_) => diff.updated.push(entry.clone()),
		}
	}

	for (key, entry) in previous {
		if !seen.contains(key) {
			diff.removed.push(entry.clone());
		}
	}
	// Removal order is deterministic regardless of map iteration order.
	diff.removed.sort_by(|a, b| a.id().cmp(&b.id()));

	diff
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::device::DeviceEntry;
	use pretty_assertions::assert_eq;

	fn snapshot(entries: &[DeviceEntry]) -> HashMap<uuid::Uuid, DeviceEntry> {
		entries.iter().map(|e| (e.id(), e.clone())).collect()
	}

	#[test]
	fn partitions_all_four_ways() {
		let unchanged = DeviceEntry::new("unchanged");
		let old = DeviceEntry::new("renamed");
		let gone = DeviceEntry::new("gone");
		let fresh = DeviceEntry::new("fresh");

		let mut renamed = old.clone();
		renamed.label = "renamed-indeed".into();

		let previous = snapshot(&[unchanged.clone(), old.clone(), gone.clone()]);
		let observed = vec![unchanged.clone(), renamed.clone(), fresh.clone()];

		let diff = diff_snapshot(&previous, &observed);

		assert_eq!(diff.new, vec![fresh]);
		assert_eq!(diff.updated, vec![renamed]);
		assert_eq!(diff.removed, vec![gone]);
		assert_eq!(diff.unchanged, vec![unchanged]);
	}

	#[test]
	fn empty_observation_removes_everything() {
		let entry = DeviceEntry::new("lonely");
		let diff = diff_snapshot(&snapshot(&[entry.clone()]), &[]);

		assert_eq!(diff.removed, vec![entry]);
		assert!(diff.new.is_empty());
		assert!(diff.updated.is_empty());
	}

	#[test]
	fn duplicate_ids_keep_the_first_occurrence() {
		let entry = DeviceEntry::new("dup");
		let mut shadow = entry.clone();
		shadow.label = "dup-shadow".into();

		let diff = diff_snapshot(&HashMap::new(), &[entry.clone(), shadow]);

		assert_eq!(diff.new, vec![entry]);
	}
}
