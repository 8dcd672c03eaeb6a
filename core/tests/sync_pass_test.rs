mod helpers;

use std::{sync::Arc, time::Duration};

use hearth_core::{
	device::DeviceEntry,
	registry::{MemoryRegistry, Registry, RegistryEntry},
	sync::{AcceptAll, SyncError, SyncOptions, SyncPolicy, Synchronizer},
};
use pretty_assertions::assert_eq;

use helpers::{FlakyRegistry, PushSource};

struct RejectLabel(&'static str);

impl SyncPolicy<DeviceEntry> for RejectLabel {
	fn is_supported(&self, entry: &DeviceEntry) -> bool {
		entry.label != self.0
	}
}

fn synchronizer<R: Registry<DeviceEntry> + 'static, P: SyncPolicy<DeviceEntry> + 'static>(
	source: &Arc<PushSource>,
	registry: &Arc<R>,
	policy: P,
) -> Synchronizer<DeviceEntry, PushSource, R, P> {
	Synchronizer::new(
		Arc::clone(source),
		Arc::clone(registry),
		policy,
		SyncOptions::default(),
	)
}

#[tokio::test]
async fn registry_content_equals_the_observed_snapshot() {
	let source = PushSource::new();
	let registry = Arc::new(MemoryRegistry::<DeviceEntry>::new());
	let sync = synchronizer(&source, &registry, AcceptAll);

	let a = DeviceEntry::new("a");
	let b = DeviceEntry::new("b");
	source.set_entries(vec![a.clone(), b.clone()]).await;

	let report = sync.synchronize().await.unwrap();
	assert_eq!(report.registered, 2);
	assert!(report.initial);
	assert_eq!(helpers::labels(registry.as_ref()).await, vec!["a", "b"]);

	// Second observation: b updated, a removed, c new.
	let mut b2 = b.clone();
	b2.label = "b-renamed".into();
	let c = DeviceEntry::new("c");
	source.set_entries(vec![b2.clone(), c.clone()]).await;

	let report = sync.synchronize().await.unwrap();
	assert_eq!(report.removed, 1);
	assert_eq!(report.updated, 1);
	assert_eq!(report.registered, 1);
	assert!(!report.initial);
	assert_eq!(
		helpers::labels(registry.as_ref()).await,
		vec!["b-renamed", "c"]
	);
}

#[tokio::test]
async fn sync_with_removal_empties_the_registry() {
	let source = PushSource::new();
	let registry = Arc::new(MemoryRegistry::<DeviceEntry>::new());
	let sync = synchronizer(&source, &registry, AcceptAll);

	let a = DeviceEntry::new("a");
	source.set_entries(vec![a.clone()]).await;
	sync.synchronize().await.unwrap();

	source.set_entries(vec![]).await;
	let report = sync.synchronize().await.unwrap();

	assert_eq!(report.removed, 1);
	assert!(registry.entries().await.is_empty());
}

#[tokio::test]
async fn unsupported_new_entries_are_skipped_not_failed() {
	let source = PushSource::new();
	let registry = Arc::new(MemoryRegistry::<DeviceEntry>::new());
	let sync = synchronizer(&source, &registry, RejectLabel("outcast"));

	source
		.set_entries(vec![DeviceEntry::new("member"), DeviceEntry::new("outcast")])
		.await;

	let report = sync.synchronize().await.unwrap();
	assert_eq!(report.registered, 1);
	assert_eq!(report.skipped_unsupported, 1);
	assert_eq!(helpers::labels(registry.as_ref()).await, vec!["member"]);
}

#[tokio::test]
async fn entry_that_loses_support_is_removed_instead_of_updated() {
	let source = PushSource::new();
	let registry = Arc::new(MemoryRegistry::<DeviceEntry>::new());
	let sync = synchronizer(&source, &registry, RejectLabel("downgraded"));

	let b = DeviceEntry::new("b");
	source.set_entries(vec![b.clone()]).await;
	sync.synchronize().await.unwrap();

	let mut b2 = b.clone();
	b2.label = "downgraded".into();
	source.set_entries(vec![b2]).await;

	let report = sync.synchronize().await.unwrap();
	assert_eq!(report.removed, 1);
	assert_eq!(report.updated, 0);
	assert!(registry.entries().await.is_empty());

	// Absent from the new baseline: a third pass sees nothing to do.
	source.set_entries(vec![]).await;
	let report = sync.synchronize().await.unwrap();
	assert_eq!(report.removed, 0);
}

#[tokio::test]
async fn failed_entries_stay_out_of_the_baseline_and_are_reoffered() {
	let source = PushSource::new();
	let registry = Arc::new(FlakyRegistry::new(MemoryRegistry::<DeviceEntry>::new()));
	let sync = synchronizer(&source, &registry, AcceptAll);

	let good = DeviceEntry::new("good");
	let bad = DeviceEntry::new("bad");
	registry.fail_register_for(bad.id()).await;

	source.set_entries(vec![good.clone(), bad.clone()]).await;

	// The pass reports one aggregate failure, but the good entry made it.
	let err = sync.synchronize().await.unwrap_err();
	match &err {
		SyncError::Pass(pass) => assert_eq!(pass.failures.len(), 1),
		other => panic!("expected aggregate pass failure, got {other}"),
	}
	assert_eq!(helpers::labels(registry.inner()).await, vec!["good"]);

	// The failed entry is absent from the baseline, so the next pass offers
	// it as new again.
	let err = sync.synchronize().await.unwrap_err();
	match &err {
		SyncError::Pass(pass) => {
			assert_eq!(pass.failures.len(), 1);
			assert_eq!(pass.failures[0].key, bad.id().to_string());
		}
		other => panic!("expected aggregate pass failure, got {other}"),
	}
}

#[tokio::test(start_paused = true)]
async fn notifications_inside_the_window_collapse_into_one_sync() {
	let source = PushSource::new();
	let registry = Arc::new(MemoryRegistry::<DeviceEntry>::new());
	let sync = Synchronizer::new(
		Arc::clone(&source),
		Arc::clone(&registry),
		AcceptAll,
		SyncOptions {
			min_sync_interval: Duration::from_millis(15_000),
			verification_mode: false,
		},
	);

	source.set_entries(vec![DeviceEntry::new("first")]).await;
	sync.activate().await.unwrap();
	assert_eq!(registry.entries().await.len(), 1);

	// Burst of notifications right after the initial pass.
	source
		.set_entries(vec![DeviceEntry::new("first"), DeviceEntry::new("second")])
		.await;
	source.notify();
	source.notify();
	source.notify();

	// Inside the rate-limit window nothing has happened yet.
	tokio::time::sleep(Duration::from_millis(1_000)).await;
	assert_eq!(registry.entries().await.len(), 1);

	// Once the window elapses, exactly one collapsed sync runs.
	tokio::time::sleep(Duration::from_millis(20_000)).await;
	assert_eq!(registry.entries().await.len(), 2);

	sync.deactivate();
}

#[tokio::test]
async fn activate_twice_is_an_error() {
	let source = PushSource::new();
	let registry = Arc::new(MemoryRegistry::<DeviceEntry>::new());
	let sync = synchronizer(&source, &registry, AcceptAll);

	sync.activate().await.unwrap();
	assert!(matches!(sync.activate().await, Err(SyncError::AlreadyActive)));
	sync.deactivate();
}
