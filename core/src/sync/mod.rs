//! Push-source synchronization.
//!
//! Keeps a registry's contents equal to an external push-based source without
//! synchronizing more often than a configured minimum interval, and without
//! letting one bad entry abort a whole pass.

mod diff;
mod error;
mod source;
mod synchronizer;

pub use diff::{diff_snapshot, Diff};
pub use error::{SyncError, SyncFailure, SyncPassFailures, SyncPhase};
pub use source::{EntrySource, SourceSignal};
pub use synchronizer::{
	AcceptAll, SyncOptions, SyncPolicy, SyncReport, Synchronizer, DEFAULT_MIN_SYNC_INTERVAL,
};
