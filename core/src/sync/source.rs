use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::registry::RegistryEntry;

use super::error::SyncError;

/// "Something changed, go re-sync."
///
/// Deliberately carries no payload: the synchronizer always re-fetches the
/// authoritative entry list instead of trusting notification contents.
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceSignal;

/// External, push-based data source a synchronizer mirrors.
#[async_trait]
pub trait EntrySource<E: RegistryEntry>: Send + Sync {
	fn is_data_available(&self) -> bool;

	/// The authoritative full entry list.
	async fn entries(&self) -> Result<Vec<E>, SyncError>;

	fn subscribe(&self) -> broadcast::Receiver<SourceSignal>;
}
