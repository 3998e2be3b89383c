//! Concurrent registry of live transfer handles.

use std::sync::Arc;

use dashmap::DashMap;
use rh_core::AcquisitionId;

use crate::engine::TransferHandle;

/// Map of acquisition id to the engine handle currently driving it.
///
/// Every method is a single atomic map operation, so the start, stop,
/// poller and cleanup paths can race without double-dropping a handle:
/// whoever removes an entry owns it and is the one that drops it.
#[derive(Clone, Default)]
pub struct HandleMap {
    handles: Arc<DashMap<AcquisitionId, Arc<dyn TransferHandle>>>,
}

impl HandleMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: AcquisitionId) -> bool {
        self.handles.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Install `handle`, dropping and awaiting whatever it replaced.
    pub async fn install(&self, id: AcquisitionId, handle: Arc<dyn TransferHandle>) {
        if let Some(previous) = self.handles.insert(id, handle) {
            tracing::debug!(acquisition_id = %id, "Replacing live transfer handle");
            previous.drop_transfer();
            previous.closed().await;
        }
    }

    /// Remove the handle for `id`, returning it to the caller.
    pub fn take(&self, id: AcquisitionId) -> Option<Arc<dyn TransferHandle>> {
        self.handles.remove(&id).map(|(_, h)| h)
    }

    /// Remove the entry only if it still points at `handle`.
    ///
    /// A poller uses this so it never evicts a handle installed by a later
    /// restart of the same acquisition.
    pub fn take_if_current(
        &self,
        id: AcquisitionId,
        handle: &Arc<dyn TransferHandle>,
    ) -> Option<Arc<dyn TransferHandle>> {
        self.handles
            .remove_if(&id, |_, current| Arc::ptr_eq(current, handle))
            .map(|(_, h)| h)
    }

    /// Remove, drop and await the handle for `id`. Returns false when no
    /// handle was live.
    pub async fn release(&self, id: AcquisitionId) -> bool {
        match self.take(id) {
            Some(handle) => {
                handle.drop_transfer();
                handle.closed().await;
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for HandleMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleMap")
            .field("live", &self.handles.len())
            .finish()
    }
}
